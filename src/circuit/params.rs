//! Resolved parameter values and scoped lookup tables.
//!
//! Parameter expressions are evaluated before they reach the simulator;
//! every entry here is already a plain number. Lookups try the owning
//! subcircuit scope first and fall back to the global scope.

use std::collections::HashMap;

use crate::error::{Result, SimError};

/// Parse a numeric literal with an optional SPICE scale suffix.
///
/// Suffixes are case-insensitive: `f p n u m k meg x g t`. Any trailing
/// letters after the scale (units such as `pH`, `mA`, `ohm`) are ignored.
/// Returns `None` if the text does not start with a number.
pub fn parse_number(text: &str) -> Option<f64> {
    let text = text.trim();
    let bytes = text.as_bytes();
    let mut end = 0;

    if end < bytes.len() && (bytes[end] == b'+' || bytes[end] == b'-') {
        end += 1;
    }
    let digits_start = end;
    while end < bytes.len() && (bytes[end].is_ascii_digit() || bytes[end] == b'.') {
        end += 1;
    }
    if end == digits_start {
        return None;
    }
    // Exponent only if a digit follows the optional sign
    if end < bytes.len() && (bytes[end] == b'e' || bytes[end] == b'E') {
        let mut next = end + 1;
        if next < bytes.len() && (bytes[next] == b'+' || bytes[next] == b'-') {
            next += 1;
        }
        if next < bytes.len() && bytes[next].is_ascii_digit() {
            end = next;
            while end < bytes.len() && bytes[end].is_ascii_digit() {
                end += 1;
            }
        }
    }

    let value: f64 = text[..end].parse().ok()?;
    let rest = text[end..].to_lowercase();
    if !rest.chars().all(|c| c.is_alphabetic()) {
        return None;
    }

    let multiplier = if rest.starts_with("meg") {
        1e6
    } else {
        match rest.chars().next() {
            Some('f') => 1e-15,
            Some('p') => 1e-12,
            Some('n') => 1e-9,
            Some('u') | Some('µ') => 1e-6,
            Some('m') => 1e-3,
            Some('k') => 1e3,
            Some('x') => 1e6,
            Some('g') => 1e9,
            Some('t') => 1e12,
            _ => 1.0,
        }
    };

    Some(value * multiplier)
}

/// Lookup table keyed by (name, optional scope).
///
/// Names are case-insensitive.
#[derive(Debug, Clone)]
pub struct ScopedMap<T> {
    entries: HashMap<(String, Option<String>), T>,
}

impl<T> Default for ScopedMap<T> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

impl<T> ScopedMap<T> {
    /// Create an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a value, returning the previous one for the same key.
    pub fn insert(&mut self, name: &str, scope: Option<&str>, value: T) -> Option<T> {
        self.entries.insert(key(name, scope), value)
    }

    /// Look up `name` in `scope`, then in the global scope.
    pub fn get(&self, name: &str, scope: Option<&str>) -> Option<&T> {
        if scope.is_some() {
            if let Some(value) = self.entries.get(&key(name, scope)) {
                return Some(value);
            }
        }
        self.entries.get(&key(name, None))
    }

    /// Returns true if the exact key exists.
    pub fn contains(&self, name: &str, scope: Option<&str>) -> bool {
        self.entries.contains_key(&key(name, scope))
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if there are no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn key(name: &str, scope: Option<&str>) -> (String, Option<String>) {
    (name.to_uppercase(), scope.map(str::to_uppercase))
}

/// Resolved parameter values.
pub type ParamMap = ScopedMap<f64>;

impl ScopedMap<f64> {
    /// Resolve a token to a number: a literal first, then a parameter name.
    ///
    /// `label` names the device (or model) being built, for the error message.
    pub fn resolve(&self, token: &str, scope: Option<&str>, label: &str) -> Result<f64> {
        if let Some(value) = parse_number(token) {
            return Ok(value);
        }
        self.get(token, scope)
            .copied()
            .ok_or_else(|| SimError::unresolved(label, token))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_parse_number_suffixes() {
        assert_relative_eq!(parse_number("10k").unwrap(), 10_000.0);
        assert_relative_eq!(parse_number("2.5p").unwrap(), 2.5e-12);
        assert_relative_eq!(parse_number("1pH").unwrap(), 1e-12);
        assert_relative_eq!(parse_number("1mA").unwrap(), 1e-3);
        assert_relative_eq!(parse_number("4.7u").unwrap(), 4.7e-6);
        assert_relative_eq!(parse_number("1MEG").unwrap(), 1e6);
        assert_relative_eq!(parse_number("3f").unwrap(), 3e-15);
        assert_relative_eq!(parse_number("-0.5").unwrap(), -0.5);
        assert_relative_eq!(parse_number("1e-9").unwrap(), 1e-9);
        assert_relative_eq!(parse_number("2.8E-3V").unwrap(), 2.8e-3);
        assert_relative_eq!(parse_number("5ohm").unwrap(), 5.0);
    }

    #[test]
    fn test_parse_number_rejects_names() {
        assert!(parse_number("Lbias").is_none());
        assert!(parse_number("").is_none());
        assert!(parse_number("1k=3").is_none());
    }

    #[test]
    fn test_scoped_lookup_prefers_scope() {
        let mut params = ParamMap::new();
        params.insert("lp", None, 2e-12);
        params.insert("LP", Some("dff"), 3e-12);

        assert_relative_eq!(params.resolve("lp", Some("dff"), "L1").unwrap(), 3e-12);
        assert_relative_eq!(params.resolve("lp", Some("other"), "L1").unwrap(), 2e-12);
        assert_relative_eq!(params.resolve("lp", None, "L1").unwrap(), 2e-12);
        assert_relative_eq!(params.resolve("7p", None, "L1").unwrap(), 7e-12);
    }

    #[test]
    fn test_unresolved_parameter_error() {
        let params = ParamMap::new();
        let err = params.resolve("missing", None, "R9").unwrap_err();
        assert!(matches!(err, SimError::UnresolvedParameter { ref token, .. } if token == "missing"));
    }
}
