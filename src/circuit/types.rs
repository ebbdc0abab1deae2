//! Core types for circuit representation.

use std::fmt;
use std::str::FromStr;

use crate::error::{Result, SimError};

/// Index of a non-ground node in the unknown vector.
///
/// Ground is never indexed; a grounded terminal is represented as `None`
/// (see [`Terminal`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeIndex(pub usize);

impl fmt::Display for NodeIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "N{}", self.0)
    }
}

/// Absolute index of a branch unknown (device current or internal variable).
///
/// Branch indices always start at the node count, so they can be used
/// directly as row/column numbers of the MNA system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BranchIndex(pub usize);

impl fmt::Display for BranchIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "I{}", self.0)
    }
}

/// A device terminal: a node index, or `None` for ground.
pub type Terminal = Option<NodeIndex>;

/// Column of a terminal in the MNA system, `None` for ground.
pub fn column(terminal: Terminal) -> Option<usize> {
    terminal.map(|n| n.0)
}

/// Value of a terminal in a solution vector (ground reads as zero).
pub fn terminal_value(x: &[f64], terminal: Terminal) -> f64 {
    match terminal {
        Some(NodeIndex(i)) => x[i],
        None => 0.0,
    }
}

/// Difference between two terminals of a solution vector.
pub fn across(x: &[f64], nodes: [Terminal; 2]) -> f64 {
    terminal_value(x, nodes[0]) - terminal_value(x, nodes[1])
}

/// Returns true if a node name denotes ground (`0` or anything containing `GND`).
pub fn is_ground_name(name: &str) -> bool {
    name == "0" || name.to_uppercase().contains("GND")
}

/// Which terminals of a two-terminal device are connected to a non-ground node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeConfig {
    /// Both terminals grounded (invalid for every device)
    Grounded,
    /// Only the positive terminal is a node
    PositiveOnly,
    /// Only the negative terminal is a node
    NegativeOnly,
    /// Neither terminal is grounded
    Both,
}

impl NodeConfig {
    /// Classify a terminal pair.
    pub fn from_terminals(pos: Terminal, neg: Terminal) -> Self {
        match (pos, neg) {
            (None, None) => NodeConfig::Grounded,
            (Some(_), None) => NodeConfig::PositiveOnly,
            (None, Some(_)) => NodeConfig::NegativeOnly,
            (Some(_), Some(_)) => NodeConfig::Both,
        }
    }

    /// Same as [`NodeConfig::from_terminals`] but rejects a fully grounded pair.
    pub fn checked(label: &str, nodes: [Terminal; 2]) -> Result<Self> {
        match Self::from_terminals(nodes[0], nodes[1]) {
            NodeConfig::Grounded => Err(SimError::BothTerminalsGrounded {
                label: label.to_string(),
            }),
            config => Ok(config),
        }
    }
}

/// Quantity represented by the node unknowns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AnalysisType {
    /// Node unknowns are voltages
    Voltage,
    /// Node unknowns are superconducting phases
    #[default]
    Phase,
}

impl FromStr for AnalysisType {
    type Err = SimError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "voltage" | "v" | "0" => Ok(AnalysisType::Voltage),
            "phase" | "p" | "1" => Ok(AnalysisType::Phase),
            other => Err(SimError::invalid_param(format!(
                "unknown analysis type '{}' (expected voltage or phase)",
                other
            ))),
        }
    }
}

impl fmt::Display for AnalysisType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnalysisType::Voltage => write!(f, "voltage"),
            AnalysisType::Phase => write!(f, "phase"),
        }
    }
}

/// One flattened device declaration.
///
/// The first token is the device label; its leading letter selects the
/// device kind. Terminal names and kind-specific values follow.
#[derive(Debug, Clone, PartialEq)]
pub struct Declaration {
    /// Whitespace-separated tokens (function groups such as `PWL(...)` form one token)
    pub tokens: Vec<String>,
    /// Owning subcircuit, used for scoped parameter and model lookup
    pub scope: Option<String>,
    /// Source line for diagnostics (0 if unknown)
    pub line: usize,
}

impl Declaration {
    /// Create a top-level declaration from tokens.
    pub fn new<S: Into<String>>(tokens: impl IntoIterator<Item = S>) -> Self {
        Self {
            tokens: tokens.into_iter().map(Into::into).collect(),
            scope: None,
            line: 0,
        }
    }

    /// Attach an owning subcircuit.
    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    /// Device label (first token).
    pub fn label(&self) -> &str {
        self.tokens.first().map(String::as_str).unwrap_or("")
    }

    /// Leading letter of the label, upper-cased.
    pub fn kind_letter(&self) -> Option<char> {
        self.label().chars().next().map(|c| c.to_ascii_uppercase())
    }

    /// Original text of the declaration, for error messages.
    pub fn text(&self) -> String {
        self.tokens.join(" ")
    }
}

/// Hands out branch indices in declaration order.
///
/// Indices start at the node count so they are absolute positions in the
/// unknown vector.
#[derive(Debug)]
pub struct BranchAllocator {
    first: usize,
    next: usize,
}

impl BranchAllocator {
    /// Create an allocator whose first index is `node_count`.
    pub fn new(node_count: usize) -> Self {
        Self {
            first: node_count,
            next: node_count,
        }
    }

    /// Allocate the next branch index.
    pub fn allocate(&mut self) -> BranchIndex {
        let index = BranchIndex(self.next);
        self.next += 1;
        index
    }

    /// Number of branches allocated so far.
    pub fn count(&self) -> usize {
        self.next - self.first
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ground_names() {
        assert!(is_ground_name("0"));
        assert!(is_ground_name("GND"));
        assert!(is_ground_name("agnd_1"));
        assert!(!is_ground_name("00"));
        assert!(!is_ground_name("n1"));
    }

    #[test]
    fn test_node_config() {
        let n = Some(NodeIndex(3));
        assert_eq!(NodeConfig::from_terminals(n, None), NodeConfig::PositiveOnly);
        assert_eq!(NodeConfig::from_terminals(None, n), NodeConfig::NegativeOnly);
        assert_eq!(NodeConfig::from_terminals(n, n), NodeConfig::Both);
        assert!(matches!(
            NodeConfig::checked("R1", [None, None]),
            Err(SimError::BothTerminalsGrounded { .. })
        ));
    }

    #[test]
    fn test_branch_allocator_is_monotonic() {
        let mut alloc = BranchAllocator::new(4);
        assert_eq!(alloc.allocate(), BranchIndex(4));
        assert_eq!(alloc.allocate(), BranchIndex(5));
        assert_eq!(alloc.allocate(), BranchIndex(6));
        assert_eq!(alloc.count(), 3);
    }

    #[test]
    fn test_analysis_type_parse() {
        assert_eq!("Phase".parse::<AnalysisType>().unwrap(), AnalysisType::Phase);
        assert_eq!("voltage".parse::<AnalysisType>().unwrap(), AnalysisType::Voltage);
        assert!("ac".parse::<AnalysisType>().is_err());
    }
}
