//! Line joining and tokenizing for netlist decks.

use crate::error::{Result, SimError};

/// Function names whose parenthesized argument list belongs to them even
/// when separated by whitespace.
const FUNCTIONS: [&str; 9] = ["PWL", "PULSE", "SIN", "EXP", "CUS", "NOISE", "PWS", "DC", "JJ"];

/// One logical deck line after comment removal and continuation joining.
#[derive(Debug, Clone, PartialEq)]
pub struct LogicalLine {
    /// Line number of the first physical line (1-indexed)
    pub line: usize,
    /// Tokens; a function call such as `PWL(0 0 10p 1m)` is one token
    pub tokens: Vec<String>,
}

/// Split a deck into logical lines.
///
/// - `*` at the start of a line comments out the whole line
/// - `#` and `;` comment out the rest of a line
/// - a line starting with `+` continues the previous one
pub fn logical_lines(input: &str) -> Result<Vec<LogicalLine>> {
    let mut joined: Vec<(usize, String)> = Vec::new();

    for (index, raw) in input.lines().enumerate() {
        let number = index + 1;
        let text = strip_comment(raw).trim();
        if text.is_empty() {
            continue;
        }
        if let Some(rest) = text.strip_prefix('+') {
            match joined.last_mut() {
                Some((_, previous)) => {
                    previous.push(' ');
                    previous.push_str(rest);
                }
                None => return Err(SimError::parse(number, "continuation line with nothing to continue")),
            }
        } else {
            joined.push((number, text.to_string()));
        }
    }

    joined
        .into_iter()
        .map(|(line, text)| {
            Ok(LogicalLine {
                line,
                tokens: tokenize(&text, line)?,
            })
        })
        .collect()
}

fn strip_comment(raw: &str) -> &str {
    if raw.trim_start().starts_with('*') {
        return "";
    }
    match raw.find(|c| c == '#' || c == ';') {
        Some(pos) => &raw[..pos],
        None => raw,
    }
}

/// Tokenize one logical line.
///
/// Whitespace and commas separate tokens. `key = value` collapses into the
/// single token `key=value`, and a parenthesized group is attached to the
/// function name before it.
pub fn tokenize(text: &str, line: usize) -> Result<Vec<String>> {
    let mut tokens: Vec<String> = Vec::new();
    let mut current = String::new();
    // The next token continues the last one (after '=')
    let mut glue = false;
    let mut chars = text.chars();

    while let Some(c) = chars.next() {
        match c {
            c if c.is_whitespace() || c == ',' => flush(&mut tokens, &mut current, &mut glue),
            '=' => {
                if current.is_empty() {
                    match tokens.last_mut() {
                        Some(last) if !glue => last.push('='),
                        _ => return Err(SimError::parse(line, "'=' without a key")),
                    }
                } else {
                    current.push('=');
                    flush(&mut tokens, &mut current, &mut glue);
                }
                glue = true;
            }
            '(' => {
                let mut depth = 1;
                let mut inner = String::new();
                for c in chars.by_ref() {
                    match c {
                        '(' => depth += 1,
                        ')' => depth -= 1,
                        _ => {}
                    }
                    if depth == 0 {
                        break;
                    }
                    inner.push(c);
                }
                if depth != 0 {
                    return Err(SimError::parse(line, "unbalanced parenthesis"));
                }
                let group = format!("({})", tokenize(&inner, line)?.join(" "));

                if !current.is_empty() {
                    current.push_str(&group);
                    flush(&mut tokens, &mut current, &mut glue);
                } else if glue {
                    current = group;
                    flush(&mut tokens, &mut current, &mut glue);
                } else {
                    match tokens.last_mut() {
                        Some(last) if is_function(last) => last.push_str(&group),
                        _ => tokens.push(group),
                    }
                }
            }
            ')' => return Err(SimError::parse(line, "unbalanced parenthesis")),
            c => current.push(c),
        }
    }
    flush(&mut tokens, &mut current, &mut glue);
    if glue {
        return Err(SimError::parse(line, "missing value after '='"));
    }
    Ok(tokens)
}

fn flush(tokens: &mut Vec<String>, current: &mut String, glue: &mut bool) {
    if current.is_empty() {
        return;
    }
    match tokens.last_mut() {
        Some(last) if *glue => last.push_str(current),
        _ => tokens.push(current.clone()),
    }
    current.clear();
    *glue = ends_with_equals(tokens);
}

fn ends_with_equals(tokens: &[String]) -> bool {
    tokens.last().map(|t| t.ends_with('=')).unwrap_or(false)
}

fn is_function(token: &str) -> bool {
    FUNCTIONS.iter().any(|f| f.eq_ignore_ascii_case(token))
}

/// Split `NAME(a b c)` into the upper-cased name and its arguments.
pub fn split_call(token: &str) -> Option<(String, Vec<&str>)> {
    let open = token.find('(')?;
    let inner = token[open + 1..].strip_suffix(')')?;
    Some((token[..open].to_uppercase(), inner.split_whitespace().collect()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(text: &str) -> Vec<String> {
        tokenize(text, 1).unwrap()
    }

    #[test]
    fn test_plain_tokens() {
        assert_eq!(tokens("R1 a  b\t2.5"), vec!["R1", "a", "b", "2.5"]);
    }

    #[test]
    fn test_key_value_collapses() {
        assert_eq!(tokens("T1 a 0 b 0 TD = 10p Z0= 5"), vec!["T1", "a", "0", "b", "0", "TD=10p", "Z0=5"]);
        assert_eq!(tokens("B1 a 0 jj1 area =2"), vec!["B1", "a", "0", "jj1", "area=2"]);
    }

    #[test]
    fn test_function_groups() {
        assert_eq!(
            tokens("I1 0 a pwl(0 0, 10p 1m)"),
            vec!["I1", "0", "a", "pwl(0 0 10p 1m)"]
        );
        assert_eq!(
            tokens(".model jj1 jj (rtype = 1, vg=2.8mV)"),
            vec![".model", "jj1", "jj(rtype=1 vg=2.8mV)"]
        );
    }

    #[test]
    fn test_unbalanced_parenthesis() {
        assert!(matches!(
            tokenize("I1 0 a pwl(0 0", 7),
            Err(SimError::ParseError { line: 7, .. })
        ));
        assert!(tokenize("R1 a b 1)", 1).is_err());
        assert!(tokenize("TD=", 1).is_err());
    }

    #[test]
    fn test_comments_and_continuations() {
        let deck = "* title\nR1 a b 1 ; trailing\n\nI1 0 a pwl(0 0\n+ 10p 1m) # more\n";
        let lines = logical_lines(deck).unwrap();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].line, 2);
        assert_eq!(lines[1].line, 4);
        assert_eq!(lines[1].tokens, vec!["I1", "0", "a", "pwl(0 0 10p 1m)"]);
    }

    #[test]
    fn test_orphan_continuation() {
        assert!(matches!(
            logical_lines("+ R1 a b 1"),
            Err(SimError::ParseError { line: 1, .. })
        ));
    }

    #[test]
    fn test_split_call() {
        let (name, args) = split_call("jj(rtype=1 vg=2.8mV)").unwrap();
        assert_eq!(name, "JJ");
        assert_eq!(args, vec!["rtype=1", "vg=2.8mV"]);
        assert!(split_call("jj").is_none());
    }
}
