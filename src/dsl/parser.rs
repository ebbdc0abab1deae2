//! Parser turning logical deck lines into a [`Deck`].

use super::ast::{Deck, IvRequest, TranSpec};
use super::lexer::{split_call, LogicalLine};
use crate::circuit::Declaration;
use crate::components::JjModel;
use crate::error::{Result, SimError};
use crate::solver::TraceRequest;

/// Parser for netlist decks.
pub struct Parser {
    lines: Vec<LogicalLine>,
}

impl Parser {
    /// Create a parser over already joined lines.
    pub fn new(lines: Vec<LogicalLine>) -> Self {
        Self { lines }
    }

    /// Parse every line up to `.end` (or the end of input).
    pub fn parse(self) -> Result<Deck> {
        let mut deck = Deck::new();

        for LogicalLine { line, tokens } in self.lines {
            let Some(first) = tokens.first() else {
                continue;
            };

            if first.starts_with('.') {
                if first.eq_ignore_ascii_case(".end") {
                    break;
                }
                parse_directive(&mut deck, line, &tokens)?;
            } else {
                let mut decl = Declaration::new(tokens);
                decl.line = line;
                deck.declarations.push(decl);
            }
        }

        log::debug!(
            "deck: {} declarations, {} parameters, {} models, {} traces",
            deck.declarations.len(),
            deck.params.len(),
            deck.models.len(),
            deck.traces.len()
        );
        Ok(deck)
    }
}

fn parse_directive(deck: &mut Deck, line: usize, tokens: &[String]) -> Result<()> {
    let args = &tokens[1..];
    let number = |token: &str| -> Result<f64> {
        deck.params
            .resolve(token, None, &tokens[0])
            .map_err(|_| SimError::parse(line, format!("cannot resolve value '{}'", token)))
    };

    match tokens[0].to_lowercase().as_str() {
        ".param" => {
            if args.is_empty() {
                return Err(SimError::parse(line, ".param needs name=value"));
            }
            let mut values = Vec::with_capacity(args.len());
            for arg in args {
                let (name, value) = arg
                    .split_once('=')
                    .ok_or_else(|| SimError::parse(line, format!("expected name=value, got '{}'", arg)))?;
                values.push((name.to_string(), number(value)?));
            }
            for (name, value) in values {
                deck.params.insert(&name, None, value);
            }
        }
        ".model" => {
            let model = parse_model(deck, line, args)?;
            let name = model.name.clone();
            if deck.models.insert(&name, None, model).is_some() {
                log::warn!("line {}: model {} redefined", line, name);
            }
        }
        ".tran" => {
            if args.len() < 2 {
                return Err(SimError::parse(line, ".tran needs a timestep and a stop time"));
            }
            let timestep = number(&args[0])?;
            let stop_time = number(&args[1])?;
            let print_start = args.get(2).map(|a| number(a)).transpose()?.unwrap_or(0.0);
            let print_step = args.get(3).map(|a| number(a)).transpose()?;
            deck.tran = Some(TranSpec {
                timestep,
                stop_time,
                print_start,
                print_step,
            });
        }
        ".temp" => deck.temperature = Some(single(line, args, &number)?),
        ".neb" => deck.bandwidth = Some(single(line, args, &number)?),
        ".print" => {
            let request = parse_print(line, args)?;
            deck.traces.push(request);
        }
        ".spread" => {
            if args.is_empty() {
                return Err(SimError::parse(line, ".spread needs at least one value"));
            }
            for arg in args {
                let (key, value) = match arg.split_once('=') {
                    Some((key, value)) => (Some(key), value),
                    None => (None, arg.as_str()),
                };
                let value = number(value)?;
                deck.spread
                    .set(key, value)
                    .map_err(|e| SimError::parse(line, e.to_string()))?;
            }
        }
        ".iv" => {
            let [model, max_current, output] = args else {
                return Err(SimError::parse(line, "expected .iv <model> <max current> <file>"));
            };
            deck.iv.push(IvRequest {
                model: model.clone(),
                max_current: number(max_current)?,
                output: output.into(),
            });
        }
        ".subckt" | ".ends" | ".include" => {
            return Err(SimError::parse(
                line,
                format!("{} is not supported; expand the deck first", tokens[0]),
            ));
        }
        other => log::warn!("line {}: ignoring directive {}", line, other),
    }
    Ok(())
}

fn single(line: usize, args: &[String], number: &impl Fn(&str) -> Result<f64>) -> Result<f64> {
    match args {
        [value] => number(value),
        _ => Err(SimError::parse(line, "expected exactly one value")),
    }
}

fn parse_model(deck: &Deck, line: usize, args: &[String]) -> Result<JjModel> {
    let [name, body] = args else {
        return Err(SimError::parse(line, "expected .model <name> jj(<key=value> ...)"));
    };
    let (kind, pairs) = split_call(body)
        .ok_or_else(|| SimError::parse(line, format!("malformed model body '{}'", body)))?;
    if kind != "JJ" {
        return Err(SimError::parse(line, format!("unsupported model type '{}'", kind)));
    }

    let mut values = Vec::with_capacity(pairs.len());
    for pair in pairs {
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| SimError::parse(line, format!("expected key=value, got '{}'", pair)))?;
        let value = deck
            .params
            .resolve(value, None, name)
            .map_err(|_| SimError::parse(line, format!("cannot resolve value '{}'", value)))?;
        values.push((key, value));
    }
    JjModel::from_parameters(name, values)
}

fn parse_print(line: usize, args: &[String]) -> Result<TraceRequest> {
    let [kind, target] = args else {
        return Err(SimError::parse(line, "expected .print <kind> <target>"));
    };
    let target = target.clone();
    match kind.to_lowercase().as_str() {
        "nodev" | "nodep" => Ok(TraceRequest::Node(target)),
        "devi" => Ok(TraceRequest::DeviceCurrent(target)),
        "phase" | "devp" => Ok(TraceRequest::JunctionPhase(target)),
        other => Err(SimError::parse(line, format!("unknown print kind '{}'", other))),
    }
}
