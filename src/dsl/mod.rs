//! Netlist deck reader.
//!
//! This module reads a flat, SPICE-flavoured deck into a [`Deck`]: device
//! declarations plus the numeric parameters, junction models, transient
//! control and trace requests that go with them. The format is
//! line-oriented and human-editable. Subcircuits and parameter
//! expressions are not supported; the deck must already be flat.
//!
//! # Grammar Overview
//!
//! ```text
//! deck        = { line }
//! line        = comment | continuation | directive | device | empty
//! comment     = '*' { any_char }            (whole line)
//!             | ('#' | ';') { any_char }    (rest of line)
//! continuation = '+' { token }              (appended to the previous line)
//! directive   = '.' directive_name { token }
//! device      = label { token }
//! token       = word | word '=' word | word '(' { word } ')'
//! ```
//!
//! Commas are separators, so `PWL(0 0, 10p 1m)` and `PWL(0 0 10p 1m)` are
//! the same token.
//!
//! # Devices
//!
//! | Letter | Device | Syntax |
//! |--------|--------|--------|
//! | R | Resistor | `R<name> <n+> <n-> <value> [spread=<s>]` |
//! | L | Inductor | `L<name> <n+> <n-> <value> [spread=<s>]` |
//! | C | Capacitor | `C<name> <n+> <n-> <value> [spread=<s>]` |
//! | B | Josephson junction | `B<name> <n+> <n-> <model> [area=<a>] [spread=<s>]` |
//! | I | Current source | `I<name> <n+> <n-> <waveform>` |
//! | V | Voltage source | `V<name> <n+> <n-> <waveform>` |
//! | P | Phase source | `P<name> <n+> <n-> <waveform>` |
//! | E, G | Voltage-controlled sources | `E<name> <o+> <o-> <c+> <c-> <gain>` |
//! | F, H | Current-controlled sources | `F<name> <o+> <o-> <c+> <c-> <gain>` |
//! | T | Lossless line | `T<name> <p1+> <p1-> <p2+> <p2-> TD=<delay> Z0=<ohms>` |
//! | K | Mutual coupling | `K<name> <L1> <L2> <k>` |
//!
//! # Directives
//!
//! | Directive | Description | Syntax |
//! |-----------|-------------|--------|
//! | .param | Numeric parameter | `.param <name>=<value> ...` |
//! | .model | Junction model | `.model <name> jj(<key>=<value> ...)` |
//! | .tran | Transient control | `.tran <tstep> <tstop> [<prstart> [<prstep>]]` |
//! | .temp | Noise temperature | `.temp <kelvin>` |
//! | .neb | Noise bandwidth | `.neb <hertz>` |
//! | .print | Trace request | `.print nodev\|nodep\|devi\|phase <target>` |
//! | .spread | Value variation | `.spread [<s>] [R=<s>] [L=<s>] [C=<s>] [B=<s>]` |
//! | .iv | Junction I-V curve | `.iv <model> <max current> <file>` |
//! | .end | End of deck | `.end` |
//!
//! # Example
//!
//! ```text
//! * junction switched by a current ramp
//! .model jj1 jj(rtype=1, vg=2.8mV, cap=0.07pF, r0=160, rn=16, icrit=0.1mA)
//! B1 a 0 jj1
//! I1 0 a pwl(0 0 100p 1m)
//! .tran 0.25p 200p
//! .print phase B1
//! ```

mod ast;
mod lexer;
mod parser;

pub use ast::{Deck, IvRequest, TranSpec};
pub use lexer::{logical_lines, tokenize, LogicalLine};
pub use parser::Parser;

use crate::error::Result;

/// Parse a deck string.
pub fn parse(input: &str) -> Result<Deck> {
    let lines = logical_lines(input)?;
    Parser::new(lines).parse()
}

/// Parse a deck file.
#[cfg(feature = "cli")]
pub fn parse_file(path: &std::path::Path) -> Result<Deck> {
    let content = std::fs::read_to_string(path).map_err(|e| crate::error::SimError::FileReadError {
        path: path.display().to_string(),
        source: e,
    })?;
    parse(&content)
}
