//! Device companion models for transient simulation.
//!
//! This module provides models for all supported devices:
//! - Passive: Resistor, Inductor, Capacitor, mutual inductance
//! - Nonlinear: Josephson junction
//! - Sources: Current, Voltage and Phase sources driven by a [`Waveform`]
//! - Controlled: VCVS, VCCS, CCCS, CCVS
//! - Delay: lossless transmission line
//!
//! Every device owns its [`Stamp`]: the non-zeros, column indices and row
//! lengths of the MNA rows it appends after the node rows. The matrix only
//! remembers where each device's slice starts and copies it again when a
//! device changes its values.
//!
//! Node rows are shared. A device reports which node rows need a ±1 (or
//! gain) entry at one of its branch columns through
//! [`Device::node_connections`].

mod controlled;
mod junction;
mod linear;
mod sources;
mod tline;
mod waveform;

pub use controlled::{Cccs, Ccvs, Vccs, Vcvs};
pub use junction::{JjModel, Junction, ModelLibrary, Region};
pub use linear::{Capacitor, Coupling, Inductor, MutualInductance, Resistor};
pub use sources::{CurrentSource, PhaseSource, VoltageSource};
pub use tline::TransmissionLine;
pub use waveform::{gaussian, splitmix64, Waveform, WaveformContext};

use std::collections::HashMap;

use crate::circuit::{
    is_ground_name, AnalysisType, BranchAllocator, BranchIndex, Declaration, NodeIndex, ParamMap,
    Spread, SpreadKind, Terminal,
};
use crate::error::{Result, SimError};

/// A device's local slice of the MNA matrix.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Stamp {
    /// Entry values, row after row
    pub non_zeros: Vec<f64>,
    /// Column of each entry
    pub column_indices: Vec<usize>,
    /// Number of entries in each row
    pub row_counts: Vec<usize>,
}

impl Stamp {
    /// Create an empty stamp.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a row. Entries whose column is `None` (ground) are skipped.
    pub fn push_row(&mut self, entries: &[(Option<usize>, f64)]) {
        let mut count = 0;
        for &(column, value) in entries {
            if let Some(column) = column {
                self.non_zeros.push(value);
                self.column_indices.push(column);
                count += 1;
            }
        }
        self.row_counts.push(count);
    }

    /// Append one more entry to the last row.
    pub fn extend_last_row(&mut self, column: usize, value: f64) {
        self.non_zeros.push(value);
        self.column_indices.push(column);
        if let Some(last) = self.row_counts.last_mut() {
            *last += 1;
        }
    }

    /// Number of rows.
    pub fn rows(&self) -> usize {
        self.row_counts.len()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.non_zeros.len()
    }

    /// Returns true if the stamp has no entries.
    pub fn is_empty(&self) -> bool {
        self.non_zeros.is_empty()
    }
}

/// A coefficient placed in a node row at a branch column.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NodeConnection {
    pub node: NodeIndex,
    pub branch: BranchIndex,
    pub value: f64,
}

/// ±1 connections of a two-terminal device's current.
pub(crate) fn terminal_connections(nodes: [Terminal; 2], branch: BranchIndex) -> Vec<NodeConnection> {
    let mut out = Vec::with_capacity(2);
    if let Some(node) = nodes[0] {
        out.push(NodeConnection { node, branch, value: 1.0 });
    }
    if let Some(node) = nodes[1] {
        out.push(NodeConnection { node, branch, value: -1.0 });
    }
    out
}

/// Everything a device constructor needs besides its own declaration.
pub struct BuildContext<'a> {
    pub params: &'a ParamMap,
    pub models: &'a ModelLibrary,
    pub nodes: &'a HashMap<String, NodeIndex>,
    pub branches: &'a mut BranchAllocator,
    pub analysis: AnalysisType,
    pub timestep: f64,
    pub stop_time: f64,
    pub seed: u64,
    pub spread: Spread,
    /// Run seed for spread draws; unlike `seed` it never advances
    pub spread_seed: u64,
}

impl BuildContext<'_> {
    /// Resolve a terminal name.
    pub fn terminal(&self, name: &str) -> Result<Terminal> {
        if is_ground_name(name) {
            return Ok(None);
        }
        self.nodes
            .get(&name.to_uppercase())
            .copied()
            .map(Some)
            .ok_or_else(|| SimError::invalid_param(format!("node '{}' was never allocated", name)))
    }

    /// Resolve a pair of terminal names.
    pub fn terminals(&self, pos: &str, neg: &str) -> Result<[Terminal; 2]> {
        Ok([self.terminal(pos)?, self.terminal(neg)?])
    }

    /// Resolve a numeric token of a declaration.
    pub fn value(&self, decl: &Declaration, token: &str) -> Result<f64> {
        self.params.resolve(token, decl.scope.as_deref(), decl.label())
    }

    /// Parse a waveform specification belonging to a declaration.
    pub fn waveform(&mut self, decl: &Declaration, spec: &str) -> Result<Waveform> {
        let ctx = WaveformContext {
            timestep: self.timestep,
            stop_time: self.stop_time,
            seed: self.next_seed(),
        };
        Waveform::parse(spec, self.params, decl.scope.as_deref(), &ctx)
    }

    /// `SPREAD=` value among a declaration's trailing tokens.
    pub fn local_spread(&self, decl: &Declaration, tokens: &[String]) -> Result<Option<f64>> {
        for token in tokens {
            if let Some((key, value)) = token.split_once('=') {
                if key.eq_ignore_ascii_case("SPREAD") {
                    return self.value(decl, value).map(Some);
                }
            }
        }
        Ok(None)
    }

    /// Nominal value of a declaration with its spread applied.
    pub fn spread(&self, decl: &Declaration, kind: SpreadKind, nominal: f64, local: Option<f64>) -> f64 {
        self.spread.apply(nominal, kind, local, decl.label(), self.spread_seed)
    }

    /// Seed for the next noise source; every source draws its own sequence.
    pub fn next_seed(&mut self) -> u64 {
        self.seed = splitmix64(self.seed);
        self.seed
    }
}

/// Outcome of building a device from a declaration.
#[derive(Debug)]
pub enum Built {
    Device(Device),
    /// The device cannot be represented at the current timestep
    NeedsSmallerTimestep,
}

/// Minimum token count for each device letter.
pub fn min_tokens(kind: char) -> Option<usize> {
    match kind {
        'R' | 'L' | 'C' | 'B' | 'V' | 'I' | 'P' | 'K' => Some(4),
        'E' | 'F' | 'G' | 'H' => Some(6),
        'T' => Some(7),
        _ => None,
    }
}

/// A circuit device.
#[derive(Debug, Clone)]
pub enum Device {
    Resistor(Resistor),
    Inductor(Inductor),
    Capacitor(Capacitor),
    Junction(Junction),
    CurrentSource(CurrentSource),
    VoltageSource(VoltageSource),
    PhaseSource(PhaseSource),
    Vcvs(Vcvs),
    Vccs(Vccs),
    Cccs(Cccs),
    Ccvs(Ccvs),
    TransmissionLine(TransmissionLine),
    MutualInductance(MutualInductance),
}

impl Device {
    /// Build a device from a declaration.
    ///
    /// Mutual inductance (`K`) needs both inductors to exist first and is
    /// resolved by the assembler, not here.
    pub fn from_declaration(decl: &Declaration, ctx: &mut BuildContext<'_>) -> Result<Built> {
        let kind = decl.kind_letter().unwrap_or(' ');
        let label = decl.label().to_string();
        let t = &decl.tokens;

        let expected = min_tokens(kind).filter(|_| kind != 'K').ok_or_else(|| {
            SimError::UnknownDevice {
                kind: kind.to_string(),
                line: decl.text(),
            }
        })?;
        if t.len() < expected {
            return Err(SimError::TooFewTokens {
                label,
                expected,
                found: t.len(),
                line: decl.text(),
            });
        }

        let device = match kind {
            'R' => {
                let nodes = ctx.terminals(&t[1], &t[2])?;
                let local = ctx.local_spread(decl, &t[4..])?;
                let value = ctx.spread(decl, SpreadKind::Resistor, ctx.value(decl, &t[3])?, local);
                let branch = ctx.branches.allocate();
                Device::Resistor(Resistor::new(label, nodes, value, branch, ctx.analysis, ctx.timestep)?)
            }
            'L' => {
                let nodes = ctx.terminals(&t[1], &t[2])?;
                let local = ctx.local_spread(decl, &t[4..])?;
                let value = ctx.spread(decl, SpreadKind::Inductor, ctx.value(decl, &t[3])?, local);
                let branch = ctx.branches.allocate();
                Device::Inductor(Inductor::new(label, nodes, value, branch, ctx.analysis, ctx.timestep)?)
            }
            'C' => {
                let nodes = ctx.terminals(&t[1], &t[2])?;
                let local = ctx.local_spread(decl, &t[4..])?;
                let value = ctx.spread(decl, SpreadKind::Capacitor, ctx.value(decl, &t[3])?, local);
                let branch = ctx.branches.allocate();
                Device::Capacitor(Capacitor::new(label, nodes, value, branch, ctx.analysis, ctx.timestep)?)
            }
            'B' => {
                let nodes = ctx.terminals(&t[1], &t[2])?;
                let mut area = 1.0;
                let mut local = None;
                let mut rest = Vec::new();
                for token in &t[3..] {
                    match token.split_once('=') {
                        Some((key, value)) if key.eq_ignore_ascii_case("AREA") => {
                            area = ctx.value(decl, value)?;
                        }
                        Some((key, value)) if key.eq_ignore_ascii_case("SPREAD") => {
                            local = Some(ctx.value(decl, value)?);
                        }
                        _ => rest.push(token.as_str()),
                    }
                }
                let model_name = rest.first().copied().ok_or_else(|| SimError::TooFewTokens {
                    label: label.clone(),
                    expected,
                    found: t.len(),
                    line: decl.text(),
                })?;
                if let Some(bare_area) = rest.get(1) {
                    area = ctx.value(decl, bare_area)?;
                }
                let model = ctx
                    .models
                    .get(model_name, decl.scope.as_deref())
                    .ok_or_else(|| SimError::MissingModel {
                        model: model_name.to_string(),
                        label: label.clone(),
                    })?;
                let area = ctx.spread(decl, SpreadKind::Junction, area, local);
                let variable = ctx.branches.allocate();
                let current = ctx.branches.allocate();
                Device::Junction(Junction::new(
                    label,
                    nodes,
                    model,
                    area,
                    [variable, current],
                    ctx.analysis,
                    ctx.timestep,
                )?)
            }
            'I' => {
                let nodes = ctx.terminals(&t[1], &t[2])?;
                let waveform = ctx.waveform(decl, &t[3..].join(" "))?;
                Device::CurrentSource(CurrentSource::new(label, nodes, waveform)?)
            }
            'V' => {
                let nodes = ctx.terminals(&t[1], &t[2])?;
                let waveform = ctx.waveform(decl, &t[3..].join(" "))?;
                let branch = ctx.branches.allocate();
                Device::VoltageSource(VoltageSource::new(
                    label,
                    nodes,
                    waveform,
                    branch,
                    ctx.analysis,
                    ctx.timestep,
                )?)
            }
            'P' => {
                let nodes = ctx.terminals(&t[1], &t[2])?;
                let waveform = ctx.waveform(decl, &t[3..].join(" "))?;
                let branch = ctx.branches.allocate();
                Device::PhaseSource(PhaseSource::new(
                    label,
                    nodes,
                    waveform,
                    branch,
                    ctx.analysis,
                    ctx.timestep,
                )?)
            }
            'E' | 'F' | 'G' | 'H' => {
                let out = ctx.terminals(&t[1], &t[2])?;
                let ctrl = ctx.terminals(&t[3], &t[4])?;
                let gain = ctx.value(decl, &t[5])?;
                match kind {
                    'E' => {
                        let branch = ctx.branches.allocate();
                        Device::Vcvs(Vcvs::new(label, out, ctrl, gain, branch)?)
                    }
                    'G' => {
                        let branch = ctx.branches.allocate();
                        Device::Vccs(Vccs::new(label, out, ctrl, gain, branch, ctx.analysis, ctx.timestep)?)
                    }
                    'F' => {
                        let sense = ctx.branches.allocate();
                        Device::Cccs(Cccs::new(label, out, ctrl, gain, sense)?)
                    }
                    _ => {
                        let sense = ctx.branches.allocate();
                        let output = ctx.branches.allocate();
                        Device::Ccvs(Ccvs::new(
                            label,
                            out,
                            ctrl,
                            gain,
                            [sense, output],
                            ctx.analysis,
                            ctx.timestep,
                        )?)
                    }
                }
            }
            'T' => {
                let port1 = ctx.terminals(&t[1], &t[2])?;
                let port2 = ctx.terminals(&t[3], &t[4])?;
                let mut delay = None;
                let mut impedance = None;
                for token in &t[5..] {
                    if let Some((key, value)) = token.split_once('=') {
                        match key.to_uppercase().as_str() {
                            "TD" => delay = Some(ctx.value(decl, value)?),
                            "Z0" => impedance = Some(ctx.value(decl, value)?),
                            _ => log::warn!("{}: ignoring transmission line key '{}'", label, key),
                        }
                    }
                }
                let delay = delay.ok_or_else(|| SimError::unresolved(&label, "TD"))?;
                let impedance = impedance.ok_or_else(|| SimError::unresolved(&label, "Z0"))?;
                let steps = (delay / ctx.timestep).round();
                if steps < 1.0 {
                    return Ok(Built::NeedsSmallerTimestep);
                }
                let branches = [ctx.branches.allocate(), ctx.branches.allocate()];
                Device::TransmissionLine(TransmissionLine::new(
                    label,
                    [port1, port2],
                    impedance,
                    steps as usize,
                    branches,
                    ctx.analysis,
                    ctx.timestep,
                )?)
            }
            _ => {
                return Err(SimError::UnknownDevice {
                    kind: kind.to_string(),
                    line: decl.text(),
                })
            }
        };

        Ok(Built::Device(device))
    }

    /// Get the device label.
    pub fn label(&self) -> &str {
        match self {
            Device::Resistor(d) => &d.label,
            Device::Inductor(d) => &d.label,
            Device::Capacitor(d) => &d.label,
            Device::Junction(d) => &d.label,
            Device::CurrentSource(d) => &d.label,
            Device::VoltageSource(d) => &d.label,
            Device::PhaseSource(d) => &d.label,
            Device::Vcvs(d) => &d.label,
            Device::Vccs(d) => &d.label,
            Device::Cccs(d) => &d.label,
            Device::Ccvs(d) => &d.label,
            Device::TransmissionLine(d) => &d.label,
            Device::MutualInductance(d) => &d.label,
        }
    }

    /// The device's own matrix rows.
    pub fn stamp(&self) -> &Stamp {
        match self {
            Device::Resistor(d) => &d.stamp,
            Device::Inductor(d) => &d.stamp,
            Device::Capacitor(d) => &d.stamp,
            Device::Junction(d) => &d.stamp,
            Device::CurrentSource(d) => &d.stamp,
            Device::VoltageSource(d) => &d.stamp,
            Device::PhaseSource(d) => &d.stamp,
            Device::Vcvs(d) => &d.stamp,
            Device::Vccs(d) => &d.stamp,
            Device::Cccs(d) => &d.stamp,
            Device::Ccvs(d) => &d.stamp,
            Device::TransmissionLine(d) => &d.stamp,
            Device::MutualInductance(d) => &d.stamp,
        }
    }

    /// Entries this device places in node rows.
    pub fn node_connections(&self) -> Vec<NodeConnection> {
        match self {
            Device::Resistor(d) => terminal_connections(d.nodes, d.branch),
            Device::Inductor(d) => terminal_connections(d.nodes, d.branch),
            Device::Capacitor(d) => terminal_connections(d.nodes, d.branch),
            Device::Junction(d) => terminal_connections(d.nodes, d.current),
            Device::VoltageSource(d) => terminal_connections(d.nodes, d.branch),
            Device::PhaseSource(d) => terminal_connections(d.nodes, d.branch),
            Device::Vcvs(d) => terminal_connections(d.out, d.branch),
            Device::Vccs(d) => terminal_connections(d.out, d.branch),
            Device::Cccs(d) => d.node_connections(),
            Device::Ccvs(d) => d.node_connections(),
            Device::TransmissionLine(d) => d.node_connections(),
            Device::CurrentSource(_) | Device::MutualInductance(_) => Vec::new(),
        }
    }

    /// Branch unknowns owned by this device, in row order.
    pub fn branches(&self) -> Vec<BranchIndex> {
        match self {
            Device::Resistor(d) => vec![d.branch],
            Device::Inductor(d) => vec![d.branch],
            Device::Capacitor(d) => vec![d.branch],
            Device::Junction(d) => vec![d.variable, d.current],
            Device::VoltageSource(d) => vec![d.branch],
            Device::PhaseSource(d) => vec![d.branch],
            Device::Vcvs(d) => vec![d.branch],
            Device::Vccs(d) => vec![d.branch],
            Device::Cccs(d) => vec![d.sense],
            Device::Ccvs(d) => vec![d.sense, d.output],
            Device::TransmissionLine(d) => d.branches.to_vec(),
            Device::CurrentSource(_) | Device::MutualInductance(_) => Vec::new(),
        }
    }

    /// Branch whose value is reported as this device's current.
    pub fn current_branch(&self) -> Option<BranchIndex> {
        match self {
            Device::Junction(d) => Some(d.current),
            Device::Ccvs(d) => Some(d.output),
            _ => self.branches().first().copied(),
        }
    }

    /// Position in the right-hand-side fill order: sources, then passive
    /// devices, then controlled sources, then transmission lines.
    pub fn rhs_order(&self) -> u8 {
        match self {
            Device::CurrentSource(_) | Device::VoltageSource(_) | Device::PhaseSource(_) => 0,
            Device::Resistor(_)
            | Device::Inductor(_)
            | Device::Capacitor(_)
            | Device::Junction(_)
            | Device::MutualInductance(_) => 1,
            Device::Vcvs(_) | Device::Vccs(_) | Device::Cccs(_) | Device::Ccvs(_) => 2,
            Device::TransmissionLine(_) => 3,
        }
    }

    /// Write this device's right-hand-side contributions for time `t`.
    pub fn fill_rhs(&self, rhs: &mut [f64], t: f64) {
        match self {
            Device::Resistor(d) => d.fill_rhs(rhs),
            Device::Inductor(d) => d.fill_rhs(rhs),
            Device::Capacitor(d) => d.fill_rhs(rhs),
            Device::Junction(d) => d.fill_rhs(rhs),
            Device::CurrentSource(d) => d.fill_rhs(rhs, t),
            Device::VoltageSource(d) => d.fill_rhs(rhs, t),
            Device::PhaseSource(d) => d.fill_rhs(rhs, t),
            Device::Vccs(d) => d.fill_rhs(rhs),
            Device::Ccvs(d) => d.fill_rhs(rhs),
            Device::TransmissionLine(d) => d.fill_rhs(rhs, t),
            Device::Vcvs(_) | Device::Cccs(_) | Device::MutualInductance(_) => {}
        }
    }

    /// Shift lookback history by one slot using a solved vector.
    pub fn advance(&mut self, x: &[f64]) {
        match self {
            Device::Resistor(d) => d.advance(x),
            Device::Inductor(d) => d.advance(x),
            Device::Capacitor(d) => d.advance(x),
            Device::Junction(d) => d.advance(x),
            Device::VoltageSource(d) => d.advance(x),
            Device::Vccs(d) => d.advance(x),
            Device::Ccvs(d) => d.advance(x),
            Device::TransmissionLine(d) => d.advance(x),
            Device::CurrentSource(_)
            | Device::PhaseSource(_)
            | Device::Vcvs(_)
            | Device::Cccs(_)
            | Device::MutualInductance(_) => {}
        }
    }

    /// Zero the lookback history.
    pub fn reset_history(&mut self) {
        match self {
            Device::Resistor(d) => d.reset_history(),
            Device::Inductor(d) => d.reset_history(),
            Device::Capacitor(d) => d.reset_history(),
            Device::Junction(d) => d.reset_history(),
            Device::VoltageSource(d) => d.reset_history(),
            Device::Vccs(d) => d.reset_history(),
            Device::Ccvs(d) => d.reset_history(),
            Device::TransmissionLine(d) => d.reset_history(),
            Device::CurrentSource(_)
            | Device::PhaseSource(_)
            | Device::Vcvs(_)
            | Device::Cccs(_)
            | Device::MutualInductance(_) => {}
        }
    }

    /// Recompute timestep-dependent coefficients and stamp values for `h`.
    pub fn rescale(&mut self, h: f64) {
        match self {
            Device::Resistor(d) => d.rescale(h),
            Device::Inductor(d) => d.rescale(h),
            Device::Capacitor(d) => d.rescale(h),
            Device::Junction(d) => d.rescale(h),
            Device::VoltageSource(d) => d.rescale(h),
            Device::PhaseSource(d) => d.rescale(h),
            Device::Vccs(d) => d.rescale(h),
            Device::Ccvs(d) => d.rescale(h),
            Device::TransmissionLine(d) => d.rescale(h),
            Device::CurrentSource(_) | Device::Vcvs(_) | Device::Cccs(_) | Device::MutualInductance(_) => {}
        }
    }

    /// Check if this device changes its matrix values at runtime.
    pub fn is_nonlinear(&self) -> bool {
        matches!(self, Device::Junction(_))
    }
}
