//! Circuit assembly: declarations to devices and the CSR system.

use std::collections::{HashMap, HashSet};

use super::params::ParamMap;
use super::types::{
    is_ground_name, AnalysisType, BranchAllocator, BranchIndex, Declaration, NodeIndex, Terminal,
};
use super::validate::validate_circuit;
use crate::components::{
    min_tokens, BuildContext, Built, CurrentSource, Device, ModelLibrary, MutualInductance, Waveform,
};
use crate::error::{Result, SimError};
use crate::solver::{CsrMatrix, TransientConfig};
use crate::BOLTZMANN;

/// A complete circuit ready for simulation.
#[derive(Debug, Clone)]
pub struct Circuit {
    /// All devices, in declaration order (generated noise sources last)
    pub devices: Vec<Device>,

    /// Mapping from upper-cased node names to node indices
    pub node_map: HashMap<String, NodeIndex>,

    /// Node names by index
    pub node_names: Vec<String>,

    /// Number of non-ground nodes
    pub node_count: usize,

    /// Number of branch unknowns
    pub branch_count: usize,

    /// MNA matrix
    pub matrix: CsrMatrix,

    /// Quantity represented by node unknowns
    pub analysis: AnalysisType,

    /// Timestep the stamps were built for
    pub timestep: f64,
}

/// Outcome of one assembly attempt.
#[derive(Debug)]
pub enum AssemblyOutcome {
    Ready(Circuit),
    /// A device cannot be represented at this timestep; retry with a smaller one
    NeedsSmallerTimestep,
}

/// Number of leading terminal tokens for a device letter.
fn terminal_count(kind: char) -> usize {
    match kind {
        'E' | 'F' | 'G' | 'H' | 'T' => 4,
        'K' => 0,
        _ => 2,
    }
}

/// Assemble declarations into a circuit at the configured timestep.
pub fn assemble(
    decls: &[Declaration],
    params: &ParamMap,
    models: &ModelLibrary,
    config: &TransientConfig,
) -> Result<AssemblyOutcome> {
    config.validate()?;

    // Pass 1: labels and nodes
    let mut labels = HashSet::new();
    let mut node_map = HashMap::new();
    let mut node_names = Vec::new();
    for decl in decls {
        let kind = decl.kind_letter().unwrap_or(' ');
        let expected = min_tokens(kind).ok_or_else(|| SimError::UnknownDevice {
            kind: kind.to_string(),
            line: decl.text(),
        })?;
        if decl.tokens.len() < expected {
            return Err(SimError::TooFewTokens {
                label: decl.label().to_string(),
                expected,
                found: decl.tokens.len(),
                line: decl.text(),
            });
        }
        if !labels.insert(decl.label().to_uppercase()) {
            return Err(SimError::DuplicateLabel {
                label: decl.label().to_string(),
            });
        }
        for name in &decl.tokens[1..=terminal_count(kind)] {
            if is_ground_name(name) {
                continue;
            }
            let key = name.to_uppercase();
            if !node_map.contains_key(&key) {
                node_map.insert(key, NodeIndex(node_names.len()));
                node_names.push(name.clone());
            }
        }
    }
    let node_count = node_names.len();

    // Pass 2: devices, with mutual inductances deferred
    let mut branches = BranchAllocator::new(node_count);
    let mut devices = Vec::with_capacity(decls.len());
    let mut mutuals = Vec::new();
    {
        let mut ctx = BuildContext {
            params,
            models,
            nodes: &node_map,
            branches: &mut branches,
            analysis: config.analysis,
            timestep: config.timestep,
            stop_time: config.stop_time,
            seed: config.seed,
            spread: config.spread,
            spread_seed: config.seed,
        };
        for decl in decls {
            if decl.kind_letter() == Some('K') {
                mutuals.push(decl);
                continue;
            }
            match Device::from_declaration(decl, &mut ctx)? {
                Built::Device(device) => devices.push(device),
                Built::NeedsSmallerTimestep => {
                    log::debug!(
                        "{} cannot be represented at h = {:e}",
                        decl.label(),
                        config.timestep
                    );
                    return Ok(AssemblyOutcome::NeedsSmallerTimestep);
                }
            }
        }

        if let Some(noise) = &config.noise {
            let bandwidth = noise.bandwidth.unwrap_or(1.0 / config.timestep);
            let mut sources = Vec::new();
            for device in &devices {
                if let Device::Resistor(r) = device {
                    let waveform = Waveform::Noise {
                        offset: 0.0,
                        amplitude: (4.0 * BOLTZMANN * noise.temperature / r.resistance).sqrt(),
                        delay: 0.0,
                        step: 1.0 / bandwidth,
                        seed: ctx.next_seed(),
                    };
                    let label = format!("I_NOISE_{}", r.label);
                    if !labels.insert(label.to_uppercase()) {
                        return Err(SimError::DuplicateLabel { label });
                    }
                    sources.push(Device::CurrentSource(CurrentSource::new(label, r.nodes, waveform)?));
                }
            }
            log::debug!("added {} thermal noise sources at {} K", sources.len(), noise.temperature);
            devices.extend(sources);
        }
    }

    for decl in mutuals {
        let mutual = couple_inductors(decl, params, &mut devices)?;
        devices.push(Device::MutualInductance(mutual));
    }

    let branch_count = branches.count();
    let matrix = CsrMatrix::from_parts(node_count, node_count + branch_count, &devices);
    let circuit = Circuit {
        devices,
        node_map,
        node_names,
        node_count,
        branch_count,
        matrix,
        analysis: config.analysis,
        timestep: config.timestep,
    };
    validate_circuit(&circuit)?;

    log::debug!(
        "assembled {} nodes, {} branches, {} devices, {} non-zeros",
        circuit.node_count,
        circuit.branch_count,
        circuit.devices.len(),
        circuit.matrix.nnz()
    );
    Ok(AssemblyOutcome::Ready(circuit))
}

/// Resolve a `K label L1 L2 k` line and fold M into both inductors.
fn couple_inductors(
    decl: &Declaration,
    params: &ParamMap,
    devices: &mut [Device],
) -> Result<MutualInductance> {
    let label = decl.label();
    let find = |name: &str| -> Result<(usize, String, BranchIndex, f64)> {
        devices
            .iter()
            .enumerate()
            .find_map(|(i, d)| match d {
                Device::Inductor(l) if l.label.eq_ignore_ascii_case(name) => {
                    Some((i, l.label.clone(), l.branch, l.inductance))
                }
                _ => None,
            })
            .ok_or_else(|| SimError::UnresolvedMutual {
                label: label.to_string(),
                inductor: name.to_string(),
            })
    };
    let (first, first_label, first_branch, l1) = find(&decl.tokens[1])?;
    let (second, second_label, second_branch, l2) = find(&decl.tokens[2])?;
    let factor = params.resolve(&decl.tokens[3], decl.scope.as_deref(), label)?;

    let mutual = MutualInductance::new(
        label.to_string(),
        [first_label.clone(), second_label.clone()],
        factor,
        l1,
        l2,
    );
    if let Device::Inductor(l) = &mut devices[first] {
        l.couple(&second_label, second_branch, mutual.mutual);
    }
    if let Device::Inductor(l) = &mut devices[second] {
        l.couple(&first_label, first_branch, mutual.mutual);
    }
    Ok(mutual)
}

/// Assemble, halving the timestep while a device asks for a smaller one.
///
/// Returns the circuit together with the configuration actually used.
pub fn assemble_with_retry(
    decls: &[Declaration],
    params: &ParamMap,
    models: &ModelLibrary,
    config: &TransientConfig,
) -> Result<(Circuit, TransientConfig)> {
    let mut config = config.clone();
    loop {
        match assemble(decls, params, models, &config)? {
            AssemblyOutcome::Ready(circuit) => return Ok((circuit, config)),
            AssemblyOutcome::NeedsSmallerTimestep => {
                let h = config.timestep / 2.0;
                if h < config.min_timestep {
                    return Err(SimError::TimestepTooSmall {
                        timestep: h,
                        minimum: config.min_timestep,
                    });
                }
                log::info!("reducing timestep from {:e} to {:e} s", config.timestep, h);
                config.timestep = h;
            }
        }
    }
}

impl Circuit {
    /// Get the total size of the MNA solution vector.
    pub fn matrix_size(&self) -> usize {
        self.node_count + self.branch_count
    }

    /// Find a node by name (case-insensitive). Ground yields `None`.
    pub fn find_node(&self, name: &str) -> Option<NodeIndex> {
        self.node_map.get(&name.to_uppercase()).copied()
    }

    /// Resolve a terminal name; ground maps to `Some(None)`.
    pub fn terminal(&self, name: &str) -> Option<Terminal> {
        if is_ground_name(name) {
            Some(None)
        } else {
            self.find_node(name).map(Some)
        }
    }

    /// Get the name of a node.
    pub fn node_name(&self, node: NodeIndex) -> &str {
        &self.node_names[node.0]
    }

    /// Find a device by label (case-insensitive).
    pub fn find_device(&self, label: &str) -> Option<(usize, &Device)> {
        self.devices
            .iter()
            .enumerate()
            .find(|(_, d)| d.label().eq_ignore_ascii_case(label))
    }

    /// A readable name for every unknown, in vector order.
    pub fn unknown_names(&self) -> Vec<String> {
        let prefix = match self.analysis {
            AnalysisType::Voltage => "V",
            AnalysisType::Phase => "P",
        };
        let mut names: Vec<String> = self
            .node_names
            .iter()
            .map(|n| format!("{}({})", prefix, n))
            .collect();
        names.resize(self.matrix_size(), String::new());

        for device in &self.devices {
            let label = device.label();
            let branches = device.branches();
            for (i, branch) in branches.iter().enumerate() {
                names[branch.0] = match (device, i) {
                    (Device::Junction(_), 0) => match self.analysis {
                        AnalysisType::Voltage => format!("P({})", label),
                        AnalysisType::Phase => format!("V({})", label),
                    },
                    (Device::Junction(_), _) => format!("I({})", label),
                    _ if branches.len() > 1 => format!("I({}.{})", label, i + 1),
                    _ => format!("I({})", label),
                };
            }
        }
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::JjModel;

    fn decls(lines: &[&str]) -> Vec<Declaration> {
        lines
            .iter()
            .map(|l| Declaration::new(l.split_whitespace()))
            .collect()
    }

    fn ready(outcome: AssemblyOutcome) -> Circuit {
        match outcome {
            AssemblyOutcome::Ready(c) => c,
            AssemblyOutcome::NeedsSmallerTimestep => panic!("unexpected retry"),
        }
    }

    fn config() -> TransientConfig {
        TransientConfig::new()
            .with_analysis(AnalysisType::Voltage)
            .with_timestep(1e-12)
            .with_stop_time(100e-12)
    }

    #[test]
    fn test_node_and_branch_numbering() {
        let d = decls(&["V1 in 0 1m", "R1 in out 2", "L1 out gnd 2p", "I1 0 out 1u"]);
        let c = ready(assemble(&d, &ParamMap::new(), &ModelLibrary::new(), &config()).unwrap());
        assert_eq!(c.node_count, 2);
        assert_eq!(c.find_node("IN"), Some(NodeIndex(0)));
        assert_eq!(c.find_node("out"), Some(NodeIndex(1)));
        assert_eq!(c.branch_count, 3);
        assert!(c.matrix.check_invariant());
        assert_eq!(c.unknown_names(), vec!["V(in)", "V(out)", "I(V1)", "I(R1)", "I(L1)"]);
    }

    #[test]
    fn test_duplicate_label() {
        let d = decls(&["R1 a 0 1", "r1 b 0 1"]);
        let err = assemble(&d, &ParamMap::new(), &ModelLibrary::new(), &config()).unwrap_err();
        assert!(matches!(err, SimError::DuplicateLabel { .. }));
    }

    #[test]
    fn test_unresolved_parameter_names_token() {
        let d = decls(&["R1 a 0 rshunt"]);
        let err = assemble(&d, &ParamMap::new(), &ModelLibrary::new(), &config()).unwrap_err();
        assert!(matches!(err, SimError::UnresolvedParameter { ref token, .. } if token == "rshunt"));
    }

    #[test]
    fn test_mutual_coupling_is_symmetric() {
        let d = decls(&["L1 a 0 4p", "L2 b 0 9p", "R1 a b 1", "K1 L1 L2 0.5"]);
        let c = ready(assemble(&d, &ParamMap::new(), &ModelLibrary::new(), &config()).unwrap());
        let (l1_row, l2_row) = (2, 3);
        let m = -3.0 * 0.5 * 6e-12 / 2e-12;
        approx::assert_relative_eq!(c.matrix.get(l1_row, l2_row), m);
        approx::assert_relative_eq!(c.matrix.get(l2_row, l1_row), m);
        assert!(matches!(c.devices.last(), Some(Device::MutualInductance(_))));
    }

    #[test]
    fn test_mutual_unknown_inductor() {
        let d = decls(&["L1 a 0 4p", "K1 L1 L9 0.5"]);
        let err = assemble(&d, &ParamMap::new(), &ModelLibrary::new(), &config()).unwrap_err();
        assert!(matches!(err, SimError::UnresolvedMutual { ref inductor, .. } if inductor == "L9"));
    }

    #[test]
    fn test_retry_halves_timestep() {
        let d = decls(&["T1 a 0 b 0 TD=0.4p Z0=5", "R1 a 0 5", "R2 b 0 5"]);
        let (c, used) =
            assemble_with_retry(&d, &ParamMap::new(), &ModelLibrary::new(), &config()).unwrap();
        assert_eq!(used.timestep, 0.5e-12);
        assert_eq!(c.timestep, 0.5e-12);
    }

    #[test]
    fn test_retry_gives_up() {
        let d = decls(&["T1 a 0 b 0 TD=0.1p Z0=5"]);
        let cfg = config().with_min_timestep(0.3e-12);
        let err = assemble_with_retry(&d, &ParamMap::new(), &ModelLibrary::new(), &cfg).unwrap_err();
        assert!(matches!(err, SimError::TimestepTooSmall { .. }));
    }

    #[test]
    fn test_junction_branches_and_noise_sources() {
        let d = decls(&["B1 a 0 jj1 area=2", "R1 a 0 2", "I1 0 a 1u"]);
        let mut models = ModelLibrary::new();
        models.insert("jj1", None, JjModel::new("jj1"));
        let cfg = config().with_noise(4.2, None);
        let c = ready(assemble(&d, &ParamMap::new(), &models, &cfg).unwrap());
        assert_eq!(c.branch_count, 3);
        assert_eq!(c.unknown_names()[1], "P(B1)");
        assert_eq!(c.devices.len(), 4);
        assert!(c.find_device("I_NOISE_R1").is_some());
    }

    #[test]
    fn test_noise_source_label_collision() {
        let d = decls(&["R1 a 0 2", "I_NOISE_R1 0 a 1u"]);
        let cfg = config().with_noise(4.2, None);
        let err = assemble(&d, &ParamMap::new(), &ModelLibrary::new(), &cfg).unwrap_err();
        assert!(matches!(err, SimError::DuplicateLabel { ref label } if label == "I_NOISE_R1"));
    }

    #[test]
    fn test_spread_survives_timestep_retry() {
        let d = decls(&["T1 a 0 b 0 TD=0.4p Z0=5", "R1 a 0 5", "R2 b 0 5", "L1 b 0 2p"]);
        let mut spread = crate::circuit::Spread::new();
        spread.set(None, 0.2).unwrap();
        let cfg = config().with_spread(spread);

        let values = |c: &Circuit| -> Vec<f64> {
            c.devices
                .iter()
                .filter_map(|d| match d {
                    Device::Resistor(r) => Some(r.resistance),
                    Device::Inductor(l) => Some(l.inductance),
                    _ => None,
                })
                .collect()
        };
        let (retried, used) = assemble_with_retry(&d, &ParamMap::new(), &ModelLibrary::new(), &cfg).unwrap();
        let direct = ready(assemble(&d, &ParamMap::new(), &ModelLibrary::new(), &used).unwrap());
        assert_eq!(values(&retried), values(&direct));
        assert_ne!(values(&retried), vec![5.0, 5.0, 2e-12]);
    }
}
