//! Stored simulation output.

use crate::circuit::{across, AnalysisType, Circuit, Terminal};
use crate::components::Device;
use crate::error::{Result, SimError};

/// A quantity the caller wants stored at every print step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceRequest {
    /// Node unknown (voltage or phase, depending on the analysis)
    Node(String),
    /// Branch current of a device
    DeviceCurrent(String),
    /// Phase across a junction
    JunctionPhase(String),
}

/// Where a trace reads its value from the solution vector.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Tap {
    /// A single unknown
    Unknown(usize),
    /// Difference between two terminals
    Across([Terminal; 2]),
}

impl Tap {
    /// Read the tapped value.
    pub fn read(&self, x: &[f64]) -> f64 {
        match *self {
            Tap::Unknown(i) => x[i],
            Tap::Across(nodes) => across(x, nodes),
        }
    }
}

/// One stored waveform.
#[derive(Debug, Clone)]
pub struct Trace {
    pub label: String,
    pub tap: Tap,
    pub values: Vec<f64>,
}

impl TraceRequest {
    /// Resolve the request against an assembled circuit.
    pub fn resolve(&self, circuit: &Circuit) -> Result<Trace> {
        let unknown = |target: &str, message: &str| SimError::UnknownTrace {
            target: target.to_string(),
            message: message.to_string(),
        };
        let device = |label: &str| {
            circuit
                .find_device(label)
                .map(|(_, d)| d)
                .ok_or_else(|| unknown(label, "no device with this label"))
        };

        let (label, tap) = match self {
            TraceRequest::Node(name) => {
                let node = circuit
                    .find_node(name)
                    .ok_or_else(|| unknown(name, "no such node (ground cannot be traced)"))?;
                let prefix = match circuit.analysis {
                    AnalysisType::Voltage => "V",
                    AnalysisType::Phase => "P",
                };
                (format!("{}({})", prefix, circuit.node_name(node)), Tap::Unknown(node.0))
            }
            TraceRequest::DeviceCurrent(label) => {
                let branch = device(label)?
                    .current_branch()
                    .ok_or_else(|| unknown(label, "device has no current unknown"))?;
                (format!("I({})", label), Tap::Unknown(branch.0))
            }
            TraceRequest::JunctionPhase(label) => match device(label)? {
                Device::Junction(jj) => {
                    let tap = match circuit.analysis {
                        AnalysisType::Voltage => Tap::Unknown(jj.variable.0),
                        AnalysisType::Phase => Tap::Across(jj.nodes),
                    };
                    (format!("P({})", label), tap)
                }
                _ => return Err(unknown(label, "not a Josephson junction")),
            },
        };

        Ok(Trace {
            label,
            tap,
            values: Vec::new(),
        })
    }
}

/// Time points and traces of a transient run.
#[derive(Debug, Clone, Default)]
pub struct Results {
    pub time: Vec<f64>,
    pub traces: Vec<Trace>,
}

impl Results {
    /// Prepare storage for the requested traces.
    ///
    /// With no requests every unknown is stored.
    pub fn for_requests(circuit: &Circuit, requests: &[TraceRequest]) -> Result<Self> {
        let traces = if requests.is_empty() {
            circuit
                .unknown_names()
                .into_iter()
                .enumerate()
                .map(|(i, label)| Trace {
                    label,
                    tap: Tap::Unknown(i),
                    values: Vec::new(),
                })
                .collect()
        } else {
            requests
                .iter()
                .map(|r| r.resolve(circuit))
                .collect::<Result<Vec<_>>>()?
        };
        Ok(Self {
            time: Vec::new(),
            traces,
        })
    }

    /// Append one time point.
    pub fn store(&mut self, t: f64, x: &[f64]) {
        self.time.push(t);
        for trace in &mut self.traces {
            trace.values.push(trace.tap.read(x));
        }
    }

    /// Find a trace by label (case-insensitive).
    pub fn trace(&self, label: &str) -> Option<&Trace> {
        self.traces.iter().find(|t| t.label.eq_ignore_ascii_case(label))
    }

    /// Number of stored time points.
    pub fn len(&self) -> usize {
        self.time.len()
    }

    /// Returns true if nothing was stored.
    pub fn is_empty(&self) -> bool {
        self.time.is_empty()
    }

    /// Write a CSV table: a time column followed by one column per trace.
    pub fn write_csv<W: std::io::Write + ?Sized>(&self, out: &mut W) -> std::io::Result<()> {
        write!(out, "time")?;
        for trace in &self.traces {
            write!(out, ",{}", trace.label)?;
        }
        writeln!(out)?;
        for (row, t) in self.time.iter().enumerate() {
            write!(out, "{:e}", t)?;
            for trace in &self.traces {
                write!(out, ",{:e}", trace.values[row])?;
            }
            writeln!(out)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit::{assemble, AssemblyOutcome, Declaration, NodeIndex, ParamMap};
    use crate::components::{JjModel, ModelLibrary};
    use crate::solver::TransientConfig;

    fn circuit(analysis: AnalysisType) -> Circuit {
        let decls: Vec<Declaration> = ["B1 a b jj1", "R1 b 0 1", "I1 0 a 1u"]
            .iter()
            .map(|l| Declaration::new(l.split_whitespace()))
            .collect();
        let mut models = ModelLibrary::new();
        models.insert("jj1", None, JjModel::new("jj1"));
        let config = TransientConfig::new().with_analysis(analysis);
        match assemble(&decls, &ParamMap::new(), &models, &config).unwrap() {
            AssemblyOutcome::Ready(c) => c,
            AssemblyOutcome::NeedsSmallerTimestep => panic!("unexpected retry"),
        }
    }

    #[test]
    fn test_resolve_requests() {
        let c = circuit(AnalysisType::Phase);
        let node = TraceRequest::Node("A".into()).resolve(&c).unwrap();
        assert_eq!(node.label, "P(a)");
        assert_eq!(node.tap, Tap::Unknown(0));

        let phase = TraceRequest::JunctionPhase("b1".into()).resolve(&c).unwrap();
        assert_eq!(phase.tap, Tap::Across([Some(NodeIndex(0)), Some(NodeIndex(1))]));

        let current = TraceRequest::DeviceCurrent("B1".into()).resolve(&c).unwrap();
        assert_eq!(current.tap, Tap::Unknown(3));
    }

    #[test]
    fn test_unknown_targets() {
        let c = circuit(AnalysisType::Voltage);
        assert!(matches!(
            TraceRequest::Node("0".into()).resolve(&c),
            Err(SimError::UnknownTrace { .. })
        ));
        assert!(TraceRequest::DeviceCurrent("I1".into()).resolve(&c).is_err());
        assert!(TraceRequest::JunctionPhase("R1".into()).resolve(&c).is_err());
    }

    #[test]
    fn test_save_all_and_csv() {
        let c = circuit(AnalysisType::Voltage);
        let mut results = Results::for_requests(&c, &[]).unwrap();
        assert_eq!(results.traces.len(), c.matrix_size());
        results.store(0.0, &vec![0.0; c.matrix_size()]);
        results.store(1e-12, &vec![1.0; c.matrix_size()]);

        let mut buffer = Vec::new();
        results.write_csv(&mut buffer).unwrap();
        let text = String::from_utf8(buffer).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("time,V(a),V(b)"));
        assert!(lines[2].starts_with("1e-12,1e0"));
    }
}
