//! Assembly and factorization properties on a circuit using every device kind.

use approx::assert_relative_eq;
use jjsim::circuit::{assemble, AssemblyOutcome, Circuit};
use jjsim::components::Device;
use jjsim::dsl;
use jjsim::solver::{SparseLu, Transient};
use jjsim::{AnalysisType, SimError};

const MIXED: &str = "\
.model jj1 jj(rtype=1)
I1 0 a pwl(0 0 10p 0.5m)
B1 a 0 jj1 area=1.5
R1 a b 2
L1 b 0 2p
L2 c 0 3p
R2 c 0 5
K1 L1 L2 0.3
C1 a 0 1p
V1 d 0 1m
R3 d 0 10
E1 e 0 d 0 2
R4 e 0 10
G1 0 f d 0 0.01
R5 f 0 10
R6 d h 10
F1 g 0 h 0 3
R7 g 0 10
R8 d m 10
H1 k 0 m 0 5
R9 k 0 10
T1 p 0 q 0 TD=10p Z0=50
RP p 0 50
RQ q 0 50
P1 s 0 pwl(0 0 10p 1)
RS s 0 10
.tran 0.25p 5p
";

fn mixed(analysis: AnalysisType) -> (Circuit, jjsim::TransientConfig) {
    let deck = dsl::parse(MIXED).unwrap();
    let config = deck.transient_config(analysis);
    match assemble(&deck.declarations, &deck.params, &deck.models, &config).unwrap() {
        AssemblyOutcome::Ready(circuit) => (circuit, config),
        AssemblyOutcome::NeedsSmallerTimestep => panic!("unexpected retry"),
    }
}

#[test]
fn test_csr_invariant_holds_for_every_analysis() {
    for analysis in [AnalysisType::Voltage, AnalysisType::Phase] {
        let (circuit, _) = mixed(analysis);
        let m = &circuit.matrix;
        assert_eq!(m.row_pointer.len(), m.size + 1);
        assert!(m.row_pointer.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(m.row_pointer[m.size], m.non_zeros.len());
        assert_eq!(m.column_indices.len(), m.non_zeros.len());
        assert!(m.check_invariant());
        assert_eq!(m.size, circuit.matrix_size());
    }
}

#[test]
fn test_nodes_numbered_in_first_encounter_order() {
    let (circuit, _) = mixed(AnalysisType::Voltage);
    let order: Vec<&str> = circuit.node_names.iter().map(String::as_str).collect();
    assert_eq!(
        order,
        vec!["a", "b", "c", "d", "e", "f", "h", "g", "m", "k", "p", "q", "s"]
    );
}

#[test]
fn test_mutual_coupling_is_symmetric() {
    let (circuit, _) = mixed(AnalysisType::Phase);
    let coupling = |label: &str| match circuit.find_device(label) {
        Some((_, Device::Inductor(l))) => l.couplings[0].mutual,
        _ => panic!("{} is not an inductor", label),
    };
    let expected = 0.3 * (2e-12f64 * 3e-12).sqrt();
    assert_relative_eq!(coupling("L1"), expected, max_relative = 1e-12);
    assert_relative_eq!(coupling("L2"), expected, max_relative = 1e-12);
}

#[test]
fn test_refactorization_is_idempotent() {
    let (circuit, _) = mixed(AnalysisType::Phase);
    let n = circuit.matrix_size();
    let b: Vec<f64> = (0..n).map(|i| 1.0 + i as f64 * 0.1).collect();

    let mut once = SparseLu::analyze(&circuit.matrix);
    once.factorize(&circuit.matrix, false).unwrap();
    once.factorize(&circuit.matrix, true).unwrap();
    let mut x1 = b.clone();
    once.solve(&mut x1).unwrap();

    once.factorize(&circuit.matrix, true).unwrap();
    let mut x2 = b.clone();
    once.solve(&mut x2).unwrap();

    for (a, b) in x1.iter().zip(&x2) {
        assert_relative_eq!(*a, *b, epsilon = 1e-15, max_relative = 1e-12);
    }

    let residual = circuit.matrix.multiply(&x1);
    for (r, expected) in residual.iter().zip(&b) {
        assert_relative_eq!(*r, *expected, epsilon = 1e-6, max_relative = 1e-6);
    }
}

#[test]
fn test_mixed_circuit_runs_in_both_analyses() {
    for analysis in [AnalysisType::Voltage, AnalysisType::Phase] {
        let (circuit, config) = mixed(analysis);
        let mut sim = Transient::new(circuit, config).unwrap();
        let results = sim.run(&[]).unwrap();
        assert_eq!(results.len(), 21);
        assert!(results.traces.iter().all(|t| t.values.iter().all(|v| v.is_finite())));
    }
}

#[test]
fn test_parallel_voltage_sources_are_singular() {
    let deck = dsl::parse("V1 a 0 1\nV2 a 0 2\nR1 a 0 1\n.tran 1p 10p").unwrap();
    let config = deck.transient_config(AnalysisType::Voltage);
    let circuit = match assemble(&deck.declarations, &deck.params, &deck.models, &config).unwrap() {
        AssemblyOutcome::Ready(circuit) => circuit,
        AssemblyOutcome::NeedsSmallerTimestep => panic!("unexpected retry"),
    };
    assert!(matches!(
        Transient::new(circuit, config),
        Err(SimError::SingularMatrix { .. })
    ));
}

#[test]
fn test_declaration_errors() {
    let run = |text: &str| {
        let deck = dsl::parse(text).unwrap();
        let config = deck.transient_config(AnalysisType::Phase);
        assemble(&deck.declarations, &deck.params, &deck.models, &config)
    };
    assert!(matches!(run("R1 a 0 1\nR1 b 0 1"), Err(SimError::DuplicateLabel { .. })));
    assert!(matches!(run("R1 a 0"), Err(SimError::TooFewTokens { .. })));
    assert!(matches!(run("Q1 a b c"), Err(SimError::UnknownDevice { .. })));
    assert!(matches!(run("B1 a 0 nomodel"), Err(SimError::MissingModel { .. })));
    assert!(matches!(
        run("L1 a 0 1p\nK1 L1 L9 0.5"),
        Err(SimError::UnresolvedMutual { .. })
    ));
}
