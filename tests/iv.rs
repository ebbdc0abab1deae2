//! Junction I-V sweeps.

use approx::assert_relative_eq;
use jjsim::components::JjModel;
use jjsim::dsl;
use jjsim::solver::IvSweep;

#[test]
fn test_underdamped_junction_shows_hysteresis() {
    let deck = dsl::parse(".model jj1 jj(rtype=1, vg=2.8mV, icrit=1mA, rn=5, r0=30, cap=2.5pF)").unwrap();
    let model: &JjModel = deck.models.get("jj1", None).unwrap();

    let curve = IvSweep::new(1.5e-3)
        .with_increment(0.5e-3)
        .with_timing(0.05e-12, 100e-12)
        .run(model)
        .unwrap();
    let p = &curve.points;
    assert_eq!(p.len(), 12);

    let currents: Vec<f64> = p.iter().map(|pt| pt.current * 1e3).collect();
    let expected = [0.5, 1.0, 1.5, 1.0, 0.5, 0.0, -0.5, -1.0, -1.5, -1.0, -0.5, 0.0];
    for (c, e) in currents.iter().zip(expected) {
        assert_relative_eq!(*c, e, epsilon = 1e-12, max_relative = 1e-12);
    }

    // Below Ic on the way up: superconducting
    assert!(p[0].voltage.abs() < 1e-4, "V = {:e}", p[0].voltage);
    // Above Ic: on the quasiparticle branch
    assert!(p[2].voltage > 1e-3, "V = {:e}", p[2].voltage);
    // Same bias on the way down stays switched
    assert!(p[4].voltage > 1e-3, "V = {:e}", p[4].voltage);

    // The junction is odd-symmetric
    assert_relative_eq!(p[8].voltage, -p[2].voltage, max_relative = 1e-9);
    assert_relative_eq!(p[10].voltage, -p[4].voltage, max_relative = 1e-9);
}
