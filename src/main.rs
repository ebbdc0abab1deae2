//! jjsim - Josephson-junction circuit simulator
//!
//! Runs a transient simulation of a flat netlist deck and writes the
//! requested traces as CSV.
//!
//! # Usage
//!
//! ```bash
//! jjsim circuit.cir -o out.csv -a phase -v
//! ```

use std::path::PathBuf;

use clap::Parser;
use jjsim::{
    circuit::assemble_with_retry,
    dsl,
    error::{Result, SimError},
    output::{write_iv, write_results},
    solver::{DivergencePolicy, IvSweep, Transient},
    AnalysisType,
};

/// Transient simulator for superconducting circuits
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the netlist deck
    #[arg(value_name = "DECK")]
    deck: PathBuf,

    /// Write CSV here instead of stdout
    #[arg(short, long, value_name = "FILE")]
    output: Option<PathBuf>,

    /// Quantity of the node unknowns (voltage or phase)
    #[arg(short, long, default_value = "phase")]
    analysis: AnalysisType,

    /// Re-solve diverging steps with a finer timestep instead of failing
    #[arg(long)]
    refine: bool,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let level = match args.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();

    // Read the deck
    let deck = dsl::parse_file(&args.deck)?;

    // I-V curves, written next to the deck unless the path says otherwise
    for request in &deck.iv {
        let model = deck.models.get(&request.model, None).ok_or_else(|| SimError::MissingModel {
            model: request.model.clone(),
            label: ".iv".to_string(),
        })?;
        let curve = IvSweep::new(request.max_current).run(model)?;
        let path = match args.deck.parent() {
            Some(dir) if request.output.parent().map_or(true, |p| p.as_os_str().is_empty()) => {
                dir.join(&request.output)
            }
            _ => request.output.clone(),
        };
        write_iv(&curve, &path)?;
    }
    if deck.declarations.is_empty() && !deck.iv.is_empty() {
        return Ok(());
    }

    let mut config = deck.transient_config(args.analysis);
    if args.refine {
        config = config.with_divergence(DivergencePolicy::Refine);
    }

    // Build the circuit, shrinking the timestep if a line needs it
    let (circuit, config) = assemble_with_retry(&deck.declarations, &deck.params, &deck.models, &config)?;

    let mut simulator = Transient::new(circuit, config)?;
    let mut reported = 0;
    let results = simulator.run_with_progress(&deck.traces, |progress| {
        let percent = (progress.fraction() * 100.0) as usize;
        if percent >= reported + 10 {
            reported = percent - percent % 10;
            log::info!("{}% (t = {:.3e} s)", reported, progress.time);
        }
    })?;

    write_results(&results, args.output.as_deref())?;

    Ok(())
}
