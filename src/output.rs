//! Result output for the CLI frontend.
//!
//! Writes result tables as CSV to a file or to stdout.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use crate::error::{Result, SimError};
use crate::solver::{IvCurve, Results};

/// Run `write` against a buffered file, or stdout when `path` is `None`.
fn write_csv_to(path: Option<&Path>, write: impl FnOnce(&mut dyn Write) -> io::Result<()>) -> Result<String> {
    let name = path.map_or_else(|| "<stdout>".to_string(), |p| p.display().to_string());
    let to_error = |source: io::Error| SimError::FileWriteError {
        path: name.clone(),
        source,
    };

    match path {
        Some(path) => {
            let file = File::create(path).map_err(to_error)?;
            let mut out = BufWriter::new(file);
            write(&mut out).map_err(to_error)?;
            out.flush().map_err(to_error)?;
        }
        None => {
            let stdout = io::stdout();
            let mut out = BufWriter::new(stdout.lock());
            write(&mut out).map_err(to_error)?;
            out.flush().map_err(to_error)?;
        }
    }
    Ok(name)
}

/// Write `results` as CSV to `path`, or to stdout when `path` is `None`.
pub fn write_results(results: &Results, path: Option<&Path>) -> Result<()> {
    let name = write_csv_to(path, |out| results.write_csv(out))?;
    log::info!("wrote {} rows of {} traces to {}", results.len(), results.traces.len(), name);
    Ok(())
}

/// Write an I-V curve as CSV to `path`.
pub fn write_iv(curve: &IvCurve, path: &Path) -> Result<()> {
    let name = write_csv_to(Some(path), |out| curve.write_csv(out))?;
    log::info!("wrote {} I-V points of {} to {}", curve.points.len(), curve.model, name);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solver::{IvPoint, Tap, Trace};

    #[test]
    fn test_write_to_file() {
        let results = Results {
            time: vec![0.0, 1e-12],
            traces: vec![Trace {
                label: "V(a)".into(),
                tap: Tap::Unknown(0),
                values: vec![0.0, 0.5],
            }],
        };
        let path = std::env::temp_dir().join(format!("jjsim-output-{}.csv", std::process::id()));
        write_results(&results, Some(&path)).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(text, "time,V(a)\n0e0,0e0\n1e-12,5e-1\n");
    }

    #[test]
    fn test_unwritable_path() {
        let results = Results::default();
        let err = write_results(&results, Some(Path::new("/nonexistent-dir/out.csv"))).unwrap_err();
        assert!(matches!(err, SimError::FileWriteError { .. }));
    }

    #[test]
    fn test_write_iv_to_file() {
        let curve = IvCurve {
            model: "jj1".into(),
            points: vec![
                IvPoint { voltage: 0.0, current: 1e-4 },
                IvPoint { voltage: 2.5e-3, current: 2e-4 },
            ],
        };
        let path = std::env::temp_dir().join(format!("jjsim-iv-{}.csv", std::process::id()));
        write_iv(&curve, &path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(text, "V,I\n0e0,1e-4\n2.5e-3,2e-4\n");
    }
}
