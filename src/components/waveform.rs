//! Time-domain source functions.
//!
//! Every waveform is evaluated analytically at an arbitrary time, so a
//! source gives consistent values whether the engine is on the base grid
//! or inside a refined sub-step.
//!
//! Supported forms:
//!
//! | Form | Syntax |
//! |------|--------|
//! | DC | `DC v` or a bare value |
//! | Piecewise linear | `PWL(0 v0 t1 v1 ...)` |
//! | Pulse | `PULSE(v1 v2 [td [tr [tf [pw [per]]]]])` |
//! | Sinusoid | `SIN(vo va [freq [td [theta]]])` |
//! | Exponential | `EXP(v1 v2 [td1 [tau1 [td2 [tau2]]]])` |
//! | Custom file | `CUS(file ts sf im [td [per]])` |
//! | Noise | `NOISE(va td tstep)` or `NOISE(vo va td tstep)` |
//! | Piecewise sinusoidal | `PWS(0 v0 t1 v1 ...)` |

use std::f64::consts::PI;
use std::path::Path;

use crate::circuit::ParamMap;
use crate::error::{Result, SimError};

/// Timing information needed to fill in waveform defaults.
#[derive(Debug, Clone, Copy)]
pub struct WaveformContext {
    /// Simulation timestep
    pub timestep: f64,
    /// Simulation stop time
    pub stop_time: f64,
    /// Seed for noise sources
    pub seed: u64,
}

/// A source function of time.
#[derive(Debug, Clone, PartialEq)]
pub enum Waveform {
    /// Constant value
    Dc(f64),
    /// Linear interpolation between breakpoints, holding the last value
    Pwl { times: Vec<f64>, values: Vec<f64> },
    /// Trapezoidal pulse, optionally periodic
    Pulse {
        v1: f64,
        v2: f64,
        delay: f64,
        rise: f64,
        fall: f64,
        width: f64,
        period: f64,
    },
    /// Damped sinusoid
    Sin {
        offset: f64,
        amplitude: f64,
        freq: f64,
        delay: f64,
        damping: f64,
    },
    /// Two-stage exponential
    Exp {
        v1: f64,
        v2: f64,
        td1: f64,
        tau1: f64,
        td2: f64,
        tau2: f64,
    },
    /// Samples read from a file, spaced `step` apart from `delay`
    Custom {
        samples: Vec<f64>,
        step: f64,
        delay: f64,
        hold: bool,
        periodic: bool,
    },
    /// Band-limited Gaussian noise
    Noise {
        offset: f64,
        amplitude: f64,
        delay: f64,
        step: f64,
        seed: u64,
    },
    /// Raised-cosine interpolation between breakpoints
    Pws { times: Vec<f64>, values: Vec<f64> },
}

impl Waveform {
    /// Parse a source function specification.
    ///
    /// Numeric arguments may be literals or parameter names resolved in `scope`.
    pub fn parse(
        spec: &str,
        params: &ParamMap,
        scope: Option<&str>,
        ctx: &WaveformContext,
    ) -> Result<Self> {
        let spec = spec.trim();
        let (name, args) = split_function(spec)?;
        let num = |token: &str| -> Result<f64> {
            params
                .resolve(token, scope, spec)
                .map_err(|_| SimError::waveform(spec, format!("cannot resolve '{}'", token)))
        };

        match name.as_str() {
            "DC" | "" => {
                if args.len() != 1 {
                    return Err(SimError::waveform(spec, "expected a single value"));
                }
                Ok(Waveform::Dc(num(args[0].as_str())?))
            }

            "PWL" | "PWS" => {
                if args.len() < 2 || args.len() % 2 != 0 {
                    return Err(SimError::waveform(spec, "expected time/value pairs"));
                }
                let mut times = Vec::with_capacity(args.len() / 2);
                let mut values = Vec::with_capacity(args.len() / 2);
                for pair in args.chunks(2) {
                    times.push(num(pair[0].as_str())?);
                    values.push(num(pair[1].as_str())?);
                }
                if times[0] != 0.0 {
                    return Err(SimError::waveform(spec, "first breakpoint must be at time 0"));
                }
                if times.windows(2).any(|w| w[1] < w[0]) {
                    return Err(SimError::waveform(spec, "breakpoint times must not decrease"));
                }
                if name == "PWL" {
                    Ok(Waveform::Pwl { times, values })
                } else {
                    Ok(Waveform::Pws { times, values })
                }
            }

            "PULSE" => {
                if args.len() < 2 || args.len() > 7 {
                    return Err(SimError::waveform(spec, "expected 2 to 7 arguments"));
                }
                let opt = |i: usize, default: f64| -> Result<f64> {
                    args.get(i).map(|t| num(t.as_str())).unwrap_or(Ok(default))
                };
                let v1 = num(args[0].as_str())?;
                let v2 = num(args[1].as_str())?;
                if v1 == v2 {
                    log::warn!("pulse '{}' has zero amplitude", spec);
                }
                Ok(Waveform::Pulse {
                    v1,
                    v2,
                    delay: opt(2, 0.0)?,
                    rise: opt(3, ctx.timestep)?,
                    fall: opt(4, ctx.timestep)?,
                    width: opt(5, ctx.stop_time)?,
                    period: opt(6, 0.0)?,
                })
            }

            "SIN" => {
                if args.len() < 2 || args.len() > 5 {
                    return Err(SimError::waveform(spec, "expected 2 to 5 arguments"));
                }
                let opt = |i: usize, default: f64| -> Result<f64> {
                    args.get(i).map(|t| num(t.as_str())).unwrap_or(Ok(default))
                };
                Ok(Waveform::Sin {
                    offset: num(args[0].as_str())?,
                    amplitude: num(args[1].as_str())?,
                    freq: opt(2, 1.0 / ctx.stop_time)?,
                    delay: opt(3, 0.0)?,
                    damping: opt(4, 0.0)?,
                })
            }

            "EXP" => {
                if args.len() < 2 || args.len() > 6 {
                    return Err(SimError::waveform(spec, "expected 2 to 6 arguments"));
                }
                let opt = |i: usize, default: f64| -> Result<f64> {
                    args.get(i).map(|t| num(t.as_str())).unwrap_or(Ok(default))
                };
                let td1 = opt(2, 0.0)?;
                let tau1 = opt(3, ctx.timestep)?;
                let td2 = opt(4, td1 + ctx.timestep)?;
                let tau2 = opt(5, ctx.timestep)?;
                if tau1 <= 0.0 || tau2 <= 0.0 {
                    return Err(SimError::waveform(spec, "time constants must be positive"));
                }
                Ok(Waveform::Exp {
                    v1: num(args[0].as_str())?,
                    v2: num(args[1].as_str())?,
                    td1,
                    tau1,
                    td2,
                    tau2,
                })
            }

            "CUS" => {
                if args.len() < 4 || args.len() > 6 {
                    return Err(SimError::waveform(spec, "expected 4 to 6 arguments"));
                }
                let step = num(args[1].as_str())?;
                let scale = num(args[2].as_str())?;
                let mode = num(args[3].as_str())?;
                if scale == 0.0 {
                    return Err(SimError::waveform(spec, "scale factor must be non-zero"));
                }
                if step <= 0.0 {
                    return Err(SimError::waveform(spec, "sample spacing must be positive"));
                }
                let delay = args.get(4).map(|t| num(t.as_str())).unwrap_or(Ok(0.0))?;
                let periodic = args.get(5).map(|t| num(t.as_str())).unwrap_or(Ok(0.0))? == 1.0;
                let samples = read_samples(Path::new(&args[0]), spec)?
                    .into_iter()
                    .map(|v| v * scale)
                    .collect();
                Ok(Waveform::Custom {
                    samples,
                    step: step.max(ctx.timestep),
                    delay,
                    hold: mode != 0.0,
                    periodic,
                })
            }

            "NOISE" => {
                let (offset, amplitude, delay, step) = match args.len() {
                    3 => (0.0, num(args[0].as_str())?, num(args[1].as_str())?, num(args[2].as_str())?),
                    4 => (num(args[0].as_str())?, num(args[1].as_str())?, num(args[2].as_str())?, num(args[3].as_str())?),
                    _ => return Err(SimError::waveform(spec, "expected 3 or 4 arguments")),
                };
                if amplitude == 0.0 {
                    log::warn!("noise source '{}' has zero amplitude", spec);
                }
                Ok(Waveform::Noise {
                    offset,
                    amplitude,
                    delay,
                    step: if step > 0.0 { step } else { ctx.timestep },
                    seed: ctx.seed,
                })
            }

            other => Err(SimError::waveform(spec, format!("unknown function '{}'", other))),
        }
    }

    /// Value of the waveform at time `t` (times before zero read as zero).
    pub fn value(&self, t: f64) -> f64 {
        let t = t.max(0.0);
        match self {
            Waveform::Dc(v) => *v,

            Waveform::Pwl { times, values } => {
                interpolate(times, values, t, |a, b, frac| a + (b - a) * frac)
            }

            Waveform::Pws { times, values } => interpolate(times, values, t, |a, b, frac| {
                a + (b - a) * 0.5 * (1.0 - (PI * frac).cos())
            }),

            Waveform::Pulse {
                v1,
                v2,
                delay,
                rise,
                fall,
                width,
                period,
            } => {
                if t < *delay {
                    return *v1;
                }
                let mut tau = t - delay;
                if *period > 0.0 {
                    tau %= period;
                }
                if tau < *rise {
                    v1 + (v2 - v1) * tau / rise
                } else if tau <= rise + width {
                    *v2
                } else if tau < rise + width + fall {
                    v2 + (v1 - v2) * (tau - rise - width) / fall
                } else {
                    *v1
                }
            }

            Waveform::Sin {
                offset,
                amplitude,
                freq,
                delay,
                damping,
            } => {
                if t < *delay {
                    return *offset;
                }
                let tau = t - delay;
                offset + amplitude * (2.0 * PI * freq * tau).sin() * (-damping * tau).exp()
            }

            Waveform::Exp {
                v1,
                v2,
                td1,
                tau1,
                td2,
                tau2,
            } => {
                if t < *td1 {
                    return *v1;
                }
                let mut value = v1 + (v2 - v1) * (1.0 - (-(t - td1) / tau1).exp());
                if t >= *td2 {
                    value += (v1 - v2) * (1.0 - (-(t - td2) / tau2).exp());
                }
                value
            }

            Waveform::Custom {
                samples,
                step,
                delay,
                hold,
                periodic,
            } => {
                if t < *delay || samples.is_empty() {
                    return 0.0;
                }
                let n = samples.len();
                let mut pos = (t - delay) / step;
                if *periodic {
                    pos %= n as f64;
                }
                let i = pos.floor() as usize;
                if i >= n - 1 && !*periodic {
                    return samples[n - 1];
                }
                let a = samples[i % n];
                if *hold {
                    return a;
                }
                let b = samples[(i + 1) % n];
                a + (b - a) * (pos - i as f64)
            }

            Waveform::Noise {
                offset,
                amplitude,
                delay,
                step,
                seed,
            } => {
                if t < *delay {
                    return *offset;
                }
                let pos = (t - delay) / step;
                let m = pos.floor() as u64;
                let frac = pos - m as f64;
                let g0 = gaussian(*seed, m);
                let g1 = gaussian(*seed, m + 1);
                let g = g0 + (g1 - g0) * frac;
                offset + amplitude * g / (2.0 * step).sqrt()
            }
        }
    }
}

/// Split `NAME(a b, c)` into the upper-cased name and its arguments.
/// A bare value (or `DC v`) yields the name `DC`.
fn split_function(spec: &str) -> Result<(String, Vec<String>)> {
    let Some(open) = spec.find('(') else {
        let mut tokens: Vec<String> = spec.split_whitespace().map(str::to_string).collect();
        if tokens.first().map(|t| t.eq_ignore_ascii_case("DC")).unwrap_or(false) {
            tokens.remove(0);
        }
        return Ok(("DC".to_string(), tokens));
    };
    let close = spec
        .rfind(')')
        .filter(|&c| c > open)
        .ok_or_else(|| SimError::waveform(spec, "missing closing parenthesis"))?;

    let name = spec[..open].trim().to_uppercase();
    let args = spec[open + 1..close]
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();
    Ok((name, args))
}

/// Segment-wise interpolation with the value held after the last breakpoint.
fn interpolate(times: &[f64], values: &[f64], t: f64, blend: impl Fn(f64, f64, f64) -> f64) -> f64 {
    let count = times.partition_point(|&bp| bp <= t);
    if count == 0 {
        return values[0];
    }
    let i = count - 1;
    if i + 1 >= times.len() {
        return values[i];
    }
    let span = times[i + 1] - times[i];
    if span <= 0.0 {
        return values[i + 1];
    }
    blend(values[i], values[i + 1], (t - times[i]) / span)
}

fn read_samples(path: &Path, spec: &str) -> Result<Vec<f64>> {
    let content = std::fs::read_to_string(path).map_err(|e| SimError::FileReadError {
        path: path.display().to_string(),
        source: e,
    })?;
    content
        .split(|c: char| c.is_whitespace() || c == ',' || c == ';')
        .filter(|s| !s.is_empty())
        .map(|s| {
            crate::circuit::parse_number(s)
                .ok_or_else(|| SimError::waveform(spec, format!("bad sample '{}' in file", s)))
        })
        .collect()
}

/// SplitMix64 mixing function.
#[inline]
pub fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9e3779b97f4a7c15);
    x = (x ^ (x >> 30)).wrapping_mul(0xbf58476d1ce4e5b9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94d049bb133111eb);
    x ^ (x >> 31)
}

/// Uniform value in [0, 1) for a (seed, index) coordinate.
#[inline]
fn uniform(seed: u64, index: u64) -> f64 {
    let hash = splitmix64(seed ^ index.wrapping_mul(0x517cc1b727220a95));
    (hash >> 11) as f64 * (1.0 / (1u64 << 53) as f64)
}

/// Standard normal sample for a (seed, index) coordinate (Box-Muller).
///
/// The same coordinate always gives the same value.
pub fn gaussian(seed: u64, index: u64) -> f64 {
    let u1 = 1.0 - uniform(seed, index.wrapping_mul(2));
    let u2 = uniform(seed, index.wrapping_mul(2).wrapping_add(1));
    (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos()
}
