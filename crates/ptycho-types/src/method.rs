// ─────────────────────────────────────────────────────────────────────
// Ptycho-Tomo — Reconstruction Methods
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Reconstruction algorithm selection.
//!
//! Every projection-set method is a point in the generalized projection
//! family parameterised by `(a, b, c)`:
//!
//! ```text
//! ψ' = x·ψ + a·P(ψ) + b·F(c·P(ψ) + y·ψ),   x = 1 − a − b,  y = 1 − c
//! ```
//!
//! | method      | parameter | a       | b | c     |
//! |-------------|-----------|---------|---|-------|
//! | DM_AP(α)    | α ∈ [0,1] | −α      | 1 | 1 + α |
//! | RAAR(β)     | β ∈ [0,1] | 1 − 2β  | β | 2     |
//! | RRR(γ)      | γ ∈ [0,2] | −γ      | γ | 2     |
//! | SUPERFLIP   | —         | 0       | 1 | 2     |

use crate::error::{PtychoError, PtychoResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Scalar or `(a, b, c)` tuning value for the selected method.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ReconstructionParameter {
    Scalar(f64),
    Triple([f64; 3]),
}

impl Default for ReconstructionParameter {
    fn default() -> Self {
        ReconstructionParameter::Scalar(1.0)
    }
}

/// Generalized projection coefficients.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProjectionCoefficients {
    pub a: f64,
    pub b: f64,
    pub c: f64,
}

impl ProjectionCoefficients {
    pub fn x(&self) -> f64 {
        1.0 - self.a - self.b
    }

    pub fn y(&self) -> f64 {
        1.0 - self.c
    }
}

/// Closed set of supported reconstruction algorithms.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ReconstructionMethod {
    GradientDescent,
    GeneralizedProjection { a: f64, b: f64, c: f64 },
    DifferenceMap { alpha: f64 },
    Raar { beta: f64 },
    Rrr { gamma: f64 },
    Superflip,
}

impl ReconstructionMethod {
    /// Resolve a method name and its parameter, range-checking the parameter.
    pub fn from_name(name: &str, parameter: ReconstructionParameter) -> PtychoResult<Self> {
        let method = match name {
            "generalized-projection" => match parameter {
                ReconstructionParameter::Triple([a, b, c]) => {
                    ReconstructionMethod::GeneralizedProjection { a, b, c }
                }
                ReconstructionParameter::Scalar(_) => {
                    return Err(PtychoError::InvalidParameter {
                        method: name.to_string(),
                        message: "must be a list of three numbers (a, b, c)".to_string(),
                    })
                }
            },
            "DM_AP" | "difference-map_alternating-projections" => {
                ReconstructionMethod::DifferenceMap {
                    alpha: scalar_parameter(name, parameter)?,
                }
            }
            "RAAR" | "relaxed-averaged-alternating-reflections" => ReconstructionMethod::Raar {
                beta: scalar_parameter(name, parameter)?,
            },
            "RRR" | "relax-reflect-reflect" => ReconstructionMethod::Rrr {
                gamma: scalar_parameter(name, parameter)?,
            },
            "SUPERFLIP" | "charge-flipping" => ReconstructionMethod::Superflip,
            "GD" | "gradient-descent" => ReconstructionMethod::GradientDescent,
            other => {
                return Err(PtychoError::ConfigError(format!(
                    "reconstruction_method must be one of 'DM_AP' (or 'difference-map_alternating-projections'), \
                     'RAAR' (or 'relaxed-averaged-alternating-reflections'), 'RRR' (or 'relax-reflect-reflect'), \
                     'SUPERFLIP' (or 'charge-flipping'), 'generalized-projection', \
                     or 'GD' (or 'gradient-descent'), not '{other}'"
                )))
            }
        };
        method.validate()?;
        Ok(method)
    }

    /// Range-check the method's tuning parameter.
    pub fn validate(&self) -> PtychoResult<()> {
        let check = |value: f64, max: f64| -> PtychoResult<()> {
            if !value.is_finite() || !(0.0..=max).contains(&value) {
                return Err(PtychoError::InvalidParameter {
                    method: self.to_string(),
                    message: format!("must be between 0-{max}, got {value}"),
                });
            }
            Ok(())
        };
        match *self {
            ReconstructionMethod::DifferenceMap { alpha } => check(alpha, 1.0),
            ReconstructionMethod::Raar { beta } => check(beta, 1.0),
            ReconstructionMethod::Rrr { gamma } => check(gamma, 2.0),
            ReconstructionMethod::GeneralizedProjection { a, b, c } => {
                if [a, b, c].iter().all(|v| v.is_finite()) {
                    Ok(())
                } else {
                    Err(PtychoError::InvalidParameter {
                        method: self.to_string(),
                        message: "(a, b, c) must be finite".to_string(),
                    })
                }
            }
            ReconstructionMethod::GradientDescent | ReconstructionMethod::Superflip => Ok(()),
        }
    }

    /// Projection coefficients, `None` for gradient descent.
    pub fn coefficients(&self) -> Option<ProjectionCoefficients> {
        match *self {
            ReconstructionMethod::GradientDescent => None,
            ReconstructionMethod::GeneralizedProjection { a, b, c } => {
                Some(ProjectionCoefficients { a, b, c })
            }
            ReconstructionMethod::DifferenceMap { alpha } => Some(ProjectionCoefficients {
                a: -alpha,
                b: 1.0,
                c: 1.0 + alpha,
            }),
            ReconstructionMethod::Raar { beta } => Some(ProjectionCoefficients {
                a: 1.0 - 2.0 * beta,
                b: beta,
                c: 2.0,
            }),
            ReconstructionMethod::Rrr { gamma } => Some(ProjectionCoefficients {
                a: -gamma,
                b: gamma,
                c: 2.0,
            }),
            ReconstructionMethod::Superflip => Some(ProjectionCoefficients {
                a: 0.0,
                b: 1.0,
                c: 2.0,
            }),
        }
    }

    /// True for every projection-set variant (exit waves carry memory).
    pub fn uses_projection_scheme(&self) -> bool {
        self.coefficients().is_some()
    }
}

fn scalar_parameter(name: &str, parameter: ReconstructionParameter) -> PtychoResult<f64> {
    match parameter {
        ReconstructionParameter::Scalar(v) => Ok(v),
        ReconstructionParameter::Triple(_) => Err(PtychoError::InvalidParameter {
            method: name.to_string(),
            message: "expects a single scalar".to_string(),
        }),
    }
}

impl fmt::Display for ReconstructionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReconstructionMethod::GradientDescent => write!(f, "GD"),
            ReconstructionMethod::GeneralizedProjection { a, b, c } => {
                write!(f, "generalized-projection(a={a}, b={b}, c={c})")
            }
            ReconstructionMethod::DifferenceMap { alpha } => write!(f, "DM_AP(α={alpha})"),
            ReconstructionMethod::Raar { beta } => write!(f, "RAAR(β={beta})"),
            ReconstructionMethod::Rrr { gamma } => write!(f, "RRR(γ={gamma})"),
            ReconstructionMethod::Superflip => write!(f, "SUPERFLIP"),
        }
    }
}
