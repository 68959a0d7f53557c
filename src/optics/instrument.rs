//! Generator (W) and analyzer (A) instrument matrices.
//!
//! Column `j` of W is the Stokes vector leaving the generator with its retarder
//! at `theta0 + offset[j]`. Row `i` of A is the analyzer's Mueller row at
//! `theta0 + offset[i]`. A measured 4x4 intensity grid then reads `B = A · M · W`.

use super::params::GeometricParams;
use crate::error::{Error, Result};
use nalgebra::{Matrix4, RowVector4, Vector4};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, warn};

/// Condition number above which an instrument matrix is treated as singular.
pub const SINGULAR_CONDITION: f64 = 1e12;

/// Azimuthal sub-positions of a retarder relative to its calibrated base angle, in radians.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Offsets([f64; 4]);

impl Offsets {
    pub fn from_degrees(degrees: [f64; 4]) -> Self {
        Self(degrees.map(f64::to_radians))
    }

    /// Positions used by the analysis of recorded datasets.
    pub fn nominal() -> Self {
        Self::from_degrees([-51.7, -15.1, 15.1, 51.7])
    }

    /// Positions driven by the acquisition application.
    pub fn acquisition() -> Self {
        Self::from_degrees([-51.7076, -15.1964, 15.1964, 51.7076])
    }

    /// Exact optimum for retarders at [`optimal_retardance`](super::params::optimal_retardance).
    pub fn tetrahedral() -> Self {
        Self::from_degrees([-51.692546175992, -15.118469401580, 15.118469401580, 51.692546175992])
    }

    pub fn into_inner(self) -> [f64; 4] {
        self.0
    }
}

impl Default for Offsets {
    fn default() -> Self {
        Self::nominal()
    }
}

/// One polarizer/retarder arm of the instrument.
#[derive(Clone, Copy, Debug, PartialEq)]
struct Arm {
    t: f64,
    psi: f64,
    polarizer: f64,
    delta: f64,
    delta_psi: f64,
    theta0: f64,
}

impl Arm {
    fn generator(p: &GeometricParams) -> Self {
        Self {
            t: p.t,
            psi: p.psi_w,
            polarizer: p.beta,
            delta: p.delta_rw,
            delta_psi: p.delta_psi_w,
            theta0: p.theta_w0,
        }
    }

    fn analyzer(p: &GeometricParams) -> Self {
        Self {
            t: p.t,
            psi: p.psi_a,
            polarizer: p.alpha,
            delta: p.delta_ra,
            delta_psi: p.delta_psi_a,
            theta0: p.theta_a0,
        }
    }

    #[rustfmt::skip]
    fn stokes(&self, theta: f64) -> Vector4<f64> {
        let Arm { t, psi, polarizer: beta, delta, delta_psi, theta0 } = *self;
        let s0 = -(2.0 * theta0 + 2.0 * theta).sin() * (2.0 * delta_psi).sin() * (2.0 * beta).sin()
            * (2.0 * psi).cos() - (2.0 * theta0 + 2.0 * theta).cos() * (2.0 * delta_psi).sin()
            * (2.0 * beta).cos() * (2.0 * psi).cos() + 1.0;
        let s1 = -(2.0 * psi).cos() * (2.0 * beta).cos() * ((2.0 * delta_psi).cos() * delta.cos()
            - 1.0) * (2.0 * theta0 + 2.0 * theta).cos().powi(2) + (-(2.0 * beta).sin()
            * (2.0 * psi).cos() * ((2.0 * delta_psi).cos() * delta.cos() - 1.0) * (2.0 * theta0
            + 2.0 * theta).sin() - (2.0 * delta_psi).sin()) * (2.0 * theta0 + 2.0 * theta).cos()
            + delta.cos() * (2.0 * psi).cos() * (2.0 * delta_psi).cos() * (2.0 * beta).cos();
        let s2 = (2.0 * beta).sin() * (2.0 * psi).cos() * ((2.0 * delta_psi).cos() * delta.cos()
            - 1.0) * (2.0 * theta0 + 2.0 * theta).cos().powi(2) - (2.0 * theta0 + 2.0 * theta).sin()
            * (2.0 * psi).cos() * (2.0 * beta).cos() * ((2.0 * delta_psi).cos() * delta.cos() - 1.0)
            * (2.0 * theta0 + 2.0 * theta).cos() + (2.0 * beta).sin() * (2.0 * psi).cos()
            - (2.0 * delta_psi).sin() * (2.0 * theta0 + 2.0 * theta).sin();
        let s3 = (2.0 * psi).cos() * (2.0 * delta_psi).cos() * delta.sin() * ((2.0 * theta0
            + 2.0 * theta).sin() * (2.0 * beta).cos() - (2.0 * theta0 + 2.0 * theta).cos()
            * (2.0 * beta).sin());
        Vector4::new(s0, s1, s2, s3) * (t / 2.0)
    }

    #[rustfmt::skip]
    fn mueller_row(&self, theta: f64) -> RowVector4<f64> {
        let Arm { t, psi, polarizer: alpha, delta, delta_psi, theta0 } = *self;
        let m0 = -(2.0 * theta0 + 2.0 * theta).sin() * (2.0 * delta_psi).sin() * (2.0 * alpha).sin()
            * (2.0 * psi).cos() - (2.0 * theta0 + 2.0 * theta).cos() * (2.0 * delta_psi).sin()
            * (2.0 * alpha).cos() * (2.0 * psi).cos() + 1.0;
        let m1 = -(2.0 * psi).cos() * (2.0 * alpha).cos() * ((2.0 * delta_psi).cos() * delta.cos()
            - 1.0) * (2.0 * theta0 + 2.0 * theta).cos().powi(2) + (-(2.0 * alpha).sin()
            * (2.0 * psi).cos() * ((2.0 * delta_psi).cos() * delta.cos() - 1.0) * (2.0 * theta0
            + 2.0 * theta).sin() - (2.0 * delta_psi).sin()) * (2.0 * theta0 + 2.0 * theta).cos()
            + delta.cos() * (2.0 * psi).cos() * (2.0 * delta_psi).cos() * (2.0 * alpha).cos();
        let m2 = (2.0 * alpha).sin() * (2.0 * psi).cos() * ((2.0 * delta_psi).cos() * delta.cos()
            - 1.0) * (2.0 * theta0 + 2.0 * theta).cos().powi(2) - (2.0 * theta0 + 2.0 * theta).sin()
            * (2.0 * psi).cos() * (2.0 * alpha).cos() * ((2.0 * delta_psi).cos() * delta.cos() - 1.0)
            * (2.0 * theta0 + 2.0 * theta).cos() + (2.0 * alpha).sin() * (2.0 * psi).cos()
            - (2.0 * delta_psi).sin() * (2.0 * theta0 + 2.0 * theta).sin();
        let m3 = (2.0 * psi).cos() * (2.0 * delta_psi).cos() * delta.sin() * ((2.0 * theta0
            + 2.0 * theta).cos() * (2.0 * alpha).sin() - (2.0 * theta0 + 2.0 * theta).sin()
            * (2.0 * alpha).cos());
        RowVector4::new(m0, m1, m2, m3) * (t / 2.0)
    }
}

/// A 4x4 instrument matrix with its inverse and condition number.
#[derive(Clone, Debug, PartialEq)]
pub struct InstrumentMatrix {
    matrix: Matrix4<f64>,
    inverse: Option<Matrix4<f64>>,
    condition: f64,
}

impl InstrumentMatrix {
    pub fn new(matrix: Matrix4<f64>) -> Self {
        let singular_values = matrix.singular_values();
        let smallest = singular_values.min();
        let condition = if smallest > 0.0 {
            singular_values.max() / smallest
        } else {
            f64::INFINITY
        };

        Self {
            matrix,
            inverse: matrix.try_inverse(),
            condition,
        }
    }

    pub fn matrix(&self) -> &Matrix4<f64> {
        &self.matrix
    }

    /// The inverse, or `None` if the matrix could not be inverted.
    pub fn inverse(&self) -> Option<&Matrix4<f64>> {
        self.inverse.as_ref()
    }

    /// Ratio of the largest to the smallest singular value.
    pub fn condition_number(&self) -> f64 {
        self.condition
    }

    fn checked_inverse(&self, which: char) -> Result<&Matrix4<f64>> {
        match &self.inverse {
            Some(inverse) if self.condition.is_finite() && self.condition <= SINGULAR_CONDITION => {
                Ok(inverse)
            }
            _ => Err(Error::SingularMatrix {
                which,
                condition: self.condition,
            }),
        }
    }
}

/// Build the generator matrix W, one Stokes vector per column.
pub fn build_w(params: &GeometricParams, offsets: &Offsets) -> InstrumentMatrix {
    let arm = Arm::generator(params);
    let columns = offsets.0.map(|theta| arm.stokes(theta));
    InstrumentMatrix::new(Matrix4::from_columns(&columns))
}

/// Build the analyzer matrix A, one Mueller row per position.
pub fn build_a(params: &GeometricParams, offsets: &Offsets) -> InstrumentMatrix {
    let arm = Arm::analyzer(params);
    let rows = offsets.0.map(|theta| arm.mueller_row(theta));
    InstrumentMatrix::new(Matrix4::from_rows(&rows))
}

/// A W/A matrix whose condition number exceeds the configured limit.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ConditionWarning {
    pub which: char,
    pub condition: f64,
    pub limit: f64,
}

impl fmt::Display for ConditionWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "condition number of {} is {:.4} (limit {:.4}, ideal {:.4})",
            self.which,
            self.condition,
            self.limit,
            3.0_f64.sqrt()
        )
    }
}

/// Both instrument matrices of one calibration.
#[derive(Clone, Debug, PartialEq)]
pub struct Instrument {
    pub w: InstrumentMatrix,
    pub a: InstrumentMatrix,
}

impl Instrument {
    pub fn new(params: &GeometricParams, offsets: &Offsets) -> Self {
        let instrument = Self {
            w: build_w(params, offsets),
            a: build_a(params, offsets),
        };
        debug!(
            cond_w = instrument.w.condition_number(),
            cond_a = instrument.a.condition_number(),
            "built instrument matrices"
        );
        instrument
    }

    /// `(A⁻¹, W⁻¹)`, or an error if either matrix is singular.
    pub fn inverses(&self) -> Result<(&Matrix4<f64>, &Matrix4<f64>)> {
        Ok((self.a.checked_inverse('A')?, self.w.checked_inverse('W')?))
    }

    /// Report each matrix whose condition number exceeds `limit`.
    pub fn check_conditioning(&self, limit: f64) -> Vec<ConditionWarning> {
        [('W', &self.w), ('A', &self.a)]
            .into_iter()
            .filter(|(_, m)| !(m.condition_number() <= limit))
            .map(|(which, m)| {
                let warning = ConditionWarning {
                    which,
                    condition: m.condition_number(),
                    limit,
                };
                warn!("{warning}");
                warning
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optics::intensity::intensity_plain;
    use approx::assert_relative_eq;
    use quickcheck::quickcheck;

    fn assert_matrix_eq(actual: &Matrix4<f64>, expected: [[f64; 4]; 4]) {
        for (i, row) in expected.iter().enumerate() {
            for (j, value) in row.iter().enumerate() {
                assert_relative_eq!(actual[(i, j)], *value, epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn ideal_instrument_is_optimally_conditioned() {
        let instrument = Instrument::new(&GeometricParams::ideal(), &Offsets::tetrahedral());
        assert_relative_eq!(instrument.w.condition_number(), 3.0_f64.sqrt(), epsilon = 1e-6);
        assert_relative_eq!(instrument.a.condition_number(), 3.0_f64.sqrt(), epsilon = 1e-6);
    }

    #[test]
    fn nominal_offsets_are_near_optimal() {
        let params = GeometricParams {
            delta_ra: 132.0_f64.to_radians(),
            delta_rw: 132.0_f64.to_radians(),
            ..GeometricParams::ideal()
        };
        let instrument = Instrument::new(&params, &Offsets::nominal());
        assert_relative_eq!(instrument.w.condition_number(), 1.7378254088775411, epsilon = 1e-9);
        assert_relative_eq!(instrument.w.condition_number(), 3.0_f64.sqrt(), epsilon = 1e-2);
        assert!(instrument.check_conditioning(2.0).is_empty());
    }

    #[test]
    fn generator_matches_reference_values() {
        let params = GeometricParams {
            t: 0.93,
            psi_w: 0.02,
            beta: 0.01,
            delta_rw: 132.6_f64.to_radians(),
            delta_psi_w: 0.004,
            theta_w0: 0.02,
            ..GeometricParams::ideal()
        };
        let w = build_w(&params, &Offsets::nominal());
        assert_matrix_eq(
            w.matrix(),
            [
                [0.46578892010677436, 0.46175075436384366, 0.4618255380768257, 0.4659335421889784],
                [-0.28184642166347085, 0.28415195471648247, 0.24367987848171133, -0.26049255980892094],
                [0.15962767596309932, -0.32332747797541045, 0.349149348332173, -0.19825658744617933],
                [-0.3342082649459097, -0.16608736970114474, 0.17790987494827393, 0.33103816117928664],
            ],
        );
        assert_relative_eq!(w.condition_number(), 1.7598580643542385, epsilon = 1e-9);
    }

    #[test]
    fn analyzer_matches_reference_values() {
        let params = GeometricParams {
            t: 0.93,
            psi_a: 0.015,
            alpha: 0.03,
            delta_ra: 131.9_f64.to_radians(),
            delta_psi_a: -0.003,
            theta_a0: 0.025,
            ..GeometricParams::ideal()
        };
        let a = build_a(&params, &Offsets::nominal());
        assert_matrix_eq(
            a.matrix(),
            [
                [0.46432662285863713, -0.27612447821021774, 0.16266889751045346, 0.3357063864278202],
                [0.4673960790864308, 0.284309002791384, -0.3257374618253924, 0.17699732912656663],
                [0.4674241343336413, 0.25721504160304526, 0.35054839245341685, -0.171017634050621],
                [0.4643808780982681, -0.2624189089948089, -0.18114492597973417, -0.33730979056994276],
            ],
        );
        assert_relative_eq!(a.condition_number(), 1.7449442340352288, epsilon = 1e-9);
    }

    #[test]
    fn singular_matrix_is_rejected() {
        let params = GeometricParams {
            delta_rw: 0.0,
            ..GeometricParams::ideal()
        };
        let instrument = Instrument::new(&params, &Offsets::nominal());
        assert!(matches!(
            instrument.inverses(),
            Err(Error::SingularMatrix { which: 'W', .. })
        ));
        assert_eq!(instrument.check_conditioning(2.0).len(), 1);
    }

    #[test]
    fn inverse_is_inverse() {
        let instrument = Instrument::new(&GeometricParams::ideal(), &Offsets::nominal());
        let (a_inv, w_inv) = instrument.inverses().unwrap();
        assert_relative_eq!(a_inv * instrument.a.matrix(), Matrix4::identity(), epsilon = 1e-12);
        assert_relative_eq!(instrument.w.matrix() * w_inv, Matrix4::identity(), epsilon = 1e-12);
    }

    quickcheck! {
        fn intensity_factors_through_instrument(
            alpha: i8, theta_a0: i8, theta_w0: i8, theta_a: i8, theta_w: i8
        ) -> bool {
            let alpha = f64::from(alpha) / 100.0;
            let params = GeometricParams {
                alpha,
                beta: alpha,
                theta_a0: f64::from(theta_a0) / 400.0,
                theta_w0: f64::from(theta_w0) / 400.0,
                delta_ra: 2.3,
                delta_rw: 2.31,
                ..GeometricParams::ideal()
            };
            let (theta_a, theta_w) = (f64::from(theta_a) / 40.0, f64::from(theta_w) / 40.0);
            let row = Arm::analyzer(&params).mueller_row(theta_a);
            let column = Arm::generator(&params).stokes(theta_w);
            let expected = intensity_plain(&params, theta_a, theta_w);
            ((row * column)[(0, 0)] - expected).abs() < 1e-12
        }
    }
}
