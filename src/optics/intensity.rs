//! Closed-form detector intensity of the dual rotating-retarder polarimeter.
//!
//! The expression is generated symbolically from the Mueller product
//! `P_A · R_A(θA) · R_W(θW) · P_W` and must be kept term for term.

use super::params::GeometricParams;
use crate::error::{Error, Result};

/// Detected intensity at analyzer angle `theta_a` and generator angle `theta_w`.
///
/// `beta`, `delta_pa`, `delta_pw` and `delta_psi_a` do not enter the expression.
#[rustfmt::skip]
#[allow(clippy::too_many_lines, clippy::suspicious_operation_groupings)]
pub fn intensity_plain(p: &GeometricParams, theta_a: f64, theta_w: f64) -> f64 {
    let GeometricParams {
        t, psi_a, psi_w, alpha, theta_a0, theta_w0, delta_ra, delta_rw, delta_psi_w, ..
    } = *p;

    -t * (((2.0 * delta_psi_w).cos() * delta_ra.cos() - 1.0) * ((-(2.0 * delta_psi_w).cos()
    * delta_rw.cos() + 1.0) * (2.0 * psi_w).cos() * (2.0 * theta_w + 2.0 *
    theta_w0).cos().powi(2) - (2.0 * alpha).cos() * (2.0 * delta_psi_w).sin() * (2.0 *
    theta_w + 2.0 * theta_w0).cos() + (2.0 * alpha).sin() * (2.0 * delta_psi_w).sin() * (2.0
    * theta_w + 2.0 * theta_w0).sin() + (2.0 * psi_w).cos() * (-1.0 + ((2.0 *
    delta_psi_w).cos() * delta_rw.cos() + 1.0) * (2.0 * alpha).cos().powi(2))) * (2.0 *
    psi_a).cos() * (2.0 * theta_a + 2.0 * theta_a0).cos().powi(2) + (-(2.0 * alpha).cos() *
    (2.0 * psi_w).cos() * (2.0 * delta_psi_w).sin() * ((2.0 * delta_psi_w).cos() *
    delta_rw.cos() - 1.0) * (2.0 * theta_w + 2.0 * theta_w0).cos().powi(2) + (-((2.0 *
    psi_w).cos() * ((2.0 * delta_psi_w).cos() * delta_rw.cos() - 1.0) * (2.0 * theta_w + 2.0
    * theta_w0).sin() + (2.0 * alpha).sin() * (2.0 * delta_psi_w).sin()) * ((2.0 *
    delta_psi_w).cos() * delta_ra.cos() - 1.0) * (2.0 * psi_a).cos() * (2.0 * theta_a + 2.0
    * theta_a0).sin() - (2.0 * alpha).sin() * (2.0 * psi_w).cos() * (2.0 *
    delta_psi_w).sin() * ((2.0 * delta_psi_w).cos() * delta_rw.cos() - 1.0) * (2.0 * theta_w
    + 2.0 * theta_w0).sin() - ((delta_ra.sin() * delta_rw.sin() * (2.0 * delta_psi_w).cos()
    * (2.0 * delta_psi_w).cos() + (2.0 * delta_psi_w).sin() * (2.0 * delta_psi_w).sin()) *
    (2.0 * alpha).cos().powi(2) - delta_ra.sin() * delta_rw.sin() * (2.0 *
    delta_psi_w).cos() * (2.0 * delta_psi_w).cos()) * (2.0 * psi_w).cos() * (2.0 *
    psi_a).cos() - (2.0 * delta_psi_w).sin() * (2.0 * delta_psi_w).sin()) * (2.0 * theta_w +
    2.0 * theta_w0).cos() + (2.0 * alpha).cos() * ((-(2.0 * theta_w + 2.0 * theta_w0).sin()
    * (2.0 * delta_psi_w).sin() + (2.0 * alpha).sin() * (2.0 * psi_w).cos() * ((2.0 *
    delta_psi_w).cos() * delta_rw.cos() + 1.0)) * ((2.0 * delta_psi_w).cos() *
    delta_ra.cos() - 1.0) * (2.0 * psi_a).cos() * (2.0 * theta_a + 2.0 * theta_a0).sin() -
    (2.0 * alpha).sin() * (2.0 * psi_a).cos() * (2.0 * psi_w).cos() * (delta_ra.sin() *
    delta_rw.sin() * (2.0 * delta_psi_w).cos() * (2.0 * delta_psi_w).cos() + (2.0 *
    delta_psi_w).sin() * (2.0 * delta_psi_w).sin()) * (2.0 * theta_w + 2.0 * theta_w0).sin()
    + (2.0 * delta_psi_w).sin() * (delta_rw.cos() * (2.0 * psi_w).cos() * (2.0 *
    delta_psi_w).cos() + (2.0 * psi_a).cos()))) * (2.0 * theta_a + 2.0 * theta_a0).cos() +
    ((2.0 * alpha).sin() * (2.0 * delta_psi_w).sin() * (2.0 * theta_a + 2.0 *
    theta_a0).sin() + (-1.0 + ((2.0 * delta_psi_w).cos() * delta_ra.cos() + 1.0) * (2.0 *
    alpha).cos().powi(2)) * (2.0 * psi_a).cos()) * (2.0 * psi_w).cos() * ((2.0 *
    delta_psi_w).cos() * delta_rw.cos() - 1.0) * (2.0 * theta_w + 2.0 *
    theta_w0).cos().powi(2) + (-((2.0 * delta_psi_w).sin() * ((2.0 * delta_psi_w).cos() *
    delta_rw.cos() - 1.0) * (2.0 * theta_w + 2.0 * theta_w0).sin() + (2.0 * alpha).sin() *
    (2.0 * psi_a).cos() * (delta_ra.sin() * delta_rw.sin() * (2.0 * delta_psi_w).cos() *
    (2.0 * delta_psi_w).cos() + (2.0 * delta_psi_w).sin() * (2.0 * delta_psi_w).sin())) *
    (2.0 * psi_w).cos() * (2.0 * theta_a + 2.0 * theta_a0).sin() + (2.0 * alpha).sin() *
    (2.0 * psi_a).cos() * (2.0 * psi_w).cos() * ((2.0 * delta_psi_w).cos() * delta_rw.cos()
    - 1.0) * ((2.0 * delta_psi_w).cos() * delta_ra.cos() + 1.0) * (2.0 * theta_w + 2.0 *
    theta_w0).sin() + (2.0 * delta_psi_w).sin() * (delta_ra.cos() * (2.0 * psi_a).cos() *
    (2.0 * delta_psi_w).cos() + (2.0 * psi_w).cos())) * (2.0 * alpha).cos() * (2.0 * theta_w
    + 2.0 * theta_w0).cos() + (((2.0 * psi_w).cos() * ((delta_ra.sin() * delta_rw.sin() *
    (2.0 * delta_psi_w).cos() * (2.0 * delta_psi_w).cos() + (2.0 * delta_psi_w).sin() * (2.0
    * delta_psi_w).sin()) * (2.0 * alpha).cos().powi(2) - (2.0 * delta_psi_w).sin() * (2.0 *
    delta_psi_w).sin()) * (2.0 * psi_a).cos() - (2.0 * delta_psi_w).sin() * (2.0 *
    delta_psi_w).sin()) * (2.0 * theta_w + 2.0 * theta_w0).sin() + (2.0 * alpha).sin() *
    (2.0 * delta_psi_w).sin() * ((2.0 * psi_a).cos() + (2.0 * psi_w).cos())) * (2.0 *
    theta_a + 2.0 * theta_a0).sin() + (2.0 * alpha).sin() * (2.0 * delta_psi_w).sin() *
    ((2.0 * psi_a).cos() + (2.0 * psi_w).cos()) * (2.0 * theta_w + 2.0 * theta_w0).sin() -
    1.0 - (1.0 + (delta_ra.cos() * delta_rw.cos() * (2.0 * delta_psi_w).cos() * (2.0 *
    delta_psi_w).cos() - 1.0) * (2.0 * alpha).cos().powi(2)) * (2.0 * psi_w).cos() * (2.0 *
    psi_a).cos()) / 4.0
}

/// Intensity normalized by its value at `theta_a = theta_w = 0`.
pub fn intensity(p: &GeometricParams, theta_a: f64, theta_w: f64) -> Result<f64> {
    let reference = intensity_plain(p, 0.0, 0.0);
    normalize(intensity_plain(p, theta_a, theta_w), reference)
}

/// Normalized intensity assuming ideal polarizers.
pub fn intensity_simple(p: &GeometricParams, theta_a: f64, theta_w: f64) -> Result<f64> {
    intensity(&p.idealized(), theta_a, theta_w)
}

/// Normalized intensities for a sequence of `(theta_a, theta_w)` pairs.
///
/// The reference value is computed once for the whole sequence.
pub fn intensity_curve<I>(p: &GeometricParams, angles: I) -> Result<Vec<f64>>
where
    I: IntoIterator<Item = (f64, f64)>,
{
    let reference = intensity_plain(p, 0.0, 0.0);
    angles
        .into_iter()
        .map(|(theta_a, theta_w)| normalize(intensity_plain(p, theta_a, theta_w), reference))
        .collect()
}

fn normalize(value: f64, reference: f64) -> Result<f64> {
    if reference == 0.0 || !reference.is_finite() {
        return Err(Error::ZeroNormalization);
    }
    Ok(value / reference)
}
