use serde::{Deserialize, Serialize};

/// Retardance that makes a rotating-retarder polarimeter optimally conditioned.
///
/// The four Stokes vectors then span a regular tetrahedron on the Poincaré sphere.
pub fn optimal_retardance() -> f64 {
    (-2.0_f64 / 3.0).acos()
}

/// Geometry of the generator and analyzer arms, angles in radians.
///
/// Field names on disk follow the calibration file layout (`psi_A`, `DeltaPsi_W`, ...).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct GeometricParams {
    /// Overall transmittance.
    pub t: f64,
    #[serde(rename = "psi_A")]
    pub psi_a: f64,
    #[serde(rename = "psi_W")]
    pub psi_w: f64,
    /// Azimuth of the analyzer polarizer.
    pub alpha: f64,
    /// Azimuth of the generator polarizer.
    pub beta: f64,
    #[serde(rename = "delta_PA")]
    pub delta_pa: f64,
    #[serde(rename = "delta_PW")]
    pub delta_pw: f64,
    /// Fast-axis offset of the analyzer retarder.
    #[serde(rename = "theta_A0")]
    pub theta_a0: f64,
    /// Fast-axis offset of the generator retarder.
    #[serde(rename = "theta_W0")]
    pub theta_w0: f64,
    #[serde(rename = "delta_RA")]
    pub delta_ra: f64,
    #[serde(rename = "delta_RW")]
    pub delta_rw: f64,
    #[serde(rename = "DeltaPsi_A")]
    pub delta_psi_a: f64,
    #[serde(rename = "DeltaPsi_W")]
    pub delta_psi_w: f64,
}

impl GeometricParams {
    /// An ideal instrument: unit transmittance, perfect polarizers, no offsets
    /// and retarders at the optimal retardance.
    pub fn ideal() -> Self {
        Self {
            t: 1.0,
            psi_a: 0.0,
            psi_w: 0.0,
            alpha: 0.0,
            beta: 0.0,
            delta_pa: 0.0,
            delta_pw: 0.0,
            theta_a0: 0.0,
            theta_w0: 0.0,
            delta_ra: optimal_retardance(),
            delta_rw: optimal_retardance(),
            delta_psi_a: 0.0,
            delta_psi_w: 0.0,
        }
    }

    /// Returns a copy with ideal polarizers and no orientation dispersion.
    pub fn idealized(self) -> Self {
        Self {
            psi_a: 0.0,
            psi_w: 0.0,
            delta_pa: 0.0,
            delta_pw: 0.0,
            delta_psi_a: 0.0,
            delta_psi_w: 0.0,
            ..self
        }
    }

    pub fn is_finite(&self) -> bool {
        [
            self.t,
            self.psi_a,
            self.psi_w,
            self.alpha,
            self.beta,
            self.delta_pa,
            self.delta_pw,
            self.theta_a0,
            self.theta_w0,
            self.delta_ra,
            self.delta_rw,
            self.delta_psi_a,
            self.delta_psi_w,
        ]
        .iter()
        .all(|v| v.is_finite())
    }
}
