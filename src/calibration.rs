//! Reference-free calibration of the instrument geometry.
//!
//! A dense scan with the generator and analyzer retarders rotating at a 1:5
//! ratio is fitted with the closed-form intensity model. Both the fit data and
//! the model are normalized to their first sample, so the transmittance is not
//! identifiable and stays fixed at one.

use crate::{
    error::{Error, Result},
    fit::{self, Bound, Problem, SolveOptions},
    optics::{
        GeometricParams, Instrument, Offsets, Wavelength,
        dispersion::{delta_theta, retardance},
        intensity::intensity_curve,
    },
    scan::AngleScan,
};
use nalgebra::DVector;
use serde::{Deserialize, Serialize};
use std::f64::consts::{FRAC_PI_2, FRAC_PI_4};
use tracing::{info, warn};

/// Search margin around the dispersion estimate of the fast-axis offsets.
const THETA0_MARGIN_DEG: f64 = 10.0;

/// Which form of the intensity model to fit.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelVariant {
    /// Ideal polarizers; fits `alpha`, both offsets and both retardances.
    #[default]
    Simple,
    /// Also fits ellipticities, polarizer offsets and orientation dispersion.
    Full,
}

impl ModelVariant {
    pub fn free_parameters(self) -> usize {
        match self {
            ModelVariant::Simple => 5,
            ModelVariant::Full => 11,
        }
    }
}

/// A calibration as stored on disk.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CalibrationRecord {
    pub wavelength_nm: f64,
    pub variant: ModelVariant,
    #[serde(flatten)]
    pub params: GeometricParams,
    /// Linear `[gain, offset]` applied to the model when comparing with data.
    pub scale_result: [f64; 2],
}

impl CalibrationRecord {
    pub fn new(wavelength: Wavelength, variant: ModelVariant, params: GeometricParams) -> Self {
        Self {
            wavelength_nm: wavelength.nanometers(),
            variant,
            params,
            scale_result: [1.0, 0.0],
        }
    }

    pub fn wavelength(&self) -> Result<Wavelength> {
        Wavelength::from_nanometers(self.wavelength_nm)
    }

    pub fn instrument(&self, offsets: &Offsets) -> Instrument {
        Instrument::new(&self.params, offsets)
    }

    /// Parameters transferred to another wavelength through the dispersion model.
    ///
    /// Retardances move with the retardance dispersion and the fast-axis
    /// offsets with the rotation plus orientation dispersion.
    pub fn shifted_to(&self, target: Wavelength) -> Result<GeometricParams> {
        let source = self.wavelength()?;
        let d_retardance = retardance(target).mean - retardance(source).mean;
        let d_theta = delta_theta(target).mean - delta_theta(source).mean;

        Ok(GeometricParams {
            delta_ra: self.params.delta_ra + d_retardance,
            delta_rw: self.params.delta_rw + d_retardance,
            theta_a0: self.params.theta_a0 + d_theta,
            theta_w0: self.params.theta_w0 + d_theta,
            ..self.params
        })
    }

    fn scaled(&self, model: f64) -> f64 {
        model * self.scale_result[0] + self.scale_result[1]
    }
}

/// Quality figures of a finished calibration.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CalibrationReport {
    pub evaluations: usize,
    /// Half the sum of squared residuals.
    pub cost: f64,
    pub rms: f64,
    pub condition_w: f64,
    pub condition_a: f64,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Calibration {
    pub record: CalibrationRecord,
    pub report: CalibrationReport,
}

struct ScanFit {
    variant: ModelVariant,
    base: GeometricParams,
    angles: Vec<(f64, f64)>,
    measured: DVector<f64>,
}

impl ScanFit {
    fn params(&self, x: &DVector<f64>) -> GeometricParams {
        let mut p = GeometricParams {
            alpha: x[0],
            theta_a0: x[1],
            theta_w0: x[2],
            delta_ra: x[3],
            delta_rw: x[4],
            ..self.base
        };
        if self.variant == ModelVariant::Full {
            p.psi_a = x[5];
            p.psi_w = x[6];
            p.delta_pa = x[7];
            p.delta_pw = x[8];
            p.delta_psi_a = x[9];
            p.delta_psi_w = x[10];
        }
        p
    }
}

impl Problem for ScanFit {
    fn residuals(&self, x: &DVector<f64>) -> Option<DVector<f64>> {
        let model = intensity_curve(&self.params(x), self.angles.iter().copied()).ok()?;
        Some(DVector::from_vec(model) - &self.measured)
    }
}

/// Starting point and box of every free parameter, in the `ScanFit` layout.
fn initial_guess(wavelength: Wavelength, variant: ModelVariant) -> Result<(Vec<f64>, Vec<Bound>)> {
    let retardance = retardance(wavelength);
    let theta0 = delta_theta(wavelength).widened(THETA0_MARGIN_DEG.to_radians());

    let mut x0 = vec![0.0, theta0.mean, theta0.mean, retardance.mean, retardance.mean];
    let mut bounds = vec![
        Bound::new(0.0, FRAC_PI_2)?,
        Bound::new(theta0.min, theta0.max)?,
        Bound::new(theta0.min, theta0.max)?,
        Bound::new(retardance.min, retardance.max)?,
        Bound::new(retardance.min, retardance.max)?,
    ];

    if variant == ModelVariant::Full {
        x0.extend([0.0; 6]);
        bounds.extend([
            Bound::new(0.0, FRAC_PI_2)?,
            Bound::new(0.0, FRAC_PI_2)?,
            Bound::new(-FRAC_PI_2, FRAC_PI_2)?,
            Bound::new(-FRAC_PI_2, FRAC_PI_2)?,
            Bound::new(-FRAC_PI_4, FRAC_PI_4)?,
            Bound::new(-FRAC_PI_4, FRAC_PI_4)?,
        ]);
    }

    Ok((x0, bounds))
}

/// Fit the instrument geometry to a calibration scan.
///
/// The scan is sorted by PSA angle (stable) and normalized to its first
/// sample before fitting. The polarizer azimuth `beta` and the transmittance
/// are held at 0 and 1.
pub fn calibrate(
    scan: &AngleScan,
    wavelength: Wavelength,
    variant: ModelVariant,
    opts: &SolveOptions,
) -> Result<Calibration> {
    let required = variant.free_parameters();
    if scan.len() <= required {
        return Err(Error::InsufficientScan {
            required,
            actual: scan.len(),
        });
    }
    if let Some(bad) = scan.intensities().find(|i| !i.is_finite()) {
        return Err(Error::InvalidInput(format!(
            "scan contains a non-finite intensity: {bad}"
        )));
    }

    let scan = scan.clone().sorted_by_psa().normalized_to_first()?;
    let problem = ScanFit {
        variant,
        base: GeometricParams {
            t: 1.0,
            beta: 0.0,
            ..GeometricParams::ideal()
        },
        angles: scan.points().iter().map(|p| p.model_angles()).collect(),
        measured: DVector::from_iterator(scan.len(), scan.intensities()),
    };

    let (x0, bounds) = initial_guess(wavelength, variant)?;
    let solution = fit::solve(
        "calibration",
        &problem,
        &DVector::from_vec(x0),
        &bounds,
        opts,
    )?;

    let record = CalibrationRecord::new(wavelength, variant, problem.params(&solution.x));
    let instrument = record.instrument(&Offsets::nominal());
    let report = CalibrationReport {
        evaluations: solution.evaluations,
        cost: solution.cost,
        rms: solution.rms(),
        condition_w: instrument.w.condition_number(),
        condition_a: instrument.a.condition_number(),
    };

    info!(
        wavelength_nm = record.wavelength_nm,
        evaluations = report.evaluations,
        rms = report.rms,
        cond_w = report.condition_w,
        cond_a = report.condition_a,
        "calibration converged"
    );

    Ok(Calibration { record, report })
}

/// Agreement between a transferred calibration and a scan at another wavelength.
#[derive(Clone, Debug, PartialEq)]
pub struct Validation {
    pub residuals: Vec<f64>,
    pub rms: f64,
    pub max_abs: f64,
}

/// Compare a calibration, shifted to `wavelength`, against a scan taken there.
pub fn validate(
    record: &CalibrationRecord,
    scan: &AngleScan,
    wavelength: Wavelength,
) -> Result<Validation> {
    if scan.is_empty() {
        return Err(Error::InvalidInput(
            "cannot validate against an empty scan".into(),
        ));
    }

    let params = record.shifted_to(wavelength)?;
    let scan = scan.clone().sorted_by_psa().normalized_to_first()?;
    let model = intensity_curve(&params, scan.points().iter().map(|p| p.model_angles()))?;

    let residuals: Vec<f64> = model
        .iter()
        .zip(scan.intensities())
        .map(|(m, i)| record.scaled(*m) - i)
        .collect();
    let rms = (residuals.iter().map(|r| r * r).sum::<f64>() / residuals.len() as f64).sqrt();
    let max_abs = residuals.iter().fold(0.0_f64, |acc, r| acc.max(r.abs()));

    if rms > 0.05 {
        warn!(
            calibration_nm = record.wavelength_nm,
            data_nm = wavelength.nanometers(),
            rms,
            "transferred calibration disagrees with data"
        );
    }

    Ok(Validation {
        residuals,
        rms,
        max_abs,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scan::ScanPoint;
    use approx::assert_relative_eq;
    use rstest::rstest;

    fn wl(nm: f64) -> Wavelength {
        Wavelength::from_nanometers(nm).unwrap()
    }

    fn record_633() -> CalibrationRecord {
        let retardance = retardance(wl(633.0)).mean;
        let theta0 = delta_theta(wl(633.0)).mean;
        CalibrationRecord::new(
            wl(633.0),
            ModelVariant::Simple,
            GeometricParams {
                alpha: 0.1,
                theta_a0: theta0 + 0.02,
                theta_w0: theta0 - 0.015,
                delta_ra: retardance + 0.0005,
                delta_rw: retardance - 0.0003,
                ..GeometricParams::ideal()
            },
        )
    }

    fn scan_from(params: &GeometricParams, n: usize) -> AngleScan {
        (0..n)
            .map(|k| {
                let p = ScanPoint::from_degrees(k as f64, 5.0 * k as f64, 0.0);
                let (a, w) = p.model_angles();
                ScanPoint {
                    intensity: crate::optics::intensity::intensity(params, a, w).unwrap(),
                    ..p
                }
            })
            .collect()
    }

    #[rstest]
    #[case(ModelVariant::Simple, 5)]
    #[case(ModelVariant::Full, 11)]
    fn rejects_short_scans(#[case] variant: ModelVariant, #[case] n: usize) {
        let scan = scan_from(&record_633().params, n);
        let err = calibrate(&scan, wl(633.0), variant, &SolveOptions::default()).unwrap_err();
        assert!(matches!(err, Error::InsufficientScan { .. }));
    }

    #[test]
    fn rejects_zero_first_sample() {
        let mut points = scan_from(&record_633().params, 20).into_iter().collect::<Vec<_>>();
        points[0].intensity = 0.0;
        let err = calibrate(
            &AngleScan::new(points),
            wl(633.0),
            ModelVariant::Simple,
            &SolveOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::ZeroNormalization));
    }

    #[test]
    fn exhausted_budget_is_an_error() {
        let opts = SolveOptions {
            patience: 1,
            ..SolveOptions::default()
        };
        let far = GeometricParams {
            alpha: 0.7,
            theta_a0: record_633().params.theta_a0 + 0.12,
            theta_w0: record_633().params.theta_w0 - 0.1,
            ..record_633().params
        };
        let err = calibrate(&scan_from(&far, 73), wl(633.0), ModelVariant::Simple, &opts).unwrap_err();
        assert!(matches!(err, Error::FitFailed { what: "calibration", .. }), "{err:?}");
    }

    #[test]
    fn initial_guess_lies_inside_bounds() {
        for variant in [ModelVariant::Simple, ModelVariant::Full] {
            let (x0, bounds) = initial_guess(wl(633.0), variant).unwrap();
            assert_eq!(x0.len(), variant.free_parameters());
            assert!(x0.iter().zip(&bounds).all(|(x, b)| b.contains(*x)));
        }
    }

    #[test]
    fn shifting_to_same_wavelength_is_identity() {
        let record = record_633();
        assert_eq!(record.shifted_to(wl(633.0)).unwrap(), record.params);
    }

    #[test]
    fn shift_follows_dispersion() {
        let record = record_633();
        let shifted = record.shifted_to(wl(500.0)).unwrap();
        let expected = retardance(wl(500.0)).mean - retardance(wl(633.0)).mean;
        assert_relative_eq!(shifted.delta_ra - record.params.delta_ra, expected, epsilon = 1e-15);
        assert_relative_eq!(shifted.delta_rw - record.params.delta_rw, expected, epsilon = 1e-15);
        assert_eq!(shifted.alpha, record.params.alpha);
    }

    #[test]
    fn validation_of_consistent_data_is_exact() {
        let record = record_633();
        let target = wl(550.0);
        let scan = scan_from(&record.shifted_to(target).unwrap(), 40);
        let validation = validate(&record, &scan, target).unwrap();
        assert!(validation.rms < 1e-12, "rms {}", validation.rms);
        assert_eq!(validation.residuals.len(), 40);
    }
}
