//! Localization of the focused beam spot in k-space frames.
//!
//! The spot is modelled as an isotropic Gaussian on a constant background,
//! `A · exp(-((x - x0)² + (y - y0)²) / (2σ²)) + offset`, and fitted with
//! Levenberg-Marquardt on a small window around its expected position.

use crate::{
    error::{Error, Result},
    fit::{self, Bound, Problem, SolveOptions},
    frame::Frame,
};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uom::si::{angle::radian, f64::Angle};

/// Where to look for the spot, as fractions of the frame size.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchWindow {
    /// Expected spot column divided by the frame width.
    pub x_fraction: f64,
    /// Expected spot row divided by the frame height.
    pub y_fraction: f64,
    /// Search radius divided by the frame height.
    pub radius_fraction: f64,
    /// Half width of the fitted window, in pixels.
    pub half_width: usize,
}

impl Default for SearchWindow {
    fn default() -> Self {
        Self {
            x_fraction: 255.0 / 512.0,
            y_fraction: 335.0 / 512.0,
            radius_fraction: 0.03,
            half_width: 20,
        }
    }
}

/// Scalar reported as a frame's intensity.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeakMetric {
    /// Maximum of the fitted Gaussian within one sigma of its centre.
    #[default]
    FittedMax,
    /// Sum of the fitted Gaussian within one sigma.
    FittedSum,
    /// Maximum of the background-corrected frame within one sigma.
    MeasuredMax,
    /// Sum of the background-corrected frame within one sigma.
    MeasuredSum,
}

/// Drift of the spot with the analyzer angle, fitted as a circle.
///
/// The default is no correction.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PsaCorrection {
    pub angle_offset: f64,
    pub xc: f64,
    pub yc: f64,
    pub r: f64,
}

impl PsaCorrection {
    /// Pixel shift `(dx, dy)` of the expected spot position at analyzer angle `psa`.
    pub fn shift(&self, psa: Angle) -> (f64, f64) {
        let phase = self.angle_offset + psa.get::<radian>();
        (
            self.xc + self.r * phase.cos(),
            self.yc + self.r * phase.sin(),
        )
    }
}

/// Fitted Gaussian parameters. Positions are in pixels, `x` along columns.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GaussianFit {
    pub x0: f64,
    pub y0: f64,
    pub sigma: f64,
    pub amplitude: f64,
    pub offset: f64,
}

impl GaussianFit {
    fn from_vector(x: &DVector<f64>) -> Self {
        Self {
            x0: x[0],
            y0: x[1],
            sigma: x[2],
            amplitude: x[3],
            offset: x[4],
        }
    }

    /// Model value at pixel `(x, y)` without the background.
    pub fn spot(&self, x: f64, y: f64) -> f64 {
        let r2 = (x - self.x0).powi(2) + (y - self.y0).powi(2);
        self.amplitude * (-r2 / (2.0 * self.sigma.powi(2))).exp()
    }
}

/// True where `(x, y)` lies within `radius` of `center`.
pub fn in_circle(x: f64, y: f64, center: (f64, f64), radius: f64) -> bool {
    ((x - center.0).powi(2) + (y - center.1).powi(2)).sqrt() <= radius
}

/// Brightest pixel within `radius` of `center`, as `(row, col, value)`.
pub fn masked_argmax(frame: &Frame, center: (f64, f64), radius: f64) -> Option<(usize, usize, f64)> {
    let pixels = frame.pixels();
    let mut best: Option<(usize, usize, f64)> = None;
    for col in 0..frame.width() {
        for row in 0..frame.height() {
            if !in_circle(col as f64, row as f64, center, radius) {
                continue;
            }
            let value = pixels[(row, col)];
            if best.is_none_or(|(_, _, b)| value > b) {
                best = Some((row, col, value));
            }
        }
    }
    best
}

struct GaussianProblem<'a> {
    window: &'a DMatrix<f64>,
}

impl Problem for GaussianProblem<'_> {
    fn residuals(&self, p: &DVector<f64>) -> Option<DVector<f64>> {
        let model = GaussianFit::from_vector(p);
        let (rows, cols) = self.window.shape();
        Some(DVector::from_iterator(
            rows * cols,
            (0..rows).flat_map(|row| {
                (0..cols).map(move |col| {
                    model.spot(col as f64, row as f64) + model.offset - self.window[(row, col)]
                })
            }),
        ))
    }

    fn jacobian(&self, p: &DVector<f64>) -> Option<DMatrix<f64>> {
        let model = GaussianFit::from_vector(p);
        let (rows, cols) = self.window.shape();
        let s2 = model.sigma.powi(2);
        let mut jacobian = DMatrix::zeros(rows * cols, 5);
        for row in 0..rows {
            for col in 0..cols {
                let (x, y) = (col as f64, row as f64);
                let e = (-((x - model.x0).powi(2) + (y - model.y0).powi(2)) / (2.0 * s2)).exp();
                let ae = model.amplitude * e;
                let i = row * cols + col;
                jacobian[(i, 0)] = ae * (x - model.x0) / s2;
                jacobian[(i, 1)] = ae * (y - model.y0) / s2;
                jacobian[(i, 2)] =
                    ae * ((x - model.x0).powi(2) + (y - model.y0).powi(2)) / (s2 * model.sigma);
                jacobian[(i, 3)] = e;
                jacobian[(i, 4)] = 1.0;
            }
        }
        Some(jacobian)
    }
}

/// Fit a Gaussian spot to `window`.
///
/// `start` is the `(row, col)` of the initial centre; the window maximum when `None`.
pub fn fit_gaussian(
    window: &Frame,
    start: Option<(usize, usize)>,
    opts: &SolveOptions,
) -> Result<GaussianFit> {
    let pixels = window.pixels();
    let (h, w) = pixels.shape();
    if h < 3 || w < 3 {
        return Err(Error::InvalidInput(format!(
            "window of {h}x{w} pixels is too small for a spot fit"
        )));
    }

    let (mut max_row, mut max_col) = (0, 0);
    for col in 0..w {
        for row in 0..h {
            if pixels[(row, col)] > pixels[(max_row, max_col)] {
                (max_row, max_col) = (row, col);
            }
        }
    }
    let max = pixels[(max_row, max_col)];
    let min = pixels.min();
    if !(max - min > f64::EPSILON * max.abs().max(1.0)) {
        return Err(Error::FitFailed {
            what: "gaussian",
            reason: "window is flat".into(),
            evaluations: 0,
        });
    }

    let (row, col) = start.unwrap_or((max_row, max_col));
    let x0 = DVector::from_vec(vec![
        col as f64,
        row as f64,
        0.1 * h.max(w) as f64,
        max,
        pixels[(0, 0)],
    ]);
    let solution = fit::solve(
        "gaussian",
        &GaussianProblem { window: pixels },
        &x0,
        &[Bound::Free; 5],
        opts,
    )?;

    let fit = GaussianFit::from_vector(&solution.x);
    if !(fit.sigma.abs() > 0.0) {
        return Err(Error::FitFailed {
            what: "gaussian",
            reason: format!("degenerate width {}", fit.sigma),
            evaluations: solution.evaluations,
        });
    }
    Ok(GaussianFit {
        sigma: fit.sigma.abs(),
        ..fit
    })
}

/// A located spot and its scalar intensity.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Peak {
    /// Fit in full-frame pixel coordinates.
    pub fit: GaussianFit,
    pub intensity: f64,
}

/// Finds the spot in a frame and reduces it to one intensity.
#[derive(Clone, Debug, Default)]
pub struct PeakFinder {
    pub window: SearchWindow,
    pub metric: PeakMetric,
    pub correction: PsaCorrection,
    pub opts: SolveOptions,
}

impl PeakFinder {
    /// Expected spot centre `(x, y)` at analyzer angle `psa`.
    pub fn expected_center(&self, frame: &Frame, psa: Angle) -> (f64, f64) {
        let (dx, dy) = self.correction.shift(psa);
        (
            self.window.x_fraction * frame.width() as f64 + dx,
            self.window.y_fraction * frame.height() as f64 + dy,
        )
    }

    /// Locate the spot and compute its intensity divided by `reference`.
    pub fn locate(&self, frame: &Frame, psa: Angle, reference: f64) -> Result<Peak> {
        if reference == 0.0 || !reference.is_finite() {
            return Err(Error::ZeroNormalization);
        }

        let center = self.expected_center(frame, psa);
        let radius = self.window.radius_fraction * frame.height() as f64;
        let half = self.window.half_width as f64;
        let corner = |c: f64| (c - half).max(0.0) as usize;
        let rows = (corner(center.1), (center.1 + half).max(0.0) as usize);
        let cols = (corner(center.0), (center.0 + half).max(0.0) as usize);

        let (window, (row0, col0)) = frame.crop(rows, cols).ok_or_else(|| {
            Error::InvalidInput(format!(
                "expected spot at ({:.1}, {:.1}) lies outside the {}x{} frame",
                center.0,
                center.1,
                frame.width(),
                frame.height()
            ))
        })?;

        let start = masked_argmax(frame, center, radius)
            .filter(|(row, col, _)| {
                (row0..row0 + window.height()).contains(row)
                    && (col0..col0 + window.width()).contains(col)
            })
            .map(|(row, col, _)| (row - row0, col - col0));
        let local = fit_gaussian(&window, start, &self.opts)?;

        let intensity = self.measure(&window, &local)? / reference;
        let fit = GaussianFit {
            x0: local.x0 + col0 as f64,
            y0: local.y0 + row0 as f64,
            ..local
        };
        debug!(x0 = fit.x0, y0 = fit.y0, sigma = fit.sigma, intensity, "located spot");

        Ok(Peak { fit, intensity })
    }

    fn measure(&self, window: &Frame, fit: &GaussianFit) -> Result<f64> {
        let pixels = window.pixels();
        let mut fitted = Vec::new();
        let mut measured = Vec::new();
        for row in 0..window.height() {
            for col in 0..window.width() {
                let (x, y) = (col as f64, row as f64);
                if in_circle(x, y, (fit.x0, fit.y0), fit.sigma) {
                    fitted.push(fit.spot(x, y));
                    measured.push(pixels[(row, col)] - fit.offset);
                }
            }
        }
        if fitted.is_empty() {
            return Err(Error::FitFailed {
                what: "gaussian",
                reason: format!(
                    "no pixel within sigma {:.3} of ({:.2}, {:.2})",
                    fit.sigma, fit.x0, fit.y0
                ),
                evaluations: 0,
            });
        }

        let max = |v: &[f64]| v.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        Ok(match self.metric {
            PeakMetric::FittedMax => max(&fitted),
            PeakMetric::FittedSum => fitted.iter().sum(),
            PeakMetric::MeasuredMax => max(&measured),
            PeakMetric::MeasuredSum => measured.iter().sum(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rstest::rstest;
    use uom::si::angle::degree;

    /// Gaussian spot on a background with a small deterministic ripple.
    fn spot_frame(width: usize, height: usize, truth: GaussianFit) -> Frame {
        let values = (0..height)
            .flat_map(|row| (0..width).map(move |col| (row, col)))
            .map(|(row, col)| {
                let (x, y) = (col as f64, row as f64);
                let ripple = 0.3 * ((7.3 * x + 3.1 * y).sin());
                truth.spot(x, y) + truth.offset + ripple
            })
            .collect();
        Frame::from_rows(width, height, values).unwrap()
    }

    fn truth() -> GaussianFit {
        GaussianFit {
            x0: 64.3,
            y0: 84.6,
            sigma: 3.2,
            amplitude: 1000.0,
            offset: 50.0,
        }
    }

    #[test]
    fn locates_spot_near_expected_position() {
        let frame = spot_frame(128, 128, truth());
        let finder = PeakFinder::default();
        let peak = finder.locate(&frame, Angle::new::<degree>(0.0), 1.0).unwrap();

        assert_relative_eq!(peak.fit.x0, 64.3, epsilon = 0.02);
        assert_relative_eq!(peak.fit.y0, 84.6, epsilon = 0.02);
        assert_relative_eq!(peak.fit.sigma, 3.2, epsilon = 0.02);
        assert_relative_eq!(peak.fit.offset, 50.0, epsilon = 0.5);
        assert_relative_eq!(peak.intensity, 1000.0, max_relative = 0.02);
    }

    #[test]
    fn intensity_is_divided_by_reference() {
        let frame = spot_frame(128, 128, truth());
        let finder = PeakFinder::default();
        let psa = Angle::new::<degree>(0.0);
        let unit = finder.locate(&frame, psa, 1.0).unwrap().intensity;
        let scaled = finder.locate(&frame, psa, 4.0).unwrap().intensity;
        assert_relative_eq!(scaled * 4.0, unit, max_relative = 1e-12);
        assert!(matches!(finder.locate(&frame, psa, 0.0), Err(Error::ZeroNormalization)));
    }

    #[rstest]
    #[case(PeakMetric::FittedMax)]
    #[case(PeakMetric::FittedSum)]
    #[case(PeakMetric::MeasuredMax)]
    #[case(PeakMetric::MeasuredSum)]
    fn metrics_are_positive(#[case] metric: PeakMetric) {
        let frame = spot_frame(128, 128, truth());
        let finder = PeakFinder {
            metric,
            ..PeakFinder::default()
        };
        let peak = finder.locate(&frame, Angle::new::<degree>(0.0), 1.0).unwrap();
        assert!(peak.intensity > 500.0);
    }

    #[test]
    fn flat_window_fails() {
        let frame = Frame::from_rows(40, 40, vec![123.0; 1600]).unwrap();
        let err = fit_gaussian(&frame, None, &SolveOptions::default()).unwrap_err();
        assert!(matches!(err, Error::FitFailed { what: "gaussian", .. }));
    }

    #[test]
    fn psa_correction_moves_search_center() {
        let frame = Frame::from_rows(512, 512, vec![0.0; 512 * 512]).unwrap();
        let finder = PeakFinder {
            correction: PsaCorrection {
                angle_offset: 0.0,
                xc: 1.0,
                yc: -2.0,
                r: 3.0,
            },
            ..PeakFinder::default()
        };
        let (x, y) = finder.expected_center(&frame, Angle::new::<degree>(90.0));
        assert_relative_eq!(x, 255.0 + 1.0, epsilon = 1e-12);
        assert_relative_eq!(y, 335.0 - 2.0 + 3.0, epsilon = 1e-12);
    }

    #[test]
    fn default_correction_is_zero() {
        assert_eq!(PsaCorrection::default().shift(Angle::new::<degree>(37.0)), (0.0, 0.0));
    }

    #[test]
    fn masked_argmax_ignores_pixels_outside_circle() {
        let mut values = vec![0.0; 100];
        values[0] = 99.0;
        values[5 * 10 + 5] = 10.0;
        let frame = Frame::from_rows(10, 10, values).unwrap();
        assert_eq!(masked_argmax(&frame, (5.0, 5.0), 2.0), Some((5, 5, 10.0)));
        assert_eq!(masked_argmax(&frame, (50.0, 50.0), 2.0), None);
    }

    #[test]
    fn analytic_jacobian_matches_central_difference() {
        let frame = spot_frame(12, 10, GaussianFit {
            x0: 5.5,
            y0: 4.2,
            sigma: 2.0,
            amplitude: 10.0,
            offset: 1.0,
        });
        let problem = GaussianProblem { window: frame.pixels() };
        let p = DVector::from_vec(vec![5.0, 4.0, 2.3, 9.0, 0.5]);
        let analytic = problem.jacobian(&p).unwrap();
        let numeric = fit::central_difference(|x| problem.residuals(x), &p).unwrap();
        assert_relative_eq!(analytic, numeric, epsilon = 1e-6);
    }
}
