//! Recovery of a sample Mueller matrix from a 4x4 grid of intensities.

use crate::{
    calibration::CalibrationRecord,
    error::{Error, Result},
    optics::{Instrument, Offsets, instrument::ConditionWarning},
    scan::AngleScan,
};
use nalgebra::Matrix4;
use tracing::info;

/// Number of measurements in one reconstruction: 4 PSG x 4 PSA positions.
pub const GRID_POINTS: usize = 16;

/// A Mueller matrix normalized so that `m[(0, 0)] == 1`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MuellerMatrix(Matrix4<f64>);

impl MuellerMatrix {
    /// Divide `m` by its top-left element.
    pub fn normalized(m: Matrix4<f64>) -> Result<Self> {
        let m00 = m[(0, 0)];
        if m00 == 0.0 || !m00.is_finite() {
            return Err(Error::ZeroNormalization);
        }
        Ok(Self(m / m00))
    }

    pub fn matrix(&self) -> &Matrix4<f64> {
        &self.0
    }

    pub fn into_inner(self) -> Matrix4<f64> {
        self.0
    }
}

/// Arrange a 16-point scan into `B`, rows by PSG angle and columns by PSA angle.
///
/// Input order does not matter: points are sorted by `(psg, psa)` first.
pub fn intensity_matrix(scan: &AngleScan) -> Result<Matrix4<f64>> {
    if scan.len() != GRID_POINTS {
        return Err(Error::ScanLength {
            expected: GRID_POINTS,
            actual: scan.len(),
        });
    }

    let sorted = scan.clone().sorted_by_psg_psa();
    let points = sorted.points();

    let distinct = |values: Vec<f64>| {
        let mut values = values;
        values.dedup();
        values.len()
    };
    let psg = distinct(points.iter().map(|p| p.psg.value).collect());
    let mut psa_values: Vec<f64> = points.iter().map(|p| p.psa.value).collect();
    psa_values.sort_by(f64::total_cmp);
    let psa = distinct(psa_values);
    let same_columns = points
        .chunks(4)
        .all(|row| row.iter().zip(&points[..4]).all(|(a, b)| a.psa == b.psa));
    if psg != 4 || psa != 4 || !same_columns {
        return Err(Error::IncompleteGrid { psg, psa });
    }

    Ok(Matrix4::from_row_iterator(sorted.intensities()))
}

/// `M = A⁻¹ · B · W⁻¹`, normalized.
pub fn reconstruct_matrix(instrument: &Instrument, b: &Matrix4<f64>) -> Result<MuellerMatrix> {
    let (a_inv, w_inv) = instrument.inverses()?;
    MuellerMatrix::normalized(a_inv * b * w_inv)
}

/// Reconstruct the Mueller matrix of a 16-point scan.
pub fn reconstruct(instrument: &Instrument, scan: &AngleScan) -> Result<MuellerMatrix> {
    reconstruct_matrix(instrument, &intensity_matrix(scan)?)
}

/// A reconstruction together with the conditioning warnings of its calibration.
#[derive(Clone, Debug, PartialEq)]
pub struct Reconstruction {
    pub mueller: MuellerMatrix,
    pub wavelength_nm: f64,
    pub warnings: Vec<ConditionWarning>,
}

/// Reconstructs with a fixed calibration.
#[derive(Clone, Debug)]
pub struct Reconstructor {
    record: CalibrationRecord,
    instrument: Instrument,
    condition_warning: f64,
}

impl Reconstructor {
    pub fn new(record: CalibrationRecord, offsets: &Offsets, condition_warning: f64) -> Self {
        Self {
            instrument: record.instrument(offsets),
            record,
            condition_warning,
        }
    }

    pub fn instrument(&self) -> &Instrument {
        &self.instrument
    }

    pub fn reconstruct(&self, scan: &AngleScan) -> Result<Reconstruction> {
        let warnings = self.instrument.check_conditioning(self.condition_warning);
        let mueller = reconstruct(&self.instrument, scan)?;
        info!(
            wavelength_nm = self.record.wavelength_nm,
            cond_w = self.instrument.w.condition_number(),
            cond_a = self.instrument.a.condition_number(),
            "reconstructed mueller matrix"
        );

        Ok(Reconstruction {
            mueller,
            wavelength_nm: self.record.wavelength_nm,
            warnings,
        })
    }
}
