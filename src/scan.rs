use crate::error::{Error, Result};
use std::cmp::Ordering;
use uom::si::{
    angle::{degree, radian},
    f64::Angle,
};

/// One measurement: generator angle, analyzer angle and detected intensity.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ScanPoint {
    pub psg: Angle,
    pub psa: Angle,
    pub intensity: f64,
}

impl ScanPoint {
    pub fn new(psg: Angle, psa: Angle, intensity: f64) -> Self {
        Self {
            psg,
            psa,
            intensity,
        }
    }

    /// Create a new `ScanPoint` from angles in degrees.
    pub fn from_degrees(psg: f64, psa: f64, intensity: f64) -> Self {
        Self::new(
            Angle::new::<degree>(psg),
            Angle::new::<degree>(psa),
            intensity,
        )
    }

    /// `(theta_a, theta_w)` in radians, the argument order of the intensity model.
    pub fn model_angles(&self) -> (f64, f64) {
        (self.psa.get::<radian>(), self.psg.get::<radian>())
    }

    fn cmp_psa(&self, other: &Self) -> Ordering {
        self.psa.get::<radian>().total_cmp(&other.psa.get::<radian>())
    }

    fn cmp_psg_psa(&self, other: &Self) -> Ordering {
        self.psg
            .get::<radian>()
            .total_cmp(&other.psg.get::<radian>())
            .then_with(|| self.cmp_psa(other))
    }
}

/// An ordered series of measurements at one wavelength.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AngleScan {
    points: Vec<ScanPoint>,
}

impl AngleScan {
    pub fn new(points: Vec<ScanPoint>) -> Self {
        Self { points }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn points(&self) -> &[ScanPoint] {
        &self.points
    }

    pub fn intensities(&self) -> impl Iterator<Item = f64> + '_ {
        self.points.iter().map(|p| p.intensity)
    }

    pub fn push(&mut self, point: ScanPoint) {
        self.points.push(point);
    }

    /// Stable sort by analyzer angle.
    pub fn sorted_by_psa(mut self) -> Self {
        self.points.sort_by(ScanPoint::cmp_psa);
        self
    }

    /// Stable lexicographic sort by `(psg, psa)`.
    pub fn sorted_by_psg_psa(mut self) -> Self {
        self.points.sort_by(ScanPoint::cmp_psg_psa);
        self
    }

    /// Divide every intensity by the first one.
    pub fn normalized_to_first(mut self) -> Result<Self> {
        let first = self
            .points
            .first()
            .map(|p| p.intensity)
            .ok_or(Error::InvalidInput("cannot normalize an empty scan".into()))?;
        if first == 0.0 || !first.is_finite() {
            return Err(Error::ZeroNormalization);
        }

        for point in &mut self.points {
            point.intensity /= first;
        }
        Ok(self)
    }
}

impl FromIterator<ScanPoint> for AngleScan {
    fn from_iter<I: IntoIterator<Item = ScanPoint>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

impl IntoIterator for AngleScan {
    type Item = ScanPoint;
    type IntoIter = std::vec::IntoIter<ScanPoint>;

    fn into_iter(self) -> Self::IntoIter {
        self.points.into_iter()
    }
}
