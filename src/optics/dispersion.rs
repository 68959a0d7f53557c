//! Empirical dispersion of the quartz retarders.
//!
//! Each quantity is a polynomial in photon energy `eV = 1240 / λ[nm]` fitted to
//! manufacturer data. The uncertainty polynomial is evaluated independently and
//! subtracted from / added to the mean to form a [`Band`].

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use uom::si::{f64::Length, length::nanometer};

/// Photon energy of a 1 nm photon in electron volts, rounded as in the data sheet.
const EV_NM: f64 = 1240.0;

/// A vacuum wavelength, held in nanometers.
#[derive(Clone, Copy, Debug, PartialEq, PartialOrd)]
pub struct Wavelength {
    nm: f64,
}

impl Wavelength {
    /// Create a new `Wavelength` from `length`.
    ///
    /// Returns an error if `length` is not finite and positive.
    pub fn new(length: Length) -> Result<Self> {
        Self::from_nanometers(length.get::<nanometer>())
    }

    pub fn from_nanometers(nm: f64) -> Result<Self> {
        if !nm.is_finite() || nm <= 0.0 {
            return Err(Error::InvalidInput(format!(
                "expected a positive wavelength but got: {nm} nm"
            )));
        }

        Ok(Self { nm })
    }

    pub fn nanometers(&self) -> f64 {
        self.nm
    }

    pub fn photon_energy_ev(&self) -> f64 {
        EV_NM / self.nm
    }

    pub fn length(&self) -> Length {
        Length::new::<nanometer>(self.nm)
    }
}

impl fmt::Display for Wavelength {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.nanometers())
    }
}

/// A mean value with an uncertainty interval, in radians.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Band {
    pub mean: f64,
    pub min: f64,
    pub max: f64,
}

impl Band {
    fn from_degrees(mean: f64, uncertainty: f64) -> Self {
        Self {
            mean: mean.to_radians(),
            min: (mean - uncertainty).to_radians(),
            max: (mean + uncertainty).to_radians(),
        }
    }

    /// Widen both ends of the band by `margin` radians.
    pub fn widened(self, margin: f64) -> Self {
        Self {
            mean: self.mean,
            min: self.min - margin,
            max: self.max + margin,
        }
    }

    pub fn contains(&self, value: f64) -> bool {
        (self.min..=self.max).contains(&value)
    }
}

impl std::ops::Add for Band {
    type Output = Band;

    fn add(self, other: Self) -> Self::Output {
        Band {
            mean: self.mean + other.mean,
            min: self.min + other.min,
            max: self.max + other.max,
        }
    }
}

/// Retardance of the quarter-wave stack.
pub fn retardance(wavelength: Wavelength) -> Band {
    let ev = wavelength.photon_energy_ev();
    Band::from_degrees(
        129.0005 + 2.29074 * ev - 0.43863 * ev.powi(2) + 0.11198 * ev.powi(3),
        0.01952 + 0.02866 * ev + 0.01293 * ev.powi(2) + 0.00182 * ev.powi(3),
    )
}

/// Optical rotation of the retarder's fast axis.
pub fn optical_rotation(wavelength: Wavelength) -> Band {
    let ev = wavelength.photon_energy_ev();
    Band::from_degrees(
        0.11584 + 0.12231 * ev - 0.0755 * ev.powi(2) + 0.01223 * ev.powi(3),
        0.00013 + 0.0121 * ev + 0.00458 * ev.powi(2) + 0.000507 * ev.powi(3),
    )
}

/// Dispersion of the fast-axis orientation.
pub fn orientation_dispersion(wavelength: Wavelength) -> Band {
    let ev = wavelength.photon_energy_ev();
    Band::from_degrees(
        0.90001 + 0.02182 * ev + 0.01272 * ev.powi(2),
        0.00312 + 0.00221 * ev + 0.0000159 * ev.powi(2),
    )
}

/// Total fast-axis offset: optical rotation plus orientation dispersion.
///
/// The bounds are summed independently, not propagated.
pub fn delta_theta(wavelength: Wavelength) -> Band {
    optical_rotation(wavelength) + orientation_dispersion(wavelength)
}
