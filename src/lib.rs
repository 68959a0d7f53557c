// #![warn(missing_docs)]

//! Mueller Matrix Microscope Calibration and Reconstruction
//!
//! A dual-rotating-retarder polarimeter is described by a small set of
//! geometric parameters. This crate fits those parameters to an angle scan
//! taken without a sample ([`calibration`]), builds the generator and analyzer
//! matrices `W` and `A` from them ([`optics::instrument`]) and recovers the
//! Mueller matrix of a sample from a 4x4 grid of intensities ([`reconstruct`]).
//! Intensities are extracted from camera frames by fitting the focused beam
//! spot ([`peak`], [`analysis`]).

#[allow(missing_docs)]
pub mod error;

pub mod analysis;
pub mod calibration;
pub mod config;
pub mod fit;
pub mod frame;
pub mod io;
pub mod optics;
pub mod peak;
pub mod reconstruct;
pub mod scan;
pub mod store;

/// Types needed for the common calibrate and reconstruct flow.
pub mod prelude {
    pub use crate::{
        calibration::{Calibration, CalibrationRecord, ModelVariant, calibrate, validate},
        config::Config,
        error::{Error, Result},
        optics::{GeometricParams, Instrument, Offsets, Wavelength},
        reconstruct::{MuellerMatrix, Reconstructor},
        scan::{AngleScan, ScanPoint},
        store::CalibrationStore,
    };
}
