//! Optical model of the dual rotating-retarder polarimeter.

pub mod dispersion;
pub mod instrument;
pub mod intensity;
pub mod params;

pub use dispersion::{Band, Wavelength};
pub use instrument::{Instrument, InstrumentMatrix, Offsets};
pub use params::GeometricParams;
