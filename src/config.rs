use crate::{
    error::{Error, Result},
    fit::SolveOptions,
    frame::{DarkPolicy, SaturationThresholds},
    optics::Offsets,
    peak::{PeakMetric, SearchWindow},
};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};

/// Runtime configuration shared by calibration, analysis and reconstruction.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory holding one calibration record per wavelength.
    pub calibration_dir: PathBuf,

    /// Root directory of acquired datasets.
    pub data_dir: PathBuf,

    pub dark_policy: DarkPolicy,
    pub peak_metric: PeakMetric,
    pub saturation: SaturationThresholds,
    pub search: SearchWindow,

    /// Table `[angle_offset, xc, yc, R]` describing the spot drift with PSA angle.
    pub psa_table: Option<PathBuf>,

    /// Retarder sub-positions used to build the instrument matrices.
    pub offsets: Offsets,

    /// Evaluation budget of the optimizers, in multiples of `n + 1`.
    pub max_iterations: usize,

    /// W/A condition numbers above this are reported as warnings.
    pub condition_warning: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            calibration_dir: PathBuf::from("calibration"),
            data_dir: PathBuf::from("data"),
            dark_policy: DarkPolicy::default(),
            peak_metric: PeakMetric::default(),
            saturation: SaturationThresholds::default(),
            search: SearchWindow::default(),
            psa_table: None,
            offsets: Offsets::default(),
            max_iterations: 200,
            condition_warning: 2.0,
        }
    }
}

impl Config {
    /// Read a JSON configuration. Missing fields take their default.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let serialized = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        Ok(serde_json::from_str(&serialized)?)
    }

    pub fn solve_options(&self) -> SolveOptions {
        SolveOptions {
            patience: self.max_iterations,
            ..SolveOptions::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn partial_file_uses_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "calibration_dir": "/srv/cal", "dark_policy": "divide" }}"#).unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.calibration_dir, PathBuf::from("/srv/cal"));
        assert_eq!(config.dark_policy, DarkPolicy::Divide);
        assert_eq!(config.peak_metric, PeakMetric::FittedMax);
        assert_eq!(config.max_iterations, 200);
    }

    #[test]
    fn default_round_trips() {
        let config = Config::default();
        let serialized = serde_json::to_string_pretty(&config).unwrap();
        let parsed: Config = serde_json::from_str(&serialized).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = Config::from_file("/nonexistent/mmscope.json").unwrap_err();
        assert!(matches!(err, Error::Io { .. }));
    }

    #[test]
    fn solve_options_use_iteration_cap() {
        let config = Config {
            max_iterations: 7,
            ..Config::default()
        };
        assert_eq!(config.solve_options().patience, 7);
    }
}
