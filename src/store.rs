//! On-disk calibration records, one JSON file per wavelength.

use crate::{
    calibration::CalibrationRecord,
    error::{Error, Result},
    optics::Wavelength,
};
use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
};
use tracing::{debug, info};

const PREFIX: &str = "calibration_values_";
const SUFFIX: &str = "nm.json";

/// Directory of calibration records keyed by wavelength.
#[derive(Debug, Clone)]
pub struct CalibrationStore {
    root_path: PathBuf,
}

impl CalibrationStore {
    pub fn with_path(root_path: PathBuf) -> Self {
        Self { root_path }
    }

    pub fn root_path(&self) -> &Path {
        &self.root_path
    }

    /// Path of the record for `wavelength`, e.g. `calibration_values_633nm.json`.
    pub fn path_for(&self, wavelength: Wavelength) -> PathBuf {
        self.root_path.join(format!("{PREFIX}{wavelength}{SUFFIX}"))
    }

    pub fn contains(&self, wavelength: Wavelength) -> bool {
        self.path_for(wavelength).exists()
    }

    /// Write `record`, replacing any previous record at its wavelength.
    ///
    /// The record is written to a sibling temporary file and renamed into place,
    /// so readers never see a partial record.
    pub fn save(&self, record: &CalibrationRecord) -> Result<PathBuf> {
        let wavelength = record.wavelength()?;
        fs::create_dir_all(&self.root_path).map_err(|e| Error::io(&self.root_path, e))?;

        let path = self.path_for(wavelength);
        let tmp = path.with_extension("json.tmp");
        let serialized = serde_json::to_string_pretty(record)?;

        let mut file = fs::File::create(&tmp).map_err(|e| Error::io(&tmp, e))?;
        file.write_all(serialized.as_bytes())
            .and_then(|()| file.sync_all())
            .map_err(|e| Error::io(&tmp, e))?;
        fs::rename(&tmp, &path).map_err(|e| Error::io(&path, e))?;

        info!(path = %path.display(), "saved calibration");
        Ok(path)
    }

    pub fn load(&self, wavelength: Wavelength) -> Result<CalibrationRecord> {
        let path = self.path_for(wavelength);
        let serialized = fs::read_to_string(&path).map_err(|e| Error::io(&path, e))?;
        let record: CalibrationRecord = serde_json::from_str(&serialized)?;
        if record.wavelength_nm != wavelength.nanometers() {
            return Err(Error::InvalidInput(format!(
                "{} holds a calibration for {} nm",
                path.display(),
                record.wavelength_nm
            )));
        }

        debug!(path = %path.display(), "loaded calibration");
        Ok(record)
    }

    /// Wavelengths with a stored record, in ascending order.
    pub fn list(&self) -> Result<Vec<Wavelength>> {
        if !self.root_path.exists() {
            return Ok(Vec::new());
        }

        let mut wavelengths = Vec::new();
        let entries = fs::read_dir(&self.root_path).map_err(|e| Error::io(&self.root_path, e))?;
        for entry in entries {
            let entry = entry.map_err(|e| Error::io(&self.root_path, e))?;
            let name = entry.file_name();
            let Some(nm) = name
                .to_str()
                .and_then(|n| n.strip_prefix(PREFIX))
                .and_then(|n| n.strip_suffix(SUFFIX))
                .and_then(|n| n.parse::<f64>().ok())
            else {
                continue;
            };
            if let Ok(wavelength) = Wavelength::from_nanometers(nm) {
                wavelengths.push(wavelength);
            }
        }

        wavelengths.sort_by(|a, b| a.nanometers().total_cmp(&b.nanometers()));
        Ok(wavelengths)
    }
}
