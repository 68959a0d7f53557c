//! Reduction of a measured dataset to intensities, spot positions and,
//! for a complete 4x4 grid, a Mueller matrix.

use crate::{
    error::{Error, Result},
    frame::{DarkPolicy, Frame, SaturationLevel, SaturationThresholds},
    io::{PeakPosition, read_reference},
    optics::Wavelength,
    peak::PeakFinder,
    reconstruct::{GRID_POINTS, Reconstruction, Reconstructor},
    scan::{AngleScan, ScanPoint},
};
use std::{
    fs,
    path::{Path, PathBuf},
};
use tracing::{debug, info, warn};
use uom::si::{angle::degree, f64::Angle};

/// One acquired frame and the angles it was taken at.
#[derive(Clone, Debug)]
pub struct LabelledFrame {
    pub psg: Angle,
    pub psa: Angle,
    pub frame: Frame,
    /// Sum of the reference-detector samples. 1 when none were recorded.
    pub reference: f64,
}

impl LabelledFrame {
    pub fn new(psg: Angle, psa: Angle, frame: Frame) -> Self {
        Self {
            psg,
            psa,
            frame,
            reference: 1.0,
        }
    }

    pub fn with_reference(self, reference: f64) -> Self {
        Self { reference, ..self }
    }
}

/// Stem of the dark frame in a dataset folder.
pub const DARK_FRAME_STEM: &str = "Dark measurement";

const FRAME_EXTENSIONS: [&str; 4] = ["png", "tif", "tiff", "pgm"];

/// Angles and wavelength encoded in a frame name such as `PSG-15.1PSA51.7Wl633`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FrameLabel {
    pub psg_deg: f64,
    pub psa_deg: f64,
    pub wavelength_nm: f64,
}

impl FrameLabel {
    pub fn parse(stem: &str) -> Option<Self> {
        let rest = stem.strip_prefix("PSG")?;
        let (psg, rest) = rest.split_once("PSA")?;
        let (psa, wavelength) = rest.split_once("Wl")?;
        Some(Self {
            psg_deg: psg.parse().ok()?,
            psa_deg: psa.parse().ok()?,
            wavelength_nm: wavelength.parse().ok()?,
        })
    }
}

/// Frames of one dataset folder, sorted by `(psg, psa)`.
#[derive(Clone, Debug)]
pub struct Dataset {
    pub wavelength: Wavelength,
    pub frames: Vec<LabelledFrame>,
    pub dark: Option<Frame>,
}

impl Dataset {
    /// Load every labelled frame of `dir`.
    ///
    /// A `.txt` file with the same stem as a frame holds its reference
    /// samples. All frames must share one wavelength.
    pub fn load<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref();
        let mut dark = None;
        let mut labelled: Vec<(FrameLabel, PathBuf)> = Vec::new();

        let entries = fs::read_dir(dir).map_err(|e| Error::io(dir, e))?;
        for entry in entries {
            let path = entry.map_err(|e| Error::io(dir, e))?.path();
            let is_frame = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| FRAME_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()));
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()).filter(|_| is_frame)
            else {
                continue;
            };

            if stem == DARK_FRAME_STEM {
                dark = Some(Frame::open(&path)?);
            } else if let Some(label) = FrameLabel::parse(stem) {
                labelled.push((label, path));
            } else {
                debug!(path = %path.display(), "skipping unlabelled image");
            }
        }

        let Some(first) = labelled.first().map(|(label, _)| label.wavelength_nm) else {
            return Err(Error::InvalidInput(format!(
                "no labelled frames in {}",
                dir.display()
            )));
        };
        if let Some((label, path)) = labelled.iter().find(|(l, _)| l.wavelength_nm != first) {
            return Err(Error::InvalidInput(format!(
                "{} was taken at {} nm but the dataset at {first} nm",
                path.display(),
                label.wavelength_nm
            )));
        }
        labelled.sort_by(|(a, _), (b, _)| {
            a.psg_deg
                .total_cmp(&b.psg_deg)
                .then(a.psa_deg.total_cmp(&b.psa_deg))
        });

        let mut frames = Vec::with_capacity(labelled.len());
        for (label, path) in labelled {
            let frame = LabelledFrame::new(
                Angle::new::<degree>(label.psg_deg),
                Angle::new::<degree>(label.psa_deg),
                Frame::open(&path)?,
            );
            let reference = path.with_extension("txt");
            frames.push(if reference.exists() {
                frame.with_reference(read_reference(&reference)?)
            } else {
                frame
            });
        }

        info!(
            dir = %dir.display(),
            frames = frames.len(),
            dark = dark.is_some(),
            "loaded dataset"
        );
        Ok(Self {
            wavelength: Wavelength::from_nanometers(first)?,
            frames,
            dark,
        })
    }
}

/// Saturation found in one frame.
#[derive(Clone, Debug, PartialEq)]
pub struct SaturationFinding {
    /// Index of the frame in the analysed dataset.
    pub index: usize,
    pub level: SaturationLevel,
}

/// Per-dataset analysis settings.
#[derive(Clone, Debug)]
pub struct Analysis {
    pub finder: PeakFinder,
    pub dark_policy: DarkPolicy,
    pub saturation: SaturationThresholds,
    /// Fit the centre spot of every frame. Without it only the saturation
    /// check runs, e.g. for real-space images that have no focused spot.
    pub fit_spots: bool,
}

impl Default for Analysis {
    fn default() -> Self {
        Self {
            finder: PeakFinder::default(),
            dark_policy: DarkPolicy::default(),
            saturation: SaturationThresholds::default(),
            fit_spots: true,
        }
    }
}

/// Everything extracted from a dataset.
#[derive(Clone, Debug, Default)]
pub struct DatasetResult {
    pub intensities: AngleScan,
    pub peaks: Vec<PeakPosition>,
    pub saturation: Vec<SaturationFinding>,
    pub reconstruction: Option<Reconstruction>,
}

impl DatasetResult {
    pub fn is_saturated(&self) -> bool {
        self.saturation
            .iter()
            .any(|f| matches!(f.level, SaturationLevel::Hard { .. }))
    }
}

/// Analyse `frames` in order.
///
/// The dark frame is applied to every frame before the saturation check and
/// the peak fit. Once a frame saturates, later frames are no longer checked.
/// With spot fitting enabled, exactly 16 frames and a `reconstructor`, the
/// Mueller matrix is recovered as well.
pub fn analyse_frames(
    frames: Vec<LabelledFrame>,
    dark: Option<&Frame>,
    analysis: &Analysis,
    reconstructor: Option<&Reconstructor>,
) -> Result<DatasetResult> {
    let mut result = DatasetResult::default();
    let mut saturated = false;

    for (index, labelled) in frames.into_iter().enumerate() {
        let frame = match dark {
            Some(dark) => labelled.frame.dark_corrected(dark, analysis.dark_policy)?,
            None => labelled.frame,
        };

        if !saturated {
            match frame.saturation(&analysis.saturation) {
                SaturationLevel::None => {}
                level @ SaturationLevel::Hard { max } => {
                    warn!(
                        index,
                        psg = labelled.psg.get::<degree>(),
                        psa = labelled.psa.get::<degree>(),
                        max,
                        "frame is saturated, reduce the exposure"
                    );
                    saturated = true;
                    result.saturation.push(SaturationFinding { index, level });
                }
                SaturationLevel::Near { top } => {
                    warn!(index, ?top, "frame is close to saturation");
                    result.saturation.push(SaturationFinding {
                        index,
                        level: SaturationLevel::Near { top },
                    });
                }
            }
        }

        if !analysis.fit_spots {
            continue;
        }

        let peak = analysis
            .finder
            .locate(&frame, labelled.psa, labelled.reference)?;
        result
            .intensities
            .push(ScanPoint::new(labelled.psg, labelled.psa, peak.intensity));
        result.peaks.push(PeakPosition {
            psg: labelled.psg.get::<degree>(),
            psa: labelled.psa.get::<degree>(),
            x0: peak.fit.x0,
            y0: peak.fit.y0,
        });
    }

    info!(frames = result.intensities.len(), "analysed dataset");

    if let Some(reconstructor) = reconstructor.filter(|_| analysis.fit_spots) {
        if result.intensities.len() == GRID_POINTS {
            result.reconstruction = Some(reconstructor.reconstruct(&result.intensities)?);
        } else {
            info!(
                frames = result.intensities.len(),
                "not a {GRID_POINTS}-frame grid, skipping reconstruction"
            );
        }
    }

    Ok(result)
}
