//! Raw camera frames, dark correction and saturation checks.

use crate::error::{Error, Result};
use image::DynamicImage;
use nalgebra::DMatrix;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// How a dark frame is removed from a measurement.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DarkPolicy {
    /// Remove an additive dark current.
    #[default]
    Subtract,
    /// Divide by the dark frame, pixel by pixel. Pixels with a non-positive
    /// dark value are left unchanged.
    Divide,
    /// Ignore the dark frame.
    None,
}

/// A rectangular region `rows x cols`, half-open on both axes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Roi {
    pub rows: (usize, usize),
    pub cols: (usize, usize),
}

/// Detector counts above which a frame is reported as saturating.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SaturationThresholds {
    /// Above this the frame is approaching the detector ceiling.
    pub near: f64,
    /// Above this the frame is saturated.
    pub hard: f64,
    /// Region to inspect. The whole frame when absent.
    pub roi: Option<Roi>,
}

impl Default for SaturationThresholds {
    fn default() -> Self {
        Self {
            near: 4000.0,
            hard: 4090.0,
            roi: None,
        }
    }
}

/// Outcome of a saturation check.
#[derive(Clone, Debug, PartialEq)]
pub enum SaturationLevel {
    None,
    /// The largest values in the region, descending, at most five.
    Near { top: Vec<f64> },
    Hard { max: f64 },
}

/// A single-channel frame, indexed `(row, col)`.
#[derive(Clone, Debug, PartialEq)]
pub struct Frame {
    pixels: DMatrix<f64>,
}

impl Frame {
    pub fn new(pixels: DMatrix<f64>) -> Self {
        Self { pixels }
    }

    /// Create a frame from row-major pixel values.
    pub fn from_rows(width: usize, height: usize, values: Vec<f64>) -> Result<Self> {
        if values.len() != width * height {
            return Err(Error::ShapeMismatch {
                expected: (height, width),
                actual: (values.len() / width.max(1), width),
            });
        }
        Ok(Self::new(DMatrix::from_row_slice(height, width, &values)))
    }

    /// Load a grayscale frame, keeping raw detector counts.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let image = image::ImageReader::open(path.as_ref())
            .map_err(|e| Error::io(path.as_ref(), e))?
            .decode()?;
        Ok(Self::from_image(image))
    }

    pub fn from_image(image: DynamicImage) -> Self {
        let (width, height) = (image.width() as usize, image.height() as usize);
        let values: Vec<f64> = match image {
            DynamicImage::ImageLuma8(buffer) => buffer.into_raw().into_iter().map(f64::from).collect(),
            DynamicImage::ImageLuma16(buffer) => {
                buffer.into_raw().into_iter().map(f64::from).collect()
            }
            other => other.into_luma16().into_raw().into_iter().map(f64::from).collect(),
        };
        Self::new(DMatrix::from_row_slice(height, width, &values))
    }

    pub fn width(&self) -> usize {
        self.pixels.ncols()
    }

    pub fn height(&self) -> usize {
        self.pixels.nrows()
    }

    pub fn pixels(&self) -> &DMatrix<f64> {
        &self.pixels
    }

    pub fn max(&self) -> f64 {
        self.pixels.iter().copied().fold(f64::NEG_INFINITY, f64::max)
    }

    /// Apply `dark` to this frame according to `policy`.
    pub fn dark_corrected(mut self, dark: &Frame, policy: DarkPolicy) -> Result<Self> {
        if policy == DarkPolicy::None {
            return Ok(self);
        }
        if self.pixels.shape() != dark.pixels.shape() {
            return Err(Error::ShapeMismatch {
                expected: self.pixels.shape(),
                actual: dark.pixels.shape(),
            });
        }

        self.pixels
            .as_mut_slice()
            .par_iter_mut()
            .zip(dark.pixels.as_slice().par_iter())
            .for_each(|(value, dark)| match policy {
                DarkPolicy::Subtract => *value -= dark,
                DarkPolicy::Divide if *dark > 0.0 => *value /= dark,
                _ => {}
            });
        Ok(self)
    }

    /// Copy of the rectangle `rows x cols`, clipped to the frame.
    ///
    /// Returns the crop and the `(row, col)` of its top-left pixel.
    pub fn crop(&self, rows: (usize, usize), cols: (usize, usize)) -> Option<(Frame, (usize, usize))> {
        let r0 = rows.0.min(self.height());
        let r1 = rows.1.min(self.height());
        let c0 = cols.0.min(self.width());
        let c1 = cols.1.min(self.width());
        if r0 >= r1 || c0 >= c1 {
            return None;
        }
        let view = self.pixels.view((r0, c0), (r1 - r0, c1 - c0));
        Some((Frame::new(view.into_owned()), (r0, c0)))
    }

    /// Compare the inspected region against `thresholds`.
    pub fn saturation(&self, thresholds: &SaturationThresholds) -> SaturationLevel {
        let region = match thresholds.roi {
            Some(roi) => match self.crop(roi.rows, roi.cols) {
                Some((region, _)) => region,
                None => return SaturationLevel::None,
            },
            None => self.clone(),
        };

        let max = region.max();
        if max > thresholds.hard {
            return SaturationLevel::Hard { max };
        }
        if max > thresholds.near {
            let mut values: Vec<f64> = region.pixels.iter().copied().collect();
            values.sort_by(|a, b| b.total_cmp(a));
            values.truncate(5);
            return SaturationLevel::Near { top: values };
        }
        SaturationLevel::None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn frame_with_peak(peak: f64) -> Frame {
        let mut values = vec![100.0; 64 * 48];
        values[20 * 64 + 30] = peak;
        Frame::from_rows(64, 48, values).unwrap()
    }

    #[rstest]
    #[case(4095.0, "hard")]
    #[case(4050.0, "near")]
    #[case(3000.0, "none")]
    fn saturation_thresholds(#[case] peak: f64, #[case] expected: &str) {
        let level = frame_with_peak(peak).saturation(&SaturationThresholds::default());
        let actual = match level {
            SaturationLevel::Hard { .. } => "hard",
            SaturationLevel::Near { .. } => "near",
            SaturationLevel::None => "none",
        };
        assert_eq!(actual, expected);
    }

    #[test]
    fn saturation_is_checked_after_dark_correction() {
        let dark = Frame::from_rows(64, 48, vec![60.0; 64 * 48]).unwrap();
        let frame = frame_with_peak(4110.0)
            .dark_corrected(&dark, DarkPolicy::Subtract)
            .unwrap();
        assert_eq!(frame.max(), 4050.0);
        assert!(matches!(
            frame.saturation(&SaturationThresholds::default()),
            SaturationLevel::Near { .. }
        ));
    }

    #[test]
    fn near_saturation_reports_top_values() {
        let mut values = vec![0.0; 100];
        for (i, v) in [4010.0, 3990.0, 4001.0, 12.0, 3000.0, 2999.0, 7.0].iter().enumerate() {
            values[i * 3] = *v;
        }
        let frame = Frame::from_rows(10, 10, values).unwrap();
        let SaturationLevel::Near { top } = frame.saturation(&SaturationThresholds::default()) else {
            panic!("expected near saturation");
        };
        assert_eq!(top, vec![4010.0, 4001.0, 3990.0, 3000.0, 2999.0]);
    }

    #[test]
    fn roi_limits_the_check() {
        let thresholds = SaturationThresholds {
            roi: Some(Roi {
                rows: (0, 10),
                cols: (0, 10),
            }),
            ..SaturationThresholds::default()
        };
        assert_eq!(frame_with_peak(4095.0).saturation(&thresholds), SaturationLevel::None);
    }

    #[rstest]
    #[case(DarkPolicy::Subtract, 90.0)]
    #[case(DarkPolicy::Divide, 10.0)]
    #[case(DarkPolicy::None, 100.0)]
    fn dark_policies(#[case] policy: DarkPolicy, #[case] expected: f64) {
        let frame = Frame::from_rows(2, 2, vec![100.0; 4]).unwrap();
        let dark = Frame::from_rows(2, 2, vec![10.0; 4]).unwrap();
        let corrected = frame.dark_corrected(&dark, policy).unwrap();
        assert!(corrected.pixels().iter().all(|v| *v == expected));
    }

    #[test]
    fn dark_frame_shape_must_match() {
        let frame = Frame::from_rows(2, 2, vec![1.0; 4]).unwrap();
        let dark = Frame::from_rows(3, 2, vec![1.0; 6]).unwrap();
        let err = frame.dark_corrected(&dark, DarkPolicy::Subtract).unwrap_err();
        assert!(err.is_precondition());
    }

    #[test]
    fn from_rows_is_row_major() {
        let frame = Frame::from_rows(3, 2, vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0]).unwrap();
        assert_eq!(frame.pixels()[(1, 0)], 3.0);
        assert_eq!((frame.width(), frame.height()), (3, 2));
        assert!(Frame::from_rows(3, 2, vec![0.0; 5]).is_err());
    }

    #[test]
    fn crop_is_clipped() {
        let frame = Frame::from_rows(4, 4, (0..16).map(f64::from).collect()).unwrap();
        let (crop, origin) = frame.crop((2, 10), (1, 3)).unwrap();
        assert_eq!(origin, (2, 1));
        assert_eq!((crop.height(), crop.width()), (2, 2));
        assert_eq!(crop.pixels()[(0, 0)], 9.0);
        assert!(frame.crop((5, 6), (0, 1)).is_none());
    }

    #[test]
    fn sixteen_bit_images_keep_counts() {
        let buffer = image::ImageBuffer::<image::Luma<u16>, _>::from_raw(2, 1, vec![4095u16, 12]).unwrap();
        let frame = Frame::from_image(DynamicImage::ImageLuma16(buffer));
        assert_eq!(frame.pixels()[(0, 0)], 4095.0);
        assert_eq!(frame.pixels()[(0, 1)], 12.0);
    }
}
