//! Plain-text tables exchanged with the acquisition side.
//!
//! All tables are whitespace separated with one record per line. Lines starting
//! with `#` are comments; writers put a `# generated_at=` header on top.

use crate::{
    error::{Error, Result},
    optics::Wavelength,
    peak::PsaCorrection,
    reconstruct::MuellerMatrix,
    scan::{AngleScan, ScanPoint},
};
use chrono::Utc;
use nalgebra::Matrix4;
use std::{
    fs::{self, File},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};
use tracing::warn;
use uom::si::angle::degree;

/// Fitted spot position of one frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PeakPosition {
    pub psg: f64,
    pub psa: f64,
    pub x0: f64,
    pub y0: f64,
}

fn parse_table(path: &Path, columns: Option<usize>) -> Result<Vec<Vec<f64>>> {
    let text = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
    let mut rows = Vec::new();
    for (i, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let row = line
            .split(|c: char| c.is_whitespace() || c == ',')
            .filter(|s| !s.is_empty())
            .map(str::parse::<f64>)
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| Error::Parse {
                path: path.to_path_buf(),
                line: i + 1,
                reason: e.to_string(),
            })?;
        if let Some(columns) = columns.filter(|c| *c != row.len()) {
            return Err(Error::Parse {
                path: path.to_path_buf(),
                line: i + 1,
                reason: format!("expected {columns} columns but got: {}", row.len()),
            });
        }
        rows.push(row);
    }
    Ok(rows)
}

fn write_table<I>(path: &Path, title: &str, rows: I) -> Result<()>
where
    I: IntoIterator<Item = Vec<f64>>,
{
    let file = File::create(path).map_err(|e| Error::io(path, e))?;
    let mut out = BufWriter::new(file);
    let mut text = String::new();
    text.push_str(&format!("# {title}\n"));
    text.push_str(&format!("# generated_at={}\n", Utc::now().to_rfc3339()));
    for row in rows {
        let cells: Vec<String> = row.iter().map(|v| format!("{v:?}")).collect();
        text.push_str(&cells.join(" "));
        text.push('\n');
    }
    out.write_all(text.as_bytes())
        .and_then(|()| out.flush())
        .map_err(|e| Error::io(path, e))
}

/// Write `[psg, psa, intensity]` rows, angles in degrees, in scan order.
pub fn write_intensities<P: AsRef<Path>>(path: P, scan: &AngleScan) -> Result<()> {
    write_table(
        path.as_ref(),
        "psg_deg psa_deg intensity",
        scan.points().iter().map(|p| {
            vec![p.psg.get::<degree>(), p.psa.get::<degree>(), p.intensity]
        }),
    )
}

pub fn read_intensities<P: AsRef<Path>>(path: P) -> Result<AngleScan> {
    Ok(parse_table(path.as_ref(), Some(3))?
        .into_iter()
        .map(|row| ScanPoint::from_degrees(row[0], row[1], row[2]))
        .collect())
}

/// Write `[psg, psa, x0, y0]` rows, angles in degrees.
pub fn write_peak_positions<P: AsRef<Path>>(path: P, peaks: &[PeakPosition]) -> Result<()> {
    write_table(
        path.as_ref(),
        "psg_deg psa_deg x0_px y0_px",
        peaks.iter().map(|p| vec![p.psg, p.psa, p.x0, p.y0]),
    )
}

pub fn read_peak_positions<P: AsRef<Path>>(path: P) -> Result<Vec<PeakPosition>> {
    Ok(parse_table(path.as_ref(), Some(4))?
        .into_iter()
        .map(|row| PeakPosition {
            psg: row[0],
            psa: row[1],
            x0: row[2],
            y0: row[3],
        })
        .collect())
}

/// Render a matrix as four lines of four numbers.
pub fn format_matrix(m: &Matrix4<f64>) -> String {
    m.row_iter()
        .map(|row| {
            let cells: Vec<String> = row.iter().map(|v| format!("{v:.6e}")).collect();
            cells.join(" ") + "\n"
        })
        .collect()
}

/// File name of a reconstructed matrix for `wavelength`.
pub fn mueller_file_name(wavelength: Wavelength) -> String {
    format!("Measured MM for {wavelength}nm calibration.txt")
}

/// Write `mueller` into `dir`, named after the calibration wavelength.
pub fn write_mueller<P: AsRef<Path>>(
    dir: P,
    wavelength: Wavelength,
    mueller: &MuellerMatrix,
) -> Result<PathBuf> {
    let path = dir.as_ref().join(mueller_file_name(wavelength));
    let file = File::create(&path).map_err(|e| Error::io(&path, e))?;
    let mut out = BufWriter::new(file);
    let header = format!(
        "# Mueller matrix, normalized to m00\n# wavelength_nm={wavelength}\n# generated_at={}\n",
        Utc::now().to_rfc3339()
    );
    out.write_all(header.as_bytes())
        .and_then(|()| out.write_all(format_matrix(mueller.matrix()).as_bytes()))
        .and_then(|()| out.flush())
        .map_err(|e| Error::io(&path, e))?;
    Ok(path)
}

pub fn read_matrix<P: AsRef<Path>>(path: P) -> Result<Matrix4<f64>> {
    let path = path.as_ref();
    let rows = parse_table(path, Some(4))?;
    if rows.len() != 4 {
        return Err(Error::Parse {
            path: path.to_path_buf(),
            line: 0,
            reason: format!("expected 4 rows but got: {}", rows.len()),
        });
    }
    Ok(Matrix4::from_row_iterator(rows.into_iter().flatten()))
}

/// Read the spot-drift table `[angle_offset, xc, yc, R]`.
///
/// A missing table is not an error: the correction falls back to zero with a
/// warning. A table that exists but cannot be parsed is an error.
pub fn read_psa_correction(path: Option<&Path>) -> Result<PsaCorrection> {
    let Some(path) = path else {
        return Ok(PsaCorrection::default());
    };
    if !path.exists() {
        warn!(
            path = %path.display(),
            "psa movement table not found, spot positions are not corrected"
        );
        return Ok(PsaCorrection::default());
    }

    let values: Vec<f64> = parse_table(path, None)?.into_iter().flatten().collect();
    match values.as_slice() {
        [angle_offset, xc, yc, r] => Ok(PsaCorrection {
            angle_offset: *angle_offset,
            xc: *xc,
            yc: *yc,
            r: *r,
        }),
        _ => Err(Error::Parse {
            path: path.to_path_buf(),
            line: 0,
            reason: format!("expected 4 values but got: {}", values.len()),
        }),
    }
}

/// Sum of all samples in a reference-detector file.
pub fn read_reference<P: AsRef<Path>>(path: P) -> Result<f64> {
    Ok(parse_table(path.as_ref(), None)?.into_iter().flatten().sum())
}
