use approx::assert_relative_eq;
use mmscope::{
    calibration::CalibrationRecord,
    io::{format_matrix, read_intensities, read_matrix, write_intensities, write_mueller},
    prelude::*,
    reconstruct::reconstruct,
};
use nalgebra::Matrix4;

const POSITIONS: [f64; 4] = [-51.7, -15.1, 15.1, 51.7];

/// Mueller matrix of an ideal horizontal linear polarizer.
fn polarizer() -> Matrix4<f64> {
    Matrix4::new(
        0.5, 0.5, 0.0, 0.0, //
        0.5, 0.5, 0.0, 0.0, //
        0.0, 0.0, 0.0, 0.0, //
        0.0, 0.0, 0.0, 0.0,
    )
}

/// Intensities `A · M · W` measured on the 4x4 grid, shuffled.
fn measure(instrument: &Instrument, sample: &Matrix4<f64>) -> AngleScan {
    let b = instrument.a.matrix() * sample * instrument.w.matrix();
    let mut points = Vec::new();
    for (j, psa) in POSITIONS.iter().enumerate().rev() {
        for (i, psg) in POSITIONS.iter().enumerate() {
            points.push(ScanPoint::from_degrees(*psg, *psa, b[(i, j)]));
        }
    }
    AngleScan::new(points)
}

fn record() -> CalibrationRecord {
    CalibrationRecord::new(
        Wavelength::from_nanometers(633.0).unwrap(),
        ModelVariant::Simple,
        GeometricParams {
            alpha: 0.05,
            theta_a0: 0.021,
            theta_w0: 0.018,
            ..GeometricParams::ideal()
        },
    )
}

#[test]
fn recovers_air_and_polarizer() {
    let reconstructor = Reconstructor::new(record(), &Offsets::nominal(), 2.0);
    let instrument = reconstructor.instrument();

    let air = reconstructor
        .reconstruct(&measure(instrument, &Matrix4::identity()))
        .unwrap();
    assert_relative_eq!(*air.mueller.matrix(), Matrix4::identity(), epsilon = 1e-9);
    assert!(air.warnings.is_empty());

    let polarizer_scan = measure(instrument, &(polarizer() * 0.37));
    let m = reconstruct(instrument, &polarizer_scan).unwrap();
    assert_relative_eq!(*m.matrix(), polarizer() * 2.0, epsilon = 1e-9);
}

#[test]
fn survives_a_round_trip_through_text_files() {
    let dir = tempfile::tempdir().unwrap();
    let reconstructor = Reconstructor::new(record(), &Offsets::nominal(), 2.0);
    let scan = measure(reconstructor.instrument(), &polarizer());

    let path = dir.path().join("Intensities.txt");
    write_intensities(&path, &scan).unwrap();
    let reconstruction = reconstructor.reconstruct(&read_intensities(&path).unwrap()).unwrap();

    let written = write_mueller(
        dir.path(),
        Wavelength::from_nanometers(reconstruction.wavelength_nm).unwrap(),
        &reconstruction.mueller,
    )
    .unwrap();
    let read = read_matrix(&written).unwrap();
    assert_relative_eq!(read, polarizer() * 2.0, epsilon = 1e-6);
}

#[test]
fn ill_conditioned_instrument_is_reported() {
    let mut record = record();
    record.params.delta_ra = 1.2;
    let reconstructor = Reconstructor::new(record, &Offsets::nominal(), 2.0);
    let reconstruction = reconstructor
        .reconstruct(&measure(reconstructor.instrument(), &Matrix4::identity()))
        .unwrap();

    assert_eq!(reconstruction.warnings.len(), 1);
    assert_eq!(reconstruction.warnings[0].which, 'A');
    assert_relative_eq!(
        *reconstruction.mueller.matrix(),
        Matrix4::identity(),
        epsilon = 1e-8
    );
}

#[test]
fn formatted_matrix() {
    let m = MuellerMatrix::normalized(polarizer()).unwrap();
    insta::assert_snapshot!("polarizer_matrix", format_matrix(m.matrix()));
}
