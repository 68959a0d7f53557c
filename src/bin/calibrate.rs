use clap::{Parser, ValueEnum};
use mmscope::{
    calibration::{ModelVariant, calibrate, validate},
    config::Config,
    error::Result,
    io::read_intensities,
    optics::Wavelength,
    store::CalibrationStore,
};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Clone, Copy, ValueEnum)]
enum Variant {
    Simple,
    Full,
}

impl From<Variant> for ModelVariant {
    fn from(variant: Variant) -> Self {
        match variant {
            Variant::Simple => ModelVariant::Simple,
            Variant::Full => ModelVariant::Full,
        }
    }
}

/// Fit the instrument geometry to a calibration scan and store the result.
#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Args {
    /// Intensity table `[psg_deg, psa_deg, intensity]` of the calibration scan.
    #[arg(long)]
    scan: PathBuf,

    /// Wavelength of the scan, in nanometers.
    #[arg(short, long)]
    wavelength: f64,

    #[arg(long, value_enum, default_value_t = Variant::Simple)]
    variant: Variant,

    /// JSON configuration file. Defaults are used when absent.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Scans at other wavelengths to check the transferred calibration against,
    /// given as `NM=PATH`.
    #[arg(long, value_parser = parse_validation)]
    validate: Vec<(f64, PathBuf)>,
}

fn parse_validation(arg: &str) -> std::result::Result<(f64, PathBuf), String> {
    let (nm, path) = arg
        .split_once('=')
        .ok_or_else(|| format!("expected NM=PATH but got: {arg}"))?;
    let nm = nm.parse::<f64>().map_err(|e| e.to_string())?;
    Ok((nm, PathBuf::from(path)))
}

fn main() -> Result<()> {
    let subscriber = tracing_subscriber::FmtSubscriber::builder()
        .with_env_filter(EnvFilter::from_default_env())
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };

    let wavelength = Wavelength::from_nanometers(args.wavelength)?;
    let scan = read_intensities(&args.scan)?;
    info!(points = scan.len(), path = %args.scan.display(), "read calibration scan");

    let calibration = calibrate(&scan, wavelength, args.variant.into(), &config.solve_options())?;
    let store = CalibrationStore::with_path(config.calibration_dir.clone());
    let path = store.save(&calibration.record)?;

    let report = &calibration.report;
    println!("calibration written to {}", path.display());
    println!(
        "evaluations: {}, rms residual: {:.3e}, cond(W): {:.4}, cond(A): {:.4}",
        report.evaluations, report.rms, report.condition_w, report.condition_a
    );

    for (nm, path) in &args.validate {
        let other = read_intensities(path)?;
        let validation = validate(&calibration.record, &other, Wavelength::from_nanometers(*nm)?)?;
        println!(
            "{nm} nm: rms residual {:.3e}, max residual {:.3e}",
            validation.rms, validation.max_abs
        );
    }

    Ok(())
}
