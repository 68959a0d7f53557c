use clap::Parser;
use mmscope::{
    analysis::{Analysis, Dataset, analyse_frames},
    config::Config,
    error::Result,
    io::{
        format_matrix, read_psa_correction, write_intensities, write_mueller,
        write_peak_positions,
    },
    peak::PeakFinder,
    reconstruct::Reconstructor,
    store::CalibrationStore,
};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Reduce a folder of `PSG{g}PSA{a}Wl{w}` frames to intensities, spot
/// positions and, for a full 4x4 grid, a Mueller matrix.
#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Args {
    /// Dataset folder, relative to the configured data directory.
    dataset: PathBuf,

    /// JSON configuration file. Defaults are used when absent.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Only check saturation; skip the centre-spot fit and everything after it.
    #[arg(long, default_value_t = false)]
    no_spot_fit: bool,

    /// Skip the Mueller matrix even when a calibration is available.
    #[arg(long, default_value_t = false)]
    no_reconstruction: bool,
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

    let dir = config.data_dir.join(&args.dataset);
    let dataset = Dataset::load(&dir)?;

    let analysis = Analysis {
        finder: PeakFinder {
            window: config.search,
            metric: config.peak_metric,
            correction: read_psa_correction(config.psa_table.as_deref())?,
            opts: config.solve_options(),
        },
        dark_policy: config.dark_policy,
        saturation: config.saturation,
        fit_spots: !args.no_spot_fit,
    };

    let store = CalibrationStore::with_path(config.calibration_dir.clone());
    let reconstructor = if args.no_reconstruction || args.no_spot_fit {
        None
    } else if store.contains(dataset.wavelength) {
        let record = store.load(dataset.wavelength)?;
        Some(Reconstructor::new(
            record,
            &config.offsets,
            config.condition_warning,
        ))
    } else {
        warn!(
            wavelength_nm = dataset.wavelength.nanometers(),
            "no calibration for this wavelength, skipping reconstruction"
        );
        None
    };

    let result = analyse_frames(
        dataset.frames,
        dataset.dark.as_ref(),
        &analysis,
        reconstructor.as_ref(),
    )?;

    if analysis.fit_spots {
        write_intensities(dir.join("Intensities.txt"), &result.intensities)?;
        write_peak_positions(dir.join("Peak_positions.txt"), &result.peaks)?;
        info!(dir = %dir.display(), "wrote intensities and peak positions");
    }

    if result.is_saturated() {
        println!("WARNING: the camera saturated, reduce the exposure time and measure again");
    }

    if let Some(reconstruction) = &result.reconstruction {
        for warning in &reconstruction.warnings {
            println!("WARNING: {warning}");
        }
        let path = write_mueller(&dir, dataset.wavelength, &reconstruction.mueller)?;
        println!("Mueller matrix written to {}", path.display());
        print!("{}", format_matrix(reconstruction.mueller.matrix()));
    }

    Ok(())
}
