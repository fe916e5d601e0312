use clap::Parser;
use snafu::{Report, ResultExt, Snafu, Whatever};
use std::path::{Path, PathBuf};
use tracing::{error, Level};

use nifti_preprocessing::channels::DEFAULT_ID_COLUMN;
use nifti_preprocessing::file::default_bar;
use nifti_preprocessing::manifest::{Manifest, ManifestError};
use nifti_preprocessing::normalize::{
    Normalizer, NormalizeError, SubjectArtifacts, DEFAULT_ATROPOS, DEFAULT_C3D,
};

#[derive(Debug, Snafu)]
enum Error {
    #[snafu(display("Invalid manifest path: {}", path.display()))]
    InvalidManifestPath { path: PathBuf },

    #[snafu(display("{}", source))]
    Manifest {
        #[snafu(source(from(ManifestError, Box::new)))]
        source: Box<ManifestError>,
    },

    #[snafu(display("{}", source))]
    Normalize {
        #[snafu(source(from(NormalizeError, Box::new)))]
        source: Box<NormalizeError>,
    },
}

impl Error {
    fn exit_code(&self) -> i32 {
        match self {
            Error::Manifest { source } => match source.as_ref() {
                ManifestError::MissingColumn { .. } => 2,
                _ => 1,
            },
            Error::Normalize { source } => match source.as_ref() {
                NormalizeError::Manifest { .. } => 2,
                _ => 1,
            },
            Error::InvalidManifestPath { .. } => 1,
        }
    }
}

#[derive(Parser, Debug)]
#[command(version = env!("CARGO_PKG_VERSION"), about = "Create brain, tumor, and non-tumor masks from a filepath manifest", long_about = None)]
struct Args {
    #[arg(help = "CSV manifest with per-subject file paths", long = "file", short = 'f')]
    file: PathBuf,

    #[arg(
        help = "Name of the identifier column",
        long = "id",
        short = 'i',
        default_value = DEFAULT_ID_COLUMN
    )]
    id: String,

    #[arg(
        help = "Also run automatic gray/white/CSF tissue segmentation",
        long = "atropos",
        short = 'a',
        default_value_t = false
    )]
    atropos: bool,

    #[arg(
        help = "Abort on the first failing subject instead of logging and continuing",
        long = "strict",
        default_value_t = false
    )]
    strict: bool,

    #[arg(
        help = "Program to invoke for mask arithmetic",
        long = "c3d",
        default_value = DEFAULT_C3D
    )]
    c3d: String,

    #[arg(
        help = "Program to invoke for tissue segmentation",
        long = "atropos-bin",
        default_value = DEFAULT_ATROPOS
    )]
    atropos_bin: String,

    #[arg(
        help = "Enable verbose logging",
        long = "verbose",
        short = 'v',
        default_value_t = false
    )]
    verbose: bool,
}

fn main() {
    let args = Args::parse();

    let level = if args.verbose {
        Level::DEBUG
    } else {
        Level::ERROR
    };
    tracing::subscriber::set_global_default(
        tracing_subscriber::FmtSubscriber::builder()
            .with_max_level(level)
            .finish(),
    )
    .whatever_context("Could not set up global logging subscriber")
    .unwrap_or_else(|e: Whatever| {
        eprintln!("[ERROR] {}", Report::from_error(e));
    });

    run(args).unwrap_or_else(|e| {
        let code = e.exit_code();
        error!("{}", Report::from_error(e));
        std::process::exit(code);
    });
}

fn run(args: Args) -> Result<usize, Error> {
    if !args.file.is_file() {
        return InvalidManifestPathSnafu {
            path: args.file.clone(),
        }
        .fail();
    }
    let manifest = Manifest::from_csv_path(&args.file).context(ManifestSnafu)?;
    tracing::info!(
        "Loaded {} subjects from {}",
        manifest.num_rows(),
        args.file.display()
    );

    let data_root = args
        .file
        .parent()
        .unwrap_or(Path::new(""))
        .to_path_buf();
    let normalizer = Normalizer {
        data_root,
        c3d: args.c3d.clone(),
        atropos: args.atropos_bin.clone(),
        run_atropos: args.atropos,
    };
    normalizer.check_columns(&manifest).context(NormalizeSnafu)?;
    let id_idx = manifest.require_column(&args.id).context(ManifestSnafu)?;

    let pb = default_bar(manifest.num_rows() as u64);
    pb.set_message("Normalizing subjects");

    let mut processed = 0;
    for row in 0..manifest.num_rows() {
        let identifier = manifest.value(row, id_idx);
        let subject = SubjectArtifacts::from_row(&manifest, row).context(NormalizeSnafu)?;
        match normalizer.process(&subject) {
            Ok(()) => processed += 1,
            Err(e) if args.strict => return Err(e).context(NormalizeSnafu),
            Err(e) => {
                error!(
                    "Error normalizing {}: {}",
                    identifier,
                    Report::from_error(&e)
                );
            }
        }
        pb.inc(1);
    }
    pb.finish_and_clear();

    println!(
        "Normalized {} of {} subjects",
        processed,
        manifest.num_rows()
    );
    Ok(processed)
}
