use clap::Parser;
use snafu::{Report, ResultExt, Snafu, Whatever};
use std::path::{Path, PathBuf};
use tracing::{error, Level};

use nifti_preprocessing::channels::{
    default_channels, ChannelSpec, DEFAULT_CATEGORY_COLUMN, DEFAULT_ID_COLUMN,
};
use nifti_preprocessing::manifest::{Manifest, ManifestError};
use nifti_preprocessing::paths::{fill_paths, PathError};

#[derive(Debug, Snafu)]
enum Error {
    #[snafu(display("Invalid manifest path: {}", path.display()))]
    InvalidManifestPath { path: PathBuf },

    #[snafu(display("Failed to create directory: {}", path.display()))]
    CreateDir {
        path: PathBuf,
        #[snafu(source(from(std::io::Error, Box::new)))]
        source: Box<std::io::Error>,
    },

    #[snafu(display("{}", source))]
    Manifest {
        #[snafu(source(from(ManifestError, Box::new)))]
        source: Box<ManifestError>,
    },

    #[snafu(display("{}", source))]
    Path {
        #[snafu(source(from(PathError, Box::new)))]
        source: Box<PathError>,
    },
}

impl Error {
    fn exit_code(&self) -> i32 {
        match self {
            Error::Path { .. } => 2,
            Error::Manifest { source } => match source.as_ref() {
                ManifestError::MissingColumn { .. }
                | ManifestError::DuplicateIdentifier { .. } => 2,
                _ => 1,
            },
            Error::InvalidManifestPath { .. } | Error::CreateDir { .. } => 1,
        }
    }
}

#[derive(Parser, Debug)]
#[command(version = env!("CARGO_PKG_VERSION"), about = "Create image filepaths in a manifest from subject IDs", long_about = None)]
struct Args {
    #[arg(help = "CSV with subject IDs", long = "file", short = 'f')]
    file: PathBuf,

    #[arg(
        help = "Name of the identifier column",
        long = "id",
        short = 'i',
        default_value = DEFAULT_ID_COLUMN
    )]
    id: String,

    #[arg(
        help = "Name of the column with the subject type (HGG, LGG, VAL, TEST, ...)",
        long = "type",
        short = 't',
        default_value = DEFAULT_CATEGORY_COLUMN
    )]
    type_column: String,

    #[arg(help = "Directory to write the new CSV to", long = "directory", short = 'd')]
    directory: Option<PathBuf>,

    #[arg(help = "Name of the output CSV file", long = "name", short = 'n')]
    name: Option<String>,

    #[arg(
        help = "Overwrite the given CSV of IDs",
        long = "overwrite",
        short = 'o',
        default_value_t = false
    )]
    overwrite: bool,

    #[arg(
        help = "Insert a review-helper column before the first channel column",
        long = "viewer",
        default_value_t = false
    )]
    viewer: bool,

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

/// Resolve where the filled manifest is written: an explicit directory (with
/// the given or original filename), an explicit name next to the input, the
/// input itself when overwriting is allowed, or a `_with_paths` sibling.
fn resolve_output(args: &Args) -> Result<PathBuf, Error> {
    if let Some(directory) = &args.directory {
        if !directory.is_dir() {
            std::fs::create_dir_all(directory).with_context(|_| CreateDirSnafu {
                path: directory.clone(),
            })?;
        }
        let filename = match &args.name {
            Some(name) => name.clone(),
            None => args
                .file
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
        };
        return Ok(directory.join(filename));
    }
    if let Some(name) = &args.name {
        return Ok(args
            .file
            .parent()
            .unwrap_or(Path::new(""))
            .join(name));
    }
    if args.overwrite {
        return Ok(args.file.clone());
    }
    let stem = args
        .file
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let filename = match args.file.extension() {
        Some(ext) => format!("{}_with_paths.{}", stem, ext.to_string_lossy()),
        None => format!("{}_with_paths", stem),
    };
    Ok(args.file.with_file_name(filename))
}

/// Review-helper command for each subject, pointing at the subject's
/// directory under the dataset root.
fn viewer_values(
    manifest: &Manifest,
    id_column: &str,
    type_column: &str,
    data_dir: &Path,
) -> Result<Vec<String>, Error> {
    let id_idx = manifest.require_column(id_column).context(ManifestSnafu)?;
    let type_idx = manifest.column_index(type_column);
    Ok((0..manifest.num_rows())
        .map(|row| {
            let identifier = manifest.value(row, id_idx);
            let prefix = type_idx
                .map(|idx| format!("{}/", manifest.value(row, idx)))
                .unwrap_or_default();
            format!(
                "=REVIEWTRUTH(1,\"-C {} -f prediction.makefile {}{}/reviewtruth\")",
                data_dir.display(),
                prefix,
                identifier
            )
        })
        .collect())
}

fn run(args: Args) -> Result<PathBuf, Error> {
    if !args.file.is_file() {
        return InvalidManifestPathSnafu {
            path: args.file.clone(),
        }
        .fail();
    }

    tracing::info!("Reading file {}", args.file.display());
    let manifest = Manifest::from_csv_path(&args.file).context(ManifestSnafu)?;
    let channels = default_channels();
    tracing::info!(
        "Creating columns: {:?}",
        channels.iter().map(|c| c.column.as_str()).collect::<Vec<_>>()
    );

    let filled = fill_paths(manifest, &args.id, &args.type_column, &channels)
        .context(PathSnafu)?;

    let filled = if args.viewer {
        insert_viewer_column(filled, &args, &channels)?
    } else {
        filled
    };

    let output = resolve_output(&args)?;
    filled.to_csv_path(&output).context(ManifestSnafu)?;
    println!("CSV file written to {}", output.display());
    Ok(output)
}

fn insert_viewer_column(
    manifest: Manifest,
    args: &Args,
    channels: &[ChannelSpec],
) -> Result<Manifest, Error> {
    let data_dir = args.file.parent().unwrap_or(Path::new(""));
    let values = viewer_values(&manifest, &args.id, &args.type_column, data_dir)?;
    let index = match channels.first() {
        Some(first) => manifest
            .require_column(&first.column)
            .context(ManifestSnafu)?,
        None => manifest.columns().len(),
    };
    Ok(manifest.insert_column(index, "viewer", values))
}
