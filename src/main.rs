use clap::Parser;
use itertools::Itertools;
use rand::rngs::StdRng;
use rand::SeedableRng;
use snafu::{Report, ResultExt, Snafu, Whatever};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{error, Level};

use nifti_preprocessing::channels::{
    DEFAULT_CATEGORY_COLUMN, DEFAULT_ID_COLUMN, DEFAULT_PARTITION_CHANNELS,
};
use nifti_preprocessing::file::default_bar;
use nifti_preprocessing::manifest::{Manifest, ManifestError};
use nifti_preprocessing::partition::{
    CategoryMode, Partition, PartitionError, PartitionPolicy, SplitRatios,
};
use nifti_preprocessing::paths::{validate_identifier, PathError};
use nifti_preprocessing::writer::{PartitionSinks, WriteError};

#[derive(Debug, Snafu)]
enum Error {
    #[snafu(display("Invalid manifest path: {}", path.display()))]
    InvalidManifestPath { path: PathBuf },

    #[snafu(display("Failed to create output directory {}: {:?}", path.display(), source))]
    CreateOutputDir {
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
    Partition {
        #[snafu(source(from(PartitionError, Box::new)))]
        source: Box<PartitionError>,
    },

    #[snafu(display("{}", source))]
    Identifier {
        #[snafu(source(from(PathError, Box::new)))]
        source: Box<PathError>,
    },

    #[snafu(display("{}", source))]
    Write {
        #[snafu(source(from(WriteError, Box::new)))]
        source: Box<WriteError>,
    },
}

impl Error {
    /// Exit code contract: 2 for configuration-validation failures, 1 for
    /// I/O failures.
    fn exit_code(&self) -> i32 {
        match self {
            Error::Partition { .. } | Error::Identifier { .. } => 2,
            Error::Manifest { source } => match source.as_ref() {
                ManifestError::MissingColumn { .. }
                | ManifestError::DuplicateIdentifier { .. } => 2,
                _ => 1,
            },
            Error::InvalidManifestPath { .. }
            | Error::CreateOutputDir { .. }
            | Error::Write { .. } => 1,
        }
    }
}

#[derive(Parser, Debug)]
#[command(version = env!("CARGO_PKG_VERSION"), about = "Partition a filepath manifest into per-channel file lists for training", long_about = None)]
struct Args {
    #[arg(help = "CSV manifest with per-subject file paths", long = "file", short = 'f')]
    file: PathBuf,

    #[arg(
        help = "Category selection mode: fixed, pool, or single:<name>",
        long = "category-mode",
        default_value = "pool",
        value_parser = CategoryMode::from_str
    )]
    category_mode: CategoryMode,

    #[arg(
        help = "Ratio [0,1] of eligible subjects to put in the training set",
        long = "train",
        default_value_t = 0.0
    )]
    train: f64,

    #[arg(
        help = "Ratio [0,1] of eligible subjects to put in the validation set",
        long = "val",
        default_value_t = 0.0
    )]
    val: f64,

    #[arg(
        help = "Ratio [0,1] of eligible subjects to put in the test set",
        long = "test",
        default_value_t = 0.0
    )]
    test: f64,

    #[arg(
        help = "Directory to create the output lists in (default: the manifest's directory)",
        long = "output-directory"
    )]
    output_directory: Option<PathBuf>,

    #[arg(
        help = "Name of the identifier column",
        long = "id",
        default_value = DEFAULT_ID_COLUMN
    )]
    id: String,

    #[arg(
        help = "Name of the category column",
        long = "category",
        default_value = DEFAULT_CATEGORY_COLUMN
    )]
    category: String,

    #[arg(
        help = "Channel columns to emit file lists for",
        long = "channels",
        value_delimiter = ',',
        default_values_t = DEFAULT_PARTITION_CHANNELS.iter().map(|s| s.to_string())
    )]
    channels: Vec<String>,

    #[arg(
        help = "Seed for the randomized split (omit for an entropy-seeded run)",
        long = "seed"
    )]
    seed: Option<u64>,

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

fn run(args: Args) -> Result<(), Error> {
    if !args.file.is_file() {
        return InvalidManifestPathSnafu { path: args.file }.fail();
    }
    let manifest = Manifest::from_csv_path(&args.file).context(ManifestSnafu)?;
    tracing::info!(
        "Loaded {} subjects from {}",
        manifest.num_rows(),
        args.file.display()
    );

    // Validate the whole configuration before any row is partitioned, so an
    // invalid run never leaves partial output behind.
    let ratios = SplitRatios::new(args.train, args.val, args.test).context(PartitionSnafu)?;
    let id_idx = manifest.require_column(&args.id).context(ManifestSnafu)?;
    let category_idx = manifest
        .require_column(&args.category)
        .context(ManifestSnafu)?;
    let mut channel_indices = Vec::with_capacity(args.channels.len());
    for channel in &args.channels {
        channel_indices.push(manifest.require_column(channel).context(ManifestSnafu)?);
    }
    manifest.ensure_unique(&args.id).context(ManifestSnafu)?;
    for row in 0..manifest.num_rows() {
        validate_identifier(manifest.value(row, id_idx)).context(IdentifierSnafu)?;
    }

    // Output lists land next to the manifest unless redirected; listed paths
    // are prefixed with the manifest's directory.
    let data_root = args
        .file
        .parent()
        .unwrap_or(Path::new(""))
        .to_path_buf();
    let output_dir = args.output_directory.unwrap_or_else(|| data_root.clone());
    if !output_dir.is_dir() {
        std::fs::create_dir_all(&output_dir).with_context(|_| CreateOutputDirSnafu {
            path: output_dir.clone(),
        })?;
    }
    let mut sinks =
        PartitionSinks::create(&output_dir, &data_root, &args.channels).context(WriteSnafu)?;

    let policy = PartitionPolicy::new(args.category_mode, ratios);
    let mut rng = match args.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    let pb = default_bar(manifest.num_rows() as u64);
    pb.set_message("Partitioning subjects");

    let mut assignments = Vec::with_capacity(manifest.num_rows());
    for row in 0..manifest.num_rows() {
        let identifier = manifest.value(row, id_idx);
        let category = manifest.value(row, category_idx);
        let partition = policy
            .assign(identifier, category, &mut rng)
            .context(PartitionSnafu)?;

        let paths = channel_indices
            .iter()
            .map(|&idx| manifest.value(row, idx).to_string())
            .collect::<Vec<_>>();
        sinks.append(partition, identifier, &paths).context(WriteSnafu)?;
        assignments.push(partition);
        pb.inc(1);
    }
    pb.finish_and_clear();

    sinks.finish().context(WriteSnafu)?;

    let counts = assignments.iter().copied().counts();
    let count = |partition: Partition| counts.get(&partition).copied().unwrap_or(0);
    println!(
        "Partitioned {} subjects: {} train, {} val, {} test, {} excluded",
        assignments.len(),
        count(Partition::Train),
        count(Partition::Val),
        count(Partition::Test),
        count(Partition::Excluded),
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::fs;
    use tempfile::TempDir;

    fn write_manifest(path: &Path, rows: &[(&str, &str)]) {
        let mut writer = csv::Writer::from_path(path).unwrap();
        writer
            .write_record(["BraTS18ID", "type", "T1_norm", "seg"])
            .unwrap();
        for (id, category) in rows {
            writer
                .write_record([
                    id.to_string(),
                    category.to_string(),
                    format!("{}/{}/{}_t1_norm.nii.gz", category, id, id),
                    format!("{}/{}/{}_seg.nii.gz", category, id, id),
                ])
                .unwrap();
        }
        writer.flush().unwrap();
    }

    fn args(file: PathBuf, mode: CategoryMode) -> Args {
        Args {
            file,
            category_mode: mode,
            train: 0.0,
            val: 0.0,
            test: 0.0,
            output_directory: None,
            id: "BraTS18ID".to_string(),
            category: "type".to_string(),
            channels: vec!["T1_norm".to_string(), "seg".to_string()],
            seed: Some(1),
            verbose: false,
        }
    }

    fn read_lines(path: &Path) -> Vec<String> {
        fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(String::from)
            .collect()
    }

    #[test]
    fn test_pool_mode_full_train_ratio() {
        let temp_dir = TempDir::new().unwrap();
        let manifest_path = temp_dir.path().join("manifest.csv");
        write_manifest(
            &manifest_path,
            &[("S1", "HGG"), ("S2", "LGG"), ("S3", "HGG")],
        );

        let mut args = args(manifest_path, CategoryMode::Pool);
        args.train = 1.0;
        run(args).unwrap();

        // Every eligible subject lands in train, in manifest row order, with
        // the manifest's directory prefixed onto each listed path.
        let expected = ["HGG/S1/S1_t1_norm.nii.gz", "LGG/S2/S2_t1_norm.nii.gz", "HGG/S3/S3_t1_norm.nii.gz"]
            .iter()
            .map(|p| temp_dir.path().join(p).display().to_string())
            .collect::<Vec<_>>();
        assert_eq!(
            read_lines(&temp_dir.path().join("train_T1_norm.txt")),
            expected
        );
        assert!(read_lines(&temp_dir.path().join("val_T1_norm.txt")).is_empty());
        assert!(read_lines(&temp_dir.path().join("test_seg.txt")).is_empty());
        assert!(read_lines(&temp_dir.path().join("val_pred.txt")).is_empty());
    }

    #[test]
    fn test_fixed_mode_assignments() {
        let temp_dir = TempDir::new().unwrap();
        let manifest_path = temp_dir.path().join("manifest.csv");
        write_manifest(
            &manifest_path,
            &[
                ("S1", "HGG"),
                ("S2", "VAL"),
                ("S3", "TEST"),
                ("S4", "LGG"),
                ("S5", "PILOT"),
            ],
        );

        run(args(manifest_path, CategoryMode::Fixed)).unwrap();

        assert_eq!(
            read_lines(&temp_dir.path().join("train_T1_norm.txt")).len(),
            2
        );
        assert_eq!(
            read_lines(&temp_dir.path().join("val_pred.txt")),
            vec!["S2_pred.nii.gz"]
        );
        assert_eq!(
            read_lines(&temp_dir.path().join("test_pred.txt")),
            vec!["S3_pred.nii.gz"]
        );
        // The unrecognized category is dropped from every list
        let all_lines: usize = [
            "train_T1_norm.txt",
            "val_T1_norm.txt",
            "test_T1_norm.txt",
        ]
        .iter()
        .map(|name| read_lines(&temp_dir.path().join(name)).len())
        .sum();
        assert_eq!(all_lines, 4);
    }

    #[test]
    fn test_fixed_mode_is_deterministic() {
        let temp_dir = TempDir::new().unwrap();
        let manifest_path = temp_dir.path().join("manifest.csv");
        write_manifest(&manifest_path, &[("S1", "HGG"), ("S2", "VAL")]);

        let out_a = temp_dir.path().join("a");
        let out_b = temp_dir.path().join("b");
        for (out, seed) in [(&out_a, Some(1)), (&out_b, None)] {
            let mut args = args(manifest_path.clone(), CategoryMode::Fixed);
            args.output_directory = Some(out.clone());
            args.seed = seed;
            run(args).unwrap();
        }

        for name in ["train_T1_norm.txt", "val_T1_norm.txt", "val_pred.txt"] {
            assert_eq!(
                read_lines(&out_a.join(name)),
                read_lines(&out_b.join(name)),
                "mismatch in {}",
                name
            );
        }
    }

    #[test]
    fn test_invalid_ratio_sum_produces_no_output() {
        let temp_dir = TempDir::new().unwrap();
        let manifest_path = temp_dir.path().join("manifest.csv");
        write_manifest(&manifest_path, &[("S1", "HGG")]);

        let out = temp_dir.path().join("out");
        let mut args = args(manifest_path, CategoryMode::Pool);
        args.train = 0.8;
        args.val = 0.8;
        args.output_directory = Some(out.clone());

        let err = run(args).unwrap_err();
        assert_eq!(err.exit_code(), 2);
        assert!(matches!(
            err,
            Error::Partition { ref source }
                if matches!(source.as_ref(), PartitionError::InvalidRatioConfiguration { .. })
        ));
        assert!(!out.join("train_T1_norm.txt").exists());
    }

    #[test]
    fn test_single_mode_mismatch_writes_no_lists() {
        let temp_dir = TempDir::new().unwrap();
        let manifest_path = temp_dir.path().join("manifest.csv");
        write_manifest(&manifest_path, &[("S1", "TEST")]);

        let mut args = args(
            manifest_path,
            CategoryMode::Single("VAL".to_string()),
        );
        args.val = 1.0;

        let err = run(args).unwrap_err();
        assert_eq!(err.exit_code(), 2);
        assert!(read_lines(&temp_dir.path().join("val_T1_norm.txt")).is_empty());
        assert!(read_lines(&temp_dir.path().join("val_pred.txt")).is_empty());
    }

    #[test]
    fn test_seeded_runs_reproduce_the_same_lists() {
        let temp_dir = TempDir::new().unwrap();
        let manifest_path = temp_dir.path().join("manifest.csv");
        let rows: Vec<(String, &str)> = (0..50).map(|i| (format!("S{}", i), "HGG")).collect();
        let rows: Vec<(&str, &str)> = rows.iter().map(|(id, c)| (id.as_str(), *c)).collect();
        write_manifest(&manifest_path, &rows);

        let out_a = temp_dir.path().join("a");
        let out_b = temp_dir.path().join("b");
        for out in [&out_a, &out_b] {
            let mut args = args(manifest_path.clone(), CategoryMode::Pool);
            args.train = 0.5;
            args.val = 0.25;
            args.test = 0.25;
            args.seed = Some(7);
            args.output_directory = Some(out.clone());
            run(args).unwrap();
        }

        for name in [
            "train_T1_norm.txt",
            "val_T1_norm.txt",
            "test_T1_norm.txt",
            "val_pred.txt",
            "test_pred.txt",
        ] {
            assert_eq!(
                read_lines(&out_a.join(name)),
                read_lines(&out_b.join(name)),
                "mismatch in {}",
                name
            );
        }
    }

    #[test]
    fn test_duplicate_identifier_is_a_config_error() {
        let temp_dir = TempDir::new().unwrap();
        let manifest_path = temp_dir.path().join("manifest.csv");
        write_manifest(&manifest_path, &[("S1", "HGG"), ("S1", "LGG")]);

        let err = run(args(manifest_path, CategoryMode::Fixed)).unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_missing_channel_column() {
        let temp_dir = TempDir::new().unwrap();
        let manifest_path = temp_dir.path().join("manifest.csv");
        write_manifest(&manifest_path, &[("S1", "HGG")]);

        let out = temp_dir.path().join("out");
        let mut args = args(manifest_path, CategoryMode::Fixed);
        args.channels = vec!["T1_norm".to_string(), "FLAIR_norm".to_string()];
        args.output_directory = Some(out.clone());

        let err = run(args).unwrap_err();
        assert_eq!(err.exit_code(), 2);
        assert!(!out.join("train_T1_norm.txt").exists());
    }

    #[rstest]
    #[case("bad/id")]
    #[case("")]
    fn test_malformed_identifier_aborts_the_run(#[case] id: &str) {
        let temp_dir = TempDir::new().unwrap();
        let manifest_path = temp_dir.path().join("manifest.csv");
        write_manifest(&manifest_path, &[(id, "HGG"), ("S2", "HGG")]);

        let out = temp_dir.path().join("out");
        let mut args = args(manifest_path, CategoryMode::Fixed);
        args.output_directory = Some(out.clone());

        let err = run(args).unwrap_err();
        assert_eq!(err.exit_code(), 2);
        assert!(!out.join("train_T1_norm.txt").exists());
    }

    #[test]
    fn test_missing_manifest_is_an_io_error() {
        let temp_dir = TempDir::new().unwrap();
        let err = run(args(
            temp_dir.path().join("absent.csv"),
            CategoryMode::Fixed,
        ))
        .unwrap_err();
        assert_eq!(err.exit_code(), 1);
    }
}
