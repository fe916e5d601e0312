use snafu::{ResultExt, Snafu};
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};

use crate::manifest::{Manifest, ManifestError};

/// Default program name for the c3d mask utility.
pub const DEFAULT_C3D: &str = "c3d";

/// Default program name for the ANTs tissue segmenter.
pub const DEFAULT_ATROPOS: &str = "Atropos";

/// Columns every normalization pass reads or writes.
const REQUIRED_COLUMNS: &[&str] = &["T1", "seg", "mask", "tumor", "nontumor"];

/// Additional columns required when tissue segmentation is enabled.
const ATROPOS_COLUMNS: &[&str] = &["T2", "FLAIR", "atropos"];

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum NormalizeError {
    #[snafu(display("{} exited with {} while producing {}", program, status, output.display()))]
    CommandFailed {
        program: String,
        status: ExitStatus,
        output: PathBuf,
    },

    #[snafu(display("Failed to launch {}: {:?}", program, source))]
    Launch {
        program: String,
        #[snafu(source(from(std::io::Error, Box::new)))]
        source: Box<std::io::Error>,
    },

    #[snafu(display("{}", source))]
    Manifest {
        #[snafu(source(from(ManifestError, Box::new)))]
        source: Box<ManifestError>,
    },
}

/// Relative artifact paths for one subject, read from a manifest row.
#[derive(Debug, Clone)]
pub struct SubjectArtifacts {
    pub t1: String,
    pub seg: String,
    pub mask: String,
    pub tumor: String,
    pub nontumor: String,
    pub t2: Option<String>,
    pub flair: Option<String>,
    pub tissue: Option<String>,
}

impl SubjectArtifacts {
    pub fn from_row(manifest: &Manifest, row: usize) -> Result<Self, NormalizeError> {
        let get = |column: &str| -> Result<String, NormalizeError> {
            let idx = manifest.require_column(column).context(ManifestSnafu)?;
            Ok(manifest.value(row, idx).to_string())
        };
        Ok(Self {
            t1: get("T1")?,
            seg: get("seg")?,
            mask: get("mask")?,
            tumor: get("tumor")?,
            nontumor: get("nontumor")?,
            t2: manifest.get(row, "T2").map(String::from),
            flair: manifest.get(row, "FLAIR").map(String::from),
            tissue: manifest.get(row, "atropos").map(String::from),
        })
    }
}

/// Drives the external mask and segmentation utilities for one manifest.
///
/// Per subject: a binary brain mask thresholded from the T1 volume, a binary
/// tumor mask thresholded from the segmentation, a non-tumor mask as their
/// set difference, and optionally a 3-class k-means tissue segmentation of
/// the non-tumor region. Every step checks for its output file first and is
/// skipped when the file already exists, so re-running a partially completed
/// pass only performs the remaining work.
#[derive(Debug, Clone)]
pub struct Normalizer {
    pub data_root: PathBuf,
    pub c3d: String,
    pub atropos: String,
    pub run_atropos: bool,
}

impl Normalizer {
    pub fn new<P: AsRef<Path>>(data_root: P) -> Self {
        Self {
            data_root: data_root.as_ref().to_path_buf(),
            c3d: DEFAULT_C3D.to_string(),
            atropos: DEFAULT_ATROPOS.to_string(),
            run_atropos: false,
        }
    }

    /// Check the manifest carries every column the pass will touch. Called
    /// once before any row is processed.
    pub fn check_columns(&self, manifest: &Manifest) -> Result<(), NormalizeError> {
        for column in REQUIRED_COLUMNS {
            manifest.require_column(column).context(ManifestSnafu)?;
        }
        if self.run_atropos {
            for column in ATROPOS_COLUMNS {
                manifest.require_column(column).context(ManifestSnafu)?;
            }
        }
        Ok(())
    }

    /// Produce the derived masks (and optional tissue segmentation) for one
    /// subject.
    pub fn process(&self, subject: &SubjectArtifacts) -> Result<(), NormalizeError> {
        let t1 = self.resolve(&subject.t1);
        let seg = self.resolve(&subject.seg);
        let mask = self.resolve(&subject.mask);
        let tumor = self.resolve(&subject.tumor);
        let nontumor = self.resolve(&subject.nontumor);

        // Foreground = intensity above background
        self.run_if_missing(&mask, self.binarize_command(&t1, &mask))?;
        self.run_if_missing(&tumor, self.binarize_command(&seg, &tumor))?;
        self.run_if_missing(&nontumor, self.subtract_command(&mask, &tumor, &nontumor))?;

        if self.run_atropos {
            if let (Some(t2), Some(flair), Some(tissue)) =
                (&subject.t2, &subject.flair, &subject.tissue)
            {
                let tissue = self.resolve(tissue);
                let command = self.atropos_command(
                    &nontumor,
                    &t1,
                    &self.resolve(t2),
                    &self.resolve(flair),
                    &tissue,
                );
                self.run_if_missing(&tissue, command)?;
            }
        }
        Ok(())
    }

    fn resolve(&self, relative: &str) -> PathBuf {
        self.data_root.join(relative)
    }

    /// `c3d <input> -background 0 -binarize -type uchar -o <output>`
    fn binarize_command(&self, input: &Path, output: &Path) -> Command {
        let mut command = Command::new(&self.c3d);
        command
            .arg(input)
            .args(["-background", "0", "-binarize", "-type", "uchar", "-o"])
            .arg(output);
        command
    }

    /// `c3d <mask> <tumor> -scale -1 -add -threshold 1 1 1 0 -type uchar -o <output>`
    fn subtract_command(&self, mask: &Path, tumor: &Path, output: &Path) -> Command {
        let mut command = Command::new(&self.c3d);
        command
            .arg(mask)
            .arg(tumor)
            .args([
                "-scale", "-1", "-add", "-threshold", "1", "1", "1", "0", "-type", "uchar", "-o",
            ])
            .arg(output);
        command
    }

    /// 3-class k-means segmentation of the non-tumor region.
    fn atropos_command(
        &self,
        nontumor: &Path,
        t1: &Path,
        t2: &Path,
        flair: &Path,
        output: &Path,
    ) -> Command {
        let mut command = Command::new(&self.atropos);
        command
            .args(["-d", "3", "-c", "[5,0.001]", "-m", "[0.2,1x1x1]", "-i", "kmeans[3]", "-x"])
            .arg(nontumor)
            .arg("-a")
            .arg(t1)
            .arg(t2)
            .arg(flair)
            .arg("-o")
            .arg(output);
        command
    }

    fn run_if_missing(&self, output: &Path, mut command: Command) -> Result<(), NormalizeError> {
        if output.is_file() {
            tracing::debug!("Output exists, skipping: {}", output.display());
            return Ok(());
        }
        let program = command.get_program().to_string_lossy().into_owned();
        tracing::info!("Running {:?}", command);
        let status = command.status().with_context(|_| LaunchSnafu {
            program: program.clone(),
        })?;
        if !status.success() {
            return CommandFailedSnafu {
                program,
                status,
                output,
            }
            .fail();
        }
        Ok(())
    }
}
