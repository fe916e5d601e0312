use snafu::{ResultExt, Snafu};
use std::collections::HashMap;
use std::fmt;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::partition::Partition;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum WriteError {
    #[snafu(display("Failed to create output file {}: {:?}", path.display(), source))]
    CreateSink {
        path: PathBuf,
        #[snafu(source(from(std::io::Error, Box::new)))]
        source: Box<std::io::Error>,
    },

    #[snafu(display("Failed to write to {}: {:?}", path.display(), source))]
    WriteSink {
        path: PathBuf,
        #[snafu(source(from(std::io::Error, Box::new)))]
        source: Box<std::io::Error>,
    },

    #[snafu(display("Failed to flush {}: {:?}", path.display(), source))]
    FlushSink {
        path: PathBuf,
        #[snafu(source(from(std::io::Error, Box::new)))]
        source: Box<std::io::Error>,
    },
}

/// Filename of the prediction volume a downstream network writes for one
/// subject.
pub fn prediction_filename(identifier: &str) -> String {
    format!("{}_pred.nii.gz", identifier)
}

/// One append-only output list. The path is kept alongside the writer so
/// failures surface the offending file.
struct Sink {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl Sink {
    fn create(path: PathBuf) -> Result<Self, WriteError> {
        let file = File::create(&path).with_context(|_| CreateSinkSnafu { path: path.clone() })?;
        Ok(Self {
            path,
            writer: BufWriter::new(file),
        })
    }

    fn append_line<D: fmt::Display>(&mut self, line: D) -> Result<(), WriteError> {
        writeln!(self.writer, "{}", line).with_context(|_| WriteSinkSnafu {
            path: self.path.clone(),
        })
    }

    fn finish(mut self) -> Result<(), WriteError> {
        self.writer.flush().with_context(|_| FlushSinkSnafu {
            path: self.path.clone(),
        })
    }
}

/// Output sinks for one partition run: a `<partition>_<channel>.txt` list
/// per (partition, channel) pair plus a `<partition>_pred.txt` prediction
/// list for the val and test partitions.
///
/// All sinks are created before the first subject is assigned and are owned
/// exclusively by this writer for the lifetime of the run. Lines are
/// buffered whole, so an abort can truncate coverage but never leaves a
/// partially written line; [`PartitionSinks::finish`] performs the
/// error-checked flush, and the buffered writers flush on drop as a
/// backstop on early-error paths.
pub struct PartitionSinks {
    data_root: PathBuf,
    channel_sinks: HashMap<Partition, Vec<Sink>>,
    prediction_sinks: HashMap<Partition, Sink>,
}

impl PartitionSinks {
    /// Create every output list under `output_dir`. `data_root` is prefixed
    /// onto each manifest path as it is written.
    pub fn create<P: AsRef<Path>, Q: AsRef<Path>>(
        output_dir: P,
        data_root: Q,
        channels: &[String],
    ) -> Result<Self, WriteError> {
        let output_dir = output_dir.as_ref();
        let mut channel_sinks = HashMap::new();
        let mut prediction_sinks = HashMap::new();

        for partition in Partition::OUTPUT {
            let mut sinks = Vec::with_capacity(channels.len());
            for channel in channels {
                let path = output_dir.join(format!("{}_{}.txt", partition, channel));
                sinks.push(Sink::create(path)?);
            }
            channel_sinks.insert(partition, sinks);

            if partition.wants_predictions() {
                let path = output_dir.join(format!("{}_pred.txt", partition));
                prediction_sinks.insert(partition, Sink::create(path)?);
            }
        }

        Ok(Self {
            data_root: data_root.as_ref().to_path_buf(),
            channel_sinks,
            prediction_sinks,
        })
    }

    /// Append one subject's channel paths to the sinks for `partition`, one
    /// path per line in channel order, and the prediction filename for the
    /// val/test partitions. A no-op for excluded subjects.
    pub fn append(
        &mut self,
        partition: Partition,
        identifier: &str,
        paths: &[String],
    ) -> Result<(), WriteError> {
        let Some(sinks) = self.channel_sinks.get_mut(&partition) else {
            return Ok(());
        };
        debug_assert_eq!(paths.len(), sinks.len());
        for (sink, path) in sinks.iter_mut().zip(paths) {
            sink.append_line(self.data_root.join(path).display())?;
        }
        if let Some(sink) = self.prediction_sinks.get_mut(&partition) {
            sink.append_line(prediction_filename(identifier))?;
        }
        Ok(())
    }

    /// Flush and release every sink, surfacing any buffered write error.
    pub fn finish(self) -> Result<(), WriteError> {
        for sink in self.channel_sinks.into_values().flatten() {
            sink.finish()?;
        }
        for sink in self.prediction_sinks.into_values() {
            sink.finish()?;
        }
        Ok(())
    }
}
