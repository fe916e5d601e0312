use csv::Reader as CsvReader;
use snafu::{ResultExt, Snafu};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::channels::ChannelSpec;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ManifestError {
    #[snafu(display("Error reading CSV {}: {:?}", path.display(), source))]
    ReadCsv {
        path: PathBuf,
        #[snafu(source(from(csv::Error, Box::new)))]
        source: Box<csv::Error>,
    },

    #[snafu(display("Error writing CSV {}: {:?}", path.display(), source))]
    WriteCsv {
        path: PathBuf,
        #[snafu(source(from(csv::Error, Box::new)))]
        source: Box<csv::Error>,
    },

    #[snafu(display("Error flushing CSV {}: {:?}", path.display(), source))]
    FlushCsv {
        path: PathBuf,
        #[snafu(source(from(std::io::Error, Box::new)))]
        source: Box<std::io::Error>,
    },

    #[snafu(display("Manifest is missing required column: {}", column))]
    MissingColumn { column: String },

    #[snafu(display("Duplicate subject identifier: {}", identifier))]
    DuplicateIdentifier { identifier: String },
}

/// In-memory tabular manifest: ordered columns and one row of string values
/// per subject. Column order is insertion order; reconciliation appends new
/// columns at the end and never reorders or rewrites existing cells.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
    columns: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl Manifest {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    /// Read a manifest from a UTF-8 CSV file with a header row.
    pub fn from_csv_path<P: AsRef<Path>>(path: P) -> Result<Self, ManifestError> {
        let path = path.as_ref();
        let mut reader = CsvReader::from_path(path).context(ReadCsvSnafu { path })?;
        let columns = reader
            .headers()
            .context(ReadCsvSnafu { path })?
            .iter()
            .map(String::from)
            .collect();
        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record.context(ReadCsvSnafu { path })?;
            rows.push(record.iter().map(String::from).collect());
        }
        Ok(Self { columns, rows })
    }

    /// Write the manifest to a CSV file, header row first.
    pub fn to_csv_path<P: AsRef<Path>>(&self, path: P) -> Result<(), ManifestError> {
        let path = path.as_ref();
        let mut writer = csv::Writer::from_path(path).context(WriteCsvSnafu { path })?;
        writer
            .write_record(&self.columns)
            .context(WriteCsvSnafu { path })?;
        for row in &self.rows {
            writer.write_record(row).context(WriteCsvSnafu { path })?;
        }
        writer.flush().context(FlushCsvSnafu { path })?;
        Ok(())
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    /// Look up a column index, failing with `MissingColumn` if absent.
    pub fn require_column(&self, name: &str) -> Result<usize, ManifestError> {
        self.column_index(name)
            .ok_or_else(|| ManifestError::MissingColumn {
                column: name.to_string(),
            })
    }

    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn push_row(&mut self, row: Vec<String>) {
        debug_assert_eq!(row.len(), self.columns.len());
        self.rows.push(row);
    }

    /// Value of one cell by row index and column index.
    pub fn value(&self, row: usize, column: usize) -> &str {
        &self.rows[row][column]
    }

    /// Value of one cell by row index and column name.
    pub fn get(&self, row: usize, name: &str) -> Option<&str> {
        self.column_index(name).map(|idx| self.value(row, idx))
    }

    pub(crate) fn set(&mut self, row: usize, column: usize, value: String) {
        self.rows[row][column] = value;
    }

    /// Ensure every channel column exists, appending an empty column at the
    /// end of the ordering for each one that does not. Existing columns and
    /// all row values are left untouched; reconciling an already-reconciled
    /// manifest is a no-op.
    pub fn reconcile(mut self, channels: &[ChannelSpec]) -> Self {
        for spec in channels {
            if !self.has_column(&spec.column) {
                self.columns.push(spec.column.clone());
                for row in &mut self.rows {
                    row.push(String::new());
                }
            }
        }
        self
    }

    /// Insert a derived column at a fixed position in the column ordering.
    /// `values` must hold one entry per row.
    pub fn insert_column<N: Into<String>>(
        mut self,
        index: usize,
        name: N,
        values: Vec<String>,
    ) -> Self {
        debug_assert_eq!(values.len(), self.rows.len());
        let index = index.min(self.columns.len());
        self.columns.insert(index, name.into());
        for (row, value) in self.rows.iter_mut().zip(values) {
            row.insert(index, value);
        }
        self
    }

    /// Validate that `column` holds a distinct value for every row.
    pub fn ensure_unique(&self, column: &str) -> Result<(), ManifestError> {
        let idx = self.require_column(column)?;
        let mut seen = HashSet::new();
        for row in &self.rows {
            if !seen.insert(row[idx].as_str()) {
                return DuplicateIdentifierSnafu {
                    identifier: row[idx].clone(),
                }
                .fail();
            }
        }
        Ok(())
    }
}
