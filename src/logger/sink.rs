use csv::{ReaderBuilder, StringRecord, WriterBuilder};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("row has {found} columns, header has {expected}")]
    ColumnMismatch { expected: usize, found: usize },

    #[error("existing header in {} does not match the metric table", .path.display())]
    HeaderMismatch { path: PathBuf },
}

pub type Result<T> = std::result::Result<T, SinkError>;

/// Append-only CSV file. The handle is opened and released on every append.
#[derive(Debug)]
pub struct CsvSink {
    path: PathBuf,
    header: Vec<String>,
}

impl CsvSink {
    /// Bind a sink to `path`. A file that already has content must start with
    /// the same header.
    pub fn new(path: impl Into<PathBuf>, header: Vec<String>) -> Result<Self> {
        let path = path.into();
        if let Some(existing) = read_header(&path)? {
            if existing.iter().ne(header.iter().map(String::as_str)) {
                return Err(SinkError::HeaderMismatch { path });
            }
            info!("Appending to existing CSV file {}", path.display());
        }
        Ok(Self { path, header })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn header(&self) -> &[String] {
        &self.header
    }

    pub fn append(&self, row: &[String]) -> Result<()> {
        if row.len() != self.header.len() {
            return Err(SinkError::ColumnMismatch {
                expected: self.header.len(),
                found: row.len(),
            });
        }

        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        let is_empty = file.metadata()?.len() == 0;

        let mut writer = WriterBuilder::new().has_headers(false).from_writer(file);
        if is_empty {
            info!("Writing CSV header to {}", self.path.display());
            writer.write_record(&self.header)?;
        }
        writer.write_record(row)?;
        writer.flush()?;
        Ok(())
    }
}

fn read_header(path: &Path) -> Result<Option<StringRecord>> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(file);
    let mut record = StringRecord::new();
    if reader.read_record(&mut record)? {
        Ok(Some(record))
    } else {
        Ok(None)
    }
}
