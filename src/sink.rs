//! Output sinks for window records and engineered features.

use crate::engine::window::WindowRecord;
use crate::features::FeatureRow;
use serde::Serialize;
use std::fmt;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

/// Errors from committing records to a sink. Terminal for the run.
#[derive(Debug)]
pub enum SinkError {
    Io(std::io::Error),
    Serialize(serde_json::Error),
}

impl fmt::Display for SinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SinkError::Io(err) => write!(f, "sink io error: {}", err),
            SinkError::Serialize(err) => write!(f, "sink serialize error: {}", err),
        }
    }
}

impl std::error::Error for SinkError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SinkError::Io(err) => Some(err),
            SinkError::Serialize(err) => Some(err),
        }
    }
}

/// Receives closed windows in emission order.
pub trait WindowSink {
    fn push(&mut self, record: WindowRecord) -> Result<(), SinkError>;
}

/// Collects records in memory; the library-facing default.
#[derive(Debug, Default)]
pub struct VecSink {
    pub records: Vec<WindowRecord>,
}

impl VecSink {
    pub fn new() -> Self {
        VecSink::default()
    }
}

impl WindowSink for VecSink {
    fn push(&mut self, record: WindowRecord) -> Result<(), SinkError> {
        self.records.push(record);
        Ok(())
    }
}

/// Buffers records and writes one pretty-printed JSON array on `finish`.
/// The output file is only created at finish time, so a failed run leaves
/// nothing on disk.
#[derive(Debug)]
pub struct JsonArraySink {
    path: PathBuf,
    records: Vec<WindowRecord>,
}

impl JsonArraySink {
    pub fn new(path: &Path) -> Self {
        JsonArraySink {
            path: path.to_path_buf(),
            records: Vec::new(),
        }
    }

    /// Write the collected array and return how many records were written.
    pub fn finish(self) -> Result<usize, SinkError> {
        let count = self.records.len();
        write_json_array(&self.path, &self.records)?;
        Ok(count)
    }

    pub fn records(&self) -> &[WindowRecord] {
        &self.records
    }
}

impl WindowSink for JsonArraySink {
    fn push(&mut self, record: WindowRecord) -> Result<(), SinkError> {
        self.records.push(record);
        Ok(())
    }
}

/// Serialize any record slice as a pretty JSON array file.
pub fn write_json_array<T: Serialize>(path: &Path, records: &[T]) -> Result<(), SinkError> {
    let file = File::create(path).map_err(SinkError::Io)?;
    let writer = BufWriter::new(file);
    serde_json::to_writer_pretty(writer, records).map_err(SinkError::Serialize)
}

/// Collaborator contract for the external persistence layer: simple inserts
/// keyed by a caller-provided session id. No query surface.
pub trait PersistenceSink {
    fn insert_window(&mut self, session_id: &str, record: &WindowRecord)
        -> Result<(), SinkError>;
    fn insert_features(&mut self, session_id: &str, row: &FeatureRow) -> Result<(), SinkError>;
}

/// In-memory `PersistenceSink`, for tests and library embedding.
#[derive(Debug, Default)]
pub struct MemoryStore {
    pub windows: Vec<(String, WindowRecord)>,
    pub features: Vec<(String, FeatureRow)>,
}

impl PersistenceSink for MemoryStore {
    fn insert_window(
        &mut self,
        session_id: &str,
        record: &WindowRecord,
    ) -> Result<(), SinkError> {
        self.windows.push((session_id.to_string(), record.clone()));
        Ok(())
    }

    fn insert_features(&mut self, session_id: &str, row: &FeatureRow) -> Result<(), SinkError> {
        self.features.push((session_id.to_string(), row.clone()));
        Ok(())
    }
}
