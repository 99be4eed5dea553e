//! JSON Lines serialization of trait records.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;

use serde::Serialize;

use crate::error::SinkError;
use crate::model::TraitRecord;

/// Where serialized traits go.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Sink {
    #[default]
    Stdout,
    File(PathBuf),
}

impl Sink {
    /// Open the sink for writing. Files are created or truncated.
    pub fn open(&self) -> Result<TraitWriter<Box<dyn Write + Send>>, SinkError> {
        let out: Box<dyn Write + Send> = match self {
            Sink::Stdout => Box::new(io::stdout()),
            Sink::File(path) => {
                let file = File::create(path)
                    .map_err(|source| SinkError::Open { path: path.clone(), source })?;
                Box::new(BufWriter::new(file))
            }
        };
        Ok(TraitWriter::new(out))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct WriteSummary {
    pub written: usize,
    pub skipped_regions: usize,
}

/// Single writer for a sink. Each record is rendered to a complete line
/// first and handed to the sink in one `write_all`, then flushed, so the
/// sink only ever holds whole records.
pub struct TraitWriter<W: Write> {
    out: W,
    written: usize,
}

impl<W: Write> TraitWriter<W> {
    pub fn new(out: W) -> Self {
        Self { out, written: 0 }
    }

    /// Records successfully written so far.
    pub fn written(&self) -> usize {
        self.written
    }

    pub fn write_record(&mut self, record: &TraitRecord) -> Result<(), SinkError> {
        let mut line = serde_json::to_vec(record)
            .map_err(|source| SinkError::Serialize { address: record.address, source })?;
        line.push(b'\n');

        self.out
            .write_all(&line)
            .and_then(|_| self.out.flush())
            .map_err(|source| SinkError::Write { written: self.written, source })?;
        self.written += 1;
        Ok(())
    }

    /// Write every record in order, stopping at the first failure. Returns
    /// the number of records written by this call.
    pub fn write_all<'r, I>(&mut self, records: I) -> Result<usize, SinkError>
    where
        I: IntoIterator<Item = &'r TraitRecord>,
    {
        let mut count = 0;
        for record in records {
            self.write_record(record)?;
            count += 1;
        }
        Ok(count)
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}
