//! Byte sources: the only way binary data enters an extraction run.
//!
//! Each acquisition method is its own type. A source starts out unloaded,
//! is filled exactly once by `load`, and is read-only from then on, so it
//! can be shared by every extraction worker without locking.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use crate::error::FileError;

/// Read-only access to a loaded byte buffer.
pub trait ByteSource: Send + Sync {
    /// The loaded bytes, or an empty slice before a successful load.
    fn bytes(&self) -> &[u8];

    /// `true` once `load` has succeeded.
    fn is_valid(&self) -> bool;

    fn size(&self) -> usize {
        self.bytes().len()
    }
}

/// Descriptor-backed source. The size is taken by seeking to the end of the
/// file; zero-length files fail to load.
#[derive(Debug, Default)]
pub struct FileSource {
    data: Option<Vec<u8>>,
}

impl FileSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open `path` and load its contents.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, FileError> {
        let mut source = Self::new();
        source.load_path(path)?;
        Ok(source)
    }

    pub fn load_path(&mut self, path: impl AsRef<Path>) -> Result<(), FileError> {
        let path = path.as_ref();
        let mut file = File::open(path)
            .map_err(|source| FileError::Open { path: path.to_path_buf(), source })?;
        self.load(&mut file)
    }

    /// Load from an already open descriptor.
    pub fn load(&mut self, file: &mut File) -> Result<(), FileError> {
        if self.data.is_some() {
            return Err(FileError::AlreadyLoaded);
        }
        let size = file.seek(SeekFrom::End(0)).map_err(FileError::Read)?;
        if size == 0 {
            return Err(FileError::Empty);
        }
        file.seek(SeekFrom::Start(0)).map_err(FileError::Read)?;

        let len = usize::try_from(size).map_err(|_| {
            FileError::Read(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("file of {size} bytes does not fit in memory"),
            ))
        })?;
        let mut buf = vec![0u8; len];
        file.read_exact(&mut buf).map_err(FileError::Read)?;
        self.data = Some(buf);
        Ok(())
    }
}

impl ByteSource for FileSource {
    fn bytes(&self) -> &[u8] {
        self.data.as_deref().unwrap_or_default()
    }

    fn is_valid(&self) -> bool {
        self.data.is_some()
    }
}

/// Memory-backed source. The whole buffer is treated as code; no container
/// parsing happens here. An empty buffer is a valid (empty) source.
#[derive(Debug, Default)]
pub struct RawSource {
    data: Option<Vec<u8>>,
}

impl RawSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_bytes(data: impl Into<Vec<u8>>) -> Self {
        Self { data: Some(data.into()) }
    }

    pub fn load(&mut self, data: impl Into<Vec<u8>>) -> Result<(), FileError> {
        if self.data.is_some() {
            return Err(FileError::AlreadyLoaded);
        }
        self.data = Some(data.into());
        Ok(())
    }
}

impl ByteSource for RawSource {
    fn bytes(&self) -> &[u8] {
        self.data.as_deref().unwrap_or_default()
    }

    fn is_valid(&self) -> bool {
        self.data.is_some()
    }
}
