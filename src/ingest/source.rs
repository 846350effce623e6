use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};

use crate::constants::GZIP_SUFFIX;

/// Something rows can be streamed from.
pub trait InputSource: Send + Sync {
    /// Drives column-mapping overrides and same-source exclusion.
    fn name(&self) -> &str;

    /// Size in bytes as stored (compressed size for gzip sources).
    fn size(&self) -> u64;

    fn open(&self) -> std::io::Result<Box<dyn Read + Send>>;

    fn is_compressed(&self) -> bool {
        self.name().to_lowercase().ends_with(GZIP_SUFFIX)
    }
}

#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
    name: String,
    size: u64,
}

impl FileSource {
    pub fn new<P: AsRef<Path>>(path: P) -> std::io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let size = std::fs::metadata(&path)?.len();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Ok(Self { path, name, size })
    }

    /// Same file under a different source name.
    pub fn with_name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl InputSource for FileSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn open(&self) -> std::io::Result<Box<dyn Read + Send>> {
        let file = std::fs::File::open(&self.path)?;
        Ok(Box::new(std::io::BufReader::new(file)))
    }
}

/// In-memory source, mostly for tests and for callers that already hold
/// the bytes.
#[derive(Debug, Clone)]
pub struct MemorySource {
    name: String,
    data: Vec<u8>,
}

impl MemorySource {
    pub fn new(name: &str, data: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.to_string(),
            data: data.into(),
        }
    }
}

impl InputSource for MemorySource {
    fn name(&self) -> &str {
        &self.name
    }

    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    fn open(&self) -> std::io::Result<Box<dyn Read + Send>> {
        Ok(Box::new(Cursor::new(self.data.clone())))
    }
}
