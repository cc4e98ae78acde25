use std::{
    fs::{self, File},
    io::{ErrorKind, Read, Write},
    path::{Path, PathBuf},
};

use tempfile::NamedTempFile;
use tracing::debug;

use crate::{Error, Result};

const HEADER_LEN: usize = std::mem::size_of::<u64>();

/// Versioned policy parameters as published by the trainer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub version: u64,
    pub params: Vec<u8>,
}

/// Single-writer, many-reader policy store backed by one file.
///
/// The file holds a little-endian `u64` version followed by the serialized
/// parameters. A publish writes a sibling temporary file and renames it over
/// the target, so a reader sees either the previous or the new snapshot in
/// full.
#[derive(Debug, Clone)]
pub struct PolicySnapshot {
    path: PathBuf,
}

impl PolicySnapshot {
    pub const FILE_NAME: &'static str = "policy.bin";

    /// Use `<model_dir>/policy.bin`, creating `model_dir` if needed.
    pub fn new(model_dir: impl AsRef<Path>) -> Result<Self> {
        let model_dir = model_dir.as_ref();
        fs::create_dir_all(model_dir)?;
        Ok(Self {
            path: model_dir.join(Self::FILE_NAME),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    pub fn publish(&self, version: u64, params: &[u8]) -> Result<()> {
        let dir = self
            .path
            .parent()
            .ok_or_else(|| Error::Snapshot(format!("{} has no parent directory", self.path.display())))?;
        let mut file = NamedTempFile::new_in(dir)?;
        file.write_all(&version.to_le_bytes())?;
        file.write_all(params)?;
        file.as_file().sync_all()?;
        file.persist(&self.path).map_err(|e| Error::Io(e.error))?;
        debug!(version, bytes = params.len(), "published policy snapshot");
        Ok(())
    }

    pub fn read(&self) -> Result<Snapshot> {
        let bytes = fs::read(&self.path).map_err(|e| self.open_error(e))?;
        if bytes.len() < HEADER_LEN {
            return Err(Error::Snapshot(format!(
                "{} is {} bytes, shorter than its header",
                self.path.display(),
                bytes.len()
            )));
        }
        let (header, params) = bytes.split_at(HEADER_LEN);
        Ok(Snapshot {
            version: decode_version(header)?,
            params: params.to_vec(),
        })
    }

    /// Version of the current snapshot, reading only the header.
    pub fn version(&self) -> Result<u64> {
        let mut file = File::open(&self.path).map_err(|e| self.open_error(e))?;
        let mut header = [0u8; HEADER_LEN];
        file.read_exact(&mut header).map_err(|e| match e.kind() {
            ErrorKind::UnexpectedEof => Error::Snapshot(format!("{} has a truncated header", self.path.display())),
            _ => Error::Io(e),
        })?;
        decode_version(&header)
    }

    fn open_error(&self, e: std::io::Error) -> Error {
        match e.kind() {
            ErrorKind::NotFound => Error::Snapshot(format!("nothing published at {}", self.path.display())),
            _ => Error::Io(e),
        }
    }
}

fn decode_version(header: &[u8]) -> Result<u64> {
    let header: [u8; HEADER_LEN] = header
        .try_into()
        .map_err(|_| Error::Snapshot("bad header length".into()))?;
    Ok(u64::from_le_bytes(header))
}
