//! On-disk dump artifacts
//!
//! Layout: 4 byte magic, little-endian format version, blake3 fingerprint of
//! the absolute source pathname, then the zstd-compressed bincode payload.
//! The payload type belongs to the caller; this module only frames it.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

pub const DUMP_MAGIC: [u8; 4] = *b"SCDX";
pub const DUMP_VERSION: u32 = 3;
const HEADER_LEN: usize = 4 + 4 + 32;

/// Why a dump could not be used
#[derive(Debug)]
pub enum DumpError {
    /// Not a dump, or written by a different format version
    Unrecognized,
    /// A valid dump, but of some other source file
    WrongSource,
    /// Payload failed to decompress or decode
    Decode(i32),
    Io(io::Error),
}

impl DumpError {
    /// Numeric code shown to the user
    pub fn code(&self) -> i32 {
        match self {
            DumpError::Unrecognized => -1,
            DumpError::WrongSource => 1,
            DumpError::Decode(code) => *code,
            DumpError::Io(_) => 0,
        }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, DumpError::Io(err) if err.kind() == io::ErrorKind::NotFound)
    }
}

impl fmt::Display for DumpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DumpError::Unrecognized => write!(f, "unrecognised dump format"),
            DumpError::WrongSource => write!(f, "wrong source file"),
            DumpError::Decode(code) => write!(f, "error code {}", code),
            DumpError::Io(err) => write!(f, "{}", err),
        }
    }
}

impl std::error::Error for DumpError {}

impl From<io::Error> for DumpError {
    fn from(err: io::Error) -> Self {
        DumpError::Io(err)
    }
}

/// Fingerprint tying a dump to the source it was compiled from
pub fn source_fingerprint(source: &Path) -> [u8; 32] {
    *blake3::hash(source.as_os_str().as_encoded_bytes()).as_bytes()
}

/// Sibling path a dump is written to before being renamed into place
pub fn temp_path(artifact: &Path) -> PathBuf {
    let mut name = artifact.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

/// Reads and writes framed dump files
#[derive(Debug, Clone, Copy)]
pub struct DumpCodec {
    /// Compression level (1-22)
    compression_level: i32,
}

impl Default for DumpCodec {
    fn default() -> Self {
        Self { compression_level: 3 }
    }
}

impl DumpCodec {
    pub fn new(compression_level: i32) -> Self {
        Self { compression_level }
    }

    pub fn encode<T: Serialize>(&self, source: &Path, payload: &T) -> Result<Vec<u8>, DumpError> {
        let serialized = bincode::serialize(payload)
            .map_err(|e| DumpError::Io(io::Error::new(io::ErrorKind::InvalidData, e)))?;
        let compressed = zstd::encode_all(&serialized[..], self.compression_level)?;

        let mut bytes = Vec::with_capacity(HEADER_LEN + compressed.len());
        bytes.extend_from_slice(&DUMP_MAGIC);
        bytes.extend_from_slice(&DUMP_VERSION.to_le_bytes());
        bytes.extend_from_slice(&source_fingerprint(source));
        bytes.extend_from_slice(&compressed);
        Ok(bytes)
    }

    pub fn decode<T: DeserializeOwned>(&self, source: &Path, bytes: &[u8]) -> Result<T, DumpError> {
        if bytes.len() < HEADER_LEN || bytes[..4] != DUMP_MAGIC {
            return Err(DumpError::Unrecognized);
        }
        let mut version = [0u8; 4];
        version.copy_from_slice(&bytes[4..8]);
        if u32::from_le_bytes(version) != DUMP_VERSION {
            return Err(DumpError::Unrecognized);
        }
        if bytes[8..HEADER_LEN] != source_fingerprint(source) {
            return Err(DumpError::WrongSource);
        }

        let decompressed = zstd::decode_all(&bytes[HEADER_LEN..]).map_err(|_| DumpError::Decode(2))?;
        bincode::deserialize(&decompressed).map_err(|_| DumpError::Decode(3))
    }

    /// Read and decode the dump at `artifact`, checking it belongs to `source`
    pub fn read<T: DeserializeOwned>(&self, artifact: &Path, source: &Path) -> Result<T, DumpError> {
        let mut file = fs::File::open(artifact)?;
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)?;
        self.decode(source, &bytes)
    }

    /// Write the dump through a temporary sibling renamed into place
    ///
    /// `staging` is set to the temporary path while it exists so that an
    /// interrupted caller knows what to unlink.
    pub fn write<T: Serialize>(
        &self,
        artifact: &Path,
        source: &Path,
        payload: &T,
        staging: &mut Option<PathBuf>,
    ) -> Result<(), DumpError> {
        let bytes = self.encode(source, payload)?;

        // Atomic write: write to temp file, then rename
        let temp = temp_path(artifact);
        *staging = Some(temp.clone());
        let mut file = fs::File::create(&temp)?;
        file.write_all(&bytes)?;
        file.sync_all()?;
        fs::rename(&temp, artifact)?;
        *staging = None;

        debug!(artifact = %artifact.display(), bytes = bytes.len(), "dump written");
        Ok(())
    }
}

/// Delete a file if it exists
pub fn remove_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(err) if err.kind() != io::ErrorKind::NotFound => Err(err),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::TempDir;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Payload {
        names: Vec<String>,
        flag: bool,
    }

    fn sample() -> Payload {
        Payload { names: vec!["a".into(), "b".into()], flag: true }
    }

    #[test]
    fn test_write_then_read() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("a.m");
        let artifact = dir.path().join("a.x");
        let codec = DumpCodec::default();
        let mut staging = None;

        codec.write(&artifact, &source, &sample(), &mut staging).unwrap();
        assert!(staging.is_none());
        assert!(!temp_path(&artifact).exists());

        let back: Payload = codec.read(&artifact, &source).unwrap();
        assert_eq!(back, sample());
    }

    #[test]
    fn test_wrong_source_detected() {
        let codec = DumpCodec::default();
        let bytes = codec.encode(Path::new("/w/a.m"), &sample()).unwrap();
        let err = codec.decode::<Payload>(Path::new("/w/b.m"), &bytes).unwrap_err();
        assert!(matches!(err, DumpError::WrongSource));
        assert_eq!(err.code(), 1);
    }

    #[test]
    fn test_garbage_is_unrecognized() {
        let codec = DumpCodec::default();
        let err = codec.decode::<Payload>(Path::new("/w/a.m"), b"not a dump at all").unwrap_err();
        assert!(matches!(err, DumpError::Unrecognized));
        assert_eq!(err.to_string(), "unrecognised dump format");
    }

    #[test]
    fn test_truncated_payload_fails_decode() {
        let codec = DumpCodec::default();
        let source = Path::new("/w/a.m");
        let bytes = codec.encode(source, &sample()).unwrap();
        let err = codec.decode::<Payload>(source, &bytes[..HEADER_LEN + 2]).unwrap_err();
        assert!(matches!(err, DumpError::Decode(_)));
    }

    #[test]
    fn test_missing_file() {
        let dir = TempDir::new().unwrap();
        let err = DumpCodec::default()
            .read::<Payload>(&dir.path().join("none.x"), &dir.path().join("none.m"))
            .unwrap_err();
        assert!(err.is_missing());
        remove_if_exists(&dir.path().join("none.x")).unwrap();
    }
}
