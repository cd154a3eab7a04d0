//! Unpacking of gzip-compressed raw files.

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use tracing::debug;

use crate::{ReaderError, Result};

/// Whether the file needs unpacking before it can be decoded.
pub fn is_compressed(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some(ext) if ext.eq_ignore_ascii_case("gz")
    )
}

/// Decompress `path` next to itself, stripping the `.gz` suffix.
///
/// Returns the path of the decompressed file. Re-unpacking is cheap and
/// idempotent: an existing output file is reused.
pub fn unpack(path: &Path) -> Result<PathBuf> {
    let output = path.with_extension("");
    if output.exists() {
        return Ok(output);
    }

    let input = File::open(path)?;
    let mut decoder = GzDecoder::new(input);
    let mut out = File::create(&output)?;
    io::copy(&mut decoder, &mut out).map_err(|e| ReaderError::Decode {
        path: path.to_string_lossy().into_owned(),
        reason: e.to_string(),
    })?;

    debug!(path = %output.display(), "unpacked compressed file");
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    #[test]
    fn test_is_compressed() {
        assert!(is_compressed(Path::new("rfe2004_02-dk1.tif.gz")));
        assert!(!is_compressed(Path::new("rfe2004_02-dk1.tif")));
    }

    #[test]
    fn test_unpack_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let gz_path = dir.path().join("data.txt.gz");

        let file = File::create(&gz_path).unwrap();
        let mut encoder = GzEncoder::new(file, Compression::default());
        encoder.write_all(b"payload").unwrap();
        encoder.finish().unwrap();

        let out = unpack(&gz_path).unwrap();
        assert_eq!(out, dir.path().join("data.txt"));
        assert_eq!(std::fs::read(&out).unwrap(), b"payload");

        // Second call reuses the existing output.
        let again = unpack(&gz_path).unwrap();
        assert_eq!(again, out);
    }
}
