//! Source archive to OCI layer conversion.
//!
//! Converts a zip archive (read from disk, since zip needs random access)
//! into a single gzipped tar layer, recording the diff ID (SHA256 of the
//! uncompressed tar) needed for the image configuration.

use std::io::{Read, Write};
use std::path::Path;

use flate2::write::GzEncoder;
use flate2::Compression;
use sha2::{Digest, Sha256};

use crate::error::{CourierError, Result};

/// A gzipped tar layer built from a source archive.
#[derive(Debug, Clone)]
pub(crate) struct SourceLayer {
    /// Gzipped tar bytes, ready to upload as a layer blob.
    pub data: Vec<u8>,
    /// `sha256:<hex>` digest of the uncompressed tar.
    pub diff_id: String,
}

/// Convert the zip archive at `path` into a gzipped tar layer.
pub(crate) fn layer_from_zip(path: &Path) -> Result<SourceLayer> {
    let file = std::fs::File::open(path).map_err(|e| {
        CourierError::LayerError(format!("failed to open archive {}: {}", path.display(), e))
    })?;
    let mut archive = zip::ZipArchive::new(file).map_err(|e| {
        CourierError::LayerError(format!(
            "failed to read zip archive {}: {}",
            path.display(),
            e
        ))
    })?;

    let mut builder = tar::Builder::new(Vec::new());
    for index in 0..archive.len() {
        let mut entry = archive.by_index(index).map_err(|e| {
            CourierError::LayerError(format!("failed to read zip entry {}: {}", index, e))
        })?;

        // Rejects entries escaping the archive root ("../", absolute paths).
        let name = entry.enclosed_name().ok_or_else(|| {
            CourierError::LayerError(format!("unsafe path '{}' in zip archive", entry.name()))
        })?;

        if entry.is_dir() {
            let mut header = tar::Header::new_gnu();
            header.set_entry_type(tar::EntryType::Directory);
            header.set_size(0);
            header.set_mode(entry.unix_mode().unwrap_or(0o755));
            header.set_cksum();
            builder
                .append_data(&mut header, &name, std::io::empty())
                .map_err(|e| {
                    CourierError::LayerError(format!(
                        "failed to add directory {} to layer: {}",
                        name.display(),
                        e
                    ))
                })?;
        } else {
            let mut contents = Vec::with_capacity(entry.size() as usize);
            entry.read_to_end(&mut contents).map_err(|e| {
                CourierError::LayerError(format!(
                    "failed to read zip entry {}: {}",
                    name.display(),
                    e
                ))
            })?;

            let mut header = tar::Header::new_gnu();
            header.set_size(contents.len() as u64);
            header.set_mode(entry.unix_mode().unwrap_or(0o644));
            header.set_cksum();
            builder
                .append_data(&mut header, &name, contents.as_slice())
                .map_err(|e| {
                    CourierError::LayerError(format!(
                        "failed to add file {} to layer: {}",
                        name.display(),
                        e
                    ))
                })?;
        }
    }

    let tar_bytes = builder
        .into_inner()
        .map_err(|e| CourierError::LayerError(format!("failed to finalize layer: {}", e)))?;
    let diff_id = format!("sha256:{}", sha256_bytes(&tar_bytes));

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(&tar_bytes)
        .and_then(|_| encoder.finish())
        .map(|data| SourceLayer { data, diff_id })
        .map_err(|e| CourierError::LayerError(format!("failed to compress layer: {}", e)))
}

/// Compute the SHA256 digest of raw bytes as a hex string.
pub(crate) fn sha256_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;
    use tempfile::TempDir;
    use zip::write::SimpleFileOptions;

    fn write_zip(dir: &TempDir) -> std::path::PathBuf {
        let path = dir.path().join("source.zip");
        let file = std::fs::File::create(&path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        let options = SimpleFileOptions::default();

        writer.add_directory("src/", options).unwrap();
        writer.start_file("src/main.rs", options).unwrap();
        writer.write_all(b"fn main() {}").unwrap();
        writer.start_file("README.md", options).unwrap();
        writer.write_all(b"# app").unwrap();
        writer.finish().unwrap();

        path
    }

    #[test]
    fn test_layer_from_zip_contents() {
        let dir = TempDir::new().unwrap();
        let path = write_zip(&dir);

        let layer = layer_from_zip(&path).unwrap();
        assert!(!layer.data.is_empty());

        // Unpack the layer and verify the tar contents.
        let decoder = flate2::read::GzDecoder::new(layer.data.as_slice());
        let mut archive = tar::Archive::new(decoder);
        let mut files = Vec::new();
        for entry in archive.entries().unwrap() {
            let mut entry = entry.unwrap();
            let entry_path = entry.path().unwrap().to_string_lossy().to_string();
            let mut contents = String::new();
            entry.read_to_string(&mut contents).unwrap();
            files.push((entry_path, contents));
        }

        assert!(files.iter().any(|(p, _)| p.starts_with("src")));
        assert!(files
            .iter()
            .any(|(p, c)| p.contains("main.rs") && c == "fn main() {}"));
        assert!(files.iter().any(|(p, c)| p == "README.md" && c == "# app"));
    }

    #[test]
    fn test_layer_from_zip_diff_id_matches_tar() {
        let dir = TempDir::new().unwrap();
        let path = write_zip(&dir);

        let layer = layer_from_zip(&path).unwrap();

        let mut decoder = flate2::read::GzDecoder::new(layer.data.as_slice());
        let mut tar_bytes = Vec::new();
        decoder.read_to_end(&mut tar_bytes).unwrap();

        assert_eq!(layer.diff_id, format!("sha256:{}", sha256_bytes(&tar_bytes)));
    }

    #[test]
    fn test_layer_from_zip_empty_archive() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("empty.zip");
        let file = std::fs::File::create(&path).unwrap();
        let writer = zip::ZipWriter::new(file);
        writer.finish().unwrap();

        let layer = layer_from_zip(&path).unwrap();
        assert!(layer.diff_id.starts_with("sha256:"));
        assert_eq!(layer.diff_id.len(), "sha256:".len() + 64);
    }

    #[test]
    fn test_layer_from_zip_not_a_zip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("not.zip");
        std::fs::write(&path, "plain text").unwrap();

        let result = layer_from_zip(&path);
        assert!(matches!(result, Err(CourierError::LayerError(_))));
    }

    #[test]
    fn test_layer_from_zip_missing_file() {
        let result = layer_from_zip(Path::new("/nonexistent/source.zip"));
        assert!(result.is_err());
    }

    #[test]
    fn test_sha256_bytes() {
        assert_eq!(
            sha256_bytes(b"hello"),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }
}
