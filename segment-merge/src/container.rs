//! The "smoosh" container writer: concatenates named byte
//! blobs into a series of bounded-size physical files plus a directory
//! manifest, with a single commit point at `close()`. Follows
//! `fff-poc::encoder::container`'s multi-file chunk writer, which uses the
//! same bound-a-physical-file / spill-to-a-new-one shape.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use segment_core::errors::{Error, Result};

use crate::checksum::{create_checksum, Checksum, ChecksumType};

/// Where a named blob landed: which physical file, its byte range within
/// it, and the checksum of its bytes (computed with the container's
/// `ChecksumType`), checked on every [`read_blob`] to catch silent
/// corruption of a committed container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlobLocation {
    pub file_index: u32,
    pub start_offset: u64,
    pub end_offset: u64,
    pub checksum: u64,
}

/// Writes the `NNNNN.smoosh` files plus `meta.smoosh` directory manifest.
/// Nothing is visible to a reader until [`ContainerWriter::close`] runs: a
/// reader needs `meta.smoosh` to interpret the physical files at all, so an
/// uncommitted container leaves no *committed* output even though its
/// partially written `NNNNN.smoosh` files remain on disk. Cleaning up the
/// output directory itself is the caller's responsibility, not this
/// writer's — it wipes `out_dir` before each top-level merge anyway.
pub struct ContainerWriter {
    out_dir: PathBuf,
    max_file_size: u64,
    checksum_type: ChecksumType,
    current_file: Option<(u32, File, u64)>,
    manifest: BTreeMap<String, BlobLocation>,
}

impl ContainerWriter {
    /// Checksums blobs with [`ChecksumType::XxHash`]; use
    /// [`ContainerWriter::new_with_checksum`] to pick a different type.
    pub fn new(out_dir: impl Into<PathBuf>, max_file_size: u64) -> Result<Self> {
        Self::new_with_checksum(out_dir, max_file_size, ChecksumType::XxHash)
    }

    pub fn new_with_checksum(
        out_dir: impl Into<PathBuf>,
        max_file_size: u64,
        checksum_type: ChecksumType,
    ) -> Result<Self> {
        let out_dir = out_dir.into();
        std::fs::create_dir_all(&out_dir)?;
        Ok(Self {
            out_dir,
            max_file_size,
            checksum_type,
            current_file: None,
            manifest: BTreeMap::new(),
        })
    }

    fn smoosh_path(&self, file_index: u32) -> PathBuf {
        self.out_dir.join(format!("{file_index:05}.smoosh"))
    }

    fn ensure_capacity(&mut self, size: u64) -> Result<(u32, &mut File, u64)> {
        let needs_new_file = match &self.current_file {
            None => true,
            Some((_, _, written)) => *written > 0 && *written + size > self.max_file_size,
        };
        if needs_new_file {
            let next_index = self.current_file.as_ref().map(|(i, _, _)| i + 1).unwrap_or(0);
            let path = self.smoosh_path(next_index);
            let file = File::create(path)?;
            self.current_file = Some((next_index, file, 0));
        }
        let (index, file, written) = self.current_file.as_mut().unwrap();
        Ok((*index, file, *written))
    }

    /// Writes `bytes` in full under `name`, spilling to a new physical file
    /// if it would overflow the current one. A blob larger than
    /// `max_file_size` still gets its own (oversized) file.
    pub fn add(&mut self, name: impl Into<String>, bytes: &[u8]) -> Result<()> {
        let mut checksum = create_checksum(self.checksum_type);
        checksum.update(bytes);
        let (file_index, file, written) = self.ensure_capacity(bytes.len() as u64)?;
        file.write_all(bytes)?;
        let start = written;
        let end = written + bytes.len() as u64;
        self.current_file.as_mut().unwrap().2 = end;
        self.manifest.insert(
            name.into(),
            BlobLocation {
                file_index,
                start_offset: start,
                end_offset: end,
                checksum: checksum.finalize(),
            },
        );
        Ok(())
    }

    /// Reserves `size` bytes under `name`; the caller writes exactly `size`
    /// bytes to the returned handle before any other container call.
    pub fn add_with_smooshed_writer(&mut self, name: impl Into<String>, size: u64) -> Result<SmooshedWriter<'_>> {
        let (file_index, _file, written) = self.ensure_capacity(size)?;
        let name = name.into();
        self.manifest.insert(
            name.clone(),
            BlobLocation {
                file_index,
                start_offset: written,
                end_offset: written + size,
                checksum: 0,
            },
        );
        let checksum = create_checksum(self.checksum_type);
        Ok(SmooshedWriter {
            container: self,
            name,
            remaining: size,
            checksum,
        })
    }

    /// Writes the directory manifest and seals the container. This is the
    /// single commit point: no blob is visible to a reader before this call
    /// returns successfully, since without `meta.smoosh` there is nothing
    /// to direct a reader to the blobs inside the physical files.
    pub fn close(self) -> Result<()> {
        let manifest_path = self.out_dir.join("meta.smoosh");
        let mut manifest_file = File::create(manifest_path)?;
        writeln!(manifest_file, "{}", self.manifest.len())?;
        for (name, loc) in &self.manifest {
            writeln!(
                manifest_file,
                "{}\t{}\t{}\t{}\t{}",
                name, loc.file_index, loc.start_offset, loc.end_offset, loc.checksum
            )?;
        }
        manifest_file.flush()?;
        Ok(())
    }

    pub fn manifest(&self) -> &BTreeMap<String, BlobLocation> {
        &self.manifest
    }
}

/// A reserved, fixed-size write handle into the current physical file.
/// Tracks a running checksum over every byte written and, once the
/// reservation is fully consumed, records it into the container's
/// manifest entry for this blob.
pub struct SmooshedWriter<'a> {
    container: &'a mut ContainerWriter,
    name: String,
    remaining: u64,
    checksum: Box<dyn Checksum>,
}

impl<'a> Write for SmooshedWriter<'a> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let (_, file, written) = self
            .container
            .current_file
            .as_mut()
            .expect("smooshed writer outlived its reservation's physical file");
        let n = file.write(buf)?;
        *written += n as u64;
        self.checksum.update(&buf[..n]);
        self.remaining = self.remaining.saturating_sub(n as u64);
        if self.remaining == 0 {
            if let Some(loc) = self.container.manifest.get_mut(&self.name) {
                loc.checksum = self.checksum.finalize();
            }
        }
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.container
            .current_file
            .as_mut()
            .expect("smooshed writer outlived its reservation's physical file")
            .1
            .flush()
    }
}

impl<'a> Drop for SmooshedWriter<'a> {
    fn drop(&mut self) {
        debug_assert_eq!(
            self.remaining, 0,
            "blob `{}` was reserved but not fully written",
            self.name
        );
    }
}

/// Reads back the directory manifest `close()` wrote, for tests and for the
/// multi-phase driver reopening an intermediate tier's output.
pub fn read_manifest(out_dir: &Path) -> Result<BTreeMap<String, BlobLocation>> {
    let manifest_path = out_dir.join("meta.smoosh");
    let contents = std::fs::read_to_string(manifest_path)?;
    let mut lines = contents.lines();
    let count: usize = lines
        .next()
        .and_then(|l| l.parse().ok())
        .ok_or_else(|| Error::ContainerIo("meta.smoosh is missing its entry count".to_string()))?;
    let mut manifest = BTreeMap::new();
    for _ in 0..count {
        let line = lines
            .next()
            .ok_or_else(|| Error::ContainerIo("meta.smoosh truncated".to_string()))?;
        let mut parts = line.split('\t');
        let name = parts
            .next()
            .ok_or_else(|| Error::ContainerIo("meta.smoosh entry missing name".to_string()))?;
        let file_index: u32 = parts
            .next()
            .and_then(|v| v.parse().ok())
            .ok_or_else(|| Error::ContainerIo("meta.smoosh entry missing file index".to_string()))?;
        let start_offset: u64 = parts
            .next()
            .and_then(|v| v.parse().ok())
            .ok_or_else(|| Error::ContainerIo("meta.smoosh entry missing start offset".to_string()))?;
        let end_offset: u64 = parts
            .next()
            .and_then(|v| v.parse().ok())
            .ok_or_else(|| Error::ContainerIo("meta.smoosh entry missing end offset".to_string()))?;
        let checksum: u64 = parts
            .next()
            .and_then(|v| v.parse().ok())
            .ok_or_else(|| Error::ContainerIo("meta.smoosh entry missing checksum".to_string()))?;
        manifest.insert(
            name.to_string(),
            BlobLocation {
                file_index,
                start_offset,
                end_offset,
                checksum,
            },
        );
    }
    Ok(manifest)
}

/// Reads a previously committed blob back out, for tests and for the
/// multi-phase driver reopening an intermediate tier's output. Verifies
/// the blob's bytes against the checksum `close()` recorded for it and
/// fails with [`Error::ContainerIo`] on a mismatch, catching silent
/// corruption of a committed container.
pub fn read_blob(out_dir: &Path, location: &BlobLocation) -> Result<Vec<u8>> {
    let path = out_dir.join(format!("{:05}.smoosh", location.file_index));
    let mut file = File::open(path)?;
    file.seek(SeekFrom::Start(location.start_offset))?;
    let len = (location.end_offset - location.start_offset) as usize;
    let mut buf = vec![0u8; len];
    file.read_exact(&mut buf)?;

    let mut checksum = create_checksum(ChecksumType::XxHash);
    checksum.update(&buf);
    let actual = checksum.finalize();
    if actual != location.checksum {
        return Err(Error::ContainerIo(format!(
            "checksum mismatch reading blob at file {:05}.smoosh[{}..{}]: expected {}, got {}",
            location.file_index, location.start_offset, location.end_offset, location.checksum, actual
        )));
    }
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_then_close_is_readable() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = ContainerWriter::new(dir.path(), 1024).unwrap();
        writer.add("a", b"hello").unwrap();
        writer.add("b", b"world!!").unwrap();
        let manifest = writer.manifest().clone();
        writer.close().unwrap();

        let a = read_blob(dir.path(), &manifest["a"]).unwrap();
        assert_eq!(a, b"hello");
        let b = read_blob(dir.path(), &manifest["b"]).unwrap();
        assert_eq!(b, b"world!!");
    }

    #[test]
    fn read_manifest_recovers_what_close_wrote() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = ContainerWriter::new(dir.path(), 1024).unwrap();
        writer.add("a", b"hello").unwrap();
        writer.close().unwrap();

        let manifest = read_manifest(dir.path()).unwrap();
        let bytes = read_blob(dir.path(), &manifest["a"]).unwrap();
        assert_eq!(bytes, b"hello");
    }

    #[test]
    fn blob_exceeding_max_file_size_gets_its_own_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = ContainerWriter::new(dir.path(), 4).unwrap();
        writer.add("small", b"ab").unwrap();
        writer.add("big", b"0123456789").unwrap();
        let manifest = writer.manifest().clone();
        assert_ne!(manifest["small"].file_index, manifest["big"].file_index);
        writer.close().unwrap();
    }

    #[test]
    fn uncommitted_writer_leaves_no_manifest_but_keeps_partial_files() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("segment");
        {
            let mut writer = ContainerWriter::new(&out, 1024).unwrap();
            writer.add("a", b"x").unwrap();
        }
        assert!(out.join("00000.smoosh").exists());
        assert!(!out.join("meta.smoosh").exists());
    }

    #[test]
    fn read_blob_detects_corrupted_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = ContainerWriter::new(dir.path(), 1024).unwrap();
        writer.add("a", b"hello").unwrap();
        let manifest = writer.manifest().clone();
        writer.close().unwrap();

        // Flip a byte in the committed physical file without touching the
        // manifest's recorded checksum.
        let smoosh_path = dir.path().join("00000.smoosh");
        let mut bytes = std::fs::read(&smoosh_path).unwrap();
        bytes[0] ^= 0xFF;
        std::fs::write(&smoosh_path, bytes).unwrap();

        let err = read_blob(dir.path(), &manifest["a"]).unwrap_err();
        assert!(matches!(err, Error::ContainerIo(_)));
    }

    #[test]
    fn smooshed_writer_records_checksum_of_streamed_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = ContainerWriter::new(dir.path(), 1024).unwrap();
        {
            let mut handle = writer.add_with_smooshed_writer("a", 5).unwrap();
            handle.write_all(b"he").unwrap();
            handle.write_all(b"llo").unwrap();
        }
        let manifest = writer.manifest().clone();
        writer.close().unwrap();

        let bytes = read_blob(dir.path(), &manifest["a"]).unwrap();
        assert_eq!(bytes, b"hello");
        assert_ne!(manifest["a"].checksum, 0);
    }
}
