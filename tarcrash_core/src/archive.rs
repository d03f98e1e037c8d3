use crate::header::{BLOCK_SIZE, TarHeader};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Number of all-zero blocks closing a well-formed archive.
pub const END_OF_ARCHIVE_BLOCKS: usize = 2;

/// Failures while producing an archive. Any of them skips the current case.
#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("Failed to create archive at {path:?}: {source}")]
    Create {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Failed to write archive at {path:?}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Truncated header requested but the archive has no entries")]
    NothingToTruncate,
}

/// One header block followed by exactly one content block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    pub header: TarHeader,
    pub content: [u8; BLOCK_SIZE],
}

impl ArchiveEntry {
    /// Builds an entry from arbitrary content: shorter content is zero-padded
    /// to one block, longer content is cut to one block.
    pub fn new(header: TarHeader, content: &[u8]) -> Self {
        let mut block = [0u8; BLOCK_SIZE];
        let n = content.len().min(BLOCK_SIZE);
        block[..n].copy_from_slice(&content[..n]);
        Self {
            header,
            content: block,
        }
    }
}

/// What follows the entries. Anything other than `EndOfArchive` deliberately
/// breaks the block-alignment of the output.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ArchiveTail {
    /// Two zero blocks.
    #[default]
    EndOfArchive,
    /// Two zero blocks followed by these bytes.
    TrailingGarbage(Vec<u8>),
    /// Only the first `n` bytes of the first header; no content, no end marker.
    TruncatedHeader(usize),
}

/// Streams the archive into `writer` and returns the number of bytes emitted.
fn emit<W: Write>(
    writer: &mut W,
    entries: &[ArchiveEntry],
    tail: &ArchiveTail,
) -> io::Result<u64> {
    if let ArchiveTail::TruncatedHeader(len) = tail {
        let Some(first) = entries.first() else {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "truncated header requested for an empty archive",
            ));
        };
        let len = (*len).min(BLOCK_SIZE);
        writer.write_all(&first.header.as_bytes()[..len])?;
        return Ok(len as u64);
    }

    let mut written = 0u64;
    for entry in entries {
        writer.write_all(entry.header.as_bytes())?;
        writer.write_all(&entry.content)?;
        written += (2 * BLOCK_SIZE) as u64;
    }
    let empty_block = [0u8; BLOCK_SIZE];
    for _ in 0..END_OF_ARCHIVE_BLOCKS {
        writer.write_all(&empty_block)?;
        written += BLOCK_SIZE as u64;
    }
    if let ArchiveTail::TrailingGarbage(garbage) = tail {
        writer.write_all(garbage)?;
        written += garbage.len() as u64;
    }
    Ok(written)
}

/// Renders the archive in memory.
pub fn archive_bytes(entries: &[ArchiveEntry], tail: &ArchiveTail) -> Result<Vec<u8>, ArchiveError> {
    check_truncation(entries, tail)?;
    let mut out = Vec::with_capacity((entries.len() * 2 + END_OF_ARCHIVE_BLOCKS) * BLOCK_SIZE);
    emit(&mut out, entries, tail).map_err(|source| ArchiveError::Write {
        path: PathBuf::from("<memory>"),
        source,
    })?;
    Ok(out)
}

/// Creates (or truncates) `path` and writes the archive to it. The file is
/// flushed and closed before this returns `Ok`.
pub fn write_archive(
    path: &Path,
    entries: &[ArchiveEntry],
    tail: &ArchiveTail,
) -> Result<u64, ArchiveError> {
    check_truncation(entries, tail)?;

    let file = File::create(path).map_err(|source| ArchiveError::Create {
        path: path.to_path_buf(),
        source,
    })?;
    let write_err = |source: io::Error| ArchiveError::Write {
        path: path.to_path_buf(),
        source,
    };

    let mut writer = BufWriter::new(file);
    let written = emit(&mut writer, entries, tail).map_err(write_err)?;
    let file = writer
        .into_inner()
        .map_err(|e| write_err(e.into_error()))?;
    drop(file);
    Ok(written)
}

fn check_truncation(entries: &[ArchiveEntry], tail: &ArchiveTail) -> Result<(), ArchiveError> {
    if matches!(tail, ArchiveTail::TruncatedHeader(_)) && entries.is_empty() {
        return Err(ArchiveError::NothingToTruncate);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::{ChecksumWidth, HeaderField};

    fn entry(name: &[u8]) -> ArchiveEntry {
        let mut header = TarHeader::new();
        header.set_field(HeaderField::Name, name);
        header.set_typeflag(b'0');
        header.update_checksum(ChecksumWidth::SixDigit);
        ArchiveEntry::new(header, b"hello")
    }

    #[test]
    fn well_formed_archive_is_block_aligned_and_zero_terminated() {
        let entries = vec![entry(b"a.txt"), entry(b"b.txt")];
        let bytes = archive_bytes(&entries, &ArchiveTail::EndOfArchive).unwrap();

        assert_eq!(bytes.len() % BLOCK_SIZE, 0);
        assert_eq!(bytes.len(), 6 * BLOCK_SIZE);
        assert!(bytes[bytes.len() - 2 * BLOCK_SIZE..].iter().all(|&b| b == 0));
    }

    #[test]
    fn entries_are_written_header_then_content_in_order() {
        let entries = vec![entry(b"a.txt"), entry(b"b.txt")];
        let bytes = archive_bytes(&entries, &ArchiveTail::EndOfArchive).unwrap();

        assert_eq!(&bytes[..BLOCK_SIZE], entries[0].header.as_bytes());
        assert_eq!(&bytes[BLOCK_SIZE..BLOCK_SIZE + 5], b"hello");
        assert!(bytes[BLOCK_SIZE + 5..2 * BLOCK_SIZE].iter().all(|&b| b == 0));
        assert_eq!(&bytes[2 * BLOCK_SIZE..3 * BLOCK_SIZE], entries[1].header.as_bytes());
    }

    #[test]
    fn trailing_garbage_follows_end_marker() {
        let garbage = vec![0xAB; 700];
        let bytes =
            archive_bytes(&[entry(b"a.txt")], &ArchiveTail::TrailingGarbage(garbage.clone()))
                .unwrap();

        assert_eq!(bytes.len(), 4 * BLOCK_SIZE + garbage.len());
        assert!(bytes[2 * BLOCK_SIZE..4 * BLOCK_SIZE].iter().all(|&b| b == 0));
        assert_eq!(&bytes[4 * BLOCK_SIZE..], garbage.as_slice());
    }

    #[test]
    fn truncated_header_writes_only_a_prefix() {
        let e = entry(b"a.txt");
        let bytes = archive_bytes(
            std::slice::from_ref(&e),
            &ArchiveTail::TruncatedHeader(BLOCK_SIZE / 2),
        )
        .unwrap();
        assert_eq!(bytes.as_slice(), &e.header.as_bytes()[..BLOCK_SIZE / 2]);
    }

    #[test]
    fn truncating_an_empty_archive_is_rejected() {
        let result = archive_bytes(&[], &ArchiveTail::TruncatedHeader(10));
        assert!(matches!(result, Err(ArchiveError::NothingToTruncate)));
    }

    #[test]
    fn write_archive_matches_in_memory_rendering() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("archive.tar");
        let entries = vec![entry(b"a.txt")];

        let written = write_archive(&path, &entries, &ArchiveTail::EndOfArchive).unwrap();
        let on_disk = std::fs::read(&path).unwrap();

        assert_eq!(written, on_disk.len() as u64);
        assert_eq!(on_disk, archive_bytes(&entries, &ArchiveTail::EndOfArchive).unwrap());
    }

    #[test]
    fn write_archive_overwrites_previous_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("archive.tar");
        std::fs::write(&path, vec![0xEE; 10 * BLOCK_SIZE]).unwrap();

        write_archive(&path, &[entry(b"a.txt")], &ArchiveTail::EndOfArchive).unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 4 * BLOCK_SIZE as u64);
    }

    #[test]
    fn write_archive_reports_uncreatable_destination() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing_dir").join("archive.tar");

        let result = write_archive(&path, &[entry(b"a.txt")], &ArchiveTail::EndOfArchive);
        assert!(matches!(result, Err(ArchiveError::Create { .. })));
    }
}
