use crate::archive::{ArchiveEntry, ArchiveTail};
use crate::header::{
    BLOCK_SIZE, ChecksumWidth, HeaderField, TarHeader, USTAR_MAGIC, USTAR_VERSION,
};
use rand_chacha::ChaCha8Rng;
use rand_core::{RngCore, SeedableRng};
use std::fmt;
use std::ops::RangeInclusive;

/// Name used by every case except the non-ASCII sweep.
pub const BASELINE_NAME: &[u8] = b"file.txt";
/// Size advertised by the baseline header, independent of the real content length.
pub const BASELINE_SIZE: u64 = 10280;
/// Byte repeated through the baseline content block.
pub const FILLER_BYTE: u8 = b'E';
/// A typeflag no tar implementation assigns a meaning to.
pub const INVALID_TYPEFLAG: u8 = b'Z';
/// Hard link typeflag. The case using it leaves linkname empty.
pub const HARD_LINK_TYPEFLAG: u8 = b'1';
/// Largest value an 11-digit, NUL-terminated size field can hold.
pub const MAX_SIZE_FIELD: u64 = 0o77_777_777_777;
/// Deliberately not a multiple of the block size.
pub const TRAILING_GARBAGE_LEN: usize = 700;
pub const TRUNCATED_HEADER_LEN: usize = BLOCK_SIZE / 2;
/// Byte values substituted into `file?.txt` by the name sweep.
pub const SWEEP_RANGE: RangeInclusive<u8> = 128..=255;

const LINKNAME_FILL: u8 = b'L';
const FIXED_CASES: usize = 7;
/// Total number of cases produced by one pass of the generator.
pub const TOTAL_CASES: usize = FIXED_CASES + 128;

const PADDING_STREAM: u64 = 1;
const GARBAGE_STREAM: u64 = 2;

/// The structural corruption a case exercises.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MutationKind {
    InvalidTypeflag,
    OversizedButValidSize,
    CorruptedPadding,
    CorruptedLinkname,
    TrailingGarbageAfterEof,
    TruncatedHeader,
    /// A hard link entry with no link target, carrying regular-file content.
    HardLinkWithoutTarget,
    NonAsciiNameSweep(u8),
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MutationKind::InvalidTypeflag => write!(f, "invalid-typeflag"),
            MutationKind::OversizedButValidSize => write!(f, "oversized-size"),
            MutationKind::CorruptedPadding => write!(f, "corrupted-padding"),
            MutationKind::CorruptedLinkname => write!(f, "corrupted-linkname"),
            MutationKind::TrailingGarbageAfterEof => write!(f, "trailing-garbage"),
            MutationKind::TruncatedHeader => write!(f, "truncated-header"),
            MutationKind::HardLinkWithoutTarget => write!(f, "hard-link-without-target"),
            MutationKind::NonAsciiNameSweep(byte) => write!(f, "non-ascii-name-{byte:#04x}"),
        }
    }
}

/// One malformed archive, ready for the archive writer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationCase {
    pub kind: MutationKind,
    /// Header and content pairs, already checksummed.
    pub entries: Vec<ArchiveEntry>,
    /// How the archive ends; anything but `EndOfArchive` breaks alignment on purpose.
    pub tail: ArchiveTail,
}

/// Knobs that change case bytes without changing the case list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GeneratorSettings {
    pub checksum_width: ChecksumWidth,
    /// Seeds the byte stream used for padding corruption and trailing garbage.
    pub seed: u64,
}

/// The well-formed header every case is derived from (checksum not yet computed).
pub fn baseline_header() -> TarHeader {
    let mut header = TarHeader::new();
    header.set_field(HeaderField::Name, BASELINE_NAME);
    header.set_field(HeaderField::Mode, b"0644");
    header.set_field(HeaderField::Uid, b"01750");
    header.set_field(HeaderField::Gid, b"01750");
    header.set_octal(HeaderField::Size, BASELINE_SIZE);
    header.set_typeflag(b'0');
    header.set_field(HeaderField::Magic, USTAR_MAGIC);
    header.set_field(HeaderField::Version, USTAR_VERSION);
    header.set_field(HeaderField::Uname, b"me");
    header.set_field(HeaderField::Gname, b"me");
    header
}

/// 511 filler bytes and a closing NUL.
pub fn baseline_content() -> [u8; BLOCK_SIZE] {
    let mut content = [FILLER_BYTE; BLOCK_SIZE];
    content[BLOCK_SIZE - 1] = 0;
    content
}

/// Deterministic non-zero bytes; the same seed and stream always give the same output.
fn noise(seed: u64, stream: u64, len: usize) -> Vec<u8> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    rng.set_stream(stream);
    let mut bytes = vec![0u8; len];
    rng.fill_bytes(&mut bytes);
    for b in bytes.iter_mut().filter(|b| **b == 0) {
        *b = 0xFF;
    }
    bytes
}

/// Walks the fixed list of malformed-tar scenarios in order.
///
/// The sequence is finite ([`TOTAL_CASES`] items), cases are built lazily on
/// demand, and [`MutationCaseGenerator::reset`] restarts it from the first case
/// with identical output.
#[derive(Debug, Clone)]
pub struct MutationCaseGenerator {
    settings: GeneratorSettings,
    position: usize,
}

impl MutationCaseGenerator {
    pub fn new(settings: GeneratorSettings) -> Self {
        Self {
            settings,
            position: 0,
        }
    }

    /// Rewinds to the first case.
    pub fn reset(&mut self) {
        self.position = 0;
    }

    /// Builds the case at `index` without advancing the generator.
    pub fn case_at(&self, index: usize) -> Option<MutationCase> {
        let kind = match index {
            0 => MutationKind::InvalidTypeflag,
            1 => MutationKind::OversizedButValidSize,
            2 => MutationKind::CorruptedPadding,
            3 => MutationKind::CorruptedLinkname,
            4 => MutationKind::TrailingGarbageAfterEof,
            5 => MutationKind::TruncatedHeader,
            6 => MutationKind::HardLinkWithoutTarget,
            i if i < TOTAL_CASES => {
                MutationKind::NonAsciiNameSweep(*SWEEP_RANGE.start() + (i - FIXED_CASES) as u8)
            }
            _ => return None,
        };
        Some(self.build(kind))
    }

    fn build(&self, kind: MutationKind) -> MutationCase {
        let mut header = baseline_header();
        let mut tail = ArchiveTail::EndOfArchive;

        match kind {
            MutationKind::InvalidTypeflag => header.set_typeflag(INVALID_TYPEFLAG),
            MutationKind::OversizedButValidSize => {
                header.set_octal(HeaderField::Size, MAX_SIZE_FIELD)
            }
            MutationKind::CorruptedPadding => {
                let bytes = noise(self.settings.seed, PADDING_STREAM, HeaderField::Padding.size());
                header.set_field(HeaderField::Padding, &bytes);
            }
            MutationKind::CorruptedLinkname => {
                header.fill_field(HeaderField::Linkname, LINKNAME_FILL)
            }
            MutationKind::TrailingGarbageAfterEof => {
                tail = ArchiveTail::TrailingGarbage(noise(
                    self.settings.seed,
                    GARBAGE_STREAM,
                    TRAILING_GARBAGE_LEN,
                ));
            }
            MutationKind::TruncatedHeader => {
                tail = ArchiveTail::TruncatedHeader(TRUNCATED_HEADER_LEN);
            }
            MutationKind::HardLinkWithoutTarget => header.set_typeflag(HARD_LINK_TYPEFLAG),
            MutationKind::NonAsciiNameSweep(byte) => {
                let mut name = b"file".to_vec();
                name.push(byte);
                name.extend_from_slice(b".txt");
                header.set_field(HeaderField::Name, &name);
            }
        }

        header.update_checksum(self.settings.checksum_width);
        MutationCase {
            kind,
            entries: vec![ArchiveEntry {
                header,
                content: baseline_content(),
            }],
            tail,
        }
    }
}

impl Iterator for MutationCaseGenerator {
    type Item = MutationCase;

    fn next(&mut self) -> Option<MutationCase> {
        let case = self.case_at(self.position)?;
        self.position += 1;
        Some(case)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = TOTAL_CASES.saturating_sub(self.position);
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for MutationCaseGenerator {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::archive_bytes;
    use std::collections::HashSet;

    fn generator() -> MutationCaseGenerator {
        MutationCaseGenerator::new(GeneratorSettings::default())
    }

    fn only_header(case: &MutationCase) -> &TarHeader {
        assert_eq!(case.entries.len(), 1);
        &case.entries[0].header
    }

    #[test]
    fn cases_come_in_fixed_order() {
        let kinds: Vec<MutationKind> = generator().take(8).map(|c| c.kind).collect();
        assert_eq!(
            kinds,
            vec![
                MutationKind::InvalidTypeflag,
                MutationKind::OversizedButValidSize,
                MutationKind::CorruptedPadding,
                MutationKind::CorruptedLinkname,
                MutationKind::TrailingGarbageAfterEof,
                MutationKind::TruncatedHeader,
                MutationKind::HardLinkWithoutTarget,
                MutationKind::NonAsciiNameSweep(128),
            ]
        );
        assert_eq!(generator().count(), TOTAL_CASES);
        assert_eq!(generator().len(), TOTAL_CASES);
        assert_eq!(TOTAL_CASES, 135);
    }

    #[test]
    fn baseline_content_is_filler_then_nul() {
        let content = baseline_content();
        assert!(content[..BLOCK_SIZE - 1].iter().all(|&b| b == FILLER_BYTE));
        assert_eq!(content[BLOCK_SIZE - 1], 0);
    }

    #[test]
    fn every_case_header_is_checksummed() {
        for case in generator() {
            let header = only_header(&case);
            assert_eq!(
                header.stored_checksum().unwrap(),
                header.compute_checksum(),
                "bad checksum for {}",
                case.kind
            );
        }
    }

    #[test]
    fn invalid_typeflag_case_uses_z() {
        let case = generator().case_at(0).unwrap();
        assert_eq!(case.kind, MutationKind::InvalidTypeflag);
        assert_eq!(only_header(&case).typeflag(), b'Z');
        assert_eq!(only_header(&case).name(), BASELINE_NAME);
    }

    #[test]
    fn oversized_case_advertises_maximum_size() {
        let case = generator().case_at(1).unwrap();
        let header = only_header(&case);
        assert_eq!(header.octal(HeaderField::Size).unwrap(), MAX_SIZE_FIELD);
        assert_eq!(header.field(HeaderField::Size), b"77777777777\0");
    }

    #[test]
    fn corrupted_padding_is_entirely_non_zero() {
        let case = generator().case_at(2).unwrap();
        let padding = only_header(&case).field(HeaderField::Padding);
        assert!(padding.iter().all(|&b| b != 0));
        assert_eq!(
            baseline_header().field(HeaderField::Padding),
            &[0u8; 12][..],
            "baseline padding must stay zero"
        );
    }

    #[test]
    fn corrupted_linkname_is_filled_on_a_regular_file() {
        let case = generator().case_at(3).unwrap();
        let header = only_header(&case);
        assert_eq!(header.typeflag(), b'0');
        assert!(header.field(HeaderField::Linkname).iter().all(|&b| b == b'L'));
    }

    #[test]
    fn hard_link_case_has_no_link_target() {
        let case = generator().case_at(6).unwrap();
        assert_eq!(case.kind, MutationKind::HardLinkWithoutTarget);
        assert_eq!(case.tail, ArchiveTail::EndOfArchive);

        let header = only_header(&case);
        assert_eq!(header.typeflag(), b'1');
        assert_eq!(header.name(), BASELINE_NAME);
        assert!(header.field(HeaderField::Linkname).iter().all(|&b| b == 0));
        assert_eq!(header.octal(HeaderField::Size).unwrap(), BASELINE_SIZE);
        assert_eq!(case.entries[0].content, baseline_content());
    }

    #[test]
    fn structural_cases_break_block_alignment() {
        let garbage = generator().case_at(4).unwrap();
        let bytes = archive_bytes(&garbage.entries, &garbage.tail).unwrap();
        assert_eq!(bytes.len(), 4 * BLOCK_SIZE + TRAILING_GARBAGE_LEN);
        assert_ne!(bytes.len() % BLOCK_SIZE, 0);

        let truncated = generator().case_at(5).unwrap();
        let bytes = archive_bytes(&truncated.entries, &truncated.tail).unwrap();
        assert_eq!(bytes.len(), TRUNCATED_HEADER_LEN);
    }

    #[test]
    fn well_formed_cases_produce_aligned_archives() {
        for case in generator().filter(|c| matches!(c.tail, ArchiveTail::EndOfArchive)) {
            let bytes = archive_bytes(&case.entries, &case.tail).unwrap();
            assert_eq!(bytes.len() % BLOCK_SIZE, 0, "{} misaligned", case.kind);
            assert!(bytes[bytes.len() - 2 * BLOCK_SIZE..].iter().all(|&b| b == 0));
        }
    }

    #[test]
    fn name_sweep_covers_each_high_byte_once() {
        let sweep: Vec<MutationCase> = generator().skip(FIXED_CASES).collect();
        assert_eq!(sweep.len(), 128);

        let names: HashSet<Vec<u8>> = sweep
            .iter()
            .map(|c| only_header(c).name().to_vec())
            .collect();
        assert_eq!(names.len(), 128);

        for (case, byte) in sweep.iter().zip(SWEEP_RANGE) {
            assert_eq!(case.kind, MutationKind::NonAsciiNameSweep(byte));
            let expected = [b"file".as_slice(), &[byte], b".txt"].concat();
            assert_eq!(only_header(case).name(), expected.as_slice());
        }
    }

    #[test]
    fn generator_is_restartable_and_deterministic() {
        let mut generator = generator();
        let first_pass: Vec<MutationCase> = generator.by_ref().collect();
        assert!(generator.next().is_none());

        generator.reset();
        let second_pass: Vec<MutationCase> = generator.collect();
        assert_eq!(first_pass, second_pass);
    }

    #[test]
    fn seed_changes_noise_but_not_structure() {
        let a = MutationCaseGenerator::new(GeneratorSettings {
            seed: 1,
            ..Default::default()
        });
        let b = MutationCaseGenerator::new(GeneratorSettings {
            seed: 2,
            ..Default::default()
        });
        assert_ne!(a.case_at(4).unwrap().tail, b.case_at(4).unwrap().tail);
        assert_eq!(a.case_at(0), b.case_at(0));
    }

    #[test]
    fn seven_digit_width_is_applied_to_every_case() {
        let generator = MutationCaseGenerator::new(GeneratorSettings {
            checksum_width: ChecksumWidth::SevenDigit,
            ..Default::default()
        });
        for case in generator {
            let field = only_header(&case).field(HeaderField::Chksum);
            assert_eq!(field[7], b' ');
            assert!(field[..7].iter().all(|b| b.is_ascii_digit()));
        }
    }
}
