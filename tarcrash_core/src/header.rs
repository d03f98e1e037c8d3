//! Byte-exact encoding of the 512-byte ustar header block.
//!
//! Field offsets and sizes are fixed by the format. Every mutation case starts
//! from a [`TarHeader`] built here and is checksummed through [`checksum`]
//! before it reaches the archive writer.

use serde::Deserialize;
use std::fmt;
use std::ops::Range;
use thiserror::Error;

/// Size of every tar block: headers, content blocks and end-of-archive markers.
pub const BLOCK_SIZE: usize = 512;

/// `ustar` magic as written by the harness (NUL-terminated inside the 6-byte field).
pub const USTAR_MAGIC: &[u8] = b"ustar";
pub const USTAR_VERSION: &[u8] = b"00";

#[derive(Error, Debug, PartialEq, Eq)]
pub enum HeaderError {
    #[error("Header block must be {BLOCK_SIZE} bytes, got {0}")]
    WrongBlockLength(usize),
    #[error("Field {0:?} does not hold a valid octal number")]
    InvalidOctal(HeaderField),
}

/// The named regions of a header block, in on-disk order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HeaderField {
    Name,
    Mode,
    Uid,
    Gid,
    Size,
    Mtime,
    Chksum,
    Typeflag,
    Linkname,
    Magic,
    Version,
    Uname,
    Gname,
    Devmajor,
    Devminor,
    Prefix,
    Padding,
}

impl HeaderField {
    pub const ALL: [HeaderField; 17] = [
        HeaderField::Name,
        HeaderField::Mode,
        HeaderField::Uid,
        HeaderField::Gid,
        HeaderField::Size,
        HeaderField::Mtime,
        HeaderField::Chksum,
        HeaderField::Typeflag,
        HeaderField::Linkname,
        HeaderField::Magic,
        HeaderField::Version,
        HeaderField::Uname,
        HeaderField::Gname,
        HeaderField::Devmajor,
        HeaderField::Devminor,
        HeaderField::Prefix,
        HeaderField::Padding,
    ];

    pub const fn offset(self) -> usize {
        match self {
            HeaderField::Name => 0,
            HeaderField::Mode => 100,
            HeaderField::Uid => 108,
            HeaderField::Gid => 116,
            HeaderField::Size => 124,
            HeaderField::Mtime => 136,
            HeaderField::Chksum => 148,
            HeaderField::Typeflag => 156,
            HeaderField::Linkname => 157,
            HeaderField::Magic => 257,
            HeaderField::Version => 263,
            HeaderField::Uname => 265,
            HeaderField::Gname => 297,
            HeaderField::Devmajor => 329,
            HeaderField::Devminor => 337,
            HeaderField::Prefix => 345,
            HeaderField::Padding => 500,
        }
    }

    pub const fn size(self) -> usize {
        match self {
            HeaderField::Name | HeaderField::Linkname => 100,
            HeaderField::Mode
            | HeaderField::Uid
            | HeaderField::Gid
            | HeaderField::Chksum
            | HeaderField::Devmajor
            | HeaderField::Devminor => 8,
            HeaderField::Size | HeaderField::Mtime | HeaderField::Padding => 12,
            HeaderField::Typeflag => 1,
            HeaderField::Magic => 6,
            HeaderField::Version => 2,
            HeaderField::Uname | HeaderField::Gname => 32,
            HeaderField::Prefix => 155,
        }
    }

    pub const fn range(self) -> Range<usize> {
        self.offset()..self.offset() + self.size()
    }
}

/// How the checksum sum is rendered into the 8-byte `chksum` field.
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ChecksumWidth {
    /// Classic `NNNNNN\0 ` form. Sums wider than six octal digits keep only
    /// their low six digits, which produces a mismatching checksum on purpose.
    #[default]
    SixDigit,
    /// `NNNNNNN ` form: seven digits then a space, no NUL.
    SevenDigit,
}

/// Renders `sum` into the canonical 8-byte checksum field for `width`.
pub fn format_checksum(sum: u32, width: ChecksumWidth) -> [u8; 8] {
    let mut field = [0u8; 8];
    match width {
        ChecksumWidth::SixDigit => {
            let digits = format!("{:06o}", sum % 0o1_000_000);
            field[..6].copy_from_slice(digits.as_bytes());
            field[6] = 0;
            field[7] = b' ';
        }
        ChecksumWidth::SevenDigit => {
            let digits = format!("{:07o}", sum % 0o10_000_000);
            field[..7].copy_from_slice(digits.as_bytes());
            field[7] = b' ';
        }
    }
    field
}

/// Sums the block as unsigned bytes with the checksum field read as eight
/// ASCII spaces, and returns the sum together with its encoded field.
///
/// The block itself is left untouched.
pub fn checksum(block: &[u8; BLOCK_SIZE], width: ChecksumWidth) -> (u32, [u8; 8]) {
    let chksum = HeaderField::Chksum.range();
    let sum: u32 = block
        .iter()
        .enumerate()
        .map(|(i, &b)| if chksum.contains(&i) { b' ' as u32 } else { b as u32 })
        .sum();
    (sum, format_checksum(sum, width))
}

/// A raw 512-byte header block with typed access to its fields.
///
/// All bytes start zeroed. Setters never touch bytes outside their field, so
/// mutation cases can overwrite any region (including the reserved padding)
/// without disturbing the rest of the layout.
#[derive(Clone, PartialEq, Eq)]
pub struct TarHeader {
    block: [u8; BLOCK_SIZE],
}

impl Default for TarHeader {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TarHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TarHeader")
            .field("name", &String::from_utf8_lossy(self.name()))
            .field("typeflag", &(self.typeflag() as char))
            .field("chksum", &String::from_utf8_lossy(self.field(HeaderField::Chksum)))
            .finish()
    }
}

impl TarHeader {
    pub fn new() -> Self {
        Self {
            block: [0u8; BLOCK_SIZE],
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, HeaderError> {
        let block: [u8; BLOCK_SIZE] = bytes
            .try_into()
            .map_err(|_| HeaderError::WrongBlockLength(bytes.len()))?;
        Ok(Self { block })
    }

    pub fn as_bytes(&self) -> &[u8; BLOCK_SIZE] {
        &self.block
    }

    /// Returns the encoded block exactly as it will be written to disk.
    pub fn encode(&self) -> [u8; BLOCK_SIZE] {
        self.block
    }

    pub fn field(&self, field: HeaderField) -> &[u8] {
        &self.block[field.range()]
    }

    /// Zeroes `field`, then copies `value` into it. Values longer than the field
    /// are cut to the field width and are then not NUL-terminated.
    pub fn set_field(&mut self, field: HeaderField, value: &[u8]) {
        let region = &mut self.block[field.range()];
        region.fill(0);
        let n = value.len().min(region.len());
        region[..n].copy_from_slice(&value[..n]);
    }

    pub fn fill_field(&mut self, field: HeaderField, byte: u8) {
        self.block[field.range()].fill(byte);
    }

    /// Writes `value` as zero-padded octal digits filling all but the last byte
    /// of the field, followed by a NUL. Only the low digits are kept when the
    /// value does not fit.
    pub fn set_octal(&mut self, field: HeaderField, value: u64) {
        let width = field.size() - 1;
        let digits = format!("{value:0width$o}");
        let low = &digits.as_bytes()[digits.len() - width..];
        self.set_field(field, low);
    }

    pub fn set_typeflag(&mut self, typeflag: u8) {
        self.block[HeaderField::Typeflag.offset()] = typeflag;
    }

    pub fn typeflag(&self) -> u8 {
        self.block[HeaderField::Typeflag.offset()]
    }

    /// The name field up to its first NUL.
    pub fn name(&self) -> &[u8] {
        let raw = self.field(HeaderField::Name);
        let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
        &raw[..end]
    }

    /// Parses an octal numeric field. Leading spaces are skipped and the digits
    /// end at the first NUL or space; an empty field reads as zero.
    pub fn octal(&self, field: HeaderField) -> Result<u64, HeaderError> {
        let digits: Vec<u8> = self
            .field(field)
            .iter()
            .copied()
            .skip_while(|&b| b == b' ')
            .take_while(|&b| b != 0 && b != b' ')
            .collect();
        if digits.is_empty() {
            return Ok(0);
        }
        let text = std::str::from_utf8(&digits).map_err(|_| HeaderError::InvalidOctal(field))?;
        u64::from_str_radix(text, 8).map_err(|_| HeaderError::InvalidOctal(field))
    }

    pub fn stored_checksum(&self) -> Result<u32, HeaderError> {
        let value = self.octal(HeaderField::Chksum)?;
        u32::try_from(value).map_err(|_| HeaderError::InvalidOctal(HeaderField::Chksum))
    }

    /// Recomputes the checksum without modifying the block.
    pub fn compute_checksum(&self) -> u32 {
        checksum(&self.block, ChecksumWidth::default()).0
    }

    /// Computes the checksum and stores it in the `chksum` field. No other
    /// field is modified. Returns the raw sum.
    pub fn update_checksum(&mut self, width: ChecksumWidth) -> u32 {
        let (sum, encoded) = checksum(&self.block, width);
        self.block[HeaderField::Chksum.range()].copy_from_slice(&encoded);
        sum
    }
}
