//! HTTP byte-range parsing and resolution.
//!
//! Parsing and resolving are separate steps so that malformed headers (400)
//! stay distinguishable from well-formed ranges that do not fit the object
//! (416). Nothing is clamped: a range either fits or is rejected.

use crate::services::error::{StorageError, StorageResult};

/// A parsed, not yet resolved, single byte range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeSpec {
    /// `bytes=start-` or `bytes=start-end`.
    FromTo { start: u64, end: Option<u64> },
    /// `bytes=-n`: the last `n` bytes.
    Suffix(u64),
}

/// An inclusive byte interval known to lie within the object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    /// Value of the `Content-Range` header for an object of `size` bytes.
    pub fn content_range(&self, size: u64) -> String {
        format!("bytes {}-{}/{}", self.start, self.end, size)
    }
}

impl RangeSpec {
    /// Parse a `Range` header value such as `bytes=0-499`.
    pub fn parse(header: &str) -> StorageResult<Self> {
        let (unit, spec) = header
            .trim()
            .split_once('=')
            .ok_or_else(|| invalid(header, "expected `bytes=start-end`"))?;
        if !unit.trim().eq_ignore_ascii_case("bytes") {
            return Err(invalid(header, "only the `bytes` unit is supported"));
        }
        if spec.contains(',') {
            return Err(invalid(header, "multiple ranges are not supported"));
        }
        let (start, end) = spec
            .split_once('-')
            .ok_or_else(|| invalid(header, "missing `-` separator"))?;
        let (start, end) = (start.trim(), end.trim());

        if start.is_empty() {
            return Ok(Self::Suffix(parse_bound(header, end)?));
        }
        let start = parse_bound(header, start)?;
        let end = if end.is_empty() {
            None
        } else {
            Some(parse_bound(header, end)?)
        };
        Ok(Self::FromTo { start, end })
    }

    /// Resolve against an object of `size` bytes.
    pub fn resolve(self, size: u64) -> StorageResult<ByteRange> {
        let unsatisfiable = StorageError::RangeNotSatisfiable { size };
        if size == 0 {
            return Err(unsatisfiable);
        }
        match self {
            Self::Suffix(0) => Err(unsatisfiable),
            Self::Suffix(n) => Ok(ByteRange {
                start: size.saturating_sub(n),
                end: size - 1,
            }),
            Self::FromTo { start, end } => {
                let end = end.unwrap_or(size - 1);
                if start >= size || start > end || end >= size {
                    return Err(unsatisfiable);
                }
                Ok(ByteRange { start, end })
            }
        }
    }
}

fn parse_bound(header: &str, value: &str) -> StorageResult<u64> {
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid(header, "range bounds must be decimal integers"));
    }
    value
        .parse::<u64>()
        .map_err(|_| invalid(header, "range bound out of range"))
}

fn invalid(header: &str, reason: &str) -> StorageError {
    StorageError::InvalidRange(format!("`{}`: {}", header, reason))
}
