//! Line-offset index: converts absolute offsets into 1-based `(line, column)`
//! coordinates without keeping any per-line state beyond the start table.
//!
//! Offsets are code units of the underlying buffer (bytes for single-byte
//! encodings, u16 units for UTF-16). Line breaks are `\n`, `\r` and `\r\n`.

use std::sync::atomic::{AtomicBool, Ordering};

use memchr::memchr2_iter;

const CANCEL_POLL_MASK: usize = (1 << 20) - 1;

/// A view of a buffer as a sequence of code units.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Units<'a> {
    Bytes(&'a [u8]),
    Wide { data: &'a [u8], big_endian: bool },
}

impl<'a> Units<'a> {
    pub fn len(&self) -> usize {
        match self {
            Units::Bytes(data) => data.len(),
            Units::Wide { data, .. } => data.len() / 2,
        }
    }

    pub fn at(&self, index: usize) -> u16 {
        match self {
            Units::Bytes(data) => u16::from(data[index]),
            Units::Wide { data, big_endian } => {
                let pair = [data[index * 2], data[index * 2 + 1]];
                if *big_endian {
                    u16::from_be_bytes(pair)
                } else {
                    u16::from_le_bytes(pair)
                }
            }
        }
    }

    /// The raw bytes backing units `[start, end)`.
    pub fn byte_slice(&self, start: usize, end: usize) -> &'a [u8] {
        match self {
            Units::Bytes(data) => &data[start..end],
            Units::Wide { data, .. } => &data[start * 2..end * 2],
        }
    }
}

/// Monotonic table of line-start offsets over one buffer.
///
/// When built with a cancel flag the scan may stop early; lookups past the
/// scanned region clamp to the last known line so partial results still
/// carry usable coordinates.
#[derive(Debug)]
pub(crate) struct LineIndex {
    starts: Vec<usize>,
    scanned: usize,
    complete: bool,
}

impl LineIndex {
    /// Scans the buffer once. Pass `Some(cancel)` only for buffers large
    /// enough that an uninterruptible scan would hurt cancellation latency.
    pub fn build(units: &Units<'_>, cancel: Option<&AtomicBool>) -> Self {
        let mut starts = vec![0usize];

        match units {
            Units::Bytes(data) => {
                for (n, pos) in memchr2_iter(b'\n', b'\r', data).enumerate() {
                    if n & 0x3FF == 0 {
                        if let Some(flag) = cancel {
                            if flag.load(Ordering::Relaxed) {
                                return Self {
                                    starts,
                                    scanned: pos,
                                    complete: false,
                                };
                            }
                        }
                    }
                    if data[pos] == b'\r' {
                        if data.get(pos + 1) == Some(&b'\n') {
                            starts.push(pos + 2);
                        } else {
                            starts.push(pos + 1);
                        }
                    } else if pos == 0 || data[pos - 1] != b'\r' {
                        // an \n directly after \r was already recorded
                        starts.push(pos + 1);
                    }
                }
                Self {
                    starts,
                    scanned: data.len(),
                    complete: true,
                }
            }
            Units::Wide { .. } => {
                let len = units.len();
                let mut i = 0usize;
                while i < len {
                    if i & CANCEL_POLL_MASK == 0 {
                        if let Some(flag) = cancel {
                            if flag.load(Ordering::Relaxed) {
                                return Self {
                                    starts,
                                    scanned: i,
                                    complete: false,
                                };
                            }
                        }
                    }
                    let unit = units.at(i);
                    if unit == u16::from(b'\r') {
                        if i + 1 < len && units.at(i + 1) == u16::from(b'\n') {
                            starts.push(i + 2);
                            i += 2;
                            continue;
                        }
                        starts.push(i + 1);
                    } else if unit == u16::from(b'\n') {
                        starts.push(i + 1);
                    }
                    i += 1;
                }
                Self {
                    starts,
                    scanned: len,
                    complete: true,
                }
            }
        }
    }

    /// 1-based line containing `offset`. Offsets past the scanned region
    /// clamp to the last known line.
    pub fn line_of(&self, offset: usize) -> usize {
        self.starts.partition_point(|&start| start <= offset)
    }

    /// 1-based column of `offset` within `line`.
    pub fn column_of(&self, offset: usize, line: usize) -> usize {
        offset - self.starts[line - 1] + 1
    }

    /// Unit span of `line` excluding its terminator.
    pub fn line_span(&self, line: usize, units: &Units<'_>) -> (usize, usize) {
        let start = self.starts[line - 1];
        let raw_end = match self.starts.get(line) {
            Some(&next) => next,
            None if self.complete => units.len(),
            None => self.scanned.max(start),
        };
        let mut end = raw_end;
        if end > start && units.at(end - 1) == u16::from(b'\n') {
            end -= 1;
            if end > start && units.at(end - 1) == u16::from(b'\r') {
                end -= 1;
            }
        } else if end > start && units.at(end - 1) == u16::from(b'\r') {
            end -= 1;
        }
        (start, end)
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }
}
