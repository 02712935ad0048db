//! File classification and text loading.
//!
//! A file is classified as `Ansi`, `Utf8`, `Utf16Le`, `Utf16Be` or `Binary`
//! from a prefix read: a BOM wins outright, otherwise a null-byte count
//! decides binary vs. text and a UTF-8 validity check picks between `Utf8`
//! and `Ansi`. Small text files are decoded whole for the character matcher;
//! everything else is handed to the byte matcher as raw bytes.

use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use encoding_rs::{UTF_16BE, UTF_16LE, WINDOWS_1252};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::NULL_BYTE_LIMIT;
use crate::errors::{SearchError, SearchResult};

/// Bytes read for classification before deciding how to load the file.
pub const DETECT_PREFIX: usize = 64 * 1024;

/// Files above this size are never decoded whole; they go to the byte
/// matcher under their detected encoding.
pub const TEXT_LOAD_LIMIT: u64 = 128 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Encoding {
    Ansi,
    Utf8,
    Utf16Le,
    Utf16Be,
    Binary,
}

impl Encoding {
    /// Width of one code unit in bytes.
    pub fn unit_bytes(self) -> usize {
        match self {
            Encoding::Utf16Le | Encoding::Utf16Be => 2,
            _ => 1,
        }
    }

    pub fn is_wide(self) -> bool {
        self.unit_bytes() == 2
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Encoding::Ansi => "ANSI",
            Encoding::Utf8 => "UTF-8",
            Encoding::Utf16Le => "UTF-16LE",
            Encoding::Utf16Be => "UTF-16BE",
            Encoding::Binary => "binary",
        };
        f.write_str(label)
    }
}

/// A fully decoded text file, ready for the character matcher.
#[derive(Debug, Clone)]
pub struct TextBuffer {
    pub encoding: Encoding,
    /// Whether the on-disk file carried a BOM; preserved on rewrite.
    pub bom: bool,
    pub text: String,
}

/// Outcome of [`load`]: either a decoded buffer or an instruction to scan
/// the raw bytes under the detected encoding.
#[derive(Debug)]
pub enum Loaded {
    Text(TextBuffer),
    Raw(Encoding),
}

fn bom_of(prefix: &[u8]) -> Option<Encoding> {
    if prefix.starts_with(&[0xEF, 0xBB, 0xBF]) {
        Some(Encoding::Utf8)
    } else if prefix.starts_with(&[0xFF, 0xFE]) {
        Some(Encoding::Utf16Le)
    } else if prefix.starts_with(&[0xFE, 0xFF]) {
        Some(Encoding::Utf16Be)
    } else {
        None
    }
}

/// Valid UTF-8, tolerating a multi-byte sequence cut off at the prefix end.
fn looks_like_utf8(prefix: &[u8]) -> bool {
    match std::str::from_utf8(prefix) {
        Ok(_) => true,
        Err(e) => e.error_len().is_none(),
    }
}

/// Classifies a file from its prefix bytes.
///
/// The null-byte threshold scales with file size when a per-MiB budget is
/// given, so large text files with sparse stray nulls are not misclassified.
pub fn detect(
    prefix: &[u8],
    file_size: u64,
    null_bytes_per_mib: Option<u32>,
    force_utf8: bool,
) -> Encoding {
    if let Some(enc) = bom_of(prefix) {
        return enc;
    }

    let nulls = prefix.iter().filter(|&&b| b == 0).count() as u64;
    let threshold = match null_bytes_per_mib {
        Some(budget) => u64::from(budget) * (file_size / (1024 * 1024) + 1),
        None => u64::from(NULL_BYTE_LIMIT),
    };
    if nulls > threshold {
        return Encoding::Binary;
    }

    if force_utf8 || looks_like_utf8(prefix) {
        Encoding::Utf8
    } else {
        Encoding::Ansi
    }
}

/// Reads and classifies `path`, decoding it when it is a small text file.
///
/// Cancellation is polled between the prefix read and the full load; a
/// cancelled load surfaces as `SearchError::Cancelled`, which the caller
/// reports as a per-file read error.
pub fn load(
    path: &Path,
    file_size: u64,
    null_bytes_per_mib: Option<u32>,
    force_utf8: bool,
    cancel: &AtomicBool,
) -> SearchResult<Loaded> {
    let mut file = File::open(path).map_err(|e| SearchError::io(path, e))?;

    let mut prefix = Vec::with_capacity(DETECT_PREFIX.min(file_size as usize + 1));
    (&mut file)
        .take(DETECT_PREFIX as u64)
        .read_to_end(&mut prefix)
        .map_err(|e| SearchError::io(path, e))?;

    if cancel.load(Ordering::Relaxed) {
        return Err(SearchError::Cancelled);
    }

    let encoding = detect(&prefix, file_size, null_bytes_per_mib, force_utf8);
    if encoding == Encoding::Binary || file_size > TEXT_LOAD_LIMIT {
        return Ok(Loaded::Raw(encoding));
    }

    let bom = bom_of(&prefix).is_some();
    let mut bytes = prefix;
    file.read_to_end(&mut bytes)
        .map_err(|e| SearchError::io(path, e))?;

    if cancel.load(Ordering::Relaxed) {
        return Err(SearchError::Cancelled);
    }

    let text = match encoding {
        Encoding::Utf8 => {
            let body = if bom { &bytes[3..] } else { &bytes[..] };
            let cow = String::from_utf8_lossy(body);
            if matches!(cow, std::borrow::Cow::Owned(_)) {
                warn!("invalid UTF-8 replaced in {}", path.display());
            }
            cow.into_owned()
        }
        Encoding::Ansi => WINDOWS_1252.decode(&bytes).0.into_owned(),
        Encoding::Utf16Le => UTF_16LE.decode(&bytes).0.into_owned(),
        Encoding::Utf16Be => UTF_16BE.decode(&bytes).0.into_owned(),
        Encoding::Binary => unreachable!("binary files are never decoded"),
    };

    Ok(Loaded::Text(TextBuffer {
        encoding,
        bom,
        text,
    }))
}

/// Re-encodes rewritten text in the file's original encoding, restoring the
/// BOM the original carried.
pub fn encode_text(text: &str, encoding: Encoding, bom: bool) -> Vec<u8> {
    match encoding {
        Encoding::Utf8 => {
            let mut out = Vec::with_capacity(text.len() + 3);
            if bom {
                out.extend_from_slice(&[0xEF, 0xBB, 0xBF]);
            }
            out.extend_from_slice(text.as_bytes());
            out
        }
        Encoding::Ansi => WINDOWS_1252.encode(text).0.into_owned(),
        Encoding::Utf16Le => {
            let mut out = Vec::with_capacity(text.len() * 2 + 2);
            if bom {
                out.extend_from_slice(&[0xFF, 0xFE]);
            }
            for unit in text.encode_utf16() {
                out.extend_from_slice(&unit.to_le_bytes());
            }
            out
        }
        Encoding::Utf16Be => {
            let mut out = Vec::with_capacity(text.len() * 2 + 2);
            if bom {
                out.extend_from_slice(&[0xFE, 0xFF]);
            }
            for unit in text.encode_utf16() {
                out.extend_from_slice(&unit.to_be_bytes());
            }
            out
        }
        Encoding::Binary => text.as_bytes().to_vec(),
    }
}

/// Decodes a slice cut out of a larger buffer (no BOM handling).
pub fn decode_units(bytes: &[u8], encoding: Encoding) -> String {
    match encoding {
        Encoding::Utf8 => String::from_utf8_lossy(bytes).into_owned(),
        Encoding::Utf16Le => UTF_16LE.decode_without_bom_handling(bytes).0.into_owned(),
        Encoding::Utf16Be => UTF_16BE.decode_without_bom_handling(bytes).0.into_owned(),
        Encoding::Ansi | Encoding::Binary => WINDOWS_1252
            .decode_without_bom_handling(bytes)
            .0
            .into_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    fn relaxed() -> AtomicBool {
        AtomicBool::new(false)
    }

    #[test]
    fn bom_wins_over_heuristics() {
        assert_eq!(
            detect(&[0xFF, 0xFE, 0x00, 0x00], 4, None, false),
            Encoding::Utf16Le
        );
        assert_eq!(
            detect(&[0xFE, 0xFF, 0x00, 0x41], 4, None, false),
            Encoding::Utf16Be
        );
        assert_eq!(
            detect(&[0xEF, 0xBB, 0xBF, b'a'], 4, None, false),
            Encoding::Utf8
        );
    }

    #[test]
    fn null_bytes_mean_binary() {
        let data = [b'a', 0, 0, 0, b'b'];
        assert_eq!(detect(&data, 5, None, false), Encoding::Binary);
    }

    #[test]
    fn null_budget_scales_with_size() {
        let data = [b'a', 0, 0, 0, b'b'];
        // 3 nulls, budget 1/MiB: a 5-byte file gets 1*(0+1)=1 -> binary,
        // a 4 MiB file gets 1*(4+1)=5 -> text.
        assert_eq!(detect(&data, 5, Some(1), false), Encoding::Binary);
        assert_eq!(
            detect(&data, 4 * 1024 * 1024, Some(1), false),
            Encoding::Ansi
        );
    }

    #[test]
    fn invalid_utf8_is_ansi() {
        assert_eq!(detect(&[0xE9, b'c', b'u'], 3, None, false), Encoding::Ansi);
        assert_eq!(detect(&[0xE9, b'c'], 2, None, true), Encoding::Utf8);
    }

    #[test]
    fn truncated_utf8_tail_is_still_utf8() {
        // 0xE2 0x82 is the start of a three-byte sequence cut by the prefix.
        assert_eq!(detect(&[b'a', 0xE2, 0x82], 3, None, false), Encoding::Utf8);
    }

    #[test]
    fn load_decodes_utf16le_with_bom() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("wide.txt");
        let mut file = File::create(&path).unwrap();
        file.write_all(&[0xFF, 0xFE]).unwrap();
        for unit in "hi\n".encode_utf16() {
            file.write_all(&unit.to_le_bytes()).unwrap();
        }
        drop(file);

        let size = std::fs::metadata(&path).unwrap().len();
        match load(&path, size, None, false, &relaxed()).unwrap() {
            Loaded::Text(buf) => {
                assert_eq!(buf.encoding, Encoding::Utf16Le);
                assert!(buf.bom);
                assert_eq!(buf.text, "hi\n");
            }
            Loaded::Raw(_) => panic!("expected decoded text"),
        }
    }

    #[test]
    fn encode_round_trips_utf16be() {
        let bytes = encode_text("ab", Encoding::Utf16Be, true);
        assert_eq!(bytes, vec![0xFE, 0xFF, 0x00, b'a', 0x00, b'b']);
    }

    #[test]
    fn cancelled_load_is_reported() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.txt");
        std::fs::write(&path, "hello").unwrap();
        let cancel = AtomicBool::new(true);
        assert!(matches!(
            load(&path, 5, None, false, &cancel),
            Err(SearchError::Cancelled)
        ));
    }
}
