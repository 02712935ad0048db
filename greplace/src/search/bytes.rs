//! Byte matcher: regex search over memory-mapped raw bytes.
//!
//! The search expression is transcoded into the encoding assumed for this
//! pass and compiled as a byte regex, so ANSI, UTF-8 and UTF-16 content is
//! matched without decoding the file. UTF-16 passes require a literal
//! pattern (the expression is widened character by character); in pure
//! binary mode a second pass offset by one byte catches UTF-16 matches that
//! begin on odd byte boundaries. Hit offsets are recorded during the scan
//! and resolved into `(line, column)` afterwards.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use encoding_rs::WINDOWS_1252;
use regex::bytes::{Regex as BytesRegex, RegexBuilder as BytesRegexBuilder};

use crate::config::{SearchRequest, LONG_LINE_LIMIT, SEARCH_BLOCK};
use crate::encoding::{decode_units, Encoding};
use crate::errors::{SearchError, SearchResult};
use crate::formatter::ReplaceFormatter;
use crate::lineindex::{LineIndex, Units};
use crate::replace::{adopt_temp_file, temp_path, InFlightSet};
use crate::results::FileResult;

fn push_byte(out: &mut String, byte: u8) {
    out.push_str(&format!("\\x{byte:02x}"));
}

fn wide_char(out: &mut String, c: char, big_endian: bool) {
    let mut buf = [0u16; 2];
    for unit in c.encode_utf16(&mut buf).iter() {
        let bytes = if big_endian {
            unit.to_be_bytes()
        } else {
            unit.to_le_bytes()
        };
        push_byte(out, bytes[0]);
        push_byte(out, bytes[1]);
    }
}

/// Widens a literal search string into a bytes-regex source matching its
/// UTF-16 encoding. A CRLF pair keeps the three-way line-break alternation
/// of literal mode.
pub(crate) fn wide_literal_source(literal: &str, big_endian: bool) -> String {
    let mut out = String::with_capacity(literal.len() * 8);
    let mut chars = literal.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\r' && chars.peek() == Some(&'\n') {
            chars.next();
            let mut lf = String::new();
            wide_char(&mut lf, '\n', big_endian);
            let mut cr = String::new();
            wide_char(&mut cr, '\r', big_endian);
            out.push_str(&format!("(?:{lf}|{cr}{lf}|{cr})"));
        } else {
            wide_char(&mut out, c, big_endian);
        }
    }
    out
}

/// Rewrites non-ASCII characters of a pattern source into explicit byte
/// escapes for the given single-byte interpretation. ASCII characters pass
/// through untouched, so regex syntax survives.
fn narrow_pattern_source(source: &str, encoding: Encoding) -> String {
    if source.is_ascii() {
        return source.to_owned();
    }
    let mut out = String::with_capacity(source.len() + 16);
    let mut buf = [0u8; 4];
    for c in source.chars() {
        if c.is_ascii() {
            out.push(c);
            continue;
        }
        let s = c.encode_utf8(&mut buf);
        if encoding == Encoding::Ansi {
            let (bytes, _, _) = WINDOWS_1252.encode(s);
            for &b in bytes.iter() {
                push_byte(&mut out, b);
            }
        } else {
            for b in s.bytes() {
                push_byte(&mut out, b);
            }
        }
    }
    out
}

/// Pattern source for one encoding assumption, or `None` when this pass
/// cannot run (UTF-16 assumptions need a literal pattern to widen).
pub(crate) fn byte_pattern_source(
    raw_pattern: &str,
    base_source: &str,
    literal: bool,
    encoding: Encoding,
) -> Option<String> {
    match encoding {
        Encoding::Utf16Le | Encoding::Utf16Be => {
            literal.then(|| wide_literal_source(raw_pattern, encoding == Encoding::Utf16Be))
        }
        _ => Some(narrow_pattern_source(base_source, encoding)),
    }
}

pub(crate) fn compile_byte_regex(
    source: &str,
    request: &SearchRequest,
) -> SearchResult<BytesRegex> {
    BytesRegexBuilder::new(source)
        .unicode(false)
        .case_insensitive(!request.case_sensitive)
        .dot_matches_new_line(request.dot_matches_newline)
        .multi_line(true)
        .build()
        .map_err(SearchError::from)
}

/// Encodes a replacement template into the bytes the output file expects.
fn template_bytes(template: &str, encoding: Encoding) -> Vec<u8> {
    match encoding {
        Encoding::Ansi => WINDOWS_1252.encode(template).0.into_owned(),
        Encoding::Utf16Le | Encoding::Utf16Be => {
            let mut out = Vec::with_capacity(template.len() * 2);
            for unit in template.encode_utf16() {
                let bytes = if encoding == Encoding::Utf16Be {
                    unit.to_be_bytes()
                } else {
                    unit.to_le_bytes()
                };
                out.extend_from_slice(&bytes);
            }
            out
        }
        _ => template.as_bytes().to_vec(),
    }
}

pub(crate) struct BytePass<'a> {
    pub data: &'a [u8],
    pub encoding: Encoding,
    pub misaligned: bool,
    pub request: &'a SearchRequest,
    pub root: &'a Path,
    pub formatter: Option<&'a ReplaceFormatter>,
    pub in_flight: &'a InFlightSet,
    pub cancel: &'a AtomicBool,
}

pub(crate) struct BytePassOutcome {
    pub found: usize,
    /// A rewrite problem that must not abort the scan; the caller counts it.
    pub soft_error: Option<SearchError>,
}

pub(crate) fn search_bytes(
    pass: BytePass<'_>,
    re: &BytesRegex,
    result: &mut FileResult,
) -> BytePassOutcome {
    let unit = pass.encoding.unit_bytes();
    let wide = unit == 2;
    let skip = usize::from(pass.misaligned);
    let mut work = pass.data.len().saturating_sub(skip);
    if wide {
        work -= work % 2;
    }
    if work == 0 {
        return BytePassOutcome {
            found: 0,
            soft_error: None,
        };
    }
    let hay = &pass.data[skip..skip + work];

    let replacing = pass.request.replacing() && !pass.request.not_search;
    let mut soft_error: Option<SearchError> = None;
    let mut writer: Option<BufWriter<File>> = None;
    let mut temp = None;

    if replacing {
        let path = temp_path(&result.path);
        pass.in_flight.insert(path.clone());
        match File::create(&path) {
            Ok(file) => {
                let mut w = BufWriter::new(file);
                let lead = if skip > 0 {
                    w.write_all(&pass.data[..skip])
                } else {
                    Ok(())
                };
                match lead {
                    Ok(()) => writer = Some(w),
                    Err(e) => {
                        soft_error = Some(SearchError::replace_failed(&result.path, e.to_string()));
                    }
                }
                temp = Some(path);
            }
            Err(e) => {
                return BytePassOutcome {
                    found: 0,
                    soft_error: Some(SearchError::replace_failed(&result.path, e.to_string())),
                };
            }
        }
    }

    let template = pass
        .formatter
        .map(|f| template_bytes(f.template(), pass.encoding));
    let expand = pass
        .formatter
        .map(|f| f.expands() && !wide)
        .unwrap_or(false);

    let base = result.line_numbers.len();
    let len = hay.len();
    let mut found = 0usize;
    let mut pos = 0usize;
    let mut block_end = if len > SEARCH_BLOCK {
        len % SEARCH_BLOCK
    } else {
        len
    };
    if wide {
        block_end -= block_end % 2;
    }

    'outer: loop {
        while pos < block_end && !cancel_set(pass.cancel) {
            let (m_start, m_end, rendered) = if expand {
                match re.captures_at(&hay[..block_end], pos) {
                    Some(caps) => {
                        let m = caps.get(0).expect("capture group 0 always exists");
                        let mut out = Vec::new();
                        caps.expand(template.as_deref().unwrap_or(b""), &mut out);
                        (m.start(), m.end(), Some(out))
                    }
                    None => break,
                }
            } else {
                match re.find_at(&hay[..block_end], pos) {
                    Some(m) => (m.start(), m.end(), template.clone()),
                    None => break,
                }
            };

            if wide && m_start % 2 != 0 {
                // a byte-level hit off the unit grid; the misalignment pass
                // owns those
                if let Some(w) = writer.as_mut() {
                    if let Err(e) = w.write_all(&hay[pos..m_start + 1]) {
                        soft_error = Some(SearchError::replace_failed(&result.path, e.to_string()));
                        writer = None;
                    }
                }
                pos = m_start + 1;
                continue;
            }

            found += 1;
            if pass.request.not_search {
                break 'outer;
            }

            result.line_numbers.push(m_start / unit);
            result.column_numbers.push((m_end - m_start) / unit);
            result.match_count += 1;

            if let Some(w) = writer.as_mut() {
                let outcome = w
                    .write_all(&hay[pos..m_start])
                    .and_then(|()| w.write_all(rendered.as_deref().unwrap_or(b"")));
                if let Err(e) = outcome {
                    soft_error = Some(SearchError::replace_failed(&result.path, e.to_string()));
                    writer = None;
                }
            }

            pos = m_end;
            if m_end == m_start {
                if pos + unit > block_end {
                    break;
                }
                if let Some(w) = writer.as_mut() {
                    if let Err(e) = w.write_all(&hay[pos..pos + unit]) {
                        soft_error = Some(SearchError::replace_failed(&result.path, e.to_string()));
                        writer = None;
                    }
                }
                pos += unit;
            }
        }

        if cancel_set(pass.cancel) {
            break;
        }
        if pos < block_end {
            if let Some(w) = writer.as_mut() {
                if let Err(e) = w.write_all(&hay[pos..block_end]) {
                    soft_error = Some(SearchError::replace_failed(&result.path, e.to_string()));
                    writer = None;
                }
            }
            pos = block_end;
        }
        if block_end < len {
            block_end = (block_end + SEARCH_BLOCK).min(len);
        } else {
            break;
        }
    }

    let cancelled = cancel_set(pass.cancel);
    let mut adoptable = false;
    if let Some(mut w) = writer.take() {
        if found > 0 && !cancelled {
            // a UTF-16 view may have dropped a trailing odd byte; keep it
            let tail = &pass.data[skip + work..];
            let finish = if tail.is_empty() {
                w.flush()
            } else {
                w.write_all(tail).and_then(|()| w.flush())
            };
            match finish {
                Ok(()) => adoptable = true,
                Err(e) => {
                    soft_error = Some(SearchError::replace_failed(&result.path, e.to_string()));
                }
            }
        }
    }

    if let Some(t) = &temp {
        if found == 0 {
            // nothing was replaced; failed or cancelled scans with hits keep
            // the temp file as a hint
            let _ = std::fs::remove_file(t);
        }
    }

    if found > 0 && !pass.request.not_search && pass.encoding != Encoding::Binary {
        let units_view = if wide {
            Units::Wide {
                data: hay,
                big_endian: pass.encoding == Encoding::Utf16Be,
            }
        } else {
            Units::Bytes(hay)
        };
        let bounded = units_view.len() >= 4 * (SEARCH_BLOCK / unit);
        let index = LineIndex::build(&units_view, (bounded || cancelled).then_some(pass.cancel));

        for i in base..result.line_numbers.len() {
            let offset = result.line_numbers[i];
            let hit_units = result.column_numbers[i];
            let line = index.line_of(offset);
            let column = index.column_of(offset, line);
            let (ls, le) = index.line_span(line, &units_view);
            let line_len = le - ls;
            if line_len > 0 && line_len < LONG_LINE_LIMIT {
                result.line_texts.entry(line).or_insert_with(|| {
                    decode_units(units_view.byte_slice(ls, le), pass.encoding)
                });
                let avail = (line_len + 1).saturating_sub(column);
                result.match_lengths.push(hit_units.min(avail));
            } else {
                result.line_texts.insert(line, String::new());
                result.match_lengths.push(0);
            }
            result.line_numbers[i] = line;
            result.column_numbers[i] = column;
        }
    }

    if adoptable {
        if let Some(t) = &temp {
            match adopt_temp_file(
                pass.request,
                pass.root,
                result,
                t,
                pass.in_flight,
                pass.cancel,
            ) {
                Ok(()) | Err(SearchError::Cancelled) => {}
                Err(e) => soft_error = Some(e),
            }
        }
    }

    BytePassOutcome { found, soft_error }
}

fn cancel_set(cancel: &AtomicBool) -> bool {
    cancel.load(Ordering::Relaxed)
}
