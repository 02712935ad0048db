//! Character matcher over a fully decoded buffer.
//!
//! The buffer is scanned in [`SEARCH_BLOCK`]-sized windows, first window
//! taking the remainder, so later windows are always full-sized and the
//! window boundary falls inside a logical block at most once. Hits are
//! recorded as 1-based `(line, column, length)` triples in characters; in
//! replace mode the rewritten content accumulates alongside the scan so a
//! cancelled file is abandoned without a partial rewrite.

use std::sync::atomic::{AtomicBool, Ordering};

use regex::Regex;

use crate::config::{SearchRequest, LONG_LINE_LIMIT, SEARCH_BLOCK};
use crate::formatter::ReplaceFormatter;
use crate::lineindex::{LineIndex, Units};
use crate::results::FileResult;

pub(crate) struct TextOutcome {
    pub found: usize,
    /// The rewritten buffer; only meaningful when the scan ran to completion
    /// in replace mode.
    pub replaced: Option<String>,
}

pub(crate) fn search_text(
    text: &str,
    re: &Regex,
    request: &SearchRequest,
    formatter: Option<&ReplaceFormatter>,
    result: &mut FileResult,
    cancel: &AtomicBool,
) -> TextOutcome {
    let replacing = request.replacing();
    let capture = request.capture_search;
    let need_caps = replacing || capture;

    let len = text.len();
    let mut replaced = replacing.then(|| String::with_capacity(len));

    let units = Units::Bytes(text.as_bytes());
    let bounded = len >= 4 * SEARCH_BLOCK;
    let mut index: Option<LineIndex> = None;

    let mut found = 0usize;
    let mut pos = 0usize;
    let mut block_end = if len > SEARCH_BLOCK {
        len % SEARCH_BLOCK
    } else {
        len
    };
    while !text.is_char_boundary(block_end) {
        block_end += 1;
    }

    'outer: loop {
        while pos < block_end && !cancel.load(Ordering::Relaxed) {
            let (m_start, m_end, rendered) = if need_caps {
                match re.captures_at(&text[..block_end], pos) {
                    Some(caps) => {
                        let m = caps.get(0).expect("capture group 0 always exists");
                        let rendered = formatter.map(|f| f.format(&caps));
                        (m.start(), m.end(), rendered)
                    }
                    None => break,
                }
            } else {
                match re.find_at(&text[..block_end], pos) {
                    Some(m) => (m.start(), m.end(), None),
                    None => break,
                }
            };

            found += 1;
            if request.not_search {
                break 'outer;
            }

            let index = index
                .get_or_insert_with(|| LineIndex::build(&units, bounded.then_some(cancel)));
            let line_start = index.line_of(m_start);
            let line_end = index.line_of(if m_end > m_start { m_end - 1 } else { m_start });
            let (span_start, _) = index.line_span(line_start, &units);
            let mut column = text[span_start..m_start].chars().count() + 1;

            if capture {
                let rendered = rendered.clone().unwrap_or_default();
                let cached = result
                    .line_texts
                    .entry(line_start)
                    .or_insert(rendered);
                let length = cached.chars().count();
                result.push_hit(line_start, column, length);
            } else {
                let mut remaining = text[m_start..m_end].chars().count();
                for line in line_start..=line_end {
                    let (ls, le) = index.line_span(line, &units);
                    let span = &text[ls..le];
                    let long = span.len() >= LONG_LINE_LIMIT;
                    let line_len = span.chars().count();
                    result
                        .line_texts
                        .entry(line)
                        .or_insert_with(|| if long { String::new() } else { span.to_string() });
                    let avail = (line_len + 1).saturating_sub(column);
                    let piece = remaining.min(avail);
                    result.push_hit(line, column, if long { 0 } else { piece });
                    if remaining > avail {
                        column = 1;
                        remaining -= avail;
                    }
                }
            }
            result.match_count += 1;

            if let Some(out) = replaced.as_mut() {
                out.push_str(&text[pos..m_start]);
                out.push_str(rendered.as_deref().unwrap_or(""));
            }

            pos = m_end;
            if m_end == m_start {
                // zero-width hit: step one character so the scan terminates
                if pos >= block_end {
                    break;
                }
                let step = text[pos..]
                    .chars()
                    .next()
                    .map(char::len_utf8)
                    .unwrap_or(1);
                if let Some(out) = replaced.as_mut() {
                    out.push_str(&text[pos..pos + step]);
                }
                pos += step;
            }
        }

        if cancel.load(Ordering::Relaxed) {
            break;
        }
        if pos < block_end {
            if let Some(out) = replaced.as_mut() {
                out.push_str(&text[pos..block_end]);
            }
            pos = block_end;
        }
        if block_end < len {
            block_end = (block_end + SEARCH_BLOCK).min(len);
            while !text.is_char_boundary(block_end) {
                block_end += 1;
            }
        } else {
            break;
        }
    }

    TextOutcome { found, replaced }
}

#[cfg(test)]
mod tests {
    use super::*;
    use regex::RegexBuilder;
    use std::path::PathBuf;

    fn scan(
        text: &str,
        pattern: &str,
        request: &SearchRequest,
        formatter: Option<&ReplaceFormatter>,
    ) -> (FileResult, TextOutcome) {
        let re = RegexBuilder::new(pattern)
            .case_insensitive(!request.case_sensitive)
            .dot_matches_new_line(request.dot_matches_newline)
            .multi_line(true)
            .build()
            .unwrap();
        let mut result = FileResult::new(PathBuf::from("t.txt"));
        let cancel = AtomicBool::new(false);
        let outcome = search_text(text, &re, request, formatter, &mut result, &cancel);
        (result, outcome)
    }

    fn plain_request() -> SearchRequest {
        SearchRequest::new(vec![], "x")
    }

    #[test]
    fn literal_hits_carry_line_and_column() {
        let request = plain_request();
        let (result, outcome) = scan("hello\nhello\n", "hello", &request, None);
        assert_eq!(outcome.found, 2);
        assert_eq!(result.match_count, 2);
        assert_eq!(result.line_numbers, vec![1, 2]);
        assert_eq!(result.column_numbers, vec![1, 1]);
        assert_eq!(result.match_lengths, vec![5, 5]);
        assert_eq!(result.line_texts[&1], "hello");
    }

    #[test]
    fn replace_streams_substitutions() {
        let mut request = plain_request();
        request.use_regex = true;
        request.replacement = Some("bar=$1".into());
        let fmt = ReplaceFormatter::new("bar=$1", true, std::path::Path::new("/t/c.txt"));
        let (result, outcome) = scan("foo=1;foo=2;", r"foo=(\d)", &request, Some(&fmt));
        assert_eq!(outcome.found, 2);
        assert_eq!(result.match_count, 2);
        assert_eq!(outcome.replaced.as_deref(), Some("bar=1;bar=2;"));
    }

    #[test]
    fn multiline_hit_splits_per_line() {
        let request = plain_request();
        // literal "x\r\ny" compiled the way literal mode does it
        let pattern = crate::formatter::literal_to_regex("x\r\ny");
        let (result, outcome) = scan("x\r\ny\n", &pattern, &request, None);
        assert_eq!(outcome.found, 1);
        assert_eq!(result.line_numbers, vec![1, 2]);
        assert_eq!(result.column_numbers, vec![1, 1]);
        assert_eq!(result.line_texts[&1], "x");
        assert_eq!(result.line_texts[&2], "y");
    }

    #[test]
    fn zero_width_matches_do_not_loop() {
        let request = plain_request();
        let (result, outcome) = scan("ab\ncd\n", "^", &request, None);
        // one hit per line start, never stuck
        assert_eq!(outcome.found, 3);
        assert_eq!(result.match_lengths.iter().sum::<usize>(), 0);
    }

    #[test]
    fn zero_width_replace_preserves_text() {
        let mut request = plain_request();
        request.use_regex = true;
        request.replacement = Some("> ".into());
        let fmt = ReplaceFormatter::new("> ", true, std::path::Path::new("/t/c.txt"));
        let (_, outcome) = scan("a\nb", "^", &request, Some(&fmt));
        assert_eq!(outcome.replaced.as_deref(), Some("> a\n> b"));
    }

    #[test]
    fn not_search_stops_at_first_hit() {
        let mut request = plain_request();
        request.not_search = true;
        let (result, outcome) = scan("x x x x", "x", &request, None);
        assert_eq!(outcome.found, 1);
        assert_eq!(result.match_count, 0);
        assert!(result.line_numbers.is_empty());
    }

    #[test]
    fn capture_search_records_rendered_replacement() {
        let mut request = plain_request();
        request.use_regex = true;
        request.capture_search = true;
        request.replacement = Some("[$1]".into());
        let fmt = ReplaceFormatter::new("[$1]", true, std::path::Path::new("/t/c.txt"));
        let (result, outcome) = scan("id=42\n", r"id=(\d+)", &request, Some(&fmt));
        assert_eq!(outcome.found, 1);
        assert!(outcome.replaced.is_none());
        assert_eq!(result.line_texts[&1], "[42]");
        assert_eq!(result.match_lengths, vec![4]);
    }

    #[test]
    fn long_lines_report_empty_text() {
        let request = plain_request();
        let long = "a".repeat(LONG_LINE_LIMIT + 10);
        let text = format!("{long}needle\nshort needle\n");
        let (result, outcome) = scan(&text, "needle", &request, None);
        assert_eq!(outcome.found, 2);
        assert_eq!(result.line_texts[&1], "");
        assert_eq!(result.match_lengths[0], 0);
        assert_eq!(result.line_texts[&2], "short needle");
        assert_eq!(result.match_lengths[1], 6);
    }

    #[test]
    fn case_insensitive_by_default() {
        let request = plain_request();
        let (_, outcome) = scan("Hello HELLO", "hello", &request, None);
        assert_eq!(outcome.found, 2);
    }
}
