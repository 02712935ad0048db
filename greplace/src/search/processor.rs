//! Per-file orchestration: classify the file, pick the character or byte
//! matcher, run the encoding retries for binary content, and emit the
//! `Found`/`Progress` pair for the file.

use std::fs::File;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use memmap2::Mmap;
use regex::{Regex, RegexBuilder};
use tracing::{debug, warn};

use crate::config::SearchRequest;
use crate::encoding::{self, Encoding, Loaded, TextBuffer};
use crate::errors::{SearchError, SearchResult};
use crate::events::EventBus;
use crate::formatter::{apply_path_variables, has_path_variables, literal_to_regex, ReplaceFormatter};
use crate::replace::{adopt_temp_file, temp_path, InFlightSet};
use crate::results::FileResult;
use crate::walk::FileTask;

use super::bytes::{byte_pattern_source, compile_byte_regex, search_bytes, BytePass};
use super::text::search_text;

/// Search expression compiled once per run. The text regex is shared across
/// workers; byte regexes are compiled per encoding assumption, and patterns
/// embedding `${filepath}`-style variables are recompiled per file.
#[derive(Debug)]
pub(crate) struct CompiledSearch {
    /// The pattern as the user wrote it; UTF-16 passes widen this form.
    pub raw_pattern: String,
    /// Regex source after literal escaping and whole-word wrapping.
    pub source: String,
    pub literal: bool,
    pub has_file_vars: bool,
    /// Shared text regex; `None` when per-file variables force recompilation.
    pub text_re: Option<Regex>,
}

pub(crate) fn build_text_regex(
    source: &str,
    request: &SearchRequest,
) -> Result<Regex, regex::Error> {
    RegexBuilder::new(source)
        .case_insensitive(!request.case_sensitive)
        .dot_matches_new_line(request.dot_matches_newline)
        .multi_line(true)
        .build()
}

impl CompiledSearch {
    pub fn new(request: &SearchRequest) -> SearchResult<Self> {
        let literal = !request.use_regex;
        let mut source = if literal {
            literal_to_regex(&request.pattern)
        } else {
            request.pattern.clone()
        };
        if literal && request.whole_words {
            source = format!(r"\b{source}\b");
        }
        let has_file_vars = request.use_regex && has_path_variables(&request.pattern);

        let text_re = if has_file_vars {
            // prove the pattern compiles before the run starts
            let probe = apply_path_variables(&source, Path::new("/probe/file.txt"), true);
            build_text_regex(&probe, request)
                .map_err(|e| SearchError::pattern(e.to_string()))?;
            None
        } else {
            Some(
                build_text_regex(&source, request)
                    .map_err(|e| SearchError::pattern(e.to_string()))?,
            )
        };

        Ok(Self {
            raw_pattern: request.pattern.clone(),
            source,
            literal,
            has_file_vars,
            text_re,
        })
    }
}

/// Shared run counters, aggregated into the final [`crate::RunSummary`].
#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub progressed: AtomicUsize,
    pub matched: AtomicUsize,
    pub total_matches: AtomicUsize,
    pub replace_failures: AtomicUsize,
}

pub(crate) struct WorkerContext<'a> {
    pub request: &'a SearchRequest,
    pub compiled: &'a CompiledSearch,
    pub cancel: &'a AtomicBool,
    pub in_flight: &'a InFlightSet,
    pub events: &'a EventBus,
    pub counters: &'a Counters,
}

/// Emits `Found?` then `Progress` for one finished file and updates the run
/// counters. `count` is `None` when the file was skipped (unreadable,
/// binary without `include_binary`, cancelled before scanning).
pub(crate) fn report(
    request: &SearchRequest,
    events: &EventBus,
    counters: &Counters,
    result: FileResult,
    count: Option<usize>,
) {
    let matched = match count {
        Some(n) if n > 0 => !request.not_search,
        _ => request.not_search,
    };
    counters.progressed.fetch_add(1, Ordering::Relaxed);
    if matched {
        counters.matched.fetch_add(1, Ordering::Relaxed);
        counters
            .total_matches
            .fetch_add(result.match_count, Ordering::Relaxed);
        events.found(result);
    }
    events.progress(matched);
}

pub(crate) fn process_file(ctx: &WorkerContext<'_>, task: FileTask) {
    let request = ctx.request;
    let mut result = FileResult::from_task(&task);

    if ctx.cancel.load(Ordering::Relaxed) {
        report(request, ctx.events, ctx.counters, result, None);
        return;
    }

    let loaded = if request.force_binary {
        Ok(Loaded::Raw(Encoding::Binary))
    } else {
        encoding::load(
            &task.path,
            task.size,
            request.null_bytes_per_mib,
            request.force_utf8,
            ctx.cancel,
        )
    };

    let count = match loaded {
        Err(e) => {
            if !matches!(e, SearchError::Cancelled) {
                warn!("cannot read '{}': {e}", task.path.display());
            }
            result.read_error = true;
            None
        }
        Ok(Loaded::Text(buffer)) => {
            result.encoding = Some(buffer.encoding);
            scan_text_file(ctx, &task, &mut result, &buffer)
        }
        Ok(Loaded::Raw(detected)) => {
            result.encoding = Some(detected);
            if detected == Encoding::Binary && !(request.include_binary || request.force_binary) {
                None
            } else {
                scan_raw_file(ctx, &task, &mut result, detected)
            }
        }
    };

    report(request, ctx.events, ctx.counters, result, count);
}

fn scan_text_file(
    ctx: &WorkerContext<'_>,
    task: &FileTask,
    result: &mut FileResult,
    buffer: &TextBuffer,
) -> Option<usize> {
    let request = ctx.request;
    let compiled = ctx.compiled;

    let per_file;
    let re = match &compiled.text_re {
        Some(re) => re,
        None => {
            let source = apply_path_variables(&compiled.source, &task.path, true);
            match build_text_regex(&source, request) {
                Ok(re) => {
                    per_file = re;
                    &per_file
                }
                Err(e) => {
                    // surface the diagnostic as a hit so the host shows it
                    result.exception_text = Some(e.to_string());
                    return Some(1);
                }
            }
        }
    };

    let formatter = request
        .replacement
        .as_ref()
        .map(|template| ReplaceFormatter::new(template, request.use_regex, &task.path));

    let outcome = search_text(&buffer.text, re, request, formatter.as_ref(), result, ctx.cancel);
    let found = outcome.found;

    if request.replacing()
        && !request.not_search
        && found > 0
        && !ctx.cancel.load(Ordering::Relaxed)
    {
        let Some(replaced) = outcome.replaced else {
            return Some(found);
        };
        let temp = temp_path(&task.path);
        ctx.in_flight.insert(temp.clone());
        let bytes = encoding::encode_text(&replaced, buffer.encoding, buffer.bom);
        let adopted = std::fs::write(&temp, bytes)
            .map_err(|e| SearchError::replace_failed(&task.path, e.to_string()))
            .and_then(|()| {
                adopt_temp_file(request, &task.root, result, &temp, ctx.in_flight, ctx.cancel)
            });
        match adopted {
            Ok(()) => {}
            Err(SearchError::Cancelled) => {}
            Err(e) => {
                warn!("{e}");
                ctx.counters.replace_failures.fetch_add(1, Ordering::Relaxed);
                // the temp file stays behind as a hint of what was found
                return None;
            }
        }
    }

    Some(found)
}

fn scan_raw_file(
    ctx: &WorkerContext<'_>,
    task: &FileTask,
    result: &mut FileResult,
    detected: Encoding,
) -> Option<usize> {
    let request = ctx.request;
    let compiled = ctx.compiled;

    if task.size == 0 {
        return Some(0);
    }

    let (raw_pattern, base_source);
    if compiled.has_file_vars {
        raw_pattern = apply_path_variables(&compiled.raw_pattern, &task.path, false);
        base_source = apply_path_variables(&compiled.source, &task.path, true);
    } else {
        raw_pattern = compiled.raw_pattern.clone();
        base_source = compiled.source.clone();
    }

    let formatter = if request.capture_search {
        // capture search renders nothing on the byte path
        None
    } else {
        request
            .replacement
            .as_ref()
            .map(|template| ReplaceFormatter::new(template, request.use_regex, &task.path))
    };

    // Encoding assumptions, tried until one yields hits. The UTF-16 groups
    // pair the aligned scan with the misalignment pass and only exist in
    // pure binary mode; regex patterns cannot be widened, so binary regex
    // scans stay single-byte.
    let groups: Vec<Vec<(Encoding, bool)>> = if detected == Encoding::Binary {
        let mut groups = vec![
            vec![(Encoding::Ansi, false)],
            vec![(Encoding::Utf8, false)],
        ];
        if compiled.literal {
            groups.push(vec![(Encoding::Utf16Le, false), (Encoding::Utf16Le, true)]);
            groups.push(vec![(Encoding::Utf16Be, false), (Encoding::Utf16Be, true)]);
        }
        groups
    } else {
        vec![vec![(detected, false)]]
    };

    let mut total: Option<usize> = None;
    'groups: for group in groups {
        let mut group_found = 0usize;
        for (assumption, misaligned) in group {
            let Some(source) =
                byte_pattern_source(&raw_pattern, &base_source, compiled.literal, assumption)
            else {
                debug!(
                    "skipping {assumption} pass on '{}': pattern cannot be widened",
                    task.path.display()
                );
                continue;
            };
            let re = match compile_byte_regex(&source, request) {
                Ok(re) => re,
                Err(e) => {
                    result.exception_text = Some(e.to_string());
                    return Some(1);
                }
            };

            // map fresh per pass: a replace pass may have swapped the file
            let file = match File::open(&task.path) {
                Ok(file) => file,
                Err(e) => {
                    warn!("cannot open '{}': {e}", task.path.display());
                    result.read_error = true;
                    return total;
                }
            };
            let mmap = match unsafe { Mmap::map(&file) } {
                Ok(mmap) => mmap,
                Err(e) => {
                    warn!("cannot map '{}': {e}", task.path.display());
                    result.read_error = true;
                    return total;
                }
            };

            result.encoding = Some(assumption);
            let outcome = search_bytes(
                BytePass {
                    data: &mmap,
                    encoding: assumption,
                    misaligned,
                    request,
                    root: &task.root,
                    formatter: formatter.as_ref(),
                    in_flight: ctx.in_flight,
                    cancel: ctx.cancel,
                },
                &re,
                result,
            );
            if let Some(e) = outcome.soft_error {
                warn!("{e}");
                ctx.counters.replace_failures.fetch_add(1, Ordering::Relaxed);
            }
            group_found += outcome.found;

            if ctx.cancel.load(Ordering::Relaxed) {
                total = Some(total.unwrap_or(0) + group_found);
                break 'groups;
            }
        }
        total = Some(total.unwrap_or(0) + group_found);
        if group_found > 0 {
            break;
        }
    }

    total
}
