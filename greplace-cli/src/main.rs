use std::num::NonZeroUsize;
use std::process::ExitCode;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::thread;
use std::time::SystemTime;

use chrono::{Local, NaiveDate, NaiveDateTime, TimeZone};
use clap::Parser;
use colored::Colorize;
use crossbeam_channel::unbounded;
use indicatif::{ProgressBar, ProgressStyle};
use tracing_subscriber::EnvFilter;

use greplace::{
    DateFilter, FileResult, NameFilter, SearchError, SearchEvent, SearchRequest, SizeFilter,
};

/// Batch host for the greplace engine.
///
/// Exit codes: 0 clean, 1 configuration error, 2 cancelled, 3 when at least
/// one file could not be rewritten.
#[derive(Parser)]
#[command(name = "greplace", version, about = "Parallel file search and replace")]
struct Cli {
    /// `|`-separated list of files and directories to search
    #[arg(long, value_name = "PATHS")]
    searchpath: String,

    /// Search expression; omit together with --countonly for an inventory
    #[arg(long, value_name = "EXPR")]
    searchfor: Option<String>,

    /// Replacement expression; its presence enables replace mode
    #[arg(long, value_name = "EXPR")]
    replacewith: Option<String>,

    /// Treat the search expression as a regular expression
    #[arg(long, conflicts_with = "literal")]
    regex: bool,

    /// Treat the search expression as literal text (the default)
    #[arg(long)]
    literal: bool,

    /// Case-sensitive matching
    #[arg(short = 'i', conflicts_with = "case_insensitive")]
    case_sensitive: bool,

    /// Case-insensitive matching (the default)
    #[arg(short = 'I')]
    case_insensitive: bool,

    /// Decode files as UTF-8 instead of the ANSI/UTF-8 heuristic
    #[arg(long, conflicts_with = "binary")]
    utf8: bool,

    /// Scan every file as raw bytes
    #[arg(long)]
    binary: bool,

    /// Snapshot each file before rewriting it
    #[arg(long)]
    backup: bool,

    /// Put backups under a `grepWin_backup` tree instead of siblings
    #[arg(long)]
    backupfolder: bool,

    /// Restore file timestamps after a rewrite
    #[arg(long)]
    keepfiledate: bool,

    /// Literal mode: match whole words only
    #[arg(long)]
    wholewords: bool,

    /// Let `.` match line breaks
    #[arg(long)]
    dotmatchnewline: bool,

    #[arg(long)]
    includesubfolders: bool,

    #[arg(long)]
    includesymlink: bool,

    #[arg(long)]
    includehidden: bool,

    #[arg(long)]
    includesystem: bool,

    #[arg(long)]
    includebinary: bool,

    /// Size threshold in bytes, combined with --sizecmp
    #[arg(long, value_name = "BYTES")]
    size: Option<u64>,

    /// 0 = less than, 1 = equal, 2 = greater than
    #[arg(long, value_name = "CMP", default_value_t = 0)]
    sizecmp: u8,

    /// Ignore the size predicate
    #[arg(long)]
    allsize: bool,

    /// 0 = all, 1 = newer than --date1, 2 = older than --date1, 3 = between
    #[arg(long, value_name = "MODE", default_value_t = 0)]
    datelimit: u8,

    /// Date as `YYYY-MM-DD` or `YYYY-MM-DD HH:MM:SS`
    #[arg(long, value_name = "DATE")]
    date1: Option<String>,

    #[arg(long, value_name = "DATE")]
    date2: Option<String>,

    /// File name patterns, `|`- or `;`-separated; a `-` prefix excludes
    #[arg(long, value_name = "PATTERNS")]
    filematch: Option<String>,

    /// Interpret --filematch as a single regex over basename and full path
    #[arg(long)]
    filematchregex: bool,

    /// Regex pruning directories by basename, full or relative path
    #[arg(long, value_name = "REGEX")]
    excludedirs: Option<String>,

    /// Report files that contain no match
    #[arg(long)]
    notsearch: bool,

    /// Record rendered replacements without touching any file
    #[arg(long)]
    capturesearch: bool,

    /// Inventory mode: list matching files without opening them
    #[arg(long)]
    countonly: bool,

    /// Per-MiB null-byte budget before a file counts as binary
    #[arg(long, value_name = "N")]
    nullbytes: Option<u32>,

    /// Worker thread count
    #[arg(long, value_name = "N")]
    threads: Option<NonZeroUsize>,

    /// Print only the summary line
    #[arg(long, short = 'q')]
    quiet: bool,
}

fn parse_date(input: &str) -> Result<SystemTime, String> {
    let naive = NaiveDateTime::parse_from_str(input, "%Y-%m-%d %H:%M:%S")
        .or_else(|_| {
            NaiveDate::parse_from_str(input, "%Y-%m-%d")
                .map(|d| d.and_hms_opt(0, 0, 0).expect("midnight always exists"))
        })
        .map_err(|e| format!("bad date '{input}': {e}"))?;
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(SystemTime::from)
        .ok_or_else(|| format!("date '{input}' does not exist in the local time zone"))
}

fn build_request(cli: &Cli) -> Result<SearchRequest, String> {
    let mut roots = Vec::new();
    for piece in cli.searchpath.split('|') {
        let piece = piece.trim();
        if piece.is_empty() {
            continue;
        }
        let canonical = std::fs::canonicalize(piece)
            .map_err(|e| format!("search path '{piece}': {e}"))?;
        roots.push(canonical);
    }

    let pattern = if cli.countonly {
        String::new()
    } else {
        cli.searchfor
            .clone()
            .ok_or("either --searchfor or --countonly is required")?
    };

    let mut request = SearchRequest::new(roots, pattern);
    request.replacement = cli.replacewith.clone();
    request.use_regex = cli.regex;
    request.case_sensitive = cli.case_sensitive;
    request.dot_matches_newline = cli.dotmatchnewline;
    request.whole_words = cli.wholewords;
    request.include_hidden = cli.includehidden;
    request.include_system = cli.includesystem;
    request.include_subfolders = cli.includesubfolders;
    request.include_symlinks = cli.includesymlink;
    request.include_binary = cli.includebinary;
    request.force_binary = cli.binary;
    request.force_utf8 = cli.utf8;
    request.create_backup = cli.backup || cli.backupfolder;
    request.backup_in_subfolder = cli.backupfolder;
    request.keep_file_date = cli.keepfiledate;
    request.not_search = cli.notsearch;
    request.capture_search = cli.capturesearch;
    request.null_bytes_per_mib = cli.nullbytes;
    request.thread_count = cli.threads;

    request.size = if cli.allsize {
        SizeFilter::All
    } else {
        match (cli.size, cli.sizecmp) {
            (None, _) => SizeFilter::All,
            (Some(n), 0) => SizeFilter::LessThan(n),
            (Some(n), 1) => SizeFilter::Equal(n),
            (Some(n), 2) => SizeFilter::GreaterThan(n),
            (Some(_), other) => return Err(format!("bad --sizecmp value {other}")),
        }
    };

    request.date = match cli.datelimit {
        0 => DateFilter::All,
        1 | 2 => {
            let date1 = parse_date(cli.date1.as_deref().ok_or("--datelimit needs --date1")?)?;
            if cli.datelimit == 1 {
                DateFilter::NewerThan(date1)
            } else {
                DateFilter::OlderThan(date1)
            }
        }
        3 => {
            let date1 = parse_date(cli.date1.as_deref().ok_or("--datelimit 3 needs --date1")?)?;
            let date2 = parse_date(cli.date2.as_deref().ok_or("--datelimit 3 needs --date2")?)?;
            DateFilter::Between(date1, date2)
        }
        other => return Err(format!("bad --datelimit value {other}")),
    };

    request.names = if let Some(mask) = &cli.filematch {
        if cli.filematchregex {
            NameFilter::Regex(mask.clone())
        } else {
            NameFilter::Globs(
                mask.split(['|', ';'])
                    .map(str::trim)
                    .filter(|p| !p.is_empty())
                    .map(String::from)
                    .collect(),
            )
        }
    } else {
        NameFilter::default()
    };

    if let Some(dirs) = &cli.excludedirs {
        request.exclude_dirs = dirs.clone();
    }

    Ok(request)
}

/// Slices `text` at character `column` (1-based) for `length` characters and
/// highlights the matched span.
fn highlight(text: &str, column: usize, length: usize) -> String {
    if length == 0 || column == 0 {
        return text.to_string();
    }
    let start = text
        .char_indices()
        .nth(column - 1)
        .map(|(i, _)| i)
        .unwrap_or(text.len());
    let end = text[start..]
        .char_indices()
        .nth(length)
        .map(|(i, _)| start + i)
        .unwrap_or(text.len());
    format!(
        "{}{}{}",
        &text[..start],
        text[start..end].yellow().bold(),
        &text[end..]
    )
}

fn print_result(request: &SearchRequest, result: &FileResult) {
    let path = result.path.display().to_string();
    if request.counting_only() || request.not_search {
        println!("{path}");
        return;
    }

    let encoding = result
        .encoding
        .map(|e| e.to_string())
        .unwrap_or_else(|| "?".into());
    println!(
        "{} {} {}",
        path.green().bold(),
        format!("({encoding})").dimmed(),
        format!("{} match(es)", result.match_count).yellow()
    );
    if result.read_error {
        println!("  {}", "read error".red());
    }
    if let Some(text) = &result.exception_text {
        println!("  {}", text.red());
    }
    for i in 0..result.line_numbers.len() {
        let line = result.line_numbers[i];
        let column = result.column_numbers[i];
        let length = result.match_lengths.get(i).copied().unwrap_or(0);
        let text = result
            .line_texts
            .get(&line)
            .map(String::as_str)
            .unwrap_or("");
        println!(
            "  {}:{}: {}",
            line.to_string().yellow(),
            column,
            highlight(text, column, length)
        );
    }
}

fn execute(request: SearchRequest, quiet: bool) -> Result<ExitCode, SearchError> {
    let (tx, rx) = unbounded();
    let cancel = Arc::new(AtomicBool::new(false));
    let engine_request = request.clone();
    let engine_cancel = Arc::clone(&cancel);
    let engine = thread::spawn(move || greplace::run(&engine_request, tx, engine_cancel));

    let bar = ProgressBar::new_spinner();
    bar.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner} {pos} scanned {msg}")
            .expect("static template"),
    );
    let mut matched = 0usize;
    for event in rx {
        match event {
            SearchEvent::Start => {}
            SearchEvent::Progress { .. } => bar.inc(1),
            SearchEvent::Found(result) => {
                matched += 1;
                bar.set_message(format!("({matched} matched)"));
                if !quiet {
                    bar.suspend(|| print_result(&request, &result));
                }
            }
            SearchEvent::End => break,
        }
    }
    bar.finish_and_clear();

    let summary = engine.join().expect("engine thread panicked")?;
    println!(
        "{} matches in {} files ({} searched{})",
        summary.total_matches,
        summary.files_matched,
        summary.files_searched,
        if summary.cancelled { ", cancelled" } else { "" }
    );
    if summary.replace_failures > 0 {
        eprintln!(
            "{}",
            format!("{} file(s) could not be rewritten", summary.replace_failures).red()
        );
        return Ok(ExitCode::from(3));
    }
    if summary.cancelled {
        return Ok(ExitCode::from(2));
    }
    Ok(ExitCode::SUCCESS)
}

fn main() -> ExitCode {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        EnvFilter::new("warn")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    let cli = Cli::parse();
    let request = match build_request(&cli) {
        Ok(request) => request,
        Err(message) => {
            eprintln!("greplace: {message}");
            return ExitCode::from(1);
        }
    };

    match execute(request, cli.quiet) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("greplace: {e}");
            ExitCode::from(1)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn highlight_splits_on_character_columns() {
        let out = highlight("abcdef", 3, 2);
        assert!(out.contains("ab"));
        assert!(out.contains("ef"));
    }

    #[test]
    fn parse_date_accepts_both_forms() {
        assert!(parse_date("2024-03-01").is_ok());
        assert!(parse_date("2024-03-01 12:30:00").is_ok());
        assert!(parse_date("yesterday").is_err());
    }

    #[test]
    fn build_request_maps_flags() {
        let dir = tempfile::tempdir().unwrap();
        let cli = Cli::parse_from([
            "greplace",
            "--searchpath",
            dir.path().to_str().unwrap(),
            "--searchfor",
            "x",
            "--regex",
            "-i",
            "--includesubfolders",
            "--backupfolder",
            "--filematch",
            "*.rs|-*.tmp",
        ]);
        let request = build_request(&cli).unwrap();
        assert!(request.use_regex);
        assert!(request.case_sensitive);
        assert!(request.include_subfolders);
        assert!(request.create_backup);
        assert!(request.backup_in_subfolder);
        assert_eq!(
            request.names,
            NameFilter::Globs(vec!["*.rs".into(), "-*.tmp".into()])
        );
    }

    #[test]
    fn countonly_allows_missing_pattern() {
        let dir = tempfile::tempdir().unwrap();
        let cli = Cli::parse_from([
            "greplace",
            "--searchpath",
            dir.path().to_str().unwrap(),
            "--countonly",
        ]);
        let request = build_request(&cli).unwrap();
        assert!(request.counting_only());
    }
}
