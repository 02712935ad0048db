use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use greplace::{run, run_collect, NameFilter, SearchEvent, SearchRequest};
use tempfile::tempdir;

fn write_file(dir: &Path, name: &str, content: &str) -> PathBuf {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(&path, content).unwrap();
    path
}

fn request(root: &Path, pattern: &str) -> SearchRequest {
    SearchRequest::new(vec![root.to_path_buf()], pattern)
}

#[test]
fn literal_search_reports_lines_and_columns() {
    let dir = tempdir().unwrap();
    write_file(dir.path(), "a.txt", "hello\nhello\n");
    write_file(dir.path(), "b.txt", "bye");

    let (summary, results) = run_collect(&request(dir.path(), "hello")).unwrap();

    assert_eq!(summary.files_matched, 1);
    assert_eq!(summary.total_matches, 2);
    assert_eq!(results.len(), 1);
    let a = &results[0];
    assert!(a.path.ends_with("a.txt"));
    assert_eq!(a.match_count, 2);
    assert_eq!(a.line_numbers, vec![1, 2]);
    assert_eq!(a.column_numbers, vec![1, 1]);
    assert_eq!(a.match_lengths, vec![5, 5]);
    assert_eq!(a.line_texts[&1], "hello");
}

#[test]
fn multiline_literal_spans_mixed_endings() {
    let dir = tempdir().unwrap();
    write_file(dir.path(), "d.txt", "x\r\ny\n");

    let (_, results) = run_collect(&request(dir.path(), "x\r\ny")).unwrap();

    assert_eq!(results.len(), 1);
    let d = &results[0];
    assert_eq!(d.match_count, 1);
    assert_eq!(d.line_numbers[0], 1);
    assert_eq!(d.column_numbers[0], 1);
    assert_eq!(d.line_texts[&1], "x");
    assert_eq!(d.line_texts[&2], "y");
}

#[test]
fn not_search_reports_only_clean_files() {
    let dir = tempdir().unwrap();
    write_file(dir.path(), "todo.rs", "fn main() {} // TODO fix\n");
    write_file(dir.path(), "clean.rs", "fn main() {}\n");
    write_file(dir.path(), "also_clean.txt", "nothing to see\n");

    let mut req = request(dir.path(), "TODO");
    req.case_sensitive = true;
    req.not_search = true;
    let (summary, results) = run_collect(&req).unwrap();

    assert_eq!(summary.files_matched, 2);
    let mut names: Vec<_> = results
        .iter()
        .map(|r| r.path.file_name().unwrap().to_string_lossy().into_owned())
        .collect();
    names.sort();
    assert_eq!(names, vec!["also_clean.txt", "clean.rs"]);
}

#[test]
fn empty_pattern_inventories_files_and_folders() {
    let dir = tempdir().unwrap();
    fs::create_dir(dir.path().join("sub")).unwrap();
    write_file(dir.path(), "a.txt", "x");
    write_file(dir.path(), "sub/b.txt", "y");

    let (summary, results) = run_collect(&request(dir.path(), "")).unwrap();

    assert_eq!(summary.files_matched, 3); // two files and the folder
    assert!(results.iter().any(|r| r.is_folder));
    assert!(results.iter().all(|r| r.match_count == 0));
}

#[test]
fn glob_filter_with_negation_selects_files() {
    let dir = tempdir().unwrap();
    write_file(dir.path(), "keep.rs", "needle");
    write_file(dir.path(), "skip.tmp.rs", "needle");
    write_file(dir.path(), "other.txt", "needle");

    let mut req = request(dir.path(), "needle");
    req.names = NameFilter::Globs(vec!["*.rs".into(), "-*.tmp.rs".into()]);
    let (_, results) = run_collect(&req).unwrap();

    assert_eq!(results.len(), 1);
    assert!(results[0].path.ends_with("keep.rs"));
}

#[test]
fn utf16le_text_file_is_decoded_and_searched() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("wide.txt");
    let mut bytes = vec![0xFF, 0xFE];
    for unit in "say hello\nhello again\n".encode_utf16() {
        bytes.extend_from_slice(&unit.to_le_bytes());
    }
    fs::write(&path, bytes).unwrap();

    let (_, results) = run_collect(&request(dir.path(), "hello")).unwrap();

    assert_eq!(results.len(), 1);
    let r = &results[0];
    assert_eq!(r.encoding, Some(greplace::Encoding::Utf16Le));
    assert_eq!(r.match_count, 2);
    assert_eq!(r.line_numbers, vec![1, 2]);
    assert_eq!(r.column_numbers, vec![5, 1]);
}

#[test]
fn force_binary_scans_bomless_utf16_with_line_numbers() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("e.dat");
    let mut bytes = Vec::new();
    for unit in "first needle line\nfiller\nsecond needle line\n".encode_utf16() {
        bytes.extend_from_slice(&unit.to_le_bytes());
    }
    fs::write(&path, bytes).unwrap();

    let mut req = request(dir.path(), "needle");
    req.force_binary = true;
    let (_, results) = run_collect(&req).unwrap();

    assert_eq!(results.len(), 1);
    let r = &results[0];
    assert_eq!(r.match_count, 2);
    assert_eq!(r.line_numbers, vec![1, 3]);
    assert_eq!(r.column_numbers, vec![7, 8]);
    assert_eq!(r.line_texts[&1], "first needle line");
}

#[test]
fn binary_files_are_skipped_unless_included() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("blob.bin");
    let mut bytes = vec![0u8; 64];
    bytes.extend_from_slice(b"needle");
    fs::write(&path, bytes).unwrap();

    let (_, results) = run_collect(&request(dir.path(), "needle")).unwrap();
    assert!(results.is_empty());

    let mut req = request(dir.path(), "needle");
    req.include_binary = true;
    let (_, results) = run_collect(&req).unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].match_count, 1);
}

#[test]
fn size_predicate_filters_files() {
    let dir = tempdir().unwrap();
    write_file(dir.path(), "small.txt", "x\n");
    write_file(dir.path(), "large.txt", &"x\n".repeat(100));

    let mut req = request(dir.path(), "x");
    req.size = greplace::SizeFilter::LessThan(10);
    let (_, results) = run_collect(&req).unwrap();

    assert_eq!(results.len(), 1);
    assert!(results[0].path.ends_with("small.txt"));
}

#[test]
fn events_bracket_the_run_and_found_precedes_progress() {
    let dir = tempdir().unwrap();
    write_file(dir.path(), "a.txt", "needle\n");

    let (tx, rx) = crossbeam_channel::unbounded();
    let req = request(dir.path(), "needle");
    run(&req, tx, Arc::new(AtomicBool::new(false))).unwrap();

    let events: Vec<SearchEvent> = rx.into_iter().collect();
    assert!(matches!(events.first(), Some(SearchEvent::Start)));
    assert!(matches!(events.last(), Some(SearchEvent::End)));
    let found_at = events
        .iter()
        .position(|e| matches!(e, SearchEvent::Found(_)))
        .unwrap();
    assert!(matches!(
        events[found_at + 1],
        SearchEvent::Progress { matched: true }
    ));
}

#[test]
fn cancelled_run_still_delivers_end() {
    let dir = tempdir().unwrap();
    write_file(dir.path(), "a.txt", "needle\n");

    let (tx, rx) = crossbeam_channel::unbounded();
    let req = request(dir.path(), "needle");
    let summary = run(&req, tx, Arc::new(AtomicBool::new(true))).unwrap();

    assert!(summary.cancelled);
    assert_eq!(summary.files_matched, 0);
    let events: Vec<SearchEvent> = rx.into_iter().collect();
    assert!(matches!(events.last(), Some(SearchEvent::End)));
    assert!(!events.iter().any(|e| matches!(e, SearchEvent::Found(_))));
}

#[test]
fn relative_root_is_a_configuration_error() {
    let req = SearchRequest::new(vec![PathBuf::from("relative/dir")], "x");
    let err = run_collect(&req).unwrap_err();
    assert!(matches!(err, greplace::SearchError::InvalidConfig(_)));
}

#[test]
fn invalid_regex_is_fatal_before_any_event() {
    let dir = tempdir().unwrap();
    let mut req = request(dir.path(), "(oops");
    req.use_regex = true;
    let err = run_collect(&req).unwrap_err();
    assert!(matches!(err, greplace::SearchError::InvalidPattern(_)));
}

#[test]
fn file_variable_pattern_matches_per_file() {
    let dir = tempdir().unwrap();
    write_file(dir.path(), "alpha.txt", "alpha here, beta there\n");
    write_file(dir.path(), "beta.txt", "alpha here, beta there\n");

    let mut req = request(dir.path(), "${filename}");
    req.use_regex = true;
    let (_, results) = run_collect(&req).unwrap();

    // each file matches its own stem exactly once at its own position
    assert_eq!(results.len(), 2);
    for r in &results {
        assert_eq!(r.match_count, 1);
        let stem = r.path.file_stem().unwrap().to_string_lossy().into_owned();
        let line = &r.line_texts[&r.line_numbers[0]];
        let col = r.column_numbers[0];
        let hit: String = line.chars().skip(col - 1).take(stem.chars().count()).collect();
        assert_eq!(hit, stem);
    }
}

#[test]
fn whole_words_only_matches_word_boundaries() {
    let dir = tempdir().unwrap();
    write_file(dir.path(), "a.txt", "cat catalog concat cat\n");

    let mut req = request(dir.path(), "cat");
    req.whole_words = true;
    let (_, results) = run_collect(&req).unwrap();

    assert_eq!(results[0].match_count, 2);
}

#[test]
fn long_line_is_accepted_with_empty_text() {
    let dir = tempdir().unwrap();
    let long = format!("{}needle\n", "x".repeat(5000));
    write_file(dir.path(), "a.txt", &long);

    let (_, results) = run_collect(&request(dir.path(), "needle")).unwrap();
    let r = &results[0];
    assert_eq!(r.match_count, 1);
    assert_eq!(r.line_texts[&1], "");
    assert_eq!(r.match_lengths, vec![0]);
}
