//! Attribute and name predicates applied to walker entries.

use std::path::Path;
use std::time::SystemTime;

use glob::{MatchOptions, Pattern};
use regex::{Regex, RegexBuilder};

use crate::config::{DateFilter, NameFilter, SizeFilter};
use crate::errors::{SearchError, SearchResult};

const GLOB_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: false,
    require_literal_separator: false,
    require_literal_leading_dot: false,
};

fn full_match_regex(src: &str, what: &str) -> SearchResult<Regex> {
    RegexBuilder::new(&format!("^(?:{src})$"))
        .case_insensitive(true)
        .build()
        .map_err(|e| SearchError::config(format!("bad {what} regex '{src}': {e}")))
}

/// Compiled form of [`NameFilter`].
///
/// Glob lists are evaluated left to right over the lower-cased basename:
/// a leading `-` pattern contributes an AND-NOT term, other patterns
/// contribute OR terms, and the accumulator starts true iff the first
/// pattern is negative. The regex form tries the basename first and falls
/// back to the full path.
#[derive(Debug)]
pub(crate) enum NameMatcher {
    All,
    Globs {
        patterns: Vec<(bool, Pattern)>,
        start: bool,
    },
    Regex(Regex),
}

impl NameMatcher {
    pub fn compile(filter: &NameFilter) -> SearchResult<Self> {
        match filter {
            NameFilter::Globs(items) => {
                if items.is_empty() {
                    return Ok(NameMatcher::All);
                }
                let mut patterns = Vec::with_capacity(items.len());
                for item in items {
                    let (negated, src) = match item.strip_prefix('-') {
                        Some(rest) => (true, rest),
                        None => (false, item.as_str()),
                    };
                    let pattern = Pattern::new(src).map_err(|e| {
                        SearchError::config(format!("bad file pattern '{item}': {e}"))
                    })?;
                    patterns.push((negated, pattern));
                }
                let start = patterns[0].0;
                Ok(NameMatcher::Globs { patterns, start })
            }
            NameFilter::Regex(src) => {
                if src.is_empty() {
                    return Ok(NameMatcher::All);
                }
                Ok(NameMatcher::Regex(full_match_regex(src, "file-match")?))
            }
        }
    }

    pub fn matches(&self, path: &Path) -> bool {
        match self {
            NameMatcher::All => true,
            NameMatcher::Globs { patterns, start } => {
                let name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                let mut accepted = *start;
                for (negated, pattern) in patterns {
                    if *negated {
                        accepted = accepted && !pattern.matches_with(&name, GLOB_OPTIONS);
                    } else {
                        accepted = accepted || pattern.matches_with(&name, GLOB_OPTIONS);
                    }
                }
                accepted
            }
            NameMatcher::Regex(re) => {
                let name = path.file_name().map(|n| n.to_string_lossy());
                if let Some(name) = name {
                    if re.is_match(&name) {
                        return true;
                    }
                }
                re.is_match(&path.to_string_lossy())
            }
        }
    }
}

/// Directory-pruning regex, matched against the basename, the full path and
/// the root-relative path of each directory.
#[derive(Debug)]
pub(crate) struct DirExcluder(Option<Regex>);

impl DirExcluder {
    pub fn compile(src: &str) -> SearchResult<Self> {
        if src.is_empty() {
            return Ok(DirExcluder(None));
        }
        Ok(DirExcluder(Some(full_match_regex(src, "exclude-dirs")?)))
    }

    pub fn excludes(&self, dir: &Path, root: &Path) -> bool {
        let Some(re) = &self.0 else {
            return false;
        };
        if let Some(name) = dir.file_name() {
            if re.is_match(&name.to_string_lossy()) {
                return true;
            }
        }
        if re.is_match(&dir.to_string_lossy()) {
            return true;
        }
        if let Ok(relative) = dir.strip_prefix(root) {
            if relative.components().count() > 1 && re.is_match(&relative.to_string_lossy()) {
                return true;
            }
        }
        false
    }
}

pub(crate) fn passes_size(filter: SizeFilter, size: u64) -> bool {
    match filter {
        SizeFilter::All => true,
        SizeFilter::LessThan(limit) => size < limit,
        SizeFilter::Equal(limit) => size == limit,
        SizeFilter::GreaterThan(limit) => size > limit,
    }
}

pub(crate) fn passes_date(filter: DateFilter, modified: Option<SystemTime>) -> bool {
    let Some(modified) = modified else {
        return true;
    };
    match filter {
        DateFilter::All => true,
        DateFilter::NewerThan(t) => modified >= t,
        DateFilter::OlderThan(t) => modified <= t,
        DateFilter::Between(t1, t2) => modified >= t1 && modified <= t2,
    }
}
