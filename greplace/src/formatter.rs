//! Replacement formatting: regex back-reference expansion plus the
//! per-file `${filepath}` / `${filename}` / `${fileext}` variables, and the
//! escaping that turns a literal search string into an equivalent regex.

use std::path::Path;

use regex::Captures;

const LITERAL_ESCAPES: &[char] = &[
    '\\', '^', '$', '.', '?', '*', '+', '[', ']', '(', ')', '{', '}', '|',
];

/// Escapes a literal search string into regex source. A CRLF pair becomes an
/// alternation over all three line-break forms so literal multi-line search
/// and replace behave the same on files with mixed endings.
pub fn literal_to_regex(literal: &str) -> String {
    let mut out = String::with_capacity(literal.len() * 2);
    let mut chars = literal.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\r' && chars.peek() == Some(&'\n') {
            chars.next();
            out.push_str(r"(?:\n|\r|\r\n)");
        } else if LITERAL_ESCAPES.contains(&c) {
            out.push('\\');
            out.push(c);
        } else {
            out.push(c);
        }
    }
    out
}

fn split_name(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(dot) => (&name[..dot], &name[dot + 1..]),
        None => (name, ""),
    }
}

/// Substitutes the predefined file variables into `input`.
///
/// With `escape_for_regex` the substituted values are escaped so a path can
/// be matched literally inside a pattern.
pub fn apply_path_variables(input: &str, path: &Path, escape_for_regex: bool) -> String {
    let full = path.to_string_lossy();
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let (stem, ext) = split_name(&name);

    let (full, stem, ext) = if escape_for_regex {
        (
            literal_to_regex(&full),
            literal_to_regex(stem),
            literal_to_regex(ext),
        )
    } else {
        (full.into_owned(), stem.to_owned(), ext.to_owned())
    };

    input
        .replace("${filepath}", &full)
        .replace("${filename}", &stem)
        .replace("${fileext}", &ext)
}

/// True when a pattern or replacement references the per-file variables and
/// therefore needs per-file recompilation.
pub fn has_path_variables(input: &str) -> bool {
    input.contains("${filepath}") || input.contains("${filename}") || input.contains("${fileext}")
}

/// Per-file replacement renderer. In regex mode `$0..$N` and `${name}` are
/// expanded from the captures; in literal mode the template is emitted
/// verbatim.
#[derive(Debug, Clone)]
pub struct ReplaceFormatter {
    template: String,
    expand: bool,
}

impl ReplaceFormatter {
    pub fn new(template: &str, regex_mode: bool, path: &Path) -> Self {
        Self {
            template: apply_path_variables(template, path, false),
            expand: regex_mode,
        }
    }

    pub fn format(&self, caps: &Captures<'_>) -> String {
        if self.expand {
            let mut out = String::new();
            caps.expand(&self.template, &mut out);
            out
        } else {
            self.template.clone()
        }
    }

    pub(crate) fn template(&self) -> &str {
        &self.template
    }

    pub(crate) fn expands(&self) -> bool {
        self.expand
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use regex::Regex;

    #[test]
    fn escapes_every_metacharacter() {
        for c in LITERAL_ESCAPES {
            let escaped = literal_to_regex(&c.to_string());
            assert_eq!(escaped, format!("\\{c}"));
            let re = Regex::new(&escaped).unwrap();
            assert!(re.is_match(&c.to_string()));
        }
    }

    #[test]
    fn crlf_becomes_alternation() {
        let src = literal_to_regex("a\r\nb");
        let re = Regex::new(&src).unwrap();
        assert!(re.is_match("a\r\nb"));
        assert!(re.is_match("a\nb"));
        assert!(re.is_match("a\rb"));
    }

    #[test]
    fn plain_text_passes_through() {
        assert_eq!(literal_to_regex("hello_world"), "hello_world");
    }

    #[test]
    fn path_variables_resolve() {
        let path = Path::new("/tmp/report.txt");
        let out = apply_path_variables("${filename}.${fileext} at ${filepath}", path, false);
        assert_eq!(out, "report.txt at /tmp/report.txt");
    }

    #[test]
    fn extensionless_name_has_empty_ext() {
        let path = Path::new("/tmp/Makefile");
        let out = apply_path_variables("${filename}|${fileext}", path, false);
        assert_eq!(out, "Makefile|");
    }

    #[test]
    fn regex_mode_expands_backrefs() {
        let re = Regex::new(r"foo=(\d)").unwrap();
        let fmt = ReplaceFormatter::new("bar=$1", true, Path::new("/tmp/c.txt"));
        let caps = re.captures("foo=7").unwrap();
        assert_eq!(fmt.format(&caps), "bar=7");
    }

    #[test]
    fn literal_mode_does_not_expand() {
        let re = Regex::new("x").unwrap();
        let fmt = ReplaceFormatter::new("cost: $1", false, Path::new("/tmp/c.txt"));
        let caps = re.captures("x").unwrap();
        assert_eq!(fmt.format(&caps), "cost: $1");
    }
}
