//! Assembler output parser.
//!
//! Turns the free-text output of `rgbasm`/`make` into [`Diagnostic`]s for a
//! single document. Two shapes are recognised:
//!
//! ```text
//! error: src/main.asm(12): Unknown symbol "foo"
//!
//! error: src/header.asm(74):
//!     Macro "x" not defined
//! ```
//!
//! In the second shape the message lives on the following line, indented by
//! at least four whitespace characters. Everything else in the output
//! (banners, make progress, blank lines) is ignored.

use std::path::{Component, MAIN_SEPARATOR, Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;

use crate::types::{Diagnostic, DiagnosticSeverity};
use crate::workspace::DocumentRef;

fn primary_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(error|warning):\s*(.*?)\((\d+)\):\s*(.*)")
            .expect("valid primary diagnostic regex")
    })
}

fn continuation_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^\s{4,}(.*)").expect("valid continuation regex"))
}

/// One recognised diagnostic line before file filtering.
#[derive(Debug, Clone, PartialEq, Eq)]
struct RawMatch {
    severity: DiagnosticSeverity,
    reported_file: String,
    /// 1-indexed, as printed by the assembler.
    reported_line: u32,
    message: String,
}

impl RawMatch {
    fn from_line(line: &str) -> Option<Self> {
        let caps = primary_pattern().captures(line)?;
        let severity = DiagnosticSeverity::from_keyword(&caps[1])?;
        let Ok(reported_line) = caps[3].parse::<u32>() else {
            tracing::trace!(line, "Line number out of range, skipping");
            return None;
        };
        Some(Self {
            severity,
            reported_file: caps[2].to_string(),
            reported_line,
            message: caps[4].trim().to_string(),
        })
    }

    fn into_diagnostic(self) -> Diagnostic {
        Diagnostic::whole_line(
            self.severity,
            self.reported_line.saturating_sub(1),
            &self.message,
        )
    }
}

fn continuation(line: &str) -> Option<String> {
    continuation_pattern()
        .captures(line)
        .map(|caps| caps[1].trim().to_string())
}

/// Rewrite separators for the host platform and fold `.`/`..` lexically.
///
/// Leading `..` components that have nothing left to cancel are kept.
pub(crate) fn normalize_reported_path(file: &str) -> PathBuf {
    let native: String = file
        .chars()
        .map(|c| if c == '/' || c == '\\' { MAIN_SEPARATOR } else { c })
        .collect();

    let mut out: Vec<Component<'_>> = Vec::new();
    for component in Path::new(&native).components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match out.last() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::RootDir | Component::Prefix(_)) => {}
                _ => out.push(component),
            },
            other => out.push(other),
        }
    }
    out.iter().collect()
}

/// Parse combined build output into diagnostics for one document.
///
/// A diagnostic is kept only when `relative_path` ends with the reported
/// file. Results keep the order the assembler printed them in.
#[must_use]
pub fn parse(output: &str, relative_path: &Path) -> Vec<Diagnostic> {
    parse_matching(output, |reported| relative_path.ends_with(reported))
}

/// Like [`parse`], but also accepts diagnostics that name the document by
/// its absolute path, which is how the assembler echoes a file it was handed
/// directly in single-file mode.
#[must_use]
pub fn parse_document(output: &str, document: &DocumentRef) -> Vec<Diagnostic> {
    parse_matching(output, |reported| {
        if reported.is_absolute() {
            reported == document.absolute_path()
        } else {
            document.relative_path().ends_with(reported)
        }
    })
}

fn parse_matching(output: &str, accepts: impl Fn(&Path) -> bool) -> Vec<Diagnostic> {
    let lines: Vec<&str> = output
        .lines()
        .filter(|line| !line.trim().is_empty())
        .collect();

    let mut diagnostics = Vec::new();
    let mut i = 0;
    while i < lines.len() {
        let Some(mut raw) = RawMatch::from_line(lines[i]) else {
            i += 1;
            continue;
        };

        if raw.message.is_empty()
            && let Some(next) = lines.get(i + 1)
            && let Some(message) = continuation(next)
        {
            raw.message = message;
            i += 1;
        }
        i += 1;

        let reported = normalize_reported_path(&raw.reported_file);
        if reported.as_os_str().is_empty() || !accepts(&reported) {
            tracing::trace!(file = %raw.reported_file, "Dropping diagnostic for other file");
            continue;
        }

        diagnostics.push(raw.into_diagnostic());
    }

    diagnostics
}
