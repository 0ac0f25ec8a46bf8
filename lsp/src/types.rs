//! Public types shared between the diagnostic core and the binary.
//!
//! The binary constructs [`ServerSettings`] from its config file and hands it
//! to [`crate::serve`]. Everything the editor ultimately sees is a
//! [`Diagnostic`].

use serde::{Deserialize, Serialize, Serializer};

/// Tag attached to every diagnostic and used in fallback messages.
pub const SOURCE: &str = "rgbasm";

/// End column used for whole-line ranges. The assembler reports lines only.
pub const LINE_END_SENTINEL: u32 = 999;

const DEFAULT_DEBOUNCE_MS: u64 = 500;
const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// Runtime configuration for the language server.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ServerSettings {
    /// Quiet period after the last edit before a build runs.
    pub debounce_ms: u64,
    /// File name whose presence under the workspace root selects project mode.
    pub build_descriptor: String,
    /// Project build steps, run in order until one fails.
    pub project_build: Vec<CommandSpec>,
    /// Single-file fallback command. Output and input paths are appended.
    pub assembler: CommandSpec,
    /// Wall-clock limit for one build invocation.
    pub timeout_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            build_descriptor: String::from("Makefile"),
            project_build: vec![
                CommandSpec::new("make", ["clean", "-s"]),
                CommandSpec::new("make", ["-s"]),
            ],
            assembler: CommandSpec::new("rgbasm", ["-Weverything"]),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

/// A program plus its leading arguments.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct CommandSpec {
    /// Executable name or path (e.g. "make").
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl CommandSpec {
    pub fn new<I, S>(command: &str, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            command: command.to_string(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }
}

/// Severity level for a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DiagnosticSeverity {
    Error = 1,
    Warning = 2,
}

impl DiagnosticSeverity {
    /// Map the assembler's severity keyword.
    #[must_use]
    pub fn from_keyword(keyword: &str) -> Option<Self> {
        match keyword {
            "error" => Some(Self::Error),
            "warning" => Some(Self::Warning),
            _ => None,
        }
    }

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warning => "warning",
        }
    }
}

// LSP encodes severity as its numeric code.
impl Serialize for DiagnosticSeverity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(*self as u8)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Position {
    pub line: u32,
    pub character: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Range {
    pub start: Position,
    pub end: Position,
}

impl Range {
    /// Range spanning all of a 0-indexed line.
    #[must_use]
    pub fn whole_line(line: u32) -> Self {
        Self {
            start: Position { line, character: 0 },
            end: Position {
                line,
                character: LINE_END_SENTINEL,
            },
        }
    }
}

/// A positioned error or warning, ready to publish.
///
/// Fields are private; the only way to build one is [`Diagnostic::whole_line`],
/// which guarantees a non-empty message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    range: Range,
    severity: DiagnosticSeverity,
    source: &'static str,
    message: String,
}

impl Diagnostic {
    /// Build a whole-line diagnostic. An empty message is replaced with
    /// `Unknown <severity> reported by rgbasm.`
    #[must_use]
    pub fn whole_line(severity: DiagnosticSeverity, line: u32, message: &str) -> Self {
        let message = message.trim();
        let message = if message.is_empty() {
            format!("Unknown {} reported by {SOURCE}.", severity.label())
        } else {
            message.to_string()
        };
        Self {
            range: Range::whole_line(line),
            severity,
            source: SOURCE,
            message,
        }
    }

    #[must_use]
    pub fn severity(&self) -> DiagnosticSeverity {
        self.severity
    }

    /// 0-indexed line number.
    #[must_use]
    pub fn line(&self) -> u32 {
        self.range.start.line
    }

    #[must_use]
    pub fn range(&self) -> Range {
        self.range
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    #[must_use]
    pub fn source(&self) -> &str {
        self.source
    }
}
