//! Language server for the RGBDS Game Boy assembler.
//!
//! Diagnostics come from running the project's real build (or `rgbasm` on
//! the single file when there is no build descriptor) and parsing what it
//! prints.

pub mod build;
pub mod codec;
pub mod debounce;
pub mod documents;
pub mod parser;
pub mod pipeline;
pub mod types;
pub mod workspace;

pub(crate) mod client;
pub(crate) mod protocol;
pub(crate) mod server;

pub use build::{BuildCommand, BuildError, BuildInvoker, BuildResult, CommandRunner, ProcessRunner};
pub use client::{Client, DiagnosticSink};
pub use debounce::ChangeDebouncer;
pub use pipeline::DiagnosticPipeline;
pub use protocol::{ProtocolError, file_uri_to_path};
pub use server::{SessionOutcome, serve};
pub use types::{CommandSpec, Diagnostic, DiagnosticSeverity, ServerSettings};
pub use workspace::{BuildMode, DocumentRef, Workspace};
