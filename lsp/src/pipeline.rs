//! Diagnostic pipeline: edit, debounce, build, parse, publish.
//!
//! Two triggers share the build/parse path:
//!
//! - **Push**: document opened or changed. Debounced, then the result is
//!   published unsolicited (even when empty, to clear stale entries).
//! - **Pull**: `textDocument/diagnostic`. Runs immediately and the result is
//!   the request's answer.
//!
//! Every trigger takes a fresh generation for its document. A push whose
//! generation is no longer current drops its result, and starting a newer
//! push aborts the older task (killing its subprocess), so a slow build can
//! never overwrite the diagnostics of a more recent edit.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use tokio::task::AbortHandle;
use url::Url;

use crate::build::{BuildInvoker, CommandRunner};
use crate::client::DiagnosticSink;
use crate::debounce::ChangeDebouncer;
use crate::parser;
use crate::types::Diagnostic;
use crate::workspace::Workspace;

struct InFlight {
    generation: u64,
    /// Set for push runs only; pulls are never aborted.
    task: Option<AbortHandle>,
}

pub struct DiagnosticPipeline<R, S> {
    /// `None` when the editor supplied no workspace root.
    workspace: Option<Workspace>,
    invoker: BuildInvoker<R>,
    sink: S,
    debouncer: ChangeDebouncer<Url, i32>,
    in_flight: Mutex<HashMap<Url, InFlight>>,
    next_generation: AtomicU64,
}

impl<R: CommandRunner, S: DiagnosticSink> DiagnosticPipeline<R, S> {
    pub fn new(workspace: Option<Workspace>, runner: R, sink: S, window: Duration) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<Self>| {
            let weak = weak.clone();
            let debouncer = ChangeDebouncer::new(window, move |uri: Url, version: i32| {
                if let Some(pipeline) = weak.upgrade() {
                    tracing::debug!(uri = %uri, version, "Debounce window elapsed");
                    pipeline.push(uri);
                }
            });
            Self {
                workspace,
                invoker: BuildInvoker::new(runner),
                sink,
                debouncer,
                in_flight: Mutex::new(HashMap::new()),
                next_generation: AtomicU64::new(0),
            }
        })
    }

    #[must_use]
    pub fn workspace(&self) -> Option<&Workspace> {
        self.workspace.as_ref()
    }

    /// A document was opened or edited. Schedules a push run.
    pub fn on_change(&self, uri: Url, version: i32) {
        self.debouncer.schedule(uri, version);
    }

    /// A document was closed: forget its timer and any running build.
    pub fn on_close(&self, uri: &Url) {
        self.debouncer.cancel(uri);
        let removed = self
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(uri);
        if let Some(InFlight {
            task: Some(task), ..
        }) = removed
        {
            task.abort();
        }
    }

    /// Session ending: nothing pending may fire, nothing running may publish.
    pub fn shutdown(&self) {
        self.debouncer.cancel_all();
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        for (_, entry) in in_flight.drain() {
            if let Some(task) = entry.task {
                task.abort();
            }
        }
    }

    /// Run now and answer with the result. Supersedes any in-flight push.
    pub async fn pull(&self, uri: &Url) -> Vec<Diagnostic> {
        let generation = self.begin(uri);
        let diagnostics = self.run(uri).await;
        self.finish(uri, generation);
        diagnostics
    }

    /// Run in the background and publish, unless superseded meanwhile.
    pub fn push(self: &Arc<Self>, uri: Url) {
        let generation = self.begin(&uri);
        let pipeline = Arc::clone(self);
        let task_uri = uri.clone();
        let task = tokio::spawn(async move {
            let diagnostics = pipeline.run(&task_uri).await;
            if pipeline.finish(&task_uri, generation) {
                pipeline.sink.publish(&task_uri, &diagnostics).await;
            } else {
                tracing::debug!(uri = %task_uri, generation, "Discarding stale diagnostics");
            }
        });

        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(entry) = in_flight.get_mut(&uri)
            && entry.generation == generation
        {
            entry.task = Some(task.abort_handle());
        }
    }

    /// Number of documents with a build in flight.
    #[must_use]
    pub fn in_flight_count(&self) -> usize {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn begin(&self, uri: &Url) -> u64 {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed) + 1;
        let previous = self
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                uri.clone(),
                InFlight {
                    generation,
                    task: None,
                },
            );
        if let Some(InFlight {
            task: Some(task), ..
        }) = previous
        {
            tracing::debug!(uri = %uri, "Superseding in-flight build");
            task.abort();
        }
        generation
    }

    /// Returns whether `generation` was still current.
    fn finish(&self, uri: &Url, generation: u64) -> bool {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        match in_flight.get(uri) {
            Some(entry) if entry.generation == generation => {
                in_flight.remove(uri);
                true
            }
            _ => false,
        }
    }

    async fn run(&self, uri: &Url) -> Vec<Diagnostic> {
        let Some(workspace) = &self.workspace else {
            tracing::warn!(uri = %uri, "No workspace root, skipping diagnostics");
            return Vec::new();
        };
        let Some(document) = workspace.document(uri) else {
            tracing::debug!(uri = %uri, "Not a file URI, skipping diagnostics");
            return Vec::new();
        };

        // Clear stale entries before the (slow) build starts.
        self.sink.publish(uri, &[]).await;

        let result = self.invoker.invoke(workspace, &document).await;
        if let Some(err) = &result.tooling_error {
            self.sink
                .log_error(&format!(
                    "Error running build for {}: {err}",
                    document.relative_path().display()
                ))
                .await;
        }

        let diagnostics = parser::parse_document(&result.combined_output, &document);
        tracing::info!(
            file = %document.relative_path().display(),
            succeeded = result.exit_succeeded,
            count = diagnostics.len(),
            "Diagnostics computed"
        );
        diagnostics
    }
}
