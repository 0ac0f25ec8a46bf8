//! Outgoing half of the session: everything the server sends unprompted.

use std::future::Future;

use serde_json::Value;
use tokio::sync::mpsc;
use url::Url;

use crate::protocol::{self, Notification};
use crate::types::Diagnostic;

pub(crate) enum WriterCommand {
    Send(Value),
    Shutdown,
}

/// Where finished diagnostics and tooling errors go.
pub trait DiagnosticSink: Send + Sync + 'static {
    /// Replace everything shown for `uri` with `diagnostics`.
    fn publish(&self, uri: &Url, diagnostics: &[Diagnostic]) -> impl Future<Output = ()> + Send;

    /// Surface a tooling failure in the editor's output channel.
    fn log_error(&self, message: &str) -> impl Future<Output = ()> + Send;
}

/// Handle onto the frame writer task. Cheap to clone.
#[derive(Clone)]
pub struct Client {
    writer_tx: mpsc::Sender<WriterCommand>,
}

impl Client {
    pub(crate) fn new(writer_tx: mpsc::Sender<WriterCommand>) -> Self {
        Self { writer_tx }
    }

    pub(crate) async fn send(&self, frame: Value) {
        if self.writer_tx.send(WriterCommand::Send(frame)).await.is_err() {
            tracing::debug!("Writer closed, dropping outgoing frame");
        }
    }

    async fn notify(&self, method: &'static str, params: Value) {
        match serde_json::to_value(Notification::new(method, Some(params))) {
            Ok(frame) => self.send(frame).await,
            Err(e) => tracing::warn!("Failed to serialize {method}: {e}"),
        }
    }

    pub(crate) async fn shutdown(&self) {
        let _ = self.writer_tx.send(WriterCommand::Shutdown).await;
    }
}

impl DiagnosticSink for Client {
    async fn publish(&self, uri: &Url, diagnostics: &[Diagnostic]) {
        tracing::debug!(uri = %uri, count = diagnostics.len(), "Publishing diagnostics");
        let params = protocol::publish_diagnostics_params(uri, diagnostics);
        self.notify("textDocument/publishDiagnostics", params).await;
    }

    async fn log_error(&self, message: &str) {
        let params = protocol::log_message_params(protocol::MESSAGE_TYPE_ERROR, message);
        self.notify("window/logMessage", params).await;
    }
}
