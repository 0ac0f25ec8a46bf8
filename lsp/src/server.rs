//! Session loop: reads editor frames, dispatches them, and feeds document
//! events into the diagnostic pipeline.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;

use crate::build::ProcessRunner;
use crate::client::{Client, WriterCommand};
use crate::codec::{FrameReader, FrameWriter};
use crate::documents::DocumentStore;
use crate::pipeline::DiagnosticPipeline;
use crate::protocol::{
    self, DidChangeParams, DidChangeWatchedFilesParams, DidOpenParams, Incoming,
    InitializeParams, ProtocolError, Response, TextDocumentParams,
};
use crate::types::ServerSettings;
use crate::workspace::Workspace;

const WRITER_CHANNEL_CAPACITY: usize = 64;

type Pipeline = DiagnosticPipeline<ProcessRunner, Client>;

/// How a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOutcome {
    /// `shutdown` was requested before the session ended. Editors expect a
    /// non-zero exit status otherwise.
    pub shutdown_requested: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Exit,
}

fn response_frame(id: Value, result: Result<Value, ProtocolError>) -> Option<Value> {
    let response = match result {
        Ok(value) => Response::ok(id, value),
        Err(err) => Response::err(id, &err),
    };
    match serde_json::to_value(&response) {
        Ok(frame) => Some(frame),
        Err(e) => {
            tracing::warn!("Failed to serialize response: {e}");
            None
        }
    }
}

struct Session {
    settings: ServerSettings,
    client: Client,
    documents: DocumentStore,
    /// Set by `initialize`.
    pipeline: Option<Arc<Pipeline>>,
    shutdown_requested: bool,
}

impl Session {
    fn new(settings: ServerSettings, client: Client) -> Self {
        Self {
            settings,
            client,
            documents: DocumentStore::new(),
            pipeline: None,
            shutdown_requested: false,
        }
    }

    async fn reply(&self, id: Value, result: Result<Value, ProtocolError>) {
        if let Some(frame) = response_frame(id, result) {
            self.client.send(frame).await;
        }
    }

    async fn dispatch_body(&mut self, body: &[u8]) -> Flow {
        match serde_json::from_slice::<Value>(body) {
            Ok(frame) => self.dispatch(&frame).await,
            Err(e) => {
                tracing::warn!("Unparseable frame from editor: {e}");
                self.reply(Value::Null, Err(ProtocolError::Parse(e.to_string())))
                    .await;
                Flow::Continue
            }
        }
    }

    async fn dispatch(&mut self, frame: &Value) -> Flow {
        let Some(incoming) = protocol::parse_incoming(frame) else {
            tracing::debug!("Ignoring malformed JSON-RPC frame");
            let id = frame.get("id").cloned().unwrap_or(Value::Null);
            self.reply(id, Err(ProtocolError::InvalidRequest)).await;
            return Flow::Continue;
        };

        match incoming {
            Incoming::Request { id, method, params } => {
                self.handle_request(id, &method, params).await;
                Flow::Continue
            }
            Incoming::Notification { method, params } => {
                self.handle_notification(&method, params)
            }
            Incoming::Response { id } => {
                tracing::trace!(id = %id, "Ignoring response from editor");
                Flow::Continue
            }
        }
    }

    async fn handle_request(&mut self, id: Value, method: &str, params: Option<Value>) {
        tracing::debug!(method, "Request");
        if method == "initialize" {
            let result = self.initialize(params);
            self.reply(id, result).await;
            return;
        }

        let Some(pipeline) = self.pipeline.clone() else {
            self.reply(id, Err(ProtocolError::ServerNotInitialized)).await;
            return;
        };
        if self.shutdown_requested {
            self.reply(id, Err(ProtocolError::InvalidRequest)).await;
            return;
        }

        match method {
            "shutdown" => {
                tracing::info!("Shutdown requested");
                self.shutdown_requested = true;
                pipeline.shutdown();
                self.reply(id, Ok(Value::Null)).await;
            }
            "textDocument/diagnostic" => self.diagnostic(pipeline, id, params).await,
            _ => {
                self.reply(id, Err(ProtocolError::MethodNotFound(method.to_string())))
                    .await;
            }
        }
    }

    fn initialize(&mut self, params: Option<Value>) -> Result<Value, ProtocolError> {
        if self.pipeline.is_some() {
            return Err(ProtocolError::InvalidRequest);
        }
        let params: InitializeParams = protocol::decode_params(params)?;

        let workspace = match params.workspace_root() {
            Some(root) => {
                tracing::info!(root = %root.display(), "Workspace root");
                Some(Workspace::new(&root, self.settings.clone()))
            }
            None => {
                tracing::warn!("No workspace root supplied; diagnostics disabled");
                None
            }
        };

        let runner = ProcessRunner::new(Duration::from_secs(self.settings.timeout_secs.max(1)));
        self.pipeline = Some(DiagnosticPipeline::new(
            workspace,
            runner,
            self.client.clone(),
            Duration::from_millis(self.settings.debounce_ms),
        ));
        Ok(protocol::initialize_result())
    }

    /// Unknown documents are answered at once with an empty report. Builds
    /// run on their own task so the loop keeps reading.
    async fn diagnostic(&self, pipeline: Arc<Pipeline>, id: Value, params: Option<Value>) {
        let params: TextDocumentParams = match protocol::decode_params(params) {
            Ok(params) => params,
            Err(err) => return self.reply(id, Err(err)).await,
        };
        let uri = params.text_document.uri;

        if !self.documents.contains(&uri) {
            tracing::debug!(uri = %uri, "Diagnostic request for unknown document");
            self.reply(id, Ok(protocol::full_report(&[]))).await;
            return;
        }

        let client = self.client.clone();
        tokio::spawn(async move {
            let diagnostics = pipeline.pull(&uri).await;
            if let Some(frame) = response_frame(id, Ok(protocol::full_report(&diagnostics))) {
                client.send(frame).await;
            }
        });
    }

    fn handle_notification(&mut self, method: &str, params: Option<Value>) -> Flow {
        let result = match method {
            "exit" => {
                tracing::info!(
                    shutdown_requested = self.shutdown_requested,
                    "Exit requested"
                );
                return Flow::Exit;
            }
            "textDocument/didOpen" => self.did_open(params),
            "textDocument/didChange" => self.did_change(params),
            "textDocument/didClose" => self.did_close(params),
            "workspace/didChangeWatchedFiles" => self.did_change_watched_files(params),
            _ => {
                tracing::trace!(method, "Ignoring notification");
                Ok(())
            }
        };
        if let Err(err) = result {
            tracing::warn!(method, "Dropping notification: {err}");
        }
        Flow::Continue
    }

    fn did_open(&mut self, params: Option<Value>) -> Result<(), ProtocolError> {
        let DidOpenParams { text_document } = protocol::decode_params(params)?;
        let uri = text_document.uri;
        let version = text_document.version;
        tracing::debug!(uri = %uri, version, "Opened");

        self.documents.open(uri.clone(), version, text_document.text);
        if let Some(pipeline) = &self.pipeline {
            pipeline.on_change(uri, version);
        }
        Ok(())
    }

    fn did_change(&mut self, params: Option<Value>) -> Result<(), ProtocolError> {
        let DidChangeParams {
            text_document,
            content_changes,
        } = protocol::decode_params(params)?;
        let uri = text_document.uri;
        let version = text_document.version;

        if !self.documents.change(&uri, version, content_changes) {
            tracing::debug!(uri = %uri, "Change for document that is not open");
            return Ok(());
        }
        if let Some(pipeline) = &self.pipeline {
            pipeline.on_change(uri, version);
        }
        Ok(())
    }

    fn did_close(&mut self, params: Option<Value>) -> Result<(), ProtocolError> {
        let TextDocumentParams { text_document } = protocol::decode_params(params)?;
        let uri = text_document.uri;
        tracing::debug!(uri = %uri, "Closed");

        self.documents.close(&uri);
        if let Some(pipeline) = &self.pipeline {
            pipeline.on_close(&uri);
        }
        Ok(())
    }

    /// Includes make any open document depend on files it never names, so
    /// every open document is rechecked.
    fn did_change_watched_files(&self, params: Option<Value>) -> Result<(), ProtocolError> {
        let params: DidChangeWatchedFilesParams = protocol::decode_params(params)?;
        tracing::debug!(count = params.changes.len(), "Watched files changed");
        for event in &params.changes {
            tracing::trace!(uri = %event.uri, "Watched file event");
        }

        let Some(pipeline) = &self.pipeline else {
            return Ok(());
        };
        for uri in self.documents.uris() {
            if let Some(doc) = self.documents.get(uri) {
                pipeline.on_change(uri.clone(), doc.version);
            }
        }
        Ok(())
    }

    fn close(&self) {
        if let Some(pipeline) = &self.pipeline {
            pipeline.shutdown();
        }
    }
}

/// Run one language server session until `exit` or end of input.
///
/// `input` carries the editor's frames and `output` receives ours. Only the
/// writer task touches `output`.
pub async fn serve<I, O>(input: I, output: O, settings: ServerSettings) -> Result<SessionOutcome>
where
    I: AsyncRead + Unpin,
    O: AsyncWrite + Unpin + Send + 'static,
{
    let (writer_tx, mut writer_rx) = mpsc::channel::<WriterCommand>(WRITER_CHANNEL_CAPACITY);
    let writer_handle = tokio::spawn(async move {
        let mut writer = FrameWriter::new(output);
        while let Some(cmd) = writer_rx.recv().await {
            match cmd {
                WriterCommand::Send(frame) => {
                    if let Err(e) = writer.write_frame(&frame).await {
                        tracing::warn!("Write to editor failed: {e}");
                        break;
                    }
                }
                WriterCommand::Shutdown => break,
            }
        }
    });

    let client = Client::new(writer_tx);
    let mut session = Session::new(settings, client.clone());
    let mut reader = FrameReader::new(input);

    let read_result = loop {
        match reader.read_body().await {
            Ok(Some(body)) => {
                if session.dispatch_body(&body).await == Flow::Exit {
                    break Ok(());
                }
            }
            Ok(None) => {
                tracing::info!("Editor closed the input stream");
                break Ok(());
            }
            Err(e) => {
                tracing::error!("Reading from editor failed: {e:#}");
                break Err(e);
            }
        }
    };

    session.close();
    let outcome = SessionOutcome {
        shutdown_requested: session.shutdown_requested,
    };
    drop(session);

    // Frames queued before this point are still written.
    client.shutdown().await;
    if let Err(e) = writer_handle.await {
        tracing::warn!("Writer task failed: {e}");
    }

    read_result.map(|()| outcome)
}
