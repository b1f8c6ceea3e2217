//! Language client: owns the server connection and keeps it in sync with
//! the host workspace.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::{anyhow, bail, Context};
use async_trait::async_trait;
use lsp_types::{
    ConfigurationParams, InitializedParams, LogMessageParams, MessageType,
    PublishDiagnosticsParams, Url,
};
use serde::Serialize;
use serde_json::Value;
use tokio::process::Child;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::error::Error;
use crate::host::{
    selector_matches, DiagnosticCollection, Disposable, DocumentFilter, FileSystemWatcher, Host,
    TextDocument, Workspace, WorkspaceEvent,
};
use crate::lsp::protocol::{self, Incoming};
use crate::lsp::stdio_transport::start_server;
use crate::lsp::transport::{MessageReader, MessageWriter, Transport};
use crate::lsp::types::{MessageFactory, Notification, Response, METHOD_NOT_FOUND};

const INIT_TIMEOUT: Duration = Duration::from_secs(30);

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

/// How to reach the server.
pub enum ServerOptions {
    /// Spawn a process and talk over its stdio.
    Executable { command: PathBuf, args: Vec<String> },
    /// Use an already connected transport.
    #[cfg(test)]
    Transport(Transport),
}

impl ServerOptions {
    pub fn executable(command: impl Into<PathBuf>) -> Self {
        ServerOptions::Executable {
            command: command.into(),
            args: Vec::new(),
        }
    }
}

#[derive(Clone, Default)]
pub struct SynchronizeOptions {
    /// Settings section pushed to the server and served for
    /// `workspace/configuration`.
    pub configuration_section: Option<String>,
    /// File changes matching this watcher are forwarded to the server.
    pub file_events: Option<FileSystemWatcher>,
}

#[derive(Clone, Default)]
pub struct ClientOptions {
    pub document_selector: Vec<DocumentFilter>,
    pub synchronize: SynchronizeOptions,
}

enum ClientState {
    Created(ServerOptions),
    Starting,
    Running(Arc<Connection>),
    Stopped,
}

/// Handle to a language client. Clones share the same connection.
#[derive(Clone)]
pub struct LanguageClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    name: String,
    options: ClientOptions,
    state: Mutex<ClientState>,
}

impl LanguageClient {
    pub fn new(name: &str, server: ServerOptions, options: ClientOptions) -> Self {
        LanguageClient {
            inner: Arc::new(ClientInner {
                name: name.to_string(),
                options,
                state: Mutex::new(ClientState::Created(server)),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    #[cfg(test)]
    pub fn is_running(&self) -> bool {
        matches!(*lock(&self.inner.state), ClientState::Running(_))
    }

    /// Connect to the server, run the initialize handshake and begin
    /// synchronizing `host`'s workspace. A client starts at most once.
    pub async fn start(&self, host: &Host) -> anyhow::Result<ClientDisposable> {
        let server = {
            let mut state = lock(&self.inner.state);
            match std::mem::replace(&mut *state, ClientState::Starting) {
                ClientState::Created(server) => server,
                previous => {
                    *state = previous;
                    bail!("language client '{}' was already started", self.name());
                }
            }
        };

        match self.connect(server, host).await {
            Ok(connection) => {
                *lock(&self.inner.state) = ClientState::Running(connection);
                tracing::info!("Language client '{}' started", self.name());
                Ok(ClientDisposable {
                    client: self.clone(),
                })
            }
            Err(e) => {
                *lock(&self.inner.state) = ClientState::Stopped;
                Err(e)
            }
        }
    }

    async fn connect(&self, server: ServerOptions, host: &Host) -> anyhow::Result<Arc<Connection>> {
        let (transport, child) = match server {
            ServerOptions::Executable { command, args } => {
                let (child, transport) = start_server(&command, &args)?;
                (transport, Some(child))
            }
            #[cfg(test)]
            ServerOptions::Transport(transport) => (transport, None),
        };

        let connection = Connection::open(self.name(), transport, child, host, &self.inner.options);
        if let Err(e) = connection.initialize(host).await {
            connection.shutdown().await;
            return Err(e);
        }
        connection.synchronize(host, &self.inner.options)?;
        Ok(connection)
    }

    /// Enqueue a request. Drop the returned [`PendingResponse`] to ignore the
    /// reply.
    pub fn send_request<P: Serialize>(
        &self,
        method: &str,
        params: P,
    ) -> anyhow::Result<PendingResponse> {
        self.connection()?.outbox.send_request(method, params)
    }

    /// Shut the server down. Does nothing unless running.
    pub async fn stop(&self) {
        if let Some(connection) = self.take_connection() {
            connection.shutdown().await;
            tracing::info!("Language client '{}' stopped", self.name());
        }
    }

    /// Stop without waiting on the server: `exit` is queued and the process
    /// killed.
    pub fn abort(&self) {
        if let Some(connection) = self.take_connection() {
            connection.abort();
            tracing::info!("Language client '{}' aborted", self.name());
        }
    }

    fn take_connection(&self) -> Option<Arc<Connection>> {
        let mut state = lock(&self.inner.state);
        match std::mem::replace(&mut *state, ClientState::Stopped) {
            ClientState::Running(connection) => Some(connection),
            previous => {
                *state = previous;
                None
            }
        }
    }

    fn connection(&self) -> anyhow::Result<Arc<Connection>> {
        match &*lock(&self.inner.state) {
            ClientState::Running(connection) => Ok(connection.clone()),
            _ => Err(Error::ClientNotRunning.into()),
        }
    }
}

/// Stops the client when disposed.
pub struct ClientDisposable {
    client: LanguageClient,
}

#[async_trait]
impl Disposable for ClientDisposable {
    async fn dispose(&mut self) {
        self.client.stop().await;
    }

    fn dispose_now(&mut self) {
        self.client.abort();
    }
}

/// A request in flight.
pub struct PendingResponse {
    id: i64,
    method: String,
    rx: oneshot::Receiver<Response>,
}

impl PendingResponse {
    /// Wait for the reply. A JSON-RPC error reply becomes `Err`.
    pub async fn wait(self) -> anyhow::Result<Value> {
        let response = self.rx.await.map_err(|_| {
            anyhow!(
                "{} request {} abandoned: connection closed",
                self.method,
                self.id
            )
        })?;
        if let Some(error) = response.error {
            bail!("{} failed ({}): {}", self.method, error.code, error.message);
        }
        Ok(response.result.unwrap_or(Value::Null))
    }
}

enum WriterCommand {
    Send(String),
    Shutdown,
}

type PendingMap = Arc<Mutex<HashMap<i64, oneshot::Sender<Response>>>>;

/// Everything needed to put messages on the wire. Cheap to clone into tasks.
#[derive(Clone)]
struct Outbox {
    name: Arc<str>,
    factory: Arc<MessageFactory>,
    writer_tx: mpsc::UnboundedSender<WriterCommand>,
    pending: PendingMap,
    /// Set under the `pending` lock once no more replies can arrive.
    closed: Arc<AtomicBool>,
    /// URIs we've sent didOpen for.
    opened: Arc<Mutex<HashSet<Url>>>,
}

impl Outbox {
    fn enqueue(&self, body: String) -> anyhow::Result<()> {
        self.writer_tx
            .send(WriterCommand::Send(body))
            .map_err(|_| anyhow!("connection to '{}' is closed", self.name))
    }

    fn send_request<P: Serialize>(&self, method: &str, params: P) -> anyhow::Result<PendingResponse> {
        let request = self.factory.create_request(method, params)?;
        let id = request.id;
        let body = serde_json::to_string(&request).context("serializing request")?;

        let (tx, rx) = oneshot::channel();
        {
            let mut pending = lock(&self.pending);
            if self.closed.load(Ordering::SeqCst) {
                bail!("connection to '{}' is closed", self.name);
            }
            pending.insert(id, tx);
        }
        if let Err(e) = self.enqueue(body) {
            lock(&self.pending).remove(&id);
            return Err(e);
        }
        tracing::debug!("-> {method} #{id}");

        Ok(PendingResponse {
            id,
            method: method.to_string(),
            rx,
        })
    }

    fn send_notification<P: Serialize>(&self, method: &str, params: P) -> anyhow::Result<()> {
        let notification = self.factory.create_notification(method, params)?;
        let body = serde_json::to_string(&notification).context("serializing notification")?;
        self.enqueue(body)?;
        tracing::debug!("-> {method}");
        Ok(())
    }

    /// Fail every request still waiting and refuse new ones.
    fn close(&self) {
        let mut pending = lock(&self.pending);
        self.closed.store(true, Ordering::SeqCst);
        pending.clear();
    }

    fn reply(&self, response: &Response) -> anyhow::Result<()> {
        let body = serde_json::to_string(response).context("serializing response")?;
        self.enqueue(body)
    }

    fn did_open(&self, document: &TextDocument) -> anyhow::Result<()> {
        if !lock(&self.opened).insert(document.uri.clone()) {
            return Ok(());
        }
        self.send_notification("textDocument/didOpen", protocol::did_open_params(document))
    }

    fn did_close(&self, document: &TextDocument) -> anyhow::Result<()> {
        if !lock(&self.opened).remove(&document.uri) {
            return Ok(());
        }
        self.send_notification(
            "textDocument/didClose",
            protocol::did_close_params(&document.uri),
        )
    }
}

struct Connection {
    outbox: Outbox,
    child: tokio::sync::Mutex<Option<Child>>,
    writer_task: Mutex<Option<JoinHandle<()>>>,
    /// Reader and event forwarders; aborted on shutdown.
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Connection {
    fn open(
        name: &str,
        transport: Transport,
        child: Option<Child>,
        host: &Host,
        options: &ClientOptions,
    ) -> Arc<Self> {
        let (reader, writer) = transport.into_parts();
        let (writer_tx, writer_rx) = mpsc::unbounded_channel();

        let outbox = Outbox {
            name: Arc::from(name),
            factory: Arc::new(MessageFactory::new()),
            writer_tx,
            pending: Arc::new(Mutex::new(HashMap::new())),
            closed: Arc::new(AtomicBool::new(false)),
            opened: Arc::new(Mutex::new(HashSet::new())),
        };

        let writer_task = tokio::spawn(run_writer(outbox.name.clone(), writer, writer_rx));
        let dispatcher = Dispatcher {
            outbox: outbox.clone(),
            workspace: host.workspace.clone(),
            diagnostics: host.diagnostics.clone(),
            section: options.synchronize.configuration_section.clone(),
        };
        let reader_task = tokio::spawn(dispatcher.run(reader));

        Arc::new(Connection {
            outbox,
            child: tokio::sync::Mutex::new(child),
            writer_task: Mutex::new(Some(writer_task)),
            tasks: Mutex::new(vec![reader_task]),
        })
    }

    async fn initialize(&self, host: &Host) -> anyhow::Result<()> {
        let params = protocol::initialize_params(&self.outbox.name, host.workspace.root());
        let pending = self.outbox.send_request("initialize", params)?;
        let result = tokio::time::timeout(INIT_TIMEOUT, pending.wait())
            .await
            .context("initialize timed out")??;

        if let Some(server) = result.get("serverInfo").and_then(|info| info.get("name")) {
            tracing::info!("Connected to {server}");
        }
        self.outbox
            .send_notification("initialized", InitializedParams {})
    }

    /// Push current state to the server and start forwarding workspace
    /// events.
    fn synchronize(&self, host: &Host, options: &ClientOptions) -> anyhow::Result<()> {
        // Subscribe before the initial pass so nothing opened in between is missed.
        let events = host.workspace.subscribe();

        if let Some(section) = &options.synchronize.configuration_section {
            self.outbox.send_notification(
                "workspace/didChangeConfiguration",
                protocol::did_change_configuration_params(
                    section,
                    host.workspace.get_configuration(section),
                ),
            )?;
        }
        for document in host.workspace.text_documents() {
            if selector_matches(&options.document_selector, &document) {
                self.outbox.did_open(&document)?;
            }
        }

        let forwarder = WorkspaceForwarder {
            outbox: self.outbox.clone(),
            workspace: host.workspace.clone(),
            selector: options.document_selector.clone(),
            section: options.synchronize.configuration_section.clone(),
        };
        let mut tasks = lock(&self.tasks);
        tasks.push(tokio::spawn(forwarder.run(events)));

        if let Some(watcher) = &options.synchronize.file_events {
            tracing::debug!("Forwarding file events matching {}", watcher.pattern());
            let outbox = self.outbox.clone();
            let mut stream = watcher.watch();
            tasks.push(tokio::spawn(async move {
                while let Some(event) = stream.next().await {
                    let params = protocol::did_change_watched_files_params(&[event]);
                    if params.changes.is_empty() {
                        continue;
                    }
                    if let Err(e) =
                        outbox.send_notification("workspace/didChangeWatchedFiles", params)
                    {
                        tracing::warn!("{e:#}");
                        break;
                    }
                }
            }));
        }
        Ok(())
    }

    /// `shutdown` request, `exit` notification, then wait for the process;
    /// kill it if it lingers.
    async fn shutdown(&self) {
        match self.outbox.send_request("shutdown", ()) {
            Ok(pending) => match tokio::time::timeout(SHUTDOWN_TIMEOUT, pending.wait()).await {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => tracing::debug!("shutdown request failed: {e:#}"),
                Err(_) => tracing::warn!("'{}' did not answer shutdown", self.outbox.name),
            },
            Err(e) => tracing::debug!("shutdown request not sent: {e:#}"),
        }
        let _ = self.outbox.send_notification("exit", ());
        let _ = self.outbox.writer_tx.send(WriterCommand::Shutdown);

        let writer_task = lock(&self.writer_task).take();
        if let Some(task) = writer_task {
            if tokio::time::timeout(SHUTDOWN_TIMEOUT, task).await.is_err() {
                tracing::warn!("'{}' writer did not drain in time", self.outbox.name);
            }
        }

        if let Some(mut child) = self.child.lock().await.take() {
            match tokio::time::timeout(SHUTDOWN_TIMEOUT, child.wait()).await {
                Ok(Ok(status)) => tracing::debug!("'{}' exited with {status}", self.outbox.name),
                Ok(Err(e)) => tracing::warn!("waiting for '{}': {e}", self.outbox.name),
                Err(_) => {
                    tracing::warn!("'{}' did not exit, killing it", self.outbox.name);
                    if let Err(e) = child.kill().await {
                        tracing::warn!("killing '{}': {e}", self.outbox.name);
                    }
                }
            }
        }

        for task in lock(&self.tasks).drain(..) {
            task.abort();
        }
        self.outbox.close();
    }

    /// Synchronous teardown. The writer still flushes `exit` before it stops.
    fn abort(&self) {
        let _ = self.outbox.send_notification("exit", ());
        let _ = self.outbox.writer_tx.send(WriterCommand::Shutdown);

        let child = self.child.try_lock().ok().and_then(|mut child| child.take());
        if let Some(mut child) = child {
            if let Err(e) = child.start_kill() {
                tracing::warn!("killing '{}': {e}", self.outbox.name);
            }
        }

        for task in lock(&self.tasks).drain(..) {
            task.abort();
        }
        self.outbox.close();
    }
}

async fn run_writer(
    name: Arc<str>,
    mut writer: Box<dyn MessageWriter>,
    mut rx: mpsc::UnboundedReceiver<WriterCommand>,
) {
    while let Some(command) = rx.recv().await {
        match command {
            WriterCommand::Send(body) => {
                if let Err(e) = writer.write(&body).await {
                    tracing::warn!("LSP write error for '{name}': {e:#}");
                    break;
                }
            }
            WriterCommand::Shutdown => break,
        }
    }
}

/// Routes messages read from the server.
struct Dispatcher {
    outbox: Outbox,
    workspace: Workspace,
    diagnostics: DiagnosticCollection,
    section: Option<String>,
}

impl Dispatcher {
    async fn run(self, mut reader: Box<dyn MessageReader>) {
        loop {
            match reader.read().await {
                Ok(Some(body)) => match protocol::parse_message_from_str(&body) {
                    Ok(message) => self.dispatch(message),
                    Err(e) => tracing::warn!(
                        "Ignoring malformed message from '{}': {e:#}",
                        self.outbox.name
                    ),
                },
                Ok(None) => {
                    tracing::info!("LSP server '{}' closed stdout", self.outbox.name);
                    break;
                }
                Err(e) => {
                    tracing::warn!("LSP reader error for '{}': {e:#}", self.outbox.name);
                    break;
                }
            }
        }
        self.outbox.close();
    }

    fn dispatch(&self, message: Incoming) {
        match message {
            Incoming::Response(response) => {
                let Some(id) = response.id.as_i64() else {
                    tracing::debug!("Response with foreign id {}", response.id);
                    return;
                };
                let sender = lock(&self.outbox.pending).remove(&id);
                match sender {
                    // The receiver is gone for fire-and-forget requests.
                    Some(tx) => {
                        let _ = tx.send(response);
                    }
                    None => tracing::debug!("Response for unknown request #{id}"),
                }
            }
            Incoming::Request { id, method, params } => {
                let response = self.answer(id, &method, params);
                if let Err(e) = self.outbox.reply(&response) {
                    tracing::warn!("Replying to {method}: {e:#}");
                }
            }
            Incoming::Notification(notification) => self.notify(notification),
        }
    }

    fn answer(&self, id: Value, method: &str, params: Option<Value>) -> Response {
        match method {
            "workspace/configuration" => {
                let items = params
                    .and_then(|params| serde_json::from_value::<ConfigurationParams>(params).ok())
                    .map(|params| params.items)
                    .unwrap_or_default();
                let values = items
                    .iter()
                    .map(|item| self.configuration_for(item.section.as_deref()))
                    .collect();
                Response::ok(id, Value::Array(values))
            }
            "client/registerCapability"
            | "client/unregisterCapability"
            | "window/workDoneProgress/create"
            | "window/showMessageRequest" => Response::ok(id, Value::Null),
            _ => {
                tracing::debug!(
                    "LSP '{}' sent request: {method}, replying method not found",
                    self.outbox.name
                );
                Response::error(id, METHOD_NOT_FOUND, format!("Method not found: {method}"))
            }
        }
    }

    fn configuration_for(&self, section: Option<&str>) -> Value {
        match section.or(self.section.as_deref()) {
            Some(section) => self.workspace.get_configuration(section),
            None => Value::Null,
        }
    }

    fn notify(&self, notification: Notification) {
        let name = &self.outbox.name;
        match notification.method.as_str() {
            "window/logMessage" | "window/showMessage" => {
                // showMessage params share the logMessage shape.
                let Some(params) = notification
                    .params
                    .and_then(|params| serde_json::from_value::<LogMessageParams>(params).ok())
                else {
                    return;
                };
                match params.typ {
                    MessageType::ERROR => tracing::error!("[{name}] {}", params.message),
                    MessageType::WARNING => tracing::warn!("[{name}] {}", params.message),
                    MessageType::INFO => tracing::info!("[{name}] {}", params.message),
                    _ => tracing::debug!("[{name}] {}", params.message),
                }
            }
            "textDocument/publishDiagnostics" => {
                let Some(params) = notification.params else {
                    return;
                };
                match serde_json::from_value::<PublishDiagnosticsParams>(params) {
                    Ok(params) => {
                        tracing::info!(
                            "{} diagnostics for {}",
                            params.diagnostics.len(),
                            params.uri
                        );
                        self.diagnostics.set(params.uri, params.diagnostics);
                    }
                    Err(e) => {
                        tracing::debug!("Failed to parse publishDiagnostics from '{name}': {e}")
                    }
                }
            }
            method => tracing::trace!("Ignoring notification from '{name}': {method}"),
        }
    }
}

/// Mirrors document and configuration changes to the server.
struct WorkspaceForwarder {
    outbox: Outbox,
    workspace: Workspace,
    selector: Vec<DocumentFilter>,
    section: Option<String>,
}

impl WorkspaceForwarder {
    async fn run(self, mut events: broadcast::Receiver<WorkspaceEvent>) {
        loop {
            let event = match events.recv().await {
                Ok(event) => event,
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("Workspace events lagged, {skipped} dropped");
                    continue;
                }
                Err(RecvError::Closed) => break,
            };
            if let Err(e) = self.forward(event) {
                tracing::warn!("{e:#}");
                break;
            }
        }
    }

    fn forward(&self, event: WorkspaceEvent) -> anyhow::Result<()> {
        match event {
            WorkspaceEvent::DocumentOpened(document)
                if selector_matches(&self.selector, &document) =>
            {
                self.outbox.did_open(&document)
            }
            WorkspaceEvent::DocumentClosed(document) => self.outbox.did_close(&document),
            WorkspaceEvent::ConfigurationChanged(changed) => match &self.section {
                Some(section) if section.split('.').next() == Some(changed.as_str()) => {
                    self.outbox.send_notification(
                        "workspace/didChangeConfiguration",
                        protocol::did_change_configuration_params(
                            section,
                            self.workspace.get_configuration(section),
                        ),
                    )
                }
                _ => Ok(()),
            },
            _ => Ok(()),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
