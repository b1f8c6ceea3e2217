//! Message classification and LSP parameter builders.

use std::path::Path;

use anyhow::{bail, Context};
use lsp_types::{
    ClientCapabilities, ClientInfo, DidChangeConfigurationParams, DidChangeWatchedFilesParams,
    DidCloseTextDocumentParams, DidOpenTextDocumentParams, DynamicRegistrationClientCapabilities,
    ExecuteCommandParams, FileChangeType, InitializeParams, PublishDiagnosticsClientCapabilities,
    TextDocumentClientCapabilities, TextDocumentIdentifier, TextDocumentItem,
    TextDocumentSyncClientCapabilities, Url, WorkDoneProgressParams, WorkspaceClientCapabilities,
    WorkspaceFolder,
};
use serde_json::{Map, Value};

use crate::host::{FileChangeKind, FileEvent, TextDocument};
use crate::lsp::types::{Notification, Response};

/// A message read from the server.
#[derive(Debug)]
pub enum Incoming {
    Response(Response),
    Request {
        id: Value,
        method: String,
        params: Option<Value>,
    },
    Notification(Notification),
}

/// Parse a full JSON string (payload) into an [`Incoming`] message.
pub fn parse_message_from_str(s: &str) -> anyhow::Result<Incoming> {
    let json: Value = serde_json::from_str(s).context("parsing JSON-RPC message")?;
    let has_id = json.get("id").is_some_and(|id| !id.is_null());
    let method = json
        .get("method")
        .and_then(Value::as_str)
        .map(str::to_string);

    match (has_id, method) {
        (true, Some(method)) => Ok(Incoming::Request {
            id: json["id"].clone(),
            method,
            params: json.get("params").cloned(),
        }),
        (false, Some(_)) => Ok(Incoming::Notification(serde_json::from_value(json)?)),
        (true, None) => Ok(Incoming::Response(serde_json::from_value(json)?)),
        (false, None) => bail!("message is neither a request, response nor notification"),
    }
}

pub fn path_to_file_uri(path: &Path) -> Option<Url> {
    Url::from_file_path(path).ok()
}

pub fn initialize_params(client_name: &str, root: Option<&Path>) -> InitializeParams {
    let workspace_folders = root.and_then(|root| {
        let uri = path_to_file_uri(root)?;
        let name = root
            .file_name()
            .map_or_else(|| root.display().to_string(), |n| n.to_string_lossy().into_owned());
        Some(vec![WorkspaceFolder { uri, name }])
    });

    InitializeParams {
        process_id: Some(std::process::id()),
        client_info: Some(ClientInfo {
            name: client_name.to_string(),
            version: Some(env!("CARGO_PKG_VERSION").to_string()),
        }),
        workspace_folders,
        capabilities: client_capabilities(),
        ..Default::default()
    }
}

fn client_capabilities() -> ClientCapabilities {
    ClientCapabilities {
        workspace: Some(WorkspaceClientCapabilities {
            configuration: Some(true),
            did_change_configuration: Some(DynamicRegistrationClientCapabilities {
                dynamic_registration: Some(false),
            }),
            did_change_watched_files: Some(Default::default()),
            execute_command: Some(DynamicRegistrationClientCapabilities {
                dynamic_registration: Some(false),
            }),
            ..Default::default()
        }),
        text_document: Some(TextDocumentClientCapabilities {
            synchronization: Some(TextDocumentSyncClientCapabilities::default()),
            publish_diagnostics: Some(PublishDiagnosticsClientCapabilities::default()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn did_open_params(document: &TextDocument) -> DidOpenTextDocumentParams {
    DidOpenTextDocumentParams {
        text_document: TextDocumentItem {
            uri: document.uri.clone(),
            language_id: document.language_id.clone(),
            version: document.version,
            text: document.text.clone(),
        },
    }
}

pub fn did_close_params(uri: &Url) -> DidCloseTextDocumentParams {
    DidCloseTextDocumentParams {
        text_document: TextDocumentIdentifier { uri: uri.clone() },
    }
}

/// Settings are keyed by section, e.g. `{"volt": {...}}`.
pub fn did_change_configuration_params(section: &str, value: Value) -> DidChangeConfigurationParams {
    let mut settings = Map::new();
    settings.insert(section.to_string(), value);
    DidChangeConfigurationParams {
        settings: Value::Object(settings),
    }
}

/// Events whose path cannot be expressed as a file URI are dropped.
pub fn did_change_watched_files_params(events: &[FileEvent]) -> DidChangeWatchedFilesParams {
    let changes = events
        .iter()
        .filter_map(|event| {
            Some(lsp_types::FileEvent {
                uri: path_to_file_uri(&event.path)?,
                typ: match event.kind {
                    FileChangeKind::Created => FileChangeType::CREATED,
                    FileChangeKind::Changed => FileChangeType::CHANGED,
                    FileChangeKind::Deleted => FileChangeType::DELETED,
                },
            })
        })
        .collect();
    DidChangeWatchedFilesParams { changes }
}

pub fn execute_command_params(command: &str, arguments: Vec<Value>) -> ExecuteCommandParams {
    ExecuteCommandParams {
        command: command.to_string(),
        arguments,
        work_done_progress_params: WorkDoneProgressParams::default(),
    }
}
