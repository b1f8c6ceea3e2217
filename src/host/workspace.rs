use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use globset::{GlobBuilder, GlobMatcher};
use lsp_types::Url;
use serde_json::{Map, Value};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

use crate::error::{Error, Result};
use crate::host::document::file_uri;
use crate::host::{read, write, TextDocument};

const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileChangeKind {
    Created,
    Changed,
    Deleted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEvent {
    pub path: PathBuf,
    pub kind: FileChangeKind,
}

#[derive(Debug, Clone)]
pub enum WorkspaceEvent {
    DocumentOpened(TextDocument),
    DocumentClosed(TextDocument),
    /// Carries the top-level section name that changed.
    ConfigurationChanged(String),
    FileChanged(FileEvent),
}

/// Open documents, settings and file-change fan-out for the current workspace.
#[derive(Clone)]
pub struct Workspace {
    inner: Arc<WorkspaceInner>,
}

struct WorkspaceInner {
    root: Option<PathBuf>,
    documents: RwLock<HashMap<Url, TextDocument>>,
    configuration: RwLock<Map<String, Value>>,
    events: broadcast::Sender<WorkspaceEvent>,
}

impl Default for Workspace {
    fn default() -> Self {
        Workspace::new(None)
    }
}

impl Workspace {
    pub fn new(root: Option<PathBuf>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Workspace {
            inner: Arc::new(WorkspaceInner {
                root,
                documents: RwLock::new(HashMap::new()),
                configuration: RwLock::new(Map::new()),
                events,
            }),
        }
    }

    pub fn root(&self) -> Option<&Path> {
        self.inner.root.as_deref()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WorkspaceEvent> {
        self.inner.events.subscribe()
    }

    fn emit(&self, event: WorkspaceEvent) {
        // No subscribers is fine; nothing is listening yet.
        let _ = self.inner.events.send(event);
    }

    /// Replace all settings with the JSON object stored at `path`. Top-level
    /// keys are configuration sections.
    pub async fn load_settings(&self, path: &Path) -> Result<()> {
        let text = tokio::fs::read_to_string(path).await?;
        let settings: Map<String, Value> = serde_json::from_str(&text)?;
        let sections: Vec<String> = settings.keys().cloned().collect();
        *write(&self.inner.configuration) = settings;

        tracing::debug!("Loaded settings from {}", path.display());
        for section in sections {
            self.emit(WorkspaceEvent::ConfigurationChanged(section));
        }
        Ok(())
    }

    /// Look up a configuration value by dotted path (`volt` or
    /// `volt.build.target`). Missing values are `null`.
    pub fn get_configuration(&self, section: &str) -> Value {
        let configuration = read(&self.inner.configuration);
        let mut parts = section.split('.');
        let mut value = match parts.next().and_then(|first| configuration.get(first)) {
            Some(value) => value,
            None => return Value::Null,
        };
        for part in parts {
            match value.get(part) {
                Some(next) => value = next,
                None => return Value::Null,
            }
        }
        value.clone()
    }

    #[cfg(test)]
    pub fn update_configuration(&self, section: &str, value: Value) {
        write(&self.inner.configuration).insert(section.to_string(), value);
        self.emit(WorkspaceEvent::ConfigurationChanged(section.to_string()));
    }

    /// Open the file at `path`, reading its contents from disk. Opening an
    /// already open document returns the tracked copy.
    pub async fn open_text_document(&self, path: &Path) -> Result<TextDocument> {
        let path = std::path::absolute(path)?;
        let uri = file_uri(&path)?;
        if let Some(existing) = read(&self.inner.documents).get(&uri) {
            return Ok(existing.clone());
        }

        let text = tokio::fs::read_to_string(&path).await?;
        let document = TextDocument::from_path(&path, text)?;
        self.add_text_document(document.clone());
        Ok(document)
    }

    /// Track a document that did not come from disk.
    pub fn add_text_document(&self, document: TextDocument) {
        tracing::debug!("Opened {}", document.uri);
        write(&self.inner.documents).insert(document.uri.clone(), document.clone());
        self.emit(WorkspaceEvent::DocumentOpened(document));
    }

    pub fn close_text_document(&self, uri: &Url) -> Option<TextDocument> {
        let document = write(&self.inner.documents).remove(uri)?;
        tracing::debug!("Closed {}", document.uri);
        self.emit(WorkspaceEvent::DocumentClosed(document.clone()));
        Some(document)
    }

    /// Close the document backed by the file at `path`, if it is open.
    pub fn close_text_document_at(&self, path: &Path) -> Result<Option<TextDocument>> {
        let uri = file_uri(&std::path::absolute(path)?)?;
        Ok(self.close_text_document(&uri))
    }

    pub fn text_documents(&self) -> Vec<TextDocument> {
        let mut documents: Vec<TextDocument> =
            read(&self.inner.documents).values().cloned().collect();
        documents.sort_by(|a, b| a.uri.cmp(&b.uri));
        documents
    }

    /// Report a file system change. Watchers whose pattern matches will see it.
    pub fn notify_file_event(&self, path: impl Into<PathBuf>, kind: FileChangeKind) {
        self.emit(WorkspaceEvent::FileChanged(FileEvent {
            path: path.into(),
            kind,
        }));
    }

    pub fn create_file_system_watcher(&self, pattern: &str) -> Result<FileSystemWatcher> {
        let matcher = GlobBuilder::new(pattern)
            .literal_separator(true)
            .build()
            .map_err(|source| Error::InvalidWatchPattern {
                pattern: pattern.to_string(),
                source,
            })?
            .compile_matcher();

        Ok(FileSystemWatcher {
            pattern: pattern.to_string(),
            matcher,
            events: self.inner.events.clone(),
        })
    }
}

/// Glob-filtered view of the workspace's file events.
#[derive(Clone)]
pub struct FileSystemWatcher {
    pattern: String,
    matcher: GlobMatcher,
    events: broadcast::Sender<WorkspaceEvent>,
}

impl FileSystemWatcher {
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    #[cfg(test)]
    pub fn matches(&self, path: &Path) -> bool {
        self.matcher.is_match(path)
    }

    /// Start receiving matching events from now on.
    pub fn watch(&self) -> FileEventStream {
        FileEventStream {
            matcher: self.matcher.clone(),
            events: self.events.subscribe(),
        }
    }
}

pub struct FileEventStream {
    matcher: GlobMatcher,
    events: broadcast::Receiver<WorkspaceEvent>,
}

impl FileEventStream {
    /// Next matching file event, or `None` once the workspace is gone.
    pub async fn next(&mut self) -> Option<FileEvent> {
        loop {
            match self.events.recv().await {
                Ok(WorkspaceEvent::FileChanged(event)) if self.matcher.is_match(&event.path) => {
                    return Some(event)
                }
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("File watcher fell behind, {skipped} events dropped");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}
