use std::path::{Path, PathBuf};

use lsp_types::Url;

use crate::error::{Error, Result};

/// An open text document as the host tracks it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextDocument {
    pub uri: Url,
    /// File system path; for non-`file` URIs this is the URI path.
    pub file_name: PathBuf,
    pub language_id: String,
    pub version: i32,
    pub text: String,
}

impl TextDocument {
    pub fn new(uri: Url, language_id: impl Into<String>, text: impl Into<String>) -> Self {
        let file_name = uri
            .to_file_path()
            .unwrap_or_else(|()| PathBuf::from(uri.path()));
        TextDocument {
            uri,
            file_name,
            language_id: language_id.into(),
            version: 1,
            text: text.into(),
        }
    }

    /// Build a `file` document for an absolute path.
    pub fn from_path(path: &Path, text: impl Into<String>) -> Result<Self> {
        Ok(TextDocument::new(file_uri(path)?, language_id_for_path(path), text))
    }

    pub fn scheme(&self) -> &str {
        self.uri.scheme()
    }
}

/// `file` URI for an absolute path.
pub fn file_uri(path: &Path) -> Result<Url> {
    Url::from_file_path(path).map_err(|()| Error::InvalidDocumentPath(path.to_path_buf()))
}

/// Language identifier inferred from the file extension.
pub fn language_id_for_path(path: &Path) -> String {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("volt") => "volt".to_string(),
        Some("rs") => "rust".to_string(),
        Some("json") => "json".to_string(),
        _ => "plaintext".to_string(),
    }
}

/// One entry of a document selector. Absent fields match anything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocumentFilter {
    pub scheme: Option<String>,
    pub language: Option<String>,
}

impl DocumentFilter {
    pub fn new(scheme: &str, language: &str) -> Self {
        DocumentFilter {
            scheme: Some(scheme.to_string()),
            language: Some(language.to_string()),
        }
    }

    pub fn matches(&self, document: &TextDocument) -> bool {
        let scheme_ok = self
            .scheme
            .as_deref()
            .map_or(true, |scheme| scheme == document.scheme());
        let language_ok = self
            .language
            .as_deref()
            .map_or(true, |language| language == document.language_id);
        scheme_ok && language_ok
    }
}

/// A selector matches when any of its filters does.
pub fn selector_matches(selector: &[DocumentFilter], document: &TextDocument) -> bool {
    selector.iter().any(|filter| filter.matches(document))
}
