use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use lsp_types::{Diagnostic, Url};

use crate::host::{read, write};

/// Latest diagnostics per document, as published by language servers.
#[derive(Clone, Default)]
pub struct DiagnosticCollection {
    entries: Arc<RwLock<BTreeMap<Url, Vec<Diagnostic>>>>,
}

impl DiagnosticCollection {
    /// Replace the diagnostics for `uri`. An empty list clears the entry.
    pub fn set(&self, uri: Url, diagnostics: Vec<Diagnostic>) {
        let mut entries = write(&self.entries);
        if diagnostics.is_empty() {
            entries.remove(&uri);
        } else {
            entries.insert(uri, diagnostics);
        }
    }

    #[cfg(test)]
    pub fn get(&self, uri: &Url) -> Vec<Diagnostic> {
        read(&self.entries).get(uri).cloned().unwrap_or_default()
    }

    pub fn entries(&self) -> Vec<(Url, Vec<Diagnostic>)> {
        read(&self.entries)
            .iter()
            .map(|(uri, diagnostics)| (uri.clone(), diagnostics.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lsp_types::{Position, Range};

    fn diagnostic(message: &str) -> Diagnostic {
        Diagnostic {
            range: Range::new(Position::new(0, 0), Position::new(0, 1)),
            message: message.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_set_replaces_and_empty_clears() {
        let collection = DiagnosticCollection::default();
        let uri = Url::parse("file:///w/a.volt").unwrap();

        collection.set(uri.clone(), vec![diagnostic("first")]);
        collection.set(uri.clone(), vec![diagnostic("second"), diagnostic("third")]);
        assert_eq!(collection.get(&uri).len(), 2);
        assert_eq!(collection.entries().len(), 1);

        collection.set(uri.clone(), Vec::new());
        assert!(collection.get(&uri).is_empty());
        assert!(collection.entries().is_empty());
    }
}
