use std::sync::{Arc, RwLock};

use crate::host::{read, write, TextDocument};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextEditor {
    pub document: TextDocument,
}

/// Tracks which editor has focus.
#[derive(Clone, Default)]
pub struct Window {
    active: Arc<RwLock<Option<TextEditor>>>,
}

impl Window {
    pub fn active_text_editor(&self) -> Option<TextEditor> {
        read(&self.active).clone()
    }

    /// Focus an editor showing `document`.
    pub fn show_text_document(&self, document: TextDocument) -> TextEditor {
        let editor = TextEditor { document };
        *write(&self.active) = Some(editor.clone());
        editor
    }

    pub fn clear_active_editor(&self) {
        *write(&self.active) = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lsp_types::Url;

    #[test]
    fn test_show_and_clear_active_editor() {
        let window = Window::default();
        assert!(window.active_text_editor().is_none());

        let document = TextDocument::new(Url::parse("file:///a/b/c.volt").unwrap(), "volt", "");
        window.show_text_document(document.clone());
        let shared = window.clone();
        assert_eq!(shared.active_text_editor().unwrap().document, document);

        window.clear_active_editor();
        assert!(shared.active_text_editor().is_none());
    }
}
