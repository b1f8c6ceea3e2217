use std::path::{Path, PathBuf};

use crate::host::Subscriptions;

/// Per-activation state handed to the extension by the host.
pub struct ExtensionContext {
    extension_path: PathBuf,
    pub subscriptions: Subscriptions,
}

impl ExtensionContext {
    pub fn new(extension_path: impl Into<PathBuf>) -> Self {
        ExtensionContext {
            extension_path: extension_path.into(),
            subscriptions: Subscriptions::default(),
        }
    }

    /// Resolve `relative` against the extension's install directory.
    pub fn as_absolute_path(&self, relative: impl AsRef<Path>) -> PathBuf {
        self.extension_path.join(relative)
    }

    /// Host teardown: release everything the extension registered. Dropping
    /// the context releases whatever is left without waiting.
    pub async fn dispose(&mut self) {
        tracing::debug!(
            "Releasing {} extension subscriptions",
            self.subscriptions.len()
        );
        self.subscriptions.dispose_all().await;
    }
}
