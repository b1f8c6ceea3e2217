//! Minimal editor host: the surface an extension sees when it activates.
//!
//! The host owns the window (active editor), the workspace (open documents,
//! configuration, file events), the command registry and the diagnostics
//! reported back by language servers.

pub mod commands;
pub mod context;
pub mod diagnostics;
pub mod disposable;
pub mod document;
pub mod window;
pub mod workspace;

use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

pub use commands::CommandRegistry;
pub use context::ExtensionContext;
pub use diagnostics::DiagnosticCollection;
pub use disposable::{Disposable, Subscriptions};
pub use document::{selector_matches, DocumentFilter, TextDocument};
pub use window::Window;
pub use workspace::{FileChangeKind, FileEvent, FileSystemWatcher, Workspace, WorkspaceEvent};

/// Everything an activated extension can reach. Cloning is cheap; all clones
/// share the same state.
#[derive(Clone, Default)]
pub struct Host {
    pub window: Window,
    pub workspace: Workspace,
    pub commands: CommandRegistry,
    pub diagnostics: DiagnosticCollection,
}

impl Host {
    pub fn new(workspace: Workspace) -> Self {
        Host {
            workspace,
            ..Default::default()
        }
    }
}

pub(crate) fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}
