use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::host::{read, write, Disposable};

pub type CommandHandler = Arc<dyn Fn() -> Result<()> + Send + Sync>;

/// Global command table: command id to handler.
#[derive(Clone, Default)]
pub struct CommandRegistry {
    handlers: Arc<RwLock<HashMap<String, CommandHandler>>>,
}

impl CommandRegistry {
    pub fn register_command<F>(&self, id: &str, handler: F) -> Result<CommandDisposable>
    where
        F: Fn() -> Result<()> + Send + Sync + 'static,
    {
        let mut handlers = write(&self.handlers);
        if handlers.contains_key(id) {
            return Err(Error::CommandAlreadyRegistered(id.to_string()));
        }
        handlers.insert(id.to_string(), Arc::new(handler));
        tracing::debug!("Registered command {id}");

        Ok(CommandDisposable {
            id: id.to_string(),
            registry: self.clone(),
        })
    }

    /// Run the handler registered under `id`. Handler errors are returned
    /// untouched.
    pub fn execute_command(&self, id: &str) -> Result<()> {
        let handler = read(&self.handlers)
            .get(id)
            .cloned()
            .ok_or_else(|| Error::UnknownCommand(id.to_string()))?;
        handler()
    }

    #[cfg(test)]
    pub fn contains(&self, id: &str) -> bool {
        read(&self.handlers).contains_key(id)
    }

    fn unregister(&self, id: &str) {
        if write(&self.handlers).remove(id).is_some() {
            tracing::debug!("Unregistered command {id}");
        }
    }
}

/// Removes its command from the registry when disposed.
pub struct CommandDisposable {
    id: String,
    registry: CommandRegistry,
}

#[async_trait]
impl Disposable for CommandDisposable {
    async fn dispose(&mut self) {
        self.registry.unregister(&self.id);
    }

    fn dispose_now(&mut self) {
        self.registry.unregister(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_execute_runs_registered_handler() {
        let registry = CommandRegistry::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        registry
            .register_command("demo.run", move || {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .unwrap();

        registry.execute_command("demo.run").unwrap();
        registry.execute_command("demo.run").unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(registry.contains("demo.run"));
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let registry = CommandRegistry::default();
        let _first = registry.register_command("demo.run", || Ok(())).unwrap();
        let second = registry.register_command("demo.run", || Ok(()));
        assert!(matches!(second, Err(Error::CommandAlreadyRegistered(id)) if id == "demo.run"));
    }

    #[test]
    fn test_unknown_command_is_error() {
        let registry = CommandRegistry::default();
        let result = registry.execute_command("missing");
        assert!(matches!(result, Err(Error::UnknownCommand(id)) if id == "missing"));
    }

    #[test]
    fn test_handler_error_propagates() {
        let registry = CommandRegistry::default();
        let _registration = registry
            .register_command("demo.fail", || Err(Error::NoActiveEditor))
            .unwrap();
        assert!(matches!(
            registry.execute_command("demo.fail"),
            Err(Error::NoActiveEditor)
        ));
    }

    #[tokio::test]
    async fn test_dispose_unregisters() {
        let registry = CommandRegistry::default();
        let mut registration = registry.register_command("demo.run", || Ok(())).unwrap();
        assert!(registry.contains("demo.run"));

        registration.dispose().await;
        assert!(!registry.contains("demo.run"));
        let _again = registry.register_command("demo.run", || Ok(())).unwrap();
    }

    #[test]
    fn test_dropping_subscriptions_unregisters() {
        let registry = CommandRegistry::default();
        let mut subscriptions = crate::host::Subscriptions::default();
        subscriptions.push(registry.register_command("demo.run", || Ok(())).unwrap());

        drop(subscriptions);
        assert!(!registry.contains("demo.run"));
    }
}
