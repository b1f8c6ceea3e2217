use async_trait::async_trait;

/// A lifecycle handle whose release frees an associated resource.
#[async_trait]
pub trait Disposable: Send {
    async fn dispose(&mut self);

    /// Release without awaiting. Used when the owner is dropped before it
    /// was disposed; must be safe to call after `dispose`.
    fn dispose_now(&mut self);
}

/// Registry of disposables owned by an activated extension.
///
/// Each entry is released exactly once, newest first, either when the
/// registry is drained or when it is dropped.
#[derive(Default)]
pub struct Subscriptions {
    items: Vec<Box<dyn Disposable>>,
}

impl Subscriptions {
    pub fn push<D: Disposable + 'static>(&mut self, disposable: D) {
        self.items.push(Box::new(disposable));
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub async fn dispose_all(&mut self) {
        while let Some(mut item) = self.items.pop() {
            item.dispose().await;
        }
    }
}

impl Drop for Subscriptions {
    fn drop(&mut self) {
        if !self.items.is_empty() {
            tracing::debug!("Releasing {} undisposed subscriptions", self.items.len());
        }
        while let Some(mut item) = self.items.pop() {
            item.dispose_now();
        }
    }
}
