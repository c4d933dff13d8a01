//! Session-wide teardown.

use tracing::{debug, info, warn};

use crate::registry::Registry;

impl Registry {
    /// Tear down every topic and wait for their tasks to finish.
    ///
    /// Every transport channel is closed before the first await, so no
    /// channel is left open even if the returned future is dropped early.
    /// Safe to call with no topics and safe to call repeatedly. Handles
    /// issued before the call become inert.
    pub async fn cleanup_all(&self) {
        let tasks = self.inner.close_all();
        if tasks.is_empty() {
            return;
        }

        info!(topics = tasks.len(), "all topics torn down");
        for task in tasks {
            if let Err(e) = task.await {
                if e.is_panic() {
                    warn!(error = %e, "topic task panicked");
                }
            }
        }
    }

    /// Close every topic without waiting for their tasks.
    ///
    /// Returns the number of topics closed.
    pub fn close_all(&self) -> usize {
        let closed = self.inner.close_all().len();
        if closed > 0 {
            info!(topics = closed, "all topics closed");
        }
        closed
    }
}

/// Owner of a registry for one authenticated session.
///
/// Suspending (app backgrounded) tears down every topic but keeps the scope
/// usable for resubscribing on resume. Logging out consumes the scope.
#[derive(Debug)]
pub struct SessionScope {
    registry: Registry,
}

impl SessionScope {
    pub fn new(registry: Registry) -> Self {
        Self { registry }
    }

    /// Registry owned by this session.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Tear down every topic, keeping the session.
    pub async fn suspend(&self) {
        debug!(topics = self.registry.topic_count(), "suspending session");
        self.registry.cleanup_all().await;
    }

    /// Tear down every topic and end the session.
    pub async fn logout(self) {
        debug!(topics = self.registry.topic_count(), "ending session");
        self.registry.cleanup_all().await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::RegistryConfig;
    use crate::event::ChangeEvent;
    use crate::transport::MemoryTransport;

    #[tokio::test]
    async fn test_cleanup_all_on_empty_registry() {
        let registry = Registry::new(Arc::new(MemoryTransport::new()), RegistryConfig::default());
        registry.cleanup_all().await;
        registry.cleanup_all().await;
        assert_eq!(registry.close_all(), 0);
    }

    #[tokio::test]
    async fn test_suspend_then_resubscribe() {
        let transport = MemoryTransport::new();
        let scope = SessionScope::new(Registry::new(
            Arc::new(transport.clone()),
            RegistryConfig::default(),
        ));

        let first = scope
            .registry()
            .subscribe("banners", "banners", None, |_: &ChangeEvent| Ok(()))
            .unwrap();
        scope.suspend().await;
        assert_eq!(scope.registry().topic_count(), 0);
        assert_eq!(transport.open_channel_count(), 0);

        // Tearing down a handle from before the suspend is harmless.
        first.teardown();

        let second = scope
            .registry()
            .subscribe("banners", "banners", None, |_: &ChangeEvent| Ok(()))
            .unwrap();
        assert_eq!(scope.registry().topic_count(), 1);

        scope.logout().await;
        assert!(!second.is_released());
        assert_eq!(transport.open_channel_count(), 0);
    }
}
