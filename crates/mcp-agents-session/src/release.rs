//! Ordered teardown of acquired resources.

use std::future::Future;

use futures::future::BoxFuture;
use mcp_agents_core::SessionError;

type ReleaseFn = Box<dyn FnOnce() -> BoxFuture<'static, Result<(), SessionError>> + Send>;

/// Stack of named release actions, run last-in first-out.
///
/// Every action runs exactly once, even when earlier ones fail.
#[derive(Default)]
pub struct ReleaseStack {
    entries: Vec<(&'static str, ReleaseFn)>,
}

impl ReleaseStack {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the release action for a freshly acquired resource.
    pub fn push<F, Fut>(&mut self, name: &'static str, release: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), SessionError>> + Send + 'static,
    {
        self.entries
            .push((name, Box::new(move || Box::pin(release()))));
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Names of pending actions, in acquisition order.
    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.entries.iter().map(|(name, _)| *name)
    }

    /// Run every pending action in reverse order.
    ///
    /// Returns the failures, in the order they happened.
    pub async fn release_all(&mut self) -> Vec<(&'static str, SessionError)> {
        let mut failures = Vec::new();
        while let Some((name, release)) = self.entries.pop() {
            match release().await {
                Ok(()) => tracing::debug!(resource = name, "released"),
                Err(e) => {
                    tracing::warn!(resource = name, error = %e, "release failed");
                    failures.push((name, e));
                }
            }
        }
        failures
    }
}

impl std::fmt::Debug for ReleaseStack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}
