use std::{
    panic::{self, AssertUnwindSafe},
    path::PathBuf,
    sync::Arc,
};

use anyhow::Result;
use serde::Serialize;
use tracing::warn;

use crate::types::MutationDelta;

/// Symbols and test targets plausibly affected by a mutation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Impact {
    /// Affected symbol names.
    pub symbols: Vec<String>,
    /// Affected test targets.
    pub tests: Vec<String>,
}

/// Downstream analysis run once after a successful apply.
///
/// Failures never fail the mutation; they are logged and replaced by an
/// empty [`Impact`].
pub trait ImpactResolver: Send + Sync {
    /// Work out what `delta` affects.
    fn resolve(&self, delta: &MutationDelta) -> Result<Impact>;
}

impl<F> ImpactResolver for F
where
    F: Fn(&MutationDelta) -> Result<Impact> + Send + Sync,
{
    fn resolve(&self, delta: &MutationDelta) -> Result<Impact> {
        self(delta)
    }
}

/// Resolver that reports nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoImpact;

impl ImpactResolver for NoImpact {
    fn resolve(&self, _delta: &MutationDelta) -> Result<Impact> {
        Ok(Impact::default())
    }
}

/// Callback receiving the absolute paths changed by an applied mutation.
pub type MutationObserver = Arc<dyn Fn(&[PathBuf]) + Send + Sync>;

/// Run `resolver`, turning errors and panics into an empty result.
pub fn resolve_best_effort(resolver: &dyn ImpactResolver, delta: &MutationDelta) -> Impact {
    match panic::catch_unwind(AssertUnwindSafe(|| resolver.resolve(delta))) {
        Ok(Ok(impact)) => impact,
        Ok(Err(err)) => {
            warn!(error = %format!("{err:#}"), "impact resolver failed");
            Impact::default()
        }
        Err(_) => {
            warn!("impact resolver panicked");
            Impact::default()
        }
    }
}

/// Invoke `observer`, logging instead of propagating a panic.
pub fn notify(observer: &MutationObserver, paths: &[PathBuf]) {
    if panic::catch_unwind(AssertUnwindSafe(|| observer(paths))).is_err() {
        warn!(paths = paths.len(), "mutation observer panicked");
    }
}
