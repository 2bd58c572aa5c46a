//! Live-swappable holder of the current configuration: many concurrent
//! readers serving OSB requests against a `RwLock::read()` guard, and a
//! single writer swapping the whole snapshot in under `RwLock::write()` once
//! a replacement has validated cleanly.

use std::sync::{Arc, RwLock};

use crate::config::{Condition, Config};
use crate::error::Result;

struct Inner {
    config: Config,
    condition: Condition,
}

/// Holds the currently active, already-validated `Config` and lets callers
/// replace it atomically. A rejected candidate leaves the previous
/// configuration (and its `Condition`) serving traffic untouched.
#[derive(Clone)]
pub struct ConfigStore {
    inner: Arc<RwLock<Inner>>,
}

impl ConfigStore {
    /// Load the initial configuration. Fails if it doesn't validate - there
    /// is no previous good configuration to fall back to at startup.
    pub fn load(config: Config) -> Result<Self> {
        config.verify()?;
        Ok(ConfigStore { inner: Arc::new(RwLock::new(Inner { config, condition: Condition::valid() })) })
    }

    /// A read-only snapshot of the active configuration.
    pub fn snapshot(&self) -> Config {
        self.inner.read().expect("config lock poisoned").config.clone()
    }

    /// The most recent validation outcome, whether or not `update` actually
    /// swapped anything in.
    pub fn condition(&self) -> Condition {
        self.inner.read().expect("config lock poisoned").condition.clone()
    }

    /// Validate `candidate` and, if it passes, swap it in as the active
    /// configuration. Returns the resulting `Condition` either way.
    pub fn update(&self, candidate: Config) -> Condition {
        match candidate.verify() {
            Ok(()) => {
                let condition = Condition::valid();
                let mut guard = self.inner.write().expect("config lock poisoned");
                guard.config = candidate;
                guard.condition = condition.clone();
                condition
            }
            Err(e) => {
                let condition = Condition::invalid(e.to_string());
                self.inner.write().expect("config lock poisoned").condition = condition.clone();
                condition
            }
        }
    }
}
