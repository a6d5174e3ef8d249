//! Registration cache.

use super::client::MetricRegistration;
use crate::core::OutgoingPoint;
use std::collections::HashSet;
use tokio::sync::{Mutex, MutexGuard};

/// Metric names the ingest endpoint is known to have.
///
/// A name is inserted at most once per process and never removed. Workers
/// hold the lock across the registration RPC, so two workers never register
/// the same name at the same time.
#[derive(Debug, Default)]
pub struct RegistrationCache {
    names: Mutex<HashSet<String>>,
}

/// Exclusive access to the cache for one check-register-update cycle.
pub struct RegistrationGuard<'a> {
    names: MutexGuard<'a, HashSet<String>>,
}

impl RegistrationCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the cache lock
    pub async fn lock(&self) -> RegistrationGuard<'_> {
        RegistrationGuard {
            names: self.names.lock().await,
        }
    }

    pub async fn contains(&self, name: &str) -> bool {
        self.names.lock().await.contains(name)
    }

    pub async fn len(&self) -> usize {
        self.names.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.names.lock().await.is_empty()
    }
}

impl RegistrationGuard<'_> {
    /// Names in `batch` not yet registered, one entry per name in first
    /// occurrence order, typed by that first point.
    pub fn unseen(&self, batch: &[OutgoingPoint]) -> Vec<MetricRegistration> {
        let mut requested = HashSet::new();
        batch
            .iter()
            .filter(|point| !self.names.contains(point.metric()))
            .filter(|point| requested.insert(point.metric()))
            .map(|point| MetricRegistration::new(point.metric(), point.metric_type()))
            .collect()
    }

    /// Record a name as registered. Returns false if it already was.
    pub fn insert(&mut self, name: String) -> bool {
        self.names.insert(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }
}
