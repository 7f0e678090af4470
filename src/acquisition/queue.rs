//! Work queue for the header stage.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::model::CreditorDomain;

/// One domain to list, with the publication time to list from.
#[derive(Debug, Clone, PartialEq)]
pub struct DomainWork {
    pub domain: CreditorDomain,
    /// The domain's listing cursor; `None` lists everything.
    pub since: Option<DateTime<Utc>>,
}

/// FIFO of domains, drained by the header workers.
///
/// Built once per stage execution and owned by it; each entry is handed
/// out to exactly one worker.
#[derive(Debug, Default)]
pub struct DomainQueue {
    entries: Mutex<VecDeque<DomainWork>>,
}

impl DomainQueue {
    pub fn new(entries: impl IntoIterator<Item = DomainWork>) -> Self {
        Self {
            entries: Mutex::new(entries.into_iter().collect()),
        }
    }

    pub async fn pop(&self) -> Option<DomainWork> {
        self.entries.lock().await.pop_front()
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}
