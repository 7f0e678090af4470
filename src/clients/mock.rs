//! Scripted flow source for testing.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::interfaces::flow_source::Result;
use crate::interfaces::{
    operation, FlowHeader, FlowMetadata, FlowSource, FlowSourceError, Page, PaymentItem,
};
use crate::model::FlowKey;

#[derive(Default)]
struct MockState {
    headers: HashMap<String, Vec<FlowHeader>>,
    metadata: HashMap<FlowKey, FlowMetadata>,
    payments: HashMap<FlowKey, Vec<PaymentItem>>,
    list_failures: HashMap<String, VecDeque<FlowSourceError>>,
    detail_failures: HashMap<FlowKey, VecDeque<FlowSourceError>>,
    list_calls: HashMap<String, u32>,
    detail_calls: HashMap<FlowKey, u32>,
    since_seen: HashMap<String, Option<DateTime<Utc>>>,
}

/// Mock flow source serving scripted flows, with optional scripted failures.
pub struct MockFlowSource {
    state: RwLock<MockState>,
    page_size: usize,
}

impl Default for MockFlowSource {
    fn default() -> Self {
        Self::new()
    }
}

impl MockFlowSource {
    pub fn new() -> Self {
        Self::with_page_size(50)
    }

    /// Serve listings and payments in pages of `page_size` items.
    pub fn with_page_size(page_size: usize) -> Self {
        Self {
            state: RwLock::new(MockState::default()),
            page_size: page_size.max(1),
        }
    }

    /// Publish a flow for `domain` with its metadata and payments.
    pub async fn publish(
        &self,
        domain: &str,
        header: FlowHeader,
        metadata: FlowMetadata,
        payments: Vec<PaymentItem>,
    ) {
        let key = FlowKey::new(domain, &header.flow_code, &header.psp_id, header.revision);
        let mut state = self.state.write().await;
        state.headers.entry(domain.to_string()).or_default().push(header);
        state.metadata.insert(key.clone(), metadata);
        state.payments.insert(key, payments);
    }

    /// Fail the next listing calls for `domain` with `errors`, in order.
    pub async fn fail_listing(&self, domain: &str, errors: Vec<FlowSourceError>) {
        self.state
            .write()
            .await
            .list_failures
            .entry(domain.to_string())
            .or_default()
            .extend(errors);
    }

    /// Fail the next detail fetches for `key` with `errors`, in order.
    pub async fn fail_details(&self, key: &FlowKey, errors: Vec<FlowSourceError>) {
        self.state
            .write()
            .await
            .detail_failures
            .entry(key.clone())
            .or_default()
            .extend(errors);
    }

    /// Listing calls made for `domain`, counting every page.
    pub async fn list_calls(&self, domain: &str) -> u32 {
        self.state.read().await.list_calls.get(domain).copied().unwrap_or(0)
    }

    pub async fn detail_calls(&self, key: &FlowKey) -> u32 {
        self.state.read().await.detail_calls.get(key).copied().unwrap_or(0)
    }

    /// The `since` argument of the last listing call for `domain`.
    pub async fn last_since(&self, domain: &str) -> Option<Option<DateTime<Utc>>> {
        self.state.read().await.since_seen.get(domain).copied()
    }

    fn paginate<T: Clone>(&self, items: &[T], page: u32) -> Page<T> {
        let total_pages = items.len().div_ceil(self.page_size).max(1) as u32;
        let start = (page.saturating_sub(1) as usize) * self.page_size;
        let slice = items
            .iter()
            .skip(start)
            .take(self.page_size)
            .cloned()
            .collect();
        Page::new(slice, page, total_pages)
    }
}

#[async_trait]
impl FlowSource for MockFlowSource {
    async fn list_flows(
        &self,
        domain: &str,
        since: Option<DateTime<Utc>>,
        page: u32,
    ) -> Result<Page<FlowHeader>> {
        let mut state = self.state.write().await;
        *state.list_calls.entry(domain.to_string()).or_default() += 1;
        state.since_seen.insert(domain.to_string(), since);

        if let Some(error) = state
            .list_failures
            .get_mut(domain)
            .and_then(VecDeque::pop_front)
        {
            return Err(error);
        }

        let headers: Vec<FlowHeader> = state
            .headers
            .get(domain)
            .map(|all| {
                all.iter()
                    .filter(|h| since.map_or(true, |s| h.published > s))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        Ok(self.paginate(&headers, page))
    }

    async fn get_flow_details(
        &self,
        domain: &str,
        flow_code: &str,
        revision: i64,
        psp_id: &str,
    ) -> Result<FlowMetadata> {
        let key = FlowKey::new(domain, flow_code, psp_id, revision);
        let mut state = self.state.write().await;
        *state.detail_calls.entry(key.clone()).or_default() += 1;

        if let Some(error) = state
            .detail_failures
            .get_mut(&key)
            .and_then(VecDeque::pop_front)
        {
            return Err(error);
        }

        state.metadata.get(&key).cloned().ok_or_else(|| {
            FlowSourceError::permanent(operation::GET_FLOW_DETAILS, format!("flow {key} not found"))
        })
    }

    async fn get_payments(
        &self,
        domain: &str,
        flow_code: &str,
        revision: i64,
        psp_id: &str,
        page: u32,
    ) -> Result<Page<PaymentItem>> {
        let key = FlowKey::new(domain, flow_code, psp_id, revision);
        let state = self.state.read().await;
        let payments = state.payments.get(&key).ok_or_else(|| {
            FlowSourceError::permanent(operation::GET_PAYMENTS, format!("flow {key} not found"))
        })?;
        Ok(self.paginate(payments, page))
    }
}
