//! In-process implementations of the SDK capabilities.
//!
//! Used by the replay CLI and by tests. Every type is a cheap `Clone` handle
//! over shared state, so a test can keep one copy for inspection while the
//! engine owns another.

use async_trait::async_trait;
use indexmap::IndexMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use super::{
    Channel, ChannelCollection, ChannelCollectionFactory, ChannelEvent, ChannelEventDispatcher,
    ChannelHandler, CollectionEvent, CollectionEventHandler, DeliveryAcknowledger, Member,
    MemberDirectory, SdkError,
};
use crate::feed::CollectionParams;

// ============================================================================
// Collections
// ============================================================================

struct OpenedCollection {
    handler: Option<Arc<dyn CollectionEventHandler>>,
    disposed: bool,
}

#[derive(Default)]
struct CollectionBackend {
    pages: Vec<Vec<Channel>>,
    fail_next_load: Option<SdkError>,
    load_delay: Duration,
    opened: Vec<OpenedCollection>,
    last_params: Option<CollectionParams>,
}

/// Serves a fixed list of pages to every collection it opens. Pages are
/// served as given; the requested page size is only recorded.
#[derive(Clone, Default)]
pub struct MemoryCollectionFactory {
    backend: Arc<Mutex<CollectionBackend>>,
}

impl MemoryCollectionFactory {
    pub fn new(pages: Vec<Vec<Channel>>) -> Self {
        let factory = Self::default();
        factory.set_pages(pages);
        factory
    }

    /// Pages served by collections opened from now on.
    pub fn set_pages(&self, pages: Vec<Vec<Channel>>) {
        self.backend.lock().pages = pages;
    }

    /// The next `load_more` on any collection fails with `error`.
    pub fn fail_next_load(&self, error: SdkError) {
        self.backend.lock().fail_next_load = Some(error);
    }

    /// Every page load sleeps this long before returning.
    pub fn set_load_delay(&self, delay: Duration) {
        self.backend.lock().load_delay = delay;
    }

    pub fn opened_count(&self) -> usize {
        self.backend.lock().opened.len()
    }

    pub fn live_count(&self) -> usize {
        self.backend
            .lock()
            .opened
            .iter()
            .filter(|c| !c.disposed)
            .count()
    }

    pub fn is_disposed(&self, index: usize) -> bool {
        self.backend
            .lock()
            .opened
            .get(index)
            .is_some_and(|c| c.disposed)
    }

    pub fn last_params(&self) -> Option<CollectionParams> {
        self.backend.lock().last_params.clone()
    }

    /// Handler installed on the `index`-th opened collection. Still returned
    /// after the collection is disposed, so callers can deliver late events.
    pub fn handler(&self, index: usize) -> Option<Arc<dyn CollectionEventHandler>> {
        self.backend
            .lock()
            .opened
            .get(index)
            .and_then(|c| c.handler.clone())
    }

    /// Deliver `event` to the most recently opened live collection.
    /// Returns `false` if there is none or it has no handler yet.
    pub fn push(&self, event: CollectionEvent) -> bool {
        let handler = self
            .backend
            .lock()
            .opened
            .iter()
            .rev()
            .find(|c| !c.disposed)
            .and_then(|c| c.handler.clone());

        match handler {
            Some(handler) => {
                handler.dispatch(event);
                true
            }
            None => false,
        }
    }
}

impl ChannelCollectionFactory for MemoryCollectionFactory {
    fn create(&self, params: &CollectionParams) -> Box<dyn ChannelCollection> {
        let mut backend = self.backend.lock();
        let pages = backend.pages.clone();
        backend.last_params = Some(params.clone());
        backend.opened.push(OpenedCollection {
            handler: None,
            disposed: false,
        });
        let index = backend.opened.len() - 1;
        tracing::debug!(index, "Opened in-memory collection");

        Box::new(MemoryCollection {
            backend: Arc::clone(&self.backend),
            index,
            pages,
            cursor: 0,
            disposed: false,
        })
    }
}

pub struct MemoryCollection {
    backend: Arc<Mutex<CollectionBackend>>,
    index: usize,
    pages: Vec<Vec<Channel>>,
    cursor: usize,
    disposed: bool,
}

#[async_trait]
impl ChannelCollection for MemoryCollection {
    fn has_more(&self) -> bool {
        !self.disposed && self.cursor < self.pages.len()
    }

    async fn load_more(&mut self) -> Result<Vec<Channel>, SdkError> {
        let delay = self.backend.lock().load_delay;
        if delay.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(delay).await;
        }

        if self.disposed {
            return Err(SdkError::Disposed);
        }
        if let Some(error) = self.backend.lock().fail_next_load.take() {
            return Err(error);
        }

        let page = self.pages.get(self.cursor).cloned().unwrap_or_default();
        self.cursor += 1;
        Ok(page)
    }

    fn set_event_handler(&mut self, handler: Arc<dyn CollectionEventHandler>) {
        if let Some(slot) = self.backend.lock().opened.get_mut(self.index) {
            slot.handler = Some(handler);
        }
    }

    fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        if let Some(slot) = self.backend.lock().opened.get_mut(self.index) {
            slot.disposed = true;
        }
    }
}

// ============================================================================
// Dispatcher
// ============================================================================

/// Handler registry keyed by id. Registering an existing id replaces it.
#[derive(Clone, Default)]
pub struct MemoryDispatcher {
    handlers: Arc<Mutex<IndexMap<String, Arc<dyn ChannelHandler>>>>,
}

impl MemoryDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver `event` to every registered handler, in registration order.
    pub fn emit(&self, event: ChannelEvent) -> usize {
        let handlers: Vec<_> = self.handlers.lock().values().cloned().collect();
        for handler in &handlers {
            handler.on_event(event.clone());
        }
        handlers.len()
    }

    pub fn handler_ids(&self) -> Vec<String> {
        self.handlers.lock().keys().cloned().collect()
    }
}

impl ChannelEventDispatcher for MemoryDispatcher {
    fn add_channel_handler(&self, handler_id: &str, handler: Arc<dyn ChannelHandler>) {
        self.handlers.lock().insert(handler_id.to_string(), handler);
    }

    fn remove_channel_handler(&self, handler_id: &str) {
        self.handlers.lock().shift_remove(handler_id);
    }
}

// ============================================================================
// Acknowledger
// ============================================================================

/// Records every delivery receipt in call order.
#[derive(Clone)]
pub struct RecordingAcknowledger {
    delivered: Arc<Mutex<Vec<String>>>,
    count: Arc<watch::Sender<usize>>,
    fail: Arc<AtomicBool>,
}

impl Default for RecordingAcknowledger {
    fn default() -> Self {
        Self {
            delivered: Arc::default(),
            count: Arc::new(watch::Sender::new(0)),
            fail: Arc::default(),
        }
    }
}

impl RecordingAcknowledger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delivered(&self) -> Vec<String> {
        self.delivered.lock().clone()
    }

    /// While set, every call is recorded and then fails.
    pub fn fail_all(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Wait until at least `count` receipts have been recorded.
    pub async fn wait_for(&self, count: usize) {
        let mut rx = self.count.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = rx.wait_for(|n| *n >= count).await;
    }
}

#[async_trait]
impl DeliveryAcknowledger for RecordingAcknowledger {
    async fn mark_as_delivered(&self, channel_url: &str) -> Result<(), SdkError> {
        let total = {
            let mut delivered = self.delivered.lock();
            delivered.push(channel_url.to_string());
            delivered.len()
        };
        self.count.send_replace(total);

        if self.fail.load(Ordering::SeqCst) {
            return Err(SdkError::Network("acknowledgment failed".to_string()));
        }
        Ok(())
    }
}

// ============================================================================
// Member Directory
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryQuery {
    pub channel_url: String,
    pub prefix: String,
    pub limit: usize,
}

#[derive(Default)]
struct DirectoryState {
    roster: Vec<Member>,
    queries: Vec<DirectoryQuery>,
    delay: Duration,
    fail: Option<SdkError>,
}

/// Remote-directory stand-in answering prefix queries from one roster.
#[derive(Clone, Default)]
pub struct MemoryDirectory {
    state: Arc<Mutex<DirectoryState>>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_roster(roster: Vec<Member>) -> Self {
        let directory = Self::default();
        directory.set_roster(roster);
        directory
    }

    pub fn set_roster(&self, roster: Vec<Member>) {
        self.state.lock().roster = roster;
    }

    /// Every query sleeps this long before answering.
    pub fn set_delay(&self, delay: Duration) {
        self.state.lock().delay = delay;
    }

    /// Every query fails with `error` until cleared with `None`.
    pub fn set_failure(&self, error: Option<SdkError>) {
        self.state.lock().fail = error;
    }

    pub fn queries(&self) -> Vec<DirectoryQuery> {
        self.state.lock().queries.clone()
    }
}

#[async_trait]
impl MemberDirectory for MemoryDirectory {
    async fn query_by_prefix(
        &self,
        channel_url: &str,
        prefix: &str,
        limit: usize,
    ) -> Result<Vec<Member>, SdkError> {
        let delay = {
            let mut state = self.state.lock();
            state.queries.push(DirectoryQuery {
                channel_url: channel_url.to_string(),
                prefix: prefix.to_string(),
                limit,
            });
            state.delay
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let state = self.state.lock();
        if let Some(error) = &state.fail {
            return Err(error.clone());
        }
        let prefix = prefix.to_lowercase();
        Ok(state
            .roster
            .iter()
            .filter(|m| m.nickname.to_lowercase().starts_with(&prefix))
            .take(limit)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(urls: &[&str]) -> Vec<Channel> {
        urls.iter().map(|u| Channel::group(*u, *u)).collect()
    }

    #[tokio::test]
    async fn test_collection_serves_pages_in_order() {
        let factory = MemoryCollectionFactory::new(vec![page(&["c1", "c2"]), page(&["c3"])]);
        let mut collection = factory.create(&CollectionParams::default());

        assert!(collection.has_more());
        assert_eq!(collection.load_more().await.unwrap().len(), 2);
        assert_eq!(collection.load_more().await.unwrap()[0].url, "c3");
        assert!(!collection.has_more());
    }

    #[tokio::test]
    async fn test_disposed_collection_rejects_loads() {
        let factory = MemoryCollectionFactory::new(vec![page(&["c1"])]);
        let mut collection = factory.create(&CollectionParams::default());
        collection.dispose();
        collection.dispose();

        assert!(factory.is_disposed(0));
        assert_eq!(factory.live_count(), 0);
        assert!(!collection.has_more());
        assert_eq!(collection.load_more().await, Err(SdkError::Disposed));
    }

    #[tokio::test]
    async fn test_fail_next_load_fails_once() {
        let factory = MemoryCollectionFactory::new(vec![page(&["c1"])]);
        factory.fail_next_load(SdkError::Network("down".into()));
        let mut collection = factory.create(&CollectionParams::default());

        assert!(collection.load_more().await.is_err());
        assert!(collection.load_more().await.is_ok());
    }

    #[tokio::test]
    async fn test_directory_prefix_is_case_insensitive() {
        let directory = MemoryDirectory::with_roster(vec![
            Member::new("u1", "Alice"),
            Member::new("u2", "alan"),
            Member::new("u3", "Bob"),
        ]);
        let found = directory.query_by_prefix("c1", "AL", 10).await.unwrap();
        let ids: Vec<&str> = found.iter().map(|m| m.user_id.as_str()).collect();
        assert_eq!(ids, vec!["u1", "u2"]);
        assert_eq!(directory.queries()[0].prefix, "AL");
    }

    #[tokio::test]
    async fn test_acknowledger_counts_even_when_failing() {
        let acks = RecordingAcknowledger::new();
        acks.fail_all(true);
        assert!(acks.mark_as_delivered("c1").await.is_err());
        acks.wait_for(1).await;
        assert_eq!(acks.delivered(), vec!["c1".to_string()]);
    }
}
