use parking_lot::RwLock;
use std::sync::{Arc, Weak};
use thiserror::Error;

use super::params::CollectionParams;
use crate::events::{from_collection, ChannelSink, DeltaSource};
use crate::sdk::{
    Channel, ChannelCollection, ChannelCollectionFactory, CollectionEvent, CollectionEventHandler,
    SdkError,
};
use crate::store::Delta;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FeedError {
    #[error("Failed to load channels: {0}")]
    Load(#[from] SdkError),
}

// ============================================================================
// State
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FeedState {
    /// No collection open (never initialized, logged out, or first page failed).
    #[default]
    Uninitialized,
    /// Fetching the first page of a fresh collection.
    Loading,
    Ready,
    LoadingMore,
    Disposed,
}

/// Builds a collection in place of the default-configured one. Returning
/// `None` falls back to the factory.
pub type CollectionCreator = Arc<dyn Fn() -> Option<Box<dyn ChannelCollection>> + Send + Sync>;

/// The single open collection, tagged with the generation it was opened under.
///
/// Disposing is idempotent and also happens on drop, so replacing or dropping
/// a handle always releases the underlying subscription.
pub struct FeedHandle {
    generation: u64,
    collection: Box<dyn ChannelCollection>,
    disposed: bool,
}

impl FeedHandle {
    fn new(generation: u64, collection: Box<dyn ChannelCollection>) -> Self {
        Self {
            generation,
            collection,
            disposed: false,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn has_more(&self) -> bool {
        !self.disposed && self.collection.has_more()
    }

    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        self.collection.dispose();
        tracing::debug!(generation = self.generation, "Collection disposed");
    }
}

impl Drop for FeedHandle {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Push handler installed on a collection. Forwards only while its generation
/// is still the live one.
///
/// The read guard is held across the merge, so releasing a handle waits for
/// every push already past the check.
struct GuardedHandler {
    generation: u64,
    live: Arc<RwLock<u64>>,
    sink: Weak<dyn ChannelSink>,
}

impl GuardedHandler {
    fn forward(&self, event: CollectionEvent) {
        let live = self.live.read();
        if *live != self.generation {
            tracing::debug!(
                generation = self.generation,
                live = *live,
                "Dropping push notification from disposed collection"
            );
            return;
        }
        if let Some(sink) = self.sink.upgrade() {
            sink.apply(from_collection(event), DeltaSource::Collection);
        }
    }
}

impl CollectionEventHandler for GuardedHandler {
    fn on_channels_added(&self, channels: Vec<Channel>) {
        self.forward(CollectionEvent::Added { channels });
    }

    fn on_channels_updated(&self, channels: Vec<Channel>) {
        self.forward(CollectionEvent::Updated { channels });
    }

    fn on_channels_deleted(&self, channel_urls: Vec<String>) {
        self.forward(CollectionEvent::Deleted { channel_urls });
    }
}

// ============================================================================
// Coordinator
// ============================================================================

/// Owns the open collection and drives its pagination.
///
/// Pages are handed to the sink as deltas: the first page of a fresh
/// collection as a clearing upsert, later pages as non-clearing upserts.
/// Callers serialize access (the list keeps the coordinator behind an async
/// mutex), so at most one page fetch is in flight.
pub struct FeedCoordinator {
    factory: Arc<dyn ChannelCollectionFactory>,
    params: CollectionParams,
    creator: Option<CollectionCreator>,
    sink: Weak<dyn ChannelSink>,
    handle: Option<FeedHandle>,
    state: FeedState,
    last_generation: u64,
    /// Generation of the handle whose push notifications may reach the sink;
    /// zero when none may.
    live: Arc<RwLock<u64>>,
}

impl FeedCoordinator {
    pub fn new(
        factory: Arc<dyn ChannelCollectionFactory>,
        params: CollectionParams,
        creator: Option<CollectionCreator>,
        sink: Weak<dyn ChannelSink>,
    ) -> Self {
        Self {
            factory,
            params,
            creator,
            sink,
            handle: None,
            state: FeedState::Uninitialized,
            last_generation: 0,
            live: Arc::new(RwLock::new(0)),
        }
    }

    pub fn state(&self) -> FeedState {
        self.state
    }

    pub fn has_more(&self) -> bool {
        self.handle.as_ref().is_some_and(FeedHandle::has_more)
    }

    /// Generation whose push notifications are currently forwarded.
    pub fn live_generation(&self) -> Option<u64> {
        match *self.live.read() {
            0 => None,
            generation => Some(generation),
        }
    }

    /// Open a fresh collection for `scope` and load its first page.
    ///
    /// The previous collection is disposed first. An absent or empty scope
    /// leaves no collection open and clears the sink. A first-page failure
    /// disposes the new collection and returns the error.
    pub async fn initialize(&mut self, scope: Option<&str>) -> Result<(), FeedError> {
        if self.state == FeedState::Disposed {
            tracing::debug!("Ignoring initialize on disposed feed");
            return Ok(());
        }
        self.release_handle();

        let Some(scope) = scope.filter(|s| !s.is_empty()) else {
            tracing::info!("No scope identity, feed cleared");
            self.state = FeedState::Uninitialized;
            self.emit(Delta::Replace(Vec::new()), DeltaSource::Page);
            return Ok(());
        };

        self.last_generation += 1;
        let generation = self.last_generation;
        let collection = self
            .creator
            .as_ref()
            .and_then(|create| create())
            .unwrap_or_else(|| self.factory.create(&self.params));
        let mut handle = FeedHandle::new(generation, collection);
        tracing::info!(scope, generation, limit = self.params.limit, "Opened channel collection");

        self.state = FeedState::Loading;
        let first_page = if handle.has_more() {
            match handle.collection.load_more().await {
                Ok(page) => page,
                Err(e) => {
                    tracing::warn!(scope, generation, error = %e, "First page failed to load");
                    drop(handle);
                    self.state = FeedState::Uninitialized;
                    return Err(e.into());
                }
            }
        } else {
            Vec::new()
        };
        tracing::debug!(generation, count = first_page.len(), "First page loaded");
        self.emit(Delta::Replace(first_page), DeltaSource::Page);

        *self.live.write() = generation;
        handle.collection.set_event_handler(Arc::new(GuardedHandler {
            generation,
            live: Arc::clone(&self.live),
            sink: Weak::clone(&self.sink),
        }));
        self.handle = Some(handle);
        self.state = FeedState::Ready;
        Ok(())
    }

    /// Fetch the next page if there is one. Returns whether a page was applied.
    pub async fn load_more(&mut self) -> Result<bool, FeedError> {
        let Some(handle) = self.handle.as_mut() else {
            tracing::debug!(state = ?self.state, "load_more without an open collection");
            return Ok(false);
        };
        if !handle.has_more() {
            tracing::debug!(generation = handle.generation, "No more pages");
            return Ok(false);
        }

        self.state = FeedState::LoadingMore;
        let result = handle.collection.load_more().await;
        self.state = FeedState::Ready;

        let page = result.inspect_err(|e| {
            tracing::warn!(error = %e, "Next page failed to load");
        })?;
        tracing::debug!(count = page.len(), "Next page loaded");
        self.emit(Delta::Upsert(page), DeltaSource::Page);
        Ok(true)
    }

    /// Dispose the open collection. Later calls to any method are no-ops.
    pub fn dispose(&mut self) {
        if self.state == FeedState::Disposed {
            return;
        }
        self.release_handle();
        self.state = FeedState::Disposed;
        tracing::info!("Feed disposed");
    }

    fn release_handle(&mut self) {
        // Blocks until in-flight pushes from the old handle have merged.
        *self.live.write() = 0;
        if let Some(mut handle) = self.handle.take() {
            handle.dispose();
        }
    }

    fn emit(&self, delta: Delta<Channel>, source: DeltaSource) {
        if let Some(sink) = self.sink.upgrade() {
            sink.apply(delta, source);
        }
    }
}

impl Drop for FeedCoordinator {
    fn drop(&mut self) {
        self.release_handle();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::ChannelDelta;
    use crate::sdk::memory::MemoryCollectionFactory;
    use crate::store::EntityStore;
    use parking_lot::Mutex;
    use std::sync::mpsc;
    use std::time::Duration;

    #[derive(Default)]
    struct StoreSink {
        store: Mutex<EntityStore<Channel>>,
        sources: Mutex<Vec<DeltaSource>>,
    }

    impl StoreSink {
        fn urls(&self) -> Vec<String> {
            self.store
                .lock()
                .view(None)
                .into_iter()
                .map(|c| c.url)
                .collect()
        }
    }

    impl ChannelSink for StoreSink {
        fn apply(&self, delta: ChannelDelta, source: DeltaSource) {
            self.store.lock().apply(delta);
            self.sources.lock().push(source);
        }

        fn viewer_id(&self) -> Option<String> {
            None
        }
    }

    /// Sink whose push merges wait until the test lets them through.
    struct GatedSink {
        inner: StoreSink,
        entered: Mutex<mpsc::Sender<()>>,
        proceed: Mutex<mpsc::Receiver<()>>,
    }

    impl ChannelSink for GatedSink {
        fn apply(&self, delta: ChannelDelta, source: DeltaSource) {
            if source == DeltaSource::Collection {
                let _ = self.entered.lock().send(());
                let _ = self.proceed.lock().recv();
            }
            self.inner.apply(delta, source);
        }

        fn viewer_id(&self) -> Option<String> {
            None
        }
    }

    fn page(urls: &[&str]) -> Vec<Channel> {
        urls.iter().map(|u| Channel::group(*u, *u)).collect()
    }

    fn setup(pages: Vec<Vec<Channel>>) -> (MemoryCollectionFactory, Arc<StoreSink>, FeedCoordinator) {
        let factory = MemoryCollectionFactory::new(pages);
        let sink = Arc::new(StoreSink::default());
        let sink_dyn: Arc<dyn ChannelSink> = sink.clone();
        let feed = FeedCoordinator::new(
            Arc::new(factory.clone()),
            CollectionParams::default(),
            None,
            Arc::downgrade(&sink_dyn),
        );
        (factory, sink, feed)
    }

    #[tokio::test]
    async fn test_initialize_loads_first_page_then_attaches_handler() {
        let (factory, sink, mut feed) = setup(vec![page(&["c1", "c2"]), page(&["c3"])]);

        feed.initialize(Some("user-1")).await.unwrap();

        assert_eq!(feed.state(), FeedState::Ready);
        assert_eq!(sink.urls(), vec!["c1", "c2"]);
        assert_eq!(feed.live_generation(), Some(1));
        assert!(factory.handler(0).is_some());
        assert!(feed.has_more());
        assert_eq!(factory.last_params(), Some(CollectionParams::default()));
    }

    #[tokio::test]
    async fn test_load_more_appends_until_exhausted() {
        let (_factory, sink, mut feed) = setup(vec![page(&["c1"]), page(&["c2"])]);
        feed.initialize(Some("user-1")).await.unwrap();

        assert!(feed.load_more().await.unwrap());
        assert!(!feed.load_more().await.unwrap());
        assert_eq!(sink.urls(), vec!["c1", "c2"]);
    }

    #[tokio::test]
    async fn test_load_more_before_initialize_is_noop() {
        let (factory, _sink, mut feed) = setup(vec![page(&["c1"])]);
        assert!(!feed.load_more().await.unwrap());
        assert_eq!(factory.opened_count(), 0);
    }

    #[tokio::test]
    async fn test_empty_scope_clears_without_opening() {
        let (factory, sink, mut feed) = setup(vec![page(&["c1"])]);
        feed.initialize(Some("user-1")).await.unwrap();

        feed.initialize(Some("")).await.unwrap();

        assert!(sink.urls().is_empty());
        assert_eq!(factory.opened_count(), 1);
        assert_eq!(factory.live_count(), 0);
        assert_eq!(feed.state(), FeedState::Uninitialized);
        assert_eq!(feed.live_generation(), None);
    }

    #[tokio::test]
    async fn test_reinitialize_drops_stale_push_notifications() {
        let (factory, sink, mut feed) = setup(vec![page(&["c1"])]);
        feed.initialize(Some("user-1")).await.unwrap();
        let stale = factory.handler(0).unwrap();

        factory.set_pages(vec![page(&["c9"])]);
        feed.initialize(Some("user-2")).await.unwrap();
        stale.on_channels_added(page(&["ghost"]));

        assert!(factory.is_disposed(0));
        assert_eq!(sink.urls(), vec!["c9"]);

        assert!(factory.push(CollectionEvent::Added {
            channels: page(&["c10"])
        }));
        assert_eq!(sink.urls(), vec!["c9", "c10"]);
    }

    #[tokio::test]
    async fn test_first_page_failure_disposes_collection() {
        let (factory, sink, mut feed) = setup(vec![page(&["c1"])]);
        factory.fail_next_load(SdkError::Network("offline".into()));

        let err = feed.initialize(Some("user-1")).await.unwrap_err();

        assert_eq!(err, FeedError::Load(SdkError::Network("offline".into())));
        assert_eq!(feed.state(), FeedState::Uninitialized);
        assert!(factory.is_disposed(0));
        assert!(sink.urls().is_empty());
    }

    #[tokio::test]
    async fn test_load_more_failure_keeps_store_and_state() {
        let (factory, sink, mut feed) = setup(vec![page(&["c1"]), page(&["c2"])]);
        feed.initialize(Some("user-1")).await.unwrap();
        factory.fail_next_load(SdkError::Network("offline".into()));

        assert!(feed.load_more().await.is_err());
        assert_eq!(feed.state(), FeedState::Ready);
        assert_eq!(sink.urls(), vec!["c1"]);
        assert!(feed.load_more().await.unwrap());
    }

    #[tokio::test]
    async fn test_collection_without_pages_still_clears() {
        let (factory, sink, mut feed) = setup(vec![page(&["c1"])]);
        feed.initialize(Some("user-1")).await.unwrap();

        factory.set_pages(Vec::new());
        feed.initialize(Some("user-1")).await.unwrap();

        assert!(sink.urls().is_empty());
        assert_eq!(feed.state(), FeedState::Ready);
    }

    #[tokio::test]
    async fn test_dispose_is_idempotent_and_final() {
        let (factory, sink, mut feed) = setup(vec![page(&["c1"])]);
        feed.initialize(Some("user-1")).await.unwrap();
        let handler = factory.handler(0).unwrap();

        feed.dispose();
        feed.dispose();
        handler.on_channels_deleted(vec!["c1".into()]);
        feed.initialize(Some("user-1")).await.unwrap();

        assert_eq!(feed.state(), FeedState::Disposed);
        assert_eq!(factory.opened_count(), 1);
        assert_eq!(sink.urls(), vec!["c1"]);
    }

    #[tokio::test]
    async fn test_creator_overrides_factory() {
        let (factory, sink, _) = setup(Vec::new());
        let custom = MemoryCollectionFactory::new(vec![page(&["custom"])]);
        let creator: CollectionCreator = {
            let custom = custom.clone();
            Arc::new(move || Some(custom.create(&CollectionParams::default())))
        };
        let sink_dyn: Arc<dyn ChannelSink> = sink.clone();
        let mut feed = FeedCoordinator::new(
            Arc::new(factory.clone()),
            CollectionParams::default(),
            Some(creator),
            Arc::downgrade(&sink_dyn),
        );

        feed.initialize(Some("user-1")).await.unwrap();

        assert_eq!(sink.urls(), vec!["custom"]);
        assert_eq!(factory.opened_count(), 0);
        assert_eq!(custom.opened_count(), 1);
    }

    #[tokio::test]
    async fn test_dispose_waits_for_push_already_merging() {
        let factory = MemoryCollectionFactory::new(vec![page(&["c1"])]);
        let (entered_tx, entered_rx) = mpsc::channel();
        let (proceed_tx, proceed_rx) = mpsc::channel();
        let sink = Arc::new(GatedSink {
            inner: StoreSink::default(),
            entered: Mutex::new(entered_tx),
            proceed: Mutex::new(proceed_rx),
        });
        let sink_dyn: Arc<dyn ChannelSink> = sink.clone();
        let mut feed = FeedCoordinator::new(
            Arc::new(factory.clone()),
            CollectionParams::default(),
            None,
            Arc::downgrade(&sink_dyn),
        );
        feed.initialize(Some("user-1")).await.unwrap();
        let handler = factory.handler(0).unwrap();

        let pusher = std::thread::spawn(move || handler.on_channels_added(page(&["c2"])));
        entered_rx.recv().unwrap();
        let releaser = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            proceed_tx.send(()).unwrap();
        });

        feed.dispose();
        assert_eq!(sink.inner.urls(), vec!["c1", "c2"]);

        pusher.join().unwrap();
        releaser.join().unwrap();
        assert_eq!(sink.inner.urls(), vec!["c1", "c2"]);
    }
}
