//! The group channel list: one consistent, ordered view over every source of
//! channel updates for the signed-in user.
//!
//! A [`GroupChannelList`] owns an [`EntityStore`] and merges into it:
//!
//! - bulk pages and push notifications from the open collection (via [`FeedCoordinator`])
//! - bus and lifecycle-dispatcher events (via [`FanIn`])
//! - updates handed in by the UI ([`GroupChannelList::apply_external_update`])
//!
//! Every merge republishes the sorted view on a `watch` channel. Every upsert
//! also sends a fire-and-forget delivery receipt per channel.

use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::watch;

use crate::events::{ChannelDelta, ChannelSink, DeltaSource, FanIn};
use crate::feed::{CollectionCreator, CollectionParams, FeedCoordinator, FeedError};
use crate::sdk::{Channel, ChatServices, DeliveryAcknowledger};
use crate::store::{Comparator, Delta, EntityStore};

static NEXT_LIST_ID: AtomicU64 = AtomicU64::new(0);

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ListError {
    #[error("GroupChannelList must be created inside a Tokio runtime")]
    NoRuntime,
    #[error(transparent)]
    Feed(#[from] FeedError),
}

// ============================================================================
// Options and Status
// ============================================================================

/// Construction options.
#[derive(Clone, Default)]
pub struct ListOptions {
    /// Order of the published view. Without one the view follows store order,
    /// which for fresh pages is the collection's own order.
    pub sort_comparator: Option<Comparator<Channel>>,
    /// Replaces the default-configured collection when it yields one.
    pub collection_creator: Option<CollectionCreator>,
    pub collection_params: CollectionParams,
}

impl std::fmt::Debug for ListOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListOptions")
            .field("sort_comparator", &self.sort_comparator.is_some())
            .field("collection_creator", &self.collection_creator.is_some())
            .field("collection_params", &self.collection_params)
            .finish()
    }
}

/// Progress flags, each raised for the duration of the matching operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ListStatus {
    /// `initialize` is running.
    pub loading: bool,
    /// `refresh` is running.
    pub refreshing: bool,
}

// ============================================================================
// Shared State (the sink)
// ============================================================================

struct ListShared {
    subscriber_id: String,
    store: Mutex<EntityStore<Channel>>,
    comparator: Option<Comparator<Channel>>,
    view_tx: watch::Sender<Arc<[Channel]>>,
    status_tx: watch::Sender<ListStatus>,
    viewer: RwLock<Option<String>>,
    closed: AtomicBool,
    acknowledger: Arc<dyn DeliveryAcknowledger>,
    runtime: Handle,
}

impl ListShared {
    fn update_status(&self, update: impl FnOnce(&mut ListStatus)) {
        self.status_tx.send_modify(update);
    }

    fn acknowledge(&self, channel_url: String) {
        let acknowledger = Arc::clone(&self.acknowledger);
        self.runtime.spawn(async move {
            if let Err(e) = acknowledger.mark_as_delivered(&channel_url).await {
                tracing::warn!(channel_url = %channel_url, error = %e, "Failed to mark channel as delivered");
            }
        });
    }
}

impl ChannelSink for ListShared {
    fn apply(&self, delta: ChannelDelta, source: DeltaSource) {
        if self.closed.load(Ordering::SeqCst) {
            tracing::debug!(?source, subscriber_id = %self.subscriber_id, "Dropping delta for disposed list");
            return;
        }

        let delta = delta.retain(Channel::is_group);
        if delta.is_empty() {
            return;
        }
        let delivered: Vec<String> = match &delta {
            Delta::Replace(channels) | Delta::Upsert(channels) => {
                channels.iter().map(|c| c.url.clone()).collect()
            }
            Delta::Delete(_) => Vec::new(),
        };

        {
            let mut store = self.store.lock();
            store.apply(delta);
            let view: Arc<[Channel]> = store.view(self.comparator.as_ref()).into();
            tracing::debug!(?source, count = view.len(), "Channel view updated");
            self.view_tx.send_replace(view);
        }

        for channel_url in delivered {
            self.acknowledge(channel_url);
        }
    }

    fn viewer_id(&self) -> Option<String> {
        self.viewer.read().clone()
    }
}

// ============================================================================
// Group Channel List
// ============================================================================

/// Consistent, ordered list of the viewer's group channels.
///
/// Must be created inside a Tokio runtime; the runtime is captured to send
/// delivery receipts from whatever thread an update arrives on. Bus and
/// dispatcher subscriptions live from construction until
/// [`dispose`](Self::dispose) or drop. After that, no source can change the
/// published view.
pub struct GroupChannelList {
    shared: Arc<ListShared>,
    feed: tokio::sync::Mutex<FeedCoordinator>,
    fan_in: Mutex<FanIn>,
}

impl GroupChannelList {
    pub fn new(services: ChatServices, options: ListOptions) -> Result<Self, ListError> {
        let runtime = Handle::try_current().map_err(|_| ListError::NoRuntime)?;
        let id = NEXT_LIST_ID.fetch_add(1, Ordering::Relaxed) + 1;
        let subscriber_id = format!("GroupChannelList_{id}");

        let (view_tx, _) = watch::channel(Arc::<[Channel]>::from(Vec::new()));
        let (status_tx, _) = watch::channel(ListStatus::default());
        let shared = Arc::new(ListShared {
            subscriber_id: subscriber_id.clone(),
            store: Mutex::new(EntityStore::new()),
            comparator: options.sort_comparator,
            view_tx,
            status_tx,
            viewer: RwLock::new(None),
            closed: AtomicBool::new(false),
            acknowledger: services.acknowledger,
            runtime,
        });
        let weak_shared = Arc::downgrade(&shared);
        let sink: Weak<dyn ChannelSink> = weak_shared;

        let feed = FeedCoordinator::new(
            services.collections,
            options.collection_params,
            options.collection_creator,
            Weak::clone(&sink),
        );
        let fan_in = FanIn::connect(&subscriber_id, services.bus.as_ref(), services.dispatcher, sink);
        tracing::info!(subscriber_id = %subscriber_id, "Channel list created");

        Ok(Self {
            shared,
            feed: tokio::sync::Mutex::new(feed),
            fan_in: Mutex::new(fan_in),
        })
    }

    /// Id used for bus subscriptions and dispatcher registration.
    pub fn subscriber_id(&self) -> &str {
        &self.shared.subscriber_id
    }

    /// Switch to `user_id` and load the first page. `None` (or an empty id)
    /// means logged out: the list becomes empty.
    ///
    /// Raises `loading` while running.
    pub async fn initialize(&self, user_id: Option<&str>) -> Result<(), ListError> {
        let mut feed = self.feed.lock().await;
        if self.is_disposed() {
            return Ok(());
        }
        *self.shared.viewer.write() = user_id.filter(|id| !id.is_empty()).map(str::to_string);

        self.shared.update_status(|s| s.loading = true);
        let _loading = scopeguard::guard((), |_| self.shared.update_status(|s| s.loading = false));
        feed.initialize(user_id).await?;
        Ok(())
    }

    /// Re-run initialization for the current user.
    ///
    /// Raises `refreshing` while running.
    pub async fn refresh(&self) -> Result<(), ListError> {
        let mut feed = self.feed.lock().await;
        if self.is_disposed() {
            return Ok(());
        }
        let viewer = self.shared.viewer_id();

        self.shared.update_status(|s| s.refreshing = true);
        let _refreshing =
            scopeguard::guard((), |_| self.shared.update_status(|s| s.refreshing = false));
        feed.initialize(viewer.as_deref()).await?;
        Ok(())
    }

    /// Load the next page. Returns whether a page was applied; `false` when
    /// there are no more pages or nothing is open.
    pub async fn load_more(&self) -> Result<bool, ListError> {
        let mut feed = self.feed.lock().await;
        Ok(feed.load_more().await?)
    }

    pub async fn has_more(&self) -> bool {
        self.feed.lock().await.has_more()
    }

    /// Merge a channel snapshot produced by the UI itself.
    pub fn apply_external_update(&self, channel: Channel) {
        self.shared
            .apply(Delta::Upsert(vec![channel]), DeltaSource::External);
    }

    /// The current ordered view.
    pub fn channels(&self) -> Arc<[Channel]> {
        self.shared.view_tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<[Channel]>> {
        self.shared.view_tx.subscribe()
    }

    pub fn status(&self) -> ListStatus {
        *self.shared.status_tx.borrow()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<ListStatus> {
        self.shared.status_tx.subscribe()
    }

    pub fn is_loading(&self) -> bool {
        self.status().loading
    }

    pub fn is_refreshing(&self) -> bool {
        self.status().refreshing
    }

    pub fn is_disposed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    /// Tear down every subscription and the open collection. Idempotent.
    pub async fn dispose(&self) {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.fan_in.lock().disconnect();
        self.feed.lock().await.dispose();
        tracing::info!(subscriber_id = %self.shared.subscriber_id, "Channel list disposed");
    }
}

impl Drop for GroupChannelList {
    fn drop(&mut self) {
        self.shared.closed.store(true, Ordering::SeqCst);
        self.fan_in.get_mut().disconnect();
        self.feed.get_mut().dispose();
    }
}
