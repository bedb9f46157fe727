//! JSON replay scripts driving a [`GroupChannelList`] over the in-process SDK.
//!
//! A scenario names the signed-in user, the pages the server would serve and
//! a list of steps (pagination, bus and dispatcher events, pushes, user
//! switches). [`replay`] runs it and reports the channel view after each step.
//!
//! ```json
//! {
//!   "user_id": "user-1",
//!   "pages": [[{ "url": "c1" }, { "url": "c2" }], [{ "url": "c3" }]],
//!   "steps": [
//!     { "op": "bus_deleted", "channel_url": "c1" },
//!     { "op": "load_more" }
//!   ]
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::events::{BusError, BusEventKind, BusPayload, InProcessBus};
use crate::feed::CollectionParams;
use crate::list::{GroupChannelList, ListError, ListOptions};
use crate::mention::{MentionConfig, MentionError, MentionInput, MentionSuggestion, Range, SearchPlan};
use crate::sdk::memory::{
    MemoryCollectionFactory, MemoryDirectory, MemoryDispatcher, RecordingAcknowledger,
};
use crate::sdk::{by_latest_activity, Channel, ChannelEvent, ChatServices, CollectionEvent, Member, SdkError};
use crate::store::Comparator;

/// Longest wait for a scheduled member search, on top of the debounce.
const SEARCH_GRACE: Duration = Duration::from_secs(5);

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error("Failed to read scenario file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid scenario JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    List(#[from] ListError),

    #[error(transparent)]
    Mention(#[from] MentionError),

    #[error("Channel not found in scenario: {0}")]
    UnknownChannel(String),

    #[error("Member search did not finish in time")]
    SearchTimeout,
}

// ============================================================================
// Scenario Model
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    /// Signed-in user; absent means logged out.
    #[serde(default)]
    pub user_id: Option<String>,
    /// Pages served by every collection, in order.
    #[serde(default)]
    pub pages: Vec<Vec<Channel>>,
    /// Sort the view by latest activity instead of store order.
    #[serde(default)]
    pub sort_by_activity: bool,
    /// Roster answering remote member queries for super channels.
    #[serde(default)]
    pub directory: Vec<Member>,
    #[serde(default)]
    pub steps: Vec<Step>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Step {
    LoadMore,
    Refresh,
    /// Re-initialize for another user (or log out with `null`).
    SwitchUser {
        user_id: Option<String>,
    },
    /// Replace the pages served by collections opened from now on.
    SetPages {
        pages: Vec<Vec<Channel>>,
    },
    FailNextLoad {
        message: String,
    },
    BusUpdated {
        channel: Channel,
    },
    BusDeleted {
        channel_url: String,
    },
    BusError {
        kind: BusEventKind,
        message: String,
    },
    /// Push notification from the open collection.
    Push {
        event: CollectionEvent,
    },
    /// Lifecycle callback from the dispatcher.
    Dispatch {
        event: ChannelEvent,
    },
    ExternalUpdate {
        channel: Channel,
    },
}

impl Step {
    fn label(&self) -> String {
        match self {
            Step::LoadMore => "load_more".to_string(),
            Step::Refresh => "refresh".to_string(),
            Step::SwitchUser { user_id } => {
                format!("switch_user {}", user_id.as_deref().unwrap_or("<none>"))
            }
            Step::SetPages { pages } => format!("set_pages ({} pages)", pages.len()),
            Step::FailNextLoad { .. } => "fail_next_load".to_string(),
            Step::BusUpdated { channel } => format!("bus_updated {}", channel.url),
            Step::BusDeleted { channel_url } => format!("bus_deleted {channel_url}"),
            Step::BusError { kind, .. } => format!("bus_error {kind:?}"),
            Step::Push { event } => format!("push {}", collection_event_name(event)),
            Step::Dispatch { event } => format!("dispatch {}", channel_event_name(event)),
            Step::ExternalUpdate { channel } => format!("external_update {}", channel.url),
        }
    }
}

fn collection_event_name(event: &CollectionEvent) -> &'static str {
    match event {
        CollectionEvent::Added { .. } => "added",
        CollectionEvent::Updated { .. } => "updated",
        CollectionEvent::Deleted { .. } => "deleted",
    }
}

fn channel_event_name(event: &ChannelEvent) -> &'static str {
    match event {
        ChannelEvent::Changed { .. } => "changed",
        ChannelEvent::Frozen { .. } => "frozen",
        ChannelEvent::Unfrozen { .. } => "unfrozen",
        ChannelEvent::MemberCountChanged { .. } => "member_count_changed",
        ChannelEvent::Deleted { .. } => "deleted",
        ChannelEvent::UserJoined { .. } => "user_joined",
        ChannelEvent::UserLeft { .. } => "user_left",
    }
}

impl Scenario {
    pub fn from_path(path: &Path) -> Result<Self, ScenarioError> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// First channel with `url` across all pages.
    pub fn find_channel(&self, url: &str) -> Option<&Channel> {
        self.pages.iter().flatten().find(|c| c.url == url)
    }
}

// ============================================================================
// Replay
// ============================================================================

/// View of the list after one step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepReport {
    pub step: usize,
    pub label: String,
    pub channels: Vec<String>,
    pub loading: bool,
    pub refreshing: bool,
    /// Failure returned by the step, if any. Failures do not stop the replay.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Run `scenario` against a fresh list and in-process SDK.
///
/// Step 0 is the initial `initialize` for the scenario's user.
pub async fn replay(
    scenario: &Scenario,
    params: CollectionParams,
) -> Result<Vec<StepReport>, ScenarioError> {
    let factory = MemoryCollectionFactory::new(scenario.pages.clone());
    let dispatcher = MemoryDispatcher::new();
    let bus = InProcessBus::new();
    let acks = RecordingAcknowledger::new();
    let services = ChatServices {
        collections: Arc::new(factory.clone()),
        dispatcher: Arc::new(dispatcher.clone()),
        acknowledger: Arc::new(acks.clone()),
        bus: Arc::new(bus.clone()),
    };
    let sort_comparator: Option<Comparator<Channel>> = scenario
        .sort_by_activity
        .then(|| Arc::new(by_latest_activity) as Comparator<Channel>);
    let list = GroupChannelList::new(
        services,
        ListOptions {
            sort_comparator,
            collection_params: params,
            ..Default::default()
        },
    )?;

    let mut reports = Vec::with_capacity(scenario.steps.len() + 1);
    let result = list.initialize(scenario.user_id.as_deref()).await;
    reports.push(report(&list, 0, "initialize".to_string(), result.err()));

    for (index, step) in scenario.steps.iter().enumerate() {
        let error = match step {
            Step::LoadMore => list.load_more().await.err(),
            Step::Refresh => list.refresh().await.err(),
            Step::SwitchUser { user_id } => list.initialize(user_id.as_deref()).await.err(),
            Step::SetPages { pages } => {
                factory.set_pages(pages.clone());
                None
            }
            Step::FailNextLoad { message } => {
                factory.fail_next_load(SdkError::Network(message.clone()));
                None
            }
            Step::BusUpdated { channel } => {
                bus.publish_payload(BusPayload::ChannelUpdated {
                    channel: channel.clone(),
                });
                None
            }
            Step::BusDeleted { channel_url } => {
                bus.publish_payload(BusPayload::ChannelDeleted {
                    channel_url: channel_url.clone(),
                });
                None
            }
            Step::BusError { kind, message } => {
                bus.publish(*kind, Err(BusError::new(message.clone())));
                None
            }
            Step::Push { event } => {
                if !factory.push(event.clone()) {
                    tracing::debug!("No open collection to push to");
                }
                None
            }
            Step::Dispatch { event } => {
                dispatcher.emit(event.clone());
                None
            }
            Step::ExternalUpdate { channel } => {
                list.apply_external_update(channel.clone());
                None
            }
        };
        reports.push(report(&list, index + 1, step.label(), error));
    }

    list.dispose().await;
    tracing::info!(
        steps = scenario.steps.len(),
        receipts = acks.delivered().len(),
        "Scenario replay finished"
    );
    Ok(reports)
}

fn report(list: &GroupChannelList, step: usize, label: String, error: Option<ListError>) -> StepReport {
    let status = list.status();
    StepReport {
        step,
        label,
        channels: list.channels().iter().map(|c| c.url.clone()).collect(),
        loading: status.loading,
        refreshing: status.refreshing,
        error: error.map(|e| e.to_string()),
    }
}

// ============================================================================
// One-shot Suggestion
// ============================================================================

/// A single mention lookup against a scenario channel.
#[derive(Debug, Clone)]
pub struct SuggestRequest<'a> {
    pub channel_url: &'a str,
    pub text: &'a str,
    /// Character offset of the caret; end of text when absent.
    pub cursor: Option<usize>,
    pub mentioned_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuggestOutcome {
    pub plan: SearchPlan,
    pub limited: bool,
    pub members: Vec<Member>,
}

/// Run one mention lookup and wait for its result.
///
/// Regular channels search their own roster; super channels query the
/// scenario's directory. The scenario's user is the viewer.
pub async fn suggest(
    scenario: &Scenario,
    config: MentionConfig,
    request: SuggestRequest<'_>,
) -> Result<SuggestOutcome, ScenarioError> {
    let channel = scenario
        .find_channel(request.channel_url)
        .ok_or_else(|| ScenarioError::UnknownChannel(request.channel_url.to_string()))?;

    let wait = config.debounce + SEARCH_GRACE;
    let directory = MemoryDirectory::with_roster(scenario.directory.clone());
    let engine = MentionSuggestion::new(config, Arc::new(directory), scenario.user_id.clone())?;

    let cursor = request
        .cursor
        .unwrap_or_else(|| request.text.chars().count());
    let input = MentionInput {
        text: request.text.to_string(),
        selection: Range::caret(cursor),
        mentioned_count: request.mentioned_count,
    };

    let mut rx = engine.subscribe();
    rx.borrow_and_update();
    let plan = engine.update(channel, &input);
    if matches!(plan, SearchPlan::Query { .. }) {
        tokio::time::timeout(wait, rx.changed())
            .await
            .map_err(|_| ScenarioError::SearchTimeout)?
            .map_err(|_| ScenarioError::SearchTimeout)?;
    }

    Ok(SuggestOutcome {
        plan,
        limited: engine.search_limited(),
        members: engine.members().to_vec(),
    })
}
