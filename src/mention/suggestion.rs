use futures::FutureExt;
use parking_lot::Mutex;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::parser::{MentionConfig, MentionParser, Range};
use crate::sdk::{Channel, Member, MemberDirectory, SdkError};

#[derive(Debug, Error)]
pub enum MentionError {
    #[error("MentionSuggestion must be created inside a Tokio runtime")]
    NoRuntime,
}

// ============================================================================
// Planning
// ============================================================================

/// Composer state at one keystroke or selection change.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MentionInput {
    pub text: String,
    pub selection: Range,
    /// Mentions already committed in the message.
    pub mentioned_count: usize,
}

impl MentionInput {
    /// Text with the caret at its end and no committed mentions.
    pub fn typed(text: impl Into<String>) -> Self {
        let text = text.into();
        let end = text.chars().count();
        Self {
            text,
            selection: Range::caret(end),
            mentioned_count: 0,
        }
    }
}

/// What one input should do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchPlan {
    /// Ranged selection or no searchable token: clear suggestions.
    Inactive,
    /// Mention limit reached: clear suggestions, report limited.
    Limited,
    /// Search for `search_string` after the debounce; `range` is the text to
    /// replace when a suggestion is picked.
    Query { search_string: String, range: Range },
}

/// Decide what `input` asks for, without side effects.
pub fn plan(parser: &MentionParser, mention_limit: usize, input: &MentionInput) -> SearchPlan {
    if !input.selection.is_collapsed() {
        return SearchPlan::Inactive;
    }
    let cursor = input.selection.start.min(input.text.chars().count());
    let token = parser.find_search_string(&input.text, cursor);
    if !token.is_searchable() {
        return SearchPlan::Inactive;
    }
    if input.mentioned_count >= mention_limit {
        return SearchPlan::Limited;
    }
    let range = parser.search_string_range(cursor, &token.search_string);
    SearchPlan::Query {
        search_string: token.search_string,
        range,
    }
}

// ============================================================================
// Fetching
// ============================================================================

struct FetchRequest {
    generation: u64,
    channel: Channel,
    search_string: String,
    viewer_id: Option<String>,
    limit: usize,
    directory: Arc<dyn MemberDirectory>,
}

impl FetchRequest {
    async fn fetch(&self) -> Result<Vec<Member>, SdkError> {
        let not_viewer = |m: &Member| self.viewer_id.as_deref() != Some(m.user_id.as_str());

        if self.channel.is_super {
            // One extra so the UI can tell there are more than N matches.
            let found = self
                .directory
                .query_by_prefix(&self.channel.url, &self.search_string, self.limit + 1)
                .await?;
            return Ok(found.into_iter().filter(not_viewer).collect());
        }

        let prefix = self.search_string.to_lowercase();
        let mut members: Vec<Member> = self
            .channel
            .members
            .iter()
            .filter(|m| not_viewer(*m) && m.nickname.to_lowercase().starts_with(&prefix))
            .cloned()
            .collect();
        members.sort_by(|a, b| {
            a.nickname
                .to_lowercase()
                .cmp(&b.nickname.to_lowercase())
                .then_with(|| a.nickname.cmp(&b.nickname))
        });
        members.truncate(self.limit);
        Ok(members)
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&'static str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

// ============================================================================
// Engine
// ============================================================================

#[derive(Default)]
struct SearchState {
    generation: u64,
    range: Range,
    limited: bool,
    timer: Option<JoinHandle<()>>,
    disposed: bool,
}

impl SearchState {
    /// Invalidate every pending timer and fetch. Returns the new generation.
    fn supersede(&mut self) -> u64 {
        self.generation += 1;
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        self.generation
    }
}

struct Shared {
    state: Mutex<SearchState>,
    members_tx: watch::Sender<Arc<[Member]>>,
}

impl Shared {
    fn publish(&self, members: Vec<Member>) {
        self.members_tx.send_replace(members.into());
    }

    fn publish_if_current(&self, generation: u64, members: Vec<Member>) {
        let state = self.state.lock();
        if state.disposed || state.generation != generation {
            tracing::debug!(
                generation,
                current = state.generation,
                "Discarding superseded suggestion result"
            );
            return;
        }
        self.publish(members);
    }
}

async fn run_fetch(shared: Arc<Shared>, request: FetchRequest) {
    let generation = request.generation;
    let members = match AssertUnwindSafe(request.fetch()).catch_unwind().await {
        Ok(Ok(members)) => members,
        Ok(Err(e)) => {
            tracing::warn!(
                channel_url = %request.channel.url,
                search = %request.search_string,
                error = %e,
                "Member search failed"
            );
            Vec::new()
        }
        Err(panic) => {
            tracing::error!(task = "mention_search", error = %panic_message(panic.as_ref()), "Background task panicked");
            Vec::new()
        }
    };
    shared.publish_if_current(generation, members);
}

/// Debounced member suggestions for the mention being typed.
///
/// Feed it every text or selection change with [`update`](Self::update).
/// Suggestions appear on [`subscribe`](Self::subscribe) after the debounce;
/// only the latest input's outcome is ever published, whether it succeeded,
/// failed, or came back empty.
pub struct MentionSuggestion {
    config: MentionConfig,
    parser: MentionParser,
    directory: Arc<dyn MemberDirectory>,
    viewer_id: Option<String>,
    shared: Arc<Shared>,
    runtime: Handle,
}

impl MentionSuggestion {
    pub fn new(
        config: MentionConfig,
        directory: Arc<dyn MemberDirectory>,
        viewer_id: Option<String>,
    ) -> Result<Self, MentionError> {
        let runtime = Handle::try_current().map_err(|_| MentionError::NoRuntime)?;
        let (members_tx, _) = watch::channel(Arc::<[Member]>::from(Vec::new()));
        Ok(Self {
            parser: MentionParser::new(&config),
            config,
            directory,
            viewer_id,
            shared: Arc::new(Shared {
                state: Mutex::new(SearchState::default()),
                members_tx,
            }),
            runtime,
        })
    }

    pub fn config(&self) -> &MentionConfig {
        &self.config
    }

    /// React to new composer input for `channel`.
    ///
    /// Any pending debounce timer is cancelled and any fetch in flight is
    /// superseded. Inactive and limited inputs clear the suggestions at once.
    pub fn update(&self, channel: &Channel, input: &MentionInput) -> SearchPlan {
        let plan = plan(&self.parser, self.config.mention_limit, input);

        let mut state = self.shared.state.lock();
        if state.disposed {
            return plan;
        }
        let generation = state.supersede();
        state.limited = plan == SearchPlan::Limited;
        state.range = Range::default();

        match &plan {
            SearchPlan::Inactive | SearchPlan::Limited => {
                self.shared.publish(Vec::new());
            }
            SearchPlan::Query {
                search_string,
                range,
            } => {
                state.range = *range;
                let request = FetchRequest {
                    generation,
                    channel: channel.clone(),
                    search_string: search_string.clone(),
                    viewer_id: self.viewer_id.clone(),
                    limit: self.config.suggestion_limit,
                    directory: Arc::clone(&self.directory),
                };
                tracing::debug!(generation, search = %search_string, "Mention search scheduled");
                state.timer = Some(self.arm_timer(request));
            }
        }
        plan
    }

    fn arm_timer(&self, request: FetchRequest) -> JoinHandle<()> {
        let shared = Arc::clone(&self.shared);
        let debounce = self.config.debounce;
        let runtime = self.runtime.clone();
        self.runtime.spawn(async move {
            if !debounce.is_zero() {
                tokio::time::sleep(debounce).await;
            }
            // Detached: aborting a later timer must not cancel this fetch.
            runtime.spawn(run_fetch(shared, request));
        })
    }

    /// Current suggestions.
    pub fn members(&self) -> Arc<[Member]> {
        self.shared.members_tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<[Member]>> {
        self.shared.members_tx.subscribe()
    }

    /// Span of the mention being typed, as of the latest input.
    pub fn search_string_range(&self) -> Range {
        self.shared.state.lock().range
    }

    /// Whether the latest input hit the mention limit.
    pub fn search_limited(&self) -> bool {
        self.shared.state.lock().limited
    }

    /// Clear suggestions (after one is picked) and drop pending work.
    pub fn reset(&self) {
        let mut state = self.shared.state.lock();
        state.supersede();
        self.shared.publish(Vec::new());
    }

    /// Cancel the timer and ignore every later result. Idempotent.
    pub fn dispose(&self) {
        let mut state = self.shared.state.lock();
        if state.disposed {
            return;
        }
        state.supersede();
        state.disposed = true;
    }
}

impl Drop for MentionSuggestion {
    fn drop(&mut self) {
        self.dispose();
    }
}
