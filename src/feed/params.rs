use serde::{Deserialize, Serialize};

/// Which memberships a collection includes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberStateFilter {
    #[default]
    All,
    Joined,
    Invited,
}

/// Server-side sort order of collection pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelOrder {
    #[default]
    LatestLastMessage,
    Chronological,
    ChannelNameAlphabetical,
}

/// Filter, order and page size used to open a collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectionParams {
    /// Include channels that have no messages yet.
    pub include_empty: bool,
    pub member_state: MemberStateFilter,
    pub order: ChannelOrder,
    /// Channels per page.
    pub limit: usize,
}

impl CollectionParams {
    pub const DEFAULT_PAGE_SIZE: usize = 10;
}

impl Default for CollectionParams {
    fn default() -> Self {
        Self {
            include_empty: true,
            member_state: MemberStateFilter::All,
            order: ChannelOrder::LatestLastMessage,
            limit: Self::DEFAULT_PAGE_SIZE,
        }
    }
}
