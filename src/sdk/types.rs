use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

// ============================================================================
// Entity Trait
// ============================================================================

/// A record the entity store can hold.
///
/// The key is immutable for the lifetime of the entity: every snapshot of the
/// same channel (or member) reports the same key, so the store can replace
/// snapshots atomically per key.
pub trait Entity: Clone {
    fn key(&self) -> &str;
}

// ============================================================================
// Channel
// ============================================================================

/// Channel flavour reported by the chat SDK.
///
/// Group channels are the only kind a `GroupChannelList` keeps; open channels
/// can still arrive through shared sources (bus, dispatcher) and are dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    #[default]
    Group,
    Open,
}

/// Membership state of a user inside a group channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberState {
    #[default]
    Joined,
    Invited,
}

/// A user as seen by lifecycle callbacks (joined/left).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub user_id: String,
    #[serde(default)]
    pub nickname: String,
}

/// A channel member, used both for roster updates and mention suggestions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub user_id: String,
    #[serde(default)]
    pub nickname: String,
    #[serde(default)]
    pub state: MemberState,
}

impl Member {
    pub fn new(user_id: impl Into<String>, nickname: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            nickname: nickname.into(),
            state: MemberState::Joined,
        }
    }
}

impl Entity for Member {
    fn key(&self) -> &str {
        &self.user_id
    }
}

/// Snapshot of a channel as delivered by any update source.
///
/// The `url` is the channel's identity. Everything else may change between
/// snapshots and is replaced wholesale when a newer snapshot is merged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub url: String,
    #[serde(default)]
    pub kind: ChannelKind,
    #[serde(default)]
    pub name: String,
    /// Large-scale ("super") group channel: the full roster is not available
    /// locally and member lookups go through the remote directory.
    #[serde(default)]
    pub is_super: bool,
    #[serde(default)]
    pub is_frozen: bool,
    #[serde(default)]
    pub member_count: u32,
    #[serde(default)]
    pub members: Vec<Member>,
    #[serde(default)]
    pub unread_message_count: u32,
    #[serde(default)]
    pub unread_mention_count: u32,
    #[serde(default)]
    pub last_message_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl Channel {
    /// Minimal group channel with the given url and name.
    pub fn group(url: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            kind: ChannelKind::Group,
            name: name.into(),
            is_super: false,
            is_frozen: false,
            member_count: 0,
            members: Vec::new(),
            unread_message_count: 0,
            unread_mention_count: 0,
            last_message_at: None,
            created_at: None,
        }
    }

    pub fn is_group(&self) -> bool {
        self.kind == ChannelKind::Group
    }

    /// Time of the latest activity: last message, or creation if the channel
    /// never had one.
    pub fn last_activity(&self) -> Option<DateTime<Utc>> {
        self.last_message_at.or(self.created_at)
    }
}

impl Entity for Channel {
    fn key(&self) -> &str {
        &self.url
    }
}

/// Most recently active channels first; channels without any activity last.
///
/// Ties fall back to `Ordering::Equal` so a stable sort keeps store order.
pub fn by_latest_activity(a: &Channel, b: &Channel) -> Ordering {
    match (a.last_activity(), b.last_activity()) {
        (Some(x), Some(y)) => y.cmp(&x),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(url: &str, secs: Option<i64>) -> Channel {
        let mut channel = Channel::group(url, url);
        channel.last_message_at = secs.map(|s| Utc.timestamp_opt(s, 0).unwrap());
        channel
    }

    #[test]
    fn test_latest_activity_orders_newest_first() {
        let mut channels = vec![at("a", Some(10)), at("b", Some(30)), at("c", Some(20))];
        channels.sort_by(by_latest_activity);
        let urls: Vec<&str> = channels.iter().map(|c| c.url.as_str()).collect();
        assert_eq!(urls, vec!["b", "c", "a"]);
    }

    #[test]
    fn test_channels_without_activity_sort_last_and_stay_stable() {
        let mut channels = vec![at("x", None), at("a", Some(5)), at("y", None)];
        channels.sort_by(by_latest_activity);
        let urls: Vec<&str> = channels.iter().map(|c| c.url.as_str()).collect();
        assert_eq!(urls, vec!["a", "x", "y"]);
    }

    #[test]
    fn test_created_at_used_when_no_message() {
        let mut fresh = at("fresh", None);
        fresh.created_at = Some(Utc.timestamp_opt(100, 0).unwrap());
        assert_eq!(by_latest_activity(&fresh, &at("old", Some(50))), Ordering::Less);
    }

    #[test]
    fn test_channel_deserializes_with_defaults() {
        let channel: Channel = serde_json::from_str(r#"{"url":"c1"}"#).unwrap();
        assert_eq!(channel.url, "c1");
        assert!(channel.is_group());
        assert!(channel.members.is_empty());
        assert_eq!(channel.key(), "c1");
    }
}
