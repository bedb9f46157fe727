//! Configuration file parser for `config.toml`.
//!
//! The config file is optional: a missing or empty file yields
//! `Config::default()`. Unknown keys are accepted by serde and logged as a
//! warning, since they are most likely typos.
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::feed::{ChannelOrder, CollectionParams, MemberStateFilter};
use crate::mention::MentionConfig;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Config file too large: {0}")]
    TooLarge(String),

    #[error("Invalid config value: {0}")]
    Invalid(String),
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// `[collection]`: how the channel collection is opened.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CollectionSection {
    /// Channels per page.
    pub page_size: usize,
    /// Include channels without messages.
    pub include_empty: bool,
    pub member_state: MemberStateFilter,
    pub order: ChannelOrder,
}

impl Default for CollectionSection {
    fn default() -> Self {
        let params = CollectionParams::default();
        Self {
            page_size: params.limit,
            include_empty: params.include_empty,
            member_state: params.member_state,
            order: params.order,
        }
    }
}

impl From<&CollectionSection> for CollectionParams {
    fn from(section: &CollectionSection) -> Self {
        Self {
            include_empty: section.include_empty,
            member_state: section.member_state,
            order: section.order,
            limit: section.page_size,
        }
    }
}

/// `[mention]`: trigger syntax, limits and debounce.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct MentionSection {
    pub trigger: String,
    pub delimiter: String,
    /// Committed mentions per message.
    pub mention_limit: usize,
    /// Suggestions shown.
    pub suggestion_limit: usize,
    pub debounce_ms: u64,
}

impl Default for MentionSection {
    fn default() -> Self {
        let config = MentionConfig::default();
        Self {
            trigger: config.trigger,
            delimiter: config.delimiter,
            mention_limit: config.mention_limit,
            suggestion_limit: config.suggestion_limit,
            debounce_ms: config.debounce.as_millis() as u64,
        }
    }
}

impl From<&MentionSection> for MentionConfig {
    fn from(section: &MentionSection) -> Self {
        Self {
            trigger: section.trigger.clone(),
            delimiter: section.delimiter.clone(),
            mention_limit: section.mention_limit,
            suggestion_limit: section.suggestion_limit,
            debounce: Duration::from_millis(section.debounce_ms),
        }
    }
}

/// Top-level configuration.
///
/// Every section and key uses `#[serde(default)]`, so any subset may be given.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub collection: CollectionSection,
    pub mention: MentionSection,
}

const KNOWN_KEYS: &[(&str, &[&str])] = &[
    (
        "collection",
        &["page_size", "include_empty", "member_state", "order"],
    ),
    (
        "mention",
        &[
            "trigger",
            "delimiter",
            "mention_limit",
            "suggestion_limit",
            "debounce_ms",
        ],
    ),
];

impl Config {
    /// Maximum config file size (1 MiB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML or wrong value types → `Err(ConfigError::Parse)`
    /// - Unknown sections or keys → accepted, logged as warning
    /// - Zero page size or empty trigger → `Err(ConfigError::Invalid)`
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        let config = Self::parse(&content)?;
        tracing::info!(
            path = %path.display(),
            page_size = config.collection.page_size,
            debounce_ms = config.mention.debounce_ms,
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Parse TOML text. Blank text yields the defaults.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        if content.trim().is_empty() {
            tracing::debug!("Config file is empty, using defaults");
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            warn_unknown_keys(&raw);
        }

        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.collection.page_size == 0 {
            return Err(ConfigError::Invalid(
                "collection.page_size must be at least 1".to_string(),
            ));
        }
        if self.mention.trigger.is_empty() {
            return Err(ConfigError::Invalid(
                "mention.trigger must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    pub fn collection_params(&self) -> CollectionParams {
        CollectionParams::from(&self.collection)
    }

    pub fn mention_config(&self) -> MentionConfig {
        MentionConfig::from(&self.mention)
    }
}

fn warn_unknown_keys(raw: &toml::Table) {
    for (section, value) in raw {
        let Some((_, keys)) = KNOWN_KEYS.iter().find(|(name, _)| *name == section.as_str()) else {
            tracing::warn!(key = %section, "Unknown section in config file, ignoring");
            continue;
        };
        let Some(table) = value.as_table() else {
            continue;
        };
        for key in table.keys() {
            if !keys.contains(&key.as_str()) {
                tracing::warn!(section = %section, key = %key, "Unknown key in config file, ignoring");
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
