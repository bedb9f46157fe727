//! Mention suggestions for the message composer.
//!
//! [`MentionParser`] finds the `@token` being typed at the cursor.
//! [`MentionSuggestion`] turns composer input into debounced member lookups,
//! local for regular channels and remote for super channels, publishing only
//! the latest input's outcome.

mod parser;
mod suggestion;

pub use parser::{MentionConfig, MentionParser, Range, SearchToken};
pub use suggestion::{plan, MentionError, MentionInput, MentionSuggestion, SearchPlan};
