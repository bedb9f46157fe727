use std::time::Duration;

/// Mention behaviour knobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MentionConfig {
    /// Marker that starts a mention, `@` by default.
    pub trigger: String,
    /// Separator that ends a committed mention.
    pub delimiter: String,
    /// Committed mentions allowed per message. Reaching it stops suggestions.
    pub mention_limit: usize,
    /// Suggestions shown (`N`).
    pub suggestion_limit: usize,
    pub debounce: Duration,
}

impl Default for MentionConfig {
    fn default() -> Self {
        Self {
            trigger: "@".to_string(),
            delimiter: " ".to_string(),
            mention_limit: 10,
            suggestion_limit: 15,
            debounce: Duration::from_millis(300),
        }
    }
}

/// Half-open span of character (Unicode scalar) offsets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Range {
    pub start: usize,
    pub end: usize,
}

impl Range {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn caret(at: usize) -> Self {
        Self { start: at, end: at }
    }

    pub fn is_collapsed(&self) -> bool {
        self.start == self.end
    }
}

/// Result of scanning the text before the cursor for a mention in progress.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchToken {
    /// A trigger precedes the cursor at a word boundary.
    pub triggered: bool,
    /// The text after the trigger can be searched for.
    pub valid: bool,
    /// Text between the trigger and the cursor.
    pub search_string: String,
}

impl SearchToken {
    pub fn is_searchable(&self) -> bool {
        self.triggered && self.valid
    }
}

#[derive(Debug, Clone)]
pub struct MentionParser {
    trigger: String,
    delimiter: String,
}

impl MentionParser {
    pub fn new(config: &MentionConfig) -> Self {
        Self {
            trigger: config.trigger.clone(),
            delimiter: config.delimiter.clone(),
        }
    }

    pub fn trigger(&self) -> &str {
        &self.trigger
    }

    /// Find the mention being typed at `cursor` (a character offset).
    ///
    /// The last trigger before the cursor counts only at the start of the text
    /// or right after whitespace or the delimiter. The token is not searchable
    /// when it starts with the delimiter or spans a line break.
    pub fn find_search_string(&self, text: &str, cursor: usize) -> SearchToken {
        if self.trigger.is_empty() {
            return SearchToken::default();
        }
        let before = prefix_chars(text, cursor);
        let Some(at) = before.rfind(&self.trigger) else {
            return SearchToken::default();
        };

        let preceding = &before[..at];
        let triggered = preceding.is_empty()
            || preceding.chars().next_back().is_some_and(char::is_whitespace)
            || (!self.delimiter.is_empty() && preceding.ends_with(&self.delimiter));

        let search_string = &before[at + self.trigger.len()..];
        let valid = !(!self.delimiter.is_empty() && search_string.starts_with(&self.delimiter))
            && !search_string.contains(['\n', '\r']);

        SearchToken {
            triggered,
            valid,
            search_string: search_string.to_string(),
        }
    }

    /// Span covering the trigger and `search_string`, ending at `cursor`.
    pub fn search_string_range(&self, cursor: usize, search_string: &str) -> Range {
        let length = search_string.chars().count() + self.trigger.chars().count();
        Range::new(cursor.saturating_sub(length), cursor)
    }
}

/// The first `count` characters of `text` (all of it when shorter).
fn prefix_chars(text: &str, count: usize) -> &str {
    match text.char_indices().nth(count) {
        Some((byte, _)) => &text[..byte],
        None => text,
    }
}
