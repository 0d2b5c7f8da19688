//! Event stream names and the table names derived from them.
//!
//! A stream name becomes a prefix of two table names and two index names,
//! which are interpolated into SQL. [`StreamName::parse`] normalizes the
//! name to `snake_case` and only accepts `[a-z][a-z0-9_]*`, so nothing that
//! reaches a statement needs quoting.

use crate::error::StoreError;

/// Longest normalized stream name accepted.
///
/// `PostgreSQL` truncates identifiers at 63 bytes and the longest derived
/// name appends `_snapshots_aggregate_id_idx` (27 bytes).
pub const MAX_STREAM_NAME_LEN: usize = 36;

/// A validated, `snake_case` event stream name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StreamName(String);

impl StreamName {
    /// Normalize and validate `raw`.
    ///
    /// `CamelCase`, `kebab-case`, dots, and spaces are converted to
    /// `snake_case` first: `"UserProfile"` and `"user-profile"` both become
    /// `user_profile`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidStreamName`] if the normalized name is
    /// empty, too long, does not start with a letter, or contains anything
    /// other than ASCII lowercase letters, digits, and underscores.
    pub fn parse(raw: &str) -> Result<Self, StoreError> {
        let invalid = |reason| StoreError::InvalidStreamName {
            name: raw.to_owned(),
            reason,
        };

        let name = to_snake_case(raw);
        if name.is_empty() {
            return Err(invalid("name is empty"));
        }
        if name.len() > MAX_STREAM_NAME_LEN {
            return Err(invalid("name is longer than 36 characters"));
        }
        if !name.starts_with(|c: char| c.is_ascii_lowercase()) {
            return Err(invalid("name must start with a letter"));
        }
        if !name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        {
            return Err(invalid("name may only contain letters, digits, and underscores"));
        }

        Ok(Self(name))
    }

    /// The normalized name.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Name of the event log table, `<stream>_events`.
    pub fn events_table(&self) -> String {
        format!("{}_events", self.0)
    }

    /// Name of the snapshot table, `<stream>_snapshots`.
    pub fn snapshots_table(&self) -> String {
        format!("{}_snapshots", self.0)
    }
}

impl core::fmt::Display for StreamName {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Convert `raw` to `snake_case`.
///
/// Word boundaries are separators (`-`, `.`, whitespace), a lowercase letter
/// or digit followed by an uppercase one, and the last capital of an acronym
/// followed by a lowercase letter (`HTTPServer` -> `http_server`). Runs of
/// underscores collapse and leading/trailing underscores are dropped.
fn to_snake_case(raw: &str) -> String {
    let chars: Vec<char> = raw.trim().chars().collect();
    let mut out = String::with_capacity(chars.len().saturating_add(4));

    for (i, &c) in chars.iter().enumerate() {
        if c == '-' || c == '.' || c == '_' || c.is_whitespace() {
            if !out.is_empty() && !out.ends_with('_') {
                out.push('_');
            }
            continue;
        }

        if c.is_uppercase() {
            let prev = i.checked_sub(1).and_then(|p| chars.get(p)).copied();
            let next = chars.get(i.saturating_add(1)).copied();
            let after_lower = prev.is_some_and(|p| p.is_lowercase() || p.is_ascii_digit());
            let ends_acronym =
                prev.is_some_and(char::is_uppercase) && next.is_some_and(char::is_lowercase);
            if (after_lower || ends_acronym) && !out.is_empty() && !out.ends_with('_') {
                out.push('_');
            }
            out.extend(c.to_lowercase());
        } else {
            out.push(c);
        }
    }

    while out.ends_with('_') {
        out.pop();
    }
    out
}
