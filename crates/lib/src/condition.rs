//! Matching conditions for global handler registrations.
//!
//! A [`Condition`] is a conjunction of predicates over the normalized message. Conditions registered
//! separately under the same handler are alternatives (OR); [`Condition::all`] narrows (AND).

use crate::error::Result;
use crate::message::Message;
use regex::RegexBuilder;
use std::fmt;
use std::sync::Arc;

pub type Predicate = Arc<dyn Fn(&Message) -> bool + Send + Sync>;

#[derive(Clone)]
pub struct Condition {
    predicates: Vec<Predicate>,
    description: String,
}

impl Condition {
    fn single(description: String, predicate: Predicate) -> Self {
        Self {
            predicates: vec![predicate],
            description,
        }
    }

    /// Normalized text equals `text` (trimmed, case-insensitive).
    pub fn text_like(text: &str) -> Self {
        let want = text.trim().to_lowercase();
        Self::single(
            format!("textLike({:?})", want),
            Arc::new(move |m: &Message| m.text_lower() == want),
        )
    }

    /// Normalized text starts with `text` (trimmed, case-insensitive).
    pub fn text_starts_with(text: &str) -> Self {
        let want = text.trim().to_lowercase();
        Self::single(
            format!("textStartsWith({:?})", want),
            Arc::new(move |m: &Message| m.text_lower().starts_with(&want)),
        )
    }

    /// Regex matching at the start of the trimmed (not lower-cased) text.
    pub fn text_regex_match(pattern: &str) -> Result<Self> {
        Self::text_regex_match_with(pattern, false)
    }

    pub fn text_regex_match_with(pattern: &str, case_insensitive: bool) -> Result<Self> {
        let re = RegexBuilder::new(pattern)
            .case_insensitive(case_insensitive)
            .build()?;
        Ok(Self::single(
            format!("textRegexMatch({:?})", pattern),
            Arc::new(move |m: &Message| re.find(m.text_nice()).is_some_and(|f| f.start() == 0)),
        ))
    }

    pub fn user_id_equals(user_id: impl Into<String>) -> Self {
        let want = user_id.into();
        Self::single(
            format!("userIdEquals({:?})", want),
            Arc::new(move |m: &Message| m.user_id == want),
        )
    }

    /// Arbitrary predicate.
    pub fn custom<F>(description: impl Into<String>, f: F) -> Self
    where
        F: Fn(&Message) -> bool + Send + Sync + 'static,
    {
        Self::single(description.into(), Arc::new(f))
    }

    /// Every predicate of every condition must hold. An empty list matches everything.
    pub fn all(conditions: impl IntoIterator<Item = Condition>) -> Self {
        let mut predicates = Vec::new();
        let mut parts = Vec::new();
        for c in conditions {
            predicates.extend(c.predicates);
            parts.push(c.description);
        }
        Self {
            predicates,
            description: format!("all({})", parts.join(", ")),
        }
    }

    pub fn and(self, other: Condition) -> Self {
        Self::all([self, other])
    }

    pub fn matches(&self, message: &Message) -> bool {
        self.predicates.iter().all(|p| p(message))
    }

    pub fn description(&self) -> &str {
        &self.description
    }
}

impl fmt::Debug for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.description)
    }
}
