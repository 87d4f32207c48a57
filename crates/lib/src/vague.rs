//! Vague matching: accept free-text answers to a posed question.
//!
//! A [`VagueMatcher`] decides whether a piece of text matches, either by plain equality or by a
//! regular expression anchored at the start of the text or found anywhere inside it. The matcher
//! remembers what it matched last so a [`VagueContainer`] can hand the literal text to a handler
//! together with the container's definitive value.

use crate::error::{Error, Result};
use regex::{Regex, RegexBuilder};

/// The part of a candidate text a matcher accepted, with its byte span.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VagueMatch {
    pub text: String,
    pub start: usize,
    pub end: usize,
}

impl VagueMatch {
    fn from_regex(m: regex::Match<'_>) -> Self {
        Self {
            text: m.as_str().to_string(),
            start: m.start(),
            end: m.end(),
        }
    }
}

#[derive(Debug, Clone)]
enum Kind {
    Exact(String),
    Anchored(Regex),
    Contains(Regex),
}

/// One way of recognising an answer.
///
/// Queries reach matchers already trimmed and lower-cased by the dispatcher, so exact strings should
/// be written in lower case and patterns should either be lower case or built case-insensitive.
#[derive(Debug, Clone)]
pub struct VagueMatcher {
    kind: Kind,
    last_match: Option<VagueMatch>,
}

impl VagueMatcher {
    /// Plain equality. Not really vague, but shares the calling convention.
    pub fn exact(text: impl Into<String>) -> Self {
        Self {
            kind: Kind::Exact(text.into()),
            last_match: None,
        }
    }

    /// Regex that must match at position 0. Case-sensitive.
    pub fn regex(pattern: &str) -> Result<Self> {
        Self::regex_with(pattern, false)
    }

    pub fn regex_with(pattern: &str, case_insensitive: bool) -> Result<Self> {
        Ok(Self {
            kind: Kind::Anchored(compile(pattern, case_insensitive)?),
            last_match: None,
        })
    }

    /// Regex that may match anywhere in the text. Case-sensitive.
    pub fn contains(pattern: &str) -> Result<Self> {
        Self::contains_with(pattern, false)
    }

    pub fn contains_with(pattern: &str, case_insensitive: bool) -> Result<Self> {
        Ok(Self {
            kind: Kind::Contains(compile(pattern, case_insensitive)?),
            last_match: None,
        })
    }

    /// Evaluate against `text`. On success the match is stored and returned.
    ///
    /// A failed evaluation leaves the previous `last_match` untouched.
    pub fn find(&mut self, text: &str) -> Option<&VagueMatch> {
        let found = match &self.kind {
            Kind::Exact(s) => (s == text).then(|| VagueMatch {
                text: s.clone(),
                start: 0,
                end: s.len(),
            }),
            // Leftmost-first: if any match starts at 0, the leftmost one does.
            Kind::Anchored(re) => re
                .find(text)
                .filter(|m| m.start() == 0)
                .map(VagueMatch::from_regex),
            Kind::Contains(re) => re.find(text).map(VagueMatch::from_regex),
        };
        match found {
            Some(m) => {
                self.last_match = Some(m);
                self.last_match.as_ref()
            }
            None => None,
        }
    }

    pub fn is_match(&mut self, text: &str) -> bool {
        self.find(text).is_some()
    }

    pub fn last_match(&self) -> Option<&VagueMatch> {
        self.last_match.as_ref()
    }

    /// The literal text or pattern source this matcher was built from.
    pub fn canonical(&self) -> &str {
        match &self.kind {
            Kind::Exact(s) => s,
            Kind::Anchored(re) | Kind::Contains(re) => re.as_str(),
        }
    }
}

fn compile(pattern: &str, case_insensitive: bool) -> Result<Regex> {
    RegexBuilder::new(pattern)
        .case_insensitive(case_insensitive)
        .build()
        .map_err(Error::from)
}

/// A definitive value plus the matchers that recognise it.
///
/// Invariant: `definitive` is always set and `vagues` is never empty.
#[derive(Debug, Clone)]
pub struct VagueContainer {
    definitive: String,
    vagues: Vec<VagueMatcher>,
}

impl VagueContainer {
    /// Pair a definitive value with its matchers. With no matchers, the definitive value itself is
    /// used as an exact matcher.
    pub fn new(definitive: impl Into<String>, vagues: Vec<VagueMatcher>) -> Self {
        let definitive = definitive.into();
        let vagues = if vagues.is_empty() {
            vec![VagueMatcher::exact(definitive.clone())]
        } else {
            vagues
        };
        Self { definitive, vagues }
    }

    /// Build from matchers alone; the first matcher's canonical form becomes the definitive value.
    pub fn from_matchers(vagues: Vec<VagueMatcher>) -> Result<Self> {
        let definitive = vagues
            .first()
            .map(|m| m.canonical().to_string())
            .ok_or(Error::EmptyMatchers)?;
        Ok(Self { definitive, vagues })
    }

    /// Shorthand for a container of exact alternatives, e.g. `["yes", "y", "yep"]`.
    pub fn one_of<I, S>(words: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::from_matchers(words.into_iter().map(VagueMatcher::exact).collect())
    }

    pub fn definitive(&self) -> &str {
        &self.definitive
    }

    pub fn vagues(&self) -> &[VagueMatcher] {
        &self.vagues
    }

    /// First matcher (in order) that accepts `query` wins; returns what it matched.
    pub fn find(&mut self, query: &str) -> Option<VagueMatch> {
        self.vagues
            .iter_mut()
            .find_map(|v| v.find(query).cloned())
    }
}
