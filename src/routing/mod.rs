//! The `routing` module matches published routing keys against subscribed
//! topic patterns.
//!
//! `RoutingKeyMatcher` holds the set of patterns a subscriber is bound with
//! and answers whether a key is covered by any of them. It has no state
//! beyond that set and never mutates it while matching.

pub mod pattern;

pub use pattern::{Segment, TopicPattern, matches};

use crate::utils::error::PatternError;

#[derive(Debug, Clone, Default)]
pub struct RoutingKeyMatcher {
    patterns: Vec<TopicPattern>,
}

impl RoutingKeyMatcher {
    pub fn new(patterns: Vec<TopicPattern>) -> Self {
        Self { patterns }
    }

    /// Builds a matcher from binding keys such as `user.*.*`.
    pub fn from_keys<'a, I>(keys: I) -> Result<Self, PatternError>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let patterns = keys
            .into_iter()
            .map(TopicPattern::parse)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { patterns })
    }

    pub fn add(&mut self, pattern: TopicPattern) {
        if !self.patterns.contains(&pattern) {
            self.patterns.push(pattern);
        }
    }

    pub fn patterns(&self) -> &[TopicPattern] {
        &self.patterns
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn matches_any(&self, key: &str) -> bool {
        self.patterns.iter().any(|p| p.matches(key))
    }

    /// First pattern that covers `key`, in insertion order.
    pub fn first_match(&self, key: &str) -> Option<&TopicPattern> {
        self.patterns.iter().find(|p| p.matches(key))
    }
}
