//! Topic patterns
//!
//! A `TopicPattern` is the parsed form of a binding key such as
//! `notification.*.email` or `analytics.#`. Segments are separated by `.`;
//! `*` matches exactly one segment and `#` matches zero or more.
//!
//! Matching walks pattern and key in lockstep. When it meets `#` it tries the
//! smallest consumption first and extends one segment at a time, so a `#`
//! followed by more segments backtracks until the rest of the pattern fits or
//! the key runs out. Each `(pattern position, key position)` pair is solved
//! once, so the cost stays proportional to pattern length times key length.

use std::fmt;
use std::str::FromStr;

use crate::utils::error::PatternError;

pub const SEPARATOR: char = '.';
pub const SINGLE_WILDCARD: &str = "*";
pub const MULTI_WILDCARD: &str = "#";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Segment {
    Literal(String),
    /// `*`
    Single,
    /// `#`
    Multi,
}

impl Segment {
    pub fn literal(value: impl Into<String>) -> Self {
        Segment::Literal(value.into())
    }

    fn parse(raw: &str) -> Result<Self, PatternError> {
        match raw {
            SINGLE_WILDCARD => Ok(Segment::Single),
            MULTI_WILDCARD => Ok(Segment::Multi),
            other if other.contains(['*', '#']) => {
                Err(PatternError::MixedWildcard(other.to_string()))
            }
            other => Ok(Segment::Literal(other.to_string())),
        }
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Segment::Literal(value) => f.write_str(value),
            Segment::Single => f.write_str(SINGLE_WILDCARD),
            Segment::Multi => f.write_str(MULTI_WILDCARD),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TopicPattern {
    segments: Vec<Segment>,
}

impl TopicPattern {
    pub fn new(segments: Vec<Segment>) -> Self {
        Self { segments }
    }

    /// Parses a dot-separated binding key. The empty string yields a
    /// pattern without segments.
    pub fn parse(raw: &str) -> Result<Self, PatternError> {
        let segments = split_key(raw)
            .into_iter()
            .map(Segment::parse)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { segments })
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn is_literal(&self) -> bool {
        self.segments
            .iter()
            .all(|s| matches!(s, Segment::Literal(_)))
    }

    pub fn matches(&self, key: &str) -> bool {
        match_segments(&self.segments, &split_key(key))
    }
}

impl FromStr for TopicPattern {
    type Err = PatternError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for TopicPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.segments.iter().enumerate() {
            if i > 0 {
                write!(f, "{SEPARATOR}")?;
            }
            write!(f, "{segment}")?;
        }
        Ok(())
    }
}

/// Splits a routing key into segments. The empty key has no segments.
pub(crate) fn split_key(key: &str) -> Vec<&str> {
    if key.is_empty() {
        Vec::new()
    } else {
        key.split(SEPARATOR).collect()
    }
}

fn match_segments(pattern: &[Segment], key: &[&str]) -> bool {
    // Adjacent `#` segments match the same keys as a single one.
    let mut collapsed: Vec<&Segment> = Vec::with_capacity(pattern.len());
    for segment in pattern {
        let repeated_multi =
            matches!(segment, Segment::Multi) && matches!(collapsed.last(), Some(Segment::Multi));
        if !repeated_multi {
            collapsed.push(segment);
        }
    }
    let mut memo = Memo::new(collapsed.len(), key.len());
    match_from(&collapsed, key, 0, 0, &mut memo)
}

/// Results for `(pattern index, key index)` pairs already visited, so each
/// pair is solved once.
struct Memo {
    width: usize,
    cells: Vec<Option<bool>>,
}

impl Memo {
    fn new(pattern_len: usize, key_len: usize) -> Self {
        let width = key_len + 1;
        Self {
            width,
            cells: vec![None; (pattern_len + 1) * width],
        }
    }

    fn get(&self, p: usize, k: usize) -> Option<bool> {
        self.cells[p * self.width + k]
    }

    fn set(&mut self, p: usize, k: usize, matched: bool) -> bool {
        self.cells[p * self.width + k] = Some(matched);
        matched
    }
}

fn match_from(pattern: &[&Segment], key: &[&str], p: usize, k: usize, memo: &mut Memo) -> bool {
    if let Some(known) = memo.get(p, k) {
        return known;
    }
    let matched = match pattern.get(p) {
        None => k == key.len(),
        // Smallest consumption first, then one more segment at a time.
        Some(Segment::Multi) => {
            (k..=key.len()).any(|next| match_from(pattern, key, p + 1, next, memo))
        }
        Some(Segment::Single) => k < key.len() && match_from(pattern, key, p + 1, k + 1, memo),
        Some(Segment::Literal(literal)) => {
            key.get(k) == Some(&literal.as_str()) && match_from(pattern, key, p + 1, k + 1, memo)
        }
    };
    memo.set(p, k, matched)
}

/// Pure check of one pattern against one routing key.
pub fn matches(pattern: &TopicPattern, key: &str) -> bool {
    pattern.matches(key)
}
