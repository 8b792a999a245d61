//! Topic canonicalization and pattern matching
//!
//! Routes are declared as topic patterns over `/`-separated segments.
//! Besides literal segments, a pattern may contain `+` (single-level
//! wildcard), `#` (multi-level wildcard, final segment only) and `:name`
//! (single-level wildcard whose matched segment is captured into the
//! parameter map under `name`).

use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// Path parameters extracted from a matched topic
pub type TopicParams = HashMap<String, String>;

/// Normalize a topic: collapse duplicate separators, strip leading and
/// trailing ones.
pub fn canonicalize_topic(topic: &str) -> String {
    let mut result = topic.to_string();

    while result.contains("//") {
        result = result.replace("//", "/");
    }

    result.trim_matches('/').to_string()
}

/// One segment of a parsed topic pattern
#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    /// `+` - matches exactly one level, not captured
    SingleLevel,
    /// `:name` - matches exactly one level, captured under `name`
    Param(String),
    /// `#` - matches zero or more trailing levels
    MultiLevel,
}

/// Pattern parsing errors
#[derive(Debug, Error, PartialEq)]
pub enum PatternError {
    #[error("Topic pattern cannot be empty")]
    Empty,
    #[error("Multi-level wildcard '#' must be the final segment")]
    MultiLevelNotLast,
    #[error("Named parameter segment is missing a name")]
    EmptyParamName,
    #[error("Invalid segment '{0}': wildcards cannot be embedded in a literal")]
    InvalidSegment(String),
}

/// A parsed, immutable topic pattern
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicPattern {
    raw: String,
    segments: Vec<Segment>,
}

impl TopicPattern {
    /// Parse a pattern string. The input is canonicalized first, so
    /// `realtime/:channel/` and `realtime/:channel` are the same pattern.
    pub fn parse(pattern: &str) -> Result<Self, PatternError> {
        let raw = canonicalize_topic(pattern);
        if raw.is_empty() {
            return Err(PatternError::Empty);
        }

        let mut segments = Vec::new();
        let parts: Vec<&str> = raw.split('/').collect();
        let last = parts.len() - 1;

        for (i, part) in parts.iter().enumerate() {
            let segment = match *part {
                "+" => Segment::SingleLevel,
                "#" => {
                    if i != last {
                        return Err(PatternError::MultiLevelNotLast);
                    }
                    Segment::MultiLevel
                }
                s if s.starts_with(':') => {
                    let name = &s[1..];
                    if name.is_empty() {
                        return Err(PatternError::EmptyParamName);
                    }
                    Segment::Param(name.to_string())
                }
                s => {
                    if s.contains('+') || s.contains('#') {
                        return Err(PatternError::InvalidSegment(s.to_string()));
                    }
                    Segment::Literal(s.to_string())
                }
            };
            segments.push(segment);
        }

        Ok(Self { raw, segments })
    }

    /// Match a concrete topic against this pattern.
    ///
    /// Returns the captured parameter map on a match, `None` otherwise.
    pub fn matches(&self, topic: &str) -> Option<TopicParams> {
        let topic = canonicalize_topic(topic);
        let levels: Vec<&str> = if topic.is_empty() {
            Vec::new()
        } else {
            topic.split('/').collect()
        };

        let mut params = TopicParams::new();
        let mut level_idx = 0;

        for segment in &self.segments {
            match segment {
                Segment::MultiLevel => {
                    // `#` consumes the remainder, including zero levels
                    return Some(params);
                }
                Segment::Literal(lit) => {
                    if levels.get(level_idx) != Some(&lit.as_str()) {
                        return None;
                    }
                }
                Segment::SingleLevel => {
                    levels.get(level_idx)?;
                }
                Segment::Param(name) => {
                    let value = levels.get(level_idx)?;
                    params.insert(name.clone(), (*value).to_string());
                }
            }
            level_idx += 1;
        }

        if level_idx == levels.len() {
            Some(params)
        } else {
            None
        }
    }

    /// Render the broker-side subscription filter for this pattern.
    ///
    /// Named parameters subscribe as `+`; the capture happens locally.
    pub fn as_filter(&self) -> String {
        self.segments
            .iter()
            .map(|segment| match segment {
                Segment::Literal(lit) => lit.as_str(),
                Segment::SingleLevel | Segment::Param(_) => "+",
                Segment::MultiLevel => "#",
            })
            .collect::<Vec<_>>()
            .join("/")
    }
}

impl fmt::Display for TopicPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}
