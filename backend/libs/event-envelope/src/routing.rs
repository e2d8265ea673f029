//! Segment-wise subject matching.
//!
//! Subjects are dot-separated (`demo.robot.123`). A pattern segment is either
//! a literal, `*` (exactly one segment) or a trailing `>` (one or more
//! remaining segments). Literal comparison ignores ASCII case.

use std::fmt;
use std::str::FromStr;

use crate::error::{EnvelopeError, EnvelopeResult};

const SEPARATOR: char = '.';

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Any,
    Tail,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectPattern {
    raw: String,
    segments: Vec<Segment>,
}

impl SubjectPattern {
    pub fn parse(pattern: &str) -> EnvelopeResult<Self> {
        let invalid = |reason: &str| EnvelopeError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: reason.to_string(),
        };

        if pattern.trim().is_empty() {
            return Err(invalid("pattern is empty"));
        }

        let parts: Vec<&str> = pattern.split(SEPARATOR).collect();
        let last = parts.len() - 1;
        let mut segments = Vec::with_capacity(parts.len());

        for (idx, part) in parts.iter().enumerate() {
            let segment = match *part {
                "" => return Err(invalid("empty segment")),
                "*" => Segment::Any,
                ">" if idx == last => Segment::Tail,
                ">" => return Err(invalid("`>` is only allowed as the last segment")),
                literal => Segment::Literal(literal.to_string()),
            };
            segments.push(segment);
        }

        Ok(Self {
            raw: pattern.to_string(),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn matches(&self, subject: &str) -> bool {
        let mut parts = subject.split(SEPARATOR);

        for segment in &self.segments {
            match segment {
                Segment::Tail => return parts.next().is_some_and(|p| !p.is_empty()),
                Segment::Any => match parts.next() {
                    Some(part) if !part.is_empty() => {}
                    _ => return false,
                },
                Segment::Literal(literal) => match parts.next() {
                    Some(part) if part.eq_ignore_ascii_case(literal) => {}
                    _ => return false,
                },
            }
        }

        parts.next().is_none()
    }
}

impl FromStr for SubjectPattern {
    type Err = EnvelopeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for SubjectPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pattern(s: &str) -> SubjectPattern {
        SubjectPattern::parse(s).unwrap()
    }

    #[test]
    fn test_single_segment_wildcard() {
        let p = pattern("demo.robot.*");
        assert!(p.matches("demo.robot.123"));
        assert!(p.matches("DEMO.Robot.abc"));
        assert!(!p.matches("demo.robot"));
        assert!(!p.matches("demo.robot.123.battery"));
        assert!(!p.matches("demo.person.123"));
        assert!(!p.matches("demo.robot."));
    }

    #[test]
    fn test_literal_pattern() {
        let p = pattern("demo.person.42");
        assert!(p.matches("demo.person.42"));
        assert!(!p.matches("demo.person.43"));
    }

    #[test]
    fn test_tail_wildcard() {
        let p = pattern("demo.>");
        assert!(p.matches("demo.robot"));
        assert!(p.matches("demo.robot.123.battery"));
        assert!(!p.matches("demo"));
        assert!(!p.matches("other.robot"));
    }

    #[test]
    fn test_invalid_patterns() {
        assert!(SubjectPattern::parse("").is_err());
        assert!(SubjectPattern::parse("demo..robot").is_err());
        assert!(SubjectPattern::parse("demo.>.robot").is_err());
    }

    #[test]
    fn test_from_str_and_display() {
        let p: SubjectPattern = "demo.*.created".parse().unwrap();
        assert_eq!(p.to_string(), "demo.*.created");
    }
}
