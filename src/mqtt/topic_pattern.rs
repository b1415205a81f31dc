//! Segment matcher for MQTT topic filters.
//!
//! A pattern is split on `/` once, when it is subscribed. `+` accepts exactly
//! one segment, a trailing `#` accepts the rest of the topic including
//! nothing at all.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    SingleLevel,
    MultiLevel,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicPattern {
    source: String,
    segments: Vec<Segment>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PatternError {
    #[error("Topic pattern is empty")]
    Empty,

    #[error("'#' must be the last segment of '{0}'")]
    MultiLevelNotLast(String),

    #[error("Wildcard mixed into segment '{segment}' of '{pattern}'")]
    MixedWildcard { pattern: String, segment: String },
}

impl TopicPattern {
    pub fn compile(pattern: &str) -> Result<Self, PatternError> {
        if pattern.is_empty() {
            return Err(PatternError::Empty);
        }

        let parts: Vec<&str> = pattern.split('/').collect();
        let last = parts.len() - 1;
        let mut segments = Vec::with_capacity(parts.len());

        for (index, part) in parts.iter().enumerate() {
            let segment = match *part {
                "+" => Segment::SingleLevel,
                "#" if index == last => Segment::MultiLevel,
                "#" => return Err(PatternError::MultiLevelNotLast(pattern.to_string())),
                literal if literal.contains(['+', '#']) => {
                    return Err(PatternError::MixedWildcard {
                        pattern: pattern.to_string(),
                        segment: literal.to_string(),
                    })
                }
                literal => Segment::Literal(literal.to_string()),
            };
            segments.push(segment);
        }

        Ok(Self {
            source: pattern.to_string(),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn matches(&self, topic: &str) -> bool {
        let mut levels = topic.split('/');

        for segment in &self.segments {
            match segment {
                Segment::MultiLevel => return true,
                Segment::SingleLevel => {
                    if levels.next().is_none() {
                        return false;
                    }
                }
                Segment::Literal(expected) => match levels.next() {
                    Some(level) if level == expected => {}
                    _ => return false,
                },
            }
        }

        levels.next().is_none()
    }
}

impl fmt::Display for TopicPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_and_wildcards() {
        let all_inputs = TopicPattern::compile("inputs/#").unwrap();
        assert!(all_inputs.matches("inputs/button1/isPressed"));
        assert!(all_inputs.matches("inputs"));
        assert!(all_inputs.matches("inputs/"));
        assert!(!all_inputs.matches("outputs/led"));

        let pressed = TopicPattern::compile("inputs/+/isPressed").unwrap();
        assert!(pressed.matches("inputs/button0/isPressed"));
        assert!(pressed.matches("inputs//isPressed"));
        assert!(!pressed.matches("inputs/button0/lastChangedAt"));
        assert!(!pressed.matches("inputs/a/b/isPressed"));

        let exact = TopicPattern::compile("inputs/button0").unwrap();
        assert!(exact.matches("inputs/button0"));
        assert!(!exact.matches("inputs/button0/isPressed"));
    }

    #[test]
    fn invalid_patterns_are_rejected() {
        assert_eq!(TopicPattern::compile(""), Err(PatternError::Empty));
        assert!(matches!(
            TopicPattern::compile("inputs/#/x"),
            Err(PatternError::MultiLevelNotLast(_))
        ));
        assert!(matches!(
            TopicPattern::compile("inputs/button+"),
            Err(PatternError::MixedWildcard { .. })
        ));
    }

    // Independent recursive definition of the wildcard rule.
    fn reference_match(pattern: &[&str], topic: &[&str]) -> bool {
        match (pattern.split_first(), topic.split_first()) {
            (Some((&"#", rest)), _) if rest.is_empty() => true,
            (None, None) => true,
            (Some((&"+", p_rest)), Some((_, t_rest))) => reference_match(p_rest, t_rest),
            (Some((p, p_rest)), Some((t, t_rest))) => p == t && reference_match(p_rest, t_rest),
            _ => false,
        }
    }

    fn sequences(alphabet: &[&'static str], max_len: usize) -> Vec<Vec<&'static str>> {
        let mut all = vec![Vec::new()];
        let mut frontier = vec![Vec::new()];
        for _ in 0..max_len {
            let mut next = Vec::new();
            for prefix in &frontier {
                for symbol in alphabet {
                    let mut candidate: Vec<&'static str> = prefix.clone();
                    candidate.push(symbol);
                    next.push(candidate);
                }
            }
            all.extend(next.iter().cloned());
            frontier = next;
        }
        all
    }

    #[test]
    fn matcher_agrees_with_reference_on_all_small_inputs() {
        let patterns = sequences(&["a", "b", "+", "#"], 4);
        let topics = sequences(&["a", "b", ""], 4);
        let mut checked = 0;

        for pattern in patterns.iter().filter(|p| !p.is_empty()) {
            let text = pattern.join("/");
            let Ok(compiled) = TopicPattern::compile(&text) else {
                assert!(pattern[..pattern.len() - 1].contains(&"#"));
                continue;
            };
            for topic in topics.iter().filter(|t| !t.is_empty()) {
                let topic_text = topic.join("/");
                let levels: Vec<&str> = topic_text.split('/').collect();
                assert_eq!(
                    compiled.matches(&topic_text),
                    reference_match(pattern, &levels),
                    "pattern '{}' topic '{}'",
                    text,
                    topic_text
                );
                checked += 1;
            }
        }
        assert!(checked > 10_000);
    }
}
