//! Dictation segmenter.
//!
//! Transcribed speech arrives as free text with no end-of-utterance signal.
//! A spoken trigger keyword closes the current segment: text before the
//! keyword is submitted, text after it starts the next segment.

use regex::Regex;

use crate::error::{Error, Result};

/// Outcome of feeding text into the segmenter.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Segmentation {
    /// Segments closed by the trigger keyword, oldest first.
    pub completed: Vec<String>,
    /// Text retained as the start of the next segment.
    pub pending: String,
    /// Whether `pending` differs from before this call.
    pub pending_changed: bool,
}

/// Splits dictated text at a case-insensitive trigger keyword.
#[derive(Debug, Clone)]
pub struct Segmenter {
    trigger: Regex,
    pending: String,
}

impl Segmenter {
    pub fn new(keyword: &str) -> Result<Self> {
        let keyword = keyword.trim();
        if keyword.is_empty() {
            return Err(Error::Config("trigger keyword must not be empty".into()));
        }
        let trigger = Regex::new(&format!("(?i){}", regex::escape(keyword)))
            .map_err(|e| Error::Config(format!("invalid trigger keyword: {e}")))?;
        Ok(Self {
            trigger,
            pending: String::new(),
        })
    }

    pub fn pending(&self) -> &str {
        &self.pending
    }

    /// Append transcribed text and cut at every trigger occurrence.
    pub fn push(&mut self, text: &str) -> Segmentation {
        let before = self.pending.clone();

        let text = text.trim();
        if !text.is_empty() {
            if !self.pending.is_empty() {
                self.pending.push(' ');
            }
            self.pending.push_str(text);
        }

        let mut completed = Vec::new();
        while let Some(m) = self.trigger.find(&self.pending) {
            let segment = clean_segment(&self.pending[..m.start()]);
            let rest = self.pending[m.end()..]
                .trim_start_matches(|c: char| c.is_whitespace() || ".,!?;:".contains(c))
                .to_string();
            if !segment.is_empty() {
                completed.push(segment);
            }
            self.pending = rest;
        }

        Segmentation {
            completed,
            pending_changed: self.pending != before,
            pending: self.pending.clone(),
        }
    }

    /// Submit whatever is buffered as a final segment (source ended
    /// mid-utterance).
    pub fn flush(&mut self) -> Option<String> {
        let segment = clean_segment(&std::mem::take(&mut self.pending));
        (!segment.is_empty()).then_some(segment)
    }
}

fn clean_segment(raw: &str) -> String {
    raw.trim()
        .trim_end_matches([',', ';', ':'])
        .trim_end()
        .to_string()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn splits_at_keyword_and_retains_remainder() {
        let mut s = Segmenter::new("JINX").unwrap();
        let out = s.push("book a flight JINX tomorrow");
        assert_eq!(out.completed, vec!["book a flight"]);
        assert_eq!(out.pending, "tomorrow");
        assert!(out.pending_changed);
    }

    #[test]
    fn keyword_match_is_case_insensitive() {
        let mut s = Segmenter::new("done").unwrap();
        let out = s.push("Send the report. Done.");
        assert_eq!(out.completed, vec!["Send the report."]);
        assert_eq!(out.pending, "");
    }

    #[test]
    fn accumulates_across_chunks() {
        let mut s = Segmenter::new("done").unwrap();
        assert!(s.push("write a haiku").completed.is_empty());
        assert!(s.push("about rust").completed.is_empty());
        assert_eq!(s.pending(), "write a haiku about rust");

        let out = s.push("done");
        assert_eq!(out.completed, vec!["write a haiku about rust"]);
        assert_eq!(out.pending, "");
    }

    #[test]
    fn several_keywords_in_one_chunk() {
        let mut s = Segmenter::new("over").unwrap();
        let out = s.push("first, over second over third");
        assert_eq!(out.completed, vec!["first", "second"]);
        assert_eq!(out.pending, "third");
    }

    #[test]
    fn bare_keyword_yields_no_empty_segment() {
        let mut s = Segmenter::new("done").unwrap();
        let out = s.push("done");
        assert!(out.completed.is_empty());
        assert!(!out.pending_changed);
    }

    #[test]
    fn keyword_with_regex_metacharacters_is_literal() {
        let mut s = Segmenter::new("go.").unwrap();
        let out = s.push("stay gox go. now");
        assert_eq!(out.completed, vec!["stay gox"]);
        assert_eq!(out.pending, "now");
    }

    #[test]
    fn flush_submits_buffered_text_once() {
        let mut s = Segmenter::new("done").unwrap();
        s.push("half a thought, ");
        assert_eq!(s.flush().as_deref(), Some("half a thought"));
        assert_eq!(s.flush(), None);
    }

    #[test]
    fn empty_keyword_rejected() {
        assert!(Segmenter::new("   ").is_err());
    }
}
