//! N-gram scoring oracle: the abstraction, the remote client and its cache.
//!
//! # Architecture
//!
//! ```text
//! NGramLanguageModel ──► NGramOracle ──┬─► ScoringClient<TcpStream> ──► OracleServer
//!                                      │        └─ NGramCache (trie)
//!                                      └─► LocalOracle ──► TrigramModel
//!                                               └─ NGramCache (trie)
//! ```
//!
//! One client owns one connection and one cache. Clients are not shared
//! between threads; each decoding worker constructs, connects, uses and shuts
//! down its own.

pub mod cache;
pub mod client;
pub mod local;
pub mod protocol;
pub mod server;

use crate::error::OracleError;
use std::fmt;

pub use cache::NGramCache;
pub use client::{BatchMode, OracleSettings, ScoringClient};
pub use local::{LocalOracle, TrigramModel};
pub use server::{OracleServer, ServerHandle, ServerStats};

pub const BOS_MARKER: &str = "<s>";
pub const EOS_MARKER: &str = "</s>";

/// One position of an n-gram context.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ContextToken {
    BeginOfSequence,
    EndOfSequence,
    Token(String),
}

impl ContextToken {
    /// Textual form used on the wire.
    pub fn as_wire(&self) -> &str {
        match self {
            ContextToken::BeginOfSequence => BOS_MARKER,
            ContextToken::EndOfSequence => EOS_MARKER,
            ContextToken::Token(s) => s,
        }
    }
}

impl From<&str> for ContextToken {
    fn from(s: &str) -> Self {
        match s {
            BOS_MARKER => ContextToken::BeginOfSequence,
            EOS_MARKER => ContextToken::EndOfSequence,
            _ => ContextToken::Token(s.to_string()),
        }
    }
}

impl fmt::Display for ContextToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_wire())
    }
}

/// Tokens of one query, most distant first; the last token is the event
/// being predicted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct ContextSequence {
    tokens: Vec<ContextToken>,
}

impl ContextSequence {
    pub fn new(tokens: Vec<ContextToken>) -> Self {
        Self { tokens }
    }

    /// Build from optional words. A missing history word becomes
    /// begin-of-sequence; a missing event becomes end-of-sequence. Words
    /// spelled like a marker are read as that marker.
    pub fn from_words(words: &[Option<&str>]) -> Self {
        let last = words.len().saturating_sub(1);
        let tokens = words
            .iter()
            .enumerate()
            .map(|(i, w)| match w {
                Some(w) => ContextToken::from(*w),
                None if i == last => ContextToken::EndOfSequence,
                None => ContextToken::BeginOfSequence,
            })
            .collect();
        Self { tokens }
    }

    pub fn tokens(&self) -> &[ContextToken] {
        &self.tokens
    }

    pub fn event(&self) -> Option<&ContextToken> {
        self.tokens.last()
    }

    pub fn history(&self) -> &[ContextToken] {
        &self.tokens[..self.tokens.len().saturating_sub(1)]
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// The trailing `order` tokens: all a model of that order conditions on.
    pub fn truncated(&self, order: usize) -> &[ContextToken] {
        let start = self.tokens.len().saturating_sub(order.max(1));
        &self.tokens[start..]
    }
}

/// Opaque identity of a distinct scored context, stable for the life of a cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BackoffState(pub u64);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NGramScore {
    /// Natural-log probability, floored at [`protocol::LOWEST_SCORE`].
    pub prob: f32,
    /// `None` only for the empty context.
    pub state: Option<BackoffState>,
}

impl NGramScore {
    pub const EMPTY: NGramScore = NGramScore {
        prob: 0.0,
        state: None,
    };
}

/// Anything that can score n-gram contexts.
pub trait NGramOracle {
    /// Longest context (including the event) the oracle conditions on.
    fn order(&self) -> usize;

    fn score(&mut self, context: &ContextSequence) -> Result<NGramScore, OracleError>;

    /// Score many contexts. The default scores them one at a time.
    fn score_batch(&mut self, contexts: &[ContextSequence]) -> Result<Vec<f32>, OracleError> {
        contexts
            .iter()
            .map(|c| self.score(c).map(|s| s.prob))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_words_substitutes_markers() {
        let ctx = ContextSequence::from_words(&[None, Some("the"), None]);
        assert_eq!(
            ctx.tokens(),
            &[
                ContextToken::BeginOfSequence,
                ContextToken::Token("the".to_string()),
                ContextToken::EndOfSequence,
            ]
        );
        assert_eq!(ctx.event(), Some(&ContextToken::EndOfSequence));
        assert_eq!(ctx.history().len(), 2);
    }

    #[test]
    fn test_truncated_keeps_nearest() {
        let ctx = ContextSequence::from_words(&[Some("a"), Some("b"), Some("c"), Some("d")]);
        let tail: Vec<&str> = ctx.truncated(3).iter().map(ContextToken::as_wire).collect();
        assert_eq!(tail, vec!["b", "c", "d"]);
        assert_eq!(ctx.truncated(10).len(), 4);
    }

    #[test]
    fn test_marker_round_trip() {
        assert_eq!(ContextToken::from("<s>"), ContextToken::BeginOfSequence);
        assert_eq!(ContextToken::from("</s>").as_wire(), "</s>");
        assert_eq!(ContextToken::from("haus"), ContextToken::Token("haus".into()));
    }
}
