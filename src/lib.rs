//! phrasecore - scoring and lookup core of a phrase-based translation decoder.
//!
//! # Overview
//!
//! Given a source phrase, the decoder needs its candidate translations, a
//! score for each candidate, and the word alignment between the two sides.
//! This crate provides:
//! - A fingerprinted perfect-hash index from source phrases to table rows
//! - A word alignment model with wildcard materialization
//! - A client for a remote n-gram scoring service, with a trie cache
//! - The aggregation of translation and language-model scores per candidate
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │  Phrase table   │ ← Parses rows, groups them by source (phrase_table.rs)
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │  Phrase index   │ ← Source phrase → row id (phrase_index.rs, mphf.rs)
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │  Aggregator     │ ← Translation + LM + word penalty (scoring.rs)
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │  Oracle client  │ ← Cached n-gram scores over TCP (oracle/)
//! └─────────────────┘
//! ```
//!
//! # Concurrency
//!
//! The index and alignments are immutable once built and can be shared by any
//! number of search threads. A [`ScoringClient`] owns one connection and one
//! cache and is meant to be owned by a single decoding worker.

pub mod alignment;
pub mod config;
pub mod error;
pub mod language_model;
pub mod mphf;
pub mod murmur;
pub mod oracle;
pub mod phrase;
pub mod phrase_index;
pub mod phrase_table;
pub mod scoring;

pub use alignment::{AlignmentElement, AlignmentPair, AlignmentPhrase};
pub use config::Config;
pub use error::{AlignmentError, IndexError, OracleError, PhraseTableError, ScoreError, Side};
pub use language_model::{LanguageModel, NGramLanguageModel};
pub use oracle::{
    BatchMode, ContextSequence, ContextToken, NGramOracle, NGramScore, OracleSettings,
    ScoringClient,
};
pub use phrase::{Phrase, ProducerId, ScoreBreakdown, TargetPhrase, Word};
pub use phrase_index::{PhraseIndex, PhraseKey, RowId};
pub use phrase_table::{PhraseTable, PhraseTableEntry};
pub use scoring::{merge, rank, Aggregator, InputMode, WeightedModel};
