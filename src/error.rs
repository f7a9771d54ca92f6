//! Error types shared across the crate.
//!
//! Each subsystem has its own enum so callers can tell an expected miss
//! (which is never an error here, see `PhraseIndex::lookup`) from an
//! environment failure that must stop the decoding worker.

use std::io;

/// Errors raised while building, saving or loading a [`crate::phrase_index::PhraseIndex`].
#[derive(thiserror::Error, Debug)]
pub enum IndexError {
    /// The key set was empty.
    #[error("cannot build a phrase index over an empty key set")]
    EmptyKeySet,
    /// The same key was supplied more than once.
    #[error("duplicate key in phrase index: {0:?}")]
    DuplicateKey(String),
    /// No hash seed separated the keys.
    #[error("perfect hash construction failed after {attempts} seeds")]
    Unresolvable { attempts: u32 },
    /// Underlying read or write failed.
    #[error("phrase index i/o: {0}")]
    Io(#[from] io::Error),
    /// Persisted bytes do not describe a valid index.
    #[error("corrupt phrase index: {0}")]
    Corrupt(String),
}

/// Errors from the scoring oracle client.
///
/// Every variant except `Protocol` is fatal for the client that raised it.
#[derive(thiserror::Error, Debug)]
pub enum OracleError {
    #[error("could not connect to scoring oracle at {addr} after {attempts} attempts: {source}")]
    Connect {
        addr: String,
        attempts: u32,
        #[source]
        source: io::Error,
    },
    #[error("scoring oracle i/o failed after {attempts} attempts: {source}")]
    Io {
        attempts: u32,
        #[source]
        source: io::Error,
    },
    #[error("scoring oracle closed the connection after {received} of {expected} reply bytes")]
    ShortReply { expected: usize, received: usize },
    #[error("scoring oracle client is in its final failed state")]
    Failed,
    #[error("malformed oracle request: {0}")]
    Protocol(String),
}

/// Which side of a phrase pair an alignment spec describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Source,
    Target,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Source => f.write_str("source"),
            Side::Target => f.write_str("target"),
        }
    }
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum AlignmentError {
    #[error("{side} alignment has {found} groups, expected {expected}")]
    GroupCount {
        side: Side,
        expected: usize,
        found: usize,
    },
    #[error("malformed alignment spec: {0}")]
    Malformed(String),
    #[error("shifting position {position} by {offset} would be negative")]
    ShiftUnderflow { position: usize, offset: isize },
}

#[derive(thiserror::Error, Debug)]
pub enum ScoreError {
    /// Raw component count differs from the weight count.
    #[error("{components} score components but {weights} weights")]
    Dimension { components: usize, weights: usize },
    /// Partial reweighting is undefined for structured (lattice/confusion-net) input.
    #[error("reweighting is not supported with structured input")]
    UnsupportedInputMode,
    /// Reweighting a candidate that never had translation components attached.
    #[error("no components recorded for the translation producer")]
    MissingProducer,
    #[error(transparent)]
    Oracle(#[from] OracleError),
}

#[derive(thiserror::Error, Debug)]
pub enum PhraseTableError {
    #[error("phrase table line {line}: {reason}")]
    Format { line: usize, reason: String },
    #[error("phrase table line {line}: {source}")]
    Alignment {
        line: usize,
        #[source]
        source: AlignmentError,
    },
    #[error(transparent)]
    Index(#[from] IndexError),
    #[error("phrase table i/o: {0}")]
    Io(#[from] io::Error),
}
