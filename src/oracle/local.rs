//! In-process trigram model and an oracle backed by it.
//!
//! # N-gram Backoff
//!
//! The model backs off without discounting:
//! - First tries P(word | w-2, w-1) [trigram]
//! - Falls back to P(word | w-1) [bigram]
//! - Falls back to P(word) [unigram]
//! - Uses a small epsilon (1e-9) for unseen words
//!
//! # Training
//!
//! Sentences are whitespace-tokenized and padded with `<s>` and `</s>`, so
//! sentence boundaries score like ordinary words:
//! ```rust
//! use phrasecore::oracle::TrigramModel;
//!
//! let mut model = TrigramModel::new();
//! model.train(&["the quick brown fox", "the lazy dog"]);
//! assert!(model.log10_prob("quick", &["<s>", "the"]) > -1.0);
//! ```
//!
//! The same model sits behind [`super::OracleServer`], which makes it the
//! reference the TCP client is tested against.

use super::protocol::{floor_score, transform_log10};
use super::{
    ContextSequence, ContextToken, NGramCache, NGramOracle, NGramScore, BOS_MARKER, EOS_MARKER,
};
use crate::error::OracleError;
use ahash::AHashMap;
use std::io::BufRead;

/// Probability returned for a word never seen in training.
const UNSEEN_PROB: f64 = 1e-9;

/// A trigram language model with backoff.
#[derive(Debug, Clone, Default)]
pub struct TrigramModel {
    /// Counts of word triples: (w-2, w-1, w) → count.
    trigram_counts: AHashMap<(String, String, String), u64>,
    /// Counts of word pairs: (w-1, w) → count.
    bigram_counts: AHashMap<(String, String), u64>,
    unigram_counts: AHashMap<String, u64>,
    /// Tokens counted, boundary markers included.
    total_words: u64,
}

impl TrigramModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add the n-grams of every sentence in `corpus` to the count tables.
    pub fn train<S: AsRef<str>>(&mut self, corpus: &[S]) {
        for sentence in corpus {
            self.train_sentence(sentence.as_ref());
        }
    }

    /// Train on one sentence per line. Blank lines are skipped.
    pub fn train_from_reader<R: BufRead>(&mut self, reader: R) -> std::io::Result<usize> {
        let mut sentences = 0;
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            self.train_sentence(&line);
            sentences += 1;
        }
        tracing::info!(
            target: "phrasecore::oracle",
            sentences,
            vocabulary = self.unigram_counts.len(),
            "trained trigram model"
        );
        Ok(sentences)
    }

    fn train_sentence(&mut self, sentence: &str) {
        let words: Vec<&str> = std::iter::once(BOS_MARKER)
            .chain(sentence.split_whitespace())
            .chain(std::iter::once(EOS_MARKER))
            .collect();

        for i in 0..words.len() {
            *self.unigram_counts.entry(words[i].to_string()).or_insert(0) += 1;
            self.total_words += 1;

            if i > 0 {
                *self
                    .bigram_counts
                    .entry((words[i - 1].to_string(), words[i].to_string()))
                    .or_insert(0) += 1;
            }

            if i > 1 {
                *self
                    .trigram_counts
                    .entry((
                        words[i - 2].to_string(),
                        words[i - 1].to_string(),
                        words[i].to_string(),
                    ))
                    .or_insert(0) += 1;
            }
        }
    }

    /// P(word | history), using at most the last two history words.
    pub fn probability(&self, word: &str, history: &[&str]) -> f64 {
        let n = history.len();

        if n >= 2 {
            let (prev_prev, prev) = (history[n - 2], history[n - 1]);
            let key = (prev_prev.to_string(), prev.to_string(), word.to_string());
            if let Some(&trigram_count) = self.trigram_counts.get(&key) {
                if let Some(&bigram_count) = self.bigram_counts.get(&(key.0, key.1)) {
                    return trigram_count as f64 / bigram_count as f64;
                }
            }
        }

        if let Some(&prev) = history.last() {
            if let Some(&bigram_count) = self.bigram_counts.get(&(prev.to_string(), word.to_string())) {
                if let Some(&unigram_count) = self.unigram_counts.get(prev) {
                    return bigram_count as f64 / unigram_count as f64;
                }
            }
        }

        if let Some(&unigram_count) = self.unigram_counts.get(word) {
            return unigram_count as f64 / self.total_words as f64;
        }

        UNSEEN_PROB
    }

    /// log10 of [`Self::probability`], the unit the oracle protocol speaks.
    pub fn log10_prob(&self, word: &str, history: &[&str]) -> f32 {
        self.probability(word, history).log10() as f32
    }

    pub fn vocabulary_size(&self) -> usize {
        self.unigram_counts.len()
    }
}

/// [`NGramOracle`] that evaluates a [`TrigramModel`] in process.
#[derive(Debug)]
pub struct LocalOracle {
    model: TrigramModel,
    cache: NGramCache,
    order: usize,
}

impl LocalOracle {
    pub fn new(model: TrigramModel) -> Self {
        Self {
            model,
            cache: NGramCache::new(),
            order: 3,
        }
    }

    pub fn model(&self) -> &TrigramModel {
        &self.model
    }

    pub fn cache(&self) -> &NGramCache {
        &self.cache
    }
}

impl NGramOracle for LocalOracle {
    fn order(&self) -> usize {
        self.order
    }

    fn score(&mut self, context: &ContextSequence) -> Result<NGramScore, OracleError> {
        let tokens = context.truncated(self.order);
        let Some((event, history)) = tokens.split_last() else {
            return Ok(NGramScore::EMPTY);
        };
        if let Some(hit) = self.cache.get(tokens) {
            return Ok(hit);
        }

        let history: Vec<&str> = history.iter().map(ContextToken::as_wire).collect();
        let raw = self.model.log10_prob(event.as_wire(), &history);
        Ok(self.cache.insert(tokens, floor_score(transform_log10(raw))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trained() -> TrigramModel {
        let mut model = TrigramModel::new();
        model.train(&[
            "the quick brown fox",
            "the quick dog",
            "the lazy dog",
            "the fox jumps",
        ]);
        model
    }

    #[test]
    fn test_trigram_model() {
        let model = trained();
        // "the quick" is followed by "brown" once and "dog" once.
        assert!((model.probability("brown", &["the", "quick"]) - 0.5).abs() < 1e-12);
        // No "lazy fox" trigram: back off to the bigram "lazy" → "fox", then unigram.
        let unigram = model.probability("fox", &["the", "lazy"]);
        assert!(unigram > 0.0 && unigram < 0.5);
        assert_eq!(model.probability("zebra", &["the"]), UNSEEN_PROB);
    }

    #[test]
    fn test_boundaries_are_counted() {
        let model = trained();
        assert_eq!(model.probability("the", &[BOS_MARKER]), 1.0);
        assert_eq!(model.probability(EOS_MARKER, &["quick", "dog"]), 1.0);
    }

    #[test]
    fn test_train_from_reader_skips_blank_lines() {
        let mut model = TrigramModel::new();
        let n = model
            .train_from_reader("a b\n\n  \nb c\n".as_bytes())
            .unwrap();
        assert_eq!(n, 2);
        assert_eq!(model.vocabulary_size(), 5);
    }

    #[test]
    fn test_local_oracle_scores_and_caches() {
        let mut oracle = LocalOracle::new(trained());
        let ctx = ContextSequence::from_words(&[Some("the"), Some("quick"), Some("brown")]);

        let score = oracle.score(&ctx).unwrap();
        assert!((score.prob - 0.5f32.ln()).abs() < 1e-5);
        assert_eq!(oracle.score(&ctx).unwrap(), score);
        assert_eq!(oracle.cache().len(), 1);

        assert_eq!(oracle.score(&ContextSequence::default()).unwrap(), NGramScore::EMPTY);
    }

    #[test]
    fn test_unseen_word_uses_epsilon() {
        let mut oracle = LocalOracle::new(trained());
        let ctx = ContextSequence::from_words(&[Some("zebra")]);
        let p = oracle.score(&ctx).unwrap().prob;
        assert!((p - transform_log10(-9.0)).abs() < 1e-3);
        assert!(p >= crate::oracle::protocol::LOWEST_SCORE);
    }
}
