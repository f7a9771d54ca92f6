//! Language model features used when scoring candidate phrases.
//!
//! A phrase is scored in isolation: each word is conditioned only on the
//! words before it inside the phrase. Words whose in-phrase context is
//! shorter than the model order get an estimate that the search will revise
//! once the phrase is placed in a sentence, so their scores count toward the
//! full score only. Words with a complete context also count toward the
//! n-gram score.

use crate::error::ScoreError;
use crate::oracle::{ContextSequence, NGramOracle, BOS_MARKER};
use crate::phrase::{FactorType, Phrase, ProducerId};

/// A feature that scores target phrases with an n-gram model.
pub trait LanguageModel {
    /// Identity under which raw scores are recorded in a breakdown.
    fn producer(&self) -> ProducerId;

    /// Whether every word of `phrase` carries the factor this model reads.
    fn usable(&self, phrase: &Phrase) -> bool;

    /// Returns `(full, ngram)` for the phrase, both natural-log.
    fn calc_score(&mut self, phrase: &Phrase) -> Result<(f32, f32), ScoreError>;
}

/// [`LanguageModel`] over one factor, backed by any [`NGramOracle`].
pub struct NGramLanguageModel<O: NGramOracle> {
    producer: ProducerId,
    factor: FactorType,
    oracle: O,
}

impl<O: NGramOracle> NGramLanguageModel<O> {
    pub fn new(producer: ProducerId, factor: FactorType, oracle: O) -> Self {
        Self {
            producer,
            factor,
            oracle,
        }
    }

    pub fn oracle(&self) -> &O {
        &self.oracle
    }

    pub fn into_oracle(self) -> O {
        self.oracle
    }

    /// Score every context of every usable phrase in one `score_batch`
    /// call, so later `calc_score` calls are answered from the cache.
    pub fn prefetch<'a, I>(&mut self, phrases: I) -> Result<usize, ScoreError>
    where
        I: IntoIterator<Item = &'a Phrase>,
    {
        let mut contexts = Vec::new();
        for phrase in phrases {
            if self.usable(phrase) {
                contexts.extend(self.contexts(phrase).into_iter().map(|(ctx, _)| ctx));
            }
        }
        if contexts.is_empty() {
            return Ok(0);
        }
        self.oracle.score_batch(&contexts)?;
        tracing::debug!(target: "phrasecore::lm", contexts = contexts.len(), "prefetched phrase contexts");
        Ok(contexts.len())
    }

    /// One context per scored word, flagged when the context fills the
    /// model order. A leading sentence-start word only seeds the history.
    fn contexts(&self, phrase: &Phrase) -> Vec<(ContextSequence, bool)> {
        let order = self.oracle.order().max(1);
        let words = phrase.factors(self.factor);
        let mut contexts = Vec::with_capacity(words.len());

        for (pos, word) in words.iter().enumerate() {
            if pos == 0 && *word == Some(BOS_MARKER) {
                continue;
            }
            let start = (pos + 1).saturating_sub(order);
            let window = &words[start..=pos];
            contexts.push((ContextSequence::from_words(window), window.len() == order));
        }
        contexts
    }
}

impl<O: NGramOracle> LanguageModel for NGramLanguageModel<O> {
    fn producer(&self) -> ProducerId {
        self.producer
    }

    fn usable(&self, phrase: &Phrase) -> bool {
        phrase.words().iter().all(|w| w.factor(self.factor).is_some())
    }

    fn calc_score(&mut self, phrase: &Phrase) -> Result<(f32, f32), ScoreError> {
        let mut partial = 0.0f32;
        let mut ngram = 0.0f32;

        for (context, complete) in self.contexts(phrase) {
            let score = self.oracle.score(&context)?.prob;
            if complete {
                ngram += score;
            } else {
                partial += score;
            }
        }
        Ok((partial + ngram, ngram))
    }
}
