//! Phrase score aggregation.
//!
//! Combines translation-model components, language-model scores and the
//! word penalty into the scores a [`TargetPhrase`] is ranked by:
//!
//! ```text
//! translation = Σ raw[i] · weight[i]
//! ngram       = Σ lm_weight · lm_ngram
//! full        = translation + Σ lm_weight · lm_full − words · word_penalty_weight
//! ```
//!
//! The aggregator does no I/O of its own. Language models that talk to a
//! remote oracle are passed in by the caller for the duration of one call.

use crate::alignment::AlignmentPair;
use crate::error::ScoreError;
use crate::language_model::LanguageModel;
use crate::phrase::{inner_product, Phrase, ProducerId, TargetPhrase, Word};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Kind of input the decoder is translating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputMode {
    /// A plain token sequence.
    #[default]
    Plain,
    /// Lattice or confusion-network input, which adds input-weight
    /// components the translation weights do not cover.
    Structured,
}

/// A language model and its feature weight.
pub struct WeightedModel<'a> {
    pub model: &'a mut dyn LanguageModel,
    pub weight: f32,
}

impl<'a> WeightedModel<'a> {
    pub fn new(model: &'a mut dyn LanguageModel, weight: f32) -> Self {
        Self { model, weight }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Aggregator {
    translation_producer: ProducerId,
    input_mode: InputMode,
}

impl Aggregator {
    /// Create an aggregator.
    ///
    /// # Arguments
    /// * `translation_producer` - Producer the translation components are recorded under
    /// * `input_mode` - Structured input disables [`Self::reweight`]
    ///
    /// # Example
    /// ```rust
    /// use phrasecore::{Aggregator, InputMode, ProducerId};
    ///
    /// let agg = Aggregator::new(ProducerId(0), InputMode::Plain);
    /// assert_eq!(agg.translation_producer(), ProducerId(0));
    /// ```
    pub fn new(translation_producer: ProducerId, input_mode: InputMode) -> Self {
        Self {
            translation_producer,
            input_mode,
        }
    }

    pub fn translation_producer(&self) -> ProducerId {
        self.translation_producer
    }

    pub fn input_mode(&self) -> InputMode {
        self.input_mode
    }

    /// Score a freshly materialized candidate.
    ///
    /// # Arguments
    /// * `candidate` - Target phrase to score in place
    /// * `raw` - Unweighted translation components, recorded in the breakdown
    /// * `weights` - One weight per component
    /// * `word_penalty_weight` - Cost charged per target word
    /// * `models` - Language models and their weights; unusable ones are skipped
    ///
    /// # Example
    /// ```rust
    /// use phrasecore::{Aggregator, AlignmentPair, InputMode, Phrase, ProducerId, TargetPhrase};
    ///
    /// let agg = Aggregator::new(ProducerId(0), InputMode::Plain);
    /// let mut candidate = TargetPhrase::new(Phrase::parse("the house"), AlignmentPair::uniform(1, 2));
    /// agg.attach(&mut candidate, &[2.0, 4.0], &[0.5, 0.25], 1.0, &mut []).unwrap();
    /// assert_eq!(candidate.translation_score(), 2.0);
    /// assert_eq!(candidate.full_score(), 0.0);
    /// ```
    ///
    /// # Errors
    /// - `ScoreError::Dimension` if `raw` and `weights` differ in length; the
    ///   candidate is left untouched.
    /// - Any error a language model returns. The candidate may then hold a
    ///   partial breakdown and must be discarded.
    pub fn attach(
        &self,
        candidate: &mut TargetPhrase,
        raw: &[f32],
        weights: &[f32],
        word_penalty_weight: f32,
        models: &mut [WeightedModel<'_>],
    ) -> Result<(), ScoreError> {
        if raw.len() != weights.len() {
            return Err(ScoreError::Dimension {
                components: raw.len(),
                weights: weights.len(),
            });
        }

        let translation = inner_product(raw, weights);
        candidate.translation_score = translation;
        candidate.breakdown.assign(self.translation_producer, raw);

        let mut total_ngram = 0.0f32;
        let mut total_full = 0.0f32;
        for WeightedModel { model, weight } in models.iter_mut() {
            if !model.usable(candidate.phrase()) {
                continue;
            }
            let (full, ngram) = model.calc_score(candidate.phrase())?;
            candidate.breakdown.assign_one(model.producer(), ngram);
            total_ngram += ngram * *weight;
            total_full += full * *weight;
        }

        candidate.ngram_score = total_ngram;
        candidate.full_score =
            translation + total_full - candidate.len() as f32 * word_penalty_weight;
        Ok(())
    }

    /// Score a pass-through candidate for words the phrase table does not
    /// know: only the word penalty applies.
    pub fn attach_unknown(&self, candidate: &mut TargetPhrase, word_penalty_weight: f32) {
        self.reset(candidate);
        candidate.full_score = -(candidate.len() as f32 * word_penalty_weight);
    }

    /// Pass-through candidates for a source phrase with no table entry.
    ///
    /// Each source word becomes its own one-word candidate, aligned
    /// one-to-one and scored with [`Self::attach_unknown`].
    ///
    /// # Arguments
    /// * `source` - Tokens of the unknown source phrase
    /// * `word_penalty_weight` - Cost charged per target word
    ///
    /// # Example
    /// ```rust
    /// use phrasecore::{Aggregator, InputMode, ProducerId};
    ///
    /// let agg = Aggregator::new(ProducerId(0), InputMode::Plain);
    /// let candidates = agg.pass_through(&["das", "haus"], 1.0);
    /// assert_eq!(candidates.len(), 2);
    /// assert_eq!(candidates[1].full_score(), -1.0);
    /// ```
    pub fn pass_through<T: AsRef<str>>(
        &self,
        source: &[T],
        word_penalty_weight: f32,
    ) -> Vec<TargetPhrase> {
        source
            .iter()
            .map(|word| {
                let phrase = Phrase::new(vec![Word::from_surface(word.as_ref())]);
                let mut candidate = TargetPhrase::new(phrase, AlignmentPair::identity());
                self.attach_unknown(&mut candidate, word_penalty_weight);
                candidate
            })
            .collect()
    }

    /// Recompute the translation score from the recorded components under
    /// new translation weights. Nothing else is touched.
    pub fn reweight(&self, candidate: &mut TargetPhrase, weights: &[f32]) -> Result<(), ScoreError> {
        if self.input_mode == InputMode::Structured {
            return Err(ScoreError::UnsupportedInputMode);
        }
        candidate.translation_score = candidate
            .breakdown
            .partial_inner_product(self.translation_producer, weights)?;
        Ok(())
    }

    pub fn reset(&self, candidate: &mut TargetPhrase) {
        candidate.translation_score = 0.0;
        candidate.ngram_score = 0.0;
        candidate.full_score = 0.0;
        candidate.breakdown.clear();
    }
}

/// Combine two compatible candidates word by word into a new one based on
/// `a`. Returns `None` when they cannot be merged. Neither input changes.
///
/// # Arguments
/// * `a` - Base candidate; scores and alignment are taken from it
/// * `b` - Candidate whose factors fill in the gaps of `a`
///
/// # Example
/// ```rust
/// use phrasecore::{merge, AlignmentPair, Phrase, TargetPhrase};
///
/// let a = TargetPhrase::new(Phrase::parse("house"), AlignmentPair::identity());
/// let b = TargetPhrase::new(Phrase::parse("house|NN"), AlignmentPair::identity());
/// let merged = merge(&a, &b).unwrap();
/// assert_eq!(merged.phrase().word(0).factor(1), Some("NN"));
///
/// let other = TargetPhrase::new(Phrase::parse("home"), AlignmentPair::identity());
/// assert!(merge(&a, &other).is_none());
/// ```
pub fn merge(a: &TargetPhrase, b: &TargetPhrase) -> Option<TargetPhrase> {
    if !a.is_compatible(b) {
        return None;
    }
    let mut merged = a.clone();
    for (pos, word) in b.phrase().words().iter().enumerate() {
        merged.phrase_mut().word_mut(pos).merge(word);
    }
    Some(merged)
}

/// Sort best first by full score. NaN scores compare equal to everything.
pub fn rank(candidates: &mut [TargetPhrase]) {
    candidates.sort_by(|a, b| {
        b.full_score()
            .partial_cmp(&a.full_score())
            .unwrap_or(Ordering::Equal)
    });
}
