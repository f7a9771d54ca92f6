//! Words, phrases and scored target phrases.

use crate::alignment::AlignmentPair;
use crate::error::ScoreError;
use ahash::AHashMap;
use std::fmt;

/// Index of an annotation layer on a word (surface, lemma, POS, ...).
pub type FactorType = usize;

pub const SURFACE_FACTOR: FactorType = 0;

/// Separator between factors in the textual form `house|NN|house`.
const FACTOR_DELIMITER: char = '|';

/// A token with zero or more factors. Missing factors are `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Word {
    factors: Vec<Option<String>>,
}

impl Word {
    pub fn from_surface(surface: &str) -> Self {
        Self {
            factors: vec![Some(surface.to_string())],
        }
    }

    /// Parse `surface|factor1|factor2`. Empty fields are left unset.
    ///
    /// # Example
    /// ```rust
    /// use phrasecore::Word;
    ///
    /// let word = Word::parse("house||NN");
    /// assert_eq!(word.surface(), Some("house"));
    /// assert_eq!(word.factor(1), None);
    /// assert_eq!(word.factor(2), Some("NN"));
    /// ```
    pub fn parse(text: &str) -> Self {
        let factors = text
            .split(FACTOR_DELIMITER)
            .map(|f| (!f.is_empty()).then(|| f.to_string()))
            .collect();
        Self { factors }
    }

    pub fn factor(&self, factor: FactorType) -> Option<&str> {
        self.factors.get(factor).and_then(|f| f.as_deref())
    }

    pub fn set_factor(&mut self, factor: FactorType, value: &str) {
        if self.factors.len() <= factor {
            self.factors.resize(factor + 1, None);
        }
        self.factors[factor] = Some(value.to_string());
    }

    pub fn surface(&self) -> Option<&str> {
        self.factor(SURFACE_FACTOR)
    }

    /// Two words can be merged when no factor is set to different values.
    pub fn is_compatible(&self, other: &Word) -> bool {
        self.factors
            .iter()
            .zip(&other.factors)
            .all(|(a, b)| match (a, b) {
                (Some(a), Some(b)) => a == b,
                _ => true,
            })
    }

    /// Fill in the factors this word is missing from `other`.
    pub fn merge(&mut self, other: &Word) {
        if self.factors.len() < other.factors.len() {
            self.factors.resize(other.factors.len(), None);
        }
        for (mine, theirs) in self.factors.iter_mut().zip(&other.factors) {
            if mine.is_none() {
                mine.clone_from(theirs);
            }
        }
    }
}

impl fmt::Display for Word {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, factor) in self.factors.iter().enumerate() {
            if i > 0 {
                write!(f, "{FACTOR_DELIMITER}")?;
            }
            f.write_str(factor.as_deref().unwrap_or(""))?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Phrase {
    words: Vec<Word>,
}

impl Phrase {
    pub fn new(words: Vec<Word>) -> Self {
        Self { words }
    }

    /// Whitespace-separated words, each in factored form.
    pub fn parse(text: &str) -> Self {
        Self {
            words: text.split_whitespace().map(Word::parse).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn word(&self, pos: usize) -> &Word {
        &self.words[pos]
    }

    pub fn word_mut(&mut self, pos: usize) -> &mut Word {
        &mut self.words[pos]
    }

    pub fn words(&self) -> &[Word] {
        &self.words
    }

    /// Values of one factor across the phrase, `None` where a word lacks it.
    pub fn factors(&self, factor: FactorType) -> Vec<Option<&str>> {
        self.words.iter().map(|w| w.factor(factor)).collect()
    }
}

impl fmt::Display for Phrase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, word) in self.words.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{word}")?;
        }
        Ok(())
    }
}

/// Identity of a feature that contributes scores (phrase table, language model, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProducerId(pub u32);

/// Unweighted component scores per producer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScoreBreakdown {
    scores: AHashMap<ProducerId, Vec<f32>>,
}

impl ScoreBreakdown {
    /// Record `values` for `producer`, replacing whatever was there.
    pub fn assign(&mut self, producer: ProducerId, values: &[f32]) {
        self.scores.insert(producer, values.to_vec());
    }

    pub fn assign_one(&mut self, producer: ProducerId, value: f32) {
        self.assign(producer, &[value]);
    }

    pub fn get(&self, producer: ProducerId) -> Option<&[f32]> {
        self.scores.get(&producer).map(Vec::as_slice)
    }

    /// Dot product of one producer's components with `weights`.
    ///
    /// # Errors
    /// `MissingProducer` if nothing was recorded for `producer`, `Dimension`
    /// if the component and weight counts differ.
    pub fn partial_inner_product(
        &self,
        producer: ProducerId,
        weights: &[f32],
    ) -> Result<f32, ScoreError> {
        let values = self.get(producer).ok_or(ScoreError::MissingProducer)?;
        if values.len() != weights.len() {
            return Err(ScoreError::Dimension {
                components: values.len(),
                weights: weights.len(),
            });
        }
        Ok(inner_product(values, weights))
    }

    pub fn clear(&mut self) {
        self.scores.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    pub fn len(&self) -> usize {
        self.scores.len()
    }
}

/// Left-to-right dot product, starting from zero.
pub(crate) fn inner_product(values: &[f32], weights: &[f32]) -> f32 {
    values.iter().zip(weights).fold(0.0, |acc, (v, w)| acc + v * w)
}

/// A candidate translation with its scores and alignment.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TargetPhrase {
    phrase: Phrase,
    pub(crate) translation_score: f32,
    pub(crate) ngram_score: f32,
    pub(crate) full_score: f32,
    pub(crate) breakdown: ScoreBreakdown,
    alignment: AlignmentPair,
}

impl TargetPhrase {
    pub fn new(phrase: Phrase, alignment: AlignmentPair) -> Self {
        Self {
            phrase,
            alignment,
            ..Self::default()
        }
    }

    pub fn phrase(&self) -> &Phrase {
        &self.phrase
    }

    pub(crate) fn phrase_mut(&mut self) -> &mut Phrase {
        &mut self.phrase
    }

    pub fn len(&self) -> usize {
        self.phrase.len()
    }

    pub fn is_empty(&self) -> bool {
        self.phrase.is_empty()
    }

    pub fn translation_score(&self) -> f32 {
        self.translation_score
    }

    pub fn ngram_score(&self) -> f32 {
        self.ngram_score
    }

    /// Final ranking score.
    pub fn full_score(&self) -> f32 {
        self.full_score
    }

    pub fn breakdown(&self) -> &ScoreBreakdown {
        &self.breakdown
    }

    pub fn alignment(&self) -> &AlignmentPair {
        &self.alignment
    }

    /// Same length, and every word pair is mergeable.
    pub fn is_compatible(&self, other: &TargetPhrase) -> bool {
        self.len() == other.len()
            && self
                .phrase
                .words()
                .iter()
                .zip(other.phrase.words())
                .all(|(a, b)| a.is_compatible(b))
    }
}

impl fmt::Display for TargetPhrase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}, {}, pC={}, c={}",
            self.phrase, self.alignment, self.translation_score, self.full_score
        )
    }
}
