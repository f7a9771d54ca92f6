//! Word alignment between the source and target side of a phrase pair.
//!
//! Each token carries an [`AlignmentElement`]: the set of positions on the
//! *other* side it is aligned to. Phrase tables spell this out per token:
//!
//! ```text
//! (0) (3) (1,2) ()
//! ```
//!
//! An empty group means the aligner had nothing to say about that token. We
//! never keep that "unknown" state around: it is widened to a wildcard that
//! covers every position of the other side, and the opposite side records
//! which of its partners were wildcarded.

use crate::error::{AlignmentError, Side};
use std::collections::BTreeSet;
use std::fmt;

/// Alignment of one token.
#[derive(Debug, Clone, Default)]
pub struct AlignmentElement {
    positions: BTreeSet<usize>,
    wildcard: bool,
    /// Positions on the other side whose own alignment was a wildcard.
    wildcard_sources: BTreeSet<usize>,
}

impl AlignmentElement {
    pub fn new<I: IntoIterator<Item = usize>>(positions: I) -> Self {
        Self {
            positions: positions.into_iter().collect(),
            ..Self::default()
        }
    }

    /// Wildcard over `0..other_len`.
    pub fn uniform(other_len: usize) -> Self {
        let mut element = Self::default();
        element.set_uniform(other_len);
        element
    }

    /// Number of positions this token aligns to.
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn is_wildcard(&self) -> bool {
        self.wildcard
    }

    pub fn positions(&self) -> impl Iterator<Item = usize> + '_ {
        self.positions.iter().copied()
    }

    pub fn contains(&self, pos: usize) -> bool {
        self.positions.contains(&pos)
    }

    pub fn wildcard_sources(&self) -> impl Iterator<Item = usize> + '_ {
        self.wildcard_sources.iter().copied()
    }

    pub fn add(&mut self, pos: usize) {
        self.positions.insert(pos);
    }

    /// Align to every position of a phrase of length `other_len`.
    pub fn set_uniform(&mut self, other_len: usize) {
        self.positions.extend(0..other_len);
        self.wildcard = true;
    }

    /// Used for unknown words, which translate one-to-one.
    pub fn set_identity(&mut self) {
        self.positions.insert(0);
    }

    pub fn intersect(a: &Self, b: &Self) -> Self {
        Self::new(a.positions.intersection(&b.positions).copied())
    }

    /// Narrow this element to the positions also present in `other`.
    pub fn set_intersect(&mut self, other: &Self) {
        self.positions.retain(|p| other.positions.contains(p));
        self.wildcard &= other.wildcard;
    }

    /// Re-base positions, e.g. from a sub-span onto whole-sentence coordinates.
    pub fn shift(&mut self, offset: isize) -> Result<(), AlignmentError> {
        let shifted = self
            .positions
            .iter()
            .map(|&p| {
                p.checked_add_signed(offset)
                    .ok_or(AlignmentError::ShiftUnderflow { position: p, offset })
            })
            .collect::<Result<BTreeSet<_>, _>>()?;
        self.positions = shifted;
        Ok(())
    }

    fn note_wildcard_source(&mut self, pos: usize) {
        self.wildcard_sources.insert(pos);
    }
}

/// Two elements are equal when they store the same positions. A wildcard and
/// an explicit group over the same range compare equal; bookkeeping is ignored.
impl PartialEq for AlignmentElement {
    fn eq(&self, other: &Self) -> bool {
        self.positions == other.positions
    }
}

impl Eq for AlignmentElement {}

impl fmt::Display for AlignmentElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        for (i, p) in self.positions.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{p}")?;
        }
        f.write_str(")")
    }
}

/// Alignment of every token on one side of a phrase pair.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AlignmentPhrase {
    elements: Vec<AlignmentElement>,
}

impl AlignmentPhrase {
    pub fn new(elements: Vec<AlignmentElement>) -> Self {
        Self { elements }
    }

    /// Parse one side of an alignment spec.
    ///
    /// Returns the phrase and the positions whose group was empty (and thus
    /// became a wildcard over `other_len`).
    ///
    /// # Arguments
    /// * `spec` - Space-separated groups such as `(0) (1,2) ()`
    /// * `side` - Which side `spec` describes, for error reporting
    /// * `len` - Number of tokens on this side
    /// * `other_len` - Number of tokens on the opposite side
    ///
    /// # Errors
    /// `GroupCount` when the group count differs from `len`, `Malformed` for
    /// unparsable groups or positions not below `other_len`.
    pub fn parse(
        spec: &str,
        side: Side,
        len: usize,
        other_len: usize,
    ) -> Result<(Self, Vec<usize>), AlignmentError> {
        let groups = split_groups(spec)?;
        if groups.len() != len {
            return Err(AlignmentError::GroupCount {
                side,
                expected: len,
                found: groups.len(),
            });
        }

        let mut elements = Vec::with_capacity(len);
        let mut wildcarded = Vec::new();
        for (pos, group) in groups.into_iter().enumerate() {
            let positions = parse_group(group)?;
            if let Some(&p) = positions.iter().find(|&&p| p >= other_len) {
                return Err(AlignmentError::Malformed(format!(
                    "position {p} out of range for {other_len} words"
                )));
            }
            if positions.is_empty() {
                elements.push(AlignmentElement::uniform(other_len));
                wildcarded.push(pos);
            } else {
                elements.push(AlignmentElement::new(positions));
            }
        }
        Ok((Self { elements }, wildcarded))
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn get(&self, pos: usize) -> Option<&AlignmentElement> {
        self.elements.get(pos)
    }

    pub fn elements(&self) -> &[AlignmentElement] {
        &self.elements
    }

    /// Tell every element that the given opposite-side positions were wildcarded.
    pub fn add_wildcard_sources(&mut self, positions: &[usize]) {
        for element in &mut self.elements {
            for &pos in positions {
                element.note_wildcard_source(pos);
            }
        }
    }

    /// Position-wise intersection with another phrase of the same length.
    pub fn set_intersect(&mut self, other: &Self) {
        for (mine, theirs) in self.elements.iter_mut().zip(&other.elements) {
            mine.set_intersect(theirs);
        }
    }

    /// Shift every element by `offset`. On underflow nothing is changed.
    pub fn shift(&mut self, offset: isize) -> Result<(), AlignmentError> {
        let mut shifted = self.elements.clone();
        for element in &mut shifted {
            element.shift(offset)?;
        }
        self.elements = shifted;
        Ok(())
    }
}

impl fmt::Display for AlignmentPhrase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, element) in self.elements.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{element}")?;
        }
        Ok(())
    }
}

/// Source and target alignment of one phrase pair.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AlignmentPair {
    pub source: AlignmentPhrase,
    pub target: AlignmentPhrase,
}

impl AlignmentPair {
    /// Parse both sides of a phrase-table alignment.
    ///
    /// # Errors
    /// `GroupCount` when a side has a different number of groups than tokens,
    /// `Malformed` for anything that is not a parenthesized integer list or
    /// names a position past the end of the other side.
    ///
    /// # Example
    /// ```rust
    /// use phrasecore::AlignmentPair;
    ///
    /// let pair = AlignmentPair::from_spec("(0) ()", "(0) (0)", 2, 2).unwrap();
    /// assert!(pair.source.get(1).unwrap().is_wildcard());
    /// assert_eq!(pair.target.to_string(), "(0) (0)");
    /// ```
    pub fn from_spec(
        source_spec: &str,
        target_spec: &str,
        source_len: usize,
        target_len: usize,
    ) -> Result<Self, AlignmentError> {
        let (mut source, source_wild) =
            AlignmentPhrase::parse(source_spec, Side::Source, source_len, target_len)?;
        let (mut target, target_wild) =
            AlignmentPhrase::parse(target_spec, Side::Target, target_len, source_len)?;

        target.add_wildcard_sources(&source_wild);
        source.add_wildcard_sources(&target_wild);
        Ok(Self { source, target })
    }

    /// Every token of each side aligned to every token of the other.
    pub fn uniform(source_len: usize, target_len: usize) -> Self {
        let source_wild: Vec<usize> = (0..source_len).collect();
        let target_wild: Vec<usize> = (0..target_len).collect();
        let mut source = AlignmentPhrase::new(vec![AlignmentElement::uniform(target_len); source_len]);
        let mut target = AlignmentPhrase::new(vec![AlignmentElement::uniform(source_len); target_len]);
        target.add_wildcard_sources(&source_wild);
        source.add_wildcard_sources(&target_wild);
        Self { source, target }
    }

    /// One source word aligned to one target word.
    pub fn identity() -> Self {
        let mut element = AlignmentElement::default();
        element.set_identity();
        Self {
            source: AlignmentPhrase::new(vec![element.clone()]),
            target: AlignmentPhrase::new(vec![element]),
        }
    }

    pub fn side(&self, side: Side) -> &AlignmentPhrase {
        match side {
            Side::Source => &self.source,
            Side::Target => &self.target,
        }
    }
}

impl fmt::Display for AlignmentPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ||| {}", self.source, self.target)
    }
}

fn split_groups(spec: &str) -> Result<Vec<&str>, AlignmentError> {
    let mut groups = Vec::new();
    let mut rest = spec.trim_start();
    while !rest.is_empty() {
        let body = rest
            .strip_prefix('(')
            .ok_or_else(|| AlignmentError::Malformed(format!("expected '(' at {rest:?}")))?;
        let close = body
            .find(')')
            .ok_or_else(|| AlignmentError::Malformed(format!("unclosed group in {spec:?}")))?;
        groups.push(&body[..close]);
        rest = body[close + 1..].trim_start();
    }
    Ok(groups)
}

fn parse_group(group: &str) -> Result<Vec<usize>, AlignmentError> {
    group
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<usize>()
                .map_err(|_| AlignmentError::Malformed(format!("bad position {s:?}")))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_parse_explicit_groups() {
        let pair = AlignmentPair::from_spec("(0) (2) (1,2)", "(0) (2) (1,2)", 3, 3).unwrap();
        assert_eq!(pair.source.get(2).unwrap(), &AlignmentElement::new([1, 2]));
        assert_eq!(pair.source.to_string(), "(0) (2) (1,2)");
        assert!(pair.source.elements().iter().all(|e| !e.is_wildcard()));
    }

    #[test]
    fn test_empty_group_becomes_wildcard() {
        let pair = AlignmentPair::from_spec("() ", "(0) (0) (0)", 1, 3).unwrap();

        let source = pair.source.get(0).unwrap();
        assert!(source.is_wildcard());
        assert_eq!(source.len(), 3);

        for element in pair.target.elements() {
            assert_eq!(element.wildcard_sources().collect::<Vec<_>>(), vec![0]);
            assert_eq!(element.len(), 1);
        }
        assert_eq!(pair.source.get(0).unwrap().wildcard_sources().count(), 0);
    }

    #[test]
    fn test_target_wildcard_marks_source_elements() {
        let pair = AlignmentPair::from_spec("(0) (1)", "() (0)", 2, 2).unwrap();

        let target = pair.target.get(0).unwrap();
        assert!(target.is_wildcard());
        assert_eq!(target.len(), 2);
        assert!(!pair.target.get(1).unwrap().is_wildcard());

        for element in pair.source.elements() {
            assert_eq!(element.wildcard_sources().collect::<Vec<_>>(), vec![0]);
            assert!(!element.is_wildcard());
        }
        assert_eq!(pair.source.to_string(), "(0) (1)");
        assert!(pair.target.elements().iter().all(|e| e.wildcard_sources().count() == 0));
    }

    #[test]
    fn test_uniform_pair_records_every_partner() {
        let pair = AlignmentPair::uniform(2, 3);
        for element in pair.source.elements() {
            assert_eq!(element.wildcard_sources().collect::<Vec<_>>(), vec![0, 1, 2]);
        }
        for element in pair.target.elements() {
            assert_eq!(element.wildcard_sources().collect::<Vec<_>>(), vec![0, 1]);
        }
    }

    #[test]
    fn test_out_of_range_position() {
        assert!(matches!(
            AlignmentPair::from_spec("(7)", "(0)", 1, 1),
            Err(AlignmentError::Malformed(_))
        ));
        assert!(matches!(
            AlignmentPair::from_spec("(0) (1)", "(0,2) (1)", 2, 2),
            Err(AlignmentError::Malformed(_))
        ));
        assert!(AlignmentPair::from_spec("(0) (1)", "(0,1) (1)", 2, 2).is_ok());
    }

    #[test]
    fn test_group_count_mismatch() {
        let err = AlignmentPair::from_spec("()", "(0)", 1, 3).unwrap_err();
        assert_eq!(
            err,
            AlignmentError::GroupCount {
                side: Side::Target,
                expected: 3,
                found: 1
            }
        );
    }

    #[test]
    fn test_malformed_specs() {
        assert!(matches!(
            AlignmentPair::from_spec("(0", "(0)", 1, 1),
            Err(AlignmentError::Malformed(_))
        ));
        assert!(matches!(
            AlignmentPair::from_spec("(x)", "(0)", 1, 1),
            Err(AlignmentError::Malformed(_))
        ));
        assert!(matches!(
            AlignmentPair::from_spec("0", "(0)", 1, 1),
            Err(AlignmentError::Malformed(_))
        ));
    }

    #[test]
    fn test_intersect() {
        let a = AlignmentElement::new([0, 1, 2]);
        let b = AlignmentElement::new([1, 2, 3]);
        assert_eq!(AlignmentElement::intersect(&a, &b), AlignmentElement::new([1, 2]));

        let mut c = a.clone();
        c.set_intersect(&b);
        assert_eq!(c, AlignmentElement::new([1, 2]));
    }

    #[test]
    fn test_shift() {
        let mut e = AlignmentElement::new([2, 5]);
        e.shift(3).unwrap();
        assert_eq!(e, AlignmentElement::new([5, 8]));

        e.shift(-5).unwrap();
        assert_eq!(e, AlignmentElement::new([0, 3]));

        assert_eq!(
            e.shift(-1),
            Err(AlignmentError::ShiftUnderflow { position: 0, offset: -1 })
        );
        assert_eq!(e, AlignmentElement::new([0, 3]));
    }

    #[test]
    fn test_phrase_set_intersect() {
        let mut a = AlignmentPhrase::new(vec![
            AlignmentElement::new([0, 1]),
            AlignmentElement::uniform(3),
        ]);
        let b = AlignmentPhrase::new(vec![
            AlignmentElement::new([1, 2]),
            AlignmentElement::new([2]),
        ]);
        a.set_intersect(&b);

        assert_eq!(a.to_string(), "(1) (2)");
        assert!(!a.get(1).unwrap().is_wildcard());
    }

    #[test]
    fn test_phrase_shift_is_all_or_nothing() {
        let mut phrase = AlignmentPhrase::new(vec![
            AlignmentElement::new([3]),
            AlignmentElement::new([1, 4]),
        ]);
        phrase.shift(2).unwrap();
        assert_eq!(phrase.to_string(), "(5) (3,6)");

        phrase.shift(-3).unwrap();
        assert_eq!(phrase.to_string(), "(2) (0,3)");

        // The first element could move; the second cannot.
        assert_eq!(
            phrase.shift(-1),
            Err(AlignmentError::ShiftUnderflow { position: 0, offset: -1 })
        );
        assert_eq!(phrase.to_string(), "(2) (0,3)");
    }

    #[test]
    fn test_equality_ignores_wildcard_flag() {
        assert_eq!(AlignmentElement::uniform(3), AlignmentElement::new([0, 1, 2]));
        assert_ne!(AlignmentElement::uniform(2), AlignmentElement::new([0, 1, 2]));
    }

    #[test]
    fn test_identity_and_uniform_pairs() {
        let id = AlignmentPair::identity();
        assert_eq!(id.side(Side::Source).to_string(), "(0)");
        assert_eq!(id.side(Side::Target).to_string(), "(0)");

        let uniform = AlignmentPair::uniform(2, 3);
        assert_eq!(uniform.source.to_string(), "(0,1,2) (0,1,2)");
        assert_eq!(uniform.target.to_string(), "(0,1) (0,1) (0,1)");
    }

    proptest! {
        #[test]
        fn prop_intersection_is_subset_of_both(
            a in proptest::collection::btree_set(0usize..16, 0..8),
            b in proptest::collection::btree_set(0usize..16, 0..8),
        ) {
            let ea = AlignmentElement::new(a.iter().copied());
            let eb = AlignmentElement::new(b.iter().copied());
            let both = AlignmentElement::intersect(&ea, &eb);
            prop_assert_eq!(&both, &AlignmentElement::intersect(&eb, &ea));
            for p in both.positions() {
                prop_assert!(ea.contains(p) && eb.contains(p));
            }
        }
    }
}
