//! Text phrase tables and the candidates they produce.
//!
//! One entry per line:
//!
//! ```text
//! das haus ||| the house ||| (0) (1) ||| (0) (1) ||| 0.8 0.5 0.7 0.4 2.718
//! ```
//!
//! Fields are source phrase, target phrase, source alignment, target
//! alignment and translation probabilities. The two alignment fields may be
//! left out together, in which case every word is aligned to every word of
//! the other side. Every entry must carry the same number of scores.

use crate::alignment::AlignmentPair;
use crate::error::PhraseTableError;
use crate::oracle::protocol::floor_score;
use crate::phrase::{Phrase, TargetPhrase};
use crate::phrase_index::{PhraseIndex, PhraseKey};
use ahash::AHashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

const FIELD_SEPARATOR: &str = "|||";

/// One translation option as stored in the table.
#[derive(Debug, Clone, PartialEq)]
pub struct PhraseTableEntry {
    source_len: usize,
    target: Phrase,
    alignment: AlignmentPair,
    scores: Vec<f32>,
}

impl PhraseTableEntry {
    pub fn source_len(&self) -> usize {
        self.source_len
    }

    pub fn target(&self) -> &Phrase {
        &self.target
    }

    pub fn alignment(&self) -> &AlignmentPair {
        &self.alignment
    }

    /// Probabilities as written in the table.
    pub fn scores(&self) -> &[f32] {
        &self.scores
    }

    /// Log-domain score components, floored.
    pub fn components(&self) -> Vec<f32> {
        self.scores.iter().map(|p| floor_score(p.ln())).collect()
    }

    /// A fresh, unscored candidate for this entry.
    pub fn materialize(&self) -> TargetPhrase {
        TargetPhrase::new(self.target.clone(), self.alignment.clone())
    }
}

#[derive(Debug, Clone)]
pub struct PhraseTable {
    index: PhraseIndex,
    rows: Vec<Vec<PhraseTableEntry>>,
    num_components: usize,
}

impl PhraseTable {
    pub fn from_path(path: &Path) -> Result<Self, PhraseTableError> {
        let table = Self::from_reader(BufReader::new(File::open(path)?))?;
        tracing::info!(
            target: "phrasecore::table",
            path = %path.display(),
            sources = table.index.len(),
            "phrase table loaded"
        );
        Ok(table)
    }

    /// Parse a whole table. Any malformed line fails the load.
    pub fn from_reader<R: BufRead>(reader: R) -> Result<Self, PhraseTableError> {
        let mut sources: Vec<PhraseKey> = Vec::new();
        let mut groups: AHashMap<PhraseKey, Vec<PhraseTableEntry>> = AHashMap::new();
        let mut num_components = None;
        let mut entries = 0usize;

        for (i, line) in reader.lines().enumerate() {
            let line_no = i + 1;
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }

            let (key, entry) = parse_line(&line, line_no)?;
            match num_components {
                None => num_components = Some(entry.scores.len()),
                Some(n) if n != entry.scores.len() => {
                    return Err(PhraseTableError::Format {
                        line: line_no,
                        reason: format!("{} scores, expected {n}", entry.scores.len()),
                    })
                }
                Some(_) => {}
            }

            entries += 1;
            groups
                .entry(key)
                .or_insert_with_key(|key| {
                    sources.push(key.clone());
                    Vec::new()
                })
                .push(entry);
        }

        let keys: Vec<&str> = sources.iter().map(PhraseKey::as_str).collect();
        let index = PhraseIndex::build(&keys)?;

        let mut rows = vec![Vec::new(); index.len()];
        for (key, group) in groups {
            // Every build key resolves to its own row.
            if let Some(row) = index.lookup(key.as_str()) {
                rows[row] = group;
            }
        }

        tracing::debug!(
            target: "phrasecore::table",
            entries,
            sources = index.len(),
            "phrase table parsed"
        );
        Ok(Self {
            index,
            rows,
            num_components: num_components.unwrap_or(0),
        })
    }

    /// Translation options for a source phrase; empty if it is not in the table.
    ///
    /// # Arguments
    /// * `source` - Source tokens, matched exactly against the indexed phrases
    ///
    /// # Example
    /// ```rust
    /// use phrasecore::PhraseTable;
    ///
    /// let table = PhraseTable::from_reader("das haus ||| the house ||| 0.8\n".as_bytes()).unwrap();
    /// let entries = table.translations(&["das", "haus"]);
    /// assert_eq!(entries[0].target().to_string(), "the house");
    /// assert!(table.translations(&["haus"]).is_empty());
    /// ```
    pub fn translations<T: AsRef<str>>(&self, source: &[T]) -> &[PhraseTableEntry] {
        match self.index.lookup_tokens(source) {
            Some(row) => &self.rows[row],
            None => &[],
        }
    }

    pub fn index(&self) -> &PhraseIndex {
        &self.index
    }

    /// Scores carried by every entry.
    pub fn num_components(&self) -> usize {
        self.num_components
    }

    pub fn num_sources(&self) -> usize {
        self.rows.len()
    }
}

fn parse_line(line: &str, line_no: usize) -> Result<(PhraseKey, PhraseTableEntry), PhraseTableError> {
    let format_err = |reason: &str| PhraseTableError::Format {
        line: line_no,
        reason: reason.to_string(),
    };

    let fields: Vec<&str> = line.split(FIELD_SEPARATOR).map(str::trim).collect();
    let (source, target, align, scores) = match fields.as_slice() {
        [source, target, scores] => (*source, *target, None, *scores),
        [source, target, salign, talign, scores] => (*source, *target, Some((*salign, *talign)), *scores),
        _ => return Err(format_err("expected 3 or 5 fields")),
    };

    let source_tokens: Vec<&str> = source.split_whitespace().collect();
    if source_tokens.is_empty() {
        return Err(format_err("empty source phrase"));
    }
    let target = Phrase::parse(target);
    if target.is_empty() {
        return Err(format_err("empty target phrase"));
    }

    let alignment = match align {
        Some((salign, talign)) => {
            AlignmentPair::from_spec(salign, talign, source_tokens.len(), target.len())
                .map_err(|source| PhraseTableError::Alignment {
                    line: line_no,
                    source,
                })?
        }
        None => AlignmentPair::uniform(source_tokens.len(), target.len()),
    };

    let scores = scores
        .split_whitespace()
        .map(|s| s.parse::<f32>())
        .collect::<Result<Vec<f32>, _>>()
        .map_err(|e| format_err(&format!("bad score: {e}")))?;
    if scores.is_empty() {
        return Err(format_err("no scores"));
    }

    let entry = PhraseTableEntry {
        source_len: source_tokens.len(),
        target,
        alignment,
        scores,
    };
    Ok((PhraseKey::from_tokens(&source_tokens), entry))
}
