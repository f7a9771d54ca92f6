//! Fingerprinted perfect-hash index from source phrases to dense row ids.
//!
//! The index is built once, offline, over every distinct source phrase of a
//! phrase table. At decode time it answers "which row holds this phrase?" in
//! constant time.
//!
//! # Rejecting unknown phrases
//!
//! The perfect hash in [`crate::mphf`] returns a row for any input. To tell a
//! real hit from an accidental one, every row also stores a 32-bit MurmurHash3
//! fingerprint of the key that owns it. A lookup is accepted only when the
//! fingerprint of the query matches, so a foreign phrase slips through with
//! probability about 2^-32.
//!
//! # File format
//!
//! ```text
//! perfect hash blob | key count: u64 LE | fingerprints: u32 LE * key count
//! ```

use crate::error::IndexError;
use crate::mphf::{read_u32, read_u64, Mphf};
use crate::murmur::murmur3_x86_32;
use std::fmt;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use tempfile::NamedTempFile;

/// Seed of the fingerprint hash. Part of the file format; never change it.
const FINGERPRINT_SEED: u32 = 100_000;

pub type RowId = usize;

/// Lookup key of a phrase: its surface tokens joined by single spaces.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PhraseKey(String);

impl PhraseKey {
    pub fn from_tokens<T: AsRef<str>>(tokens: &[T]) -> Self {
        let mut key = String::new();
        for (i, token) in tokens.iter().enumerate() {
            if i > 0 {
                key.push(' ');
            }
            key.push_str(token.as_ref());
        }
        Self(key)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for PhraseKey {
    fn from(s: &str) -> Self {
        Self::from_tokens(&s.split_whitespace().collect::<Vec<_>>())
    }
}

impl AsRef<[u8]> for PhraseKey {
    fn as_ref(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Display for PhraseKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub fn fingerprint(key: &str) -> u32 {
    murmur3_x86_32(key.as_bytes(), FINGERPRINT_SEED)
}

/// Read-only phrase index. Safe to share between search threads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhraseIndex {
    hash: Mphf,
    fingerprints: Vec<u32>,
}

impl PhraseIndex {
    /// Build the index over `keys`. Row ids are assigned by the perfect hash,
    /// not by input order.
    ///
    /// # Errors
    /// `EmptyKeySet`, `DuplicateKey`, or `Unresolvable` (see [`Mphf::build`]).
    pub fn build<K: AsRef<str>>(keys: &[K]) -> Result<Self, IndexError> {
        let bytes: Vec<&[u8]> = keys.iter().map(|k| k.as_ref().as_bytes()).collect();
        let hash = Mphf::build(&bytes)?;

        let mut fingerprints = vec![0u32; hash.len()];
        for key in keys {
            let key = key.as_ref();
            fingerprints[hash.index(key.as_bytes())] = fingerprint(key);
        }

        tracing::info!(
            target: "phrasecore::index",
            keys = fingerprints.len(),
            "phrase index built"
        );
        Ok(Self { hash, fingerprints })
    }

    /// Row of `key`, or `None` if the key was not in the build set.
    pub fn lookup(&self, key: &str) -> Option<RowId> {
        let row = self.hash.index(key.as_bytes());
        (self.fingerprints[row] == fingerprint(key)).then_some(row)
    }

    pub fn lookup_tokens<T: AsRef<str>>(&self, tokens: &[T]) -> Option<RowId> {
        self.lookup(PhraseKey::from_tokens(tokens).as_str())
    }

    /// Row of `key`, with `len()` standing in for "not found".
    pub fn get_hash(&self, key: &str) -> usize {
        self.lookup(key).unwrap_or(self.len())
    }

    pub fn len(&self) -> usize {
        self.fingerprints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fingerprints.is_empty()
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<(), IndexError> {
        self.hash.write_to(writer)?;
        writer.write_all(&(self.fingerprints.len() as u64).to_le_bytes())?;
        for fp in &self.fingerprints {
            writer.write_all(&fp.to_le_bytes())?;
        }
        Ok(())
    }

    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self, IndexError> {
        let hash = Mphf::read_from(reader)?;
        let count = read_u64(reader)?;
        if count != hash.len() as u64 {
            return Err(IndexError::Corrupt(format!(
                "{count} fingerprints for a perfect hash over {} keys",
                hash.len()
            )));
        }

        let mut fingerprints = Vec::with_capacity(hash.len());
        for _ in 0..count {
            fingerprints.push(read_u32(reader)?);
        }
        Ok(Self { hash, fingerprints })
    }

    /// Write the index to `path`, replacing any existing file atomically.
    pub fn save(&self, path: &Path) -> Result<(), IndexError> {
        let parent_dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(parent_dir)?;

        let mut temp_file = NamedTempFile::new_in(parent_dir)?;
        {
            let mut writer = BufWriter::new(temp_file.as_file_mut());
            self.write_to(&mut writer)?;
            writer.flush()?;
        }
        temp_file.persist(path).map_err(|e| IndexError::Io(e.error))?;

        tracing::info!(
            target: "phrasecore::index",
            path = %path.display(),
            keys = self.len(),
            "phrase index saved"
        );
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, IndexError> {
        let mut reader = BufReader::new(File::open(path)?);
        let index = Self::read_from(&mut reader)?;
        tracing::info!(
            target: "phrasecore::index",
            path = %path.display(),
            keys = index.len(),
            "phrase index loaded"
        );
        Ok(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sample_keys() -> Vec<String> {
        (0..2_000).map(|i| format!("src phrase {i} {}", i * 7)).collect()
    }

    #[test]
    fn test_every_key_is_found() {
        let keys = sample_keys();
        let index = PhraseIndex::build(&keys).unwrap();
        let mut rows: Vec<RowId> = keys.iter().map(|k| index.lookup(k).unwrap()).collect();
        rows.sort_unstable();
        rows.dedup();
        assert_eq!(rows.len(), keys.len());
        assert!(rows.iter().all(|&r| r < index.len()));
    }

    #[test]
    fn test_unknown_keys_rejected() {
        let index = PhraseIndex::build(&sample_keys()).unwrap();
        let false_positives = (0..50_000)
            .map(|i| format!("never inserted {i}"))
            .filter(|k| index.lookup(k).is_some())
            .count();
        assert_eq!(false_positives, 0);
        assert_eq!(index.get_hash("never inserted"), index.len());
    }

    #[test]
    fn test_lookup_tokens_matches_key() {
        let index = PhraseIndex::build(&["das haus", "das", "haus"]).unwrap();
        assert_eq!(index.lookup_tokens(&["das", "haus"]), index.lookup("das haus"));
        assert_eq!(PhraseKey::from("  das   haus ").as_str(), "das haus");
    }

    #[test]
    fn test_build_errors() {
        let empty: Vec<String> = Vec::new();
        assert!(matches!(PhraseIndex::build(&empty), Err(IndexError::EmptyKeySet)));
        assert!(matches!(
            PhraseIndex::build(&["x", "y", "x"]),
            Err(IndexError::DuplicateKey(_))
        ));
    }

    #[test]
    fn test_save_and_load() {
        let keys = sample_keys();
        let index = PhraseIndex::build(&keys).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("phrases.idx");

        index.save(&path).unwrap();
        let loaded = PhraseIndex::load(&path).unwrap();

        assert_eq!(index, loaded);
        for key in &keys {
            assert_eq!(index.lookup(key), loaded.lookup(key));
        }
        for i in 0..1_000 {
            let probe = format!("random probe {i}");
            assert_eq!(index.get_hash(&probe), loaded.get_hash(&probe));
        }
    }

    #[test]
    fn test_truncated_file_is_an_error() {
        let index = PhraseIndex::build(&sample_keys()).unwrap();
        let mut buf = Vec::new();
        index.write_to(&mut buf).unwrap();
        buf.truncate(buf.len() - 3);
        assert!(PhraseIndex::read_from(&mut buf.as_slice()).is_err());
    }

    #[test]
    fn test_fingerprint_count_mismatch() {
        let index = PhraseIndex::build(&["a", "b", "c"]).unwrap();
        let mut buf = Vec::new();
        index.hash.write_to(&mut buf).unwrap();
        buf.extend_from_slice(&7u64.to_le_bytes());
        assert!(matches!(
            PhraseIndex::read_from(&mut buf.as_slice()),
            Err(IndexError::Corrupt(_))
        ));
    }

    proptest! {
        #[test]
        fn prop_build_set_always_resolves(keys in proptest::collection::hash_set("[a-z ]{1,12}", 1..200)) {
            let keys: Vec<String> = keys.into_iter().collect();
            let index = PhraseIndex::build(&keys).unwrap();
            for key in &keys {
                prop_assert!(index.lookup(key).is_some());
            }
        }
    }
}
