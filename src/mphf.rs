//! Minimal perfect hash function over a static key set.
//!
//! # Construction
//!
//! Hash-and-displace: every key is hashed to 64 bits and assigned to one of
//! `ceil(n / 4)` buckets. Buckets are processed largest first; for each one we
//! search for the smallest *pilot* value that sends all of the bucket's keys to
//! free, distinct slots in `0..n`. Only the pilots are stored, so a query costs
//! two hashes and one array read.
//!
//! A perfect hash has no membership test: any string maps to *some* slot.
//! Rejecting foreign keys is the job of the fingerprints kept by
//! [`crate::phrase_index::PhraseIndex`].
//!
//! # Blob layout
//!
//! ```text
//! magic "PHF1" | seed: u32 | key count: u64 | bucket count: u64 | pilots: u32 * buckets
//! ```
//! All integers little-endian.

use crate::error::IndexError;
use crate::murmur::murmur3_x86_32;
use std::io::{Read, Write};

const MAGIC: &[u8; 4] = b"PHF1";
/// Average number of keys per bucket.
const KEYS_PER_BUCKET: usize = 4;
/// Number of global seeds tried before giving up.
const MAX_SEED_ATTEMPTS: u32 = 16;
const SECOND_SEED_SALT: u32 = 0x5bd1_e995;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mphf {
    seed: u32,
    len: u64,
    pilots: Vec<u32>,
}

enum Retry {
    NextSeed,
    Duplicate(usize),
}

impl Mphf {
    /// Build a perfect hash for `keys`, mapping them onto `0..keys.len()`.
    ///
    /// # Errors
    /// - `EmptyKeySet` when `keys` is empty
    /// - `DuplicateKey` when a key appears twice
    /// - `Unresolvable` when no seed produced a valid assignment
    pub fn build<K: AsRef<[u8]>>(keys: &[K]) -> Result<Self, IndexError> {
        if keys.is_empty() {
            return Err(IndexError::EmptyKeySet);
        }

        for attempt in 0..MAX_SEED_ATTEMPTS {
            let seed = splitmix64(u64::from(attempt)) as u32;
            match Self::try_build(keys, seed) {
                Ok(mphf) => {
                    tracing::debug!(
                        target: "phrasecore::mphf",
                        keys = keys.len(),
                        buckets = mphf.pilots.len(),
                        attempt,
                        "perfect hash built"
                    );
                    return Ok(mphf);
                }
                Err(Retry::NextSeed) => {
                    tracing::debug!(target: "phrasecore::mphf", attempt, "seed rejected, retrying");
                }
                Err(Retry::Duplicate(i)) => {
                    let key = String::from_utf8_lossy(keys[i].as_ref()).into_owned();
                    return Err(IndexError::DuplicateKey(key));
                }
            }
        }

        Err(IndexError::Unresolvable {
            attempts: MAX_SEED_ATTEMPTS,
        })
    }

    fn try_build<K: AsRef<[u8]>>(keys: &[K], seed: u32) -> Result<Self, Retry> {
        let n = keys.len();
        let bucket_count = bucket_count_for(n);
        let hashes: Vec<u64> = keys.iter().map(|k| key_hash(k.as_ref(), seed)).collect();

        let mut buckets: Vec<Vec<usize>> = vec![Vec::new(); bucket_count];
        for (i, &h) in hashes.iter().enumerate() {
            buckets[bucket_of(h, bucket_count)].push(i);
        }

        // Identical 64-bit hashes can never be displaced apart.
        for members in &buckets {
            for (a_pos, &a) in members.iter().enumerate() {
                for &b in &members[a_pos + 1..] {
                    if hashes[a] == hashes[b] {
                        if keys[a].as_ref() == keys[b].as_ref() {
                            return Err(Retry::Duplicate(b));
                        }
                        return Err(Retry::NextSeed);
                    }
                }
            }
        }

        let mut order: Vec<usize> = (0..bucket_count).collect();
        order.sort_by(|&a, &b| buckets[b].len().cmp(&buckets[a].len()).then(a.cmp(&b)));

        let pilot_limit = u32::try_from((n as u64).saturating_mul(64).max(1 << 20)).unwrap_or(u32::MAX);
        let mut taken = vec![false; n];
        let mut pilots = vec![0u32; bucket_count];
        let mut slots: Vec<usize> = Vec::with_capacity(KEYS_PER_BUCKET * 4);

        for b in order {
            let members = &buckets[b];
            if members.is_empty() {
                break;
            }

            let mut placed = false;
            'pilot: for pilot in 0..pilot_limit {
                slots.clear();
                for &k in members {
                    let slot = slot_of(hashes[k], pilot, n as u64);
                    if taken[slot] || slots.contains(&slot) {
                        continue 'pilot;
                    }
                    slots.push(slot);
                }
                for &slot in &slots {
                    taken[slot] = true;
                }
                pilots[b] = pilot;
                placed = true;
                break;
            }

            if !placed {
                return Err(Retry::NextSeed);
            }
        }

        Ok(Self {
            seed,
            len: n as u64,
            pilots,
        })
    }

    /// Slot for `key`. Always in `0..len()`, whether or not `key` was in the build set.
    pub fn index(&self, key: &[u8]) -> usize {
        let h = key_hash(key, self.seed);
        let pilot = self.pilots[bucket_of(h, self.pilots.len())];
        slot_of(h, pilot, self.len)
    }

    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<(), IndexError> {
        writer.write_all(MAGIC)?;
        writer.write_all(&self.seed.to_le_bytes())?;
        writer.write_all(&self.len.to_le_bytes())?;
        writer.write_all(&(self.pilots.len() as u64).to_le_bytes())?;
        for pilot in &self.pilots {
            writer.write_all(&pilot.to_le_bytes())?;
        }
        Ok(())
    }

    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self, IndexError> {
        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        if &magic != MAGIC {
            return Err(IndexError::Corrupt("bad perfect hash magic".to_string()));
        }

        let seed = read_u32(reader)?;
        let len = read_u64(reader)?;
        let bucket_count = read_u64(reader)?;
        if len == 0 {
            return Err(IndexError::Corrupt("perfect hash over zero keys".to_string()));
        }
        let expected = usize::try_from(len)
            .map(bucket_count_for)
            .map_err(|_| IndexError::Corrupt(format!("key count {len} too large")))?;
        if bucket_count != expected as u64 {
            return Err(IndexError::Corrupt(format!(
                "{bucket_count} buckets for {len} keys, expected {expected}"
            )));
        }

        let mut pilots = Vec::new();
        for _ in 0..bucket_count {
            pilots.push(read_u32(reader)?);
        }

        Ok(Self { seed, len, pilots })
    }
}

fn bucket_count_for(n: usize) -> usize {
    n.div_ceil(KEYS_PER_BUCKET).max(1)
}

fn key_hash(key: &[u8], seed: u32) -> u64 {
    let hi = murmur3_x86_32(key, seed);
    let lo = murmur3_x86_32(key, seed ^ SECOND_SEED_SALT);
    (u64::from(hi) << 32) | u64::from(lo)
}

fn bucket_of(hash: u64, bucket_count: usize) -> usize {
    ((hash >> 32) % bucket_count as u64) as usize
}

fn slot_of(hash: u64, pilot: u32, len: u64) -> usize {
    (splitmix64(hash ^ splitmix64(u64::from(pilot))) % len) as usize
}

fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9e37_79b9_7f4a_7c15);
    x = (x ^ (x >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    x ^ (x >> 31)
}

pub(crate) fn read_u32<R: Read>(reader: &mut R) -> Result<u32, IndexError> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

pub(crate) fn read_u64<R: Read>(reader: &mut R) -> Result<u64, IndexError> {
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}
