//! Banded locality-sensitive index over fingerprints, one instance per
//! problem. Buckets hold submission ids only; callers resolve ids against
//! the store, so dropping an index loses nothing durable.

use crate::fingerprint::Fingerprint;
use fnv::{FnvHashMap, FnvHasher};
use std::hash::Hasher;

pub const DEFAULT_TABLE_COUNT: usize = 20;
pub const DEFAULT_CANDIDATE_CAP: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Candidate {
    pub submission_id: i64,
    /// Number of tables in which the candidate co-hashed with the query.
    pub votes: u32,
}

#[derive(Debug)]
pub struct LshIndex {
    tables: Vec<FnvHashMap<u64, Vec<i64>>>,
    candidate_cap: usize,
}

impl LshIndex {
    pub fn new(table_count: usize) -> Self {
        Self::with_candidate_cap(table_count, DEFAULT_CANDIDATE_CAP)
    }

    pub fn with_candidate_cap(table_count: usize, candidate_cap: usize) -> Self {
        LshIndex {
            tables: (0..table_count.max(1)).map(|_| FnvHashMap::default()).collect(),
            candidate_cap,
        }
    }

    pub fn table_count(&self) -> usize {
        self.tables.len()
    }

    /// Re-adding an id is tolerated: duplicate bucket entries only inflate
    /// vote counts uniformly.
    pub fn add(&mut self, submission_id: i64, fingerprint: &Fingerprint) {
        for (table, band_hash) in band_hashes(fingerprint, self.tables.len()).into_iter().enumerate()
        {
            self.tables[table]
                .entry(band_hash)
                .or_default()
                .push(submission_id);
        }
    }

    /// Ids sharing at least one band with the query, ordered by descending
    /// vote count, capped. A single vote is enough; exact scoring decides.
    pub fn candidates(&self, fingerprint: &Fingerprint) -> Vec<Candidate> {
        let mut votes: FnvHashMap<i64, u32> = FnvHashMap::default();
        for (table, band_hash) in band_hashes(fingerprint, self.tables.len()).into_iter().enumerate()
        {
            if let Some(bucket) = self.tables[table].get(&band_hash) {
                for id in bucket {
                    *votes.entry(*id).or_insert(0) += 1;
                }
            }
        }

        let mut candidates: Vec<Candidate> = votes
            .into_iter()
            .map(|(submission_id, votes)| Candidate {
                submission_id,
                votes,
            })
            .collect();
        candidates.sort_by(|a, b| {
            b.votes
                .cmp(&a.votes)
                .then(a.submission_id.cmp(&b.submission_id))
        });
        candidates.truncate(self.candidate_cap);
        candidates
    }
}

/// Partition the ascending hash list into contiguous bands, one per table,
/// the last band absorbing the remainder. Fingerprints smaller than the
/// table count fill fewer tables with single-element bands.
fn band_hashes(fingerprint: &Fingerprint, table_count: usize) -> Vec<u64> {
    let sorted: Vec<u64> = fingerprint.iter().collect();
    if sorted.is_empty() || table_count == 0 {
        return Vec::new();
    }

    let bands = table_count.min(sorted.len());
    let band_size = sorted.len() / bands;
    let mut hashes = Vec::with_capacity(bands);
    let mut start = 0;
    for band in 0..bands {
        let end = if band == bands - 1 {
            sorted.len()
        } else {
            start + band_size
        };
        let mut hasher = FnvHasher::default();
        for value in &sorted[start..end] {
            hasher.write(&value.to_le_bytes());
        }
        hashes.push(hasher.finish());
        start = end;
    }
    hashes
}
