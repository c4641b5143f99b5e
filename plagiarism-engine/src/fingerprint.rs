//! Structural fingerprints: normalized text, k-gram FNV-1a hashes, winnowed
//! window minima collected into a set.

use crate::normalize::normalize;
use fnv::FnvHasher;
use std::collections::BTreeSet;
use std::hash::Hasher;

pub const KGRAM_SIZE: usize = 7;
pub const WINNOW_WINDOW: usize = 10;

/// Set of 64-bit hashes summarizing the structural content of one source
/// file. Deterministic for a given input.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Fingerprint {
    hashes: BTreeSet<u64>,
}

impl Fingerprint {
    pub fn len(&self) -> usize {
        self.hashes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }

    pub fn contains(&self, hash: u64) -> bool {
        self.hashes.contains(&hash)
    }

    /// Hashes in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = u64> + '_ {
        self.hashes.iter().copied()
    }
}

impl FromIterator<u64> for Fingerprint {
    fn from_iter<I: IntoIterator<Item = u64>>(iter: I) -> Self {
        Fingerprint {
            hashes: iter.into_iter().collect(),
        }
    }
}

pub fn fingerprint(source: &str) -> Fingerprint {
    let normalized = normalize(source);
    let grams = kgram_hashes(&normalized);
    Fingerprint {
        hashes: winnow(&grams),
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hasher = FnvHasher::default();
    hasher.write(bytes);
    hasher.finish()
}

/// Ordered hash per sliding character window; inputs shorter than the window
/// hash whatever is present.
fn kgram_hashes(text: &str) -> Vec<u64> {
    let chars: Vec<char> = text.chars().collect();
    if chars.is_empty() {
        return Vec::new();
    }
    if chars.len() < KGRAM_SIZE {
        return vec![fnv1a(text.as_bytes())];
    }
    chars
        .windows(KGRAM_SIZE)
        .map(|window| {
            let gram: String = window.iter().collect();
            fnv1a(gram.as_bytes())
        })
        .collect()
}

/// Minimum of each sliding window, deduplicated. Sequences shorter than the
/// window contribute everything.
fn winnow(hashes: &[u64]) -> BTreeSet<u64> {
    if hashes.len() < WINNOW_WINDOW {
        return hashes.iter().copied().collect();
    }
    hashes
        .windows(WINNOW_WINDOW)
        .filter_map(|window| window.iter().copied().min())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SUM_PROGRAM: &str = r#"
#include <iostream>
int main() {
    int a, b;
    std::cin >> a >> b;
    std::cout << a + b << std::endl;
    return 0;
}
"#;

    // Same program with renamed variables, reflowed whitespace, and comments.
    const SUM_PROGRAM_DISGUISED: &str = r#"
#include <iostream>
// reads two numbers
int main()
{
    int first, second; /* operands */
    std::cin >> first >> second;
    std::cout << first + second << std::endl;
    return 0; // done
}
"#;

    const UNRELATED_PROGRAM: &str = r#"
#include <vector>
#include <string>
std::vector<std::string> tokenize(const std::string& line) {
    std::vector<std::string> parts;
    std::string current;
    for (char c : line) {
        if (c == ' ') {
            if (!current.empty()) parts.push_back(current);
            current.clear();
        } else {
            current.push_back(c);
        }
    }
    if (!current.empty()) parts.push_back(current);
    return parts;
}
"#;

    #[test]
    fn deterministic_for_identical_input() {
        assert_eq!(fingerprint(SUM_PROGRAM), fingerprint(SUM_PROGRAM));
    }

    #[test]
    fn robust_to_renames_whitespace_and_comments() {
        assert_eq!(fingerprint(SUM_PROGRAM), fingerprint(SUM_PROGRAM_DISGUISED));
    }

    #[test]
    fn distinct_programs_produce_distinct_fingerprints() {
        let a = fingerprint(SUM_PROGRAM);
        let b = fingerprint(UNRELATED_PROGRAM);
        assert_ne!(a, b);
        let shared = a.iter().filter(|h| b.contains(*h)).count();
        assert!(shared < a.len() * 3 / 4);
    }

    #[test]
    fn empty_source_yields_empty_fingerprint() {
        assert!(fingerprint("").is_empty());
    }

    #[test]
    fn input_shorter_than_kgram_still_fingerprints() {
        let fp = fingerprint("x");
        assert_eq!(fp.len(), 1);
    }

    #[test]
    fn short_hash_sequences_keep_every_hash() {
        // Ten characters of normalized text produce fewer k-grams than one
        // winnowing window, so nothing may be dropped.
        let grams = kgram_hashes("ID OP NUM");
        assert!(grams.len() < WINNOW_WINDOW);
        assert_eq!(winnow(&grams).len(), grams.iter().collect::<BTreeSet<_>>().len());
    }

    #[test]
    fn winnowing_collapses_duplicates_into_a_set() {
        let hashes = vec![5, 4, 3, 2, 1, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11];
        let winnowed = winnow(&hashes);
        assert!(winnowed.len() <= hashes.len() - WINNOW_WINDOW + 1);
        for h in &winnowed {
            assert!(hashes.contains(h));
        }
    }

    #[test]
    fn iter_is_ascending() {
        let fp = fingerprint(SUM_PROGRAM);
        let hashes: Vec<u64> = fp.iter().collect();
        let mut sorted = hashes.clone();
        sorted.sort_unstable();
        assert_eq!(hashes, sorted);
    }
}
