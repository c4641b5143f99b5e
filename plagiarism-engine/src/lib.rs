pub mod cache;
pub mod fingerprint;
pub mod lsh;
pub mod normalize;
pub mod similarity;

pub use cache::FingerprintCache;
pub use fingerprint::{fingerprint, Fingerprint, KGRAM_SIZE, WINNOW_WINDOW};
pub use lsh::{Candidate, LshIndex, DEFAULT_CANDIDATE_CAP, DEFAULT_TABLE_COUNT};
pub use similarity::{score, Similarity};
