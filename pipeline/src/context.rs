//! The long-lived collaborators, built once at boot and shared by reference.
//! Workers never mutate module state; everything they need hangs off this
//! context.

use crate::config::Config;
use crate::database::Database;
use crate::queue::Queue;
use anyhow::{Context, Result};
use dashmap::DashMap;
use judge_engine::{Credentials, Language, SandboxConfig};
use plagiarism_engine::{FingerprintCache, LshIndex};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

pub struct AppContext {
    pub config: Config,
    pub db: Database,
    pub queue: Queue,
    pub fingerprints: FingerprintCache,
    pub lsh: LshRegistry,
    pub judge_config: SandboxConfig,
}

impl AppContext {
    pub fn new(config: Config, db: Database, queue: Queue) -> Result<Self> {
        let judge_config = SandboxConfig {
            time_limit: Duration::from_secs(config.time_limit_seconds),
            memory_limit_mb: config.memory_limit_mb,
            run_as: resolve_judge_user(&config.judge_user)?,
            ..SandboxConfig::default()
        };
        let fingerprints = FingerprintCache::new(config.fp_cache_max_entries, config.fp_cache_ttl);
        let lsh = LshRegistry::new(config.lsh_tables);
        tracing::debug!(
            tables = config.lsh_tables,
            band_size_hint = config.lsh_band_size_hint,
            "similarity index configured; band size follows fingerprint size"
        );

        Ok(AppContext {
            config,
            db,
            queue,
            fingerprints,
            lsh,
            judge_config,
        })
    }

    pub fn language(&self) -> &Language {
        &self.judge_config.language
    }
}

fn resolve_judge_user(name: &str) -> Result<Option<Credentials>> {
    match nix::unistd::User::from_name(name) {
        Ok(Some(user)) => Ok(Some(Credentials {
            uid: user.uid,
            gid: user.gid,
        })),
        Ok(None) => {
            tracing::warn!(
                "judge user '{name}' not found; children keep the daemon's credentials"
            );
            Ok(None)
        }
        Err(err) => Err(err).context("resolving judge user"),
    }
}

/// Per-problem similarity indexes, created on first touch. The mutex covers
/// both the lazy build and incremental updates, so extra plagiarism workers
/// stay correct.
pub struct LshRegistry {
    table_count: usize,
    indexes: DashMap<i64, Arc<Mutex<ProblemIndex>>>,
}

pub struct ProblemIndex {
    pub initialized: bool,
    pub index: LshIndex,
}

impl LshRegistry {
    pub fn new(table_count: usize) -> Self {
        LshRegistry {
            table_count,
            indexes: DashMap::new(),
        }
    }

    pub fn for_problem(&self, problem_id: i64) -> Arc<Mutex<ProblemIndex>> {
        self.indexes
            .entry(problem_id)
            .or_insert_with(|| {
                Arc::new(Mutex::new(ProblemIndex {
                    initialized: false,
                    index: LshIndex::new(self.table_count),
                }))
            })
            .clone()
    }

    pub fn problem_count(&self) -> usize {
        self.indexes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_hands_out_one_index_per_problem() {
        let registry = LshRegistry::new(8);
        let first = registry.for_problem(1);
        let again = registry.for_problem(1);
        let other = registry.for_problem(2);

        assert!(Arc::ptr_eq(&first, &again));
        assert!(!Arc::ptr_eq(&first, &other));
        assert_eq!(registry.problem_count(), 2);
    }

    #[test]
    fn fresh_indexes_await_lazy_initialization() {
        let registry = LshRegistry::new(8);
        let handle = registry.for_problem(5);
        let guard = handle.try_lock().expect("uncontended");
        assert!(!guard.initialized);
        assert_eq!(guard.index.table_count(), 8);
    }
}
