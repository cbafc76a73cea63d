//! Cached schema resolution (§4.B).
//!
//! `SchemaSource` is the out-of-scope registration/storage path (creating
//! bars and steps); `CachedRegistry` is the in-core facade every other
//! component resolves schemas through. The cache shape — a `HashMap` keyed
//! by lookup key, hit/miss counters, explicit `invalidate` — mirrors a
//! simple TTL-free lookaside cache.

use async_trait::async_trait;
use pbars_errors::PbarsError;
use std::collections::HashMap;
use std::sync::RwLock;

use crate::model::BarSchema;

/// The out-of-scope source of truth: durable-store-backed bar/step CRUD.
/// Implementors are expected to invalidate a `CachedRegistry`'s entry in the
/// same transaction as any write, per §4.B.
#[async_trait]
pub trait SchemaSource: Send + Sync {
    async fn fetch(&self, owner: &str, bar_name: &str) -> Result<BarSchema, PbarsError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub invalidations: u64,
}

impl CacheStats {
    #[must_use]
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Resolves `(owner, bar_name) -> BarSchema`, caching the result until an
/// explicit [`CachedRegistry::invalidate`] call (or a version mismatch
/// observed by a caller, which should also call `invalidate`).
pub struct CachedRegistry<S: SchemaSource> {
    source: S,
    cache: RwLock<HashMap<(String, String), BarSchema>>,
    /// Every version ever resolved in this process, retained indefinitely so
    /// an in-flight trace pinned to an older version can keep resolving it
    /// after the bar is republished (§4.B, §4.C).
    versions: RwLock<HashMap<(String, String, u64), BarSchema>>,
    stats: RwLock<CacheStats>,
}

impl<S: SchemaSource> CachedRegistry<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            cache: RwLock::new(HashMap::new()),
            versions: RwLock::new(HashMap::new()),
            stats: RwLock::new(CacheStats::default()),
        }
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        *self.stats.read().expect("cache stats lock poisoned")
    }

    pub fn invalidate(&self, owner: &str, bar_name: &str) {
        let mut cache = self.cache.write().expect("cache lock poisoned");
        if cache.remove(&(owner.to_string(), bar_name.to_string())).is_some() {
            self.stats.write().expect("cache stats lock poisoned").invalidations += 1;
        }
    }

    pub async fn resolve(&self, owner: &str, bar_name: &str) -> Result<BarSchema, PbarsError> {
        let key = (owner.to_string(), bar_name.to_string());
        if let Some(schema) = self.cache.read().expect("cache lock poisoned").get(&key) {
            self.stats.write().expect("cache stats lock poisoned").hits += 1;
            return Ok(schema.clone());
        }

        self.stats.write().expect("cache stats lock poisoned").misses += 1;
        let schema = self.source.fetch(owner, bar_name).await?;
        self.cache
            .write()
            .expect("cache lock poisoned")
            .insert(key, schema.clone());
        self.versions
            .write()
            .expect("cache lock poisoned")
            .insert((owner.to_string(), bar_name.to_string(), schema.version), schema.clone());
        Ok(schema)
    }

    /// Resolves a specific historical version, for a trace pinned to the
    /// version it first observed (§4.B, §4.C). Falls back to a fresh fetch
    /// only to check whether the current version happens to match; it never
    /// returns a version other than the one requested.
    pub async fn resolve_pinned(&self, owner: &str, bar_name: &str, version: u64) -> Result<BarSchema, PbarsError> {
        let vkey = (owner.to_string(), bar_name.to_string(), version);
        if let Some(schema) = self.versions.read().expect("cache lock poisoned").get(&vkey) {
            return Ok(schema.clone());
        }

        let current = self.resolve(owner, bar_name).await?;
        if current.version == version {
            return Ok(current);
        }
        Err(PbarsError::Internal(format!(
            "schema version {version} for {owner}/{bar_name} is no longer resolvable"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{SamplingConfig, SamplingTechnique, StepSpec, Technique};
    use pbars_ids::{BarId, IdGenerator};
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingSource {
        fetches: AtomicU32,
        r#gen: IdGenerator,
    }

    #[async_trait]
    impl SchemaSource for CountingSource {
        async fn fetch(&self, owner: &str, bar_name: &str) -> Result<BarSchema, PbarsError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            let default_spec =
                StepSpec::new(0, "default", false, Technique::ArithmeticMean).unwrap();
            Ok(BarSchema::new(
                BarId(self.r#gen.next()),
                owner,
                bar_name,
                1,
                SamplingConfig {
                    max_count: 10,
                    max_age_seconds: None,
                    technique: SamplingTechnique::Systematic,
                },
                3600.0,
                default_spec,
                vec![],
            )
            .unwrap())
        }
    }

    #[tokio::test]
    async fn resolves_from_cache_after_first_miss() {
        let registry = CachedRegistry::new(CountingSource {
            fetches: AtomicU32::new(0),
            r#gen: IdGenerator::new(),
        });

        registry.resolve("alice", "build").await.unwrap();
        registry.resolve("alice", "build").await.unwrap();
        assert_eq!(registry.source.fetches.load(Ordering::SeqCst), 1);
        assert_eq!(registry.stats().hits, 1);
        assert_eq!(registry.stats().misses, 1);
    }

    #[tokio::test]
    async fn invalidate_forces_refetch() {
        let registry = CachedRegistry::new(CountingSource {
            fetches: AtomicU32::new(0),
            r#gen: IdGenerator::new(),
        });

        registry.resolve("alice", "build").await.unwrap();
        registry.invalidate("alice", "build");
        registry.resolve("alice", "build").await.unwrap();
        assert_eq!(registry.source.fetches.load(Ordering::SeqCst), 2);
    }
}
