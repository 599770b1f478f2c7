//! Generic versioned cache entries.
//!
//! Every device-level cache is a [`ResourceCache`] over one [`Cached`]
//! resource type. The entry contract is implemented once here:
//!
//! | Operation | Meaning |
//! |-----------|---------|
//! | `mark_used` | Stamp the last-use time and check source liveness |
//! | `is_stale` | Failed, invalidated, source dropped, or unused beyond the threshold |
//! | `needs_update` | Never built, or built from a different version |
//! | `update` | Destroy the old native object, then build the new one |
//!
//! A lookup that misses inserts an empty entry and builds it. A hit whose
//! version changed rebuilds in place; the entry's [`CacheKey`] never changes,
//! so dependents holding only the key stay valid.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use super::key::CacheKey;
use crate::backend::GpuDevice;
use crate::description::LivenessWatch;
use crate::errors::{CacheError, ResourceKind, Result};

static NEXT_BUILD_ID: AtomicU64 = AtomicU64::new(1);

/// A native resource built from a source description.
pub trait Cached<D: GpuDevice>: Sized {
    /// Borrowed build inputs.
    type Source<'a>;

    const KIND: ResourceKind;

    /// Description-level checks. A failure aborts the lookup without
    /// touching the cache.
    fn validate(_device: &D, _source: &Self::Source<'_>) -> Result<()> {
        Ok(())
    }

    fn build(device: &D, label: &str, source: &Self::Source<'_>) -> Result<Self>;

    fn destroy(self, device: &D);
}

/// Per-cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub rebuilds: u64,
    pub failures: u64,
    pub evictions: u64,
}

impl std::ops::AddAssign for CacheStats {
    fn add_assign(&mut self, rhs: Self) {
        self.hits += rhs.hits;
        self.misses += rhs.misses;
        self.rebuilds += rhs.rebuilds;
        self.failures += rhs.failures;
        self.evictions += rhs.evictions;
    }
}

/// Identity and version of a cached object, as handed to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CachedRef {
    pub key: CacheKey,
    /// Version the native object was built from.
    pub version: u64,
}

/// What a lookup knows about the source and its dependencies.
pub struct Lookup<'a> {
    pub key: CacheKey,
    pub label: &'a str,
    /// Id of the description the entry is built from.
    pub source_id: u64,
    pub version: u64,
    pub watches: SmallVec<[LivenessWatch; 3]>,
    pub depends_on: SmallVec<[CacheKey; 2]>,
}

/// One cache entry.
pub struct VersionedEntry<R> {
    key: CacheKey,
    label: String,
    source_id: u64,
    /// Version of the last successful build.
    version: Option<u64>,
    /// Version whose build failed; not retried until the version changes.
    failed_version: Option<u64>,
    last_used: Duration,
    resource: Option<R>,
    watches: SmallVec<[LivenessWatch; 3]>,
    depends_on: SmallVec<[CacheKey; 2]>,
    invalidated: bool,
    build_count: u64,
    /// Process-unique id of the current build, 0 before the first.
    build_id: u64,
}

impl<R> VersionedEntry<R> {
    fn new(lookup: &Lookup<'_>, now: Duration) -> Self {
        Self {
            key: lookup.key,
            label: lookup.label.to_string(),
            source_id: lookup.source_id,
            version: None,
            failed_version: None,
            last_used: now,
            resource: None,
            watches: SmallVec::new(),
            depends_on: SmallVec::new(),
            invalidated: false,
            build_count: 0,
            build_id: 0,
        }
    }

    /// Stamps use at `now`. An expired source marks the entry invalidated.
    pub fn mark_used(&mut self, now: Duration) {
        self.last_used = self.last_used.max(now);
        if !self.sources_alive() {
            self.invalidated = true;
        }
    }

    fn sources_alive(&self) -> bool {
        self.watches.iter().all(LivenessWatch::is_alive)
    }

    /// Purge eligibility at `now`.
    #[must_use]
    pub fn is_stale(&self, now: Duration, threshold: Duration) -> bool {
        self.invalidated
            || self.resource.is_none()
            || !self.sources_alive()
            || now.saturating_sub(self.last_used) > threshold
    }

    #[must_use]
    pub fn needs_update(&self, version: u64) -> bool {
        self.resource.is_none() || self.version != Some(version)
    }

    /// Destroy-then-rebuild. On failure the entry is left empty and
    /// remembers the failed version.
    pub fn update<D: GpuDevice>(
        &mut self,
        device: &D,
        source: &<R as Cached<D>>::Source<'_>,
        version: u64,
    ) -> Result<()>
    where
        R: Cached<D>,
    {
        if let Some(old) = self.resource.take() {
            old.destroy(device);
        }
        self.version = None;

        match R::build(device, &self.label, source) {
            Ok(resource) => {
                self.resource = Some(resource);
                self.version = Some(version);
                self.failed_version = None;
                self.build_count += 1;
                self.build_id = NEXT_BUILD_ID.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(e) => {
                log::error!("{} '{}' ({}) failed to build: {e}", R::KIND, self.label, self.key);
                self.failed_version = Some(version);
                Err(e)
            }
        }
    }

    #[must_use]
    pub fn key(&self) -> CacheKey {
        self.key
    }

    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    #[must_use]
    pub fn source_id(&self) -> u64 {
        self.source_id
    }

    #[must_use]
    pub fn version(&self) -> Option<u64> {
        self.version
    }

    #[must_use]
    pub fn last_used(&self) -> Duration {
        self.last_used
    }

    #[must_use]
    pub fn resource(&self) -> Option<&R> {
        self.resource.as_ref()
    }

    #[must_use]
    pub fn depends_on(&self) -> &[CacheKey] {
        &self.depends_on
    }

    /// Number of successful builds. Changes on every rebuild.
    #[must_use]
    pub fn build_count(&self) -> u64 {
        self.build_count
    }

    /// Identity of the current native object. Unlike the key, it changes on
    /// every rebuild and is never reused, even after the entry is removed.
    #[must_use]
    pub fn build_id(&self) -> u64 {
        self.build_id
    }

    #[must_use]
    pub fn is_invalidated(&self) -> bool {
        self.invalidated
    }

    /// Handle to the current build. `None` if the entry is unusable.
    #[must_use]
    pub fn cached_ref(&self) -> Option<CachedRef> {
        self.version.filter(|_| self.resource.is_some()).map(|version| CachedRef {
            key: self.key,
            version,
        })
    }
}

/// Map of versioned entries with hit/miss accounting.
pub struct ResourceCache<R> {
    entries: FxHashMap<CacheKey, VersionedEntry<R>>,
    stats: CacheStats,
}

impl<R> Default for ResourceCache<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R> ResourceCache<R> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: FxHashMap::default(),
            stats: CacheStats::default(),
        }
    }

    /// Looks up `lookup.key`, building or rebuilding the entry as needed.
    pub fn get_or_create<D: GpuDevice>(
        &mut self,
        device: &D,
        lookup: Lookup<'_>,
        source: &<R as Cached<D>>::Source<'_>,
        now: Duration,
    ) -> Result<CachedRef>
    where
        R: Cached<D>,
    {
        R::validate(device, source)?;

        let stats = &mut self.stats;
        let entry = self.entries.entry(lookup.key).or_insert_with(|| {
            stats.misses += 1;
            log::debug!("{} cache miss: '{}' ({})", R::KIND, lookup.label, lookup.key);
            VersionedEntry::new(&lookup, now)
        });
        if entry.build_count > 0 || entry.failed_version.is_some() {
            stats.hits += 1;
        }

        entry.source_id = lookup.source_id;
        entry.watches = lookup.watches;
        entry.depends_on = lookup.depends_on;
        entry.mark_used(now);

        if entry.invalidated {
            // Looked up again after invalidation: the sources are alive, rebuild.
            if entry.sources_alive() {
                entry.invalidated = false;
                entry.version = None;
            } else {
                return Err(CacheError::incompatible(format!(
                    "{} '{}' depends on a dropped description",
                    R::KIND,
                    entry.label
                )));
            }
        }

        if entry.failed_version == Some(lookup.version) {
            return Err(CacheError::build(R::KIND, &entry.label, "previous build of this version failed"));
        }

        if entry.needs_update(lookup.version) {
            if entry.build_count > 0 {
                stats.rebuilds += 1;
                log::debug!("{} '{}' ({}) rebuilt at version {}", R::KIND, entry.label, entry.key, lookup.version);
            }
            if let Err(e) = entry.update(device, source, lookup.version) {
                stats.failures += 1;
                return Err(e);
            }
        }

        entry.cached_ref().ok_or(CacheError::UnknownEntry {
            kind: R::KIND,
            key: lookup.key,
        })
    }

    #[must_use]
    pub fn get(&self, key: CacheKey) -> Option<&VersionedEntry<R>> {
        self.entries.get(&key)
    }

    /// The built resource behind `key`, if usable.
    #[must_use]
    pub fn resource(&self, key: CacheKey) -> Option<&R> {
        self.entries.get(&key).and_then(VersionedEntry::resource)
    }

    /// Re-marks use of an existing entry.
    pub fn touch(&mut self, key: CacheKey, now: Duration) {
        if let Some(entry) = self.entries.get_mut(&key) {
            entry.mark_used(now);
        }
    }

    #[must_use]
    pub fn collect_stale(&self, now: Duration, threshold: Duration) -> Vec<CacheKey> {
        self.entries
            .values()
            .filter(|e| e.is_stale(now, threshold))
            .map(|e| e.key)
            .collect()
    }

    /// Marks every entry matching `predicate` purge-eligible. Returns their keys.
    pub fn invalidate_where(&mut self, mut predicate: impl FnMut(&VersionedEntry<R>) -> bool) -> Vec<CacheKey> {
        self.entries
            .values_mut()
            .filter(|e| predicate(e))
            .map(|e| {
                e.invalidated = true;
                e.key
            })
            .collect()
    }

    /// Removes one entry, destroying its native object. Requires a device-idle point.
    pub fn remove<D: GpuDevice>(&mut self, device: &D, key: CacheKey) -> bool
    where
        R: Cached<D>,
    {
        let Some(entry) = self.entries.remove(&key) else {
            return false;
        };
        if let Some(resource) = entry.resource {
            resource.destroy(device);
        }
        self.stats.evictions += 1;
        true
    }

    /// Removes every entry. Requires a device-idle point.
    pub fn clear<D: GpuDevice>(&mut self, device: &D)
    where
        R: Cached<D>,
    {
        self.stats.evictions += self.entries.len() as u64;
        for (_, entry) in self.entries.drain() {
            if let Some(resource) = entry.resource {
                resource.destroy(device);
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &VersionedEntry<R>> {
        self.entries.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        self.stats
    }
}
