use std::collections::VecDeque;

use crate::apk::ApkPackage;

/// Default number of extracted packages kept in memory.
pub const CACHE_CAPACITY: usize = 10;

/// How much of the input participates in the cache digest.
const KEY_PREFIX_LEN: usize = 1024;

/// Cache key for an uploaded APK: crc32 of the first KiB plus the total
/// length, enough to recognize a byte-identical re-upload without hashing
/// the whole archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheKey {
    digest: u32,
    length: usize,
}

impl CacheKey {
    pub fn for_bytes(bytes: &[u8]) -> CacheKey {
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&bytes[..bytes.len().min(KEY_PREFIX_LEN)]);
        CacheKey { digest: hasher.finalize(), length: bytes.len() }
    }
}

/// Bounded extraction cache with insertion-order eviction. Explicitly owned
/// by whoever drives extraction; there is no process-wide instance.
pub struct ExtractCache {
    entries: VecDeque<(CacheKey, ApkPackage)>,
    capacity: usize,
}

impl ExtractCache {
    pub fn new() -> Self {
        Self::with_capacity(CACHE_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        ExtractCache { entries: VecDeque::new(), capacity }
    }

    pub fn get(&self, key: &CacheKey) -> Option<&ApkPackage> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, pkg)| pkg)
    }

    pub fn insert(&mut self, key: CacheKey, package: ApkPackage) {
        if let Some(entry) = self.entries.iter_mut().find(|(k, _)| *k == key) {
            entry.1 = package;
            return;
        }
        self.entries.push_back((key, package));
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for ExtractCache {
    fn default() -> Self {
        ExtractCache::new()
    }
}
