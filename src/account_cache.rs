/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0.
 */

//! Disk cache mapping access key IDs to (account, partition)
//!
//! Purely an optimization layer over the identity lookup: a broken cache must
//! never be able to break resolution. Reads that fail because the file is
//! absent, unreadable, or corrupt behave as an empty cache; writes to an
//! unwritable location are dropped.

use crate::environment::Account;
use std::collections::HashMap;
use std::future::Future;
use std::io;
use std::path::PathBuf;

/// Max number of entries in the cache, after which the cache is reset
///
/// The reset is wholesale rather than per-entry LRU: this is a low-stakes
/// performance cache and a full rebuild is cheap.
pub const MAX_ENTRIES: usize = 1000;

pub struct AccountAccessKeyCache {
    cache_file: PathBuf,
}

impl AccountAccessKeyCache {
    pub fn new(cache_file: impl Into<PathBuf>) -> Self {
        AccountAccessKeyCache {
            cache_file: cache_file.into(),
        }
    }

    /// The well-known per-user cache location
    pub fn default_location() -> Self {
        let dir = dirs::cache_dir().unwrap_or_else(std::env::temp_dir);
        AccountAccessKeyCache::new(dir.join("aws-auth-resolver").join("accounts_partitions.json"))
    }

    /// Get-or-compute-and-store
    ///
    /// On a cache miss the resolver runs and its result (if any) is stored.
    pub async fn fetch<F, Fut, E>(&self, access_key_id: &str, resolver: F) -> Result<Account, E>
    where
        E: From<io::Error>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Account, E>>,
    {
        if let Some(cached) = self.get(access_key_id).await? {
            tracing::debug!(
                account_id = %cached.account_id,
                "retrieved account ID from disk cache"
            );
            return Ok(cached);
        }
        let account = resolver().await?;
        self.put(access_key_id, &account).await?;
        Ok(account)
    }

    pub async fn get(&self, access_key_id: &str) -> io::Result<Option<Account>> {
        let map = self.load_map().await?;
        Ok(map.get(access_key_id).cloned())
    }

    pub async fn put(&self, access_key_id: &str, account: &Account) -> io::Result<()> {
        let mut map = self.load_map().await?;
        // nuke the cache when it grows too big
        if map.len() >= MAX_ENTRIES {
            map.clear();
        }
        map.insert(access_key_id.to_string(), account.clone());
        self.save_map(&map).await
    }

    async fn load_map(&self) -> io::Result<HashMap<String, Account>> {
        let contents = match tokio::fs::read(&self.cache_file).await {
            Ok(contents) => contents,
            // absent or unreadable: an empty cache
            Err(err) if benign_io_error(&err) => return Ok(HashMap::new()),
            Err(err) => return Err(err),
        };
        match serde_json::from_slice(&contents) {
            Ok(map) => Ok(map),
            // corrupt, likely from concurrent writes: also an empty cache
            Err(err) => {
                tracing::debug!("account cache file is corrupt, ignoring it: {}", err);
                Ok(HashMap::new())
            }
        }
    }

    async fn save_map(&self, map: &HashMap<String, Account>) -> io::Result<()> {
        let serialized = serde_json::to_vec_pretty(map)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
        let result = async {
            if let Some(parent) = self.cache_file.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&self.cache_file, serialized).await
        }
        .await;
        match result {
            Ok(()) => Ok(()),
            // an unwritable cache is too bad, not an error
            Err(err) if benign_io_error(&err) => Ok(()),
            Err(err) => Err(err),
        }
    }
}

/// Absent files, permission problems and read-only file systems are expected
/// conditions for a best-effort cache
fn benign_io_error(err: &io::Error) -> bool {
    // 30 is EROFS; ErrorKind::ReadOnlyFilesystem is not stable yet
    matches!(
        err.kind(),
        io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied
    ) || err.raw_os_error() == Some(30)
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn cache_in(dir: &tempfile::TempDir) -> AccountAccessKeyCache {
        AccountAccessKeyCache::new(dir.path().join("accounts_partitions.json"))
    }

    #[tokio::test]
    async fn round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache_in(&dir);
        let account = Account::new("11111", "aws");
        cache.put("AKID", &account).await.unwrap();
        assert_eq!(cache.get("AKID").await.unwrap(), Some(account));
        assert_eq!(cache.get("OTHER").await.unwrap(), None);
    }

    #[tokio::test]
    async fn missing_file_is_an_empty_cache() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache_in(&dir);
        assert_eq!(cache.get("AKID").await.unwrap(), None);
    }

    #[tokio::test]
    async fn corrupt_file_is_an_empty_cache() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("accounts_partitions.json");
        tokio::fs::write(&path, "{ not json").await.unwrap();
        let cache = AccountAccessKeyCache::new(&path);
        assert_eq!(cache.get("AKID").await.unwrap(), None);
    }

    #[tokio::test]
    async fn unwritable_location_is_silently_ignored() {
        let cache = AccountAccessKeyCache::new("/proc/definitely/not/writable/cache.json");
        cache
            .put("AKID", &Account::new("11111", "aws"))
            .await
            .expect("write failure must not propagate");
    }

    #[tokio::test]
    async fn cache_wipes_entirely_when_full() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache_in(&dir);
        for i in 0..MAX_ENTRIES {
            cache
                .put(&format!("AKID{}", i), &Account::new(format!("{}", i), "aws"))
                .await
                .unwrap();
        }
        assert!(cache.get("AKID0").await.unwrap().is_some());
        // the next put resets the whole map
        cache
            .put("AKIDNEW", &Account::new("99999", "aws"))
            .await
            .unwrap();
        assert_eq!(cache.get("AKID0").await.unwrap(), None);
        assert_eq!(
            cache.get("AKIDNEW").await.unwrap(),
            Some(Account::new("99999", "aws"))
        );
    }

    #[tokio::test]
    async fn fetch_memoizes_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache_in(&dir);
        let calls = AtomicUsize::new(0);
        for _ in 0..3 {
            let account: Result<Account, io::Error> = cache
                .fetch("AKID", || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(Account::new("11111", "aws"))
                })
                .await;
            assert_eq!(account.unwrap(), Account::new("11111", "aws"));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
