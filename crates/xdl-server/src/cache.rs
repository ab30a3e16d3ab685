//! Single-slot signed manifest cache

use std::future::Future;

use tokio::sync::RwLock;

use xdl_core::prelude::*;

#[derive(Debug, Clone)]
struct Entry {
    unsigned: String,
    signed: String,
}

/// Remembers the signature of the most recently signed manifest string.
///
/// The lock is only held to compare and to store, never across the signing
/// call, so two requests racing with different manifests both sign and the
/// last one to finish wins the slot.
#[derive(Debug, Default)]
pub struct ManifestCache {
    slot: RwLock<Option<Entry>>,
}

impl ManifestCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Signed form of `unsigned`, calling `sign` only on a cache miss.
    ///
    /// A failed `sign` leaves the cached entry untouched.
    pub async fn get_signed<F, Fut>(&self, unsigned: &str, sign: F) -> Result<String>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<String>>,
    {
        if let Some(entry) = self.slot.read().await.as_ref() {
            if entry.unsigned == unsigned {
                trace!("signed manifest cache hit");
                return Ok(entry.signed.clone());
            }
        }

        debug!("signed manifest cache miss, signing");
        let signed = sign().await?;

        *self.slot.write().await = Some(Entry {
            unsigned: unsigned.to_string(),
            signed: signed.clone(),
        });

        Ok(signed)
    }

    /// Last unsigned manifest string that was signed
    pub async fn cached_unsigned(&self) -> Option<String> {
        self.slot.read().await.as_ref().map(|e| e.unsigned.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    async fn sign_counted(cache: &ManifestCache, manifest: &str, calls: &AtomicUsize) -> String {
        cache
            .get_signed(manifest, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(format!("signed:{}", manifest))
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_same_manifest_signs_once() {
        let cache = ManifestCache::new();
        let calls = AtomicUsize::new(0);

        let a = sign_counted(&cache, r#"{"a":1}"#, &calls).await;
        let b = sign_counted(&cache, r#"{"a":1}"#, &calls).await;

        assert_eq!(a, b);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_different_manifests_sign_each() {
        let cache = ManifestCache::new();
        let calls = AtomicUsize::new(0);

        assert_eq!(sign_counted(&cache, "one", &calls).await, "signed:one");
        assert_eq!(sign_counted(&cache, "two", &calls).await, "signed:two");
        assert_eq!(sign_counted(&cache, "one", &calls).await, "signed:one");

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(cache.cached_unsigned().await.as_deref(), Some("one"));
    }

    #[tokio::test]
    async fn test_failed_sign_keeps_previous_entry() {
        let cache = ManifestCache::new();
        let calls = AtomicUsize::new(0);
        sign_counted(&cache, "one", &calls).await;

        let err = cache
            .get_signed("two", || async { Err(Error::api("signing unavailable")) })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Api { .. }));

        assert_eq!(cache.cached_unsigned().await.as_deref(), Some("one"));
        sign_counted(&cache, "one", &calls).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
