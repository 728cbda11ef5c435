// abtag
//
// a native rust client for Allen-Bradley PLCs over EtherNet/IP and CIP.
// Copyright: 2025-2026, the abtag project authors
// License: MIT

use crate::{Result, TagEntry};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// tag instances keyed by their attribute string, created once and reused
///
/// # Note
/// - entries stay alive while the [`Pool`] or a clone of the entry is held
pub struct Pool {
    tags: Arc<Mutex<HashMap<String, TagEntry>>>,
}

impl Clone for Pool {
    fn clone(&self) -> Self {
        Self {
            tags: Arc::clone(&self.tags),
        }
    }
}

impl Default for Pool {
    fn default() -> Self {
        Self::new()
    }
}

impl Pool {
    /// an empty pool
    pub fn new() -> Self {
        Self {
            tags: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// get or create the tag for `options`, returning once it is usable
    pub async fn entry(&self, options: impl AsRef<str>) -> Result<TagEntry> {
        let path = options.as_ref();
        if let Some(entry) = self.tags.lock().get(path) {
            return Ok(entry.clone());
        }

        let entry = TagEntry::create(path).await?;

        // another task may have won the race while we were creating
        let mut tags = self.tags.lock();
        if let Some(existing) = tags.get(path) {
            return Ok(existing.clone());
        }
        tags.insert(path.to_owned(), entry.clone());
        Ok(entry)
    }

    /// drop the pooled tag for `options`, if any
    pub fn remove(&self, options: impl AsRef<str>) -> Option<TagEntry> {
        self.tags.lock().remove(options.as_ref())
    }

    /// number of pooled tags
    pub fn len(&self) -> usize {
        self.tags.lock().len()
    }

    /// true when nothing is pooled
    pub fn is_empty(&self) -> bool {
        self.tags.lock().is_empty()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_failed_create_is_not_cached() -> anyhow::Result<()> {
        let rt = tokio::runtime::Runtime::new()?;
        rt.block_on(async {
            let pool = Pool::new();
            let res = pool.entry("protocol=bogus&gateway=10.0.0.1&name=X").await;
            assert!(res.is_err());
            assert!(pool.is_empty());
        });
        Ok(())
    }
}
