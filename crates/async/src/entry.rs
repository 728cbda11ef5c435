// abtag
//
// a native rust client for Allen-Bradley PLCs over EtherNet/IP and CIP.
// Copyright: 2025-2026, the abtag project authors
// License: MIT

use crate::{Error, Result};
use abtag_core::{Decode, Encode, RawTag, Status};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard};
use tokio::task;
use tokio::time;

const POLL_INTERVAL: Duration = Duration::from_millis(2);

/// an async tag handle, cheap to clone and share between tasks
pub struct TagEntry {
    tag: Arc<RawTag>,
    lock: Arc<Mutex<()>>,
}

impl Clone for TagEntry {
    #[inline]
    fn clone(&self) -> Self {
        Self {
            tag: Arc::clone(&self.tag),
            lock: Arc::clone(&self.lock),
        }
    }
}

impl TagEntry {
    /// create the tag and wait for it to become usable.
    ///
    /// Creation itself runs on the blocking pool; any initial
    /// type-learning read is awaited by polling the tag status.
    pub async fn create(options: impl AsRef<str>) -> Result<Self> {
        let path = options.as_ref().to_owned();
        log::debug!("creating async tag for {}", path);
        let tag = task::spawn_blocking(move || RawTag::new(path, 0)).await??;

        let entry = Self {
            tag: Arc::new(tag),
            lock: Arc::new(Mutex::new(())),
        };
        wait_while_pending(&entry.tag).await.map_err(Error::TagError)?;
        Ok(entry)
    }

    /// take the tag's async lock for a sequence of operations
    pub async fn get(&self) -> TagRef<'_> {
        let guard = self.lock.lock().await;
        TagRef {
            tag: &self.tag,
            _guard: guard,
        }
    }
}

/// exclusive tag reference, holding the entry's async lock
pub struct TagRef<'a> {
    tag: &'a Arc<RawTag>,
    _guard: MutexGuard<'a, ()>,
}

impl TagRef<'_> {
    /// the wrapped synchronous tag
    #[inline]
    pub fn raw(&self) -> &RawTag {
        self.tag
    }

    /// perform a read and wait for its completion
    pub async fn read(&self) -> Result<()> {
        let status = self.tag.read(0);
        if status.is_err() {
            return Err(Error::TagError(status));
        }
        wait_while_pending(self.tag).await.map_err(Error::TagError)
    }

    /// perform a write and wait for its completion
    pub async fn write(&self) -> Result<()> {
        let status = self.tag.write(0);
        if status.is_err() {
            return Err(Error::TagError(status));
        }
        wait_while_pending(self.tag).await.map_err(Error::TagError)
    }

    /// read the tag, then decode a value at the byte offset
    pub async fn read_value<T: Decode>(&self, offset: u32) -> Result<T> {
        self.read().await?;
        let value = self.tag.get_value(offset)?;
        Ok(value)
    }

    /// encode a value at the byte offset, then write the tag
    pub async fn write_value<T: Encode>(&self, offset: u32, value: T) -> Result<()> {
        self.tag.set_value(offset, value)?;
        self.write().await
    }
}

/// poll the status word until the operation settles
async fn wait_while_pending(tag: &RawTag) -> std::result::Result<(), Status> {
    loop {
        let status = tag.status();
        if status.is_ok() {
            return Ok(());
        }
        if status.is_err() {
            return Err(status);
        }
        time::sleep(POLL_INTERVAL).await;
    }
}
