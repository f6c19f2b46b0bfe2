//! Channel directory
//!
//! Channels are read on every `send_async`, and written only when the
//! configuration is reloaded.

use crate::config::AsyncChannel;
use crate::domain::ChannelId;
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Read-mostly channel lookup shared by the service and its workers
#[derive(Debug, Default)]
pub struct ChannelDirectory {
    channels: RwLock<HashMap<ChannelId, AsyncChannel>>,
}

impl ChannelDirectory {
    pub fn new(channels: impl IntoIterator<Item = AsyncChannel>) -> Self {
        Self {
            channels: RwLock::new(channels.into_iter().map(|c| (c.id.clone(), c)).collect()),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<ChannelId, AsyncChannel>> {
        self.channels.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<ChannelId, AsyncChannel>> {
        self.channels.write().unwrap_or_else(|e| e.into_inner())
    }

    pub fn get(&self, id: &ChannelId) -> Option<AsyncChannel> {
        self.read().get(id).cloned()
    }

    /// Replaces every channel
    pub fn reload(&self, channels: impl IntoIterator<Item = AsyncChannel>) {
        let fresh: HashMap<_, _> = channels.into_iter().map(|c| (c.id.clone(), c)).collect();
        tracing::info!(channels = fresh.len(), "Reloaded delivery channels");
        *self.write() = fresh;
    }

    pub fn upsert(&self, channel: AsyncChannel) {
        self.write().insert(channel.id.clone(), channel);
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel(id: &str, active: bool) -> AsyncChannel {
        AsyncChannel {
            id: ChannelId::new(id).unwrap(),
            active,
            queue: None,
            idempotency_header: None,
        }
    }

    #[test]
    fn test_reload_replaces() {
        let directory = ChannelDirectory::new([channel("a", true), channel("b", true)]);
        assert_eq!(directory.len(), 2);

        directory.reload([channel("c", false)]);
        assert!(directory.get(&ChannelId::new("a").unwrap()).is_none());
        assert!(!directory.get(&ChannelId::new("c").unwrap()).unwrap().active);
    }

    #[test]
    fn test_upsert() {
        let directory = ChannelDirectory::default();
        assert!(directory.is_empty());
        directory.upsert(channel("a", false));
        directory.upsert(channel("a", true));
        assert!(directory.get(&ChannelId::new("a").unwrap()).unwrap().active);
    }
}
