//! Write fence between bucket writers and rotation
//!
//! Writers hold the shared side while appending. After switching the current
//! bucket, rotation takes the exclusive side once, which returns only when
//! every append that started before the switch has landed.

use tokio::sync::{RwLock, RwLockReadGuard};

#[derive(Debug, Default)]
pub struct WriteFence {
    lock: RwLock<()>,
}

impl WriteFence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enters the fence as a writer
    pub async fn enter(&self) -> RwLockReadGuard<'_, ()> {
        self.lock.read().await
    }

    /// Waits until no writer is inside the fence
    pub async fn wait_for_writers(&self) {
        drop(self.lock.write().await);
    }
}
