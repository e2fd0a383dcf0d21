//! 房间级串行器
//!
//! 同一房间的“追加 + 广播”必须作为一个整体串行执行，这样投递顺序才等于
//! 追加顺序。不同房间互不阻塞。

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use domain::RoomId;
use tokio::sync::{Mutex, OwnedMutexGuard};

type LockMap = HashMap<RoomId, Arc<Mutex<()>>>;

#[derive(Debug, Default)]
pub struct RoomSequencer {
    locks: Arc<StdMutex<LockMap>>,
}

/// 持有期间，同一房间的其他写入者会等待。
///
/// 最后一个持有者释放时，房间条目从表中移除。
#[derive(Debug)]
pub struct RoomGuard {
    room_id: RoomId,
    locks: Arc<StdMutex<LockMap>>,
    guard: OwnedMutexGuard<()>,
}

impl RoomSequencer {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, room_id: RoomId) -> RoomGuard {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            locks.entry(room_id).or_default().clone()
        };
        RoomGuard {
            room_id,
            locks: self.locks.clone(),
            guard: lock.lock_owned().await,
        }
    }

    #[cfg(test)]
    fn tracked_rooms(&self) -> usize {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

impl Drop for RoomGuard {
    fn drop(&mut self) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        // 表里一份加上自己一份，说明没有其他等待者
        if Arc::strong_count(OwnedMutexGuard::mutex(&self.guard)) == 2 {
            locks.remove(&self.room_id);
        }
    }
}
