//! 房间注册表与广播扇出
//!
//! 注册表是显式的共享状态对象，由启动代码创建后传给每个会话。
//! 它只持有会话句柄（非拥有），会话结束时必须调用 [`RoomRegistry::unsubscribe_all`]。
//!
//! 三个索引（room → sessions、session → rooms、user → sessions）在同一把锁下维护。
//! 广播时在锁内取订阅者快照，在锁外逐个非阻塞投递。

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use domain::{RoomId, UserId};
use thiserror::Error;
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::dto::ChatEvent;

pub type SessionId = Uuid;

/// 投递到会话入站队列的事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Message(Arc<ChatEvent>),
    /// 新房间可用（例如好友请求被接受），会话应订阅它
    RoomAvailable(RoomId),
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryFailure {
    #[error("session queue is full")]
    QueueFull,
    #[error("session queue is closed")]
    Disconnected,
}

/// 会话在注册表中的句柄
#[derive(Debug, Clone)]
pub struct SessionHandle {
    id: SessionId,
    user_id: UserId,
    outbox: mpsc::Sender<SessionEvent>,
    shutdown: CancellationToken,
}

impl SessionHandle {
    pub fn new(
        id: SessionId,
        user_id: UserId,
        outbox: mpsc::Sender<SessionEvent>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            id,
            user_id,
            outbox,
            shutdown,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    fn try_deliver(&self, event: SessionEvent) -> Result<(), DeliveryFailure> {
        self.outbox.try_send(event).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => DeliveryFailure::QueueFull,
            mpsc::error::TrySendError::Closed(_) => DeliveryFailure::Disconnected,
        })
    }

    /// 通知连接任务结束
    pub fn force_close(&self) {
        self.shutdown.cancel();
    }
}

/// 一次广播的结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishReport {
    pub delivered: usize,
    pub failed: Vec<(SessionId, DeliveryFailure)>,
}

struct SessionEntry {
    handle: SessionHandle,
    rooms: HashSet<RoomId>,
}

#[derive(Default)]
struct RegistryState {
    rooms: HashMap<RoomId, HashSet<SessionId>>,
    sessions: HashMap<SessionId, SessionEntry>,
    users: HashMap<UserId, HashSet<SessionId>>,
}

impl RegistryState {
    fn attach(&mut self, handle: &SessionHandle) -> &mut SessionEntry {
        let user_id = handle.user_id;
        let session_id = handle.id;
        let entry = self.sessions.entry(session_id).or_insert_with(|| SessionEntry {
            handle: handle.clone(),
            rooms: HashSet::new(),
        });
        self.users.entry(user_id).or_default().insert(session_id);
        entry
    }

    fn remove_from_room(&mut self, room_id: RoomId, session_id: SessionId) {
        if let Some(subscribers) = self.rooms.get_mut(&room_id) {
            subscribers.remove(&session_id);
            if subscribers.is_empty() {
                self.rooms.remove(&room_id);
            }
        }
    }
}

#[derive(Default)]
pub struct RoomRegistry {
    state: RwLock<RegistryState>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 登记会话，使其能收到 [`notify_user`](Self::notify_user) 事件，即使它还没有订阅任何房间。
    pub async fn attach(&self, handle: &SessionHandle) {
        let mut state = self.state.write().await;
        state.attach(handle);
    }

    /// 幂等；返回是否为新增订阅。
    pub async fn subscribe(&self, handle: &SessionHandle, room_id: RoomId) -> bool {
        let mut state = self.state.write().await;
        let added = state.attach(handle).rooms.insert(room_id);
        state.rooms.entry(room_id).or_default().insert(handle.id);
        if added {
            tracing::debug!(session_id = %handle.id, room_id = %room_id, "会话订阅房间");
        }
        added
    }

    pub async fn unsubscribe(&self, session_id: SessionId, room_id: RoomId) -> bool {
        let mut state = self.state.write().await;
        let removed = state
            .sessions
            .get_mut(&session_id)
            .map(|entry| entry.rooms.remove(&room_id))
            .unwrap_or(false);
        state.remove_from_room(room_id, session_id);
        removed
    }

    /// 从所有索引中移除会话，返回它之前订阅的房间。重复调用是空操作。
    pub async fn unsubscribe_all(&self, session_id: SessionId) -> Vec<RoomId> {
        let mut state = self.state.write().await;
        let Some(entry) = state.sessions.remove(&session_id) else {
            return Vec::new();
        };

        for room_id in &entry.rooms {
            state.remove_from_room(*room_id, session_id);
        }

        let user_id = entry.handle.user_id;
        if let Some(sessions) = state.users.get_mut(&user_id) {
            sessions.remove(&session_id);
            if sessions.is_empty() {
                state.users.remove(&user_id);
            }
        }

        tracing::debug!(
            session_id = %session_id,
            user_id = %user_id,
            rooms = entry.rooms.len(),
            "会话已从注册表移除"
        );
        entry.rooms.into_iter().collect()
    }

    /// 向房间的所有订阅者投递事件。
    pub async fn publish(&self, room_id: RoomId, event: SessionEvent) -> PublishReport {
        let targets: Vec<SessionHandle> = {
            let state = self.state.read().await;
            state
                .rooms
                .get(&room_id)
                .map(|ids| {
                    ids.iter()
                        .filter_map(|id| state.sessions.get(id))
                        .map(|entry| entry.handle.clone())
                        .collect()
                })
                .unwrap_or_default()
        };
        self.deliver(targets, event).await
    }

    /// 向某个用户的全部在线会话投递控制事件。
    pub async fn notify_user(&self, user_id: UserId, event: SessionEvent) -> PublishReport {
        let targets: Vec<SessionHandle> = {
            let state = self.state.read().await;
            state
                .users
                .get(&user_id)
                .map(|ids| {
                    ids.iter()
                        .filter_map(|id| state.sessions.get(id))
                        .map(|entry| entry.handle.clone())
                        .collect()
                })
                .unwrap_or_default()
        };
        self.deliver(targets, event).await
    }

    async fn deliver(&self, targets: Vec<SessionHandle>, event: SessionEvent) -> PublishReport {
        let mut report = PublishReport::default();
        for handle in targets {
            match handle.try_deliver(event.clone()) {
                Ok(()) => report.delivered += 1,
                Err(failure) => {
                    tracing::warn!(
                        session_id = %handle.id,
                        user_id = %handle.user_id,
                        error = %failure,
                        "投递失败，强制关闭会话"
                    );
                    handle.force_close();
                    report.failed.push((handle.id, failure));
                }
            }
        }

        for (session_id, _) in &report.failed {
            self.unsubscribe_all(*session_id).await;
        }
        report
    }

    pub async fn subscribers(&self, room_id: RoomId) -> Vec<SessionId> {
        let state = self.state.read().await;
        state
            .rooms
            .get(&room_id)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default()
    }

    pub async fn sessions_of(&self, user_id: UserId) -> Vec<SessionId> {
        let state = self.state.read().await;
        state
            .users
            .get(&user_id)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default()
    }

    pub async fn is_attached(&self, session_id: SessionId) -> bool {
        self.state.read().await.sessions.contains_key(&session_id)
    }

    pub async fn session_count(&self) -> usize {
        self.state.read().await.sessions.len()
    }
}
