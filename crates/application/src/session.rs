//! 连接会话
//!
//! 每个在线用户一个会话，状态机 `connecting -> authenticated -> active -> closed`。
//! 会话拥有自己的入站队列和订阅集合，注册表只保存它的句柄。

use std::collections::BTreeSet;
use std::sync::Arc;

use domain::{DomainError, RoomId};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{
    dto::{ChatEvent, InboundMessage, RoomHistory, ServerFrame},
    error::{ApplicationError, ApplicationResult},
    membership::{Identity, IdentityProvider, MembershipProvider},
    registry::{RoomRegistry, SessionEvent, SessionHandle, SessionId},
    services::ChatService,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Authenticated,
    Active,
    Closed,
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// 每个会话入站队列的容量，满了视为投递失败
    pub outbox_capacity: usize,
    /// 初始同步和补发时每个房间的历史条数
    pub history_limit: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            outbox_capacity: 256,
            history_limit: 50,
        }
    }
}

/// 会话激活时返回的初始同步数据
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitialSync {
    pub rooms: Vec<RoomHistory>,
}

impl From<InitialSync> for ServerFrame {
    fn from(sync: InitialSync) -> Self {
        ServerFrame::InitialSync { rooms: sync.rooms }
    }
}

pub struct SessionManagerDependencies {
    pub identity_provider: Arc<dyn IdentityProvider>,
    pub membership_provider: Arc<dyn MembershipProvider>,
    pub chat_service: Arc<ChatService>,
    pub registry: Arc<RoomRegistry>,
    pub config: SessionConfig,
}

/// 创建会话的入口
pub struct SessionManager {
    deps: SessionManagerDependencies,
}

impl SessionManager {
    pub fn new(deps: SessionManagerDependencies) -> Self {
        Self { deps }
    }

    /// 校验凭证。失败时不分配队列，也不写注册表。
    pub async fn open(&self, credential: &str) -> ApplicationResult<ConnectionSession> {
        let identity = self
            .deps
            .identity_provider
            .authenticate(credential)
            .await
            .map_err(|err| {
                tracing::debug!(error = %err, "会话认证失败");
                ApplicationError::Authentication
            })?;

        let (tx, rx) = mpsc::channel(self.deps.config.outbox_capacity);
        let shutdown = CancellationToken::new();
        let id = Uuid::new_v4();
        let handle = SessionHandle::new(id, identity.user_id, tx, shutdown.clone());

        tracing::info!(session_id = %id, user_id = %identity.user_id, "会话已认证");

        Ok(ConnectionSession {
            id,
            identity,
            state: SessionState::Authenticated,
            rooms: BTreeSet::new(),
            handle,
            events: Some(rx),
            shutdown,
            registry: self.deps.registry.clone(),
            membership: self.deps.membership_provider.clone(),
            chat: self.deps.chat_service.clone(),
            history_limit: self.deps.config.history_limit,
        })
    }
}

pub struct ConnectionSession {
    id: SessionId,
    identity: Identity,
    state: SessionState,
    rooms: BTreeSet<RoomId>,
    handle: SessionHandle,
    events: Option<mpsc::Receiver<SessionEvent>>,
    shutdown: CancellationToken,
    registry: Arc<RoomRegistry>,
    membership: Arc<dyn MembershipProvider>,
    chat: Arc<ChatService>,
    history_limit: u32,
}

impl ConnectionSession {
    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// 被注册表强制关闭的会话即使尚未调用 `close` 也视为已关闭
    pub fn state(&self) -> SessionState {
        if self.shutdown.is_cancelled() {
            return SessionState::Closed;
        }
        self.state
    }

    pub fn subscribed_rooms(&self) -> Vec<RoomId> {
        self.rooms.iter().copied().collect()
    }

    /// 注册表强制关闭会话时被取消
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// 取走入站队列的接收端，只能取一次
    pub fn take_events(&mut self) -> Option<mpsc::Receiver<SessionEvent>> {
        self.events.take()
    }

    /// 订阅用户的全部房间并返回每个房间的最近历史。
    pub async fn activate(&mut self) -> ApplicationResult<InitialSync> {
        if self.state() != SessionState::Authenticated {
            return Err(ApplicationError::SessionNotActive);
        }

        self.registry.attach(&self.handle).await;
        let rooms = match self.membership.rooms_for_user(self.identity.user_id).await {
            Ok(rooms) => rooms,
            Err(err) => {
                self.close().await;
                return Err(err);
            }
        };

        for room_id in &rooms {
            self.registry.subscribe(&self.handle, *room_id).await;
            self.rooms.insert(*room_id);
        }
        self.state = SessionState::Active;

        let mut histories = Vec::with_capacity(rooms.len());
        for room_id in rooms {
            histories.push(self.chat.recent(room_id, self.history_limit).await?);
        }

        tracing::info!(
            session_id = %self.id,
            user_id = %self.identity.user_id,
            rooms = self.rooms.len(),
            "会话已激活"
        );
        Ok(InitialSync { rooms: histories })
    }

    /// 发送消息。房间必须在本会话的订阅集合中，否则不触碰存储。
    pub async fn send(&self, inbound: InboundMessage) -> ApplicationResult<Arc<ChatEvent>> {
        self.ensure_active()?;
        if !self.rooms.contains(&inbound.room_id) {
            return Err(DomainError::NotMember.into());
        }
        let posted = self
            .chat
            .post_message(&self.identity, inbound.room_id, &inbound.message)
            .await?;
        Ok(posted.event)
    }

    /// 处理一个文本帧。格式错误和空正文被静默丢弃；其他错误返回错误帧，连接保持。
    pub async fn handle_text(&self, text: &str) -> Option<ServerFrame> {
        let inbound: InboundMessage = match serde_json::from_str(text) {
            Ok(inbound) => inbound,
            Err(err) => {
                tracing::debug!(session_id = %self.id, error = %err, "丢弃格式错误的帧");
                return None;
            }
        };

        let room_id = inbound.room_id;
        match self.send(inbound).await {
            Ok(_) => None,
            Err(ApplicationError::Domain(DomainError::EmptyBody)) => {
                tracing::debug!(session_id = %self.id, room_id = %room_id, "丢弃空消息");
                None
            }
            Err(err) => {
                tracing::warn!(
                    session_id = %self.id,
                    room_id = %room_id,
                    error = %err,
                    "消息发送失败"
                );
                Some(ServerFrame::error(&err, Some(room_id)))
            }
        }
    }

    /// 会话中途加入房间，重新向成员关系提供者确认，并返回补发历史。
    pub async fn join_room(&mut self, room_id: RoomId) -> ApplicationResult<RoomHistory> {
        self.ensure_active()?;
        if !self
            .membership
            .is_member(self.identity.user_id, room_id)
            .await?
        {
            return Err(DomainError::NotMember.into());
        }

        self.registry.subscribe(&self.handle, room_id).await;
        self.rooms.insert(room_id);
        self.chat.recent(room_id, self.history_limit).await
    }

    /// 返回之前是否已订阅
    pub async fn leave_room(&mut self, room_id: RoomId) -> ApplicationResult<bool> {
        self.ensure_active()?;
        self.registry.unsubscribe(self.id, room_id).await;
        Ok(self.rooms.remove(&room_id))
    }

    /// 关闭会话并清理注册表；幂等。
    pub async fn close(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        self.state = SessionState::Closed;
        self.shutdown.cancel();
        self.registry.unsubscribe_all(self.id).await;
        self.rooms.clear();
        tracing::info!(session_id = %self.id, user_id = %self.identity.user_id, "会话已关闭");
    }

    fn ensure_active(&self) -> ApplicationResult<()> {
        if self.state() != SessionState::Active {
            return Err(ApplicationError::SessionNotActive);
        }
        Ok(())
    }
}
