use std::collections::HashMap;
use std::sync::Arc;

use domain::{DomainError, Message, MessageId, Room, RoomId, RoomRepository, UserId, UserRepository};

use crate::{
    dto::{ChatEvent, RoomDto, RoomHistory, UserDto},
    error::ApplicationResult,
    membership::Identity,
    message_store::MessageStore,
    registry::{PublishReport, RoomRegistry, SessionEvent},
    sequencer::RoomSequencer,
};

pub struct ChatServiceDependencies {
    pub room_repository: Arc<dyn RoomRepository>,
    pub user_repository: Arc<dyn UserRepository>,
    pub message_store: Arc<MessageStore>,
    pub registry: Arc<RoomRegistry>,
    pub sequencer: Arc<RoomSequencer>,
}

/// 发送后的结果：持久化后的事件和投递报告
#[derive(Debug, Clone)]
pub struct PostedMessage {
    pub event: Arc<ChatEvent>,
    pub report: PublishReport,
}

pub struct ChatService {
    deps: ChatServiceDependencies,
}

impl ChatService {
    pub fn new(deps: ChatServiceDependencies) -> Self {
        Self { deps }
    }

    /// 追加并广播。房间锁覆盖两步，保证投递顺序等于追加顺序。
    pub async fn post_message(
        &self,
        sender: &Identity,
        room_id: RoomId,
        body: &str,
    ) -> ApplicationResult<PostedMessage> {
        let _guard = self.deps.sequencer.lock(room_id).await;

        let message = self
            .deps
            .message_store
            .append(room_id, sender.user_id, body)
            .await?;

        let event = Arc::new(ChatEvent::from_message(&message, &sender.username));
        let report = self
            .deps
            .registry
            .publish(room_id, SessionEvent::Message(event.clone()))
            .await;

        tracing::info!(
            room_id = %room_id,
            message_id = %message.id,
            delivered = report.delivered,
            failed = report.failed.len(),
            "消息已广播"
        );

        Ok(PostedMessage { event, report })
    }

    /// 历史消息，只有房间参与者可以读取。
    pub async fn history(
        &self,
        user_id: UserId,
        room_id: RoomId,
        after: MessageId,
        limit: Option<u32>,
    ) -> ApplicationResult<Vec<ChatEvent>> {
        self.participant_room(user_id, room_id).await?;
        let messages = self
            .deps
            .message_store
            .list_since(room_id, after, limit)
            .await?;
        self.to_events(messages).await
    }

    /// 最近的消息，用于会话初始同步和补发。调用方负责成员校验。
    pub async fn recent(&self, room_id: RoomId, limit: u32) -> ApplicationResult<RoomHistory> {
        let messages = self.deps.message_store.recent(room_id, limit).await?;
        Ok(RoomHistory {
            room_id,
            messages: self.to_events(messages).await?,
        })
    }

    /// 用户参与的房间，最新创建的在前
    pub async fn list_rooms(&self, user_id: UserId) -> ApplicationResult<Vec<RoomDto>> {
        let rooms = self.deps.room_repository.list_for_user(user_id).await?;
        Ok(rooms.iter().map(RoomDto::from).collect())
    }

    /// 私聊房间中的另一位参与者
    pub async fn room_peer(&self, user_id: UserId, room_id: RoomId) -> ApplicationResult<UserDto> {
        let room = self.participant_room(user_id, room_id).await?;
        let peer_id = room.peer_of(user_id).ok_or(DomainError::UserNotFound)?;
        let peer = self
            .deps
            .user_repository
            .find_by_id(peer_id)
            .await?
            .ok_or(DomainError::UserNotFound)?;
        Ok(UserDto::from(&peer))
    }

    async fn participant_room(&self, user_id: UserId, room_id: RoomId) -> ApplicationResult<Room> {
        let room = self
            .deps
            .room_repository
            .find_by_id(room_id)
            .await?
            .ok_or(DomainError::RoomNotFound)?;
        if !room.is_participant(user_id) {
            return Err(DomainError::NotMember.into());
        }
        Ok(room)
    }

    async fn to_events(&self, messages: Vec<Message>) -> ApplicationResult<Vec<ChatEvent>> {
        if messages.is_empty() {
            return Ok(Vec::new());
        }

        let mut sender_ids: Vec<UserId> = messages.iter().map(|m| m.sender_id).collect();
        sender_ids.sort();
        sender_ids.dedup();

        let names: HashMap<UserId, String> = self
            .deps
            .user_repository
            .find_by_ids(sender_ids)
            .await?
            .into_iter()
            .map(|user| (user.id, user.username.as_str().to_owned()))
            .collect();

        Ok(messages
            .iter()
            .map(|message| {
                let username = names
                    .get(&message.sender_id)
                    .map(String::as_str)
                    .unwrap_or_default();
                ChatEvent::from_message(message, username)
            })
            .collect())
    }
}
