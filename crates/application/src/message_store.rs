//! 消息存储服务
//!
//! 每个房间一条持久、有序、只追加的日志。校验正文、调用仓储原子追加，
//! 并对暂时性故障做一次重试。

use std::sync::Arc;

use domain::{
    AppendOutcome, DomainError, Message, MessageBody, MessageId, MessageRepository, NewMessage,
    RoomId, UserId,
};

use crate::clock::Clock;
use crate::error::ApplicationResult;
use crate::retry::{retry_async, RetryConfig};

pub struct MessageStore {
    messages: Arc<dyn MessageRepository>,
    clock: Arc<dyn Clock>,
    retry: RetryConfig,
}

impl MessageStore {
    pub fn new(
        messages: Arc<dyn MessageRepository>,
        clock: Arc<dyn Clock>,
        retry: RetryConfig,
    ) -> Self {
        Self {
            messages,
            clock,
            retry,
        }
    }

    /// 追加消息。成员关系在仓储的同一事务内复核。
    pub async fn append(
        &self,
        room_id: RoomId,
        sender_id: UserId,
        body: &str,
    ) -> ApplicationResult<Message> {
        let body = MessageBody::new(body)?;
        let new_message = NewMessage {
            room_id,
            sender_id,
            body,
            submitted_at: self.clock.now(),
        };

        let outcome = retry_async(&self.retry, || self.messages.append(new_message.clone())).await?;

        match outcome {
            AppendOutcome::Appended(message) => {
                tracing::debug!(
                    room_id = %room_id,
                    message_id = %message.id,
                    sender_id = %sender_id,
                    "消息已持久化"
                );
                Ok(message)
            }
            AppendOutcome::RoomNotFound => Err(DomainError::RoomNotFound.into()),
            AppendOutcome::NotMember => Err(DomainError::NotMember.into()),
        }
    }

    /// 游标之后的消息，`MessageId::BEGINNING` 表示从头开始。
    pub async fn list_since(
        &self,
        room_id: RoomId,
        after: MessageId,
        limit: Option<u32>,
    ) -> ApplicationResult<Vec<Message>> {
        let messages = retry_async(&self.retry, || {
            self.messages.list_since(room_id, after, limit)
        })
        .await?;
        Ok(messages)
    }

    pub async fn recent(&self, room_id: RoomId, limit: u32) -> ApplicationResult<Vec<Message>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let messages =
            retry_async(&self.retry, || self.messages.list_recent(room_id, limit)).await?;
        Ok(messages)
    }
}
