//! 好友请求实体
//!
//! 生命周期：`none -> pending -> {accepted, declined}`。接受和拒绝都会删除记录，
//! 接受的持久效果是私聊房间。

use serde::{Deserialize, Serialize};

use crate::entities::room::ParticipantPair;
use crate::errors::{DomainError, DomainResult};
use crate::value_objects::{FriendRequestId, Timestamp, UserId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FriendRequest {
    pub id: FriendRequestId,
    pub from_user: UserId,
    pub to_user: UserId,
    pub created_at: Timestamp,
}

impl FriendRequest {
    /// 校验发送方和接收方，返回用于去重的用户对。
    pub fn validate_pair(from: UserId, to: UserId) -> DomainResult<ParticipantPair> {
        if from == to {
            return Err(DomainError::SelfRequest);
        }
        ParticipantPair::new(from, to)
    }

    pub fn pair(&self) -> DomainResult<ParticipantPair> {
        ParticipantPair::new(self.from_user, self.to_user)
    }

    /// 只有接收方可以接受或拒绝。
    pub fn ensure_recipient(&self, actor: UserId, action: &str) -> DomainResult<()> {
        if actor != self.to_user {
            return Err(DomainError::unauthorized(action));
        }
        Ok(())
    }
}
