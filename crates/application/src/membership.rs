//! 身份与成员关系提供者
//!
//! 聊天核心不签发凭证，也不管理房间成员；它通过这两个接口向外部询问。

use std::sync::Arc;

use async_trait::async_trait;
use domain::{RoomId, RoomRepository, UserId};

use crate::error::ApplicationResult;

/// 已认证的用户身份
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: UserId,
    pub username: String,
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// 将不透明凭证解析为用户身份；失败返回 `ApplicationError::Authentication`。
    async fn authenticate(&self, credential: &str) -> ApplicationResult<Identity>;
}

#[async_trait]
pub trait MembershipProvider: Send + Sync {
    async fn rooms_for_user(&self, user_id: UserId) -> ApplicationResult<Vec<RoomId>>;

    async fn is_member(&self, user_id: UserId, room_id: RoomId) -> ApplicationResult<bool>;
}

/// 基于房间参与者表的成员关系
pub struct RoomMembership {
    rooms: Arc<dyn RoomRepository>,
}

impl RoomMembership {
    pub fn new(rooms: Arc<dyn RoomRepository>) -> Self {
        Self { rooms }
    }
}

#[async_trait]
impl MembershipProvider for RoomMembership {
    async fn rooms_for_user(&self, user_id: UserId) -> ApplicationResult<Vec<RoomId>> {
        Ok(self.rooms.room_ids_for_user(user_id).await?)
    }

    async fn is_member(&self, user_id: UserId, room_id: RoomId) -> ApplicationResult<bool> {
        Ok(self
            .rooms
            .find_by_id(room_id)
            .await?
            .map(|room| room.is_participant(user_id))
            .unwrap_or(false))
    }
}
