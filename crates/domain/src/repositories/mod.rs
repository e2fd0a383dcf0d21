//! Repository 接口定义
//!
//! 存储适配器（Postgres、内存）实现这些 trait。涉及多步写入的操作
//! （追加消息、接受好友请求）在一次调用内原子完成，并把业务结果以
//! outcome 枚举返回，由应用层映射为 [`DomainError`](crate::errors::DomainError)。

use async_trait::async_trait;

use crate::entities::{FriendRequest, Message, NewMessage, Room, User};
use crate::errors::RepositoryResult;
use crate::value_objects::{FriendRequestId, MessageId, RoomId, Timestamp, UserId};

/// 追加消息的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppendOutcome {
    Appended(Message),
    RoomNotFound,
    NotMember,
}

/// 创建好友请求的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateRequestOutcome {
    Created(FriendRequest),
    /// 任意方向已存在待处理请求
    Duplicate,
    /// 双方已有私聊房间
    AlreadyFriends,
}

/// 接受好友请求的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcceptOutcome {
    Accepted {
        request: FriendRequest,
        room: Room,
        /// false 表示复用了已有的私聊房间
        room_created: bool,
    },
    NotFound,
    /// 操作者不是请求的接收方，请求保持不变
    Unauthorized,
}

/// 拒绝好友请求的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeclineOutcome {
    Declined(FriendRequest),
    NotFound,
    Unauthorized,
}

#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn find_by_id(&self, id: UserId) -> RepositoryResult<Option<User>>;

    /// 批量查询，结果顺序不保证；不存在的 id 被忽略
    async fn find_by_ids(&self, ids: Vec<UserId>) -> RepositoryResult<Vec<User>>;
}

#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait RoomRepository: Send + Sync {
    async fn find_by_id(&self, id: RoomId) -> RepositoryResult<Option<Room>>;

    /// 用户参与的全部房间，按创建时间倒序
    async fn list_for_user(&self, user: UserId) -> RepositoryResult<Vec<Room>>;

    /// 用户参与的房间 id，按创建时间倒序
    async fn room_ids_for_user(&self, user: UserId) -> RepositoryResult<Vec<RoomId>>;
}

#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait MessageRepository: Send + Sync {
    /// 在房间内原子地分配 id 和时间戳并写入。
    ///
    /// 同一房间的并发追加被串行化；`created_at` 取
    /// `max(submitted_at, 房间最后一条消息的 created_at)`。
    ///
    /// 返回暂时性错误时保证没有写入，调用方可以安全重试；
    /// 结果未知的失败必须以非暂时性错误返回。
    async fn append(&self, message: NewMessage) -> RepositoryResult<AppendOutcome>;

    /// `after` 之后的消息，按 `(created_at, id)` 升序。
    /// `MessageId::BEGINNING` 表示从头开始。
    async fn list_since(
        &self,
        room_id: RoomId,
        after: MessageId,
        limit: Option<u32>,
    ) -> RepositoryResult<Vec<Message>>;

    /// 最近 `limit` 条消息，按 `(created_at, id)` 升序。
    async fn list_recent(&self, room_id: RoomId, limit: u32) -> RepositoryResult<Vec<Message>>;
}

#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait FriendRequestRepository: Send + Sync {
    async fn create(
        &self,
        from: UserId,
        to: UserId,
        now: Timestamp,
    ) -> RepositoryResult<CreateRequestOutcome>;

    /// 发给 `user` 的待处理请求，按创建时间升序
    async fn list_incoming(&self, user: UserId) -> RepositoryResult<Vec<FriendRequest>>;

    /// 单个事务内：校验接收方、获取或创建私聊房间、删除请求。
    async fn accept(
        &self,
        id: FriendRequestId,
        actor: UserId,
        now: Timestamp,
    ) -> RepositoryResult<AcceptOutcome>;

    async fn decline(&self, id: FriendRequestId, actor: UserId)
        -> RepositoryResult<DeclineOutcome>;
}
