//! 领域模型错误定义
//!
//! 业务规则失败使用 [`DomainError`]，存储适配器失败使用 [`RepositoryError`]。

use thiserror::Error;

/// 领域模型错误类型
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// 不能给自己发送好友请求
    #[error("cannot send a friend request to yourself")]
    SelfRequest,

    /// 双方之间已经存在待处理的请求（任意方向）
    #[error("a friend request between these users already exists")]
    DuplicateRequest,

    /// 双方已经拥有私聊房间
    #[error("users are already friends")]
    AlreadyFriends,

    #[error("friend request not found")]
    RequestNotFound,

    #[error("user not found")]
    UserNotFound,

    #[error("room not found")]
    RoomNotFound,

    /// 用户不是房间成员，或当前会话未订阅该房间
    #[error("user is not a member of this room")]
    NotMember,

    /// 消息正文去除空白后为空
    #[error("message body cannot be empty")]
    EmptyBody,

    #[error("not authorized to {action}")]
    Unauthorized { action: String },

    #[error("invalid argument: {field}: {reason}")]
    InvalidArgument { field: String, reason: String },
}

impl DomainError {
    pub fn unauthorized(action: impl Into<String>) -> Self {
        Self::Unauthorized {
            action: action.into(),
        }
    }

    pub fn invalid_argument(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// 领域模型结果类型
pub type DomainResult<T> = Result<T, DomainError>;

/// 仓储层错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RepositoryError {
    #[error("record not found")]
    NotFound,

    #[error("record conflicts with existing data")]
    Conflict,

    /// 暂时性故障（连接池超时、连接断开等），可以重试
    #[error("storage temporarily unavailable: {message}")]
    Unavailable { message: String },

    #[error("storage error: {message}")]
    Storage { message: String },
}

impl RepositoryError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }
}

pub type RepositoryResult<T> = Result<T, RepositoryError>;
