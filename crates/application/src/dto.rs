use domain::{
    format_timestamp, FriendRequest, FriendRequestId, Message, MessageId, Room, RoomId, RoomKind,
    User, UserId,
};
use serde::{Deserialize, Serialize};

use crate::error::ApplicationError;

/// 客户端发来的消息帧 `{"room_id": <int>, "message": "<text>"}`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct InboundMessage {
    pub room_id: RoomId,
    pub message: String,
}

/// 已持久化消息的对外表示。时间戳由服务端分配，所有接收者看到的值相同。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatEvent {
    pub room_id: RoomId,
    pub message_id: MessageId,
    pub sender_id: UserId,
    /// 发送者用户名
    pub user: String,
    pub message: String,
    pub timestamp: String,
}

impl ChatEvent {
    pub fn from_message(message: &Message, username: &str) -> Self {
        Self {
            room_id: message.room_id,
            message_id: message.id,
            sender_id: message.sender_id,
            user: username.to_owned(),
            message: message.body.as_str().to_owned(),
            timestamp: format_timestamp(&message.created_at),
        }
    }
}

/// 单个房间的历史消息，按排序键升序
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomHistory {
    pub room_id: RoomId,
    pub messages: Vec<ChatEvent>,
}

/// 服务端发往客户端的帧
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// 会话激活时发送一次
    InitialSync { rooms: Vec<RoomHistory> },
    Message(ChatEvent),
    /// 会话中途加入房间后的补发历史
    RoomJoined(RoomHistory),
    Error {
        code: String,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        room_id: Option<RoomId>,
    },
}

impl ServerFrame {
    pub fn error(err: &ApplicationError, room_id: Option<RoomId>) -> Self {
        ServerFrame::Error {
            code: err.code().to_owned(),
            message: err.to_string(),
            room_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserDto {
    pub id: UserId,
    pub username: String,
}

impl From<&User> for UserDto {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            username: user.username.as_str().to_owned(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomDto {
    pub id: RoomId,
    pub kind: RoomKind,
    pub participants: Vec<UserId>,
    pub created_at: String,
}

impl From<&Room> for RoomDto {
    fn from(room: &Room) -> Self {
        Self {
            id: room.id,
            kind: room.kind,
            participants: room.participants.iter().copied().collect(),
            created_at: format_timestamp(&room.created_at),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FriendRequestDto {
    pub id: FriendRequestId,
    pub from_user: UserId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from_username: Option<String>,
    pub to_user: UserId,
    pub created_at: String,
}

impl From<&FriendRequest> for FriendRequestDto {
    fn from(request: &FriendRequest) -> Self {
        Self {
            id: request.id,
            from_user: request.from_user,
            from_username: None,
            to_user: request.to_user,
            created_at: format_timestamp(&request.created_at),
        }
    }
}
