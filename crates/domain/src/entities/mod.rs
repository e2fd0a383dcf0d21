//! 领域实体定义
//!
//! 包含聊天核心的实体：用户、房间、消息、好友请求。

pub mod friend_request;
pub mod message;
pub mod room;
pub mod user;

pub use friend_request::FriendRequest;
pub use message::{Message, NewMessage};
pub use room::{ParticipantPair, Room, RoomKind};
pub use user::User;
