//! 应用层实现。
//!
//! 这里提供围绕领域模型的用例服务：消息存储、房间注册表与广播扇出、
//! 连接会话、好友请求状态机，以及对外部身份与成员关系的抽象。

pub mod clock;
pub mod dto;
pub mod error;
pub mod membership;
pub mod message_store;
pub mod registry;
pub mod retry;
pub mod sequencer;
pub mod services;
pub mod session;

pub use clock::{Clock, FixedClock, SystemClock};
pub use dto::{
    ChatEvent, FriendRequestDto, InboundMessage, RoomDto, RoomHistory, ServerFrame, UserDto,
};
pub use error::{ApplicationError, ApplicationResult};
pub use membership::{Identity, IdentityProvider, MembershipProvider, RoomMembership};
pub use message_store::MessageStore;
pub use registry::{
    DeliveryFailure, PublishReport, RoomRegistry, SessionEvent, SessionHandle, SessionId,
};
pub use retry::{retry_async, RetryConfig, Retryable};
pub use sequencer::RoomSequencer;
pub use services::{
    ChatService, ChatServiceDependencies, FriendRequestService, FriendRequestServiceDependencies,
    PostedMessage,
};
pub use session::{
    ConnectionSession, InitialSync, SessionConfig, SessionManager, SessionManagerDependencies,
    SessionState,
};
