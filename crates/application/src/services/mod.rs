mod chat_service;
mod friend_request_service;

pub use chat_service::{ChatService, ChatServiceDependencies, PostedMessage};
pub use friend_request_service::{FriendRequestService, FriendRequestServiceDependencies};
