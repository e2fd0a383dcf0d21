use std::sync::Arc;
use std::time::Duration;

use application::{ChatService, FriendRequestService, IdentityProvider, SessionManager};

#[derive(Clone)]
pub struct AppState {
    pub chat_service: Arc<ChatService>,
    pub friend_request_service: Arc<FriendRequestService>,
    pub session_manager: Arc<SessionManager>,
    pub identity_provider: Arc<dyn IdentityProvider>,
    /// 连接在该时长内没有任何帧即被关闭
    pub idle_timeout: Duration,
}
