#![allow(dead_code)]

use std::{collections::HashMap, sync::Arc, time::Duration};

use application::{
    ApplicationError, ApplicationResult, ChatService, ChatServiceDependencies, Clock,
    FriendRequestService, FriendRequestServiceDependencies, Identity, IdentityProvider,
    MessageStore, RetryConfig, RoomMembership, RoomRegistry, RoomSequencer, SessionConfig,
    SessionManager, SessionManagerDependencies, SystemClock,
};
use async_trait::async_trait;
use domain::User;
use infrastructure::InMemoryStorage;
use tokio::sync::RwLock;

/// 以用户名作为凭证的身份提供者
#[derive(Default)]
pub struct StaticIdentities {
    users: RwLock<HashMap<String, Identity>>,
}

impl StaticIdentities {
    pub async fn register(&self, user: &User) -> String {
        let credential = format!("token-{}", user.username.as_str());
        self.users.write().await.insert(
            credential.clone(),
            Identity {
                user_id: user.id,
                username: user.username.as_str().to_owned(),
            },
        );
        credential
    }
}

#[async_trait]
impl IdentityProvider for StaticIdentities {
    async fn authenticate(&self, credential: &str) -> ApplicationResult<Identity> {
        self.users
            .read()
            .await
            .get(credential)
            .cloned()
            .ok_or(ApplicationError::Authentication)
    }
}

pub struct Harness {
    pub storage: Arc<InMemoryStorage>,
    pub identities: Arc<StaticIdentities>,
    pub registry: Arc<RoomRegistry>,
    pub chat: Arc<ChatService>,
    pub friends: Arc<FriendRequestService>,
    pub sessions: SessionManager,
}

impl Harness {
    pub fn new() -> Self {
        Self::with(Arc::new(SystemClock), SessionConfig::default())
    }

    pub fn with(clock: Arc<dyn Clock>, config: SessionConfig) -> Self {
        let storage = Arc::new(InMemoryStorage::new());
        let identities = Arc::new(StaticIdentities::default());
        let registry = Arc::new(RoomRegistry::new());

        let store = Arc::new(MessageStore::new(
            storage.clone(),
            clock.clone(),
            RetryConfig::once(Duration::from_millis(1)),
        ));
        let chat = Arc::new(ChatService::new(ChatServiceDependencies {
            room_repository: storage.clone(),
            user_repository: storage.clone(),
            message_store: store,
            registry: registry.clone(),
            sequencer: Arc::new(RoomSequencer::new()),
        }));
        let friends = Arc::new(FriendRequestService::new(FriendRequestServiceDependencies {
            user_repository: storage.clone(),
            friend_request_repository: storage.clone(),
            registry: registry.clone(),
            clock,
        }));
        let sessions = SessionManager::new(SessionManagerDependencies {
            identity_provider: identities.clone(),
            membership_provider: Arc::new(RoomMembership::new(storage.clone())),
            chat_service: chat.clone(),
            registry: registry.clone(),
            config,
        });

        Self {
            storage,
            identities,
            registry,
            chat,
            friends,
            sessions,
        }
    }

    /// 创建用户并返回其凭证
    pub async fn user(&self, name: &str) -> (User, String) {
        let user = self.storage.insert_user(name).await.expect("insert user");
        let credential = self.identities.register(&user).await;
        (user, credential)
    }
}
