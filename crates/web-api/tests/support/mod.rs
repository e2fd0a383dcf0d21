use std::{net::SocketAddr, sync::Arc, time::Duration};

use application::{
    ChatService, ChatServiceDependencies, Clock, FriendRequestService,
    FriendRequestServiceDependencies, MessageStore, RetryConfig, RoomMembership, RoomRegistry,
    RoomSequencer, SessionConfig, SessionManager, SessionManagerDependencies, SystemClock,
};
use domain::UserId;
use infrastructure::{InMemoryStorage, Infrastructure};
use tokio::{net::TcpListener, sync::oneshot, task::JoinHandle};
use web_api::{router, AppState, JwtConfig, JwtIdentityProvider, JwtService};

/// 进程内启动的服务，数据放在内存存储中
pub struct TestApp {
    pub addr: SocketAddr,
    pub storage: Arc<InMemoryStorage>,
    pub registry: Arc<RoomRegistry>,
    pub jwt: Arc<JwtService>,
    shutdown: Option<oneshot::Sender<()>>,
    server: JoinHandle<()>,
}

pub struct TestOptions {
    pub idle_timeout: Duration,
    pub clock: Arc<dyn Clock>,
}

impl Default for TestOptions {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(30),
            clock: Arc::new(SystemClock),
        }
    }
}

impl TestApp {
    pub async fn spawn() -> Self {
        Self::spawn_with(TestOptions::default()).await
    }

    pub async fn spawn_with(options: TestOptions) -> Self {
        let storage = Arc::new(InMemoryStorage::new());
        let infrastructure = Infrastructure::in_memory(storage.clone());
        let repositories = infrastructure.repositories;

        let registry = Arc::new(RoomRegistry::new());
        let message_store = Arc::new(MessageStore::new(
            repositories.messages.clone(),
            options.clock.clone(),
            RetryConfig::once(Duration::from_millis(5)),
        ));
        let chat_service = Arc::new(ChatService::new(ChatServiceDependencies {
            room_repository: repositories.rooms.clone(),
            user_repository: repositories.users.clone(),
            message_store,
            registry: registry.clone(),
            sequencer: Arc::new(RoomSequencer::new()),
        }));
        let friend_request_service = Arc::new(FriendRequestService::new(
            FriendRequestServiceDependencies {
                user_repository: repositories.users.clone(),
                friend_request_repository: repositories.friend_requests.clone(),
                registry: registry.clone(),
                clock: options.clock.clone(),
            },
        ));

        let jwt = Arc::new(JwtService::new(JwtConfig {
            secret: "integration-test-secret-with-32-chars".into(),
            expiration_hours: 1,
        }));
        let identity_provider = Arc::new(JwtIdentityProvider::new(
            jwt.clone(),
            repositories.users.clone(),
        ));
        let session_manager = Arc::new(SessionManager::new(SessionManagerDependencies {
            identity_provider: identity_provider.clone(),
            membership_provider: Arc::new(RoomMembership::new(repositories.rooms.clone())),
            chat_service: chat_service.clone(),
            registry: registry.clone(),
            config: SessionConfig::default(),
        }));

        let state = AppState {
            chat_service,
            friend_request_service,
            session_manager,
            identity_provider,
            idle_timeout: options.idle_timeout,
        };

        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let app = router(state);

        let server = tokio::spawn(async move {
            axum::serve(listener, app.into_make_service())
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
                .ok();
        });

        Self {
            addr,
            storage,
            registry,
            jwt,
            shutdown: Some(shutdown_tx),
            server,
        }
    }

    pub fn http_url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn ws_url(&self, token: &str) -> String {
        format!("ws://{}/api/v1/ws?token={}", self.addr, token)
    }

    pub fn token(&self, user_id: UserId) -> String {
        self.jwt.generate_token(user_id).expect("token")
    }

    #[allow(dead_code)]
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        let _ = self.server.await;
    }
}
