//! 主应用程序入口
//!
//! 加载配置、装配各层依赖并启动 Axum 服务。

use std::{sync::Arc, time::Duration};

use application::{
    ChatService, ChatServiceDependencies, Clock, FriendRequestService,
    FriendRequestServiceDependencies, MessageStore, RetryConfig, RoomMembership, RoomRegistry,
    RoomSequencer, SessionConfig, SessionManager, SessionManagerDependencies, SystemClock,
};
use config::{AppConfig, StorageBackend};
use infrastructure::{InMemoryStorage, Infrastructure, InfrastructureConfig};
use tracing_subscriber::EnvFilter;
use web_api::{router, AppState, JwtIdentityProvider, JwtService};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load()?;

    // RUST_LOG 优先，其次是配置文件中的过滤表达式
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log.filter))?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let infrastructure = match config.storage.backend {
        StorageBackend::Postgres => {
            tracing::info!(
                "连接数据库: {}",
                config.database.url.split('@').next_back().unwrap_or("unknown")
            );
            Infrastructure::connect(InfrastructureConfig {
                database_url: config.database.url.clone(),
                max_connections: config.database.max_connections,
            })
            .await?
        }
        StorageBackend::Memory => {
            tracing::warn!("使用内存存储，重启后数据丢失");
            Infrastructure::in_memory(Arc::new(InMemoryStorage::new()))
        }
    };
    let repositories = infrastructure.repositories;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let registry = Arc::new(RoomRegistry::new());

    let message_store = Arc::new(MessageStore::new(
        repositories.messages.clone(),
        clock.clone(),
        RetryConfig::once(Duration::from_millis(config.store.retry_backoff_ms)),
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
            clock,
        },
    ));

    let jwt_service = Arc::new(JwtService::new(config.jwt.clone()));
    let identity_provider = Arc::new(JwtIdentityProvider::new(
        jwt_service.clone(),
        repositories.users.clone(),
    ));

    let session_manager = Arc::new(SessionManager::new(SessionManagerDependencies {
        identity_provider: identity_provider.clone(),
        membership_provider: Arc::new(RoomMembership::new(repositories.rooms.clone())),
        chat_service: chat_service.clone(),
        registry,
        config: SessionConfig {
            outbox_capacity: config.session.outbox_capacity,
            history_limit: config.session.history_limit,
        },
    }));

    let state = AppState {
        chat_service,
        friend_request_service,
        session_manager,
        identity_provider,
        idle_timeout: Duration::from_secs(config.session.idle_timeout_secs),
    };

    let app = router(state);
    let bind_addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;

    tracing::info!("聊天室服务器启动在 http://{}", bind_addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("服务器已停止");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "无法监听关闭信号");
        std::future::pending::<()>().await;
    }
}
