//! 基础设施层实现。
//!
//! 提供 Postgres 与内存两种存储适配器，实现领域层定义的仓储接口。

pub mod builder;
pub mod memory;
pub mod migrations;
pub mod repository;

pub use builder::{Infrastructure, InfrastructureConfig, InfrastructureError, Repositories};
pub use memory::InMemoryStorage;
pub use migrations::MIGRATOR;
pub use repository::{
    create_pg_pool, PgFriendRequestRepository, PgMessageRepository, PgRoomRepository, PgStorage,
    PgUserRepository,
};
