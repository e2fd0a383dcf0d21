use sqlx::migrate::Migrator;

/// 嵌入的数据库迁移，位于仓库根目录 `migrations/`
pub static MIGRATOR: Migrator = sqlx::migrate!("../../migrations");
