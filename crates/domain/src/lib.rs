//! 聊天核心领域模型
//!
//! 包含用户、房间、消息、好友请求实体，以及存储适配器需要实现的仓储接口。

pub mod entities;
pub mod errors;
pub mod repositories;
pub mod value_objects;

// 重新导出常用类型
pub use entities::*;
pub use errors::*;
pub use repositories::*;
pub use value_objects::*;
