use serde::{Deserialize, Serialize};

use crate::value_objects::{UserId, Username};

/// 用户身份。由外部身份层拥有，聊天核心只读取。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: Username,
}

impl User {
    pub fn new(id: UserId, username: Username) -> Self {
        Self { id, username }
    }
}
