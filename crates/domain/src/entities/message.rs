use serde::{Deserialize, Serialize};

use crate::value_objects::{MessageBody, MessageId, RoomId, Timestamp, UserId};

/// 已持久化的消息。创建后不可变。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub room_id: RoomId,
    pub sender_id: UserId,
    pub body: MessageBody,
    pub created_at: Timestamp,
}

impl Message {
    /// 房间内的排序键 `(created_at, id)`。
    pub fn ordering_key(&self) -> (Timestamp, MessageId) {
        (self.created_at, self.id)
    }
}

/// 待追加的消息，id 和最终时间戳由存储分配。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub room_id: RoomId,
    pub sender_id: UserId,
    pub body: MessageBody,
    /// 服务端收到消息的时间；存储会将其钳制为房间内不递减
    pub submitted_at: Timestamp,
}
