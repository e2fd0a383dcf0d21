//! 房间实体定义
//!
//! 房间是广播范围和授权范围的基本单位。好友关系不再是用户之间的对称边，
//! 而是表示为“恰好包含这两个参与者的私聊房间存在”。

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::errors::{DomainError, DomainResult};
use crate::value_objects::{RoomId, Timestamp, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoomKind {
    /// 两人私聊，由好友请求接受时创建
    Private,
    /// 群聊，由外部管理路径创建
    Group,
}

/// 无序的用户对，`low < high`。
///
/// 好友请求去重和私聊房间唯一性都以它为键。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ParticipantPair {
    low: UserId,
    high: UserId,
}

impl ParticipantPair {
    pub fn new(a: UserId, b: UserId) -> DomainResult<Self> {
        if a == b {
            return Err(DomainError::invalid_argument(
                "participants",
                "a pair needs two distinct users",
            ));
        }
        Ok(Self {
            low: a.min(b),
            high: a.max(b),
        })
    }

    pub fn low(&self) -> UserId {
        self.low
    }

    pub fn high(&self) -> UserId {
        self.high
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub id: RoomId,
    pub kind: RoomKind,
    pub participants: BTreeSet<UserId>,
    pub created_at: Timestamp,
}

impl Room {
    pub fn private(id: RoomId, pair: ParticipantPair, created_at: Timestamp) -> Self {
        Self {
            id,
            kind: RoomKind::Private,
            participants: BTreeSet::from([pair.low(), pair.high()]),
            created_at,
        }
    }

    pub fn group(
        id: RoomId,
        participants: impl IntoIterator<Item = UserId>,
        created_at: Timestamp,
    ) -> DomainResult<Self> {
        let participants: BTreeSet<UserId> = participants.into_iter().collect();
        if participants.is_empty() {
            return Err(DomainError::invalid_argument(
                "participants",
                "a room needs at least one participant",
            ));
        }
        Ok(Self {
            id,
            kind: RoomKind::Group,
            participants,
            created_at,
        })
    }

    pub fn is_participant(&self, user: UserId) -> bool {
        self.participants.contains(&user)
    }

    /// 私聊房间的用户对；群聊或数据不完整时返回 `None`。
    pub fn pair(&self) -> Option<ParticipantPair> {
        if self.kind != RoomKind::Private || self.participants.len() != 2 {
            return None;
        }
        let mut iter = self.participants.iter().copied();
        let (a, b) = (iter.next()?, iter.next()?);
        ParticipantPair::new(a, b).ok()
    }

    /// 除 `user` 之外的第一个参与者。
    pub fn peer_of(&self, user: UserId) -> Option<UserId> {
        self.participants.iter().copied().find(|id| *id != user)
    }
}
