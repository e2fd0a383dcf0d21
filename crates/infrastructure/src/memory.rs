//! 内存存储实现
//!
//! 与 Postgres 实现相同的仓储接口，用于开发环境和测试。
//! 每个房间一把消息日志锁，对应 Postgres 中的房间行锁。

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use domain::{
    AcceptOutcome, AppendOutcome, CreateRequestOutcome, DeclineOutcome, FriendRequest,
    FriendRequestId, FriendRequestRepository, Message, MessageId, MessageRepository, NewMessage,
    ParticipantPair, RepositoryError, RepositoryResult, Room, RoomId, RoomRepository, Timestamp,
    User, UserId, UserRepository, Username,
};
use tokio::sync::{Mutex, RwLock};

#[derive(Default)]
struct Directory {
    users: HashMap<UserId, User>,
    rooms: HashMap<RoomId, Room>,
    private_rooms: HashMap<ParticipantPair, RoomId>,
    requests: BTreeMap<FriendRequestId, FriendRequest>,
    pending_pairs: HashMap<ParticipantPair, FriendRequestId>,
}

impl Directory {
    fn insert_room(&mut self, room: Room) {
        if let Some(pair) = room.pair() {
            self.private_rooms.insert(pair, room.id);
        }
        self.rooms.insert(room.id, room);
    }

    fn remove_request(&mut self, id: FriendRequestId) -> Option<FriendRequest> {
        let request = self.requests.remove(&id)?;
        if let Ok(pair) = request.pair() {
            self.pending_pairs.remove(&pair);
        }
        Some(request)
    }
}

type RoomLog = Arc<Mutex<Vec<Message>>>;

pub struct InMemoryStorage {
    directory: RwLock<Directory>,
    logs: RwLock<HashMap<RoomId, RoomLog>>,
    next_user_id: AtomicI64,
    next_room_id: AtomicI64,
    next_message_id: AtomicI64,
    next_request_id: AtomicI64,
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self {
            directory: RwLock::new(Directory::default()),
            logs: RwLock::new(HashMap::new()),
            next_user_id: AtomicI64::new(1),
            next_room_id: AtomicI64::new(1),
            next_message_id: AtomicI64::new(1),
            next_request_id: AtomicI64::new(1),
        }
    }
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// 写入一个用户（用户由外部身份层拥有，这里只用于种子数据和测试）。
    pub async fn insert_user(&self, username: &str) -> RepositoryResult<User> {
        let username =
            Username::parse(username).map_err(|err| RepositoryError::storage(err.to_string()))?;
        let user = User::new(
            UserId(self.next_user_id.fetch_add(1, Ordering::SeqCst)),
            username,
        );
        self.directory
            .write()
            .await
            .users
            .insert(user.id, user.clone());
        Ok(user)
    }

    /// 创建群聊房间（群聊由外部管理路径创建）。
    pub async fn create_group_room(&self, participants: &[UserId]) -> RepositoryResult<Room> {
        let id = RoomId(self.next_room_id.fetch_add(1, Ordering::SeqCst));
        let room = Room::group(id, participants.iter().copied(), Utc::now())
            .map_err(|err| RepositoryError::storage(err.to_string()))?;
        self.directory.write().await.insert_room(room.clone());
        Ok(room)
    }

    /// 直接创建两人私聊房间，已存在时返回已有房间。
    pub async fn create_private_room(&self, a: UserId, b: UserId) -> RepositoryResult<Room> {
        let pair =
            ParticipantPair::new(a, b).map_err(|err| RepositoryError::storage(err.to_string()))?;
        let mut directory = self.directory.write().await;
        Ok(self.private_room_for(&mut directory, pair, Utc::now()).0)
    }

    fn private_room_for(
        &self,
        directory: &mut Directory,
        pair: ParticipantPair,
        now: Timestamp,
    ) -> (Room, bool) {
        if let Some(room) = directory
            .private_rooms
            .get(&pair)
            .and_then(|id| directory.rooms.get(id))
        {
            return (room.clone(), false);
        }
        let id = RoomId(self.next_room_id.fetch_add(1, Ordering::SeqCst));
        let room = Room::private(id, pair, now);
        directory.insert_room(room.clone());
        (room, true)
    }

    async fn existing_log(&self, room_id: RoomId) -> Option<RoomLog> {
        self.logs.read().await.get(&room_id).cloned()
    }

    /// 只为目录中存在的房间建日志，房间不会被删除
    async fn room_log(&self, room_id: RoomId) -> RoomLog {
        if let Some(log) = self.existing_log(room_id).await {
            return log;
        }
        self.logs.write().await.entry(room_id).or_default().clone()
    }

    fn sort_newest_first(rooms: &mut [Room]) {
        rooms.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
    }
}

#[async_trait]
impl UserRepository for InMemoryStorage {
    async fn find_by_id(&self, id: UserId) -> RepositoryResult<Option<User>> {
        Ok(self.directory.read().await.users.get(&id).cloned())
    }

    async fn find_by_ids(&self, ids: Vec<UserId>) -> RepositoryResult<Vec<User>> {
        let directory = self.directory.read().await;
        Ok(ids
            .iter()
            .filter_map(|id| directory.users.get(id).cloned())
            .collect())
    }
}

#[async_trait]
impl RoomRepository for InMemoryStorage {
    async fn find_by_id(&self, id: RoomId) -> RepositoryResult<Option<Room>> {
        Ok(self.directory.read().await.rooms.get(&id).cloned())
    }

    async fn list_for_user(&self, user: UserId) -> RepositoryResult<Vec<Room>> {
        let mut rooms: Vec<Room> = self
            .directory
            .read()
            .await
            .rooms
            .values()
            .filter(|room| room.is_participant(user))
            .cloned()
            .collect();
        Self::sort_newest_first(&mut rooms);
        Ok(rooms)
    }

    async fn room_ids_for_user(&self, user: UserId) -> RepositoryResult<Vec<RoomId>> {
        let rooms = RoomRepository::list_for_user(self, user).await?;
        Ok(rooms.into_iter().map(|room| room.id).collect())
    }
}

#[async_trait]
impl MessageRepository for InMemoryStorage {
    async fn append(&self, message: NewMessage) -> RepositoryResult<AppendOutcome> {
        {
            let directory = self.directory.read().await;
            match directory.rooms.get(&message.room_id) {
                None => return Ok(AppendOutcome::RoomNotFound),
                Some(room) if !room.is_participant(message.sender_id) => {
                    return Ok(AppendOutcome::NotMember)
                }
                Some(_) => {}
            }
        }

        let log = self.room_log(message.room_id).await;
        let mut log = log.lock().await;

        let created_at = match log.last() {
            Some(last) if last.created_at > message.submitted_at => last.created_at,
            _ => message.submitted_at,
        };
        let stored = Message {
            id: MessageId(self.next_message_id.fetch_add(1, Ordering::SeqCst)),
            room_id: message.room_id,
            sender_id: message.sender_id,
            body: message.body,
            created_at,
        };
        log.push(stored.clone());
        Ok(AppendOutcome::Appended(stored))
    }

    async fn list_since(
        &self,
        room_id: RoomId,
        after: MessageId,
        limit: Option<u32>,
    ) -> RepositoryResult<Vec<Message>> {
        let Some(log) = self.existing_log(room_id).await else {
            return Ok(Vec::new());
        };
        let log = log.lock().await;
        let limit = limit.map(|l| l as usize).unwrap_or(usize::MAX);
        Ok(log
            .iter()
            .filter(|m| m.id > after)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn list_recent(&self, room_id: RoomId, limit: u32) -> RepositoryResult<Vec<Message>> {
        let Some(log) = self.existing_log(room_id).await else {
            return Ok(Vec::new());
        };
        let log = log.lock().await;
        let skip = log.len().saturating_sub(limit as usize);
        Ok(log[skip..].to_vec())
    }
}

#[async_trait]
impl FriendRequestRepository for InMemoryStorage {
    async fn create(
        &self,
        from: UserId,
        to: UserId,
        now: Timestamp,
    ) -> RepositoryResult<CreateRequestOutcome> {
        let pair = FriendRequest::validate_pair(from, to)
            .map_err(|err| RepositoryError::storage(err.to_string()))?;
        let mut directory = self.directory.write().await;

        if directory.pending_pairs.contains_key(&pair) {
            return Ok(CreateRequestOutcome::Duplicate);
        }
        if directory.private_rooms.contains_key(&pair) {
            return Ok(CreateRequestOutcome::AlreadyFriends);
        }

        let request = FriendRequest {
            id: FriendRequestId(self.next_request_id.fetch_add(1, Ordering::SeqCst)),
            from_user: from,
            to_user: to,
            created_at: now,
        };
        directory.pending_pairs.insert(pair, request.id);
        directory.requests.insert(request.id, request.clone());
        Ok(CreateRequestOutcome::Created(request))
    }

    async fn list_incoming(&self, user: UserId) -> RepositoryResult<Vec<FriendRequest>> {
        let mut requests: Vec<FriendRequest> = self
            .directory
            .read()
            .await
            .requests
            .values()
            .filter(|r| r.to_user == user)
            .cloned()
            .collect();
        requests.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(requests)
    }

    async fn accept(
        &self,
        id: FriendRequestId,
        actor: UserId,
        now: Timestamp,
    ) -> RepositoryResult<AcceptOutcome> {
        let mut directory = self.directory.write().await;
        let Some(request) = directory.requests.get(&id).cloned() else {
            return Ok(AcceptOutcome::NotFound);
        };
        if request.ensure_recipient(actor, "accept").is_err() {
            return Ok(AcceptOutcome::Unauthorized);
        }
        let pair = request
            .pair()
            .map_err(|err| RepositoryError::storage(err.to_string()))?;

        let (room, room_created) = self.private_room_for(&mut directory, pair, now);
        directory.remove_request(id);

        Ok(AcceptOutcome::Accepted {
            request,
            room,
            room_created,
        })
    }

    async fn decline(
        &self,
        id: FriendRequestId,
        actor: UserId,
    ) -> RepositoryResult<DeclineOutcome> {
        let mut directory = self.directory.write().await;
        let Some(request) = directory.requests.get(&id) else {
            return Ok(DeclineOutcome::NotFound);
        };
        if request.ensure_recipient(actor, "decline").is_err() {
            return Ok(DeclineOutcome::Unauthorized);
        }
        match directory.remove_request(id) {
            Some(request) => Ok(DeclineOutcome::Declined(request)),
            None => Ok(DeclineOutcome::NotFound),
        }
    }
}
