use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::{
    AcceptOutcome, AppendOutcome, CreateRequestOutcome, DeclineOutcome, FriendRequest,
    FriendRequestId, FriendRequestRepository, Message, MessageBody, MessageId, MessageRepository,
    NewMessage, ParticipantPair, RepositoryError, RepositoryResult, Room, RoomId, RoomRepository,
    Timestamp, User, UserId, UserRepository, Username,
};
use sqlx::{postgres::PgPoolOptions, FromRow, PgConnection, PgPool};

/// 连接池耗尽、网络断开、序列化冲突视为暂时性故障
pub(crate) fn map_sqlx_err(err: sqlx::Error) -> RepositoryError {
    match &err {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            RepositoryError::unavailable(err.to_string())
        }
        sqlx::Error::RowNotFound => RepositoryError::NotFound,
        sqlx::Error::Database(db) if db.is_unique_violation() => RepositoryError::Conflict,
        sqlx::Error::Database(db)
            if matches!(db.code().as_deref(), Some("40001") | Some("40P01")) =>
        {
            RepositoryError::unavailable(err.to_string())
        }
        _ => RepositoryError::storage(err.to_string()),
    }
}

/// 提交阶段断线时无法判断事务是否已生效，不能当作暂时性故障重试。
/// 数据库明确拒绝的提交已回滚，按常规映射。
pub(crate) fn map_commit_err(err: sqlx::Error) -> RepositoryError {
    match err {
        sqlx::Error::Database(_) => map_sqlx_err(err),
        other => RepositoryError::storage(format!("commit outcome unknown: {other}")),
    }
}

fn invalid_data(message: impl Into<String>) -> RepositoryError {
    RepositoryError::storage(message)
}

#[derive(Debug, FromRow)]
struct UserRecord {
    id: i64,
    username: String,
}

impl TryFrom<UserRecord> for User {
    type Error = RepositoryError;

    fn try_from(value: UserRecord) -> Result<Self, Self::Error> {
        let username =
            Username::parse(value.username).map_err(|err| invalid_data(err.to_string()))?;
        Ok(User::new(UserId(value.id), username))
    }
}

#[derive(Debug, FromRow)]
struct RoomRecord {
    id: i64,
    is_private: bool,
    created_at: DateTime<Utc>,
    participants: Vec<i64>,
}

impl TryFrom<RoomRecord> for Room {
    type Error = RepositoryError;

    fn try_from(value: RoomRecord) -> Result<Self, Self::Error> {
        let id = RoomId(value.id);
        let participants: Vec<UserId> = value.participants.into_iter().map(UserId).collect();
        if value.is_private {
            match participants.as_slice() {
                [a, b] => {
                    let pair =
                        ParticipantPair::new(*a, *b).map_err(|err| invalid_data(err.to_string()))?;
                    Ok(Room::private(id, pair, value.created_at))
                }
                _ => Err(invalid_data(format!(
                    "private room {id} has {} participants",
                    participants.len()
                ))),
            }
        } else {
            Room::group(id, participants, value.created_at)
                .map_err(|err| invalid_data(err.to_string()))
        }
    }
}

#[derive(Debug, FromRow)]
struct MessageRecord {
    id: i64,
    room_id: i64,
    sender_id: i64,
    body: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<MessageRecord> for Message {
    type Error = RepositoryError;

    fn try_from(value: MessageRecord) -> Result<Self, Self::Error> {
        let body = MessageBody::new(value.body).map_err(|err| invalid_data(err.to_string()))?;
        Ok(Message {
            id: MessageId(value.id),
            room_id: RoomId(value.room_id),
            sender_id: UserId(value.sender_id),
            body,
            created_at: value.created_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct FriendRequestRecord {
    id: i64,
    from_user: i64,
    to_user: i64,
    created_at: DateTime<Utc>,
}

impl From<FriendRequestRecord> for FriendRequest {
    fn from(value: FriendRequestRecord) -> Self {
        FriendRequest {
            id: FriendRequestId(value.id),
            from_user: UserId(value.from_user),
            to_user: UserId(value.to_user),
            created_at: value.created_at,
        }
    }
}

const ROOM_COLUMNS: &str = r#"
    SELECT r.id, r.is_private, r.created_at,
           COALESCE(array_agg(p.user_id ORDER BY p.user_id) FILTER (WHERE p.user_id IS NOT NULL), '{}') AS participants
    FROM rooms r
    LEFT JOIN room_participants p ON p.room_id = r.id
"#;

async fn fetch_room(conn: &mut PgConnection, id: RoomId) -> RepositoryResult<Option<Room>> {
    let sql = format!("{ROOM_COLUMNS} WHERE r.id = $1 GROUP BY r.id");
    let record = sqlx::query_as::<_, RoomRecord>(&sql)
        .bind(id.get())
        .fetch_optional(conn)
        .await
        .map_err(map_sqlx_err)?;
    record.map(Room::try_from).transpose()
}

/// 同一用户对的好友请求写入在事务级 advisory lock 下串行执行
async fn lock_pair(conn: &mut PgConnection, pair: ParticipantPair) -> RepositoryResult<()> {
    sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
        .bind(format!("friend:{}:{}", pair.low(), pair.high()))
        .execute(conn)
        .await
        .map_err(map_sqlx_err)?;
    Ok(())
}

#[derive(Clone)]
pub struct PgUserRepository {
    pool: PgPool,
}

impl PgUserRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserRepository for PgUserRepository {
    async fn find_by_id(&self, id: UserId) -> RepositoryResult<Option<User>> {
        let record =
            sqlx::query_as::<_, UserRecord>(r#"SELECT id, username FROM users WHERE id = $1"#)
                .bind(id.get())
                .fetch_optional(&self.pool)
                .await
                .map_err(map_sqlx_err)?;
        record.map(User::try_from).transpose()
    }

    async fn find_by_ids(&self, ids: Vec<UserId>) -> RepositoryResult<Vec<User>> {
        let ids: Vec<i64> = ids.into_iter().map(i64::from).collect();
        let records = sqlx::query_as::<_, UserRecord>(
            r#"SELECT id, username FROM users WHERE id = ANY($1)"#,
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        records.into_iter().map(User::try_from).collect()
    }
}

#[derive(Clone)]
pub struct PgRoomRepository {
    pool: PgPool,
}

impl PgRoomRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RoomRepository for PgRoomRepository {
    async fn find_by_id(&self, id: RoomId) -> RepositoryResult<Option<Room>> {
        let mut conn = self.pool.acquire().await.map_err(map_sqlx_err)?;
        fetch_room(&mut conn, id).await
    }

    async fn list_for_user(&self, user: UserId) -> RepositoryResult<Vec<Room>> {
        let sql = format!(
            "{ROOM_COLUMNS} WHERE r.id IN (SELECT room_id FROM room_participants WHERE user_id = $1) \
             GROUP BY r.id ORDER BY r.created_at DESC, r.id DESC"
        );
        let records = sqlx::query_as::<_, RoomRecord>(&sql)
            .bind(user.get())
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        records.into_iter().map(Room::try_from).collect()
    }

    async fn room_ids_for_user(&self, user: UserId) -> RepositoryResult<Vec<RoomId>> {
        let ids: Vec<i64> = sqlx::query_scalar(
            r#"
            SELECT r.id FROM rooms r
            JOIN room_participants p ON p.room_id = r.id
            WHERE p.user_id = $1
            ORDER BY r.created_at DESC, r.id DESC
            "#,
        )
        .bind(user.get())
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(ids.into_iter().map(RoomId).collect())
    }
}

#[derive(Clone)]
pub struct PgMessageRepository {
    pool: PgPool,
}

impl PgMessageRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MessageRepository for PgMessageRepository {
    async fn append(&self, message: NewMessage) -> RepositoryResult<AppendOutcome> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_err)?;

        // 房间行锁串行化同一房间的追加
        let locked: Option<i64> = sqlx::query_scalar(r#"SELECT id FROM rooms WHERE id = $1 FOR UPDATE"#)
            .bind(message.room_id.get())
            .fetch_optional(&mut *tx)
            .await
            .map_err(map_sqlx_err)?;
        if locked.is_none() {
            return Ok(AppendOutcome::RoomNotFound);
        }

        let is_member: bool = sqlx::query_scalar(
            r#"SELECT EXISTS(SELECT 1 FROM room_participants WHERE room_id = $1 AND user_id = $2)"#,
        )
        .bind(message.room_id.get())
        .bind(message.sender_id.get())
        .fetch_one(&mut *tx)
        .await
        .map_err(map_sqlx_err)?;
        if !is_member {
            return Ok(AppendOutcome::NotMember);
        }

        let record = sqlx::query_as::<_, MessageRecord>(
            r#"
            INSERT INTO messages (room_id, sender_id, body, created_at)
            VALUES (
                $1, $2, $3,
                GREATEST($4::timestamptz, (SELECT max(created_at) FROM messages WHERE room_id = $1))
            )
            RETURNING id, room_id, sender_id, body, created_at
            "#,
        )
        .bind(message.room_id.get())
        .bind(message.sender_id.get())
        .bind(message.body.as_str())
        .bind(message.submitted_at)
        .fetch_one(&mut *tx)
        .await
        .map_err(map_sqlx_err)?;

        tx.commit().await.map_err(map_commit_err)?;
        Ok(AppendOutcome::Appended(Message::try_from(record)?))
    }

    async fn list_since(
        &self,
        room_id: RoomId,
        after: MessageId,
        limit: Option<u32>,
    ) -> RepositoryResult<Vec<Message>> {
        let records = sqlx::query_as::<_, MessageRecord>(
            r#"
            SELECT id, room_id, sender_id, body, created_at
            FROM messages
            WHERE room_id = $1 AND id > $2
            ORDER BY created_at ASC, id ASC
            LIMIT $3
            "#,
        )
        .bind(room_id.get())
        .bind(after.get())
        .bind(limit.map(i64::from))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        records.into_iter().map(Message::try_from).collect()
    }

    async fn list_recent(&self, room_id: RoomId, limit: u32) -> RepositoryResult<Vec<Message>> {
        let records = sqlx::query_as::<_, MessageRecord>(
            r#"
            SELECT id, room_id, sender_id, body, created_at FROM (
                SELECT id, room_id, sender_id, body, created_at
                FROM messages
                WHERE room_id = $1
                ORDER BY created_at DESC, id DESC
                LIMIT $2
            ) recent
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(room_id.get())
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        records.into_iter().map(Message::try_from).collect()
    }
}

#[derive(Clone)]
pub struct PgFriendRequestRepository {
    pool: PgPool,
}

impl PgFriendRequestRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn lock_request(
        conn: &mut PgConnection,
        id: FriendRequestId,
    ) -> RepositoryResult<Option<FriendRequest>> {
        let record = sqlx::query_as::<_, FriendRequestRecord>(
            r#"SELECT id, from_user, to_user, created_at FROM friend_requests WHERE id = $1 FOR UPDATE"#,
        )
        .bind(id.get())
        .fetch_optional(conn)
        .await
        .map_err(map_sqlx_err)?;
        Ok(record.map(FriendRequest::from))
    }
}

#[async_trait]
impl FriendRequestRepository for PgFriendRequestRepository {
    async fn create(
        &self,
        from: UserId,
        to: UserId,
        now: Timestamp,
    ) -> RepositoryResult<CreateRequestOutcome> {
        let pair =
            FriendRequest::validate_pair(from, to).map_err(|err| invalid_data(err.to_string()))?;
        let mut tx = self.pool.begin().await.map_err(map_sqlx_err)?;
        lock_pair(&mut tx, pair).await?;

        let pending: bool = sqlx::query_scalar(
            r#"SELECT EXISTS(SELECT 1 FROM friend_requests WHERE pair_low = $1 AND pair_high = $2)"#,
        )
        .bind(pair.low().get())
        .bind(pair.high().get())
        .fetch_one(&mut *tx)
        .await
        .map_err(map_sqlx_err)?;
        if pending {
            return Ok(CreateRequestOutcome::Duplicate);
        }

        let friends: bool = sqlx::query_scalar(
            r#"SELECT EXISTS(SELECT 1 FROM rooms WHERE is_private AND private_low = $1 AND private_high = $2)"#,
        )
        .bind(pair.low().get())
        .bind(pair.high().get())
        .fetch_one(&mut *tx)
        .await
        .map_err(map_sqlx_err)?;
        if friends {
            return Ok(CreateRequestOutcome::AlreadyFriends);
        }

        let inserted = sqlx::query_as::<_, FriendRequestRecord>(
            r#"
            INSERT INTO friend_requests (from_user, to_user, created_at)
            VALUES ($1, $2, $3)
            RETURNING id, from_user, to_user, created_at
            "#,
        )
        .bind(from.get())
        .bind(to.get())
        .bind(now)
        .fetch_one(&mut *tx)
        .await
        .map_err(map_sqlx_err);

        let record = match inserted {
            Ok(record) => record,
            Err(RepositoryError::Conflict) => return Ok(CreateRequestOutcome::Duplicate),
            Err(err) => return Err(err),
        };

        tx.commit().await.map_err(map_commit_err)?;
        Ok(CreateRequestOutcome::Created(record.into()))
    }

    async fn list_incoming(&self, user: UserId) -> RepositoryResult<Vec<FriendRequest>> {
        let records = sqlx::query_as::<_, FriendRequestRecord>(
            r#"
            SELECT id, from_user, to_user, created_at
            FROM friend_requests
            WHERE to_user = $1
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(user.get())
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(records.into_iter().map(FriendRequest::from).collect())
    }

    async fn accept(
        &self,
        id: FriendRequestId,
        actor: UserId,
        now: Timestamp,
    ) -> RepositoryResult<AcceptOutcome> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_err)?;

        // 并发接受时第二个事务在这里等待，第一个提交后读不到该行
        let Some(request) = Self::lock_request(&mut tx, id).await? else {
            return Ok(AcceptOutcome::NotFound);
        };
        if request.ensure_recipient(actor, "accept").is_err() {
            return Ok(AcceptOutcome::Unauthorized);
        }
        let pair = request.pair().map_err(|err| invalid_data(err.to_string()))?;
        lock_pair(&mut tx, pair).await?;

        let existing: Option<i64> = sqlx::query_scalar(
            r#"SELECT id FROM rooms WHERE is_private AND private_low = $1 AND private_high = $2"#,
        )
        .bind(pair.low().get())
        .bind(pair.high().get())
        .fetch_optional(&mut *tx)
        .await
        .map_err(map_sqlx_err)?;

        let (room_id, room_created) = match existing {
            Some(id) => (id, false),
            None => {
                let id: i64 = sqlx::query_scalar(
                    r#"
                    INSERT INTO rooms (is_private, private_low, private_high, created_at)
                    VALUES (TRUE, $1, $2, $3)
                    RETURNING id
                    "#,
                )
                .bind(pair.low().get())
                .bind(pair.high().get())
                .bind(now)
                .fetch_one(&mut *tx)
                .await
                .map_err(map_sqlx_err)?;
                (id, true)
            }
        };

        sqlx::query(
            r#"
            INSERT INTO room_participants (room_id, user_id)
            VALUES ($1, $2), ($1, $3)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(room_id)
        .bind(pair.low().get())
        .bind(pair.high().get())
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_err)?;

        sqlx::query(r#"DELETE FROM friend_requests WHERE id = $1"#)
            .bind(id.get())
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_err)?;

        let room = fetch_room(&mut tx, RoomId(room_id))
            .await?
            .ok_or(RepositoryError::NotFound)?;

        tx.commit().await.map_err(map_commit_err)?;
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
        let mut tx = self.pool.begin().await.map_err(map_sqlx_err)?;

        let Some(request) = Self::lock_request(&mut tx, id).await? else {
            return Ok(DeclineOutcome::NotFound);
        };
        if request.ensure_recipient(actor, "decline").is_err() {
            return Ok(DeclineOutcome::Unauthorized);
        }

        sqlx::query(r#"DELETE FROM friend_requests WHERE id = $1"#)
            .bind(id.get())
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_err)?;

        tx.commit().await.map_err(map_commit_err)?;
        Ok(DeclineOutcome::Declined(request))
    }
}

/// Postgres 仓储集合
#[derive(Clone)]
pub struct PgStorage {
    pub pool: PgPool,
    pub user_repository: Arc<PgUserRepository>,
    pub room_repository: Arc<PgRoomRepository>,
    pub message_repository: Arc<PgMessageRepository>,
    pub friend_request_repository: Arc<PgFriendRequestRepository>,
}

impl PgStorage {
    pub fn new(pool: PgPool) -> Self {
        Self {
            user_repository: Arc::new(PgUserRepository::new(pool.clone())),
            room_repository: Arc::new(PgRoomRepository::new(pool.clone())),
            message_repository: Arc::new(PgMessageRepository::new(pool.clone())),
            friend_request_repository: Arc::new(PgFriendRequestRepository::new(pool.clone())),
            pool,
        }
    }
}

pub async fn create_pg_pool(
    database_url: &str,
    max_connections: u32,
) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
}
