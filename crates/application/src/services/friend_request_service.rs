use std::collections::HashMap;
use std::sync::Arc;

use domain::{
    AcceptOutcome, CreateRequestOutcome, DeclineOutcome, DomainError, FriendRequest,
    FriendRequestId, FriendRequestRepository, UserId, UserRepository,
};

use crate::{
    clock::Clock,
    dto::{FriendRequestDto, RoomDto},
    error::ApplicationResult,
    registry::{RoomRegistry, SessionEvent},
};

pub struct FriendRequestServiceDependencies {
    pub user_repository: Arc<dyn UserRepository>,
    pub friend_request_repository: Arc<dyn FriendRequestRepository>,
    pub registry: Arc<RoomRegistry>,
    pub clock: Arc<dyn Clock>,
}

/// 好友请求状态机：pending -> accepted / declined
pub struct FriendRequestService {
    deps: FriendRequestServiceDependencies,
}

impl FriendRequestService {
    pub fn new(deps: FriendRequestServiceDependencies) -> Self {
        Self { deps }
    }

    pub async fn send(&self, from: UserId, to: UserId) -> ApplicationResult<FriendRequestDto> {
        FriendRequest::validate_pair(from, to)?;

        if self.deps.user_repository.find_by_id(to).await?.is_none() {
            return Err(DomainError::UserNotFound.into());
        }

        let now = self.deps.clock.now();
        match self
            .deps
            .friend_request_repository
            .create(from, to, now)
            .await?
        {
            CreateRequestOutcome::Created(request) => {
                tracing::info!(
                    request_id = %request.id,
                    from_user = %from,
                    to_user = %to,
                    "好友请求已创建"
                );
                Ok(FriendRequestDto::from(&request))
            }
            CreateRequestOutcome::Duplicate => Err(DomainError::DuplicateRequest.into()),
            CreateRequestOutcome::AlreadyFriends => Err(DomainError::AlreadyFriends.into()),
        }
    }

    /// 接受请求。成功后通知双方所有在线会话订阅新房间。
    pub async fn accept(&self, id: FriendRequestId, actor: UserId) -> ApplicationResult<RoomDto> {
        let now = self.deps.clock.now();
        match self
            .deps
            .friend_request_repository
            .accept(id, actor, now)
            .await?
        {
            AcceptOutcome::Accepted {
                request,
                room,
                room_created,
            } => {
                tracing::info!(
                    request_id = %request.id,
                    room_id = %room.id,
                    room_created,
                    "好友请求已接受"
                );
                for user in [request.from_user, request.to_user] {
                    self.deps
                        .registry
                        .notify_user(user, SessionEvent::RoomAvailable(room.id))
                        .await;
                }
                Ok(RoomDto::from(&room))
            }
            AcceptOutcome::NotFound => Err(DomainError::RequestNotFound.into()),
            AcceptOutcome::Unauthorized => Err(DomainError::unauthorized("accept").into()),
        }
    }

    pub async fn decline(&self, id: FriendRequestId, actor: UserId) -> ApplicationResult<()> {
        match self
            .deps
            .friend_request_repository
            .decline(id, actor)
            .await?
        {
            DeclineOutcome::Declined(request) => {
                tracing::info!(request_id = %request.id, "好友请求已拒绝");
                Ok(())
            }
            DeclineOutcome::NotFound => Err(DomainError::RequestNotFound.into()),
            DeclineOutcome::Unauthorized => Err(DomainError::unauthorized("decline").into()),
        }
    }

    /// 发给 `user` 的待处理请求，最早的在前
    pub async fn list_incoming(&self, user: UserId) -> ApplicationResult<Vec<FriendRequestDto>> {
        if self.deps.user_repository.find_by_id(user).await?.is_none() {
            return Err(DomainError::UserNotFound.into());
        }

        let requests = self
            .deps
            .friend_request_repository
            .list_incoming(user)
            .await?;
        if requests.is_empty() {
            return Ok(Vec::new());
        }

        let senders: Vec<UserId> = requests.iter().map(|r| r.from_user).collect();
        let names: HashMap<UserId, String> = self
            .deps
            .user_repository
            .find_by_ids(senders)
            .await?
            .into_iter()
            .map(|u| (u.id, u.username.as_str().to_owned()))
            .collect();

        Ok(requests
            .iter()
            .map(|request| {
                let mut dto = FriendRequestDto::from(request);
                dto.from_username = names.get(&request.from_user).cloned();
                dto
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::error::ApplicationError;
    use domain::{MockFriendRequestRepository, MockUserRepository, User, Username};

    fn service(
        users: MockUserRepository,
        requests: MockFriendRequestRepository,
    ) -> FriendRequestService {
        FriendRequestService::new(FriendRequestServiceDependencies {
            user_repository: Arc::new(users),
            friend_request_repository: Arc::new(requests),
            registry: Arc::new(RoomRegistry::new()),
            clock: Arc::new(SystemClock),
        })
    }

    #[tokio::test]
    async fn self_request_skips_storage() {
        let mut users = MockUserRepository::new();
        users.expect_find_by_id().never();
        let mut requests = MockFriendRequestRepository::new();
        requests.expect_create().never();

        let err = service(users, requests)
            .send(UserId(1), UserId(1))
            .await
            .expect_err("self request");
        assert!(matches!(err, ApplicationError::Domain(DomainError::SelfRequest)));
    }

    #[tokio::test]
    async fn unknown_target_is_user_not_found() {
        let mut users = MockUserRepository::new();
        users.expect_find_by_id().returning(|_| Ok(None));
        let mut requests = MockFriendRequestRepository::new();
        requests.expect_create().never();

        let err = service(users, requests)
            .send(UserId(1), UserId(2))
            .await
            .expect_err("target missing");
        assert!(matches!(err, ApplicationError::Domain(DomainError::UserNotFound)));
    }

    #[tokio::test]
    async fn duplicate_outcome_maps_to_error() {
        let mut users = MockUserRepository::new();
        users.expect_find_by_id().returning(|id| {
            Ok(Some(User::new(id, Username::parse("bob").expect("valid name"))))
        });
        let mut requests = MockFriendRequestRepository::new();
        requests
            .expect_create()
            .returning(|_, _, _| Ok(CreateRequestOutcome::Duplicate));

        let err = service(users, requests)
            .send(UserId(1), UserId(2))
            .await
            .expect_err("duplicate");
        assert!(matches!(err, ApplicationError::Domain(DomainError::DuplicateRequest)));
    }

    #[tokio::test]
    async fn wrong_actor_cannot_decline() {
        let users = MockUserRepository::new();
        let mut requests = MockFriendRequestRepository::new();
        requests
            .expect_decline()
            .returning(|_, _| Ok(DeclineOutcome::Unauthorized));

        let err = service(users, requests)
            .decline(FriendRequestId(4), UserId(1))
            .await
            .expect_err("only recipient");
        assert_eq!(err.code(), "unauthorized");
    }
}
