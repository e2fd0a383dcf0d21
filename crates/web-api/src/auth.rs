//! JWT 认证模块
//!
//! 提供 JWT token 生成、验证，以及基于 JWT 的身份提供者和请求提取器。

use std::sync::Arc;

use application::{ApplicationError, ApplicationResult, Identity, IdentityProvider};
use async_trait::async_trait;
use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts, HeaderMap},
};
use config::JwtConfig;
use domain::{UserId, UserRepository};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::{error::ApiError, state::AppState};

/// JWT Claims 结构
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub user_id: i64,
    pub exp: i64, // 过期时间 (Unix timestamp)
}

/// JWT Token 服务（HS256）
#[derive(Clone)]
pub struct JwtService {
    config: JwtConfig,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl JwtService {
    pub fn new(config: JwtConfig) -> Self {
        let encoding_key = EncodingKey::from_secret(config.secret.as_ref());
        let decoding_key = DecodingKey::from_secret(config.secret.as_ref());

        Self {
            config,
            encoding_key,
            decoding_key,
        }
    }

    /// 生成 JWT token。签发属于外部身份层，这里用于开发工具和测试。
    pub fn generate_token(&self, user_id: UserId) -> Result<String, ApiError> {
        let now = chrono::Utc::now();
        let exp = now + chrono::Duration::hours(self.config.expiration_hours);

        let claims = Claims {
            user_id: user_id.get(),
            exp: exp.timestamp(),
        };

        encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|err| ApiError::internal_server_error(format!("Token generation failed: {err}")))
    }

    /// 验证并解析 JWT token
    pub fn verify_token(&self, token: &str) -> Result<Claims, ApiError> {
        decode::<Claims>(token, &self.decoding_key, &Validation::default())
            .map(|token_data| token_data.claims)
            .map_err(|err| ApiError::unauthorized(format!("Invalid token: {err}")))
    }
}

/// 从 `Authorization: Bearer <token>` 中取出 token
pub fn bearer_token(headers: &HeaderMap) -> Result<&str, ApiError> {
    let auth_header = headers
        .get(AUTHORIZATION)
        .and_then(|header| header.to_str().ok())
        .ok_or_else(|| ApiError::unauthorized("Missing authorization header"))?;

    auth_header
        .strip_prefix("Bearer ")
        .ok_or_else(|| ApiError::unauthorized("Invalid authorization header format"))
}

/// 凭证即 JWT；subject 必须对应一个存在的用户
pub struct JwtIdentityProvider {
    jwt: Arc<JwtService>,
    users: Arc<dyn UserRepository>,
}

impl JwtIdentityProvider {
    pub fn new(jwt: Arc<JwtService>, users: Arc<dyn UserRepository>) -> Self {
        Self { jwt, users }
    }
}

#[async_trait]
impl IdentityProvider for JwtIdentityProvider {
    async fn authenticate(&self, credential: &str) -> ApplicationResult<Identity> {
        let claims = self
            .jwt
            .verify_token(credential)
            .map_err(|_| ApplicationError::Authentication)?;

        let user = self
            .users
            .find_by_id(UserId(claims.user_id))
            .await?
            .ok_or(ApplicationError::Authentication)?;

        Ok(Identity {
            user_id: user.id,
            username: user.username.as_str().to_owned(),
        })
    }
}

/// 已认证的 HTTP 调用者
#[derive(Debug, Clone)]
pub struct AuthUser(pub Identity);

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers)?;
        let identity = state.identity_provider.authenticate(token).await?;
        Ok(AuthUser(identity))
    }
}
