use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use domain::RepositoryError;
use tokio::time::sleep;

/// 可以判断是否值得重试的错误
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

impl Retryable for RepositoryError {
    fn is_retryable(&self) -> bool {
        self.is_transient()
    }
}

#[derive(Clone, Debug)]
pub struct RetryConfig {
    /// 总尝试次数（包含第一次）
    pub max_attempts: u32,
    /// 每次重试前的固定等待
    pub delay: Duration,
}

impl RetryConfig {
    /// 暂时性故障在同一请求内重试一次
    pub fn once(delay: Duration) -> Self {
        Self {
            max_attempts: 2,
            delay,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::once(Duration::from_millis(50))
    }
}

pub async fn retry_async<F, Fut, T, E>(config: &RetryConfig, mut op: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable + Display,
{
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) => {
                if attempt >= config.max_attempts || !e.is_retryable() {
                    return Err(e);
                }
                tracing::warn!(attempt, error = %e, delay = ?config.delay, "存储暂时不可用，准备重试");
                sleep(config.delay).await;
            }
        }
    }
}
