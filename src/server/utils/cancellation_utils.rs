use std::future::Future;

use tokio_util::sync::CancellationToken;

use crate::server::error::{AppResult, Error};

/// runs `fut` until it finishes or `cancel` fires, cancellation surfaces as `Error::Timeout`
pub async fn until_cancelled<F, T>(cancel: &CancellationToken, fut: F) -> AppResult<T>
where
    F: Future<Output = AppResult<T>>,
{
    cancel
        .run_until_cancelled(fut)
        .await
        .unwrap_or(Err(Error::Timeout))
}

/// reqwest timeouts are the same thing as a client going away as far as callers care
pub fn map_transport_error(context: &str, e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Timeout
    } else {
        Error::UnexpectedError(format!("{}: {}", context, e))
    }
}
