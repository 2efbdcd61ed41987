//! Adapter for actions that are backend API calls.
//!
//! Wraps an HTTP-style outcome into an [`ActionResult`]: success comes from
//! the variant, and a server-provided retry-after on throttling responses
//! (429, 503) becomes the next-call delay override, never shorter than a
//! minimum so a misbehaving backend can't make clients hammer it.

use std::future::Future;
use std::time::Duration;

use crate::action::{ActionResult, UpdateAction};

/// Floor for server-provided retry-after delays (15 minutes).
pub const DEFAULT_MIN_RETRY_AFTER_MS: u64 = 15 * 60 * 1000;

const TOO_MANY_REQUESTS: u16 = 429;
const SERVICE_UNAVAILABLE: u16 = 503;

/// Outcome of a backend call.
#[derive(Debug, Clone, PartialEq)]
pub enum ApiOutcome<R> {
    Success(R),
    HttpError {
        code: u16,
        message: String,
        retry_after: Option<Duration>,
    },
    NetworkError(String),
}

impl<R> ApiOutcome<R> {
    pub fn is_success(&self) -> bool {
        matches!(self, ApiOutcome::Success(_))
    }

    pub fn value(&self) -> Option<&R> {
        match self {
            ApiOutcome::Success(value) => Some(value),
            _ => None,
        }
    }

    /// Delay requested by the server, honored only for throttling codes.
    pub fn retry_after_ms(&self, min_retry_after_ms: u64) -> Option<u64> {
        match self {
            ApiOutcome::HttpError {
                code,
                retry_after: Some(retry_after),
                ..
            } if *code == TOO_MANY_REQUESTS || *code == SERVICE_UNAVAILABLE => {
                let requested = u64::try_from(retry_after.as_millis()).unwrap_or(u64::MAX);
                Some(requested.max(min_retry_after_ms))
            }
            _ => None,
        }
    }

    /// Convert into an action result with an explicit retry-after floor.
    pub fn into_action_result(self, min_retry_after_ms: u64) -> ActionResult<ApiOutcome<R>> {
        let is_success = self.is_success();
        let delay_override = self.retry_after_ms(min_retry_after_ms);
        ActionResult {
            value: self,
            is_success,
            next_call_delay_override: delay_override,
        }
    }
}

impl<R> From<ApiOutcome<R>> for ActionResult<ApiOutcome<R>> {
    fn from(outcome: ApiOutcome<R>) -> Self {
        outcome.into_action_result(DEFAULT_MIN_RETRY_AFTER_MS)
    }
}

/// Build an action from an API call without input.
pub fn api_call<R, F, Fut>(id: impl Into<String>, call: F) -> UpdateAction<(), ApiOutcome<R>>
where
    R: Send + 'static,
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ApiOutcome<R>> + Send + 'static,
{
    UpdateAction::new(id, move || {
        let fut = call();
        async move { ActionResult::from(fut.await) }
    })
}

/// Build an action from an API call with one input and a default supplier.
pub fn api_call_with_input<T, R, F, Fut, D, DFut>(
    id: impl Into<String>,
    call: F,
    default_input: D,
) -> UpdateAction<T, ApiOutcome<R>>
where
    T: Send + 'static,
    R: Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ApiOutcome<R>> + Send + 'static,
    D: Fn() -> DFut + Send + Sync + 'static,
    DFut: Future<Output = T> + Send + 'static,
{
    UpdateAction::with_input(
        id,
        move |input| {
            let fut = call(input);
            async move { ActionResult::from(fut.await) }
        },
        default_input,
    )
}
