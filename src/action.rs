//! Schedulable actions and their results.
//!
//! An [`UpdateAction`] comes in two shapes:
//! - no input: `UpdateAction<(), R>` built with [`UpdateAction::new`];
//! - one typed input with a default supplier, built with
//!   [`UpdateAction::with_input`]. Periodic runs always use the default input;
//!   explicit runs may pass their own.
//!
//! The registry stores actions type-erased behind [`PeriodicAction`], which
//! only exposes what periodic scheduling needs: the id and a run that reports
//! the [`CallOutcome`].

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::BoxFuture;

/// Unique action identifier.
pub type ActionId = String;

/// What an action returns on every execution.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionResult<R> {
    /// Payload handed back to explicit callers.
    pub value: R,
    /// Failure is signalled here, not through panics or errors.
    pub is_success: bool,
    /// Overrides the spec's interval for the next call. Jitter is still added.
    pub next_call_delay_override: Option<u64>,
}

impl<R> ActionResult<R> {
    pub fn new(value: R, is_success: bool) -> Self {
        Self {
            value,
            is_success,
            next_call_delay_override: None,
        }
    }

    pub fn success(value: R) -> Self {
        Self::new(value, true)
    }

    pub fn failure(value: R) -> Self {
        Self::new(value, false)
    }

    /// Request a specific delay until the next periodic call.
    pub fn with_delay_override(mut self, delay_ms: u64) -> Self {
        self.next_call_delay_override = Some(delay_ms);
        self
    }

    /// The part of the result the scheduler folds into the call record.
    pub fn outcome(&self) -> CallOutcome {
        CallOutcome {
            is_success: self.is_success,
            next_call_delay_override: self.next_call_delay_override,
        }
    }
}

/// Scheduling-relevant summary of an [`ActionResult`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallOutcome {
    pub is_success: bool,
    pub next_call_delay_override: Option<u64>,
}

type ExecuteFn<T, R> = dyn Fn(T) -> BoxFuture<'static, ActionResult<R>> + Send + Sync;
type DefaultInputFn<T> = dyn Fn() -> BoxFuture<'static, T> + Send + Sync;

/// A named unit of work that can be scheduled periodically or run explicitly.
pub struct UpdateAction<T, R> {
    id: ActionId,
    execute: Arc<ExecuteFn<T, R>>,
    default_input: Arc<DefaultInputFn<T>>,
}

impl<T, R> Clone for UpdateAction<T, R> {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            execute: self.execute.clone(),
            default_input: self.default_input.clone(),
        }
    }
}

impl<T, R> fmt::Debug for UpdateAction<T, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpdateAction").field("id", &self.id).finish_non_exhaustive()
    }
}

impl<R: Send + 'static> UpdateAction<(), R> {
    /// Action without input.
    pub fn new<F, Fut>(id: impl Into<String>, action: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ActionResult<R>> + Send + 'static,
    {
        Self {
            id: id.into(),
            execute: Arc::new(move |()| action().boxed()),
            default_input: Arc::new(|| async {}.boxed()),
        }
    }
}

impl<T: Send + 'static, R: Send + 'static> UpdateAction<T, R> {
    /// Action with a single input and a supplier for periodic runs.
    pub fn with_input<F, Fut, D, DFut>(id: impl Into<String>, action: F, default_input: D) -> Self
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ActionResult<R>> + Send + 'static,
        D: Fn() -> DFut + Send + Sync + 'static,
        DFut: Future<Output = T> + Send + 'static,
    {
        Self {
            id: id.into(),
            execute: Arc::new(move |input| action(input).boxed()),
            default_input: Arc::new(move || default_input().boxed()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Run the action body with the given input. Does not touch scheduling.
    pub async fn execute(&self, input: T) -> ActionResult<R> {
        (self.execute)(input).await
    }

    /// Produce the input used by periodic runs.
    pub async fn default_input(&self) -> T {
        (self.default_input)().await
    }

    pub async fn execute_with_default(&self) -> ActionResult<R> {
        let input = self.default_input().await;
        self.execute(input).await
    }
}

/// Type-erased view of an action held by the registry.
#[async_trait]
pub(crate) trait PeriodicAction: Send + Sync {
    fn id(&self) -> &str;

    async fn run_default(&self) -> CallOutcome;
}

#[async_trait]
impl<T: Send + 'static, R: Send + 'static> PeriodicAction for UpdateAction<T, R> {
    fn id(&self) -> &str {
        &self.id
    }

    async fn run_default(&self) -> CallOutcome {
        self.execute_with_default().await.outcome()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_action_result_builders() {
        let ok = ActionResult::success("data");
        assert!(ok.is_success);
        assert_eq!(ok.next_call_delay_override, None);

        let failed = ActionResult::failure(()).with_delay_override(500);
        assert!(!failed.is_success);
        assert_eq!(
            failed.outcome(),
            CallOutcome {
                is_success: false,
                next_call_delay_override: Some(500)
            }
        );
    }

    #[tokio::test]
    async fn test_action_without_input() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let action = UpdateAction::new("refresh", move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                ActionResult::success(7)
            }
        });

        assert_eq!(action.id(), "refresh");
        assert_eq!(action.execute(()).await.value, 7);
        assert_eq!(action.execute_with_default().await.value, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_action_with_input_uses_default_supplier() {
        let action = UpdateAction::with_input(
            "echo",
            |input: String| async move { ActionResult::success(input) },
            || async { "default".to_string() },
        );

        assert_eq!(action.execute("explicit".to_string()).await.value, "explicit");
        assert_eq!(action.execute_with_default().await.value, "default");
    }

    #[tokio::test]
    async fn test_erased_action_reports_outcome() {
        let action = UpdateAction::new("flaky", || async { ActionResult::failure(()).with_delay_override(10) });
        let erased: Arc<dyn PeriodicAction> = Arc::new(action);

        assert_eq!(erased.id(), "flaky");
        let outcome = erased.run_default().await;
        assert!(!outcome.is_success);
        assert_eq!(outcome.next_call_delay_override, Some(10));
    }

    #[test]
    fn test_clone_shares_body() {
        let action = UpdateAction::new("a", || async { ActionResult::success(()) });
        let copy = action.clone();
        assert_eq!(copy.id(), action.id());
        assert!(format!("{:?}", copy).contains("\"a\""));
    }
}
