//! Recovery step execution.
//!
//! Each [`RecoveryStep`] maps to one attempt at getting the caller what it
//! asked for: re-running the chain, re-running it without the provider that
//! failed, deferring to the offline queue, or serving a stored result.

use backon::{ExponentialBuilder, Retryable};
use bulwark_core::config::BackoffConfig;
use bulwark_core::{ErrorContext, ErrorKind, ExecutionError, RecoveryStep};
use serde_json::Value as JsonValue;
use std::time::Duration;

use crate::connectivity::ConnectivityMonitor;
use crate::offline_queue::{NewOperation, OfflineQueue};
use crate::resilience::BackupStore;
use crate::router::{ExecutionOptions, FallbackRouter};

/// Confirms that a recovered result is actually usable.
///
/// Without a validator a step counts as successful when it produced a result.
pub trait RecoveryValidator: Send + Sync {
    fn validate(&self, operation: &str, output: Option<&JsonValue>) -> bool;
}

impl<F> RecoveryValidator for F
where
    F: Fn(&str, Option<&JsonValue>) -> bool + Send + Sync,
{
    fn validate(&self, operation: &str, output: Option<&JsonValue>) -> bool {
        self(operation, output)
    }
}

/// What one step achieved.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct StepOutcome {
    pub success: bool,
    pub message: String,
    pub output: Option<JsonValue>,
    pub queued_id: Option<String>,
}

impl StepOutcome {
    fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            ..Default::default()
        }
    }

    fn recovered(message: impl Into<String>, output: Option<JsonValue>) -> Self {
        Self {
            success: true,
            message: message.into(),
            output,
            queued_id: None,
        }
    }
}

/// Borrowed view of the components a step may use.
pub(crate) struct StepRunner<'a> {
    pub router: &'a FallbackRouter,
    pub queue: &'a OfflineQueue,
    pub connectivity: &'a ConnectivityMonitor,
    pub backups: &'a BackupStore,
    pub backoff: &'a BackoffConfig,
}

impl StepRunner<'_> {
    pub async fn run(
        &self,
        step: RecoveryStep,
        error: &ExecutionError,
        context: &ErrorContext,
    ) -> StepOutcome {
        match step {
            RecoveryStep::RetryWithBackoff => self.retry_with_backoff(error, context).await,
            RecoveryStep::SwitchFallbackProvider => self.switch_provider(error, context).await,
            RecoveryStep::EnableOfflineMode => self.enable_offline_mode(context).await,
            RecoveryStep::RestoreFromBackup => self.restore_from_backup(context).await,
        }
    }

    async fn retry_with_backoff(&self, error: &ExecutionError, context: &ErrorContext) -> StepOutcome {
        if !error.kind.is_retryable() {
            return StepOutcome::failed(format!("{} is not retryable", error.kind));
        }
        let Some(params) = context.params.as_ref() else {
            return StepOutcome::failed("No parameters to retry with");
        };

        // The chain's retry delay is the floor for every wait
        let min_delay = self
            .router
            .chains()
            .get(&context.operation)
            .map(|chain| chain.retry_delay.max(self.backoff.min_delay))
            .unwrap_or(self.backoff.min_delay);
        let backoff = ExponentialBuilder::default()
            .with_min_delay(min_delay)
            .with_max_delay(self.backoff.max_delay.max(min_delay))
            .with_max_times(self.backoff.max_retries)
            .with_factor(self.backoff.factor);

        let router = self.router;
        let operation = context.operation.as_str();
        let opts = ExecutionOptions::new().with_caller("recovery");
        let opts = &opts;

        let outcome = (move || async move {
            let result = router.execute(operation, params, opts).await;
            if result.success {
                Ok(result.output)
            } else {
                Err(result
                    .error
                    .unwrap_or_else(|| ExecutionError::new(ErrorKind::ProviderError, "Execution failed")))
            }
        })
        .retry(backoff)
        .when(|e: &ExecutionError| e.kind.is_retryable())
        .notify(|e: &ExecutionError, delay: Duration| {
            tracing::debug!(operation = %operation, error = %e, delay = ?delay, "Retrying after backoff");
        })
        .await;

        match outcome {
            Ok(output) => StepOutcome::recovered("Retry succeeded", output),
            Err(e) => StepOutcome::failed(format!("Retries exhausted: {}", e)),
        }
    }

    async fn switch_provider(&self, error: &ExecutionError, context: &ErrorContext) -> StepOutcome {
        let Some(failed) = context.provider.as_ref().or(error.provider.as_ref()) else {
            return StepOutcome::failed("No failing provider to switch away from");
        };
        let Some(params) = context.params.as_ref() else {
            return StepOutcome::failed("No parameters to re-run with");
        };

        let has_alternative = self
            .router
            .chains()
            .get(&context.operation)
            .map(|chain| chain.providers.iter().any(|p| p != failed))
            .unwrap_or(false);
        if !has_alternative {
            return StepOutcome::failed(format!("No provider other than '{}' in the chain", failed));
        }

        let opts = ExecutionOptions::new().exclude(failed.as_str()).with_caller("recovery");
        let result = self.router.execute(&context.operation, params, &opts).await;
        match (result.success, result.provider) {
            (true, Some(provider)) => StepOutcome::recovered(
                format!("Switched from '{}' to '{}'", failed, provider),
                result.output,
            ),
            _ => StepOutcome::failed(format!(
                "Alternative providers failed: {}",
                result
                    .error
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "unknown error".to_string())
            )),
        }
    }

    async fn enable_offline_mode(&self, context: &ErrorContext) -> StepOutcome {
        if !self.queue.config().is_online_required(&context.operation) {
            return StepOutcome::failed("Operation runs locally and is never deferred");
        }
        if self.connectivity.force_check().await.is_online() {
            return StepOutcome::failed("Host is online; nothing to defer");
        }

        let request = NewOperation::new(
            context.operation.clone(),
            context.params.clone().unwrap_or(JsonValue::Null),
        )
        .with_priority(context.priority);

        match self.queue.enqueue(request) {
            Ok(id) => StepOutcome {
                success: true,
                message: format!("Queued as {} until connectivity returns", id),
                output: None,
                queued_id: Some(id),
            },
            Err(e) => StepOutcome::failed(e.to_string()),
        }
    }

    async fn restore_from_backup(&self, context: &ErrorContext) -> StepOutcome {
        let params = context.params.clone().unwrap_or(JsonValue::Null);
        match self.backups.get(&context.operation, &params).await {
            Some(output) => StepOutcome::recovered("Served the last known good result", Some(output)),
            None => StepOutcome::failed("No stored result for these inputs"),
        }
    }
}
