//! 调度器：解析目标、限流、超时、重试与熔断的唯一编排点
//!
//! # Dispatcher
//!
//! [`Dispatcher::execute`] drives one logical request to a terminal
//! [`ExecutionResult`]:
//!
//! 1. validate the request and resolve `(provider, model)` against the current
//!    registry snapshot;
//! 2. fail fast with `ProviderUnavailable` while the provider's circuit is open,
//!    without spending an attempt;
//! 3. per attempt: take the global and per-provider concurrency permits, take
//!    rate-limit tokens (bounded by the attempt timeout), call the adapter under
//!    the attempt timeout;
//! 4. feed the outcome to the circuit breaker and the [`UsageLedger`], then ask
//!    the [`RetryPolicy`] what to do next.
//!
//! The overall deadline is a hard ceiling on the whole loop. Cancellation is
//! honored at attempt boundaries and during backoff sleeps.
//!
//! [`Dispatcher::execute_batch`] fans requests out with bounded concurrency and
//! returns results in input order.

use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info_span, warn, Instrument};

use crate::adapters::AdapterCall;
use crate::error_code::ErrorKind;
use crate::ledger::{now_ms, AttemptOutcome, NoopLedger, UsageLedger, UsageRecord};
use crate::registry::{ProviderRegistry, Resolved};
use crate::resilience::retry::{Decision, RetryPolicy};
use crate::types::{ExecutionRequest, ExecutionResult, TokenUsage};
use crate::Error;

pub struct Dispatcher {
    registry: Arc<ProviderRegistry>,
    ledger: Arc<dyn UsageLedger>,
    global: Arc<Semaphore>,
}

/// What one attempt produced.
enum AttemptResult {
    Success { text: String, usage: TokenUsage },
    Failure(Error),
}

impl Dispatcher {
    pub fn new(registry: Arc<ProviderRegistry>, ledger: Arc<dyn UsageLedger>) -> Self {
        let cap = registry.snapshot().dispatch_settings().global_concurrency.max(1);
        Self {
            registry,
            ledger,
            global: Arc::new(Semaphore::new(cap)),
        }
    }

    /// Dispatcher that records nothing.
    pub fn without_ledger(registry: Arc<ProviderRegistry>) -> Self {
        Self::new(registry, Arc::new(NoopLedger))
    }

    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    /// The policy described by the current configuration.
    pub fn default_policy(&self) -> RetryPolicy {
        self.registry.snapshot().dispatch_settings().retry_policy()
    }

    pub async fn execute(&self, request: &ExecutionRequest, policy: &RetryPolicy) -> ExecutionResult {
        self.execute_with_cancel(request, policy, &CancellationToken::new())
            .await
    }

    pub async fn execute_with_cancel(
        &self,
        request: &ExecutionRequest,
        policy: &RetryPolicy,
        cancel: &CancellationToken,
    ) -> ExecutionResult {
        let span = info_span!(
            "dispatch",
            request_id = %request.id,
            provider = %request.provider,
        );
        self.run(request, policy, cancel).instrument(span).await
    }

    async fn run(
        &self,
        request: &ExecutionRequest,
        policy: &RetryPolicy,
        cancel: &CancellationToken,
    ) -> ExecutionResult {
        let started = Instant::now();
        let deadline = started + policy.deadline;
        let requested_model = request.model.clone().unwrap_or_default();

        let rejected = |err: Error, model: &str| {
            warn!(error_kind = err.kind().name(), error = %err, "request rejected");
            ExecutionResult::failed(
                &request.id,
                &request.provider,
                model,
                &err,
                0,
                elapsed_ms(started),
            )
        };

        if let Err(e) = request.validate() {
            return rejected(e, &requested_model);
        }
        let resolved = match self
            .registry
            .resolve(&request.provider, request.model.as_deref())
        {
            Ok(r) => r,
            Err(e) => return rejected(e, &requested_model),
        };
        let model = resolved.model.clone();

        let mut attempt: u32 = 0;
        let mut spent = 0.0;
        loop {
            if cancel.is_cancelled() {
                let err = Error::dispatch(ErrorKind::Cancelled, "request cancelled");
                return self.finish_failed(request, &model, &err, attempt, started).with_cost(spent);
            }
            if let Err(e) = resolved.entry.breaker.allow() {
                return self.finish_failed(request, &model, &e, attempt, started).with_cost(spent);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return self.deadline_exceeded(request, &model, attempt, started).with_cost(spent);
            }

            attempt += 1;
            let attempt_started = Instant::now();
            let outcome = self
                .attempt(request, &resolved, policy, remaining)
                .await;
            let attempt_ms = elapsed_ms(attempt_started);

            let err = match outcome {
                AttemptResult::Success { text, usage } => {
                    resolved.entry.breaker.on_success();
                    spent += self
                        .record(request, &resolved, attempt, usage, AttemptOutcome::Succeeded, attempt_ms)
                        .await;
                    debug!(attempt, model = %model, duration_ms = attempt_ms, "attempt succeeded");
                    return ExecutionResult::succeeded(
                        &request.id,
                        &request.provider,
                        &model,
                        text,
                        usage,
                        attempt,
                        elapsed_ms(started),
                    )
                    .with_cost(spent);
                }
                AttemptResult::Failure(e) => e,
            };
            // Failures that did not reopen the circuit leave a half-open trial undecided.
            resolved.entry.breaker.release_trial();

            let kind = err.kind();
            spent += self.record(
                request,
                &resolved,
                attempt,
                TokenUsage::default(),
                AttemptOutcome::Failed(kind),
                attempt_ms,
            )
            .await;
            log_attempt_failure(&err, attempt, &model, attempt_ms);

            if Instant::now() >= deadline {
                return self.deadline_exceeded(request, &model, attempt, started).with_cost(spent);
            }

            let retry_after = err.retry_after_ms().map(Duration::from_millis);
            match policy.decide(kind, attempt, retry_after) {
                Decision::Fail => {
                    return self.finish_failed(request, &model, &err, attempt, started).with_cost(spent);
                }
                Decision::Exhausted => {
                    if kind == ErrorKind::Timeout {
                        return self.deadline_exceeded(request, &model, attempt, started).with_cost(spent);
                    }
                    return self.finish_failed(request, &model, &err, attempt, started).with_cost(spent);
                }
                Decision::Retry { delay } => {
                    if Instant::now() + delay >= deadline {
                        if kind == ErrorKind::Timeout {
                            return self.deadline_exceeded(request, &model, attempt, started).with_cost(spent);
                        }
                        return self.finish_failed(request, &model, &err, attempt, started).with_cost(spent);
                    }
                    debug!(attempt, delay_ms = delay.as_millis() as u64, "backing off");
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = cancel.cancelled() => {
                            let err = Error::dispatch(ErrorKind::Cancelled, "request cancelled during backoff");
                            return self.finish_failed(request, &model, &err, attempt, started).with_cost(spent);
                        }
                    }
                }
            }
        }
    }

    /// One adapter call with its permits and rate-limit tokens.
    async fn attempt(
        &self,
        request: &ExecutionRequest,
        resolved: &Resolved,
        policy: &RetryPolicy,
        remaining: Duration,
    ) -> AttemptResult {
        let budget = policy.attempt_timeout.min(remaining);
        let entry = &resolved.entry;
        let attempt_start = Instant::now();

        let permits = tokio::time::timeout(budget, async {
            let global = self.global.acquire().await?;
            let local = entry.inflight.acquire().await?;
            Ok::<_, tokio::sync::AcquireError>((global, local))
        })
        .await;
        let _permits = match permits {
            Ok(Ok(p)) => p,
            Ok(Err(_)) => {
                return AttemptResult::Failure(Error::dispatch(
                    ErrorKind::InternalAdapterError,
                    "concurrency semaphore closed",
                ))
            }
            Err(_) => {
                return AttemptResult::Failure(Error::dispatch(
                    ErrorKind::Timeout,
                    "timed out waiting for a concurrency slot",
                ))
            }
        };

        let limiter_budget = budget.saturating_sub(attempt_start.elapsed());
        if let Err(e) = entry
            .limiter
            .acquire_within(policy.tokens_per_attempt, limiter_budget)
            .await
        {
            return AttemptResult::Failure(e);
        }
        // The call may not outlive the overall deadline.
        let call_budget = budget.min(remaining.saturating_sub(attempt_start.elapsed()));

        let call = AdapterCall {
            request_id: request.id.clone(),
            prompt: request.prompt.clone(),
            model: resolved.model.clone(),
            sampling: request.sampling,
        };
        match tokio::time::timeout(call_budget, entry.adapter.execute(&call)).await {
            Ok(Ok(resp)) => AttemptResult::Success {
                text: resp.text,
                usage: resp.usage,
            },
            Ok(Err(adapter_err)) => {
                let kind = entry.adapter.normalize_error(&adapter_err);
                let retry_after_ms = adapter_err.retry_after_ms();
                if kind == ErrorKind::RateLimited {
                    if let Some(ms) = retry_after_ms {
                        entry.limiter.penalize(Duration::from_millis(ms));
                    }
                }
                if kind.trips_circuit() && entry.breaker.on_failure() {
                    warn!(
                        provider = %entry.config.id,
                        error_kind = kind.name(),
                        "circuit breaker opened"
                    );
                }
                AttemptResult::Failure(
                    Error::dispatch(kind, adapter_err.to_string()).with_retry_after(retry_after_ms),
                )
            }
            Err(_) => {
                if entry.breaker.on_failure() {
                    warn!(provider = %entry.config.id, error_kind = "timeout", "circuit breaker opened");
                }
                AttemptResult::Failure(Error::dispatch(
                    ErrorKind::Timeout,
                    format!("attempt exceeded {} ms", call_budget.as_millis()),
                ))
            }
        }
    }

    async fn record(
        &self,
        request: &ExecutionRequest,
        resolved: &Resolved,
        attempt: u32,
        usage: TokenUsage,
        outcome: AttemptOutcome,
        latency_ms: u64,
    ) -> f64 {
        let cost_usd = resolved
            .entry
            .config
            .pricing_for(&resolved.model)
            .map(|p| p.cost(&usage))
            .unwrap_or(0.0);
        let record = UsageRecord {
            request_id: request.id.clone(),
            idempotency_key: request.idempotency_key.clone(),
            attempt,
            provider: resolved.entry.config.id.clone(),
            model: resolved.model.clone(),
            usage,
            cost_usd,
            outcome,
            latency_ms,
            caller: request.caller.clone(),
            timestamp_ms: now_ms(),
        };
        if let Err(e) = self.ledger.append(record).await {
            warn!(attempt, error = %e, "usage record append failed");
        }
        cost_usd
    }

    fn finish_failed(
        &self,
        request: &ExecutionRequest,
        model: &str,
        err: &Error,
        attempts: u32,
        started: Instant,
    ) -> ExecutionResult {
        warn!(
            attempts,
            error_kind = err.kind().name(),
            duration_ms = elapsed_ms(started),
            "request failed"
        );
        ExecutionResult::failed(
            &request.id,
            &request.provider,
            model,
            err,
            attempts,
            elapsed_ms(started),
        )
    }

    fn deadline_exceeded(
        &self,
        request: &ExecutionRequest,
        model: &str,
        attempts: u32,
        started: Instant,
    ) -> ExecutionResult {
        let err = Error::dispatch(
            ErrorKind::DeadlineExceeded,
            format!("deadline reached after {} attempt(s)", attempts),
        );
        self.finish_failed(request, model, &err, attempts, started)
    }

    /// Run `requests` with at most `concurrency_limit` in flight (0 means the
    /// global cap). Output order matches input order; one request's failure
    /// never affects its siblings.
    pub async fn execute_batch(
        &self,
        requests: Vec<ExecutionRequest>,
        policy: &RetryPolicy,
        concurrency_limit: usize,
    ) -> Vec<ExecutionResult> {
        let n = requests.len();
        if n == 0 {
            return Vec::new();
        }

        let global_cap = self.registry.snapshot().dispatch_settings().global_concurrency;
        let limit = if concurrency_limit == 0 {
            global_cap
        } else {
            concurrency_limit.min(global_cap)
        }
        .max(1);

        let mut out: Vec<Option<ExecutionResult>> = (0..n).map(|_| None).collect();
        let meta: Vec<(String, String)> = requests
            .iter()
            .map(|r| (r.id.clone(), r.provider.clone()))
            .collect();

        let results: Vec<(usize, ExecutionResult)> =
            futures::stream::iter(requests.into_iter().enumerate())
                .map(|(idx, req)| async move {
                    let r = self.execute(&req, policy).await;
                    (idx, r)
                })
                .buffer_unordered(limit)
                .collect()
                .await;

        for (idx, r) in results {
            out[idx] = Some(r);
        }

        out.into_iter()
            .zip(meta)
            .map(|(o, (id, provider))| {
                o.unwrap_or_else(|| {
                    let err = Error::dispatch(ErrorKind::InternalAdapterError, "batch result missing");
                    ExecutionResult::failed(id, provider, "", &err, 0, 0)
                })
            })
            .collect()
    }
}

fn elapsed_ms(since: Instant) -> u64 {
    since.elapsed().as_millis() as u64
}

fn log_attempt_failure(err: &Error, attempt: u32, model: &str, duration_ms: u64) {
    let kind = err.kind();
    match kind {
        ErrorKind::AuthFailure => error!(
            attempt,
            model,
            duration_ms,
            error_kind = kind.name(),
            error = %err,
            "credential rejected by provider"
        ),
        ErrorKind::InternalAdapterError => error!(
            attempt,
            model,
            duration_ms,
            error_kind = kind.name(),
            error = ?err,
            "adapter failed unexpectedly"
        ),
        _ => debug!(
            attempt,
            model,
            duration_ms,
            error_kind = kind.name(),
            error = %err,
            "attempt failed"
        ),
    }
}
