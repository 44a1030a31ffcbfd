//! Dispatcher behaviour against scripted providers: retries, circuit breaking,
//! deadlines, batch ordering and rate limiting.

mod common;

use std::time::Duration;

use common::{fast_policy, harness, harness_with, provider, Step};
use prompt_kernel::config::KernelConfig;
use prompt_kernel::ledger::AttemptOutcome;
use prompt_kernel::types::{ExecutionRequest, ExecutionStatus};
use prompt_kernel::ErrorKind;

#[tokio::test]
async fn single_attempt_success() {
    let h = harness(provider("p"), vec![], Step::Reply);
    let req = ExecutionRequest::new("p", "Summarize the changelog in 3 bullets.");
    let r = h.dispatcher.execute(&req, &fast_policy().with_max_attempts(1)).await;

    assert_eq!(r.status, ExecutionStatus::Succeeded);
    assert_eq!(r.attempts, 1);
    assert_eq!(r.usage.prompt_tokens, 12);
    assert_eq!(r.usage.completion_tokens, 8);
    assert_eq!(r.usage.total_tokens, 20);
    assert_eq!(r.model, common::MODEL);
    assert_eq!(h.store.records_for(&req.id).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn timeouts_are_retried_until_success() {
    for k in 0..3u32 {
        let h = harness(provider("p"), vec![Step::Hang; k as usize], Step::Reply);
        let req = ExecutionRequest::new("p", "hello");
        let r = h.dispatcher.execute(&req, &fast_policy().with_max_attempts(k + 1)).await;

        assert!(r.is_success(), "k={} -> {:?}", k, r.failure);
        assert_eq!(r.attempts, k + 1);
        let records = h.store.records_for(&req.id);
        assert_eq!(records.len(), (k + 1) as usize);
        assert!(records[..k as usize]
            .iter()
            .all(|rec| rec.outcome == AttemptOutcome::Failed(ErrorKind::Timeout)));
        assert_eq!(records[k as usize].outcome, AttemptOutcome::Succeeded);
    }
}

#[tokio::test(start_paused = true)]
async fn exhausted_timeouts_surface_as_deadline_exceeded() {
    let h = harness(provider("p"), vec![], Step::Hang);
    let req = ExecutionRequest::new("p", "hello");
    let r = h.dispatcher.execute(&req, &fast_policy().with_max_attempts(2)).await;

    assert_eq!(r.status, ExecutionStatus::TimedOut);
    assert_eq!(r.error_kind(), Some(ErrorKind::DeadlineExceeded));
    assert_eq!(r.attempts, 2);
}

#[tokio::test(start_paused = true)]
async fn overall_deadline_stops_retries() {
    let h = harness(provider("p"), vec![], Step::Hang);
    let policy = fast_policy()
        .with_max_attempts(50)
        .with_deadline(Duration::from_millis(250));
    let req = ExecutionRequest::new("p", "hello");
    let r = h.dispatcher.execute(&req, &policy).await;

    assert_eq!(r.error_kind(), Some(ErrorKind::DeadlineExceeded));
    assert!(r.attempts <= 3, "attempts {}", r.attempts);
    assert!(r.latency_ms <= 260, "latency {}", r.latency_ms);
}

#[tokio::test]
async fn open_circuit_fails_fast_without_calling_the_adapter() {
    let h = harness(provider("p"), vec![], Step::Status(503));
    let policy = fast_policy().with_max_attempts(1);

    for _ in 0..5 {
        let r = h.dispatcher.execute(&ExecutionRequest::new("p", "hello"), &policy).await;
        assert_eq!(r.error_kind(), Some(ErrorKind::ServerError));
    }
    assert_eq!(h.calls(), 5);
    assert!(h.dispatcher.registry().list_healthy().is_empty());

    let req = ExecutionRequest::new("p", "hello");
    let r = h.dispatcher.execute(&req, &policy).await;
    assert_eq!(r.error_kind(), Some(ErrorKind::ProviderUnavailable));
    assert_eq!(r.attempts, 0);
    assert!(r.failure.as_ref().and_then(|f| f.retry_after_ms).is_some());
    assert_eq!(h.calls(), 5);
    assert!(h.store.records_for(&req.id).is_empty());
}

#[tokio::test(start_paused = true)]
async fn half_open_circuit_lets_one_concurrent_caller_through() {
    let mut config = KernelConfig::new().with_provider(provider("p"));
    config.circuit_breaker.failure_threshold = 1;
    config.circuit_breaker.cooldown_secs = 1;
    let h = harness_with(config, vec![Step::Status(503)], Step::SleepFromPrompt);
    let policy = fast_policy().with_max_attempts(1);

    let r = h.dispatcher.execute(&ExecutionRequest::new("p", "0"), &policy).await;
    assert_eq!(r.error_kind(), Some(ErrorKind::ServerError));
    assert_eq!(h.calls(), 1);

    tokio::time::advance(Duration::from_secs(2)).await;

    let requests: Vec<ExecutionRequest> =
        (0..5).map(|_| ExecutionRequest::new("p", "50")).collect();
    let results = futures::future::join_all(
        requests.iter().map(|req| h.dispatcher.execute(req, &policy)),
    )
    .await;

    assert_eq!(results.iter().filter(|r| r.is_success()).count(), 1);
    assert!(results
        .iter()
        .filter(|r| !r.is_success())
        .all(|r| r.error_kind() == Some(ErrorKind::ProviderUnavailable) && r.attempts == 0));
    assert_eq!(h.calls(), 2);

    // The successful trial closed the circuit.
    let r = h.dispatcher.execute(&ExecutionRequest::new("p", "0"), &policy).await;
    assert!(r.is_success());
    assert_eq!(h.calls(), 3);
}

#[tokio::test]
async fn caller_errors_do_not_open_the_circuit() {
    let h = harness(provider("p"), vec![], Step::Status(401));
    let policy = fast_policy().with_max_attempts(1);
    for _ in 0..8 {
        let r = h.dispatcher.execute(&ExecutionRequest::new("p", "hello"), &policy).await;
        assert_eq!(r.error_kind(), Some(ErrorKind::AuthFailure));
    }
    assert_eq!(h.calls(), 8);
    assert_eq!(h.dispatcher.registry().list_healthy(), vec!["p".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn batch_output_follows_input_order() {
    let h = harness(provider("p"), vec![], Step::SleepFromPrompt);
    let requests: Vec<ExecutionRequest> = ["300", "100", "200"]
        .iter()
        .map(|ms| ExecutionRequest::new("p", *ms))
        .collect();
    let ids: Vec<String> = requests.iter().map(|r| r.id.clone()).collect();
    let policy = fast_policy().with_attempt_timeout(Duration::from_secs(5));

    let results = h.dispatcher.execute_batch(requests, &policy, 3).await;
    let got: Vec<String> = results.iter().map(|r| r.request_id.clone()).collect();
    assert_eq!(got, ids);
    assert!(results.iter().all(|r| r.is_success()));
}

#[tokio::test(start_paused = true)]
async fn one_failing_request_does_not_abort_the_batch() {
    let cfg = KernelConfig::new()
        .with_provider(provider("good"))
        .with_provider(provider("other"));
    let h = harness_with(cfg, vec![], Step::Reply);
    let requests = vec![
        ExecutionRequest::new("good", "a"),
        ExecutionRequest::new("missing", "b"),
        ExecutionRequest::new("other", "c").with_model("not-a-model"),
        ExecutionRequest::new("good", "d"),
    ];
    let results = h.dispatcher.execute_batch(requests, &fast_policy(), 0).await;
    let kinds: Vec<Option<ErrorKind>> = results.iter().map(|r| r.error_kind()).collect();
    assert_eq!(
        kinds,
        vec![
            None,
            Some(ErrorKind::UnknownProvider),
            Some(ErrorKind::UnsupportedModel),
            None
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn bucket_of_one_admits_exactly_one_concurrent_call() {
    let h = harness(provider("p").with_rate_limit(1, 60), vec![], Step::Reply);
    let policy = fast_policy()
        .with_max_attempts(1)
        .with_attempt_timeout(Duration::from_secs(1));
    let a = ExecutionRequest::new("p", "first");
    let b = ExecutionRequest::new("p", "second");

    let (ra, rb) = tokio::join!(
        h.dispatcher.execute(&a, &policy),
        h.dispatcher.execute(&b, &policy)
    );
    let successes = [&ra, &rb].iter().filter(|r| r.is_success()).count();
    assert_eq!(successes, 1);
    let denied = if ra.is_success() { &rb } else { &ra };
    assert_eq!(denied.error_kind(), Some(ErrorKind::RateLimited));
    assert_eq!(h.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn waiting_for_the_bucket_within_the_attempt_timeout() {
    // One token per 2s: the second caller waits for the refill.
    let h = harness(provider("p").with_rate_limit(1, 2), vec![], Step::Reply);
    let policy = fast_policy()
        .with_max_attempts(1)
        .with_attempt_timeout(Duration::from_secs(5));
    let a = ExecutionRequest::new("p", "first");
    let b = ExecutionRequest::new("p", "second");

    let (ra, rb) = tokio::join!(
        h.dispatcher.execute(&a, &policy),
        h.dispatcher.execute(&b, &policy)
    );
    assert!(ra.is_success() && rb.is_success());
    assert_eq!(h.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn provider_retry_after_is_honoured() {
    let h = harness(provider("p"), vec![Step::Status(429)], Step::Reply);
    let req = ExecutionRequest::new("p", "hello");
    let r = h.dispatcher.execute(&req, &fast_policy()).await;
    assert!(r.is_success());
    assert_eq!(r.attempts, 2);
    let records = h.store.records_for(&req.id);
    assert_eq!(records[0].outcome, AttemptOutcome::Failed(ErrorKind::RateLimited));
}
