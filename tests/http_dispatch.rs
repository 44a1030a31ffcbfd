//! End-to-end dispatch through the real HTTP adapters against mock servers.

use std::sync::Arc;
use std::time::Duration;

use prompt_kernel::adapters::AdapterKind;
use prompt_kernel::config::{CredentialRef, KernelConfig, ProviderConfig};
use prompt_kernel::dispatch::Dispatcher;
use prompt_kernel::ledger::{AttemptOutcome, InMemoryStore, ModelPricing};
use prompt_kernel::registry::ProviderRegistry;
use prompt_kernel::resilience::retry::RetryPolicy;
use prompt_kernel::types::ExecutionRequest;
use prompt_kernel::ErrorKind;

fn dispatcher(provider: ProviderConfig) -> (Dispatcher, Arc<InMemoryStore>) {
    let cfg = KernelConfig::new().with_provider(provider);
    let registry = Arc::new(ProviderRegistry::new(&cfg).unwrap());
    let store = Arc::new(InMemoryStore::new());
    (Dispatcher::new(registry, store.clone()), store)
}

fn policy() -> RetryPolicy {
    RetryPolicy::new()
        .with_jitter(false)
        .with_base_backoff(Duration::from_millis(5))
        .with_attempt_timeout(Duration::from_secs(5))
        .with_deadline(Duration::from_secs(20))
}

#[tokio::test]
async fn openai_success_is_priced_and_recorded() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/chat/completions")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            r#"{"choices":[{"message":{"content":"Three bullets."}}],
                "usage":{"prompt_tokens":1000,"completion_tokens":500,"total_tokens":1500}}"#,
        )
        .create_async()
        .await;

    let (d, store) = dispatcher(
        ProviderConfig::new("openai", AdapterKind::OpenAi, server.url())
            .with_default_model("house-model")
            .with_pricing(ModelPricing::new("house-model", 0.01, 0.03)),
    );
    let req = ExecutionRequest::new("openai", "Summarize in 3 bullets.");
    let r = d.execute(&req, &policy()).await;

    assert!(r.is_success(), "{:?}", r.failure);
    assert_eq!(r.text.as_deref(), Some("Three bullets."));
    assert_eq!(r.usage.total_tokens, 1500);
    let records = store.records_for(&req.id);
    assert_eq!(records.len(), 1);
    assert!((records[0].cost_usd - 0.025).abs() < 1e-9);
    mock.assert_async().await;
}

#[tokio::test]
async fn server_errors_are_retried_up_to_max_attempts() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/chat/completions")
        .with_status(502)
        .with_body(r#"{"error":{"message":"bad gateway"}}"#)
        .expect(3)
        .create_async()
        .await;

    let (d, store) = dispatcher(
        ProviderConfig::new("openai", AdapterKind::OpenAi, server.url()).with_default_model("m"),
    );
    let req = ExecutionRequest::new("openai", "hello");
    let r = d.execute(&req, &policy().with_max_attempts(3)).await;

    assert_eq!(r.error_kind(), Some(ErrorKind::ServerError));
    assert_eq!(r.attempts, 3);
    assert!(store
        .records_for(&req.id)
        .iter()
        .all(|rec| rec.outcome == AttemptOutcome::Failed(ErrorKind::ServerError)));
    mock.assert_async().await;
}

#[tokio::test]
async fn anthropic_credential_is_resolved_at_call_time() {
    std::env::set_var("PROMPT_KERNEL_TEST_ANTHROPIC_KEY", "sk-ant-test");
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/messages")
        .match_header("x-api-key", "sk-ant-test")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            r#"{"content":[{"type":"text","text":"ok"}],
                "usage":{"input_tokens":4,"output_tokens":1}}"#,
        )
        .create_async()
        .await;

    let (d, _) = dispatcher(
        ProviderConfig::new("anthropic", AdapterKind::Anthropic, server.url())
            .with_default_model("claude-3-haiku")
            .with_credential(CredentialRef::Env("PROMPT_KERNEL_TEST_ANTHROPIC_KEY".into())),
    );
    let r = d
        .execute(&ExecutionRequest::new("anthropic", "ping"), &policy())
        .await;
    assert!(r.is_success(), "{:?}", r.failure);
    assert_eq!(r.usage.total_tokens, 5);
    mock.assert_async().await;
}

#[tokio::test]
async fn missing_credential_is_an_auth_failure() {
    let (d, store) = dispatcher(
        ProviderConfig::new("anthropic", AdapterKind::Anthropic, "http://127.0.0.1:9")
            .with_default_model("claude-3-haiku")
            .with_credential(CredentialRef::Env("PROMPT_KERNEL_TEST_UNSET_KEY".into())),
    );
    let req = ExecutionRequest::new("anthropic", "ping");
    let r = d.execute(&req, &policy()).await;
    assert_eq!(r.error_kind(), Some(ErrorKind::AuthFailure));
    assert_eq!(r.attempts, 1);
    assert_eq!(store.records_for(&req.id).len(), 1);
}

#[tokio::test]
async fn gemini_unknown_model_is_not_retried() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/models/gemini-1.5-flash:generateContent")
        .with_status(404)
        .with_body(r#"{"error":{"code":404,"message":"model not found","status":"NOT_FOUND"}}"#)
        .expect(1)
        .create_async()
        .await;

    let (d, _) = dispatcher(
        ProviderConfig::new("gemini", AdapterKind::Gemini, server.url())
            .with_default_model("gemini-1.5-flash"),
    );
    let r = d
        .execute(&ExecutionRequest::new("gemini", "ping"), &policy())
        .await;
    assert_eq!(r.error_kind(), Some(ErrorKind::UnsupportedModel));
    assert_eq!(r.attempts, 1);
    mock.assert_async().await;
}
