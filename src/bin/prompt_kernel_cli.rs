//! prompt-kernel CLI：提示词审计、提供方健康查询、单次执行与批量测试的命令行工具
//!
//! Usage:
//!   prompt-kernel audit <TEXT> | --file <path>              Score a prompt
//!   prompt-kernel providers --config <path>                 Provider health
//!   prompt-kernel execute --config <path> --provider <id> <TEXT>
//!   prompt-kernel batch --config <path> --provider <id>... --prompt <text>... [--audit]
//!
//! All output is JSON on stdout; logs go to stderr (`PROMPT_KERNEL_LOG`).

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use prompt_kernel::audit::{AuditEngine, DispatchRewriter, RuleSetVersion};
use prompt_kernel::batch::{BatchProgress, BatchRunner};
use prompt_kernel::config::KernelConfig;
use prompt_kernel::dispatch::Dispatcher;
use prompt_kernel::ledger::InMemoryStore;
use prompt_kernel::registry::ProviderRegistry;
use prompt_kernel::types::ExecutionRequest;

#[derive(Parser)]
#[command(name = "prompt-kernel", version, about = "Execute and audit prompts across AI providers")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Score a prompt on the KERNEL dimensions
    Audit(AuditArgs),
    /// List configured providers and their health
    Providers(ConfigArg),
    /// Execute one prompt on one provider
    Execute(ExecuteArgs),
    /// Run prompts × providers and print the batch report
    Batch(BatchArgs),
}

#[derive(Args)]
struct ConfigArg {
    #[arg(long, env = "PROMPT_KERNEL_CONFIG")]
    config: PathBuf,
}

#[derive(Args)]
struct AuditArgs {
    /// Prompt text; omit when using --file
    text: Option<String>,
    #[arg(long, conflicts_with = "text")]
    file: Option<PathBuf>,
    #[arg(long, default_value = "kernel-v1")]
    rule_set: String,
    /// Generate an improved prompt with this provider (needs --config)
    #[arg(long, requires = "config")]
    rewrite_with: Option<String>,
    #[arg(long, env = "PROMPT_KERNEL_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Args)]
struct ExecuteArgs {
    #[command(flatten)]
    config: ConfigArg,
    #[arg(long)]
    provider: String,
    #[arg(long)]
    model: Option<String>,
    #[arg(long)]
    max_attempts: Option<u32>,
    text: String,
}

#[derive(Args)]
struct BatchArgs {
    #[command(flatten)]
    config: ConfigArg,
    #[arg(long = "provider", required = true)]
    providers: Vec<String>,
    #[arg(long = "prompt", required = true)]
    prompts: Vec<String>,
    #[arg(long)]
    audit: bool,
    /// Cells in flight at once (0 = global cap)
    #[arg(long, default_value_t = 0)]
    concurrency: usize,
    /// Per-request overall deadline in seconds
    #[arg(long)]
    deadline_secs: Option<u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    prompt_kernel::telemetry::init_tracing();
    let cli = Cli::parse();
    match cli.command {
        Command::Audit(args) => cmd_audit(args).await,
        Command::Providers(args) => cmd_providers(args),
        Command::Execute(args) => cmd_execute(args).await,
        Command::Batch(args) => cmd_batch(args).await,
    }
}

fn load_dispatcher(path: &PathBuf) -> anyhow::Result<Arc<Dispatcher>> {
    let config = KernelConfig::from_path(path)
        .with_context(|| format!("loading {}", path.display()))?;
    let registry = Arc::new(ProviderRegistry::new(&config)?);
    Ok(Arc::new(Dispatcher::new(registry, Arc::new(InMemoryStore::new()))))
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn cmd_audit(args: AuditArgs) -> anyhow::Result<()> {
    let text = match (args.text, args.file) {
        (Some(t), _) => t,
        (None, Some(path)) => std::fs::read_to_string(&path)
            .with_context(|| format!("reading {}", path.display()))?,
        (None, None) => bail!("pass the prompt text or --file"),
    };
    let version = RuleSetVersion::parse(&args.rule_set)?;
    let engine = AuditEngine::new();

    let result = match (args.rewrite_with, args.config) {
        (Some(provider), Some(config)) => {
            let rewriter = DispatchRewriter::new(load_dispatcher(&config)?, provider);
            engine.audit_with_rewrite(&text, version, &rewriter).await?
        }
        _ => engine.audit(&text, version)?,
    };
    print_json(&result)
}

fn cmd_providers(args: ConfigArg) -> anyhow::Result<()> {
    let dispatcher = load_dispatcher(&args.config)?;
    print_json(&dispatcher.registry().health())
}

async fn cmd_execute(args: ExecuteArgs) -> anyhow::Result<()> {
    let dispatcher = load_dispatcher(&args.config.config)?;
    let mut policy = dispatcher.default_policy();
    if let Some(n) = args.max_attempts {
        policy = policy.with_max_attempts(n);
    }
    let mut request = ExecutionRequest::new(args.provider, args.text);
    if let Some(model) = args.model {
        request = request.with_model(model);
    }
    let result = dispatcher.execute(&request, &policy).await;
    print_json(&result)?;
    if !result.is_success() {
        std::process::exit(2);
    }
    Ok(())
}

async fn cmd_batch(args: BatchArgs) -> anyhow::Result<()> {
    let dispatcher = load_dispatcher(&args.config.config)?;
    let mut policy = dispatcher.default_policy();
    if let Some(secs) = args.deadline_secs {
        policy = policy.with_deadline(Duration::from_secs(secs));
    }
    let runner = BatchRunner::new(Arc::clone(&dispatcher), Arc::new(AuditEngine::new()))
        .with_policy(policy)
        .with_concurrency(args.concurrency)
        .with_progress(Arc::new(|p: &BatchProgress| {
            tracing::info!(
                index = p.index,
                provider = %p.provider,
                status = ?p.status,
                "cell {}/{} done",
                p.completed,
                p.total
            );
        }));
    let report = runner.run(&args.prompts, &args.providers, args.audit).await?;
    print_json(&report)
}
