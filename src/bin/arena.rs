#![forbid(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use arena_harness::arena::{
    run_arena, ArenaObserver, ArenaRequest, CancelToken, ContestantConfig, JudgeConfig,
    JudgeOutcome, Phase, Progress,
};
use arena_harness::gateway::CompletionClient;
use arena_harness::search::{BingSearchProvider, SearchProvider};

#[derive(Parser)]
#[command(name = "arena", version, about = "Multi-model arena CLI")]
struct Cli {
    /// Path to an arena request JSON file (alternative to the inline flags)
    #[arg(long, group = "input")]
    request: Option<PathBuf>,

    /// Inline prompt text
    #[arg(long, group = "input")]
    prompt: Option<String>,

    /// Comma-separated contestant model ids
    #[arg(long, value_delimiter = ',')]
    models: Vec<String>,

    /// Judge model id (omit to skip the judge stage)
    #[arg(long)]
    judge_model: Option<String>,

    /// Judge system prompt override
    #[arg(long)]
    judge_system_prompt: Option<String>,

    /// Hold the judge to the strict JSON verdict contract
    #[arg(long)]
    strict_judge: bool,

    /// Run the web-search enrichment stage first
    #[arg(long)]
    search: bool,

    /// Result-count bound for the search stage
    #[arg(long, default_value_t = 5)]
    search_results: usize,

    /// Session cookie for the search provider
    #[arg(long)]
    search_cookie: Option<String>,

    /// Attachment file paths
    #[arg(long)]
    file: Vec<PathBuf>,

    /// Comma-separated vision-capable model ids (substring match)
    #[arg(long, value_delimiter = ',')]
    vision_models: Vec<String>,

    /// Write the full outcome JSON here
    #[arg(long)]
    out: Option<PathBuf>,
}

/// Prints round progress to stderr as results land.
struct StderrObserver;

impl ArenaObserver for StderrObserver {
    fn phase_changed(&self, phase: Phase) {
        eprintln!("[arena] phase: {phase:?}");
    }

    fn contestant_finished(&self, name: &str, content: &str, progress: Progress) {
        let preview: String = content.chars().take(80).collect();
        eprintln!(
            "[arena]   {}/{} {} — {}",
            progress.completed, progress.total, name, preview
        );
    }

    fn judge_finished(&self, outcome: &JudgeOutcome, progress: Progress) {
        let label = match outcome {
            JudgeOutcome::Structured(_) => "verdict",
            JudgeOutcome::Raw { .. } => "raw fallback",
            JudgeOutcome::Skipped => "skipped",
        };
        eprintln!(
            "[arena]   {}/{} judge — {label}",
            progress.completed, progress.total
        );
    }
}

fn build_request(cli: &Cli) -> Result<ArenaRequest, Box<dyn std::error::Error>> {
    if let Some(path) = &cli.request {
        let raw = std::fs::read_to_string(path)?;
        return Ok(serde_json::from_str(&raw)?);
    }

    let prompt = cli
        .prompt
        .clone()
        .ok_or("either --request or --prompt is required")?;
    if cli.models.is_empty() {
        return Err("--models is required with --prompt".into());
    }

    let contestants = cli
        .models
        .iter()
        .map(|m| ContestantConfig::new(m.clone()))
        .collect();

    let mut req = ArenaRequest::new(prompt, contestants);
    req.search_enabled = cli.search;
    req.search_result_count = cli.search_results;
    req.search_cookie = cli.search_cookie.clone();
    req.attachments = cli.file.clone();
    req.vision_models = cli.vision_models.clone();

    if let Some(model) = &cli.judge_model {
        let mut judge = JudgeConfig::new(model.clone());
        if let Some(prompt) = &cli.judge_system_prompt {
            judge = judge.system_prompt(prompt.clone());
        }
        if cli.strict_judge {
            judge = judge.strict();
        }
        req.judge = Some(judge);
    }

    Ok(req)
}

fn print_outcome(outcome: &arena_harness::arena::ArenaOutcome) {
    let mut names: Vec<&String> = outcome.results.keys().collect();
    names.sort();

    println!("=== contestant answers ===");
    for name in names {
        let result = &outcome.results[name];
        println!("\n--- {name} ---\n{}", result.content);
    }

    match &outcome.judge {
        JudgeOutcome::Structured(verdict) => {
            println!("\n=== judge verdict ===");
            if let Some(best) = &verdict.best_model {
                println!("best model: {best}");
            }
            for review in &verdict.reviews {
                println!(
                    "  {} — score {}: {}",
                    review.model, review.score, review.comment
                );
            }
            println!("\n=== fused answer ===\n{}", verdict.fusion_result);
        }
        JudgeOutcome::Raw { marker, raw } => {
            println!("\n=== judge (unstructured) ===\n{marker}\n{raw}");
        }
        JudgeOutcome::Skipped => {
            println!("\n[judge skipped — contestant answers above are the final output]");
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "arena_harness=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let req = build_request(&cli)?;

    let gateway = Arc::new(CompletionClient::from_env()?);
    let search_provider: Option<Arc<dyn SearchProvider>> = if req.search_enabled {
        Some(Arc::new(BingSearchProvider::new()?))
    } else {
        None
    };

    // Ctrl-C cancels the round cooperatively: in-flight calls finish in the
    // background but their results are dropped.
    let cancel = CancelToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("[arena] stop requested, cancelling...");
                cancel.cancel();
            }
        });
    }

    let outcome = run_arena(gateway, search_provider, req, &StderrObserver, cancel).await?;

    if outcome.phase == Phase::Cancelled {
        eprintln!(
            "[arena] round cancelled ({}/{} slots finished)",
            outcome.progress.completed, outcome.progress.total
        );
    }

    print_outcome(&outcome);

    if let Some(path) = &cli.out {
        std::fs::write(path, serde_json::to_string_pretty(&outcome)?)?;
        eprintln!("[arena] outcome written to {}", path.display());
    }

    Ok(())
}
