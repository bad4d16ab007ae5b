use std::sync::Arc;

use anyhow::Context;

use report_engine::config::EngineConfig;
use report_engine::generation::GeminiClient;
use report_engine::market::{
    BtcPriceProvider, FearGreedProvider, GlobalMarketProvider, MarketAggregator,
    MarketDataProvider,
};
use report_engine::progress::ProgressBoard;
use report_engine::ratelimit::LimiterRegistry;
use report_engine::store::MemoryReportStore;
use report_engine::workflow::{ReportEngine, RunRequest};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let options = parse_args(&args);

    tracing_subscriber::fmt()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let api_key = std::env::var("GEMINI_API_KEY")
        .context("GEMINI_API_KEY environment variable is required")?;

    let mut config = EngineConfig::from_env();
    if let Some(dir) = options.prompts_dir {
        config.prompts_dir = dir.into();
    }
    if let Some(attempts) = options.max_attempts {
        config.max_attempts = attempts;
    }

    tracing::info!(
        model = %config.model,
        prompts_dir = %config.prompts_dir.display(),
        "starting report generation"
    );

    let limiters = Arc::new(LimiterRegistry::with_defaults());
    let http = reqwest::Client::builder()
        .timeout(config.provider_timeout)
        .user_agent("report-engine/0.1.0")
        .build()
        .context("failed to build HTTP client")?;

    let providers: Vec<Arc<dyn MarketDataProvider>> = vec![
        Arc::new(GlobalMarketProvider::new(http.clone())),
        Arc::new(BtcPriceProvider::new(http.clone())),
        Arc::new(FearGreedProvider::new(http)),
    ];
    let aggregator = MarketAggregator::new(
        providers,
        Arc::clone(&limiters),
        config.provider_timeout,
        config.aggregate_deadline,
    );

    let generation = Arc::new(GeminiClient::new(api_key.clone(), config.model.clone()));
    let store = Arc::new(MemoryReportStore::new());
    let progress = Arc::new(ProgressBoard::new());

    let max_attempts = config.max_attempts;
    let engine = ReportEngine::new(
        generation,
        aggregator,
        Arc::clone(&store) as Arc<dyn report_engine::store::ReportStore>,
        Arc::clone(&progress) as Arc<dyn report_engine::progress::ProgressSink>,
        Arc::clone(&limiters),
        config,
    );

    let mut request = RunRequest::new(api_key, max_attempts);
    if let Some(session_id) = options.session_id {
        request = request.with_session_id(session_id);
    }

    let result = engine.run(request).await;

    for stats in limiters.all_stats() {
        tracing::info!(
            provider = %stats.provider,
            circuit = ?stats.circuit_state,
            calls_last_minute = stats.calls_last_minute,
            failures = stats.failure_count,
            "limiter stats"
        );
    }

    if result.success {
        let report_id = result.report_id.as_deref().unwrap_or("");
        println!("Report generated: {}", report_id);
        println!("  session:   {}", result.session_id);
        println!(
            "  attempts:  research {} / html {} / js {} / css {}",
            result.research_attempt, result.html_attempt, result.js_attempt, result.css_attempt
        );
        println!("  elapsed:   {:.1}s", result.execution_time.as_secs_f64());
        if let Some(report) = result.report_id.as_deref().and_then(|id| store.get(id)) {
            println!(
                "  artifacts: html {} / css {} / js {} chars",
                report.html.len(),
                report.css.len(),
                report.js.len()
            );
        }
        Ok(())
    } else {
        eprintln!("Report generation failed (session {}):", result.session_id);
        for (i, message) in result.error_messages.iter().enumerate() {
            eprintln!("  {}. {}", i + 1, message);
        }
        std::process::exit(1);
    }
}

#[derive(Default)]
struct CliOptions {
    prompts_dir: Option<String>,
    max_attempts: Option<u32>,
    session_id: Option<String>,
}

fn parse_args(args: &[String]) -> CliOptions {
    let mut options = CliOptions::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--prompts" => {
                if i + 1 < args.len() {
                    options.prompts_dir = Some(args[i + 1].clone());
                    i += 1;
                }
            }
            "--max-attempts" => {
                if i + 1 < args.len() {
                    options.max_attempts = args[i + 1].parse().ok();
                    i += 1;
                }
            }
            "--session" => {
                if i + 1 < args.len() {
                    options.session_id = Some(args[i + 1].clone());
                    i += 1;
                }
            }
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            other => {
                eprintln!("Unknown argument: {}", other);
                print_usage();
                std::process::exit(1);
            }
        }
        i += 1;
    }

    options
}

fn print_usage() {
    println!("report-engine - LLM-driven crypto market report generator");
    println!();
    println!("USAGE:");
    println!("    report-engine [OPTIONS]");
    println!();
    println!("OPTIONS:");
    println!("    --prompts <DIR>        Prompt template directory (default: prompts)");
    println!("    --max-attempts <N>     Research attempt cap (default: 3)");
    println!("    --session <ID>         Session identifier (default: random)");
    println!("    --help, -h             Print this help message");
    println!();
    println!("ENVIRONMENT VARIABLES:");
    println!("    GEMINI_API_KEY            Generation API key (required)");
    println!("    REPORT_MODEL              Generation model (default: gemini-2.5-flash)");
    println!("    REPORT_PROMPTS_DIR        Prompt template directory");
    println!("    REPORT_MAX_ATTEMPTS       Research attempt cap");
    println!("    COINGECKO_GLOBAL_URL      Override global market endpoint");
    println!("    COINGECKO_BTC_PRICE_URL   Override BTC price endpoint");
    println!("    ALTERNATIVE_ME_FNG_URL    Override Fear & Greed endpoint");
    println!("    RUST_LOG                  Logging level (default: info)");
}
