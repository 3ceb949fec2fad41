//! Delver CLI: terminal runner for the Delver research engine.
//!
//! Collects the topic, optionally asks clarifying questions, runs the
//! recursive research tree with progress lines on stderr, and saves the
//! final report under the output directory.

mod feedback;
mod report;

use clap::Parser;
use delver_core::config::DelverConfig;
use delver_core::generation::{ObjectGenerator, OpenAiCompatibleGenerator};
use delver_core::progress::ResearchObserver;
use delver_core::research::{ResearchEngine, ResearchRequest};
use delver_core::search::create_search_provider;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Delver: recursive deep research from the terminal
#[derive(Parser, Debug)]
#[command(name = "delver", version, about, long_about = None)]
struct Cli {
    /// Research topic (prompted interactively if omitted)
    topic: Option<String>,

    /// Sibling queries planned at the root (recommended 2-10)
    #[arg(short, long)]
    breadth: Option<usize>,

    /// Recursive levels below the root (recommended 1-5)
    #[arg(short, long)]
    depth: Option<usize>,

    /// Search provider: jina or firecrawl
    #[arg(long)]
    provider: Option<String>,

    /// Workspace directory (read for .delver/config.toml)
    #[arg(short, long, default_value = ".")]
    workspace: PathBuf,

    /// Directory the report is written to
    #[arg(short, long, default_value = "reports")]
    output_dir: PathBuf,

    /// Skip the clarifying-question round
    #[arg(long)]
    skip_questions: bool,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long)]
    quiet: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_filter(EnvFilter::new(filter));
    tracing_subscriber::registry().with(stderr_layer).init();

    // Load configuration and apply CLI overrides
    let mut config: DelverConfig =
        delver_core::config::load_config(Some(&cli.workspace), None)
            .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;
    if let Some(breadth) = cli.breadth {
        config.research.breadth = breadth;
    }
    if let Some(depth) = cli.depth {
        config.research.depth = depth;
    }
    if let Some(provider) = &cli.provider {
        config.search.provider = provider.clone();
    }
    for warning in config.validate() {
        tracing::warn!("{warning}");
    }

    let topic = match cli.topic.clone() {
        Some(topic) => topic,
        None => ask("What would you like to research? ")?,
    };
    if topic.is_empty() {
        anyhow::bail!("No research topic provided");
    }

    // Backend setup is the only fatal stage: unknown provider or missing
    // credentials surface here, before any research begins.
    let search = create_search_provider(&config.search)
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;
    let generator: Arc<dyn ObjectGenerator> = Arc::new(
        OpenAiCompatibleGenerator::new(&config.generation)
            .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?,
    );

    let combined_query = if cli.skip_questions {
        topic.clone()
    } else {
        let questions = feedback::generate_feedback(generator.as_ref(), &topic, 3).await;
        println!("\nTo better understand your research needs, please answer these follow-up questions (leave blank to skip):");
        let mut answers = Vec::new();
        for question in &questions {
            answers.push(ask(&format!("\n{question}\n> "))?);
        }
        combine_query(&topic, &questions, &answers)
    };

    let observer = ResearchObserver::new().with_progress_callback(Arc::new(|progress| {
        if let Some(query) = &progress.current_query {
            tracing::info!(
                depth = progress.current_depth,
                completed = progress.completed_queries,
                total = progress.total_queries,
                query = %query,
                "Research progress"
            );
        }
    }));

    let request = ResearchRequest::new(
        combined_query.clone(),
        config.research.breadth,
        config.research.depth,
    );
    let engine = ResearchEngine::new(search, generator.clone(), config.research.clone());
    let result = engine.run(request, observer).await;

    println!(
        "\nResearch complete: {} learnings from {} sources.",
        result.learnings.len(),
        result.visited_urls.len()
    );

    println!("Writing final report...");
    let report_markdown = report::write_final_report(
        generator.as_ref(),
        &combined_query,
        &result.learnings,
        &result.visited_urls,
        config.research.report_budget_chars,
    )
    .await
    .map_err(|e| anyhow::anyhow!("Report generation failed: {}", e))?;

    std::fs::create_dir_all(&cli.output_dir)?;
    let path = cli.output_dir.join(report_filename(&topic));
    std::fs::write(&path, &report_markdown)?;
    println!("Report saved to {}", path.display());

    Ok(())
}

/// Prompt on stdout and read one trimmed line from stdin.
fn ask(prompt: &str) -> anyhow::Result<String> {
    print!("{prompt}");
    std::io::stdout().flush()?;
    let mut answer = String::new();
    std::io::stdin().read_line(&mut answer)?;
    Ok(answer.trim().to_string())
}

/// Fold the clarifying questions and their answers into one research prompt.
/// Unanswered questions are dropped.
fn combine_query(topic: &str, questions: &[String], answers: &[String]) -> String {
    let mut combined = format!("Initial Query: {topic}");
    let answered: Vec<String> = questions
        .iter()
        .zip(answers)
        .filter(|(_, a)| !a.is_empty())
        .map(|(q, a)| format!("Q: {q}\nA: {a}"))
        .collect();
    if !answered.is_empty() {
        combined.push_str("\nFollow-up Questions and Answers:\n");
        combined.push_str(&answered.join("\n"));
    }
    combined
}

/// Build a `<timestamp>-<slug>.md` filename from the topic.
fn report_filename(topic: &str) -> String {
    let timestamp = chrono::Local::now().format("%Y-%m-%d-%H-%M");
    format!("{}-{}.md", timestamp, slugify(topic))
}

/// First line of the topic with special characters removed, spaces
/// hyphenated, limited to 50 characters.
fn slugify(topic: &str) -> String {
    let first_line = topic.lines().next().unwrap_or(topic);
    let cleaned: String = first_line
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || c.is_whitespace() || *c == '-')
        .collect();
    let hyphenated = cleaned.split_whitespace().collect::<Vec<_>>().join("-");
    hyphenated.chars().take(50).collect()
}
