//! rustscreen - Systematic Review Screening Pipeline
//!
//! Turns screening criteria into executable screening logic with the help of
//! a web-based AI agent, parses BibTeX exports and screens every article.
//!
//! ## Usage
//!
//! ```bash
//! rustscreen generate criteria.docx
//! rustscreen parse-bib articles.bib
//! rustscreen screen
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rustscreen::agent::{generate_screening_logic, AgentSession, BrowserProfile};
use rustscreen::bibtex;
use rustscreen::config::{
    parse_agent_url, BrowserChannel, BrowserOptions, WaitPolicy, DEFAULT_AGENT_URL,
    DEFAULT_BIB_FILE, DEFAULT_LOGIC_FILE, DEFAULT_PARSED_FILE, DEFAULT_RESULTS_FILE,
};
use rustscreen::criteria::parse_criteria;
use rustscreen::logic::{DecisionTable, ReferenceStrategy, ScreeningStrategy, TableStrategy};
use rustscreen::prompts::{build_generation_prompt, load_reference, save_prompt};
use rustscreen::screening::{screen_articles, write_results, ScreeningSummary};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::Level;
use tracing_subscriber::{fmt, EnvFilter};

// ============================================================================
// CLI Definition
// ============================================================================

/// Systematic Review Screening Pipeline
#[derive(Parser)]
#[command(name = "rustscreen")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate screening logic from a criteria document with the AI agent
    Generate {
        /// Criteria document (.txt, .docx or .json)
        criteria: PathBuf,

        /// Where to write the generated decision table
        #[arg(short, long, default_value = DEFAULT_LOGIC_FILE)]
        output: PathBuf,

        #[command(flatten)]
        browser: BrowserArgs,

        /// AI agent endpoint
        #[arg(long, default_value = DEFAULT_AGENT_URL)]
        agent_url: String,

        /// Custom reference decision table shown to the agent
        #[arg(long)]
        reference: Option<PathBuf>,

        /// Also write the prompt to this file
        #[arg(long)]
        save_prompt: Option<PathBuf>,

        /// Seconds to wait for an interactive login
        #[arg(long, default_value = "120")]
        login_timeout: u64,

        /// Hard deadline for the agent response, in seconds
        #[arg(long, default_value = "300")]
        response_timeout: u64,

        /// The response is complete once unchanged for this many seconds
        #[arg(long, default_value = "10")]
        idle_secs: u64,

        /// Interval between page samples, in milliseconds
        #[arg(long, default_value = "2000")]
        poll_ms: u64,

        /// Run the browser without a window (login must already be stored)
        #[arg(long)]
        headless: bool,
    },

    /// Parse a BibTeX file into article records
    ParseBib {
        /// BibTeX input file
        #[arg(default_value = DEFAULT_BIB_FILE)]
        input: PathBuf,

        /// Parsed articles output (JSON)
        #[arg(short, long, default_value = DEFAULT_PARSED_FILE)]
        output: PathBuf,
    },

    /// Screen parsed articles and write the results table
    Screen {
        /// Parsed articles (JSON)
        #[arg(short, long, default_value = DEFAULT_PARSED_FILE)]
        input: PathBuf,

        /// Generated decision table
        #[arg(short, long, default_value = DEFAULT_LOGIC_FILE)]
        logic: PathBuf,

        /// Screen directly from a criteria document instead of the decision table
        #[arg(short, long)]
        criteria: Option<PathBuf>,

        /// Results output (CSV)
        #[arg(short, long, default_value = DEFAULT_RESULTS_FILE)]
        output: PathBuf,
    },

    /// Print the normalized criteria model as JSON
    Criteria {
        /// Criteria document (.txt, .docx or .json)
        file: PathBuf,
    },

    /// Build the generation prompt without opening a browser
    Prompt {
        /// Criteria document (.txt, .docx or .json)
        criteria: PathBuf,

        /// Custom reference decision table
        #[arg(long)]
        reference: Option<PathBuf>,

        /// Write the prompt here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Manage the persistent browser profile
    Profile {
        #[command(subcommand)]
        action: ProfileAction,

        #[command(flatten)]
        browser: ProfileArgs,
    },
}

#[derive(clap::Args)]
struct BrowserArgs {
    #[command(flatten)]
    profile: ProfileArgs,

    /// Explicit browser executable
    #[arg(long)]
    browser_path: Option<PathBuf>,
}

#[derive(clap::Args)]
struct ProfileArgs {
    /// Browser to drive
    #[arg(long, value_enum, default_value = "chrome", global = true)]
    browser: BrowserChannel,

    /// Profile directory (default: ~/.rustscreen/<browser>_profile)
    #[arg(long, global = true)]
    profile_dir: Option<PathBuf>,
}

impl ProfileArgs {
    fn profile(&self) -> BrowserProfile {
        match &self.profile_dir {
            Some(dir) => BrowserProfile::with_path(dir.clone()),
            None => BrowserProfile::for_channel_or_local(self.browser),
        }
    }
}

#[derive(Subcommand)]
enum ProfileAction {
    /// Show the profile directory
    Path,
    /// Delete the profile (logs out of the agent)
    Clear,
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.debug { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.to_string()));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .init();

    match cli.command {
        Commands::Generate {
            criteria,
            output,
            browser,
            agent_url,
            reference,
            save_prompt,
            login_timeout,
            response_timeout,
            idle_secs,
            poll_ms,
            headless,
        } => {
            let policy = WaitPolicy {
                login_timeout: Duration::from_secs(login_timeout),
                response_timeout: Duration::from_secs(response_timeout),
                idle_window: Duration::from_secs(idle_secs),
                poll_interval: Duration::from_millis(poll_ms),
                ..WaitPolicy::default()
            };
            let options = BrowserOptions {
                channel: browser.profile.browser,
                executable: browser.browser_path.clone(),
                headless,
                ..BrowserOptions::default()
            };
            let request = GenerateRequest {
                criteria,
                output,
                profile: browser.profile.profile(),
                options,
                agent_url,
                reference,
                save_prompt,
                policy,
            };
            run_generate(request).await
        }
        Commands::ParseBib { input, output } => run_parse_bib(&input, &output),
        Commands::Screen {
            input,
            logic,
            criteria,
            output,
        } => run_screen(&input, &logic, criteria.as_deref(), &output),
        Commands::Criteria { file } => show_criteria(&file),
        Commands::Prompt {
            criteria,
            reference,
            output,
        } => run_prompt(&criteria, reference.as_deref(), output.as_deref()),
        Commands::Profile { action, browser } => handle_profile(action, &browser),
    }
}

// ============================================================================
// Logic Generation
// ============================================================================

struct GenerateRequest {
    criteria: PathBuf,
    output: PathBuf,
    profile: BrowserProfile,
    options: BrowserOptions,
    agent_url: String,
    reference: Option<PathBuf>,
    save_prompt: Option<PathBuf>,
    policy: WaitPolicy,
}

async fn run_generate(req: GenerateRequest) -> Result<()> {
    req.policy.validate().context("Invalid wait settings")?;
    let agent_url = parse_agent_url(&req.agent_url).context("Invalid --agent-url")?;

    println!("\n--- Step 1: Criteria ---");
    let criteria = parse_criteria(&req.criteria)
        .with_context(|| format!("Failed to read criteria from {}", req.criteria.display()))?;
    println!(
        "Loaded {} inclusion and {} exclusion categories.",
        criteria.inclusion.len(),
        criteria.exclusion.len()
    );

    let reference = load_reference(req.reference.as_deref()).context("Failed to read reference logic")?;
    let prompt = build_generation_prompt(&criteria, &reference)?;
    if let Some(path) = &req.save_prompt {
        save_prompt(path, &prompt).context("Failed to save prompt")?;
        println!("Prompt saved to: {}", path.display());
    }

    println!("\n--- Step 2: AI Agent ---");
    println!("Browser profile: {}", req.profile.path().display());
    if !req.options.headless {
        println!("If the agent asks you to log in, do so in the opened window.");
    }

    let session = AgentSession::launch(&req.profile, &req.options).context("Failed to start browser")?;
    let mut chat = session.chat();
    let table = generate_screening_logic(&mut chat, &prompt, &agent_url, &req.output, &req.policy)
        .await
        .context("Screening logic generation failed")?;
    drop(session);

    println!(
        "Screening logic saved to: {} ({} groups, {} rules)",
        req.output.display(),
        table.groups.len(),
        table.rules.len()
    );
    Ok(())
}

// ============================================================================
// BibTeX Ingestion
// ============================================================================

fn run_parse_bib(input: &Path, output: &Path) -> Result<()> {
    let report = bibtex::parse_file(input)
        .with_context(|| format!("Failed to read BibTeX file {}", input.display()))?;

    if report.skipped > 0 {
        println!("Skipped {} malformed entries.", report.skipped);
    }
    bibtex::write_records(output, &report.records)
        .with_context(|| format!("Failed to write {}", output.display()))?;

    println!("Parsed {} articles -> {}", report.records.len(), output.display());
    Ok(())
}

// ============================================================================
// Screening
// ============================================================================

fn run_screen(input: &Path, logic: &Path, criteria: Option<&Path>, output: &Path) -> Result<()> {
    let articles = bibtex::read_records(input)
        .with_context(|| format!("Failed to read parsed articles from {}", input.display()))?;

    let strategy: Box<dyn ScreeningStrategy> = match criteria {
        Some(path) => {
            let model = parse_criteria(path)
                .with_context(|| format!("Failed to read criteria from {}", path.display()))?;
            Box::new(ReferenceStrategy::new(model))
        }
        None => {
            let table = DecisionTable::load(logic).with_context(|| {
                format!(
                    "Failed to load screening logic from {} (run `rustscreen generate` first)",
                    logic.display()
                )
            })?;
            Box::new(TableStrategy::new(table)?)
        }
    };

    println!("Screening {} articles with {} logic...", articles.len(), strategy.name());
    let decisions = screen_articles(strategy.as_ref(), &articles);
    write_results(output, &decisions)
        .with_context(|| format!("Failed to write results to {}", output.display()))?;

    let summary = ScreeningSummary::from_decisions(&decisions);
    println!("\n=== Summary ===");
    println!("Total:    {}", summary.total);
    println!("Included: {}", summary.included);
    println!("Excluded: {}", summary.excluded);
    println!("Results:  {}", output.display());
    Ok(())
}

// ============================================================================
// Inspection Commands
// ============================================================================

fn show_criteria(path: &Path) -> Result<()> {
    let model = parse_criteria(path)
        .with_context(|| format!("Failed to read criteria from {}", path.display()))?;
    println!("{}", serde_json::to_string_pretty(&model)?);
    Ok(())
}

fn run_prompt(criteria: &Path, reference: Option<&Path>, output: Option<&Path>) -> Result<()> {
    let model = parse_criteria(criteria)
        .with_context(|| format!("Failed to read criteria from {}", criteria.display()))?;
    let reference = load_reference(reference).context("Failed to read reference logic")?;
    let prompt = build_generation_prompt(&model, &reference)?;

    match output {
        Some(path) => {
            save_prompt(path, &prompt).context("Failed to save prompt")?;
            println!("Prompt saved to: {}", path.display());
        }
        None => println!("{}", prompt),
    }
    Ok(())
}

fn handle_profile(action: ProfileAction, args: &ProfileArgs) -> Result<()> {
    let profile = args.profile();

    match action {
        ProfileAction::Path => {
            println!("Profile directory: {}", profile.path().display());
        }
        ProfileAction::Clear => {
            profile.clear().context("Failed to clear browser profile")?;
            println!("Profile cleared.");
        }
    }

    Ok(())
}
