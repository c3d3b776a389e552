//! sgrep CLI - search chat-session history
//!
//! Regex search by default, semantic search with `-s`, index
//! maintenance with `--index`.

use anyhow::{bail, Context, Result};
use clap::{CommandFactory, Parser};
use colored::*;
use sgrep::transcript::discover_session_files;
use sgrep::{
    format_json, format_no_match_hint, format_stats, format_terminal, grep, normalize_bre, Config,
    Indexer, OllamaEmbedder, RegexSearcher, RoleFilter, SearchOptions, Searcher, VectorStore,
};
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "sgrep")]
#[command(author, version, about = "Search chat-session history by regex or by meaning", long_about = None)]
#[command(after_help = "Examples:
  sgrep \"worktree\"              find mentions of worktree
  sgrep -p -n 5 \"database\"      your prompts about databases
  sgrep -C 2 \"error\"            matches with 2 messages of context
  sgrep -a -d 30 \"deploy\"       all projects, last 30 days
  sgrep -s \"that migration fix\" semantic search by meaning
  sgrep --json \"test\" | jq .    pipe JSON to jq

Exit codes:
  0  matches found
  1  no matches found
  2  error")]
struct Cli {
    /// Regex pattern, or query text with -s
    pattern: Option<String>,

    /// Ignored; sessions are located automatically
    #[arg(hide = true)]
    extra: Vec<String>,

    /// Search only user prompts
    #[arg(short = 'p', long = "prompts", conflicts_with = "responses")]
    prompts: bool,

    /// Search only assistant responses
    #[arg(short = 'r', long = "responses")]
    responses: bool,

    /// Search all projects (default: the current directory's project)
    #[arg(short = 'a', long = "all-projects")]
    all_projects: bool,

    /// List matching sessions only
    #[arg(short = 'l', long = "list")]
    list_only: bool,

    /// Maximum number of results
    #[arg(short = 'n', long = "max-results", default_value = "20", env = "SGREP_MAX_RESULTS")]
    max_results: usize,

    /// Maximum age in days (0 = today only)
    #[arg(short = 'd', long = "days", default_value = "7", env = "SGREP_MAX_DAYS")]
    max_days: u32,

    /// Context messages before and after each match
    #[arg(short = 'C', long = "context", default_value = "0")]
    context: usize,

    /// Context messages before each match
    #[arg(short = 'B', long = "before", default_value = "0")]
    before: usize,

    /// Context messages after each match
    #[arg(short = 'A', long = "after", default_value = "0")]
    after: usize,

    /// Semantic search (requires an index)
    #[arg(short = 's', long = "semantic")]
    semantic: bool,

    /// Output as JSON
    #[arg(long, env = "SGREP_JSON")]
    json: bool,

    /// Build or update the vector index
    #[arg(long)]
    index: bool,

    /// Show index statistics (with --index)
    #[arg(long, requires = "index")]
    status: bool,

    /// Re-embed everything (with --index)
    #[arg(long = "all", requires = "index")]
    reindex_all: bool,

    /// Transcript store root
    #[arg(long, env = "SGREP_PROJECTS_DIR")]
    projects_dir: Option<PathBuf>,

    /// Index directory
    #[arg(long, env = "SGREP_INDEX_DIR")]
    index_dir: Option<PathBuf>,

    /// Embedding service URL
    #[arg(long, env = "SGREP_EMBED_URL")]
    embed_url: Option<String>,

    /// Embedding model
    #[arg(long, env = "SGREP_MODEL")]
    model: Option<String>,

    /// Write the effective settings to config.json in the index directory
    #[arg(long)]
    save_config: bool,

    /// Enable verbose logging
    #[arg(short = 'v', long)]
    verbose: bool,
}

impl Cli {
    fn search_options(&self) -> SearchOptions {
        let role = if self.prompts {
            RoleFilter::User
        } else if self.responses {
            RoleFilter::Assistant
        } else {
            RoleFilter::Both
        };

        // -C fills in whichever side was not given explicitly
        let before = if self.before == 0 { self.context } else { self.before };
        let after = if self.after == 0 { self.context } else { self.after };

        SearchOptions::new()
            .with_role(role)
            .with_max_results(self.max_results)
            .with_max_days(self.max_days)
            .with_context(before, after)
            .with_list_only(self.list_only)
    }

    fn config(&self) -> Result<Config> {
        let index_dir = self
            .index_dir
            .clone()
            .unwrap_or_else(|| Config::default().index_dir);
        let mut config = Config::load_or_default(&index_dir)?;

        if let Some(projects_dir) = &self.projects_dir {
            config.projects_dir = projects_dir.clone();
        }

        let mut embedding = config.embedding.clone();
        if let Some(url) = &self.embed_url {
            embedding.url = url.clone();
        }
        if let Some(model) = &self.model {
            embedding.model = model.clone();
        }
        Ok(config.with_embedding(embedding))
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("warn")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {:#}", "error:".red().bold(), e);
            ExitCode::from(2)
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    let config = cli.config()?;

    if cli.save_config {
        config.save()?;
        eprintln!("{} {}", "Saved".green().bold(), config.config_path().display());
        return Ok(ExitCode::SUCCESS);
    }

    if cli.index {
        return if cli.status {
            cmd_status(&config)
        } else {
            cmd_index(&config, cli.reindex_all)
        };
    }

    let Some(pattern) = cli.pattern.clone() else {
        Cli::command().print_help()?;
        return Ok(ExitCode::from(2));
    };

    if !cli.extra.is_empty() {
        eprintln!(
            "{} extra arguments ignored: {}",
            "warning:".yellow().bold(),
            cli.extra.join(" ")
        );
        eprintln!("  sgrep searches {} automatically", config.projects_dir.display());
        eprintln!("  use -a for all projects, -d N for age range");
    }

    let root = resolve_search_root(&config, cli.all_projects)?;
    let options = cli.search_options();

    if cli.semantic {
        cmd_semantic(&config, &pattern, &root, &options, &cli)
    } else {
        cmd_grep(&config, &pattern, &root, &options, &cli)
    }
}

fn resolve_search_root(config: &Config, all_projects: bool) -> Result<PathBuf> {
    if all_projects {
        return Ok(config.projects_dir.clone());
    }

    let cwd = std::env::current_dir().context("cannot determine working directory")?;
    let root = config.project_dir_for(&cwd);
    if !root.is_dir() {
        bail!(
            "no sessions for {}\ntry -a to search all projects",
            cwd.display()
        );
    }
    Ok(root)
}

fn cmd_grep(
    config: &Config,
    pattern: &str,
    root: &Path,
    options: &SearchOptions,
    cli: &Cli,
) -> Result<ExitCode> {
    let pattern = normalize_bre(pattern);
    let output = RegexSearcher::new(config).search(&pattern, root, options)?;

    if output.matches.is_empty() {
        eprint!(
            "{}",
            format_no_match_hint(
                &pattern,
                output.stats.files_total,
                options,
                cli.all_projects,
                false
            )
        );
        return Ok(ExitCode::from(1));
    }

    if cli.json {
        println!("{}", format_json(&output.matches)?);
    } else {
        let highlight = grep::compile(&pattern).ok();
        print!("{}", format_terminal(&output.matches, options, highlight.as_ref()));
    }
    Ok(ExitCode::SUCCESS)
}

fn cmd_semantic(
    config: &Config,
    query: &str,
    root: &Path,
    options: &SearchOptions,
    cli: &Cli,
) -> Result<ExitCode> {
    let embedder = OllamaEmbedder::new(&config.embedding)?;
    embedder.ensure_reachable()?;

    let searcher = Searcher::new(config.clone(), Box::new(embedder));
    let matches = searcher.search(query, root, options)?;

    if matches.is_empty() {
        let files_in_scope = discover_session_files(root, options.modified_since())
            .map(|files| files.len())
            .unwrap_or(0);
        eprint!(
            "{}",
            format_no_match_hint(query, files_in_scope, options, cli.all_projects, true)
        );
        return Ok(ExitCode::from(1));
    }

    if cli.json {
        println!("{}", format_json(&matches)?);
    } else {
        print!("{}", format_terminal(&matches, options, None));
    }
    Ok(ExitCode::SUCCESS)
}

fn cmd_index(config: &Config, force: bool) -> Result<ExitCode> {
    let embedder = OllamaEmbedder::new(&config.embedding)?;
    embedder.ensure_reachable()?;

    eprintln!(
        "{} {}",
        "Indexing".cyan().bold(),
        config.projects_dir.display()
    );

    let indexer = Indexer::new(config.clone(), Box::new(embedder))
        .with_progress(std::io::stderr().is_terminal());
    let stats = indexer.run(force)?;

    eprintln!("{} {}", "✓".green(), stats);
    Ok(ExitCode::SUCCESS)
}

fn cmd_status(config: &Config) -> Result<ExitCode> {
    let stats = VectorStore::new(config).stats()?;
    if stats.projects == 0 {
        println!("no index - run: sgrep --index");
        return Ok(ExitCode::SUCCESS);
    }

    print!("{}", format_stats(&stats));
    Ok(ExitCode::SUCCESS)
}
