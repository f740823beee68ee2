//! Command-line interface

use clap::{Parser, Subcommand};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::auth;
use crate::client::{GmailClient, ProductionGmailClient};
use crate::config::Config;
use crate::error::{GmailError, Result};
use crate::pipeline::{ClassificationPipeline, ProgressCallback, RunSummary};
use crate::rules::{RuleEvaluator, ScriptEngine};

#[derive(Parser, Debug)]
#[command(name = "gmail-labeller")]
#[command(version)]
#[command(about = "Label Gmail messages with a user-written rule script", long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    pub config: PathBuf,

    /// Path to OAuth2 credentials file
    #[arg(long, default_value = "credentials.json")]
    pub credentials: PathBuf,

    /// Path to token cache file
    #[arg(long, default_value = ".gmail-labeller/token.json")]
    pub token_cache: PathBuf,

    /// Verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Authenticate with Gmail API
    Auth {
        /// Force re-authentication even if token exists
        #[arg(long)]
        force: bool,
    },

    /// Evaluate the rule script against every matching message
    Run {
        /// Gmail search query (overrides scan.query)
        #[arg(short, long)]
        query: Option<String>,

        /// Rule script (overrides rules.script)
        #[arg(short, long)]
        script: Option<PathBuf>,

        /// Log intended label changes without applying them
        #[arg(long)]
        dry_run: bool,
    },

    /// Compile the rule script and report errors without contacting Gmail
    Check {
        /// Rule script (overrides rules.script)
        #[arg(short, long)]
        script: Option<PathBuf>,
    },

    /// Generate example configuration file
    InitConfig {
        /// Path to create config file
        #[arg(short, long, default_value = "config.toml")]
        output: PathBuf,

        /// Overwrite existing file
        #[arg(long)]
        force: bool,
    },
}

/// Progress reporter using indicatif
pub struct ProgressReporter {
    multi: Arc<MultiProgress>,
    spinner_style: ProgressStyle,
    bar_style: ProgressStyle,
}

impl ProgressReporter {
    pub fn new(multi: Arc<MultiProgress>) -> Self {
        let spinner_style = ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed:>6}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_chars("⠁⠂⠄⡀⢀⠠⠐⠈ ");

        let bar_style = ProgressStyle::default_bar()
            .template("[{elapsed:>6}] {bar:40.cyan/blue} {pos:>7}/{len:7} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("##-");

        Self {
            multi,
            spinner_style,
            bar_style,
        }
    }

    pub fn add_spinner(&self, msg: &str) -> ProgressBar {
        let pb = self.multi.add(ProgressBar::new_spinner());
        pb.set_style(self.spinner_style.clone());
        pb.set_message(msg.to_string());
        pb.enable_steady_tick(Duration::from_millis(100));
        pb
    }

    /// Bar whose length is filled in once the message list is known
    pub fn add_progress_bar(&self, msg: &str) -> ProgressBar {
        let pb = self.multi.add(ProgressBar::new(0));
        pb.set_style(self.bar_style.clone());
        pb.set_message(msg.to_string());
        pb
    }

    /// Finish a spinner and clear it from the multi-progress display
    pub fn finish_spinner(&self, pb: &ProgressBar, msg: &str) {
        pb.finish_and_clear();
        let _ = self.multi.println(format!("  ✓ {}", msg));
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new(Arc::new(MultiProgress::new()))
    }
}

/// Apply command-line overrides on top of the loaded config
pub fn apply_run_overrides(
    config: &mut Config,
    query: Option<String>,
    script: Option<PathBuf>,
    dry_run: bool,
) -> Result<()> {
    if let Some(query) = query {
        config.scan.query = query;
    }
    if let Some(script) = script {
        config.rules.script = script;
    }
    if dry_run {
        config.execution.dry_run = true;
    }
    config.validate()
}

/// Compile the configured rule script
pub async fn load_rules(config: &Config) -> Result<ScriptEngine> {
    Ok(ScriptEngine::load(&config.rules.script)
        .await?
        .with_max_operations(config.rules.max_operations))
}

/// Run the labeller end to end: load rules, authenticate, classify
///
/// The script is compiled before authenticating so syntax errors surface
/// without a network round trip.
pub async fn run_labeller(cli: &Cli, config: &Config, reporter: &ProgressReporter) -> Result<RunSummary> {
    let script_spinner = reporter.add_spinner("Compiling rule script...");
    let evaluator: Arc<dyn RuleEvaluator> = Arc::new(load_rules(config).await?);
    reporter.finish_spinner(
        &script_spinner,
        &format!("Rule script compiled from {:?}", config.rules.script),
    );

    let auth_spinner = reporter.add_spinner("Authenticating with Gmail API...");
    let hub = auth::initialize_gmail_hub(&cli.credentials, &cli.token_cache).await?;
    reporter.finish_spinner(&auth_spinner, "Gmail API authenticated successfully");

    let client: Arc<dyn GmailClient> = Arc::new(ProductionGmailClient::new(hub, &config.client));

    if config.execution.dry_run {
        info!("Dry run: no labels will be created or changed");
    }

    let bar = reporter.add_progress_bar("Labelling messages...");
    let bar_handle = bar.clone();
    let progress: ProgressCallback = Arc::new(move |done, total| {
        bar_handle.set_length(total as u64);
        bar_handle.set_position(done as u64);
    });

    let pipeline = ClassificationPipeline::new(client, evaluator, config.execution.dry_run)
        .with_progress(progress);
    let summary = pipeline.run(&config.scan.query).await?;

    bar.finish_with_message(format!("Evaluated {} messages", summary.messages_processed));
    Ok(summary)
}

/// Compile a script and report whether it is valid
pub async fn check_script(config: &Config) -> Result<()> {
    load_rules(config).await?;
    println!("✓ {:?} compiled successfully", config.rules.script);
    Ok(())
}

/// Run the OAuth flow and print the connected account
pub async fn authenticate(cli: &Cli, force: bool) -> Result<String> {
    if force {
        auth::reset_token_cache(&cli.token_cache).await?;
    }

    let hub = auth::initialize_gmail_hub(&cli.credentials, &cli.token_cache).await?;
    let email = auth::account_email(&hub).await?;
    println!("✓ Authenticated as {}", email);
    println!("  Token cached at {:?}", cli.token_cache);
    Ok(email)
}

/// Write a default config, refusing to clobber an existing file unless forced
pub async fn init_config(output: &Path, force: bool) -> Result<()> {
    if output.exists() && !force {
        return Err(GmailError::ConfigError(format!(
            "{:?} already exists; pass --force to overwrite",
            output
        )));
    }

    Config::create_example(output).await?;
    println!("✓ Wrote example configuration to {:?}", output);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_run_flags() {
        let cli = Cli::try_parse_from([
            "gmail-labeller",
            "--config",
            "custom.toml",
            "-v",
            "run",
            "--query",
            "label:inbox",
            "--script",
            "rules.rhai",
            "--dry-run",
        ])
        .unwrap();

        assert_eq!(cli.config, PathBuf::from("custom.toml"));
        assert!(cli.verbose);
        match cli.command {
            Commands::Run { query, script, dry_run } => {
                assert_eq!(query.as_deref(), Some("label:inbox"));
                assert_eq!(script, Some(PathBuf::from("rules.rhai")));
                assert!(dry_run);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_default_paths() {
        let cli = Cli::try_parse_from(["gmail-labeller", "check"]).unwrap();
        assert_eq!(cli.config, PathBuf::from("config.toml"));
        assert_eq!(cli.credentials, PathBuf::from("credentials.json"));
        assert_eq!(cli.token_cache, PathBuf::from(".gmail-labeller/token.json"));
        assert!(matches!(cli.command, Commands::Check { script: None }));
    }

    #[test]
    fn test_subcommand_required() {
        assert!(Cli::try_parse_from(["gmail-labeller"]).is_err());
    }

    #[test]
    fn test_run_overrides() {
        let mut config = Config::default();
        apply_run_overrides(
            &mut config,
            Some("from:boss@example.com".to_string()),
            Some(PathBuf::from("other.rhai")),
            true,
        )
        .unwrap();

        assert_eq!(config.scan.query, "from:boss@example.com");
        assert_eq!(config.rules.script, PathBuf::from("other.rhai"));
        assert!(config.execution.dry_run);
    }

    #[test]
    fn test_run_overrides_keep_config_values() {
        let mut config = Config::default();
        config.execution.dry_run = true;
        apply_run_overrides(&mut config, None, None, false).unwrap();

        assert_eq!(config.scan.query, "is:unread -has:userlabels");
        assert!(config.execution.dry_run);
    }

    #[test]
    fn test_run_overrides_reject_empty_query() {
        let mut config = Config::default();
        let result = apply_run_overrides(&mut config, Some(String::new()), None, false);
        assert!(matches!(result, Err(GmailError::ConfigError(_))));
    }

    #[tokio::test]
    async fn test_check_script_reports_syntax_error() {
        let dir = TempDir::new().unwrap();
        let script = dir.path().join("bad.rhai");
        tokio::fs::write(&script, "add(").await.unwrap();

        let mut config = Config::default();
        config.rules.script = script;

        assert!(matches!(check_script(&config).await, Err(GmailError::ScriptError(_))));
    }

    #[tokio::test]
    async fn test_check_script_accepts_valid_script() {
        let dir = TempDir::new().unwrap();
        let script = dir.path().join("good.rhai");
        tokio::fs::write(&script, r#"if fromDomain == "example.com" { add("example"); }"#)
            .await
            .unwrap();

        let mut config = Config::default();
        config.rules.script = script;

        assert!(check_script(&config).await.is_ok());
    }

    #[tokio::test]
    async fn test_init_config_refuses_overwrite() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");

        init_config(&path, false).await.unwrap();
        assert!(path.exists());

        let again = init_config(&path, false).await;
        assert!(matches!(again, Err(GmailError::ConfigError(_))));

        assert!(init_config(&path, true).await.is_ok());
    }
}
