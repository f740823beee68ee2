use anyhow::Result;
use clap::Parser;
use gmail_labeller::cli::{self, Cli, Commands, ProgressReporter};
use gmail_labeller::config::Config;
use indicatif::MultiProgress;
use std::io::{self, Write};
use std::process;
use std::sync::{Arc, Mutex};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::EnvFilter;

/// A writer that prints through MultiProgress so log lines stay above the bar
#[derive(Clone)]
struct MultiProgressWriter {
    multi: Arc<MultiProgress>,
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl MultiProgressWriter {
    fn new(multi: Arc<MultiProgress>) -> Self {
        Self {
            multi,
            buffer: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn buffer(&self) -> io::Result<std::sync::MutexGuard<'_, Vec<u8>>> {
        self.buffer
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "log buffer poisoned"))
    }
}

impl Write for MultiProgressWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer()?.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut buffer = self.buffer()?;
        if !buffer.is_empty() {
            let msg = String::from_utf8_lossy(&buffer);
            let msg = msg.trim_end_matches('\n');
            if !msg.is_empty() {
                let _ = self.multi.println(msg);
            }
            buffer.clear();
        }
        Ok(())
    }
}

impl Drop for MultiProgressWriter {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}

#[derive(Clone)]
struct MultiProgressMakeWriter {
    multi: Arc<MultiProgress>,
}

impl<'a> MakeWriter<'a> for MultiProgressMakeWriter {
    type Writer = MultiProgressWriter;

    fn make_writer(&'a self) -> Self::Writer {
        MultiProgressWriter::new(Arc::clone(&self.multi))
    }
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {}", e);
        eprintln!("\nFor help, run: gmail-labeller --help");
        process::exit(1);
    }
}

async fn run() -> Result<()> {
    // Dependencies pull in more than one rustls backend; pick one explicitly
    #[cfg(not(windows))]
    rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install default crypto provider"))?;

    #[cfg(windows)]
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install default crypto provider"))?;

    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("gmail_labeller=debug,info"))
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("gmail_labeller=info,warn,error"))
    };

    let multi_progress = Arc::new(MultiProgress::new());
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(MultiProgressMakeWriter {
            multi: Arc::clone(&multi_progress),
        })
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    match cli.command {
        Commands::Auth { force } => {
            tracing::info!("Authenticating with Gmail API...");
            cli::authenticate(&cli, force).await?;
        }

        Commands::Run {
            ref query,
            ref script,
            dry_run,
        } => {
            let mut config = Config::load(&cli.config).await?;
            cli::apply_run_overrides(&mut config, query.clone(), script.clone(), dry_run)?;
            if config.execution.dry_run {
                println!("Running in DRY RUN mode - no changes will be made");
            }

            let reporter = ProgressReporter::new(Arc::clone(&multi_progress));
            let summary = cli::run_labeller(&cli, &config, &reporter).await?;

            println!();
            print!("{}", summary.to_text());
        }

        Commands::Check { ref script } => {
            let mut config = Config::load(&cli.config).await?;
            if let Some(script) = script {
                config.rules.script = script.clone();
            }
            cli::check_script(&config).await?;
        }

        Commands::InitConfig { ref output, force } => {
            cli::init_config(output, force).await?;
        }
    }

    Ok(())
}
