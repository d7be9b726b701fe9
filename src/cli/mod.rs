pub mod error;

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{CommentSource, Config, Identity};
use crate::observer::LoggingObserver;
use crate::orchestrator::Orchestrator;
use crate::peer::AnyBus;
use crate::sync::RealGit;
use error::{CliError, CliResult};

#[derive(Parser, Debug)]
#[command(name = "gitsync")]
#[command(author, version, about = "Keep a directory synchronized with a git remote", long_about = None)]
pub struct Cli {
    /// Directory to watch and synchronize
    #[arg(default_value = "data")]
    pub root: PathBuf,

    /// Git remote to merge with and push to
    #[arg(long, default_value = "origin")]
    pub remote: String,

    /// Remote branch
    #[arg(long, default_value = "master")]
    pub branch: String,

    /// Milliseconds without changes before a flush
    #[arg(long, default_value_t = 1000)]
    pub quiet_ms: u64,

    /// Milliseconds between quiescence checks
    #[arg(long, default_value_t = 100)]
    pub tick_ms: u64,

    /// Seconds after which a git command is killed
    #[arg(long, default_value_t = 120)]
    pub git_timeout_secs: u64,

    /// Redis URL for peer notifications (in-process only when unset)
    #[arg(long, env = "GITSYNC_REDIS_URL")]
    pub redis_url: Option<String>,

    /// Pub/sub channel for push notices
    #[arg(long, default_value = "git_sync")]
    pub channel: String,

    /// Author name for regular commits
    #[arg(long, env = "GITSYNC_AUTHOR_NAME")]
    pub author_name: Option<String>,

    /// Author email for regular commits
    #[arg(long, env = "GITSYNC_AUTHOR_EMAIL")]
    pub author_email: Option<String>,

    /// Source of regular commit messages
    #[arg(long, value_enum, default_value_t = CommentSource::Status)]
    pub comment_source: CommentSource,
}

impl Cli {
    pub fn into_config(self) -> Config {
        let mut config = Config::for_root(self.root);
        config.remote = self.remote;
        config.branch = self.branch;
        config.quiet_period = Duration::from_millis(self.quiet_ms);
        config.tick = Duration::from_millis(self.tick_ms);
        config.git_timeout = Duration::from_secs(self.git_timeout_secs);
        config.redis_url = self.redis_url;
        config.channel = self.channel;
        config.comment_source = self.comment_source;

        let regular = &config.identities.regular;
        config.identities.regular = Identity::new(
            self.author_name.unwrap_or_else(|| regular.name.clone()),
            self.author_email.unwrap_or_else(|| regular.email.clone()),
        );
        config
    }
}

/// Initialize tracing subscriber with env filter
fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gitsync=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

pub async fn run() -> miette::Result<()> {
    let cli = Cli::parse();
    init_tracing();
    serve(cli.into_config()).await?;
    Ok(())
}

/// Run until Ctrl-C, then stop cleanly.
async fn serve(config: Config) -> CliResult<()> {
    let bus = AnyBus::from_url(config.redis_url.as_deref())?;
    let git = RealGit::with_timeout(config.git_timeout);
    let mut orchestrator = Orchestrator::new(config, git, bus, Arc::new(LoggingObserver))?;

    orchestrator.start().await?;
    let waited = tokio::signal::ctrl_c().await;
    info!("Shutting down");
    orchestrator.stop().await;
    waited.map_err(|source| CliError::Signal { source })
}
