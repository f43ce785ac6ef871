//! Style-imitating UCI engine
//!
//! Speaks UCI on stdin/stdout, delegates search to a real engine, and picks
//! moves the way the configured target player would. Logs go to stderr.

use std::sync::Arc;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{error, info, warn};

use style_imitator::bridge::{spawn_command_reader, ProtocolBridge};
use style_imitator::config::ImitatorConfig;
use style_imitator::coordinator::SearchServices;
use style_imitator::decision_log::{DecisionSink, NullDecisionSink, RotatingDecisionLog};
use style_imitator::engine::EngineProcess;
use style_imitator::profile::{DirectoryStore, ProfileCache};
use style_imitator::style::StyleSelector;
use style_imitator::tagger::{
    CommandTagger, ForcedMoveTags, ForcedTagOverride, NoOverride, PassthroughTagger, Tagger,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // stdout carries the protocol, so logs go to stderr
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    // Load .env file for local dev
    let _ = dotenvy::dotenv();

    let config = ImitatorConfig::from_env()?;

    let engine = Arc::new(EngineProcess::spawn(&config.engine_path)?);
    engine.initialize().await?;
    info!(engine_path = %config.engine_path, "Engine ready");

    let tagger: Arc<dyn Tagger> = match &config.tagger_command {
        Some(cmd) => {
            info!(command = %cmd, "Using external tagger");
            Arc::new(CommandTagger::from_command_line(cmd)?)
        }
        None => {
            warn!("No tagger configured; candidates will be untagged");
            Arc::new(PassthroughTagger)
        }
    };

    let decisions: Arc<dyn DecisionSink> =
        match RotatingDecisionLog::open(&config.log_dir, config.log_max_lines) {
            Ok(log) => Arc::new(log),
            Err(e) => {
                warn!(error = %e, "Decision log unavailable; decisions will not be recorded");
                Arc::new(NullDecisionSink)
            }
        };

    let forced_tags = ForcedMoveTags::new(config.forced_tags.clone());
    let overrides: Arc<dyn ForcedTagOverride> = if forced_tags.is_empty() {
        Arc::new(NoOverride)
    } else {
        Arc::new(forced_tags)
    };

    let rng = match config.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    let services = Arc::new(SearchServices {
        engine,
        tagger,
        profiles: Arc::new(ProfileCache::new(DirectoryStore::new(&config.profile_dir))),
        selector: StyleSelector::new(overrides, decisions),
        budget: config.budget,
        opening_override: config.opening_override,
        rng: Mutex::new(rng),
    });

    let (mut commands, _reader) = spawn_command_reader(tokio::io::stdin());
    let mut bridge = ProtocolBridge::new(
        services,
        tokio::io::stdout(),
        &config.target_player,
        config.multipv,
    );

    info!(target_player = %config.target_player, "Imitator ready");
    if let Err(e) = bridge.run(&mut commands).await {
        error!(error = %e, "Imitator stopped");
        std::process::exit(1);
    }

    // The stdin reader may still be blocked on a read; don't wait for it.
    std::process::exit(0);
}
