use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::task::JoinHandle;

use style_imitator::config::SearchBudget;
use style_imitator::coordinator::SearchServices;
use style_imitator::decision_log::NullDecisionSink;
use style_imitator::engine::EngineProcess;
use style_imitator::profile::{MemoryStore, ProfileCache, StyleConfig, StyleProfile};
use style_imitator::style::StyleSelector;
use style_imitator::tagger::{ForcedTagOverride, NoOverride, Tagger};

/// Search output of the fake engine for any `go`.
pub const SEARCH_LINES: [&str; 3] = [
    "info depth 12 multipv 1 score cp 31 pv f1b5 a7a6",
    "info depth 12 multipv 2 score cp 24 pv d2d4 e5d4",
    "info depth 12 multipv 3 score cp 20 pv b1c3 g8f6",
];
pub const BEST_LINE: &str = "bestmove f1b5 ponder a7a6";

/// In-process UCI engine over a duplex pipe.
///
/// Answers the handshake, prints [`SEARCH_LINES`] on `go`, and prints
/// [`BEST_LINE`] either immediately or, with `wait_for_stop`, only once a
/// `stop` arrives during a search. Returns every command it received.
pub fn fake_engine(wait_for_stop: bool) -> (Arc<EngineProcess>, JoinHandle<Vec<String>>) {
    let (engine_side, test_side) = tokio::io::duplex(64 * 1024);
    let (reader, writer) = tokio::io::split(engine_side);
    let engine = Arc::new(EngineProcess::from_io("fake-stockfish", reader, writer));

    let handle = tokio::spawn(async move {
        let (test_reader, mut out) = tokio::io::split(test_side);
        let mut lines = BufReader::new(test_reader).lines();
        let mut received = Vec::new();
        let mut searching = false;
        while let Ok(Some(line)) = lines.next_line().await {
            received.push(line.clone());
            let reply: Vec<&str> = if line == "uci" {
                vec!["id name fake", "uciok"]
            } else if line == "isready" {
                vec!["readyok"]
            } else if line.starts_with("go") {
                searching = true;
                let mut reply = SEARCH_LINES.to_vec();
                if !wait_for_stop {
                    reply.push(BEST_LINE);
                    searching = false;
                }
                reply
            } else if line == "stop" && searching {
                searching = false;
                vec![BEST_LINE]
            } else if line == "quit" {
                break;
            } else {
                vec![]
            };
            for l in reply {
                out.write_all(format!("{l}\n").as_bytes()).await.unwrap();
            }
        }
        received
    });
    (engine, handle)
}

pub fn profile() -> StyleProfile {
    StyleProfile {
        name: "Karpov".into(),
        tag_weights: [("control_simplify".to_string(), 5.0)].into_iter().collect(),
        config: StyleConfig {
            deterministic: true,
            ..Default::default()
        },
        ..Default::default()
    }
}

pub fn services(engine: Arc<EngineProcess>, tagger: Arc<dyn Tagger>) -> Arc<SearchServices> {
    services_with_override(engine, tagger, Arc::new(NoOverride))
}

pub fn services_with_override(
    engine: Arc<EngineProcess>,
    tagger: Arc<dyn Tagger>,
    overrides: Arc<dyn ForcedTagOverride>,
) -> Arc<SearchServices> {
    Arc::new(SearchServices {
        engine,
        tagger,
        profiles: Arc::new(ProfileCache::new(MemoryStore::new().with_profile(profile()))),
        selector: StyleSelector::new(overrides, Arc::new(NullDecisionSink)),
        budget: SearchBudget {
            total: Duration::from_millis(500),
            engine_fraction: 0.2,
        },
        opening_override: true,
        rng: Mutex::new(StdRng::seed_from_u64(3)),
    })
}
