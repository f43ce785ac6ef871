//! UCI front end: a single-threaded command loop that owns the board
//! snapshot, starts at most one search at a time, and reports results.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::coordinator::{SearchCoordinator, SearchOutcome, SearchRequest, SearchServices};
use crate::error::ImitatorError;
use crate::position::BoardState;

/// How long the loop waits for a command before checking for results again.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Reported when a search produced no move at all.
const NULL_MOVE: &str = "0000";

const ENGINE_NAME: &str = "style-imitator";
const ENGINE_AUTHOR: &str = "style-imitator developers";

/// Read protocol lines on a background task.
///
/// Lines are forwarded in order; `None` is sent once at end of input.
pub fn spawn_command_reader<R>(input: R) -> (mpsc::UnboundedReceiver<Option<String>>, JoinHandle<()>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel();
    let handle = tokio::spawn(async move {
        let mut lines = BufReader::new(input).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    let line = line.trim().to_string();
                    if line.is_empty() {
                        continue;
                    }
                    if tx.send(Some(line)).is_err() {
                        return;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "Command input failed, treating as end of stream");
                    break;
                }
            }
        }
        let _ = tx.send(None);
    });
    (rx, handle)
}

struct ActiveSearch {
    id: u64,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

enum BridgeState {
    /// No position received yet
    Idle,
    PositionSet,
    Searching(ActiveSearch),
    ShuttingDown,
}

enum Flow {
    Continue,
    Quit,
}

/// Protocol bridge between a UCI client and the imitator.
pub struct ProtocolBridge<W> {
    services: Arc<SearchServices>,
    output: W,
    board: BoardState,
    state: BridgeState,
    profile_name: String,
    multipv: u32,
    next_search_id: u64,
    results_tx: mpsc::UnboundedSender<SearchOutcome>,
    results_rx: mpsc::UnboundedReceiver<SearchOutcome>,
}

impl<W> ProtocolBridge<W>
where
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(services: Arc<SearchServices>, output: W, profile_name: &str, multipv: u32) -> Self {
        let (results_tx, results_rx) = mpsc::unbounded_channel();
        Self {
            services,
            output,
            board: BoardState::default(),
            state: BridgeState::Idle,
            profile_name: profile_name.to_string(),
            multipv,
            next_search_id: 0,
            results_tx,
            results_rx,
        }
    }

    /// Give back the output sink after the loop ends.
    pub fn into_output(self) -> W {
        self.output
    }

    /// Run until `quit`, end of input, or a fatal engine error.
    pub async fn run(
        &mut self,
        commands: &mut mpsc::UnboundedReceiver<Option<String>>,
    ) -> Result<(), ImitatorError> {
        let outcome = self.command_loop(commands).await;
        let shutdown = self.shutdown().await;
        outcome.and(shutdown)
    }

    async fn command_loop(
        &mut self,
        commands: &mut mpsc::UnboundedReceiver<Option<String>>,
    ) -> Result<(), ImitatorError> {
        loop {
            while let Ok(outcome) = self.results_rx.try_recv() {
                self.deliver(outcome).await?;
            }

            let command = match tokio::time::timeout(POLL_INTERVAL, commands.recv()).await {
                Err(_) => continue,
                Ok(Some(Some(line))) => line,
                Ok(Some(None)) | Ok(None) => {
                    info!("Command stream closed");
                    return Ok(());
                }
            };

            debug!(command = %command, "GUI >");
            if let Flow::Quit = self.handle_command(&command).await? {
                return Ok(());
            }
        }
    }

    async fn handle_command(&mut self, command: &str) -> Result<Flow, ImitatorError> {
        let keyword = command.split_whitespace().next().unwrap_or_default();
        match keyword {
            "uci" => {
                self.emit(&format!("id name {ENGINE_NAME}")).await?;
                self.emit(&format!("id author {ENGINE_AUTHOR}")).await?;
                self.emit("uciok").await?;
            }
            "isready" => {
                if !self.is_searching() {
                    self.services.engine.send("isready").await?;
                    self.services.engine.drain("readyok").await?;
                }
                self.emit("readyok").await?;
            }
            "ucinewgame" | "setoption" => {
                self.services.engine.send(command).await?;
            }
            "position" => {
                self.services.engine.send(command).await?;
                if self.board.apply_command(command) && matches!(self.state, BridgeState::Idle) {
                    self.state = BridgeState::PositionSet;
                }
            }
            "go" => self.start_search(command),
            "stop" => {
                if let BridgeState::Searching(active) = &self.state {
                    active.cancel.cancel();
                    self.services.engine.stop().await?;
                }
            }
            "quit" => return Ok(Flow::Quit),
            _ => {
                self.services.engine.send(command).await?;
            }
        }
        Ok(Flow::Continue)
    }

    fn is_searching(&self) -> bool {
        matches!(self.state, BridgeState::Searching(_))
    }

    /// Start a search for the current snapshot; the client's time controls
    /// in `go` are ignored.
    fn start_search(&mut self, go_command: &str) {
        if let BridgeState::Searching(active) = &self.state {
            warn!(search_id = active.id, "Ignoring go while previous search still running");
            return;
        }

        self.next_search_id += 1;
        let cancel = CancellationToken::new();
        let request = SearchRequest {
            id: self.next_search_id,
            position_fen: self.board.fen(),
            initial_position: self.board.initial().clone(),
            style_profile_name: self.profile_name.clone(),
            multipv_limit: self.multipv,
            cancel: cancel.clone(),
        };
        info!(
            search_id = request.id,
            fen = %request.position_fen,
            ignored = go_command,
            "Starting search"
        );

        let handle = SearchCoordinator::new(Arc::clone(&self.services), request)
            .spawn(self.results_tx.clone());
        self.state = BridgeState::Searching(ActiveSearch {
            id: self.next_search_id,
            cancel,
            handle,
        });
    }

    /// Report one finished search.
    async fn deliver(&mut self, outcome: SearchOutcome) -> Result<(), ImitatorError> {
        let finished = matches!(&self.state, BridgeState::Searching(active) if active.id == outcome.id);
        if finished {
            self.state = BridgeState::PositionSet;
        }

        let mv = match outcome.result {
            Ok(result) => {
                info!(
                    search_id = outcome.id,
                    selected = %result.final_move,
                    score = result.style_score,
                    tags = ?result.tags,
                    engine_best = ?result.engine_best_move,
                    "Selected move"
                );
                if result.final_move.is_empty() {
                    result.fallback_move.unwrap_or_else(|| NULL_MOVE.to_string())
                } else {
                    result.final_move
                }
            }
            Err(failure) => {
                error!(search_id = outcome.id, error = %failure.error, "Search failed");
                if failure.error.is_fatal() {
                    return Err(failure.error);
                }
                failure
                    .engine_best_move
                    .unwrap_or_else(|| NULL_MOVE.to_string())
            }
        };
        self.emit(&format!("bestmove {mv}")).await
    }

    /// Cancel any active search, wait for it, report it, stop the engine.
    async fn shutdown(&mut self) -> Result<(), ImitatorError> {
        let previous = std::mem::replace(&mut self.state, BridgeState::ShuttingDown);
        if let BridgeState::Searching(active) = previous {
            info!(search_id = active.id, "Waiting for active search before exit");
            active.cancel.cancel();
            if let Err(e) = self.services.engine.stop().await {
                warn!(error = %e, "Failed to relay stop during shutdown");
            }
            if let Err(e) = active.handle.await {
                error!(error = %e, "Search task panicked");
            }
        }

        let mut delivered = Ok(());
        while let Ok(outcome) = self.results_rx.try_recv() {
            if let Err(e) = self.deliver(outcome).await {
                delivered = Err(e);
            }
        }

        info!("Shutting down engine");
        let terminated = self.services.engine.terminate().await;
        delivered.and(terminated)
    }

    async fn emit(&mut self, line: &str) -> Result<(), ImitatorError> {
        debug!(line, "GUI <");
        self.output
            .write_all(format!("{line}\n").as_bytes())
            .await
            .map_err(|e| ImitatorError::ProcessIo(format!("Failed to write to client: {e}")))?;
        self.output
            .flush()
            .await
            .map_err(|e| ImitatorError::ProcessIo(format!("Failed to flush client output: {e}")))
    }
}
