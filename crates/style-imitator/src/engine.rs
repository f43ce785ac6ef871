//! Long-lived UCI engine subprocess (async I/O)

use std::pin::Pin;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;

use tracing::debug;

use crate::error::ImitatorError;

/// Centipawn stand-in for a forced mate.
pub const MATE_SCORE_CP: f64 = 100_000.0;

type EngineWriter = Pin<Box<dyn AsyncWrite + Send>>;
type EngineReader = Lines<BufReader<Pin<Box<dyn AsyncRead + Send>>>>;

/// One engine process. Writes are serialized because the bridge (stop/quit)
/// and the active search (go) may both issue commands.
pub struct EngineProcess {
    label: String,
    child: Mutex<Option<Child>>,
    stdin: Mutex<EngineWriter>,
    stdout: Mutex<EngineReader>,
}

impl EngineProcess {
    /// Spawn the engine binary. Does not perform the UCI handshake.
    pub fn spawn(path: &str) -> Result<Self, ImitatorError> {
        let mut process = Command::new(path)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::null())
            .spawn()
            .map_err(|e| ImitatorError::ProcessStartup(format!("Failed to spawn {path}: {e}")))?;

        let stdin = process
            .stdin
            .take()
            .ok_or_else(|| ImitatorError::ProcessStartup("engine stdin unavailable".into()))?;
        let stdout = process
            .stdout
            .take()
            .ok_or_else(|| ImitatorError::ProcessStartup("engine stdout unavailable".into()))?;

        let mut engine = Self::from_io(path, stdout, stdin);
        engine.child = Mutex::new(Some(process));
        Ok(engine)
    }

    /// Wrap an already-connected pair of streams.
    pub fn from_io<R, W>(label: &str, reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + 'static,
        W: AsyncWrite + Send + 'static,
    {
        let reader: Pin<Box<dyn AsyncRead + Send>> = Box::pin(reader);
        Self {
            label: label.to_string(),
            child: Mutex::new(None),
            stdin: Mutex::new(Box::pin(writer)),
            stdout: Mutex::new(BufReader::new(reader).lines()),
        }
    }

    /// Engine path or label, recorded in candidate metadata.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Write one command line.
    pub async fn send(&self, cmd: &str) -> Result<(), ImitatorError> {
        debug!(cmd, "ENGINE <");
        let mut stdin = self.stdin.lock().await;
        stdin
            .write_all(format!("{cmd}\n").as_bytes())
            .await
            .map_err(|e| ImitatorError::ProcessIo(format!("Failed to write to engine: {e}")))?;
        stdin
            .flush()
            .await
            .map_err(|e| ImitatorError::ProcessIo(format!("Failed to flush engine stdin: {e}")))?;
        Ok(())
    }

    /// Read one output line; `None` at end of stream.
    pub async fn read_line(&self) -> Result<Option<String>, ImitatorError> {
        let line = self
            .stdout
            .lock()
            .await
            .next_line()
            .await
            .map_err(|e| ImitatorError::ProcessIo(format!("Failed to read from engine: {e}")))?;
        if let Some(line) = &line {
            debug!(line = line.trim(), "ENGINE >");
        }
        Ok(line)
    }

    /// Discard lines until one equals `sentinel` or the stream ends.
    pub async fn drain(&self, sentinel: &str) -> Result<(), ImitatorError> {
        while let Some(line) = self.read_line().await? {
            if line.trim() == sentinel {
                break;
            }
        }
        Ok(())
    }

    /// UCI startup handshake.
    pub async fn initialize(&self) -> Result<(), ImitatorError> {
        self.send("uci").await?;
        self.drain("uciok").await?;
        self.send("isready").await?;
        self.drain("readyok").await?;
        Ok(())
    }

    pub async fn stop(&self) -> Result<(), ImitatorError> {
        self.send("stop").await
    }

    /// Send quit and wait for the process to exit.
    pub async fn terminate(&self) -> Result<(), ImitatorError> {
        let sent = self.send("quit").await;
        if let Some(child) = self.child.lock().await.as_mut() {
            child
                .wait()
                .await
                .map_err(|e| ImitatorError::ProcessIo(format!("Failed to wait for engine: {e}")))?;
        }
        sent
    }
}

impl Drop for EngineProcess {
    fn drop(&mut self) {
        // Best-effort synchronous kill in drop
        if let Some(child) = self.child.get_mut().as_mut() {
            let _ = child.start_kill();
        }
    }
}

/// Score reported on an info line.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Score {
    Cp(i32),
    Mate(i32),
}

impl Score {
    /// Centipawns, with mates mapped to a large signed sentinel.
    pub fn to_cp(self) -> f64 {
        match self {
            Score::Cp(cp) => cp as f64,
            Score::Mate(n) if n > 0 => MATE_SCORE_CP,
            Score::Mate(_) => -MATE_SCORE_CP,
        }
    }
}

/// The parts of an `info` line the imitator cares about.
#[derive(Debug, Clone, PartialEq)]
pub struct InfoLine {
    pub multipv: u32,
    pub score: Option<Score>,
    pub pv: Vec<String>,
}

/// Parse an `info` line; `None` for anything else.
pub fn parse_info(line: &str) -> Option<InfoLine> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    if tokens.first() != Some(&"info") {
        return None;
    }

    let mut info = InfoLine {
        multipv: 1,
        score: None,
        pv: Vec::new(),
    };
    let mut i = 1;
    while i < tokens.len() {
        match tokens[i] {
            "multipv" if i + 1 < tokens.len() => {
                info.multipv = tokens[i + 1].parse().unwrap_or(1);
                i += 2;
            }
            "score" if i + 2 < tokens.len() => {
                let value = tokens[i + 2].parse().ok();
                info.score = match (tokens[i + 1], value) {
                    ("cp", Some(cp)) => Some(Score::Cp(cp)),
                    ("mate", Some(n)) => Some(Score::Mate(n)),
                    _ => info.score,
                };
                i += 3;
            }
            // Nothing after `string` is structured.
            "string" => break,
            "pv" => {
                info.pv = tokens[i + 1..].iter().map(|s| s.to_string()).collect();
                break;
            }
            _ => i += 1,
        }
    }
    Some(info)
}

/// First move of a `bestmove` line.
pub fn parse_bestmove(line: &str) -> Option<Option<String>> {
    let mut tokens = line.split_whitespace();
    if tokens.next() != Some("bestmove") {
        return None;
    }
    Some(tokens.next().map(str::to_string))
}
