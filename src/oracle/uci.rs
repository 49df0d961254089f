//! UCI chess-engine oracle adapter.
//!
//! Drives a UCI engine (Stockfish or compatible) as a child process over
//! stdin/stdout pipes:
//!
//! - `warm_up` spawns the process and runs the `uci`/`isready` handshake
//! - `evaluate` sends `position` + `go` and folds the `info` stream into an
//!   [`Evaluation`] when `bestmove` arrives
//! - `reset`/`terminate` kill the process; the next `warm_up` respawns it
//!
//! The handshake steps are guarded by an IO timeout. The search itself is
//! not: per-job budgets are enforced by the caller racing `evaluate` against
//! the pool's analysis timeout, and a dead process surfaces as EOF.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{debug, warn};

use crate::error::OracleError;
use crate::types::GameSnapshot;

use super::{EvalBudget, Evaluation, OracleClient, MATE_SCORE_CP};

/// Default timeout for handshake round-trips (`uciok`, `readyok`).
const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(10);

/// A spawned UCI engine with its pipes.
struct EngineProcess {
    child: Child,
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
}

/// UCI engine oracle.
pub struct UciOracle {
    engine_path: PathBuf,
    options: Vec<(String, String)>,
    io_timeout: Duration,
    proc: Option<EngineProcess>,
}

impl UciOracle {
    /// Creates an oracle for the engine binary at `path`. The process is not
    /// spawned until `warm_up` is called.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            engine_path: path.into(),
            options: Vec::new(),
            io_timeout: DEFAULT_IO_TIMEOUT,
            proc: None,
        }
    }

    /// Adds a UCI option sent during the handshake (e.g. "Threads", "1").
    pub fn with_option(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.push((name.into(), value.into()));
        self
    }

    /// Sets the handshake IO timeout.
    pub fn with_io_timeout(mut self, timeout: Duration) -> Self {
        self.io_timeout = timeout;
        self
    }

    async fn spawn(&mut self) -> Result<(), OracleError> {
        let mut child = Command::new(&self.engine_path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| OracleError::SpawnFailed(format!("{}: {}", self.engine_path.display(), e)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| OracleError::SpawnFailed("stdin pipe missing".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| OracleError::SpawnFailed("stdout pipe missing".to_string()))?;

        let mut proc = EngineProcess {
            child,
            stdin,
            stdout: BufReader::new(stdout).lines(),
        };

        send_line(&mut proc, "uci").await?;
        read_until(&mut proc, "uciok", self.io_timeout).await?;

        for (name, value) in &self.options {
            let cmd = format!("setoption name {} value {}", name, value);
            send_line(&mut proc, &cmd).await?;
        }

        send_line(&mut proc, "isready").await?;
        read_until(&mut proc, "readyok", self.io_timeout).await?;

        debug!(engine = %self.engine_path.display(), "evaluator ready");
        self.proc = Some(proc);
        Ok(())
    }

    async fn kill(&mut self) {
        if let Some(mut proc) = self.proc.take() {
            // Polite quit first; the kill below covers engines that ignore it.
            let _ = proc.stdin.write_all(b"quit\n").await;
            let _ = proc.stdin.flush().await;
            if let Err(e) = proc.child.kill().await {
                warn!(error = %e, "failed to kill evaluator process");
            }
        }
    }
}

#[async_trait]
impl OracleClient for UciOracle {
    async fn warm_up(&mut self) -> Result<(), OracleError> {
        if self.proc.is_some() {
            // Already warm: verify with a ready round-trip, respawn on failure.
            if self.is_available().await {
                return Ok(());
            }
            self.kill().await;
        }
        self.spawn().await
    }

    async fn is_available(&mut self) -> bool {
        let timeout = self.io_timeout;
        let Some(proc) = self.proc.as_mut() else {
            return false;
        };
        if send_line(proc, "isready").await.is_err() {
            return false;
        }
        read_until(proc, "readyok", timeout).await.is_ok()
    }

    async fn evaluate(
        &mut self,
        snapshot: &GameSnapshot,
        budget: &EvalBudget,
    ) -> Result<Evaluation, OracleError> {
        let white_to_move = snapshot.white_to_move();
        let proc = self.proc.as_mut().ok_or(OracleError::NotWarm)?;

        send_line(proc, &position_command(snapshot)).await?;
        send_line(proc, &go_command(budget)).await?;

        let mut depth_reached = 0u32;
        let mut nodes_used = 0u64;
        let mut score: Option<i32> = None;

        loop {
            let line = match proc.stdout.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => {
                    return Err(OracleError::ProcessDied(
                        "stdout closed during search".to_string(),
                    ))
                }
                Err(e) => return Err(OracleError::Io(e)),
            };

            if line.starts_with("bestmove") {
                break;
            }
            if let Some(info) = parse_info_line(&line) {
                if let Some(d) = info.depth {
                    depth_reached = d;
                }
                if let Some(n) = info.nodes {
                    nodes_used = n;
                }
                if let Some(cp) = info.score_cp {
                    score = Some(cp);
                }
            }
        }

        let relative = score.ok_or_else(|| {
            OracleError::ProtocolError("search produced no score".to_string())
        })?;

        Ok(Evaluation {
            score_cp: white_relative(relative, white_to_move),
            depth_reached,
            nodes_used,
        })
    }

    async fn reset(&mut self) -> Result<(), OracleError> {
        self.kill().await;
        self.spawn().await
    }

    async fn terminate(&mut self) {
        self.kill().await;
    }
}

async fn send_line(proc: &mut EngineProcess, line: &str) -> Result<(), OracleError> {
    proc.stdin
        .write_all(line.as_bytes())
        .await
        .map_err(|e| OracleError::ProcessDied(e.to_string()))?;
    proc.stdin
        .write_all(b"\n")
        .await
        .map_err(|e| OracleError::ProcessDied(e.to_string()))?;
    proc.stdin
        .flush()
        .await
        .map_err(|e| OracleError::ProcessDied(e.to_string()))?;
    Ok(())
}

/// Reads lines until one starts with `token`.
async fn read_until(
    proc: &mut EngineProcess,
    token: &str,
    timeout: Duration,
) -> Result<(), OracleError> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let next = tokio::time::timeout_at(deadline, proc.stdout.next_line())
            .await
            .map_err(|_| OracleError::Timeout(timeout))?;
        match next {
            Ok(Some(line)) if line.starts_with(token) => return Ok(()),
            Ok(Some(_)) => continue,
            Ok(None) => {
                return Err(OracleError::ProcessDied(format!(
                    "stdout closed waiting for {}",
                    token
                )))
            }
            Err(e) => return Err(OracleError::Io(e)),
        }
    }
}

/// Builds the UCI `position` command for a snapshot.
fn position_command(snapshot: &GameSnapshot) -> String {
    let mut cmd = match &snapshot.initial_fen {
        Some(fen) => format!("position fen {}", fen),
        None => "position startpos".to_string(),
    };
    if !snapshot.moves.is_empty() {
        cmd.push_str(" moves ");
        cmd.push_str(&snapshot.moves.join(" "));
    }
    cmd
}

/// Builds the UCI `go` command for a budget.
fn go_command(budget: &EvalBudget) -> String {
    let mut cmd = "go".to_string();
    if budget.depth > 0 {
        cmd.push_str(&format!(" depth {}", budget.depth));
    }
    if budget.nodes > 0 {
        cmd.push_str(&format!(" nodes {}", budget.nodes));
    }
    cmd
}

/// Converts a side-to-move-relative score to a white-relative one.
fn white_relative(score_cp: i32, white_to_move: bool) -> i32 {
    if white_to_move {
        score_cp
    } else {
        -score_cp
    }
}

/// Fields extracted from one `info` line.
#[derive(Debug, Default, PartialEq, Eq)]
struct InfoLine {
    depth: Option<u32>,
    nodes: Option<u64>,
    score_cp: Option<i32>,
}

/// Parses a UCI `info` line. Returns `None` for non-info lines.
fn parse_info_line(line: &str) -> Option<InfoLine> {
    let mut tokens = line.split_whitespace();
    if tokens.next() != Some("info") {
        return None;
    }

    let mut info = InfoLine::default();
    while let Some(token) = tokens.next() {
        match token {
            "depth" => info.depth = tokens.next().and_then(|t| t.parse().ok()),
            "nodes" => info.nodes = tokens.next().and_then(|t| t.parse().ok()),
            "score" => match tokens.next() {
                Some("cp") => info.score_cp = tokens.next().and_then(|t| t.parse().ok()),
                Some("mate") => {
                    if let Some(m) = tokens.next().and_then(|t| t.parse::<i32>().ok()) {
                        info.score_cp = Some(if m >= 0 { MATE_SCORE_CP } else { -MATE_SCORE_CP });
                    }
                }
                _ => {}
            },
            _ => {}
        }
    }
    Some(info)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_info_line() {
        let info = parse_info_line(
            "info depth 18 seldepth 24 multipv 1 score cp 35 nodes 1234567 nps 900000 pv e2e4",
        )
        .expect("should parse");
        assert_eq!(info.depth, Some(18));
        assert_eq!(info.nodes, Some(1_234_567));
        assert_eq!(info.score_cp, Some(35));
    }

    #[test]
    fn test_parse_info_line_mate() {
        let info = parse_info_line("info depth 12 score mate 3 nodes 5000").expect("should parse");
        assert_eq!(info.score_cp, Some(MATE_SCORE_CP));

        let info = parse_info_line("info depth 12 score mate -2 nodes 5000").expect("should parse");
        assert_eq!(info.score_cp, Some(-MATE_SCORE_CP));
    }

    #[test]
    fn test_parse_info_line_ignores_other_lines() {
        assert!(parse_info_line("bestmove e2e4 ponder e7e5").is_none());
        assert!(parse_info_line("readyok").is_none());
        assert!(parse_info_line("").is_none());
    }

    #[test]
    fn test_parse_info_line_partial_fields() {
        let info = parse_info_line("info string NNUE evaluation enabled").expect("should parse");
        assert_eq!(info, InfoLine::default());
    }

    #[test]
    fn test_position_command() {
        let startpos = GameSnapshot::from_moves(vec!["e2e4".to_string(), "c7c5".to_string()]);
        assert_eq!(
            position_command(&startpos),
            "position startpos moves e2e4 c7c5"
        );

        let empty = GameSnapshot::from_moves(vec![]);
        assert_eq!(position_command(&empty), "position startpos");

        let fen = GameSnapshot::from_fen("4k3/8/8/8/8/8/8/4K2R w K - 0 1", vec!["h1h8".to_string()]);
        assert_eq!(
            position_command(&fen),
            "position fen 4k3/8/8/8/8/8/8/4K2R w K - 0 1 moves h1h8"
        );
    }

    #[test]
    fn test_go_command() {
        assert_eq!(go_command(&EvalBudget::new(12, 0)), "go depth 12");
        assert_eq!(go_command(&EvalBudget::new(0, 50_000)), "go nodes 50000");
        assert_eq!(
            go_command(&EvalBudget::new(20, 1_000_000)),
            "go depth 20 nodes 1000000"
        );
    }

    #[test]
    fn test_white_relative_score() {
        assert_eq!(white_relative(80, true), 80);
        assert_eq!(white_relative(80, false), -80);
        assert_eq!(white_relative(-120, false), 120);
    }
}
