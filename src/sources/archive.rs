//! HTTP game-archive job source.
//!
//! Fetches finished games as JSON from one or more archive endpoints. Each
//! endpoint is queried independently; an endpoint that fails is logged and
//! skipped, and the fetch returns whatever the remaining endpoints produced.
//! Only when every endpoint fails does the call surface an error.
//!
//! Expected response shape per endpoint: a JSON array of games, e.g.
//!
//! ```json
//! [{"id": "abc123", "moves": "e2e4 e7e5 g1f3", "result": "1-0"}]
//! ```

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::SourceError;
use crate::types::{GameOutcome, GameSnapshot, Job};

use super::{FetchWindow, JobSource};

/// Default per-request timeout.
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

/// One game as returned by an archive endpoint.
#[derive(Debug, Deserialize)]
struct ArchiveGame {
    /// Stable game identifier.
    id: String,
    /// Space-separated UCI moves.
    moves: String,
    /// PGN result tag ("1-0", "0-1", "1/2-1/2", "*").
    result: String,
    /// Optional custom starting position.
    #[serde(default)]
    fen: Option<String>,
}

/// Job source backed by one or more HTTP archive endpoints.
pub struct HttpArchiveSource {
    client: Client,
    endpoints: Vec<String>,
}

impl HttpArchiveSource {
    /// Creates a source over the given endpoints.
    ///
    /// # Errors
    ///
    /// Returns `SourceError::HttpError` if the HTTP client cannot be built.
    pub fn new(endpoints: Vec<String>) -> Result<Self, SourceError> {
        let client = Client::builder()
            .timeout(DEFAULT_REQUEST_TIMEOUT)
            .user_agent(concat!("autobench/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| SourceError::HttpError(e.to_string()))?;

        Ok(Self { client, endpoints })
    }

    async fn fetch_endpoint(
        &self,
        endpoint: &str,
        count: usize,
        window: &FetchWindow,
    ) -> Result<Vec<ArchiveGame>, SourceError> {
        let mut query: Vec<(&str, String)> = vec![("max", count.to_string())];
        if let Some(since) = window.newer_than {
            query.push(("since", since.timestamp_millis().to_string()));
        }
        if let Some(until) = window.older_than {
            query.push(("until", until.timestamp_millis().to_string()));
        }

        let response = self
            .client
            .get(endpoint)
            .query(&query)
            .send()
            .await
            .map_err(|e| SourceError::HttpError(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::HttpError(format!(
                "{} returned {}",
                endpoint, status
            )));
        }

        response
            .json::<Vec<ArchiveGame>>()
            .await
            .map_err(|e| SourceError::ParseError(e.to_string()))
    }
}

#[async_trait]
impl JobSource for HttpArchiveSource {
    async fn fetch_candidates(
        &self,
        exclude: &HashSet<String>,
        count: usize,
        window: FetchWindow,
    ) -> Result<Vec<Job>, SourceError> {
        let mut jobs = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        let mut failures = 0usize;

        for endpoint in &self.endpoints {
            if jobs.len() >= count {
                break;
            }
            let games = match self.fetch_endpoint(endpoint, count, &window).await {
                Ok(games) => games,
                Err(e) => {
                    warn!(endpoint = %endpoint, error = %e, "archive endpoint failed, skipping");
                    failures += 1;
                    continue;
                }
            };

            debug!(endpoint = %endpoint, games = games.len(), "fetched archive page");
            for game in games {
                if jobs.len() >= count {
                    break;
                }
                if exclude.contains(&game.id) || !seen.insert(game.id.clone()) {
                    continue;
                }
                if let Some(job) = job_from_game(game, endpoint) {
                    jobs.push(job);
                }
            }
        }

        if jobs.is_empty() && failures > 0 && failures == self.endpoints.len() {
            return Err(SourceError::AllEndpointsFailed(failures));
        }
        Ok(jobs)
    }
}

/// Converts an archive game into a job, dropping unterminated games.
fn job_from_game(game: ArchiveGame, source: &str) -> Option<Job> {
    let outcome = GameOutcome::from_pgn_result(&game.result)?;
    let moves: Vec<String> = game.moves.split_whitespace().map(str::to_string).collect();
    let snapshot = match game.fen {
        Some(fen) => GameSnapshot::from_fen(fen, moves),
        None => GameSnapshot::from_moves(moves),
    };
    Some(Job {
        id: game.id,
        snapshot,
        outcome,
        source: source.to_string(),
        fetched_at: Utc::now(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn game(id: &str, moves: &str, result: &str) -> ArchiveGame {
        ArchiveGame {
            id: id.to_string(),
            moves: moves.to_string(),
            result: result.to_string(),
            fen: None,
        }
    }

    #[test]
    fn test_job_from_game() {
        let job = job_from_game(game("g1", "e2e4 e7e5", "1-0"), "https://archive/a")
            .expect("terminated game converts");
        assert_eq!(job.id, "g1");
        assert_eq!(job.outcome, GameOutcome::WhiteWin);
        assert_eq!(job.snapshot.moves, vec!["e2e4".to_string(), "e7e5".to_string()]);
        assert_eq!(job.source, "https://archive/a");
    }

    #[test]
    fn test_job_from_game_drops_unterminated() {
        assert!(job_from_game(game("g2", "e2e4", "*"), "src").is_none());
    }

    #[test]
    fn test_job_from_game_custom_fen() {
        let mut g = game("g3", "h1h8", "0-1");
        g.fen = Some("4k3/8/8/8/8/8/8/4K2R w K - 0 1".to_string());
        let job = job_from_game(g, "src").expect("should convert");
        assert!(job.snapshot.initial_fen.is_some());
    }

    #[test]
    fn test_archive_game_deserialization() {
        let json = r#"[{"id": "abc", "moves": "e2e4 c7c5", "result": "1/2-1/2"}]"#;
        let games: Vec<ArchiveGame> = serde_json::from_str(json).expect("should parse");
        assert_eq!(games.len(), 1);
        assert_eq!(games[0].id, "abc");
        assert!(games[0].fen.is_none());
    }
}
