//! Round history and per-player totals.

use crate::round::{CompletedRound, PlayerEntry, Round};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    #[error("stats file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("stats encoding: {0}")]
    Json(#[from] serde_json::Error),
}

/// Sink for finished rounds. Called off the game loop.
pub trait RoundRecorder: Send + Sync {
    fn record_round(&self, round: &Round) -> Result<(), RecordError>;
    fn record_player_statistics(&self, players: &[PlayerEntry]) -> Result<(), RecordError>;
}

/// Totals across every recorded round of one user.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerTotals {
    pub rounds_entered: u64,
    pub rounds_finished: u64,
    pub points_earned: u64,
    pub marbles_entered: u64,
    pub marbles_finished: u64,
}

impl PlayerTotals {
    fn add(&mut self, entry: &PlayerEntry) {
        self.rounds_entered += 1;
        if entry.finished {
            self.rounds_finished += 1;
        }
        self.points_earned += entry.points_earned;
        self.marbles_entered += entry.marbles_entered as u64;
        self.marbles_finished += entry.marbles_finished as u64;
    }
}

/// Appends rounds to `rounds.jsonl` and keeps `players.json` aggregated.
pub struct JsonFileRecorder {
    dir: PathBuf,
    /// Serializes read-modify-write of players.json
    players_lock: Mutex<()>,
}

impl JsonFileRecorder {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, RecordError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|source| RecordError::Io {
            path: dir.clone(),
            source,
        })?;
        Ok(Self {
            dir,
            players_lock: Mutex::new(()),
        })
    }

    pub fn rounds_path(&self) -> PathBuf {
        self.dir.join("rounds.jsonl")
    }

    pub fn players_path(&self) -> PathBuf {
        self.dir.join("players.json")
    }

    pub fn load_totals(&self) -> Result<BTreeMap<String, PlayerTotals>, RecordError> {
        read_totals(&self.players_path())
    }
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> RecordError + '_ {
    move |source| RecordError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn read_totals(path: &Path) -> Result<BTreeMap<String, PlayerTotals>, RecordError> {
    match fs::read_to_string(path) {
        Ok(text) => Ok(serde_json::from_str(&text)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
        Err(e) => Err(io_error(path)(e)),
    }
}

impl RoundRecorder for JsonFileRecorder {
    fn record_round(&self, round: &Round) -> Result<(), RecordError> {
        let path = self.rounds_path();
        let mut line = serde_json::to_string(round)?;
        line.push('\n');
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(io_error(&path))?;
        file.write_all(line.as_bytes()).map_err(io_error(&path))
    }

    fn record_player_statistics(&self, players: &[PlayerEntry]) -> Result<(), RecordError> {
        let _guard = self.players_lock.lock().unwrap_or_else(|e| e.into_inner());
        let path = self.players_path();
        let mut totals = read_totals(&path)?;
        for entry in players {
            totals.entry(entry.id.clone()).or_default().add(entry);
        }

        // Write then rename so a crash never leaves half a file
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(&totals)?).map_err(io_error(&tmp))?;
        fs::rename(&tmp, &path).map_err(io_error(&path))
    }
}

/// Recorder used when no stats directory is configured.
pub struct LogRecorder;

impl RoundRecorder for LogRecorder {
    fn record_round(&self, round: &Round) -> Result<(), RecordError> {
        tracing::info!(
            "Round on {}: {}/{} marbles finished, winning time {:?} ms",
            round.map_id,
            round.marbles_finished,
            round.marbles_entered,
            round.duration
        );
        Ok(())
    }

    fn record_player_statistics(&self, players: &[PlayerEntry]) -> Result<(), RecordError> {
        for entry in players {
            tracing::debug!(
                "Player {}: {} points, finished={}",
                entry.id,
                entry.points_earned,
                entry.finished
            );
        }
        Ok(())
    }
}

/// Records a completed round on the blocking pool. Failures are logged.
pub fn spawn_record(recorder: Arc<dyn RoundRecorder>, completed: CompletedRound) {
    tokio::task::spawn_blocking(move || {
        if let Err(e) = recorder.record_round(&completed.round) {
            tracing::warn!("Failed to record round: {}", e);
        }
        if let Err(e) = recorder.record_player_statistics(&completed.players) {
            tracing::warn!("Failed to record player statistics: {}", e);
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    static DIR_COUNTER: AtomicU32 = AtomicU32::new(0);

    fn scratch_dir() -> PathBuf {
        let n = DIR_COUNTER.fetch_add(1, Ordering::SeqCst);
        let dir = std::env::temp_dir().join(format!(
            "marble-stats-{}-{}",
            std::process::id(),
            n
        ));
        let _ = fs::remove_dir_all(&dir);
        dir
    }

    fn entry(id: &str, points: u64, finished: bool) -> PlayerEntry {
        PlayerEntry {
            id: id.to_string(),
            points_earned: points,
            finished,
            marbles_entered: 1,
            marbles_finished: usize::from(finished),
        }
    }

    #[test]
    fn rounds_append_one_line_each() {
        let dir = scratch_dir();
        let recorder = JsonFileRecorder::new(&dir).unwrap();
        let mut round = Round::new("slope");
        round.duration = Some(5000);
        recorder.record_round(&round).unwrap();
        recorder.record_round(&Round::new("slope")).unwrap();

        let text = fs::read_to_string(recorder.rounds_path()).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: Round = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first, round);
        assert!(lines[0].contains("\"mapId\":\"slope\""));
        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn player_totals_accumulate() {
        let dir = scratch_dir();
        let recorder = JsonFileRecorder::new(&dir).unwrap();
        recorder
            .record_player_statistics(&[entry("1", 4, true), entry("2", 1, false)])
            .unwrap();
        recorder
            .record_player_statistics(&[entry("1", 3, true)])
            .unwrap();

        let totals = recorder.load_totals().unwrap();
        assert_eq!(
            totals["1"],
            PlayerTotals {
                rounds_entered: 2,
                rounds_finished: 2,
                points_earned: 7,
                marbles_entered: 2,
                marbles_finished: 2,
            }
        );
        assert_eq!(totals["2"].rounds_finished, 0);
        assert_eq!(totals["2"].points_earned, 1);
        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn corrupt_totals_file_is_an_error() {
        let dir = scratch_dir();
        let recorder = JsonFileRecorder::new(&dir).unwrap();
        fs::write(recorder.players_path(), "not json").unwrap();
        let err = recorder
            .record_player_statistics(&[entry("1", 1, false)])
            .unwrap_err();
        assert!(matches!(err, RecordError::Json(_)));
        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn log_recorder_never_fails() {
        let recorder = LogRecorder;
        assert!(recorder.record_round(&Round::new("slope")).is_ok());
        assert!(recorder.record_player_statistics(&[entry("1", 1, true)]).is_ok());
    }
}
