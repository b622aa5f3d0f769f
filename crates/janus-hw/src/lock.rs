//! Door lock control via serial relay boards.
//!
//! The strike relay is driven by writing vendor command bytes to a serial
//! device. Per-board byte sequences live in an embedded TOML table
//! (`contrib/hw/*.toml`), keyed by board model.

use serde::Deserialize;
use std::io::Write;
use std::sync::OnceLock;
use std::time::Duration;
use thiserror::Error;

/// Compile-time embedded board definition for the LCUS-1 USB relay.
const BOARD_LCUS_1: &str = include_str!("../../../contrib/hw/lcus-1.toml");

static BOARD_DB: OnceLock<Vec<RelayBoard>> = OnceLock::new();

#[derive(Error, Debug)]
pub enum LockError {
    #[error("unknown relay board model: {0}")]
    UnknownBoard(String),
    #[error("failed to open relay device: {0}")]
    Open(std::io::Error),
    #[error("failed to write relay command: {0}")]
    Write(std::io::Error),
}

/// Relay board definition from the `[board]` section of a board file.
#[derive(Debug, Clone, Deserialize)]
pub struct RelayBoard {
    pub name: String,
    pub model: String,
    /// Command bytes that energize the relay (strike released).
    pub open_bytes: Vec<u8>,
    /// Command bytes that de-energize the relay (strike engaged).
    pub close_bytes: Vec<u8>,
    /// Time the strike needs to physically release after the open command.
    pub settle_ms: u64,
}

/// Top-level board file structure (one per `contrib/hw/*.toml`).
#[derive(Debug, Clone, Deserialize)]
struct BoardFile {
    board: RelayBoard,
}

fn board_db() -> &'static Vec<RelayBoard> {
    BOARD_DB.get_or_init(|| {
        let mut db = Vec::new();
        for src in [BOARD_LCUS_1] {
            match toml::from_str::<BoardFile>(src) {
                Ok(f) => db.push(f.board),
                Err(e) => eprintln!("janus-hw: bad board TOML: {e}"),
            }
        }
        db
    })
}

/// Look up a board definition by model string.
pub fn lookup_board(model: &str) -> Option<&'static RelayBoard> {
    board_db().iter().find(|b| b.model == model)
}

/// Hardware-facing door actuation. Both calls are blocking and may take
/// seconds; callers are expected to run them off the async runtime.
pub trait LockDriver: Send + Sync {
    /// Release the strike. Returns once the strike has had time to open.
    fn actuate_open(&self) -> Result<(), LockError>;
    /// Re-engage the strike.
    fn reset(&self) -> Result<(), LockError>;
}

/// Serial relay lock driver.
pub struct RelayLock {
    device_path: String,
    board: RelayBoard,
}

impl RelayLock {
    pub fn new(device_path: &str, board: RelayBoard) -> Self {
        Self { device_path: device_path.to_string(), board }
    }

    /// Construct a driver for a known board model.
    pub fn for_model(device_path: &str, model: &str) -> Result<Self, LockError> {
        let board = lookup_board(model)
            .ok_or_else(|| LockError::UnknownBoard(model.to_string()))?;
        Ok(Self::new(device_path, board.clone()))
    }

    pub fn board_name(&self) -> &str {
        &self.board.name
    }

    fn send(&self, bytes: &[u8]) -> Result<(), LockError> {
        let mut device = std::fs::OpenOptions::new()
            .write(true)
            .open(&self.device_path)
            .map_err(LockError::Open)?;
        device.write_all(bytes).map_err(LockError::Write)?;
        device.flush().map_err(LockError::Write)
    }
}

impl LockDriver for RelayLock {
    fn actuate_open(&self) -> Result<(), LockError> {
        tracing::debug!(device = %self.device_path, board = %self.board.model, "energizing relay");
        self.send(&self.board.open_bytes)?;
        // Strike release is mechanical; the caller sees `open` only after
        // the settle window has passed.
        std::thread::sleep(Duration::from_millis(self.board.settle_ms));
        Ok(())
    }

    fn reset(&self) -> Result<(), LockError> {
        tracing::debug!(device = %self.device_path, board = %self.board.model, "de-energizing relay");
        self.send(&self.board.close_bytes)
    }
}
