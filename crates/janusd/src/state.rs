//! Shared application state.
//!
//! HTTP handlers only hold handles: they read published state (door
//! status, last match, frames) and issue commands through the engine and
//! door controllers. Recognition internals are never mutated from here.

use crate::config::Config;
use crate::door::DoorController;
use crate::engine::EngineHandle;
use crate::recognition::LastMatch;
use janus_hw::FrameSourceHandle;
use janus_store::{GalleryCache, Store};
use std::sync::Arc;
use tokio::sync::watch;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Store,
    pub gallery: GalleryCache,
    pub engine: EngineHandle,
    pub door: DoorController,
    pub frames: FrameSourceHandle,
    pub last_match: watch::Receiver<Option<LastMatch>>,
}
