use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Daemon configuration, loaded from environment variables.
pub struct Config {
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    /// Requested capture resolution.
    pub camera_width: u32,
    pub camera_height: u32,
    /// Directory containing the ONNX model files.
    pub model_dir: PathBuf,
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Path to the gallery sealing key file.
    pub key_path: PathBuf,
    /// HTTP bind address.
    pub bind_addr: SocketAddr,
    /// Cosine similarity threshold for a positive match.
    pub match_threshold: f32,
    /// Per-identity window during which repeated matches do not re-trigger.
    pub cooldown: Duration,
    /// Minimum time the door stays open before auto-reclose.
    pub hold: Duration,
    /// Recognition loop poll interval (detection latency vs CPU).
    pub poll_interval: Duration,
    /// Target pacing between stream frames (~30 fps by default).
    pub stream_interval: Duration,
    /// Frames older than this are treated as absent.
    pub frame_stale_after: Duration,
    /// Frames discarded at startup for camera AGC/AE stabilization.
    pub warmup_frames: usize,
    /// Serial relay device path.
    pub relay_device: String,
    /// Relay board model (see contrib/hw/).
    pub relay_board: String,
    /// JPEG quality for the live stream.
    pub jpeg_quality: u8,
    /// Capture attempts per enrollment request.
    pub enroll_attempts: usize,
}

impl Config {
    /// Load configuration from `JANUS_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let model_dir = std::env::var("JANUS_MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| janus_core::default_model_dir());

        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("janus");

        let db_path = std::env::var("JANUS_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("janus.db"));
        let key_path = std::env::var("JANUS_KEY_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("gallery.key"));

        let bind_addr = std::env::var("JANUS_BIND")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or_else(|| "127.0.0.1:8800".parse().expect("static default address"));

        Self {
            camera_device: std::env::var("JANUS_CAMERA_DEVICE")
                .unwrap_or_else(|_| "/dev/video0".to_string()),
            camera_width: env_u32("JANUS_CAMERA_WIDTH", 640),
            camera_height: env_u32("JANUS_CAMERA_HEIGHT", 480),
            model_dir,
            db_path,
            key_path,
            bind_addr,
            match_threshold: env_f32("JANUS_MATCH_THRESHOLD", 0.6),
            cooldown: Duration::from_secs(env_u64("JANUS_COOLDOWN_SECS", 10)),
            hold: Duration::from_secs(env_u64("JANUS_HOLD_SECS", 3)),
            poll_interval: Duration::from_millis(env_u64("JANUS_POLL_INTERVAL_MS", 200)),
            stream_interval: Duration::from_millis(env_u64("JANUS_STREAM_INTERVAL_MS", 33)),
            frame_stale_after: Duration::from_millis(env_u64("JANUS_FRAME_STALE_MS", 2000)),
            warmup_frames: env_usize("JANUS_WARMUP_FRAMES", 4),
            relay_device: std::env::var("JANUS_RELAY_DEVICE")
                .unwrap_or_else(|_| "/dev/ttyUSB0".to_string()),
            relay_board: std::env::var("JANUS_RELAY_BOARD")
                .unwrap_or_else(|_| "lcus-1".to_string()),
            jpeg_quality: env_u32("JANUS_JPEG_QUALITY", 80).min(100) as u8,
            enroll_attempts: env_usize("JANUS_ENROLL_ATTEMPTS", 5),
        }
    }
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
