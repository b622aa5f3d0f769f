//! janus-hw: hardware abstraction for camera capture and door lock control.
//!
//! Provides V4L2-based camera access, the shared latest-frame source that
//! multiplexes one camera to many readers, and serial relay control for
//! the physical door lock.

pub mod camera;
pub mod frame;
pub mod lock;
pub mod source;

pub use camera::{Camera, CameraError, CaptureBackend, PixelFormat};
pub use frame::Frame;
pub use lock::{LockDriver, LockError, RelayBoard, RelayLock};
pub use source::{FrameSource, FrameSourceHandle, SourceConfig};
