//! MJPEG live view sessions.
//!
//! Each HTTP viewer gets its own stream over the shared frame source:
//! pull latest, JPEG-encode, emit one multipart part, pace to the target
//! frame rate. The session owns nothing exclusive; viewer disconnect
//! drops the body stream and with it the session, so termination is
//! immediate and leak-free. Any number of viewers never slows the
//! recognition loop, whose frame reads are independent.

use bytes::Bytes;
use futures::Stream;
use janus_hw::FrameSourceHandle;
use std::convert::Infallible;
use std::time::Duration;

/// Fixed multipart boundary token, one per stream session.
pub const BOUNDARY: &str = "frame";

/// Sleep while no frame is available (startup, camera faults).
const IDLE_SLEEP: Duration = Duration::from_millis(10);

/// Content type for the multipart stream response.
pub fn content_type() -> &'static str {
    "multipart/x-mixed-replace; boundary=frame"
}

/// Frame one JPEG image as a multipart part.
pub fn mjpeg_part(jpeg: &[u8]) -> Bytes {
    let header = format!("--{BOUNDARY}\r\nContent-Type: image/jpeg\r\n\r\n");
    let mut part = Vec::with_capacity(header.len() + jpeg.len() + 2);
    part.extend_from_slice(header.as_bytes());
    part.extend_from_slice(jpeg);
    part.extend_from_slice(b"\r\n");
    Bytes::from(part)
}

/// Per-session tuning.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    pub frame_interval: Duration,
    pub jpeg_quality: u8,
}

struct Session {
    frames: FrameSourceHandle,
    config: StreamConfig,
    next_emit: tokio::time::Instant,
    _guard: SessionGuard,
}

/// Logs session teardown when the body stream is dropped.
struct SessionGuard;

impl Drop for SessionGuard {
    fn drop(&mut self) {
        tracing::info!("stream session ended");
    }
}

/// An endless multipart JPEG stream over the shared frame source.
///
/// The stream never yields an error; when frames are unavailable it
/// simply pauses, matching the viewer-facing behavior of a stalled
/// camera (the picture freezes, the connection stays up).
pub fn mjpeg_stream(
    frames: FrameSourceHandle,
    config: StreamConfig,
) -> impl Stream<Item = Result<Bytes, Infallible>> {
    tracing::info!(
        interval_ms = config.frame_interval.as_millis() as u64,
        "stream session started"
    );

    let session = Session {
        frames,
        next_emit: tokio::time::Instant::now(),
        config,
        _guard: SessionGuard,
    };

    futures::stream::unfold(session, |mut session| async move {
        loop {
            tokio::time::sleep_until(session.next_emit).await;

            let Some(frame) = session.frames.latest() else {
                session.next_emit = tokio::time::Instant::now() + IDLE_SLEEP;
                continue;
            };

            session.next_emit = tokio::time::Instant::now() + session.config.frame_interval;

            let quality = session.config.jpeg_quality;
            let encoded =
                tokio::task::spawn_blocking(move || frame.to_jpeg(quality)).await;
            match encoded {
                Ok(Ok(jpeg)) => return Some((Ok(mjpeg_part(&jpeg)), session)),
                Ok(Err(e)) => {
                    tracing::warn!(error = %e, "stream frame encode failed");
                }
                Err(e) => {
                    tracing::warn!(error = %e, "stream encode task failed");
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use janus_hw::{CameraError, CaptureBackend, Frame, FrameSource, SourceConfig};
    use std::time::Instant;

    struct SolidBackend {
        produce: bool,
    }

    impl CaptureBackend for SolidBackend {
        fn capture(&mut self) -> Result<Frame, CameraError> {
            if !self.produce {
                return Err(CameraError::CaptureFailed("scripted".into()));
            }
            Ok(Frame {
                rgb: vec![100u8; 16 * 16 * 3],
                width: 16,
                height: 16,
                sequence: 0,
                captured_at: Instant::now(),
            })
        }
    }

    fn source(produce: bool) -> FrameSource {
        FrameSource::spawn(
            SolidBackend { produce },
            SourceConfig {
                stale_after: Duration::from_secs(5),
                min_capture_interval: Duration::from_millis(1),
                warmup_frames: 0,
            },
        )
    }

    fn config(interval_ms: u64) -> StreamConfig {
        StreamConfig {
            frame_interval: Duration::from_millis(interval_ms),
            jpeg_quality: 80,
        }
    }

    #[test]
    fn test_mjpeg_part_framing() {
        let part = mjpeg_part(&[0xFF, 0xD8, 0x01]);
        let expected_prefix = b"--frame\r\nContent-Type: image/jpeg\r\n\r\n";
        assert!(part.starts_with(expected_prefix));
        assert!(part.ends_with(b"\x01\r\n"));
        assert_eq!(part.len(), expected_prefix.len() + 3 + 2);
    }

    #[tokio::test]
    async fn test_stream_yields_jpeg_parts() {
        let source = source(true);
        let mut stream = Box::pin(mjpeg_stream(source.handle(), config(5)));

        let part = tokio::time::timeout(Duration::from_secs(2), stream.next())
            .await
            .expect("no part in time")
            .unwrap()
            .unwrap();

        assert!(part.starts_with(b"--frame\r\n"));
        // The JPEG payload starts right after the blank line.
        let body_start = part
            .windows(4)
            .position(|w| w == b"\r\n\r\n")
            .map(|i| i + 4)
            .unwrap();
        assert_eq!(&part[body_start..body_start + 2], &[0xFF, 0xD8]);
    }

    #[tokio::test]
    async fn test_stream_paces_frames() {
        let source = source(true);
        let mut stream = Box::pin(mjpeg_stream(source.handle(), config(50)));

        let started = Instant::now();
        for _ in 0..3 {
            tokio::time::timeout(Duration::from_secs(2), stream.next())
                .await
                .expect("no part in time")
                .unwrap()
                .unwrap();
        }
        // Three parts with a 50ms pace: at least ~100ms elapsed.
        assert!(started.elapsed() >= Duration::from_millis(90));
    }

    #[tokio::test]
    async fn test_stream_idles_without_frames() {
        let source = source(false);
        let mut stream = Box::pin(mjpeg_stream(source.handle(), config(5)));

        let result =
            tokio::time::timeout(Duration::from_millis(150), stream.next()).await;
        assert!(result.is_err(), "no parts expected while the camera is dark");
    }

    #[tokio::test]
    async fn test_concurrent_viewers_do_not_block_frame_reads() {
        let source = source(true);
        let reader = source.handle();
        let mut viewer_a = Box::pin(mjpeg_stream(source.handle(), config(5)));
        let mut viewer_b = Box::pin(mjpeg_stream(source.handle(), config(5)));

        for _ in 0..3 {
            tokio::time::timeout(Duration::from_secs(2), viewer_a.next())
                .await
                .expect("viewer a starved");
            tokio::time::timeout(Duration::from_secs(2), viewer_b.next())
                .await
                .expect("viewer b starved");
            // The recognition-side read stays non-blocking and fresh.
            assert!(reader.latest().is_some());
        }
    }

    #[tokio::test]
    async fn test_dropping_stream_terminates_session() {
        let source = source(true);
        let mut stream = Box::pin(mjpeg_stream(source.handle(), config(5)));
        let _ = tokio::time::timeout(Duration::from_secs(2), stream.next()).await;
        drop(stream);
        // Nothing to join: the session lives inside the stream and is gone.
        source.stop();
    }
}
