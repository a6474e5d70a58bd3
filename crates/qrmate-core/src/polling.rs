//! Camera frame polling.
//!
//! An explicit loop paced by a ticker: fetch a frame, try to decode it, repeat
//! until a code is found, the source ends, or the stop token fires. Decode
//! attempts never overlap. Cancellation stops requesting frames; it does not
//! interrupt a decode already running.

use std::{sync::Arc, time::Duration};

use tokio::{task::JoinHandle, time::MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::{
    config::Config,
    errors::Error,
    ports::{FrameDecoder, FrameSource},
};

/// Consecutive non-permission source errors tolerated before giving up.
const MAX_SOURCE_ERRORS: u32 = 30;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PollOutcome {
    Decoded(String),
    Cancelled,
    SourceClosed,
    /// Camera unusable (e.g. permission denied). Fall back to upload.
    Unavailable(String),
}

pub async fn poll_for_code(
    source: &mut dyn FrameSource,
    decoder: &dyn FrameDecoder,
    stop: &CancellationToken,
    every: Duration,
) -> PollOutcome {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut source_errors = 0u32;
    let mut frames = 0u64;

    loop {
        tokio::select! {
            biased;
            _ = stop.cancelled() => return PollOutcome::Cancelled,
            _ = ticker.tick() => {}
        }

        let frame = match source.next_frame().await {
            Ok(Some(frame)) => frame,
            Ok(None) => return PollOutcome::SourceClosed,
            Err(Error::PermissionDenied(reason)) => {
                tracing::info!(%reason, "camera unavailable");
                return PollOutcome::Unavailable(reason);
            }
            Err(e) => {
                source_errors += 1;
                if source_errors >= MAX_SOURCE_ERRORS {
                    return PollOutcome::Unavailable(e.to_string());
                }
                tracing::debug!(error = %e, "frame fetch failed");
                continue;
            }
        };
        source_errors = 0;
        frames += 1;

        if stop.is_cancelled() {
            return PollOutcome::Cancelled;
        }

        match decoder.decode_frame(&frame) {
            Ok(Some(text)) => {
                tracing::debug!(frames, "qr decoded from camera");
                return PollOutcome::Decoded(text);
            }
            Ok(None) => {}
            Err(e) => tracing::debug!(error = %e, "frame skipped"),
        }
    }
}

/// Background polling task with a stop token.
pub struct PollHandle {
    stop: CancellationToken,
    task: JoinHandle<PollOutcome>,
}

impl PollHandle {
    pub fn spawn(
        mut source: Box<dyn FrameSource>,
        decoder: Arc<dyn FrameDecoder>,
        every: Duration,
    ) -> Self {
        let stop = CancellationToken::new();
        let token = stop.clone();
        let task = tokio::spawn(async move {
            poll_for_code(source.as_mut(), decoder.as_ref(), &token, every).await
        });
        Self { stop, task }
    }

    /// Spawn at the configured `QRMATE_FRAME_INTERVAL_MS` cadence.
    pub fn from_config(
        cfg: &Config,
        source: Box<dyn FrameSource>,
        decoder: Arc<dyn FrameDecoder>,
    ) -> Self {
        Self::spawn(source, decoder, cfg.frame_interval)
    }

    pub fn stop(&self) {
        self.stop.cancel();
    }

    pub async fn join(self) -> PollOutcome {
        match self.task.await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!(error = %e, "poll task aborted");
                PollOutcome::Cancelled
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{domain::Frame, Result};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const TICK: Duration = Duration::from_millis(1);

    /// Yields `blank` empty frames, then one frame marked as containing a code.
    struct ScriptedCamera {
        blank: usize,
        served: Arc<AtomicUsize>,
        fail_with: Option<fn() -> Error>,
        endless: bool,
    }

    impl ScriptedCamera {
        fn new(blank: usize) -> Self {
            Self {
                blank,
                served: Arc::new(AtomicUsize::new(0)),
                fail_with: None,
                endless: false,
            }
        }
    }

    #[async_trait]
    impl FrameSource for ScriptedCamera {
        async fn next_frame(&mut self) -> Result<Option<Frame>> {
            if let Some(f) = self.fail_with {
                return Err(f());
            }
            let n = self.served.fetch_add(1, Ordering::SeqCst);
            let marked = !self.endless && n == self.blank;
            if !self.endless && n > self.blank {
                return Ok(None);
            }
            Ok(Some(Frame {
                width: 1,
                height: 1,
                rgba: vec![u8::from(marked), 0, 0, 255],
            }))
        }
    }

    struct MarkerDecoder;

    impl FrameDecoder for MarkerDecoder {
        fn decode_frame(&self, frame: &Frame) -> Result<Option<String>> {
            Ok((frame.rgba[0] == 1).then(|| "user7_event42".to_string()))
        }
    }

    #[tokio::test]
    async fn stops_on_first_decoded_frame() {
        let mut cam = ScriptedCamera::new(3);
        let served = cam.served.clone();
        let out = poll_for_code(&mut cam, &MarkerDecoder, &CancellationToken::new(), TICK).await;
        assert_eq!(out, PollOutcome::Decoded("user7_event42".to_string()));
        assert_eq!(served.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn cancelled_token_stops_before_fetching() {
        let mut cam = ScriptedCamera::new(0);
        let served = cam.served.clone();
        let stop = CancellationToken::new();
        stop.cancel();
        let out = poll_for_code(&mut cam, &MarkerDecoder, &stop, TICK).await;
        assert_eq!(out, PollOutcome::Cancelled);
        assert_eq!(served.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn permission_denied_is_unavailable() {
        let mut cam = ScriptedCamera::new(0);
        cam.fail_with = Some(|| Error::PermissionDenied("NotAllowedError".to_string()));
        let out = poll_for_code(&mut cam, &MarkerDecoder, &CancellationToken::new(), TICK).await;
        assert_eq!(out, PollOutcome::Unavailable("NotAllowedError".to_string()));
    }

    #[tokio::test]
    async fn persistent_source_errors_give_up() {
        let mut cam = ScriptedCamera::new(0);
        cam.fail_with = Some(|| Error::External("device busy".to_string()));
        let out = poll_for_code(&mut cam, &MarkerDecoder, &CancellationToken::new(), TICK).await;
        assert!(matches!(out, PollOutcome::Unavailable(_)));
    }

    #[tokio::test]
    async fn spawned_poller_can_be_stopped() {
        let mut cam = ScriptedCamera::new(0);
        cam.endless = true;
        let handle = PollHandle::spawn(Box::new(cam), Arc::new(MarkerDecoder), TICK);
        tokio::time::sleep(Duration::from_millis(10)).await;
        handle.stop();
        assert_eq!(handle.join().await, PollOutcome::Cancelled);
    }

    #[tokio::test]
    async fn configured_poller_uses_frame_interval() {
        let cfg = Config::from_lookup(|k| match k {
            "QRMATE_API_BASE_URL" => Some("https://api.example.com".to_string()),
            "QRMATE_FRAME_INTERVAL_MS" => Some("2".to_string()),
            _ => None,
        })
        .unwrap();
        assert_eq!(cfg.frame_interval, Duration::from_millis(2));

        let cam = ScriptedCamera::new(2);
        let served = cam.served.clone();
        let handle = PollHandle::from_config(&cfg, Box::new(cam), Arc::new(MarkerDecoder));
        assert_eq!(
            handle.join().await,
            PollOutcome::Decoded("user7_event42".to_string())
        );
        assert_eq!(served.load(Ordering::SeqCst), 3);
    }
}
