//! Periodic capture without overlap.
//!
//! A [`CaptureScheduler`] runs one [`CaptureRound`] per tick while its
//! camera session is streaming. The scheduler is always in exactly one
//! phase:
//!
//! ```text
//! Idle ──tick / trigger_now()──▶ RoundInFlight ──round done──▶ Idle
//!   │                                 │
//!   └───────────── stop() ────────────┴──▶ Stopped
//! ```
//!
//! A tick that arrives during `RoundInFlight` is skipped, never queued, and
//! a manual trigger obeys the same rule. `stop()` aborts the timer and the
//! round in flight and releases the camera before it returns; nothing fires
//! afterwards. If the session ends some other way (released elsewhere, or a
//! frame grab failed) the next tick notices and the scheduler stops itself.

use crate::error::ClientError;
use crate::media::MediaSource;
use crate::progress::{NoopObserver, Observer};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::AbortHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info};

/// One capture → validate → upload round.
#[async_trait]
pub trait CaptureRound: Send + Sync {
    /// Run a full round for the session `generation`. The scheduler treats
    /// the round as finished when this returns (or is aborted).
    async fn run(&self, generation: u64);
}

/// Result of asking the scheduler to start a round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerOutcome {
    Started,
    /// A round is already in flight.
    SkippedOverlap,
    /// The scheduler (or its camera session) has stopped.
    SkippedStopped,
}

/// Published scheduler phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerPhase {
    Idle,
    RoundInFlight,
    Stopped,
}

enum Phase {
    Idle,
    RoundInFlight { round: AbortHandle },
    Stopped,
}

struct Shared {
    media: Arc<MediaSource>,
    round: Arc<dyn CaptureRound>,
    observer: Observer,
    generation: u64,
    phase: Mutex<Phase>,
    rounds_started: AtomicU64,
}

/// Resets the phase when a round finishes, including by abort.
struct RoundGuard(Arc<Shared>);

impl Drop for RoundGuard {
    fn drop(&mut self) {
        let mut phase = self.0.lock();
        if matches!(*phase, Phase::RoundInFlight { .. }) {
            *phase = Phase::Idle;
        }
    }
}

impl Shared {
    fn lock(&self) -> std::sync::MutexGuard<'_, Phase> {
        self.phase.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn try_start(self: &Arc<Self>) -> TriggerOutcome {
        let outcome = {
            let mut phase = self.lock();
            match *phase {
                Phase::Stopped => TriggerOutcome::SkippedStopped,
                Phase::RoundInFlight { .. } => TriggerOutcome::SkippedOverlap,
                Phase::Idle if !self.media.is_current(self.generation) => {
                    info!(
                        "Capture session {} is gone; scheduler stopping",
                        self.generation
                    );
                    *phase = Phase::Stopped;
                    TriggerOutcome::SkippedStopped
                }
                Phase::Idle => {
                    let guard = RoundGuard(Arc::clone(self));
                    let round = Arc::clone(&self.round);
                    let generation = self.generation;
                    let handle = tokio::spawn(async move {
                        let _guard = guard;
                        round.run(generation).await;
                    });
                    *phase = Phase::RoundInFlight {
                        round: handle.abort_handle(),
                    };
                    TriggerOutcome::Started
                }
            }
        };

        match outcome {
            TriggerOutcome::Started => {
                let n = self.rounds_started.fetch_add(1, Ordering::SeqCst) + 1;
                debug!("Capture round {} started (session {})", n, self.generation);
                self.observer.on_round_start(self.generation);
            }
            TriggerOutcome::SkippedOverlap => {
                debug!("Capture tick skipped: previous round still in flight");
                self.observer.on_round_skipped(self.generation);
            }
            TriggerOutcome::SkippedStopped => {}
        }
        outcome
    }
}

/// Drives capture rounds for one streaming session.
pub struct CaptureScheduler {
    shared: Arc<Shared>,
    timer: AbortHandle,
    period: Duration,
}

impl CaptureScheduler {
    /// Start ticking every `period` for the session `media` is streaming now.
    ///
    /// The first tick fires one `period` after start. Must be called from
    /// within a tokio runtime.
    pub fn start(
        media: Arc<MediaSource>,
        round: Arc<dyn CaptureRound>,
        period: Duration,
    ) -> Result<Self, ClientError> {
        Self::start_with_observer(media, round, period, Arc::new(NoopObserver))
    }

    pub fn start_with_observer(
        media: Arc<MediaSource>,
        round: Arc<dyn CaptureRound>,
        period: Duration,
        observer: Observer,
    ) -> Result<Self, ClientError> {
        let generation = media.current_generation().ok_or(ClientError::NotStreaming)?;
        if period.is_zero() {
            return Err(ClientError::InvalidConfig(
                "capture period must be greater than zero".into(),
            ));
        }

        let shared = Arc::new(Shared {
            media,
            round,
            observer,
            generation,
            phase: Mutex::new(Phase::Idle),
            rounds_started: AtomicU64::new(0),
        });

        let ticking = Arc::clone(&shared);
        let timer = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if ticking.try_start() == TriggerOutcome::SkippedStopped {
                    break;
                }
            }
            debug!("Capture timer for session {} ended", ticking.generation);
        });

        info!(
            "Capture scheduler started: session {}, every {:?}",
            generation, period
        );
        Ok(Self {
            shared,
            timer: timer.abort_handle(),
            period,
        })
    }

    /// Start a round now, outside the timer. Same overlap rule as a tick.
    pub fn trigger_now(&self) -> TriggerOutcome {
        self.shared.try_start()
    }

    pub fn phase(&self) -> SchedulerPhase {
        match *self.shared.lock() {
            Phase::Idle => SchedulerPhase::Idle,
            Phase::RoundInFlight { .. } => SchedulerPhase::RoundInFlight,
            Phase::Stopped => SchedulerPhase::Stopped,
        }
    }

    pub fn generation(&self) -> u64 {
        self.shared.generation
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Rounds started so far (ticks and manual triggers).
    pub fn rounds_started(&self) -> u64 {
        self.shared.rounds_started.load(Ordering::SeqCst)
    }

    /// Stop ticking, abort the round in flight and release the camera.
    ///
    /// Idempotent. When this returns no further round can start.
    pub fn stop(&self) {
        let previous = std::mem::replace(&mut *self.shared.lock(), Phase::Stopped);
        self.timer.abort();
        if let Phase::RoundInFlight { round } = &previous {
            round.abort();
        }
        self.shared.media.release();
        if !matches!(previous, Phase::Stopped) {
            info!(
                "Capture scheduler stopped (session {}, {} rounds)",
                self.shared.generation,
                self.rounds_started()
            );
        }
    }
}

impl Drop for CaptureScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::tests::{small_config, FakeCamera};
    use crate::media::MediaStatus;
    use crate::progress::tests::Recorder;
    use std::sync::atomic::AtomicUsize;

    struct SlowRound {
        runs: AtomicUsize,
        finished: AtomicUsize,
        takes: Duration,
    }

    impl SlowRound {
        fn new(takes: Duration) -> Arc<Self> {
            Arc::new(Self {
                runs: AtomicUsize::new(0),
                finished: AtomicUsize::new(0),
                takes,
            })
        }
    }

    #[async_trait]
    impl CaptureRound for SlowRound {
        async fn run(&self, _generation: u64) {
            self.runs.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.takes).await;
            self.finished.fetch_add(1, Ordering::SeqCst);
        }
    }

    async fn streaming() -> (Arc<FakeCamera>, Arc<MediaSource>) {
        let camera = FakeCamera::working();
        let media = Arc::new(MediaSource::new(camera.clone(), &small_config()));
        media.acquire().await.unwrap();
        (camera, media)
    }

    #[tokio::test(start_paused = true)]
    async fn refuses_to_start_without_a_stream() {
        let media = Arc::new(MediaSource::new(FakeCamera::working(), &small_config()));
        let err = CaptureScheduler::start(media, SlowRound::new(Duration::ZERO), Duration::from_secs(5))
            .err()
            .unwrap();
        assert!(matches!(err, ClientError::NotStreaming));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_rounds_skip_ticks_instead_of_queueing() {
        let (_camera, media) = streaming().await;
        let round = SlowRound::new(Duration::from_secs(12));
        let recorder = Arc::new(Recorder::default());
        let scheduler = CaptureScheduler::start_with_observer(
            media,
            round.clone(),
            Duration::from_secs(5),
            recorder.clone(),
        )
        .unwrap();

        // Ticks at 5, 10, 15, 20, 25, 30; rounds occupy 5..17 and 20..32.
        tokio::time::sleep(Duration::from_secs(31)).await;

        assert_eq!(round.runs.load(Ordering::SeqCst), 2);
        assert_eq!(round.finished.load(Ordering::SeqCst), 1);
        let skips = recorder
            .events()
            .iter()
            .filter(|e| e.starts_with("skip:"))
            .count();
        assert_eq!(skips, 4);
        assert_eq!(scheduler.phase(), SchedulerPhase::RoundInFlight);
    }

    #[tokio::test(start_paused = true)]
    async fn manual_trigger_respects_overlap_guard() {
        let (_camera, media) = streaming().await;
        let round = SlowRound::new(Duration::from_secs(3));
        let scheduler =
            CaptureScheduler::start(media, round.clone(), Duration::from_secs(60)).unwrap();

        assert_eq!(scheduler.trigger_now(), TriggerOutcome::Started);
        assert_eq!(scheduler.trigger_now(), TriggerOutcome::SkippedOverlap);
        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(scheduler.phase(), SchedulerPhase::Idle);
        assert_eq!(scheduler.trigger_now(), TriggerOutcome::Started);
        assert_eq!(scheduler.rounds_started(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_releases_camera_and_silences_timer() {
        let (camera, media) = streaming().await;
        let round = SlowRound::new(Duration::from_secs(10));
        let scheduler =
            CaptureScheduler::start(media.clone(), round.clone(), Duration::from_secs(5)).unwrap();

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(round.runs.load(Ordering::SeqCst), 1);

        scheduler.stop();
        assert_eq!(scheduler.phase(), SchedulerPhase::Stopped);
        assert_eq!(media.status(), MediaStatus::Stopped);
        let stream = camera.streams.lock().unwrap()[0].clone();
        assert!(!stream.live.load(Ordering::SeqCst));

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(round.runs.load(Ordering::SeqCst), 1);
        assert_eq!(round.finished.load(Ordering::SeqCst), 0, "round was aborted");
        assert_eq!(scheduler.trigger_now(), TriggerOutcome::SkippedStopped);

        // The camera can be acquired again independently.
        let next = media.acquire().await.unwrap();
        assert_eq!(media.status(), MediaStatus::Streaming { generation: next });
    }

    #[tokio::test(start_paused = true)]
    async fn external_release_stops_the_scheduler_at_next_tick() {
        let (_camera, media) = streaming().await;
        let round = SlowRound::new(Duration::from_secs(1));
        let scheduler =
            CaptureScheduler::start(media.clone(), round.clone(), Duration::from_secs(5)).unwrap();

        media.release();
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(round.runs.load(Ordering::SeqCst), 0);
        assert_eq!(scheduler.phase(), SchedulerPhase::Stopped);
    }
}
