//! Non-blocking, sequenced PTT handle.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use tokio::sync::mpsc;

use super::{PttError, PttLine};
use crate::config::HardwarePttConfig;

/// Relay / VOX settle times around the line transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PttTiming {
    /// Applied before the line is asserted.
    pub pre_delay: Duration,
    /// Applied after the line is released.
    pub post_delay: Duration,
}

impl PttTiming {
    pub fn from_config(config: &HardwarePttConfig) -> Self {
        Self {
            pre_delay: Duration::from_millis(config.pre_delay_ms),
            post_delay: Duration::from_millis(config.post_delay_ms),
        }
    }
}

impl Default for PttTiming {
    fn default() -> Self {
        Self::from_config(&HardwarePttConfig::default())
    }
}

#[derive(Debug)]
enum PttCommand {
    Activate,
    Deactivate,
    Pulse(Duration),
}

#[derive(Default)]
struct PttShared {
    connected: AtomicBool,
    active: AtomicBool,
}

// ---------------------------------------------------------------------------
// HardwarePtt
// ---------------------------------------------------------------------------

/// Cheap, clonable handle to the PTT worker.
///
/// `activate` / `deactivate` return immediately; the worker applies them in
/// order with the configured delays.  Repeating the current state is a
/// no-op.  When every handle is dropped the worker releases the line and
/// exits.
///
/// ```rust,no_run
/// use ham_voice::hardware::{CommandPttLine, HardwarePtt, PttTiming};
///
/// # async fn example() -> Result<(), ham_voice::hardware::PttError> {
/// let line = CommandPttLine::new("rigctl -m 2 T 1", "rigctl -m 2 T 0")?;
/// let ptt = HardwarePtt::connect(Box::new(line), PttTiming::default()).await?;
/// ptt.activate();
/// ptt.deactivate();
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct HardwarePtt {
    tx: Option<mpsc::UnboundedSender<PttCommand>>,
    shared: Arc<PttShared>,
}

impl HardwarePtt {
    /// A handle with no device behind it.  Every call is a no-op.
    pub fn disabled() -> Self {
        Self {
            tx: None,
            shared: Arc::new(PttShared::default()),
        }
    }

    /// Take ownership of `line`, force it off, and start the worker task.
    ///
    /// Must be called inside a tokio runtime.
    pub async fn connect(line: Box<dyn PttLine>, timing: PttTiming) -> Result<Self, PttError> {
        let label = line.describe();
        let line = drive(line, false).await?;

        let shared = Arc::new(PttShared::default());
        shared.connected.store(true, Ordering::SeqCst);

        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_worker(line, timing, Arc::clone(&shared), rx));

        log::info!(
            "ptt: connected to {label} (pre {} ms, post {} ms)",
            timing.pre_delay.as_millis(),
            timing.post_delay.as_millis()
        );
        Ok(Self {
            tx: Some(tx),
            shared,
        })
    }

    pub fn activate(&self) {
        self.send(PttCommand::Activate);
    }

    pub fn deactivate(&self) {
        self.send(PttCommand::Deactivate);
    }

    /// Key the transmitter for `hold`, then release.  For setup screens.
    pub fn test_pulse(&self, hold: Duration) {
        self.send(PttCommand::Pulse(hold));
    }

    /// `false` for a disabled handle or after a line failure.
    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    /// Whether the line is currently asserted.
    pub fn is_active(&self) -> bool {
        self.shared.active.load(Ordering::SeqCst)
    }

    fn send(&self, command: PttCommand) {
        match &self.tx {
            Some(tx) if self.is_connected() => {
                if tx.send(command).is_err() {
                    log::debug!("ptt: worker has stopped");
                }
            }
            _ => log::debug!("ptt: not connected, ignoring {command:?}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

/// Run one blocking line transition on the blocking pool.
async fn drive(line: Box<dyn PttLine>, active: bool) -> Result<Box<dyn PttLine>, PttError> {
    let (line, result) = tokio::task::spawn_blocking(move || {
        let mut line = line;
        let result = line.set_line(active);
        (line, result)
    })
    .await
    .map_err(|e| PttError::Worker(e.to_string()))?;
    result.map(|()| line)
}

async fn switch(
    line: Box<dyn PttLine>,
    active: bool,
    timing: &PttTiming,
    shared: &PttShared,
) -> Result<Box<dyn PttLine>, PttError> {
    if shared.active.load(Ordering::SeqCst) == active {
        log::debug!("ptt: already {}", if active { "active" } else { "released" });
        return Ok(line);
    }
    if active {
        tokio::time::sleep(timing.pre_delay).await;
        let line = drive(line, true).await?;
        shared.active.store(true, Ordering::SeqCst);
        log::debug!("ptt: line asserted");
        Ok(line)
    } else {
        let line = drive(line, false).await?;
        shared.active.store(false, Ordering::SeqCst);
        log::debug!("ptt: line released");
        tokio::time::sleep(timing.post_delay).await;
        Ok(line)
    }
}

async fn run_worker(
    mut line: Box<dyn PttLine>,
    timing: PttTiming,
    shared: Arc<PttShared>,
    mut rx: mpsc::UnboundedReceiver<PttCommand>,
) {
    while let Some(command) = rx.recv().await {
        let outcome = match command {
            PttCommand::Activate => switch(line, true, &timing, &shared).await,
            PttCommand::Deactivate => switch(line, false, &timing, &shared).await,
            PttCommand::Pulse(hold) => match switch(line, true, &timing, &shared).await {
                Ok(keyed) => {
                    tokio::time::sleep(hold).await;
                    switch(keyed, false, &timing, &shared).await
                }
                Err(e) => Err(e),
            },
        };
        match outcome {
            Ok(next) => line = next,
            Err(e) => {
                log::warn!("ptt: line failed, continuing without hardware PTT: {e}");
                shared.connected.store(false, Ordering::SeqCst);
                shared.active.store(false, Ordering::SeqCst);
                return;
            }
        }
    }

    if shared.active.load(Ordering::SeqCst) {
        if let Err(e) = drive(line, false).await {
            log::warn!("ptt: failed to release line on shutdown: {e}");
        }
        shared.active.store(false, Ordering::SeqCst);
    }
    log::debug!("ptt: worker stopped");
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;
    use tokio::time::{sleep, Instant};

    /// Records every transition with its timestamp.
    #[derive(Clone, Default)]
    pub(crate) struct RecordingLine {
        pub(crate) log: Arc<Mutex<Vec<(Instant, bool)>>>,
    }

    impl RecordingLine {
        pub(crate) fn states(&self) -> Vec<bool> {
            self.log.lock().unwrap().iter().map(|(_, s)| *s).collect()
        }

        pub(crate) fn times(&self) -> Vec<Instant> {
            self.log.lock().unwrap().iter().map(|(t, _)| *t).collect()
        }
    }

    impl PttLine for RecordingLine {
        fn set_line(&mut self, active: bool) -> Result<(), PttError> {
            self.log.lock().unwrap().push((Instant::now(), active));
            Ok(())
        }
    }

    /// Releases fine, fails to key.
    struct UnpluggedLine;

    impl PttLine for UnpluggedLine {
        fn set_line(&mut self, active: bool) -> Result<(), PttError> {
            if active {
                Err(PttError::Worker("device unplugged".into()))
            } else {
                Ok(())
            }
        }
    }

    fn timing() -> PttTiming {
        PttTiming {
            pre_delay: Duration::from_millis(50),
            post_delay: Duration::from_millis(100),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn connect_forces_line_off() {
        let line = RecordingLine::default();
        let ptt = HardwarePtt::connect(Box::new(line.clone()), timing()).await.unwrap();
        assert!(ptt.is_connected());
        assert!(!ptt.is_active());
        assert_eq!(line.states(), vec![false]);
    }

    #[tokio::test(start_paused = true)]
    async fn activate_waits_for_pre_delay_without_blocking_caller() {
        let line = RecordingLine::default();
        let ptt = HardwarePtt::connect(Box::new(line.clone()), timing()).await.unwrap();

        let start = Instant::now();
        ptt.activate();
        assert_eq!(Instant::now(), start);

        sleep(Duration::from_millis(20)).await;
        assert!(!ptt.is_active());
        sleep(Duration::from_millis(100)).await;
        assert!(ptt.is_active());
        assert_eq!(line.states(), vec![false, true]);
        assert_eq!(line.times()[1] - start, Duration::from_millis(50));
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_activation_is_idempotent() {
        let line = RecordingLine::default();
        let ptt = HardwarePtt::connect(Box::new(line.clone()), timing()).await.unwrap();

        ptt.activate();
        ptt.activate();
        ptt.activate();
        sleep(Duration::from_millis(500)).await;
        assert_eq!(line.states(), vec![false, true]);
    }

    #[tokio::test(start_paused = true)]
    async fn transitions_are_sequenced_with_post_delay() {
        let line = RecordingLine::default();
        let ptt = HardwarePtt::connect(Box::new(line.clone()), timing()).await.unwrap();

        let start = Instant::now();
        ptt.activate();
        ptt.deactivate();
        ptt.activate();
        sleep(Duration::from_millis(500)).await;

        assert_eq!(line.states(), vec![false, true, false, true]);
        let offsets: Vec<u128> = line.times()[1..]
            .iter()
            .map(|t| (*t - start).as_millis())
            .collect();
        assert_eq!(offsets, vec![50, 50, 200]);
    }

    #[tokio::test(start_paused = true)]
    async fn line_failure_is_capability_loss() {
        let ptt = HardwarePtt::connect(Box::new(UnpluggedLine), timing()).await.unwrap();
        ptt.activate();
        sleep(Duration::from_millis(200)).await;
        assert!(!ptt.is_connected());
        assert!(!ptt.is_active());
        // Further calls are silently ignored.
        ptt.activate();
        ptt.deactivate();
    }

    #[tokio::test(start_paused = true)]
    async fn test_pulse_keys_then_releases() {
        let line = RecordingLine::default();
        let ptt = HardwarePtt::connect(Box::new(line.clone()), timing()).await.unwrap();

        let start = Instant::now();
        ptt.test_pulse(Duration::from_millis(500));
        sleep(Duration::from_millis(300)).await;
        assert!(ptt.is_active());
        sleep(Duration::from_millis(500)).await;
        assert!(!ptt.is_active());
        assert_eq!(line.states(), vec![false, true, false]);
        assert_eq!(line.times()[2] - start, Duration::from_millis(550));
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_every_handle_releases_the_line() {
        let line = RecordingLine::default();
        let ptt = HardwarePtt::connect(Box::new(line.clone()), timing()).await.unwrap();
        ptt.activate();
        sleep(Duration::from_millis(100)).await;
        drop(ptt);
        sleep(Duration::from_millis(100)).await;
        assert_eq!(line.states(), vec![false, true, false]);
    }

    #[test]
    fn disabled_handle_is_inert() {
        let ptt = HardwarePtt::disabled();
        ptt.activate();
        ptt.deactivate();
        assert!(!ptt.is_connected());
        assert!(!ptt.is_active());
    }

    #[test]
    fn timing_from_config() {
        let timing = PttTiming::default();
        assert_eq!(timing.pre_delay, Duration::from_millis(50));
        assert_eq!(timing.post_delay, Duration::from_millis(100));
    }
}
