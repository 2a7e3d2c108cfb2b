// =============================================================================
// Watchdog — forced exit when cycles stop ticking
// =============================================================================
//
// A dedicated OS thread, fully independent of the tokio runtime, checks a
// heartbeat the engine pets at the end of every cycle. If the heartbeat goes
// stale beyond `watchdog_timeout`, the process is terminated with exit code
// 4 — the last defense against broker I/O that hangs past its timeouts.
// =============================================================================

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tracing::{error, info};

/// Exit code used when the watchdog kills the process.
pub const WATCHDOG_EXIT_CODE: i32 = 4;

/// How often the watchdog thread checks the heartbeat.
const CHECK_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Clone)]
pub struct Watchdog {
    last_beat_ms: Arc<AtomicU64>,
}

impl Watchdog {
    pub fn new() -> Self {
        let wd = Self {
            last_beat_ms: Arc::new(AtomicU64::new(0)),
        };
        wd.pet();
        wd
    }

    /// Record a completed cycle.
    pub fn pet(&self) {
        self.last_beat_ms.store(now_ms(), Ordering::SeqCst);
    }

    /// Milliseconds since the last pet.
    pub fn staleness_ms(&self) -> u64 {
        now_ms().saturating_sub(self.last_beat_ms.load(Ordering::SeqCst))
    }

    /// Start the supervisor thread. It never joins; it either idles or kills
    /// the process.
    pub fn spawn(&self, timeout: Duration) {
        let last_beat = self.last_beat_ms.clone();
        let timeout_ms = timeout.as_millis() as u64;

        std::thread::Builder::new()
            .name("watchdog".into())
            .spawn(move || {
                info!(timeout_secs = timeout.as_secs(), "watchdog armed");
                loop {
                    std::thread::sleep(CHECK_INTERVAL);
                    let stale = now_ms().saturating_sub(last_beat.load(Ordering::SeqCst));
                    if is_expired(stale, timeout_ms) {
                        error!(
                            stale_ms = stale,
                            timeout_ms, "watchdog timeout — terminating process"
                        );
                        std::process::exit(WATCHDOG_EXIT_CODE);
                    }
                }
            })
            .expect("spawning the watchdog thread cannot fail");
    }
}

impl Default for Watchdog {
    fn default() -> Self {
        Self::new()
    }
}

/// The kill decision, factored out so it can be tested without exiting.
fn is_expired(staleness_ms: u64, timeout_ms: u64) -> bool {
    timeout_ms > 0 && staleness_ms > timeout_ms
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expiry_decision() {
        // 130 s stale with a 120 s timeout kills; anything inside survives.
        assert!(is_expired(130_000, 120_000));
        assert!(!is_expired(119_000, 120_000));
        assert!(!is_expired(120_000, 120_000));
        // Zero timeout disarms the watchdog.
        assert!(!is_expired(10_000_000, 0));
    }

    #[test]
    fn pet_resets_staleness() {
        let wd = Watchdog::new();
        std::thread::sleep(Duration::from_millis(20));
        assert!(wd.staleness_ms() >= 20);
        wd.pet();
        assert!(wd.staleness_ms() < 20);
    }

    #[test]
    fn clones_share_the_heartbeat() {
        let wd = Watchdog::new();
        let clone = wd.clone();
        std::thread::sleep(Duration::from_millis(20));
        clone.pet();
        assert!(wd.staleness_ms() < 20);
    }
}
