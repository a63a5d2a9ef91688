//! Round clock.
//!
//! The persisted timer is a descriptor, never a running counter: while a round
//! runs only `end_at_ms` is stored and every reader derives the remaining time
//! from its own wall clock. A client that sleeps, reconnects, or misses ticks
//! recomputes the same value as everyone else on its next poll.

use spacetimedb::SpacetimeType;

use crate::{lifecycle::Lifecycle, Room};

/// How often clients re-derive the countdown for display.
pub const TICK_INTERVAL_MS: u64 = 250;

/// Persisted `{durationSec, endAtMs, paused, pausedRemainingSec}` descriptor.
#[derive(SpacetimeType, Debug, Clone, PartialEq, Eq)]
pub struct TimerState {
    /// Configured length of a round
    pub duration_sec: u32,

    /// Wall-clock deadline in unix millis, 0 when not running
    pub end_at_ms: i64,

    pub paused: bool,

    /// Seconds left when the timer was paused or staged
    pub paused_remaining_sec: u32,
}

impl TimerState {
    /// Paused timer holding the full duration, used for staged rounds.
    pub fn staged(duration_sec: u32) -> Self {
        let duration_sec = duration_sec.max(1);
        Self {
            duration_sec,
            end_at_ms: 0,
            paused: true,
            paused_remaining_sec: duration_sec,
        }
    }

    /// Seconds a staged timer will run for once started.
    pub fn pending_secs(&self) -> u32 {
        if self.paused_remaining_sec > 0 {
            self.paused_remaining_sec
        } else {
            self.duration_sec
        }
    }

    /// Anchor the countdown to `now_ms`.
    pub fn start(&mut self, now_ms: i64) {
        let secs = self.pending_secs().max(1);
        self.end_at_ms = now_ms + i64::from(secs) * 1000;
        self.paused = false;
        self.paused_remaining_sec = 0;
    }

    /// Freeze the countdown, capturing whole seconds left (rounded up).
    pub fn pause(&mut self, now_ms: i64) {
        self.paused_remaining_sec = ceil_secs(self.end_at_ms - now_ms);
        self.paused = true;
        self.end_at_ms = 0;
    }

    /// Re-anchor a paused countdown; the time spent paused is not charged.
    pub fn resume(&mut self, now_ms: i64) {
        self.end_at_ms = now_ms + i64::from(self.paused_remaining_sec) * 1000;
        self.paused = false;
        self.paused_remaining_sec = 0;
    }

    /// Force-expire: remaining evaluates to 0 from here on.
    pub fn expire(&mut self) {
        self.end_at_ms = 0;
        self.paused = false;
        self.paused_remaining_sec = 0;
    }

    /// Seconds remaining for a room in `lifecycle`, evaluated at `now_ms`.
    pub fn remaining_secs(&self, lifecycle: Lifecycle, now_ms: i64) -> u32 {
        match lifecycle {
            Lifecycle::Staged | Lifecycle::RoundReady => self.pending_secs(),
            Lifecycle::Running | Lifecycle::Revealed => {
                if self.paused {
                    self.paused_remaining_sec
                } else if self.end_at_ms <= 0 {
                    0
                } else {
                    ceil_secs(self.end_at_ms - now_ms)
                }
            }
        }
    }

    /// Anchored to a deadline, i.e. started and not paused.
    pub fn is_running(&self) -> bool {
        !self.paused && self.end_at_ms > 0
    }
}

fn ceil_secs(ms_left: i64) -> u32 {
    let ms_left = ms_left.max(0);
    u32::try_from((ms_left + 999) / 1000).unwrap_or(u32::MAX)
}

/// Local countdown derived from the latest room snapshot.
///
/// `remaining` is `None` until a snapshot has arrived, so "not loaded yet" is
/// never mistaken for "ran out" (which would fire the reveal fallback early).
#[derive(Debug, Clone, Default)]
pub struct Countdown {
    snapshot: Option<(Lifecycle, TimerState)>,
}

impl Countdown {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the latest room snapshot. `None` means the room does not exist.
    pub fn observe(&mut self, room: Option<&Room>) {
        self.snapshot = room.map(|r| (r.lifecycle, r.timer.clone()));
    }

    /// Forget the current room, e.g. when switching room codes.
    pub fn reset(&mut self) {
        self.snapshot = None;
    }

    pub fn is_hydrated(&self) -> bool {
        self.snapshot.is_some()
    }

    pub fn remaining(&self, now_ms: i64) -> Option<u32> {
        self.snapshot
            .as_ref()
            .map(|(lifecycle, timer)| timer.remaining_secs(*lifecycle, now_ms))
    }

    /// Whether the display needs polling at [`TICK_INTERVAL_MS`].
    pub fn is_ticking(&self) -> bool {
        matches!(&self.snapshot, Some((Lifecycle::Running, timer)) if timer.is_running())
    }
}

/// `m:ss` above a minute, `Ns` below.
pub fn format_remaining(secs: u32) -> String {
    let (m, s) = (secs / 60, secs % 60);
    if m > 0 {
        format!("{}:{:02}", m, s)
    } else {
        format!("{}s", s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const T0: i64 = 1_700_000_000_000;

    fn running(duration: u32) -> TimerState {
        let mut timer = TimerState::staged(duration);
        timer.start(T0);
        timer
    }

    #[test]
    fn staged_timer_shows_full_duration_without_ticking() {
        let timer = TimerState::staged(60);
        assert_eq!(timer.remaining_secs(Lifecycle::RoundReady, T0), 60);
        assert_eq!(timer.remaining_secs(Lifecycle::RoundReady, T0 + 90_000), 60);
        assert_eq!(timer.remaining_secs(Lifecycle::Staged, T0), 60);
    }

    #[test]
    fn zero_duration_is_clamped_to_one_second() {
        assert_eq!(TimerState::staged(0).duration_sec, 1);
    }

    #[test]
    fn running_timer_rounds_up_partial_seconds() {
        let timer = running(60);
        assert_eq!(timer.end_at_ms, T0 + 60_000);
        assert_eq!(timer.remaining_secs(Lifecycle::Running, T0), 60);
        assert_eq!(timer.remaining_secs(Lifecycle::Running, T0 + 1), 60);
        assert_eq!(timer.remaining_secs(Lifecycle::Running, T0 + 59_001), 1);
        assert_eq!(timer.remaining_secs(Lifecycle::Running, T0 + 60_000), 0);
        assert_eq!(timer.remaining_secs(Lifecycle::Running, T0 + 500_000), 0);
    }

    #[test]
    fn samples_converge_on_the_same_deadline() {
        let timer = running(30);
        let a = T0 + 7_250;
        let b = a + 5_000;
        let ra = timer.remaining_secs(Lifecycle::Running, a);
        let rb = timer.remaining_secs(Lifecycle::Running, b);
        assert!(ra - rb <= 5);

        // both clients read zero from the deadline onward, never before
        let deadline = timer.end_at_ms;
        assert_eq!(timer.remaining_secs(Lifecycle::Running, deadline - 1), 1);
        assert_eq!(timer.remaining_secs(Lifecycle::Running, deadline), 0);
    }

    #[test]
    fn pause_freezes_and_resume_does_not_charge_paused_time() {
        let mut timer = running(60);
        let pause_at = T0 + 23_000; // 37s left
        timer.pause(pause_at);
        assert!(timer.paused);
        assert_eq!(timer.end_at_ms, 0);
        assert_eq!(timer.paused_remaining_sec, 37);
        assert_eq!(timer.remaining_secs(Lifecycle::Running, pause_at + 10_000), 37);

        let resume_at = pause_at + 10_000;
        timer.resume(resume_at);
        assert!(!timer.paused);
        assert_eq!(timer.remaining_secs(Lifecycle::Running, resume_at), 37);
        assert_eq!(timer.remaining_secs(Lifecycle::Running, resume_at + 37_000), 0);
    }

    #[test]
    fn pause_after_deadline_captures_zero() {
        let mut timer = running(5);
        timer.pause(T0 + 9_000);
        assert_eq!(timer.paused_remaining_sec, 0);
    }

    #[test]
    fn expire_reads_zero_in_every_post_start_state() {
        let mut timer = running(60);
        timer.expire();
        assert_eq!(timer.remaining_secs(Lifecycle::Running, T0), 0);
        assert_eq!(timer.remaining_secs(Lifecycle::Revealed, T0), 0);
        assert!(!timer.is_running());
    }

    #[test]
    fn format_switches_at_one_minute() {
        assert_eq!(format_remaining(0), "0s");
        assert_eq!(format_remaining(59), "59s");
        assert_eq!(format_remaining(60), "1:00");
        assert_eq!(format_remaining(125), "2:05");
    }
}
