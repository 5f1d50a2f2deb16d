//! Replay phase state machine.
//!
//! ```text
//!  PRE_PEAK ──(timestamp > start)──▶ PEAK ──(timestamp > end)──▶ POST_PEAK
//!  mutating only, no delay           everything, original spacing   nothing; stop
//! ```
//!
//! Transitions happen *before* the triggering entry is evaluated, so the
//! entry that opens the peak window is replayed under peak rules and the
//! entry that closes it is dropped.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::info;

use crate::log::{Command, LogEntry};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    PrePeak,
    Peak,
    PostPeak,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Phase::PrePeak => "PRE_PEAK",
            Phase::Peak => "PEAK",
            Phase::PostPeak => "POST_PEAK",
        })
    }
}

/// Reference point for relative timing within the current phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseAnchor {
    /// When the phase began (replay clock).
    pub started_at: Instant,
    /// High-resolution timestamp of the first entry observed in the phase.
    pub first_timestamp: DateTime<Utc>,
}

impl PhaseAnchor {
    /// Offset of `hi_res` from the phase's first entry, as originally logged.
    pub fn expected(&self, hi_res: DateTime<Utc>) -> Duration {
        (hi_res - self.first_timestamp)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }

    /// Queueing latency in seconds: time elapsed in the phase minus the
    /// offset the entry had in the original traffic. Negative when ahead.
    pub fn latency(&self, hi_res: DateTime<Utc>, now: Instant) -> f64 {
        let elapsed = now.saturating_duration_since(self.started_at).as_secs_f64();
        let expected = (hi_res - self.first_timestamp)
            .num_microseconds()
            .map_or(0.0, |us| us as f64 / 1_000_000.0);
        elapsed - expected
    }
}

/// Anchor shared between the ingest thread (writer) and workers (readers).
pub type SharedAnchor = Arc<RwLock<PhaseAnchor>>;

/// What to do with one entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Before the skip-to point; not evaluated at all.
    Skip,
    /// Not admitted in the current phase.
    Drop,
    /// Dispatch, after waiting `wait` if present.
    Admit { wait: Option<Duration> },
    /// Replay window is over; stop reading the log.
    Stop,
}

/// Phase and admission policy, driven by the ingest thread.
pub struct PhaseTracker {
    phase: Phase,
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
    skip_to: Option<DateTime<Utc>>,
    anchor: SharedAnchor,
    seeded: bool,
}

impl PhaseTracker {
    /// `now` is the replay start; it anchors the PRE_PEAK phase.
    pub fn new(
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        skip_to: Option<DateTime<Utc>>,
        now: Instant,
    ) -> Self {
        Self {
            phase: Phase::PrePeak,
            start_time,
            end_time,
            skip_to,
            anchor: Arc::new(RwLock::new(PhaseAnchor {
                started_at: now,
                first_timestamp: DateTime::<Utc>::UNIX_EPOCH,
            })),
            seeded: false,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn anchor(&self) -> SharedAnchor {
        Arc::clone(&self.anchor)
    }

    /// Evaluates one entry, advancing the phase if needed.
    pub fn observe(&mut self, entry: &LogEntry, now: Instant) -> Decision {
        // The first entry of the log seeds the PRE_PEAK anchor, skipped or not
        if !self.seeded {
            self.anchor.write().first_timestamp = entry.hi_res_timestamp;
            self.seeded = true;
        }

        if self.skip_to.is_some_and(|skip_to| entry.timestamp < skip_to) {
            return Decision::Skip;
        }

        match self.phase {
            Phase::PrePeak if entry.timestamp > self.start_time => {
                self.phase = Phase::Peak;
                *self.anchor.write() = PhaseAnchor {
                    started_at: now,
                    first_timestamp: entry.hi_res_timestamp,
                };
                info!(
                    line = entry.line_number,
                    timestamp = %entry.timestamp,
                    "entering PEAK phase"
                );
            }
            Phase::Peak if entry.timestamp > self.end_time => {
                self.phase = Phase::PostPeak;
                info!(
                    line = entry.line_number,
                    timestamp = %entry.timestamp,
                    "entering POST_PEAK phase"
                );
            }
            _ => {}
        }

        if self.phase == Phase::PostPeak {
            return Decision::Stop;
        }
        if entry.command == Command::Quit {
            return Decision::Drop;
        }

        match self.phase {
            Phase::PrePeak if entry.is_mutating() => Decision::Admit { wait: None },
            Phase::PrePeak => Decision::Drop,
            _ => {
                let anchor = *self.anchor.read();
                let expected = anchor.expected(entry.hi_res_timestamp);
                let elapsed = now.saturating_duration_since(anchor.started_at);
                let wait = (elapsed < expected).then(|| expected - elapsed);
                Decision::Admit { wait }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    fn base() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2021-03-04T17:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn at(secs: i64, command: Command, argument: &str) -> LogEntry {
        let ts = base() + TimeDelta::seconds(secs);
        LogEntry {
            timestamp: ts,
            hi_res_timestamp: ts,
            connection_id: 1,
            command,
            argument: argument.to_string(),
            line_number: secs as u64 + 1,
        }
    }

    fn tracker(start: i64, end: i64, skip_to: Option<i64>, now: Instant) -> PhaseTracker {
        PhaseTracker::new(
            base() + TimeDelta::seconds(start),
            base() + TimeDelta::seconds(end),
            skip_to.map(|s| base() + TimeDelta::seconds(s)),
            now,
        )
    }

    #[test]
    fn test_pre_peak_admits_only_mutations() {
        let now = Instant::now();
        let mut t = tracker(100, 200, None, now);

        let update = at(1, Command::Query, "update t set x = 1");
        let select = at(2, Command::Query, "SELECT 1");
        let prepare = at(3, Command::Prepare, "INSERT INTO t VALUES (?)");
        let execute_select = at(4, Command::Execute, "SELECT * FROM t WHERE id = 1");

        assert_eq!(t.observe(&update, now), Decision::Admit { wait: None });
        assert_eq!(t.observe(&select, now), Decision::Drop);
        assert_eq!(t.observe(&prepare, now), Decision::Admit { wait: None });
        assert_eq!(t.observe(&execute_select, now), Decision::Drop);
        assert_eq!(t.phase(), Phase::PrePeak);
    }

    #[test]
    fn test_transition_entry_is_processed_under_peak_rules() {
        let now = Instant::now();
        let mut t = tracker(10, 200, None, now);

        // exactly at start: not strictly greater, still PRE_PEAK
        assert_eq!(t.observe(&at(10, Command::Query, "SELECT 1"), now), Decision::Drop);
        assert_eq!(t.phase(), Phase::PrePeak);

        // first entry strictly after start: a select, admitted under PEAK
        let later = now + Duration::from_secs(3);
        let first_peak = at(11, Command::Query, "SELECT 2");
        assert_eq!(t.observe(&first_peak, later), Decision::Admit { wait: None });
        assert_eq!(t.phase(), Phase::Peak);

        let anchor = *t.anchor().read();
        assert_eq!(anchor.started_at, later);
        assert_eq!(anchor.first_timestamp, first_peak.hi_res_timestamp);
    }

    #[test]
    fn test_peak_waits_for_original_spacing() {
        let now = Instant::now();
        let mut t = tracker(0, 200, None, now);

        assert_eq!(
            t.observe(&at(1, Command::Query, "SELECT 1"), now),
            Decision::Admit { wait: None }
        );
        // 4s later in the log, 1s later in replay: wait 3s
        assert_eq!(
            t.observe(&at(5, Command::Query, "SELECT 2"), now + Duration::from_secs(1)),
            Decision::Admit {
                wait: Some(Duration::from_secs(3))
            }
        );
        // behind schedule: no wait, no catch-up
        assert_eq!(
            t.observe(&at(6, Command::Query, "SELECT 3"), now + Duration::from_secs(9)),
            Decision::Admit { wait: None }
        );
    }

    #[test]
    fn test_end_crossing_stops_and_drops_trigger() {
        let now = Instant::now();
        let mut t = tracker(0, 20, None, now);

        assert!(matches!(
            t.observe(&at(5, Command::Query, "UPDATE t SET x = 1"), now),
            Decision::Admit { .. }
        ));
        // exactly at end is still inside the window
        assert!(matches!(
            t.observe(&at(20, Command::Query, "SELECT 1"), now + Duration::from_secs(15)),
            Decision::Admit { .. }
        ));
        assert_eq!(
            t.observe(&at(21, Command::Query, "UPDATE t SET x = 2"), now),
            Decision::Stop
        );
        assert_eq!(t.phase(), Phase::PostPeak);
        assert_eq!(
            t.observe(&at(22, Command::Query, "UPDATE t SET x = 3"), now),
            Decision::Stop
        );
    }

    #[test]
    fn test_skip_to_ignores_earlier_entries_but_first_seeds_anchor() {
        let now = Instant::now();
        let mut t = tracker(100, 200, Some(50), now);

        let first = at(0, Command::Query, "UPDATE t SET x = 1");
        assert_eq!(t.observe(&first, now), Decision::Skip);
        assert_eq!(t.anchor().read().first_timestamp, first.hi_res_timestamp);

        // after the end time but skipped: no transition evaluated
        assert_eq!(
            t.observe(&at(49, Command::Query, "UPDATE t SET x = 2"), now),
            Decision::Skip
        );
        assert_eq!(t.phase(), Phase::PrePeak);

        assert_eq!(
            t.observe(&at(50, Command::Query, "UPDATE t SET x = 3"), now),
            Decision::Admit { wait: None }
        );
        // anchor seeded once only
        assert_eq!(t.anchor().read().first_timestamp, first.hi_res_timestamp);
    }

    #[test]
    fn test_quit_triggers_transitions_but_is_never_admitted() {
        let now = Instant::now();
        let mut t = tracker(10, 200, None, now);

        assert_eq!(t.observe(&at(11, Command::Quit, ""), now), Decision::Drop);
        assert_eq!(t.phase(), Phase::Peak);
    }

    #[test]
    fn test_window_crossed_by_a_single_entry() {
        let now = Instant::now();
        let mut t = tracker(10, 20, None, now);

        // past both start and end: opens PEAK and is admitted
        let jump = at(30, Command::Query, "UPDATE t SET x = 1");
        assert_eq!(t.observe(&jump, now), Decision::Admit { wait: None });
        assert_eq!(t.phase(), Phase::Peak);
        assert_eq!(t.anchor().read().first_timestamp, jump.hi_res_timestamp);

        // the next entry closes the window
        assert_eq!(
            t.observe(&at(31, Command::Query, "UPDATE t SET x = 2"), now),
            Decision::Stop
        );
        assert_eq!(t.phase(), Phase::PostPeak);
    }

    #[test]
    fn test_latency_sign() {
        let now = Instant::now();
        let anchor = PhaseAnchor {
            started_at: now,
            first_timestamp: base(),
        };
        let hi_res = base() + TimeDelta::seconds(2);

        let behind = anchor.latency(hi_res, now + Duration::from_secs(5));
        assert!((behind - 3.0).abs() < 1e-9);
        let ahead = anchor.latency(hi_res, now + Duration::from_millis(500));
        assert!((ahead + 1.5).abs() < 1e-9);
    }
}
