//! # DDoS Detection
//!
//! A severity state machine consulted by the receive loop once per frame.
//!
//! ## Severity Ladder
//! Index 0 is the baseline. Each [`SeverityLevel`] names the per-second quotas that escalate past
//! it and the per-frame limits applied while it is active.
//!
//! - **Escalate** (at most once per frame) when, within the current one-second window, the
//!   non-connection or bad packet count reaches the active level's quota, or a frame's receive
//!   time exceeds its time quota.
//! - **De-escalate** one level at a time, at second boundaries, once the active level's cooloff
//!   has passed since the start of the last window that would still have escalated past the
//!   level below.
//!
//! ## Frame Protocol
//! ```text
//! pre_frame_receive(now, dt)
//!   for each datagram:
//!     non-connection: inc_non_conn_packet_counter(); if check_non_conn_quotas_and_limits(now) { drop }
//!     connection:     if should_block_net_conn_packets(now) { drop }
//!     rejected:       inc_bad_packet_counter() / inc_error_packet_counter()
//! post_frame_receive(now)
//! ```
//!
//! Time is always passed in; the detector never reads the clock itself.

pub use crate::config::{DdosConfig, SeverityLevel};
use crate::error::{HandlerError, Result};
use crate::utils::metrics::global_metrics;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const WINDOW: Duration = Duration::from_secs(1);

/// Lower bound on the per-frame limit scaling
const MIN_FRAME_ADJUSTMENT: f32 = 0.25;

/// Counters for one accounting window
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DdosCounters {
    pub non_conn_packets: u32,
    pub bad_packets: u32,
    pub error_packets: u32,
    pub dropped_packets: u32,
    pub worst_frame_receive_time_ms: u32,
}

impl DdosCounters {
    /// True if these counters would escalate past `level`
    fn breaches(&self, level: &SeverityLevel) -> bool {
        level
            .escalate_packets_per_sec
            .is_some_and(|quota| self.non_conn_packets >= quota)
            || level
                .escalate_bad_packets_per_sec
                .is_some_and(|quota| self.bad_packets >= quota)
            || level
                .escalate_time_quota_ms
                .is_some_and(|quota| self.worst_frame_receive_time_ms > quota)
    }
}

/// Reported to the analytics callback when a new worst severity is reached
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeverityEscalation {
    pub severity_category: String,
    pub level_index: usize,
    /// Counters of the window in which the escalation happened
    pub counters: DdosCounters,
}

#[derive(Debug, Clone, Copy)]
struct ArchivedWindow {
    started_at: Instant,
    counters: DdosCounters,
}

type AnalyticsCallback = Box<dyn FnMut(&SeverityEscalation) + Send>;

pub struct DdosDetector {
    config: DdosConfig,
    active_index: usize,
    worst_index: usize,
    /// When the active level was last entered or re-triggered
    last_escalation: Option<Instant>,
    escalated_this_frame: bool,
    frame_adjustment: f32,
    hitch_frame_count: u32,
    frame_start: Option<Instant>,
    frame_non_conn_packets: u32,
    frame_log_count: u32,
    window_start: Option<Instant>,
    counters: DdosCounters,
    history: VecDeque<ArchivedWindow>,
    history_capacity: usize,
    analytics: Option<AnalyticsCallback>,
}

impl std::fmt::Debug for DdosDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DdosDetector")
            .field("enabled", &self.config.enabled)
            .field("active_index", &self.active_index)
            .field("worst_index", &self.worst_index)
            .field("frame_adjustment", &self.frame_adjustment)
            .field("counters", &self.counters)
            .finish_non_exhaustive()
    }
}

impl DdosDetector {
    /// # Errors
    /// `ConfigError` if the configuration fails validation (for example an enabled detector
    /// with an empty ladder).
    pub fn new(config: DdosConfig) -> Result<Self> {
        let errors = config.validate();
        if !errors.is_empty() {
            return Err(HandlerError::ConfigError(errors.join("; ")));
        }

        let longest_cooloff = config
            .severity
            .iter()
            .map(|level| level.cooloff_seconds as usize)
            .max()
            .unwrap_or(0);

        Ok(Self {
            config,
            active_index: 0,
            worst_index: 0,
            last_escalation: None,
            escalated_this_frame: false,
            frame_adjustment: 1.0,
            hitch_frame_count: 0,
            frame_start: None,
            frame_non_conn_packets: 0,
            frame_log_count: 0,
            window_start: None,
            counters: DdosCounters::default(),
            history: VecDeque::with_capacity(longest_cooloff + 1),
            history_capacity: longest_cooloff + 1,
            analytics: None,
        })
    }

    /// Called with each newly reached worst-ever severity when analytics are enabled
    pub fn set_analytics_callback<F>(&mut self, callback: F)
    where
        F: FnMut(&SeverityEscalation) + Send + 'static,
    {
        self.analytics = Some(Box::new(callback));
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled && !self.config.severity.is_empty()
    }

    pub fn active_index(&self) -> usize {
        self.active_index
    }

    pub fn active_level(&self) -> Option<&SeverityLevel> {
        self.config.severity.get(self.active_index)
    }

    pub fn worst_index(&self) -> usize {
        self.worst_index
    }

    pub fn frame_adjustment(&self) -> f32 {
        self.frame_adjustment
    }

    /// Counters for the current one-second window
    pub fn counters(&self) -> &DdosCounters {
        &self.counters
    }

    pub fn config(&self) -> &DdosConfig {
        &self.config
    }

    // ------------------------------------------------------------------
    // Frame bracketing
    // ------------------------------------------------------------------

    /// Start a receive frame. `delta_time` is the previous frame's duration in seconds.
    pub fn pre_frame_receive(&mut self, now: Instant, delta_time: f32) {
        if !self.is_enabled() {
            return;
        }

        self.update_frame_adjustment(delta_time);

        match self.window_start {
            None => self.window_start = Some(now),
            Some(start) if now.saturating_duration_since(start) >= WINDOW => {
                self.archive_window(start);
                self.window_start = Some(now);
                self.check_de_escalation(now);
            }
            Some(_) => {}
        }

        self.frame_start = Some(now);
        self.frame_non_conn_packets = 0;
        self.frame_log_count = 0;
        self.escalated_this_frame = false;
    }

    /// Finish a receive frame, recording its duration and escalating on the time quota
    pub fn post_frame_receive(&mut self, now: Instant) {
        if !self.is_enabled() {
            return;
        }
        let frame_ms = self.frame_elapsed_ms(now);
        self.counters.worst_frame_receive_time_ms =
            self.counters.worst_frame_receive_time_ms.max(frame_ms);

        let over_quota = self
            .active_level()
            .and_then(|level| level.escalate_time_quota_ms)
            .is_some_and(|quota| frame_ms > quota);
        if over_quota && !self.escalated_this_frame {
            self.escalate(now, "frame time quota");
        }
    }

    fn update_frame_adjustment(&mut self, delta_time: f32) {
        if let Some(hitch_ms) = self.config.hitch_time_quota_ms {
            if delta_time * 1000.0 > hitch_ms as f32 {
                self.hitch_frame_count += 1;
            } else {
                self.hitch_frame_count = 0;
            }
        }

        let expected = self.config.expected_frame_time();
        self.frame_adjustment = if self.hitch_frame_count > self.config.hitch_frame_tolerance {
            1.0
        } else if expected > 0.0 {
            (delta_time / expected).max(MIN_FRAME_ADJUSTMENT)
        } else {
            1.0
        };
    }

    fn frame_elapsed_ms(&self, now: Instant) -> u32 {
        self.frame_start
            .map(|start| now.saturating_duration_since(start).as_millis())
            .unwrap_or(0)
            .min(u128::from(u32::MAX)) as u32
    }

    fn scaled_limit(&self, limit: u32) -> u32 {
        (limit as f32 * self.frame_adjustment).ceil() as u32
    }

    // ------------------------------------------------------------------
    // Counters
    // ------------------------------------------------------------------

    pub fn inc_non_conn_packet_counter(&mut self) {
        self.counters.non_conn_packets = self.counters.non_conn_packets.saturating_add(1);
        self.frame_non_conn_packets = self.frame_non_conn_packets.saturating_add(1);
    }

    pub fn inc_bad_packet_counter(&mut self) {
        self.counters.bad_packets = self.counters.bad_packets.saturating_add(1);
    }

    pub fn inc_error_packet_counter(&mut self) {
        self.counters.error_packets = self.counters.error_packets.saturating_add(1);
    }

    pub fn inc_dropped_packet_counter(&mut self) {
        self.counters.dropped_packets = self.counters.dropped_packets.saturating_add(1);
    }

    // ------------------------------------------------------------------
    // Quotas and limits
    // ------------------------------------------------------------------

    /// Escalate if the active level's quotas are exceeded, then report whether this frame's
    /// non-connection budget is spent. `true` means drop the remaining non-connection packets.
    pub fn check_non_conn_quotas_and_limits(&mut self, now: Instant) -> bool {
        if !self.is_enabled() {
            return false;
        }

        if !self.escalated_this_frame {
            let frame_ms = self.frame_elapsed_ms(now);
            let breached = self.active_level().is_some_and(|level| {
                self.counters.breaches(level)
                    || level
                        .escalate_time_quota_ms
                        .is_some_and(|quota| frame_ms > quota)
            });
            if breached {
                self.escalate(now, "packet quota");
            }
        }

        let Some(level) = self.active_level() else {
            return false;
        };
        let over_packets = level
            .packet_limit_per_frame
            .is_some_and(|limit| self.frame_non_conn_packets > self.scaled_limit(limit));
        let over_time = level
            .time_limit_ms_per_frame
            .is_some_and(|limit| self.frame_elapsed_ms(now) >= self.scaled_limit(limit));
        over_packets || over_time
    }

    /// True once this frame has spent the active level's budget for connection packets
    pub fn should_block_net_conn_packets(&self, now: Instant) -> bool {
        if !self.is_enabled() {
            return false;
        }
        self.active_level()
            .and_then(|level| level.netconn_time_limit_ms_per_frame)
            .is_some_and(|limit| self.frame_elapsed_ms(now) >= self.scaled_limit(limit))
    }

    /// `true` means suppress this log line. Only restricts logging while escalated.
    pub fn check_log_restrictions(&mut self) -> bool {
        if self.active_index == 0 {
            return false;
        }
        self.frame_log_count = self.frame_log_count.saturating_add(1);
        self.frame_log_count > self.config.log_spam_limit
    }

    // ------------------------------------------------------------------
    // Transitions
    // ------------------------------------------------------------------

    fn escalate(&mut self, now: Instant, reason: &'static str) {
        self.escalated_this_frame = true;
        self.last_escalation = Some(now);

        if self.active_index + 1 >= self.config.severity.len() {
            return;
        }
        self.active_index += 1;
        global_metrics().ddos_escalation();

        let name = self.config.severity[self.active_index].name.clone();
        warn!(
            severity = %name,
            index = self.active_index,
            reason,
            non_conn_packets = self.counters.non_conn_packets,
            bad_packets = self.counters.bad_packets,
            "DDoS severity escalated"
        );

        if self.active_index > self.worst_index {
            self.worst_index = self.active_index;
            if self.config.analytics {
                if let Some(callback) = self.analytics.as_mut() {
                    callback(&SeverityEscalation {
                        severity_category: name,
                        level_index: self.active_index,
                        counters: self.counters,
                    });
                }
            }
        }
    }

    fn archive_window(&mut self, started_at: Instant) {
        if self.history.len() == self.history_capacity {
            self.history.pop_front();
        }
        self.history.push_back(ArchivedWindow {
            started_at,
            counters: self.counters,
        });
        self.counters = DdosCounters::default();
    }

    fn check_de_escalation(&mut self, now: Instant) {
        if self.active_index == 0 {
            return;
        }
        let lower = &self.config.severity[self.active_index - 1];
        let cooloff = Duration::from_secs(u64::from(
            self.config.severity[self.active_index].cooloff_seconds,
        ));

        let last_window_breach = self
            .history
            .iter()
            .rev()
            .find(|window| window.counters.breaches(lower))
            .map(|window| window.started_at);
        let last_breach = match (self.last_escalation, last_window_breach) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };

        // A window's breach is dated to its start, so this errs early by at most one window
        let cooled = last_breach.is_none_or(|at| now.saturating_duration_since(at) >= cooloff);
        if cooled {
            self.active_index -= 1;
            self.last_escalation = Some(now);
            info!(
                severity = %self.config.severity[self.active_index].name,
                index = self.active_index,
                "DDoS severity de-escalated"
            );
        } else {
            debug!(index = self.active_index, "DDoS severity still cooling off");
        }
    }
}
