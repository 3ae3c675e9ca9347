//! Stream lifecycle timing
//!
//! Each milestone is recorded at most once; later records of the same
//! milestone are ignored. Reported spans are pairwise deltas, and a span
//! with a missing or out-of-order endpoint is reported as unavailable.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Instant;

/// Recorded lifecycle moments
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Milestone {
    Initialized,
    OfferCreated,
    LocalDescriptionSet,
    OfferSent,
    AnswerReceived,
    RemoteDescriptionSet,
    IceConnected,
    FirstFrame,
}

impl Milestone {
    const COUNT: usize = 8;

    fn index(self) -> usize {
        self as usize
    }
}

/// Milestone timestamps for one session attempt
#[derive(Debug, Clone, Default)]
pub struct StreamTimeline {
    marks: [Option<Instant>; Milestone::COUNT],
}

impl StreamTimeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a milestone; returns false if it was already recorded
    pub fn record(&mut self, milestone: Milestone, at: Instant) -> bool {
        let slot = &mut self.marks[milestone.index()];
        if slot.is_some() {
            return false;
        }
        *slot = Some(at);
        true
    }

    pub fn get(&self, milestone: Milestone) -> Option<Instant> {
        self.marks[milestone.index()]
    }

    pub fn clear(&mut self) {
        self.marks = [None; Milestone::COUNT];
    }

    /// Elapsed time between two milestones
    pub fn span(&self, from: Milestone, to: Milestone) -> Span {
        match (self.get(from), self.get(to)) {
            (Some(start), Some(end)) => Span(
                end.checked_duration_since(start)
                    .map(|d| d.as_millis() as u64),
            ),
            _ => Span::UNAVAILABLE,
        }
    }

    pub fn report(&self) -> AnalyticsReport {
        AnalyticsReport {
            initialized: self.span(Milestone::Initialized, Milestone::LocalDescriptionSet),
            answer_received: self.span(Milestone::OfferSent, Milestone::AnswerReceived),
            connected: self.span(Milestone::AnswerReceived, Milestone::IceConnected),
            playback_started: self.span(Milestone::IceConnected, Milestone::FirstFrame),
        }
    }
}

/// Millisecond duration, or unavailable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Span(pub Option<u64>);

impl Span {
    pub const UNAVAILABLE: Span = Span(None);

    pub fn millis(&self) -> Option<u64> {
        self.0
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(ms) => write!(f, "{}ms", ms),
            None => write!(f, "-"),
        }
    }
}

/// Analytics view published after every session transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalyticsReport {
    /// Session start to local description applied
    pub initialized: Span,
    /// Offer sent to answer received
    pub answer_received: Span,
    /// Answer received to ICE connected
    pub connected: Span,
    /// ICE connected to first inbound media
    pub playback_started: Span,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_first_record_wins() {
        let base = Instant::now();
        let mut timeline = StreamTimeline::new();

        assert!(timeline.record(Milestone::IceConnected, base));
        assert!(!timeline.record(Milestone::IceConnected, base + Duration::from_secs(5)));
        assert_eq!(timeline.get(Milestone::IceConnected), Some(base));
    }

    #[test]
    fn test_report_spans() {
        let base = Instant::now();
        let mut timeline = StreamTimeline::new();
        timeline.record(Milestone::Initialized, base);
        timeline.record(Milestone::LocalDescriptionSet, base + Duration::from_millis(40));
        timeline.record(Milestone::OfferSent, base + Duration::from_millis(100));
        timeline.record(Milestone::AnswerReceived, base + Duration::from_millis(350));

        let report = timeline.report();
        assert_eq!(report.initialized.millis(), Some(40));
        assert_eq!(report.answer_received.millis(), Some(250));
        assert_eq!(report.connected, Span::UNAVAILABLE);
        assert_eq!(report.playback_started.to_string(), "-");
        assert_eq!(report.initialized.to_string(), "40ms");
    }

    #[test]
    fn test_out_of_order_span_is_unavailable() {
        let base = Instant::now();
        let mut timeline = StreamTimeline::new();
        timeline.record(Milestone::IceConnected, base + Duration::from_millis(10));
        timeline.record(Milestone::FirstFrame, base);

        assert_eq!(timeline.report().playback_started, Span::UNAVAILABLE);
    }

    #[test]
    fn test_clear() {
        let mut timeline = StreamTimeline::new();
        timeline.record(Milestone::Initialized, Instant::now());
        timeline.clear();
        assert_eq!(timeline.get(Milestone::Initialized), None);
    }
}
