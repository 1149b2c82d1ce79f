//! Notification Sink
//!
//! Fire-and-forget publication of divergence and drift events. Delivery
//! (chat, e-mail, paging) is owned by the embedding application; the governor
//! only hands events to a [`NotificationSink`] and logs any failure.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::drift::DriftStage;

/// Events published by the governor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GovernorEvent {
    /// Live and shadow pnl for a symbol diverged beyond the threshold
    Divergence {
        symbol: String,
        live_pnl: f64,
        shadow_pnl: f64,
        diff_pct: f64,
    },
    /// Drift watchdog moved one stage up the escalation ladder
    DriftEscalated {
        from: DriftStage,
        to: DriftStage,
        pf_breach: bool,
        win_rate_breach: bool,
        drawdown_breach: bool,
    },
    /// Drift watchdog moved one stage back toward NORMAL
    DriftRecovered { from: DriftStage, to: DriftStage },
    /// Trading halted by the watchdog
    KillSwitchActivated { reason: String },
}

/// Outbound notification transport
pub trait NotificationSink: Send + Sync {
    fn publish(&self, event: &GovernorEvent) -> anyhow::Result<()>;
}

/// Publish and swallow failures.
pub fn publish_best_effort(sink: &dyn NotificationSink, event: &GovernorEvent) {
    if let Err(e) = sink.publish(event) {
        warn!("Notification publish failed ({:?}): {}", event, e);
    }
}

/// Sink that only writes events to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl NotificationSink for LogNotifier {
    fn publish(&self, event: &GovernorEvent) -> anyhow::Result<()> {
        info!(?event, "governor event");
        Ok(())
    }
}

/// Sink that keeps every event in memory
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<GovernorEvent>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<GovernorEvent> {
        self.events.lock().clone()
    }

    pub fn divergence_count(&self) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| matches!(e, GovernorEvent::Divergence { .. }))
            .count()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl NotificationSink for RecordingNotifier {
    fn publish(&self, event: &GovernorEvent) -> anyhow::Result<()> {
        self.events.lock().push(event.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingSink;

    impl NotificationSink for FailingSink {
        fn publish(&self, _event: &GovernorEvent) -> anyhow::Result<()> {
            anyhow::bail!("transport down")
        }
    }

    #[test]
    fn test_failures_are_swallowed() {
        let event = GovernorEvent::KillSwitchActivated {
            reason: "test".into(),
        };
        publish_best_effort(&FailingSink, &event);
    }

    #[test]
    fn test_recording_notifier() {
        let sink = RecordingNotifier::new();
        publish_best_effort(
            &sink,
            &GovernorEvent::Divergence {
                symbol: "ETHUSDT".into(),
                live_pnl: 10.0,
                shadow_pnl: 40.0,
                diff_pct: 300.0,
            },
        );
        publish_best_effort(
            &sink,
            &GovernorEvent::DriftRecovered {
                from: DriftStage::Reduced,
                to: DriftStage::Normal,
            },
        );
        assert_eq!(sink.events().len(), 2);
        assert_eq!(sink.divergence_count(), 1);

        sink.clear();
        assert!(sink.events().is_empty());
    }

    #[test]
    fn test_event_json_tag() {
        let json = serde_json::to_string(&GovernorEvent::KillSwitchActivated {
            reason: "drift".into(),
        })
        .unwrap();
        assert!(json.contains("\"kind\":\"kill_switch_activated\""));
    }
}
