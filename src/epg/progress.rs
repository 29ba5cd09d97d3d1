//! The in-process progress bus: one broadcast channel carrying
//! `(phase, current, total, label, percent)` updates for any subscriber
//! (CLI streaming output, future SSE layers).

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    TeamEpg,
    EventEpg,
    Lifecycle,
    Persist,
    Done,
    Aborted,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Phase::TeamEpg => "team_epg",
            Phase::EventEpg => "event_epg",
            Phase::Lifecycle => "lifecycle",
            Phase::Persist => "persist",
            Phase::Done => "done",
            Phase::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub phase: Phase,
    pub current: usize,
    pub total: usize,
    pub label: String,
    pub percent: f64,
}

#[derive(Clone)]
pub struct ProgressBus {
    tx: broadcast::Sender<ProgressEvent>,
}

impl ProgressBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(256);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.tx.subscribe()
    }

    /// Fire-and-forget: emitting with no subscribers is fine.
    pub fn emit(&self, phase: Phase, current: usize, total: usize, label: impl Into<String>) {
        let percent = if total == 0 {
            100.0
        } else {
            (current as f64 / total as f64) * 100.0
        };
        let _ = self.tx.send(ProgressEvent {
            phase,
            current,
            total,
            label: label.into(),
            percent,
        });
    }
}

impl Default for ProgressBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_see_events_in_order() {
        let bus = ProgressBus::new();
        let mut rx = bus.subscribe();

        bus.emit(Phase::TeamEpg, 1, 4, "pistons.nba");
        bus.emit(Phase::TeamEpg, 2, 4, "lakers.nba");

        let first = rx.recv().await.unwrap();
        assert_eq!(first.phase, Phase::TeamEpg);
        assert_eq!(first.current, 1);
        assert_eq!(first.percent, 25.0);

        let second = rx.recv().await.unwrap();
        assert_eq!(second.label, "lakers.nba");
        assert_eq!(second.percent, 50.0);
    }

    #[test]
    fn emitting_without_subscribers_is_silent() {
        let bus = ProgressBus::new();
        bus.emit(Phase::Done, 0, 0, "");
    }
}
