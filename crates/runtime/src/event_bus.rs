//! Event Bus (§4.C7). Grounded on the teacher's per-run broadcast-channel
//! map in `RunStore`: one `broadcast::Sender` serving every subscriber,
//! dispatch is best-effort (a lagging/dropped receiver never affects
//! others), and dropping the receiver is the unsubscribe.

use ie_domain::NormalizedEntry;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;
use uuid::Uuid;

const CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum IssueState {
    Running,
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "topic", rename_all = "kebab-case")]
pub enum Event {
    Log {
        issue_id: Uuid,
        execution_id: Uuid,
        entry: Box<NormalizedEntry>,
    },
    State {
        issue_id: Uuid,
        execution_id: Uuid,
        state: IssueState,
    },
    /// Terminal states are emitted only here, never through `State`.
    Settled {
        issue_id: Uuid,
        execution_id: Uuid,
        final_status: IssueState,
    },
    IssueUpdated {
        issue_id: Uuid,
        changes: Value,
    },
    ChangesSummary {
        summary: Value,
    },
}

impl Event {
    pub fn issue_id(&self) -> Option<Uuid> {
        match self {
            Event::Log { issue_id, .. }
            | Event::State { issue_id, .. }
            | Event::Settled { issue_id, .. }
            | Event::IssueUpdated { issue_id, .. } => Some(*issue_id),
            Event::ChangesSummary { .. } => None,
        }
    }
}

/// A single global broadcast channel. Subscribers filter by `issue_id`
/// themselves, matching the contract's "clients that multiplex multiple
/// issues filter by issueId" note.
pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    /// Subscription handle; dropping it is the unsubscribe.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }

    /// Best-effort: publishing with zero subscribers is not an error.
    pub fn publish(&self, event: Event) {
        let _ = self.sender.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ie_domain::{EntryType, Metadata};

    #[tokio::test]
    async fn publish_reaches_all_subscribers() {
        let bus = EventBus::new();
        let mut r1 = bus.subscribe();
        let mut r2 = bus.subscribe();
        let issue_id = Uuid::new_v4();
        bus.publish(Event::State {
            issue_id,
            execution_id: Uuid::new_v4(),
            state: IssueState::Running,
        });
        assert!(matches!(r1.recv().await.unwrap(), Event::State { .. }));
        assert!(matches!(r2.recv().await.unwrap(), Event::State { .. }));
    }

    #[tokio::test]
    async fn publish_with_no_subscribers_does_not_panic() {
        let bus = EventBus::new();
        bus.publish(Event::ChangesSummary {
            summary: serde_json::json!({}),
        });
    }

    #[tokio::test]
    async fn dropped_receiver_does_not_affect_others() {
        let bus = EventBus::new();
        let r1 = bus.subscribe();
        let mut r2 = bus.subscribe();
        drop(r1);
        bus.publish(Event::Log {
            issue_id: Uuid::new_v4(),
            execution_id: Uuid::new_v4(),
            entry: Box::new(NormalizedEntry {
                entry_type: EntryType::AssistantMessage,
                content: "hi".into(),
                metadata: Metadata::new(),
                tool_call: None,
            }),
        });
        assert!(r2.recv().await.is_ok());
    }
}
