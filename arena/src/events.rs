//! Change notifications for observers of job state (e.g. the SSE endpoint).

use serde::Serialize;
use tokio::sync::broadcast;

const EVENT_CAPACITY: usize = 256;

/// A job or agent changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ArenaEvent {
    JobCreated {
        job_id: String,
    },
    AgentUpdated {
        job_id: String,
        agent_id: String,
    },
    /// Monitoring stopped; the job awaits human review.
    JobConverged {
        job_id: String,
    },
    JobCompleted {
        job_id: String,
    },
}

/// Broadcast fan-out of [`ArenaEvent`]s. Publishing never blocks and never
/// fails when nobody is listening.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ArenaEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self { tx }
    }

    pub fn publish(&self, event: ArenaEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ArenaEvent> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_serialize_with_type_tag() {
        let event = ArenaEvent::AgentUpdated {
            job_id: "abc".to_string(),
            agent_id: "agent-1".to_string(),
        };
        let json = serde_json::to_string(&event).expect("serialize");
        assert_eq!(
            json,
            r#"{"type":"agent_updated","job_id":"abc","agent_id":"agent-1"}"#
        );
    }

    #[test]
    fn publish_without_subscribers_is_fine() {
        let bus = EventBus::new();
        bus.publish(ArenaEvent::JobCreated {
            job_id: "abc".to_string(),
        });
        let mut rx = bus.subscribe();
        bus.publish(ArenaEvent::JobConverged {
            job_id: "abc".to_string(),
        });
        assert_eq!(
            rx.try_recv().expect("event"),
            ArenaEvent::JobConverged {
                job_id: "abc".to_string()
            }
        );
    }
}
