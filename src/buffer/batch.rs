use crate::domain::LogEvent;
use std::time::Instant;
use uuid::Uuid;

/// An ordered group of events delivered in one request.
///
/// Lives only for the duration of a delivery attempt (and its retries).
#[derive(Debug, Clone)]
pub struct Batch {
    id: String,
    events: Vec<LogEvent>,
    created_at: Instant,
}

impl Batch {
    pub fn new(events: Vec<LogEvent>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            events,
            created_at: Instant::now(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn size(&self) -> usize {
        self.events.len()
    }

    pub fn events(&self) -> &[LogEvent] {
        &self.events
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Severity;

    #[test]
    fn test_batches_get_distinct_ids() {
        let a = Batch::new(vec![LogEvent::new(Severity::Information, "a")]);
        let b = Batch::new(vec![LogEvent::new(Severity::Information, "b")]);
        assert_ne!(a.id(), b.id());
        assert_eq!(a.size(), 1);
        assert!(!a.is_empty());
    }
}
