//! Observer event recording for test assertions.

use std::sync::Mutex;

use async_trait::async_trait;
use courier_core::{DispatchEvent, EventHandler};

/// Event handler that stores every event it receives.
#[derive(Debug, Default)]
pub struct RecordingHandler {
    events: Mutex<Vec<DispatchEvent>>,
}

impl RecordingHandler {
    /// Creates an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of recorded events in arrival order.
    pub fn events(&self) -> Vec<DispatchEvent> {
        self.lock().clone()
    }

    /// Number of completed-task events seen.
    pub fn completed_count(&self) -> usize {
        self.lock().iter().filter(|e| matches!(e, DispatchEvent::Completed(_))).count()
    }

    /// Number of failed-task events seen.
    pub fn failed_count(&self) -> usize {
        self.lock().iter().filter(|e| matches!(e, DispatchEvent::Failed(_))).count()
    }

    /// Number of retry-scheduled events seen.
    pub fn retry_count(&self) -> usize {
        self.lock().iter().filter(|e| matches!(e, DispatchEvent::RetryScheduled(_))).count()
    }

    /// Number of cancelled-task events seen.
    pub fn cancelled_count(&self) -> usize {
        self.lock().iter().filter(|e| matches!(e, DispatchEvent::Cancelled(_))).count()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<DispatchEvent>> {
        self.events.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl EventHandler for RecordingHandler {
    async fn handle_event(&self, event: DispatchEvent) {
        self.lock().push(event);
    }
}
