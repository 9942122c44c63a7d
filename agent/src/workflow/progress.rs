//! Progress lookup and observers

use std::sync::atomic::{AtomicU8, Ordering};

use chart_api::models::ProgressEvent;
use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;

use crate::models::{Progress, StateName};

/// Operation tag carried by streamed events
pub const OPERATION: &str = "agent_flow";

/// Fixed completion percentage of a state
pub fn calculate_progress(state: StateName) -> u8 {
    match state {
        StateName::Routing => 5,
        StateName::Planning => 10,
        StateName::UnderstandingSchema => 20,
        StateName::GeneratingQuery => 30,
        StateName::Retrying => 35,
        StateName::Clarifying => 40,
        StateName::ExecutingQuery => 50,
        StateName::Chatting => 60,
        StateName::ValidatingResults => 70,
        StateName::TransformingData => 90,
        StateName::Completed | StateName::Failed => 100,
    }
}

/// Receives step-level progress of a run. Calls must not block.
pub trait ProgressObserver: Send + Sync {
    fn on_progress(&self, progress: &Progress);

    /// Streamed reply text
    fn on_content(&self, _chunk: &str) {}
}

/// Forwards progress into a channel as wire events
pub struct ChannelObserver {
    sender: UnboundedSender<ProgressEvent>,
    /// Highest percentage sent so far
    high_water: AtomicU8,
}

impl ChannelObserver {
    pub fn new(sender: UnboundedSender<ProgressEvent>) -> Self {
        Self {
            sender,
            high_water: AtomicU8::new(0),
        }
    }
}

impl ProgressObserver for ChannelObserver {
    fn on_progress(&self, progress: &Progress) {
        // A retry loops back to earlier states; observers only see growth
        let previous = self.high_water.fetch_max(progress.percentage, Ordering::Relaxed);
        let percentage = previous.max(progress.percentage);
        let event = ProgressEvent::progress(
            OPERATION,
            &progress.message,
            progress.current_state.as_str(),
            percentage,
        );
        if self.sender.send(event).is_err() {
            debug!("Progress receiver closed, dropping {} event", progress.current_state);
        }
    }

    fn on_content(&self, chunk: &str) {
        if self.sender.send(ProgressEvent::content(OPERATION, chunk)).is_err() {
            debug!("Progress receiver closed, dropping {} bytes of content", chunk.len());
        }
    }
}
