//! Event collection helpers

use idr_client::{PipelineEvent, PipelineState};
use tokio::sync::broadcast;

/// Drain every event already sent on `events`
pub fn drain_events(events: &mut broadcast::Receiver<PipelineEvent>) -> Vec<PipelineEvent> {
    let mut collected = Vec::new();
    while let Ok(event) = events.try_recv() {
        collected.push(event);
    }
    collected
}

/// The states entered, in order
pub fn states_entered(events: &[PipelineEvent]) -> Vec<PipelineState> {
    events
        .iter()
        .filter_map(|event| match event {
            PipelineEvent::StateChanged { to, .. } => Some(*to),
            _ => None,
        })
        .collect()
}
