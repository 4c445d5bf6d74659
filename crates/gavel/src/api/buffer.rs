use std::collections::VecDeque;

use gavel_core::PipelineEvent;

/// Outbound buffer applying the backpressure policy between the event
/// channel and a slow transport.
///
/// Complete results are never dropped. Streaming partials are expendable:
/// adjacent pending chunks for the same conversation coalesce to the newest
/// one, and a terminal event purges that conversation's still-buffered
/// partials so stale chunks are never emitted after completion. Relative
/// order of everything that survives is preserved.
pub struct EventBuffer {
    queue: VecDeque<PipelineEvent>,
}

impl EventBuffer {
    pub fn new() -> Self {
        Self {
            queue: VecDeque::new(),
        }
    }

    pub fn push(&mut self, event: PipelineEvent) {
        if let PipelineEvent::ChatbotChunk {
            conversation_id, ..
        } = &event
        {
            if let Some(PipelineEvent::ChatbotChunk {
                conversation_id: pending,
                ..
            }) = self.queue.back()
            {
                if pending == conversation_id {
                    self.queue.pop_back();
                }
            }
        } else if event.is_terminal() {
            let conversation_id = event.conversation_id().to_string();
            self.queue
                .retain(|e| !(e.is_partial() && e.conversation_id() == conversation_id));
        }

        self.queue.push_back(event);
    }

    pub fn pop(&mut self) -> Option<PipelineEvent> {
        self.queue.pop_front()
    }
}
