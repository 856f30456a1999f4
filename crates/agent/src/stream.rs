//! The read end of a run's event stream.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use stepwise_core::event::AgentEvent;
use tokio::sync::mpsc;

/// Read-only view of one run's events, in emission order.
///
/// Ends after `RunEnd` or `RunError`.
#[derive(Debug)]
pub struct EventStream {
    rx: mpsc::Receiver<AgentEvent>,
}

impl EventStream {
    pub(crate) fn new(rx: mpsc::Receiver<AgentEvent>) -> Self {
        Self { rx }
    }

    pub async fn recv(&mut self) -> Option<AgentEvent> {
        self.rx.recv().await
    }

    /// Drain the stream to the end.
    pub async fn collect_all(mut self) -> Vec<AgentEvent> {
        let mut events = Vec::new();
        while let Some(event) = self.rx.recv().await {
            events.push(event);
        }
        events
    }
}

impl Stream for EventStream {
    type Item = AgentEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().rx.poll_recv(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use stepwise_core::event::EventSink;

    #[tokio::test]
    async fn stream_yields_in_emission_order() {
        let (sink, rx) = EventSink::channel(8);
        sink.emit(AgentEvent::RunStart).await;
        sink.emit(AgentEvent::StepStart { step: 1 }).await;
        drop(sink);

        let events: Vec<AgentEvent> = EventStream::new(rx).collect().await;
        assert_eq!(
            events,
            vec![AgentEvent::RunStart, AgentEvent::StepStart { step: 1 }]
        );
    }

    #[tokio::test]
    async fn collect_all_ends_when_writer_is_gone() {
        let (sink, rx) = EventSink::channel(1);
        drop(sink);
        assert!(EventStream::new(rx).collect_all().await.is_empty());
    }
}
