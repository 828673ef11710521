//! Server-sent event framing of progress streams.

use std::convert::Infallible;

use axum::response::sse::Event;
use flowmesh_types::progress::StreamEvent;
use futures_util::stream::{self, Stream};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_util::sync::DropGuard;
use tracing::error;

/// Render one progress event with stream id `id`.
#[must_use]
pub fn render(event: &StreamEvent, id: u64) -> Event {
    let framed = Event::default().id(id.to_string()).event(event.kind.as_str());
    match framed.json_data(&event.payload) {
        Ok(framed) => framed,
        Err(e) => {
            error!(error = %e, phase = %event.payload.phase, "Progress event serialization failed");
            Event::default()
                .id(id.to_string())
                .event("error")
                .data(r#"{"phase":"error","message":"unserializable event","ok":false}"#)
        }
    }
}

/// Progress events as SSE frames with ids counting up from 1.
///
/// The stream owns `guard`: when the client goes away and the stream is
/// dropped, the operation's token is cancelled.
pub fn event_stream(
    rx: UnboundedReceiver<StreamEvent>,
    guard: DropGuard,
) -> impl Stream<Item = Result<Event, Infallible>> {
    stream::unfold((rx, 0_u64, guard), |(mut rx, last_id, guard)| async move {
        let event = rx.recv().await?;
        let id = last_id + 1;
        Some((Ok(render(&event, id)), (rx, id, guard)))
    })
}
