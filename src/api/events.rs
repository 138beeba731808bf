//! SSE encoding of the Guardian event feed.

use crate::server::GuardianLogEntry;
use actix_web::web::Bytes;
use tokio::sync::broadcast;

/// Formats a Guardian log entry as one SSE frame
pub fn format_sse_entry(entry: &GuardianLogEntry) -> Bytes {
    let data = match serde_json::to_string(entry) {
        Ok(data) => data,
        Err(e) => {
            tracing::error!(error = %e, entry_id = entry.id, "Failed to serialize SSE event payload");
            "{}".to_string()
        }
    };

    Bytes::from(format!(
        "id: {}\nevent: {}\ndata: {}\n\n",
        entry.id,
        entry.action.as_str(),
        data
    ))
}

/// Turns a Guardian log subscription into an SSE byte stream.
///
/// Slow clients that fall behind skip the entries they missed instead of
/// being disconnected.
pub fn sse_stream(
    mut receiver: broadcast::Receiver<GuardianLogEntry>,
) -> impl futures::Stream<Item = Result<Bytes, actix_web::Error>> {
    async_stream::stream! {
        // Comment frame so clients see the stream open right away
        yield Ok::<_, actix_web::Error>(Bytes::from_static(b": connected\n\n"));
        loop {
            match receiver.recv().await {
                Ok(entry) => {
                    tracing::trace!(entry_id = entry.id, "Sending SSE event to client");
                    yield Ok(format_sse_entry(&entry));
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "SSE client lagging, events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }
}
