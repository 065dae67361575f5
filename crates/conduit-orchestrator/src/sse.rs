//! Server-sent-event framing.

use conduit_memory::Event;

/// Frame one event as `event: NAME\ndata: JSON\n\n`.
pub fn format_event(event: &Event) -> Result<String, serde_json::Error> {
  let data = serde_json::to_string(&event.data)?;
  Ok(format!("event: {}\ndata: {}\n\n", event.name, data))
}
