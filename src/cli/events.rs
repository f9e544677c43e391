//! `gantry events`: print a server's event stream

use anyhow::{Context, Result};
use gantry_core::{wait_for_shutdown_signal, Event};
use gantry_stream::StreamError;
use tracing::{info, warn};

/// One output line per event: the wire tag, then the payload JSON.
fn render(event: &Event) -> Result<String> {
    let payload = event
        .payload_json()
        .context("Failed to encode event payload")?;
    Ok(format!("{} {}", event.event_type(), payload))
}

/// Follow the stream at `url` until it ends or Ctrl+C.
pub async fn run(url: &str) -> Result<()> {
    let client = reqwest::Client::new();
    let mut reader = gantry_stream::connect(&client, url)
        .await
        .with_context(|| format!("Failed to connect to {url}"))?;
    info!(url, "Following event stream");

    let stop = wait_for_shutdown_signal();
    tokio::pin!(stop);

    loop {
        tokio::select! {
            _ = &mut stop => {
                reader.close();
                return Ok(());
            }
            next = reader.next() => match next {
                Ok(event) => println!("{}", render(&event)?),
                Err(StreamError::Closed) => {
                    info!("Event stream closed by server");
                    return Ok(());
                }
                Err(
                    e @ (StreamError::UnknownEventType(_) | StreamError::InvalidPayload { .. }),
                ) => {
                    warn!(error = %e, "Skipping undecodable event");
                }
                Err(e) => return Err(e).context("Event stream failed"),
            },
        }
    }
}
