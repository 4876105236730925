// VRChat pipeline websocket: friend events in, stored locations out.

use chrono::Utc;
use futures_util::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::connect_async;

use super::vrchat_client::VrchatClient;
use crate::core::errors::{BotError, BotResult};
use crate::core::vrchat::{
    parse_pipeline_message, AccountStore, FriendLocationService, LocationStore, LocationUpdate,
};

const PIPELINE_URL: &str = "wss://pipeline.vrchat.cloud/";
const INITIAL_BACKOFF: Duration = Duration::from_secs(5);
const MAX_BACKOFF: Duration = Duration::from_secs(60);

fn next_backoff(current: Duration) -> Duration {
    (current * 2).min(MAX_BACKOFF)
}

/// Run forever, reconnecting with exponential backoff.
pub async fn run_pipeline<A, L>(client: Arc<VrchatClient>, locations: Arc<FriendLocationService<A, L>>)
where
    A: AccountStore,
    L: LocationStore,
{
    let mut backoff = INITIAL_BACKOFF;
    loop {
        match connect_once(&client, &locations).await {
            Ok(received) => {
                tracing::warn!(received, "VRChat pipeline closed, reconnecting");
                if received > 0 {
                    backoff = INITIAL_BACKOFF;
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, retry_in = ?backoff, "VRChat pipeline failed");
                client.invalidate_session().await;
            }
        }
        sleep(backoff).await;
        backoff = next_backoff(backoff);
    }
}

/// One connection lifetime. Returns how many frames were handled.
async fn connect_once<A, L>(
    client: &VrchatClient,
    locations: &FriendLocationService<A, L>,
) -> BotResult<usize>
where
    A: AccountStore,
    L: LocationStore,
{
    let token = client.auth_token().await?;
    let mut request = format!("{}?authToken={}", PIPELINE_URL, token)
        .into_client_request()
        .map_err(|e| BotError::vrchat("PIPELINE_CONNECT_FAILED", e.to_string()))?;
    request.headers_mut().insert(
        "User-Agent",
        HeaderValue::from_static("ShieldBot/0.2 (discord bot)"),
    );

    let (mut stream, _) = connect_async(request)
        .await
        .map_err(|e| BotError::vrchat("PIPELINE_CONNECT_FAILED", e.to_string()))?;
    tracing::info!("Connected to VRChat pipeline");

    let mut received = 0;
    while let Some(frame) = stream.next().await {
        let frame =
            frame.map_err(|e| BotError::vrchat("PIPELINE_READ_FAILED", e.to_string()))?;
        let text = match frame {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };
        received += 1;

        let event = match parse_pipeline_message(text.as_str()) {
            Ok(Some(event)) => event,
            Ok(None) => continue,
            Err(e) => {
                tracing::debug!(error = %e, "Skipping malformed pipeline frame");
                continue;
            }
        };

        match locations.apply(&event, Utc::now()).await {
            Ok(LocationUpdate::Stored(location)) => {
                tracing::debug!(vrchat_user_id = %location.vrchat_user_id, "Stored friend location");
            }
            Ok(LocationUpdate::Ignored) => {}
            Err(e) => tracing::warn!(error = %e, "Failed to apply pipeline event"),
        }
    }

    Ok(received)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_and_caps() {
        let mut backoff = INITIAL_BACKOFF;
        let mut seen = vec![backoff.as_secs()];
        for _ in 0..5 {
            backoff = next_backoff(backoff);
            seen.push(backoff.as_secs());
        }
        assert_eq!(seen, vec![5, 10, 20, 40, 60, 60]);
    }
}
