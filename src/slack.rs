use reqwest::Client;
use serde_json::json;
use tracing::{error, info};

use crate::TARGET_WEB_REQUEST;

/// Posts a two-block message (headline + detail) to a Slack channel.
///
/// Returns whether Slack accepted the message; failures are logged, never raised.
pub async fn send_to_slack(headline: &str, detail: &str, slack_token: &str, slack_channel: &str) -> bool {
    let client = Client::new();
    let payload = json!({
        "channel": slack_channel,
        "blocks": [
            {
                "type": "section",
                "text": {
                    "type": "mrkdwn",
                    "text": format!("*{}*", headline)
                }
            },
            {
                "type": "section",
                "text": {
                    "type": "mrkdwn",
                    "text": detail
                }
            }
        ],
        "unfurl_links": false,
        "unfurl_media": false,
    });

    info!(target: TARGET_WEB_REQUEST, "Sending Slack notification with payload: {}", payload);
    let res = client
        .post("https://slack.com/api/chat.postMessage")
        .header("Content-Type", "application/json")
        .bearer_auth(slack_token)
        .body(payload.to_string())
        .send()
        .await;

    match res {
        Ok(response) => {
            if response.status().is_success() {
                info!(target: TARGET_WEB_REQUEST, " ** Slack notification sent successfully");
                true
            } else {
                let error_text = response.text().await.unwrap_or_default();
                error!(target: TARGET_WEB_REQUEST, " !! Error sending Slack notification: {}", error_text);
                false
            }
        }
        Err(err) => {
            error!(target: TARGET_WEB_REQUEST, " !! Error sending Slack notification: {:?}", err);
            false
        }
    }
}
