use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::models::{DeliveryAddress, SubscriberId};
use crate::notify::Messenger;

const DISCORD_API_URL: &str = "https://discord.com/api/v10";

/// Discord rejects message content above this many characters.
const MESSAGE_LIMIT: usize = 2000;

#[derive(Debug, Serialize)]
struct CreateDmRequest {
    recipient_id: String,
}

#[derive(Debug, Deserialize)]
struct DmChannel {
    id: String,
}

#[derive(Debug, Serialize)]
struct CreateMessageRequest<'a> {
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
}

/// Discord's `message` field when the body is a JSON error, else the raw body.
fn error_message(body: String) -> String {
    serde_json::from_str::<ApiError>(&body)
        .map(|e| e.message)
        .unwrap_or(body)
}

/// Delivers notifications as Discord direct messages through the REST API.
pub struct DiscordMessenger {
    client: Client,
    bot_token: String,
    api_url: String,
}

impl DiscordMessenger {
    pub fn new(bot_token: String) -> Result<Self> {
        Self::with_api_url(bot_token, DISCORD_API_URL)
    }

    pub fn with_api_url(bot_token: String, api_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent("thread-watch/1.0")
            .build()?;
        Ok(Self {
            client,
            bot_token,
            api_url: api_url.trim_end_matches('/').to_string(),
        })
    }

    fn authorization(&self) -> String {
        format!("Bot {}", self.bot_token)
    }
}

#[async_trait]
impl Messenger for DiscordMessenger {
    async fn resolve(&self, subscriber: SubscriberId) -> Result<Option<DeliveryAddress>> {
        let response = self
            .client
            .post(format!("{}/users/@me/channels", self.api_url))
            .header("Authorization", self.authorization())
            .json(&CreateDmRequest {
                recipient_id: subscriber.to_string(),
            })
            .send()
            .await?;

        match response.status() {
            StatusCode::NOT_FOUND | StatusCode::FORBIDDEN | StatusCode::BAD_REQUEST => {
                tracing::debug!("Discord user {} is not reachable: {}", subscriber, response.status());
                return Ok(None);
            }
            status if !status.is_success() => {
                let error_text = error_message(response.text().await?);
                return Err(AppError::Messaging(format!("API error {}: {}", status, error_text)));
            }
            _ => {}
        }

        let channel: DmChannel = response.json().await?;
        Ok(Some(DeliveryAddress(channel.id)))
    }

    async fn send(&self, address: &DeliveryAddress, text: &str) -> Result<()> {
        for chunk in split_message(text, MESSAGE_LIMIT) {
            let response = self
                .client
                .post(format!("{}/channels/{}/messages", self.api_url, address))
                .header("Authorization", self.authorization())
                .json(&CreateMessageRequest { content: &chunk })
                .send()
                .await?;

            if !response.status().is_success() {
                let status = response.status();
                let error_text = error_message(response.text().await?);
                return Err(AppError::Messaging(format!("API error {}: {}", status, error_text)));
            }
        }
        Ok(())
    }
}

/// Split `text` into chunks of at most `limit` characters, preferring line breaks.
pub fn split_message(text: &str, limit: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for line in text.lines() {
        let line_len = line.chars().count();

        if line_len > limit {
            if !current.is_empty() {
                chunks.push(std::mem::take(&mut current));
                current_len = 0;
            }
            let chars: Vec<char> = line.chars().collect();
            chunks.extend(chars.chunks(limit).map(|c| c.iter().collect::<String>()));
            continue;
        }

        let needed = if current.is_empty() { line_len } else { line_len + 1 };
        if current_len + needed > limit {
            chunks.push(std::mem::take(&mut current));
            current_len = 0;
        }
        if !current.is_empty() {
            current.push('\n');
            current_len += 1;
        }
        current.push_str(line);
        current_len += line_len;
    }

    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::serve_static;

    #[test]
    fn short_messages_stay_whole() {
        assert_eq!(split_message("a\nb", 2000), vec!["a\nb".to_string()]);
        assert!(split_message("", 2000).is_empty());
    }

    #[test]
    fn long_messages_split_on_lines() {
        let text = "aaaa\nbbbb\ncccc";
        assert_eq!(
            split_message(text, 9),
            vec!["aaaa\nbbbb".to_string(), "cccc".to_string()]
        );
    }

    #[test]
    fn oversized_lines_are_hard_split() {
        let chunks = split_message("abcdefgh\nxy", 3);
        assert_eq!(chunks, vec!["abc", "def", "gh", "xy"]);
        assert!(chunks.iter().all(|c| c.chars().count() <= 3));
    }

    #[test]
    fn api_errors_surface_their_message() {
        assert_eq!(
            error_message(r#"{"message":"Cannot send messages to this user","code":50007}"#.into()),
            "Cannot send messages to this user"
        );
        assert_eq!(error_message("Bad Gateway".into()), "Bad Gateway");
    }

    #[tokio::test]
    async fn resolve_reads_channel_id() {
        let api = serve_static(200, r#"{"id":"555","type":1}"#).await;
        let messenger = DiscordMessenger::with_api_url("token".into(), &api).unwrap();
        assert_eq!(
            messenger.resolve(42).await.unwrap(),
            Some(DeliveryAddress("555".to_string()))
        );
    }

    #[tokio::test]
    async fn unknown_user_resolves_to_none() {
        let api = serve_static(404, r#"{"message":"Unknown User"}"#).await;
        let messenger = DiscordMessenger::with_api_url("token".into(), &api).unwrap();
        assert_eq!(messenger.resolve(42).await.unwrap(), None);
    }

    #[tokio::test]
    async fn rejected_send_is_an_error() {
        let api = serve_static(500, "boom").await;
        let messenger = DiscordMessenger::with_api_url("token".into(), &api).unwrap();
        let result = messenger
            .send(&DeliveryAddress("555".to_string()), "hello")
            .await;
        assert!(matches!(result, Err(AppError::Messaging(_))));
    }
}
