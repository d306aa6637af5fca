use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::async_trait;
use google_gmail1::api::{ListMessagesResponse, Message};
use leaky_bucket::RateLimiter;
use lib_email_clients::gmail::api_quota::{GMAIL_API_QUOTA, GMAIL_QUOTA_PER_SECOND};
use derive_more::Display;
use serde::de::DeserializeOwned;

use crate::{auth::credential::Credential, HttpClient};

use super::mailbox::{MailboxConnector, MailboxSource, MessagePage};

/// Gmail API error response structure
#[derive(Debug, Clone, serde::Deserialize)]
pub struct GmailApiError {
    pub error: GmailApiErrorDetail,
}

#[derive(Debug, Clone, Display, serde::Deserialize)]
#[display("Gmail API error {code}: {message}")]
pub struct GmailApiErrorDetail {
    pub code: u16,
    pub message: String,
    #[serde(default)]
    pub status: Option<String>,
}

impl std::error::Error for GmailApiErrorDetail {}

macro_rules! gmail_url {
    ($($params:expr),*) => {
        {
            const GMAIL_ENDPOINT: &str = "https://www.googleapis.com/gmail/v1/users/me";
            let list_params = vec![$($params),*];
            let path = list_params.join("/");
            format!("{}/{}", GMAIL_ENDPOINT, path)
        }
    };
}

pub const MAX_MESSAGES_PER_PAGE: u32 = 500;

#[derive(Debug, Clone)]
pub struct EmailClient {
    http_client: HttpClient,
    access_token: String,
    rate_limiter: Arc<RateLimiter>,
}

impl EmailClient {
    pub fn new(http_client: HttpClient, credential: &Credential) -> EmailClient {
        let rate_limiter = Arc::new(
            RateLimiter::builder()
                .initial(GMAIL_QUOTA_PER_SECOND)
                .interval(Duration::from_secs(1))
                .refill(GMAIL_QUOTA_PER_SECOND)
                .max(GMAIL_QUOTA_PER_SECOND)
                .build(),
        );

        EmailClient {
            http_client,
            access_token: credential.access_token.clone(),
            rate_limiter,
        }
    }

    pub async fn get_message_list(
        &self,
        page_token: Option<String>,
        max_results: u32,
    ) -> anyhow::Result<ListMessagesResponse> {
        self.rate_limiter
            .acquire(GMAIL_API_QUOTA.messages_list)
            .await;

        let max_results = max_results.clamp(1, MAX_MESSAGES_PER_PAGE);
        let mut query = vec![("maxResults".to_string(), max_results.to_string())];
        if let Some(token) = page_token {
            query.push(("pageToken".to_string(), token));
        }

        let resp = self
            .http_client
            .get(gmail_url!("messages"))
            .query(&query)
            .bearer_auth(&self.access_token)
            .send()
            .await?;

        parse_response(resp)
            .await
            .context("Error listing messages")
    }

    pub async fn get_message_by_id(&self, message_id: &str) -> anyhow::Result<Message> {
        self.rate_limiter
            .acquire(GMAIL_API_QUOTA.messages_get)
            .await;
        let id = message_id;
        let resp = self
            .http_client
            .get(gmail_url!("messages", id))
            .bearer_auth(&self.access_token)
            .query(&[("format", "full")])
            .send()
            .await?;

        parse_response(resp)
            .await
            .with_context(|| format!("Error getting message {message_id}"))
    }

    pub async fn trash_email(&self, message_id: &str) -> anyhow::Result<()> {
        self.rate_limiter
            .acquire(GMAIL_API_QUOTA.messages_trash)
            .await;
        let resp = self
            .http_client
            .post(gmail_url!("messages", message_id, "trash"))
            .bearer_auth(&self.access_token)
            .send()
            .await?;

        parse_response::<Message>(resp)
            .await
            .with_context(|| format!("Error trashing message {message_id}"))?;
        Ok(())
    }
}

async fn parse_response<T: DeserializeOwned>(resp: reqwest::Response) -> anyhow::Result<T> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        let error = match serde_json::from_str::<GmailApiError>(&body) {
            Ok(GmailApiError { error }) => error,
            Err(_) => GmailApiErrorDetail {
                code: status.as_u16(),
                message: body,
                status: None,
            },
        };
        return Err(error.into());
    }

    Ok(resp.json::<T>().await?)
}

#[async_trait]
impl MailboxSource for EmailClient {
    async fn list_messages(
        &self,
        page_token: Option<String>,
        page_size: u32,
    ) -> anyhow::Result<MessagePage> {
        self.get_message_list(page_token, page_size)
            .await
            .map(MessagePage::from)
    }

    async fn get_message(&self, message_id: &str) -> anyhow::Result<Message> {
        self.get_message_by_id(message_id).await
    }

    async fn trash_message(&self, message_id: &str) -> anyhow::Result<()> {
        self.trash_email(message_id).await
    }
}

/// Hands out one [`EmailClient`] per credential over a shared HTTP client.
#[derive(Clone)]
pub struct GmailConnector {
    http_client: HttpClient,
}

impl GmailConnector {
    pub fn new(http_client: HttpClient) -> Self {
        Self { http_client }
    }
}

impl MailboxConnector for GmailConnector {
    fn connect(&self, credential: &Credential) -> Arc<dyn MailboxSource> {
        Arc::new(EmailClient::new(self.http_client.clone(), credential))
    }
}
