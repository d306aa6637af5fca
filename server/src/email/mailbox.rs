use std::sync::Arc;

use axum::async_trait;
use google_gmail1::api::{ListMessagesResponse, Message};

use crate::auth::credential::Credential;

/// One page of message ids from the remote listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessagePage {
    pub ids: Vec<String>,
    /// `None` (or an empty token from the provider) means this is the last page
    pub next_page_token: Option<String>,
}

impl From<ListMessagesResponse> for MessagePage {
    fn from(resp: ListMessagesResponse) -> Self {
        MessagePage {
            ids: resp
                .messages
                .unwrap_or_default()
                .into_iter()
                .filter_map(|m| m.id)
                .collect(),
            next_page_token: resp.next_page_token.filter(|t| !t.is_empty()),
        }
    }
}

/// The two provider operations ingestion needs.
#[async_trait]
pub trait MailboxSource: Send + Sync {
    async fn list_messages(
        &self,
        page_token: Option<String>,
        page_size: u32,
    ) -> anyhow::Result<MessagePage>;

    /// Full format message, headers included
    async fn get_message(&self, message_id: &str) -> anyhow::Result<Message>;

    async fn trash_message(&self, message_id: &str) -> anyhow::Result<()>;
}

/// Builds a [`MailboxSource`] bound to one caller's credential.
pub trait MailboxConnector: Send + Sync {
    fn connect(&self, credential: &Credential) -> Arc<dyn MailboxSource>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_page_from_list_response() {
        let resp = ListMessagesResponse {
            messages: Some(vec![
                Message {
                    id: Some("a".to_string()),
                    ..Default::default()
                },
                Message::default(),
                Message {
                    id: Some("b".to_string()),
                    ..Default::default()
                },
            ]),
            next_page_token: Some(String::new()),
            ..Default::default()
        };

        let page = MessagePage::from(resp);
        assert_eq!(page.ids, vec!["a", "b"]);
        assert_eq!(page.next_page_token, None);

        let empty = MessagePage::from(ListMessagesResponse::default());
        assert!(empty.ids.is_empty());
    }
}
