use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use anyhow::{anyhow, bail};
use axum::async_trait;
use google_gmail1::api::{Message, MessagePart, MessagePartHeader};

use crate::{
    auth::credential::Credential,
    email::{
        client::GmailApiErrorDetail,
        mailbox::{MailboxConnector, MailboxSource, MessagePage},
    },
    state::inbox_processor::{InboxProcessor, ProcessorProgress},
};

pub const TEST_DATE: &str = "Mon, 2 Jan 2006 15:04:05 -0700";

/// In-memory mailbox. Pages are cut by the requested page size and addressed
/// by tokens `p2`, `p3`, ...
#[derive(Clone, Default)]
pub struct FakeMailbox {
    messages: Vec<Message>,
    failing_messages: HashSet<String>,
    failing_pages: HashSet<String>,
    delay: Option<Duration>,
    message_delays: HashMap<String, Duration>,
    page_tokens: Arc<Mutex<Vec<Option<String>>>>,
    events: Arc<Mutex<Vec<String>>>,
    trashed: Arc<Mutex<Vec<String>>>,
}

impl FakeMailbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_message(mut self, id: &str, from: &str, to: &str, size: i32) -> Self {
        let header = |name: &str, value: &str| MessagePartHeader {
            name: Some(name.to_string()),
            value: Some(value.to_string()),
        };

        self.messages.push(Message {
            id: Some(id.to_string()),
            thread_id: Some(format!("thread-{id}")),
            label_ids: Some(vec!["INBOX".to_string()]),
            snippet: Some(format!("snippet for {id}")),
            size_estimate: Some(size),
            payload: Some(MessagePart {
                headers: Some(vec![
                    header("From", from),
                    header("To", to),
                    header("Subject", &format!("Subject {id}")),
                    header("Date", TEST_DATE),
                ]),
                ..Default::default()
            }),
            ..Default::default()
        });
        self
    }

    pub fn failing_message(mut self, id: &str) -> Self {
        self.failing_messages.insert(id.to_string());
        self
    }

    pub fn failing_page(mut self, token: &str) -> Self {
        self.failing_pages.insert(token.to_string());
        self
    }

    /// Every call sleeps this long before answering
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Fetching this message sleeps for `delay` instead of the shared delay
    pub fn with_message_delay(mut self, id: &str, delay: Duration) -> Self {
        self.message_delays.insert(id.to_string(), delay);
        self
    }

    /// Page tokens of every listing call so far, in call order
    pub fn page_tokens(&self) -> Vec<Option<String>> {
        self.page_tokens.lock().unwrap().clone()
    }

    /// `list:<token>` when a listing starts and `done:<id>` when a fetch
    /// returns, in the order they happened
    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    pub fn trashed(&self) -> Vec<String> {
        self.trashed.lock().unwrap().clone()
    }

    async fn pause(&self) {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl MailboxSource for FakeMailbox {
    async fn list_messages(
        &self,
        page_token: Option<String>,
        page_size: u32,
    ) -> anyhow::Result<MessagePage> {
        self.page_tokens.lock().unwrap().push(page_token.clone());
        self.events
            .lock()
            .unwrap()
            .push(format!("list:{:?}", page_token));
        self.pause().await;

        let page_index = match &page_token {
            None => 0,
            Some(token) if self.failing_pages.contains(token) => bail!("listing {token} failed"),
            Some(token) => token.trim_start_matches('p').parse::<usize>()? - 1,
        };

        let page_size = page_size as usize;
        let start = page_index * page_size;
        let ids = self
            .messages
            .iter()
            .skip(start)
            .take(page_size)
            .filter_map(|m| m.id.clone())
            .collect();
        let next_page_token =
            (start + page_size < self.messages.len()).then(|| format!("p{}", page_index + 2));

        Ok(MessagePage {
            ids,
            next_page_token,
        })
    }

    async fn get_message(&self, message_id: &str) -> anyhow::Result<Message> {
        match self.message_delays.get(message_id) {
            Some(delay) => tokio::time::sleep(*delay).await,
            None => self.pause().await,
        }
        self.events
            .lock()
            .unwrap()
            .push(format!("done:{message_id}"));

        if self.failing_messages.contains(message_id) {
            bail!("fetching {message_id} failed");
        }

        self.messages
            .iter()
            .find(|m| m.id.as_deref() == Some(message_id))
            .cloned()
            .ok_or_else(|| anyhow!("message {message_id} not found"))
    }

    async fn trash_message(&self, message_id: &str) -> anyhow::Result<()> {
        if !self
            .messages
            .iter()
            .any(|m| m.id.as_deref() == Some(message_id))
        {
            return Err(GmailApiErrorDetail {
                code: 404,
                message: "Requested entity was not found.".to_string(),
                status: Some("NOT_FOUND".to_string()),
            }
            .into());
        }

        self.trashed.lock().unwrap().push(message_id.to_string());
        Ok(())
    }
}

/// Connector that hands every credential the same fake mailbox
#[derive(Clone, Default)]
pub struct FakeConnector {
    mailbox: FakeMailbox,
    connections: Arc<AtomicUsize>,
}

impl FakeConnector {
    pub fn new(mailbox: FakeMailbox) -> Self {
        Self {
            mailbox,
            connections: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

impl MailboxConnector for FakeConnector {
    fn connect(&self, _credential: &Credential) -> Arc<dyn MailboxSource> {
        self.connections.fetch_add(1, Ordering::SeqCst);
        Arc::new(self.mailbox.clone())
    }
}

pub async fn wait_until_idle(processor: &InboxProcessor) -> ProcessorProgress {
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let progress = processor.progress();
            if !progress.is_running {
                return progress;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("processor did not finish in time")
}
