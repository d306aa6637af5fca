use std::sync::{
    atomic::{AtomicI64, Ordering::Relaxed},
    Arc, Mutex, MutexGuard, PoisonError,
};

use anyhow::Context;
use chrono::{DateTime, Utc};
use derive_more::Display;
use futures::future::join_all;
use serde::Serialize;
use tokio::sync::watch;

use crate::email::{mailbox::MailboxSource, metadata::EmailMetadata};

use super::stats::{EmailStats, SenderSummary, StatsSnapshot};

pub const DEFAULT_PAGE_SIZE: u32 = 100;

/// InboxProcessor runs one ingestion pass over a single user's mailbox
pub struct InboxProcessor {
    pub identity_key: String,
    pub created_at: DateTime<Utc>,
    page_size: u32,
    source: Arc<dyn MailboxSource>,
    stats: EmailStats,
    run: Mutex<RunState>,
    /// Unix timestamp (seconds) of the last lookup, used for idle eviction
    last_accessed: AtomicI64,
    interrupt_channel: (
        watch::Sender<InterruptSignal>,
        watch::Receiver<InterruptSignal>,
    ),
}

#[derive(Debug, Default)]
struct RunState {
    status: ProcessorStatus,
    emails: Vec<EmailMetadata>,
    page_token: Option<String>,
    pages_processed: u64,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
}

impl InboxProcessor {
    pub fn new(identity_key: String, source: Arc<dyn MailboxSource>, page_size: u32) -> Self {
        let now = Utc::now();
        InboxProcessor {
            identity_key,
            created_at: now,
            page_size: page_size.max(1),
            source,
            stats: EmailStats::new(),
            run: Mutex::new(RunState::default()),
            last_accessed: AtomicI64::new(now.timestamp()),
            interrupt_channel: watch::channel(InterruptSignal::Run),
        }
    }

    /// Flips to running and spawns the ingestion loop. Each processor runs once.
    pub fn start(self: &Arc<Self>) -> Result<(), StartError> {
        {
            let mut run = self.lock_run();
            match run.status {
                ProcessorStatus::Idle => {}
                ProcessorStatus::Running => return Err(StartError::AlreadyRunning),
                status => return Err(StartError::Finished(status)),
            }
            run.status = ProcessorStatus::Running;
            run.started_at = Some(Utc::now());
        }

        tracing::info!("Starting inbox processing for {}", self.identity_key);
        let processor = Arc::clone(self);
        tokio::spawn(async move {
            processor.process_inbox().await;
        });

        Ok(())
    }

    async fn process_inbox(self: Arc<Self>) {
        let status = match self.run_pages().await {
            Ok(status) => status,
            Err(e) => {
                tracing::error!("Inbox processing failed for {}: {:?}", self.identity_key, e);
                ProcessorStatus::Failed
            }
        };

        {
            let mut run = self.lock_run();
            run.status = status;
            run.finished_at = Some(Utc::now());
        }

        tracing::info!(
            "Inbox processing for {} ended as {}. Total emails processed: {}, failed: {}",
            self.identity_key,
            status,
            self.stats.total_processed(),
            self.stats.failed()
        );
    }

    /// Walks the listing in cursor order. A page only advances once every
    /// message of the previous page has been handled.
    async fn run_pages(self: &Arc<Self>) -> anyhow::Result<ProcessorStatus> {
        let mut page_token = None;

        loop {
            if self.is_cancelled() {
                return Ok(ProcessorStatus::Cancelled);
            }

            let page = self
                .source
                .list_messages(page_token.clone(), self.page_size)
                .await
                .context("Failed to fetch message page")?;

            tracing::debug!(
                "Fetched page of {} messages for {}",
                page.ids.len(),
                self.identity_key
            );

            let units = page.ids.into_iter().map(|message_id| {
                let processor = Arc::clone(self);
                tokio::spawn(async move { processor.process_message(message_id).await })
            });

            for result in join_all(units).await {
                if let Err(e) = result {
                    tracing::error!("Message task for {} panicked: {:?}", self.identity_key, e);
                    self.stats.record_failure();
                }
            }

            let next_page_token = page.next_page_token.filter(|t| !t.is_empty());
            {
                let mut run = self.lock_run();
                run.pages_processed += 1;
                run.page_token.clone_from(&next_page_token);
            }

            match next_page_token {
                Some(token) => page_token = Some(token),
                None => return Ok(ProcessorStatus::Completed),
            }
        }
    }

    async fn process_message(&self, message_id: String) {
        if self.is_cancelled() {
            return;
        }

        let message = match self.source.get_message(&message_id).await {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!("Failed to fetch message {}: {:?}", message_id, e);
                self.stats.record_failure();
                return;
            }
        };

        let metadata = EmailMetadata::from_gmail_message(&message);
        self.stats.record(&metadata);
        self.lock_run().emails.push(metadata);
    }

    pub fn cancel(&self) {
        let (tx, _) = &self.interrupt_channel;
        tx.send_replace(InterruptSignal::Cancel);
    }

    pub fn is_cancelled(&self) -> bool {
        let (_, rx) = &self.interrupt_channel;
        matches!(*rx.borrow(), InterruptSignal::Cancel)
    }

    pub fn status(&self) -> ProcessorStatus {
        self.lock_run().status
    }

    pub fn is_running(&self) -> bool {
        self.status() == ProcessorStatus::Running
    }

    pub fn progress(&self) -> ProcessorProgress {
        let (status, pages_processed, started_at, finished_at) = {
            let run = self.lock_run();
            (
                run.status,
                run.pages_processed,
                run.started_at,
                run.finished_at,
            )
        };

        ProcessorProgress {
            total_processed: self.stats.total_processed(),
            failed_emails: self.stats.failed(),
            is_running: status == ProcessorStatus::Running,
            status,
            pages_processed,
            started_at,
            finished_at,
        }
    }

    pub fn top_senders(&self, n: usize) -> Vec<SenderSummary> {
        self.stats.top_senders(n)
    }

    pub fn stats_snapshot(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// A window of the collected metadata, in the order it was ingested
    pub fn emails(&self, offset: usize, limit: usize) -> EmailPage {
        let run = self.lock_run();
        EmailPage {
            total: run.emails.len(),
            offset,
            emails: run.emails.iter().skip(offset).take(limit).cloned().collect(),
        }
    }

    pub fn touch(&self) {
        self.last_accessed.store(Utc::now().timestamp(), Relaxed);
    }

    pub fn last_accessed(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.last_accessed.load(Relaxed), 0).unwrap_or(self.created_at)
    }

    fn lock_run(&self) -> MutexGuard<'_, RunState> {
        self.run.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Display, Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ProcessorStatus {
    #[default]
    Idle,
    Running,
    Completed,
    Cancelled,
    Failed,
}

impl ProcessorStatus {
    /// A fresh processor may replace one that ended this way
    pub fn is_restartable(&self) -> bool {
        matches!(self, ProcessorStatus::Cancelled | ProcessorStatus::Failed)
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum StartError {
    AlreadyRunning,
    Finished(ProcessorStatus),
}

enum InterruptSignal {
    Run,
    Cancel,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessorProgress {
    pub total_processed: u64,
    pub failed_emails: u64,
    pub is_running: bool,
    pub status: ProcessorStatus,
    pub pages_processed: u64,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailPage {
    pub total: usize,
    pub offset: usize,
    pub emails: Vec<EmailMetadata>,
}
