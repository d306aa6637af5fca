use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use anyhow::anyhow;
use chrono::Utc;

use super::processor::{InboxProcessor, ProcessorProgress, StartError, DEFAULT_PAGE_SIZE};
use crate::{auth::credential::Credential, email::mailbox::MailboxConnector};

type InboxProcessorMap = HashMap<String, Arc<InboxProcessor>>;

const DEFAULT_IDLE_TTL: Duration = Duration::from_secs(60 * 60);

/// Identity key -> most recent inbox processor for that identity
#[derive(Clone)]
pub struct ProcessorRegistry {
    connector: Arc<dyn MailboxConnector>,
    page_size: u32,
    idle_ttl: Duration,
    processors: Arc<RwLock<InboxProcessorMap>>,
}

impl ProcessorRegistry {
    pub fn builder() -> ProcessorRegistryBuilder {
        ProcessorRegistryBuilder::new()
    }

    pub fn get_or_create(&self, identity_key: &str, credential: &Credential) -> Arc<InboxProcessor> {
        self.upsert(identity_key, credential, |_| false)
    }

    /// Starts ingestion for this identity. A run in progress or one that already
    /// completed is left alone; a failed or cancelled run is replaced with a
    /// fresh processor so the caller can retry.
    pub fn start(&self, identity_key: &str, credential: &Credential) -> ProcessorProgress {
        let processor = self.upsert(identity_key, credential, |existing| {
            existing.status().is_restartable()
        });

        match processor.start() {
            Ok(()) => {}
            Err(StartError::AlreadyRunning) => {
                tracing::debug!("Processor for {} already running", identity_key);
            }
            Err(StartError::Finished(status)) => {
                tracing::debug!("Processor for {} already finished as {}", identity_key, status);
            }
        }

        processor.progress()
    }

    pub fn get(&self, identity_key: &str) -> Option<Arc<InboxProcessor>> {
        let processor = self.read().get(identity_key).cloned();
        if let Some(processor) = &processor {
            processor.touch();
        }
        processor
    }

    /// Drops the entry, cancelling its run if one is in progress
    pub fn remove(&self, identity_key: &str) -> Option<Arc<InboxProcessor>> {
        let removed = self.write().remove(identity_key);
        if let Some(processor) = &removed {
            tracing::info!("Removing processor for {}", identity_key);
            processor.cancel();
        }
        removed
    }

    /// Removes entries that are not running and have not been looked up within
    /// the idle TTL. Returns how many were evicted.
    pub fn evict_idle(&self) -> usize {
        let Some(cutoff) = chrono::Duration::from_std(self.idle_ttl)
            .ok()
            .and_then(|ttl| Utc::now().checked_sub_signed(ttl))
        else {
            return 0;
        };

        let mut processors = self.write();
        let before = processors.len();
        processors.retain(|_, proc| proc.is_running() || proc.last_accessed() > cutoff);
        before - processors.len()
    }

    pub fn get_current_state(&self) -> Option<String> {
        let processors = self.read();
        if processors.is_empty() {
            return None;
        }

        let mut display_str = format!("Active Processors:{}\n", processors.len());
        for (key, proc) in processors.iter() {
            display_str.push_str(&format!("\t{} -> {:?}\n", key, proc.progress()));
        }

        Some(display_str)
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.read().len()
    }

    fn upsert<F>(&self, identity_key: &str, credential: &Credential, replace: F) -> Arc<InboxProcessor>
    where
        F: Fn(&InboxProcessor) -> bool,
    {
        let mut processors = self.write();
        if let Some(existing) = processors.get(identity_key) {
            if !replace(existing) {
                existing.touch();
                return existing.clone();
            }
            tracing::info!(
                "Recreating processor for {} after {}",
                identity_key,
                existing.status()
            );
        }

        let processor = Arc::new(InboxProcessor::new(
            identity_key.to_string(),
            self.connector.connect(credential),
            self.page_size,
        ));
        processors.insert(identity_key.to_string(), processor.clone());
        processor
    }

    fn read(&self) -> RwLockReadGuard<'_, InboxProcessorMap> {
        self.processors.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, InboxProcessorMap> {
        self.processors.write().unwrap_or_else(PoisonError::into_inner)
    }
}

pub struct ProcessorRegistryBuilder {
    connector: Option<Arc<dyn MailboxConnector>>,
    page_size: u32,
    idle_ttl: Duration,
}

impl ProcessorRegistryBuilder {
    pub fn new() -> Self {
        Self {
            connector: None,
            page_size: DEFAULT_PAGE_SIZE,
            idle_ttl: DEFAULT_IDLE_TTL,
        }
    }

    pub fn with_connector(mut self, connector: Arc<dyn MailboxConnector>) -> Self {
        self.connector = Some(connector);
        self
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn with_idle_ttl(mut self, idle_ttl: Duration) -> Self {
        self.idle_ttl = idle_ttl;
        self
    }

    pub fn build(self) -> anyhow::Result<ProcessorRegistry> {
        let connector = self
            .connector
            .ok_or_else(|| anyhow!("mailbox connector is required"))?;
        if self.page_size == 0 {
            return Err(anyhow!("page size must be at least 1"));
        }

        Ok(ProcessorRegistry {
            connector,
            page_size: self.page_size,
            idle_ttl: self.idle_ttl,
            processors: Arc::new(RwLock::new(HashMap::new())),
        })
    }
}

impl Default for ProcessorRegistryBuilder {
    fn default() -> Self {
        Self::new()
    }
}
