use std::{
    cmp::Reverse,
    collections::{BTreeMap, BinaryHeap, HashMap},
    sync::{PoisonError, RwLock, RwLockReadGuard},
};

use serde::Serialize;

use crate::email::metadata::EmailMetadata;

/// Counters folded from every ingested message. Never decremented.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    /// Sender address -> number of emails received from them
    pub from_count: HashMap<String, u64>,
    /// Recipient address -> number of emails sent to them
    pub to_count: HashMap<String, u64>,
    /// Sender address -> cumulative size estimate in bytes
    pub from_size: HashMap<String, i64>,
    /// `YYYY-MM-DD` -> number of emails
    pub date_count: BTreeMap<String, u64>,
    pub total_emails: u64,
    pub failed_emails: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SenderSummary {
    pub address: String,
    pub count: u64,
    pub total_bytes: i64,
}

#[derive(Debug, Default)]
pub struct EmailStats {
    inner: RwLock<StatsSnapshot>,
}

impl EmailStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, metadata: &EmailMetadata) {
        let day = metadata.day_key();
        let mut stats = self.inner.write().unwrap_or_else(PoisonError::into_inner);

        *stats.from_count.entry(metadata.from.clone()).or_default() += 1;
        *stats.from_size.entry(metadata.from.clone()).or_default() += metadata.size_estimate;
        for to in &metadata.to {
            *stats.to_count.entry(to.clone()).or_default() += 1;
        }
        if let Some(day) = day {
            *stats.date_count.entry(day).or_default() += 1;
        }
        stats.total_emails += 1;
    }

    /// A message that was listed but could not be fetched
    pub fn record_failure(&self) {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .failed_emails += 1;
    }

    /// Highest-count senders first, at most `n`. Tie order is unspecified.
    pub fn top_senders(&self, n: usize) -> Vec<SenderSummary> {
        if n == 0 {
            return Vec::new();
        }

        let stats = self.read();
        let mut heap = BinaryHeap::with_capacity(n + 1);
        for (address, &count) in &stats.from_count {
            heap.push(Reverse((count, address.as_str())));
            if heap.len() > n {
                heap.pop();
            }
        }

        heap.into_sorted_vec()
            .into_iter()
            .map(|Reverse((count, address))| SenderSummary {
                address: address.to_string(),
                count,
                total_bytes: stats.from_size.get(address).copied().unwrap_or_default(),
            })
            .collect()
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        self.read().clone()
    }

    pub fn total_processed(&self) -> u64 {
        self.read().total_emails
    }

    pub fn failed(&self) -> u64 {
        self.read().failed_emails
    }

    fn read(&self) -> RwLockReadGuard<'_, StatsSnapshot> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }
}
