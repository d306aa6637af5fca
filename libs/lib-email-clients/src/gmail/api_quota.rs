//! Gmail API quota units.
//!
//! Gmail meters each user at 250 quota units per second, and every method
//! costs a fixed number of units. A rate limiter refilled with
//! [`GMAIL_QUOTA_PER_SECOND`] each second and drained by the per-method cost
//! keeps a single mailbox inside its budget.

pub const GMAIL_QUOTA_PER_SECOND: usize = 250;

#[derive(Debug, Clone, Copy)]
pub struct GmailApiQuota {
    pub messages_list: usize,
    pub messages_get: usize,
    pub messages_trash: usize,
}

pub const GMAIL_API_QUOTA: GmailApiQuota = GmailApiQuota {
    messages_list: 5,
    messages_get: 5,
    messages_trash: 5,
};
