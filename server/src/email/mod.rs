pub mod client;
pub mod mailbox;
pub mod metadata;
