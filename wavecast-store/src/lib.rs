//! Shared state store client for Wavecast: HTTP record access plus a
//! polling change notifier.

pub mod client;
pub mod error;
pub mod poller;

pub use client::{diff_revisions, HttpStateStore};
pub use error::StoreError;
pub use poller::StorePoller;
