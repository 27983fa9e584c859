//! Host client for the monitor protocol, over the device's DPM window:
//! - Rx mailbox: Host writes command packets, device reads
//! - Tx mailbox: Device writes replies, host reads
//!
//! See [`AsyncMonitorClient`] for async client usage, for example on a test
//! PC.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

#[cfg(feature = "async")]
pub mod futures;

#[cfg(feature = "async")]
pub use futures::{AsyncDelay, AsyncMonitorClient};

use crate::packet::{FRAME_OVERHEAD, MAX_PACKET_SIZE, MAX_SIZE_FIELD};

/// Most bytes a single `ReadArea` command can return
pub const MAX_READ_AREA: usize = MAX_PACKET_SIZE - FRAME_OVERHEAD - 1;

/// Most bytes a single `WriteArea` command can carry
pub const MAX_WRITE_AREA: usize = MAX_SIZE_FIELD - 5;

/// Configuration for creating a monitor client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorClientConfig {
    /// Base address of the DPM window in target memory
    pub dpm_base: u32,
    /// How many times to poll the mailbox, delaying in between, before
    /// giving up with [`crate::Error::Timeout`].  `None` waits forever.
    pub max_polls: Option<u32>,
}

impl MonitorClientConfig {
    /// Config for the window at `dpm_base`, waiting forever.
    pub const fn new(dpm_base: u32) -> Self {
        Self {
            dpm_base,
            max_polls: None,
        }
    }

    /// Give up after `max_polls` polls of the mailbox.
    pub const fn with_max_polls(mut self, max_polls: u32) -> Self {
        self.max_polls = Some(max_polls);
        self
    }
}
