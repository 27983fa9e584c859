//! Rendezvous mailbox in dual-port memory (DPM).
//!
//! The DPM window has a fixed layout:
//!
//! ```text
//! 0x0000  information block (0x40 bytes, self-describing)
//! 0x0040  Rx control block  {req_count, ack_count, data_size, reserved}
//! 0x0050  Tx control block  {req_count, ack_count, data_size, reserved}
//! 0x0060  reserved (0xa0 bytes)
//! 0x0100  Rx data area (2048 bytes)
//! 0x0900  Tx data area (2048 bytes)
//! ```
//!
//! Rx and Tx are named from the device's point of view.  The host sends on
//! the Rx mailbox and receives on the Tx mailbox.
//!
//! A mailbox is `Full` while its acknowledge counter differs from its request
//! counter, and `Free` otherwise.  The sender writes the data and size first
//! and increments the request counter last; the receiver copies the request
//! counter into the acknowledge counter once it has finished with the data.
//! Counters are only ever compared for equality, so wrap-around is harmless.
//!
//! See [`sync::Mailbox`] for the device side and [`futures::AsyncMailbox`]
//! for async host access.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

#[cfg(feature = "async")]
pub mod futures;
pub mod sync;

#[cfg(feature = "async")]
pub use futures::{AsyncDpmIo, AsyncMailbox, ReaderWriterDpmIo, ReaderWriterMailbox};
pub use sync::{DpmIo, Mailbox, RamDpmIo};

use core::mem::{offset_of, size_of};

use crate::{Error, Result};

/// Magic cookie at the start of the information block
pub const DPM_MAGIC: [u8; 16] = *b"Muhkuh DPM Data ";

/// Layout version, major in the upper 16 bits
pub const DPM_VERSION: u32 = 0x0001_0000;

/// Size of each mailbox data area in bytes
pub const MAILBOX_DATA_SIZE: usize = 2048;

/// Which end of the DPM window the user of a [`Mailbox`] is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    /// Initializes the window, sends on Tx, receives on Rx
    Device,
    /// Attaches to an initialized window, sends on Rx, receives on Tx
    Host,
}

/// Derived state of one mailbox direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailboxState {
    Free,
    Full,
}

/// How long to wait for the partner to acknowledge a sent message.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum AckWait {
    /// Spin until acknowledged.  Deadlocks if the partner never acknowledges,
    /// for example because it was reset.
    #[default]
    Forever,
    /// Give up with [`Error::Timeout`] after this many polls of the counters
    Polls(u32),
}

/// Information block, 0x40 bytes.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MailboxInfo {
    pub magic: [u8; 16],
    pub version: u32,
    pub control_rx_offset: u32,
    pub control_tx_offset: u32,
    pub buffer_rx_offset: u32,
    pub buffer_tx_offset: u32,
    pub buffer_rx_size: u32,
    pub buffer_tx_size: u32,
    pub reserved: [u32; 5],
}

/// Number of u32 words in the information block
pub const INFO_WORDS: usize = size_of::<MailboxInfo>() / 4;

/// Control block for one direction, 0x10 bytes.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct MailboxControl {
    /// Incremented by the sender to post a message
    pub req_count: u32,
    /// Set to `req_count` by the receiver to release the message
    pub ack_count: u32,
    /// Size of the posted message in bytes
    pub data_size: u32,
    pub reserved: u32,
}

impl MailboxControl {
    pub const fn req_count_offset() -> u32 {
        offset_of!(MailboxControl, req_count) as u32
    }

    pub const fn ack_count_offset() -> u32 {
        offset_of!(MailboxControl, ack_count) as u32
    }

    pub const fn data_size_offset() -> u32 {
        offset_of!(MailboxControl, data_size) as u32
    }
}

/// Complete DPM window, 0x1100 bytes.  Only used for its layout; the window
/// itself is always accessed through a [`DpmIo`] implementation.
#[repr(C)]
pub struct DpmLayout {
    pub info: MailboxInfo,
    pub control_rx: MailboxControl,
    pub control_tx: MailboxControl,
    pub reserved: [u8; 0xa0],
    pub buffer_rx: [u8; MAILBOX_DATA_SIZE],
    pub buffer_tx: [u8; MAILBOX_DATA_SIZE],
}

const _: () = assert!(size_of::<MailboxInfo>() == 0x40);
const _: () = assert!(size_of::<MailboxControl>() == 0x10);
const _: () = assert!(size_of::<DpmLayout>() == 0x1100);

impl DpmLayout {
    /// Total size of the window in bytes
    pub const fn size() -> usize {
        size_of::<Self>()
    }

    pub const fn control_rx_offset() -> u32 {
        offset_of!(DpmLayout, control_rx) as u32
    }

    pub const fn control_tx_offset() -> u32 {
        offset_of!(DpmLayout, control_tx) as u32
    }

    pub const fn buffer_rx_offset() -> u32 {
        offset_of!(DpmLayout, buffer_rx) as u32
    }

    pub const fn buffer_tx_offset() -> u32 {
        offset_of!(DpmLayout, buffer_tx) as u32
    }
}

impl MailboxInfo {
    /// The information block describing [`DpmLayout`].
    pub const fn for_layout() -> Self {
        Self {
            magic: DPM_MAGIC,
            version: DPM_VERSION,
            control_rx_offset: DpmLayout::control_rx_offset(),
            control_tx_offset: DpmLayout::control_tx_offset(),
            buffer_rx_offset: DpmLayout::buffer_rx_offset(),
            buffer_tx_offset: DpmLayout::buffer_tx_offset(),
            buffer_rx_size: MAILBOX_DATA_SIZE as u32,
            buffer_tx_size: MAILBOX_DATA_SIZE as u32,
            reserved: [0; 5],
        }
    }

    /// Serialize as little-endian words, in memory order.
    pub fn to_words(&self) -> [u32; INFO_WORDS] {
        let mut words = [0u32; INFO_WORDS];
        for (word, chunk) in words.iter_mut().zip(self.magic.chunks_exact(4)) {
            *word = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }
        words[4] = self.version;
        words[5] = self.control_rx_offset;
        words[6] = self.control_tx_offset;
        words[7] = self.buffer_rx_offset;
        words[8] = self.buffer_tx_offset;
        words[9] = self.buffer_rx_size;
        words[10] = self.buffer_tx_size;
        words[11..].copy_from_slice(&self.reserved);
        words
    }

    /// Parse an information block read from the window, checking the magic
    /// cookie, the major version, and that the mailboxes it describes lie
    /// inside the window.
    pub fn from_words(words: &[u32; INFO_WORDS]) -> Result<Self> {
        let mut magic = [0u8; 16];
        for (chunk, word) in magic.chunks_exact_mut(4).zip(words.iter()) {
            chunk.copy_from_slice(&word.to_le_bytes());
        }
        if magic != DPM_MAGIC {
            return Err(Error::Uninit);
        }
        if words[4] >> 16 != DPM_VERSION >> 16 {
            return Err(Error::UnsupportedVersion);
        }

        // Every area must lie inside the window
        let control = size_of::<MailboxControl>() as u32;
        let areas = [
            (words[5], control),
            (words[6], control),
            (words[7], words[9]),
            (words[8], words[10]),
        ];
        for (offset, size) in areas {
            if offset as u64 + size as u64 > DpmLayout::size() as u64 {
                return Err(Error::Uninit);
            }
        }

        let mut reserved = [0u32; 5];
        reserved.copy_from_slice(&words[11..]);
        Ok(Self {
            magic,
            version: words[4],
            control_rx_offset: words[5],
            control_tx_offset: words[6],
            buffer_rx_offset: words[7],
            buffer_tx_offset: words[8],
            buffer_rx_size: words[9],
            buffer_tx_size: words[10],
            reserved,
        })
    }

    /// Resolve the send and receive directions for `side`, relative to the
    /// window at `base_addr`.
    fn directions(&self, side: Side, base_addr: u32) -> Result<(Direction, Direction)> {
        let rx = Direction::new(
            base_addr,
            self.control_rx_offset,
            self.buffer_rx_offset,
            self.buffer_rx_size,
        )?;
        let tx = Direction::new(
            base_addr,
            self.control_tx_offset,
            self.buffer_tx_offset,
            self.buffer_tx_size,
        )?;
        Ok(match side {
            Side::Device => (tx, rx),
            Side::Host => (rx, tx),
        })
    }
}

/// Absolute addresses of one mailbox direction
#[derive(Debug, Clone, Copy, PartialEq)]
struct Direction {
    control: u32,
    buffer: u32,
    capacity: usize,
}

impl Direction {
    fn new(base_addr: u32, control_offset: u32, buffer_offset: u32, size: u32) -> Result<Self> {
        let control = base_addr.wrapping_add(control_offset);
        let buffer = base_addr.wrapping_add(buffer_offset);
        check_base_addr(control)?;
        check_base_addr(buffer)?;
        Ok(Self {
            control,
            buffer,
            capacity: size as usize,
        })
    }

    fn req_count_addr(&self) -> u32 {
        self.control + MailboxControl::req_count_offset()
    }

    fn ack_count_addr(&self) -> u32 {
        self.control + MailboxControl::ack_count_offset()
    }

    fn data_size_addr(&self) -> u32 {
        self.control + MailboxControl::data_size_offset()
    }
}

// Helper functions

fn check_base_addr(addr: u32) -> Result<()> {
    if addr % 4 != 0 {
        Err(Error::NotAligned)
    } else {
        Ok(())
    }
}

fn check_send_size(len: usize, dir: &Direction) -> Result<()> {
    if len > dir.capacity {
        Err(Error::TooBig)
    } else {
        Ok(())
    }
}

/// Pack up to 4 bytes into a little-endian word, zero padded.
fn pack_word(bytes: &[u8]) -> u32 {
    bytes
        .iter()
        .enumerate()
        .fold(0u32, |word, (i, &byte)| word | ((byte as u32) << (i * 8)))
}

/// Copy the bytes of the word at `word_addr` which fall inside
/// `[start, start + dst.len())` into `dst`.
fn unpack_word(word_addr: u32, word: u32, start: u32, dst: &mut [u8]) {
    for (i, byte) in word.to_le_bytes().iter().enumerate() {
        let addr = word_addr + i as u32;
        if addr >= start {
            if let Some(slot) = dst.get_mut((addr - start) as usize) {
                *slot = *byte;
            }
        }
    }
}
