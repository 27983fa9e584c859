//! Monitor protocol stack for PCI-Express test rig firmware.
//!
//! This crate implements the on-device side of the "monitor" protocol, a small
//! CRC protected command/response protocol which lets a host read and write
//! target memory and call functions on the target, streaming back whatever the
//! called function prints.  It also contains the host side of the same
//! protocol, for use by test automation running on a PC or debug probe.
//!
//! `no_std`.  The device side requires neither `std` nor `alloc`.  The host
//! side requires `alloc` for async traits and reply buffers.
//!
//! ## Architecture
//!
//! The device and host share a dual-port memory (DPM) window.  The window
//! contains a self-describing information block followed by two mailboxes:
//! - **Rx mailbox**: Host writes packets, device reads
//! - **Tx mailbox**: Device writes packets, host reads
//!
//! Each mailbox is a rendezvous slot, not a queue.  It holds at most one
//! message, which the writer posts by incrementing a request counter and the
//! reader releases by copying the request counter into its acknowledge
//! counter.  Each counter has exactly one writer, so no locking is required.
//!
//! On the device, packets flow like this:
//!
//! ```text
//! transport -> RingBuffer -> frame detection + CRC -> dispatch -> handler
//!                                                                   |
//! transport <-------------------- framed reply <--------------------+
//! ```
//!
//! The monitor never blocks waiting for data.  It is driven by the caller's
//! main loop, which calls [`monitor::Monitor::poll()`] repeatedly.
//!
//! ## Modules
//!
//! - [`ringbuffer`] - Bounded circular byte store feeding the packet decoder
//! - [`crc`] - The CRC16 (XMODEM) used by the wire format
//! - [`packet`] - Packet types, status codes and frame encoding/decoding
//! - [`mailbox`] - The DPM mailbox, device side and (async) host side
//! - [`transport`] - Byte transports the monitor runs over
//! - [`memory`] - The raw memory access seam used by command handlers
//! - [`monitor`] - The protocol state machines and command dispatch
//! - [`client`] - Async host client for the monitor protocol
//! - [`io`] - Async I/O traits for host access to target memory
//!
//! ## Getting Started
//!
//! **Device setup**:
//! 1. Place a 0x1100 byte region in dual-port memory, e.g. with a linker
//!    section.
//! 2. Initialize the mailbox with [`mailbox::Mailbox::init()`].
//! 3. Wrap it in a [`transport::MailboxTransport`].
//! 4. Create a [`monitor::Monitor`] with that transport and a
//!    [`memory::MemoryAccess`] implementation, typically
//!    [`memory::RawMemory`].
//! 5. Call [`monitor::Monitor::poll()`] from the main loop.
//!
//! **Host setup**:
//! 1. Implement [`io::Reader`] and [`io::Writer`] for the host's access path
//!    to the DPM window.
//! 2. Create a [`client::AsyncMonitorClient`] with the DPM base address.
//! 3. Issue reads, writes and calls.
//!
//! ## Features
//!
//! Default features:
//! - `async` - Host side mailbox access and the async monitor client
//!   (requires `alloc`).
//! - `call` - The `Execute` command, which calls a function on the target and
//!   streams its output back as `Call_Data` packets.
//!
//! Compile with `--no-default-features` for a minimal device build without
//! call support.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

#![no_std]

#[cfg(feature = "async")]
extern crate alloc;

#[cfg(test)]
extern crate std;

#[cfg(feature = "async")]
pub mod client;
pub mod crc;
#[cfg(feature = "async")]
pub mod io;
pub mod mailbox;
pub mod memory;
pub mod monitor;
pub mod packet;
pub mod ringbuffer;
pub mod transport;

#[cfg(test)]
mod testing;

use packet::Status;

/// Monitor errors
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Error {
    /// No data available
    NoData,
    /// Mailbox still holds an unacknowledged message
    Busy,
    /// Timeout waiting for the other side
    Timeout,
    /// Invalid operation
    InvalidOperation,
    /// Data does not fit into the mailbox or packet
    TooBig,
    /// Buffer too small for operation
    BufferTooSmall,
    /// I/O error
    Io,
    /// DPM window not initialized, magic cookie missing, or information
    /// block describing mailboxes outside the window
    Uninit,
    /// Address not aligned
    NotAligned,
    /// DPM information block has an incompatible version
    UnsupportedVersion,
    /// Malformed frame: bad start marker or size field
    BadFrame,
    /// Frame CRC did not match its contents
    CrcMismatch,
    /// A packet of an unexpected type was received
    UnexpectedPacket,
    /// The target answered with a non-Ok status
    Status(Status),
}

/// Type to represent the result of a monitor operation
pub type Result<T> = core::result::Result<T, Error>;
