//! Asynchronous Mailbox - typically used by a Host.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

use alloc::boxed::Box;
use alloc::vec;
use async_trait::async_trait;
#[allow(unused_imports)]
use log::{debug, trace};

use crate::io::{Reader, Writer};
use crate::mailbox::{
    Direction, INFO_WORDS, MailboxInfo, MailboxState, Side, check_base_addr, check_send_size,
    pack_word, unpack_word,
};
use crate::{Error, Result};

/// Trait for accessing the DPM window.
///
/// Async version, typically used for accessing the window over PCI-Express,
/// SWD or other asynchronous paths.
#[async_trait(?Send)]
pub trait AsyncDpmIo {
    /// Atomic read u32 operation
    async fn read_u32(&mut self, addr: u32) -> Result<u32>;

    /// Atomic write u32 operation
    async fn write_u32(&mut self, addr: u32, value: u32) -> Result<()>;

    /// Bulk read access, no need for atomicity
    async fn read_bulk(&mut self, addr: u32, buf: &mut [u32]) -> Result<()>;

    /// Bulk write access, no need for atomicity
    async fn write_bulk(&mut self, addr: u32, data: &[u32]) -> Result<()>;
}

/// Asynchronous mailbox pair, host side
pub struct AsyncMailbox<'a, I: AsyncDpmIo> {
    io: &'a mut I,
    base_addr: u32,
    send: Direction,
    recv: Direction,
}

impl<'a, I: AsyncDpmIo> AsyncMailbox<'a, I> {
    /// Attach to the DPM window initialized by the device.
    ///
    /// Arguments:
    /// - `io` - Object implementing [`AsyncDpmIo`] trait to access the window
    /// - `base_addr` - Base address of the window
    ///
    /// Fails with [`Error::Uninit`] if the device has not (yet) initialized
    /// the window.
    pub async fn attach(io: &'a mut I, base_addr: u32) -> Result<Self> {
        check_base_addr(base_addr)?;

        let mut words = [0u32; INFO_WORDS];
        io.read_bulk(base_addr, &mut words).await?;
        let info = MailboxInfo::from_words(&words)?;
        let (send, recv) = info.directions(Side::Host, base_addr)?;

        trace!(
            "Attached to DPM mailbox at {base_addr:#010X} version {:#010X}",
            info.version
        );

        Ok(Self {
            io,
            base_addr,
            send,
            recv,
        })
    }

    /// Base address of the DPM window
    pub fn base_addr(&self) -> u32 {
        self.base_addr
    }

    /// Largest message which can be sent
    pub fn send_capacity(&self) -> usize {
        self.send.capacity
    }

    /// Post a message to the device.
    ///
    /// Fails with [`Error::TooBig`] or [`Error::Busy`] without touching the
    /// window.
    pub async fn send_data(&mut self, data: &[u8]) -> Result<()> {
        check_send_size(data.len(), &self.send)?;

        // Check availability
        if self.send_state().await? == MailboxState::Full {
            return Err(Error::Busy);
        }

        // Pack the payload and write it in one go
        let mut words = vec![0u32; data.len().div_ceil(4)];
        for (word, chunk) in words.iter_mut().zip(data.chunks(4)) {
            *word = pack_word(chunk);
        }
        self.io.write_bulk(self.send.buffer, &words).await?;

        // Size before publishing
        self.io
            .write_u32(self.send.data_size_addr(), data.len() as u32)
            .await?;

        // Publish by incrementing req_count last
        let req_count = self.io.read_u32(self.send.req_count_addr()).await?;
        self.io
            .write_u32(self.send.req_count_addr(), req_count.wrapping_add(1))
            .await
    }

    /// State of the send direction
    pub async fn send_state(&mut self) -> Result<MailboxState> {
        state(self.io, &self.send).await
    }

    /// Check if a message can be sent now.
    pub async fn can_send(&mut self) -> Result<bool> {
        Ok(self.send_state().await? == MailboxState::Free)
    }

    /// Check for a message from the device.  Returns its size if one is
    /// waiting.
    pub async fn receive_poll(&mut self) -> Result<Option<usize>> {
        if state(self.io, &self.recv).await? == MailboxState::Full {
            let data_size = self.io.read_u32(self.recv.data_size_addr()).await? as usize;
            Ok(Some(data_size.min(self.recv.capacity)))
        } else {
            Ok(None)
        }
    }

    /// Copy bytes of the waiting message, starting `offset` bytes into it.
    ///
    /// Returns the number of bytes copied.
    pub async fn receive_read(&mut self, offset: usize, buf: &mut [u8]) -> Result<usize> {
        let data_size = self.receive_poll().await?.ok_or(Error::NoData)?;
        if offset >= data_size {
            return Ok(0);
        }

        let count = buf.len().min(data_size - offset);
        let start = self.recv.buffer + offset as u32;
        let end = start + count as u32;
        let first_word = start & !3;

        let mut words = vec![0u32; (end - first_word).div_ceil(4) as usize];
        self.io.read_bulk(first_word, &mut words).await?;
        for (i, word) in words.iter().enumerate() {
            unpack_word(first_word + i as u32 * 4, *word, start, &mut buf[..count]);
        }

        Ok(count)
    }

    /// Release the waiting message.
    pub async fn receive_ack(&mut self) -> Result<()> {
        let req_count = self.io.read_u32(self.recv.req_count_addr()).await?;
        self.io
            .write_u32(self.recv.ack_count_addr(), req_count)
            .await?;
        self.io.write_u32(self.recv.data_size_addr(), 0).await
    }

    /// Read and release the waiting message in one go.
    ///
    /// Returns [`Error::NoData`] if there is no message, and
    /// [`Error::BufferTooSmall`] without releasing it if `buf` cannot hold
    /// it.
    pub async fn receive_bytes(&mut self, buf: &mut [u8]) -> Result<usize> {
        let data_size = self.receive_poll().await?.ok_or(Error::NoData)?;
        if data_size > buf.len() {
            return Err(Error::BufferTooSmall);
        }

        let count = self.receive_read(0, &mut buf[..data_size]).await?;
        self.receive_ack().await?;

        Ok(count)
    }
}

async fn state<I: AsyncDpmIo>(io: &mut I, dir: &Direction) -> Result<MailboxState> {
    let req_count = io.read_u32(dir.req_count_addr()).await?;
    let ack_count = io.read_u32(dir.ack_count_addr()).await?;
    if req_count != ack_count {
        Ok(MailboxState::Full)
    } else {
        Ok(MailboxState::Free)
    }
}

/// Async Reader/Writer mailbox type.  Typically used by a Host.
// It is important that AsyncMailbox and ReaderWriterDpmIo have different
// lifetimes - this allows borrowing of both to be decoupled from each other.
pub type ReaderWriterMailbox<'a, 'b, R, W> = AsyncMailbox<'a, ReaderWriterDpmIo<'b, R, W>>;

/// DPM I/O implementation using [`crate::io::Reader`] and
/// [`crate::io::Writer`] traits.
pub struct ReaderWriterDpmIo<'a, R: Reader, W: Writer> {
    reader: &'a mut R,
    writer: &'a mut W,
}

impl<'a, R: Reader, W: Writer> ReaderWriterDpmIo<'a, R, W> {
    /// Create new instance
    pub fn new(reader: &'a mut R, writer: &'a mut W) -> Self {
        Self { reader, writer }
    }
}

#[async_trait(?Send)]
impl<R: Reader, W: Writer> AsyncDpmIo for ReaderWriterDpmIo<'_, R, W> {
    async fn read_u32(&mut self, addr: u32) -> Result<u32> {
        let mut buf = [0u8; 4];
        self.reader
            .read(addr, &mut buf)
            .await
            .map_err(|e| io_error("read", addr, e))?;
        Ok(u32::from_le_bytes(buf))
    }

    async fn write_u32(&mut self, addr: u32, value: u32) -> Result<()> {
        self.writer
            .write(addr, &value.to_le_bytes())
            .await
            .map_err(|e| io_error("write", addr, e))
    }

    async fn read_bulk(&mut self, addr: u32, buf: &mut [u32]) -> Result<()> {
        let mut bytes = vec![0u8; buf.len() * 4];
        self.reader
            .read(addr, &mut bytes)
            .await
            .map_err(|e| io_error("read", addr, e))?;
        for (word, chunk) in buf.iter_mut().zip(bytes.chunks_exact(4)) {
            *word = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }
        Ok(())
    }

    async fn write_bulk(&mut self, addr: u32, data: &[u32]) -> Result<()> {
        let bytes: alloc::vec::Vec<u8> = data.iter().flat_map(|w| w.to_le_bytes()).collect();
        self.writer
            .write(addr, &bytes)
            .await
            .map_err(|e| io_error("write", addr, e))
    }
}

fn io_error(op: &str, addr: u32, e: impl core::fmt::Debug) -> Error {
    debug!("DPM {op} at {addr:#010X} failed: {e:?}");
    Error::Io
}
