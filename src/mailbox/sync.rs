//! Synchronous Mailbox - typically used by the device.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

#[allow(unused_imports)]
use log::{debug, trace, warn};

use crate::mailbox::{
    AckWait, Direction, DpmLayout, INFO_WORDS, MailboxInfo, MailboxState, Side,
    check_base_addr, check_send_size, pack_word, unpack_word,
};
use crate::{Error, Result};

/// Trait for accessing the DPM window.
///
/// Sync version, typically used for direct RAM access on the device.
pub trait DpmIo {
    /// Atomic read u32 operation
    fn read_u32(&mut self, addr: u32) -> Result<u32>;

    /// Atomic write u32 operation
    fn write_u32(&mut self, addr: u32, value: u32) -> Result<()>;

    /// Bulk read access, no need for atomicity
    fn read_bulk(&mut self, addr: u32, buf: &mut [u32]) -> Result<()>;

    /// Bulk write access, no need for atomicity
    fn write_bulk(&mut self, addr: u32, data: &[u32]) -> Result<()>;
}

/// Synchronous mailbox pair over a DPM window
pub struct Mailbox<'a, I: DpmIo> {
    io: &'a mut I,
    side: Side,
    base_addr: u32,
    send: Direction,
    recv: Direction,
}

impl<'a, I: DpmIo> Mailbox<'a, I> {
    /// Initialize the DPM window at `base_addr` and return the device side of
    /// the mailbox.
    ///
    /// The whole window is cleared, then the information block is written.
    /// The magic cookie goes in last, so a host polling the window never sees
    /// a valid cookie in front of an incomplete header.
    pub fn init(io: &'a mut I, base_addr: u32) -> Result<Self> {
        check_base_addr(base_addr)?;

        let info = MailboxInfo::for_layout();
        let (send, recv) = info.directions(Side::Device, base_addr)?;

        let mut mailbox = Self {
            io,
            side: Side::Device,
            base_addr,
            send,
            recv,
        };

        // Clear everything, including both control blocks
        let zeros = [0u32; 64];
        let mut offset = 0;
        while offset < DpmLayout::size() {
            let words = ((DpmLayout::size() - offset) / 4).min(zeros.len());
            mailbox
                .io
                .write_bulk(base_addr + offset as u32, &zeros[..words])?;
            offset += words * 4;
        }

        // Header, then the magic cookie
        let words = info.to_words();
        mailbox.io.write_bulk(base_addr + 16, &words[4..])?;
        mailbox.io.write_bulk(base_addr, &words[..4])?;

        debug!(
            "Initialized DPM mailbox at {base_addr:#010X} size {} bytes",
            DpmLayout::size()
        );

        Ok(mailbox)
    }

    /// Attach to a DPM window initialized by the device.  Used by the host.
    ///
    /// The mailbox locations are taken from the window's information block,
    /// not from [`DpmLayout`].
    pub fn attach(io: &'a mut I, base_addr: u32) -> Result<Self> {
        check_base_addr(base_addr)?;

        let mut words = [0u32; INFO_WORDS];
        io.read_bulk(base_addr, &mut words)?;
        let info = MailboxInfo::from_words(&words)?;
        let (send, recv) = info.directions(Side::Host, base_addr)?;

        debug!(
            "Attached to DPM mailbox at {base_addr:#010X} version {:#010X}",
            info.version
        );

        Ok(Self {
            io,
            side: Side::Host,
            base_addr,
            send,
            recv,
        })
    }

    /// Device side view of a window which is already initialized, without
    /// clearing it.
    #[cfg(test)]
    pub(crate) fn attach_device(io: &'a mut I, base_addr: u32) -> Self {
        let (send, recv) = MailboxInfo::for_layout()
            .directions(Side::Device, base_addr)
            .unwrap();
        Self {
            io,
            side: Side::Device,
            base_addr,
            send,
            recv,
        }
    }

    /// Which end of the window this mailbox is
    pub fn side(&self) -> Side {
        self.side
    }

    /// Base address of the DPM window
    pub fn base_addr(&self) -> u32 {
        self.base_addr
    }

    /// Largest message which can be sent
    pub fn send_capacity(&self) -> usize {
        self.send.capacity
    }

    /// Post a message to the partner.
    ///
    /// Fails with [`Error::TooBig`] if `data` exceeds the data area, and with
    /// [`Error::Busy`] if the previous message has not been acknowledged yet.
    /// Neither failure changes the window.  Nothing is queued and nothing
    /// blocks.
    pub fn send_data(&mut self, data: &[u8]) -> Result<()> {
        check_send_size(data.len(), &self.send)?;

        // Check availability
        if self.send_state()? == MailboxState::Full {
            return Err(Error::Busy);
        }

        // Write data payload first
        let data_addr = self.send.buffer;
        for (word_idx, chunk) in data.chunks(4).enumerate() {
            self.io
                .write_u32(data_addr + (word_idx as u32 * 4), pack_word(chunk))?;
        }

        // Size before publishing
        self.io
            .write_u32(self.send.data_size_addr(), data.len() as u32)?;

        // Publish by incrementing req_count last
        let req_count = self.io.read_u32(self.send.req_count_addr())?;
        self.io
            .write_u32(self.send.req_count_addr(), req_count.wrapping_add(1))?;

        trace!("Posted {} byte message", data.len());

        Ok(())
    }

    /// State of the send direction
    pub fn send_state(&mut self) -> Result<MailboxState> {
        state(self.io, &self.send)
    }

    /// Check if a message can be sent now.
    pub fn can_send(&mut self) -> Result<bool> {
        Ok(self.send_state()? == MailboxState::Free)
    }

    /// Wait until the partner has acknowledged the last message sent.
    ///
    /// This busy-polls the counters.  With [`AckWait::Forever`] it never
    /// returns if the partner stops acknowledging.
    pub fn send_wait_for_ack(&mut self, wait: AckWait) -> Result<()> {
        let mut polls = 0u32;
        loop {
            if self.send_state()? == MailboxState::Free {
                return Ok(());
            }

            if let AckWait::Polls(limit) = wait {
                polls += 1;
                if polls >= limit {
                    warn!("No acknowledge from partner after {polls} polls");
                    return Err(Error::Timeout);
                }
            }

            core::hint::spin_loop();
        }
    }

    /// Check for a received message.  Returns its size if one is waiting.
    ///
    /// Does not block and does not consume the message.
    pub fn receive_poll(&mut self) -> Result<Option<usize>> {
        if state(self.io, &self.recv)? == MailboxState::Full {
            let data_size = self.io.read_u32(self.recv.data_size_addr())? as usize;
            Ok(Some(data_size.min(self.recv.capacity)))
        } else {
            Ok(None)
        }
    }

    /// Copy bytes of the waiting message, starting `offset` bytes into it.
    ///
    /// Returns the number of bytes copied, 0 once `offset` reaches the end of
    /// the message.  Returns [`Error::NoData`] if no message is waiting.
    pub fn receive_read(&mut self, offset: usize, buf: &mut [u8]) -> Result<usize> {
        let data_size = self.receive_poll()?.ok_or(Error::NoData)?;
        if offset >= data_size {
            return Ok(0);
        }

        let count = buf.len().min(data_size - offset);
        let start = self.recv.buffer + offset as u32;
        let end = start + count as u32;
        let buf = &mut buf[..count];

        let mut word_addr = start & !3;
        while word_addr < end {
            let word = self.io.read_u32(word_addr)?;
            unpack_word(word_addr, word, start, buf);
            word_addr += 4;
        }

        Ok(count)
    }

    /// Release the waiting message, freeing the slot for the partner's next
    /// one.
    pub fn receive_ack(&mut self) -> Result<()> {
        let req_count = self.io.read_u32(self.recv.req_count_addr())?;
        self.io.write_u32(self.recv.ack_count_addr(), req_count)?;
        self.io.write_u32(self.recv.data_size_addr(), 0)
    }
}

fn state<I: DpmIo>(io: &mut I, dir: &Direction) -> Result<MailboxState> {
    let req_count = io.read_u32(dir.req_count_addr())?;
    let ack_count = io.read_u32(dir.ack_count_addr())?;
    if req_count != ack_count {
        Ok(MailboxState::Full)
    } else {
        Ok(MailboxState::Free)
    }
}

/// DPM I/O implementation using direct memory access
#[derive(Clone, Copy)]
pub struct RamDpmIo;

impl RamDpmIo {
    /// Create a new RamDpmIo instance.
    ///
    /// # Safety
    ///
    /// Every address later passed to this instance is dereferenced as is.
    /// The caller must ensure the DPM window passed to [`Mailbox::init()`]
    /// is mapped, word aligned and not used for anything else.
    // We need a new() rather than a default() as it must be const.
    #[allow(clippy::new_without_default)]
    pub const unsafe fn new() -> Self {
        Self {}
    }
}

impl DpmIo for RamDpmIo {
    fn read_u32(&mut self, addr: u32) -> Result<u32> {
        Ok(unsafe { core::ptr::read_volatile(addr as usize as *const u32) })
    }

    fn write_u32(&mut self, addr: u32, value: u32) -> Result<()> {
        unsafe { core::ptr::write_volatile(addr as usize as *mut u32, value) };
        Ok(())
    }

    fn read_bulk(&mut self, addr: u32, buf: &mut [u32]) -> Result<()> {
        for (i, word) in buf.iter_mut().enumerate() {
            *word = self.read_u32(addr + (i as u32 * 4))?;
        }
        Ok(())
    }

    fn write_bulk(&mut self, addr: u32, data: &[u32]) -> Result<()> {
        for (i, word) in data.iter().enumerate() {
            self.write_u32(addr + (i as u32 * 4), *word)?;
        }
        Ok(())
    }
}
