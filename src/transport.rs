//! Byte transports the monitor runs over.
//!
//! The monitor pulls bytes into its receive ring buffer with
//! [`Transport::receive()`] whenever it needs more, and hands complete
//! reply packets to [`Transport::send_packet()`].  Receive must not block.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

#[allow(unused_imports)]
use log::{debug, trace};

use crate::mailbox::{AckWait, DpmIo, Mailbox};
use crate::ringbuffer::RingBuffer;
use crate::{Error, Result};

/// Device side packet transport
pub trait Transport {
    /// Move whatever input is available into `rx`, without blocking.
    fn receive<const N: usize>(&mut self, rx: &mut RingBuffer<N>) -> Result<()>;

    /// Send one complete packet.
    fn send_packet(&mut self, packet: &[u8]) -> Result<()>;
}

/// Transport over the DPM mailbox.  One packet per mailbox message.
pub struct MailboxTransport<'a, I: DpmIo> {
    mailbox: Mailbox<'a, I>,
    wait: AckWait,
    // Bytes of the current host message already moved to the ring buffer
    rx_offset: usize,
}

impl<'a, I: DpmIo> MailboxTransport<'a, I> {
    /// Create a transport over an initialized mailbox.  `wait` bounds how
    /// long each send waits for the host to acknowledge.
    pub fn new(mailbox: Mailbox<'a, I>, wait: AckWait) -> Self {
        Self {
            mailbox,
            wait,
            rx_offset: 0,
        }
    }

    pub fn mailbox(&mut self) -> &mut Mailbox<'a, I> {
        &mut self.mailbox
    }
}

impl<I: DpmIo> Transport for MailboxTransport<'_, I> {
    /// Copies as much of the waiting host message as fits into `rx`.  The
    /// message is acknowledged once all of it has been copied, so anything
    /// that does not fit now stays in the mailbox for the next call.
    fn receive<const N: usize>(&mut self, rx: &mut RingBuffer<N>) -> Result<()> {
        let Some(size) = self.mailbox.receive_poll()? else {
            return Ok(());
        };

        let mut chunk = [0u8; 64];
        while self.rx_offset < size && !rx.is_full() {
            let len = chunk.len().min(rx.free_space());
            let count = self.mailbox.receive_read(self.rx_offset, &mut chunk[..len])?;
            if count == 0 {
                break;
            }
            rx.write(&chunk[..count]);
            self.rx_offset += count;
        }

        if self.rx_offset >= size {
            trace!("Received {size} byte message");
            self.rx_offset = 0;
            self.mailbox.receive_ack()?;
        } else {
            debug!(
                "Receive buffer full, {} of {size} bytes left in mailbox",
                size - self.rx_offset
            );
        }

        Ok(())
    }

    fn send_packet(&mut self, packet: &[u8]) -> Result<()> {
        self.mailbox.send_data(packet)?;
        self.mailbox.send_wait_for_ack(self.wait)
    }
}

/// Transport over an `embedded-io` byte stream, such as a UART.
pub struct StreamTransport<S> {
    stream: S,
}

impl<S> StreamTransport<S>
where
    S: embedded_io::Read + embedded_io::ReadReady + embedded_io::Write,
{
    pub fn new(stream: S) -> Self {
        Self { stream }
    }

    /// Give back the underlying stream
    pub fn release(self) -> S {
        self.stream
    }
}

fn stream_error(e: impl embedded_io::Error) -> Error {
    debug!("Stream error: {:?}", e.kind());
    Error::Io
}

impl<S> Transport for StreamTransport<S>
where
    S: embedded_io::Read + embedded_io::ReadReady + embedded_io::Write,
{
    fn receive<const N: usize>(&mut self, rx: &mut RingBuffer<N>) -> Result<()> {
        let mut chunk = [0u8; 64];
        while !rx.is_full() && self.stream.read_ready().map_err(stream_error)? {
            let len = chunk.len().min(rx.free_space());
            let count = self.stream.read(&mut chunk[..len]).map_err(stream_error)?;
            if count == 0 {
                break;
            }
            rx.write(&chunk[..count]);
        }
        Ok(())
    }

    fn send_packet(&mut self, packet: &[u8]) -> Result<()> {
        self.stream.write_all(packet).map_err(stream_error)?;
        self.stream.flush().map_err(stream_error)
    }
}
