//! Output redirection for called functions.
//!
//! While the monitor runs an `Execute` command, everything the called
//! function prints is collected in a [`CallBuffer`] and streamed to the host
//! as `Call_Data` packets, one per [`CALL_BUFFER_SIZE`] bytes.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

#[allow(unused_imports)]
use log::{error, warn};

use crate::memory::OutputSink;
use crate::packet::{MAX_PACKET_SIZE, PacketType, encode_frame};
use crate::transport::Transport;

/// Bytes of called function output per `Call_Data` packet
pub const CALL_BUFFER_SIZE: usize = 320;

/// Accumulates call output until a packet's worth is available.
pub struct CallBuffer {
    data: [u8; CALL_BUFFER_SIZE],
    fill: usize,
}

impl CallBuffer {
    pub const fn new() -> Self {
        Self {
            data: [0; CALL_BUFFER_SIZE],
            fill: 0,
        }
    }

    pub fn reset(&mut self) {
        self.fill = 0;
    }

    pub fn len(&self) -> usize {
        self.fill
    }

    pub fn is_empty(&self) -> bool {
        self.fill == 0
    }
}

impl Default for CallBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// [`OutputSink`] sending through the monitor's transport.
pub struct CallOutput<'a, T: Transport> {
    buffer: &'a mut CallBuffer,
    tx: &'a mut [u8; MAX_PACKET_SIZE],
    transport: &'a mut T,
}

impl<'a, T: Transport> CallOutput<'a, T> {
    pub(crate) fn new(
        buffer: &'a mut CallBuffer,
        tx: &'a mut [u8; MAX_PACKET_SIZE],
        transport: &'a mut T,
    ) -> Self {
        Self {
            buffer,
            tx,
            transport,
        }
    }
}

impl<T: Transport> OutputSink for CallOutput<'_, T> {
    fn put(&mut self, byte: u8) {
        self.buffer.data[self.buffer.fill] = byte;
        self.buffer.fill += 1;

        if self.buffer.fill == CALL_BUFFER_SIZE {
            self.flush();
        }
    }

    fn flush(&mut self) {
        if self.buffer.is_empty() {
            return;
        }

        let data = &self.buffer.data[..self.buffer.fill];
        match encode_frame(&mut self.tx[..], PacketType::CallData, data) {
            Ok(len) => {
                if let Err(e) = self.transport.send_packet(&self.tx[..len]) {
                    warn!("Failed to send {} bytes of call output: {e:?}", data.len());
                }
            }
            Err(e) => error!("Failed to encode call output: {e:?}"),
        }

        self.buffer.reset();
    }
}

impl<T: Transport> core::fmt::Write for CallOutput<'_, T> {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        for byte in s.bytes() {
            self.put(byte);
        }
        Ok(())
    }
}
