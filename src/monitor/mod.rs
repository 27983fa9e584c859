//! The device side of the monitor protocol.
//!
//! [`Monitor`] owns the receive ring buffer, the packet assembly state, the
//! communication state and the reply staging buffer.  It is driven entirely
//! by [`Monitor::poll()`], each call running a single step of the packet
//! state machine:
//!
//! ```text
//! WaitForPacketStart -> WaitForSizeComplete -> WaitForPacketComplete -> ExecutePacket
//!        ^                      |                        |                  |
//!        +----------------------+------------------------+------------------+
//! ```
//!
//! Framing errors are never reported to the host.  A bad size or CRC sends
//! the monitor back to hunting for a start byte, without discarding anything
//! beyond the start byte it already consumed.  The bytes after it are
//! rescanned, as the next real packet may start inside them.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

#[cfg(feature = "call")]
pub mod call;
pub mod dispatch;

#[cfg(feature = "call")]
pub use call::{CALL_BUFFER_SIZE, CallBuffer, CallOutput};
pub use dispatch::{CommState, Verdict, verdict};

#[allow(unused_imports)]
use log::debug;

use crate::Result;
use crate::crc::crc16;
use crate::memory::MemoryAccess;
use crate::packet::{CRC_SIZE, MAX_PACKET_SIZE, MAX_SIZE_FIELD, PACKET_START};
use crate::ringbuffer::RingBuffer;
use crate::transport::Transport;
use dispatch::Responder;

/// Packet assembly state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketState {
    /// Hunting for the start byte
    WaitForPacketStart,
    /// Start byte consumed, waiting for the 2 byte size
    WaitForSizeComplete,
    /// Size known, waiting for the body and CRC
    WaitForPacketComplete,
    /// A complete, CRC checked packet is at the front of the ring buffer
    ExecutePacket,
}

/// Device side monitor
pub struct Monitor<T: Transport, M: MemoryAccess> {
    rx: RingBuffer<MAX_PACKET_SIZE>,
    packet_state: PacketState,
    packet_size: usize,
    responder: Responder<T, M>,
}

impl<T: Transport, M: MemoryAccess> Monitor<T, M> {
    /// Create a monitor receiving and replying over `transport` and
    /// accessing memory through `memory`.
    pub fn new(transport: T, memory: M) -> Self {
        Self {
            rx: RingBuffer::new(),
            packet_state: PacketState::WaitForPacketStart,
            packet_size: 0,
            responder: Responder::new(transport, memory),
        }
    }

    /// Run one step of the packet state machine.
    ///
    /// Asks the transport for more data only when the current step needs
    /// more than the ring buffer holds.  Returns transport receive errors;
    /// the monitor's state is unaffected by them.
    pub fn poll(&mut self) -> Result<()> {
        let fill = self.rx.fill_level();

        match self.packet_state {
            PacketState::WaitForPacketStart => {
                if fill == 0 {
                    return self.responder.transport.receive(&mut self.rx);
                }
                while let Some(byte) = self.rx.get_char() {
                    if byte == PACKET_START {
                        self.packet_state = PacketState::WaitForSizeComplete;
                        break;
                    }
                }
            }

            PacketState::WaitForSizeComplete => {
                if fill < 2 {
                    return self.responder.transport.receive(&mut self.rx);
                }
                let size = self.rx.peek_u16_le(0) as usize;
                if size == 0 || size > MAX_SIZE_FIELD {
                    debug!("Invalid packet size {size}, resynchronizing");
                    self.packet_state = PacketState::WaitForPacketStart;
                } else {
                    self.packet_size = size;
                    self.packet_state = PacketState::WaitForPacketComplete;
                }
            }

            PacketState::WaitForPacketComplete => {
                let body = 2 + self.packet_size;
                if fill < body + CRC_SIZE {
                    return self.responder.transport.receive(&mut self.rx);
                }
                let crc = (0..body).fold(0, |crc, i| crc16(crc, self.rx.peek(i)));
                let packet_crc = self.rx.peek_u16_le(body);
                if crc != packet_crc {
                    debug!("CRC mismatch {crc:#06X} != {packet_crc:#06X}, resynchronizing");
                    self.packet_state = PacketState::WaitForPacketStart;
                } else {
                    // Size is held in packet_size
                    self.rx.skip(2);
                    self.packet_state = PacketState::ExecutePacket;
                }
            }

            PacketState::ExecutePacket => {
                self.responder.process(&self.rx, self.packet_size);
                self.rx.skip(self.packet_size + CRC_SIZE);
                self.packet_state = PacketState::WaitForPacketStart;
            }
        }

        Ok(())
    }

    pub fn packet_state(&self) -> PacketState {
        self.packet_state
    }

    pub fn comm_state(&self) -> CommState {
        self.responder.state
    }

    /// Bytes received but not yet processed
    pub fn pending(&self) -> usize {
        self.rx.fill_level()
    }

    pub fn transport(&mut self) -> &mut T {
        &mut self.responder.transport
    }

    pub fn memory(&mut self) -> &mut M {
        &mut self.responder.memory
    }

    /// Give back the transport and memory
    pub fn release(self) -> (T, M) {
        (self.responder.transport, self.responder.memory)
    }

    /// A console writing to the host as `Call_Data` packets, also outside
    /// of calls.  Output is buffered until a full packet's worth is
    /// available, or until flushed.
    #[cfg(feature = "call")]
    pub fn console(&mut self) -> CallOutput<'_, T> {
        let responder = &mut self.responder;
        CallOutput::new(
            &mut responder.call_buffer,
            &mut responder.tx,
            &mut responder.transport,
        )
    }
}
