//! Communication state machine and command handlers.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

#[allow(unused_imports)]
use log::{debug, error, trace, warn};

use crate::memory::{AccessWidth, MemoryAccess};
#[cfg(feature = "call")]
use crate::memory::OutputSink;
#[cfg(feature = "call")]
use crate::monitor::call::{CallBuffer, CallOutput};
use crate::packet::{
    CRC_SIZE, FRAME_OVERHEAD, HEADER_SIZE, MAX_PACKET_SIZE, PacketType, Status, encode_status,
    finish_frame,
};
use crate::ringbuffer::RingBuffer;
use crate::transport::Transport;
use crate::{Error, Result};

/// Where the monitor is in the command/acknowledge cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommState {
    /// Ready for a new command
    Connected,
    /// A command was answered, waiting for the host's ACK
    CommandResponseWaitForAck,
    /// A called function is running
    #[cfg(feature = "call")]
    InCall,
}

/// What to do with a received packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Run the command handler
    Execute(PacketType),
    /// The host acknowledged the last response
    Acknowledge,
    /// Drop silently
    Ignore,
    /// Reply with a status and change nothing
    Reject(Status),
}

/// Decide what to do with a packet of type `raw_type` in `state`.
pub fn verdict(state: CommState, raw_type: u8) -> Verdict {
    let Some(packet_type) = PacketType::from_u8(raw_type) else {
        return Verdict::Reject(Status::InvalidCommand);
    };

    match (state, packet_type) {
        #[cfg(not(feature = "call"))]
        (CommState::Connected, PacketType::Execute) => Verdict::Reject(Status::InvalidCommand),
        (CommState::Connected, t) if t.is_command() => Verdict::Execute(t),
        (CommState::Connected, PacketType::Ack) => Verdict::Ignore,

        (CommState::CommandResponseWaitForAck, t) if t.is_command() => {
            Verdict::Reject(Status::CommandInProgress)
        }
        (CommState::CommandResponseWaitForAck, PacketType::Ack) => Verdict::Acknowledge,

        #[cfg(feature = "call")]
        (CommState::InCall, t) if t.is_command() => Verdict::Reject(Status::CommandInProgress),
        #[cfg(feature = "call")]
        (CommState::InCall, PacketType::Ack | PacketType::CallData) => Verdict::Ignore,

        _ => Verdict::Reject(Status::InvalidCommand),
    }
}

// A handler's answer: a status, or a reply frame already built in tx
enum Reply {
    Status(Status),
    Frame(usize),
}

/// Executes packets and sends the replies.
pub(crate) struct Responder<T: Transport, M: MemoryAccess> {
    pub(crate) transport: T,
    pub(crate) memory: M,
    pub(crate) state: CommState,
    pub(crate) tx: [u8; MAX_PACKET_SIZE],
    #[cfg(feature = "call")]
    pub(crate) call_buffer: CallBuffer,
}

impl<T: Transport, M: MemoryAccess> Responder<T, M> {
    pub(crate) fn new(transport: T, memory: M) -> Self {
        Self {
            transport,
            memory,
            state: CommState::Connected,
            tx: [0; MAX_PACKET_SIZE],
            #[cfg(feature = "call")]
            call_buffer: CallBuffer::new(),
        }
    }

    /// Process the packet at the front of `rx`.
    ///
    /// `rx` starts with the type byte, followed by the rest of the packet's
    /// `size` bytes.  Nothing is consumed.
    pub(crate) fn process<const N: usize>(&mut self, rx: &RingBuffer<N>, size: usize) {
        let raw_type = rx.peek(0);

        match verdict(self.state, raw_type) {
            Verdict::Execute(packet_type) => self.execute(packet_type, rx, size),
            Verdict::Acknowledge => {
                trace!("Response acknowledged");
                self.state = CommState::Connected;
            }
            Verdict::Ignore => trace!("Ignoring packet type {raw_type:#04X} in {:?}", self.state),
            Verdict::Reject(status) => {
                debug!("Rejecting packet type {raw_type:#04X} in {:?}: {status:?}", self.state);
                self.send_status(status);
            }
        }
    }

    fn execute<const N: usize>(&mut self, packet_type: PacketType, rx: &RingBuffer<N>, size: usize) {
        trace!("Executing {packet_type:?}, size {size}");

        let reply = match packet_type {
            PacketType::Read08 => self.command_read(rx, size, AccessWidth::U8),
            PacketType::Read16 => self.command_read(rx, size, AccessWidth::U16),
            PacketType::Read32 => self.command_read(rx, size, AccessWidth::U32),
            PacketType::Read64 => self.command_read(rx, size, AccessWidth::U64),
            PacketType::ReadArea => self.command_read_area(rx, size),
            PacketType::Write08 => self.command_write(rx, size, AccessWidth::U8),
            PacketType::Write16 => self.command_write(rx, size, AccessWidth::U16),
            PacketType::Write32 => self.command_write(rx, size, AccessWidth::U32),
            PacketType::Write64 => self.command_write(rx, size, AccessWidth::U64),
            PacketType::WriteArea => self.command_write_area(rx, size),
            #[cfg(feature = "call")]
            PacketType::Execute if size == 9 => {
                // Replies are sent as the call progresses
                self.command_call(rx.peek_u32_le(1), rx.peek_u32_le(5));
                return;
            }
            #[cfg(feature = "call")]
            PacketType::Execute => Ok(Reply::Status(Status::InvalidPacketSize)),
            _ => Ok(Reply::Status(Status::InvalidCommand)),
        };

        let reply = reply.unwrap_or_else(|e| {
            error!("{packet_type:?} failed: {e:?}");
            Reply::Status(Status::InvalidCommand)
        });
        match reply {
            Reply::Status(status) => self.send_status(status),
            Reply::Frame(len) => self.send_tx(len),
        }

        self.state = CommState::CommandResponseWaitForAck;
    }

    fn command_read<const N: usize>(
        &mut self,
        rx: &RingBuffer<N>,
        size: usize,
        width: AccessWidth,
    ) -> Result<Reply> {
        // type, address
        if size != 5 {
            return Ok(Reply::Status(Status::InvalidPacketSize));
        }

        let addr = rx.peek_u32_le(1);
        let value = self.memory.load(addr, width)?;

        let len = width.bytes();
        self.tx[HEADER_SIZE..HEADER_SIZE + len].copy_from_slice(&value.to_le_bytes()[..len]);
        Ok(Reply::Frame(finish_frame(&mut self.tx, PacketType::ReadData, len)?))
    }

    fn command_read_area<const N: usize>(
        &mut self,
        rx: &RingBuffer<N>,
        size: usize,
    ) -> Result<Reply> {
        // type, address, u16 length
        if size != 7 {
            return Ok(Reply::Status(Status::InvalidPacketSize));
        }

        let addr = rx.peek_u32_le(1);
        let len = rx.peek_u16_le(5) as usize;
        // start, size, type, data, crc
        if FRAME_OVERHEAD + 1 + len > MAX_PACKET_SIZE {
            return Ok(Reply::Status(Status::InvalidSizeParameter));
        }

        self.memory
            .read_area(addr, &mut self.tx[HEADER_SIZE..HEADER_SIZE + len])?;
        Ok(Reply::Frame(finish_frame(&mut self.tx, PacketType::ReadData, len)?))
    }

    fn command_write<const N: usize>(
        &mut self,
        rx: &RingBuffer<N>,
        size: usize,
        width: AccessWidth,
    ) -> Result<Reply> {
        // type, address, value
        if size != 5 + width.bytes() {
            return Ok(Reply::Status(Status::InvalidPacketSize));
        }

        let addr = rx.peek_u32_le(1);
        let value = match width {
            AccessWidth::U8 => rx.peek(5) as u64,
            AccessWidth::U16 => rx.peek_u16_le(5) as u64,
            AccessWidth::U32 => rx.peek_u32_le(5) as u64,
            AccessWidth::U64 => rx.peek_u64_le(5),
        };
        self.memory.store(addr, width, value)?;

        Ok(Reply::Status(Status::Ok))
    }

    fn command_write_area<const N: usize>(
        &mut self,
        rx: &RingBuffer<N>,
        size: usize,
    ) -> Result<Reply> {
        // type, address, at least one byte of data
        if size < 6 {
            return Ok(Reply::Status(Status::InvalidPacketSize));
        }

        let addr = rx.peek_u32_le(1);
        let len = size - 5;
        if len > self.tx.len() {
            return Err(Error::BufferTooSmall);
        }

        // The data may wrap in rx, so gather it in tx first
        for (i, byte) in self.tx[..len].iter_mut().enumerate() {
            *byte = rx.peek(5 + i);
        }
        self.memory.write_area(addr, &self.tx[..len])?;

        Ok(Reply::Status(Status::Ok))
    }

    #[cfg(feature = "call")]
    fn command_call(&mut self, addr: u32, arg: u32) {
        debug!("Calling {addr:#010X} with {arg:#010X}");

        self.send_status(Status::Ok);
        self.state = CommState::InCall;
        self.call_buffer.reset();

        let mut output = CallOutput::new(&mut self.call_buffer, &mut self.tx, &mut self.transport);
        let result = self.memory.call(addr, arg, &mut output);
        output.flush();
        if let Err(e) = result {
            error!("Call to {addr:#010X} failed: {e:?}");
        }

        self.send_status(Status::CallFinished);
        self.state = CommState::Connected;
    }

    fn send_status(&mut self, status: Status) {
        match encode_status(&mut self.tx, status) {
            Ok(len) => self.send_tx(len),
            Err(e) => error!("Failed to encode status {status:?}: {e:?}"),
        }
    }

    fn send_tx(&mut self, len: usize) {
        if let Err(e) = self.transport.send_packet(&self.tx[..len]) {
            warn!("Failed to send {len} byte reply: {e:?}");
        }
    }
}

// Replies must always fit the staging buffer
const _: () = assert!(HEADER_SIZE + MAX_PACKET_SIZE - FRAME_OVERHEAD - 1 + CRC_SIZE <= MAX_PACKET_SIZE);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_types_rejected_in_every_state() {
        assert_eq!(
            verdict(CommState::Connected, 0x42),
            Verdict::Reject(Status::InvalidCommand)
        );
        assert_eq!(
            verdict(CommState::CommandResponseWaitForAck, 0x10),
            Verdict::Reject(Status::InvalidCommand)
        );
    }

    #[test]
    fn connected_runs_commands_and_ignores_ack() {
        for raw in 0x00..=0x09 {
            assert!(matches!(
                verdict(CommState::Connected, raw),
                Verdict::Execute(_)
            ));
        }
        assert_eq!(verdict(CommState::Connected, 0x0b), Verdict::Ignore);
        for raw in [0x0c, 0x0d, 0x0e, 0x0f, 0x4d, 0xff] {
            assert_eq!(
                verdict(CommState::Connected, raw),
                Verdict::Reject(Status::InvalidCommand)
            );
        }
    }

    #[test]
    fn waiting_for_ack_blocks_commands() {
        for raw in 0x00..=0x0a {
            assert_eq!(
                verdict(CommState::CommandResponseWaitForAck, raw),
                Verdict::Reject(Status::CommandInProgress)
            );
        }
        assert_eq!(
            verdict(CommState::CommandResponseWaitForAck, 0x0b),
            Verdict::Acknowledge
        );
        assert_eq!(
            verdict(CommState::CommandResponseWaitForAck, 0x0e),
            Verdict::Reject(Status::InvalidCommand)
        );
    }

    #[cfg(feature = "call")]
    #[test]
    fn in_call_accepts_call_data_only() {
        assert_eq!(
            verdict(CommState::Connected, 0x0a),
            Verdict::Execute(PacketType::Execute)
        );
        assert_eq!(verdict(CommState::InCall, 0x0e), Verdict::Ignore);
        assert_eq!(verdict(CommState::InCall, 0x0b), Verdict::Ignore);
        assert_eq!(
            verdict(CommState::InCall, 0x07),
            Verdict::Reject(Status::CommandInProgress)
        );
        assert_eq!(
            verdict(CommState::InCall, 0x0f),
            Verdict::Reject(Status::InvalidCommand)
        );
    }

    #[cfg(not(feature = "call"))]
    #[test]
    fn execute_needs_call_feature() {
        assert_eq!(
            verdict(CommState::Connected, 0x0a),
            Verdict::Reject(Status::InvalidCommand)
        );
    }
}
