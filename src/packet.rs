//! Monitor packet types, status codes and framing.
//!
//! Wire format, all integers little-endian:
//!
//! ```text
//! ┌───────────┬────────────┬──────────┬─────────────────┬────────────┐
//! │ Start (1) │ Size (2)   │ Type (1) │ Payload         │ CRC (2)    │
//! │ 0x2A      │ type +     │          │ (size-1 bytes)  │ over size, │
//! │           │ payload    │          │                 │ type, data │
//! └───────────┴────────────┴──────────┴─────────────────┴────────────┘
//! ```
//!
//! Packets are transient.  The device decodes them in place from its receive
//! [`crate::ringbuffer::RingBuffer`] and encodes replies into a staging
//! buffer, so nothing here allocates.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

use crate::crc::crc16_area;
use crate::{Error, Result};

/// Protocol major version
pub const MONITOR_VERSION_MAJOR: u32 = 4;

/// Protocol minor version
pub const MONITOR_VERSION_MINOR: u32 = 0;

/// First byte of every packet
pub const PACKET_START: u8 = 0x2a;

/// Maximum size of a complete packet on the wire, framing included
pub const MAX_PACKET_SIZE: usize = 1024;

/// Start byte, size field and CRC
pub const FRAME_OVERHEAD: usize = 5;

/// Largest value the size field may carry
pub const MAX_SIZE_FIELD: usize = MAX_PACKET_SIZE - FRAME_OVERHEAD;

/// Start byte, size field and type.  The payload starts at this offset.
pub const HEADER_SIZE: usize = 4;

/// Size of the CRC trailer
pub const CRC_SIZE: usize = 2;

/// Packet types.  Commands flow from host to device, replies the other way.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    Read08 = 0x00,
    Read16 = 0x01,
    Read32 = 0x02,
    Read64 = 0x03,
    ReadArea = 0x04,
    Write08 = 0x05,
    Write16 = 0x06,
    Write32 = 0x07,
    Write64 = 0x08,
    WriteArea = 0x09,
    Execute = 0x0a,
    Ack = 0x0b,
    Status = 0x0c,
    ReadData = 0x0d,
    CallData = 0x0e,
    CallCancel = 0x0f,
    MagicData = 0x4d,
    CommandMagic = 0xff,
}

impl PacketType {
    /// Map a raw type byte onto the closed set of packet types.
    pub fn from_u8(value: u8) -> Option<Self> {
        let packet_type = match value {
            0x00 => PacketType::Read08,
            0x01 => PacketType::Read16,
            0x02 => PacketType::Read32,
            0x03 => PacketType::Read64,
            0x04 => PacketType::ReadArea,
            0x05 => PacketType::Write08,
            0x06 => PacketType::Write16,
            0x07 => PacketType::Write32,
            0x08 => PacketType::Write64,
            0x09 => PacketType::WriteArea,
            0x0a => PacketType::Execute,
            0x0b => PacketType::Ack,
            0x0c => PacketType::Status,
            0x0d => PacketType::ReadData,
            0x0e => PacketType::CallData,
            0x0f => PacketType::CallCancel,
            0x4d => PacketType::MagicData,
            0xff => PacketType::CommandMagic,
            _ => return None,
        };
        Some(packet_type)
    }

    /// Whether this type starts a command on the device.
    pub fn is_command(self) -> bool {
        (self as u8) <= PacketType::Execute as u8
    }
}

/// Status codes, carried as the single payload byte of a `Status` packet.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok = 0x00,
    CallFinished = 0x01,
    InvalidCommand = 0x02,
    InvalidPacketSize = 0x03,
    InvalidSizeParameter = 0x04,
    CommandInProgress = 0x05,
}

impl Status {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x00 => Some(Status::Ok),
            0x01 => Some(Status::CallFinished),
            0x02 => Some(Status::InvalidCommand),
            0x03 => Some(Status::InvalidPacketSize),
            0x04 => Some(Status::InvalidSizeParameter),
            0x05 => Some(Status::CommandInProgress),
            _ => None,
        }
    }
}

/// Complete the frame whose payload has already been placed at
/// `buf[HEADER_SIZE..]`, by filling in start byte, size, type and CRC.
///
/// Returns the number of bytes of `buf` making up the frame.
pub fn finish_frame(buf: &mut [u8], packet_type: PacketType, payload_len: usize) -> Result<usize> {
    let size = 1 + payload_len;
    if size > MAX_SIZE_FIELD {
        return Err(Error::TooBig);
    }
    let total = HEADER_SIZE + payload_len + CRC_SIZE;
    if buf.len() < total {
        return Err(Error::BufferTooSmall);
    }

    buf[0] = PACKET_START;
    buf[1..3].copy_from_slice(&(size as u16).to_le_bytes());
    buf[3] = packet_type as u8;

    let crc_offset = HEADER_SIZE + payload_len;
    let crc = crc16_area(&buf[1..crc_offset]);
    buf[crc_offset..total].copy_from_slice(&crc.to_le_bytes());

    Ok(total)
}

/// Encode a frame with the given type and payload into `buf`.
///
/// Returns the number of bytes of `buf` making up the frame.
pub fn encode_frame(buf: &mut [u8], packet_type: PacketType, payload: &[u8]) -> Result<usize> {
    let end = HEADER_SIZE + payload.len();
    if buf.len() < end {
        return Err(Error::BufferTooSmall);
    }
    buf[HEADER_SIZE..end].copy_from_slice(payload);
    finish_frame(buf, packet_type, payload.len())
}

/// Encode a `Status` frame into `buf`.
pub fn encode_status(buf: &mut [u8], status: Status) -> Result<usize> {
    encode_frame(buf, PacketType::Status, &[status as u8])
}

/// A decoded frame, borrowing its payload from the source buffer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Frame<'a> {
    /// Raw type byte, which may not be a known [`PacketType`]
    pub raw_type: u8,
    /// Payload, excluding the type byte
    pub payload: &'a [u8],
    /// Number of source bytes the frame occupied
    pub wire_size: usize,
}

impl Frame<'_> {
    pub fn packet_type(&self) -> Option<PacketType> {
        PacketType::from_u8(self.raw_type)
    }

    /// The status code, if this is a well formed `Status` frame.
    pub fn status(&self) -> Option<Status> {
        match (self.packet_type(), self.payload) {
            (Some(PacketType::Status), [code]) => Status::from_u8(*code),
            _ => None,
        }
    }
}

/// Decode a frame from the start of `src`.
///
/// Returns `Ok(None)` if `src` does not yet hold a complete frame.  Unlike
/// the device's decoder, this does not search for a start byte: the host
/// receives exactly one frame per mailbox message, so anything else is an
/// error.
pub fn decode_frame(src: &[u8]) -> Result<Option<Frame<'_>>> {
    match src.first() {
        None => return Ok(None),
        Some(&PACKET_START) => (),
        Some(_) => return Err(Error::BadFrame),
    }
    if src.len() < 3 {
        return Ok(None);
    }

    let size = u16::from_le_bytes([src[1], src[2]]) as usize;
    if size == 0 || size > MAX_SIZE_FIELD {
        return Err(Error::BadFrame);
    }

    let crc_offset = 3 + size;
    let total = crc_offset + CRC_SIZE;
    if src.len() < total {
        return Ok(None);
    }

    let crc = u16::from_le_bytes([src[crc_offset], src[crc_offset + 1]]);
    if crc != crc16_area(&src[1..crc_offset]) {
        return Err(Error::CrcMismatch);
    }

    Ok(Some(Frame {
        raw_type: src[3],
        payload: &src[HEADER_SIZE..crc_offset],
        wire_size: total,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_frame_layout() {
        let mut buf = [0u8; 16];
        let len = encode_status(&mut buf, Status::InvalidPacketSize).unwrap();
        assert_eq!(len, 7);
        assert_eq!(&buf[..5], &[0x2a, 0x02, 0x00, 0x0c, 0x03]);
        let crc = crc16_area(&buf[1..5]);
        assert_eq!(&buf[5..7], &crc.to_le_bytes());
    }

    #[test]
    fn finish_frame_in_place() {
        let mut buf = [0u8; 16];
        buf[HEADER_SIZE..HEADER_SIZE + 4].copy_from_slice(&[1, 2, 3, 4]);
        let len = finish_frame(&mut buf, PacketType::ReadData, 4).unwrap();

        let frame = decode_frame(&buf[..len]).unwrap().unwrap();
        assert_eq!(frame.packet_type(), Some(PacketType::ReadData));
        assert_eq!(frame.payload, &[1, 2, 3, 4]);
        assert_eq!(frame.wire_size, len);
    }

    #[test]
    fn encode_rejects_oversized_payload() {
        let mut buf = [0u8; MAX_PACKET_SIZE + 16];
        let payload = [0u8; MAX_SIZE_FIELD];
        assert_eq!(
            encode_frame(&mut buf, PacketType::CallData, &payload),
            Err(Error::TooBig)
        );
        assert_eq!(
            encode_frame(&mut buf, PacketType::CallData, &payload[1..]),
            Ok(MAX_PACKET_SIZE)
        );

        let mut small = [0u8; 8];
        assert_eq!(
            encode_frame(&mut small, PacketType::ReadData, &[0; 4]),
            Err(Error::BufferTooSmall)
        );
    }

    #[test]
    fn decode_incomplete_and_corrupt() {
        let mut buf = [0u8; 16];
        let len = encode_frame(&mut buf, PacketType::Read32, &[0, 0x10, 0, 0]).unwrap();

        assert_eq!(decode_frame(&buf[..0]), Ok(None));
        assert_eq!(decode_frame(&buf[..2]), Ok(None));
        assert_eq!(decode_frame(&buf[..len - 1]), Ok(None));

        let mut corrupt = buf;
        corrupt[5] ^= 0x01;
        assert_eq!(decode_frame(&corrupt[..len]), Err(Error::CrcMismatch));

        let mut no_start = buf;
        no_start[0] = 0x00;
        assert_eq!(decode_frame(&no_start[..len]), Err(Error::BadFrame));

        let zero_size = [PACKET_START, 0, 0, 0, 0];
        assert_eq!(decode_frame(&zero_size), Err(Error::BadFrame));
    }

    #[test]
    fn type_classification() {
        assert_eq!(PacketType::from_u8(0x4d), Some(PacketType::MagicData));
        assert_eq!(PacketType::from_u8(0x10), None);
        assert!(PacketType::Execute.is_command());
        assert!(PacketType::Read08.is_command());
        assert!(!PacketType::Ack.is_command());
        assert!(!PacketType::CommandMagic.is_command());
    }

    #[test]
    fn status_accessor() {
        let frame = Frame {
            raw_type: PacketType::Status as u8,
            payload: &[0x05],
            wire_size: 7,
        };
        assert_eq!(frame.status(), Some(Status::CommandInProgress));

        let frame = Frame {
            raw_type: PacketType::ReadData as u8,
            payload: &[0x05],
            wire_size: 7,
        };
        assert_eq!(frame.status(), None);
    }
}
