//! Test fixtures: simulated DPM windows, memory, streams and transports.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::vec;
use std::vec::Vec;

use crate::crc::crc16_area;
#[cfg(feature = "async")]
use crate::io::{Reader, Writer};
use crate::mailbox::{DpmIo, DpmLayout};
#[cfg(feature = "call")]
use crate::memory::OutputSink;
use crate::memory::{AccessWidth, MemoryAccess};
use crate::packet::{PACKET_START, decode_frame};
use crate::ringbuffer::RingBuffer;
use crate::transport::Transport;
use crate::{Error, Result};

fn word_index(base: u32, len: usize, addr: u32) -> Result<usize> {
    if addr % 4 != 0 {
        return Err(Error::NotAligned);
    }
    let index = (addr.checked_sub(base).ok_or(Error::Io)? / 4) as usize;
    if index >= len {
        return Err(Error::Io);
    }
    Ok(index)
}

/// A DPM window in a plain word array, recording writes.
pub(crate) struct SimDpm {
    base: u32,
    words: Vec<u32>,
    writes: usize,
    last_write: Option<u32>,
}

impl SimDpm {
    pub(crate) fn new(base: u32) -> Self {
        Self {
            base,
            words: vec![0; DpmLayout::size() / 4],
            writes: 0,
            last_write: None,
        }
    }

    pub(crate) fn peek_word(&self, addr: u32) -> u32 {
        self.words[((addr - self.base) / 4) as usize]
    }

    pub(crate) fn poke_word(&mut self, addr: u32, value: u32) {
        self.words[((addr - self.base) / 4) as usize] = value;
    }

    pub(crate) fn write_count(&self) -> usize {
        self.writes
    }

    pub(crate) fn last_write(&self) -> Option<u32> {
        self.last_write
    }
}

impl DpmIo for SimDpm {
    fn read_u32(&mut self, addr: u32) -> Result<u32> {
        Ok(self.words[word_index(self.base, self.words.len(), addr)?])
    }

    fn write_u32(&mut self, addr: u32, value: u32) -> Result<()> {
        let index = word_index(self.base, self.words.len(), addr)?;
        self.words[index] = value;
        self.writes += 1;
        self.last_write = Some(addr);
        Ok(())
    }

    fn read_bulk(&mut self, addr: u32, buf: &mut [u32]) -> Result<()> {
        for (i, word) in buf.iter_mut().enumerate() {
            *word = self.read_u32(addr + i as u32 * 4)?;
        }
        Ok(())
    }

    fn write_bulk(&mut self, addr: u32, data: &[u32]) -> Result<()> {
        for (i, word) in data.iter().enumerate() {
            self.write_u32(addr + i as u32 * 4, *word)?;
        }
        Ok(())
    }
}

/// A DPM window shared between a device and a host, possibly in different
/// threads.  The host accesses it as bytes through [`Reader`] and [`Writer`].
#[derive(Clone)]
pub(crate) struct SharedDpm {
    base: u32,
    words: Arc<Mutex<Vec<u32>>>,
}

impl SharedDpm {
    pub(crate) fn new(base: u32) -> Self {
        Self {
            base,
            words: Arc::new(Mutex::new(vec![0; DpmLayout::size() / 4])),
        }
    }

    fn read_bytes(&self, addr: u32, buf: &mut [u8]) -> Result<()> {
        let words = self.words.lock().unwrap();
        for (i, byte) in buf.iter_mut().enumerate() {
            let addr = addr + i as u32;
            let word = words[word_index(self.base, words.len(), addr & !3)?];
            *byte = word.to_le_bytes()[(addr & 3) as usize];
        }
        Ok(())
    }

    fn write_bytes(&self, addr: u32, data: &[u8]) -> Result<()> {
        let mut words = self.words.lock().unwrap();
        for (i, byte) in data.iter().enumerate() {
            let addr = addr + i as u32;
            let index = word_index(self.base, words.len(), addr & !3)?;
            let mut bytes = words[index].to_le_bytes();
            bytes[(addr & 3) as usize] = *byte;
            words[index] = u32::from_le_bytes(bytes);
        }
        Ok(())
    }
}

impl DpmIo for SharedDpm {
    fn read_u32(&mut self, addr: u32) -> Result<u32> {
        let words = self.words.lock().unwrap();
        Ok(words[word_index(self.base, words.len(), addr)?])
    }

    fn write_u32(&mut self, addr: u32, value: u32) -> Result<()> {
        let mut words = self.words.lock().unwrap();
        let index = word_index(self.base, words.len(), addr)?;
        words[index] = value;
        Ok(())
    }

    fn read_bulk(&mut self, addr: u32, buf: &mut [u32]) -> Result<()> {
        for (i, word) in buf.iter_mut().enumerate() {
            *word = self.read_u32(addr + i as u32 * 4)?;
        }
        Ok(())
    }

    fn write_bulk(&mut self, addr: u32, data: &[u32]) -> Result<()> {
        for (i, word) in data.iter().enumerate() {
            self.write_u32(addr + i as u32 * 4, *word)?;
        }
        Ok(())
    }
}

#[cfg(feature = "async")]
impl Reader for SharedDpm {
    type Error = Error;

    async fn read(&mut self, addr: u32, buf: &mut [u8]) -> Result<()> {
        self.read_bytes(addr, buf)
    }
}

#[cfg(feature = "async")]
impl Writer for SharedDpm {
    type Error = Error;

    async fn write(&mut self, addr: u32, data: &[u8]) -> Result<()> {
        self.write_bytes(addr, data)
    }
}

/// Run a future to completion on a fresh current-thread runtime.
#[cfg(feature = "async")]
pub(crate) fn block_on<F: core::future::Future>(future: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .build()
        .unwrap()
        .block_on(future)
}

/// An `embedded-io` stream with scripted input, recording output.
#[derive(Default)]
pub(crate) struct SimStream {
    pub(crate) input: VecDeque<u8>,
    pub(crate) output: Vec<u8>,
    pub(crate) flushes: usize,
}

impl embedded_io::ErrorType for SimStream {
    type Error = core::convert::Infallible;
}

impl embedded_io::Read for SimStream {
    fn read(&mut self, buf: &mut [u8]) -> core::result::Result<usize, Self::Error> {
        let count = buf.len().min(self.input.len());
        for (slot, byte) in buf.iter_mut().zip(self.input.drain(..count)) {
            *slot = byte;
        }
        Ok(count)
    }
}

impl embedded_io::ReadReady for SimStream {
    fn read_ready(&mut self) -> core::result::Result<bool, Self::Error> {
        Ok(!self.input.is_empty())
    }
}

impl embedded_io::Write for SimStream {
    fn write(&mut self, buf: &[u8]) -> core::result::Result<usize, Self::Error> {
        self.output.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> core::result::Result<(), Self::Error> {
        self.flushes += 1;
        Ok(())
    }
}

/// Function the simulated memory can call
#[cfg(feature = "call")]
pub(crate) type SimFunction = fn(u32, &mut dyn OutputSink);

/// Target memory as a byte array at `base`, plus a table of callable
/// functions.
pub(crate) struct SimMemory {
    base: u32,
    pub(crate) bytes: Vec<u8>,
    #[cfg(feature = "call")]
    functions: Vec<(u32, SimFunction)>,
}

impl SimMemory {
    pub(crate) fn new(base: u32, size: usize) -> Self {
        Self {
            base,
            bytes: vec![0; size],
            #[cfg(feature = "call")]
            functions: Vec::new(),
        }
    }

    #[cfg(feature = "call")]
    pub(crate) fn add_function(&mut self, addr: u32, function: SimFunction) {
        self.functions.push((addr, function));
    }

    fn range(&self, addr: u32, len: usize) -> Result<core::ops::Range<usize>> {
        let start = addr.checked_sub(self.base).ok_or(Error::InvalidOperation)? as usize;
        let end = start + len;
        if end > self.bytes.len() {
            return Err(Error::InvalidOperation);
        }
        Ok(start..end)
    }
}

impl MemoryAccess for SimMemory {
    fn load(&mut self, addr: u32, width: AccessWidth) -> Result<u64> {
        let range = self.range(addr, width.bytes())?;
        let mut bytes = [0u8; 8];
        bytes[..width.bytes()].copy_from_slice(&self.bytes[range]);
        Ok(u64::from_le_bytes(bytes))
    }

    fn store(&mut self, addr: u32, width: AccessWidth, value: u64) -> Result<()> {
        let range = self.range(addr, width.bytes())?;
        self.bytes[range].copy_from_slice(&value.to_le_bytes()[..width.bytes()]);
        Ok(())
    }

    fn read_area(&mut self, addr: u32, buf: &mut [u8]) -> Result<()> {
        let range = self.range(addr, buf.len())?;
        buf.copy_from_slice(&self.bytes[range]);
        Ok(())
    }

    fn write_area(&mut self, addr: u32, data: &[u8]) -> Result<()> {
        let range = self.range(addr, data.len())?;
        self.bytes[range].copy_from_slice(data);
        Ok(())
    }

    #[cfg(feature = "call")]
    fn call(&mut self, addr: u32, arg: u32, output: &mut dyn OutputSink) -> Result<()> {
        let (_, function) = self
            .functions
            .iter()
            .find(|(a, _)| *a == addr)
            .ok_or(Error::InvalidOperation)?;
        function(arg, output);
        Ok(())
    }
}

/// Transport fed from a byte queue, recording sent packets.
pub(crate) struct LoopbackTransport {
    pending: VecDeque<u8>,
    /// Most bytes handed over per receive call
    chunk: usize,
    pub(crate) sent: Vec<Vec<u8>>,
    pub(crate) receive_calls: usize,
}

impl LoopbackTransport {
    pub(crate) fn new() -> Self {
        Self::with_chunk(usize::MAX)
    }

    pub(crate) fn with_chunk(chunk: usize) -> Self {
        Self {
            pending: VecDeque::new(),
            chunk,
            sent: Vec::new(),
            receive_calls: 0,
        }
    }

    pub(crate) fn push(&mut self, bytes: &[u8]) {
        self.pending.extend(bytes);
    }

    pub(crate) fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Decode and remove everything sent so far, as (type, payload) pairs.
    pub(crate) fn take_sent(&mut self) -> Vec<(u8, Vec<u8>)> {
        self.sent
            .drain(..)
            .map(|packet| {
                let frame = decode_frame(&packet).unwrap().unwrap();
                assert_eq!(frame.wire_size, packet.len());
                (frame.raw_type, frame.payload.to_vec())
            })
            .collect()
    }
}

impl Transport for LoopbackTransport {
    fn receive<const N: usize>(&mut self, rx: &mut RingBuffer<N>) -> Result<()> {
        self.receive_calls += 1;
        let count = self.pending.len().min(self.chunk).min(rx.free_space());
        let bytes: Vec<u8> = self.pending.drain(..count).collect();
        rx.write(&bytes);
        Ok(())
    }

    fn send_packet(&mut self, packet: &[u8]) -> Result<()> {
        self.sent.push(packet.to_vec());
        Ok(())
    }
}

/// Build a frame from a raw type byte, which need not be a known type.
pub(crate) fn frame(raw_type: u8, payload: &[u8]) -> Vec<u8> {
    let size = (1 + payload.len()) as u16;
    let mut packet = vec![PACKET_START];
    packet.extend_from_slice(&size.to_le_bytes());
    packet.push(raw_type);
    packet.extend_from_slice(payload);
    let crc = crc16_area(&packet[1..]);
    packet.extend_from_slice(&crc.to_le_bytes());
    packet
}
