//! Bounded circular byte store.
//!
//! The ring buffer is the staging area between a transport and the packet
//! decoder.  It is single-threaded and polled: there is no blocking and no
//! notification.
//!
//! Writes never fail.  If there is not enough free space, [`RingBuffer::write()`]
//! stores as much as fits and returns the number of bytes it stored.  Callers
//! that ignore the return value lose data without any other signal.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

/// Ring buffer with a fixed capacity of `N` bytes.
pub struct RingBuffer<const N: usize> {
    buf: [u8; N],
    fill: usize,
    read_offset: usize,
    write_offset: usize,
}

impl<const N: usize> RingBuffer<N> {
    /// Create an empty ring buffer.  `const` so it can be placed in a
    /// `static`.
    #[allow(clippy::new_without_default)]
    pub const fn new() -> Self {
        Self {
            buf: [0; N],
            fill: 0,
            read_offset: 0,
            write_offset: 0,
        }
    }

    /// Total capacity in bytes
    pub const fn capacity(&self) -> usize {
        N
    }

    /// Number of bytes waiting to be read
    pub fn fill_level(&self) -> usize {
        self.fill
    }

    /// Number of bytes which can still be written
    pub fn free_space(&self) -> usize {
        N - self.fill
    }

    pub fn is_empty(&self) -> bool {
        self.fill == 0
    }

    pub fn is_full(&self) -> bool {
        self.fill == N
    }

    /// Write as many bytes of `data` as fit.
    ///
    /// Returns the number of bytes written, which is less than `data.len()`
    /// if the buffer ran out of space.  The rest is discarded.
    pub fn write(&mut self, data: &[u8]) -> usize {
        let count = data.len().min(self.free_space());

        // At most two chunks: up to the end of the buffer, then from the start
        let first = count.min(N - self.write_offset);
        self.buf[self.write_offset..self.write_offset + first].copy_from_slice(&data[..first]);
        let second = count - first;
        self.buf[..second].copy_from_slice(&data[first..count]);

        self.write_offset = wrap::<N>(self.write_offset + count);
        self.fill += count;

        count
    }

    /// Write a single byte.  Returns `false` if the buffer is full.
    pub fn write_char(&mut self, byte: u8) -> bool {
        if self.is_full() {
            return false;
        }

        self.buf[self.write_offset] = byte;
        self.write_offset = wrap::<N>(self.write_offset + 1);
        self.fill += 1;

        true
    }

    /// Read up to `buf.len()` bytes.  Returns the number of bytes read.
    pub fn read(&mut self, buf: &mut [u8]) -> usize {
        let count = buf.len().min(self.fill);

        let first = count.min(N - self.read_offset);
        buf[..first].copy_from_slice(&self.buf[self.read_offset..self.read_offset + first]);
        let second = count - first;
        buf[first..count].copy_from_slice(&self.buf[..second]);

        self.read_offset = wrap::<N>(self.read_offset + count);
        self.fill -= count;

        count
    }

    /// Read a single byte, or `None` if the buffer is empty.
    pub fn get_char(&mut self) -> Option<u8> {
        if self.is_empty() {
            return None;
        }

        let byte = self.buf[self.read_offset];
        self.read_offset = wrap::<N>(self.read_offset + 1);
        self.fill -= 1;

        Some(byte)
    }

    /// Return the byte `offset` bytes after the read position without
    /// consuming anything.
    ///
    /// The caller must ensure `offset < fill_level()`.  Beyond that the
    /// returned byte is stale buffer contents.
    pub fn peek(&self, offset: usize) -> u8 {
        debug_assert!(offset < self.fill, "peek beyond fill level");
        self.buf[wrap::<N>(self.read_offset + offset % N)]
    }

    /// Little-endian u16 starting `offset` bytes after the read position.
    pub fn peek_u16_le(&self, offset: usize) -> u16 {
        u16::from_le_bytes([self.peek(offset), self.peek(offset + 1)])
    }

    /// Little-endian u32 starting `offset` bytes after the read position.
    pub fn peek_u32_le(&self, offset: usize) -> u32 {
        let mut bytes = [0u8; 4];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = self.peek(offset + i);
        }
        u32::from_le_bytes(bytes)
    }

    /// Little-endian u64 starting `offset` bytes after the read position.
    pub fn peek_u64_le(&self, offset: usize) -> u64 {
        let mut bytes = [0u8; 8];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = self.peek(offset + i);
        }
        u64::from_le_bytes(bytes)
    }

    /// Drop `count` bytes without copying them.
    ///
    /// The caller must ensure `count <= fill_level()`.
    pub fn skip(&mut self, count: usize) {
        debug_assert!(count <= self.fill, "skip beyond fill level");
        let count = count.min(self.fill);

        self.read_offset = wrap::<N>(self.read_offset + count);
        self.fill -= count;
    }

    /// Consume and return the longest run of bytes available without
    /// wrapping, up to `max_len` bytes.
    ///
    /// The returned slice may be shorter than the fill level even when
    /// `max_len` is larger, if the readable data wraps around the end of the
    /// buffer.  Call again to get the rest.
    pub fn get_continuous_block(&mut self, max_len: usize) -> &[u8] {
        let count = max_len.min(self.fill).min(N - self.read_offset);
        let start = self.read_offset;

        self.read_offset = wrap::<N>(self.read_offset + count);
        self.fill -= count;

        &self.buf[start..start + count]
    }
}

// Offsets never exceed 2 * N, so a single subtraction wraps them
const fn wrap<const N: usize>(offset: usize) -> usize {
    if offset >= N { offset - N } else { offset }
}
