//! Async I/O traits for host access to target memory.
//!
//! The host reaches the device's DPM window through whatever path the rig
//! provides: a PCI-Express BAR, a debug probe, or a simulated window in a
//! test.  These traits abstract that path.  The mailbox and the monitor client
//! only ever use them on the DPM window itself.
//!
//! # Possible implementations
//!
//! - A mapped PCI-Express BAR on the test PC
//! - SWD or JTAG access via a debug probe
//! - An in-memory buffer shared with a simulated device, for tests
//!
//! # Address Space
//!
//! Addresses are absolute, as they appear in the target's memory map.  The
//! implementation is responsible for translating them to whatever it uses
//! internally (BAR offsets, probe commands, buffer indices, etc.).
//!
//! The mailbox protocol relies on single 4 byte, word aligned accesses being
//! atomic.  Implementations must not split them.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

/// Reader trait.
pub trait Reader {
    /// The error type returned by read operations.
    ///
    /// This allows implementations to use their own error types
    /// (e.g., `std::io::Error` for a mapped BAR, custom errors for SWD).
    type Error: core::fmt::Debug;

    /// Read bytes from the target at the specified absolute address.
    ///
    /// # Arguments
    ///
    /// * `addr` - The absolute address to read from (e.g., `0x20080000`)
    /// * `buf` - Buffer to fill with the read data
    ///
    /// # Errors
    ///
    /// Returns an error if the address is not accessible or the underlying
    /// access fails.
    fn read(
        &mut self,
        addr: u32,
        buf: &mut [u8],
    ) -> impl core::future::Future<Output = Result<(), Self::Error>> + Send;
}

/// Writer trait.
pub trait Writer {
    /// The error type returned by write operations.
    type Error: core::fmt::Debug;

    /// Write bytes to the target at the specified absolute address.
    ///
    /// # Arguments
    ///
    /// * `addr` - The absolute address to write to (e.g., `0x20080100`)
    /// * `data` - Data to write
    ///
    /// # Errors
    ///
    /// Returns an error if the address is not accessible, is read-only, or
    /// the underlying access fails.
    fn write(
        &mut self,
        addr: u32,
        data: &[u8],
    ) -> impl core::future::Future<Output = Result<(), Self::Error>> + Send;
}
