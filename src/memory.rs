//! Target memory access used by the monitor's command handlers.
//!
//! The monitor reads, writes and calls whatever addresses the host sends it.
//! No bounds, alignment or permission checks are made by the monitor itself:
//! the host is trusted.  All such access goes through the [`MemoryAccess`]
//! trait, so the protocol logic can be tested against simulated memory, and
//! so that the only unsafe code on the device is [`RawMemory`].

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

#[cfg(feature = "call")]
use core::cell::UnsafeCell;
#[cfg(feature = "call")]
use core::ptr::NonNull;

#[allow(unused_imports)]
use log::debug;

use crate::{Error, Result};

/// Width of a single memory access
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessWidth {
    U8,
    U16,
    U32,
    U64,
}

impl AccessWidth {
    /// Size of the access in bytes
    pub const fn bytes(self) -> usize {
        match self {
            AccessWidth::U8 => 1,
            AccessWidth::U16 => 2,
            AccessWidth::U32 => 4,
            AccessWidth::U64 => 8,
        }
    }
}

/// Byte sink receiving the output of a called function.
///
/// Output only.  [`Self::get()`] and [`Self::peek()`] exist so the sink can
/// stand in for a full console, and report that no input is available.
pub trait OutputSink {
    /// Output one byte
    fn put(&mut self, byte: u8);

    /// Push out anything buffered
    fn flush(&mut self);

    /// Input one byte.  There is never any input.
    fn get(&mut self) -> u8 {
        0
    }

    /// Whether input is available
    fn peek(&mut self) -> bool {
        false
    }
}

impl core::fmt::Write for dyn OutputSink + '_ {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        for byte in s.bytes() {
            self.put(byte);
        }
        Ok(())
    }
}

/// Access to the target's memory.
pub trait MemoryAccess {
    /// Read a single value of the given width.  The value is returned zero
    /// extended.
    fn load(&mut self, addr: u32, width: AccessWidth) -> Result<u64>;

    /// Write a single value of the given width.  Upper bits of `value`
    /// beyond the width are ignored.
    fn store(&mut self, addr: u32, width: AccessWidth, value: u64) -> Result<()>;

    /// Byte copy from target memory
    fn read_area(&mut self, addr: u32, buf: &mut [u8]) -> Result<()>;

    /// Byte copy to target memory
    fn write_area(&mut self, addr: u32, data: &[u8]) -> Result<()>;

    /// Call the function at `addr` with a single argument.  Anything the
    /// function prints must go to `output`.
    #[cfg(feature = "call")]
    fn call(&mut self, addr: u32, arg: u32, output: &mut dyn OutputSink) -> Result<()>;
}

/// Direct access to the device's own address space.
pub struct RawMemory {
    _private: (),
}

impl RawMemory {
    /// Create a new RawMemory instance.
    ///
    /// # Safety
    ///
    /// Every address the monitor receives is dereferenced or called as is.
    /// The caller must ensure whoever can send commands is allowed to do
    /// anything to the device.  Called functions print through the global
    /// hooks (see [`with_output()`]), so with the `call` feature the monitor
    /// using this must be the only user of those hooks and run in a single
    /// execution context.
    #[allow(clippy::new_without_default)]
    pub const unsafe fn new() -> Self {
        Self { _private: () }
    }
}

fn check_aligned(addr: u32, width: AccessWidth) -> Result<()> {
    if addr as usize % width.bytes() != 0 {
        debug!("Unaligned {width:?} access at {addr:#010X}");
        Err(Error::NotAligned)
    } else {
        Ok(())
    }
}

impl MemoryAccess for RawMemory {
    fn load(&mut self, addr: u32, width: AccessWidth) -> Result<u64> {
        check_aligned(addr, width)?;
        let addr = addr as usize;
        let value = unsafe {
            match width {
                AccessWidth::U8 => core::ptr::read_volatile(addr as *const u8) as u64,
                AccessWidth::U16 => core::ptr::read_volatile(addr as *const u16) as u64,
                AccessWidth::U32 => core::ptr::read_volatile(addr as *const u32) as u64,
                AccessWidth::U64 => core::ptr::read_volatile(addr as *const u64),
            }
        };
        Ok(value)
    }

    fn store(&mut self, addr: u32, width: AccessWidth, value: u64) -> Result<()> {
        check_aligned(addr, width)?;
        let addr = addr as usize;
        unsafe {
            match width {
                AccessWidth::U8 => core::ptr::write_volatile(addr as *mut u8, value as u8),
                AccessWidth::U16 => core::ptr::write_volatile(addr as *mut u16, value as u16),
                AccessWidth::U32 => core::ptr::write_volatile(addr as *mut u32, value as u32),
                AccessWidth::U64 => core::ptr::write_volatile(addr as *mut u64, value),
            }
        }
        Ok(())
    }

    fn read_area(&mut self, addr: u32, buf: &mut [u8]) -> Result<()> {
        for (i, byte) in buf.iter_mut().enumerate() {
            *byte = unsafe { core::ptr::read_volatile((addr as usize + i) as *const u8) };
        }
        Ok(())
    }

    fn write_area(&mut self, addr: u32, data: &[u8]) -> Result<()> {
        for (i, byte) in data.iter().enumerate() {
            unsafe { core::ptr::write_volatile((addr as usize + i) as *mut u8, *byte) };
        }
        Ok(())
    }

    /// Calls `addr` as an `extern "C" fn(u32)`.  On Thumb targets the host
    /// must set bit 0 of the address.
    ///
    /// The function reaches `output` by calling [`monitor_putchar()`],
    /// [`monitor_putrawchar()`] and [`monitor_flush()`].
    #[cfg(feature = "call")]
    fn call(&mut self, addr: u32, arg: u32, output: &mut dyn OutputSink) -> Result<()> {
        if addr == 0 {
            return Err(Error::InvalidOperation);
        }
        let func: extern "C" fn(u32) = unsafe { core::mem::transmute(addr as usize) };
        // SAFETY: RawMemory::new() requires the monitor to own the device's
        // single execution context, and the called function runs in it.
        unsafe { with_output(output, || func(arg)) };
        Ok(())
    }
}

// The sink of the call in progress, if any.  Only touched from the monitor's
// execution context, which the unsafe entry points below require.
#[cfg(feature = "call")]
struct ActiveOutput(UnsafeCell<Option<NonNull<dyn OutputSink>>>);

#[cfg(feature = "call")]
unsafe impl Sync for ActiveOutput {}

#[cfg(feature = "call")]
static ACTIVE_OUTPUT: ActiveOutput = ActiveOutput(UnsafeCell::new(None));

/// Run `f` with `output` installed as the target of [`monitor_putchar()`],
/// [`monitor_putrawchar()`] and [`monitor_flush()`].  The previous target,
/// if any, is restored afterwards.
///
/// # Safety
///
/// The hooks share one global slot.  While `f` runs, the hooks and any other
/// `with_output` must only be called from the thread (or interrupt level)
/// calling `with_output`.  On a device with a single execution context this
/// always holds.
#[cfg(feature = "call")]
pub unsafe fn with_output<R>(output: &mut dyn OutputSink, f: impl FnOnce() -> R) -> R {
    let ptr: NonNull<dyn OutputSink + '_> = NonNull::from(output);
    // Erase the lifetime.  The pointer is removed again before output's
    // borrow ends.
    let ptr: NonNull<dyn OutputSink> = unsafe { core::mem::transmute(ptr) };

    let previous = unsafe { ACTIVE_OUTPUT.0.get().replace(Some(ptr)) };
    let result = f();
    unsafe { *ACTIVE_OUTPUT.0.get() = previous };

    result
}

// Run `f` on the installed sink.  The slot is emptied while `f` runs, so a
// sink which calls back into a hook gets no second `&mut` to itself.
#[cfg(feature = "call")]
unsafe fn with_active_sink(f: impl FnOnce(&mut dyn OutputSink)) {
    let Some(mut sink) = (unsafe { ACTIVE_OUTPUT.0.get().replace(None) }) else {
        return;
    };
    f(unsafe { sink.as_mut() });
    unsafe { *ACTIVE_OUTPUT.0.get() = Some(sink) };
}

/// Console output for functions called by the monitor.  The character is
/// limited to 7-bit ASCII.
///
/// Outside of a call, and from inside the sink itself, the character is
/// dropped.
///
/// # Safety
///
/// Must be called from the execution context running the monitor, as
/// required by [`with_output()`].
#[cfg(feature = "call")]
#[unsafe(no_mangle)]
pub unsafe extern "C" fn monitor_putchar(ch: u32) {
    unsafe { with_active_sink(|sink| sink.put((ch & 0x7f) as u8)) };
}

/// Raw byte output for functions called by the monitor, for binary data.
///
/// # Safety
///
/// As for [`monitor_putchar()`].
#[cfg(feature = "call")]
#[unsafe(no_mangle)]
pub unsafe extern "C" fn monitor_putrawchar(byte: u8) {
    unsafe { with_active_sink(|sink| sink.put(byte)) };
}

/// Flush console output of a function called by the monitor.
///
/// # Safety
///
/// As for [`monitor_putchar()`].
#[cfg(feature = "call")]
#[unsafe(no_mangle)]
pub unsafe extern "C" fn monitor_flush() {
    unsafe { with_active_sink(|sink| sink.flush()) };
}
