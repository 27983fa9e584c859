//! Asynchronous Client - typically used by a Host.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

use alloc::vec;
use alloc::vec::Vec;
#[allow(unused_imports)]
use log::{debug, trace, warn};

use crate::client::{MAX_READ_AREA, MAX_WRITE_AREA, MonitorClientConfig};
use crate::io::{Reader, Writer};
use crate::mailbox::{ReaderWriterDpmIo, ReaderWriterMailbox};
use crate::memory::AccessWidth;
use crate::packet::{Frame, MAX_PACKET_SIZE, PacketType, Status, decode_frame, encode_frame};
use crate::{Error, Result};

/// Yield delay for async polling loops.
///
/// Application must provide an implementation of this trait in order for the
/// async client to be able to yield, waiting for the device to read a
/// command or post a reply.
///
/// This trait keeps `dpm-monitor` free of any specific async runtime.
///
/// Example:
///
/// ```ignore
/// use tokio::time::{Duration, sleep};
/// struct Delay;
/// impl AsyncDelay for Delay {
///     async fn delay() {
///         sleep(Duration::from_millis(1)).await;
///     }
/// }
/// ```
pub trait AsyncDelay {
    fn delay() -> impl Future<Output = ()>;
}

/// Async monitor client.
///
/// Each operation posts one command packet, waits for the reply, and
/// acknowledges it so the device accepts the next command.
///
/// See [`AsyncDelay`] for required delay trait.
///
/// Example usage:
///
/// ```ignore
/// use dpm_monitor::client::{AsyncMonitorClient, MonitorClientConfig};
/// use dpm_monitor::memory::AccessWidth;
///
/// let config = MonitorClientConfig::new(0x2008_0000).with_max_polls(1000);
/// let mut reader = ...; // implement Reader trait
/// let mut writer = ...; // implement Writer trait
/// let mut client = AsyncMonitorClient::<_, _, Delay>::new(&mut reader, &mut writer, config);
/// let id = client.read(0x4000_0000, AccessWidth::U32).await?;
/// let output = client.call(0x0800_1001, 0).await?;
/// ```
pub struct AsyncMonitorClient<'a, R: Reader, W: Writer, D: AsyncDelay> {
    io: ReaderWriterDpmIo<'a, R, W>,
    config: MonitorClientConfig,
    _delay: core::marker::PhantomData<D>,
}

/// A reply packet, owned
#[derive(Debug, Clone, PartialEq)]
struct Reply {
    raw_type: u8,
    payload: Vec<u8>,
    status: Option<Status>,
}

impl From<Frame<'_>> for Reply {
    fn from(frame: Frame<'_>) -> Self {
        Self {
            raw_type: frame.raw_type,
            payload: frame.payload.to_vec(),
            status: frame.status(),
        }
    }
}

impl Reply {
    /// Turn anything but the expected reply into an error.
    fn expect_type(self, packet_type: PacketType) -> Result<Vec<u8>> {
        if self.raw_type == packet_type as u8 {
            return Ok(self.payload);
        }
        match self.status {
            Some(status) => Err(Error::Status(status)),
            None => {
                warn!("Expected {packet_type:?}, got type {:#04X}", self.raw_type);
                Err(Error::UnexpectedPacket)
            }
        }
    }

    fn expect_status(self, expected: Status) -> Result<()> {
        match self.status {
            Some(status) if status == expected => Ok(()),
            Some(status) => Err(Error::Status(status)),
            None => {
                warn!("Expected {expected:?}, got type {:#04X}", self.raw_type);
                Err(Error::UnexpectedPacket)
            }
        }
    }
}

impl<'a, R: Reader, W: Writer, D: AsyncDelay> AsyncMonitorClient<'a, R, W, D> {
    /// Create a new AsyncMonitorClient
    ///
    /// Arguments:
    /// - `reader`: Reader object to read from target
    /// - `writer`: Writer object to write to target
    /// - `config`: Configuration for creating the client
    pub fn new(reader: &'a mut R, writer: &'a mut W, config: MonitorClientConfig) -> Self {
        Self {
            io: ReaderWriterDpmIo::new(reader, writer),
            config,
            _delay: core::marker::PhantomData,
        }
    }

    /// Read a single value of the given width.
    pub async fn read(&mut self, addr: u32, width: AccessWidth) -> Result<u64> {
        let packet_type = match width {
            AccessWidth::U8 => PacketType::Read08,
            AccessWidth::U16 => PacketType::Read16,
            AccessWidth::U32 => PacketType::Read32,
            AccessWidth::U64 => PacketType::Read64,
        };

        let data = self
            .command(packet_type, &addr.to_le_bytes())
            .await?
            .expect_type(PacketType::ReadData)?;
        if data.len() != width.bytes() {
            warn!("{packet_type:?} returned {} bytes", data.len());
            return Err(Error::UnexpectedPacket);
        }

        let mut bytes = [0u8; 8];
        bytes[..data.len()].copy_from_slice(&data);
        Ok(u64::from_le_bytes(bytes))
    }

    /// Read `buf.len()` bytes starting at `addr`, using as many `ReadArea`
    /// commands as needed.
    pub async fn read_area(&mut self, addr: u32, buf: &mut [u8]) -> Result<()> {
        let mut chunk_addr = addr;
        for chunk in buf.chunks_mut(MAX_READ_AREA) {
            let mut payload = [0u8; 6];
            payload[..4].copy_from_slice(&chunk_addr.to_le_bytes());
            payload[4..].copy_from_slice(&(chunk.len() as u16).to_le_bytes());

            let data = self
                .command(PacketType::ReadArea, &payload)
                .await?
                .expect_type(PacketType::ReadData)?;
            if data.len() != chunk.len() {
                warn!("ReadArea returned {} of {} bytes", data.len(), chunk.len());
                return Err(Error::UnexpectedPacket);
            }
            chunk.copy_from_slice(&data);

            chunk_addr = chunk_addr.wrapping_add(chunk.len() as u32);
        }
        Ok(())
    }

    /// Write a single value of the given width.  Upper bits of `value`
    /// beyond the width are ignored.
    pub async fn write(&mut self, addr: u32, width: AccessWidth, value: u64) -> Result<()> {
        let packet_type = match width {
            AccessWidth::U8 => PacketType::Write08,
            AccessWidth::U16 => PacketType::Write16,
            AccessWidth::U32 => PacketType::Write32,
            AccessWidth::U64 => PacketType::Write64,
        };

        let mut payload = [0u8; 12];
        payload[..4].copy_from_slice(&addr.to_le_bytes());
        let len = 4 + width.bytes();
        payload[4..len].copy_from_slice(&value.to_le_bytes()[..width.bytes()]);

        self.command(packet_type, &payload[..len])
            .await?
            .expect_status(Status::Ok)
    }

    /// Write `data` starting at `addr`, using as many `WriteArea` commands
    /// as needed.
    pub async fn write_area(&mut self, addr: u32, data: &[u8]) -> Result<()> {
        let mut chunk_addr = addr;
        let mut payload = Vec::with_capacity(4 + MAX_WRITE_AREA);
        for chunk in data.chunks(MAX_WRITE_AREA) {
            payload.clear();
            payload.extend_from_slice(&chunk_addr.to_le_bytes());
            payload.extend_from_slice(chunk);

            self.command(PacketType::WriteArea, &payload)
                .await?
                .expect_status(Status::Ok)?;

            chunk_addr = chunk_addr.wrapping_add(chunk.len() as u32);
        }
        Ok(())
    }

    /// Call the function at `addr` with `arg`, returning everything it
    /// printed.
    ///
    /// On Thumb targets, set bit 0 of `addr`.
    pub async fn call(&mut self, addr: u32, arg: u32) -> Result<Vec<u8>> {
        let mut payload = [0u8; 8];
        payload[..4].copy_from_slice(&addr.to_le_bytes());
        payload[4..].copy_from_slice(&arg.to_le_bytes());

        self.send(PacketType::Execute, &payload).await?;
        let reply = self.receive().await?;
        if reply.status != Some(Status::Ok) {
            // Rejected, so this was an ordinary command response
            self.ack().await?;
            return reply.expect_status(Status::Ok).map(|_| Vec::new());
        }
        debug!("Call to {addr:#010X} started");

        let mut output = Vec::new();
        loop {
            let reply = self.receive().await?;
            if reply.raw_type == PacketType::CallData as u8 {
                output.extend_from_slice(&reply.payload);
                continue;
            }
            reply.expect_status(Status::CallFinished)?;
            break;
        }

        debug!("Call to {addr:#010X} finished, {} bytes output", output.len());
        Ok(output)
    }

    /// Acknowledge the last response.  Each operation does this itself, so
    /// this is only needed to recover a device left waiting for one, for
    /// example by a host that was interrupted.
    pub async fn ack(&mut self) -> Result<()> {
        self.send(PacketType::Ack, &[]).await
    }
}

// Internal functions
impl<'a, R: Reader, W: Writer, D: AsyncDelay> AsyncMonitorClient<'a, R, W, D> {
    /// Send a command, receive the reply and acknowledge it.
    async fn command(&mut self, packet_type: PacketType, payload: &[u8]) -> Result<Reply> {
        trace!("Sending {packet_type:?} ({} byte payload)", payload.len());
        self.send(packet_type, payload).await?;
        let reply = self.receive().await?;
        self.ack().await?;
        Ok(reply)
    }

    async fn send(&mut self, packet_type: PacketType, payload: &[u8]) -> Result<()> {
        let mut packet = vec![0u8; MAX_PACKET_SIZE];
        let len = encode_frame(&mut packet, packet_type, payload)?;
        packet.truncate(len);

        let max_polls = self.config.max_polls;
        let mut mailbox = self.mailbox().await?;
        let mut polls = 0u32;
        loop {
            match mailbox.send_data(&packet).await {
                Err(Error::Busy) => (),
                result => return result,
            }

            polls += 1;
            if max_polls.is_some_and(|max| polls >= max) {
                warn!("Device did not take {packet_type:?} after {polls} polls");
                return Err(Error::Timeout);
            }
            D::delay().await;
        }
    }

    async fn receive(&mut self) -> Result<Reply> {
        let max_polls = self.config.max_polls;
        let mut mailbox = self.mailbox().await?;

        // Wait for reply with polling
        let mut polls = 0u32;
        let size = loop {
            if let Some(size) = mailbox.receive_poll().await? {
                break size;
            }

            polls += 1;
            if max_polls.is_some_and(|max| polls >= max) {
                warn!("No reply from device after {polls} polls");
                return Err(Error::Timeout);
            }
            // Yield with reasonable delay to avoid spinning too fast
            D::delay().await;
        };

        let mut buf = vec![0u8; size];
        let len = mailbox.receive_bytes(&mut buf).await?;
        buf.truncate(len);

        let frame = decode_frame(&buf)?.ok_or(Error::BadFrame)?;
        if frame.wire_size != buf.len() {
            warn!(
                "Reply message {} bytes, frame {} bytes",
                buf.len(),
                frame.wire_size
            );
        }
        trace!("Received type {:#04X} ({} byte payload)", frame.raw_type, frame.payload.len());

        Ok(Reply::from(frame))
    }

    async fn mailbox<'method>(&'method mut self) -> Result<ReaderWriterMailbox<'method, 'a, R, W>> {
        ReaderWriterMailbox::attach(&mut self.io, self.config.dpm_base).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mailbox::{AckWait, Mailbox};
    use crate::monitor::{CommState, Monitor};
    use crate::testing::{SharedDpm, SimMemory, block_on};
    use crate::transport::MailboxTransport;

    const BASE: u32 = 0x2008_0000;
    const RAM: u32 = 0x2000_0000;

    struct Yield;

    impl AsyncDelay for Yield {
        async fn delay() {
            tokio::task::yield_now().await;
        }
    }

    fn reply(packet_type: PacketType, payload: &[u8]) -> Reply {
        let mut buf = [0u8; 16];
        let len = encode_frame(&mut buf, packet_type, payload).unwrap();
        Reply::from(decode_frame(&buf[..len]).unwrap().unwrap())
    }

    #[test]
    fn reply_interpretation() {
        let read_data = reply(PacketType::ReadData, &[1, 2]);
        assert_eq!(read_data.clone().expect_type(PacketType::ReadData), Ok(vec![1, 2]));
        assert_eq!(
            read_data.expect_status(Status::Ok),
            Err(Error::UnexpectedPacket)
        );

        let in_progress = reply(PacketType::Status, &[Status::CommandInProgress as u8]);
        assert_eq!(in_progress.status, Some(Status::CommandInProgress));
        assert_eq!(reply(PacketType::Status, &[0, 0]).status, None);
        assert_eq!(
            in_progress.clone().expect_type(PacketType::ReadData),
            Err(Error::Status(Status::CommandInProgress))
        );
        assert_eq!(
            in_progress.expect_status(Status::Ok),
            Err(Error::Status(Status::CommandInProgress))
        );
    }

    #[test]
    fn times_out_without_device() {
        let dpm = SharedDpm::new(BASE);
        Mailbox::init(&mut dpm.clone(), BASE).unwrap();

        let (mut reader, mut writer) = (dpm.clone(), dpm.clone());
        let config = MonitorClientConfig::new(BASE).with_max_polls(5);
        let mut client = AsyncMonitorClient::<_, _, Yield>::new(&mut reader, &mut writer, config);

        // The command is posted but nothing ever answers
        assert_eq!(
            block_on(client.read(RAM, AccessWidth::U32)),
            Err(Error::Timeout)
        );
        // And nothing takes it out of the mailbox either
        assert_eq!(block_on(client.ack()), Err(Error::Timeout));
    }

    #[test]
    fn reports_missing_window() {
        let dpm = SharedDpm::new(BASE);
        let (mut reader, mut writer) = (dpm.clone(), dpm.clone());
        let config = MonitorClientConfig::new(BASE).with_max_polls(5);
        let mut client = AsyncMonitorClient::<_, _, Yield>::new(&mut reader, &mut writer, config);

        assert_eq!(
            block_on(client.write(RAM, AccessWidth::U8, 1)),
            Err(Error::Uninit)
        );
    }

    #[test]
    fn against_device_in_same_thread() {
        let dpm = SharedDpm::new(BASE);
        let mut device_io = dpm.clone();
        let mailbox = Mailbox::init(&mut device_io, BASE).unwrap();
        // The device never waits for the host here, the test interleaves
        // them by hand
        let transport = MailboxTransport::new(mailbox, AckWait::Polls(1));
        let mut monitor = Monitor::new(transport, SimMemory::new(RAM, 0x100));

        let (mut reader, mut writer) = (dpm.clone(), dpm.clone());
        let config = MonitorClientConfig::new(BASE).with_max_polls(5);
        let mut client = AsyncMonitorClient::<_, _, Yield>::new(&mut reader, &mut writer, config);

        // Post the command and let the device answer it
        block_on(client.send(PacketType::Write16, &[0x10, 0, 0, 0x20, 0x34, 0x12])).unwrap();
        for _ in 0..20 {
            // The send times out as the host is not reading yet
            monitor.poll().unwrap();
        }
        assert_eq!(&monitor.memory().bytes[0x10..0x12], &[0x34, 0x12]);

        let reply = block_on(client.receive()).unwrap();
        assert_eq!(reply.expect_status(Status::Ok), Ok(()));
        block_on(client.ack()).unwrap();
        for _ in 0..20 {
            monitor.poll().unwrap();
        }
        assert_eq!(monitor.comm_state(), CommState::Connected);
    }
}
