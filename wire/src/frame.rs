//! Frame header and payload (de)serialization (spec.md §3, §6).
//!
//! This module is pure: it turns byte buffers into [`Frame`]s and back. The
//! actual socket I/O and SCM_RIGHTS ancillary-data handling live in the
//! `link` crate; this crate only knows how to lay out bytes.

use std::os::unix::io::RawFd;

use crate::command::Command;
use crate::error::WireError;
use crate::{MAX_DEVICES, MAX_FDS};

/// Size in bytes of the on-wire header, including padding to 8-byte
/// alignment (spec.md §6): `u32 cmd; u32 bytestream; u64 size; u64 id; u64
/// size_id; u8 num_fds` padded out to a multiple of 8.
pub const HEADER_LEN: usize = 40;

/// The fixed-size header that precedes every frame's payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub cmd: u32,
    pub bytestream: bool,
    pub size: u64,
    pub id: u64,
    /// Present on the wire but only sometimes populated by the proxy; safe
    /// to ignore on receive (spec.md §9(b)).
    pub size_id: u64,
    pub num_fds: u8,
}

impl Header {
    pub fn to_bytes(self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        buf[0..4].copy_from_slice(&self.cmd.to_ne_bytes());
        buf[4..8].copy_from_slice(&(self.bytestream as u32).to_ne_bytes());
        buf[8..16].copy_from_slice(&self.size.to_ne_bytes());
        buf[16..24].copy_from_slice(&self.id.to_ne_bytes());
        buf[24..32].copy_from_slice(&self.size_id.to_ne_bytes());
        buf[32] = self.num_fds;
        // buf[33..40] stays zeroed padding.
        buf
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self, WireError> {
        if buf.len() < HEADER_LEN {
            return Err(WireError::Truncated { expected: HEADER_LEN, got: buf.len() });
        }
        let cmd = u32::from_ne_bytes(buf[0..4].try_into().unwrap());
        let bytestream = u32::from_ne_bytes(buf[4..8].try_into().unwrap()) != 0;
        let size = u64::from_ne_bytes(buf[8..16].try_into().unwrap());
        let id = u64::from_ne_bytes(buf[16..24].try_into().unwrap());
        let size_id = u64::from_ne_bytes(buf[24..32].try_into().unwrap());
        let num_fds = buf[32];
        if num_fds as usize > MAX_FDS {
            return Err(WireError::TooManyFds(num_fds as usize));
        }
        Ok(Header { cmd, bytestream, size, id, size_id, num_fds })
    }
}

/// PCI/BAR address-space selector and access shape used by `BAR_WRITE` /
/// `BAR_READ` (inline payload).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BarAccess {
    /// `true` selects the memory address space, `false` the I/O space.
    pub memory: bool,
    pub addr: u64,
    pub val: u64,
    /// Access width in bytes: 1, 2, 4 or 8.
    pub size: u32,
}

impl BarAccess {
    const LEN: usize = 24;

    fn to_bytes(self) -> [u8; Self::LEN] {
        let mut buf = [0u8; Self::LEN];
        buf[0..4].copy_from_slice(&(self.memory as u32).to_ne_bytes());
        buf[4..12].copy_from_slice(&self.addr.to_ne_bytes());
        buf[12..20].copy_from_slice(&self.val.to_ne_bytes());
        buf[20..24].copy_from_slice(&self.size.to_ne_bytes());
        buf
    }

    fn from_bytes(buf: &[u8]) -> Result<Self, WireError> {
        if buf.len() < Self::LEN {
            return Err(WireError::Truncated { expected: Self::LEN, got: buf.len() });
        }
        Ok(BarAccess {
            memory: u32::from_ne_bytes(buf[0..4].try_into().unwrap()) != 0,
            addr: u64::from_ne_bytes(buf[4..12].try_into().unwrap()),
            val: u64::from_ne_bytes(buf[12..20].try_into().unwrap()),
            size: u32::from_ne_bytes(buf[20..24].try_into().unwrap()),
        })
    }
}

/// Out-of-line payload shape used by `PCI_CONFIG_WRITE` / `PCI_CONFIG_READ`.
///
/// These commands are `bytestream` on the wire (spec.md §4.5's table), but
/// the bytes they carry are this fixed-size struct rather than an opaque
/// blob, so we still parse it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PciConfigAccess {
    pub addr: u64,
    pub val: u64,
    pub len: u32,
}

impl PciConfigAccess {
    pub const LEN: usize = 20;

    pub fn to_bytes(self) -> [u8; Self::LEN] {
        let mut buf = [0u8; Self::LEN];
        buf[0..8].copy_from_slice(&self.addr.to_ne_bytes());
        buf[8..16].copy_from_slice(&self.val.to_ne_bytes());
        buf[16..20].copy_from_slice(&self.len.to_ne_bytes());
        buf
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self, WireError> {
        if buf.len() < Self::LEN {
            return Err(WireError::Truncated { expected: Self::LEN, got: buf.len() });
        }
        Ok(PciConfigAccess {
            addr: u64::from_ne_bytes(buf[0..8].try_into().unwrap()),
            val: u64::from_ne_bytes(buf[8..16].try_into().unwrap()),
            len: u32::from_ne_bytes(buf[16..20].try_into().unwrap()),
        })
    }
}

/// Reply payload for `GET_PCI_INFO` (`RET_PCI_INFO`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PciInfo {
    pub vendor_id: u16,
    pub device_id: u16,
    pub class_id: u16,
    pub subsystem_vendor_id: u16,
    pub subsystem_id: u16,
}

impl PciInfo {
    const LEN: usize = 10;

    fn to_bytes(self) -> [u8; Self::LEN] {
        let mut buf = [0u8; Self::LEN];
        buf[0..2].copy_from_slice(&self.vendor_id.to_ne_bytes());
        buf[2..4].copy_from_slice(&self.device_id.to_ne_bytes());
        buf[4..6].copy_from_slice(&self.class_id.to_ne_bytes());
        buf[6..8].copy_from_slice(&self.subsystem_vendor_id.to_ne_bytes());
        buf[8..10].copy_from_slice(&self.subsystem_id.to_ne_bytes());
        buf
    }

    fn from_bytes(buf: &[u8]) -> Result<Self, WireError> {
        if buf.len() < Self::LEN {
            return Err(WireError::Truncated { expected: Self::LEN, got: buf.len() });
        }
        Ok(PciInfo {
            vendor_id: u16::from_ne_bytes(buf[0..2].try_into().unwrap()),
            device_id: u16::from_ne_bytes(buf[2..4].try_into().unwrap()),
            class_id: u16::from_ne_bytes(buf[4..6].try_into().unwrap()),
            subsystem_vendor_id: u16::from_ne_bytes(buf[6..8].try_into().unwrap()),
            subsystem_id: u16::from_ne_bytes(buf[8..10].try_into().unwrap()),
        })
    }
}

/// Reply payload for `BAR_READ` (`MMIO_RETURN`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MmioReturn {
    /// The bus-read result, already masked to the requested access width, or
    /// `u64::MAX` on a MEMTX error.
    pub val: u64,
}

impl MmioReturn {
    const LEN: usize = 8;

    fn to_bytes(self) -> [u8; Self::LEN] {
        self.val.to_ne_bytes()
    }

    fn from_bytes(buf: &[u8]) -> Result<Self, WireError> {
        if buf.len() < Self::LEN {
            return Err(WireError::Truncated { expected: Self::LEN, got: buf.len() });
        }
        Ok(MmioReturn { val: u64::from_ne_bytes(buf[0..8].try_into().unwrap()) })
    }
}

/// Inline payload for `SET_IRQFD`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IrqFdInfo {
    pub vector: u32,
}

impl IrqFdInfo {
    const LEN: usize = 4;

    fn to_bytes(self) -> [u8; Self::LEN] {
        self.vector.to_ne_bytes()
    }

    fn from_bytes(buf: &[u8]) -> Result<Self, WireError> {
        if buf.len() < Self::LEN {
            return Err(WireError::Truncated { expected: Self::LEN, got: buf.len() });
        }
        Ok(IrqFdInfo { vector: u32::from_ne_bytes(buf[0..4].try_into().unwrap()) })
    }
}

/// Inline payload for `RUNSTATE_SET`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunState {
    /// Opaque runstate ordinal; interpretation belongs to the host VM state
    /// machine, out of scope here (spec.md §1).
    pub state: u32,
}

impl RunState {
    const LEN: usize = 4;

    fn to_bytes(self) -> [u8; Self::LEN] {
        self.state.to_ne_bytes()
    }

    fn from_bytes(buf: &[u8]) -> Result<Self, WireError> {
        if buf.len() < Self::LEN {
            return Err(WireError::Truncated { expected: Self::LEN, got: buf.len() });
        }
        Ok(RunState { state: u32::from_ne_bytes(buf[0..4].try_into().unwrap()) })
    }
}

/// The command-specific payload. Re-architects the original tagged union
/// (`data1`/`data2`) as a sum type (spec.md §9).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// No payload (`INIT`, `GET_PCI_INFO`, `DEVICE_RESET`, `REMOTE_PING`,
    /// `START_MIG_OUT`, `START_MIG_IN`).
    None,
    /// Out-of-line opaque bytes: JSON option blobs, or a raw
    /// [`PciConfigAccess`] for the config commands.
    Bytestream(Vec<u8>),
    Bar(BarAccess),
    PciInfo(PciInfo),
    MmioReturn(MmioReturn),
    Irq(IrqFdInfo),
    RunState(RunState),
}

impl Payload {
    fn inline_bytes(&self) -> Option<Vec<u8>> {
        match self {
            Payload::None | Payload::Bytestream(_) => None,
            Payload::Bar(b) => Some(b.to_bytes().to_vec()),
            Payload::PciInfo(p) => Some(p.to_bytes().to_vec()),
            Payload::MmioReturn(m) => Some(m.to_bytes().to_vec()),
            Payload::Irq(i) => Some(i.to_bytes().to_vec()),
            Payload::RunState(r) => Some(r.to_bytes().to_vec()),
        }
    }
}

/// A fully decoded (or not-yet-sent) frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub cmd: Command,
    pub id: u64,
    pub payload: Payload,
    /// Ancillary file descriptors attached to this frame. Ownership (i.e.
    /// closing on drop) is the `link` crate's concern; this is just the raw
    /// numbers for construction/inspection.
    pub fds: Vec<RawFd>,
}

impl Frame {
    /// Builds a frame, computing the header fields from `cmd` and `payload`.
    pub fn new(cmd: Command, id: u64, payload: Payload, fds: Vec<RawFd>) -> Result<Self, WireError> {
        if id >= MAX_DEVICES as u64 {
            return Err(WireError::DeviceIdOutOfRange(id));
        }
        if fds.len() > MAX_FDS {
            return Err(WireError::TooManyFds(fds.len()));
        }
        Ok(Frame { cmd, id, payload, fds })
    }

    /// The header as it would appear on the wire for this frame.
    pub fn header(&self) -> Header {
        let bytestream = matches!(self.payload, Payload::Bytestream(_));
        let size = match &self.payload {
            Payload::Bytestream(b) => b.len() as u64,
            Payload::None => 0,
            other => other.inline_bytes().map(|b| b.len()).unwrap_or(0) as u64,
        };
        Header {
            cmd: self.cmd.into(),
            bytestream,
            size,
            id: self.id,
            size_id: 0,
            num_fds: self.fds.len() as u8,
        }
    }

    /// The bytes that follow the header on the wire: either the out-of-line
    /// buffer or the inline union, whichever applies.
    pub fn body_bytes(&self) -> Vec<u8> {
        match &self.payload {
            Payload::Bytestream(b) => b.clone(),
            Payload::None => Vec::new(),
            other => other.inline_bytes().unwrap_or_default(),
        }
    }

    /// Parses a frame from an already-read header, body and FD list.
    ///
    /// `body` is the bytes following the header: the out-of-line buffer if
    /// `header.bytestream`, else the inline union trailing the header.
    pub fn parse(header: Header, body: &[u8], fds: Vec<RawFd>) -> Result<Self, WireError> {
        let cmd = Command::try_from(header.cmd)?;
        if header.id >= MAX_DEVICES as u64 {
            return Err(WireError::DeviceIdOutOfRange(header.id));
        }
        if header.bytestream != cmd.is_bytestream() {
            return Err(WireError::BadPayloadSize {
                cmd,
                expected: 0,
                got: body.len(),
            });
        }

        let payload = if header.bytestream {
            Payload::Bytestream(body.to_vec())
        } else {
            match cmd {
                Command::Init
                | Command::GetPciInfo
                | Command::DeviceReset
                | Command::RemotePing
                | Command::StartMigOut
                | Command::StartMigIn => {
                    if !body.is_empty() {
                        return Err(WireError::BadPayloadSize { cmd, expected: 0, got: body.len() });
                    }
                    Payload::None
                }
                Command::BarWrite | Command::BarRead => Payload::Bar(BarAccess::from_bytes(body)?),
                Command::RetPciInfo => Payload::PciInfo(PciInfo::from_bytes(body)?),
                Command::MmioReturn => Payload::MmioReturn(MmioReturn::from_bytes(body)?),
                Command::SetIrqfd => Payload::Irq(IrqFdInfo::from_bytes(body)?),
                Command::RunstateSet => Payload::RunState(RunState::from_bytes(body)?),
                Command::PciConfigWrite | Command::PciConfigRead | Command::SyncSysmem
                | Command::DevOpts | Command::DeviceAdd | Command::DeviceDel => {
                    unreachable!("bytestream mismatch already rejected above")
                }
                Command::Max => unreachable!("MAX is never a valid wire command"),
            }
        };

        Ok(Frame { cmd, id: header.id, payload, fds })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trip() {
        let h = Header { cmd: 6, bytestream: false, size: 24, id: 7, size_id: 0, num_fds: 3 };
        let bytes = h.to_bytes();
        assert_eq!(bytes.len(), HEADER_LEN);
        let back = Header::from_bytes(&bytes).unwrap();
        assert_eq!(h, back);
    }

    #[test]
    fn header_rejects_too_many_fds() {
        let mut bytes = [0u8; HEADER_LEN];
        bytes[32] = (MAX_FDS + 1) as u8;
        assert!(matches!(Header::from_bytes(&bytes), Err(WireError::TooManyFds(_))));
    }

    #[test]
    fn header_rejects_truncated_buffer() {
        let bytes = [0u8; HEADER_LEN - 1];
        assert!(matches!(Header::from_bytes(&bytes), Err(WireError::Truncated { .. })));
    }

    #[test]
    fn bar_access_round_trip() {
        let frame = Frame::new(
            Command::BarRead,
            3,
            Payload::Bar(BarAccess { memory: true, addr: 0x1000, val: 0, size: 1 }),
            vec![],
        )
        .unwrap();
        let header = frame.header();
        assert!(!header.bytestream);
        assert_eq!(header.size as usize, 24);
        let body = frame.body_bytes();
        let back = Frame::parse(header, &body, vec![]).unwrap();
        assert_eq!(frame, back);
    }

    #[test]
    fn pci_config_access_is_bytestream() {
        let access = PciConfigAccess { addr: 0, val: 0, len: 4 };
        let frame = Frame::new(
            Command::PciConfigRead,
            3,
            Payload::Bytestream(access.to_bytes().to_vec()),
            vec![99],
        )
        .unwrap();
        let header = frame.header();
        assert!(header.bytestream);
        assert_eq!(header.num_fds, 1);
        let body = frame.body_bytes();
        let back = Frame::parse(header, &body, vec![99]).unwrap();
        let Payload::Bytestream(raw) = &back.payload else { panic!("expected bytestream") };
        assert_eq!(PciConfigAccess::from_bytes(raw).unwrap(), access);
    }

    #[test]
    fn round_trip_every_command_with_matching_shape() {
        let cases: Vec<(Command, Payload)> = vec![
            (Command::Init, Payload::None),
            (Command::GetPciInfo, Payload::None),
            (Command::RetPciInfo, Payload::PciInfo(PciInfo {
                vendor_id: 1, device_id: 2, class_id: 3, subsystem_vendor_id: 4, subsystem_id: 5,
            })),
            (Command::BarWrite, Payload::Bar(BarAccess { memory: false, addr: 4, val: 9, size: 2 })),
            (Command::MmioReturn, Payload::MmioReturn(MmioReturn { val: 0xdead_beef })),
            (Command::SetIrqfd, Payload::Irq(IrqFdInfo { vector: 2 })),
            (Command::DeviceReset, Payload::None),
            (Command::RemotePing, Payload::None),
            (Command::RunstateSet, Payload::RunState(RunState { state: 1 })),
        ];
        for (cmd, payload) in cases {
            for num_fds in 0..=MAX_FDS {
                let fds: Vec<RawFd> = (0..num_fds as RawFd).collect();
                let frame = Frame::new(cmd, 1, payload.clone(), fds.clone()).unwrap();
                let header = frame.header();
                let body = frame.body_bytes();
                let back = Frame::parse(header, &body, fds).unwrap();
                assert_eq!(frame, back, "round trip mismatch for {cmd:?}");
            }
        }
    }

    #[test]
    fn unknown_command_is_rejected() {
        let header = Header { cmd: 0xdead, bytestream: false, size: 0, id: 0, size_id: 0, num_fds: 0 };
        assert!(matches!(Frame::parse(header, &[], vec![]), Err(WireError::UnknownCommand(_))));
    }

    #[test]
    fn id_at_max_devices_is_rejected_for_device_commands() {
        let header = Header {
            cmd: Command::BarRead.into(),
            bytestream: false,
            size: 24,
            id: MAX_DEVICES as u64,
            size_id: 0,
            num_fds: 0,
        };
        let body = BarAccess { memory: true, addr: 0, val: 0, size: 1 }.to_bytes();
        assert!(matches!(
            Frame::parse(header, &body, vec![]),
            Err(WireError::DeviceIdOutOfRange(_))
        ));
    }

    /// `id >= MAX_DEVICES` is rejected unconditionally (spec.md §3, §4.5 step
    /// 1): `DEV_OPTS`'s `id` names the slot a new device is installed at, so
    /// it must be bounded just like every other command's, or a peer could
    /// hand `Registry::add` an unbounded `id` to resize against.
    #[test]
    fn id_at_max_devices_is_rejected_for_dev_opts() {
        assert!(matches!(
            Frame::new(Command::DevOpts, MAX_DEVICES as u64, Payload::Bytestream(vec![]), vec![]),
            Err(WireError::DeviceIdOutOfRange(_))
        ));
    }
}
