//! The closed command enumeration (spec.md §6).

use crate::error::WireError;

/// A command tag. Ordinals are part of the wire format and must stay stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Command {
    Init = 0,
    GetPciInfo = 1,
    RetPciInfo = 2,
    PciConfigWrite = 3,
    PciConfigRead = 4,
    BarWrite = 5,
    BarRead = 6,
    MmioReturn = 7,
    SyncSysmem = 8,
    SetIrqfd = 9,
    DevOpts = 10,
    DeviceAdd = 11,
    DeviceDel = 12,
    DeviceReset = 13,
    RemotePing = 14,
    StartMigOut = 15,
    StartMigIn = 16,
    RunstateSet = 17,
    /// Sentinel marking the end of the valid range; never sent on the wire.
    Max = 18,
}

impl Command {
    /// All non-sentinel commands, in ordinal order.
    pub const ALL: [Command; 18] = [
        Command::Init,
        Command::GetPciInfo,
        Command::RetPciInfo,
        Command::PciConfigWrite,
        Command::PciConfigRead,
        Command::BarWrite,
        Command::BarRead,
        Command::MmioReturn,
        Command::SyncSysmem,
        Command::SetIrqfd,
        Command::DevOpts,
        Command::DeviceAdd,
        Command::DeviceDel,
        Command::DeviceReset,
        Command::RemotePing,
        Command::StartMigOut,
        Command::StartMigIn,
        Command::RunstateSet,
    ];

    /// Whether this command carries its payload out-of-line (`data2`) rather
    /// than in the inline tagged union (`data1`).
    pub fn is_bytestream(self) -> bool {
        matches!(
            self,
            Command::PciConfigWrite
                | Command::PciConfigRead
                | Command::SyncSysmem
                | Command::DevOpts
                | Command::DeviceAdd
                | Command::DeviceDel
        )
    }
}

impl TryFrom<u32> for Command {
    type Error = WireError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Command::ALL
            .into_iter()
            .find(|c| *c as u32 == value)
            .ok_or(WireError::UnknownCommand(value))
    }
}

impl From<Command> for u32 {
    fn from(cmd: Command) -> Self {
        cmd as u32
    }
}
