use std::fmt;
use std::path::Path;

use crate::engine::device::{DeviceKind, TargetDevice};
use crate::engine::error::GatewayError;
use crate::engine::progress::ProgressSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstallHandle(pub u64);

impl fmt::Display for InstallHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Answer to a progress poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollReply {
    Progress(ProgressSnapshot),
    /// An emulation layer answered instead of a real installer. Nothing is
    /// actually installing.
    Emulated,
}

impl PollReply {
    /// Folds the emulation sentinel into "not installing" and clamps
    /// inconsistent counters.
    pub fn into_snapshot(self) -> ProgressSnapshot {
        match self {
            PollReply::Progress(snapshot) => snapshot.sanitized(),
            PollReply::Emulated => ProgressSnapshot::default(),
        }
    }
}

/// The external asynchronous installer. It can only be polled, and it
/// misbehaves if polled too often, so callers rate-limit polls.
pub trait InstallerGateway: Send {
    fn set_usb_sub_target(&mut self, ordinal: u32) -> Result<(), GatewayError>;

    fn set_target_device(&mut self, kind: DeviceKind) -> Result<(), GatewayError>;

    fn begin_install(
        &mut self,
        unit: &Path,
        device: &TargetDevice,
    ) -> Result<InstallHandle, GatewayError>;

    fn poll_progress(&mut self) -> Result<PollReply, GatewayError>;

    /// Asks the running install to stop. Completion is still reported
    /// through `poll_progress` as `in_progress == false`.
    fn abort(&mut self);
}

/// Accepts every request and answers every poll with the emulation
/// sentinel, for running without a real installer.
#[derive(Debug, Default)]
pub struct EmulatedGateway {
    next_handle: u64,
}

impl InstallerGateway for EmulatedGateway {
    fn set_usb_sub_target(&mut self, _ordinal: u32) -> Result<(), GatewayError> {
        Ok(())
    }

    fn set_target_device(&mut self, _kind: DeviceKind) -> Result<(), GatewayError> {
        Ok(())
    }

    fn begin_install(
        &mut self,
        unit: &Path,
        device: &TargetDevice,
    ) -> Result<InstallHandle, GatewayError> {
        self.next_handle += 1;
        tracing::info!("emulated install of {} to {device}", unit.display());
        Ok(InstallHandle(self.next_handle))
    }

    fn poll_progress(&mut self) -> Result<PollReply, GatewayError> {
        Ok(PollReply::Emulated)
    }

    fn abort(&mut self) {}
}
