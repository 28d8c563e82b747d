use std::fmt;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceKind {
    /// Removable storage; several may be attached, told apart by ordinal.
    Usb,
    /// Built-in system storage.
    Internal,
}

/// An install destination discovered at startup. Immutable afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetDevice {
    pub kind: DeviceKind,
    pub ordinal: u32,
    pub name: String,
    /// Directory backing this device for file-based gateways.
    pub root: PathBuf,
}

impl TargetDevice {
    pub fn label(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for TargetDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{:02}", self.name, self.ordinal)
    }
}

/// Result of walking the raw device list.
#[derive(Debug, Clone)]
pub struct DeviceList {
    pub devices: Vec<TargetDevice>,
    /// Index the foreground should select first.
    pub default_index: usize,
}

/// Turns raw device names into install targets. Every `usb` entry is a
/// separate USB target numbered from 1; `mlc` is the internal target.
/// Other devices cannot take installs and are skipped.
pub fn enumerate(names: &[String], devices_root: &Path) -> DeviceList {
    let mut devices = Vec::new();
    let mut default_index = None;
    let mut next_usb = 1;

    for name in names {
        let (kind, ordinal) = match name.as_str() {
            "usb" => {
                let ordinal = next_usb;
                next_usb += 1;
                if default_index.is_none() {
                    default_index = Some(devices.len());
                }
                (DeviceKind::Usb, ordinal)
            }
            "mlc" => (DeviceKind::Internal, 1),
            other => {
                tracing::debug!("skipping non-installable device {other}");
                continue;
            }
        };

        devices.push(TargetDevice {
            kind,
            ordinal,
            name: name.clone(),
            root: devices_root.join(format!("{name}{ordinal:02}")),
        });
    }

    DeviceList {
        devices,
        default_index: default_index.unwrap_or(0),
    }
}
