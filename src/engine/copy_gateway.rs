use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use ignore::WalkBuilder;

use crate::engine::device::{DeviceKind, TargetDevice};
use crate::engine::error::GatewayError;
use crate::engine::gateway::{InstallHandle, InstallerGateway, PollReply};
use crate::engine::progress::ProgressSnapshot;

const TITLE_ID_FILE: &str = "title.id";

/// Installs a unit directory by copying it into
/// `<device root>/<TITLEID>/` on a background thread.
#[derive(Debug)]
pub struct CopyGateway {
    devices: Vec<TargetDevice>,
    usb_ordinal: Option<u32>,
    target: Option<DeviceKind>,
    job: Option<CopyJob>,
    next_handle: u64,
}

#[derive(Debug)]
struct CopyJob {
    handle: InstallHandle,
    cancel: Arc<AtomicBool>,
    progress: Arc<Mutex<ProgressSnapshot>>,
    thread: Option<JoinHandle<()>>,
}

impl CopyJob {
    fn snapshot(&self) -> ProgressSnapshot {
        *self.progress.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Debug, Clone)]
struct UnitFile {
    relative: PathBuf,
    size: u64,
}

impl CopyGateway {
    pub fn new(devices: Vec<TargetDevice>) -> Self {
        Self {
            devices,
            usb_ordinal: None,
            target: None,
            job: None,
            next_handle: 0,
        }
    }

    fn busy(&self) -> bool {
        self.job.as_ref().is_some_and(|job| job.snapshot().in_progress)
    }

    fn reap(&mut self) {
        if let Some(thread) = self.job.as_mut().and_then(|job| job.thread.take()) {
            if thread.join().is_err() {
                tracing::error!("copy thread panicked");
            }
        }
    }

    fn resolve_root(&self, device: &TargetDevice) -> Result<PathBuf, GatewayError> {
        let kind = self
            .target
            .ok_or_else(|| GatewayError::rejected("no target device selected"))?;
        if kind != device.kind {
            return Err(GatewayError::rejected(format!(
                "selected target does not match {device}"
            )));
        }

        if kind == DeviceKind::Usb {
            let ordinal = self
                .usb_ordinal
                .ok_or_else(|| GatewayError::rejected("no usb sub-target selected"))?;
            if ordinal != device.ordinal {
                return Err(GatewayError::rejected(format!(
                    "usb sub-target {ordinal:02} does not match {device}"
                )));
            }
        }

        Ok(device.root.clone())
    }
}

impl InstallerGateway for CopyGateway {
    fn set_usb_sub_target(&mut self, ordinal: u32) -> Result<(), GatewayError> {
        let known = self
            .devices
            .iter()
            .any(|d| d.kind == DeviceKind::Usb && d.ordinal == ordinal);
        if !known {
            return Err(GatewayError::rejected(format!("no usb device {ordinal:02}")));
        }
        self.usb_ordinal = Some(ordinal);
        Ok(())
    }

    fn set_target_device(&mut self, kind: DeviceKind) -> Result<(), GatewayError> {
        if !self.devices.iter().any(|d| d.kind == kind) {
            return Err(GatewayError::rejected(format!("no {kind:?} device attached")));
        }
        self.target = Some(kind);
        Ok(())
    }

    fn begin_install(
        &mut self,
        unit: &Path,
        device: &TargetDevice,
    ) -> Result<InstallHandle, GatewayError> {
        if self.busy() {
            return Err(GatewayError::rejected("an install is already running"));
        }
        self.reap();

        let root = self.resolve_root(device)?;
        let files = scan_unit(unit)?;
        if files.is_empty() {
            return Err(GatewayError::rejected(format!(
                "{} has no installable content",
                unit.display()
            )));
        }

        let title_id = read_title_id(unit).unwrap_or_else(|| fingerprint(&files));
        let dest = root.join(format!("{title_id:016X}"));
        let progress = Arc::new(Mutex::new(ProgressSnapshot {
            in_progress: true,
            bytes_total: files.iter().map(|f| f.size).sum(),
            units_total: u32::try_from(files.len()).unwrap_or(u32::MAX),
            title_id,
            ..Default::default()
        }));
        let cancel = Arc::new(AtomicBool::new(false));

        self.next_handle += 1;
        let handle = InstallHandle(self.next_handle);
        tracing::info!(
            "install {handle}: copying {} files from {} to {}",
            files.len(),
            unit.display(),
            dest.display()
        );

        let thread = {
            let source = unit.to_path_buf();
            let progress = Arc::clone(&progress);
            let cancel = Arc::clone(&cancel);
            thread::Builder::new()
                .name("install-copy".into())
                .spawn(move || copy_files(&source, &dest, &files, &cancel, &progress))?
        };

        self.job = Some(CopyJob {
            handle,
            cancel,
            progress,
            thread: Some(thread),
        });
        Ok(handle)
    }

    fn poll_progress(&mut self) -> Result<PollReply, GatewayError> {
        let snapshot = self
            .job
            .as_ref()
            .map(CopyJob::snapshot)
            .unwrap_or_default();
        Ok(PollReply::Progress(snapshot))
    }

    fn abort(&mut self) {
        if let Some(job) = &self.job {
            tracing::info!("install {}: abort requested", job.handle);
            job.cancel.store(true, Ordering::Relaxed);
        }
    }
}

fn scan_unit(unit: &Path) -> Result<Vec<UnitFile>, GatewayError> {
    if !unit.is_dir() {
        return Err(GatewayError::rejected(format!(
            "{} is not a directory",
            unit.display()
        )));
    }

    let mut files = Vec::new();
    for entry in WalkBuilder::new(unit).standard_filters(false).build() {
        let entry = entry.map_err(|err| GatewayError::rejected(err.to_string()))?;
        if !entry.file_type().is_some_and(|ft| ft.is_file()) {
            continue;
        }
        let Ok(relative) = entry.path().strip_prefix(unit) else {
            continue;
        };
        let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
        files.push(UnitFile {
            relative: relative.to_path_buf(),
            size,
        });
    }

    files.sort_by(|a, b| a.relative.cmp(&b.relative));
    Ok(files)
}

fn read_title_id(unit: &Path) -> Option<u64> {
    let raw = fs::read_to_string(unit.join(TITLE_ID_FILE)).ok()?;
    let digits = raw.trim().trim_start_matches("0x");
    u64::from_str_radix(digits, 16).ok()
}

/// FNV-1a over relative names and sizes; stable for identical units.
fn fingerprint(files: &[UnitFile]) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;

    let mut hash = OFFSET;
    for file in files {
        let name = file.relative.to_string_lossy();
        for byte in name.bytes().chain(file.size.to_le_bytes()) {
            hash ^= u64::from(byte);
            hash = hash.wrapping_mul(PRIME);
        }
    }
    hash
}

fn copy_files(
    source: &Path,
    dest: &Path,
    files: &[UnitFile],
    cancel: &AtomicBool,
    progress: &Mutex<ProgressSnapshot>,
) {
    for file in files {
        if cancel.load(Ordering::Relaxed) {
            tracing::info!("copy into {} aborted", dest.display());
            break;
        }

        let target = dest.join(&file.relative);
        let copied = target
            .parent()
            .map_or(Ok(()), fs::create_dir_all)
            .and_then(|()| fs::copy(source.join(&file.relative), &target));
        if let Err(err) = copied {
            tracing::warn!("failed to copy {}: {err}", file.relative.display());
            break;
        }

        let mut snapshot = progress.lock().unwrap_or_else(PoisonError::into_inner);
        snapshot.bytes_done += file.size;
        snapshot.units_done += 1;
    }

    progress
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .in_progress = false;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    fn devices(root: &Path) -> Vec<TargetDevice> {
        crate::engine::device::enumerate(&["usb".into(), "mlc".into()], root).devices
    }

    fn wait_idle(gateway: &mut CopyGateway) -> ProgressSnapshot {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let snapshot = gateway.poll_progress().unwrap().into_snapshot();
            if !snapshot.in_progress || Instant::now() > deadline {
                return snapshot;
            }
            thread::sleep(Duration::from_millis(10));
        }
    }

    #[test]
    fn copies_unit_into_titled_directory() {
        let scratch = tempfile::tempdir().unwrap();
        let unit = scratch.path().join("unit");
        fs::create_dir_all(unit.join("code")).unwrap();
        fs::write(unit.join("code/main.app"), b"12345").unwrap();
        fs::write(unit.join(TITLE_ID_FILE), "0005000010101A00\n").unwrap();

        let devices = devices(&scratch.path().join("devices"));
        let mut gateway = CopyGateway::new(devices.clone());
        gateway.set_target_device(DeviceKind::Internal).unwrap();
        gateway.begin_install(&unit, &devices[1]).unwrap();

        let done = wait_idle(&mut gateway);
        assert!(!done.in_progress);
        assert_eq!(done.title_id, 0x0005_0000_1010_1A00);
        assert_eq!(done.units_done, 2);
        assert_eq!(done.bytes_done, done.bytes_total);

        let installed = devices[1].root.join("0005000010101A00/code/main.app");
        assert_eq!(fs::read(installed).unwrap(), b"12345");
    }

    #[test]
    fn usb_install_requires_matching_sub_target() {
        let scratch = tempfile::tempdir().unwrap();
        let unit = scratch.path().join("unit");
        fs::create_dir_all(&unit).unwrap();
        fs::write(unit.join("a.app"), b"a").unwrap();

        let devices = devices(&scratch.path().join("devices"));
        let mut gateway = CopyGateway::new(devices.clone());

        assert!(gateway.set_usb_sub_target(7).is_err());
        gateway.set_target_device(DeviceKind::Usb).unwrap();
        assert!(gateway.begin_install(&unit, &devices[0]).is_err());

        gateway.set_usb_sub_target(1).unwrap();
        assert!(gateway.begin_install(&unit, &devices[0]).is_ok());
        assert!(!wait_idle(&mut gateway).in_progress);
    }

    #[test]
    fn empty_or_missing_units_are_rejected() {
        let scratch = tempfile::tempdir().unwrap();
        let empty = scratch.path().join("empty");
        fs::create_dir_all(&empty).unwrap();

        let devices = devices(&scratch.path().join("devices"));
        let mut gateway = CopyGateway::new(devices.clone());
        gateway.set_target_device(DeviceKind::Internal).unwrap();

        assert!(gateway.begin_install(&empty, &devices[1]).is_err());
        assert!(
            gateway
                .begin_install(&scratch.path().join("missing"), &devices[1])
                .is_err()
        );
        assert!(!gateway.poll_progress().unwrap().into_snapshot().in_progress);
    }

    #[test]
    fn begin_is_rejected_while_a_copy_runs() {
        let scratch = tempfile::tempdir().unwrap();
        let unit = scratch.path().join("unit");
        fs::create_dir_all(&unit).unwrap();
        fs::write(unit.join("a.app"), b"a").unwrap();

        let devices = devices(&scratch.path().join("devices"));
        let mut gateway = CopyGateway::new(devices.clone());
        gateway.set_target_device(DeviceKind::Internal).unwrap();
        gateway.job = Some(CopyJob {
            handle: InstallHandle(1),
            cancel: Arc::default(),
            progress: Arc::new(Mutex::new(ProgressSnapshot {
                in_progress: true,
                ..Default::default()
            })),
            thread: None,
        });

        let err = gateway.begin_install(&unit, &devices[1]).unwrap_err();
        assert!(err.to_string().contains("already running"));
        assert!(!devices[1].root.exists());

        gateway.abort();
        let job = gateway.job.as_ref().unwrap();
        assert!(job.cancel.load(Ordering::Relaxed));
    }

    #[test]
    fn cancelled_copy_stops_before_the_next_file() {
        let scratch = tempfile::tempdir().unwrap();
        let unit = scratch.path().join("unit");
        fs::create_dir_all(&unit).unwrap();
        fs::write(unit.join("a.app"), b"a").unwrap();
        fs::write(unit.join("b.app"), b"b").unwrap();
        let files = scan_unit(&unit).unwrap();
        let dest = scratch.path().join("dest");

        let progress = Mutex::new(ProgressSnapshot {
            in_progress: true,
            bytes_total: 2,
            units_total: 2,
            ..Default::default()
        });
        let cancel = AtomicBool::new(true);
        copy_files(&unit, &dest, &files, &cancel, &progress);

        let snapshot = *progress.lock().unwrap();
        assert!(!snapshot.in_progress);
        assert_eq!(snapshot.units_done, 0);
        assert_eq!(snapshot.bytes_done, 0);
        assert!(!dest.exists());
    }

    #[test]
    fn fingerprint_is_stable_and_content_sensitive() {
        let a = vec![UnitFile {
            relative: "code/main.app".into(),
            size: 4,
        }];
        let b = vec![UnitFile {
            relative: "code/main.app".into(),
            size: 5,
        }];
        assert_eq!(fingerprint(&a), fingerprint(&a.clone()));
        assert_ne!(fingerprint(&a), fingerprint(&b));
    }
}
