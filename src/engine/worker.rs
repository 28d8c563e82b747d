use std::path::PathBuf;
use std::sync::mpsc::{Receiver, TryRecvError};
use std::thread;
use std::time::Duration;

use crate::engine::device::{DeviceKind, TargetDevice};
use crate::engine::error::{EngineError, GatewayError};
use crate::engine::gateway::{InstallHandle, InstallerGateway};
use crate::engine::inspector::{self, ContainerPackage, PackageKind};
use crate::engine::progress::{ExtractionStatus, Phase, StatusBoard};
use crate::engine::queue::{InstallQueue, QueueEntry};
use crate::engine::stager::{ExtractOutcome, StagedUnit, Stager};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerCommand {
    /// Abort the running install. Ignored unless installing.
    Abort,
    Shutdown,
}

#[derive(Debug)]
enum Unit {
    Single(String),
    Staged(StagedUnit),
}

/// Background loop that drains the install queue one unit at a time.
pub struct Worker<G> {
    gateway: G,
    queue: InstallQueue,
    devices: Vec<TargetDevice>,
    stager: Stager,
    status: StatusBoard,
    commands: Receiver<WorkerCommand>,
    tick: Duration,
    phase: Phase,
    container: Option<ContainerPackage>,
    handle: Option<InstallHandle>,
}

impl<G: InstallerGateway> Worker<G> {
    pub fn new(
        gateway: G,
        queue: InstallQueue,
        devices: Vec<TargetDevice>,
        stager: Stager,
        status: StatusBoard,
        commands: Receiver<WorkerCommand>,
        tick: Duration,
    ) -> Self {
        Self {
            gateway,
            queue,
            devices,
            stager,
            status,
            commands,
            tick,
            phase: Phase::Idle,
            container: None,
            handle: None,
        }
    }

    #[cfg(test)]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Sleeps one tick, handles pending commands, then advances once.
    /// Returns on `Shutdown` or when every command sender is gone.
    pub fn run(mut self) {
        tracing::info!(
            "install worker started (tick {:?}, staging in {})",
            self.tick,
            self.stager.dir().display()
        );

        loop {
            thread::sleep(self.tick);
            if !self.drain_commands() {
                break;
            }
            self.tick();
        }

        self.release_container();
        tracing::info!("install worker stopped");
    }

    fn drain_commands(&mut self) -> bool {
        loop {
            match self.commands.try_recv() {
                Ok(WorkerCommand::Abort) => self.abort(),
                Ok(WorkerCommand::Shutdown) | Err(TryRecvError::Disconnected) => return false,
                Err(TryRecvError::Empty) => return true,
            }
        }
    }

    fn abort(&mut self) {
        if self.phase != Phase::Installing {
            tracing::debug!("abort ignored in phase {}", self.phase.label());
            return;
        }
        tracing::info!("aborting current install");
        self.gateway.abort();
    }

    pub fn tick(&mut self) {
        let snapshot = match self.gateway.poll_progress() {
            Ok(reply) => reply.into_snapshot(),
            Err(err) => {
                tracing::warn!("progress poll failed: {err}");
                return;
            }
        };
        self.status.update(|status| status.progress = snapshot);

        if snapshot.in_progress {
            if self.phase != Phase::Installing {
                self.set_phase(Phase::Installing);
            }
            return;
        }

        if self.phase == Phase::Installing {
            match self.handle.take() {
                Some(handle) => tracing::info!("install {handle} finished"),
                None => tracing::info!("install finished"),
            }
            self.queue.set_installing(None);
            self.status.update(|status| status.installing = None);
            self.set_phase(Phase::Idle);
        }

        let Some(head) = self.queue.peek_head() else {
            return;
        };
        if let Some(unit) = self.next_unit(&head) {
            self.submit(&head, unit);
        }
    }

    fn next_unit(&mut self, head: &QueueEntry) -> Option<Unit> {
        if self.container.is_none() {
            self.set_phase(Phase::Inspecting);
            match inspector::inspect(&head.path) {
                Ok(PackageKind::Single(path)) => {
                    self.status.update(|status| status.icon = None);
                    return Some(Unit::Single(path));
                }
                Ok(PackageKind::Container(container)) => {
                    let icon = container.manifest.icon.clone();
                    self.status.update(|status| status.icon = icon);
                    self.container = Some(container);
                }
                Err(err) => {
                    self.fail_entry(head, &err);
                    return None;
                }
            }
        }

        self.extract(head)
    }

    fn extract(&mut self, head: &QueueEntry) -> Option<Unit> {
        self.set_phase(Phase::Extracting);
        let container = self.container.as_mut()?;

        if let Some(entry) = container.manifest.entries.get(container.cursor()) {
            let extraction = ExtractionStatus {
                package: container.manifest.display_name.clone(),
                entry: entry.name.clone(),
                units_done: 0,
                units_total: entry.expected_units,
            };
            self.status
                .update(|status| status.extraction = Some(extraction));
        }

        let status = self.status.clone();
        let outcome = self.stager.extract_next(container, |done| {
            status.update(|s| {
                if let Some(extraction) = s.extraction.as_mut() {
                    extraction.units_done = done;
                }
            });
        });

        match outcome {
            Ok(ExtractOutcome::Staged(unit)) => {
                tracing::info!(
                    "staged '{}' from {}: {} of {} units",
                    unit.entry.name,
                    head.path,
                    unit.units_extracted,
                    unit.entry.expected_units
                );
                Some(Unit::Staged(unit))
            }
            Ok(ExtractOutcome::Exhausted) => {
                tracing::info!("exhausted entries from {}, advancing queue", head.path);
                self.release_container();
                self.queue.pop_head();
                self.set_phase(Phase::Idle);
                None
            }
            Err(err) => {
                self.fail_entry(head, &err);
                None
            }
        }
    }

    fn submit(&mut self, head: &QueueEntry, unit: Unit) {
        self.set_phase(Phase::Submitting);

        let (unit_path, label) = match &unit {
            Unit::Single(path) => (PathBuf::from(path), path.clone()),
            Unit::Staged(staged) => (
                staged.path.clone(),
                format!("{} [{}]", head.path, staged.entry.name),
            ),
        };

        let device = match self.select_target(head) {
            Ok(device) => device,
            Err(err) => {
                // the target is per queue entry, so every remaining unit would fail too
                self.fail_entry(head, &err);
                return;
            }
        };

        match self.gateway.begin_install(&unit_path, &device) {
            Ok(handle) => {
                tracing::info!("installing {label} to {device} ({handle})");
                self.handle = Some(handle);
                self.queue.set_installing(Some(head.path.clone()));
                self.status.update(|status| {
                    status.installing = Some(label);
                    status.extraction = None;
                });
                if matches!(unit, Unit::Single(_)) {
                    self.queue.pop_head();
                }
                self.set_phase(Phase::Installing);
            }
            Err(source) => {
                let err = EngineError::InstallBeginFailed {
                    path: label,
                    source,
                };
                match unit {
                    Unit::Single(_) => self.fail_entry(head, &err),
                    Unit::Staged(_) => {
                        tracing::warn!("{err}; continuing with the next entry");
                        self.status.push_error(err.to_string());
                        self.status.update(|status| status.extraction = None);
                        self.set_phase(Phase::Idle);
                    }
                }
            }
        }
    }

    fn select_target(&mut self, head: &QueueEntry) -> Result<TargetDevice, EngineError> {
        let Some(device) = self.devices.get(head.target).cloned() else {
            return Err(EngineError::DeviceTargetFailed {
                device: format!("#{}", head.target),
                source: GatewayError::rejected("unknown install target"),
            });
        };

        let failed = |source| EngineError::DeviceTargetFailed {
            device: device.label(),
            source,
        };
        if device.kind == DeviceKind::Usb {
            self.gateway
                .set_usb_sub_target(device.ordinal)
                .map_err(failed)?;
        }
        self.gateway.set_target_device(device.kind).map_err(failed)?;

        tracing::info!("set install target to {device} ({:?})", device.kind);
        Ok(device)
    }

    fn fail_entry(&mut self, head: &QueueEntry, err: &EngineError) {
        tracing::warn!("install for {} failed: {err}", head.path);
        self.release_container();
        self.queue.pop_head();
        self.status.push_error(format!("{}: {err}", head.path));
        self.status.update(|status| status.extraction = None);
        self.set_phase(Phase::Idle);
    }

    fn release_container(&mut self) {
        if self.container.take().is_none() {
            return;
        }
        if let Err(err) = self.stager.clear() {
            tracing::warn!("{err}");
        }
        self.status.update(|status| {
            status.icon = None;
            status.extraction = None;
        });
    }

    fn set_phase(&mut self, phase: Phase) {
        self.phase = phase;
        self.status.set_phase(phase);
    }
}
