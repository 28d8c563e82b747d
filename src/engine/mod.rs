//! Install queue processing: the shared queue, package inspection,
//! staging of container entries, and the worker that drives the
//! installer gateway.

pub mod copy_gateway;
pub mod device;
pub mod error;
pub mod gateway;
pub mod inspector;
pub mod manifest;
pub mod progress;
pub mod queue;
pub mod stager;
pub mod worker;

use std::io;
use std::path::PathBuf;
use std::sync::mpsc::{self, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

pub use device::TargetDevice;
pub use error::EnqueueError;
pub use gateway::InstallerGateway;
pub use progress::{Phase, StatusBoard, WorkerStatus};
pub use queue::InstallQueue;
pub use worker::{Worker, WorkerCommand};

use stager::Stager;

/// Foreground side of a running engine.
#[derive(Debug, Clone)]
pub struct EngineHandle {
    queue: InstallQueue,
    status: StatusBoard,
    commands: Sender<WorkerCommand>,
}

impl EngineHandle {
    pub fn enqueue(&self, path: impl Into<String>, target: usize) -> Result<(), EnqueueError> {
        self.queue.enqueue(path, target)
    }

    pub fn abort(&self) {
        if self.commands.send(WorkerCommand::Abort).is_err() {
            tracing::warn!("abort requested but the install worker is gone");
        }
    }

    pub fn shutdown(&self) {
        if self.commands.send(WorkerCommand::Shutdown).is_err() {
            tracing::debug!("install worker already stopped");
        }
    }

    pub fn queue(&self) -> &InstallQueue {
        &self.queue
    }

    pub fn status(&self) -> WorkerStatus {
        self.status.snapshot()
    }

    pub fn take_error(&self) -> Option<String> {
        self.status.take_error()
    }

    /// A handle with no worker behind it. Commands go nowhere.
    #[cfg(test)]
    pub(crate) fn detached() -> Self {
        let (commands, _) = mpsc::channel();
        Self {
            queue: InstallQueue::new(),
            status: StatusBoard::new(),
            commands,
        }
    }

    #[cfg(test)]
    pub(crate) fn status_board(&self) -> &StatusBoard {
        &self.status
    }
}

/// Spawns the install worker on its own thread.
pub fn start<G>(
    gateway: G,
    devices: Vec<TargetDevice>,
    staging_dir: PathBuf,
    tick: Duration,
) -> io::Result<(EngineHandle, JoinHandle<()>)>
where
    G: InstallerGateway + 'static,
{
    let queue = InstallQueue::new();
    let status = StatusBoard::new();
    let (commands, rx) = mpsc::channel();

    let worker = Worker::new(
        gateway,
        queue.clone(),
        devices,
        Stager::new(staging_dir),
        status.clone(),
        rx,
        tick,
    );
    let thread = thread::Builder::new()
        .name("install-worker".into())
        .spawn(move || worker.run())?;

    Ok((
        EngineHandle {
            queue,
            status,
            commands,
        },
        thread,
    ))
}
