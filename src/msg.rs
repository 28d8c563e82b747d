use crossterm::event::KeyEvent;
use std::path::PathBuf;

/// All possible messages that drive foreground state transitions.
#[derive(Debug)]
pub enum Msg {
    // -- Input events (raw)
    Key(KeyEvent),
    Resize,

    // -- Queue
    EnqueuePackage(String),
    EnqueueUnit(String),
    AbortInstall,
    CycleTarget,

    // -- File system
    DirectoryChanged(PathBuf),

    // -- System
    Tick,
    Quit,
}
