mod app;
mod engine;
mod model;
mod msg;

use std::io;
use std::path::PathBuf;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use crossterm::event::{self, Event};
use crossterm::execute;
use crossterm::terminal::{
    EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode,
};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use tracing_subscriber::EnvFilter;

use app::App;
use engine::copy_gateway::CopyGateway;
use engine::gateway::EmulatedGateway;
use engine::{EngineHandle, device};
use model::config::{self, AppConfig, GatewayMode};
use msg::Msg;

fn main() -> Result<()> {
    // Initialize logging to file (never stdout)
    let log_dir = config::data_dir();
    std::fs::create_dir_all(&log_dir)?;

    let file_appender = tracing_appender::rolling::daily(&log_dir, "spool.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("spool=info")),
        )
        .init();

    tracing::info!("spool starting");

    let config = AppConfig::load()?;

    let devices_root = config.devices_root();
    let targets = device::enumerate(&config.devices.enumerate, &devices_root);
    if targets.devices.is_empty() {
        anyhow::bail!(
            "no install targets in devices.enumerate {:?}",
            config.devices.enumerate
        );
    }
    for device in &targets.devices {
        std::fs::create_dir_all(&device.root)
            .with_context(|| format!("cannot create device root {}", device.root.display()))?;
    }

    let (engine, worker) = match config.gateway.mode {
        GatewayMode::Copy => engine::start(
            CopyGateway::new(targets.devices.clone()),
            targets.devices.clone(),
            config.staging_dir(),
            config.tick(),
        )?,
        GatewayMode::Emulated => engine::start(
            EmulatedGateway::default(),
            targets.devices.clone(),
            config.staging_dir(),
            config.tick(),
        )?,
    };
    tracing::info!(
        "install worker running with {:?} gateway, {} targets",
        config.gateway.mode,
        targets.devices.len()
    );

    let app = App::new(
        config.browse_root(),
        engine.clone(),
        targets.devices,
        targets.default_index,
    )?;

    // Terminal setup
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let result = run(&mut terminal, app);

    // Restore terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    shutdown(&engine, worker);

    if let Err(e) = result {
        eprintln!("spool error: {e:?}");
    }

    Ok(())
}

fn shutdown(engine: &EngineHandle, worker: thread::JoinHandle<()>) {
    engine.shutdown();
    if worker.join().is_err() {
        tracing::error!("install worker panicked");
    }
    let queue = engine.queue();
    if queue.is_empty() {
        tracing::info!("spool stopped");
    } else {
        tracing::info!("spool stopped with {} entries left in queue", queue.len());
    }
}

fn run(terminal: &mut Terminal<CrosstermBackend<io::Stdout>>, mut app: App) -> Result<()> {
    let (tx, rx) = mpsc::channel::<Msg>();

    // Input thread: terminal events forwarded as Msg
    let tx_input = tx.clone();
    thread::spawn(move || {
        loop {
            if let Ok(event) = event::read() {
                let msg = match event {
                    Event::Key(k) => Msg::Key(k),
                    Event::Resize(..) => Msg::Resize,
                    _ => continue,
                };
                if tx_input.send(msg).is_err() {
                    break;
                }
            }
        }
    });

    // Tick thread: redraws progress and collects worker errors
    let tx_tick = tx.clone();
    thread::spawn(move || {
        loop {
            thread::sleep(Duration::from_millis(100));
            if tx_tick.send(Msg::Tick).is_err() {
                break;
            }
        }
    });

    // Directory watcher follows the browser's current directory
    let (dir_tx, dir_rx) = mpsc::channel::<PathBuf>();
    spawn_dir_watcher(dir_rx, tx.clone());
    app.set_watch_sender(dir_tx);

    terminal.draw(|f| app.view(f))?;

    // Main event loop
    loop {
        // Batch-drain all pending messages
        let first = rx.recv()?;
        app.update(first)?;

        while let Ok(msg) = rx.try_recv() {
            app.update(msg)?;
        }

        if app.should_quit {
            break;
        }

        terminal.draw(|f| app.view(f))?;
    }

    Ok(())
}

fn spawn_dir_watcher(dirs: mpsc::Receiver<PathBuf>, tx: mpsc::Sender<Msg>) {
    thread::spawn(move || {
        let tx_watch = tx.clone();
        let mut watcher: RecommendedWatcher =
            match notify::recommended_watcher(move |res: notify::Result<notify::Event>| match res {
                Ok(event) => {
                    if matches!(event.kind, EventKind::Create(_) | EventKind::Remove(_)) {
                        for dir in event.paths.iter().filter_map(|p| p.parent()) {
                            if tx_watch.send(Msg::DirectoryChanged(dir.to_path_buf())).is_err() {
                                return;
                            }
                        }
                    }
                }
                Err(err) => {
                    tracing::warn!("directory watcher error: {err}");
                }
            }) {
                Ok(w) => w,
                Err(err) => {
                    tracing::warn!("failed to initialize directory watcher: {err}");
                    return;
                }
            };

        let mut watched: Option<PathBuf> = None;
        for dir in dirs {
            if watched.as_ref() == Some(&dir) {
                continue;
            }
            if let Some(old) = watched.take()
                && let Err(err) = watcher.unwatch(&old)
            {
                tracing::debug!("unwatch {} failed: {err}", old.display());
            }
            match watcher.watch(&dir, RecursiveMode::NonRecursive) {
                Ok(()) => watched = Some(dir),
                Err(err) => tracing::warn!("failed to watch {}: {err}", dir.display()),
            }
        }
    });
}
