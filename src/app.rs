use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::mpsc;

use anyhow::Result;
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use ratatui::Frame;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Gauge, Paragraph};

use crate::engine::{EngineHandle, Phase, TargetDevice, WorkerStatus};
use crate::model::browser::Browser;
use crate::msg::Msg;

const PAGE: isize = 5;

pub struct App {
    pub browser: Browser,
    engine: EngineHandle,
    devices: Vec<TargetDevice>,
    selected_target: usize,
    pub notifications: VecDeque<String>,
    pub should_quit: bool,
    watch_tx: Option<mpsc::Sender<PathBuf>>,
}

impl App {
    pub fn new(
        browse_root: PathBuf,
        engine: EngineHandle,
        devices: Vec<TargetDevice>,
        default_target: usize,
    ) -> Result<Self> {
        let browser = Browser::new(browse_root)?;
        let selected_target = default_target.min(devices.len().saturating_sub(1));

        Ok(Self {
            browser,
            engine,
            devices,
            selected_target,
            notifications: VecDeque::new(),
            should_quit: false,
            watch_tx: None,
        })
    }

    /// Directory changes are forwarded here so the watcher can follow the browser.
    pub fn set_watch_sender(&mut self, tx: mpsc::Sender<PathBuf>) {
        self.watch_tx = Some(tx);
        self.notify_watcher();
    }

    pub fn update(&mut self, msg: Msg) -> Result<()> {
        match msg {
            Msg::Key(key) => self.handle_key(key)?,
            Msg::EnqueuePackage(path) | Msg::EnqueueUnit(path) => self.enqueue(path),
            Msg::AbortInstall => self.abort_install(),
            Msg::CycleTarget => self.cycle_target(),
            Msg::DirectoryChanged(path) => {
                if path == self.browser.cwd() {
                    self.browser.refresh()?;
                }
            }
            Msg::Tick => self.handle_tick(),
            Msg::Quit => self.should_quit = true,
            // the next draw picks up the new size
            Msg::Resize => {}
        }
        Ok(())
    }

    fn push_notification(&mut self, message: String) {
        self.notifications.push_back(message);
        while self.notifications.len() > 8 {
            self.notifications.pop_front();
        }
    }

    fn handle_key(&mut self, key: KeyEvent) -> Result<()> {
        if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
            return self.update(Msg::Quit);
        }

        match key.code {
            KeyCode::Char('j') | KeyCode::Down => self.browser.move_selection(1),
            KeyCode::Char('k') | KeyCode::Up => self.browser.move_selection(-1),
            KeyCode::PageDown => self.browser.move_selection(PAGE),
            KeyCode::PageUp => self.browser.move_selection(-PAGE),
            KeyCode::Char('h') | KeyCode::Left | KeyCode::Backspace => {
                if self.browser.leave()? {
                    self.notify_watcher();
                }
            }
            KeyCode::Char('l') | KeyCode::Right | KeyCode::Enter => {
                match self.browser.selected_entry().map(|entry| entry.is_dir) {
                    Some(true) => {
                        if self.browser.enter_selected()? {
                            self.notify_watcher();
                        }
                    }
                    Some(false) => {
                        if let Some(path) = self.browser.package_path() {
                            self.update(Msg::EnqueuePackage(path))?;
                        }
                    }
                    None => {}
                }
            }
            KeyCode::Char('a') => {
                if let Some(path) = self.browser.package_path() {
                    self.update(Msg::EnqueuePackage(path))?;
                }
            }
            KeyCode::Char('y') => {
                let path = self.browser.unit_path();
                self.update(Msg::EnqueueUnit(path))?;
            }
            KeyCode::Char('x') => self.update(Msg::AbortInstall)?,
            KeyCode::Char('t') | KeyCode::Tab => self.update(Msg::CycleTarget)?,
            KeyCode::Char('q') => self.update(Msg::Quit)?,
            _ => {}
        }

        Ok(())
    }

    fn enqueue(&mut self, path: String) {
        let Some(target) = self.devices.get(self.selected_target) else {
            self.push_notification("no install target available".to_string());
            return;
        };
        let label = target.label();

        match self.engine.enqueue(path.clone(), self.selected_target) {
            Ok(()) => {
                tracing::info!("queued {path} for {label}");
                self.push_notification(format!("queued {path} -> {label}"));
            }
            Err(err) => self.push_notification(err.to_string()),
        }
    }

    fn abort_install(&mut self) {
        if self.engine.status().phase != Phase::Installing {
            self.push_notification("nothing is installing".to_string());
            return;
        }
        self.engine.abort();
        self.push_notification("abort requested".to_string());
    }

    fn cycle_target(&mut self) {
        if self.devices.is_empty() {
            return;
        }
        self.selected_target = (self.selected_target + 1) % self.devices.len();
    }

    fn handle_tick(&mut self) {
        while let Some(err) = self.engine.take_error() {
            self.push_notification(err);
        }
    }

    fn notify_watcher(&self) {
        if let Some(tx) = &self.watch_tx
            && tx.send(self.browser.cwd().to_path_buf()).is_err()
        {
            tracing::debug!(
                "directory watcher is gone, not following {}",
                self.browser.cwd().display()
            );
        }
    }

    fn target_label(&self, index: usize) -> String {
        self.devices
            .get(index)
            .map(TargetDevice::label)
            .unwrap_or_else(|| "none".to_string())
    }

    pub fn view(&mut self, frame: &mut Frame) {
        let status = self.engine.status();

        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(1), // header
                Constraint::Length(6), // progress
                Constraint::Min(1),    // browser + queue
                Constraint::Length(4), // notifications
                Constraint::Length(1), // help bar
            ])
            .split(frame.area());

        self.render_header(frame, chunks[0], &status);
        self.render_progress(frame, chunks[1], &status);

        let body = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(60), Constraint::Min(1)])
            .split(chunks[2]);
        self.render_browser(frame, body[0]);
        self.render_queue(frame, body[1]);

        self.render_notifications(frame, chunks[3]);
        self.render_help_bar(frame, chunks[4]);
    }

    fn render_header(&self, frame: &mut Frame, area: Rect, status: &WorkerStatus) {
        let phase_span = Span::styled(
            format!(" {} ", status.phase.label()),
            Style::default()
                .fg(Color::Black)
                .bg(phase_color(status.phase))
                .add_modifier(Modifier::BOLD),
        );
        let info = Span::styled(
            format!(
                " spool  {}  Current Install Target: {} ",
                self.browser.cwd().display(),
                self.target_label(self.selected_target)
            ),
            Style::default().fg(Color::Gray).bg(Color::DarkGray),
        );

        frame.render_widget(
            Paragraph::new(Line::from(vec![phase_span, info]))
                .style(Style::default().bg(Color::DarkGray)),
            area,
        );
    }

    fn render_progress(&self, frame: &mut Frame, area: Rect, status: &WorkerStatus) {
        let block = Block::default()
            .title(" Progress ")
            .borders(Borders::ALL)
            .style(Style::default().bg(Color::Rgb(15, 15, 24)));
        let inner = block.inner(area);
        frame.render_widget(block, area);

        let rows = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Min(1), Constraint::Length(1)])
            .split(inner);

        let (lines, fraction) = match (status.phase, &status.extraction) {
            (Phase::Installing, _) => {
                let progress = status.progress;
                let mut lines = vec![
                    Line::from(format!(
                        "Installing {:016X} from {}",
                        progress.title_id,
                        status.installing.as_deref().unwrap_or("?")
                    )),
                    Line::from(format!(
                        "{} of {} bytes written",
                        progress.bytes_done, progress.bytes_total
                    )),
                    Line::from(format!(
                        "Installing content {} out of {}",
                        progress.units_done, progress.units_total
                    )),
                ];
                if let Some(icon) = &status.icon {
                    let label = match icon.dimensions() {
                        Some((w, h)) => format!("[icon {w}x{h}]"),
                        None => format!("[icon, {} bytes]", icon.bytes().len()),
                    };
                    lines.push(Line::from(Span::styled(
                        label,
                        Style::default().fg(Color::DarkGray),
                    )));
                }
                (lines, progress.fraction())
            }
            (Phase::Extracting, Some(extraction)) => (
                vec![
                    Line::from(format!(
                        "Preparing to install {} from {}",
                        extraction.entry, extraction.package
                    )),
                    Line::from(format!(
                        "Unpacking contents {} of {}",
                        extraction.units_done, extraction.units_total
                    )),
                ],
                None,
            ),
            _ => {
                let selected = self
                    .browser
                    .selected_entry()
                    .map(|entry| entry.path.display().to_string())
                    .unwrap_or_else(|| "(empty directory)".to_string());
                (vec![Line::from(format!("Selected: {selected}"))], None)
            }
        };

        frame.render_widget(Paragraph::new(lines), rows[0]);

        if let Some(fraction) = fraction {
            let gauge = Gauge::default()
                .gauge_style(Style::default().fg(Color::Cyan).bg(Color::Rgb(30, 30, 45)))
                .ratio(fraction)
                .label(format!("{:5.1}% complete", fraction * 100.0));
            frame.render_widget(gauge, rows[1]);
        }
    }

    fn render_browser(&self, frame: &mut Frame, area: Rect) {
        let lines: Vec<Line> = self
            .browser
            .entries
            .iter()
            .enumerate()
            .map(|(idx, entry)| {
                let cursor = if idx == self.browser.selected { ">" } else { " " };
                let suffix = if entry.is_dir { "/" } else { "" };
                let content = format!("{cursor} {}{suffix}", entry.name);

                if idx == self.browser.selected {
                    Line::from(Span::styled(
                        content,
                        Style::default().fg(Color::Black).bg(Color::Cyan),
                    ))
                } else if entry.is_dir {
                    Line::from(Span::styled(content, Style::default().fg(Color::Blue)))
                } else {
                    Line::from(Span::styled(content, Style::default().fg(Color::Gray)))
                }
            })
            .collect();

        // keep the cursor on screen
        let visible = area.height.saturating_sub(2) as usize;
        let scroll = self.browser.selected.saturating_sub(visible.saturating_sub(1));

        frame.render_widget(
            Paragraph::new(lines)
                .scroll((scroll as u16, 0))
                .block(Block::default().title(" Files ").borders(Borders::ALL))
                .style(Style::default().bg(Color::Rgb(12, 12, 18))),
            area,
        );
    }

    fn render_queue(&self, frame: &mut Frame, area: Rect) {
        let queue = self.engine.queue();
        let mut lines = vec![Line::from(Span::styled(
            "Current install queue:",
            Style::default().add_modifier(Modifier::BOLD),
        ))];

        if let Some(path) = queue.installing() {
            lines.push(Line::from(Span::styled(
                format!("* {path}"),
                Style::default().fg(Color::Cyan),
            )));
        }

        let entries = queue.entries();
        if entries.is_empty() {
            lines.push(Line::from(Span::styled(
                "(empty)",
                Style::default().fg(Color::DarkGray),
            )));
        }
        for entry in entries {
            lines.push(Line::from(format!(
                "{} -> {}",
                entry.path,
                self.target_label(entry.target)
            )));
        }

        frame.render_widget(
            Paragraph::new(lines).block(Block::default().title(" Queue ").borders(Borders::ALL)),
            area,
        );
    }

    fn render_notifications(&self, frame: &mut Frame, area: Rect) {
        let shown = area.height.saturating_sub(1) as usize;
        let lines: Vec<Line> = self
            .notifications
            .iter()
            .rev()
            .take(shown)
            .rev()
            .map(|note| Line::from(Span::styled(note.clone(), Style::default().fg(Color::Yellow))))
            .collect();

        frame.render_widget(
            Paragraph::new(lines).block(Block::default().borders(Borders::TOP)),
            area,
        );
    }

    fn render_help_bar(&self, frame: &mut Frame, area: Rect) {
        frame.render_widget(
            Paragraph::new(Span::styled(
                " j/k: Move  Enter/l: Open  h: Up  a: Queue Package  y: Queue Folder  t: Target  x: Abort  q: Quit ",
                Style::default().fg(Color::DarkGray),
            ))
            .style(Style::default().bg(Color::Rgb(20, 20, 30))),
            area,
        );
    }
}

fn phase_color(phase: Phase) -> Color {
    match phase {
        Phase::Idle => Color::Magenta,
        Phase::Installing => Color::Cyan,
        _ => Color::Yellow,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::device;
    use ratatui::Terminal;
    use ratatui::backend::TestBackend;
    use std::fs;

    fn key(code: KeyCode) -> Msg {
        Msg::Key(KeyEvent::new(code, KeyModifiers::NONE))
    }

    fn app(dir: &tempfile::TempDir) -> App {
        fs::create_dir_all(dir.path().join("game/code")).unwrap();
        fs::write(dir.path().join("game/code/main.app"), b"x").unwrap();
        fs::write(dir.path().join("bundle.zip"), b"zip").unwrap();

        let devices = device::enumerate(&["usb".into(), "mlc".into()], dir.path());
        App::new(
            dir.path().to_path_buf(),
            EngineHandle::detached(),
            devices.devices,
            devices.default_index,
        )
        .unwrap()
    }

    fn screen(app: &mut App) -> String {
        let mut terminal = Terminal::new(TestBackend::new(100, 24)).unwrap();
        terminal.draw(|frame| app.view(frame)).unwrap();
        terminal
            .backend()
            .buffer()
            .content
            .iter()
            .map(|cell| cell.symbol())
            .collect()
    }

    #[test]
    fn enter_on_file_queues_package_for_selected_target() {
        let dir = tempfile::tempdir().unwrap();
        let mut app = app(&dir);

        app.update(key(KeyCode::Down)).unwrap();
        app.update(key(KeyCode::Enter)).unwrap();

        let entries = app.engine.queue().entries();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].path.ends_with("bundle.zip"));
        assert_eq!(entries[0].target, 0);
    }

    #[test]
    fn queue_folder_uses_trailing_separator_and_cycled_target() {
        let dir = tempfile::tempdir().unwrap();
        let mut app = app(&dir);

        app.update(key(KeyCode::Tab)).unwrap();
        app.update(key(KeyCode::Char('y'))).unwrap();

        let entries = app.engine.queue().entries();
        assert_eq!(entries[0].path, format!("{}/", dir.path().join("game").display()));
        assert_eq!(entries[0].target, 1);

        app.update(key(KeyCode::Tab)).unwrap();
        assert_eq!(app.selected_target, 0);
    }

    #[test]
    fn duplicate_enqueue_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let mut app = app(&dir);

        app.update(key(KeyCode::Char('y'))).unwrap();
        app.update(key(KeyCode::Char('y'))).unwrap();

        assert_eq!(app.engine.queue().len(), 1);
        assert!(app.notifications.back().unwrap().contains("already queued"));
    }

    #[test]
    fn tick_moves_worker_errors_into_notifications() {
        let dir = tempfile::tempdir().unwrap();
        let mut app = app(&dir);

        app.engine
            .status_board()
            .push_error("bad.zip: unreadable".into());
        app.engine
            .status_board()
            .push_error("worse.zip: manifest is malformed".into());
        app.update(Msg::Tick).unwrap();

        let shown: Vec<&str> = app.notifications.iter().map(String::as_str).collect();
        assert_eq!(shown, ["bad.zip: unreadable", "worse.zip: manifest is malformed"]);
        assert!(app.engine.take_error().is_none());
    }

    #[test]
    fn watcher_follows_the_browser_and_tolerates_a_closed_channel() {
        let dir = tempfile::tempdir().unwrap();
        let mut app = app(&dir);
        let (tx, rx) = mpsc::channel();

        app.set_watch_sender(tx);
        assert_eq!(rx.recv().unwrap(), dir.path());

        app.update(key(KeyCode::Enter)).unwrap();
        assert_eq!(rx.recv().unwrap(), dir.path().join("game"));

        drop(rx);
        app.update(key(KeyCode::Left)).unwrap();
        assert_eq!(app.browser.cwd(), dir.path());
    }

    #[test]
    fn abort_outside_install_only_notifies() {
        let dir = tempfile::tempdir().unwrap();
        let mut app = app(&dir);

        app.update(key(KeyCode::Char('x'))).unwrap();
        assert_eq!(app.notifications.back().unwrap(), "nothing is installing");
    }

    #[test]
    fn notifications_are_capped() {
        let dir = tempfile::tempdir().unwrap();
        let mut app = app(&dir);
        for n in 0..12 {
            app.push_notification(format!("note {n}"));
        }
        assert_eq!(app.notifications.len(), 8);
        assert_eq!(app.notifications.front().unwrap(), "note 4");
    }

    #[test]
    fn view_shows_target_and_queue() {
        let dir = tempfile::tempdir().unwrap();
        let mut app = app(&dir);
        app.update(key(KeyCode::Char('y'))).unwrap();
        app.update(Msg::Resize).unwrap();

        let text = screen(&mut app);
        assert!(text.contains("Current Install Target: usb01"));
        assert!(text.contains("Current install queue:"));
        assert!(text.contains("-> usb01"));
    }

    #[test]
    fn view_shows_extraction_panel() {
        let dir = tempfile::tempdir().unwrap();
        let mut app = app(&dir);
        app.engine.status_board().update(|status| {
            status.phase = Phase::Extracting;
            status.extraction = Some(crate::engine::progress::ExtractionStatus {
                package: "b.zip".into(),
                entry: "Base".into(),
                units_done: 1,
                units_total: 2,
            });
        });

        let text = screen(&mut app);
        assert!(text.contains("Preparing to install Base from b.zip"));
        assert!(text.contains("Unpacking contents 1 of 2"));
    }
}
