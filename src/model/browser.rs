use anyhow::Result;
use ignore::WalkBuilder;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct BrowserEntry {
    pub path: PathBuf,
    pub name: String,
    pub is_dir: bool,
}

/// Single-directory listing with a cursor. Directories sort first.
pub struct Browser {
    root: PathBuf,
    cwd: PathBuf,
    pub entries: Vec<BrowserEntry>,
    pub selected: usize,
}

impl Browser {
    pub fn new(root: PathBuf) -> Result<Self> {
        let mut browser = Self {
            cwd: root.clone(),
            root,
            entries: Vec::new(),
            selected: 0,
        };

        browser.refresh()?;
        Ok(browser)
    }

    pub fn cwd(&self) -> &Path {
        &self.cwd
    }

    pub fn refresh(&mut self) -> Result<()> {
        self.entries = list_dir(&self.cwd)?;

        if self.entries.is_empty() {
            self.selected = 0;
        } else if self.selected >= self.entries.len() {
            self.selected = self.entries.len() - 1;
        }

        Ok(())
    }

    pub fn move_selection(&mut self, delta: isize) {
        if self.entries.is_empty() {
            self.selected = 0;
            return;
        }

        let max = self.entries.len().saturating_sub(1) as isize;
        let next = (self.selected as isize + delta).clamp(0, max);
        self.selected = next as usize;
    }

    pub fn selected_entry(&self) -> Option<&BrowserEntry> {
        self.entries.get(self.selected)
    }

    /// Descends into the selected directory. Empty or unreadable
    /// directories are not entered.
    pub fn enter_selected(&mut self) -> Result<bool> {
        let Some(entry) = self.selected_entry() else {
            return Ok(false);
        };
        if !entry.is_dir {
            return Ok(false);
        }

        let target = entry.path.clone();
        let entries = match list_dir(&target) {
            Ok(entries) if !entries.is_empty() => entries,
            Ok(_) => return Ok(false),
            Err(err) => {
                tracing::warn!("cannot open {}: {err}", target.display());
                return Ok(false);
            }
        };

        self.cwd = target;
        self.entries = entries;
        self.selected = 0;
        Ok(true)
    }

    /// Moves to the parent directory, selecting the directory we came from.
    pub fn leave(&mut self) -> Result<bool> {
        if self.cwd == self.root {
            return Ok(false);
        }
        let Some(parent) = self.cwd.parent().map(Path::to_path_buf) else {
            return Ok(false);
        };

        let previous = std::mem::replace(&mut self.cwd, parent);
        self.selected = 0;
        self.refresh()?;

        if let Some(idx) = self.entries.iter().position(|e| e.path == previous) {
            self.selected = idx;
        }
        Ok(true)
    }

    pub fn package_path(&self) -> Option<String> {
        self.selected_entry()
            .filter(|entry| !entry.is_dir)
            .map(|entry| entry.path.display().to_string())
    }

    /// Queue path for a unit directory: the selected directory, or the
    /// current one when a file is selected. Always ends in a separator.
    pub fn unit_path(&self) -> String {
        let dir = match self.selected_entry() {
            Some(entry) if entry.is_dir => entry.path.as_path(),
            _ => self.cwd.as_path(),
        };
        let mut path = dir.display().to_string();
        if !path.ends_with('/') {
            path.push('/');
        }
        path
    }
}

fn list_dir(dir: &Path) -> Result<Vec<BrowserEntry>> {
    if !dir.is_dir() {
        anyhow::bail!("{} is not a directory", dir.display());
    }

    let mut entries: Vec<BrowserEntry> = WalkBuilder::new(dir)
        .max_depth(Some(1))
        .standard_filters(false)
        .build()
        .flatten()
        .filter_map(|entry| {
            let path = entry.path().to_path_buf();
            if path == dir {
                return None;
            }

            let metadata = entry.metadata().ok()?;
            let name = entry.file_name().to_str()?.to_string();
            Some(BrowserEntry {
                path,
                name,
                is_dir: metadata.is_dir(),
            })
        })
        .collect();

    entries.sort_by(|a, b| match (a.is_dir, b.is_dir) {
        (true, false) => std::cmp::Ordering::Less,
        (false, true) => std::cmp::Ordering::Greater,
        _ => a.name.to_lowercase().cmp(&b.name.to_lowercase()),
    });

    Ok(entries)
}
