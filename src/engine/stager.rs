use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};

use crate::engine::error::EngineError;
use crate::engine::inspector::ContainerPackage;
use crate::engine::manifest::ManifestEntry;

const PROGRESS_UNIT_EXTENSION: &str = "app";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedUnit {
    pub path: PathBuf,
    pub entry: ManifestEntry,
    pub units_extracted: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractOutcome {
    Staged(StagedUnit),
    Exhausted,
}

#[derive(Debug, Clone)]
pub struct Stager {
    dir: PathBuf,
}

impl Stager {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn reset(&self) -> Result<(), EngineError> {
        self.clear()?;
        fs::create_dir_all(&self.dir).map_err(|source| self.failed(source))
    }

    pub fn clear(&self) -> Result<(), EngineError> {
        match fs::remove_dir_all(&self.dir) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(self.failed(source)),
        }
    }

    /// Unpacks the entry under the cursor. `on_unit` gets the running
    /// count of `.app` files written.
    pub fn extract_next(
        &self,
        container: &mut ContainerPackage,
        mut on_unit: impl FnMut(u32),
    ) -> Result<ExtractOutcome, EngineError> {
        let Some(entry) = container.advance() else {
            return Ok(ExtractOutcome::Exhausted);
        };

        tracing::info!(
            "staging entry '{}' from '{}' ({})",
            entry.name,
            container.source,
            entry.folder_prefix
        );
        self.reset()?;

        let archive = container.archive_mut();
        let mut units_extracted = 0;

        for index in 0..archive.len() {
            let mut record = match archive.by_index(index) {
                Ok(record) => record,
                Err(err) => {
                    tracing::warn!("failed to stat record #{index}: {err}");
                    continue;
                }
            };

            if record.is_dir() || !record.name().starts_with(&entry.folder_prefix) {
                continue;
            }

            let name = record.name().to_string();
            let Some(relative) = staged_relative_path(&name, &entry.folder_prefix) else {
                tracing::warn!("skipping unsafe record path {name}");
                continue;
            };

            tracing::debug!(
                "extracting {name} ({} bytes, {} compressed)",
                record.size(),
                record.compressed_size()
            );
            if let Err(err) = write_record(&mut record, &self.dir.join(&relative)) {
                tracing::warn!("failed to extract {name}: {err}");
                continue;
            }

            if is_progress_unit(&relative) {
                units_extracted += 1;
                on_unit(units_extracted);
            }
        }

        Ok(ExtractOutcome::Staged(StagedUnit {
            path: self.dir.clone(),
            entry,
            units_extracted,
        }))
    }

    fn failed(&self, source: io::Error) -> EngineError {
        EngineError::StagingFailed {
            path: self.dir.clone(),
            source,
        }
    }
}

/// Strips `prefix` from a record path exactly once. Returns `None` when
/// nothing is left or the remainder would escape the staging directory.
pub fn staged_relative_path(record: &str, prefix: &str) -> Option<PathBuf> {
    let rest = record.strip_prefix(prefix)?.trim_start_matches('/');
    if rest.is_empty() {
        return None;
    }

    let relative = PathBuf::from(rest);
    let safe = relative
        .components()
        .all(|component| matches!(component, Component::Normal(_) | Component::CurDir));
    safe.then_some(relative)
}

fn is_progress_unit(relative: &Path) -> bool {
    relative.extension().and_then(|ext| ext.to_str()) == Some(PROGRESS_UNIT_EXTENSION)
}

fn write_record(record: &mut impl Read, dest: &Path) -> io::Result<()> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut out = File::create(dest)?;
    io::copy(record, &mut out)?;
    Ok(())
}
