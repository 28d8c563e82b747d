use std::fs::File;
use std::io::{Read, Seek};
use std::sync::Arc;

use zip::ZipArchive;

use crate::engine::error::EngineError;
use crate::engine::manifest::{IconImage, ManifestEntry, PackageManifest};

pub const MANIFEST_NAME: &str = "metadata.xml";
pub const ICON_NAME: &str = "icon.tga";
pub const MANIFEST_MAX_BYTES: u64 = 0x8000;
pub const ICON_MAX_BYTES: u64 = 0x10100;

#[derive(Debug)]
pub enum PackageKind {
    Single(String),
    Container(ContainerPackage),
}

pub struct ContainerPackage {
    pub source: String,
    pub manifest: PackageManifest,
    archive: ZipArchive<File>,
    cursor: usize,
}

impl std::fmt::Debug for ContainerPackage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContainerPackage")
            .field("source", &self.source)
            .field("manifest", &self.manifest)
            .field("records", &self.archive.len())
            .field("cursor", &self.cursor)
            .finish()
    }
}

impl ContainerPackage {
    pub fn open(path: &str) -> Result<Self, EngineError> {
        let file = File::open(path).map_err(|err| EngineError::unreadable(path, err))?;
        let mut archive =
            ZipArchive::new(file).map_err(|err| EngineError::unreadable(path, err))?;

        let raw = read_bounded(&mut archive, MANIFEST_NAME, MANIFEST_MAX_BYTES)
            .map_err(|reason| EngineError::unreadable(path, reason))?;
        let text = std::str::from_utf8(&raw).map_err(|_| {
            EngineError::ManifestMalformed(format!("{MANIFEST_NAME} in {path} is not UTF-8"))
        })?;
        let mut manifest = PackageManifest::parse(text)?;

        if manifest.has_icon {
            match read_bounded(&mut archive, ICON_NAME, ICON_MAX_BYTES) {
                Ok(bytes) => manifest.icon = Some(Arc::new(IconImage::new(bytes))),
                Err(reason) => {
                    tracing::info!("icon for {path} unavailable: {reason}");
                    manifest.has_icon = false;
                }
            }
        }

        tracing::info!(
            "opened {path}: '{}' with {} entries",
            manifest.display_name,
            manifest.entries.len()
        );

        Ok(Self {
            source: path.to_string(),
            manifest,
            archive,
            cursor: 0,
        })
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn advance(&mut self) -> Option<ManifestEntry> {
        let entry = self.manifest.entries.get(self.cursor).cloned()?;
        self.cursor += 1;
        Some(entry)
    }

    pub(crate) fn archive_mut(&mut self) -> &mut ZipArchive<File> {
        &mut self.archive
    }
}

/// Paths ending in a separator are unit directories.
pub fn inspect(path: &str) -> Result<PackageKind, EngineError> {
    if path.ends_with('/') || path.ends_with(std::path::MAIN_SEPARATOR) {
        return Ok(PackageKind::Single(path.to_string()));
    }
    ContainerPackage::open(path).map(PackageKind::Container)
}

fn read_bounded<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    name: &str,
    limit: u64,
) -> Result<Vec<u8>, String> {
    let mut record = archive
        .by_name(name)
        .map_err(|err| format!("missing {name}: {err}"))?;
    if record.size() > limit {
        return Err(format!(
            "{name} is {} bytes, limit is {limit}",
            record.size()
        ));
    }

    let mut buf = Vec::with_capacity(record.size() as usize);
    record
        .read_to_end(&mut buf)
        .map_err(|err| format!("failed to read {name}: {err}"))?;
    Ok(buf)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Write;
    use std::path::Path;
    use zip::write::SimpleFileOptions;

    /// Writes a stored (uncompressed) zip. Names ending in `/` become
    /// directory records.
    pub(crate) fn write_zip(path: &Path, records: &[(&str, &[u8])]) {
        let file = File::create(path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        let options =
            SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
        for (name, data) in records {
            if name.ends_with('/') {
                writer.add_directory(*name, options).unwrap();
            } else {
                writer.start_file(*name, options).unwrap();
                writer.write_all(data).unwrap();
            }
        }
        writer.finish().unwrap();
    }

    pub(crate) const BUNDLE_XML: &str = r#"<package>
        <metadata><name>Bundle</name><icon>1</icon></metadata>
        <entries>
          <entry name="Base" folder="base/" entries="2"/>
          <entry name="Update" folder="update/" entries="1"/>
          <entry name="Extra" folder="extra/" entries="1"/>
        </entries>
      </package>"#;

    #[test]
    fn trailing_separator_means_single_unit() {
        match inspect("/titles/game/").unwrap() {
            PackageKind::Single(path) => assert_eq!(path, "/titles/game/"),
            other => panic!("expected single, got {other:?}"),
        }
    }

    #[test]
    fn container_with_icon_loads_it() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bundle.zip");
        write_zip(
            &path,
            &[(MANIFEST_NAME, BUNDLE_XML.as_bytes()), (ICON_NAME, &[7u8; 64])],
        );

        let PackageKind::Container(container) = inspect(path.to_str().unwrap()).unwrap() else {
            panic!("expected container");
        };
        assert!(container.manifest.has_icon);
        assert_eq!(container.manifest.icon.as_ref().unwrap().bytes().len(), 64);
        assert_eq!(container.manifest.entries.len(), 3);
        assert_eq!(container.cursor(), 0);
    }

    #[test]
    fn missing_icon_resource_is_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bundle.zip");
        write_zip(&path, &[(MANIFEST_NAME, BUNDLE_XML.as_bytes())]);

        let container = ContainerPackage::open(path.to_str().unwrap()).unwrap();
        assert!(!container.manifest.has_icon);
        assert!(container.manifest.icon.is_none());
        assert_eq!(container.manifest.entries.len(), 3);
    }

    #[test]
    fn oversized_icon_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bundle.zip");
        let icon = vec![0u8; ICON_MAX_BYTES as usize + 1];
        write_zip(
            &path,
            &[(MANIFEST_NAME, BUNDLE_XML.as_bytes()), (ICON_NAME, icon.as_slice())],
        );

        let container = ContainerPackage::open(path.to_str().unwrap()).unwrap();
        assert!(!container.manifest.has_icon);
    }

    #[test]
    fn icon_flag_zero_skips_icon_even_when_present() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bundle.zip");
        let xml = BUNDLE_XML.replace("<icon>1</icon>", "<icon>0</icon>");
        write_zip(&path, &[(MANIFEST_NAME, xml.as_bytes()), (ICON_NAME, &[1u8; 8])]);

        let container = ContainerPackage::open(path.to_str().unwrap()).unwrap();
        assert!(!container.manifest.has_icon);
    }

    #[test]
    fn archive_without_manifest_is_unreadable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plain.zip");
        write_zip(&path, &[("readme.txt", b"hi")]);

        let err = inspect(path.to_str().unwrap()).unwrap_err();
        assert!(matches!(err, EngineError::PackageUnreadable { .. }));
    }

    #[test]
    fn oversized_manifest_is_unreadable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bloated.zip");
        let mut xml = BUNDLE_XML.to_string();
        xml.push_str(&" ".repeat(MANIFEST_MAX_BYTES as usize));
        write_zip(&path, &[(MANIFEST_NAME, xml.as_bytes())]);

        let err = inspect(path.to_str().unwrap()).unwrap_err();
        assert!(matches!(err, EngineError::PackageUnreadable { .. }));
        assert!(err.to_string().contains(MANIFEST_NAME));
    }

    #[test]
    fn non_archive_file_is_unreadable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.zip");
        std::fs::write(&path, b"definitely not a zip").unwrap();

        let err = inspect(path.to_str().unwrap()).unwrap_err();
        assert!(matches!(err, EngineError::PackageUnreadable { .. }));
    }

    #[test]
    fn advance_hands_out_entries_once_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bundle.zip");
        write_zip(&path, &[(MANIFEST_NAME, BUNDLE_XML.as_bytes())]);

        let mut container = ContainerPackage::open(path.to_str().unwrap()).unwrap();
        let names: Vec<_> = std::iter::from_fn(|| container.advance())
            .map(|entry| entry.name)
            .collect();
        assert_eq!(names, ["Base", "Update", "Extra"]);
        assert!(container.advance().is_none());
        assert_eq!(container.cursor(), 3);
    }
}
