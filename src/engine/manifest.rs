use std::sync::Arc;

use roxmltree::{Document, Node};

use crate::engine::error::EngineError;

pub const NO_NAME: &str = "<no name>";

/// Display and install metadata read from a container's `metadata.xml`.
///
/// ```xml
/// <package>
///   <metadata><name>Bundle</name><icon>1</icon></metadata>
///   <entries>
///     <entry name="Base" folder="base/" entries="3"/>
///     <entry name="Update" folder="update/" entries="2"/>
///   </entries>
/// </package>
/// ```
#[derive(Debug, Clone)]
pub struct PackageManifest {
    pub display_name: String,
    /// True only when the icon flag is `1` and the icon resource loaded.
    pub has_icon: bool,
    pub icon: Option<Arc<IconImage>>,
    /// Install order.
    pub entries: Vec<ManifestEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    pub name: String,
    /// Raw record-path prefix selecting this entry's files.
    pub folder_prefix: String,
    /// Progress denominator only.
    pub expected_units: u32,
}

impl PackageManifest {
    /// Parses the manifest document. `has_icon` reflects the flag only;
    /// the caller clears it if the icon resource cannot be loaded.
    pub fn parse(text: &str) -> Result<Self, EngineError> {
        let doc = Document::parse(text)
            .map_err(|err| EngineError::ManifestMalformed(format!("invalid markup: {err}")))?;
        let root = doc.root_element();

        let metadata = child(root, "metadata");
        let display_name = metadata
            .and_then(|m| child(m, "name"))
            .and_then(|n| n.text())
            .unwrap_or(NO_NAME)
            .to_string();
        let has_icon = metadata
            .and_then(|m| child(m, "icon"))
            .and_then(|n| n.text())
            == Some("1");

        let entries = match child(root, "entries") {
            Some(list) => list
                .children()
                .filter(|n| n.has_tag_name("entry"))
                .enumerate()
                .map(|(idx, node)| parse_entry(idx, node))
                .collect::<Result<Vec<_>, _>>()?,
            None => Vec::new(),
        };

        Ok(Self {
            display_name,
            has_icon,
            icon: None,
            entries,
        })
    }
}

fn parse_entry(idx: usize, node: Node<'_, '_>) -> Result<ManifestEntry, EngineError> {
    let folder_prefix = node.attribute("folder").ok_or_else(|| {
        EngineError::ManifestMalformed(format!("entry #{idx} has no folder attribute"))
    })?;
    let raw_count = node.attribute("entries").ok_or_else(|| {
        EngineError::ManifestMalformed(format!("entry #{idx} has no entries attribute"))
    })?;
    let expected_units = raw_count.trim().parse::<u32>().map_err(|_| {
        EngineError::ManifestMalformed(format!(
            "entry #{idx} has a non-numeric entries count {raw_count:?}"
        ))
    })?;

    Ok(ManifestEntry {
        name: node.attribute("name").unwrap_or(NO_NAME).to_string(),
        folder_prefix: folder_prefix.to_string(),
        expected_units,
    })
}

fn child<'a, 'input>(node: Node<'a, 'input>, tag: &str) -> Option<Node<'a, 'input>> {
    node.children().find(|n| n.has_tag_name(tag))
}

/// Raw TGA icon bytes, handed to the presentation layer by `Arc`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IconImage {
    bytes: Vec<u8>,
}

impl IconImage {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Width and height from the TGA header, if the header is present.
    pub fn dimensions(&self) -> Option<(u16, u16)> {
        let header = self.bytes.get(12..16)?;
        let width = u16::from_le_bytes([header[0], header[1]]);
        let height = u16::from_le_bytes([header[2], header[3]]);
        Some((width, height))
    }
}
