//! XMP Motion Photo directory.
//!
//! Viewers locate the embedded video through a GCamera container directory:
//! two `Container:Item` records, one per semantic, whose `Length`/`Padding`
//! describe where each resource sits in the file. The directory is modelled
//! as typed records and only turned into XML by [`MotionPhotoDirectory::serialize`].
//! Pre-existing XMP from the source image is merged in as verbatim fragments.

use quick_xml::events::attributes::AttrError;
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::name::{Namespace, ResolveResult};
use quick_xml::{NsReader, Writer};
use thiserror::Error;
use tracing::{info, warn};

use crate::error::MuxResult;

pub const X_NS: &str = "adobe:ns:meta/";
pub const RDF_NS: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#";
pub const GCAMERA_NS: &str = "http://ns.google.com/photos/1.0/camera/";
pub const CONTAINER_NS: &str = "http://ns.google.com/photos/1.0/container/";
pub const ITEM_NS: &str = "http://ns.google.com/photos/1.0/container/item/";

const XMP_TOOLKIT: &str = "Adobe XMP Core 5.1.0-jc003";

/// Namespaces the directory itself is written with.
const OWN_NAMESPACES: [(&str, &str); 3] = [
    ("xmlns:GCamera", GCAMERA_NS),
    ("xmlns:Container", CONTAINER_NS),
    ("xmlns:Item", ITEM_NS),
];

/// Namespaces declared by the enclosing `x:xmpmeta` and `rdf:RDF` elements.
const ENCLOSING_NAMESPACES: [(&str, &str); 2] = [("xmlns:x", X_NS), ("xmlns:rdf", RDF_NS)];

/// Role of a directory item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Semantic {
    Primary,
    MotionPhoto,
}

impl Semantic {
    pub fn as_str(self) -> &'static str {
        match self {
            Semantic::Primary => "Primary",
            Semantic::MotionPhoto => "MotionPhoto",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    mime: String,
    semantic: Semantic,
    length: u64,
    padding: u64,
}

impl Item {
    fn new(mime: &str, semantic: Semantic) -> Self {
        Self {
            mime: mime.to_string(),
            semantic,
            length: 0,
            padding: 0,
        }
    }

    pub fn mime(&self) -> &str {
        &self.mime
    }

    pub fn semantic(&self) -> Semantic {
        self.semantic
    }

    pub fn length(&self) -> u64 {
        self.length
    }

    pub fn padding(&self) -> u64 {
        self.padding
    }
}

/// A mutable item field with its new value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemField {
    Mime(String),
    Length(u64),
    Padding(u64),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MotionPhotoDirectory {
    motion_photo: i64,
    motion_photo_version: i64,
    presentation_timestamp_us: i64,
    items: [Item; 2],
    /// Extra `xmlns:*` declarations carried over from merged XMP.
    namespaces: Vec<(String, String)>,
    /// Qualified name and value of every other `Description` attribute.
    attributes: Vec<(String, String)>,
    /// Verbatim child elements copied from merged XMP.
    children: Vec<String>,
}

impl Default for MotionPhotoDirectory {
    fn default() -> Self {
        Self::from_template()
    }
}

impl MotionPhotoDirectory {
    pub fn from_template() -> Self {
        Self {
            motion_photo: 1,
            motion_photo_version: 1,
            presentation_timestamp_us: -1,
            items: [
                Item::new("image/heic", Semantic::Primary),
                Item::new("video/quicktime", Semantic::MotionPhoto),
            ],
            namespaces: Vec::new(),
            attributes: vec![("rdf:about".to_string(), String::new())],
            children: Vec::new(),
        }
    }

    pub fn items(&self) -> &[Item] {
        &self.items
    }

    pub fn item(&self, semantic: Semantic) -> Option<&Item> {
        self.items.iter().find(|item| item.semantic == semantic)
    }

    pub fn presentation_timestamp_us(&self) -> i64 {
        self.presentation_timestamp_us
    }

    pub fn set_presentation_timestamp_us(&mut self, timestamp_us: i64) {
        self.presentation_timestamp_us = timestamp_us;
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn children(&self) -> &[String] {
        &self.children
    }

    /// Update one field of the item with the given semantic.
    pub fn set_item(&mut self, semantic: Semantic, field: ItemField) {
        let item = match self.items.iter_mut().find(|item| item.semantic == semantic) {
            Some(item) => item,
            None => {
                warn!("No directory item with semantic {}", semantic.as_str());
                return;
            }
        };
        match field {
            ItemField::Mime(mime) => item.mime = mime,
            ItemField::Length(length) => item.length = length,
            ItemField::Padding(padding) => item.padding = padding,
        }
    }

    pub fn set_primary_mime(&mut self, mime: &str) {
        self.set_item(Semantic::Primary, ItemField::Mime(mime.to_string()));
    }

    pub fn set_motion_mime(&mut self, mime: &str) {
        self.set_item(Semantic::MotionPhoto, ItemField::Mime(mime.to_string()));
    }

    /// Merge the top-level description of `source` into this directory.
    ///
    /// Child elements other than the container directory are copied
    /// verbatim and every attribute is copied over, replacing ours on
    /// collision. Returns `false` and leaves the directory untouched when
    /// the source cannot be parsed.
    pub fn merge_external(&mut self, source: &str) -> bool {
        let external = match parse_external(source) {
            Ok(external) => external,
            Err(e) => {
                info!("Could not copy metadata from the source XMP: {}", e);
                return false;
            }
        };

        for (declaration, uri) in external.namespaces {
            let declared = OWN_NAMESPACES
                .iter()
                .chain(ENCLOSING_NAMESPACES.iter())
                .find(|(d, _)| *d == declaration);
            if let Some((_, own)) = declared {
                if *own != uri {
                    warn!("XMP metadata - ignoring conflicting {}=\"{}\"", declaration, uri);
                }
                continue;
            }
            upsert(&mut self.namespaces, declaration, uri);
        }

        for attribute in external.attributes {
            info!("XMP metadata - copying attribute {}", attribute.name);
            if attribute.namespace.as_deref() == Some(GCAMERA_NS)
                && self.set_camera_attribute(&attribute.local, &attribute.value)
            {
                continue;
            }
            upsert(&mut self.attributes, attribute.name, attribute.value);
        }

        for child in external.children {
            info!("XMP metadata - copying {}", element_name(&child));
            self.children.push(child);
        }
        true
    }

    fn set_camera_attribute(&mut self, local: &str, value: &str) -> bool {
        let field = match local {
            "MotionPhoto" => &mut self.motion_photo,
            "MotionPhotoVersion" => &mut self.motion_photo_version,
            "MotionPhotoPresentationTimestampUs" => &mut self.presentation_timestamp_us,
            _ => return false,
        };
        match value.trim().parse() {
            Ok(parsed) => *field = parsed,
            Err(_) => warn!("XMP metadata - ignoring GCamera:{}=\"{}\"", local, value),
        }
        true
    }

    /// Serialize as an indented `x:xmpmeta` document.
    pub fn serialize(&self) -> MuxResult<Vec<u8>> {
        let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);

        let mut meta = BytesStart::new("x:xmpmeta");
        meta.push_attribute(("xmlns:x", X_NS));
        meta.push_attribute(("x:xmptk", XMP_TOOLKIT));
        writer.write_event(Event::Start(meta))?;

        let mut rdf = BytesStart::new("rdf:RDF");
        rdf.push_attribute(("xmlns:rdf", RDF_NS));
        writer.write_event(Event::Start(rdf))?;

        let mut description = BytesStart::new("rdf:Description");
        for (name, value) in &self.attributes {
            description.push_attribute((name.as_str(), value.as_str()));
        }
        for (declaration, uri) in OWN_NAMESPACES {
            description.push_attribute((declaration, uri));
        }
        for (declaration, uri) in &self.namespaces {
            description.push_attribute((declaration.as_str(), uri.as_str()));
        }
        let motion_photo = self.motion_photo.to_string();
        let version = self.motion_photo_version.to_string();
        let timestamp = self.presentation_timestamp_us.to_string();
        description.push_attribute(("GCamera:MotionPhoto", motion_photo.as_str()));
        description.push_attribute(("GCamera:MotionPhotoVersion", version.as_str()));
        description.push_attribute((
            "GCamera:MotionPhotoPresentationTimestampUs",
            timestamp.as_str(),
        ));
        writer.write_event(Event::Start(description))?;

        writer.write_event(Event::Start(BytesStart::new("Container:Directory")))?;
        writer.write_event(Event::Start(BytesStart::new("rdf:Seq")))?;
        for item in &self.items {
            let mut li = BytesStart::new("rdf:li");
            li.push_attribute(("rdf:parseType", "Resource"));
            writer.write_event(Event::Start(li))?;

            let length = item.length.to_string();
            let padding = item.padding.to_string();
            let mut record = BytesStart::new("Container:Item");
            record.push_attribute(("Item:Mime", item.mime.as_str()));
            record.push_attribute(("Item:Semantic", item.semantic.as_str()));
            record.push_attribute(("Item:Length", length.as_str()));
            record.push_attribute(("Item:Padding", padding.as_str()));
            writer.write_event(Event::Empty(record))?;

            writer.write_event(Event::End(BytesEnd::new("rdf:li")))?;
        }
        writer.write_event(Event::End(BytesEnd::new("rdf:Seq")))?;
        writer.write_event(Event::End(BytesEnd::new("Container:Directory")))?;

        for child in &self.children {
            writer.write_event(Event::Text(BytesText::from_escaped(child.as_str())))?;
        }

        writer.write_event(Event::End(BytesEnd::new("rdf:Description")))?;
        writer.write_event(Event::End(BytesEnd::new("rdf:RDF")))?;
        writer.write_event(Event::End(BytesEnd::new("x:xmpmeta")))?;

        let mut bytes = writer.into_inner();
        bytes.push(b'\n');
        Ok(bytes)
    }
}

fn upsert(entries: &mut Vec<(String, String)>, key: String, value: String) {
    match entries.iter_mut().find(|(k, _)| *k == key) {
        Some(entry) => entry.1 = value,
        None => entries.push((key, value)),
    }
}

/// Qualified name of the first element in a fragment, for logging.
fn element_name(fragment: &str) -> &str {
    fragment
        .trim_start()
        .trim_start_matches('<')
        .split(|c: char| c.is_whitespace() || c == '>' || c == '/')
        .next()
        .unwrap_or_default()
}

#[derive(Error, Debug)]
pub enum MergeError {
    #[error("{0}")]
    Xml(#[from] quick_xml::Error),

    #[error("{0}")]
    Attribute(#[from] AttrError),

    #[error("no rdf:Description found")]
    NoDescription,

    #[error("document ends inside rdf:Description")]
    Truncated,
}

#[derive(Debug)]
struct ExternalAttribute {
    name: String,
    namespace: Option<String>,
    local: String,
    value: String,
}

#[derive(Debug, Default)]
struct ExternalDescription {
    namespaces: Vec<(String, String)>,
    attributes: Vec<ExternalAttribute>,
    children: Vec<String>,
}

fn bound_to(ns: &ResolveResult<'_>, uri: &str) -> bool {
    matches!(ns, ResolveResult::Bound(Namespace(n)) if *n == uri.as_bytes())
}

fn declarations(e: &BytesStart<'_>, out: &mut Vec<(String, String)>) -> Result<(), MergeError> {
    for attr in e.attributes() {
        let attr = attr?;
        if attr.key.as_namespace_binding().is_some() {
            let declaration = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
            let uri = attr.unescape_value()?.into_owned();
            upsert(out, declaration, uri);
        }
    }
    Ok(())
}

fn description_attributes(
    reader: &NsReader<&[u8]>,
    e: &BytesStart<'_>,
) -> Result<Vec<ExternalAttribute>, MergeError> {
    let mut attributes = Vec::new();
    for attr in e.attributes() {
        let attr = attr?;
        if attr.key.as_namespace_binding().is_some() {
            continue;
        }
        let (ns, local) = reader.resolve_attribute(attr.key);
        let namespace = match ns {
            ResolveResult::Bound(Namespace(uri)) => Some(String::from_utf8_lossy(uri).into_owned()),
            _ => None,
        };
        attributes.push(ExternalAttribute {
            name: String::from_utf8_lossy(attr.key.as_ref()).into_owned(),
            namespace,
            local: String::from_utf8_lossy(local.as_ref()).into_owned(),
            value: attr.unescape_value()?.into_owned(),
        });
    }
    Ok(attributes)
}

/// Collect the child elements of the description whose start tag was just
/// read, skipping the container directory.
fn description_children(reader: &mut NsReader<&[u8]>, xml: &str) -> Result<Vec<String>, MergeError> {
    let mut children = Vec::new();
    loop {
        let start = reader.buffer_position() as usize;
        let (ns, event) = reader.read_resolved_event()?;
        let in_container = bound_to(&ns, CONTAINER_NS);
        let (skip, end) = match event {
            Event::Start(e) => {
                let skip = in_container && e.local_name().as_ref() == b"Directory";
                reader.read_to_end(e.name())?;
                (skip, reader.buffer_position() as usize)
            }
            Event::Empty(e) => (
                in_container && e.local_name().as_ref() == b"Directory",
                reader.buffer_position() as usize,
            ),
            Event::End(_) => return Ok(children),
            Event::Eof => return Err(MergeError::Truncated),
            _ => continue,
        };
        if !skip {
            let fragment = xml.get(start..end).ok_or(MergeError::Truncated)?;
            children.push(fragment.to_string());
        }
    }
}

/// Parse the first `rdf:Description` of an XMP packet. Nothing is applied
/// until the whole description has been read.
fn parse_external(xml: &str) -> Result<ExternalDescription, MergeError> {
    let mut reader = NsReader::from_str(xml);
    let mut namespaces = Vec::new();
    loop {
        let (ns, event) = reader.read_resolved_event()?;
        let in_rdf = bound_to(&ns, RDF_NS);
        match event {
            Event::Start(e) => {
                declarations(&e, &mut namespaces)?;
                if in_rdf && e.local_name().as_ref() == b"Description" {
                    let attributes = description_attributes(&reader, &e)?;
                    let children = description_children(&mut reader, xml)?;
                    return Ok(ExternalDescription {
                        namespaces,
                        attributes,
                        children,
                    });
                }
            }
            Event::Empty(e) if in_rdf && e.local_name().as_ref() == b"Description" => {
                declarations(&e, &mut namespaces)?;
                let attributes = description_attributes(&reader, &e)?;
                return Ok(ExternalDescription {
                    namespaces,
                    attributes,
                    children: Vec::new(),
                });
            }
            Event::Eof => return Err(MergeError::NoDescription),
            _ => {}
        }
    }
}
