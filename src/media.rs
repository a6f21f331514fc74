use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use once_cell::unsync::OnceCell;
use tracing::warn;

use crate::error::MuxResult;
use crate::tool::Metadata;

pub const IMAGE_EXTENSIONS: [&str; 5] = ["heic", "heif", "avif", "jpg", "jpeg"];
pub const VIDEO_EXTENSIONS: [&str; 2] = ["mp4", "mov"];

/// Carrier image family. Decides the trailer framing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageType {
    Heic,
    Jpg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VideoType {
    Mp4,
    QuickTime,
}

impl ImageType {
    pub fn from_extension(extension: &str) -> Self {
        match extension.to_ascii_lowercase().as_str() {
            "heic" | "heif" | "avif" => ImageType::Heic,
            "jpg" | "jpeg" => ImageType::Jpg,
            other => {
                warn!("Image extension .{} not supported. Treating as JPG", other);
                ImageType::Jpg
            }
        }
    }

    pub fn mime(self) -> &'static str {
        match self {
            ImageType::Heic => "image/heic",
            ImageType::Jpg => "image/jpeg",
        }
    }
}

impl VideoType {
    pub fn from_extension(extension: &str) -> Self {
        match extension.to_ascii_lowercase().as_str() {
            "mp4" => VideoType::Mp4,
            "mov" => VideoType::QuickTime,
            other => {
                warn!(
                    "Video extension .{} not supported. Treating as QuickTime MOV",
                    other
                );
                VideoType::QuickTime
            }
        }
    }

    pub fn mime(self) -> &'static str {
        match self {
            VideoType::Mp4 => "video/mp4",
            VideoType::QuickTime => "video/quicktime",
        }
    }
}

impl fmt::Display for ImageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ImageType::Heic => "heic",
            ImageType::Jpg => "jpg",
        })
    }
}

impl fmt::Display for VideoType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            VideoType::Mp4 => "mp4",
            VideoType::QuickTime => "qt",
        })
    }
}

/// Lower-cased extension without the dot, empty when there is none.
pub fn extension_of(path: &Path) -> String {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .unwrap_or_default()
}

/// The extension to trust for `path`: the tool-reported one when it disagrees
/// with the file name.
pub fn effective_extension(path: &Path, metadata: Option<&Metadata>) -> String {
    let declared = extension_of(path);
    match metadata.and_then(Metadata::file_type_extension) {
        Some(detected) if detected != declared => {
            warn!(
                "File extension .{} doesn't match with metadata. Treating as .{}",
                declared, detected
            );
            detected
        }
        _ => declared,
    }
}

/// A file on disk with a resolved type. Bytes are read on first use.
#[derive(Debug)]
pub struct MediaAsset<K> {
    path: PathBuf,
    declared_extension: String,
    kind: K,
    bytes: OnceCell<Vec<u8>>,
}

pub type ImageAsset = MediaAsset<ImageType>;
pub type VideoAsset = MediaAsset<VideoType>;

impl<K: Copy> MediaAsset<K> {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn declared_extension(&self) -> &str {
        &self.declared_extension
    }

    pub fn kind(&self) -> K {
        self.kind
    }

    pub fn bytes(&self) -> MuxResult<&[u8]> {
        let bytes = self.bytes.get_or_try_init(|| fs::read(&self.path))?;
        Ok(bytes.as_slice())
    }

    /// Take the bytes out, reading them if they were never loaded.
    pub fn into_bytes(self) -> MuxResult<Vec<u8>> {
        match self.bytes.into_inner() {
            Some(bytes) => Ok(bytes),
            None => Ok(fs::read(&self.path)?),
        }
    }
}

impl ImageAsset {
    pub fn resolve(path: impl Into<PathBuf>, metadata: Option<&Metadata>) -> Self {
        let path = path.into();
        let kind = ImageType::from_extension(&effective_extension(&path, metadata));
        Self {
            declared_extension: extension_of(&path),
            path,
            kind,
            bytes: OnceCell::new(),
        }
    }

    pub fn mime(&self) -> &'static str {
        self.kind.mime()
    }
}

impl VideoAsset {
    pub fn resolve(path: impl Into<PathBuf>, metadata: Option<&Metadata>) -> Self {
        let path = path.into();
        let kind = VideoType::from_extension(&effective_extension(&path, metadata));
        Self {
            declared_extension: extension_of(&path),
            path,
            kind,
            bytes: OnceCell::new(),
        }
    }

    pub fn mime(&self) -> &'static str {
        self.kind.mime()
    }
}
