#![allow(dead_code)]

use std::collections::HashMap;
use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};

use motionmux::extract::find_embedded_video;
use motionmux::media::{extension_of, IMAGE_EXTENSIONS};
use motionmux::tool::{
    Metadata, MetadataTool, FILE_TYPE_EXTENSION, IMAGE_CONTENT_IDENTIFIER,
    VIDEO_CONTENT_IDENTIFIER,
};
use motionmux::{MuxError, MuxResult};

pub const LIVE_PHOTO_REPORT: &str = "<Track1:TrackDuration>2.9</Track1:TrackDuration>\n\
     <Track2:TrackDuration>1.5</Track2:TrackDuration>\n\
     <Track2:StillImageTime>-1</Track2:StillImageTime>\n";

/// In-process stand-in for ExifTool.
#[derive(Debug, Clone, Default)]
pub struct FakeTool {
    /// Reported image type; the file's own extension when unset.
    pub image_extension: Option<String>,
    pub timing_report: String,
    pub xmp: Vec<u8>,
    pub content_ids: HashMap<PathBuf, String>,
    /// Injection fails for images with this file stem.
    pub fail_injection_for: Option<String>,
    /// Bytes appended to the image by a successful injection.
    pub injected_bytes: usize,
    /// Any metadata query naming a file with this name fails as a whole.
    pub unreadable: Option<String>,
}

impl FakeTool {
    pub fn live_photo() -> Self {
        Self {
            timing_report: LIVE_PHOTO_REPORT.to_string(),
            ..Default::default()
        }
    }
}

impl MetadataTool for FakeTool {
    fn metadata(&self, paths: &[&Path]) -> MuxResult<Vec<Metadata>> {
        if let Some(name) = &self.unreadable {
            if paths.iter().any(|p| p.file_name() == Some(OsStr::new(name))) {
                return Err(MuxError::Tool(format!("{}: File format error", name)));
            }
        }
        Ok(paths
            .iter()
            .map(|path| {
                let declared = extension_of(path);
                let is_image = IMAGE_EXTENSIONS.contains(&declared.as_str());
                let extension = match &self.image_extension {
                    Some(ext) if is_image => ext.clone(),
                    _ => declared,
                };
                let mut pairs = vec![(FILE_TYPE_EXTENSION.to_string(), extension)];
                if let Some(id) = self.content_ids.get(*path) {
                    let key = if is_image {
                        IMAGE_CONTENT_IDENTIFIER
                    } else {
                        VIDEO_CONTENT_IDENTIFIER
                    };
                    pairs.push((key.to_string(), id.clone()));
                }
                Metadata::from_pairs(pairs)
            })
            .collect())
    }

    fn timing_report(&self, _video: &Path) -> MuxResult<String> {
        Ok(self.timing_report.clone())
    }

    fn embedded_video(&self, image: &Path) -> MuxResult<Vec<u8>> {
        let bytes = fs::read(image)?;
        Ok(find_embedded_video(&bytes)
            .map(<[u8]>::to_vec)
            .unwrap_or_default())
    }

    fn inject_xmp(&self, sidecar: &Path, target: &Path) -> MuxResult<()> {
        assert!(sidecar.is_file(), "sidecar missing: {}", sidecar.display());
        assert!(target.is_file(), "target missing: {}", target.display());
        let name = target.file_name().unwrap().to_string_lossy();
        match &self.fail_injection_for {
            Some(stem) if name.starts_with(&format!("{}.", stem)) => {
                Err(MuxError::Tool(format!("cannot write {}", name)))
            }
            _ => {
                if self.injected_bytes > 0 {
                    let mut bytes = fs::read(target)?;
                    bytes.extend(pattern(self.injected_bytes, 7));
                    fs::write(target, bytes)?;
                }
                Ok(())
            }
        }
    }

    fn raw_xmp(&self, _image: &Path) -> MuxResult<Vec<u8>> {
        Ok(self.xmp.clone())
    }
}

/// Deterministic bytes of a given length.
pub fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len)
        .map(|i| ((i % 251) as u8).wrapping_add(seed))
        .collect()
}

/// A video that passes the container signature check.
pub fn video_bytes(len: usize) -> Vec<u8> {
    let mut bytes = b"\0\0\0\x14ftypqt  \0\0\0\0".to_vec();
    bytes.extend(pattern(len - bytes.len(), 3));
    bytes
}

pub fn write(path: &Path, bytes: &[u8]) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, bytes).unwrap();
}

pub fn be32(bytes: &[u8], at: usize) -> u32 {
    u32::from_be_bytes(bytes[at..at + 4].try_into().unwrap())
}

pub fn file_names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}
