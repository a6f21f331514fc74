use std::collections::HashMap;
use std::path::Path;

use crate::error::MuxResult;

pub const FILE_TYPE_EXTENSION: &str = "File:FileTypeExtension";
pub const IMAGE_CONTENT_IDENTIFIER: &str = "MakerNotes:ContentIdentifier";
pub const VIDEO_CONTENT_IDENTIFIER: &str = "QuickTime:ContentIdentifier";

/// Group-qualified tag values for one file, e.g. `File:FileTypeExtension`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Metadata(HashMap<String, String>);

impl Metadata {
    pub fn new(tags: HashMap<String, String>) -> Self {
        Self(tags)
    }

    pub fn from_pairs<K, V, I>(pairs: I) -> Self
    where
        K: Into<String>,
        V: Into<String>,
        I: IntoIterator<Item = (K, V)>,
    {
        Self(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Lower-cased file type extension as detected from the content.
    pub fn file_type_extension(&self) -> Option<String> {
        self.get(FILE_TYPE_EXTENSION)
            .map(str::trim)
            .filter(|ext| !ext.is_empty())
            .map(str::to_ascii_lowercase)
    }

    /// Apple Live Photo pairing identifier, from either the image or the video.
    pub fn content_identifier(&self) -> Option<&str> {
        self.get(IMAGE_CONTENT_IDENTIFIER)
            .or_else(|| self.get(VIDEO_CONTENT_IDENTIFIER))
            .map(str::trim)
            .filter(|id| !id.is_empty())
    }
}

pub trait MetadataTool {
    /// Metadata for each path, in the same order as `paths`.
    fn metadata(&self, paths: &[&Path]) -> MuxResult<Vec<Metadata>>;

    /// Textual report of the still-image-time and track-duration fields of
    /// every track in `video`.
    fn timing_report(&self, video: &Path) -> MuxResult<String>;

    /// Video embedded in an existing motion photo; empty when there is none.
    fn embedded_video(&self, image: &Path) -> MuxResult<Vec<u8>>;

    /// Copy the XMP in `sidecar` into `target`, in place.
    fn inject_xmp(&self, sidecar: &Path, target: &Path) -> MuxResult<()>;

    /// Raw XMP packet of `image`; empty when it has none.
    fn raw_xmp(&self, image: &Path) -> MuxResult<Vec<u8>>;
}

impl<T: MetadataTool + ?Sized> MetadataTool for &T {
    fn metadata(&self, paths: &[&Path]) -> MuxResult<Vec<Metadata>> {
        (**self).metadata(paths)
    }

    fn timing_report(&self, video: &Path) -> MuxResult<String> {
        (**self).timing_report(video)
    }

    fn embedded_video(&self, image: &Path) -> MuxResult<Vec<u8>> {
        (**self).embedded_video(image)
    }

    fn inject_xmp(&self, sidecar: &Path, target: &Path) -> MuxResult<()> {
        (**self).inject_xmp(sidecar, target)
    }

    fn raw_xmp(&self, image: &Path) -> MuxResult<Vec<u8>> {
        (**self).raw_xmp(image)
    }
}
