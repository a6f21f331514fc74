use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info, info_span, warn};

use crate::directory::{ItemField, MotionPhotoDirectory, Semantic};
use crate::error::{MuxError, MuxResult};
use crate::extract::looks_like_video;
use crate::keyframe;
use crate::media::{ImageAsset, ImageType, VideoAsset, VideoType};
use crate::paths::{self, TempArtifacts};
use crate::tool::{Metadata, MetadataTool};
use crate::trailer::SamsungTrailer;

/// Keyframe timestamp written when none can be resolved.
pub const UNKNOWN_TIMESTAMP_US: i64 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Validating,
    TypesResolved,
    XmpPatching,
    XmpSkipped,
    Assembling,
    Writing,
    CleaningUp,
    Done,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Validating => "validating",
            Stage::TypesResolved => "resolving types",
            Stage::XmpPatching => "patching XMP",
            Stage::XmpSkipped => "skipping XMP",
            Stage::Assembling => "assembling",
            Stage::Writing => "writing",
            Stage::CleaningUp => "cleaning up",
            Stage::Done => "done",
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MuxOptions {
    pub output_file: Option<PathBuf>,
    pub output_directory: Option<PathBuf>,
    pub overwrite: bool,
    pub delete_video: bool,
    pub keep_temp: bool,
    pub no_xmp: bool,
}

impl MuxOptions {
    /// Reject option combinations. Touches no files.
    pub fn validate(&self) -> MuxResult<()> {
        if self.output_file.is_some() && self.overwrite {
            return Err(MuxError::ConflictingOptions(
                "--output-file cannot be combined with --overwrite",
            ));
        }
        if self.output_file.is_some() && self.output_directory.is_some() {
            return Err(MuxError::ConflictingOptions(
                "--output-file cannot be combined with --output-directory",
            ));
        }
        if self.output_directory.is_some() && self.overwrite {
            return Err(MuxError::ConflictingOptions(
                "--output-directory cannot be combined with --overwrite",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MuxReport {
    pub output: PathBuf,
    pub timestamp_us: i64,
    pub bytes_written: u64,
}

pub struct Muxer<T> {
    image: PathBuf,
    video: PathBuf,
    tool: T,
    options: MuxOptions,
    stage: Stage,
}

impl<T: MetadataTool> Muxer<T> {
    pub fn new(
        image: impl Into<PathBuf>,
        video: impl Into<PathBuf>,
        tool: T,
        options: MuxOptions,
    ) -> MuxResult<Self> {
        options.validate()?;

        let image = image.into();
        let video = video.into();
        if !image.is_file() {
            return Err(MuxError::MissingInput { kind: "Image file", path: image });
        }
        if !video.is_file() {
            return Err(MuxError::MissingInput { kind: "Video file", path: video });
        }
        if let Some(directory) = &options.output_directory {
            if !directory.exists() {
                return Err(MuxError::MissingOutputDirectory(directory.clone()));
            }
            if !directory.is_dir() {
                return Err(MuxError::OutputDirectoryIsFile(directory.clone()));
            }
        }
        if options.overwrite || options.delete_video {
            warn!("Make sure to have a backup of your files!");
        }

        Ok(Self {
            image,
            video,
            tool,
            options,
            stage: Stage::Validating,
        })
    }

    /// The stage reached so far; after a failed [`mux`](Self::mux), the
    /// stage the failure happened in.
    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn mux(&mut self) -> MuxResult<MuxReport> {
        let name = self
            .image
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default();
        let span = info_span!("mux", file = %name);
        let _enter = span.enter();

        let result = self.run();
        if let Err(e) = &result {
            debug!("Failed while {}: {}", self.stage, e);
        }
        result
    }

    fn enter(&mut self, stage: Stage) {
        debug!("Stage: {}", stage);
        self.stage = stage;
    }

    fn run(&mut self) -> MuxResult<MuxReport> {
        let mut temp = TempArtifacts::new(self.options.keep_temp);
        let mut output = paths::resolve_output(
            &self.image,
            self.options.output_file.as_deref(),
            self.options.output_directory.as_deref(),
            self.options.overwrite,
        );

        let metadata = self
            .tool
            .metadata(&[self.image.as_path(), self.video.as_path()])?;
        let image_metadata = metadata.first();
        let image = ImageAsset::resolve(&self.image, image_metadata);
        let video = VideoAsset::resolve(&self.video, metadata.get(1));
        if let Some(detected) = image_metadata.and_then(Metadata::file_type_extension) {
            output = paths::fix_output_extension(&output, &detected);
        }

        let mut directory = MotionPhotoDirectory::from_template();
        if image.kind() == ImageType::Jpg {
            directory.set_primary_mime(image.mime());
        }
        if video.kind() == VideoType::Mp4 {
            directory.set_motion_mime(video.mime());
        }
        debug!(
            "Image .{} treated as {:?}, video .{} as {:?}",
            image.declared_extension(),
            image.kind(),
            video.declared_extension(),
            video.kind()
        );
        if !looks_like_video(video.bytes()?) {
            warn!("{} doesn't look like an MP4 or QuickTime video", self.video.display());
        }
        self.enter(Stage::TypesResolved);

        let trailer = SamsungTrailer::new(video.into_bytes()?, image.kind());
        let mut timestamp_us = UNKNOWN_TIMESTAMP_US;
        let carrier = if self.options.no_xmp {
            self.enter(Stage::XmpSkipped);
            image.into_bytes()?
        } else {
            self.enter(Stage::XmpPatching);
            timestamp_us = self.keyframe_timestamp();
            directory.set_presentation_timestamp_us(timestamp_us);
            self.merge_existing_xmp(&mut directory);
            timestamp_us = directory.presentation_timestamp_us();

            directory.set_item(
                Semantic::MotionPhoto,
                ItemField::Length(trailer.video_size_for_directory()),
            );
            directory.set_item(Semantic::Primary, ItemField::Padding(trailer.image_padding()));

            let sidecar = temp.track(paths::sidecar_path(&output));
            fs::write(&sidecar, directory.serialize()?)?;
            let duplicate = temp.track(paths::duplicate_path(&output));
            fs::copy(image.path(), &duplicate)?;
            self.tool.inject_xmp(&sidecar, &duplicate)?;
            fs::read(&duplicate)?
        };

        self.enter(Stage::Assembling);
        let trailer = trailer.finalize(carrier.len() as u64)?;
        let mut bytes = carrier;
        bytes.extend_from_slice(&trailer.emit());

        self.enter(Stage::Writing);
        let bytes_written = paths::write_output(&output, &bytes, &self.image)?;

        self.enter(Stage::CleaningUp);
        drop(temp);
        if self.options.delete_video {
            fs::remove_file(&self.video)?;
            debug!("Deleted {}", self.video.display());
        }
        if self.options.overwrite && output != self.image {
            fs::remove_file(&self.image)?;
            debug!("Deleted {}", self.image.display());
        }

        self.enter(Stage::Done);
        info!("Wrote {}", output.display());
        Ok(MuxReport {
            output,
            timestamp_us,
            bytes_written,
        })
    }

    fn keyframe_timestamp(&self) -> i64 {
        let report = match self.tool.timing_report(&self.video) {
            Ok(report) => report,
            Err(e) => {
                info!("Could not read video timing: {}", e);
                return UNKNOWN_TIMESTAMP_US;
            }
        };
        match keyframe::resolve_timestamp_us(&report) {
            Ok(timestamp_us) => {
                debug!("Keyframe at {}us", timestamp_us);
                timestamp_us
            }
            Err(e) => {
                info!("No keyframe timestamp: {}", e);
                UNKNOWN_TIMESTAMP_US
            }
        }
    }

    fn merge_existing_xmp(&self, directory: &mut MotionPhotoDirectory) {
        match self.tool.raw_xmp(&self.image) {
            Ok(xmp) if xmp.is_empty() => warn!("Image has no XMP metadata to copy"),
            Ok(xmp) => {
                directory.merge_external(&String::from_utf8_lossy(&xmp));
            }
            Err(e) => warn!("Could not read XMP metadata from image: {}", e),
        }
    }
}

/// Mux one pair with the given tool.
pub fn mux_pair<T: MetadataTool>(
    image: &Path,
    video: &Path,
    tool: T,
    options: MuxOptions,
) -> MuxResult<MuxReport> {
    Muxer::new(image, video, tool, options)?.mux()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_file_and_overwrite_conflict() {
        let options = MuxOptions {
            output_file: Some("out.heic".into()),
            overwrite: true,
            ..Default::default()
        };
        assert!(matches!(
            options.validate(),
            Err(MuxError::ConflictingOptions(_))
        ));
    }

    #[test]
    fn output_file_and_directory_conflict() {
        let options = MuxOptions {
            output_file: Some("out.heic".into()),
            output_directory: Some("out".into()),
            ..Default::default()
        };
        assert!(options.validate().is_err());
    }

    #[test]
    fn output_directory_and_overwrite_conflict() {
        let options = MuxOptions {
            output_directory: Some("out".into()),
            overwrite: true,
            ..Default::default()
        };
        assert!(options.validate().is_err());
    }

    #[test]
    fn plain_options_are_valid() {
        assert!(MuxOptions::default().validate().is_ok());
        let options = MuxOptions {
            overwrite: true,
            delete_video: true,
            ..Default::default()
        };
        assert!(options.validate().is_ok());
    }

    #[test]
    fn stage_names() {
        assert_eq!(Stage::XmpPatching.to_string(), "patching XMP");
        assert_eq!(Stage::Done.to_string(), "done");
    }
}
