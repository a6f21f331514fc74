use std::path::PathBuf;

use clap::Parser;
use tracing::level_filters::LevelFilter;

use crate::batch::BatchOptions;
use crate::error::{MuxError, MuxResult};
use crate::muxer::MuxOptions;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "motionmux",
    version,
    about = "Mux a still image and a video into a Motion Photo"
)]
pub struct Args {
    /// Image to use as the still
    #[arg(short = 'i', long)]
    pub input_image: Option<PathBuf>,

    /// Video to embed
    #[arg(short = 'm', long)]
    pub input_video: Option<PathBuf>,

    /// Output file (default: <image stem>.LIVE.<ext> next to the image)
    #[arg(short = 'f', long)]
    pub output_file: Option<PathBuf>,

    /// Mux every image/video pair in this directory
    #[arg(short = 'd', long)]
    pub input_directory: Option<PathBuf>,

    /// Directory to write the muxed files to
    #[arg(short = 'O', long)]
    pub output_directory: Option<PathBuf>,

    /// Descend into subdirectories of the input directory
    #[arg(short = 'r', long)]
    pub recursive: bool,

    /// Pair images and videos by their content identifier instead of by name
    #[arg(short = 'e', long)]
    pub exif_match: bool,

    /// Copy files that were not muxed to the output directory
    #[arg(short = 'c', long)]
    pub copy_unmuxed: bool,

    /// Skip pairs whose output already contains the video
    #[arg(short = 'n', long)]
    pub incremental: bool,

    /// Delete the video after muxing
    #[arg(long)]
    pub delete_video: bool,

    /// Keep the temporary XMP sidecar and image copy
    #[arg(short = 'k', long)]
    pub keep_temp: bool,

    /// Replace the input image with the muxed file
    #[arg(short = 'o', long)]
    pub overwrite: bool,

    /// Do not write the Motion Photo XMP directory
    #[arg(long)]
    pub no_xmp: bool,

    /// Number of worker threads in directory mode
    #[arg(short = 'j', long)]
    pub jobs: Option<usize>,

    /// Log debug output
    #[arg(short = 'v', long)]
    pub verbose: bool,

    /// ExifTool executable
    #[arg(long, env = "MOTIONMUX_EXIFTOOL", default_value = "exiftool")]
    pub exiftool: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    Single {
        image: PathBuf,
        video: PathBuf,
        options: MuxOptions,
    },
    Batch(BatchOptions),
}

impl Args {
    pub fn log_level(&self) -> LevelFilter {
        if self.verbose {
            LevelFilter::DEBUG
        } else {
            LevelFilter::INFO
        }
    }

    fn mux_options(&self) -> MuxOptions {
        MuxOptions {
            output_file: self.output_file.clone(),
            output_directory: self.output_directory.clone(),
            overwrite: self.overwrite,
            delete_video: self.delete_video,
            keep_temp: self.keep_temp,
            no_xmp: self.no_xmp,
        }
    }

    /// Check option combinations and pick the mode. Touches no files.
    pub fn mode(&self) -> MuxResult<Mode> {
        if let Some(input_directory) = &self.input_directory {
            if self.input_image.is_some() || self.input_video.is_some() {
                return Err(MuxError::ConflictingOptions(
                    "--input-directory cannot be combined with --input-image or --input-video",
                ));
            }
            let options = BatchOptions {
                input_directory: input_directory.clone(),
                output_directory: self.output_directory.clone(),
                recursive: self.recursive,
                exif_match: self.exif_match,
                copy_unmuxed: self.copy_unmuxed,
                incremental: self.incremental,
                jobs: self.jobs,
                mux: MuxOptions {
                    output_directory: None,
                    ..self.mux_options()
                },
            };
            options.validate()?;
            return Ok(Mode::Batch(options));
        }

        let (image, video) = match (&self.input_image, &self.input_video) {
            (Some(image), Some(video)) => (image.clone(), video.clone()),
            _ => {
                return Err(MuxError::MissingOption(
                    "--input-image and --input-video are both required without --input-directory",
                ))
            }
        };
        if self.copy_unmuxed || self.incremental {
            return Err(MuxError::ConflictingOptions(
                "--copy-unmuxed and --incremental need --input-directory",
            ));
        }
        let options = self.mux_options();
        options.validate()?;
        Ok(Mode::Single {
            image,
            video,
            options,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Args {
        Args::try_parse_from(std::iter::once("motionmux").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn single_mode() {
        let args = parse(&["-i", "IMG.HEIC", "-m", "IMG.MOV", "-k", "--no-xmp"]);
        assert_eq!(args.exiftool, PathBuf::from("exiftool"));
        match args.mode().unwrap() {
            Mode::Single {
                image,
                video,
                options,
            } => {
                assert_eq!(image, PathBuf::from("IMG.HEIC"));
                assert_eq!(video, PathBuf::from("IMG.MOV"));
                assert!(options.keep_temp && options.no_xmp);
                assert!(!options.overwrite);
            }
            other => panic!("unexpected mode {:?}", other),
        }
    }

    #[test]
    fn batch_mode() {
        let args = parse(&["-d", "in", "-O", "out", "-r", "-c", "-n", "-e", "-j", "3"]);
        match args.mode().unwrap() {
            Mode::Batch(options) => {
                assert_eq!(options.input_directory, PathBuf::from("in"));
                assert_eq!(options.output_directory, Some(PathBuf::from("out")));
                assert!(options.recursive && options.copy_unmuxed);
                assert!(options.incremental && options.exif_match);
                assert_eq!(options.workers(), 3);
                assert_eq!(options.mux.output_directory, None);
            }
            other => panic!("unexpected mode {:?}", other),
        }
    }

    #[test]
    fn single_mode_needs_both_inputs() {
        let args = parse(&["-i", "IMG.HEIC"]);
        assert!(matches!(args.mode(), Err(MuxError::MissingOption(_))));
    }

    #[test]
    fn directory_excludes_single_inputs() {
        let args = parse(&["-d", "in", "-i", "IMG.HEIC"]);
        assert!(matches!(args.mode(), Err(MuxError::ConflictingOptions(_))));
    }

    #[test]
    fn output_file_excludes_overwrite() {
        let args = parse(&["-i", "a.jpg", "-m", "a.mp4", "-f", "b.jpg", "-o"]);
        assert!(matches!(args.mode(), Err(MuxError::ConflictingOptions(_))));
    }

    #[test]
    fn verbose_enables_debug() {
        assert_eq!(parse(&["-v"]).log_level(), LevelFilter::DEBUG);
        assert_eq!(parse(&[]).log_level(), LevelFilter::INFO);
    }
}
