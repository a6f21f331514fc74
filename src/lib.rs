//! Fuse a still image and a short video into a Google/Samsung Motion Photo.

pub mod batch;
pub mod catalog;
pub mod cli;
pub mod directory;
pub mod error;
pub mod exiftool;
pub mod extract;
pub mod keyframe;
pub mod media;
pub mod muxer;
pub mod paths;
pub mod tool;
pub mod trailer;

pub use error::{MuxError, MuxResult};
pub use muxer::{MuxOptions, MuxReport, Muxer};
