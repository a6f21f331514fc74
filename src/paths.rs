use std::ffi::OsString;
use std::fs::{self, File, FileTimes};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use ring::digest::{digest, SHA256};
use tracing::{debug, warn};

use crate::media::extension_of;

const LIVE_INFIX: &str = "LIVE";
const XMP_INFIX: &str = "XMP";
const TOKEN_BYTES: usize = 4;

/// Where the muxed file for `image` goes.
pub fn resolve_output(
    image: &Path,
    output_file: Option<&Path>,
    output_directory: Option<&Path>,
    overwrite: bool,
) -> PathBuf {
    if let Some(directory) = output_directory {
        return match image.file_name() {
            Some(name) => directory.join(name),
            None => directory.join(enrich_name(image, LIVE_INFIX)),
        };
    }
    if overwrite {
        return image.to_path_buf();
    }
    match output_file {
        Some(file) => file.to_path_buf(),
        None => image.with_file_name(enrich_name(image, LIVE_INFIX)),
    }
}

/// `<stem>.<infix>.<ext>`, or `<stem>.<infix>` without an extension.
pub fn enrich_name(path: &Path, infix: &str) -> OsString {
    let mut name = path.file_stem().map(OsString::from).unwrap_or_default();
    name.push(".");
    name.push(infix);
    if let Some(ext) = path.extension() {
        name.push(".");
        name.push(ext);
    }
    name
}

/// Replace the extension of `output` with `detected` when they differ.
pub fn fix_output_extension(output: &Path, detected: &str) -> PathBuf {
    if extension_of(output) == detected.to_ascii_lowercase() {
        return output.to_path_buf();
    }
    let fixed = output.with_extension(detected);
    warn!(
        "Output file has an incorrect extension, renaming to {}",
        fixed.display()
    );
    fixed
}

/// Short SHA-256 hex digest of a path, used to keep transient names of
/// concurrent jobs apart.
pub fn path_token(path: &Path) -> String {
    let hash = digest(&SHA256, path.to_string_lossy().as_bytes());
    hash.as_ref()[..TOKEN_BYTES]
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

/// XMP sidecar for `output`: `<name>.<token>.XMP`.
pub fn sidecar_path(output: &Path) -> PathBuf {
    let mut name = output.file_name().map(OsString::from).unwrap_or_default();
    name.push(format!(".{}.{}", path_token(output), XMP_INFIX));
    output.with_file_name(name)
}

/// Copy of the image that receives the XMP: `<stem>.XMP.<token>.<ext>`.
pub fn duplicate_path(output: &Path) -> PathBuf {
    let infix = format!("{}.{}", XMP_INFIX, path_token(output));
    output.with_file_name(enrich_name(output, &infix))
}

/// Hidden file the output is written to before it is renamed into place.
pub fn staging_path(output: &Path) -> PathBuf {
    let mut name = OsString::from(".");
    name.push(output.file_name().unwrap_or_default());
    name.push(format!(".{}.part", path_token(output)));
    output.with_file_name(name)
}

/// Transient files of one mux. They are removed on drop unless kept.
#[derive(Debug, Default)]
pub struct TempArtifacts {
    paths: Vec<PathBuf>,
    keep: bool,
}

impl TempArtifacts {
    pub fn new(keep: bool) -> Self {
        Self {
            paths: Vec::new(),
            keep,
        }
    }

    pub fn track(&mut self, path: PathBuf) -> PathBuf {
        self.paths.push(path.clone());
        path
    }
}

impl Drop for TempArtifacts {
    fn drop(&mut self) {
        if self.keep {
            return;
        }
        for path in &self.paths {
            match fs::remove_file(path) {
                Ok(()) => debug!("Removed {}", path.display()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => warn!("Could not remove {}: {}", path.display(), e),
            }
        }
    }
}

fn copy_stat(template: &Path, file: &File) -> io::Result<()> {
    let metadata = fs::metadata(template)?;
    let times = FileTimes::new()
        .set_accessed(metadata.accessed()?)
        .set_modified(metadata.modified()?);
    file.set_times(times)?;
    file.set_permissions(metadata.permissions())
}

fn commit(staging: &Path, output: &Path, bytes: &[u8], template: &Path) -> io::Result<()> {
    let mut file = File::create(staging)?;
    file.write_all(bytes)?;
    copy_stat(template, &file)?;
    file.sync_all()?;
    drop(file);
    fs::rename(staging, output)
}

/// Write `bytes` to `output` through a staging file, carrying over the
/// permissions and timestamps of `template`. The rename is the only step
/// that touches `output`.
pub fn write_output(output: &Path, bytes: &[u8], template: &Path) -> io::Result<u64> {
    let staging = staging_path(output);
    if let Err(e) = commit(&staging, output, bytes, template) {
        let _ = fs::remove_file(&staging);
        return Err(e);
    }
    Ok(bytes.len() as u64)
}
