use std::collections::HashMap;
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::debug;

use crate::error::{MuxError, MuxResult};
use crate::tool::{Metadata, MetadataTool};

#[derive(Debug, Clone)]
pub struct ExifTool {
    program: PathBuf,
}

impl Default for ExifTool {
    fn default() -> Self {
        Self::new("exiftool")
    }
}

impl ExifTool {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Check that the program can be run at all.
    pub fn available(&self) -> bool {
        Command::new(&self.program)
            .arg("-ver")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    fn run<I, S>(&self, args: I) -> MuxResult<std::process::Output>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let args: Vec<OsString> = args.into_iter().map(|a| a.as_ref().to_owned()).collect();
        debug!("exiftool {:?}", args);
        Command::new(&self.program)
            .args(&args)
            .output()
            .map_err(|e| MuxError::Tool(format!("failed to run {}: {}", self.program.display(), e)))
    }

    /// Run and require a successful exit.
    fn execute<I, S>(&self, args: I) -> MuxResult<Vec<u8>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let output = self.run(args)?;
        if !output.status.success() {
            return Err(MuxError::Tool(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        Ok(output.stdout)
    }

    /// Run a binary extraction. ExifTool exits non-zero when nothing matched,
    /// which is reported as an empty result.
    fn extract<I, S>(&self, args: I) -> MuxResult<Vec<u8>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let output = self.run(args)?;
        if !output.status.success() {
            debug!(
                "exiftool extraction found nothing: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            );
            return Ok(Vec::new());
        }
        Ok(output.stdout)
    }
}

/// Parse `exiftool -j -G -n` output, aligned with `paths` by `SourceFile`.
pub fn parse_json_metadata(json: &[u8], paths: &[&Path]) -> MuxResult<Vec<Metadata>> {
    let parsed: Vec<HashMap<String, serde_json::Value>> = serde_json::from_slice(json)
        .map_err(|e| MuxError::Tool(format!("JSON parse error: {}", e)))?;

    let mut entries: Vec<Metadata> = parsed
        .into_iter()
        .map(|tags| {
            Metadata::new(
                tags.into_iter()
                    .map(|(k, v)| {
                        let value = match v {
                            serde_json::Value::String(s) => s,
                            other => other.to_string(),
                        };
                        (k, value)
                    })
                    .collect(),
            )
        })
        .collect();

    let mut ordered = Vec::with_capacity(paths.len());
    for path in paths {
        let source = path.to_string_lossy();
        let found = entries
            .iter()
            .position(|m| m.get("SourceFile") == Some(source.as_ref()));
        let metadata = match found {
            Some(i) => entries.remove(i),
            // exiftool reports files in argument order
            None if !entries.is_empty() => entries.remove(0),
            None => Metadata::default(),
        };
        ordered.push(metadata);
    }
    Ok(ordered)
}

impl MetadataTool for ExifTool {
    fn metadata(&self, paths: &[&Path]) -> MuxResult<Vec<Metadata>> {
        let mut args: Vec<&OsStr> = vec!["-j".as_ref(), "-G".as_ref(), "-n".as_ref()];
        args.extend(paths.iter().map(|p| p.as_os_str()));
        // a non-zero exit can still carry JSON for the readable files
        let output = self.run(args)?;
        match parse_json_metadata(&output.stdout, paths) {
            Ok(metadata) => {
                if !output.status.success() {
                    debug!(
                        "exiftool reported errors: {}",
                        String::from_utf8_lossy(&output.stderr).trim()
                    );
                }
                Ok(metadata)
            }
            Err(_) if !output.status.success() => Err(MuxError::Tool(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            )),
            Err(e) => Err(e),
        }
    }

    fn timing_report(&self, video: &Path) -> MuxResult<String> {
        let args: [&OsStr; 6] = [
            "-X".as_ref(),
            "-ee".as_ref(),
            "-n".as_ref(),
            "-QuickTime:StillImageTime".as_ref(),
            "-QuickTime:TrackDuration".as_ref(),
            video.as_os_str(),
        ];
        let report = self.execute(args)?;
        Ok(String::from_utf8_lossy(&report).into_owned())
    }

    fn embedded_video(&self, image: &Path) -> MuxResult<Vec<u8>> {
        // GCamera motion photos first, then the Samsung trailer
        let video = self.extract([
            OsStr::new("-b"),
            OsStr::new("-MotionPhotoVideo"),
            image.as_os_str(),
        ])?;
        if !video.is_empty() {
            return Ok(video);
        }
        self.extract([
            OsStr::new("-b"),
            OsStr::new("-EmbeddedVideoFile"),
            image.as_os_str(),
        ])
    }

    fn inject_xmp(&self, sidecar: &Path, target: &Path) -> MuxResult<()> {
        self.execute([
            OsStr::new("-overwrite_original"),
            OsStr::new("-tagsfromfile"),
            sidecar.as_os_str(),
            OsStr::new("-xmp"),
            target.as_os_str(),
        ])?;
        Ok(())
    }

    fn raw_xmp(&self, image: &Path) -> MuxResult<Vec<u8>> {
        self.extract([OsStr::new("-XMP"), OsStr::new("-b"), image.as_os_str()])
    }
}
