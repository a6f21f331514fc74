use std::collections::{HashMap, HashSet, VecDeque};
use std::fs;
use std::io;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::thread;

use itertools::Itertools;
use ring::digest::{digest, Digest, SHA256};
use tokio::sync::mpsc::unbounded_channel;
use tracing::{debug, error, info, warn};

use crate::error::{MuxError, MuxResult};
use crate::extract::{contains_video, find_embedded_video, is_motion_photo};
use crate::media::{extension_of, IMAGE_EXTENSIONS, VIDEO_EXTENSIONS};
use crate::muxer::{MuxOptions, MuxReport, Muxer};
use crate::paths;
use crate::tool::MetadataTool;

/// Extensions tried, in order, when pairing a video by file name.
const PAIRED_VIDEO_EXTENSIONS: [&str; 4] = ["mp4", "mov", "MP4", "MOV"];

/// Files per metadata query when pairing by content identifier.
const METADATA_CHUNK: usize = 64;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOptions {
    pub input_directory: PathBuf,
    pub output_directory: Option<PathBuf>,
    pub recursive: bool,
    pub exif_match: bool,
    pub copy_unmuxed: bool,
    pub incremental: bool,
    /// Worker count; defaults to the available parallelism.
    pub jobs: Option<usize>,
    /// Applied to every pair. The output directory is filled in per pair.
    pub mux: MuxOptions,
}

impl BatchOptions {
    pub fn validate(&self) -> MuxResult<()> {
        if self.mux.output_file.is_some() {
            return Err(MuxError::ConflictingOptions(
                "--output-file cannot be combined with --input-directory",
            ));
        }
        if (self.copy_unmuxed || self.incremental) && self.output_directory.is_none() {
            return Err(MuxError::MissingOption(
                "--output-directory is required by --copy-unmuxed and --incremental",
            ));
        }
        if self.output_directory.is_some() && self.mux.overwrite {
            return Err(MuxError::ConflictingOptions(
                "--output-directory cannot be combined with --overwrite",
            ));
        }
        if self.copy_unmuxed && (self.mux.overwrite || self.mux.delete_video) {
            return Err(MuxError::ConflictingOptions(
                "--copy-unmuxed cannot be combined with --overwrite or --delete-video",
            ));
        }
        self.mux.validate()
    }

    pub fn workers(&self) -> usize {
        self.jobs
            .unwrap_or_else(|| {
                thread::available_parallelism()
                    .map(NonZeroUsize::get)
                    .unwrap_or(1)
            })
            .max(1)
    }

    fn prepare(&self) -> MuxResult<()> {
        if !self.input_directory.is_dir() {
            return Err(MuxError::MissingInput {
                kind: "Input directory",
                path: self.input_directory.clone(),
            });
        }
        let output = match &self.output_directory {
            Some(output) => output,
            None => return Ok(()),
        };
        if output.is_file() {
            return Err(MuxError::OutputDirectoryIsFile(output.clone()));
        }
        if !output.exists() {
            fs::create_dir_all(output)?;
            info!("Created output directory {}", output.display());
        }
        if self.copy_unmuxed
            && fs::canonicalize(output)? == fs::canonicalize(&self.input_directory)?
        {
            return Err(MuxError::ConflictingOptions(
                "--copy-unmuxed needs an output directory different from the input directory",
            ));
        }
        Ok(())
    }

    /// Options for one pair, mirroring the input structure in the output.
    fn job(&self, pair: Pair) -> MuxResult<Job> {
        let mut options = self.mux.clone();
        if let Some(output) = &self.output_directory {
            let directory = match pair
                .image
                .strip_prefix(&self.input_directory)
                .ok()
                .and_then(Path::parent)
            {
                Some(relative) if !relative.as_os_str().is_empty() => output.join(relative),
                _ => output.clone(),
            };
            fs::create_dir_all(&directory)?;
            options.output_directory = Some(directory);
        }
        Ok(Job {
            pair,
            options,
            incremental: self.incremental,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileClass {
    Image,
    Video,
    Other,
}

impl FileClass {
    pub fn of(path: &Path) -> Self {
        let extension = extension_of(path);
        if IMAGE_EXTENSIONS.contains(&extension.as_str()) {
            FileClass::Image
        } else if VIDEO_EXTENSIONS.contains(&extension.as_str()) {
            FileClass::Video
        } else {
            FileClass::Other
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Discovery {
    pub images: Vec<PathBuf>,
    pub videos: Vec<PathBuf>,
    pub other: Vec<PathBuf>,
}

/// Breadth-first walk of `root`, sorted and grouped by file class.
pub fn discover(root: &Path, recursive: bool) -> Discovery {
    let mut deque = VecDeque::from([(root.to_path_buf(), 0usize)]);
    let mut visited = HashSet::new();
    let mut files = Vec::new();
    while let Some((path, depth)) = deque.pop_front() {
        let key = fs::canonicalize(&path).unwrap_or_else(|_| path.clone());
        if !visited.insert(key) {
            continue;
        }
        if path.is_file() {
            files.push(path);
        } else if path.is_dir() && (depth == 0 || recursive) {
            match path.read_dir() {
                Ok(entries) => {
                    for entry in entries.flatten() {
                        deque.push_back((entry.path(), depth + 1));
                    }
                }
                Err(e) => warn!("Could not read {}: {}", path.display(), e),
            }
        }
    }

    let mut groups = files
        .into_iter()
        .sorted()
        .into_group_map_by(|path| FileClass::of(path));
    Discovery {
        images: groups.remove(&FileClass::Image).unwrap_or_default(),
        videos: groups.remove(&FileClass::Video).unwrap_or_default(),
        other: groups.remove(&FileClass::Other).unwrap_or_default(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pair {
    pub image: PathBuf,
    pub video: PathBuf,
    /// Apple content identifier shared by both files, when paired by it.
    pub content_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Pairing {
    pub pairs: Vec<Pair>,
    pub unmatched_images: Vec<PathBuf>,
    pub unpaired_videos: Vec<PathBuf>,
}

/// Pair `dir/stem.ext` with `dir/stem.{mp4,mov,MP4,MOV}`.
pub fn pair_by_name(images: &[PathBuf], videos: &[PathBuf]) -> Pairing {
    let mut available: HashSet<PathBuf> = videos.iter().cloned().collect();
    let mut pairing = Pairing::default();
    for image in images {
        let video = PAIRED_VIDEO_EXTENSIONS
            .iter()
            .map(|ext| image.with_extension(ext))
            .find(|candidate| available.contains(candidate));
        match video {
            Some(video) => {
                available.remove(&video);
                pairing.pairs.push(Pair {
                    image: image.clone(),
                    video,
                    content_id: None,
                });
            }
            None => pairing.unmatched_images.push(image.clone()),
        }
    }
    pairing.unpaired_videos = videos
        .iter()
        .filter(|video| available.contains(*video))
        .cloned()
        .collect();
    pairing
}

fn content_identifier<T: MetadataTool>(tool: &T, path: &Path) -> Option<String> {
    match tool.metadata(&[path]) {
        Ok(metadata) => metadata
            .first()
            .and_then(|m| m.content_identifier())
            .map(str::to_string),
        Err(e) => {
            warn!("Could not read metadata of {}: {}", path.display(), e);
            None
        }
    }
}

/// Content identifiers of `paths`, queried in chunks. A failed chunk is
/// retried one file at a time so a single unreadable file only loses its own
/// identifier.
fn content_identifiers<T: MetadataTool>(tool: &T, paths: &[PathBuf]) -> Vec<Option<String>> {
    let mut ids = Vec::with_capacity(paths.len());
    for chunk in &paths.iter().chunks(METADATA_CHUNK) {
        let chunk: Vec<&Path> = chunk.map(PathBuf::as_path).collect();
        match tool.metadata(&chunk) {
            Ok(metadata) => ids.extend((0..chunk.len()).map(|i| {
                metadata
                    .get(i)
                    .and_then(|m| m.content_identifier())
                    .map(str::to_string)
            })),
            Err(e) => {
                debug!("Metadata query for {} files failed, retrying one by one: {}", chunk.len(), e);
                ids.extend(chunk.iter().map(|path| content_identifier(tool, path)));
            }
        }
    }
    ids
}

/// Pair images and videos that carry the same Apple content identifier.
pub fn pair_by_metadata<T: MetadataTool>(
    tool: &T,
    images: &[PathBuf],
    videos: &[PathBuf],
) -> Pairing {
    let mut by_id: HashMap<String, PathBuf> = HashMap::new();
    for (video, id) in videos.iter().zip(content_identifiers(tool, videos)) {
        if let Some(id) = id {
            by_id.entry(id).or_insert_with(|| video.clone());
        }
    }

    let mut pairing = Pairing::default();
    let mut paired = HashSet::new();
    for (image, id) in images.iter().zip(content_identifiers(tool, images)) {
        let video = id.as_deref().and_then(|id| by_id.remove(id));
        match video {
            Some(video) => {
                debug!("{} pairs with {} by content identifier", image.display(), video.display());
                paired.insert(video.clone());
                pairing.pairs.push(Pair {
                    image: image.clone(),
                    video,
                    content_id: id,
                });
            }
            None => pairing.unmatched_images.push(image.clone()),
        }
    }
    pairing.unpaired_videos = videos
        .iter()
        .filter(|video| !paired.contains(*video))
        .cloned()
        .collect();
    pairing
}

#[derive(Debug, Clone)]
pub enum Update {
    Progress {
        path: PathBuf,
        done: u32,
        total: u32,
    },
    Muxed(MuxReport),
    Skipped(PathBuf),
    AlreadyMotionPhoto(Pair),
    Error {
        path: PathBuf,
        message: String,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub muxed: usize,
    pub skipped: usize,
    pub copied: usize,
    pub failures: Vec<(PathBuf, String)>,
}

impl BatchSummary {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

#[derive(Debug, Clone)]
struct Job {
    pair: Pair,
    options: MuxOptions,
    incremental: bool,
}

/// Whether `output` already holds the muxed result of `pair`.
fn already_muxed<T: MetadataTool>(tool: &T, output: &Path, pair: &Pair) -> bool {
    if !output.is_file() {
        return false;
    }
    let bytes = match fs::read(output) {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!("Could not read {}: {}", output.display(), e);
            return false;
        }
    };
    if let Some(id) = &pair.content_id {
        let embedded = match tool.embedded_video(output) {
            Ok(video) if !video.is_empty() => video,
            _ => find_embedded_video(&bytes)
                .map(<[u8]>::to_vec)
                .unwrap_or_default(),
        };
        if contains_video(&embedded, id.as_bytes()) {
            return true;
        }
    }
    match fs::read(&pair.video) {
        Ok(video) => contains_video(&bytes, &video),
        Err(_) => false,
    }
}

fn run_job<T: MetadataTool>(tool: &T, job: Job) -> Update {
    let Job {
        pair,
        options,
        incremental,
    } = job;

    if is_motion_photo(tool, &pair.image) {
        info!("{} is already a motion photo, skipping", pair.image.display());
        return Update::AlreadyMotionPhoto(pair);
    }
    if incremental {
        let output = paths::resolve_output(
            &pair.image,
            options.output_file.as_deref(),
            options.output_directory.as_deref(),
            options.overwrite,
        );
        if already_muxed(tool, &output, &pair) {
            info!("{} was muxed before, skipping", pair.image.display());
            return Update::Skipped(pair.image);
        }
    }

    let mut muxer = match Muxer::new(&pair.image, &pair.video, tool, options) {
        Ok(muxer) => muxer,
        Err(e) => {
            return Update::Error {
                path: pair.image,
                message: e.to_string(),
            }
        }
    };
    match muxer.mux() {
        Ok(report) => Update::Muxed(report),
        Err(e) => Update::Error {
            path: pair.image,
            message: format!("{} (while {})", e, muxer.stage()),
        },
    }
}

/// Run `jobs` on a pool of `workers` threads. Every worker builds its own
/// tool; updates are handled on the calling thread as they arrive.
fn run_pool<T, F>(jobs: Vec<Job>, workers: usize, make_tool: &F, mut on_update: impl FnMut(Update))
where
    T: MetadataTool,
    F: Fn() -> T + Sync,
{
    if jobs.is_empty() {
        return;
    }
    let total = jobs.len() as u32;
    let workers = workers.clamp(1, jobs.len());
    let queue = Mutex::new(VecDeque::from(jobs));
    let done = AtomicU32::new(0);
    let (sender, mut receiver) = unbounded_channel();

    thread::scope(|scope| {
        for _ in 0..workers {
            let sender = sender.clone();
            let queue = &queue;
            let done = &done;
            scope.spawn(move || {
                let tool = make_tool();
                loop {
                    let job = match queue.lock() {
                        Ok(mut queue) => queue.pop_front(),
                        Err(_) => None,
                    };
                    let job = match job {
                        Some(job) => job,
                        None => break,
                    };
                    let path = job.pair.image.clone();
                    let update = run_job(&tool, job);
                    let finished = done.fetch_add(1, Ordering::SeqCst) + 1;
                    let progress = Update::Progress {
                        path,
                        done: finished,
                        total,
                    };
                    if sender.send(update).is_err() || sender.send(progress).is_err() {
                        break;
                    }
                }
            });
        }
        drop(sender);

        while let Some(update) = receiver.blocking_recv() {
            on_update(update);
        }
    });
}

fn file_digest(path: &Path) -> io::Result<Digest> {
    Ok(digest(&SHA256, &fs::read(path)?))
}

/// Copy `source` to `target` unless an identical file is already there.
fn copy_if_changed(source: &Path, target: &Path) -> io::Result<bool> {
    if target.is_file() && file_digest(source)?.as_ref() == file_digest(target)?.as_ref() {
        return Ok(false);
    }
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::copy(source, target)?;
    Ok(true)
}

fn copy_unmuxed(files: &[PathBuf], input: &Path, output: &Path, summary: &mut BatchSummary) {
    for file in files.iter().unique() {
        let relative = match file.strip_prefix(input) {
            Ok(relative) => relative,
            Err(_) => continue,
        };
        let target = output.join(relative);
        match copy_if_changed(file, &target) {
            Ok(true) => {
                debug!("Copied {} to {}", file.display(), target.display());
                summary.copied += 1;
            }
            Ok(false) => debug!("{} is already present", target.display()),
            Err(e) => {
                error!("Could not copy {}: {}", file.display(), e);
                summary.failures.push((file.clone(), e.to_string()));
            }
        }
    }
}

/// Mux every pair found under the input directory.
pub fn run<T, F>(options: &BatchOptions, make_tool: F) -> MuxResult<BatchSummary>
where
    T: MetadataTool,
    F: Fn() -> T + Sync,
{
    options.validate()?;
    options.prepare()?;

    let discovery = discover(&options.input_directory, options.recursive);
    info!(
        "Found {} images, {} videos and {} other files",
        discovery.images.len(),
        discovery.videos.len(),
        discovery.other.len()
    );

    let pairing = if options.exif_match {
        pair_by_metadata(&make_tool(), &discovery.images, &discovery.videos)
    } else {
        pair_by_name(&discovery.images, &discovery.videos)
    };
    info!("Muxing {} pairs", pairing.pairs.len());

    let mut summary = BatchSummary::default();
    let mut jobs = Vec::with_capacity(pairing.pairs.len());
    for pair in pairing.pairs {
        let image = pair.image.clone();
        match options.job(pair) {
            Ok(job) => jobs.push(job),
            Err(e) => {
                error!("{}: {}", image.display(), e);
                summary.failures.push((image, e.to_string()));
            }
        }
    }

    let mut leftovers = Vec::new();
    run_pool(jobs, options.workers(), &make_tool, |update| match update {
        Update::Progress { path, done, total } => {
            info!("[{}/{}] {}", done, total, path.display())
        }
        Update::Muxed(report) => {
            debug!("Muxed {} bytes into {}", report.bytes_written, report.output.display());
            summary.muxed += 1;
        }
        Update::Skipped(_) => summary.skipped += 1,
        Update::AlreadyMotionPhoto(pair) => {
            summary.skipped += 1;
            leftovers.push(pair.image);
            leftovers.push(pair.video);
        }
        Update::Error { path, message } => {
            error!("{}: {}", path.display(), message);
            summary.failures.push((path, message));
        }
    });

    if options.copy_unmuxed {
        if let Some(output) = &options.output_directory {
            leftovers.extend(pairing.unmatched_images);
            leftovers.extend(pairing.unpaired_videos);
            leftovers.extend(discovery.other);
            copy_unmuxed(&leftovers, &options.input_directory, output, &mut summary);
        }
    }

    info!(
        "Muxed {}, skipped {}, copied {}, failed {}",
        summary.muxed,
        summary.skipped,
        summary.copied,
        summary.failures.len()
    );
    Ok(summary)
}
