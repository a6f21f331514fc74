use std::fs;
use std::path::Path;

use tracing::{debug, warn};

use crate::catalog::SamsungTag;
use crate::tool::MetadataTool;
use crate::trailer;

/// Box types that open an ISO-BMFF/QuickTime video.
const VIDEO_SIGNATURES: [&[u8]; 5] = [b"ftyp", b"moov", b"mdat", b"wide", b"free"];

/// `ftyp` brands of still images that share the video container format.
const STILL_IMAGE_BRANDS: [&[u8]; 5] = [b"ftypheic", b"ftypheix", b"ftypmif1", b"ftypmsf1", b"ftypavif"];

const SIGNATURE_WINDOW: usize = 16;

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|window| window == needle)
}

pub fn looks_like_video(bytes: &[u8]) -> bool {
    let head = &bytes[..bytes.len().min(SIGNATURE_WINDOW)];
    VIDEO_SIGNATURES.iter().any(|s| find(head, s).is_some())
        && !STILL_IMAGE_BRANDS.iter().any(|b| find(head, b).is_some())
}

/// Locate the video of a Samsung motion photo without the metadata tool.
///
/// The SEFH index is followed when present. Files without a readable index
/// are scanned for the `MotionPhoto_Data` record name instead, and whatever
/// follows it is returned if it starts like a video.
pub fn find_embedded_video(bytes: &[u8]) -> Option<&[u8]> {
    if let Some(records) = trailer::decode(bytes) {
        let data = records
            .iter()
            .find(|record| record.tag == Some(SamsungTag::MotionPhotoData));
        if let Some(record) = data {
            return match trailer::decode_heic_pointer(record.payload) {
                Some((offset, size)) => {
                    let start = usize::try_from(offset).ok()?;
                    let end = start.checked_add(usize::try_from(size).ok()?)?;
                    bytes.get(start..end)
                }
                None => Some(record.payload),
            };
        }
    }

    let name = SamsungTag::MotionPhotoData.name().as_bytes();
    let start = find(bytes, name)? + name.len();
    let rest = &bytes[start..];
    looks_like_video(rest).then_some(rest)
}

/// Whether `image` already carries a motion video.
pub fn is_motion_photo<T: MetadataTool>(tool: &T, image: &Path) -> bool {
    match tool.embedded_video(image) {
        Ok(video) if looks_like_video(&video) => return true,
        Ok(video) if !video.is_empty() => {
            debug!("{}: embedded data is not a video", image.display())
        }
        Ok(_) => {}
        Err(e) => debug!("{}: {}", image.display(), e),
    }
    match fs::read(image) {
        Ok(bytes) => find_embedded_video(&bytes).is_some(),
        Err(e) => {
            warn!("Could not read {}: {}", image.display(), e);
            false
        }
    }
}

/// Whether `output` holds `video` verbatim.
pub fn contains_video(output: &[u8], video: &[u8]) -> bool {
    if video.is_empty() {
        return false;
    }
    find_embedded_video(output) == Some(video) || find(output, video).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::ImageType;
    use crate::trailer::SamsungTrailer;

    fn video(len: usize) -> Vec<u8> {
        let mut bytes = b"\0\0\0\x18ftypmp42".to_vec();
        bytes.extend((0..len).map(|i| (i % 253) as u8));
        bytes
    }

    fn motion_photo(image_type: ImageType, image: &[u8], video: &[u8]) -> Vec<u8> {
        let trailer = SamsungTrailer::new(video.to_vec(), image_type)
            .finalize(image.len() as u64)
            .unwrap();
        let mut out = image.to_vec();
        out.extend_from_slice(&trailer.emit());
        out
    }

    #[test]
    fn video_signatures() {
        assert!(looks_like_video(b"\0\0\0\x18ftypqt  \0\0\0\0"));
        assert!(looks_like_video(b"\0\0\0\x08wide\0\0\0\0mdat"));
        assert!(!looks_like_video(b"\0\0\0\x18ftypheic\0\0\0\0"));
        assert!(!looks_like_video(b"\0\0\0\x18ftypmif1\0\0\0\0"));
        assert!(!looks_like_video(b"\xff\xd8\xff\xe1"));
        assert!(!looks_like_video(b""));
    }

    #[test]
    fn recovers_video_from_jpg_trailer() {
        let video = video(300);
        let file = motion_photo(ImageType::Jpg, &[0xff, 0xd8, 0xff, 0xd9], &video);
        assert_eq!(find_embedded_video(&file), Some(video.as_slice()));
    }

    #[test]
    fn recovers_video_from_heic_trailer() {
        let video = video(2000);
        let file = motion_photo(ImageType::Heic, &[7; 1000], &video);
        assert_eq!(find_embedded_video(&file), Some(video.as_slice()));
        assert!(contains_video(&file, &video));
    }

    #[test]
    fn scans_for_record_name_without_index() {
        let video = video(40);
        let mut file = vec![0xff, 0xd8];
        file.extend_from_slice(b"MotionPhoto_Data");
        file.extend_from_slice(&video);
        assert_eq!(find_embedded_video(&file), Some(video.as_slice()));
    }

    #[test]
    fn plain_image_has_no_video() {
        assert_eq!(find_embedded_video(&[0xff, 0xd8, 0xff, 0xd9]), None);
        assert_eq!(find_embedded_video(b""), None);
        assert!(!contains_video(b"abc", b""));
        assert!(!contains_video(b"abc", b"abcd"));
    }
}
