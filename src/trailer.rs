//! Samsung motion-photo trailer.
//!
//! The trailer is appended after the carrier image. It consists of the tag
//! records (`id ++ LE32(nameLen) ++ name ++ payload`) followed by the `SEFH`
//! index that lets readers find them from the end of the file. HEIC carriers
//! additionally wrap the video and the tag table in `mpvd`/`sefd` boxes,
//! because everything after the last top-level box must itself be a box.
//!
//! Building a trailer is two-phase. A [`Provisional`] trailer carries a
//! length-correct placeholder for `MotionPhoto_Data`, which is enough to
//! compute the padding/length fields that end up in the XMP directory. Once
//! the carrier image is final its size is passed to
//! [`SamsungTrailer::finalize`], which consumes the provisional trailer and
//! yields the only phase that can [`emit`](SamsungTrailer::emit) bytes.

use byteorder::{BigEndian, ByteOrder, LittleEndian};

use crate::catalog::{SamsungTag, CATALOG_LEN};
use crate::error::{MuxError, MuxResult};
use crate::media::ImageType;

pub const SEFH_MAGIC: &[u8; 4] = b"SEFH";
pub const SEFT_MAGIC: &[u8; 4] = b"SEFT";
pub const SEFH_VERSION: u32 = 107;

pub const MPVD_BOX: &[u8; 4] = b"mpvd";
pub const SEFD_BOX: &[u8; 4] = b"sefd";
/// Plain box header: BE32 size + fourcc.
pub const BOX_HEADER_LEN: usize = 8;

pub const VERSION_MARKER: &[u8; 4] = b"mpv3";
const DATA_MARKER: &[u8; 4] = b"mpv2";
const DATA_PLACEHOLDER: &[u8; 12] = b"mpv2___.___.";

/// Trailer still waiting for the final carrier size.
#[derive(Debug)]
pub struct Provisional;

/// Trailer whose offsets point into a carrier of known size.
#[derive(Debug)]
pub struct Finalized {
    image_size: u64,
}

#[derive(Debug, Clone)]
enum Slot {
    Bytes(Vec<u8>),
    /// The trailer's own video bytes, stored once.
    Video,
}

#[derive(Debug)]
pub struct SamsungTrailer<S = Provisional> {
    video: Vec<u8>,
    image_type: ImageType,
    slots: [Option<Slot>; CATALOG_LEN],
    state: S,
}

impl<S> SamsungTrailer<S> {
    pub fn image_type(&self) -> ImageType {
        self.image_type
    }

    pub fn video(&self) -> &[u8] {
        &self.video
    }

    pub fn is_active(&self, tag: SamsungTag) -> bool {
        self.slots[tag.index()].is_some()
    }

    pub fn payload(&self, tag: SamsungTag) -> Option<&[u8]> {
        self.slots[tag.index()].as_ref().map(|slot| match slot {
            Slot::Bytes(bytes) => bytes.as_slice(),
            Slot::Video => self.video.as_slice(),
        })
    }

    /// Active tags and their payloads, in catalog order.
    pub fn active(&self) -> impl Iterator<Item = (SamsungTag, &[u8])> + '_ {
        SamsungTag::ALL
            .iter()
            .filter_map(move |&tag| self.payload(tag).map(|payload| (tag, payload)))
    }

    pub fn active_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    /// Bytes from the end of the carrier image to the first byte of the
    /// `MotionPhoto_Data` payload, counted within the tag records.
    pub fn image_padding(&self) -> u64 {
        let mut size = 0;
        for (tag, payload) in self.active() {
            size += tag.header_len();
            if tag == SamsungTag::MotionPhotoData {
                return size as u64;
            }
            size += payload.len();
        }
        // MotionPhoto_Data is set in `new` and can never be cleared.
        unreachable!("MotionPhoto_Data missing from trailer")
    }

    /// Length of the tag records.
    pub fn tag_data_len(&self) -> usize {
        self.active()
            .map(|(tag, payload)| tag.header_len() + payload.len())
            .sum()
    }

    /// Length of the SEFH index including its trailing length word and `SEFT`.
    pub fn index_len(&self) -> usize {
        12 + 12 * self.active_count() + 8
    }

    /// Total trailer length. Independent of the phase, since the placeholder
    /// has the same length as the final `MotionPhoto_Data` payload.
    pub fn len(&self) -> usize {
        let tags = self.tag_data_len() + self.index_len();
        match self.image_type {
            ImageType::Heic => BOX_HEADER_LEN + self.video.len() + BOX_HEADER_LEN + tags,
            ImageType::Jpg => tags,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Value for the `MotionPhoto` item's `Length` in the XMP directory.
    pub fn video_size_for_directory(&self) -> u64 {
        self.len() as u64 - self.image_padding()
    }
}

impl SamsungTrailer<Provisional> {
    pub fn new(video: Vec<u8>, image_type: ImageType) -> Self {
        let mut slots: [Option<Slot>; CATALOG_LEN] = Default::default();
        slots[SamsungTag::MotionPhotoVersion.index()] =
            Some(Slot::Bytes(VERSION_MARKER.to_vec()));
        slots[SamsungTag::MotionPhotoData.index()] = Some(match image_type {
            ImageType::Heic => Slot::Bytes(DATA_PLACEHOLDER.to_vec()),
            ImageType::Jpg => Slot::Video,
        });
        Self {
            video,
            image_type,
            slots,
            state: Provisional,
        }
    }

    /// Activate a catalog tag with the given payload.
    pub fn set_tag(&mut self, tag: SamsungTag, payload: Vec<u8>) -> MuxResult<()> {
        if tag == SamsungTag::MotionPhotoData {
            return Err(MuxError::ReservedTag(tag.name()));
        }
        self.slots[tag.index()] = Some(Slot::Bytes(payload));
        Ok(())
    }

    pub fn clear_tag(&mut self, tag: SamsungTag) -> MuxResult<()> {
        if tag == SamsungTag::MotionPhotoData {
            return Err(MuxError::ReservedTag(tag.name()));
        }
        self.slots[tag.index()] = None;
        Ok(())
    }

    /// Fix the carrier size. For HEIC this rewrites `MotionPhoto_Data` with
    /// the absolute offset and size of the video inside the `mpvd` box.
    pub fn finalize(mut self, image_size: u64) -> MuxResult<SamsungTrailer<Finalized>> {
        let total = image_size + self.len() as u64;
        if self.len() as u64 > u64::from(u32::MAX) {
            return Err(MuxError::TrailerTooLarge(self.len() as u64));
        }

        if self.image_type == ImageType::Heic {
            let video_offset = image_size + BOX_HEADER_LEN as u64;
            let video_offset = u32::try_from(video_offset)
                .map_err(|_| MuxError::TrailerTooLarge(total))?;
            let video_size = u32::try_from(self.video.len())
                .map_err(|_| MuxError::TrailerTooLarge(self.video.len() as u64))?;

            let mut data = Vec::with_capacity(DATA_PLACEHOLDER.len());
            data.extend_from_slice(DATA_MARKER);
            push_be32(&mut data, video_offset);
            push_be32(&mut data, video_size);
            self.slots[SamsungTag::MotionPhotoData.index()] = Some(Slot::Bytes(data));
        }

        Ok(SamsungTrailer {
            video: self.video,
            image_type: self.image_type,
            slots: self.slots,
            state: Finalized { image_size },
        })
    }
}

impl SamsungTrailer<Finalized> {
    pub fn image_size(&self) -> u64 {
        self.state.image_size
    }

    /// Absolute offset of the video in the output file (HEIC only).
    pub fn video_offset(&self) -> Option<u64> {
        match self.image_type {
            ImageType::Heic => Some(self.state.image_size + BOX_HEADER_LEN as u64),
            ImageType::Jpg => None,
        }
    }

    /// Serialize the trailer.
    pub fn emit(&self) -> Vec<u8> {
        let mut tag_data = Vec::with_capacity(self.tag_data_len());
        let mut lengths = Vec::with_capacity(self.active_count());
        for (tag, payload) in self.active() {
            let start = tag_data.len();
            tag_data.extend_from_slice(&tag.id());
            push_le32(&mut tag_data, tag.name().len() as u32);
            tag_data.extend_from_slice(tag.name().as_bytes());
            tag_data.extend_from_slice(payload);
            lengths.push((tag, tag_data.len() - start));
        }

        let mut index = Vec::with_capacity(self.index_len());
        index.extend_from_slice(SEFH_MAGIC);
        push_le32(&mut index, SEFH_VERSION);
        push_le32(&mut index, lengths.len() as u32);
        // Offsets count back from the start of the index to the start of each tag.
        let mut remaining = tag_data.len();
        for (tag, len) in &lengths {
            index.extend_from_slice(&tag.id());
            push_le32(&mut index, remaining as u32);
            push_le32(&mut index, *len as u32);
            remaining -= len;
        }
        let index_len = index.len() as u32;
        push_le32(&mut index, index_len);
        index.extend_from_slice(SEFT_MAGIC);

        let mut out = Vec::with_capacity(self.len());
        match self.image_type {
            ImageType::Heic => {
                let inner = BOX_HEADER_LEN + tag_data.len() + index.len();
                let outer = BOX_HEADER_LEN + self.video.len() + inner;
                push_be32(&mut out, outer as u32);
                out.extend_from_slice(MPVD_BOX);
                out.extend_from_slice(&self.video);
                push_be32(&mut out, inner as u32);
                out.extend_from_slice(SEFD_BOX);
            }
            ImageType::Jpg => {}
        }
        out.extend_from_slice(&tag_data);
        out.extend_from_slice(&index);
        out
    }
}

fn push_le32(out: &mut Vec<u8>, value: u32) {
    let mut word = [0; 4];
    LittleEndian::write_u32(&mut word, value);
    out.extend_from_slice(&word);
}

fn push_be32(out: &mut Vec<u8>, value: u32) {
    let mut word = [0; 4];
    BigEndian::write_u32(&mut word, value);
    out.extend_from_slice(&word);
}

fn le32_at(bytes: &[u8], pos: usize) -> Option<u32> {
    bytes.get(pos..pos.checked_add(4)?).map(LittleEndian::read_u32)
}

/// One tag record located through the SEFH index of an existing file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrailerRecord<'a> {
    pub id: [u8; 4],
    /// `None` for identifiers outside the catalog.
    pub tag: Option<SamsungTag>,
    pub name: &'a [u8],
    pub payload: &'a [u8],
    /// Absolute offset of the record in the scanned buffer.
    pub start: usize,
}

/// Read the SEFH index at the end of `bytes` and resolve every record it
/// lists. Returns `None` when the buffer does not end in a well-formed index.
pub fn decode(bytes: &[u8]) -> Option<Vec<TrailerRecord<'_>>> {
    if bytes.len() < 8 || &bytes[bytes.len() - 4..] != SEFT_MAGIC {
        return None;
    }
    let index_len = le32_at(bytes, bytes.len() - 8)? as usize;
    let index_start = bytes.len().checked_sub(8 + index_len)?;
    if bytes.get(index_start..index_start + 4)? != SEFH_MAGIC {
        return None;
    }
    let count = le32_at(bytes, index_start + 8)? as usize;
    if 12 + 12 * count > index_len {
        return None;
    }

    let mut records = Vec::with_capacity(count);
    for i in 0..count {
        let entry = index_start + 12 + 12 * i;
        let id: [u8; 4] = bytes.get(entry..entry + 4)?.try_into().ok()?;
        let offset = le32_at(bytes, entry + 4)? as usize;
        let len = le32_at(bytes, entry + 8)? as usize;

        let start = index_start.checked_sub(offset)?;
        let end = start.checked_add(len)?;
        if bytes.get(start..start + 4)? != id {
            return None;
        }
        let name_len = le32_at(bytes, start + 4)? as usize;
        let name_end = start + 8 + name_len;
        if name_end > end || end > index_start {
            return None;
        }
        records.push(TrailerRecord {
            id,
            tag: SamsungTag::from_id(id),
            name: &bytes[start + 8..name_end],
            payload: &bytes[name_end..end],
            start,
        });
    }
    Some(records)
}

/// Decode a finalized HEIC `MotionPhoto_Data` payload into
/// `(video_offset, video_size)`.
pub fn decode_heic_pointer(payload: &[u8]) -> Option<(u64, u64)> {
    if payload.len() != 12 || &payload[..4] != DATA_MARKER {
        return None;
    }
    let offset = BigEndian::read_u32(&payload[4..8]);
    let size = BigEndian::read_u32(&payload[8..12]);
    Some((u64::from(offset), u64::from(size)))
}
