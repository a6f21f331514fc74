use std::fmt;

/// Number of catalog entries.
pub const CATALOG_LEN: usize = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SamsungTag {
    ImageUtcData,
    MccData,
    CameraCaptureModeInfo,
    MotionPhotoData,
    MotionPhotoVersion,
    MotionPhotoAutoPlay,
    ColorDisplayP3,
}

impl SamsungTag {
    /// All tags in canonical serialization order.
    pub const ALL: [SamsungTag; CATALOG_LEN] = [
        SamsungTag::ImageUtcData,
        SamsungTag::MccData,
        SamsungTag::CameraCaptureModeInfo,
        SamsungTag::MotionPhotoData,
        SamsungTag::MotionPhotoVersion,
        SamsungTag::MotionPhotoAutoPlay,
        SamsungTag::ColorDisplayP3,
    ];

    /// Human-readable name written after the identifier.
    pub fn name(self) -> &'static str {
        match self {
            SamsungTag::ImageUtcData => "Image_UTC_Data",
            SamsungTag::MccData => "MCC_Data",
            SamsungTag::CameraCaptureModeInfo => "Camera_Capture_Mode_Info",
            SamsungTag::MotionPhotoData => "MotionPhoto_Data",
            SamsungTag::MotionPhotoVersion => "MotionPhoto_Version",
            SamsungTag::MotionPhotoAutoPlay => "MotionPhoto_AutoPlay",
            SamsungTag::ColorDisplayP3 => "Color_Display_P3",
        }
    }

    /// 4-byte binary identifier, as it appears on disk.
    pub fn id(self) -> [u8; 4] {
        match self {
            SamsungTag::ImageUtcData => [0x00, 0x00, 0x01, 0x0a],
            SamsungTag::MccData => [0x00, 0x00, 0xa1, 0x0a],
            SamsungTag::CameraCaptureModeInfo => [0x00, 0x00, 0x61, 0x0c],
            SamsungTag::MotionPhotoData => [0x00, 0x00, 0x30, 0x0a],
            SamsungTag::MotionPhotoVersion => [0x00, 0x00, 0x31, 0x0a],
            SamsungTag::MotionPhotoAutoPlay => [0x00, 0x00, 0x3b, 0x0a],
            SamsungTag::ColorDisplayP3 => [0x00, 0x00, 0xc1, 0x0c],
        }
    }

    /// Position in the catalog.
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_name(name: &str) -> Option<SamsungTag> {
        Self::ALL.iter().copied().find(|tag| tag.name() == name)
    }

    pub fn from_id(id: [u8; 4]) -> Option<SamsungTag> {
        Self::ALL.iter().copied().find(|tag| tag.id() == id)
    }

    /// Size of the record header: identifier, name length and name.
    pub fn header_len(self) -> usize {
        4 + 4 + self.name().len()
    }
}

impl fmt::Display for SamsungTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The catalog as `(name, id)` pairs in canonical order.
pub fn canonical_order() -> [(&'static str, [u8; 4]); CATALOG_LEN] {
    SamsungTag::ALL.map(|tag| (tag.name(), tag.id()))
}
