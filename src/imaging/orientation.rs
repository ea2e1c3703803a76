//! EXIF orientation handling.

use image::DynamicImage;
use std::io::Cursor;
use tracing::debug;

/// Values of the EXIF `Orientation` tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Orientation {
    Normal = 1,
    FlipHorizontal = 2,
    Rotate180 = 3,
    FlipVertical = 4,
    Transpose = 5,
    Rotate90 = 6,
    Transverse = 7,
    Rotate270 = 8,
}

impl Orientation {
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            1 => Some(Self::Normal),
            2 => Some(Self::FlipHorizontal),
            3 => Some(Self::Rotate180),
            4 => Some(Self::FlipVertical),
            5 => Some(Self::Transpose),
            6 => Some(Self::Rotate90),
            7 => Some(Self::Transverse),
            8 => Some(Self::Rotate270),
            _ => None,
        }
    }
}

/// Read the orientation tag from an encoded buffer. `None` when the buffer
/// carries no EXIF block or the tag is missing/out of range.
pub fn read_orientation(data: &[u8]) -> Option<Orientation> {
    let mut cursor = Cursor::new(data);
    let exif = exif::Reader::new().read_from_container(&mut cursor).ok()?;
    let field = exif.get_field(exif::Tag::Orientation, exif::In::PRIMARY)?;
    let value = field.value.get_uint(0)?;
    u16::try_from(value).ok().and_then(Orientation::from_u16)
}

pub fn apply_orientation(img: DynamicImage, orientation: Orientation) -> DynamicImage {
    match orientation {
        Orientation::Normal => img,
        Orientation::FlipHorizontal => img.fliph(),
        Orientation::Rotate180 => img.rotate180(),
        Orientation::FlipVertical => img.flipv(),
        Orientation::Transpose => img.rotate90().fliph(),
        Orientation::Rotate90 => img.rotate90(),
        Orientation::Transverse => img.rotate270().fliph(),
        Orientation::Rotate270 => img.rotate270(),
    }
}

/// Rotate/flip `img` so it displays upright according to the EXIF data in `data`.
pub fn auto_orient(img: DynamicImage, data: &[u8]) -> DynamicImage {
    match read_orientation(data) {
        Some(orientation) if orientation != Orientation::Normal => {
            debug!(?orientation, "applying EXIF orientation");
            apply_orientation(img, orientation)
        }
        _ => img,
    }
}
