//! Disk image codecs: the raw "AAR" sector table and the framed "BFS"
//! disk-server wire format.

pub mod framed;
pub mod raw;

use std::path::Path;

use altofs_types::Geometry;

use crate::error::Result;
use crate::fs::Filesystem;

/// Which of the two image encodings a file is, or is to be written as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    /// Flat sector table, byte-swapped data words, no self-described geometry.
    Raw,
    /// Disk-server command framing; carries its own disk dimensions.
    Framed,
}

fn detect_format(bytes: &[u8]) -> ImageFormat {
    if bytes.len() >= 4 {
        let length = altofs_types::read_word_be(bytes, 0);
        let command = altofs_types::read_word_be(bytes, 2);
        let looks_framed = matches!(command, 3 | 6 | 7) && usize::from(length) >= 2;
        if looks_framed {
            return ImageFormat::Framed;
        }
    }
    ImageFormat::Raw
}

impl Filesystem {
    /// Loads a disk image from `path`, auto-detecting which of the two
    /// formats it's in. `geometry` is authoritative for a raw image, and
    /// supplies only `sector_words` for a framed one (whose dimensions are
    /// carried in the frame stream itself).
    pub fn load_image(path: &Path, geometry: Geometry) -> Result<Filesystem> {
        let bytes = std::fs::read(path)?;
        match detect_format(&bytes) {
            ImageFormat::Framed => framed::load_image_bfs(&bytes, geometry.sector_words),
            ImageFormat::Raw => raw::load_image_aar(&bytes, geometry),
        }
    }

    /// Writes `self` to `path` in the given format.
    pub fn save_image(&self, path: &Path, format: ImageFormat) -> Result<()> {
        let bytes = match format {
            ImageFormat::Raw => raw::save_image_aar(self)?,
            ImageFormat::Framed => framed::save_image_bfs(self)?,
        };
        std::fs::write(path, bytes)?;
        Ok(())
    }
}
