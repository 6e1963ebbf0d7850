//! The "AAR" image format: a flat table of raw sectors, one per page, in
//! VDA order. Unlike the rest of the on-disk metadata (which is
//! big-endian), this format's framing words -- the leading VDA sentinel,
//! the page header, and the label -- are little-endian, matching the
//! image-framing convention rather than the in-memory metadata one. Only
//! the 512-byte data area is byte-swapped per word, a quirk inherited from
//! the original disk controller's wire format.

use altofs_types::{Geometry, Label, Rda, SerialNumber, Vda, PAGE_DATA_SIZE};

use crate::error::{Error, Result};
use crate::fs::Filesystem;
use crate::page::{PageHeader, PageStore};

const SENTINEL_BYTES: usize = 2;
const HEADER_BYTES: usize = 4;
const LABEL_BYTES: usize = 16;
const PAGE_BYTES: usize = SENTINEL_BYTES + HEADER_BYTES + LABEL_BYTES + PAGE_DATA_SIZE;

fn read_le(data: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([data[offset], data[offset + 1]])
}

fn write_le(data: &mut [u8], offset: usize, value: u16) {
    data[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}

fn decode_label_le(data: &[u8]) -> Label {
    Label {
        next_rda: Rda(read_le(data, 0)),
        prev_rda: Rda(read_le(data, 2)),
        unused: read_le(data, 4),
        nbytes: read_le(data, 6),
        file_pgnum: read_le(data, 8),
        version: read_le(data, 10),
        sn: SerialNumber {
            word1: read_le(data, 12),
            word2: read_le(data, 14),
        },
    }
}

fn encode_label_le(label: &Label, data: &mut [u8]) {
    write_le(data, 0, label.next_rda.0);
    write_le(data, 2, label.prev_rda.0);
    write_le(data, 4, label.unused);
    write_le(data, 6, label.nbytes);
    write_le(data, 8, label.file_pgnum);
    write_le(data, 10, label.version);
    write_le(data, 12, label.sn.word1);
    write_le(data, 14, label.sn.word2);
}

/// Loads a raw sector-table image under `geometry`, which is trusted since
/// the format carries no geometry record of its own. A length that isn't
/// exactly `num_pages * PAGE_BYTES` is rejected outright, matching the
/// "no trailing bytes, no premature EOF" rule this format is checked under.
pub fn load_image_aar(bytes: &[u8], geometry: Geometry) -> Result<Filesystem> {
    let geometry = geometry.validate().map_err(|_| Error::InvalidGeometry)?;
    let num_pages = geometry.num_pages() as usize;
    if bytes.len() != num_pages * PAGE_BYTES {
        return Err(Error::CorruptImage(
            "AAR image length does not match its declared geometry",
        ));
    }

    let mut store = PageStore::new(geometry);
    for i in 0..num_pages {
        let vda = Vda(u16::try_from(i).expect("geometry bounds fit in u16"));
        let base = i * PAGE_BYTES;
        let raw = &bytes[base..base + PAGE_BYTES];

        // raw[0..2] is the VDA sentinel; it is discarded, not trusted.
        let header_rda = Rda(read_le(raw, SENTINEL_BYTES + 2));
        let label_start = SENTINEL_BYTES + HEADER_BYTES;
        let label = decode_label_le(&raw[label_start..label_start + LABEL_BYTES]);

        let raw_data = &raw[label_start + LABEL_BYTES..];
        let mut data = Box::new([0u8; PAGE_DATA_SIZE]);
        for j in 0..PAGE_DATA_SIZE {
            data[j ^ 1] = raw_data[j];
        }

        let page = store.page_mut(vda);
        page.header = PageHeader {
            unused: 0,
            rda: header_rda,
        };
        page.label = label;
        page.data = data;
    }

    let mut fs = Filesystem {
        store,
        last_sn: SerialNumber::ZERO,
        checked: false,
    };
    fs.last_sn = fs.store.rebuild_metadata();
    Ok(fs)
}

/// Serializes `fs` to the raw sector-table format.
pub fn save_image_aar(fs: &Filesystem) -> Result<Vec<u8>> {
    let num_pages = fs.store.len();
    let mut out = vec![0u8; num_pages * PAGE_BYTES];

    for i in 0..num_pages {
        let vda = Vda(u16::try_from(i).expect("page count fits in u16"));
        let page = fs.store.page(vda);
        let base = i * PAGE_BYTES;

        write_le(&mut out, base, vda.0);
        write_le(&mut out, base + SENTINEL_BYTES, 0);
        write_le(&mut out, base + SENTINEL_BYTES + 2, page.header.rda.0);

        let label_start = base + SENTINEL_BYTES + HEADER_BYTES;
        encode_label_le(&page.label, &mut out[label_start..label_start + LABEL_BYTES]);

        let data_base = label_start + LABEL_BYTES;
        for j in 0..PAGE_DATA_SIZE {
            out[data_base + j] = page.data[j ^ 1];
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_a_freshly_created_filesystem() {
        let geometry = Geometry {
            num_disks: 1,
            num_cylinders: 2,
            num_heads: 2,
            num_sectors: 3,
            sector_words: 190,
        };
        let fs = Filesystem {
            store: PageStore::new(geometry),
            last_sn: SerialNumber::ZERO,
            checked: false,
        };

        let bytes = save_image_aar(&fs).unwrap();
        assert_eq!(bytes.len(), geometry.num_pages() as usize * PAGE_BYTES);
        let loaded = load_image_aar(&bytes, geometry).unwrap();

        assert_eq!(loaded.store.len(), fs.store.len());
        for vda in 0..fs.store.len() {
            let vda = Vda(u16::try_from(vda).unwrap());
            assert_eq!(loaded.store.page(vda).label, fs.store.page(vda).label);
            assert_eq!(loaded.store.page(vda).data, fs.store.page(vda).data);
        }
    }

    #[test]
    fn rejects_a_truncated_image() {
        let geometry = Geometry {
            num_disks: 1,
            num_cylinders: 1,
            num_heads: 1,
            num_sectors: 1,
            sector_words: 190,
        };
        let fs = Filesystem {
            store: PageStore::new(geometry),
            last_sn: SerialNumber::ZERO,
            checked: false,
        };
        let mut bytes = save_image_aar(&fs).unwrap();
        bytes.pop();
        assert!(load_image_aar(&bytes, geometry).is_err());
    }
}
