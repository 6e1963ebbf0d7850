//! The "BFS" image format: a stream of framed command records, as used by
//! the disk-server wire protocol. Every word on the wire -- framing and
//! payload alike -- is big-endian, the same convention the rest of the
//! on-disk metadata uses; unlike the "AAR" format, nothing here is
//! byte-swapped.

use altofs_types::{read_word_be, write_word_be, Geometry, Label, Rda, SerialNumber, Vda, PAGE_DATA_SIZE};

use crate::error::{Error, Result};
use crate::fs::Filesystem;
use crate::page::PageStore;

const CMD_DISK_PARAMS_REPLY: u16 = 3;
const CMD_DISK_PAGE_REPLY: u16 = 6;
const CMD_END_OF_TRANSFER: u16 = 7;

const DISK_PARAMS_PAYLOAD_WORDS: usize = 5;
const DISK_TYPE_DIABLO31: u16 = 10;

const PAGE_HEADER_WORDS: usize = 2;
const PAGE_LABEL_WORDS: usize = Label::ENCODED_LEN / 2;
const PAGE_DATA_WORDS: usize = PAGE_DATA_SIZE / 2;
const DISK_PAGE_PAYLOAD_WORDS: usize = PAGE_HEADER_WORDS + PAGE_LABEL_WORDS + PAGE_DATA_WORDS;

fn read_record_header(bytes: &[u8], offset: usize) -> Result<(usize, u16)> {
    if offset + 4 > bytes.len() {
        return Err(Error::CorruptImage("BFS image truncated in a record header"));
    }
    let length = usize::from(read_word_be(bytes, offset));
    if length < 2 {
        return Err(Error::CorruptImage("BFS record length is too short to hold itself"));
    }
    let command = read_word_be(bytes, offset + 2);
    Ok((length, command))
}

/// Loads a framed disk-server image. `sector_words` is supplied by the
/// caller since the frame stream carries disk dimensions but not the
/// on-the-wire sector size.
pub fn load_image_bfs(bytes: &[u8], sector_words: u16) -> Result<Filesystem> {
    let mut store: Option<PageStore> = None;
    let mut offset = 0usize;

    loop {
        let (length, command) = read_record_header(bytes, offset)?;
        let payload_start = offset + 4;
        let payload_words = length - 2;
        let payload_end = payload_start + 2 * payload_words;
        if payload_end > bytes.len() {
            return Err(Error::CorruptImage("BFS record payload runs past end of file"));
        }
        let payload = &bytes[payload_start..payload_end];

        match command {
            CMD_DISK_PARAMS_REPLY => {
                if payload_words != DISK_PARAMS_PAYLOAD_WORDS {
                    return Err(Error::CorruptImage("DiskParamsReply has the wrong payload length"));
                }
                let _disk_type = read_word_be(payload, 0);
                let num_cylinders = read_word_be(payload, 2);
                let num_heads = read_word_be(payload, 4);
                let num_sectors = read_word_be(payload, 6);
                let num_disks = read_word_be(payload, 8);

                let geometry = Geometry {
                    num_disks,
                    num_cylinders,
                    num_heads,
                    num_sectors,
                    sector_words,
                }
                .validate()
                .map_err(|_| Error::InvalidGeometry)?;
                store = Some(PageStore::new(geometry));
            }
            CMD_DISK_PAGE_REPLY => {
                if payload_words != DISK_PAGE_PAYLOAD_WORDS {
                    return Err(Error::CorruptImage("DiskPageReply has the wrong payload length"));
                }
                let store = store
                    .as_mut()
                    .ok_or(Error::CorruptImage("BFS image has a page record before its DiskParamsReply"))?;

                let header_rda = Rda(read_word_be(payload, 2));
                let vda = store
                    .geometry
                    .real_to_virtual(header_rda)
                    .ok_or(Error::CorruptImage("DiskPageReply addresses an out-of-range sector"))?;

                let label_off = 2 * PAGE_HEADER_WORDS;
                let label = Label::decode(&payload[label_off..label_off + Label::ENCODED_LEN]);

                let data_off = label_off + Label::ENCODED_LEN;
                let mut data = Box::new([0u8; PAGE_DATA_SIZE]);
                data.copy_from_slice(&payload[data_off..data_off + PAGE_DATA_SIZE]);

                let page = store.page_mut(vda);
                page.header.rda = header_rda;
                page.label = label;
                page.data = data;
            }
            CMD_END_OF_TRANSFER => break,
            _ => return Err(Error::CorruptImage("BFS image contains an unrecognized command")),
        }

        offset = payload_end;
    }

    let mut store = store.ok_or(Error::CorruptImage("BFS image carried no DiskParamsReply"))?;
    let last_sn = store.rebuild_metadata();

    Ok(Filesystem {
        store,
        last_sn,
        checked: false,
    })
}

fn write_record(out: &mut Vec<u8>, command: u16, payload: &[u8]) {
    let length = 2 + payload.len() / 2;
    let mut header = [0u8; 4];
    write_word_be(&mut header, 0, u16::try_from(length).expect("record fits in 16 bits"));
    write_word_be(&mut header, 2, command);
    out.extend_from_slice(&header);
    out.extend_from_slice(payload);
}

/// Serializes `fs` to the framed disk-server format. Pages that are free
/// or permanently bad are omitted, matching the original wire protocol's
/// lazy-transfer behavior; a loader defaults any page it never sees to
/// free.
pub fn save_image_bfs(fs: &Filesystem) -> Result<Vec<u8>> {
    let geometry = fs.store.geometry;
    let mut out = Vec::new();

    let mut params = [0u8; 2 * DISK_PARAMS_PAYLOAD_WORDS];
    write_word_be(&mut params, 0, DISK_TYPE_DIABLO31);
    write_word_be(&mut params, 2, geometry.num_cylinders);
    write_word_be(&mut params, 4, geometry.num_heads);
    write_word_be(&mut params, 6, geometry.num_sectors);
    write_word_be(&mut params, 8, geometry.num_disks);
    write_record(&mut out, CMD_DISK_PARAMS_REPLY, &params);

    for i in 0..fs.store.len() {
        let vda = Vda(u16::try_from(i).expect("page count fits in u16"));
        let page = fs.store.page(vda);
        if !page.label.is_in_chain() {
            continue;
        }

        let mut payload = vec![0u8; 2 * DISK_PAGE_PAYLOAD_WORDS];
        write_word_be(&mut payload, 0, page.header.unused);
        write_word_be(&mut payload, 2, page.header.rda.0);
        let label_off = 2 * PAGE_HEADER_WORDS;
        page.label.encode(&mut payload[label_off..label_off + Label::ENCODED_LEN]);
        let data_off = label_off + Label::ENCODED_LEN;
        payload[data_off..data_off + PAGE_DATA_SIZE].copy_from_slice(page.data.as_slice());

        write_record(&mut out, CMD_DISK_PAGE_REPLY, &payload);
    }

    write_record(&mut out, CMD_END_OF_TRANSFER, &[]);
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

        let bytes = save_image_bfs(&fs).unwrap();
        let loaded = load_image_bfs(&bytes, geometry.sector_words).unwrap();

        assert_eq!(loaded.store.geometry.num_disks, geometry.num_disks);
        assert_eq!(loaded.store.geometry.num_cylinders, geometry.num_cylinders);
        assert_eq!(loaded.store.geometry.num_heads, geometry.num_heads);
        assert_eq!(loaded.store.geometry.num_sectors, geometry.num_sectors);
        assert_eq!(loaded.store.len(), fs.store.len());
        // A freshly created store has every page FREE, so none of them
        // round-trip through the wire format -- only the shape is checked.
    }
}
