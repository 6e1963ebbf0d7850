//! The leader page: per-file metadata (name, timestamps, properties, and
//! navigation hints) stored in the first page of every file.

use altofs_types::{
    read_alto_time, read_name, write_alto_time, write_name, FileEntry, FilePosition, Geometry,
    PAGE_DATA_SIZE,
};

use crate::error::Result;
use crate::fs::Filesystem;

const LD_OFF_CREATED: usize = 0;
const LD_OFF_WRITTEN: usize = 4;
const LD_OFF_READ: usize = 8;
const LD_OFF_NAME: usize = 12;
const LD_OFF_PROPS: usize = 52;
const LD_OFF_SPARE: usize = 472;
const LD_OFF_PROPBEGIN: usize = 492;
const LD_OFF_PROPLEN: usize = 493;
const LD_OFF_CONSECUTIVE: usize = 494;
const LD_OFF_CHANGESN: usize = 495;
const LD_OFF_DIRFPHINT: usize = 496;
const LD_OFF_LASTPAGEHINT: usize = 506;

/// A raw `(type, payload)` property record from a leader page's property
/// stream.
#[derive(Debug, Clone)]
pub struct Property {
    pub kind: u8,
    pub data: Vec<u8>,
}

/// Metadata read from a file's leader page.
#[derive(Debug, Clone)]
pub struct FileInfo {
    pub name: String,
    pub created: i64,
    pub written: i64,
    pub read: i64,
    pub propbegin: u8,
    pub proplen: u8,
    pub consecutive: bool,
    pub change_sn: bool,
    pub disk_geometry: Option<Geometry>,
    pub fe_hint: FileEntry,
    pub last_page_hint: FilePosition,
}

impl Filesystem {
    fn read_leader_page_raw(&self, fe: &FileEntry) -> Result<[u8; PAGE_DATA_SIZE]> {
        let mut of = self.get_of(fe, false, true)?;
        let mut data = [0u8; PAGE_DATA_SIZE];
        self.read_into(&mut of, &mut data)?;
        self.close_ro(of)?;
        Ok(data)
    }

    /// Writes `data` back as the raw contents of `fe`'s leader page,
    /// bypassing the leader-page-refresh that an ordinary [`Filesystem::close`]
    /// would otherwise trigger.
    fn write_leader_page_raw(&mut self, fe: &FileEntry, data: &[u8; PAGE_DATA_SIZE]) -> Result<()> {
        let mut of = self.get_of(fe, false, false)?;
        self.write(&mut of, Some(data), false)?;
        of.read_only = true;
        self.close_ro(of)
    }

    /// Parses the property stream out of a leader page buffer.
    pub(crate) fn parse_properties(data: &[u8; PAGE_DATA_SIZE]) -> Vec<Property> {
        let mut props = Vec::new();
        if 2 * usize::from(data[LD_OFF_PROPBEGIN]) != LD_OFF_PROPS {
            return props;
        }
        let nbytes = 2 * usize::from(data[LD_OFF_PROPLEN]);
        if nbytes > LD_OFF_SPARE - LD_OFF_PROPS {
            return props;
        }

        let stream = &data[LD_OFF_PROPS..LD_OFF_PROPS + nbytes];
        let mut i = 0;
        while i < nbytes {
            let kind = stream[i];
            i += 1;
            if i == nbytes {
                break;
            }
            let length = usize::from(stream[i]);
            i += 1;
            if i + 2 * length > nbytes {
                break;
            }
            props.push(Property {
                kind,
                data: stream[i..i + 2 * length].to_vec(),
            });
            i += 2 * length;
        }
        props
    }

    /// Reads a file's leader-page metadata.
    pub fn file_info(&self, fe: &FileEntry) -> Result<FileInfo> {
        let data = self.read_leader_page_raw(fe)?;

        let disk_geometry = Self::parse_properties(&data)
            .into_iter()
            .find(|p| p.kind == 1 && p.data.len() == 10)
            .map(|p| Geometry::decode(&p.data, 0));

        Ok(FileInfo {
            name: read_name(&data[LD_OFF_NAME..]),
            created: read_alto_time(&data, LD_OFF_CREATED),
            written: read_alto_time(&data, LD_OFF_WRITTEN),
            read: read_alto_time(&data, LD_OFF_READ),
            propbegin: data[LD_OFF_PROPBEGIN],
            proplen: data[LD_OFF_PROPLEN],
            consecutive: data[LD_OFF_CONSECUTIVE] != 0,
            change_sn: data[LD_OFF_CHANGESN] != 0,
            disk_geometry,
            fe_hint: FileEntry::decode(&data, LD_OFF_DIRFPHINT),
            last_page_hint: FilePosition::decode(&data, LD_OFF_LASTPAGEHINT),
        })
    }

    /// Initializes a freshly-created file's leader page: name and
    /// timestamps set, no properties, hints pointing at the (still empty)
    /// file itself.
    pub(crate) fn init_leader_page(&mut self, fe: &FileEntry, name: &str) -> Result<()> {
        let now = crate::clock::now_unix();
        let mut data = [0u8; PAGE_DATA_SIZE];

        write_alto_time(&mut data, LD_OFF_CREATED, now);
        write_alto_time(&mut data, LD_OFF_WRITTEN, now);
        write_alto_time(&mut data, LD_OFF_READ, now);
        write_name(&mut data[LD_OFF_NAME..], name);

        data[LD_OFF_PROPBEGIN] = 0;
        data[LD_OFF_PROPLEN] = 0;
        data[LD_OFF_CONSECUTIVE] = 0;
        data[LD_OFF_CHANGESN] = 0;

        fe.encode(&mut data, LD_OFF_DIRFPHINT);
        FilePosition {
            vda: fe.leader_vda,
            pgnum: 0,
            pos: 0,
        }
        .encode(&mut data, LD_OFF_LASTPAGEHINT);

        self.write_leader_page_raw(fe, &data)
    }

    /// Refreshes the `LastPageHint` of `fe`'s leader page to point at the
    /// file's current end of chain. Called from [`Filesystem::close`] when
    /// a file cursor was modified.
    pub(crate) fn update_leader_page(&mut self, fe: &FileEntry) -> Result<()> {
        let mut data = self.read_leader_page_raw(fe)?;
        let end_pos = self.file_end_position(fe)?;
        end_pos.encode(&mut data, LD_OFF_LASTPAGEHINT);
        self.write_leader_page_raw(fe, &data)
    }

    fn file_end_position(&self, fe: &FileEntry) -> Result<FilePosition> {
        let mut of = self.get_of(fe, true, true)?;
        while !of.eof {
            self.skip(&mut of, PAGE_DATA_SIZE)?;
        }
        let pos = of.pos;
        self.close_ro(of)?;
        Ok(pos)
    }
}

