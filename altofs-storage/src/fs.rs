//! The top-level filesystem facade: creation, lifecycle, and the handful
//! of whole-file conveniences (extract, insert, copy) built on top of the
//! open-file cursor.

use std::path::Path;

use altofs_types::{write_word_be, FileEntry, Geometry, SerialNumber, Vda};
use tracing::{debug, instrument};

use crate::error::{Error, Result};
use crate::page::PageStore;

/// Byte offsets within the `DiskDescriptor` file's fixed header block.
/// Mirrors `DESCR_OFF_*` in the original's `fs_internal.h`.
pub(crate) const DESCR_OFF_GEOMETRY: usize = 0;
pub(crate) const DESCR_OFF_LAST_SN: usize = 8;
pub(crate) const DESCR_OFF_DISKBT_SIZE: usize = 14;
pub(crate) const DESCR_OFF_VERSIONS_KEPT: usize = 16;
pub(crate) const DESCR_OFF_FREE_PAGES: usize = 18;
/// Size of the header block preceding the bitmap words; the original pads
/// it to 32 bytes even though the last field used ends at byte 20.
pub(crate) const DESCR_HEADER_LEN: usize = 32;

/// A loaded Alto filesystem: its page array plus the bookkeeping needed to
/// open files, walk directories, and check its own integrity.
///
/// A freshly created or loaded `Filesystem` is **unchecked**: most
/// operations refuse to run until [`Filesystem::check_integrity`] has
/// passed, mirroring the original `fs->checked` gate.
#[derive(Debug)]
pub struct Filesystem {
    pub(crate) store: PageStore,
    pub(crate) last_sn: SerialNumber,
    pub(crate) checked: bool,
}

impl Filesystem {
    /// Creates a new, empty filesystem with every page marked free.
    #[instrument(skip_all, fields(num_pages = geometry.num_pages()))]
    pub fn create(geometry: Geometry) -> Result<Filesystem> {
        let geometry = geometry.validate().map_err(|_| Error::InvalidGeometry)?;
        debug!("creating filesystem");
        Ok(Filesystem {
            store: PageStore::new(geometry),
            last_sn: SerialNumber::ZERO,
            checked: false,
        })
    }

    #[must_use]
    pub fn geometry(&self) -> Geometry {
        self.store.geometry
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.store.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    #[must_use]
    pub fn is_checked(&self) -> bool {
        self.checked
    }

    #[must_use]
    pub fn free_pages(&self) -> u16 {
        self.store.free_pages
    }

    pub(crate) fn require_checked(&self) -> Result<()> {
        if !self.checked {
            return Err(Error::Latched("filesystem has not passed integrity check".into()));
        }
        Ok(())
    }

    /// Resolves the well-known `SysDir` leader page (VDA 1) to a `FileEntry`.
    pub fn sysdir_entry(&self) -> Result<FileEntry> {
        self.require_checked()?;
        self.file_entry_at(Vda(1))
    }

    pub(crate) fn file_entry_at(&self, leader_vda: Vda) -> Result<FileEntry> {
        if !self.store.contains(leader_vda) {
            return Err(Error::VdaOutOfRange(leader_vda));
        }
        let label = &self.store.page(leader_vda).label;
        Ok(FileEntry {
            sn: label.sn,
            version: label.version,
            blank: 0,
            leader_vda,
        })
    }

    /// Validates a `FileEntry` against the current page contents.
    ///
    /// Mirrors `check_file_entry`: the entry must name an in-range leader
    /// page whose serial number, version, and `blank` field all agree with
    /// what is actually stored there.
    #[must_use]
    pub fn check_file_entry(&self, fe: &FileEntry) -> bool {
        if !self.checked {
            return false;
        }
        if !self.store.contains(fe.leader_vda) {
            return false;
        }
        if fe.version == altofs_types::VERSION_FREE
            || fe.version == 0
            || fe.version == altofs_types::VERSION_BAD
        {
            return false;
        }
        let label = &self.store.page(fe.leader_vda).label;
        if !label.is_leader() {
            return false;
        }
        if fe.sn.word1 != label.sn.word1 || fe.sn.word2 != label.sn.word2 {
            return false;
        }
        if fe.version != label.version {
            return false;
        }
        fe.blank == 0
    }

    /// Extracts a named file's contents to `output_path`.
    #[instrument(skip(self))]
    pub fn extract_file(&self, name: &str, output_path: &Path) -> Result<()> {
        let mut of = self.open_ro(name)?;
        let mut buf = vec![0u8; altofs_types::PAGE_DATA_SIZE];
        let mut out = Vec::new();
        loop {
            let n = self.read_into(&mut of, &mut buf)?;
            out.extend_from_slice(&buf[..n]);
            if n < buf.len() {
                break;
            }
        }
        self.close_ro(of)?;
        std::fs::write(output_path, out)?;
        Ok(())
    }

    /// Inserts the contents of `input_path` into a (possibly new) file
    /// named `name`, overwriting any existing contents.
    #[instrument(skip(self))]
    pub fn insert_file(&mut self, input_path: &Path, name: &str) -> Result<()> {
        let contents = std::fs::read(input_path)?;
        let mut of = self.open_w(name)?;
        self.write(&mut of, Some(&contents), true)?;
        self.close(of)?;
        self.update_disk_descriptor()?;
        Ok(())
    }

    /// Copies `src` to a new name `dst` by creating a second directory
    /// entry pointing at the same leader page (a link, not a deep copy).
    pub fn copy(&mut self, src: &str, dst: &str) -> Result<()> {
        let (found, fe, _dir, _seg) = self.resolve_name(src)?;
        if !found {
            return Err(Error::NameNotFound(src.to_string()));
        }
        self.link(dst, fe)?;
        self.update_disk_descriptor()?;
        Ok(())
    }

    /// Rewrites the `DiskDescriptor` file with the current geometry, last
    /// serial number, bitmap size, versions-kept (always 0), free-page
    /// count, and the bitmap itself, trimming any leftover trailing bytes.
    ///
    /// Must be called after any operation that changes the page bitmap
    /// (allocating or freeing a page), or a later [`Filesystem::check_integrity`]
    /// on a saved image will find the stored bitmap stale.
    #[instrument(skip(self))]
    pub fn update_disk_descriptor(&mut self) -> Result<()> {
        self.store.rebuild_metadata();

        let (found, fe, _dir, _seg) = self.resolve_name("DiskDescriptor")?;
        if !found {
            return Err(Error::FileNotFound);
        }

        let mut header = vec![0u8; DESCR_HEADER_LEN];
        self.store.geometry.encode(&mut header, DESCR_OFF_GEOMETRY);
        self.last_sn.encode(&mut header, DESCR_OFF_LAST_SN);
        write_word_be(
            &mut header,
            DESCR_OFF_DISKBT_SIZE,
            u16::try_from(self.store.bitmap.len()).expect("bitmap word count fits in u16"),
        );
        write_word_be(&mut header, DESCR_OFF_VERSIONS_KEPT, 0);
        write_word_be(&mut header, DESCR_OFF_FREE_PAGES, self.store.free_pages);

        let mut of = self.get_of(&fe, true, false)?;
        let n = self.write(&mut of, Some(&header), true)?;
        if n != header.len() {
            let err = of.error.take().unwrap_or(Error::DiskFull);
            return Err(err);
        }

        for &word in self.store.bitmap.words().to_vec().iter() {
            let mut buf = [0u8; 2];
            write_word_be(&mut buf, 0, word);
            let n = self.write(&mut of, Some(&buf), true)?;
            if n != 2 {
                let err = of.error.take().unwrap_or(Error::DiskFull);
                return Err(err);
            }
        }

        self.truncate(&mut of)?;
        self.close(of)
    }
}
