//! The open-file cursor: a position within a page chain, plus the read,
//! write, truncate, and close operations defined over it.

use altofs_types::{FileEntry, FilePosition, Rda, Vda, PAGE_DATA_SIZE};
use tracing::trace;

use crate::error::{Error, Result};
use crate::fs::Filesystem;

/// A cursor into an open file's page chain.
///
/// Errors encountered mid-operation are latched into `error` rather than
/// only returned from the call that caused them, so a caller who discards
/// a `Result` can still notice trouble on the next call or at [`Filesystem::close`].
#[derive(Debug)]
pub struct OpenFile {
    pub fe: FileEntry,
    pub pos: FilePosition,
    pub eof: bool,
    pub error: Option<Error>,
    pub read_only: bool,
    pub modified: bool,
}

impl OpenFile {
    #[must_use]
    pub fn error(&self) -> Option<&Error> {
        self.error.as_ref()
    }

    #[must_use]
    pub fn is_eof(&self) -> bool {
        self.eof
    }
}

impl Filesystem {
    /// Builds a cursor for `fe`, optionally skipping past the leader page.
    pub fn get_of(&self, fe: &FileEntry, skip_leader: bool, read_only: bool) -> Result<OpenFile> {
        self.require_checked()?;
        if !self.check_file_entry(fe) {
            return Err(Error::BadLeaderPage);
        }

        let mut of = OpenFile {
            fe: *fe,
            pos: FilePosition {
                vda: fe.leader_vda,
                pgnum: 0,
                pos: 0,
            },
            eof: false,
            error: None,
            read_only,
            modified: false,
        };

        if skip_leader {
            self.advance_page(&mut of);
        }
        Ok(of)
    }

    /// Opens `name` for reading. Fails if the name does not resolve.
    pub fn open_ro(&self, name: &str) -> Result<OpenFile> {
        self.require_checked()?;
        let (found, fe, _dir, _seg) = self.resolve_name(name)?;
        if !found {
            return Err(Error::FileNotFound);
        }
        self.get_of(&fe, true, true)
    }

    /// Opens an existing file read-write without truncating it. Fails if
    /// the name does not resolve; this is mode `"r+"`.
    pub fn open_rw(&mut self, name: &str) -> Result<OpenFile> {
        self.require_checked()?;
        let (found, fe, _dir, _seg) = self.resolve_name(name)?;
        if !found {
            return Err(Error::FileNotFound);
        }
        self.get_of(&fe, true, false)
    }

    /// Opens `name` for writing, creating it (and a directory entry for it)
    /// if it does not already exist. Existing files are truncated; this is
    /// mode `"w"`.
    pub fn open_w(&mut self, name: &str) -> Result<OpenFile> {
        self.require_checked()?;
        let (found, fe, dir_fe, base_name) = self.resolve_name(name)?;

        if found {
            let mut of = self.get_of(&fe, true, false)?;
            self.truncate(&mut of)?;
            return Ok(of);
        }

        self.create_file(&dir_fe, &base_name)
    }

    /// Opens `name` for writing, creating it if it does not already exist
    /// but leaving an existing file's contents intact; this is mode `"w+"`.
    pub fn open_w_keep(&mut self, name: &str) -> Result<OpenFile> {
        self.require_checked()?;
        let (found, fe, dir_fe, base_name) = self.resolve_name(name)?;

        if found {
            return self.get_of(&fe, true, false);
        }

        self.create_file(&dir_fe, &base_name)
    }

    /// Opens `name` under one of the four standard modes: `"r"` (read,
    /// must exist), `"r+"` (read-write, must exist, no truncation), `"w"`
    /// (write, create if missing, truncate if present), or `"w+"` (write,
    /// create if missing, keep existing contents).
    pub fn open(&mut self, name: &str, mode: &str) -> Result<OpenFile> {
        match mode {
            "r" => self.open_ro(name),
            "r+" => self.open_rw(name),
            "w" => self.open_w(name),
            "w+" => self.open_w_keep(name),
            _ => Err(Error::BadPath(format!("unrecognized open mode {mode:?}"))),
        }
    }

    /// Allocates a leader page, initializes it, and adds a directory entry
    /// for it under `dir_fe`. Shared by the two creating-open modes.
    fn create_file(&mut self, dir_fe: &FileEntry, base_name: &str) -> Result<OpenFile> {
        Self::validate_name(base_name)?;

        let leader_vda = self
            .store
            .allocate_page()
            .ok_or(Error::DiskFull)?;

        let fe = self.new_file_entry(leader_vda, false);
        self.init_leader_page(&fe, base_name)?;

        let mut of = self.get_of(&fe, true, false)?;
        self.write(&mut of, None, true)?;
        if of.error.is_some() {
            self.store.free_chain(leader_vda);
            return Err(of.error.take().unwrap());
        }

        if let Err(e) = self.add_directory_entry(dir_fe, &fe, base_name) {
            self.store.free_chain(leader_vda);
            return Err(e);
        }

        Ok(of)
    }

    /// Creates a new leader page's label for a freshly allocated page.
    pub(crate) fn new_file_entry(&mut self, leader_vda: Vda, directory: bool) -> FileEntry {
        let sn = self.last_sn;
        {
            let page = self.store.page_mut(leader_vda);
            page.label.prev_rda = Rda::NONE;
            page.label.next_rda = Rda::NONE;
            page.label.unused = 0;
            page.label.nbytes = PAGE_DATA_SIZE as u16;
            page.label.file_pgnum = 0;
            page.label.version = 1;
            page.label.sn = sn;
            if directory {
                page.label.set_directory(true);
            }
        }
        self.last_sn.increment();
        self.file_entry_at(leader_vda)
            .expect("leader_vda was just written")
    }

    /// Advances to the next page in the chain, or marks EOF if there is none.
    pub(crate) fn advance_page(&self, of: &mut OpenFile) {
        if of.error.is_some() || of.eof {
            return;
        }

        let vda = of.pos.vda;
        if !self.store.contains(vda) {
            of.error = Some(Error::VdaOutOfRange(vda));
            return;
        }

        let page = self.store.page(vda);
        let rda = page.label.next_rda;

        if rda.is_none() {
            of.pos.pos = page.label.nbytes;
            of.eof = true;
            return;
        }

        match self.store.geometry.real_to_virtual(rda) {
            Some(next_vda) => {
                of.pos.vda = next_vda;
                of.pos.pos = 0;
                of.pos.pgnum += 1;
            }
            None => {
                of.error = Some(Error::BadRda(rda));
            }
        }
    }

    /// Checks that a cursor is still sound to operate on.
    pub(crate) fn check_of(&self, of: &OpenFile) -> Result<()> {
        if let Some(e) = &of.error {
            return Err(e.as_latched());
        }
        if !self.checked {
            return Err(Error::Latched("filesystem unchecked".into()));
        }
        if of.eof {
            return Ok(());
        }
        if !self.store.contains(of.pos.vda) {
            return Err(Error::Latched("invalid cursor position".into()));
        }
        let page = self.store.page(of.pos.vda);
        if of.pos.pos > page.label.nbytes {
            return Err(Error::Latched("invalid cursor position".into()));
        }
        Ok(())
    }

    fn transfer_read(&self, of: &mut OpenFile, len: usize, mut dst: Option<&mut [u8]>) -> Result<usize> {
        self.check_of(of).map_err(|e| {
            of.error.get_or_insert_with(|| e.as_latched());
            e
        })?;

        let mut offset = 0usize;
        let mut remaining = len;
        while remaining > 0 && !of.eof {
            let vda = of.pos.vda;
            let page = self.store.page(vda);

            if of.pos.pos < page.label.nbytes {
                let avail = usize::from(page.label.nbytes - of.pos.pos);
                let n = avail.min(remaining);
                if let Some(d) = dst.as_deref_mut() {
                    let start = usize::from(of.pos.pos);
                    d[offset..offset + n].copy_from_slice(&page.data[start..start + n]);
                }
                of.pos.pos += n as u16;
                offset += n;
                remaining -= n;
            }

            if remaining == 0 {
                break;
            }
            self.advance_page(of);
        }
        Ok(offset)
    }

    /// Reads up to `dst.len()` bytes into `dst`, returning the number read.
    pub fn read_into(&self, of: &mut OpenFile, dst: &mut [u8]) -> Result<usize> {
        self.transfer_read(of, dst.len(), Some(dst))
    }

    /// Advances the cursor `len` bytes without copying data anywhere.
    pub fn skip(&self, of: &mut OpenFile, len: usize) -> Result<usize> {
        self.transfer_read(of, len, None)
    }

    /// Writes `src` (or, if `None`, `len` zero bytes) starting at the
    /// cursor, extending the chain with fresh pages when `extend` is set
    /// and the file runs out of room.
    pub fn write(&mut self, of: &mut OpenFile, src: Option<&[u8]>, extend: bool) -> Result<usize> {
        if let Err(e) = self.check_of(of) {
            of.error.get_or_insert_with(|| e.as_latched());
            return Err(e);
        }
        if of.read_only {
            of.error = Some(Error::ReadOnly);
            return Err(Error::ReadOnly);
        }

        let mut remaining = src.map_or(0, <[u8]>::len);
        let mut offset = 0usize;

        loop {
            if of.eof {
                break;
            }
            of.modified = true;
            let vda = of.pos.vda;

            let existing_nbytes = self.store.page(vda).label.nbytes;
            if of.pos.pos < existing_nbytes {
                let avail = usize::from(existing_nbytes - of.pos.pos);
                let n = avail.min(remaining);
                let page = self.store.page_mut(vda);
                let start = usize::from(of.pos.pos);
                match src {
                    Some(s) => page.data[start..start + n].copy_from_slice(&s[offset..offset + n]),
                    None => page.data[start..start + n].fill(0),
                }
                of.pos.pos += n as u16;
                offset += n;
                remaining -= n;
            }

            if remaining == 0 && usize::from(of.pos.pos) < PAGE_DATA_SIZE {
                break;
            }

            self.advance_page(of);
            if !of.eof {
                continue;
            }
            if !extend {
                break;
            }
            of.eof = false;

            let existing_nbytes = self.store.page(vda).label.nbytes;
            if usize::from(existing_nbytes) < PAGE_DATA_SIZE {
                let room = PAGE_DATA_SIZE - usize::from(existing_nbytes);
                let grow = room.min(remaining);
                self.store.page_mut(vda).label.nbytes += grow as u16;
                continue;
            }

            let new_vda = match self.store.allocate_page() {
                Some(vda) => vda,
                None => {
                    of.error = Some(Error::DiskFull);
                    break;
                }
            };
            trace!(?vda, ?new_vda, "extending file with a fresh page");

            let cur_rda = self
                .store
                .geometry
                .virtual_to_real(vda)
                .ok_or(Error::VdaOutOfRange(vda))?;
            let new_rda = self
                .store
                .geometry
                .virtual_to_real(new_vda)
                .ok_or(Error::VdaOutOfRange(new_vda))?;

            let (file_pgnum, version, sn) = {
                let cur = self.store.page(vda);
                (cur.label.file_pgnum, cur.label.version, cur.label.sn)
            };

            {
                let newpg = self.store.page_mut(new_vda);
                newpg.label.prev_rda = cur_rda;
                newpg.label.next_rda = Rda::NONE;
                newpg.label.nbytes = remaining.min(PAGE_DATA_SIZE) as u16;
                newpg.label.file_pgnum = file_pgnum + 1;
                newpg.label.version = version;
                newpg.label.sn = sn;
            }
            self.store.page_mut(vda).label.next_rda = new_rda;

            of.pos.vda = new_vda;
            of.pos.pos = 0;
            of.pos.pgnum += 1;
        }

        Ok(offset)
    }

    /// Truncates the file at the cursor, freeing every page beyond it.
    pub fn truncate(&mut self, of: &mut OpenFile) -> Result<()> {
        self.check_of(of)?;
        if of.read_only {
            return Err(Error::ReadOnly);
        }
        if of.eof {
            return Ok(());
        }
        of.modified = true;

        if usize::from(of.pos.pos) >= PAGE_DATA_SIZE {
            self.advance_page(of);
            of.eof = false;
        }

        let vda = of.pos.vda;
        self.store.page_mut(vda).label.nbytes = of.pos.pos;

        let next_rda = self.store.page(vda).label.next_rda;
        self.store.page_mut(vda).label.next_rda = Rda::NONE;
        if !next_rda.is_none() {
            if let Some(next_vda) = self.store.geometry.real_to_virtual(next_rda) {
                self.store.free_chain(next_vda);
            }
        }
        Ok(())
    }

    /// Closes a cursor opened for writing, flushing its leader-page hints
    /// if the file was modified.
    pub fn close(&mut self, mut of: OpenFile) -> Result<()> {
        self.check_of(&of)?;
        if of.modified {
            self.update_leader_page(&of.fe)?;
        }
        of.eof = true;
        Ok(())
    }

    /// Closes a cursor opened for read-only access.
    pub fn close_ro(&self, mut of: OpenFile) -> Result<()> {
        self.check_of(&of)?;
        of.eof = true;
        Ok(())
    }

    /// Determines the length of a file by reading it to the end.
    pub fn file_length(&self, fe: &FileEntry) -> Result<u64> {
        let mut of = self.get_of(fe, true, true)?;
        let mut len = 0u64;
        while !of.eof {
            len += self.skip(&mut of, PAGE_DATA_SIZE)? as u64;
        }
        self.close_ro(of)?;
        Ok(len)
    }
}
