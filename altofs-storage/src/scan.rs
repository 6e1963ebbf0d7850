//! Lazy scanners over files and directory contents.
//!
//! Both scanners are plain, restartable iterators: a caller stops early by
//! simply not pulling any more items (`break`, `.take_while`, `?` on the
//! first `Err`, ...) rather than returning a continue/stop flag from a
//! callback.

use altofs_types::{FileEntry, Vda};

use crate::directory::DirectoryEntry;
use crate::error::{Error, Result};
use crate::fs::Filesystem;
use crate::openfile::OpenFile;

/// Iterates every in-use leader page on the disk, in VDA order.
pub struct FileEntries<'a> {
    fs: &'a Filesystem,
    next_vda: u32,
}

impl<'a> Iterator for FileEntries<'a> {
    type Item = FileEntry;

    fn next(&mut self) -> Option<FileEntry> {
        while (self.next_vda as usize) < self.fs.len() {
            let vda = Vda(self.next_vda as u16);
            self.next_vda += 1;

            let page = self.fs.store.page(vda);
            if !page.label.is_leader() {
                continue;
            }
            if !page.label.is_in_chain() {
                continue;
            }
            return Some(FileEntry {
                sn: page.label.sn,
                version: page.label.version,
                blank: 0,
                leader_vda: vda,
            });
        }
        None
    }
}

/// Iterates the entries of one directory's contents, including missing
/// (deleted) slots.
pub struct DirectoryEntries<'a> {
    fs: &'a Filesystem,
    of: OpenFile,
    done: bool,
}

impl<'a> Iterator for DirectoryEntries<'a> {
    type Item = Result<DirectoryEntry>;

    fn next(&mut self) -> Option<Result<DirectoryEntry>> {
        if self.done {
            return None;
        }
        match self.fs.read_directory_entry(&mut self.of) {
            Ok(Some(entry)) => Some(Ok(entry)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

impl Filesystem {
    /// Iterates every file on the disk (used by integrity checking and by
    /// name resolution's fallback paths).
    pub fn scan_files(&self) -> FileEntries<'_> {
        FileEntries {
            fs: self,
            next_vda: 0,
        }
    }

    /// Iterates the entries of the directory named by `dir_fe`.
    pub fn scan_directory(&self, dir_fe: &FileEntry) -> Result<DirectoryEntries<'_>> {
        self.require_checked()?;
        if !self.check_file_entry(dir_fe) {
            return Err(Error::BadLeaderPage);
        }
        if !dir_fe.sn.is_directory() {
            return Err(Error::Latched("not a directory".into()));
        }
        let of = self.get_of(dir_fe, true, true)?;
        Ok(DirectoryEntries {
            fs: self,
            of,
            done: false,
        })
    }
}
