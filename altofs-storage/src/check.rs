//! Whole-disk integrity checking: page-link consistency, leader-page
//! classification, directory structure, and the `DiskDescriptor` file's
//! agreement with the live geometry and bitmap.
//!
//! Everything here walks the raw page array directly rather than through
//! the open-file cursor API, since that API depends on `Filesystem::checked`
//! being true -- the very thing this module decides.

use std::collections::HashSet;

use altofs_types::{read_name, read_word_be, DirEntryType, FileEntry, Geometry, Rda, Vda, PAGE_DATA_SIZE};

use crate::error::{Error, Result};
use crate::fs::{Filesystem, DESCR_HEADER_LEN, DESCR_OFF_GEOMETRY};
use crate::page::Bitmap;

/// Accumulates every problem found during a check pass rather than
/// stopping at the first one.
#[derive(Debug, Default)]
pub struct CheckReport {
    pub messages: Vec<String>,
}

impl CheckReport {
    fn fail(&mut self, msg: impl Into<String>) {
        self.messages.push(msg.into());
    }

    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.messages.is_empty()
    }

    #[must_use]
    pub fn violations(&self) -> usize {
        self.messages.len()
    }
}

fn geometry_matches(a: &Geometry, b: &Geometry) -> bool {
    a.num_disks == b.num_disks
        && a.num_cylinders == b.num_cylinders
        && a.num_heads == b.num_heads
        && a.num_sectors == b.num_sectors
}

impl Filesystem {
    /// Follows `next_rda` links directly through the page store, without
    /// trusting `checked`. Stops at the first already-visited page so a
    /// corrupt chain can't loop this walk forever.
    fn raw_chain(&self, leader_vda: Vda) -> Vec<Vda> {
        let mut out = Vec::new();
        let mut seen = HashSet::new();
        out.push(leader_vda);
        seen.insert(leader_vda);

        let mut rda = self.store.page(leader_vda).label.next_rda;
        while !rda.is_none() {
            let Some(vda) = self.store.geometry.real_to_virtual(rda) else {
                break;
            };
            if !self.store.contains(vda) || !seen.insert(vda) {
                break;
            }
            out.push(vda);
            rda = self.store.page(vda).label.next_rda;
        }
        out
    }

    /// Reads a file's body (every page after the leader) into one buffer,
    /// using each page's own `nbytes` rather than assuming full pages.
    fn raw_body(&self, leader_vda: Vda) -> Vec<u8> {
        let chain = self.raw_chain(leader_vda);
        let mut body = Vec::new();
        for &vda in chain.iter().skip(1) {
            let page = self.store.page(vda);
            body.extend_from_slice(&page.data[..usize::from(page.label.nbytes)]);
        }
        body
    }

    /// Checks that every page's `next_rda`/`prev_rda` pair agrees with its
    /// neighbor's own links, and that leader pages carry no `prev_rda`.
    fn check_page_links(&self, report: &mut CheckReport) {
        for page in &self.store.pages {
            if !page.label.is_in_chain() {
                continue;
            }
            if page.label.prev_rda.is_none() {
                if page.label.file_pgnum != 0 {
                    report.fail(format!(
                        "page {} has no prev_rda but claims file_pgnum {}, not 0",
                        page.vda, page.label.file_pgnum
                    ));
                }
            } else if page.label.is_leader() {
                report.fail(format!("leader page {} has a non-null prev_rda", page.vda));
            }
            if page.label.next_rda.is_none() {
                continue;
            }
            match self.store.geometry.real_to_virtual(page.label.next_rda) {
                Some(next_vda) if self.store.contains(next_vda) => {
                    let next = self.store.page(next_vda);
                    let back = self
                        .store
                        .geometry
                        .virtual_to_real(page.vda)
                        .unwrap_or(Rda::NONE);
                    if !next.label.is_in_chain() {
                        report.fail(format!(
                            "page {} links to free or bad page {}",
                            page.vda, next_vda
                        ));
                    } else if next.label.prev_rda != back {
                        report.fail(format!(
                            "page {} and its successor {} disagree about prev_rda",
                            page.vda, next_vda
                        ));
                    }
                }
                _ => report.fail(format!("page {} has an unresolvable next_rda", page.vda)),
            }
        }
    }

    /// Checks `nbytes`/`file_pgnum` bounds on every in-chain page.
    fn check_basic_filesystem_data(&self, report: &mut CheckReport) {
        for page in &self.store.pages {
            if !page.label.is_in_chain() {
                continue;
            }
            if usize::from(page.label.nbytes) > PAGE_DATA_SIZE {
                report.fail(format!(
                    "page {} claims {} bytes, more than a page can hold",
                    page.vda, page.label.nbytes
                ));
            }
            if page.label.is_leader() && page.label.file_pgnum != 0 {
                report.fail(format!(
                    "page {} is file_pgnum 0's leader but claims file_pgnum {}",
                    page.vda, page.label.file_pgnum
                ));
            }
        }
    }

    /// Walks every leader page's chain, marking pages allocated in a fresh
    /// bitmap and checking basic chain sanity.
    ///
    /// The file at `leader_vda == 1` is `SysDir`, which additionally
    /// carries the disk's own geometry as a leader-page property; this
    /// must agree with the geometry actually in effect.
    fn check_files(&self, report: &mut CheckReport) -> Bitmap {
        let mut bitmap = Bitmap::new(self.store.bitmap.len());
        bitmap.clear_all();

        for fe in self.scan_files() {
            let chain = self.raw_chain(fe.leader_vda);
            for (pgnum, &vda) in chain.iter().enumerate() {
                bitmap.set_allocated(vda, true);
                let label = &self.store.page(vda).label;
                if usize::from(label.file_pgnum) != pgnum {
                    report.fail(format!(
                        "page {} has file_pgnum {} but sits at offset {} of its own chain",
                        vda, label.file_pgnum, pgnum
                    ));
                }
                if label.sn.word1 != fe.sn.word1 || label.sn.word2 != fe.sn.word2 {
                    report.fail(format!(
                        "page {} carries a serial number mismatching its leader page",
                        vda
                    ));
                }
            }

            // The duplicated `leader_vda == 1` guard in the original
            // integrity checker is a single check once it's deduplicated.
            if fe.leader_vda == Vda(1) {
                let data = &self.store.page(fe.leader_vda).data;
                let has_matching_geometry = Filesystem::parse_properties(data)
                    .into_iter()
                    .filter(|p| p.kind == 1 && p.data.len() == 10)
                    .any(|p| geometry_matches(&Geometry::decode(&p.data, 0), &self.store.geometry));
                if !has_matching_geometry {
                    report.fail("SysDir's leader page carries no disk-geometry property matching the live geometry");
                }
            }
        }
        bitmap
    }

    /// Recursively walks the directory tree from `SysDir`, confirming every
    /// entry resolves to a page the file scan actually marked allocated.
    /// `seen` guards against a directory cycle sending this into a loop.
    fn check_directory_structure(
        &self,
        dir_fe: &FileEntry,
        bitmap: &Bitmap,
        seen: &mut HashSet<Vda>,
        report: &mut CheckReport,
    ) {
        if !seen.insert(dir_fe.leader_vda) {
            report.fail(format!(
                "directory cycle detected revisiting {}",
                dir_fe.leader_vda
            ));
            return;
        }

        let body = self.raw_body(dir_fe.leader_vda);
        let mut offset = 0usize;
        while offset + 2 <= body.len() {
            let w = read_word_be(&body, offset);
            let kind = DirEntryType::from_u16(w >> 10);
            let length = usize::from(w & 0x3FF);
            if length < 6 {
                report.fail(format!(
                    "directory {} contains a malformed entry",
                    dir_fe.leader_vda
                ));
                break;
            }
            let entry_bytes = 2 * length;
            if offset + entry_bytes > body.len() {
                report.fail(format!(
                    "directory {} has an entry running past the directory's own length",
                    dir_fe.leader_vda
                ));
                break;
            }

            if kind == DirEntryType::Valid {
                let entry_fe = FileEntry::decode(&body, offset + 2);
                let name = read_name(&body[offset + 12..]);
                if !self.store.contains(entry_fe.leader_vda) || !bitmap.is_allocated(entry_fe.leader_vda) {
                    report.fail(format!(
                        "directory {} entry {:?} points at an unallocated page {}",
                        dir_fe.leader_vda, name, entry_fe.leader_vda
                    ));
                } else if entry_fe.sn.is_directory() {
                    self.check_directory_structure(&entry_fe, bitmap, seen, report);
                }
            }
            offset += entry_bytes;
        }
    }

    /// Finds `name` in `dir_fe`'s raw directory body, without going through
    /// [`Filesystem::scan_directory`] (which requires `checked`).
    fn find_entry_raw(&self, dir_fe: &FileEntry, name: &str) -> Option<FileEntry> {
        let body = self.raw_body(dir_fe.leader_vda);
        let mut offset = 0usize;
        while offset + 2 <= body.len() {
            let w = read_word_be(&body, offset);
            let kind = DirEntryType::from_u16(w >> 10);
            let length = usize::from(w & 0x3FF);
            if length < 6 || offset + 2 * length > body.len() {
                break;
            }
            if kind == DirEntryType::Valid && read_name(&body[offset + 12..]) == name {
                return Some(FileEntry::decode(&body, offset + 2));
            }
            offset += 2 * length;
        }
        None
    }

    /// Reads and validates the `DiskDescriptor` file: its geometry must
    /// match the live geometry, and its bitmap must match the one computed
    /// by [`Filesystem::check_files`].
    fn check_disk_descriptor(&self, sysdir_fe: &FileEntry, bitmap: &Bitmap, report: &mut CheckReport) {
        let Some(descriptor_fe) = self.find_entry_raw(sysdir_fe, "DiskDescriptor") else {
            report.fail("no DiskDescriptor file found in SysDir");
            return;
        };

        let dd = self.raw_body(descriptor_fe.leader_vda);
        if dd.len() < DESCR_HEADER_LEN {
            report.fail("DiskDescriptor is too short to hold its header");
            return;
        }

        let descriptor_geometry = Geometry::decode(&dd, DESCR_OFF_GEOMETRY);
        if !geometry_matches(&descriptor_geometry, &self.store.geometry) {
            report.fail("DiskDescriptor's geometry disagrees with the live disk geometry");
        }

        let bitmap_bytes = &dd[DESCR_HEADER_LEN..];
        for (i, &w) in bitmap.words().iter().enumerate() {
            let off = 2 * i;
            if off + 2 > bitmap_bytes.len() {
                report.fail("DiskDescriptor's bitmap is shorter than the live page count");
                break;
            }
            let stored = read_word_be(bitmap_bytes, off);
            if stored != w {
                report.fail(format!(
                    "DiskDescriptor bitmap word {} disagrees with the pages actually in use",
                    i
                ));
            }
        }
    }

    /// Runs every check in turn and, if all pass, rebuilds the bitmap and
    /// serial-number counter and marks the filesystem checked.
    ///
    /// On any failure the filesystem is left unchecked, so every gated
    /// operation keeps refusing until the caller repairs the disk (or loads
    /// a different one) and checks again.
    pub fn check_integrity(&mut self) -> Result<CheckReport> {
        let mut report = CheckReport::default();

        self.check_page_links(&mut report);
        self.check_basic_filesystem_data(&mut report);
        let bitmap = self.check_files(&mut report);

        if self.store.len() > 1 {
            let sysdir_fe = self.file_entry_at(Vda(1))?;
            if !sysdir_fe.sn.is_directory() {
                report.fail("SysDir's leader page is not marked as a directory");
            } else {
                let mut seen = HashSet::new();
                self.check_directory_structure(&sysdir_fe, &bitmap, &mut seen, &mut report);
                self.check_disk_descriptor(&sysdir_fe, &bitmap, &mut report);
            }
        }

        if report.is_clean() {
            self.last_sn = self.store.rebuild_metadata();
            self.checked = true;
        } else {
            self.checked = false;
        }

        Ok(report)
    }

    /// Like [`Filesystem::check_integrity`], but turns any violation into
    /// an error instead of returning a report for the caller to inspect.
    pub fn check_integrity_strict(&mut self) -> Result<()> {
        let report = self.check_integrity()?;
        if report.is_clean() {
            Ok(())
        } else {
            Err(Error::IntegrityViolations(report.violations()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use altofs_types::SerialNumber;
    use crate::page::PageStore;

    fn small_geometry() -> Geometry {
        Geometry {
            num_disks: 1,
            num_cylinders: 2,
            num_heads: 2,
            num_sectors: 3,
            sector_words: 190,
        }
    }

    #[test]
    fn check_page_links_flags_a_forged_non_leader_page_with_no_prev_rda() {
        let mut store = PageStore::new(small_geometry());
        // A page claiming to be the second page of a chain (file_pgnum=1)
        // but carrying no prev_rda at all: it is reachable by nothing and
        // should be flagged even though it was never classified a leader.
        let vda = Vda(3);
        let page = store.page_mut(vda);
        page.label.version = 1;
        page.label.file_pgnum = 1;
        page.label.sn = SerialNumber { word1: 1, word2: 1 };
        page.label.nbytes = 0;
        page.label.prev_rda = Rda::NONE;
        page.label.next_rda = Rda::NONE;

        let fs = Filesystem {
            store,
            last_sn: SerialNumber::ZERO,
            checked: false,
        };

        let mut report = CheckReport::default();
        fs.check_page_links(&mut report);
        assert!(!report.is_clean());
        assert!(report.messages.iter().any(|m| m.contains("file_pgnum 1, not 0")));
    }

    #[test]
    fn check_page_links_accepts_a_proper_leader_page() {
        let mut store = PageStore::new(small_geometry());
        let vda = Vda(3);
        let page = store.page_mut(vda);
        page.label.version = 1;
        page.label.file_pgnum = 0;
        page.label.sn = SerialNumber { word1: 1, word2: 1 };
        page.label.nbytes = 512;
        page.label.prev_rda = Rda::NONE;
        page.label.next_rda = Rda::NONE;

        let fs = Filesystem {
            store,
            last_sn: SerialNumber::ZERO,
            checked: false,
        };

        let mut report = CheckReport::default();
        fs.check_page_links(&mut report);
        assert!(report.is_clean());
    }
}
