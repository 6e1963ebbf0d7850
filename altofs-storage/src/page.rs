//! The page store: the filesystem's backing array of fixed-size pages.

use altofs_types::{Geometry, Label, Rda, Vda, PAGE_DATA_SIZE, VERSION_BAD, VERSION_FREE};

/// A page's two-word header, written verbatim ahead of its label on disk.
///
/// `unused` is always zero; `rda` mirrors the page's own real disk address
/// and is re-derived (not read) when loading certain image formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageHeader {
    pub unused: u16,
    pub rda: Rda,
}

/// One page (sector) of the filesystem: header, label, and data.
#[derive(Debug, Clone)]
pub struct Page {
    pub vda: Vda,
    pub header: PageHeader,
    pub label: Label,
    pub data: Box<[u8; PAGE_DATA_SIZE]>,
}

impl Page {
    fn free_at(vda: Vda, rda: Rda) -> Page {
        Page {
            vda,
            header: PageHeader { unused: 0, rda },
            label: Label::FREE,
            data: Box::new([0u8; PAGE_DATA_SIZE]),
        }
    }
}

/// Per-disk-word bitmap of page allocation state, one bit per page.
///
/// Bit numbering matches the original on-disk `DiskDescriptor` bitmap:
/// within word `vda >> 4`, bit `15 - (vda & 15)` is set when the page is
/// allocated.
#[derive(Debug, Clone)]
pub struct Bitmap {
    words: Vec<u16>,
}

impl Bitmap {
    fn idx(vda: Vda) -> usize {
        (vda.0 >> 4) as usize
    }

    fn bit(vda: Vda) -> u16 {
        15 - (vda.0 & 15)
    }

    pub fn new(size: usize) -> Bitmap {
        Bitmap {
            words: vec![0xFFFF; size],
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.words.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn clear_all(&mut self) {
        self.words.fill(0);
    }

    pub fn fill_all(&mut self) {
        self.words.fill(0xFFFF);
    }

    #[must_use]
    pub fn is_allocated(&self, vda: Vda) -> bool {
        self.words[Self::idx(vda)] & (1 << Self::bit(vda)) != 0
    }

    pub fn set_allocated(&mut self, vda: Vda, allocated: bool) {
        let idx = Self::idx(vda);
        let bit = 1u16 << Self::bit(vda);
        if allocated {
            self.words[idx] |= bit;
        } else {
            self.words[idx] &= !bit;
        }
    }

    #[must_use]
    pub fn words(&self) -> &[u16] {
        &self.words
    }

    pub fn words_mut(&mut self) -> &mut [u16] {
        &mut self.words
    }

    /// Finds the first unallocated page, marks it allocated, and returns it.
    ///
    /// Mirrors `find_free_page`'s two-step scan: first the containing word,
    /// then the bit within it.
    pub fn allocate_first_free(&mut self) -> Option<Vda> {
        let idx = self.words.iter().position(|&w| w != 0xFFFF)?;
        let bit = (0..16u16).find(|b| self.words[idx] & (1 << b) == 0)?;
        self.words[idx] |= 1 << bit;
        let raw = ((idx as u32) << 4) + u32::from(15 - bit);
        Some(Vda(u16::try_from(raw).ok()?))
    }
}

/// The in-memory array of pages backing one filesystem, plus its geometry
/// and free-space bookkeeping.
#[derive(Debug, Clone)]
pub struct PageStore {
    pub geometry: Geometry,
    pub pages: Vec<Page>,
    pub bitmap: Bitmap,
    pub free_pages: u16,
}

impl PageStore {
    /// Allocates a fresh, all-free page store for the given geometry.
    pub fn new(geometry: Geometry) -> PageStore {
        let num_pages = geometry.num_pages() as usize;
        let bitmap_size = num_pages.div_ceil(16).max(1);

        let mut pages = Vec::with_capacity(num_pages);
        for raw in 0..num_pages {
            let vda = Vda(u16::try_from(raw).expect("geometry bounds fit in u16"));
            let rda = geometry.virtual_to_real(vda).unwrap_or(Rda::NONE);
            pages.push(Page::free_at(vda, rda));
        }

        PageStore {
            geometry,
            pages,
            bitmap: Bitmap::new(bitmap_size),
            free_pages: 0xFFFF,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.pages.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    #[must_use]
    pub fn page(&self, vda: Vda) -> &Page {
        &self.pages[vda.as_usize()]
    }

    pub fn page_mut(&mut self, vda: Vda) -> &mut Page {
        &mut self.pages[vda.as_usize()]
    }

    #[must_use]
    pub fn contains(&self, vda: Vda) -> bool {
        vda.as_usize() < self.pages.len()
    }

    /// Rebuilds the bitmap, `free_pages`, and returns the maximum serial
    /// number seen among leader pages, from the current page contents.
    ///
    /// This is `update_disk_metadata`/`fs_update_metadata`: the original
    /// kept two copies of this routine in different translation units.
    pub fn rebuild_metadata(&mut self) -> altofs_types::SerialNumber {
        self.bitmap.fill_all();
        self.free_pages = 0;

        let mut last_sn = altofs_types::SerialNumber::ZERO;
        for page in &self.pages {
            if page.label.is_free() {
                self.bitmap.set_allocated(page.vda, false);
                self.free_pages += 1;
                continue;
            }
            if page.label.is_unused() || page.label.is_bad() {
                continue;
            }
            if page.label.is_leader() {
                let key = (page.label.sn.part1(), page.label.sn.word2);
                if key > (last_sn.part1(), last_sn.word2) {
                    last_sn = altofs_types::SerialNumber {
                        word1: page.label.sn.part1(),
                        word2: page.label.sn.word2,
                    };
                }
            }
        }
        last_sn.increment();
        last_sn
    }

    /// Finds and allocates one free page, retrying the scan if the bitmap
    /// and label state have drifted apart (as the original does).
    pub fn allocate_page(&mut self) -> Option<Vda> {
        loop {
            if self.free_pages == 0 {
                return None;
            }
            let vda = match self.bitmap.allocate_first_free() {
                Some(vda) => vda,
                None => {
                    self.rebuild_metadata();
                    continue;
                }
            };
            self.free_pages -= 1;
            if !self.page(vda).label.is_free() {
                self.rebuild_metadata();
                continue;
            }
            return Some(vda);
        }
    }

    /// Frees one page, marking it available again.
    pub fn free_page(&mut self, vda: Vda) {
        self.bitmap.set_allocated(vda, false);
        self.page_mut(vda).label = Label::FREE;
        self.free_pages += 1;
    }

    /// Frees every page reachable by following `next_rda` from `start`.
    pub fn free_chain(&mut self, start: Vda) {
        let mut rda = self.geometry.virtual_to_real(start).unwrap_or(Rda::NONE);
        while let Some(vda) = self.real_to_virtual_nonzero(rda) {
            rda = self.page(vda).label.next_rda;
            self.free_page(vda);
        }
    }

    fn real_to_virtual_nonzero(&self, rda: Rda) -> Option<Vda> {
        if rda.is_none() {
            return None;
        }
        self.geometry.real_to_virtual(rda)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use altofs_types::SerialNumber;

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
    fn fresh_store_has_all_pages_free() {
        let store = PageStore::new(small_geometry());
        assert_eq!(store.len(), 12);
        for page in &store.pages {
            assert!(page.label.is_free());
        }
    }

    #[test]
    fn allocate_then_free_roundtrips_bitmap_state() {
        let mut store = PageStore::new(small_geometry());
        store.free_pages = store.len() as u16;
        store.bitmap.clear_all();

        let vda = store.allocate_page().expect("a free page remains");
        assert!(store.bitmap.is_allocated(vda));
        assert_eq!(store.free_pages, store.len() as u16 - 1);

        store.free_page(vda);
        assert!(!store.bitmap.is_allocated(vda));
        assert_eq!(store.free_pages, store.len() as u16);
        assert!(store.page(vda).label.is_free());
    }

    #[test]
    fn rebuild_metadata_tracks_max_serial_number() {
        let mut store = PageStore::new(small_geometry());
        store.pages[0].label.version = 1;
        store.pages[0].label.file_pgnum = 0;
        store.pages[0].label.sn = SerialNumber { word1: 3, word2: 9 };

        store.pages[1].label.version = 1;
        store.pages[1].label.file_pgnum = 0;
        store.pages[1].label.sn = SerialNumber { word1: 3, word2: 20 };

        let next = store.rebuild_metadata();
        assert_eq!(next.word1, 3);
        assert_eq!(next.word2, 21);
    }
}
