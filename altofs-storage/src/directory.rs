//! Directory entries: the variable-length records that make up a
//! directory file's contents.

use altofs_types::{read_name, write_name, DirEntryType, FileEntry, NAME_LENGTH};

use crate::error::{Error, Result};
use crate::fs::Filesystem;
use crate::openfile::OpenFile;

/// One record in a directory's byte stream.
#[derive(Debug, Clone)]
pub struct DirectoryEntry {
    pub kind: DirEntryType,
    /// Total record length, in 16-bit words, including the header word.
    pub length: u16,
    pub fe: FileEntry,
    pub name: String,
}

const HEADER_WORDS: u16 = 6; // 1 header word + 5 words of FileEntry
const ENTRY_TYPE_SHIFT: u16 = 10;
const ENTRY_LEN_MASK: u16 = 0x3FF;

impl DirectoryEntry {
    pub fn missing(length_words: u16) -> DirectoryEntry {
        DirectoryEntry {
            kind: DirEntryType::Missing,
            length: length_words,
            fe: FileEntry {
                sn: altofs_types::SerialNumber::ZERO,
                version: 0,
                blank: 0,
                leader_vda: altofs_types::Vda(0),
            },
            name: String::new(),
        }
    }

    pub fn valid(fe: FileEntry, name: &str) -> DirectoryEntry {
        DirectoryEntry {
            kind: DirEntryType::Valid,
            length: entry_length_words(name),
            fe,
            name: name.to_string(),
        }
    }

    fn header_word(&self) -> u16 {
        (self.kind.as_u16() << ENTRY_TYPE_SHIFT) | (self.length & ENTRY_LEN_MASK)
    }
}

fn entry_length_words(name: &str) -> u16 {
    let name_bytes = 1 + name.len().min(NAME_LENGTH - 1);
    let padded = name_bytes + (name_bytes % 2);
    HEADER_WORDS + (padded / 2) as u16
}

impl Filesystem {
    /// Reads one directory record from the cursor, or `None` at the end
    /// of the directory's used length.
    pub(crate) fn read_directory_entry(&self, of: &mut OpenFile) -> Result<Option<DirectoryEntry>> {
        let mut header = [0u8; 2];
        let n = self.read_into(of, &mut header)?;
        if n == 0 {
            return Ok(None);
        }
        if n < 2 {
            return Err(Error::BadDirEntry);
        }

        let w = altofs_types::read_word_be(&header, 0);
        let kind = DirEntryType::from_u16(w >> ENTRY_TYPE_SHIFT);
        let length = w & ENTRY_LEN_MASK;
        if length < HEADER_WORDS {
            return Err(Error::BadDirEntry);
        }

        let body_len = 2 * usize::from(length) - 2;
        let mut buf = vec![0u8; body_len];
        let n = self.read_into(of, &mut buf)?;
        if n < body_len {
            return Err(Error::BadDirEntry);
        }

        match kind {
            DirEntryType::Missing => Ok(Some(DirectoryEntry::missing(length))),
            DirEntryType::Valid => {
                let fe = FileEntry::decode(&buf, 0);
                let name = read_name(&buf[10..]);
                Ok(Some(DirectoryEntry {
                    kind,
                    length,
                    fe,
                    name,
                }))
            }
        }
    }

    fn append_directory_entry(&mut self, of: &mut OpenFile, entry: &DirectoryEntry, extend: bool) -> Result<usize> {
        let total_bytes = 2 * usize::from(entry.length);
        let mut buf = vec![0u8; total_bytes];

        if entry.kind == DirEntryType::Valid {
            entry.fe.encode(&mut buf, 2);
            write_name(&mut buf[12..], &entry.name);
        }
        altofs_types::write_word_be(&mut buf, 0, entry.header_word());

        self.write(of, Some(&buf), extend)
    }

    fn append_empty_entries(&mut self, of: &mut OpenFile, mut empty_words: usize) -> Result<()> {
        while empty_words > 0 {
            let length = empty_words.min(100) as u16;
            empty_words -= usize::from(length);
            self.append_directory_entry(of, &DirectoryEntry::missing(length), false)?;
        }
        Ok(())
    }

    /// Rewrites a directory's contents with all live entries packed at the
    /// front, reporting the used and empty lengths (in words).
    pub(crate) fn compress_directory(&mut self, dir_fe: &FileEntry) -> Result<(usize, usize)> {
        let entries: Vec<DirectoryEntry> = self.scan_directory(dir_fe)?.collect::<Result<_>>()?;

        let mut used_words = 0usize;
        let mut empty_words = 0usize;
        let mut of = self.get_of(dir_fe, true, false)?;
        for entry in &entries {
            if entry.kind == DirEntryType::Missing {
                empty_words += usize::from(entry.length);
            } else {
                used_words += usize::from(entry.length);
                self.append_directory_entry(&mut of, entry, false)?;
            }
        }
        if empty_words > 0 {
            self.append_empty_entries(&mut of, empty_words)?;
        }
        Ok((used_words, empty_words))
    }

    /// Adds a directory entry for `fe` under `dir_fe`, compressing first to
    /// reclaim room from missing entries.
    pub(crate) fn add_directory_entry(&mut self, dir_fe: &FileEntry, fe: &FileEntry, name: &str) -> Result<()> {
        let entry = DirectoryEntry::valid(*fe, name);
        let (used_words, empty_words) = self.compress_directory(dir_fe)?;
        if empty_words < usize::from(entry.length) {
            return Err(Error::DirectoryFull);
        }

        let mut of = self.get_of(dir_fe, true, false)?;
        self.skip(&mut of, 2 * used_words)?;

        self.append_directory_entry(&mut of, &entry, false)?;
        let remaining = empty_words - usize::from(entry.length);
        if remaining > 0 {
            self.append_empty_entries(&mut of, remaining)?;
        }
        Ok(())
    }

    /// Creates a second directory entry pointing at an existing file.
    pub(crate) fn link(&mut self, name: &str, fe: FileEntry) -> Result<()> {
        let (found, _existing, dir_fe, base_name) = self.resolve_name(name)?;
        if found {
            return Err(Error::AlreadyExists);
        }
        Self::validate_name(&base_name)?;
        self.add_directory_entry(&dir_fe, &fe, &base_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_length_accounts_for_header_and_file_entry() {
        assert_eq!(entry_length_words(""), HEADER_WORDS + 1);
        assert_eq!(entry_length_words("ab"), HEADER_WORDS + 2);
    }

    #[test]
    fn header_word_packs_type_and_length() {
        let de = DirectoryEntry::valid(
            FileEntry {
                sn: altofs_types::SerialNumber::ZERO,
                version: 1,
                blank: 0,
                leader_vda: altofs_types::Vda(5),
            },
            "Foo",
        );
        let w = de.header_word();
        assert_eq!(w >> ENTRY_TYPE_SHIFT, DirEntryType::Valid.as_u16());
        assert_eq!(w & ENTRY_LEN_MASK, de.length);
    }
}
