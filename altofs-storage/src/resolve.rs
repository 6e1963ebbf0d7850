//! Name resolution: walking the `<A>B>C` directory-path grammar starting
//! from `SysDir`.

use altofs_types::{FileEntry, NAME_LENGTH};

use crate::error::{Error, Result};
use crate::fs::Filesystem;

/// The result of resolving a name against the directory tree.
#[derive(Debug, Clone)]
pub struct Resolved {
    pub found: bool,
    /// The file, if `found`.
    pub fe: Option<FileEntry>,
    /// The directory the last path segment was (or would be) looked up in.
    pub dir_fe: FileEntry,
    /// The segment name that failed to resolve, or the final segment name
    /// when `found` is `true`.
    pub last_segment: String,
}

impl Filesystem {
    /// Resolves `name`, a `<`/`>`-delimited path rooted (implicitly or
    /// explicitly) at `SysDir`.
    ///
    /// A leading `<` resets the walk back to `SysDir`; each segment is
    /// looked up in turn in the directory resolved so far. Resolution
    /// stops at the first segment that does not exist, returning the
    /// containing directory and the unresolved segment so a caller can
    /// create the file there.
    pub fn resolve_name(&self, name: &str) -> Result<(bool, FileEntry, FileEntry, String)> {
        let resolved = self.resolve(name)?;
        let fe = resolved.fe.unwrap_or(resolved.dir_fe);
        Ok((resolved.found, fe, resolved.dir_fe, resolved.last_segment))
    }

    pub(crate) fn resolve(&self, name: &str) -> Result<Resolved> {
        self.require_checked()?;
        let sysdir_fe = self.sysdir_entry()?;

        let mut cur = sysdir_fe;
        let mut dir = sysdir_fe;

        let mut rest = name;
        loop {
            if rest.is_empty() {
                return Ok(Resolved {
                    found: true,
                    fe: Some(cur),
                    dir_fe: dir,
                    last_segment: String::new(),
                });
            }

            if let Some(stripped) = rest.strip_prefix('<') {
                cur = sysdir_fe;
                dir = sysdir_fe;
                rest = stripped;
                continue;
            }

            let end = rest.find(['<', '>']).unwrap_or(rest.len());
            let segment = &rest[..end];

            // Matches by the search component's length, not full equality:
            // a stored name that is a strict superstring of `segment` still
            // resolves, mirroring `strncmp(de->name, res->name, res->name_length)`.
            let found_fe = self
                .scan_directory(&cur)?
                .filter_map(|e| e.ok())
                .filter(|e| e.kind == altofs_types::DirEntryType::Valid)
                .find(|e| e.name.as_bytes().get(..segment.len()) == Some(segment.as_bytes()))
                .map(|e| e.fe);

            match found_fe {
                Some(fe) => {
                    dir = cur;
                    cur = fe;
                    rest = &rest[end..];
                    if let Some(stripped) = rest.strip_prefix('>') {
                        rest = stripped;
                    }
                }
                None => {
                    return Ok(Resolved {
                        found: false,
                        fe: None,
                        dir_fe: cur,
                        last_segment: segment.to_string(),
                    });
                }
            }
        }
    }

    /// Validates a filename component: no path delimiters, and short
    /// enough to fit the on-disk name field.
    pub(crate) fn validate_name(name: &str) -> Result<()> {
        if name.contains(['<', '>']) {
            return Err(Error::BadPath(name.to_string()));
        }
        if name.len() >= NAME_LENGTH - 1 {
            return Err(Error::BadPath(name.to_string()));
        }
        Ok(())
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_name_rejects_delimiters_and_overlong_names() {
        assert!(Filesystem::validate_name("Foo").is_ok());
        assert!(Filesystem::validate_name("Fo<o").is_err());
        assert!(Filesystem::validate_name(&"x".repeat(NAME_LENGTH)).is_err());
    }
}
