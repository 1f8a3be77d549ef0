//! This implementation of the ResourceStore trait relies on the filesystem for storage.
//!
//! Each resource is a file at `<base>/<scope>/<name>`, with the name percent-encoded so that
//! any name maps to exactly one path component.  Names whose encoding wouldn't fit in a file
//! name are stored under `~` followed by the hex SHA-256 of the name instead; `~` is always
//! encoded, so the two forms can't collide.
//!
//! The file starts with two header lines: the resource's last-modified time in milliseconds,
//! and the encoded name.  The value's bytes follow, so a probe only has to read the header.  The
//! name line is how a listing recovers hashed names, and how a load confirms it found the right
//! resource.
//!
//! Writes go to a temporary file in the same directory which is then renamed over the resource,
//! so readers see either the old or the new version, never a mix.  Temporary files carry a '.'
//! in their name, which the encoding never produces, so listings can tell them apart.

use log::{debug, error, trace};
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use sha2::{Digest, Sha256};
use snafu::{ensure, OptionExt, ResultExt};
use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use walkdir::WalkDir;

use super::{check_expected, error, ResourceId, ResourceStore, Result, StampClock, VersionStamp};

const TEMP_FILE_SUFFIX: &str = ".tmp";

/// Longest file name the common Linux filesystems allow.
const MAX_FILE_NAME_LENGTH: usize = 255;

const HASHED_NAME_PREFIX: char = '~';

// This describes the set of characters we encode when making the filesystem path for a given
// resource.  Any non-ASCII characters, plus these ones, will be encoded.  We start off very
// strict (anything not alphanumeric) and remove characters we'll allow.  '.' stays encoded so
// names like ".." can't mean anything to the filesystem.
const ENCODE_CHARACTERS: &AsciiSet = &NON_ALPHANUMERIC.remove(b'_').remove(b'-');

#[derive(Debug)]
pub struct FilesystemResourceStore {
    base_path: PathBuf,
    clock: StampClock,
    // Held for the whole compare-and-swap of a save or delete.
    write_lock: Mutex<()>,
}

impl FilesystemResourceStore {
    pub fn new<P: AsRef<Path>>(base_path: P) -> FilesystemResourceStore {
        FilesystemResourceStore {
            base_path: base_path.as_ref().to_path_buf(),
            clock: StampClock::new(),
            write_lock: Mutex::new(()),
        }
    }

    /// Returns the filesystem path of the directory holding a scope.
    fn scope_path<S: AsRef<str>>(&self, scope: S) -> PathBuf {
        self.base_path.join(encode_path_component(scope))
    }

    /// Returns the filesystem path of the file holding a resource.
    fn resource_path(&self, id: &ResourceId) -> Result<PathBuf> {
        let path = self
            .scope_path(id.scope())
            .join(resource_file_name(id.name()));

        // Confirm no path traversal outside of base
        ensure!(
            path != self.base_path && path.starts_with(&self.base_path),
            error::PathTraversalSnafu { id: id.to_string() }
        );

        Ok(path)
    }

    /// Deletes the given resource file.  Also removes the scope directory if it's now empty, so
    /// as to have consistent artifacts on the filesystem after adding and removing resources.
    ///
    /// If we fail to remove an empty directory, we log an error, but still return Ok.  (The
    /// error for trying to remove a non-empty directory is not specific, and we don't want to
    /// rely on platform-specific error codes or the error description.)
    fn delete_resource_path(&self, path: &Path) -> Result<bool> {
        let existed = match fs::remove_file(path) {
            Ok(()) => true,
            Err(e) if e.kind() == io::ErrorKind::NotFound => false,
            Err(e) => return Err(e).context(error::DeleteResourceSnafu { path }),
        };

        if let Some(parent) = path.parent() {
            if parent != self.base_path {
                if let Err(e) = fs::remove_dir(parent) {
                    // "Directory not empty" doesn't have its own stable ErrorKind, so we check
                    // the errno; other resources in the scope are the normal case.
                    if e.kind() != io::ErrorKind::NotFound && e.raw_os_error() != Some(39) {
                        error!(
                            "Failed to delete directory '{}' we believe is empty: {}",
                            parent.display(),
                            e
                        );
                    }
                }
            }
        }
        Ok(existed)
    }
}

// Filesystem helpers

/// Encodes a string so that it's safe to use as a filesystem path component.
fn encode_path_component<S: AsRef<str>>(segment: S) -> String {
    let encoded = utf8_percent_encode(segment.as_ref(), ENCODE_CHARACTERS);
    encoded.to_string()
}

/// Returns the name of the file holding the named resource.  Room is left for the temporary
/// file suffix, since writes go through a temporary file next to the real one.
fn resource_file_name(name: &str) -> String {
    let encoded = encode_path_component(name);
    if encoded.len() + TEMP_FILE_SUFFIX.len() <= MAX_FILE_NAME_LENGTH {
        return encoded;
    }
    let digest = hex::encode(Sha256::digest(name.as_bytes()));
    trace!("Name of {} bytes stored as hash {}", name.len(), digest);
    format!("{}{}", HASHED_NAME_PREFIX, digest)
}

/// Decodes a path component, removing the encoding that's applied to make it filesystem-safe.
fn decode_path_component<S, P>(segment: S, path: P) -> Result<String>
where
    S: AsRef<str>,
    P: AsRef<Path>,
{
    let segment = segment.as_ref();

    percent_decode_str(segment)
        .decode_utf8()
        .map(|cow| cow.into_owned())
        // decode_utf8 will only fail if someone messed with the filesystem contents directly
        // and created a filename that contains percent-encoded bytes that are invalid UTF-8.
        .ok()
        .context(error::CorruptionSnafu {
            path: path.as_ref(),
            msg: format!("invalid UTF-8 in encoded segment '{}'", segment),
        })
}

/// Opens a resource file for reading.  Returns Ok(None) if the file doesn't exist rather than
/// erroring.
fn open_resource(id: &ResourceId, path: &Path) -> Result<Option<BufReader<File>>> {
    match File::open(path) {
        Ok(f) => Ok(Some(BufReader::new(f))),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e).context(error::ResourceReadSnafu { id: id.to_string() }),
    }
}

/// Reads one header line, without its newline.
fn read_header_line<R: BufRead>(path: &Path, reader: &mut R, what: &str) -> Result<String> {
    let mut line = String::new();
    reader
        .read_line(&mut line)
        .context(error::IoSnafu { path })?;
    match line.strip_suffix('\n') {
        Some(line) => Ok(line.to_string()),
        None => error::CorruptionSnafu {
            path,
            msg: format!("missing {} header", what),
        }
        .fail(),
    }
}

/// Reads the header lines of a resource file and returns the stamp and name they record.
fn read_header<R: BufRead>(path: &Path, reader: &mut R) -> Result<(VersionStamp, String)> {
    let stamp_line = read_header_line(path, reader, "stamp")?;
    let millis = stamp_line
        .parse::<i64>()
        .ok()
        .context(error::CorruptionSnafu {
            path,
            msg: format!("invalid stamp header '{}'", stamp_line.escape_debug()),
        })?;

    let name_line = read_header_line(path, reader, "name")?;
    let name = decode_path_component(&name_line, path)?;
    Ok((VersionStamp::from_millis(millis), name))
}

/// Reads the header of the file holding `id`, checking that it's the resource we asked for.
fn read_resource_header<R: BufRead>(
    id: &ResourceId,
    path: &Path,
    reader: &mut R,
) -> Result<VersionStamp> {
    let (stamp, name) = read_header(path, reader)?;
    ensure!(
        name == id.name(),
        error::CorruptionSnafu {
            path,
            msg: format!("file holds '{}' rather than '{}'", name, id.name()),
        }
    );
    Ok(stamp)
}

/// Writes a resource file through a temporary file and a rename, making the scope directory
/// beforehand if needed.
fn write_resource_file(
    id: &ResourceId,
    path: &Path,
    stamp: &VersionStamp,
    value: &[u8],
) -> Result<()> {
    let dirname = path.parent().with_context(|| error::InternalSnafu {
        msg: format!("Given path to write without a scope: {}", path.display()),
    })?;
    fs::create_dir_all(dirname).context(error::IoSnafu { path: dirname })?;

    let mut temp_name = path.as_os_str().to_os_string();
    temp_name.push(TEMP_FILE_SUFFIX);
    let temp_path = PathBuf::from(temp_name);

    let encoded_name = encode_path_component(id.name());
    let mut contents = Vec::with_capacity(value.len() + encoded_name.len() + 16);
    contents.extend_from_slice(stamp.last_modified_ms().to_string().as_bytes());
    contents.push(b'\n');
    contents.extend_from_slice(encoded_name.as_bytes());
    contents.push(b'\n');
    contents.extend_from_slice(value);

    fs::write(&temp_path, &contents).context(error::IoSnafu { path: &temp_path })?;
    fs::rename(&temp_path, path).context(error::IoSnafu { path })
}

impl ResourceStore for FilesystemResourceStore {
    fn probe_stamp(&self, id: &ResourceId) -> Result<Option<VersionStamp>> {
        let path = self.resource_path(id)?;
        match open_resource(id, &path)? {
            Some(mut reader) => Ok(Some(read_resource_header(id, &path, &mut reader)?)),
            None => Ok(None),
        }
    }

    fn load(&self, id: &ResourceId) -> Result<Option<(Vec<u8>, VersionStamp)>> {
        let path = self.resource_path(id)?;
        let mut reader = match open_resource(id, &path)? {
            Some(reader) => reader,
            None => return Ok(None),
        };

        let stamp = read_resource_header(id, &path, &mut reader)?;
        let mut value = Vec::new();
        reader
            .read_to_end(&mut value)
            .context(error::ResourceReadSnafu { id: id.to_string() })?;
        trace!("Loaded {} bytes of {} at {}", value.len(), id, stamp);
        Ok(Some((value, stamp)))
    }

    fn save(
        &self,
        id: &ResourceId,
        value: &[u8],
        expected: Option<&VersionStamp>,
    ) -> Result<VersionStamp> {
        let path = self.resource_path(id)?;
        let _guard = self.write_lock.lock().ok().context(error::StoreLockSnafu)?;

        let current = self.probe_stamp(id)?;
        check_expected(id, expected, current.as_ref())?;

        let stamp = self.clock.next_after(current.as_ref());
        debug!("Writing {} at {}", id, stamp);
        write_resource_file(id, &path, &stamp, value)?;
        Ok(stamp)
    }

    fn delete(&self, id: &ResourceId, expected: Option<&VersionStamp>) -> Result<bool> {
        let path = self.resource_path(id)?;
        let _guard = self.write_lock.lock().ok().context(error::StoreLockSnafu)?;

        if expected.is_some() {
            let current = self.probe_stamp(id)?;
            check_expected(id, expected, current.as_ref())?;
        }
        debug!("Removing {}", id);
        self.delete_resource_path(&path)
    }

    /// We store a scope as a directory of resource files, so to list it we list the names of
    /// the files, skipping any temporary files left by an interrupted write.
    fn list(&self, scope: &str) -> Result<BTreeSet<ResourceId>> {
        let scope_path = self.scope_path(scope);
        let walker = WalkDir::new(&scope_path)
            .min_depth(1)
            .max_depth(1)
            .follow_links(false); // shouldn't be links...

        let mut ids = BTreeSet::new();
        trace!(
            "Starting walk of filesystem to list resources under {}",
            scope_path.display()
        );

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    if let Some(io_error) = e.io_error() {
                        // If there's no scope directory, nothing was ever stored there.
                        if io_error.kind() == io::ErrorKind::NotFound {
                            break;
                        }
                    }
                    return Err(e).context(error::ListResourcesSnafu);
                }
            };

            if !entry.file_type().is_file() {
                trace!("Skipping non-file entry: {}", entry.path().display());
                continue;
            }

            // The file name should be valid UTF-8, encoded by encode_path_component, or the
            // store has been corrupted.
            let file_name = entry.file_name().to_str().context(error::CorruptionSnafu {
                msg: "Non-UTF8 path",
                path: entry.path(),
            })?;
            if file_name.contains('.') {
                trace!("Skipping temporary file: {}", entry.path().display());
                continue;
            }

            let name = if file_name.starts_with(HASHED_NAME_PREFIX) {
                let file = File::open(entry.path()).context(error::IoSnafu {
                    path: entry.path(),
                })?;
                let (_, name) = read_header(entry.path(), &mut BufReader::new(file))?;
                name
            } else {
                decode_path_component(file_name, entry.path())?
            };
            ids.insert(ResourceId::new(scope, name)?);
        }

        Ok(ids)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::Error;
    use maplit::btreeset;

    #[test]
    fn resource_path() {
        let f = FilesystemResourceStore::new("/base");
        let id = ResourceId::new("au-state", "plugin&base_url~x").unwrap();
        assert_eq!(
            f.resource_path(&id).unwrap().into_os_string(),
            "/base/au-state/plugin%26base_url%7Ex"
        );

        let dots = ResourceId::new("config", "..").unwrap();
        assert_eq!(
            f.resource_path(&dots).unwrap().into_os_string(),
            "/base/config/%2E%2E"
        );
    }

    #[test]
    fn encode_path_component_works() {
        assert_eq!(encode_path_component("a-b_42"), "a-b_42");
        assert_eq!(encode_path_component("a.b"), "a%2Eb");
        assert_eq!(encode_path_component("a/b"), "a%2Fb");
        assert_eq!(encode_path_component("a b%c<d>e"), "a%20b%25c%3Cd%3Ee");
    }

    #[test]
    fn decode_path_component_works() {
        assert_eq!(decode_path_component("a-b_42", "").unwrap(), "a-b_42");
        assert_eq!(decode_path_component("a%2Eb", "").unwrap(), "a.b");
        assert_eq!(
            decode_path_component("a%20b%25c%3Cd%3Ee", "").unwrap(),
            "a b%c<d>e"
        );

        // Invalid UTF-8
        decode_path_component("%C3%28", "").unwrap_err();
    }

    #[test]
    fn save_probe_load_delete() {
        let dir = tempfile::tempdir().unwrap();
        let f = FilesystemResourceStore::new(dir.path());
        let id = ResourceId::new("config", "expert").unwrap();
        assert_eq!(f.probe_stamp(&id).unwrap(), None);

        // Values keep their exact bytes, including newlines.
        let value = b"<lockss-config>\n</lockss-config>\n";
        let stamp = f.save(&id, value, None).unwrap();
        assert_eq!(f.probe_stamp(&id).unwrap(), Some(stamp.clone()));
        assert_eq!(f.load(&id).unwrap(), Some((value.to_vec(), stamp.clone())));

        let second = f.save(&id, b"", Some(&stamp)).unwrap();
        assert!(second.last_modified_ms() > stamp.last_modified_ms());
        assert_eq!(f.load(&id).unwrap(), Some((Vec::new(), second.clone())));

        assert!(f.delete(&id, Some(&second)).unwrap());
        assert_eq!(f.load(&id).unwrap(), None);
        assert!(!dir.path().join("config").exists());
        assert!(!f.delete(&id, None).unwrap());
    }

    #[test]
    fn stale_save_leaves_file_alone() {
        let dir = tempfile::tempdir().unwrap();
        let f = FilesystemResourceStore::new(dir.path());
        let id = ResourceId::new("config", "expert").unwrap();
        let stamp = f.save(&id, b"one", None).unwrap();

        let stale = VersionStamp::from_millis(stamp.last_modified_ms() - 10);
        assert!(matches!(
            f.save(&id, b"two", Some(&stale)),
            Err(Error::Conflict { .. })
        ));
        assert_eq!(f.load(&id).unwrap(), Some((b"one".to_vec(), stamp)));
    }

    #[test]
    fn stamps_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let id = ResourceId::new("config", "expert").unwrap();
        let stamp = FilesystemResourceStore::new(dir.path())
            .save(&id, b"one", None)
            .unwrap();

        let reopened = FilesystemResourceStore::new(dir.path());
        assert_eq!(reopened.probe_stamp(&id).unwrap(), Some(stamp.clone()));
        let next = reopened.save(&id, b"two", Some(&stamp)).unwrap();
        assert!(next.last_modified_ms() > stamp.last_modified_ms());
    }

    #[test]
    fn list_skips_temporary_files() {
        let dir = tempfile::tempdir().unwrap();
        let f = FilesystemResourceStore::new(dir.path());
        let a = ResourceId::new("au-config", "p&a").unwrap();
        let b = ResourceId::new("au-config", "p&b").unwrap();
        f.save(&a, b"{}", None).unwrap();
        f.save(&b, b"{}", None).unwrap();
        fs::write(dir.path().join("au-config").join("p%26c.tmp"), b"junk").unwrap();

        assert_eq!(f.list("au-config").unwrap(), btreeset!(a, b));
        assert!(f.list("au-state").unwrap().is_empty());
    }

    #[test]
    fn long_names_stored_under_hash() {
        let dir = tempfile::tempdir().unwrap();
        let f = FilesystemResourceStore::new(dir.path());
        // Every '%', '|', '&', and '~' triples in length once encoded.
        let mut name = "org|lockss|plugin|TestPlugin&base_url~".to_string();
        while name.len() < 210 {
            name.push_str("http%3A%2F%2F");
        }
        let long = ResourceId::new("au-state", &name).unwrap();
        let short = ResourceId::new("au-state", "p&a").unwrap();

        let stamp = f.save(&long, b"{}", None).unwrap();
        f.save(&short, b"{}", None).unwrap();
        assert_eq!(f.probe_stamp(&long).unwrap(), Some(stamp.clone()));
        assert_eq!(f.load(&long).unwrap(), Some((b"{}".to_vec(), stamp.clone())));

        let path = f.resource_path(&long).unwrap();
        let file_name = path.file_name().unwrap().to_str().unwrap();
        assert!(file_name.starts_with(HASHED_NAME_PREFIX));
        assert_eq!(file_name.len(), 65);

        assert_eq!(f.list("au-state").unwrap(), btreeset!(long.clone(), short));

        let next = f.save(&long, b"{\"a\":1}", Some(&stamp)).unwrap();
        assert!(f.delete(&long, Some(&next)).unwrap());
        assert_eq!(f.probe_stamp(&long).unwrap(), None);
    }

    #[test]
    fn header_names_the_resource() {
        let dir = tempfile::tempdir().unwrap();
        let f = FilesystemResourceStore::new(dir.path());
        let a = ResourceId::new("config", "expert").unwrap();
        let b = ResourceId::new("config", "cluster").unwrap();
        f.save(&a, b"one", None).unwrap();

        // A file moved under another resource's name is noticed rather than served.
        fs::copy(
            f.resource_path(&a).unwrap(),
            f.resource_path(&b).unwrap(),
        )
        .unwrap();
        assert!(matches!(f.load(&b), Err(Error::Corruption { .. })));
    }

    #[test]
    fn corrupt_header() {
        let dir = tempfile::tempdir().unwrap();
        let f = FilesystemResourceStore::new(dir.path());
        fs::create_dir_all(dir.path().join("config")).unwrap();
        fs::write(dir.path().join("config").join("expert"), b"not a stamp\n").unwrap();

        let id = ResourceId::new("config", "expert").unwrap();
        assert!(matches!(f.probe_stamp(&id), Err(Error::Corruption { .. })));
    }
}
