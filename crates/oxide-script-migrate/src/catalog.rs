//! Migration file discovery.
//!
//! A migration folder is flat. Each logical migration is a pair of files
//! sharing a base name, e.g. `001_users_up.sql` and `001_users_down.sql`
//! (`001_users.up.sql` is accepted too). The base name is the display name
//! recorded in the tracking table; its leading numeric segments form the
//! sequence key that orders the catalog.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::entity::MAX_NAME_LEN;
use crate::error::{Direction, MigrateError, Result};

/// Ordering key derived from a migration file name.
///
/// Keys compare naturally: runs of digits compare by numeric value, other
/// characters compare lexically. `9` sorts before `10`, and `001` equals `1`.
#[derive(Debug, Clone)]
pub struct SequenceKey(String);

impl SequenceKey {
    /// Extracts the key from a base name: its leading `_`-separated segments
    /// made only of digits, with `.` allowed after the first digit
    /// (`20160630_020000.000000`).
    #[must_use]
    pub fn from_base_name(base: &str) -> Option<Self> {
        let segments: Vec<&str> = base
            .split('_')
            .take_while(|s| is_key_segment(s))
            .collect();
        if segments.is_empty() {
            None
        } else {
            Some(Self(segments.join("_")))
        }
    }

    /// Returns the key text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn is_key_segment(segment: &str) -> bool {
    segment.starts_with(|c: char| c.is_ascii_digit())
        && segment.chars().all(|c| c.is_ascii_digit() || c == '.')
}

impl fmt::Display for SequenceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Ord for SequenceKey {
    fn cmp(&self, other: &Self) -> Ordering {
        let mut left = Chunks(&self.0);
        let mut right = Chunks(&other.0);
        loop {
            match (left.next(), right.next()) {
                (None, None) => return Ordering::Equal,
                (None, Some(_)) => return Ordering::Less,
                (Some(_), None) => return Ordering::Greater,
                (Some(a), Some(b)) => {
                    let ord = compare_chunks(a, b);
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
            }
        }
    }
}

impl PartialOrd for SequenceKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for SequenceKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for SequenceKey {}

/// Splits a key into alternating digit and non-digit runs.
struct Chunks<'a>(&'a str);

impl<'a> Iterator for Chunks<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<&'a str> {
        let first = self.0.chars().next()?;
        let digits = first.is_ascii_digit();
        let end = self
            .0
            .find(|c: char| c.is_ascii_digit() != digits)
            .unwrap_or(self.0.len());
        let (chunk, rest) = self.0.split_at(end);
        self.0 = rest;
        Some(chunk)
    }
}

fn compare_chunks(a: &str, b: &str) -> Ordering {
    let numeric = |s: &str| s.starts_with(|c: char| c.is_ascii_digit());
    if numeric(a) && numeric(b) {
        // Compare by magnitude without parsing, so long timestamps never overflow.
        let a = a.trim_start_matches('0');
        let b = b.trim_start_matches('0');
        a.len().cmp(&b.len()).then_with(|| a.cmp(b))
    } else {
        a.cmp(b)
    }
}

/// One logical migration discovered on disk.
#[derive(Debug, Clone)]
pub struct MigrationFile {
    /// Ordering key.
    pub key: SequenceKey,
    /// Display name, shared by both halves.
    pub name: String,
    /// Path to the up script.
    pub up: PathBuf,
    /// Path to the down script, if present.
    pub down: Option<PathBuf>,
}

impl MigrationFile {
    /// Returns the script path for `direction`.
    ///
    /// # Errors
    ///
    /// Returns [`MigrateError::MissingDownScript`] when rolling back a
    /// migration that has no down half.
    pub fn path(&self, direction: Direction) -> Result<&Path> {
        match direction {
            Direction::Up => Ok(&self.up),
            Direction::Down => self
                .down
                .as_deref()
                .ok_or_else(|| MigrateError::MissingDownScript(self.name.clone())),
        }
    }

    /// Reads the script for `direction`.
    ///
    /// # Errors
    ///
    /// Returns an error if the half is missing or cannot be read.
    pub async fn script(&self, direction: Direction) -> Result<String> {
        let path = self.path(direction)?;
        Ok(tokio::fs::read_to_string(path).await?)
    }
}

/// Parsed parts of one file name.
struct FileName {
    base: String,
    direction: Direction,
}

fn parse_file_name(path: &Path, extension: &str) -> Result<Option<FileName>> {
    let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
        return Ok(None);
    };
    let Some(stem) = file_name.strip_suffix(extension) else {
        return Ok(None);
    };

    let invalid = |message: &str| MigrateError::InvalidFileName {
        path: path.to_path_buf(),
        message: message.to_string(),
    };

    let (base, direction) = if let Some(base) = stem
        .strip_suffix("_up")
        .or_else(|| stem.strip_suffix(".up"))
    {
        (base, Direction::Up)
    } else if let Some(base) = stem
        .strip_suffix("_down")
        .or_else(|| stem.strip_suffix(".down"))
    {
        (base, Direction::Down)
    } else {
        return Err(invalid("expected an _up or _down suffix"));
    };

    if base.is_empty() {
        return Err(invalid("missing base name"));
    }
    if base.len() > MAX_NAME_LEN {
        return Err(invalid("base name is longer than the tracking table allows"));
    }

    Ok(Some(FileName {
        base: base.to_string(),
        direction,
    }))
}

#[derive(Default)]
struct Halves {
    up: Option<PathBuf>,
    down: Option<PathBuf>,
}

/// The ordered set of migrations in one folder.
#[derive(Debug, Clone)]
pub struct Catalog {
    dir: PathBuf,
    files: Vec<MigrationFile>,
}

impl Catalog {
    /// Scans `dir` for scripts ending in `extension`.
    ///
    /// # Errors
    ///
    /// Returns an error if the folder is missing or unreadable, a script is
    /// misnamed, a down script has no up script, or two migrations share a
    /// sequence key.
    pub fn load(dir: impl Into<PathBuf>, extension: &str) -> Result<Self> {
        let dir = dir.into();
        if !dir.is_dir() {
            return Err(MigrateError::MigrationsDirNotFound(dir));
        }

        let mut paths = Vec::new();
        for entry in std::fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.is_file() {
                paths.push(path);
            }
        }
        paths.sort();

        let mut halves: BTreeMap<String, Halves> = BTreeMap::new();
        for path in paths {
            let Some(parsed) = parse_file_name(&path, extension)? else {
                continue;
            };
            let pair = halves.entry(parsed.base.clone()).or_default();
            let slot = match parsed.direction {
                Direction::Up => &mut pair.up,
                Direction::Down => &mut pair.down,
            };
            if let Some(existing) = slot.take() {
                return Err(MigrateError::DuplicateSequenceKey {
                    key: parsed.base,
                    first: existing,
                    second: path,
                });
            }
            *slot = Some(path);
        }

        let mut files = Vec::with_capacity(halves.len());
        for (base, pair) in halves {
            let Some(up) = pair.up else {
                // A pair always has at least one half.
                let down = pair.down.unwrap_or_default();
                return Err(MigrateError::OrphanDownScript(down));
            };
            let key = SequenceKey::from_base_name(&base).ok_or_else(|| {
                MigrateError::InvalidFileName {
                    path: up.clone(),
                    message: "name must start with a numeric sequence key".to_string(),
                }
            })?;
            files.push(MigrationFile {
                key,
                name: base,
                up,
                down: pair.down,
            });
        }

        files.sort_by(|a, b| a.key.cmp(&b.key).then_with(|| a.name.cmp(&b.name)));
        if let Some(pair) = files.windows(2).find(|w| w[0].key == w[1].key) {
            return Err(MigrateError::DuplicateSequenceKey {
                key: pair[1].key.to_string(),
                first: pair[0].up.clone(),
                second: pair[1].up.clone(),
            });
        }

        debug!(dir = %dir.display(), count = files.len(), "Loaded migration catalog");
        Ok(Self { dir, files })
    }

    /// Returns the folder this catalog was loaded from.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Returns the migrations in ascending sequence order.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &MigrationFile> {
        self.files.iter()
    }

    /// Returns the number of migrations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Returns whether the catalog is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Returns the position of `name` in sequence order.
    #[must_use]
    pub fn position(&self, name: &str) -> Option<usize> {
        self.files.iter().position(|f| f.name == name)
    }

    /// Returns the migration at `index` in sequence order.
    #[must_use]
    pub fn at(&self, index: usize) -> Option<&MigrationFile> {
        self.files.get(index)
    }

    /// Returns the migration called `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&MigrationFile> {
        self.files.iter().find(|f| f.name == name)
    }

    /// Returns the migrations in `range` of sequence positions.
    #[must_use]
    pub fn slice(&self, range: std::ops::Range<usize>) -> &[MigrationFile] {
        &self.files[range]
    }
}
