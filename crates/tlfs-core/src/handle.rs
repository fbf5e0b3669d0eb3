//! Folder names and their canonical form.
//!
//! A folder is named by its members:
//!
//! ```text
//! name    := writers [ "#" readers ] [ "@public" ]
//! writers := member { "," member }
//! readers := member { "," member }
//! ```
//!
//! Parsing resolves every member through a [`MemberResolver`], deduplicates
//! and sorts both lists and drops readers that are already writers. The
//! result renders back to a single canonical string; any requested name whose
//! canonical string differs from itself is an alias for that canonical name.

use crate::error::HandleError;
use std::collections::BTreeSet;
use std::fmt;

/// Separates the writer list from the reader list.
pub const READER_SEPARATOR: char = '#';

/// Separates members within a list.
pub const MEMBER_SEPARATOR: char = ',';

/// Suffix requesting the public subtree of a folder.
pub const PUBLIC_SUFFIX: &str = "@public";

/// Name of the child directory that exposes a folder's public subtree.
pub const PUBLIC_DIR_NAME: &str = "public";

/// Maps a member assertion (as typed in a path) to a canonical identity.
pub trait MemberResolver {
    /// Returns the canonical identity for `assertion`, or `None` when the
    /// assertion does not name anyone.
    fn resolve_member(&self, assertion: &str) -> Option<String> {
        default_member(assertion)
    }
}

/// Resolver that only normalizes spelling.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultMembers;

impl MemberResolver for DefaultMembers {}

/// Trims and lowercases `assertion`; rejects anything outside `[a-z0-9_]`.
pub fn default_member(assertion: &str) -> Option<String> {
    let member = assertion.trim().to_ascii_lowercase();
    let valid = !member.is_empty()
        && member
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_');
    valid.then_some(member)
}

/// Parsed, resolved representation of a folder name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FolderHandle {
    writers: Vec<String>,
    readers: Vec<String>,
    public: bool,
}

impl FolderHandle {
    /// Parses `name`, resolving each member with `resolver`.
    pub fn parse<R>(name: &str, resolver: &R) -> Result<Self, HandleError>
    where
        R: MemberResolver + ?Sized,
    {
        let (body, public) = match name.strip_suffix(PUBLIC_SUFFIX) {
            Some(body) => (body, true),
            None => (name, false),
        };

        let (writer_part, reader_part) = match body.split_once(READER_SEPARATOR) {
            Some((w, r)) => (w, Some(r)),
            None => (body, None),
        };

        if writer_part.trim().is_empty() {
            return Err(HandleError::NoWriters {
                name: name.to_string(),
            });
        }
        if public && reader_part.is_some() {
            return Err(HandleError::PublicWithReaders {
                name: name.to_string(),
            });
        }

        let writers = resolve_list(name, writer_part, resolver)?;
        let mut readers = match reader_part {
            Some(part) => resolve_list(name, part, resolver)?,
            None => BTreeSet::new(),
        };
        readers.retain(|r| !writers.contains(r));

        Ok(Self {
            writers: writers.into_iter().collect(),
            readers: readers.into_iter().collect(),
            public,
        })
    }

    /// Builds a handle from already-canonical member lists.
    pub fn from_members<W, R>(writers: W, readers: R, public: bool) -> Self
    where
        W: IntoIterator<Item = String>,
        R: IntoIterator<Item = String>,
    {
        let writers: BTreeSet<String> = writers.into_iter().collect();
        let readers: BTreeSet<String> = readers
            .into_iter()
            .filter(|r| !writers.contains(r))
            .collect();
        Self {
            writers: writers.into_iter().collect(),
            readers: if public {
                Vec::new()
            } else {
                readers.into_iter().collect()
            },
            public,
        }
    }

    pub fn writers(&self) -> &[String] {
        &self.writers
    }

    pub fn readers(&self) -> &[String] {
        &self.readers
    }

    /// True when the name requested the public subtree.
    pub fn is_public(&self) -> bool {
        self.public
    }

    /// True when this private folder has a public subtree next to it.
    pub fn has_public(&self) -> bool {
        !self.public && self.readers.is_empty()
    }

    /// Handle for the public subtree shared by the same writers.
    pub fn to_public(&self) -> Self {
        Self {
            writers: self.writers.clone(),
            readers: Vec::new(),
            public: true,
        }
    }

    /// Whether `user` may write to this folder.
    pub fn is_writer(&self, user: &str) -> bool {
        self.writers.iter().any(|w| w == user)
    }

    /// Whether `user` may read this folder.
    pub fn is_reader(&self, user: &str) -> bool {
        self.public || self.is_writer(user) || self.readers.iter().any(|r| r == user)
    }

    /// Renders the single authoritative string form of this handle.
    pub fn canonical_name(&self) -> String {
        let mut name = self.writers.join(",");
        if !self.readers.is_empty() {
            name.push(READER_SEPARATOR);
            name.push_str(&self.readers.join(","));
        }
        if self.public {
            name.push_str(PUBLIC_SUFFIX);
        }
        name
    }
}

impl fmt::Display for FolderHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical_name())
    }
}

fn resolve_list<R>(name: &str, list: &str, resolver: &R) -> Result<BTreeSet<String>, HandleError>
where
    R: MemberResolver + ?Sized,
{
    list.split(MEMBER_SEPARATOR)
        .map(|assertion| {
            resolver
                .resolve_member(assertion)
                .ok_or_else(|| HandleError::InvalidMember {
                    name: name.to_string(),
                    member: assertion.to_string(),
                })
        })
        .collect()
}
