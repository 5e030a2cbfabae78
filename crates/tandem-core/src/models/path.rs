//! Structured document paths
//!
//! A path is an ordered list of tagged segments. Key segments address object
//! members, index segments address array positions, and the end segment
//! addresses the position just past the last array element.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// One step of a [`Path`]
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PathSegment {
    /// Object member name
    Key(String),
    /// Array position
    Index(usize),
    /// Position after the last array element
    End,
}

impl PathSegment {
    /// Array position of this segment, if it is an index
    pub const fn as_index(&self) -> Option<usize> {
        match self {
            Self::Index(index) => Some(*index),
            _ => None,
        }
    }
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Key(key) => write!(f, "{}", key.replace('~', "~0").replace('/', "~1")),
            Self::Index(index) => write!(f, "{index}"),
            Self::End => write!(f, "-"),
        }
    }
}

/// Location of a value inside a resource document
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Path(Vec<PathSegment>);

impl Path {
    /// The document root
    #[must_use]
    pub const fn root() -> Self {
        Self(Vec::new())
    }

    /// Append an object key segment
    #[must_use]
    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.0.push(PathSegment::Key(key.into()));
        self
    }

    /// Append an array index segment
    #[must_use]
    pub fn index(mut self, index: usize) -> Self {
        self.0.push(PathSegment::Index(index));
        self
    }

    /// Append the end-of-array segment
    #[must_use]
    pub fn end(mut self) -> Self {
        self.0.push(PathSegment::End);
        self
    }

    /// Parse an RFC 6901 JSON Pointer such as `/items/0` or `/items/-`.
    ///
    /// Only meant for boundary input. Tokens made of digits become index
    /// segments, so a numeric object key has to be built with [`Path::key`].
    pub fn from_pointer(pointer: &str) -> Result<Self> {
        if pointer.is_empty() {
            return Ok(Self::root());
        }
        let Some(rest) = pointer.strip_prefix('/') else {
            return Err(Error::InvalidInput(format!(
                "JSON pointer must start with '/': {pointer}"
            )));
        };

        let segments = rest
            .split('/')
            .map(parse_token)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self(segments))
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.0
    }

    /// Whether this path addresses the whole document
    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// Split into the parent segments and the final segment
    pub fn split_last(&self) -> Option<(&PathSegment, &[PathSegment])> {
        self.0.split_last()
    }

    /// Copy of this path with the final segment replaced
    #[must_use]
    pub fn with_last(&self, segment: PathSegment) -> Self {
        let mut segments = self.0.clone();
        match segments.last_mut() {
            Some(last) => *last = segment,
            None => segments.push(segment),
        }
        Self(segments)
    }

    /// `true` when `other` equals this path or lies below it
    pub fn is_prefix_of(&self, other: &Self) -> bool {
        other.0.starts_with(&self.0)
    }

    /// Identical paths, or one containing the other
    pub fn overlaps(&self, other: &Self) -> bool {
        self.is_prefix_of(other) || other.is_prefix_of(self)
    }
}

impl FromStr for Path {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_pointer(s)
    }
}

/// Renders the path as a JSON Pointer for logs and CLI output.
///
/// The rendering is lossy: a key made of digits prints the same as an index,
/// so `Key("0")` and `Index(0)` both show as `/0`. Use the serialized segment
/// form when a path has to survive a round trip.
impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for segment in &self.0 {
            write!(f, "/{segment}")?;
        }
        Ok(())
    }
}

fn parse_token(token: &str) -> Result<PathSegment> {
    if token == "-" {
        return Ok(PathSegment::End);
    }

    let is_index = !token.is_empty()
        && token.bytes().all(|b| b.is_ascii_digit())
        && (token == "0" || !token.starts_with('0'));
    if is_index {
        return token
            .parse()
            .map(PathSegment::Index)
            .map_err(|_| Error::InvalidInput(format!("Array index out of range: {token}")));
    }

    if has_invalid_escape(token) {
        return Err(Error::InvalidInput(format!(
            "Invalid escape sequence in JSON pointer token: {token}"
        )));
    }
    Ok(PathSegment::Key(token.replace("~1", "/").replace("~0", "~")))
}

fn has_invalid_escape(token: &str) -> bool {
    let mut chars = token.chars();
    while let Some(c) = chars.next() {
        if c == '~' && !matches!(chars.next(), Some('0' | '1')) {
            return true;
        }
    }
    false
}
