//! Structural query keys.

use sha2::{Digest, Sha256};
use std::fmt;

/// One primitive segment of a [`QueryKey`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Segment {
  Str(String),
  Int(i64),
}

impl fmt::Display for Segment {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Segment::Str(s) => write!(f, "{:?}", s),
      Segment::Int(n) => write!(f, "{}", n),
    }
  }
}

impl From<&str> for Segment {
  fn from(s: &str) -> Self {
    Segment::Str(s.to_string())
  }
}

impl From<String> for Segment {
  fn from(s: String) -> Self {
    Segment::Str(s)
  }
}

impl From<i64> for Segment {
  fn from(n: i64) -> Self {
    Segment::Int(n)
  }
}

/// Ordered sequence of segments identifying one logical query.
///
/// Two keys address the same cache entry iff all segments match. Keys sharing
/// a prefix form a family that can be invalidated together.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryKey(Vec<Segment>);

impl QueryKey {
  pub fn new<I, S>(segments: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<Segment>,
  {
    Self(segments.into_iter().map(Into::into).collect())
  }

  /// Append a segment, returning the extended key.
  pub fn with(mut self, segment: impl Into<Segment>) -> Self {
    self.0.push(segment.into());
    self
  }

  pub fn segments(&self) -> &[Segment] {
    &self.0
  }

  pub fn starts_with(&self, prefix: &QueryKey) -> bool {
    self.0.starts_with(&prefix.0)
  }

  /// Stable fixed-length hash, used as the storage key.
  pub fn cache_hash(&self) -> String {
    let mut hasher = Sha256::new();
    hasher.update(self.to_string().as_bytes());
    hex::encode(hasher.finalize())
  }
}

impl fmt::Display for QueryKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "[")?;
    for (i, segment) in self.0.iter().enumerate() {
      if i > 0 {
        write!(f, ",")?;
      }
      write!(f, "{}", segment)?;
    }
    write!(f, "]")
  }
}
