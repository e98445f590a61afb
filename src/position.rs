use std::fmt;
use std::str::FromStr;

/// A half-open range `[begin, end)` of byte offsets into a text buffer.
///
/// Positions are plain values: every transforming operation returns a new
/// `Position`. Searches that find nothing return `None` rather than a
/// sentinel range.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Position {
    pub begin: usize,
    pub end: usize,
}

impl Position {
    /// Creates a position, swapping the bounds if they are reversed.
    pub const fn new(begin: usize, end: usize) -> Self {
        if begin <= end {
            Self { begin, end }
        } else {
            Self {
                begin: end,
                end: begin,
            }
        }
    }

    pub const fn at(offset: usize) -> Self {
        Self {
            begin: offset,
            end: offset,
        }
    }

    /// Zero for a position built with reversed bounds.
    pub const fn len(&self) -> usize {
        self.end.saturating_sub(self.begin)
    }

    pub const fn is_empty(&self) -> bool {
        self.begin >= self.end
    }

    pub const fn contains(&self, index: usize) -> bool {
        self.begin <= index && index < self.end
    }

    /// Whether the two ranges overlap or are directly adjacent.
    pub const fn touches(&self, other: &Self) -> bool {
        self.begin <= other.end && other.begin <= self.end
    }

    pub fn union(&self, other: &Self) -> Self {
        Self {
            begin: self.begin.min(other.begin),
            end: self.end.max(other.end),
        }
    }

    /// Moves both bounds by `delta`, saturating at zero.
    pub const fn shift(&self, delta: isize) -> Self {
        Self {
            begin: self.begin.saturating_add_signed(delta),
            end: self.end.saturating_add_signed(delta),
        }
    }

    /// Clips this range to `bounds` and rebases it so that `bounds.begin`
    /// becomes offset zero.
    ///
    /// Returns `None` when nothing of the range survives the clipping.
    pub fn range(&self, bounds: Self) -> Option<Self> {
        let begin = self.begin.max(bounds.begin);
        let end = self.end.min(bounds.end);
        (begin < end).then(|| Self {
            begin: begin - bounds.begin,
            end: end - bounds.begin,
        })
    }

    /// Accounts for `width` characters inserted before each offset of
    /// `line_starts` (offsets are expressed in the text before insertion).
    ///
    /// An insertion exactly at `begin` lands in front of the range, an
    /// insertion exactly at `end` lands after it.
    pub fn indent(&self, line_starts: &[usize], width: usize) -> Self {
        let before_begin = line_starts.iter().filter(|&&s| s <= self.begin).count();
        let before_end = line_starts.iter().filter(|&&s| s < self.end).count();
        Self {
            begin: self.begin + before_begin * width,
            end: (self.end + before_end * width).max(self.begin + before_begin * width),
        }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.begin, self.end)
    }
}

const POSITION_MARKER: &str = " //pos=";

/// A position inside a named source, encoded for diagnostics as
/// `path //pos=begin,end`.
///
/// The textual form is read back by external tooling, so `Display` and
/// `FromStr` must stay exact inverses.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourceLocation {
    pub path: String,
    pub position: Option<Position>,
}

impl SourceLocation {
    pub fn new<P: Into<String>>(path: P, position: Position) -> Self {
        Self {
            path: path.into(),
            position: Some(position),
        }
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.position {
            Some(position) => write!(
                f,
                "{}{}{},{}",
                self.path, POSITION_MARKER, position.begin, position.end
            ),
            None => write!(f, "{}", self.path),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid source location '{0}'")]
pub struct InvalidSourceLocation(pub String);

impl FromStr for SourceLocation {
    type Err = InvalidSourceLocation;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let Some((path, fragment)) = s.rsplit_once(POSITION_MARKER) else {
            return Ok(Self {
                path: s.to_string(),
                position: None,
            });
        };
        let invalid = || InvalidSourceLocation(s.to_string());
        let (begin, end) = fragment.split_once(',').ok_or_else(invalid)?;
        let begin = begin.trim().parse::<usize>().map_err(|_| invalid())?;
        let end = end.trim().parse::<usize>().map_err(|_| invalid())?;
        if begin > end {
            return Err(invalid());
        }
        Ok(Self {
            path: path.to_string(),
            position: Some(Position { begin, end }),
        })
    }
}
