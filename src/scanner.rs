//! Delimiter searches over raw template text.
//!
//! Every search works on byte offsets of ASCII tokens, so the offsets it
//! reports always sit on character boundaries.

use crate::position::Position;

/// How the content of an inhibited region is skipped.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum InhibitorKind {
    /// A string literal: the first unescaped close ends it.
    Quoted,
    /// The first close ends it, whatever lies in between.
    Flat,
    /// The first close outside of quoted regions ends it.
    Tag,
    /// Nested opens are counted and every inhibitor applies inside.
    Recursive,
}

/// A region of text in which searched tokens are invisible.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct Inhibitor {
    pub open: &'static str,
    pub close: &'static str,
    pub kind: InhibitorKind,
}

impl Inhibitor {
    pub const fn new(open: &'static str, close: &'static str, kind: InhibitorKind) -> Self {
        Self { open, close, kind }
    }
}

enum Skip {
    NotInhibited,
    To(usize),
    Unterminated,
}

#[inline]
fn token_at(bytes: &[u8], at: usize, token: &str, end: usize) -> bool {
    !token.is_empty()
        && at + token.len() <= end
        && bytes
            .get(at..)
            .is_some_and(|rest| rest.starts_with(token.as_bytes()))
}

fn skip_inhibited(buffer: &str, at: usize, end: usize, inhibitors: &[Inhibitor]) -> Skip {
    let bytes = buffer.as_bytes();
    let Some(inhibitor) = inhibitors
        .iter()
        .find(|inhibitor| token_at(bytes, at, inhibitor.open, end))
    else {
        return Skip::NotInhibited;
    };

    let inner = Position::new(at + inhibitor.open.len(), end);
    let close = match inhibitor.kind {
        InhibitorKind::Quoted => find_quoted_end(bytes, inhibitor.close, inner),
        InhibitorKind::Flat => find(buffer, inhibitor.close, inner, &[]),
        InhibitorKind::Tag => {
            let literals: Vec<Inhibitor> = inhibitors
                .iter()
                .filter(|i| i.kind == InhibitorKind::Quoted)
                .copied()
                .collect();
            find(buffer, inhibitor.close, inner, &literals)
        }
        InhibitorKind::Recursive => find_block_end(
            buffer,
            inhibitor.open,
            inhibitor.close,
            inner,
            true,
            inhibitors,
        ),
    };
    close.map_or(Skip::Unterminated, |close| Skip::To(close.end))
}

fn find_quoted_end(bytes: &[u8], close: &str, limits: Position) -> Option<Position> {
    let mut i = limits.begin;
    while i < limits.end {
        if bytes.get(i) == Some(&b'\\') {
            i += 2;
            continue;
        }
        if token_at(bytes, i, close, limits.end) {
            return Some(Position::new(i, i + close.len()));
        }
        i += 1;
    }
    None
}

/// Finds the first occurrence of `token` within `limits`, ignoring every
/// occurrence located inside an inhibited region.
///
/// An inhibited region that never closes hides the rest of the range.
pub fn find(
    buffer: &str,
    token: &str,
    limits: Position,
    inhibitors: &[Inhibitor],
) -> Option<Position> {
    find_any(buffer, &[token], limits, inhibitors).map(|(_, position)| position)
}

/// Finds the earliest occurrence of any of `tokens`. At a given offset the
/// tokens are tried in the order given, so callers list longer tokens first.
///
/// Returns the index of the matched token along with its position.
pub fn find_any(
    buffer: &str,
    tokens: &[&str],
    limits: Position,
    inhibitors: &[Inhibitor],
) -> Option<(usize, Position)> {
    let bytes = buffer.as_bytes();
    let end = limits.end.min(bytes.len());
    let mut i = limits.begin;
    while i < end {
        if let Some(index) = tokens.iter().position(|t| token_at(bytes, i, t, end)) {
            let len = tokens.get(index).map_or(0, |t| t.len());
            return Some((index, Position::new(i, i + len)));
        }
        match skip_inhibited(buffer, i, end, inhibitors) {
            Skip::NotInhibited => i += 1,
            Skip::To(next) => i = next,
            Skip::Unterminated => return None,
        }
    }
    None
}

/// Finds the `close` token matching an already consumed `open` token.
///
/// `limits` starts right after the open token. When `recursive` is set each
/// nested `open` must be closed before the matching `close` is reported.
pub fn find_block_end(
    buffer: &str,
    open: &str,
    close: &str,
    limits: Position,
    recursive: bool,
    inhibitors: &[Inhibitor],
) -> Option<Position> {
    let bytes = buffer.as_bytes();
    let end = limits.end.min(bytes.len());
    let mut depth = 0usize;
    let mut i = limits.begin;
    while i < end {
        if token_at(bytes, i, close, end) {
            if depth == 0 {
                return Some(Position::new(i, i + close.len()));
            }
            depth -= 1;
            i += close.len();
            continue;
        }
        if recursive && token_at(bytes, i, open, end) {
            depth += 1;
            i += open.len();
            continue;
        }
        match skip_inhibited(buffer, i, end, inhibitors) {
            Skip::NotInhibited => i += 1,
            Skip::To(next) => i = next,
            Skip::Unterminated => return None,
        }
    }
    None
}

/// One-based line number of `offset`.
pub fn line_number(buffer: &str, offset: usize) -> usize {
    buffer
        .as_bytes()
        .iter()
        .take(offset)
        .filter(|&&b| b == b'\n')
        .count()
        + 1
}

/// One-based line and column (in characters) of `offset`.
pub fn line_column(buffer: &str, offset: usize) -> (usize, usize) {
    let offset = offset.min(buffer.len());
    let start = line_start(buffer, offset);
    let column = buffer
        .get(start..offset)
        .map_or(0, |line| line.chars().count());
    (line_number(buffer, offset), column + 1)
}

/// Offset of the first character of the line containing `offset`.
pub fn line_start(buffer: &str, offset: usize) -> usize {
    buffer
        .as_bytes()
        .iter()
        .take(offset)
        .rposition(|&b| b == b'\n')
        .map_or(0, |nl| nl + 1)
}

const fn is_blank(b: u8) -> bool {
    matches!(b, b' ' | b'\t' | b'\r')
}

/// If only blanks separate `offset` from the start of its line, returns the
/// line start.
pub fn is_first_on_line(buffer: &str, offset: usize) -> Option<usize> {
    let start = line_start(buffer, offset);
    buffer
        .as_bytes()
        .get(start..offset)?
        .iter()
        .all(|&b| is_blank(b))
        .then_some(start)
}

/// If only blanks separate `offset` from the end of its line, returns the
/// offset just past the line break (or the end of the buffer).
pub fn is_last_on_line(buffer: &str, offset: usize) -> Option<usize> {
    let bytes = buffer.as_bytes();
    let mut i = offset;
    while let Some(&b) = bytes.get(i) {
        match b {
            b'\n' => return Some(i + 1),
            b if is_blank(b) => i += 1,
            _ => return None,
        }
    }
    Some(bytes.len())
}

/// Shrinks `limits` so that it neither starts nor ends with whitespace.
pub fn trim(buffer: &str, limits: Position) -> Position {
    let bytes = buffer.as_bytes();
    let mut begin = limits.begin;
    let mut end = limits.end.min(bytes.len());
    while begin < end && bytes.get(begin).is_some_and(u8::is_ascii_whitespace) {
        begin += 1;
    }
    while end > begin && bytes.get(end - 1).is_some_and(u8::is_ascii_whitespace) {
        end -= 1;
    }
    Position::new(begin, end)
}

/// Splits `limits` into its lines, line breaks excluded.
pub fn split_lines(buffer: &str, limits: Position) -> Vec<Position> {
    let bytes = buffer.as_bytes();
    let end = limits.end.min(bytes.len());
    let mut lines = Vec::new();
    let mut begin = limits.begin;
    for i in limits.begin..end {
        if bytes.get(i) == Some(&b'\n') {
            lines.push(Position::new(begin, i));
            begin = i + 1;
        }
    }
    lines.push(Position::new(begin, end.max(begin)));
    lines
}

#[cfg(test)]
mod tests {
    use super::*;

    const LITERAL: Inhibitor = Inhibitor::new("\"", "\"", InhibitorKind::Quoted);
    const PARENS: Inhibitor = Inhibitor::new("(", ")", InhibitorKind::Recursive);

    fn all(buffer: &str) -> Position {
        Position::new(0, buffer.len())
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_find_plain() {
        let buffer = "abc %> def %>";
        assert_eq!(find(buffer, "%>", all(buffer), &[]), Some(Position::new(4, 6)));
        assert_eq!(find(buffer, "zz", all(buffer), &[]), None);
        assert_eq!(
            find(buffer, "%>", Position::new(6, buffer.len()), &[]),
            Some(Position::new(11, 13))
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_find_skips_string_literals() {
        let buffer = r#"a("%>") %>"#;
        assert_eq!(find(buffer, "%>", all(buffer), &[LITERAL]), Some(Position::new(8, 10)));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_find_skips_escaped_quotes() {
        let buffer = r#""a\"," , b"#;
        assert_eq!(find(buffer, ",", all(buffer), &[LITERAL]), Some(Position::new(7, 8)));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_find_skips_nested_parentheses() {
        let buffer = "f(a, g(b, c)), d";
        assert_eq!(
            find(buffer, ",", all(buffer), &[LITERAL, PARENS]),
            Some(Position::new(13, 14))
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_unterminated_inhibitor_hides_rest() {
        let buffer = "\"abc , def";
        assert_eq!(find(buffer, ",", all(buffer), &[LITERAL]), None);
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_find_any_prefers_listed_order() {
        let buffer = "a >= b";
        assert_eq!(
            find_any(buffer, &[">=", ">"], all(buffer), &[]),
            Some((0, Position::new(2, 4)))
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_block_end_recursive() {
        let buffer = "{ a { b } c } d }";
        let limits = Position::new(1, buffer.len());
        assert_eq!(
            find_block_end(buffer, "{", "}", limits, true, &[]),
            Some(Position::new(12, 13))
        );
        assert_eq!(
            find_block_end(buffer, "{", "}", limits, false, &[]),
            Some(Position::new(8, 9))
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_block_end_unmatched() {
        let buffer = "{ a { b }";
        assert_eq!(
            find_block_end(buffer, "{", "}", Position::new(1, buffer.len()), true, &[]),
            None
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_line_utilities() {
        let buffer = "ab\n  cd\nef";
        assert_eq!(line_number(buffer, 0), 1);
        assert_eq!(line_number(buffer, 5), 2);
        assert_eq!(line_column(buffer, 5), (2, 3));
        assert_eq!(is_first_on_line(buffer, 5), Some(3));
        assert_eq!(is_first_on_line(buffer, 6), None);
        assert_eq!(is_last_on_line(buffer, 7), Some(8));
        assert_eq!(is_last_on_line(buffer, 10), Some(10));
        assert_eq!(is_last_on_line(buffer, 6), None);
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_trim_and_split() {
        let buffer = "  a b \n c  ";
        assert_eq!(trim(buffer, all(buffer)), Position::new(2, 9));
        assert_eq!(
            split_lines(buffer, all(buffer)),
            vec![Position::new(0, 6), Position::new(7, 11)]
        );
    }
}
