//! Tag vocabulary of the two template dialects.

use crate::scanner::{Inhibitor, InhibitorKind};

/// The delimiter family of a buffer. Bracket templates write `[%` / `%]`
/// where angle templates write `<%` / `%>`.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
pub enum Dialect {
    #[default]
    Angle,
    Bracket,
}

impl Dialect {
    /// Picks the dialect from the first non-whitespace character.
    pub fn detect(buffer: &str) -> Self {
        match buffer.trim_start().chars().next() {
            Some('[') => Self::Bracket,
            _ => Self::Angle,
        }
    }

    pub const fn tags(self) -> &'static Tags {
        match self {
            Self::Angle => &ANGLE,
            Self::Bracket => &BRACKET,
        }
    }
}

/// Every delimiter the parser looks for, for one dialect.
#[derive(Debug)]
pub struct Tags {
    pub begin: &'static str,
    pub end: &'static str,
    pub comment_begin: &'static str,
    pub comment_end: &'static str,
    pub if_begin: &'static str,
    pub for_begin: &'static str,
    pub else_begin: &'static str,
    pub block_open: &'static str,
    pub block_close: &'static str,
    pub script_begin: &'static str,
    pub import_begin: &'static str,
    pub metamodel_begin: &'static str,
    /// Inhibitors for searches inside a single tag.
    pub literal_inhibitors: [Inhibitor; 1],
    /// Inhibitors for searches inside an expression.
    pub expression_inhibitors: [Inhibitor; 3],
    /// Inhibitors for searches across statement bodies.
    pub statement_inhibitors: [Inhibitor; 4],
}

const LITERAL: Inhibitor = Inhibitor::new("\"", "\"", InhibitorKind::Quoted);

static ANGLE: Tags = Tags {
    begin: "<%",
    end: "%>",
    comment_begin: "<%--",
    comment_end: "--%>",
    if_begin: "<%if",
    for_begin: "<%for",
    else_begin: "<%}else",
    block_open: "{%>",
    block_close: "<%}%>",
    script_begin: "<%script",
    import_begin: "<%import",
    metamodel_begin: "<%metamodel",
    literal_inhibitors: [LITERAL],
    expression_inhibitors: [
        LITERAL,
        Inhibitor::new("(", ")", InhibitorKind::Recursive),
        Inhibitor::new("[", "]", InhibitorKind::Recursive),
    ],
    statement_inhibitors: [
        Inhibitor::new("<%--", "--%>", InhibitorKind::Flat),
        Inhibitor::new("<%if", "<%}%>", InhibitorKind::Recursive),
        Inhibitor::new("<%for", "<%}%>", InhibitorKind::Recursive),
        Inhibitor::new("<%", "%>", InhibitorKind::Tag),
    ],
};

static BRACKET: Tags = Tags {
    begin: "[%",
    end: "%]",
    comment_begin: "[%--",
    comment_end: "--%]",
    if_begin: "[%if",
    for_begin: "[%for",
    else_begin: "[%}else",
    block_open: "{%]",
    block_close: "[%}%]",
    script_begin: "[%script",
    import_begin: "[%import",
    metamodel_begin: "[%metamodel",
    literal_inhibitors: [LITERAL],
    expression_inhibitors: [
        LITERAL,
        Inhibitor::new("(", ")", InhibitorKind::Recursive),
        Inhibitor::new("[", "]", InhibitorKind::Recursive),
    ],
    statement_inhibitors: [
        Inhibitor::new("[%--", "--%]", InhibitorKind::Flat),
        Inhibitor::new("[%if", "[%}%]", InhibitorKind::Recursive),
        Inhibitor::new("[%for", "[%}%]", InhibitorKind::Recursive),
        Inhibitor::new("[%", "%]", InhibitorKind::Tag),
    ],
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[ntest::timeout(100)]
    fn test_detect_dialect() {
        assert_eq!(Dialect::detect("<%script%>"), Dialect::Angle);
        assert_eq!(Dialect::detect("  \n[%script%]"), Dialect::Bracket);
        assert_eq!(Dialect::detect("plain text"), Dialect::Angle);
        assert_eq!(Dialect::detect(""), Dialect::Angle);
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_bracket_tags_mirror_angle_tags() {
        let angle = Dialect::Angle.tags();
        let bracket = Dialect::Bracket.tags();
        let mirror = |s: &str| s.replace('<', "[").replace('>', "]");
        assert_eq!(mirror(angle.begin), bracket.begin);
        assert_eq!(mirror(angle.block_close), bracket.block_close);
        assert_eq!(mirror(angle.else_begin), bracket.else_begin);
        assert_eq!(mirror(angle.comment_end), bracket.comment_end);
    }
}
