//! Range-indexed traceability from generated text back to its origin.
//!
//! The same structure maps output ranges to model objects and to template
//! nodes. A mapping is open while its text is being built, then committed
//! once; reads commit implicitly and every mutation after that is ignored.

use std::collections::HashMap;
use std::hash::Hash;

use crate::position::Position;

/// Category of a range of output text.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Highlight {
    StaticText,
    Comment,
    Feature,
}

#[derive(Debug, Clone)]
pub struct TextMapping<T> {
    default_target: Option<T>,
    length: usize,
    by_target: HashMap<T, Vec<Position>>,
    /// Every range sorted by its begin offset, built on commit.
    ordered: Vec<(Position, T)>,
    highlights: Vec<(Position, Highlight)>,
    links: Vec<(Position, T)>,
    pending_link: Option<T>,
    committed: bool,
    memo: HashMap<usize, Option<T>>,
}

impl<T> Default for TextMapping<T> {
    fn default() -> Self {
        Self {
            default_target: None,
            length: 0,
            by_target: HashMap::new(),
            ordered: Vec::new(),
            highlights: Vec::new(),
            links: Vec::new(),
            pending_link: None,
            committed: false,
            memo: HashMap::new(),
        }
    }
}

impl<T: Copy + Ord + Hash> TextMapping<T> {
    /// A mapping over `length` characters whose unmapped text belongs to
    /// `default_target`.
    pub fn new(default_target: Option<T>, length: usize) -> Self {
        Self {
            default_target,
            length,
            ..Self::default()
        }
    }

    pub const fn len(&self) -> usize {
        self.length
    }

    pub const fn is_empty(&self) -> bool {
        self.length == 0
    }

    pub const fn is_committed(&self) -> bool {
        self.committed
    }

    pub const fn default_target(&self) -> Option<T> {
        self.default_target
    }

    fn frozen(&self, operation: &str) -> bool {
        if self.committed {
            tracing::trace!(operation, "ignoring mutation of a committed mapping");
        }
        self.committed
    }

    /// Maps `[begin, end)` to `target`, merging it with every range of the
    /// same target it overlaps or touches.
    pub fn add_mapping(&mut self, target: T, begin: usize, end: usize) {
        if self.frozen("add_mapping") || begin >= end {
            return;
        }
        let ranges = self.by_target.entry(target).or_default();
        let mut merged = Position::new(begin, end);
        loop {
            let before = ranges.len();
            ranges.retain(|range| {
                if range.touches(&merged) {
                    merged = merged.union(range);
                    false
                } else {
                    true
                }
            });
            if ranges.len() == before {
                break;
            }
        }
        let at = ranges.partition_point(|range| range.begin < merged.begin);
        ranges.insert(at, merged);
    }

    /// Sets the target recorded as a link for the ranges shifted from now on.
    pub fn set_pending_link(&mut self, target: Option<T>) {
        if self.frozen("set_pending_link") {
            return;
        }
        self.pending_link = target;
    }

    /// Advances the cursor over `size` characters written by the owner.
    pub fn shift(&mut self, size: usize, highlight: Option<Highlight>) {
        if self.frozen("shift") || size == 0 {
            return;
        }
        let range = Position::new(self.length, self.length + size);
        if let Some(highlight) = highlight {
            self.highlights.push((range, highlight));
        }
        if let Some(link) = self.pending_link {
            self.links.push((range, link));
        }
        self.length += size;
    }

    /// Appends the mapping of text concatenated after this one.
    ///
    /// The ranges of `other` are placed at the cursor, its default target
    /// covering the whole of its text, and the cursor moves past it.
    pub fn absorb(&mut self, other: &Self) {
        if self.frozen("absorb") {
            return;
        }
        let offset = self.length;
        let delta = isize::try_from(offset).unwrap_or(isize::MAX);
        if let Some(target) = other.default_target {
            self.add_mapping(target, offset, offset + other.length);
        }
        for (&target, ranges) in &other.by_target {
            for range in ranges {
                let shifted = range.shift(delta);
                self.add_mapping(target, shifted.begin, shifted.end);
            }
        }
        self.highlights.extend(
            other
                .highlights
                .iter()
                .map(|&(range, highlight)| (range.shift(delta), highlight)),
        );
        self.links
            .extend(other.links.iter().map(|&(range, link)| (range.shift(delta), link)));
        self.length += other.length;
    }

    /// Clips every range to `bounds` and rebases it on `bounds.begin`;
    /// ranges left empty are dropped.
    pub fn range(&mut self, bounds: Position) {
        if self.frozen("range") {
            return;
        }
        let bounds = Position::new(bounds.begin.min(self.length), bounds.end.min(self.length));
        for ranges in self.by_target.values_mut() {
            *ranges = ranges.iter().filter_map(|range| range.range(bounds)).collect();
        }
        self.by_target.retain(|_, ranges| !ranges.is_empty());
        self.highlights = self
            .highlights
            .iter()
            .filter_map(|&(range, highlight)| range.range(bounds).map(|r| (r, highlight)))
            .collect();
        self.links = self
            .links
            .iter()
            .filter_map(|&(range, link)| range.range(bounds).map(|r| (r, link)))
            .collect();
        self.length = bounds.len();
    }

    /// Accounts for `width` characters inserted before each of `line_starts`.
    pub fn indent(&mut self, line_starts: &[usize], width: usize) {
        if self.frozen("indent") || width == 0 || line_starts.is_empty() {
            return;
        }
        for ranges in self.by_target.values_mut() {
            for range in ranges.iter_mut() {
                *range = range.indent(line_starts, width);
            }
        }
        for (range, _) in &mut self.highlights {
            *range = range.indent(line_starts, width);
        }
        for (range, _) in &mut self.links {
            *range = range.indent(line_starts, width);
        }
        let inserted = line_starts.iter().filter(|&&start| start <= self.length).count();
        self.length += inserted * width;
    }

    /// Forgets every range after the text was rewritten with a different
    /// length; the default target keeps covering all of it.
    pub fn reset(&mut self, length: usize) {
        if self.frozen("reset") {
            return;
        }
        self.by_target.clear();
        self.highlights.clear();
        self.links.clear();
        self.length = length;
    }

    /// Freezes the mapping and seals the default target over the whole text.
    pub fn commit(&mut self) {
        if self.committed {
            return;
        }
        if let Some(target) = self.default_target {
            self.add_mapping(target, 0, self.length);
        }
        let mut ordered: Vec<(Position, T)> = self
            .by_target
            .iter()
            .flat_map(|(&target, ranges)| ranges.iter().map(move |&range| (range, target)))
            .collect();
        ordered.sort_by_key(|&(range, target)| (range.begin, std::cmp::Reverse(range.end), target));
        self.ordered = ordered;
        self.committed = true;
        tracing::trace!(
            length = self.length,
            ranges = self.ordered.len(),
            "mapping committed"
        );
    }

    /// Target of the narrowest range containing `index`. Between equally
    /// narrow ranges the greatest target wins.
    pub fn position_to_target(&mut self, index: usize) -> Option<T> {
        self.commit();
        if let Some(&target) = self.memo.get(&index) {
            return target;
        }
        let mut best: Option<(Position, T)> = None;
        for &(range, target) in &self.ordered {
            if range.begin > index {
                break;
            }
            if range.contains(index) && best.is_none_or(|(b, _)| range.len() <= b.len()) {
                best = Some((range, target));
            }
        }
        let target = best.map(|(_, target)| target);
        self.memo.insert(index, target);
        target
    }

    pub fn target_to_positions(&mut self, target: T) -> Vec<Position> {
        self.commit();
        self.by_target.get(&target).cloned().unwrap_or_default()
    }

    pub fn link_at(&mut self, index: usize) -> Option<T> {
        self.commit();
        self.links
            .iter()
            .rev()
            .find(|(range, _)| range.contains(index))
            .map(|&(_, link)| link)
    }

    pub fn highlights(&mut self) -> &[(Position, Highlight)] {
        self.commit();
        &self.highlights
    }

    /// Every target having at least one range.
    pub fn targets(&mut self) -> Vec<T> {
        self.commit();
        let mut seen = Vec::new();
        for &(_, target) in &self.ordered {
            if !seen.contains(&target) {
                seen.push(target);
            }
        }
        seen
    }
}
