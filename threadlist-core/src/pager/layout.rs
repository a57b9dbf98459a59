//! Segment layout of one partition's virtual list
//!
//! The list is the concatenation, in fixed order, of
//! `[pinned header?, pinned window, unpinned header?, unpinned window, archived footer?]`
//! for partitions with a pinned split, and `[window, archived footer?]` for the
//! rest. Empty segments are omitted. A request `[offset, offset + length)` is
//! answered by intersecting it with each segment in turn.

use crate::db::PinFilter;

/// Store counts a layout is built from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SegmentCounts {
    /// Pinned rows (always 0 for partitions without a pinned split)
    pub pinned: usize,
    /// Rows outside the pinned window
    pub unpinned: usize,
    /// Archived rows shown in the footer (0 when the footer is disabled)
    pub archived: usize,
}

impl SegmentCounts {
    /// Derive the split from an unarchived total and a pinned count.
    ///
    /// The pinned count is clamped so that the two windows always add up to
    /// the total, even if the counts were taken at different instants.
    pub fn from_totals(total: usize, pinned: usize, archived: usize) -> Self {
        let pinned = pinned.min(total);
        Self {
            pinned,
            unpinned: total - pinned,
            archived,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentKind {
    PinnedHeader,
    Window(PinFilter),
    UnpinnedHeader,
    ArchivedFooter,
}

/// One contiguous run of the virtual list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    pub kind: SegmentKind,
    /// Global index of the first item
    pub start: usize,
    pub size: usize,
}

impl Segment {
    fn end(&self) -> usize {
        self.start + self.size
    }
}

/// Part of a request that falls inside one segment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slice {
    pub kind: SegmentKind,
    /// Offset relative to the segment start
    pub offset: usize,
    pub len: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentLayout {
    counts: SegmentCounts,
    segments: Vec<Segment>,
    total: usize,
}

impl SegmentLayout {
    pub fn new(counts: SegmentCounts, split_pinned: bool) -> Self {
        let mut layout = Self {
            counts,
            segments: Vec::with_capacity(5),
            total: 0,
        };

        if split_pinned {
            if counts.pinned > 0 {
                layout.push(SegmentKind::PinnedHeader, 1);
                layout.push(SegmentKind::Window(PinFilter::Pinned), counts.pinned);
                if counts.unpinned > 0 {
                    layout.push(SegmentKind::UnpinnedHeader, 1);
                }
            }
            layout.push(SegmentKind::Window(PinFilter::Unpinned), counts.unpinned);
        } else {
            layout.push(
                SegmentKind::Window(PinFilter::Any),
                counts.pinned + counts.unpinned,
            );
        }

        if counts.archived > 0 {
            layout.push(SegmentKind::ArchivedFooter, 1);
        }

        layout
    }

    fn push(&mut self, kind: SegmentKind, size: usize) {
        if size == 0 {
            return;
        }
        self.segments.push(Segment {
            kind,
            start: self.total,
            size,
        });
        self.total += size;
    }

    /// Number of items in the virtual list, headers and footer included
    pub fn total(&self) -> usize {
        self.total
    }

    pub fn counts(&self) -> SegmentCounts {
        self.counts
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Global index of the unpinned header, if there is one
    pub fn unpinned_header_index(&self) -> Option<usize> {
        self.segments
            .iter()
            .find(|s| s.kind == SegmentKind::UnpinnedHeader)
            .map(|s| s.start)
    }

    /// Intersect `[offset, offset + length)` with every segment, in list order.
    pub fn slices(&self, offset: usize, length: usize) -> Vec<Slice> {
        let end = offset.saturating_add(length);

        self.segments
            .iter()
            .filter_map(|segment| {
                let from = offset.max(segment.start);
                let to = end.min(segment.end());
                (from < to).then(|| Slice {
                    kind: segment.kind,
                    offset: from - segment.start,
                    len: to - from,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout(pinned: usize, unpinned: usize, archived: usize, split: bool) -> SegmentLayout {
        SegmentLayout::new(
            SegmentCounts {
                pinned,
                unpinned,
                archived,
            },
            split,
        )
    }

    fn kinds(slices: &[Slice]) -> Vec<SegmentKind> {
        slices.iter().map(|s| s.kind).collect()
    }

    #[test]
    fn test_total_accounting() {
        for pinned in 0..4 {
            for unpinned in 0..4 {
                for archived in 0..3 {
                    let l = layout(pinned, unpinned, archived, true);
                    let mut expected = pinned + unpinned;
                    if archived > 0 {
                        expected += 1;
                    }
                    if pinned > 0 {
                        expected += if unpinned > 0 { 2 } else { 1 };
                    }
                    assert_eq!(l.total(), expected, "({pinned},{unpinned},{archived})");
                    let sum: usize = l.segments().iter().map(|s| s.size).sum();
                    assert_eq!(sum, l.total());
                }
            }
        }
    }

    #[test]
    fn test_pinned_and_unpinned_pages() {
        let l = layout(2, 5, 0, true);
        assert_eq!(l.total(), 9);

        let first = l.slices(0, 3);
        assert_eq!(
            first,
            vec![
                Slice {
                    kind: SegmentKind::PinnedHeader,
                    offset: 0,
                    len: 1
                },
                Slice {
                    kind: SegmentKind::Window(PinFilter::Pinned),
                    offset: 0,
                    len: 2
                },
            ]
        );

        let second = l.slices(3, 3);
        assert_eq!(
            second,
            vec![
                Slice {
                    kind: SegmentKind::UnpinnedHeader,
                    offset: 0,
                    len: 1
                },
                Slice {
                    kind: SegmentKind::Window(PinFilter::Unpinned),
                    offset: 0,
                    len: 2
                },
            ]
        );

        let third = l.slices(6, 3);
        assert_eq!(
            third,
            vec![Slice {
                kind: SegmentKind::Window(PinFilter::Unpinned),
                offset: 2,
                len: 3
            }]
        );
    }

    #[test]
    fn test_footer_only_on_last_page() {
        let l = layout(0, 4, 3, true);
        assert_eq!(l.total(), 5);
        assert_eq!(kinds(&l.slices(4, 1)), vec![SegmentKind::ArchivedFooter]);
        assert!(!kinds(&l.slices(0, 4)).contains(&SegmentKind::ArchivedFooter));
        assert!(kinds(&l.slices(2, 10)).contains(&SegmentKind::ArchivedFooter));
        assert!(l.slices(5, 3).is_empty());
    }

    #[test]
    fn test_headers_never_leave_their_positions() {
        let l = layout(3, 4, 0, true);
        assert_eq!(l.unpinned_header_index(), Some(4));

        for offset in 1..l.total() {
            for length in 1..=l.total() {
                let mut index = offset;
                for slice in l.slices(offset, length) {
                    match slice.kind {
                        SegmentKind::PinnedHeader => panic!("pinned header at offset {offset}"),
                        SegmentKind::UnpinnedHeader => assert_eq!(index, 4),
                        _ => {}
                    }
                    index += slice.len;
                }
            }
        }
    }

    #[test]
    fn test_no_headers_without_pins() {
        let l = layout(0, 3, 0, true);
        assert_eq!(l.total(), 3);
        assert_eq!(l.unpinned_header_index(), None);
        assert_eq!(
            kinds(&l.slices(0, 10)),
            vec![SegmentKind::Window(PinFilter::Unpinned)]
        );
    }

    #[test]
    fn test_only_pinned_has_single_header() {
        let l = layout(2, 0, 0, true);
        assert_eq!(l.total(), 3);
        assert_eq!(l.unpinned_header_index(), None);
    }

    #[test]
    fn test_unsplit_partition_uses_single_window() {
        let l = layout(0, 6, 2, false);
        assert_eq!(l.total(), 7);
        assert_eq!(
            kinds(&l.slices(0, 7)),
            vec![
                SegmentKind::Window(PinFilter::Any),
                SegmentKind::ArchivedFooter
            ]
        );
    }

    #[test]
    fn test_counts_clamp_pinned_to_total() {
        let counts = SegmentCounts::from_totals(3, 5, 0);
        assert_eq!(counts.pinned, 3);
        assert_eq!(counts.unpinned, 0);
    }

    #[test]
    fn test_huge_length_does_not_overflow() {
        let l = layout(1, 1, 1, true);
        let total: usize = l.slices(0, usize::MAX).iter().map(|s| s.len).sum();
        assert_eq!(total, l.total());
    }
}
