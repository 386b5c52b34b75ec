//! Fabrication-layout map of the photonic chip.
//!
//! `MZI_MMI_MAP` associates each of the 64 MZIs with the `(row, col)` grid
//! coordinates of its three MMI taps, in physical tap order. This is a fixed
//! property of the chip's mask layout, not something computed at runtime;
//! the values are carried over unchanged from the chip's fabrication layout
//! table.

use crate::model::MZI_COUNT;

/// `(row, col)` of one MMI tap.
pub type TapCoord = (usize, usize);

/// `MZI_MMI_MAP[i]` gives the three tap coordinates for MZI `i`, in the
/// fixed physical order the three-phase demodulation in [`crate::demod`]
/// expects.
pub const MZI_MMI_MAP: [[TapCoord; 3]; MZI_COUNT] = [
    [(13, 14), (15, 14), (17, 14)],
    [(19, 14), (21, 14), (23, 14)],
    [(12, 15), (14, 15), (16, 15)],
    [(18, 15), (20, 15), (22, 15)],
    [(17, 12), (15, 12), (13, 12)],
    [(23, 12), (21, 12), (19, 12)],
    [(16, 13), (14, 13), (12, 13)],
    [(22, 13), (20, 13), (18, 13)],
    [(13, 10), (15, 10), (17, 10)],
    [(19, 10), (21, 10), (23, 10)],
    [(12, 11), (14, 11), (16, 11)],
    [(18, 11), (20, 11), (22, 11)],
    [(17, 8), (15, 8), (13, 8)],
    [(23, 8), (21, 8), (19, 8)],
    [(16, 9), (14, 9), (12, 9)],
    [(22, 9), (20, 9), (18, 9)],
    [(13, 6), (15, 6), (17, 6)],
    [(19, 6), (21, 6), (23, 6)],
    [(12, 7), (14, 7), (16, 7)],
    [(18, 7), (20, 7), (22, 7)],
    [(17, 4), (15, 4), (13, 4)],
    [(23, 4), (21, 4), (19, 4)],
    [(16, 5), (14, 5), (12, 5)],
    [(22, 5), (20, 5), (18, 5)],
    [(13, 2), (15, 2), (17, 2)],
    [(19, 2), (21, 2), (23, 2)],
    [(12, 3), (14, 3), (16, 3)],
    [(18, 3), (20, 3), (22, 3)],
    [(17, 0), (15, 0), (13, 0)],
    [(23, 0), (21, 0), (19, 0)],
    [(16, 1), (14, 1), (12, 1)],
    [(22, 1), (20, 1), (18, 1)],
    [(0, 1), (2, 1), (4, 1)],
    [(6, 1), (8, 1), (10, 1)],
    [(1, 0), (3, 0), (5, 0)],
    [(7, 0), (9, 0), (11, 0)],
    [(4, 3), (2, 3), (0, 3)],
    [(10, 3), (8, 3), (6, 3)],
    [(5, 2), (3, 2), (1, 2)],
    [(11, 2), (9, 2), (7, 2)],
    [(0, 5), (2, 5), (4, 5)],
    [(6, 5), (8, 5), (10, 5)],
    [(1, 4), (3, 4), (5, 4)],
    [(7, 4), (9, 4), (11, 4)],
    [(4, 7), (2, 7), (0, 7)],
    [(10, 7), (8, 7), (6, 7)],
    [(5, 6), (3, 6), (1, 6)],
    [(11, 6), (9, 6), (7, 6)],
    [(0, 9), (2, 9), (4, 9)],
    [(6, 9), (8, 9), (10, 9)],
    [(1, 8), (3, 8), (5, 8)],
    [(7, 8), (9, 8), (11, 8)],
    [(4, 11), (2, 11), (0, 11)],
    [(10, 11), (8, 11), (6, 11)],
    [(5, 10), (3, 10), (1, 10)],
    [(11, 10), (9, 10), (7, 10)],
    [(0, 13), (2, 13), (4, 13)],
    [(6, 13), (8, 13), (10, 13)],
    [(1, 12), (3, 12), (5, 12)],
    [(7, 12), (9, 12), (11, 12)],
    [(4, 15), (2, 15), (0, 15)],
    [(10, 15), (8, 15), (6, 15)],
    [(5, 14), (3, 14), (1, 14)],
    [(11, 14), (9, 14), (7, 14)],
];

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn layout_has_sixty_four_entries() {
        assert_eq!(MZI_MMI_MAP.len(), MZI_COUNT);
    }

    #[test]
    fn layout_taps_are_all_distinct() {
        let mut seen = HashSet::new();
        for triple in MZI_MMI_MAP.iter() {
            for tap in triple.iter() {
                assert!(seen.insert(*tap), "duplicate tap coordinate {:?}", tap);
            }
        }
        assert_eq!(seen.len(), MZI_COUNT * 3);
    }
}
