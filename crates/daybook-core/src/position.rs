// ABOUTME: Fractional ordering keys for records within a day.
// ABOUTME: New keys are derived from neighbor keys so existing siblings are never renumbered.

/// Position assigned to the first record in an empty day.
pub const SEED_POSITION: f64 = 1.0;

/// Compute an ordering key for a record placed between `before` and `after`.
///
/// - neither neighbor: [`SEED_POSITION`]
/// - only `after` (insert at head): `after / 2`
/// - only `before` (append at tail): `before + 1`
/// - both: the arithmetic mean
///
/// Repeated insertion at the same boundary halves the gap each time, so
/// precision runs out after roughly fifty steps; see [`has_room`].
pub fn allocate(before: Option<f64>, after: Option<f64>) -> f64 {
    match (before, after) {
        (None, None) => SEED_POSITION,
        (None, Some(a)) => a / 2.0,
        (Some(b), None) => b + 1.0,
        (Some(b), Some(a)) => (b + a) / 2.0,
    }
}

/// Whether a midpoint between `before` and `after` is still strictly
/// between them.
pub fn has_room(before: f64, after: f64) -> bool {
    let mid = allocate(Some(before), Some(after));
    before < mid && mid < after
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_partition_gets_seed() {
        assert_eq!(allocate(None, None), SEED_POSITION);
    }

    #[test]
    fn head_tail_and_between() {
        assert_eq!(allocate(None, Some(1.0)), 0.5);
        assert_eq!(allocate(Some(1.0), None), 2.0);
        assert_eq!(allocate(Some(1.0), Some(2.0)), 1.5);
    }

    #[test]
    fn first_item_then_insert_before_it() {
        let first = allocate(None, None);
        assert_eq!(first, 1.0);
        let second = allocate(None, Some(first));
        assert_eq!(second, 0.5);
    }

    #[test]
    fn repeated_midpoints_stay_ordered_until_precision_collapses() {
        let low = 1.0;
        let mut high = 2.0;
        let mut steps = 0;

        while has_room(low, high) {
            let mid = allocate(Some(low), Some(high));
            assert!(low < mid && mid < high, "step {} out of order", steps);
            high = mid;
            steps += 1;
            assert!(steps < 100, "precision never collapsed");
        }

        // Doubles near 1.0 carry 52 fractional bits, so the gap vanishes
        // after about that many halvings.
        assert!((50..=60).contains(&steps), "collapsed after {} steps", steps);
        let collapsed = allocate(Some(low), Some(high));
        assert!(collapsed == low || collapsed == high);
    }

    #[test]
    fn repeated_head_insertions_stay_positive_and_ordered() {
        let mut head = SEED_POSITION;
        for _ in 0..200 {
            let next = allocate(None, Some(head));
            assert!(next > 0.0 && next < head);
            head = next;
        }
    }
}
