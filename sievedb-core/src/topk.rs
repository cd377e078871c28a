//! Top-K selection over accumulated scores.
//!
//! [`select_top_k`] is a quickselect: it partitions in place and only keeps
//! recursing into the parts that can still hold one of the first `limit`
//! ranks. The returned prefix is fully ordered; everything after it is left
//! in unspecified order.
//!
//! Ordering is by score first, then by a caller-supplied tie-break over
//! uids. `tie_less(a, b)` defines the ascending order of two uids with equal
//! scores; [`SortOrder::Descending`] reverses the whole order, tie-break
//! included.

use serde::{Deserialize, Serialize};

use crate::bitset::Uid;
use crate::group::ScoredUid;

/// Partitions smaller than this are insertion sorted.
const SMALL: usize = 10;
/// Distance of the compare-and-swap pre-pass before insertion sort.
const GAP: usize = 5;

/// Direction of a score ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    /// Lowest score first.
    Ascending,
    /// Highest score first.
    #[default]
    Descending,
}

/// Strict "ranks ahead of" relation for one direction.
struct Ranking<'a, F> {
    order: SortOrder,
    tie_less: &'a F,
}

impl<F> Ranking<'_, F>
where
    F: Fn(Uid, Uid) -> bool,
{
    #[inline]
    fn before(&self, a: &ScoredUid, b: &ScoredUid) -> bool {
        match self.order {
            SortOrder::Ascending => {
                a.score < b.score || (a.score == b.score && (self.tie_less)(a.uid, b.uid))
            }
            SortOrder::Descending => {
                a.score > b.score || (a.score == b.score && (self.tie_less)(b.uid, a.uid))
            }
        }
    }

    fn median_of_three(&self, a: ScoredUid, b: ScoredUid, c: ScoredUid) -> ScoredUid {
        let (lo, hi) = if self.before(&b, &a) { (b, a) } else { (a, b) };
        if self.before(&c, &lo) {
            lo
        } else if self.before(&hi, &c) {
            hi
        } else {
            c
        }
    }

    fn insertion_sort(&self, gr: &mut [ScoredUid]) {
        let l = gr.len();
        if l > GAP + 1 {
            for i in 0..l - GAP {
                if self.before(&gr[i + GAP], &gr[i]) {
                    gr.swap(i, i + GAP);
                }
            }
        }
        for i in 1..l {
            let cur = gr[i];
            let mut j = i;
            while j > 0 && self.before(&cur, &gr[j - 1]) {
                gr[j] = gr[j - 1];
                j -= 1;
            }
            gr[j] = cur;
        }
    }

    /// Orders `gr` so that its first `limit` positions hold its best
    /// `limit` entries in rank order.
    fn select(&self, limit: usize, gr: &mut [ScoredUid]) {
        let l = gr.len();
        if limit == 0 || l < 2 {
            return;
        }
        if l < SMALL {
            self.insertion_sort(gr);
            return;
        }

        let pivot = self.median_of_three(gr[0], gr[l / 2], gr[l - 1]);

        // [0, lt) ahead of pivot, [lt, i) tied with it, [gt, l) behind it.
        let (mut lt, mut i, mut gt) = (0, 0, l);
        while i < gt {
            if self.before(&gr[i], &pivot) {
                gr.swap(lt, i);
                lt += 1;
                i += 1;
            } else if self.before(&pivot, &gr[i]) {
                gt -= 1;
                gr.swap(i, gt);
            } else {
                i += 1;
            }
        }

        if limit > gt {
            self.select(lt, &mut gr[..lt]);
            self.select(limit - gt, &mut gr[gt..]);
        } else {
            self.select(limit.min(lt), &mut gr[..lt]);
        }
    }
}

/// Selects the best `limit` entries in place and returns them in rank order.
///
/// Entries with a score of zero or less (or NaN) are removed from `entries`
/// first. `limit` is clamped to the number of remaining entries.
///
/// # Example
///
/// ```
/// use sievedb_core::{select_top_k, ScoredUid, SortOrder};
///
/// let mut entries = vec![
///     ScoredUid::new(1, 5.0),
///     ScoredUid::new(2, 5.0),
///     ScoredUid::new(3, 9.0),
///     ScoredUid::new(4, 0.0),
/// ];
/// // Descending reverses the tie-break too: higher uid sorts first
/// // ascending, so the lower uid wins here.
/// let top = select_top_k(&mut entries, 2, SortOrder::Descending, |a, b| a > b);
/// assert_eq!(top, &[ScoredUid::new(3, 9.0), ScoredUid::new(1, 5.0)]);
/// ```
pub fn select_top_k<F>(
    entries: &mut Vec<ScoredUid>,
    limit: usize,
    order: SortOrder,
    tie_less: F,
) -> &[ScoredUid]
where
    F: Fn(Uid, Uid) -> bool,
{
    entries.retain(|e| e.score > 0.0);
    let limit = limit.min(entries.len());
    let ranking = Ranking {
        order,
        tie_less: &tie_less,
    };
    ranking.select(limit, entries);
    &entries[..limit]
}

/// Owning variant of [`select_top_k`]: returns exactly the selected entries.
pub fn top_k<F>(
    mut entries: Vec<ScoredUid>,
    limit: usize,
    order: SortOrder,
    tie_less: F,
) -> Vec<ScoredUid>
where
    F: Fn(Uid, Uid) -> bool,
{
    let n = select_top_k(&mut entries, limit, order, tie_less).len();
    entries.truncate(n);
    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn s(uid: Uid, score: f64) -> ScoredUid {
        ScoredUid::new(uid, score)
    }

    fn full_sort(mut entries: Vec<ScoredUid>, order: SortOrder) -> Vec<ScoredUid> {
        entries.retain(|e| e.score > 0.0);
        entries.sort_by(|a, b| {
            let by_score = a.score.partial_cmp(&b.score).unwrap().then(a.uid.cmp(&b.uid));
            match order {
                SortOrder::Ascending => by_score,
                SortOrder::Descending => by_score.reverse(),
            }
        });
        entries
    }

    #[test]
    fn test_top3_descending_lower_uid_wins() {
        let mut entries = vec![s(1, 5.0), s(2, 5.0), s(3, 9.0), s(4, 0.0), s(5, 3.0)];
        let top = select_top_k(&mut entries, 3, SortOrder::Descending, |a, b| a > b);
        assert_eq!(top, &[s(3, 9.0), s(1, 5.0), s(2, 5.0)]);
    }

    #[test]
    fn test_tie_break_direction() {
        let entries = vec![s(1, 5.0), s(2, 5.0), s(3, 5.0)];

        let asc = top_k(entries.clone(), 3, SortOrder::Ascending, |a, b| a < b);
        assert_eq!(asc, vec![s(1, 5.0), s(2, 5.0), s(3, 5.0)]);

        let desc = top_k(entries, 3, SortOrder::Descending, |a, b| a < b);
        assert_eq!(desc, vec![s(3, 5.0), s(2, 5.0), s(1, 5.0)]);
    }

    #[test]
    fn test_limit_beyond_len_returns_all_ordered() {
        let entries = vec![s(7, 2.0), s(3, 1.0), s(9, 4.0), s(1, -1.0), s(2, 3.0)];
        let out = top_k(entries, 100, SortOrder::Ascending, |a, b| a < b);
        assert_eq!(out, vec![s(3, 1.0), s(7, 2.0), s(2, 3.0), s(9, 4.0)]);
    }

    #[test]
    fn test_limit_zero() {
        let mut entries = vec![s(1, 1.0), s(2, 2.0)];
        assert!(select_top_k(&mut entries, 0, SortOrder::Descending, |a, b| a < b).is_empty());
        assert!(top_k(Vec::new(), 5, SortOrder::Descending, |a, b| a < b).is_empty());
    }

    #[test]
    fn test_drops_non_positive_and_nan() {
        let entries = vec![s(1, 0.0), s(2, -3.0), s(3, f64::NAN), s(4, 0.5)];
        let out = top_k(entries, 10, SortOrder::Descending, |a, b| a < b);
        assert_eq!(out, vec![s(4, 0.5)]);
    }

    #[test]
    fn test_small_partition_with_prepass() {
        // Eight entries: takes the 5-apart pre-pass, then insertion sort.
        let entries: Vec<_> = [8.0, 1.0, 7.0, 2.0, 6.0, 3.0, 5.0, 4.0]
            .iter()
            .enumerate()
            .map(|(i, &score)| s(i as Uid + 1, score))
            .collect();
        let out = top_k(entries.clone(), 8, SortOrder::Ascending, |a, b| a < b);
        assert_eq!(out, full_sort(entries, SortOrder::Ascending));
    }

    #[test]
    fn test_matches_full_sort_prefix() {
        let mut rng = StdRng::seed_from_u64(0x5eed);
        for round in 0..200 {
            let n = rng.gen_range(0..300);
            let entries: Vec<_> = (0..n)
                .map(|i| s(i as Uid + 1, rng.gen_range(-5..50) as f64))
                .collect();
            let limit = rng.gen_range(0..n + 5);
            let order = if round % 2 == 0 {
                SortOrder::Ascending
            } else {
                SortOrder::Descending
            };
            let expected = full_sort(entries.clone(), order);
            let expected = &expected[..limit.min(expected.len())];

            let tie = move |a: Uid, b: Uid| a < b;
            let out = top_k(entries, limit, order, tie);
            assert_eq!(out, expected, "round {} n {} limit {}", round, n, limit);
        }
    }

    #[test]
    fn test_equivalent_entries_terminate() {
        // Tie-break that never separates anything.
        let entries: Vec<_> = (1..=100).map(|uid| s(uid, 1.0)).collect();
        let out = top_k(entries, 10, SortOrder::Descending, |_, _| false);
        assert_eq!(out.len(), 10);
        assert!(out.iter().all(|e| e.score == 1.0));
    }

    #[test]
    fn test_sort_order_serde() {
        assert_eq!(
            serde_json::to_string(&SortOrder::Ascending).unwrap(),
            "\"ascending\""
        );
        let order: SortOrder = serde_json::from_str("\"descending\"").unwrap();
        assert_eq!(order, SortOrder::Descending);
    }
}
