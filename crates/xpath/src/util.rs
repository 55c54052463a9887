//! Sorting helpers.

use std::cmp::Ordering;

/// Stable merge sort driven by a three-way comparator.
///
/// The comparator must be a strict weak order: `Less` and `Greater` must be antisymmetric,
/// and `Equal` keeps the input order of the two elements.
pub fn merge_sort<T>(items: Vec<T>, mut cmp: impl FnMut(&T, &T) -> Ordering) -> Vec<T> {
    match try_merge_sort(items, |a, b| Ok::<_, std::convert::Infallible>(cmp(a, b))) {
        Ok(sorted) => sorted,
        Err(never) => match never {},
    }
}

/// [`merge_sort`] with a fallible comparator; the first error aborts the sort.
pub fn try_merge_sort<T, E>(items: Vec<T>, mut cmp: impl FnMut(&T, &T) -> Result<Ordering, E>) -> Result<Vec<T>, E> {
    sort_run(items, &mut cmp)
}

fn sort_run<T, E>(mut items: Vec<T>, cmp: &mut impl FnMut(&T, &T) -> Result<Ordering, E>) -> Result<Vec<T>, E> {
    if items.len() <= 1 {
        return Ok(items);
    }
    let right = items.split_off(items.len() / 2);
    let left = sort_run(items, cmp)?;
    let right = sort_run(right, cmp)?;
    let mut out = Vec::with_capacity(left.len() + right.len());
    let mut left = left.into_iter().peekable();
    let mut right = right.into_iter().peekable();
    while let (Some(l), Some(r)) = (left.peek(), right.peek()) {
        let take_right = cmp(l, r)? == Ordering::Greater;
        let next = if take_right { right.next() } else { left.next() };
        out.extend(next);
    }
    out.extend(left);
    out.extend(right);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn sorts_with_default_comparator() {
        assert_eq!(merge_sort(vec![3, 6, 5], Ord::cmp), vec![3, 5, 6]);
    }

    #[test]
    fn sorts_with_reversing_comparator() {
        assert_eq!(merge_sort(vec![3, 6, 5], |a: &i32, b: &i32| b.cmp(a)), vec![6, 5, 3]);
    }

    #[test]
    fn equal_elements_keep_input_order() {
        let items = vec![(1, 'a'), (0, 'b'), (1, 'c'), (0, 'd')];
        let sorted = merge_sort(items, |a, b| a.0.cmp(&b.0));
        assert_eq!(sorted, vec![(0, 'b'), (0, 'd'), (1, 'a'), (1, 'c')]);
    }

    #[test]
    fn comparator_errors_abort() {
        let r: Result<Vec<i32>, &str> = try_merge_sort(vec![2, 1], |_, _| Err("boom"));
        assert_eq!(r, Err("boom"));
    }

    proptest! {
        #[test]
        fn agrees_with_std_stable_sort(v in proptest::collection::vec((0u8..8, any::<u16>()), 0..64)) {
            let mut expected = v.clone();
            expected.sort_by_key(|p| p.0);
            prop_assert_eq!(merge_sort(v, |a, b| a.0.cmp(&b.0)), expected);
        }
    }
}
