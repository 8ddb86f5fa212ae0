//! Assertions for pipeline output.

use std::fmt::Debug;

/// Asserts that `actual` holds the same elements as `expected`, in any order.
pub fn assert_same_elements<T: Ord + Debug + Clone>(actual: &[T], expected: &[T]) {
    let mut actual_sorted = actual.to_vec();
    let mut expected_sorted = expected.to_vec();
    actual_sorted.sort();
    expected_sorted.sort();
    assert_eq!(
        actual_sorted, expected_sorted,
        "Expected elements {expected:?} in any order, got {actual:?}"
    );
}

/// Asserts that `actual` is exactly `expected`, order included.
pub fn assert_in_order<T: PartialEq + Debug>(actual: &[T], expected: &[T]) {
    assert_eq!(
        actual, expected,
        "Expected output in input order {expected:?}, got {actual:?}"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_elements_ignores_order() {
        assert_same_elements(&[3, 1, 2], &[1, 2, 3]);
    }

    #[test]
    #[should_panic(expected = "in any order")]
    fn test_same_elements_detects_difference() {
        assert_same_elements(&[1, 1], &[1, 2]);
    }

    #[test]
    fn test_in_order_accepts_matching_sequence() {
        assert_in_order(&["a", "b"], &["a", "b"]);
    }

    #[test]
    #[should_panic(expected = "input order")]
    fn test_in_order_detects_swapped_items() {
        assert_in_order(&[2, 1], &[1, 2]);
    }
}
