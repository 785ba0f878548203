//! Multiset comparison of diagnostic codes

use serde::Serialize;
use std::collections::BTreeMap;

/// Code to occurrence count, ordered by code
pub type CodeHistogram = BTreeMap<u32, u32>;

/// Difference between what the oracle and the candidate reported
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Comparison {
    pub exact_match: bool,
    /// Oracle codes, sorted
    pub expected: Vec<u32>,
    /// Candidate codes, sorted
    pub actual: Vec<u32>,
    /// Codes the oracle reported more often than the candidate
    pub missing: CodeHistogram,
    /// Codes the candidate reported more often than the oracle
    pub extra: CodeHistogram,
}

pub fn histogram(codes: &[u32]) -> CodeHistogram {
    let mut counts = CodeHistogram::new();
    for code in codes {
        *counts.entry(*code).or_insert(0) += 1;
    }
    counts
}

/// Order-insensitive, duplicate-sensitive diff
pub fn compare(oracle: &[u32], candidate: &[u32]) -> Comparison {
    let expected = histogram(oracle);
    let actual = histogram(candidate);

    let missing = surplus(&expected, &actual);
    let extra = surplus(&actual, &expected);
    Comparison {
        exact_match: missing.is_empty() && extra.is_empty(),
        expected: sorted(oracle),
        actual: sorted(candidate),
        missing,
        extra,
    }
}

impl Comparison {
    /// Whether either side reported `code`
    pub fn involves(&self, code: u32) -> bool {
        self.expected.contains(&code) || self.actual.contains(&code)
    }
}

fn sorted(codes: &[u32]) -> Vec<u32> {
    let mut codes = codes.to_vec();
    codes.sort_unstable();
    codes
}

/// Per-code count by which `left` exceeds `right`
fn surplus(left: &CodeHistogram, right: &CodeHistogram) -> CodeHistogram {
    left.iter()
        .filter_map(|(code, count)| {
            let other = right.get(code).copied().unwrap_or(0);
            (*count > other).then(|| (*code, count - other))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_missing_code() {
        let result = compare(&[2322, 2345], &[2322]);
        assert!(!result.exact_match);
        assert_eq!(result.missing, BTreeMap::from([(2345, 1)]));
        assert!(result.extra.is_empty());
    }

    #[test]
    fn test_both_empty_match() {
        let result = compare(&[], &[]);
        assert!(result.exact_match);
        assert!(result.missing.is_empty() && result.extra.is_empty());
    }

    #[test]
    fn test_duplicates_matter_order_does_not() {
        assert!(compare(&[1, 2, 2], &[2, 1, 2]).exact_match);
        let result = compare(&[2, 2], &[2, 3, 3, 3]);
        assert_eq!(result.missing, BTreeMap::from([(2, 1)]));
        assert_eq!(result.extra, BTreeMap::from([(3, 3)]));
    }

    #[test]
    fn test_involves_either_side() {
        let result = compare(&[2345, 2322], &[7006]);
        assert_eq!(result.expected, vec![2322, 2345]);
        assert!(result.involves(2345));
        assert!(result.involves(7006));
        assert!(!result.involves(1005));
    }

    proptest! {
        #[test]
        fn prop_compare_is_symmetric(
            a in prop::collection::vec(0u32..20, 0..30),
            b in prop::collection::vec(0u32..20, 0..30),
        ) {
            let forward = compare(&a, &b);
            let backward = compare(&b, &a);
            prop_assert_eq!(&forward.missing, &backward.extra);
            prop_assert_eq!(&forward.extra, &backward.missing);
            prop_assert_eq!(forward.exact_match, backward.exact_match);

            let total = |h: &CodeHistogram| h.values().map(|c| *c as usize).sum::<usize>();
            // Sizes differ by exactly the surplus on each side
            prop_assert_eq!(
                a.len() + total(&forward.extra),
                b.len() + total(&forward.missing)
            );
        }
    }
}
