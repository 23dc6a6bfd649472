//! Property-based tests for grid counting using proptest.

use carbonrec_core::HyperGrid;
use carbonrec_core::grid::parse_range_expr;
use proptest::prelude::*;

fn list_literal(len: usize) -> String {
    let items: Vec<String> = (0..len).map(|i| format!("{}", i as f64 * 0.5)).collect();
    format!("[{}]", items.join(", "))
}

proptest! {
    #[test]
    fn grid_size_is_product_of_list_lengths(lens in prop::collection::vec(1usize..8, 0..5)) {
        let text: String = lens
            .iter()
            .enumerate()
            .map(|(i, len)| format!("param_{i} choice {}\n", list_literal(*len)))
            .collect();
        let grid = HyperGrid::parse(&text).unwrap();
        let expected: u64 = lens.iter().map(|l| *l as u64).product();
        prop_assert_eq!(grid.size().unwrap(), expected);
        prop_assert_eq!(grid.points().len() as u64, expected);
    }

    #[test]
    fn short_lines_never_count(line in "[a-z]{0,8}( [a-z]{1,8})?") {
        let grid = HyperGrid::parse(&line).unwrap();
        prop_assert_eq!(grid.size().unwrap(), 1);
    }

    #[test]
    fn range_len_matches_materialized_values(
        start in -50i64..50,
        stop in -50i64..50,
        step in prop_oneof![-7i64..=-1, 1i64..=7],
    ) {
        let range = parse_range_expr(&format!("range({start},{stop},{step})")).unwrap();
        prop_assert_eq!(range.len(), range.values().len() as u64);
        let expected = (start..stop).step_by(step.unsigned_abs() as usize).count();
        if step > 0 {
            prop_assert_eq!(range.len(), expected as u64);
        }
    }

    #[test]
    fn range_values_match_len_near_i64_bounds(
        offset in 0i64..64,
        len in 0i64..64,
        step in 1i64..=1 << 61,
        descending in any::<bool>(),
    ) {
        let text = if descending {
            format!("range({},{},-{step})", i64::MIN + offset + len, i64::MIN + offset)
        } else {
            format!("range({},{},{step})", i64::MAX - offset - len, i64::MAX - offset)
        };
        let range = parse_range_expr(&text).unwrap();
        prop_assert_eq!(range.values().len() as u64, range.len());
    }

    #[test]
    fn truncated_lists_are_rejected(len in 1usize..6) {
        let literal = list_literal(len);
        let truncated = &literal[..literal.len() - 1];
        let input = format!("p choice {truncated}");
        prop_assert!(HyperGrid::parse(&input).is_err());
    }
}
