use chrono::{Duration, TimeZone, Utc};

use super::*;

fn at(minutes: i64) -> Option<DateTime<Utc>> {
    Some(Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap() + Duration::minutes(minutes))
}

fn apply(rows: &mut [IdentifierRow], renames: &[Rename]) {
    for rename in renames {
        let row = rows.iter_mut().find(|r| r.key == rename.key).unwrap();
        assert_eq!(row.value, rename.from);
        row.value = rename.to.clone();
    }
}

#[test]
fn earliest_row_keeps_identifier_and_later_rows_get_ordered_suffixes() {
    // Keys deliberately out of creation order.
    let rows = vec![
        IdentifierRow::new("3", "A", at(20)),
        IdentifierRow::new("1", "A", at(0)),
        IdentifierRow::new("2", "A", at(10)),
    ];

    let renames = plan_renames(&rows, "-");

    assert_eq!(
        renames,
        vec![
            Rename { key: "2".into(), from: "A".into(), to: "A-1".into() },
            Rename { key: "3".into(), from: "A".into(), to: "A-2".into() },
        ]
    );
}

#[test]
fn equal_timestamps_fall_back_to_numeric_key_order() {
    let rows = vec![
        IdentifierRow::new("10", "XM-DAC-1", at(5)),
        IdentifierRow::new("9", "XM-DAC-1", at(5)),
        IdentifierRow::new("11", "XM-DAC-1", at(5)),
    ];

    let renames = plan_renames(&rows, "-");

    let keys: Vec<&str> = renames.iter().map(|r| r.key.as_str()).collect();
    assert_eq!(keys, vec!["10", "11"], "row 9 is first by key and keeps the value");
    assert_eq!(renames[0].to, "XM-DAC-1-1");
    assert_eq!(renames[1].to, "XM-DAC-1-2");
}

#[test]
fn missing_timestamps_sort_after_known_ones() {
    let rows = vec![
        IdentifierRow::new("a", "B", None),
        IdentifierRow::new("b", "B", at(1)),
    ];

    let renames = plan_renames(&rows, "-");

    assert_eq!(renames.len(), 1);
    assert_eq!(renames[0].key, "a");
}

#[test]
fn unique_values_are_left_alone() {
    let rows = vec![
        IdentifierRow::new("1", "A", at(0)),
        IdentifierRow::new("2", "B", at(1)),
    ];
    assert!(plan_renames(&rows, "-").is_empty());
    assert!(duplicate_groups(&rows).is_empty());
}

#[test]
fn suffix_already_in_use_is_skipped() {
    let rows = vec![
        IdentifierRow::new("1", "A", at(0)),
        IdentifierRow::new("2", "A", at(1)),
        IdentifierRow::new("3", "A-1", at(2)),
    ];

    let renames = plan_renames(&rows, "-");

    assert_eq!(renames, vec![Rename { key: "2".into(), from: "A".into(), to: "A-2".into() }]);
}

#[test]
fn replanning_after_repair_changes_nothing() {
    let mut rows = vec![
        IdentifierRow::new("1", "A", at(0)),
        IdentifierRow::new("2", "A", at(1)),
        IdentifierRow::new("3", "A", at(2)),
        IdentifierRow::new("4", "B", at(3)),
        IdentifierRow::new("5", "B", at(4)),
    ];

    let first = plan_renames(&rows, "-");
    assert_eq!(first.len(), 3);
    apply(&mut rows, &first);

    assert!(plan_renames(&rows, "-").is_empty());
    let values: Vec<&str> = rows.iter().map(|r| r.value.as_str()).collect();
    assert_eq!(values, vec!["A", "A-1", "A-2", "B", "B-1"]);
}

#[test]
fn custom_separator_is_used() {
    let rows = vec![
        IdentifierRow::new("1", "A", at(0)),
        IdentifierRow::new("2", "A", at(1)),
    ];
    assert_eq!(plan_renames(&rows, "_dup")[0].to, "A_dup1");
}

#[test]
fn duplicate_groups_orders_by_frequency() {
    let rows = vec![
        IdentifierRow::new("1", "B", None),
        IdentifierRow::new("2", "B", None),
        IdentifierRow::new("3", "A", None),
        IdentifierRow::new("4", "A", None),
        IdentifierRow::new("5", "A", None),
        IdentifierRow::new("6", "C", None),
    ];
    assert_eq!(duplicate_groups(&rows), vec![("A".to_owned(), 3), ("B".to_owned(), 2)]);
}
