#![allow(clippy::unwrap_used, clippy::expect_used)]

//! Server paging, ordering stability and skip-token continuation.

mod common;

use std::cmp::Reverse;

use odata_edm::{Record, Value};
use odata_query::{ODataConfig, QueryEngine, QueryResult, QuerySettings};
use proptest::prelude::*;

fn config(page_size: Option<usize>, ensure_stable: bool) -> ODataConfig {
    ODataConfig {
        query: QuerySettings {
            page_size,
            ensure_stable_ordering: ensure_stable,
            ..QuerySettings::default()
        },
        ..ODataConfig::default()
    }
}

fn enrollment(student: i64, course: i64, grade: i64) -> Record {
    Record::new("Shop.Enrollment")
        .with("StudentId", student)
        .with("CourseId", course)
        .with("Grade", grade)
}

fn pairs(result: &QueryResult) -> Vec<(i64, i64)> {
    result
        .value
        .iter()
        .map(|c| {
            let get = |n| c.value(n).and_then(Value::as_i64).unwrap();
            (get("StudentId"), get("CourseId"))
        })
        .collect()
}

fn run(config: ODataConfig, raw: &str, rows: &[Record]) -> QueryResult {
    let engine = common::engine(config);
    let target = engine.entity_set("Enrollments").unwrap();
    engine.execute(&target, raw, rows).unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn page_size_bounds_results(page_size in 1usize..20, n in 0i64..50) {
        let rows: Vec<Record> = (0..n).map(|i| enrollment(i, 0, 0)).collect();
        let result = run(config(Some(page_size), true), "", &rows);
        let n = usize::try_from(n).unwrap();
        prop_assert_eq!(result.len(), page_size.min(n));
        prop_assert_eq!(result.is_truncated(), n > page_size);
        prop_assert_eq!(result.next_page_cursor.is_some(), n > page_size);
    }

    #[test]
    fn multi_key_ordering_is_stable_and_idempotent(
        rows in prop::collection::vec((0i64..3, 0i64..3), 0..30)
    ) {
        let records: Vec<Record> = rows
            .iter()
            .enumerate()
            .map(|(i, (course, grade))| enrollment(i64::try_from(i).unwrap(), *course, *grade))
            .collect();
        let raw = "$orderby=Grade desc,CourseId";
        let first = run(config(None, false), raw, &records);

        let mut expected: Vec<(usize, &(i64, i64))> = rows.iter().enumerate().collect();
        expected.sort_by_key(|(_, (course, grade))| (Reverse(*grade), *course));
        let expected: Vec<(i64, i64)> = expected
            .iter()
            .map(|(i, (course, _))| (i64::try_from(*i).unwrap(), *course))
            .collect();
        prop_assert_eq!(pairs(&first), expected.clone());

        let resorted: Vec<Record> = expected
            .iter()
            .map(|(student, course)| {
                let grade = rows[usize::try_from(*student).unwrap()].1;
                enrollment(*student, *course, grade)
            })
            .collect();
        let second = run(config(None, false), raw, &resorted);
        prop_assert_eq!(pairs(&second), expected);
    }

    #[test]
    fn composite_keys_order_paged_results(
        shuffled in prop::collection::btree_set((0i64..6, 0i64..6), 0..25)
            .prop_map(|s| s.into_iter().collect::<Vec<_>>())
            .prop_shuffle()
    ) {
        let mut sorted = shuffled.clone();
        sorted.sort_unstable();
        let rows: Vec<Record> = shuffled.iter().map(|(s, c)| enrollment(*s, *c, 0)).collect();

        let whole = run(config(Some(100), true), "", &rows);
        prop_assert_eq!(pairs(&whole), sorted.clone());

        let engine = common::engine(config(Some(3), true));
        let target = engine.entity_set("Enrollments").unwrap();
        let mut seen = Vec::new();
        let mut raw = String::new();
        loop {
            let page = engine.execute(&target, &raw, &rows).unwrap();
            seen.extend(pairs(&page));
            match page.next_page_cursor {
                Some(token) => raw = format!("$skiptoken={token}"),
                None => break,
            }
        }
        prop_assert_eq!(seen, sorted);
    }
}

#[test]
fn top_below_page_size_is_not_truncated() {
    let rows: Vec<Record> = (0..10).map(|i| enrollment(i, 0, 0)).collect();
    let result = run(config(Some(5), true), "$top=3", &rows);
    assert_eq!(result.len(), 3);
    assert!(!result.is_truncated());

    let result = run(config(Some(5), true), "$top=8", &rows);
    assert_eq!(result.len(), 5);
    assert!(result.is_truncated());
}

#[test]
fn unordered_source_resumes_by_offset() {
    let rows: Vec<Record> = (0..5).map(|i| enrollment(4 - i, 0, 0)).collect();
    let engine = common::engine(config(Some(2), false));
    let target = engine.entity_set("Enrollments").unwrap();

    let first = engine.execute(&target, "", &rows).unwrap();
    assert_eq!(pairs(&first), vec![(4, 0), (3, 0)]);
    let token = first.next_page_cursor.unwrap();
    let second = engine
        .execute(&target, &format!("$skiptoken={token}"), &rows)
        .unwrap();
    assert_eq!(pairs(&second), vec![(2, 0), (1, 0)]);
}

#[test]
fn skip_is_ignored_once_a_skiptoken_is_present() {
    let rows: Vec<Record> = (0..6).map(|i| enrollment(i, 0, 0)).collect();
    let engine = common::engine(config(Some(2), true));
    let target = engine.entity_set("Enrollments").unwrap();

    let first = engine.execute(&target, "$skip=1", &rows).unwrap();
    assert_eq!(pairs(&first), vec![(1, 0), (2, 0)]);
    let token = first.next_page_cursor.unwrap();
    let second = engine
        .execute(&target, &format!("$skip=1&$skiptoken={token}"), &rows)
        .unwrap();
    assert_eq!(pairs(&second), vec![(3, 0), (4, 0)]);
}

fn follow(engine: &QueryEngine, query: &str, rows: &[Record]) -> Vec<(i64, i64)> {
    let target = engine.entity_set("Enrollments").unwrap();
    let mut seen = Vec::new();
    let mut raw = query.to_owned();
    loop {
        let page = engine.execute(&target, &raw, rows).unwrap();
        seen.extend(pairs(&page));
        match page.next_page_cursor {
            Some(token) if query.is_empty() => raw = format!("$skiptoken={token}"),
            Some(token) => raw = format!("{query}&$skiptoken={token}"),
            None => return seen,
        }
    }
}

#[test]
fn ties_on_a_non_key_ordering_are_not_lost() {
    let rows: Vec<Record> = (0..5).map(|i| enrollment(i, 0, 0)).collect();
    let engine = common::engine(config(Some(2), false));
    let seen = follow(&engine, "$orderby=Grade", &rows);
    assert_eq!(seen, vec![(0, 0), (1, 0), (2, 0), (3, 0), (4, 0)]);
}

#[test]
fn client_top_holds_across_pages() {
    let rows: Vec<Record> = (0..20).map(|i| enrollment(i, 0, 0)).collect();
    let engine = common::engine(config(Some(5), true));
    let expected: Vec<(i64, i64)> = (0..8).map(|i| (i, 0)).collect();

    assert_eq!(follow(&engine, "$top=8", &rows), expected);

    // The token alone still remembers the client's limit.
    let target = engine.entity_set("Enrollments").unwrap();
    let first = engine.execute(&target, "$top=8", &rows).unwrap();
    let token = first.next_page_cursor.unwrap();
    let second = engine
        .execute(&target, &format!("$skiptoken={token}"), &rows)
        .unwrap();
    assert_eq!(pairs(&second), (5..8).map(|i| (i, 0)).collect::<Vec<_>>());
    assert!(second.next_page_cursor.is_none());
}
