#![cfg(test)]
use serde::Deserialize;
use test_generator::test_resources;
use toml::de;

use heapql::{execute_query, parse_query, NoProgress, Session};

mod common;

/// A single query to run against the fixture heap, with the expected number
/// of result rows
#[derive(Deserialize)]
struct TestCase {
    query: String,
    num_matches: usize,
}

#[test_resources("tests/integration/*.toml")]
fn execute_case(toml_file_path: &str) {
    let contents =
        std::fs::read_to_string::<std::path::PathBuf>(toml_file_path.into()).unwrap();
    let test_case: TestCase = de::from_str(&contents).unwrap();

    let snapshot = common::sample_snapshot();
    let session = Session::new();
    let query = parse_query(&test_case.query).unwrap();
    let outcome = execute_query(&query, &snapshot, &NoProgress, &session).unwrap();

    assert_eq!(
        outcome.row_count(),
        test_case.num_matches,
        "query: {}",
        test_case.query
    );
}
