/// Parsing OQL queries and working with their textual form

pub mod error;
pub mod ir;
pub mod parser;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::query::ir::Query;

/// Parse OQL text into a query tree
pub fn parse_query(text: &str) -> anyhow::Result<Query> {
    parser::parse(text)
}

/// Matches a query whose FROM clause is a literal object-id list, splitting it
/// into the text before the ids, the ids, and everything after
static FROM_IDS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)^(.*?\bFROM\s+(?:OBJECTS\s+)?(?:INSTANCEOF\s+)?)(\d+(?:\s*,\s*\d+)*)((?:\s.*)?)$")
        .unwrap()
});

fn decompose(q: &str) -> Option<(String, String, String)> {
    let caps = FROM_IDS.captures(q)?;
    Some((caps[1].to_string(), caps[2].to_string(), caps[3].to_string()))
}

/// Split accumulated query text into its base query and top-level UNION
/// branches, honoring parentheses and string literals
fn split_segments(batch: &str) -> Vec<String> {
    const SEP: &str = " union ";
    let bytes = batch.as_bytes();
    let mut parts = Vec::new();
    let mut depth: i32 = 0;
    let mut in_string = false;
    let mut start = 0usize;
    let mut i = 0usize;
    while i < bytes.len() {
        let c = bytes[i];
        if in_string {
            if c == b'\\' {
                i += 2;
                continue;
            }
            if c == b'"' {
                in_string = false;
            }
            i += 1;
            continue;
        }
        match c {
            b'"' => {
                in_string = true;
                i += 1;
                continue;
            }
            b'(' => depth += 1,
            b')' => depth -= 1,
            _ => {}
        }
        if depth == 0
            && i + SEP.len() <= batch.len()
            && batch[i..i + SEP.len()].eq_ignore_ascii_case(SEP)
        {
            parts.push(batch[start..i].to_string());
            i += SEP.len();
            start = i;
            continue;
        }
        i += 1;
    }
    parts.push(batch[start..].to_string());
    for p in parts.iter_mut().skip(1) {
        let t = p.trim();
        if t.starts_with('(') && t.ends_with(')') {
            *p = t[1..t.len() - 1].to_string();
        } else {
            *p = t.to_string();
        }
    }
    parts
}

fn join_segments(parts: Vec<String>) -> String {
    let mut out = String::new();
    for (i, p) in parts.into_iter().enumerate() {
        if i == 0 {
            out.push_str(&p);
        } else {
            out.push_str(" UNION (");
            out.push_str(&p);
            out.push(')');
        }
    }
    out
}

/// Accumulate `fragment` into `batch`, the way result panes collect queries
/// over growing object sets.
///
/// When both the batch (or one of its UNION branches) and the fragment select
/// from literal object-id lists, and their text before and after the ids is
/// identical, the fragment's ids are spliced into the existing list. In every
/// other case the fragment is appended as a parenthesized UNION branch. The
/// comparison is purely textual; no parsing happens here, so the merge is safe
/// to apply to queries this crate cannot fully parse.
pub fn union(batch: &mut String, fragment: &str) {
    if batch.is_empty() {
        batch.push_str(fragment);
        return;
    }
    if let Some((fprefix, fids, fsuffix)) = decompose(fragment) {
        let mut parts = split_segments(batch);
        let mut merged_at = None;
        for (idx, part) in parts.iter().enumerate().rev() {
            if let Some((pprefix, pids, psuffix)) = decompose(part) {
                if pprefix == fprefix && psuffix == fsuffix {
                    merged_at = Some((idx, format!("{pprefix}{pids},{fids}{psuffix}")));
                    break;
                }
            }
        }
        if let Some((idx, replacement)) = merged_at {
            parts[idx] = replacement;
            *batch = join_segments(parts);
            return;
        }
    }
    batch.push_str(" UNION (");
    batch.push_str(fragment);
    batch.push(')');
}

#[test]
fn parse_roundtrips_canonically() {
    let q = parse_query("select * from java.lang.String s where s.count > 100").unwrap();
    assert_eq!(
        q.to_string(),
        "SELECT * FROM java.lang.String s WHERE s.count > 100"
    );
}

#[test]
fn parse_select_items_and_flags() {
    let q = parse_query(
        "SELECT DISTINCT s.value, toHex(s.@objectAddress) AS addr FROM INSTANCEOF java.util.AbstractList s",
    )
    .unwrap();
    assert!(q.select.distinct);
    assert_eq!(q.select.items.len(), 2);
    assert_eq!(q.select.items[1].column_name(), "addr");
    assert!(q.from.include_subclasses);
    assert_eq!(q.from.alias.as_deref(), Some("s"));
}

#[test]
fn parse_from_id_and_address_lists() {
    let q = parse_query("SELECT * FROM 1,2,3").unwrap();
    match &q.from.source {
        ir::FromSource::ObjectIds(ids) => assert_eq!(ids, &vec![1, 2, 3]),
        other => panic!("unexpected source {other:?}"),
    }

    let q = parse_query("SELECT * FROM 0x1000,0x1040").unwrap();
    match &q.from.source {
        ir::FromSource::ObjectAddresses(addrs) => assert_eq!(addrs, &vec![0x1000, 0x1040]),
        other => panic!("unexpected source {other:?}"),
    }

    assert!(parse_query("SELECT * FROM 1,0x1040").is_err());
}

#[test]
fn parse_union_and_subquery() {
    let q = parse_query(
        "SELECT * FROM 1 UNION (SELECT * FROM (SELECT * FROM java.lang.String) WHERE true)",
    )
    .unwrap();
    assert_eq!(q.unions.len(), 1);
    match &q.unions[0].from.source {
        ir::FromSource::SubQuery(_) => {}
        other => panic!("unexpected source {other:?}"),
    }
}

#[test]
fn parse_rejects_non_literal_like_pattern() {
    assert!(parse_query("SELECT * FROM 1 s WHERE s.name LIKE s.other").is_err());
}

#[test]
fn union_splices_matching_id_lists() {
    let mut batch = String::from("SELECT * FROM 1,2 s WHERE s.value > 5");
    union(&mut batch, "SELECT * FROM 7,8 s WHERE s.value > 5");
    assert_eq!(batch, "SELECT * FROM 1,2,7,8 s WHERE s.value > 5");
}

#[test]
fn union_appends_when_suffix_differs() {
    let mut batch = String::from("SELECT * FROM 1,2 s WHERE s.value > 5");
    union(&mut batch, "SELECT * FROM 7,8 s WHERE s.value > 9");
    assert_eq!(
        batch,
        "SELECT * FROM 1,2 s WHERE s.value > 5 UNION (SELECT * FROM 7,8 s WHERE s.value > 9)"
    );
}

#[test]
fn union_merges_into_matching_branch() {
    let mut batch = String::from("SELECT * FROM 1,2 s WHERE s.value > 5");
    union(&mut batch, "SELECT * FROM 3 t WHERE t.value > 9");
    union(&mut batch, "SELECT * FROM 4 t WHERE t.value > 9");
    assert_eq!(
        batch,
        "SELECT * FROM 1,2 s WHERE s.value > 5 UNION (SELECT * FROM 3,4 t WHERE t.value > 9)"
    );
}

#[test]
fn union_starts_empty_batch() {
    let mut batch = String::new();
    union(&mut batch, "SELECT * FROM 5");
    assert_eq!(batch, "SELECT * FROM 5");
}
