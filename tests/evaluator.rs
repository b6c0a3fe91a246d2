#![cfg(test)]
use std::cell::Cell;
use std::sync::atomic::{AtomicUsize, Ordering};

use heapql::eval::errors::EvalError;
use heapql::query::parser::parse_expression;
use heapql::{
    execute_query, parse_query, ClassInfo, EvaluationContext, MemorySnapshot, MethodPolicy,
    NoProgress, ObjectId, ProgressListener, QueryOutcome, Session, Snapshot, SnapshotError, Value,
};

mod common;

fn compute(expr_text: &str, fx: &common::Fixture, subject: Value) -> anyhow::Result<Value> {
    let session = Session::new();
    let progress = NoProgress;
    let root = EvaluationContext::root(&fx.snapshot, &progress, &session);
    let mut ctx = root.nested();
    ctx.set_alias(Some("s"));
    ctx.set_subject(subject);
    parse_expression(expr_text)?.compute(&ctx)
}

#[test]
fn native_attributes_read_through_the_snapshot() {
    let fx = common::fixture();
    let subject = Value::Object(fx.s1);
    assert_eq!(
        compute("s.@usedHeapSize", &fx, subject.clone()).unwrap(),
        Value::Long(24)
    );
    assert_eq!(
        compute("s.@retainedHeapSize", &fx, subject.clone()).unwrap(),
        Value::Long(64)
    );
    assert_eq!(
        compute("s.@displayName", &fx, subject.clone()).unwrap(),
        Value::String("hello".to_string())
    );
    assert_eq!(
        compute("s.@clazz", &fx, subject).unwrap(),
        Value::Object(fx.string_class)
    );
}

#[test]
fn a_null_along_a_path_makes_the_path_null() {
    let fx = common::fixture();
    assert_eq!(
        compute("s.next.name", &fx, Value::Object(fx.n1)).unwrap(),
        Value::String("beta".to_string())
    );
    assert_eq!(
        compute("s.next.next.name", &fx, Value::Object(fx.n1)).unwrap(),
        Value::Null
    );
}

#[test]
fn a_misspelled_field_is_an_error_not_null() {
    let fx = common::fixture();
    let err = compute("s.nmae", &fx, Value::Object(fx.n1)).unwrap_err();
    assert!(err.to_string().contains("nmae"));
}

#[test]
fn array_indexing_wraps_and_bounds() {
    let fx = common::fixture();
    let subject = Value::Object(fx.s1);
    assert_eq!(
        compute("s.value[0]", &fx, subject.clone()).unwrap(),
        Value::Char('h')
    );
    assert_eq!(
        compute("s.value[-1]", &fx, subject.clone()).unwrap(),
        Value::Char('o')
    );
    assert_eq!(compute("s.value[10]", &fx, subject).unwrap(), Value::Null);
}

#[test]
fn unresolved_collection_entries_read_as_null() {
    let fx = common::fixture();
    // three declared entries, two resolved by the extractor
    let subject = Value::Object(fx.list);
    assert_eq!(
        compute("s[0]", &fx, subject.clone()).unwrap(),
        Value::Object(fx.n1)
    );
    assert_eq!(compute("s[2]", &fx, subject.clone()).unwrap(), Value::Null);
    assert_eq!(compute("s[3]", &fx, subject).unwrap(), Value::Null);
}

#[test]
fn long_valued_indexes_are_rejected() {
    let fx = common::fixture();
    let err = compute("s.value[1L]", &fx, Value::Object(fx.s1)).unwrap_err();
    assert!(err.to_string().contains("must be an integer"));
}

#[test]
fn overload_order_prefers_the_positional_remove() {
    let fx = common::fixture();
    let subject = Value::Object(fx.s1);
    // an int argument picks remove(int), which reads positionally
    assert_eq!(
        compute("s.value[0:5].remove(1)", &fx, subject.clone()).unwrap(),
        Value::Char('e')
    );
    // any other argument falls through to remove(Object)
    assert_eq!(
        compute("s.value[0:5].remove('e')", &fx, subject).unwrap(),
        Value::Boolean(true)
    );
}

#[test]
fn a_null_method_subject_yields_null() {
    let fx = common::fixture();
    assert_eq!(
        compute("s.next.next.toString()", &fx, Value::Object(fx.n1)).unwrap(),
        Value::Null
    );
}

#[test]
fn the_method_filter_blocks_calls() {
    let fx = common::fixture();
    let session = Session::with_policy(MethodPolicy::parse(
        "!java.lang.String#substring;java.lang.String#*",
    ));
    let progress = NoProgress;
    let root = EvaluationContext::root(&fx.snapshot, &progress, &session);
    let mut ctx = root.nested();
    ctx.set_alias(Some("s"));
    ctx.set_subject(Value::Object(fx.s1));

    let allowed = parse_expression("s.toString().toUpperCase()")
        .unwrap()
        .compute(&ctx)
        .unwrap();
    assert_eq!(allowed, Value::String("HELLO".to_string()));

    let err = parse_expression("s.toString().substring(1)")
        .unwrap()
        .compute(&ctx)
        .unwrap_err();
    match err.downcast_ref::<EvalError>() {
        Some(EvalError::AccessDenied { qualified, .. }) => {
            assert_eq!(qualified, "java.lang.String#substring");
        }
        other => panic!("unexpected error {other:?}"),
    }
}

#[test]
fn unary_minus_applies_after_postfix_steps() {
    let fx = common::fixture();
    assert_eq!(
        compute("-s.count", &fx, Value::Object(fx.s1)).unwrap(),
        Value::Int(-5)
    );
    assert_eq!(
        compute("-s.value[0:5].size()", &fx, Value::Object(fx.s1)).unwrap(),
        Value::Int(-5)
    );
    assert_eq!(compute("-2", &fx, Value::Null).unwrap(), Value::Int(-2));
}

#[test]
fn table_subqueries_in_from_bind_named_rows() {
    let fx = common::fixture();
    let q = parse_query(
        "SELECT r.cnt FROM (SELECT s.count AS cnt FROM java.lang.String s) r WHERE r.cnt > 4",
    )
    .unwrap();
    let session = Session::new();
    match execute_query(&q, &fx.snapshot, &NoProgress, &session).unwrap() {
        QueryOutcome::Table(t) => {
            assert_eq!(t.columns, vec!["r.cnt".to_string()]);
            assert_eq!(t.rows.len(), 2);
            assert_eq!(t.rows[0][0], Value::Int(5));
            assert_eq!(t.rows[1][0], Value::Int(6));
        }
        other => panic!("unexpected outcome {other:?}"),
    }
}

#[test]
fn context_dependence_follows_alias_visibility() {
    let fx = common::fixture();
    let session = Session::new();
    let progress = NoProgress;
    let root = EvaluationContext::root(&fx.snapshot, &progress, &session);
    let mut ctx = root.nested();
    ctx.set_alias(Some("s"));
    ctx.set_subject(Value::Object(fx.s1));

    let independent = parse_expression("(SELECT * FROM java.lang.String)").unwrap();
    assert!(!independent.is_context_dependent(&ctx));

    let correlated =
        parse_expression("(SELECT * FROM java.lang.String t WHERE t.count > s.count)").unwrap();
    assert!(correlated.is_context_dependent(&ctx));
}

#[test]
fn from_addresses_resolve_through_the_snapshot() {
    let fx = common::fixture();
    let a1 = fx.snapshot.object_address(fx.s1).unwrap();
    let a2 = fx.snapshot.object_address(fx.s3).unwrap();
    let q = parse_query(&format!("SELECT * FROM 0x{a1:x},0x{a2:x}")).unwrap();
    let session = Session::new();
    let outcome = execute_query(&q, &fx.snapshot, &NoProgress, &session).unwrap();
    assert_eq!(outcome, QueryOutcome::Objects(vec![fx.s1, fx.s3]));
}

#[test]
fn in_subquery_filters_rows() {
    let fx = common::fixture();
    let q = parse_query(
        "SELECT * FROM com.example.Node n WHERE n in (SELECT OBJECTS a[0:1] FROM java.util.ArrayList a)",
    )
    .unwrap();
    let session = Session::new();
    let outcome = execute_query(&q, &fx.snapshot, &NoProgress, &session).unwrap();
    assert_eq!(outcome, QueryOutcome::Objects(vec![fx.n1]));
}

#[test]
fn select_columns_are_named_by_their_text_or_alias() {
    let fx = common::fixture();
    let q = parse_query("SELECT s.count, toHex(s.@objectAddress) AS addr FROM java.lang.String s")
        .unwrap();
    let session = Session::new();
    match execute_query(&q, &fx.snapshot, &NoProgress, &session).unwrap() {
        QueryOutcome::Table(t) => {
            assert_eq!(t.columns, vec!["s.count".to_string(), "addr".to_string()]);
            assert_eq!(t.rows.len(), 3);
        }
        other => panic!("unexpected outcome {other:?}"),
    }
}

#[test]
fn a_non_boolean_where_clause_is_an_error() {
    let fx = common::fixture();
    let q = parse_query("SELECT * FROM java.lang.String s WHERE s.count").unwrap();
    let session = Session::new();
    let err = execute_query(&q, &fx.snapshot, &NoProgress, &session).unwrap_err();
    assert!(err.to_string().contains("expected a boolean"));
}

struct CancelAfter {
    remaining: AtomicUsize,
}

impl ProgressListener for CancelAfter {
    fn is_canceled(&self) -> bool {
        // count down one poll at a time
        loop {
            let n = self.remaining.load(Ordering::SeqCst);
            if n == 0 {
                return true;
            }
            if self
                .remaining
                .compare_exchange(n, n - 1, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return false;
            }
        }
    }

    fn send_message(&self, _message: &str) {}
}

#[test]
fn cancellation_surfaces_as_a_distinguishable_error() {
    let fx = common::fixture();
    let q = parse_query("SELECT * FROM java.lang.String s WHERE s.count > 0").unwrap();
    let session = Session::new();
    let progress = CancelAfter {
        remaining: AtomicUsize::new(1),
    };
    let err = execute_query(&q, &fx.snapshot, &progress, &session).unwrap_err();
    match err.downcast_ref::<EvalError>() {
        Some(EvalError::Canceled) => {}
        other => panic!("unexpected error {other:?}"),
    }
}

/// Delegates to a real snapshot while counting class lookups, which happen
/// exactly once per FROM clause execution
struct CountingSnapshot<'a> {
    inner: &'a MemorySnapshot,
    class_lookups: Cell<usize>,
}

impl Snapshot for CountingSnapshot<'_> {
    fn map_address_to_id(&self, address: u64) -> Result<ObjectId, SnapshotError> {
        self.inner.map_address_to_id(address)
    }

    fn object_address(&self, id: ObjectId) -> Result<u64, SnapshotError> {
        self.inner.object_address(id)
    }

    fn class_of(&self, id: ObjectId) -> Result<ObjectId, SnapshotError> {
        self.inner.class_of(id)
    }

    fn class_info(&self, class_id: ObjectId) -> Result<ClassInfo, SnapshotError> {
        self.inner.class_info(class_id)
    }

    fn is_class(&self, id: ObjectId) -> bool {
        self.inner.is_class(id)
    }

    fn classes_by_name(
        &self,
        name: &str,
        include_subclasses: bool,
    ) -> Result<Vec<ObjectId>, SnapshotError> {
        self.class_lookups.set(self.class_lookups.get() + 1);
        self.inner.classes_by_name(name, include_subclasses)
    }

    fn classes_by_pattern(
        &self,
        pattern: &regex::Regex,
        include_subclasses: bool,
    ) -> Result<Vec<ObjectId>, SnapshotError> {
        self.inner.classes_by_pattern(pattern, include_subclasses)
    }

    fn objects_of_class(&self, class_id: ObjectId) -> Result<Vec<ObjectId>, SnapshotError> {
        self.inner.objects_of_class(class_id)
    }

    fn field_value(&self, id: ObjectId, field: &str) -> Result<Option<Value>, SnapshotError> {
        self.inner.field_value(id, field)
    }

    fn static_field_value(
        &self,
        class_id: ObjectId,
        field: &str,
    ) -> Result<Option<Value>, SnapshotError> {
        self.inner.static_field_value(class_id, field)
    }

    fn display_name(&self, id: ObjectId) -> Result<String, SnapshotError> {
        self.inner.display_name(id)
    }

    fn used_heap_size(&self, id: ObjectId) -> Result<i64, SnapshotError> {
        self.inner.used_heap_size(id)
    }

    fn retained_heap_size(&self, id: ObjectId) -> Result<i64, SnapshotError> {
        self.inner.retained_heap_size(id)
    }

    fn outbound_refs(&self, id: ObjectId) -> Result<Vec<ObjectId>, SnapshotError> {
        self.inner.outbound_refs(id)
    }

    fn inbound_refs(&self, id: ObjectId) -> Result<Vec<ObjectId>, SnapshotError> {
        self.inner.inbound_refs(id)
    }

    fn immediate_dominator(&self, id: ObjectId) -> Result<Option<ObjectId>, SnapshotError> {
        self.inner.immediate_dominator(id)
    }

    fn immediate_dominated(&self, id: ObjectId) -> Result<Vec<ObjectId>, SnapshotError> {
        self.inner.immediate_dominated(id)
    }

    fn array_length(&self, id: ObjectId) -> Result<Option<usize>, SnapshotError> {
        self.inner.array_length(id)
    }

    fn array_element(&self, id: ObjectId, index: usize) -> Result<Value, SnapshotError> {
        self.inner.array_element(id, index)
    }

    fn extract_entries(&self, id: ObjectId) -> Result<Option<Vec<ObjectId>>, SnapshotError> {
        self.inner.extract_entries(id)
    }

    fn collection_size(&self, id: ObjectId) -> Result<Option<usize>, SnapshotError> {
        self.inner.collection_size(id)
    }
}

#[test]
fn independent_subqueries_execute_once_across_rows() {
    let fx = common::fixture();

    // one lookup for the outer FROM, one for the sub-query on its first row;
    // the cached result serves the second Node row
    let counting = CountingSnapshot {
        inner: &fx.snapshot,
        class_lookups: Cell::new(0),
    };
    let q = parse_query(
        "SELECT * FROM com.example.Node n WHERE n in (SELECT OBJECTS a[0:1] FROM java.util.ArrayList a)",
    )
    .unwrap();
    let session = Session::new();
    let outcome = execute_query(&q, &counting, &NoProgress, &session).unwrap();
    assert_eq!(outcome, QueryOutcome::Objects(vec![fx.n1]));
    assert_eq!(counting.class_lookups.get(), 2);

    // a sub-query reading the outer alias re-runs on every row
    let counting = CountingSnapshot {
        inner: &fx.snapshot,
        class_lookups: Cell::new(0),
    };
    let q = parse_query(
        "SELECT * FROM com.example.Node n WHERE n in (SELECT OBJECTS t FROM java.lang.String t WHERE t.count > n.@objectId)",
    )
    .unwrap();
    let session = Session::new();
    execute_query(&q, &counting, &NoProgress, &session).unwrap();
    assert_eq!(counting.class_lookups.get(), 3);
}

#[test]
fn division_and_concatenation_through_full_queries() {
    let fx = common::fixture();
    let q = parse_query(
        "SELECT s.count / 2, \"n=\" + s.count FROM java.lang.String s WHERE s.count = 5",
    )
    .unwrap();
    let session = Session::new();
    match execute_query(&q, &fx.snapshot, &NoProgress, &session).unwrap() {
        QueryOutcome::Table(t) => {
            assert_eq!(t.rows.len(), 1);
            assert_eq!(t.rows[0][0], Value::Double(2.5));
            assert_eq!(t.rows[0][1], Value::String("n=5".to_string()));
        }
        other => panic!("unexpected outcome {other:?}"),
    }
}
