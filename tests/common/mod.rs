#![allow(dead_code)]
use heapql::{MemorySnapshot, ObjectId, SnapshotBuilder, Value};

/// Object ids of the shared fixture heap, in builder order
pub struct Fixture {
    pub snapshot: MemorySnapshot,
    pub string_class: ObjectId,
    pub list_class: ObjectId,
    pub s1: ObjectId,
    pub s2: ObjectId,
    pub s3: ObjectId,
    pub list: ObjectId,
    pub n1: ObjectId,
    pub n2: ObjectId,
    pub chars: ObjectId,
}

/// A small heap with strings, a collection, a two-node linked structure and
/// a char array, enough to exercise every query shape
pub fn fixture() -> Fixture {
    let mut b = SnapshotBuilder::new();

    let object_cls = b.add_class("java.lang.Object", None, &[], &[]);
    let string_cls = b.add_class(
        "java.lang.String",
        Some(object_cls),
        &["java.lang.CharSequence"],
        &["value", "count"],
    );
    let abstract_list_cls = b.add_class(
        "java.util.AbstractList",
        Some(object_cls),
        &["java.util.List"],
        &[],
    );
    let array_list_cls = b.add_class(
        "java.util.ArrayList",
        Some(abstract_list_cls),
        &["java.util.List"],
        &["size"],
    );
    let node_cls = b.add_class(
        "com.example.Node",
        Some(object_cls),
        &[],
        &["name", "next"],
    );
    let char_array_cls = b.add_class("char[]", Some(object_cls), &[], &[]);

    let s1 = b.add_object(string_cls);
    let s2 = b.add_object(string_cls);
    let s3 = b.add_object(string_cls);
    let list = b.add_object(array_list_cls);
    let n1 = b.add_object(node_cls);
    let n2 = b.add_object(node_cls);
    let chars = b.add_object(char_array_cls);

    b.set_field(s1, "count", Value::Int(5));
    b.set_field(s1, "value", Value::Object(chars));
    b.set_display_name(s1, "hello");
    b.set_sizes(s1, 24, 64);

    b.set_field(s2, "count", Value::Int(6));
    b.set_field(s2, "value", Value::Null);
    b.set_display_name(s2, "world!");
    b.set_sizes(s2, 24, 24);

    b.set_field(s3, "count", Value::Int(2));
    b.set_field(s3, "value", Value::Null);
    b.set_display_name(s3, "hi");
    b.set_sizes(s3, 24, 24);

    b.set_field(list, "size", Value::Int(3));
    // the extractor resolves two of the three declared entries
    b.set_entries(list, vec![n1, n2], 3);
    b.set_outbound(list, vec![n1, n2]);
    b.set_sizes(list, 48, 200);

    b.set_field(n1, "name", Value::String("alpha".to_string()));
    b.set_field(n1, "next", Value::Object(n2));
    b.set_outbound(n1, vec![n2]);
    b.set_sizes(n1, 16, 32);
    b.set_dominator(n1, list);

    b.set_field(n2, "name", Value::String("beta".to_string()));
    b.set_field(n2, "next", Value::Null);
    b.set_sizes(n2, 16, 16);
    b.set_dominator(n2, n1);

    b.set_array(
        chars,
        vec![
            Value::Char('h'),
            Value::Char('e'),
            Value::Char('l'),
            Value::Char('l'),
            Value::Char('o'),
        ],
    );
    b.set_sizes(chars, 40, 40);
    b.set_dominator(chars, s1);
    b.set_outbound(s1, vec![chars]);

    Fixture {
        snapshot: b.build(),
        string_class: string_cls,
        list_class: array_list_cls,
        s1,
        s2,
        s3,
        list,
        n1,
        n2,
        chars,
    }
}

pub fn sample_snapshot() -> MemorySnapshot {
    fixture().snapshot
}
