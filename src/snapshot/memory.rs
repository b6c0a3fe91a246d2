//! A storage-free, in-memory `Snapshot` implementation.
//!
//! The real storage engine lives outside this crate; this implementation keeps
//! the whole object graph in hash maps so the evaluator can be exercised
//! without a dump file. It is used throughout the test suite and is exported
//! for downstream consumers that want the same convenience.

use std::collections::HashMap;

use crate::snapshot::{ClassInfo, Snapshot, SnapshotError};
use crate::value::{ObjectId, Value};

#[derive(Debug, Default)]
struct ObjectRec {
    address: u64,
    class: ObjectId,
    fields: HashMap<String, Value>,
    array: Option<Vec<Value>>,
    entries: Option<Vec<ObjectId>>,
    collection_size: Option<usize>,
    display: Option<String>,
    used_size: i64,
    retained_size: i64,
    outbound: Vec<ObjectId>,
    inbound: Vec<ObjectId>,
    dominator: Option<ObjectId>,
    dominated: Vec<ObjectId>,
}

#[derive(Debug)]
struct ClassRec {
    info: ClassInfo,
    statics: HashMap<String, Value>,
    instances: Vec<ObjectId>,
}

#[derive(Debug, Default)]
pub struct MemorySnapshot {
    objects: HashMap<ObjectId, ObjectRec>,
    classes: HashMap<ObjectId, ClassRec>,
    by_address: HashMap<u64, ObjectId>,
}

impl MemorySnapshot {
    fn object(&self, id: ObjectId) -> Result<&ObjectRec, SnapshotError> {
        self.objects.get(&id).ok_or(SnapshotError::UnknownObject(id))
    }

    fn class(&self, id: ObjectId) -> Result<&ClassRec, SnapshotError> {
        self.classes.get(&id).ok_or(SnapshotError::NotAClass(id))
    }

    /// True if `class_id` has `ancestor` somewhere in its superclass chain
    fn descends_from(&self, class_id: ObjectId, ancestor: ObjectId) -> bool {
        let mut cur = Some(class_id);
        while let Some(c) = cur {
            if c == ancestor {
                return true;
            }
            cur = self
                .classes
                .get(&c)
                .and_then(|rec| rec.info.super_class);
        }
        false
    }

    fn expand_subclasses(&self, roots: Vec<ObjectId>) -> Vec<ObjectId> {
        let mut out = Vec::new();
        for (id, _) in sorted_classes(&self.classes) {
            if roots.iter().any(|r| *r != id && self.descends_from(id, *r)) || roots.contains(&id) {
                out.push(id);
            }
        }
        out
    }
}

// Deterministic iteration order keeps query results stable across runs.
fn sorted_classes(classes: &HashMap<ObjectId, ClassRec>) -> Vec<(ObjectId, &ClassRec)> {
    let mut v: Vec<_> = classes.iter().map(|(id, rec)| (*id, rec)).collect();
    v.sort_by_key(|(id, _)| *id);
    v
}

impl Snapshot for MemorySnapshot {
    fn map_address_to_id(&self, address: u64) -> Result<ObjectId, SnapshotError> {
        self.by_address
            .get(&address)
            .copied()
            .ok_or(SnapshotError::BadAddress(address))
    }

    fn object_address(&self, id: ObjectId) -> Result<u64, SnapshotError> {
        Ok(self.object(id)?.address)
    }

    fn class_of(&self, id: ObjectId) -> Result<ObjectId, SnapshotError> {
        Ok(self.object(id)?.class)
    }

    fn class_info(&self, class_id: ObjectId) -> Result<ClassInfo, SnapshotError> {
        Ok(self.class(class_id)?.info.clone())
    }

    fn is_class(&self, id: ObjectId) -> bool {
        self.classes.contains_key(&id)
    }

    fn classes_by_name(
        &self,
        name: &str,
        include_subclasses: bool,
    ) -> Result<Vec<ObjectId>, SnapshotError> {
        let mut roots = Vec::new();
        for (id, rec) in sorted_classes(&self.classes) {
            if rec.info.name == name {
                roots.push(id);
            }
        }
        if include_subclasses {
            Ok(self.expand_subclasses(roots))
        } else {
            Ok(roots)
        }
    }

    fn classes_by_pattern(
        &self,
        pattern: &regex::Regex,
        include_subclasses: bool,
    ) -> Result<Vec<ObjectId>, SnapshotError> {
        let mut roots = Vec::new();
        for (id, rec) in sorted_classes(&self.classes) {
            if pattern.is_match(&rec.info.name) {
                roots.push(id);
            }
        }
        if include_subclasses {
            Ok(self.expand_subclasses(roots))
        } else {
            Ok(roots)
        }
    }

    fn objects_of_class(&self, class_id: ObjectId) -> Result<Vec<ObjectId>, SnapshotError> {
        Ok(self.class(class_id)?.instances.clone())
    }

    fn field_value(&self, id: ObjectId, field: &str) -> Result<Option<Value>, SnapshotError> {
        Ok(self.object(id)?.fields.get(field).cloned())
    }

    fn static_field_value(
        &self,
        class_id: ObjectId,
        field: &str,
    ) -> Result<Option<Value>, SnapshotError> {
        Ok(self.class(class_id)?.statics.get(field).cloned())
    }

    fn display_name(&self, id: ObjectId) -> Result<String, SnapshotError> {
        let obj = self.object(id)?;
        if let Some(d) = &obj.display {
            return Ok(d.clone());
        }
        if let Some(rec) = self.classes.get(&id) {
            return Ok(format!("class {}", rec.info.name));
        }
        let class_name = self
            .classes
            .get(&obj.class)
            .map(|rec| rec.info.name.clone())
            .unwrap_or_else(|| "<unknown>".into());
        Ok(format!("{} @ 0x{:x}", class_name, obj.address))
    }

    fn used_heap_size(&self, id: ObjectId) -> Result<i64, SnapshotError> {
        Ok(self.object(id)?.used_size)
    }

    fn retained_heap_size(&self, id: ObjectId) -> Result<i64, SnapshotError> {
        Ok(self.object(id)?.retained_size)
    }

    fn outbound_refs(&self, id: ObjectId) -> Result<Vec<ObjectId>, SnapshotError> {
        Ok(self.object(id)?.outbound.clone())
    }

    fn inbound_refs(&self, id: ObjectId) -> Result<Vec<ObjectId>, SnapshotError> {
        Ok(self.object(id)?.inbound.clone())
    }

    fn immediate_dominator(&self, id: ObjectId) -> Result<Option<ObjectId>, SnapshotError> {
        Ok(self.object(id)?.dominator)
    }

    fn immediate_dominated(&self, id: ObjectId) -> Result<Vec<ObjectId>, SnapshotError> {
        Ok(self.object(id)?.dominated.clone())
    }

    fn array_length(&self, id: ObjectId) -> Result<Option<usize>, SnapshotError> {
        Ok(self.object(id)?.array.as_ref().map(|a| a.len()))
    }

    fn array_element(&self, id: ObjectId, index: usize) -> Result<Value, SnapshotError> {
        let obj = self.object(id)?;
        let arr = obj.array.as_ref().ok_or(SnapshotError::NotAnArray(id))?;
        arr.get(index)
            .cloned()
            .ok_or(SnapshotError::ArrayIndexOutOfBounds(id, index))
    }

    fn extract_entries(&self, id: ObjectId) -> Result<Option<Vec<ObjectId>>, SnapshotError> {
        Ok(self.object(id)?.entries.clone())
    }

    fn collection_size(&self, id: ObjectId) -> Result<Option<usize>, SnapshotError> {
        let obj = self.object(id)?;
        Ok(obj
            .collection_size
            .or_else(|| obj.entries.as_ref().map(|e| e.len())))
    }
}

/// Assembles a `MemorySnapshot` one class and object at a time.
///
/// Addresses are assigned sequentially unless set explicitly; inbound
/// references and the dominated sets are derived from their inverses at
/// `build` time.
pub struct SnapshotBuilder {
    snapshot: MemorySnapshot,
    next_id: ObjectId,
    next_address: u64,
}

impl Default for SnapshotBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SnapshotBuilder {
    pub fn new() -> Self {
        SnapshotBuilder {
            snapshot: MemorySnapshot::default(),
            next_id: 1,
            next_address: 0x1000,
        }
    }

    fn fresh(&mut self, class: ObjectId) -> ObjectId {
        let id = self.next_id;
        self.next_id += 1;
        let address = self.next_address;
        self.next_address += 0x40;
        self.snapshot.by_address.insert(address, id);
        self.snapshot.objects.insert(
            id,
            ObjectRec {
                address,
                class,
                ..ObjectRec::default()
            },
        );
        id
    }

    pub fn add_class(
        &mut self,
        name: &str,
        super_class: Option<ObjectId>,
        interfaces: &[&str],
        field_names: &[&str],
    ) -> ObjectId {
        // A class is itself an object; its class pointer refers to itself,
        // which is close enough for a graph with no java.lang.Class entry.
        let id = self.fresh(0);
        self.snapshot.objects.get_mut(&id).unwrap().class = id;
        self.snapshot.classes.insert(
            id,
            ClassRec {
                info: ClassInfo {
                    name: name.into(),
                    super_class,
                    interfaces: interfaces.iter().map(|s| s.to_string()).collect(),
                    field_names: field_names.iter().map(|s| s.to_string()).collect(),
                },
                statics: HashMap::new(),
                instances: Vec::new(),
            },
        );
        id
    }

    pub fn add_object(&mut self, class: ObjectId) -> ObjectId {
        let id = self.fresh(class);
        if let Some(rec) = self.snapshot.classes.get_mut(&class) {
            rec.instances.push(id);
        }
        id
    }

    pub fn set_field(&mut self, id: ObjectId, name: &str, value: Value) -> &mut Self {
        self.snapshot
            .objects
            .get_mut(&id)
            .expect("unknown object in builder")
            .fields
            .insert(name.into(), value);
        self
    }

    pub fn set_static(&mut self, class_id: ObjectId, name: &str, value: Value) -> &mut Self {
        self.snapshot
            .classes
            .get_mut(&class_id)
            .expect("unknown class in builder")
            .statics
            .insert(name.into(), value);
        self
    }

    pub fn set_array(&mut self, id: ObjectId, elements: Vec<Value>) -> &mut Self {
        self.snapshot.objects.get_mut(&id).unwrap().array = Some(elements);
        self
    }

    /// Mark `id` as an extractable collection. The declared size may exceed
    /// the entry count, mirroring extractors that under-report.
    pub fn set_entries(
        &mut self,
        id: ObjectId,
        entries: Vec<ObjectId>,
        declared_size: usize,
    ) -> &mut Self {
        let obj = self.snapshot.objects.get_mut(&id).unwrap();
        obj.entries = Some(entries);
        obj.collection_size = Some(declared_size);
        self
    }

    pub fn set_display_name(&mut self, id: ObjectId, name: &str) -> &mut Self {
        self.snapshot.objects.get_mut(&id).unwrap().display = Some(name.into());
        self
    }

    pub fn set_sizes(&mut self, id: ObjectId, used: i64, retained: i64) -> &mut Self {
        let obj = self.snapshot.objects.get_mut(&id).unwrap();
        obj.used_size = used;
        obj.retained_size = retained;
        self
    }

    pub fn set_outbound(&mut self, id: ObjectId, targets: Vec<ObjectId>) -> &mut Self {
        self.snapshot.objects.get_mut(&id).unwrap().outbound = targets;
        self
    }

    pub fn set_dominator(&mut self, id: ObjectId, dominator: ObjectId) -> &mut Self {
        self.snapshot.objects.get_mut(&id).unwrap().dominator = Some(dominator);
        self
    }

    pub fn address_of(&self, id: ObjectId) -> u64 {
        self.snapshot.objects[&id].address
    }

    pub fn build(mut self) -> MemorySnapshot {
        let ids: Vec<ObjectId> = self.snapshot.objects.keys().copied().collect();
        for id in ids {
            let outbound = self.snapshot.objects[&id].outbound.clone();
            for target in outbound {
                if let Some(t) = self.snapshot.objects.get_mut(&target) {
                    t.inbound.push(id);
                }
            }
            let dominator = self.snapshot.objects[&id].dominator;
            if let Some(d) = dominator {
                if let Some(dom) = self.snapshot.objects.get_mut(&d) {
                    dom.dominated.push(id);
                }
            }
        }
        self.snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_round_trip() {
        let mut b = SnapshotBuilder::new();
        let list_cls = b.add_class("java.util.ArrayList", None, &["java.util.List"], &["size"]);
        let obj = b.add_object(list_cls);
        b.set_field(obj, "size", Value::Int(2));
        let addr = b.address_of(obj);
        let snap = b.build();

        assert_eq!(snap.map_address_to_id(addr).unwrap(), obj);
        assert_eq!(snap.class_of(obj).unwrap(), list_cls);
        assert_eq!(
            snap.field_value(obj, "size").unwrap(),
            Some(Value::Int(2))
        );
        assert_eq!(snap.field_value(obj, "missing").unwrap(), None);
        assert_eq!(
            snap.classes_by_name("java.util.ArrayList", false).unwrap(),
            vec![list_cls]
        );
        assert_eq!(snap.objects_of_class(list_cls).unwrap(), vec![obj]);
    }

    #[test]
    fn subclasses_are_expanded() {
        let mut b = SnapshotBuilder::new();
        let base = b.add_class("java.util.AbstractList", None, &[], &[]);
        let sub = b.add_class("java.util.ArrayList", Some(base), &[], &[]);
        let snap = b.build();

        let only = snap.classes_by_name("java.util.AbstractList", false).unwrap();
        assert_eq!(only, vec![base]);
        let with_subs = snap.classes_by_name("java.util.AbstractList", true).unwrap();
        assert_eq!(with_subs, vec![base, sub]);
    }

    #[test]
    fn inverse_edges_derived_at_build() {
        let mut b = SnapshotBuilder::new();
        let cls = b.add_class("X", None, &[], &[]);
        let a = b.add_object(cls);
        let c = b.add_object(cls);
        b.set_outbound(a, vec![c]);
        b.set_dominator(c, a);
        let snap = b.build();

        assert_eq!(snap.inbound_refs(c).unwrap(), vec![a]);
        assert_eq!(snap.immediate_dominated(a).unwrap(), vec![c]);
        assert_eq!(snap.immediate_dominator(c).unwrap(), Some(a));
    }
}
