/// The boundary to the heap-dump storage engine
///
/// The evaluator never parses heap dumps itself; everything it knows about
/// objects, classes, references and the dominator tree comes through the
/// `Snapshot` trait. Errors raised by an implementation are propagated to the
/// query caller unchanged.
pub mod memory;

use thiserror::Error;

use crate::value::{ObjectId, Value};

#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("no object at address 0x{0:x}")]
    BadAddress(u64),
    #[error("unknown object id {0}")]
    UnknownObject(ObjectId),
    #[error("object #{0} is not a class")]
    NotAClass(ObjectId),
    #[error("object #{0} is not an array")]
    NotAnArray(ObjectId),
    #[error("array index {1} out of bounds for object #{0}")]
    ArrayIndexOutOfBounds(ObjectId, usize),
    #[error("snapshot has been closed")]
    Closed,
}

/// Class metadata as recorded in the dump
#[derive(Debug, Clone, PartialEq)]
pub struct ClassInfo {
    pub name: String,
    pub super_class: Option<ObjectId>,
    /// Names of the interfaces this class declares directly
    pub interfaces: Vec<String>,
    /// Instance field names declared by this class (not inherited)
    pub field_names: Vec<String>,
}

/// Read access to a loaded heap dump
///
/// Implementations are assumed safe to call synchronously from the evaluating
/// thread; the evaluator itself takes no locks and performs no I/O.
pub trait Snapshot {
    fn map_address_to_id(&self, address: u64) -> Result<ObjectId, SnapshotError>;

    fn object_address(&self, id: ObjectId) -> Result<u64, SnapshotError>;

    /// The id of the class object describing `id`
    fn class_of(&self, id: ObjectId) -> Result<ObjectId, SnapshotError>;

    fn class_info(&self, class_id: ObjectId) -> Result<ClassInfo, SnapshotError>;

    fn is_class(&self, id: ObjectId) -> bool;

    /// Class objects with exactly this name, optionally together with all
    /// transitive subclasses
    fn classes_by_name(
        &self,
        name: &str,
        include_subclasses: bool,
    ) -> Result<Vec<ObjectId>, SnapshotError>;

    fn classes_by_pattern(
        &self,
        pattern: &regex::Regex,
        include_subclasses: bool,
    ) -> Result<Vec<ObjectId>, SnapshotError>;

    fn objects_of_class(&self, class_id: ObjectId) -> Result<Vec<ObjectId>, SnapshotError>;

    /// Resolve an instance field by name; `Ok(None)` means the field does not
    /// exist on this object
    fn field_value(&self, id: ObjectId, field: &str) -> Result<Option<Value>, SnapshotError>;

    fn static_field_value(
        &self,
        class_id: ObjectId,
        field: &str,
    ) -> Result<Option<Value>, SnapshotError>;

    /// The resolved display name (class name plus identifying detail)
    fn display_name(&self, id: ObjectId) -> Result<String, SnapshotError>;

    fn used_heap_size(&self, id: ObjectId) -> Result<i64, SnapshotError>;

    fn retained_heap_size(&self, id: ObjectId) -> Result<i64, SnapshotError>;

    fn outbound_refs(&self, id: ObjectId) -> Result<Vec<ObjectId>, SnapshotError>;

    fn inbound_refs(&self, id: ObjectId) -> Result<Vec<ObjectId>, SnapshotError>;

    fn immediate_dominator(&self, id: ObjectId) -> Result<Option<ObjectId>, SnapshotError>;

    fn immediate_dominated(&self, id: ObjectId) -> Result<Vec<ObjectId>, SnapshotError>;

    /// `Ok(None)` if the object is not an array
    fn array_length(&self, id: ObjectId) -> Result<Option<usize>, SnapshotError>;

    /// Element of a primitive or object array; object elements come back as
    /// `Value::Object`
    fn array_element(&self, id: ObjectId, index: usize) -> Result<Value, SnapshotError>;

    /// Entry ids of an object recognized as a known collection layout, or
    /// `Ok(None)` if the object is not an extractable collection.
    ///
    /// Extractors may legitimately return fewer entries than the declared
    /// size, so callers must not assume the two agree.
    fn extract_entries(&self, id: ObjectId) -> Result<Option<Vec<ObjectId>>, SnapshotError>;

    /// The declared size of an extractable collection
    fn collection_size(&self, id: ObjectId) -> Result<Option<usize>, SnapshotError>;
}

/// Advisory cancellation and user messaging, polled at iteration points
pub trait ProgressListener {
    fn is_canceled(&self) -> bool;

    fn send_message(&self, message: &str);
}

/// A listener that never cancels and discards messages
pub struct NoProgress;

impl ProgressListener for NoProgress {
    fn is_canceled(&self) -> bool {
        false
    }

    fn send_message(&self, _message: &str) {}
}
