/// Evaluation contexts and per-session state
///
/// A context is one frame of a parent-linked chain. The executor pushes a
/// frame per query level; correlated sub-queries see the enclosing frames
/// through the parent link. Frames never copy their parents, so pushing is
/// cheap enough to do once per candidate row.
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use crate::eval::policy::MethodPolicy;
use crate::snapshot::{ProgressListener, Snapshot};
use crate::value::{ObjectId, Value};

/// State shared by every query run against the same snapshot
pub struct Session {
    pub policy: MethodPolicy,
    /// Cache of the full name closure (class, superclasses, interfaces) per
    /// class object, backing `implements`
    subtype_names: RefCell<HashMap<ObjectId, Rc<HashSet<String>>>>,
}

impl Session {
    pub fn new() -> Session {
        Session {
            policy: MethodPolicy::from_env(),
            subtype_names: RefCell::new(HashMap::new()),
        }
    }

    pub fn with_policy(policy: MethodPolicy) -> Session {
        Session {
            policy,
            subtype_names: RefCell::new(HashMap::new()),
        }
    }

    /// All names an instance of `class_id` answers to: its class chain and
    /// every interface declared along it
    pub fn type_names(
        &self,
        snapshot: &dyn Snapshot,
        class_id: ObjectId,
    ) -> anyhow::Result<Rc<HashSet<String>>> {
        if let Some(names) = self.subtype_names.borrow().get(&class_id) {
            return Ok(Rc::clone(names));
        }
        let mut names = HashSet::new();
        let mut cursor = Some(class_id);
        while let Some(cid) = cursor {
            let info = snapshot.class_info(cid)?;
            names.insert(info.name.clone());
            for itf in &info.interfaces {
                names.insert(itf.clone());
            }
            cursor = info.super_class;
        }
        let names = Rc::new(names);
        self.subtype_names
            .borrow_mut()
            .insert(class_id, Rc::clone(&names));
        Ok(names)
    }
}

impl Default for Session {
    fn default() -> Session {
        Session::new()
    }
}

/// One frame of the evaluation chain
pub struct EvaluationContext<'a> {
    parent: Option<&'a EvaluationContext<'a>>,
    alias: Option<String>,
    subject: Option<Value>,
    snapshot: Option<&'a dyn Snapshot>,
    progress: Option<&'a dyn ProgressListener>,
    session: Option<&'a Session>,
}

impl<'a> EvaluationContext<'a> {
    /// The outermost frame of a query run
    pub fn root(
        snapshot: &'a dyn Snapshot,
        progress: &'a dyn ProgressListener,
        session: &'a Session,
    ) -> EvaluationContext<'a> {
        EvaluationContext {
            parent: None,
            alias: None,
            subject: None,
            snapshot: Some(snapshot),
            progress: Some(progress),
            session: Some(session),
        }
    }

    /// A frame below `self`; unset fields fall through to the parent
    pub fn nested(&'a self) -> EvaluationContext<'a> {
        EvaluationContext {
            parent: Some(self),
            alias: None,
            subject: None,
            snapshot: None,
            progress: None,
            session: None,
        }
    }

    pub fn set_alias(&mut self, alias: Option<&str>) {
        self.alias = alias.map(str::to_string);
    }

    pub fn set_subject(&mut self, subject: Value) {
        self.subject = Some(subject);
    }

    pub fn snapshot(&self) -> Option<&dyn Snapshot> {
        match self.snapshot {
            Some(s) => Some(s),
            None => self.parent.and_then(|p| p.snapshot()),
        }
    }

    pub fn progress(&self) -> Option<&dyn ProgressListener> {
        match self.progress {
            Some(p) => Some(p),
            None => self.parent.and_then(|p| p.progress()),
        }
    }

    pub fn session(&self) -> Option<&Session> {
        match self.session {
            Some(s) => Some(s),
            None => self.parent.and_then(|p| p.session()),
        }
    }

    /// The subject of the innermost frame that has one
    pub fn subject(&self) -> Option<&Value> {
        match &self.subject {
            Some(v) => Some(v),
            None => self.parent.and_then(|p| p.subject()),
        }
    }

    /// The subject bound under `name`, searching outward through the chain
    pub fn lookup_alias(&self, name: &str) -> Option<&Value> {
        if self.alias.as_deref() == Some(name) {
            return self.subject.as_ref();
        }
        self.parent.and_then(|p| p.lookup_alias(name))
    }

    /// Whether any frame binds `name`, regardless of a subject being set yet
    pub fn has_alias(&self, name: &str) -> bool {
        if self.alias.as_deref() == Some(name) {
            return true;
        }
        self.parent.map(|p| p.has_alias(name)).unwrap_or(false)
    }

    /// The snapshot, which every chain rooted in `root` has
    pub fn require_snapshot(&self) -> anyhow::Result<&dyn Snapshot> {
        self.snapshot()
            .ok_or_else(|| anyhow::anyhow!("evaluation context has no snapshot"))
    }

    pub fn require_session(&self) -> anyhow::Result<&Session> {
        self.session()
            .ok_or_else(|| anyhow::anyhow!("evaluation context has no session"))
    }

    /// Whether any frame currently binds a subject
    pub fn has_subject(&self) -> bool {
        self.subject.is_some() || self.parent.map(|p| p.has_subject()).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::memory::SnapshotBuilder;
    use crate::snapshot::NoProgress;

    #[test]
    fn alias_lookup_walks_the_chain() {
        let snap = SnapshotBuilder::new().build();
        let session = Session::new();
        let progress = NoProgress;
        let mut outer = EvaluationContext::root(&snap, &progress, &session);
        outer.set_alias(Some("s"));
        outer.set_subject(Value::Int(1));

        let mut inner = outer.nested();
        inner.set_alias(Some("t"));
        inner.set_subject(Value::Int(2));

        assert_eq!(inner.lookup_alias("s"), Some(&Value::Int(1)));
        assert_eq!(inner.lookup_alias("t"), Some(&Value::Int(2)));
        assert!(inner.lookup_alias("u").is_none());
        assert!(inner.has_alias("s"));
        assert!(inner.snapshot().is_some());
    }
}
