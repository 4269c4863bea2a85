//! Subject registry: the id → class directory.

use porch_types::{SubjectClass, SubjectId};

use crate::StoreError;

/// Minimal directory of registered subjects.
///
/// Registration itself (signup) happens outside the engine; the engine only
/// needs to know a subject's class to score it and to refuse commands for
/// unknown subjects.
pub trait SubjectRegistry: Send + Sync {
    fn get(&self, id: SubjectId) -> Result<Option<SubjectClass>, StoreError>;

    fn put(&self, id: SubjectId, class: SubjectClass) -> Result<(), StoreError>;
}
