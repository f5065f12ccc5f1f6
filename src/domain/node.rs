//! Node identities and registry handles.

use std::any::{type_name, TypeId};
use std::fmt;
use std::hash::{Hash, Hasher};

/// Opaque identity of a host object taking part in a tree.
///
/// The runtime never looks inside a key; it only hashes and compares it.
/// Small copyable ids (`u32`, slot-map keys, entity ids, `&'static str`) all qualify.
pub trait NodeKey: Copy + Eq + Hash + fmt::Debug + 'static {}

impl<T> NodeKey for T where T: Copy + Eq + Hash + fmt::Debug + 'static {}

/// The type a property or event name is registered against.
///
/// Names only have to be unique per owner type.
#[derive(Clone, Copy)]
pub struct OwnerType {
    id: TypeId,
    name: &'static str,
}

impl OwnerType {
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: type_name::<T>(),
        }
    }

    /// Fully qualified Rust type name, for messages.
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for OwnerType {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for OwnerType {}

impl Hash for OwnerType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for OwnerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OwnerType({})", self.name)
    }
}

impl fmt::Display for OwnerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// Handle of a registered property descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Property(pub(crate) u32);

/// Handle of a registered event descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Event(pub(crate) u32);

/// Token returned for every registered closure; used to remove it again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerId(pub(crate) u64);

impl HandlerId {
    pub(crate) fn next(counter: &mut u64) -> Self {
        *counter += 1;
        HandlerId(*counter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Widget;
    struct Panel;

    #[test]
    fn owner_types_compare_by_type() {
        assert_eq!(OwnerType::of::<Widget>(), OwnerType::of::<Widget>());
        assert_ne!(OwnerType::of::<Widget>(), OwnerType::of::<Panel>());
        assert!(OwnerType::of::<Widget>().name().ends_with("Widget"));
    }

    #[test]
    fn handler_ids_are_never_reused() {
        let mut counter = 0;
        let a = HandlerId::next(&mut counter);
        let b = HandlerId::next(&mut counter);
        assert_ne!(a, b);
        assert!(b > a);
    }
}
