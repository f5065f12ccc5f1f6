//! Inheritable property store
//!
//! Values are kept in a sparse map per property; a node without a local value
//! resolves through its ancestors (for inheriting properties) and then the default.

use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use tracing::{debug, trace};

use crate::application::error::PropertyError;
use crate::application::runtime::Runtime;
use crate::application::RuntimeResult;
use crate::domain::{Forest, NodeKey, OwnerType, Property, Value, ValueKind};

/// Invoked with the node whose effective value changed.
pub type ChangeCallback<N> = Rc<dyn Fn(&mut Runtime<N>, N, &PropertyChange) -> RuntimeResult<()>>;

/// May replace a proposed value before it is stored.
pub type CoerceCallback<N> = Rc<dyn Fn(&Runtime<N>, N, Value) -> Value>;

/// Accepts or rejects a value, independent of any node.
pub type ValidateCallback = Rc<dyn Fn(&Value) -> bool>;

/// Payload of a change notification.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyChange {
    pub property: Property,
    pub old: Value,
    pub new: Value,
}

/// Default behaviour of a property, built fluently.
///
/// ```ignore
/// let meta = PropertyMetadata::new()
///     .default_value("black")
///     .inherits()
///     .on_change(|_, node, change| { println!("{node:?}: {}", change.new); Ok(()) });
/// ```
pub struct PropertyMetadata<N> {
    default_value: Option<Value>,
    inherits: bool,
    on_change: Option<ChangeCallback<N>>,
    coerce: Option<CoerceCallback<N>>,
}

impl<N: NodeKey> Default for PropertyMetadata<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<N: NodeKey> PropertyMetadata<N> {
    pub fn new() -> Self {
        Self {
            default_value: None,
            inherits: false,
            on_change: None,
            coerce: None,
        }
    }

    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default_value = Some(value.into());
        self
    }

    /// Nodes without a local value take it from the nearest ancestor that has one.
    pub fn inherits(mut self) -> Self {
        self.inherits = true;
        self
    }

    pub fn on_change<F>(mut self, callback: F) -> Self
    where
        F: Fn(&mut Runtime<N>, N, &PropertyChange) -> RuntimeResult<()> + 'static,
    {
        self.on_change = Some(Rc::new(callback));
        self
    }

    pub fn coerce<F>(mut self, callback: F) -> Self
    where
        F: Fn(&Runtime<N>, N, Value) -> Value + 'static,
    {
        self.coerce = Some(Rc::new(callback));
        self
    }
}

/// Immutable description of a registered property.
pub struct PropertyDescriptor<N> {
    handle: Property,
    name: String,
    owner: OwnerType,
    kind: ValueKind,
    default_value: Value,
    inherits: bool,
    on_change: Option<ChangeCallback<N>>,
    coerce: Option<CoerceCallback<N>>,
    validate: Option<ValidateCallback>,
}

impl<N> PropertyDescriptor<N> {
    pub fn handle(&self) -> Property {
        self.handle
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn owner(&self) -> OwnerType {
        self.owner
    }

    pub fn kind(&self) -> ValueKind {
        self.kind
    }

    pub fn default_value(&self) -> &Value {
        &self.default_value
    }

    pub fn inherits(&self) -> bool {
        self.inherits
    }

    pub fn has_change_callback(&self) -> bool {
        self.on_change.is_some()
    }

    pub fn has_coerce_callback(&self) -> bool {
        self.coerce.is_some()
    }

    pub fn has_validate_callback(&self) -> bool {
        self.validate.is_some()
    }

    pub(crate) fn coerce_callback(&self) -> Option<CoerceCallback<N>> {
        self.coerce.clone()
    }

    fn validates(&self, value: &Value) -> bool {
        self.validate.as_ref().map_or(true, |validate| validate(value))
    }
}

impl<N> fmt::Debug for PropertyDescriptor<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PropertyDescriptor")
            .field("handle", &self.handle)
            .field("name", &self.name)
            .field("owner", &self.owner)
            .field("kind", &self.kind)
            .field("default_value", &self.default_value)
            .field("inherits", &self.inherits)
            .finish_non_exhaustive()
    }
}

/// Change callback invocations computed by the store, delivered by the runtime.
pub(crate) struct PendingChange<N> {
    pub(crate) callback: ChangeCallback<N>,
    pub(crate) change: PropertyChange,
    /// The changed node first, then affected descendants in pre-order
    pub(crate) targets: Vec<N>,
    /// The first target's own value was set or cleared, so its local value
    /// does not count as an override during delivery
    pub(crate) local_origin: bool,
}

/// Registry of property descriptors plus the sparse local values.
pub struct PropertyStore<N> {
    descriptors: Vec<PropertyDescriptor<N>>,
    by_owner: HashMap<OwnerType, Vec<Property>>,
    values: HashMap<Property, HashMap<N, Value>>,
}

impl<N: NodeKey> Default for PropertyStore<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<N: NodeKey> fmt::Debug for PropertyStore<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PropertyStore")
            .field("descriptors", &self.descriptors)
            .field("local_values", &self.values.values().map(HashMap::len).sum::<usize>())
            .finish()
    }
}

impl<N: NodeKey> PropertyStore<N> {
    pub fn new() -> Self {
        Self {
            descriptors: Vec::new(),
            by_owner: HashMap::new(),
            values: HashMap::new(),
        }
    }

    /// Register a property; the default must fit `kind` and pass `validate`.
    ///
    /// Without an explicit default, value kinds get their zero and reference kinds `Null`.
    pub fn register(
        &mut self,
        name: &str,
        kind: ValueKind,
        owner: OwnerType,
        metadata: PropertyMetadata<N>,
        validate: Option<ValidateCallback>,
    ) -> Result<Property, PropertyError> {
        if name.is_empty() {
            return Err(PropertyError::NullArgument { argument: "name" });
        }
        if self.find(owner, name).is_some() {
            return Err(PropertyError::DuplicateName {
                name: name.to_string(),
                owner: owner.name(),
            });
        }

        let default_value = match metadata.default_value {
            Some(value) if !kind.accepts(&value) => {
                return Err(PropertyError::TypeMismatch {
                    name: name.to_string(),
                    expected: kind.to_string(),
                    found: value.describe(),
                    value: value.to_string(),
                });
            }
            Some(value) => value,
            None => kind.zero(),
        };
        if let Some(validate) = &validate {
            if !validate(&default_value) {
                return Err(PropertyError::Validation {
                    name: name.to_string(),
                    value: default_value.to_string(),
                });
            }
        }

        let handle = Property(self.descriptors.len() as u32);
        self.descriptors.push(PropertyDescriptor {
            handle,
            name: name.to_string(),
            owner,
            kind,
            default_value,
            inherits: metadata.inherits,
            on_change: metadata.on_change,
            coerce: metadata.coerce,
            validate,
        });
        self.by_owner.entry(owner).or_default().push(handle);
        debug!(name, %owner, %kind, "registered property");
        Ok(handle)
    }

    pub fn descriptor(&self, property: Property) -> Option<&PropertyDescriptor<N>> {
        self.descriptors.get(property.0 as usize)
    }

    pub fn find(&self, owner: OwnerType, name: &str) -> Option<Property> {
        self.properties_of(owner)
            .iter()
            .copied()
            .find(|&p| self.descriptor(p).is_some_and(|d| d.name == name))
    }

    pub fn properties_of(&self, owner: OwnerType) -> &[Property] {
        self.by_owner.get(&owner).map_or(&[], Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    pub fn local_value(&self, property: Property, node: N) -> Option<&Value> {
        self.values.get(&property)?.get(&node)
    }

    pub fn has_local_value(&self, property: Property, node: N) -> bool {
        self.local_value(property, node).is_some()
    }

    /// Effective value: local, else nearest ancestor's (when inheriting), else default.
    ///
    /// An unregistered handle resolves to `Null`.
    pub fn get<H: Clone>(&self, forest: &Forest<N, H>, property: Property, node: N) -> Value {
        let Some(descriptor) = self.descriptor(property) else {
            return Value::Null;
        };
        if let Some(value) = self.local_value(property, node) {
            return value.clone();
        }
        if descriptor.inherits {
            if let Some(value) = forest
                .ancestors(node)
                .find_map(|ancestor| self.local_value(property, ancestor))
            {
                return value.clone();
            }
        }
        descriptor.default_value.clone()
    }

    /// Value a child of `start` would inherit.
    fn inherited_from<H: Clone>(&self, forest: &Forest<N, H>, descriptor: &PropertyDescriptor<N>, start: N) -> Value {
        std::iter::once(start)
            .chain(forest.ancestors(start))
            .find_map(|n| self.local_value(descriptor.handle, n))
            .cloned()
            .unwrap_or_else(|| descriptor.default_value.clone())
    }

    /// Type check then validation; the descriptor is returned for further steps.
    pub(crate) fn check(&self, property: Property, value: &Value) -> Result<&PropertyDescriptor<N>, PropertyError> {
        let descriptor = self
            .descriptor(property)
            .ok_or(PropertyError::UnknownProperty(property.0))?;
        if !descriptor.kind.accepts(value) {
            return Err(PropertyError::TypeMismatch {
                name: descriptor.name.clone(),
                expected: descriptor.kind.to_string(),
                found: value.describe(),
                value: value.to_string(),
            });
        }
        if !descriptor.validates(value) {
            return Err(PropertyError::Validation {
                name: descriptor.name.clone(),
                value: value.to_string(),
            });
        }
        Ok(descriptor)
    }

    /// Stores a checked value; returns the prior local value or the default.
    pub(crate) fn store(&mut self, property: Property, node: N, value: Value) -> Value {
        let previous = self.values.entry(property).or_default().insert(node, value);
        previous.unwrap_or_else(|| {
            self.descriptor(property)
                .map(|d| d.default_value.clone())
                .unwrap_or(Value::Null)
        })
    }

    pub(crate) fn remove(&mut self, property: Property, node: N) -> Result<Option<Value>, PropertyError> {
        if self.descriptor(property).is_none() {
            return Err(PropertyError::UnknownProperty(property.0));
        }
        Ok(self.values.get_mut(&property).and_then(|m| m.remove(&node)))
    }

    /// Descendants of `node` without a local override, pre-order, not entering overriding subtrees.
    pub(crate) fn cascade_targets<H: Clone>(&self, forest: &Forest<N, H>, property: Property, node: N) -> Vec<N> {
        let mut targets = Vec::new();
        let mut stack: Vec<N> = forest.children(node).collect();
        stack.reverse();
        while let Some(current) = stack.pop() {
            if self.has_local_value(property, current) {
                continue;
            }
            targets.push(current);
            let mut children: Vec<N> = forest.children(current).collect();
            children.reverse();
            stack.extend(children);
        }
        targets
    }

    /// Notifications for a change at `node`, cascading when the property inherits.
    pub(crate) fn change_for<H: Clone>(
        &self,
        forest: &Forest<N, H>,
        property: Property,
        node: N,
        old: Value,
        new: Value,
    ) -> Option<PendingChange<N>> {
        let descriptor = self.descriptor(property)?;
        let callback = descriptor.on_change.clone()?;
        let mut targets = vec![node];
        if descriptor.inherits {
            targets.extend(self.cascade_targets(forest, property, node));
        }
        Some(PendingChange {
            callback,
            change: PropertyChange { property, old, new },
            targets,
            local_origin: true,
        })
    }

    /// Whether `target` picked up a local value on itself or between itself and
    /// the top of the cascade after `pending` was computed.
    pub(crate) fn overridden<H: Clone>(&self, forest: &Forest<N, H>, pending: &PendingChange<N>, target: N) -> bool {
        let Some(&top) = pending.targets.first() else {
            return false;
        };
        let property = pending.change.property;
        std::iter::once(target)
            .chain(forest.ancestors(target))
            .take_while(|&n| n != top)
            .chain((!pending.local_origin).then_some(top))
            .any(|n| self.has_local_value(property, n))
    }

    /// Inheriting properties with a change callback and at least one local value.
    fn repair_candidates(&self) -> impl Iterator<Item = &PropertyDescriptor<N>> + '_ {
        self.descriptors.iter().filter(|d| {
            d.inherits
                && d.on_change.is_some()
                && self.values.get(&d.handle).is_some_and(|m| !m.is_empty())
        })
    }

    fn repair<H: Clone>(
        &self,
        forest: &Forest<N, H>,
        node: N,
        old_value: impl Fn(&PropertyDescriptor<N>) -> Value,
    ) -> Vec<PendingChange<N>> {
        let mut pending = Vec::new();
        for descriptor in self.repair_candidates() {
            if self.has_local_value(descriptor.handle, node) {
                continue;
            }
            let old = old_value(descriptor);
            let new = self.get(forest, descriptor.handle, node);
            if old == new {
                continue;
            }
            trace!(property = descriptor.name, ?node, ?old, ?new, "inherited value moved");
            pending.extend(
                self.change_for(forest, descriptor.handle, node, old, new)
                    .map(|change| PendingChange { local_origin: false, ..change }),
            );
        }
        pending
    }

    /// `child` was a root with no local value, so it saw the defaults before.
    pub(crate) fn after_attach<H: Clone>(&self, forest: &Forest<N, H>, child: N) -> Vec<PendingChange<N>> {
        self.repair(forest, child, |d| d.default_value.clone())
    }

    /// `child` used to inherit through `old_parent`.
    pub(crate) fn after_detach<H: Clone>(&self, forest: &Forest<N, H>, child: N, old_parent: N) -> Vec<PendingChange<N>> {
        self.repair(forest, child, |d| self.inherited_from(forest, d, old_parent))
    }
}
