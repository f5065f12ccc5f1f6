//! Event registry and per-node handler tables.
//!
//! Dispatch itself lives on [`Runtime`](crate::application::runtime::Runtime),
//! because handlers receive the runtime mutably.

use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use tracing::debug;

use crate::application::error::EventError;
use crate::application::runtime::Runtime;
use crate::application::tracer::Tracer;
use crate::application::RuntimeResult;
use crate::domain::{Event, Forest, HandlerId, NodeKey, ObjectType, OwnerType, Route, Strategy};

/// Invoked for each node on the route that registered it.
pub type EventHandler<N> = Rc<dyn Fn(&mut Runtime<N>, N, &mut EventArgs<N>) -> RuntimeResult<()>>;

/// Registered event: name, owner, routing strategy and payload type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventDescriptor {
    handle: Event,
    name: String,
    owner: OwnerType,
    strategy: Strategy,
    payload: ObjectType,
}

impl EventDescriptor {
    pub fn handle(&self) -> Event {
        self.handle
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn owner(&self) -> OwnerType {
        self.owner
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    /// `()` for events registered without a payload.
    pub fn payload(&self) -> ObjectType {
        self.payload
    }
}

/// Mutable argument record travelling with one dispatch.
pub struct EventArgs<N> {
    event: Event,
    source: N,
    handled: bool,
    payload: Rc<dyn Any>,
    payload_name: &'static str,
}

impl<N: NodeKey> EventArgs<N> {
    pub fn new(event: Event, source: N) -> Self {
        Self::with_payload(event, source, ())
    }

    pub fn with_payload<P: Any>(event: Event, source: N, payload: P) -> Self {
        Self {
            event,
            source,
            handled: false,
            payload: Rc::new(payload),
            payload_name: type_name::<P>(),
        }
    }

    pub fn event(&self) -> Event {
        self.event
    }

    pub fn source(&self) -> N {
        self.source
    }

    pub fn handled(&self) -> bool {
        self.handled
    }

    /// Later handlers are skipped unless they asked to see handled events.
    pub fn set_handled(&mut self, handled: bool) {
        self.handled = handled;
    }

    pub fn payload<P: Any>(&self) -> Option<&P> {
        self.payload.downcast_ref::<P>()
    }

    pub(crate) fn payload_type(&self) -> (TypeId, &'static str) {
        ((*self.payload).type_id(), self.payload_name)
    }

    pub(crate) fn payload_rc(&self) -> Rc<dyn Any> {
        Rc::clone(&self.payload)
    }

    pub(crate) fn retarget(&mut self, event: Event) {
        self.event = event;
    }
}

impl<N: fmt::Debug> fmt::Debug for EventArgs<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventArgs")
            .field("event", &self.event)
            .field("source", &self.source)
            .field("handled", &self.handled)
            .field("payload", &self.payload_name)
            .finish()
    }
}

#[derive(Clone)]
pub(crate) struct HandlerEntry<N> {
    pub(crate) id: HandlerId,
    pub(crate) handler: EventHandler<N>,
    pub(crate) receive_handled: bool,
}

/// Descriptors, handler tables and tracers for all events of a runtime.
pub struct EventRouter<N> {
    descriptors: Vec<EventDescriptor>,
    tracers: Vec<Tracer<N>>,
    by_owner: HashMap<OwnerType, Vec<Event>>,
    handlers: HashMap<Event, HashMap<N, Vec<HandlerEntry<N>>>>,
}

impl<N: NodeKey> Default for EventRouter<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<N: NodeKey> fmt::Debug for EventRouter<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventRouter")
            .field("descriptors", &self.descriptors)
            .field("tracers", &self.tracers)
            .finish_non_exhaustive()
    }
}

impl<N: NodeKey> EventRouter<N> {
    pub fn new() -> Self {
        Self {
            descriptors: Vec::new(),
            tracers: Vec::new(),
            by_owner: HashMap::new(),
            handlers: HashMap::new(),
        }
    }

    pub fn register(
        &mut self,
        name: &str,
        strategy: Strategy,
        owner: OwnerType,
        payload: ObjectType,
    ) -> Result<Event, EventError> {
        if name.is_empty() {
            return Err(EventError::NullArgument { argument: "name" });
        }
        if self.find(owner, name).is_some() {
            return Err(EventError::DuplicateName {
                name: name.to_string(),
                owner: owner.name(),
            });
        }
        let handle = Event(self.descriptors.len() as u32);
        self.descriptors.push(EventDescriptor {
            handle,
            name: name.to_string(),
            owner,
            strategy,
            payload,
        });
        self.tracers.push(Tracer::default());
        self.by_owner.entry(owner).or_default().push(handle);
        debug!(name, %owner, %strategy, payload = payload.name(), "registered event");
        Ok(handle)
    }

    pub fn descriptor(&self, event: Event) -> Option<&EventDescriptor> {
        self.descriptors.get(event.0 as usize)
    }

    pub fn find(&self, owner: OwnerType, name: &str) -> Option<Event> {
        self.events_of(owner)
            .iter()
            .copied()
            .find(|&e| self.descriptor(e).is_some_and(|d| d.name == name))
    }

    pub fn events_of(&self, owner: OwnerType) -> &[Event] {
        self.by_owner.get(&owner).map_or(&[], Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    pub fn handler_count(&self, event: Event, node: N) -> usize {
        self.handlers
            .get(&event)
            .and_then(|per_node| per_node.get(&node))
            .map_or(0, Vec::len)
    }

    /// Route `event` would take from `source` right now.
    pub fn route<H: Clone>(&self, forest: &Forest<N, H>, event: Event, source: N) -> Option<Route<N>> {
        self.descriptor(event)
            .map(|d| Route::build(forest, d.strategy, source))
    }

    pub fn tracer(&self, event: Event) -> Option<&Tracer<N>> {
        self.tracers.get(event.0 as usize)
    }

    pub(crate) fn tracer_mut(&mut self, event: Event) -> Result<&mut Tracer<N>, EventError> {
        self.tracers
            .get_mut(event.0 as usize)
            .ok_or(EventError::UnknownEvent(event.0))
    }

    pub(crate) fn add_handler(&mut self, event: Event, node: N, entry: HandlerEntry<N>) -> Result<(), EventError> {
        if self.descriptor(event).is_none() {
            return Err(EventError::UnknownEvent(event.0));
        }
        self.handlers
            .entry(event)
            .or_default()
            .entry(node)
            .or_default()
            .push(entry);
        Ok(())
    }

    pub(crate) fn remove_handler(&mut self, event: Event, node: N, id: HandlerId) -> bool {
        let Some(entries) = self.handlers.get_mut(&event).and_then(|m| m.get_mut(&node)) else {
            return false;
        };
        let before = entries.len();
        entries.retain(|entry| entry.id != id);
        before != entries.len()
    }

    /// Snapshot of a node's handlers, in registration order.
    pub(crate) fn handlers_at(&self, event: Event, node: N) -> Vec<HandlerEntry<N>> {
        self.handlers
            .get(&event)
            .and_then(|per_node| per_node.get(&node))
            .cloned()
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Button;
    struct Label;

    #[test]
    fn registration_is_per_owner() {
        let mut router: EventRouter<&'static str> = EventRouter::new();
        let click = router
            .register("Click", Strategy::Bubble, OwnerType::of::<Button>(), ObjectType::of::<()>())
            .unwrap();
        assert_eq!(router.find(OwnerType::of::<Button>(), "Click"), Some(click));
        assert_eq!(router.find(OwnerType::of::<Label>(), "Click"), None);

        let err = router
            .register("Click", Strategy::Tunnel, OwnerType::of::<Button>(), ObjectType::of::<()>())
            .unwrap_err();
        assert!(matches!(err, EventError::DuplicateName { .. }));
        assert!(router
            .register("Click", Strategy::Tunnel, OwnerType::of::<Label>(), ObjectType::of::<()>())
            .is_ok());
        assert_eq!(router.len(), 2);
    }

    #[test]
    fn empty_name_is_rejected() {
        let mut router: EventRouter<&'static str> = EventRouter::new();
        let err = router
            .register("", Strategy::Bubble, OwnerType::of::<Button>(), ObjectType::of::<()>())
            .unwrap_err();
        assert_eq!(err, EventError::NullArgument { argument: "name" });
    }

    #[test]
    fn payload_is_downcast_by_type() {
        let args = EventArgs::with_payload(Event(0), "a", 42_u32);
        assert_eq!(args.payload::<u32>(), Some(&42));
        assert_eq!(args.payload::<i64>(), None);
        assert!(!args.handled());

        let unit = EventArgs::new(Event(0), "a");
        assert_eq!(unit.payload_type().0, TypeId::of::<()>());
    }

    #[test]
    fn removing_unknown_handler_is_false() {
        let mut router: EventRouter<&'static str> = EventRouter::new();
        assert!(!router.remove_handler(Event(0), "a", HandlerId(1)));
        assert_eq!(router.handler_count(Event(0), "a"), 0);
    }
}
