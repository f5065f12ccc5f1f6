//! The runtime context tying forest, property store and event router together.
//!
//! Components compute what has to happen; only this module calls embedder code.
//! Every callback is cloned out of its table before it runs and receives the
//! runtime mutably, so callbacks may re-enter any operation.

use std::any::{type_name, Any};
use std::fmt;
use std::rc::Rc;

use tracing::{debug, instrument, trace};

use crate::application::error::{EventError, PropertyError};
use crate::application::events::{EventArgs, EventDescriptor, EventHandler, EventRouter, HandlerEntry};
use crate::application::properties::{PendingChange, PropertyMetadata, PropertyStore, ValidateCallback};
use crate::application::tracer::{TraceCallback, TraceContext, TracePoint};
use crate::application::RuntimeResult;
use crate::config::Settings;
use crate::domain::{
    Event, Forest, HandlerId, Lifecycle, NodeKey, ObjectType, OwnerType, Property, Route, Strategy, TreeChange,
    TreeId, Value, ValueKind,
};

/// Attached/detached handler of a single node.
pub type LifecycleCallback<N> = Rc<dyn Fn(&mut Runtime<N>, N, TreeId) -> RuntimeResult<()>>;

/// Receives every topology change of the forest.
pub type TreeListener<N> = Rc<dyn Fn(&mut Runtime<N>, &TreeChange<N>) -> RuntimeResult<()>>;

pub struct Runtime<N> {
    settings: Settings,
    forest: Forest<N, LifecycleCallback<N>>,
    properties: PropertyStore<N>,
    events: EventRouter<N>,
    tree_listeners: Vec<(HandlerId, TreeListener<N>)>,
    next_handler: u64,
}

impl<N: NodeKey> Default for Runtime<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<N: NodeKey> fmt::Debug for Runtime<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("settings", &self.settings)
            .field("forest", &self.forest)
            .field("properties", &self.properties)
            .field("events", &self.events)
            .field("tree_listeners", &self.tree_listeners.len())
            .finish()
    }
}

impl<N: NodeKey> Runtime<N> {
    pub fn new() -> Self {
        Self::with_settings(Settings::default())
    }

    pub fn with_settings(settings: Settings) -> Self {
        debug!(?settings, "creating runtime");
        Self {
            forest: Forest::new().with_collection(settings.forest.collect_detached),
            properties: PropertyStore::new(),
            events: EventRouter::new(),
            tree_listeners: Vec::new(),
            next_handler: 0,
            settings,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn forest(&self) -> &Forest<N, LifecycleCallback<N>> {
        &self.forest
    }

    pub fn properties(&self) -> &PropertyStore<N> {
        &self.properties
    }

    pub fn events(&self) -> &EventRouter<N> {
        &self.events
    }

    fn next_id(&mut self) -> HandlerId {
        HandlerId::next(&mut self.next_handler)
    }

    // ------------------------------------------------------------------
    // Forest
    // ------------------------------------------------------------------

    /// Tree of `node`, creating a singleton tree for an unseen node.
    pub fn resolve_tree(&mut self, node: N) -> TreeId {
        self.forest.resolve_tree(node)
    }

    /// Make `child` (a root) the last child of `parent`.
    ///
    /// After the topology is updated: inherited property repair for the child's
    /// subtree, then the child's attached handlers, then tree listeners.
    #[instrument(level = "debug", skip(self))]
    pub fn attach(&mut self, child: N, parent: N) -> RuntimeResult<TreeId> {
        let attached = self.forest.attach(child, parent)?;

        let pending = self.properties.after_attach(&self.forest, child);
        self.deliver(pending)?;
        for handler in self.forest.lifecycle_handlers(child, Lifecycle::Attached) {
            handler(self, child, attached.tree)?;
        }
        self.notify_tree_listeners(TreeChange::Attached(attached))?;
        Ok(attached.tree)
    }

    /// Split `child` from `parent`; `false` if it was not a child of `parent`.
    ///
    /// Notifications run in the same order as for [`Runtime::attach`], against
    /// the already split topology.
    #[instrument(level = "debug", skip(self))]
    pub fn detach(&mut self, parent: N, child: N) -> RuntimeResult<bool> {
        let Some(detached) = self.forest.detach(parent, child) else {
            trace!("not a child of parent, nothing to detach");
            return Ok(false);
        };

        let pending = self.properties.after_detach(&self.forest, child, parent);
        self.deliver(pending)?;
        for handler in self.forest.lifecycle_handlers(child, Lifecycle::Detached) {
            handler(self, child, detached.old_tree)?;
        }
        self.notify_tree_listeners(TreeChange::Detached(detached))?;
        Ok(true)
    }

    /// Detach `node` from whatever parent it has.
    pub fn disconnect(&mut self, node: N) -> RuntimeResult<bool> {
        match self.forest.parent(node) {
            Some(parent) => self.detach(parent, node),
            None => Ok(false),
        }
    }

    /// Drop singleton trees that hold no handlers.
    pub fn prune(&mut self) -> usize {
        self.forest.prune()
    }

    /// ASCII rendering of the tree containing `node`.
    pub fn render_tree(&self, node: N) -> Option<String> {
        let tree = self.forest.tree_of(node)?;
        self.forest.render(tree).map(|t| t.to_string())
    }

    // ------------------------------------------------------------------
    // Lifecycle handlers and tree listeners
    // ------------------------------------------------------------------

    /// Called whenever `node` gets a parent, with the tree it joined.
    pub fn add_attached_handler<F>(&mut self, node: N, handler: F) -> RuntimeResult<HandlerId>
    where
        F: Fn(&mut Runtime<N>, N, TreeId) -> RuntimeResult<()> + 'static,
    {
        let id = self.next_id();
        let handler: LifecycleCallback<N> = Rc::new(handler);
        self.forest
            .add_lifecycle_handler(node, Lifecycle::Attached, id, Rc::clone(&handler));
        if self.settings.forest.fire_attach_handlers_on_register && self.forest.is_root(node) {
            let tree = self.forest.resolve_tree(node);
            trace!(?node, "firing attached handler on registration");
            handler(self, node, tree)?;
        }
        Ok(id)
    }

    pub fn remove_attached_handler(&mut self, node: N, id: HandlerId) -> bool {
        self.forest
            .remove_lifecycle_handler(node, Lifecycle::Attached, id)
    }

    /// Called whenever `node` loses its parent, with the tree it left.
    pub fn add_detached_handler<F>(&mut self, node: N, handler: F) -> HandlerId
    where
        F: Fn(&mut Runtime<N>, N, TreeId) -> RuntimeResult<()> + 'static,
    {
        let id = self.next_id();
        self.forest
            .add_lifecycle_handler(node, Lifecycle::Detached, id, Rc::new(handler));
        id
    }

    pub fn remove_detached_handler(&mut self, node: N, id: HandlerId) -> bool {
        self.forest
            .remove_lifecycle_handler(node, Lifecycle::Detached, id)
    }

    pub fn add_tree_listener<F>(&mut self, listener: F) -> HandlerId
    where
        F: Fn(&mut Runtime<N>, &TreeChange<N>) -> RuntimeResult<()> + 'static,
    {
        let id = self.next_id();
        self.tree_listeners.push((id, Rc::new(listener)));
        id
    }

    pub fn remove_tree_listener(&mut self, id: HandlerId) -> bool {
        let before = self.tree_listeners.len();
        self.tree_listeners.retain(|(existing, _)| *existing != id);
        before != self.tree_listeners.len()
    }

    fn notify_tree_listeners(&mut self, change: TreeChange<N>) -> RuntimeResult<()> {
        let listeners: Vec<TreeListener<N>> = self
            .tree_listeners
            .iter()
            .map(|(_, listener)| Rc::clone(listener))
            .collect();
        for listener in listeners {
            listener(self, &change)?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Properties
    // ------------------------------------------------------------------

    /// Register a property owned by type `O`.
    pub fn register_property<O: ?Sized + 'static>(
        &mut self,
        name: &str,
        kind: ValueKind,
        metadata: PropertyMetadata<N>,
    ) -> RuntimeResult<Property> {
        Ok(self
            .properties
            .register(name, kind, OwnerType::of::<O>(), metadata, None)?)
    }

    /// Like [`Runtime::register_property`], rejecting values `validate` refuses.
    pub fn register_property_with_validation<O, F>(
        &mut self,
        name: &str,
        kind: ValueKind,
        metadata: PropertyMetadata<N>,
        validate: F,
    ) -> RuntimeResult<Property>
    where
        O: ?Sized + 'static,
        F: Fn(&Value) -> bool + 'static,
    {
        let validate: ValidateCallback = Rc::new(validate);
        Ok(self
            .properties
            .register(name, kind, OwnerType::of::<O>(), metadata, Some(validate))?)
    }

    pub fn get_value(&self, property: Property, node: N) -> Value {
        self.properties.get(&self.forest, property, node)
    }

    pub fn has_local_value(&self, property: Property, node: N) -> bool {
        self.properties.has_local_value(property, node)
    }

    /// Store a local value and notify the node plus inheriting descendants.
    ///
    /// The value is type checked and validated, then coerced; a coerced value
    /// that differs from the input is checked again before it is stored.
    #[instrument(level = "debug", skip(self, value))]
    pub fn set_value(&mut self, property: Property, node: N, value: impl Into<Value>) -> RuntimeResult<()> {
        let value = value.into();
        let coerce = self.properties.check(property, &value)?.coerce_callback();
        let value = match coerce {
            Some(coerce) => {
                let coerced = coerce(self, node, value.clone());
                if coerced != value {
                    trace!(proposed = %value, %coerced, "value coerced");
                    self.properties.check(property, &coerced)?;
                }
                coerced
            }
            None => value,
        };

        let old = self.properties.store(property, node, value.clone());
        if old == value && !self.settings.properties.notify_unchanged {
            trace!("value unchanged, not notifying");
            return Ok(());
        }
        let pending = self
            .properties
            .change_for(&self.forest, property, node, old, value);
        self.deliver(pending.into_iter().collect())
    }

    /// Remove the local value; notifications report the default as new value.
    #[instrument(level = "debug", skip(self))]
    pub fn clear_value(&mut self, property: Property, node: N) -> RuntimeResult<()> {
        let Some(old) = self.properties.remove(property, node)? else {
            trace!("no local value to clear");
            return Ok(());
        };
        let new = self
            .properties
            .descriptor(property)
            .map(|d| d.default_value().clone())
            .ok_or(PropertyError::UnknownProperty(property.0))?;
        if old == new && !self.settings.properties.notify_unchanged {
            return Ok(());
        }
        let pending = self
            .properties
            .change_for(&self.forest, property, node, old, new);
        self.deliver(pending.into_iter().collect())
    }

    fn deliver(&mut self, pending: Vec<PendingChange<N>>) -> RuntimeResult<()> {
        for change in pending {
            for &target in &change.targets {
                if self.properties.overridden(&self.forest, &change, target) {
                    trace!(?target, "overridden during delivery, skipping");
                    continue;
                }
                trace!(?target, property = ?change.change.property, new = %change.change.new, "property changed");
                (change.callback)(self, target, &change.change)?;
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Events
    // ------------------------------------------------------------------

    /// Register an event owned by type `O` without payload.
    pub fn register_event<O: ?Sized + 'static>(&mut self, name: &str, strategy: Strategy) -> RuntimeResult<Event> {
        self.register_event_with_payload::<O, ()>(name, strategy)
    }

    /// Register an event owned by type `O` whose arguments carry a `P`.
    pub fn register_event_with_payload<O: ?Sized + 'static, P: Any>(
        &mut self,
        name: &str,
        strategy: Strategy,
    ) -> RuntimeResult<Event> {
        Ok(self
            .events
            .register(name, strategy, OwnerType::of::<O>(), ObjectType::of::<P>())?)
    }

    pub fn add_handler<F>(&mut self, event: Event, node: N, handler: F) -> RuntimeResult<HandlerId>
    where
        F: Fn(&mut Runtime<N>, N, &mut EventArgs<N>) -> RuntimeResult<()> + 'static,
    {
        self.insert_handler(event, node, Rc::new(handler), false)
    }

    /// Like [`Runtime::add_handler`], but also invoked once the event is handled.
    pub fn add_handler_receiving_handled<F>(&mut self, event: Event, node: N, handler: F) -> RuntimeResult<HandlerId>
    where
        F: Fn(&mut Runtime<N>, N, &mut EventArgs<N>) -> RuntimeResult<()> + 'static,
    {
        self.insert_handler(event, node, Rc::new(handler), true)
    }

    /// Handler receiving the payload already downcast to `P`.
    pub fn add_payload_handler<P, F>(
        &mut self,
        event: Event,
        node: N,
        receive_handled: bool,
        handler: F,
    ) -> RuntimeResult<HandlerId>
    where
        P: Any,
        F: Fn(&mut Runtime<N>, N, &mut EventArgs<N>, &P) -> RuntimeResult<()> + 'static,
    {
        let descriptor = self
            .events
            .descriptor(event)
            .ok_or(EventError::UnknownEvent(event.0))?;
        if descriptor.payload() != ObjectType::of::<P>() {
            return Err(EventError::TypeMismatch {
                name: descriptor.name().to_string(),
                expected: descriptor.payload().name(),
                found: type_name::<P>(),
            }
            .into());
        }
        let wrapped: EventHandler<N> = Rc::new(move |rt: &mut Runtime<N>, node: N, args: &mut EventArgs<N>| {
            let payload = args.payload_rc();
            match payload.downcast_ref::<P>() {
                Some(payload) => handler(rt, node, args, payload),
                None => Ok(()),
            }
        });
        self.insert_handler(event, node, wrapped, receive_handled)
    }

    fn insert_handler(
        &mut self,
        event: Event,
        node: N,
        handler: EventHandler<N>,
        receive_handled: bool,
    ) -> RuntimeResult<HandlerId> {
        let id = self.next_id();
        self.events.add_handler(
            event,
            node,
            HandlerEntry {
                id,
                handler,
                receive_handled,
            },
        )?;
        trace!(?event, ?node, ?id, receive_handled, "added handler");
        Ok(id)
    }

    pub fn remove_handler(&mut self, event: Event, node: N, id: HandlerId) -> bool {
        self.events.remove_handler(event, node, id)
    }

    /// Listener invoked before every handler call of `event`.
    pub fn on_event_raising<F>(&mut self, event: Event, listener: F) -> RuntimeResult<HandlerId>
    where
        F: Fn(&EventDescriptor, &mut TraceContext<'_, N>) + 'static,
    {
        self.add_trace_listener(event, TracePoint::Raising, Rc::new(listener))
    }

    /// Listener invoked after every handler call of `event`.
    pub fn on_event_raised<F>(&mut self, event: Event, listener: F) -> RuntimeResult<HandlerId>
    where
        F: Fn(&EventDescriptor, &mut TraceContext<'_, N>) + 'static,
    {
        self.add_trace_listener(event, TracePoint::Raised, Rc::new(listener))
    }

    fn add_trace_listener(
        &mut self,
        event: Event,
        point: TracePoint,
        listener: TraceCallback<N>,
    ) -> RuntimeResult<HandlerId> {
        let id = self.next_id();
        self.events.tracer_mut(event)?.add(point, id, listener);
        Ok(id)
    }

    pub fn remove_trace_listener(&mut self, event: Event, id: HandlerId) -> bool {
        self.events
            .tracer_mut(event)
            .map(|tracer| tracer.remove(id))
            .unwrap_or(false)
    }

    /// Nodes a raise of `event` from `source` would visit right now.
    pub fn route(&self, event: Event, source: N) -> Option<Route<N>> {
        self.events.route(&self.forest, event, source)
    }

    /// Dispatch `args` along the route of its event.
    ///
    /// Raising an event this runtime never registered does nothing.
    pub fn raise(&mut self, args: &mut EventArgs<N>) -> RuntimeResult<()> {
        self.dispatch(args, None)
    }

    /// Like [`Runtime::raise`], skipping nodes for which `predicate` is false.
    pub fn raise_filtered(&mut self, args: &mut EventArgs<N>, predicate: &dyn Fn(N) -> bool) -> RuntimeResult<()> {
        self.dispatch(args, Some(predicate))
    }

    /// Raise the tunnel event, then the bubble event, with the same arguments.
    ///
    /// `handled` carries over, so a tunnel handler can suppress the bubble phase.
    pub fn raise_pair(&mut self, tunnel: Event, bubble: Event, args: &mut EventArgs<N>) -> RuntimeResult<()> {
        self.dispatch_pair(tunnel, bubble, args, None)
    }

    pub fn raise_pair_filtered(
        &mut self,
        tunnel: Event,
        bubble: Event,
        args: &mut EventArgs<N>,
        predicate: &dyn Fn(N) -> bool,
    ) -> RuntimeResult<()> {
        self.dispatch_pair(tunnel, bubble, args, Some(predicate))
    }

    fn expect_strategy(&self, event: Event, expected: Strategy) -> RuntimeResult<()> {
        let descriptor = self
            .events
            .descriptor(event)
            .ok_or(EventError::UnknownEvent(event.0))?;
        if descriptor.strategy() != expected {
            return Err(EventError::StrategyMismatch {
                name: descriptor.name().to_string(),
                expected,
                found: descriptor.strategy(),
            }
            .into());
        }
        Ok(())
    }

    fn dispatch_pair(
        &mut self,
        tunnel: Event,
        bubble: Event,
        args: &mut EventArgs<N>,
        predicate: Option<&dyn Fn(N) -> bool>,
    ) -> RuntimeResult<()> {
        self.expect_strategy(tunnel, Strategy::Tunnel)?;
        self.expect_strategy(bubble, Strategy::Bubble)?;
        args.retarget(tunnel);
        self.dispatch(args, predicate)?;
        args.retarget(bubble);
        self.dispatch(args, predicate)
    }

    #[instrument(level = "debug", skip(self, args, predicate), fields(event = ?args.event(), source = ?args.source()))]
    fn dispatch(&mut self, args: &mut EventArgs<N>, predicate: Option<&dyn Fn(N) -> bool>) -> RuntimeResult<()> {
        let Some(descriptor) = self.events.descriptor(args.event()).cloned() else {
            trace!("event not registered with this runtime");
            return Ok(());
        };
        let (payload_id, payload_name) = args.payload_type();
        if payload_id != descriptor.payload().id() {
            return Err(EventError::TypeMismatch {
                name: descriptor.name().to_string(),
                expected: descriptor.payload().name(),
                found: payload_name,
            }
            .into());
        }

        let route = Route::build(&self.forest, descriptor.strategy(), args.source());
        if self.settings.events.log_routes {
            debug!(event = descriptor.name(), %route, "routing");
        }
        let mut context = TraceContext::new(&route);
        for (index, node) in route.iter().enumerate() {
            if predicate.is_some_and(|accept| !accept(node)) {
                trace!(?node, "skipped by predicate");
                continue;
            }
            context.advance(index);
            for entry in self.events.handlers_at(descriptor.handle(), node) {
                if args.handled() && !entry.receive_handled {
                    continue;
                }
                self.trace(&descriptor, TracePoint::Raising, &mut context);
                if context.is_aborted() {
                    debug!(?node, "dispatch aborted before handler");
                    return Ok(());
                }
                (entry.handler)(self, node, args)?;
                self.trace(&descriptor, TracePoint::Raised, &mut context);
                if context.is_aborted() {
                    debug!(?node, "dispatch aborted after handler");
                    return Ok(());
                }
            }
        }
        Ok(())
    }

    fn trace(&self, descriptor: &EventDescriptor, point: TracePoint, context: &mut TraceContext<'_, N>) {
        let listeners = self
            .events
            .tracer(descriptor.handle())
            .map(|tracer| tracer.listeners(point))
            .unwrap_or_default();
        for listener in listeners {
            listener(descriptor, context);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;

    struct Widget;

    #[test]
    fn unknown_event_is_a_noop() {
        let mut rt: Runtime<&'static str> = Runtime::new();
        let mut args = EventArgs::new(Event(7), "a");
        assert!(rt.raise(&mut args).is_ok());
    }

    #[test]
    fn handler_ids_are_unique() {
        let mut rt: Runtime<&'static str> = Runtime::new();
        let click = rt.register_event::<Widget>("Click", Strategy::Bubble).unwrap();
        let first = rt.add_handler(click, "a", |_, _, _| Ok(())).unwrap();
        let second = rt.add_handler(click, "a", |_, _, _| Ok(())).unwrap();
        let listener = rt.add_tree_listener(|_, _| Ok(()));
        assert_ne!(first, second);
        assert_ne!(second, listener);
    }

    #[test]
    fn handler_added_during_dispatch_runs_on_next_raise_only() {
        let mut rt: Runtime<&'static str> = Runtime::new();
        let click = rt.register_event::<Widget>("Click", Strategy::Bubble).unwrap();
        let log = Rc::new(RefCell::new(Vec::new()));
        let seen = Rc::clone(&log);
        rt.add_handler(click, "a", move |rt, node, args| {
            seen.borrow_mut().push("outer");
            let inner = Rc::clone(&seen);
            rt.add_handler(args.event(), node, move |_, _, _| {
                inner.borrow_mut().push("inner");
                Ok(())
            })?;
            Ok(())
        })
        .unwrap();

        rt.raise(&mut EventArgs::new(click, "a")).unwrap();
        assert_eq!(*log.borrow(), vec!["outer"]);
        rt.raise(&mut EventArgs::new(click, "a")).unwrap();
        assert_eq!(*log.borrow(), vec!["outer", "outer", "inner"]);
    }
}
