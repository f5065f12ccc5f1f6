//! Per-event trace listeners invoked around every handler call.

use std::fmt;
use std::rc::Rc;

use crate::application::events::EventDescriptor;
use crate::domain::{HandlerId, NodeKey, Route};

/// Observes a dispatch; may abort it through the context.
pub type TraceCallback<N> = Rc<dyn Fn(&EventDescriptor, &mut TraceContext<'_, N>)>;

/// When a trace listener runs relative to the handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TracePoint {
    Raising,
    Raised,
}

/// Raising/raised listeners registered for one event.
pub struct Tracer<N> {
    raising: Vec<(HandlerId, TraceCallback<N>)>,
    raised: Vec<(HandlerId, TraceCallback<N>)>,
}

impl<N> Default for Tracer<N> {
    fn default() -> Self {
        Self {
            raising: Vec::new(),
            raised: Vec::new(),
        }
    }
}

impl<N> fmt::Debug for Tracer<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tracer")
            .field("raising", &self.raising.len())
            .field("raised", &self.raised.len())
            .finish()
    }
}

impl<N> Tracer<N> {
    fn list(&self, point: TracePoint) -> &Vec<(HandlerId, TraceCallback<N>)> {
        match point {
            TracePoint::Raising => &self.raising,
            TracePoint::Raised => &self.raised,
        }
    }

    pub(crate) fn add(&mut self, point: TracePoint, id: HandlerId, callback: TraceCallback<N>) {
        match point {
            TracePoint::Raising => self.raising.push((id, callback)),
            TracePoint::Raised => self.raised.push((id, callback)),
        }
    }

    pub(crate) fn remove(&mut self, id: HandlerId) -> bool {
        let before = self.raising.len() + self.raised.len();
        self.raising.retain(|(existing, _)| *existing != id);
        self.raised.retain(|(existing, _)| *existing != id);
        before != self.raising.len() + self.raised.len()
    }

    /// Snapshot, so listeners may register further listeners while running.
    pub(crate) fn listeners(&self, point: TracePoint) -> Vec<TraceCallback<N>> {
        self.list(point).iter().map(|(_, cb)| cb.clone()).collect()
    }

    pub fn listener_count(&self, point: TracePoint) -> usize {
        self.list(point).len()
    }

    pub fn is_empty(&self) -> bool {
        self.raising.is_empty() && self.raised.is_empty()
    }
}

/// View of a running dispatch handed to trace listeners.
#[derive(Debug)]
pub struct TraceContext<'r, N> {
    route: &'r Route<N>,
    index: usize,
    aborted: bool,
}

impl<'r, N: NodeKey> TraceContext<'r, N> {
    pub(crate) fn new(route: &'r Route<N>) -> Self {
        Self {
            route,
            index: 0,
            aborted: false,
        }
    }

    pub(crate) fn advance(&mut self, index: usize) {
        self.index = index;
    }

    pub fn route(&self) -> &'r Route<N> {
        self.route
    }

    pub fn route_len(&self) -> usize {
        self.route.len()
    }

    /// Position of the current node in the route.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn current_node(&self) -> Option<N> {
        self.route.get(self.index)
    }

    pub fn previous_node(&self) -> Option<N> {
        self.index.checked_sub(1).and_then(|i| self.route.get(i))
    }

    pub fn next_node(&self) -> Option<N> {
        self.route.get(self.index + 1)
    }

    /// Nodes after the current one that the dispatch has yet to visit.
    pub fn remaining(&self) -> impl Iterator<Item = N> + 'r {
        let route: &'r Route<N> = self.route;
        route
            .as_slice()
            .get(self.index + 1..)
            .unwrap_or(&[])
            .iter()
            .copied()
    }

    /// Stop the dispatch; no further handler runs for this raise.
    pub fn abort(&mut self) {
        self.aborted = true;
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Forest, Strategy};

    #[test]
    fn context_exposes_neighbours() {
        let mut forest: Forest<&'static str, ()> = Forest::new();
        forest.attach("m", "root").unwrap();
        forest.attach("leaf", "m").unwrap();
        let route = Route::build(&forest, Strategy::Bubble, "leaf");

        let mut context = TraceContext::new(&route);
        assert_eq!(context.previous_node(), None);
        assert_eq!(context.current_node(), Some("leaf"));
        context.advance(1);
        assert_eq!(context.previous_node(), Some("leaf"));
        assert_eq!(context.next_node(), Some("root"));
        assert_eq!(context.remaining().collect::<Vec<_>>(), vec!["root"]);
        context.advance(2);
        assert_eq!(context.next_node(), None);
        assert_eq!(context.remaining().count(), 0);
        assert!(!context.is_aborted());
        context.abort();
        assert!(context.is_aborted());
    }

    #[test]
    fn remove_finds_listener_in_either_list() {
        let mut tracer: Tracer<&'static str> = Tracer::default();
        let listener: TraceCallback<&'static str> =
            Rc::new(|_: &EventDescriptor, _: &mut TraceContext<'_, &'static str>| {});
        tracer.add(TracePoint::Raised, HandlerId(3), listener);
        assert_eq!(tracer.listener_count(TracePoint::Raised), 1);
        assert!(tracer.remove(HandlerId(3)));
        assert!(!tracer.remove(HandlerId(3)));
        assert!(tracer.is_empty());
    }
}
