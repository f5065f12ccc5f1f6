//! Arena-backed forest of trees.
//!
//! Every node that takes part in a core operation gets a tree element in a
//! generational arena. Parent and child links are arena indices, so a child never
//! owns its parent and a removed element cannot be reached through a stale link.
//! Each element carries the [`TreeId`] of its tree, which keeps [`Forest::tree_of`]
//! O(1); merges and splits re-label the subtree that moved.

use std::collections::HashMap;
use std::fmt;

use generational_arena::{Arena, Index};
use termtree::Tree;
use tracing::{debug, instrument, trace};

use crate::domain::error::{ForestError, ForestResult};
use crate::domain::node::{HandlerId, NodeKey};

/// Identifies a tree by the arena slot of its root element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TreeId(Index);

/// Which lifecycle chain of an element a handler belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lifecycle {
    Attached,
    Detached,
}

/// A node's place in the forest.
struct TreeElement<N, H> {
    node: N,
    /// Non-owning back link
    parent: Option<Index>,
    children: Vec<Index>,
    tree: TreeId,
    attached_handlers: Vec<(HandlerId, H)>,
    detached_handlers: Vec<(HandlerId, H)>,
}

impl<N, H> TreeElement<N, H> {
    fn new(node: N, tree: TreeId) -> Self {
        Self {
            node,
            parent: None,
            children: Vec::new(),
            tree,
            attached_handlers: Vec::new(),
            detached_handlers: Vec::new(),
        }
    }

    /// True if the element has to survive being detached.
    fn holds_state(&self) -> bool {
        !self.children.is_empty()
            || !self.attached_handlers.is_empty()
            || !self.detached_handlers.is_empty()
    }

    fn chain(&self, kind: Lifecycle) -> &Vec<(HandlerId, H)> {
        match kind {
            Lifecycle::Attached => &self.attached_handlers,
            Lifecycle::Detached => &self.detached_handlers,
        }
    }

    fn chain_mut(&mut self, kind: Lifecycle) -> &mut Vec<(HandlerId, H)> {
        match kind {
            Lifecycle::Attached => &mut self.attached_handlers,
            Lifecycle::Detached => &mut self.detached_handlers,
        }
    }
}

/// Outcome of a successful attach.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attached<N> {
    pub child: N,
    pub parent: N,
    /// Tree the child's subtree was merged into
    pub tree: TreeId,
    /// Former tree of the child, no longer live
    pub absorbed: TreeId,
}

/// Outcome of a successful detach.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Detached<N> {
    pub child: N,
    pub parent: N,
    /// Tree the child's subtree was split from
    pub old_tree: TreeId,
    /// Standalone tree now holding the subtree, `None` if it was collected
    pub new_tree: Option<TreeId>,
}

/// Public notification about a topology change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreeChange<N> {
    Attached(Attached<N>),
    Detached(Detached<N>),
}

/// All live trees, keyed by node.
///
/// `H` is the lifecycle handler type stored on elements; the forest only keeps
/// and hands them out, it never calls them.
pub struct Forest<N, H> {
    arena: Arena<TreeElement<N, H>>,
    index: HashMap<N, Index>,
    collect_detached: bool,
}

impl<N: NodeKey, H: Clone> Default for Forest<N, H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<N: NodeKey, H> fmt::Debug for Forest<N, H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Forest")
            .field("elements", &self.arena.len())
            .field("collect_detached", &self.collect_detached)
            .finish()
    }
}

impl<N: NodeKey, H: Clone> Forest<N, H> {
    pub fn new() -> Self {
        Self {
            arena: Arena::new(),
            index: HashMap::new(),
            collect_detached: true,
        }
    }

    /// Whether detached leaves without state are dropped (default) or kept as singleton trees.
    pub fn with_collection(mut self, collect_detached: bool) -> Self {
        self.collect_detached = collect_detached;
        self
    }

    fn idx(&self, node: N) -> Option<Index> {
        self.index.get(&node).copied()
    }

    fn element(&self, idx: Index) -> Option<&TreeElement<N, H>> {
        self.arena.get(idx)
    }

    fn node_at(&self, idx: Index) -> Option<N> {
        self.arena.get(idx).map(|e| e.node)
    }

    fn ensure(&mut self, node: N) -> Index {
        if let Some(idx) = self.idx(node) {
            return idx;
        }
        let idx = self
            .arena
            .insert_with(|idx| TreeElement::new(node, TreeId(idx)));
        self.index.insert(node, idx);
        trace!(?node, "created singleton tree");
        idx
    }

    fn remove_element(&mut self, idx: Index) {
        if let Some(element) = self.arena.remove(idx) {
            self.index.remove(&element.node);
            trace!(node = ?element.node, "collected element");
        }
    }

    fn relabel(&mut self, start: Index, tree: TreeId) {
        let mut stack = vec![start];
        while let Some(idx) = stack.pop() {
            if let Some(element) = self.arena.get_mut(idx) {
                element.tree = tree;
                stack.extend(element.children.iter().copied());
            }
        }
    }

    pub fn contains(&self, node: N) -> bool {
        self.index.contains_key(&node)
    }

    /// Number of tree elements across all trees.
    pub fn len(&self) -> usize {
        self.arena.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arena.is_empty()
    }

    /// Tree containing `node`, creating a singleton tree for an unseen node.
    #[instrument(level = "trace", skip(self))]
    pub fn resolve_tree(&mut self, node: N) -> TreeId {
        let idx = self.ensure(node);
        self.arena[idx].tree
    }

    /// Tree containing `node`, without creating anything.
    pub fn tree_of(&self, node: N) -> Option<TreeId> {
        self.idx(node)
            .and_then(|idx| self.element(idx))
            .map(|e| e.tree)
    }

    /// Root node of a live tree.
    pub fn root(&self, tree: TreeId) -> Option<N> {
        self.element(tree.0)
            .filter(|e| e.parent.is_none())
            .map(|e| e.node)
    }

    /// Root of the tree containing `node`; an unknown node is its own root.
    pub fn root_of(&self, node: N) -> N {
        self.tree_of(node)
            .and_then(|tree| self.root(tree))
            .unwrap_or(node)
    }

    pub fn parent(&self, node: N) -> Option<N> {
        let element = self.element(self.idx(node)?)?;
        element.parent.and_then(|p| self.node_at(p))
    }

    pub fn is_root(&self, node: N) -> bool {
        self.parent(node).is_none()
    }

    /// Direct children, left to right.
    pub fn children(&self, node: N) -> impl Iterator<Item = N> + '_ {
        self.idx(node)
            .and_then(|idx| self.element(idx))
            .into_iter()
            .flat_map(|e| e.children.iter())
            .filter_map(|&child| self.node_at(child))
    }

    pub fn child_count(&self, node: N) -> usize {
        self.idx(node)
            .and_then(|idx| self.element(idx))
            .map_or(0, |e| e.children.len())
    }

    /// Other children of the parent, left to right; empty for a root.
    pub fn siblings(&self, node: N) -> Vec<N> {
        match self.parent(node) {
            Some(parent) => self.children(parent).filter(|&n| n != node).collect(),
            None => Vec::new(),
        }
    }

    /// Ancestors, nearest first, excluding `node`.
    pub fn ancestors(&self, node: N) -> Ancestors<'_, N, H> {
        let next = self
            .idx(node)
            .and_then(|idx| self.element(idx))
            .and_then(|e| e.parent);
        Ancestors { forest: self, next }
    }

    /// Descendants in pre-order (parent before children, children left to right), excluding `node`.
    pub fn descendants(&self, node: N) -> Descendants<'_, N, H> {
        let stack = self
            .idx(node)
            .and_then(|idx| self.element(idx))
            .map(|e| e.children.iter().rev().copied().collect())
            .unwrap_or_default();
        Descendants {
            forest: self,
            stack,
        }
    }

    /// Number of ancestors.
    pub fn depth(&self, node: N) -> usize {
        self.ancestors(node).count()
    }

    /// Every node of a tree, root first, then pre-order.
    pub fn members(&self, tree: TreeId) -> Vec<N> {
        match self.root(tree) {
            Some(root) => std::iter::once(root).chain(self.descendants(root)).collect(),
            None => Vec::new(),
        }
    }

    pub fn trees(&self) -> Vec<TreeId> {
        self.arena
            .iter()
            .filter(|(_, e)| e.parent.is_none())
            .map(|(_, e)| e.tree)
            .collect()
    }

    pub fn tree_count(&self) -> usize {
        self.arena.iter().filter(|(_, e)| e.parent.is_none()).count()
    }

    /// Nearest ancestor matching `predicate`.
    pub fn find_ancestor(&self, node: N, mut predicate: impl FnMut(N) -> bool) -> Option<N> {
        self.ancestors(node).find(|&n| predicate(n))
    }

    /// First descendant in pre-order matching `predicate`.
    pub fn find_descendant(&self, node: N, mut predicate: impl FnMut(N) -> bool) -> Option<N> {
        self.descendants(node).find(|&n| predicate(n))
    }

    /// Make `child` (and its subtree) the last child of `parent`, merging the two trees.
    #[instrument(level = "debug", skip(self))]
    pub fn attach(&mut self, child: N, parent: N) -> ForestResult<Attached<N>> {
        if self.parent(child).is_some() {
            return Err(ForestError::AlreadyAttached {
                child: format!("{child:?}"),
            });
        }
        if child == parent {
            return Err(ForestError::WouldCreateCycle {
                child: format!("{child:?}"),
                parent: format!("{parent:?}"),
            });
        }
        if let (Some(child_tree), Some(parent_tree)) = (self.tree_of(child), self.tree_of(parent)) {
            // child is a root here, so a shared tree means parent sits below it
            if child_tree == parent_tree {
                return Err(ForestError::WouldCreateCycle {
                    child: format!("{child:?}"),
                    parent: format!("{parent:?}"),
                });
            }
        }

        let child_idx = self.ensure(child);
        let parent_idx = self.ensure(parent);
        let absorbed = self.arena[child_idx].tree;
        let tree = self.arena[parent_idx].tree;

        self.arena[child_idx].parent = Some(parent_idx);
        self.arena[parent_idx].children.push(child_idx);
        self.relabel(child_idx, tree);

        debug!(?child, ?parent, ?tree, ?absorbed, "merged trees");
        Ok(Attached {
            child,
            parent,
            tree,
            absorbed,
        })
    }

    /// Unlink `child` from `parent`; `None` if it was not a child of `parent`.
    ///
    /// A subtree that still holds state becomes a standalone tree rooted at `child`,
    /// a bare leaf is dropped.
    #[instrument(level = "debug", skip(self))]
    pub fn detach(&mut self, parent: N, child: N) -> Option<Detached<N>> {
        let parent_idx = self.idx(parent)?;
        let child_idx = self.idx(child)?;
        let position = self
            .element(parent_idx)?
            .children
            .iter()
            .position(|&c| c == child_idx)?;

        let old_tree = self.arena[parent_idx].tree;
        self.arena[parent_idx].children.remove(position);
        self.arena[child_idx].parent = None;

        let new_tree = if !self.collect_detached || self.arena[child_idx].holds_state() {
            let tree = TreeId(child_idx);
            self.relabel(child_idx, tree);
            Some(tree)
        } else {
            self.remove_element(child_idx);
            None
        };

        debug!(?child, ?parent, ?old_tree, ?new_tree, "split tree");
        Some(Detached {
            child,
            parent,
            old_tree,
            new_tree,
        })
    }

    pub fn add_lifecycle_handler(&mut self, node: N, kind: Lifecycle, id: HandlerId, handler: H) {
        let idx = self.ensure(node);
        self.arena[idx].chain_mut(kind).push((id, handler));
    }

    pub fn remove_lifecycle_handler(&mut self, node: N, kind: Lifecycle, id: HandlerId) -> bool {
        let Some(element) = self.idx(node).and_then(|idx| self.arena.get_mut(idx)) else {
            return false;
        };
        let chain = element.chain_mut(kind);
        let before = chain.len();
        chain.retain(|(existing, _)| *existing != id);
        chain.len() != before
    }

    /// Snapshot of a node's lifecycle chain in registration order.
    pub fn lifecycle_handlers(&self, node: N, kind: Lifecycle) -> Vec<H> {
        self.idx(node)
            .and_then(|idx| self.element(idx))
            .map(|e| e.chain(kind).iter().map(|(_, h)| h.clone()).collect())
            .unwrap_or_default()
    }

    /// Drop every parentless element that holds no state; returns how many went.
    #[instrument(level = "debug", skip(self))]
    pub fn prune(&mut self) -> usize {
        let stale: Vec<Index> = self
            .arena
            .iter()
            .filter(|(_, e)| e.parent.is_none() && !e.holds_state())
            .map(|(idx, _)| idx)
            .collect();
        for &idx in &stale {
            self.remove_element(idx);
        }
        debug!(removed = stale.len(), "pruned stateless trees");
        stale.len()
    }

    /// Renders a live tree for diagnostics, children in order.
    pub fn render(&self, tree: TreeId) -> Option<Tree<String>> {
        let root = tree.0;
        self.element(root).filter(|e| e.parent.is_none())?;

        // post-order, so every child is finished before its parent
        let mut built: HashMap<Index, Tree<String>> = HashMap::new();
        let mut stack = vec![(root, false)];
        while let Some((idx, visited)) = stack.pop() {
            let Some(element) = self.element(idx) else {
                continue;
            };
            if visited {
                let mut rendered = Tree::new(format!("{:?}", element.node));
                for child in &element.children {
                    if let Some(subtree) = built.remove(child) {
                        rendered.push(subtree);
                    }
                }
                built.insert(idx, rendered);
            } else {
                stack.push((idx, true));
                for &child in element.children.iter().rev() {
                    stack.push((child, false));
                }
            }
        }
        built.remove(&root)
    }
}

/// Iterator over ancestors, nearest first.
pub struct Ancestors<'a, N, H> {
    forest: &'a Forest<N, H>,
    next: Option<Index>,
}

impl<N: NodeKey, H: Clone> Iterator for Ancestors<'_, N, H> {
    type Item = N;

    fn next(&mut self) -> Option<Self::Item> {
        let element = self.forest.element(self.next?)?;
        self.next = element.parent;
        Some(element.node)
    }
}

/// Pre-order iterator over a subtree, driven by an explicit stack.
pub struct Descendants<'a, N, H> {
    forest: &'a Forest<N, H>,
    stack: Vec<Index>,
}

impl<N: NodeKey, H: Clone> Iterator for Descendants<'_, N, H> {
    type Item = N;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(idx) = self.stack.pop() {
            if let Some(element) = self.forest.element(idx) {
                // reverse push keeps left-to-right order
                self.stack.extend(element.children.iter().rev().copied());
                return Some(element.node);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type TestForest = Forest<&'static str, ()>;

    //      root
    //      /  \
    //     a    b
    //    / \
    //   c   d
    fn sample() -> TestForest {
        let mut forest = TestForest::new();
        forest.attach("a", "root").unwrap();
        forest.attach("b", "root").unwrap();
        forest.attach("c", "a").unwrap();
        forest.attach("d", "a").unwrap();
        forest
    }

    #[test]
    fn resolve_tree_creates_a_singleton_once() {
        let mut forest = TestForest::new();
        let first = forest.resolve_tree("x");
        let second = forest.resolve_tree("x");
        assert_eq!(first, second);
        assert_eq!(forest.len(), 1);
        assert_eq!(forest.root(first), Some("x"));
    }

    #[test]
    fn attach_merges_into_parent_tree() {
        let forest = sample();
        let tree = forest.tree_of("root").unwrap();
        for node in ["a", "b", "c", "d"] {
            assert_eq!(forest.tree_of(node), Some(tree));
        }
        assert_eq!(forest.tree_count(), 1);
        assert_eq!(forest.parent("c"), Some("a"));
    }

    #[test]
    fn descendants_are_pre_order() {
        let forest = sample();
        let order: Vec<_> = forest.descendants("root").collect();
        assert_eq!(order, vec!["a", "c", "d", "b"]);
    }

    #[test]
    fn ancestors_are_nearest_first() {
        let forest = sample();
        let order: Vec<_> = forest.ancestors("d").collect();
        assert_eq!(order, vec!["a", "root"]);
        assert_eq!(forest.depth("d"), 2);
    }

    #[test]
    fn attach_to_own_descendant_is_a_cycle() {
        let mut forest = sample();
        let err = forest.attach("root", "c").unwrap_err();
        assert!(matches!(err, ForestError::WouldCreateCycle { .. }));
        assert_eq!(forest.parent("root"), None);
    }

    #[test]
    fn detach_keeps_subtree_with_children() {
        let mut forest = sample();
        let detached = forest.detach("root", "a").unwrap();
        let new_tree = detached.new_tree.unwrap();
        assert_eq!(forest.root(new_tree), Some("a"));
        assert_eq!(forest.members(new_tree), vec!["a", "c", "d"]);
        assert_eq!(forest.tree_of("c"), Some(new_tree));
        assert_eq!(forest.tree_count(), 2);
    }

    #[test]
    fn detach_drops_bare_leaf() {
        let mut forest = sample();
        let detached = forest.detach("root", "b").unwrap();
        assert_eq!(detached.new_tree, None);
        assert!(!forest.contains("b"));
    }

    #[test]
    fn detach_keeps_bare_leaf_without_collection() {
        let mut forest = TestForest::new().with_collection(false);
        forest.attach("leaf", "root").unwrap();
        let detached = forest.detach("root", "leaf").unwrap();
        assert!(detached.new_tree.is_some());
        assert!(forest.contains("leaf"));
    }

    #[test]
    fn detach_of_non_child_is_none() {
        let mut forest = sample();
        assert!(forest.detach("b", "c").is_none());
        assert!(forest.detach("nobody", "c").is_none());
    }

    #[test]
    fn lifecycle_handlers_keep_leaf_alive() {
        let mut forest = sample();
        let mut counter = 0;
        let id = HandlerId::next(&mut counter);
        forest.add_lifecycle_handler("b", Lifecycle::Detached, id, ());
        let detached = forest.detach("root", "b").unwrap();
        assert!(detached.new_tree.is_some());
        assert_eq!(forest.lifecycle_handlers("b", Lifecycle::Detached).len(), 1);
        assert!(forest.remove_lifecycle_handler("b", Lifecycle::Detached, id));
        assert!(!forest.remove_lifecycle_handler("b", Lifecycle::Detached, id));
    }

    #[test]
    fn prune_removes_stateless_singletons() {
        let mut forest = sample();
        forest.resolve_tree("loose");
        assert_eq!(forest.tree_count(), 2);
        assert_eq!(forest.prune(), 1);
        assert!(!forest.contains("loose"));
        assert!(forest.contains("root"));
    }

    #[test]
    fn render_lists_children_in_order() {
        let forest = sample();
        let tree = forest.tree_of("root").unwrap();
        let rendered = forest.render(tree).unwrap().to_string();
        let lines: Vec<_> = rendered.lines().collect();
        assert!(lines[0].contains("root"));
        assert!(lines[1].contains("\"a\""));
        assert!(lines[2].contains("\"c\""));
        assert!(lines[3].contains("\"d\""));
        assert!(lines[4].contains("\"b\""));
    }
}
