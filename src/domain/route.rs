//! Event routing strategies and route construction.

use std::fmt;

use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::domain::forest::Forest;
use crate::domain::node::NodeKey;

/// How an event travels through the tree from its source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Strategy {
    /// Source, then each ancestor up to the root.
    Bubble,
    /// Root down to the source; the reverse of `Bubble`.
    Tunnel,
    /// Only the immediate parent.
    Parent,
    /// Direct children, left to right.
    Children,
    /// The whole subtree below the source in pre-order.
    Descendants,
    /// The whole tree containing the source, root first.
    Spread,
    /// The other children of the source's parent.
    Siblings,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Ordered nodes a dispatch visits, fixed when the dispatch starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route<N> {
    nodes: Vec<N>,
}

impl<N: NodeKey> Route<N> {
    /// Builds the route for `strategy` against the current topology.
    ///
    /// A node the forest has never seen is treated as a singleton tree.
    pub fn build<H: Clone>(forest: &Forest<N, H>, strategy: Strategy, source: N) -> Self {
        let nodes = match strategy {
            Strategy::Bubble => Self::bubble(forest, source),
            Strategy::Tunnel => {
                let mut nodes = Self::bubble(forest, source);
                nodes.reverse();
                nodes
            }
            Strategy::Parent => forest.parent(source).into_iter().collect(),
            Strategy::Children => forest.children(source).collect(),
            Strategy::Descendants => forest.descendants(source).collect(),
            Strategy::Spread => {
                let root = forest.root_of(source);
                std::iter::once(root)
                    .chain(forest.descendants(root))
                    .collect()
            }
            Strategy::Siblings => forest.siblings(source),
        };
        Self { nodes }
    }

    fn bubble<H: Clone>(forest: &Forest<N, H>, source: N) -> Vec<N> {
        std::iter::once(source)
            .chain(forest.ancestors(source))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<N> {
        self.nodes.get(index).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = N> + '_ {
        self.nodes.iter().copied()
    }

    pub fn as_slice(&self) -> &[N] {
        &self.nodes
    }
}

impl<N: NodeKey> fmt::Display for Route<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}]",
            self.nodes.iter().map(|n| format!("{n:?}")).join(" -> ")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain() -> Forest<&'static str, ()> {
        let mut forest = Forest::new();
        forest.attach("m", "root").unwrap();
        forest.attach("leaf", "m").unwrap();
        forest
    }

    #[test]
    fn tunnel_is_reverse_of_bubble() {
        let forest = chain();
        let bubble = Route::build(&forest, Strategy::Bubble, "leaf");
        let tunnel = Route::build(&forest, Strategy::Tunnel, "leaf");
        assert_eq!(bubble.as_slice(), &["leaf", "m", "root"]);
        assert_eq!(tunnel.as_slice(), &["root", "m", "leaf"]);
    }

    #[test]
    fn unknown_source_bubbles_to_itself_only() {
        let forest = chain();
        let route = Route::build(&forest, Strategy::Bubble, "stranger");
        assert_eq!(route.as_slice(), &["stranger"]);
        assert!(Route::build(&forest, Strategy::Parent, "stranger").is_empty());
    }

    #[test]
    fn display_joins_nodes() {
        let forest = chain();
        let route = Route::build(&forest, Strategy::Bubble, "leaf");
        assert_eq!(route.to_string(), r#"["leaf" -> "m" -> "root"]"#);
    }
}
