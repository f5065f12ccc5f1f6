//! Integration tests for forest membership: attach, detach, queries and collection.

use functree::domain::{Forest, ForestError};
use functree::util::testing;
use rstest::{fixture, rstest};

type TestForest = Forest<&'static str, u8>;

/// root -> [a -> [c, d], b]
#[fixture]
fn sample() -> TestForest {
    testing::init_test_setup();
    let mut forest = TestForest::new();
    forest.attach("a", "root").unwrap();
    forest.attach("b", "root").unwrap();
    forest.attach("c", "a").unwrap();
    forest.attach("d", "a").unwrap();
    forest
}

#[rstest]
fn given_unseen_node_when_resolving_then_creates_singleton_tree() {
    let mut forest = TestForest::new();
    assert!(!forest.contains("x"));

    let tree = forest.resolve_tree("x");

    assert!(forest.contains("x"));
    assert_eq!(forest.root(tree), Some("x"));
    assert_eq!(forest.resolve_tree("x"), tree);
    assert_eq!(forest.tree_count(), 1);
}

#[rstest]
fn given_sample_when_querying_then_topology_is_consistent(sample: TestForest) {
    let tree = sample.tree_of("root").unwrap();
    for node in ["a", "b", "c", "d"] {
        assert_eq!(sample.tree_of(node), Some(tree));
        assert_eq!(sample.root_of(node), "root");
    }
    assert_eq!(sample.children("root").collect::<Vec<_>>(), vec!["a", "b"]);
    assert_eq!(sample.siblings("c"), vec!["d"]);
    assert_eq!(sample.ancestors("d").collect::<Vec<_>>(), vec!["a", "root"]);
    assert_eq!(sample.descendants("root").collect::<Vec<_>>(), vec!["a", "c", "d", "b"]);
    assert_eq!(sample.members(tree), vec!["root", "a", "c", "d", "b"]);
    assert_eq!(sample.depth("c"), 2);
    assert_eq!(sample.tree_count(), 1);
}

#[rstest]
fn given_sample_when_searching_then_finds_nearest_match(sample: TestForest) {
    assert_eq!(sample.find_ancestor("c", |n| n.len() == 4), Some("root"));
    assert_eq!(sample.find_descendant("root", |n| n == "d" || n == "b"), Some("d"));
    assert_eq!(sample.find_ancestor("root", |_| true), None);
}

#[rstest]
#[case("c", "b")]
#[case("c", "c")]
#[case("c", "root")]
fn given_attached_child_when_attaching_again_then_fails_and_forest_unchanged(
    mut sample: TestForest,
    #[case] child: &'static str,
    #[case] parent: &'static str,
) {
    let before = sample.render(sample.tree_of("root").unwrap()).unwrap().to_string();

    let err = sample.attach(child, parent).unwrap_err();

    assert_eq!(err, ForestError::AlreadyAttached { child: "\"c\"".into() });
    assert_eq!(sample.parent("c"), Some("a"));
    assert_eq!(sample.render(sample.tree_of("root").unwrap()).unwrap().to_string(), before);
}

#[rstest]
#[case("root", "c")]
#[case("root", "root")]
fn given_ancestor_when_attaching_under_descendant_then_rejects_cycle(
    mut sample: TestForest,
    #[case] child: &'static str,
    #[case] parent: &'static str,
) {
    let err = sample.attach(child, parent).unwrap_err();
    assert!(matches!(err, ForestError::WouldCreateCycle { .. }));
    assert_eq!(sample.tree_count(), 1);
}

#[rstest]
fn given_two_trees_when_attaching_then_child_tree_is_absorbed(mut sample: TestForest) {
    sample.attach("y", "x").unwrap();
    assert_eq!(sample.tree_count(), 2);

    let attached = sample.attach("x", "b").unwrap();

    assert_eq!(attached.tree, sample.tree_of("root").unwrap());
    assert_eq!(sample.tree_of("y"), Some(attached.tree));
    assert_eq!(sample.root(attached.absorbed), None);
    assert_eq!(sample.tree_count(), 1);
}

#[rstest]
fn given_subtree_when_detaching_then_becomes_own_tree(mut sample: TestForest) {
    let detached = sample.detach("root", "a").unwrap();

    let new_tree = detached.new_tree.unwrap();
    assert_eq!(sample.root(new_tree), Some("a"));
    assert_eq!(sample.tree_of("c"), Some(new_tree));
    assert_eq!(sample.tree_of("d"), Some(new_tree));
    assert_ne!(sample.tree_of("root"), Some(new_tree));
    assert_eq!(sample.children("root").collect::<Vec<_>>(), vec!["b"]);
    assert_eq!(sample.tree_count(), 2);
}

#[rstest]
fn given_bare_leaf_when_detaching_then_it_is_removed(mut sample: TestForest) {
    let detached = sample.detach("root", "b").unwrap();

    assert_eq!(detached.new_tree, None);
    assert!(!sample.contains("b"));
    assert_eq!(sample.tree_count(), 1);
}

#[rstest]
fn given_collection_disabled_when_detaching_leaf_then_it_is_kept() {
    let mut forest = TestForest::new().with_collection(false);
    forest.attach("leaf", "root").unwrap();

    forest.detach("root", "leaf").unwrap();

    assert!(forest.contains("leaf"));
    assert_eq!(forest.tree_count(), 2);
    assert_eq!(forest.prune(), 2);
    assert!(forest.is_empty());
}

#[rstest]
fn given_non_child_when_detaching_then_nothing_happens(mut sample: TestForest) {
    assert!(sample.detach("b", "c").is_none());
    assert!(sample.detach("root", "unknown").is_none());
    assert_eq!(sample.parent("c"), Some("a"));
}

#[rstest]
fn given_sample_when_rendering_then_children_in_order(sample: TestForest) {
    let rendered = sample.render(sample.tree_of("root").unwrap()).unwrap().to_string();
    let lines: Vec<&str> = rendered.lines().collect();
    assert_eq!(lines.len(), 5);
    assert!(lines[0].contains("root"));
    assert!(lines[1].contains("\"a\""));
    assert!(lines[2].contains("\"c\""));
    assert!(lines[3].contains("\"d\""));
    assert!(lines[4].contains("\"b\""));
}
