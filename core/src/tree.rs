// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Preference structures composing deciders over a conflict set.
//!
//! [`Tree`] is a radix trie over the bits of the ids: Monadic deciders guard
//! shared prefixes and a Dyadic decider sits at every branch, so the work per
//! poll is proportional to the depth of the divergences actually present.
//! [`Flat`] drives a single Polyadic decider and fits small conflict sets
//! that are enumerated up-front.

use std::collections::BTreeSet;

use crate::block::Id;
use crate::decider::{Dyadic, DeciderAPI as _, Monadic, Polyadic, Thresholds};
use crate::vote_bag::VoteBag;

/// Which preference structure an engine builds per conflict set.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum SetStructure {
    #[default]
    Tree,
    Flat,
}

/// A polyadic preference structure over an a-priori unknown id space.
#[derive(Clone, Debug)]
pub(crate) struct Tree {
    thresholds: Thresholds,
    root: Option<Box<Node>>,
    ids: BTreeSet<Id>,
}

#[derive(Clone, Debug)]
enum Node {
    Unary(UnaryNode),
    Binary(BinaryNode),
}

/// A maximal run of bits shared by every id in this subtree. A leaf covers
/// the id's remaining bits and has no child.
#[derive(Clone, Debug)]
struct UnaryNode {
    decider: Monadic,
    /// Bits [start, end) are common to the subtree.
    start: usize,
    end: usize,
    child: Option<Box<Node>>,
    should_reset: bool,
}

/// A divergence: ids with bit 0 at `bit` live in `children[0]`, ids with
/// bit 1 in `children[1]`.
#[derive(Clone, Debug)]
struct BinaryNode {
    decider: Dyadic,
    bit: usize,
    children: [Box<Node>; 2],
    should_reset: bool,
}

impl Node {
    fn set_reset(&mut self) {
        match self {
            Node::Unary(node) => node.should_reset = true,
            Node::Binary(node) => node.should_reset = true,
        }
    }
}

impl Tree {
    pub(crate) fn new(thresholds: Thresholds) -> Self {
        Self {
            thresholds,
            root: None,
            ids: BTreeSet::new(),
        }
    }

    /// Registers an id, splitting the trie where it diverges from the known
    /// ids. Returns false if the id was already present.
    pub(crate) fn add(&mut self, id: Id) -> bool {
        if !self.ids.insert(id) {
            return false;
        }
        match &mut self.root {
            None => {
                self.root = Some(Box::new(Node::Unary(UnaryNode {
                    decider: Monadic::new(self.thresholds.clone(), id),
                    start: 0,
                    end: Id::NUM_BITS,
                    child: None,
                    should_reset: false,
                })));
            }
            Some(node) => Self::insert(node, id, &self.thresholds),
        }
        true
    }

    fn insert(node: &mut Node, id: Id, thresholds: &Thresholds) {
        match node {
            Node::Binary(binary) => {
                Self::insert(&mut binary.children[id.bit(binary.bit) as usize], id, thresholds)
            }
            Node::Unary(unary) => {
                let representative = unary.decider.preference();
                let diverge =
                    (unary.start..unary.end).find(|i| id.bit(*i) != representative.bit(*i));
                match diverge {
                    None => {
                        let child = unary
                            .child
                            .as_mut()
                            .expect("Duplicate ids are filtered before descending");
                        Self::insert(child, id, thresholds);
                    }
                    Some(bit) => {
                        // The existing subtree keeps its decider state on both
                        // sides of the split; only the new leaf starts fresh.
                        let suffix = Node::Unary(UnaryNode {
                            decider: unary.decider.clone(),
                            start: bit + 1,
                            end: unary.end,
                            child: unary.child.take(),
                            should_reset: unary.should_reset,
                        });
                        let leaf = Node::Unary(UnaryNode {
                            decider: Monadic::new(thresholds.clone(), id),
                            start: bit + 1,
                            end: Id::NUM_BITS,
                            child: None,
                            should_reset: false,
                        });
                        let representative_side = representative.bit(bit) as usize;
                        let mut choices = [Id::EMPTY; 2];
                        choices[representative_side] = representative;
                        choices[1 - representative_side] = id;
                        let children = if representative_side == 0 {
                            [Box::new(suffix), Box::new(leaf)]
                        } else {
                            [Box::new(leaf), Box::new(suffix)]
                        };
                        let branch = Node::Binary(BinaryNode {
                            decider: Dyadic::new(
                                thresholds.clone(),
                                choices,
                                representative_side,
                            ),
                            bit,
                            children,
                            should_reset: unary.should_reset,
                        });
                        if bit > unary.start {
                            unary.end = bit;
                            unary.child = Some(Box::new(branch));
                        } else {
                            *node = branch;
                        }
                    }
                }
            }
        }
    }

    /// Distributes the bag down the trie. Returns whether the poll at the
    /// root met alpha_preference.
    pub(crate) fn record_poll(&mut self, bag: &VoteBag) -> bool {
        let bag = bag.filter(|id| self.ids.contains(id));
        match &mut self.root {
            None => false,
            Some(node) => Self::poll(node, &bag),
        }
    }

    fn poll(node: &mut Node, bag: &VoteBag) -> bool {
        match node {
            Node::Unary(unary) => {
                if unary.should_reset {
                    unary.decider.record_unsuccessful_poll();
                    if let Some(child) = &mut unary.child {
                        child.set_reset();
                    }
                    unary.should_reset = false;
                }
                let count = bag.len();
                let choice = unary.decider.preference();
                let successful = if count > 0 {
                    unary.decider.record_poll(count, choice)
                } else {
                    unary.decider.record_unsuccessful_poll();
                    false
                };
                if let Some(child) = &mut unary.child {
                    if successful {
                        Self::poll(child, bag);
                    } else {
                        child.set_reset();
                    }
                }
                successful
            }
            Node::Binary(binary) => {
                if binary.should_reset {
                    binary.decider.record_unsuccessful_poll();
                    binary.children[0].set_reset();
                    binary.children[1].set_reset();
                    binary.should_reset = false;
                }
                let bit = binary.bit;
                let zero_side = bag.filter(|id| id.bit(bit) == 0);
                let one_count = bag.len() - zero_side.len();
                // Ties go to side 0: the side holding the smaller ids.
                let (major, major_bag) = if one_count > zero_side.len() {
                    (1, bag.filter(|id| id.bit(bit) == 1))
                } else {
                    (0, zero_side)
                };
                let choice = binary.decider.choices()[major];
                let successful = if major_bag.len() > 0 {
                    binary.decider.record_poll(major_bag.len(), choice)
                } else {
                    binary.decider.record_unsuccessful_poll();
                    false
                };
                binary.children[1 - major].set_reset();
                if successful {
                    Self::poll(&mut binary.children[major], &major_bag);
                } else {
                    binary.children[major].set_reset();
                }
                successful
            }
        }
    }

    /// Breaks every confidence run; applied lazily on the next poll.
    pub(crate) fn record_unsuccessful_poll(&mut self) {
        if let Some(node) = &mut self.root {
            node.set_reset();
        }
    }

    /// The id reached by descending preferred edges, or `Id::EMPTY` for an
    /// empty tree.
    pub(crate) fn preference(&self) -> Id {
        let mut node = match &self.root {
            None => return Id::EMPTY,
            Some(node) => node,
        };
        loop {
            match node.as_ref() {
                Node::Unary(unary) => match &unary.child {
                    None => return unary.decider.preference(),
                    Some(child) => node = child,
                },
                Node::Binary(binary) => {
                    node = &binary.children[binary.decider.preferred_index()]
                }
            }
        }
    }

    /// Whether the whole preferred path is finalized: every decider along it
    /// is, and every branch's finalized side is itself settled.
    pub(crate) fn finalized(&self) -> bool {
        self.root.as_ref().is_some_and(|node| Self::settled(node))
    }

    fn settled(node: &Node) -> bool {
        match node {
            Node::Unary(unary) => {
                unary.decider.finalized()
                    && unary.child.as_ref().map_or(true, |child| Self::settled(child))
            }
            Node::Binary(binary) => {
                binary.decider.finalized()
                    && Self::settled(&binary.children[binary.decider.preferred_index()])
            }
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.ids.len()
    }
}

/// A single Polyadic decider over an up-front conflict set.
#[derive(Clone, Debug)]
pub(crate) struct Flat {
    decider: Polyadic,
}

impl Flat {
    pub(crate) fn new(thresholds: Thresholds) -> Self {
        Self {
            decider: Polyadic::new(thresholds),
        }
    }

    pub(crate) fn add(&mut self, id: Id) {
        self.decider.add(id);
    }

    /// Feeds the bag's mode to the decider. Returns whether the poll met
    /// alpha_preference.
    pub(crate) fn record_poll(&mut self, bag: &VoteBag) -> bool {
        match bag.mode() {
            Some((id, count)) => self.decider.record_poll(count, id),
            None => {
                self.decider.record_unsuccessful_poll();
                false
            }
        }
    }

    pub(crate) fn record_unsuccessful_poll(&mut self) {
        self.decider.record_unsuccessful_poll();
    }

    pub(crate) fn preference(&self) -> Id {
        self.decider.preference()
    }

    pub(crate) fn finalized(&self) -> bool {
        self.decider.finalized()
    }
}

/// The per-conflict-set structure an engine instantiates, chosen once at
/// engine construction.
#[derive(Clone, Debug)]
pub(crate) enum PreferenceSet {
    Tree(Tree),
    Flat(Flat),
}

impl PreferenceSet {
    pub(crate) fn new(structure: SetStructure, thresholds: Thresholds) -> Self {
        match structure {
            SetStructure::Tree => PreferenceSet::Tree(Tree::new(thresholds)),
            SetStructure::Flat => PreferenceSet::Flat(Flat::new(thresholds)),
        }
    }

    pub(crate) fn add(&mut self, id: Id) {
        match self {
            PreferenceSet::Tree(tree) => {
                tree.add(id);
            }
            PreferenceSet::Flat(flat) => flat.add(id),
        }
    }

    pub(crate) fn record_poll(&mut self, bag: &VoteBag) -> bool {
        match self {
            PreferenceSet::Tree(tree) => tree.record_poll(bag),
            PreferenceSet::Flat(flat) => flat.record_poll(bag),
        }
    }

    pub(crate) fn record_unsuccessful_poll(&mut self) {
        match self {
            PreferenceSet::Tree(tree) => tree.record_unsuccessful_poll(),
            PreferenceSet::Flat(flat) => flat.record_unsuccessful_poll(),
        }
    }

    pub(crate) fn preference(&self) -> Id {
        match self {
            PreferenceSet::Tree(tree) => tree.preference(),
            PreferenceSet::Flat(flat) => flat.preference(),
        }
    }

    pub(crate) fn finalized(&self) -> bool {
        match self {
            PreferenceSet::Tree(tree) => tree.finalized(),
            PreferenceSet::Flat(flat) => flat.finalized(),
        }
    }
}
