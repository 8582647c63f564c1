//! The expansion tree — the right-hand side of a JSGF rule.
//!
//! An expansion is a tree over literal words, sequences, alternative sets,
//! optional and required groupings, repetitions, rule references and the
//! dictation placeholder. Trees are stored in a flat arena indexed by
//! [`ExpansionId`]; parent back-references are arena indices, never owners,
//! and the child-list mutation API keeps them consistent.
//!
//! Construction is by value: each builder consumes its child trees and
//! grafts them into a fresh arena, so a tree is acyclic by construction.
//!
//! Every node also carries *match scratch*: the token slice it consumed in
//! the most recent match run. Scratch lives in `Cell`/`RefCell` fields so
//! the matcher can stamp results through a shared reference; it is not part
//! of the tree's structural identity, serialization or equality.

use std::cell::{Cell, RefCell};
use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use unicode_normalization::UnicodeNormalization;

use crate::error::{GrammarError, GrammarResult};

/// Normalize a piece of text: NFC composition plus whitespace collapsed to
/// single ASCII spaces.
pub(crate) fn normalize_text(text: &str) -> String {
    let composed: String = text.nfc().collect();
    composed.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Index of a node within its owning [`ExpansionTree`].
///
/// Ids are stable under insertion and tag/text edits. Removing or replacing
/// a subtree compacts the arena and invalidates ids obtained earlier.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[repr(transparent)]
pub struct ExpansionId(u32);

impl ExpansionId {
    #[inline]
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for ExpansionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "exp:{}", self.0)
    }
}

/// Token slice `[start, end)` of the input a node consumed.
///
/// Indices are positions in the whitespace-tokenized input, so sibling
/// spans in a sequence are contiguous and a parent span covers its
/// children.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchSpan {
    pub start: usize,
    pub end: usize,
}

impl MatchSpan {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// The closed set of expansion node kinds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExpansionKind {
    /// One exact token sequence. Text is whitespace-normalized at
    /// construction; case folding is decided by the owning rule's policy.
    Literal { text: String },
    /// Concatenation of its children.
    Sequence,
    /// Unordered alternation; per-child weights are kept for compilation
    /// only and never influence matching.
    AlternativeSet { weights: Vec<Option<f32>> },
    /// Matches its single child or nothing.
    OptionalGrouping,
    /// Parenthesized sequence.
    RequiredGrouping,
    /// Zero or more repetitions of its single child.
    KleeneStar,
    /// One or more repetitions of its single child.
    Repeat,
    /// Reference to a rule by name, resolved lazily against a grammar.
    NamedRuleRef { name: String },
    /// Reference created from a concrete rule. Still a relation, not
    /// ownership: it binds by name when the matcher is built.
    RuleRef { name: String },
    /// Compiles to `<NULL>`; matches the empty token sequence.
    NullRef,
    /// Compiles to `<VOID>`; never matches.
    VoidRef,
    /// Compiles to `<DICTATION>`; matches one or more arbitrary tokens.
    Dictation,
}

impl ExpansionKind {
    /// Short human-readable name of the kind, for error messages.
    pub fn kind_name(&self) -> &'static str {
        match self {
            ExpansionKind::Literal { .. } => "Literal",
            ExpansionKind::Sequence => "Sequence",
            ExpansionKind::AlternativeSet { .. } => "AlternativeSet",
            ExpansionKind::OptionalGrouping => "OptionalGrouping",
            ExpansionKind::RequiredGrouping => "RequiredGrouping",
            ExpansionKind::KleeneStar => "KleeneStar",
            ExpansionKind::Repeat => "Repeat",
            ExpansionKind::NamedRuleRef { .. } => "NamedRuleRef",
            ExpansionKind::RuleRef { .. } => "RuleRef",
            ExpansionKind::NullRef => "NullRef",
            ExpansionKind::VoidRef => "VoidRef",
            ExpansionKind::Dictation => "Dictation",
        }
    }

    /// Whether this kind is a leaf (takes no children).
    pub fn is_leaf(&self) -> bool {
        matches!(
            self,
            ExpansionKind::Literal { .. }
                | ExpansionKind::NamedRuleRef { .. }
                | ExpansionKind::RuleRef { .. }
                | ExpansionKind::NullRef
                | ExpansionKind::VoidRef
                | ExpansionKind::Dictation
        )
    }

    /// Whether this kind takes exactly one child.
    pub fn is_unary(&self) -> bool {
        matches!(
            self,
            ExpansionKind::OptionalGrouping | ExpansionKind::KleeneStar | ExpansionKind::Repeat
        )
    }

    /// Whether this kind references another rule.
    pub fn is_rule_ref(&self) -> bool {
        matches!(
            self,
            ExpansionKind::NamedRuleRef { .. } | ExpansionKind::RuleRef { .. }
        )
    }
}

/// A single arena node: kind, linkage, tags and match scratch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ExpansionNode {
    pub(crate) kind: ExpansionKind,
    pub(crate) parent: Option<ExpansionId>,
    pub(crate) children: Vec<ExpansionId>,
    pub(crate) tags: Vec<String>,
    #[serde(skip)]
    pub(crate) current_match: Cell<Option<MatchSpan>>,
    #[serde(skip)]
    pub(crate) repetition_spans: RefCell<Vec<MatchSpan>>,
}

impl ExpansionNode {
    fn new(kind: ExpansionKind) -> Self {
        Self {
            kind,
            parent: None,
            children: Vec::new(),
            tags: Vec::new(),
            current_match: Cell::new(None),
            repetition_spans: RefCell::new(Vec::new()),
        }
    }
}

/// An expansion tree stored as a flat arena.
///
/// The arena is always dense and fully reachable from [`root`](Self::root).
/// Structural mutation goes through the child-list API (`insert_child`,
/// `remove_subtree`, `replace_subtree`) which maintains parent pointers and
/// bumps the [`revision`](Self::revision) token that downstream caches key on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpansionTree {
    nodes: Vec<ExpansionNode>,
    root: ExpansionId,
    revision: u64,
    #[serde(skip)]
    last_tokens: RefCell<Vec<String>>,
}

// ── Builders ────────────────────────────────────────────────────────────

impl ExpansionTree {
    fn leaf(kind: ExpansionKind) -> Self {
        Self {
            nodes: vec![ExpansionNode::new(kind)],
            root: ExpansionId(0),
            revision: 0,
            last_tokens: RefCell::new(Vec::new()),
        }
    }

    fn branch(kind: ExpansionKind, children: Vec<ExpansionTree>) -> Self {
        assert!(
            !children.is_empty(),
            "{} requires at least one child",
            kind.kind_name()
        );
        let mut tree = Self::leaf(kind);
        for child in children {
            tree.attach(tree.root, child);
        }
        tree
    }

    /// A literal matching the given text (whitespace-normalized).
    pub fn literal(text: impl Into<String>) -> Self {
        Self::leaf(ExpansionKind::Literal {
            text: normalize_text(&text.into()),
        })
    }

    /// A concatenation of the given children, in order.
    pub fn sequence(children: impl IntoIterator<Item = ExpansionTree>) -> Self {
        Self::branch(ExpansionKind::Sequence, children.into_iter().collect())
    }

    /// An unweighted alternation over the given children.
    pub fn alternative_set(children: impl IntoIterator<Item = ExpansionTree>) -> Self {
        let children: Vec<_> = children.into_iter().collect();
        let weights = vec![None; children.len()];
        Self::branch(ExpansionKind::AlternativeSet { weights }, children)
    }

    /// An alternation with a weight on every alternative.
    pub fn alternative_set_weighted(
        children: impl IntoIterator<Item = (f32, ExpansionTree)>,
    ) -> GrammarResult<Self> {
        let (weights, children): (Vec<_>, Vec<_>) = children.into_iter().unzip();
        for &w in &weights {
            if w < 0.0 {
                return Err(GrammarError::NegativeWeight { weight: w });
            }
        }
        let weights = weights.into_iter().map(Some).collect();
        Ok(Self::branch(
            ExpansionKind::AlternativeSet { weights },
            children,
        ))
    }

    /// An optional grouping: matches its child or nothing.
    pub fn optional(child: ExpansionTree) -> Self {
        Self::branch(ExpansionKind::OptionalGrouping, vec![child])
    }

    /// A parenthesized grouping of the given children.
    pub fn required_grouping(children: impl IntoIterator<Item = ExpansionTree>) -> Self {
        Self::branch(ExpansionKind::RequiredGrouping, children.into_iter().collect())
    }

    /// Zero-or-more repetition of the child.
    pub fn kleene_star(child: ExpansionTree) -> Self {
        Self::branch(ExpansionKind::KleeneStar, vec![child])
    }

    /// One-or-more repetition of the child.
    pub fn repeat(child: ExpansionTree) -> Self {
        Self::branch(ExpansionKind::Repeat, vec![child])
    }

    /// A lazily-resolved reference to the named rule.
    pub fn named_rule_ref(name: impl Into<String>) -> Self {
        Self::leaf(ExpansionKind::NamedRuleRef {
            name: normalize_text(&name.into()),
        })
    }

    pub(crate) fn rule_ref_named(name: impl Into<String>) -> Self {
        Self::leaf(ExpansionKind::RuleRef {
            name: normalize_text(&name.into()),
        })
    }

    /// The `<NULL>` reference: consumes nothing, always succeeds.
    pub fn null_ref() -> Self {
        Self::leaf(ExpansionKind::NullRef)
    }

    /// The `<VOID>` reference: never matches.
    pub fn void_ref() -> Self {
        Self::leaf(ExpansionKind::VoidRef)
    }

    /// The `<DICTATION>` placeholder: one or more arbitrary tokens.
    pub fn dictation() -> Self {
        Self::leaf(ExpansionKind::Dictation)
    }

    /// Tag the root node and return the tree, for fluent construction.
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        let root = self.root;
        self.add_tag(root, tag);
        self
    }

    /// Rebuild a node of the given kind over already-built child trees.
    /// For an `AlternativeSet` kind the weight list must match the child
    /// count.
    pub(crate) fn from_kind(kind: ExpansionKind, children: Vec<ExpansionTree>) -> Self {
        if children.is_empty() {
            Self::leaf(kind)
        } else {
            Self::branch(kind, children)
        }
    }

    /// Turn a parsed parenthesized body into a `RequiredGrouping`.
    ///
    /// An untagged `Sequence` root is rewritten in place so the grouping
    /// adopts the sequence elements as its own children; anything else
    /// becomes the grouping's single child.
    pub(crate) fn into_required_grouping(mut self) -> Self {
        let root = self.root;
        if matches!(self.kind(root), ExpansionKind::Sequence) && self.tags(root).is_empty() {
            self.nodes[root.index()].kind = ExpansionKind::RequiredGrouping;
            self
        } else {
            Self::branch(ExpansionKind::RequiredGrouping, vec![self])
        }
    }
}

// ── Access ──────────────────────────────────────────────────────────────

impl ExpansionTree {
    /// The root node of the tree.
    pub fn root(&self) -> ExpansionId {
        self.root
    }

    /// The kind of a node.
    pub fn kind(&self, id: ExpansionId) -> &ExpansionKind {
        &self.nodes[id.index()].kind
    }

    /// The ordered children of a node.
    pub fn children(&self, id: ExpansionId) -> &[ExpansionId] {
        &self.nodes[id.index()].children
    }

    /// The parent of a node, or `None` for the root.
    pub fn parent(&self, id: ExpansionId) -> Option<ExpansionId> {
        self.nodes[id.index()].parent
    }

    /// The tags attached to a node, in attachment order.
    pub fn tags(&self, id: ExpansionId) -> &[String] {
        &self.nodes[id.index()].tags
    }

    /// Number of nodes in the tree.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Depth of a node (root is 0).
    pub fn depth(&self, id: ExpansionId) -> usize {
        let mut d = 0;
        let mut cur = id;
        while let Some(p) = self.parent(cur) {
            d += 1;
            cur = p;
        }
        d
    }

    /// Monotonic token bumped on every structural mutation. Caches of
    /// compiled text and matcher elements key on it.
    pub fn revision(&self) -> u64 {
        self.revision
    }
}

// ── Traversal ───────────────────────────────────────────────────────────

/// Control value returned by a [`walk`](ExpansionTree::walk) visitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkAction {
    /// Descend into this node's children.
    Continue,
    /// Skip this node's children, continue with siblings.
    SkipChildren,
    /// Abort the traversal.
    Stop,
}

impl ExpansionTree {
    /// Pre-order traversal from the root with short-circuit control.
    pub fn walk(&self, mut visit: impl FnMut(ExpansionId) -> WalkAction) {
        self.walk_from(self.root, &mut visit);
    }

    /// Pre-order traversal of the subtree rooted at `id`.
    pub fn walk_from(&self, id: ExpansionId, visit: &mut impl FnMut(ExpansionId) -> WalkAction) {
        let mut stack = vec![id];
        while let Some(cur) = stack.pop() {
            match visit(cur) {
                WalkAction::Stop => return,
                WalkAction::SkipChildren => {}
                WalkAction::Continue => {
                    for &child in self.children(cur).iter().rev() {
                        stack.push(child);
                    }
                }
            }
        }
    }

    /// All node ids in pre-order.
    pub fn preorder(&self) -> Vec<ExpansionId> {
        let mut out = Vec::with_capacity(self.nodes.len());
        self.walk(|id| {
            out.push(id);
            WalkAction::Continue
        });
        out
    }

    /// First node (pre-order) satisfying the predicate.
    pub fn find_first(&self, mut pred: impl FnMut(ExpansionId) -> bool) -> Option<ExpansionId> {
        let mut found = None;
        self.walk(|id| {
            if pred(id) {
                found = Some(id);
                WalkAction::Stop
            } else {
                WalkAction::Continue
            }
        });
        found
    }

    /// Whether the subtree at `id` contains a `Dictation` node.
    pub fn contains_dictation_at(&self, id: ExpansionId) -> bool {
        let mut found = false;
        self.walk_from(id, &mut |n| {
            if matches!(self.kind(n), ExpansionKind::Dictation) {
                found = true;
                WalkAction::Stop
            } else {
                WalkAction::Continue
            }
        });
        found
    }

    /// Whether the whole tree contains a `Dictation` node.
    pub fn contains_dictation(&self) -> bool {
        self.contains_dictation_at(self.root)
    }

    /// Whether the whole tree is free of `Dictation` nodes.
    pub fn is_dictation_free(&self) -> bool {
        !self.contains_dictation()
    }

    /// Names of all rules referenced anywhere in the tree, in pre-order.
    pub fn collect_rule_refs(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.walk(|id| {
            match self.kind(id) {
                ExpansionKind::NamedRuleRef { name } | ExpansionKind::RuleRef { name } => {
                    out.push(name.clone());
                }
                _ => {}
            }
            WalkAction::Continue
        });
        out
    }
}

// ── Mutation ────────────────────────────────────────────────────────────

impl ExpansionTree {
    /// Graft `sub` into this arena and hook it under `parent` at the end of
    /// its child list. Returns the new id of the grafted root.
    fn attach(&mut self, parent: ExpansionId, sub: ExpansionTree) -> ExpansionId {
        let id = self.graft_at(parent, sub);
        self.nodes[parent.index()].children.push(id);
        id
    }

    /// Graft `sub`'s nodes into this arena with `parent` as the root's
    /// parent, without touching `parent`'s child list.
    fn graft_at(&mut self, parent: ExpansionId, sub: ExpansionTree) -> ExpansionId {
        let offset = self.nodes.len() as u32;
        let sub_root = sub.root;
        for mut node in sub.nodes {
            node.parent = node.parent.map(|p| ExpansionId(p.0 + offset));
            for c in &mut node.children {
                *c = ExpansionId(c.0 + offset);
            }
            self.nodes.push(node);
        }
        let new_root = ExpansionId(sub_root.0 + offset);
        self.nodes[new_root.index()].parent = Some(parent);
        new_root
    }

    fn assert_can_take_child(&self, parent: ExpansionId) {
        let kind = self.kind(parent);
        assert!(
            !kind.is_leaf(),
            "{} nodes take no children",
            kind.kind_name()
        );
        if kind.is_unary() {
            assert!(
                self.children(parent).is_empty(),
                "{} takes exactly one child",
                kind.kind_name()
            );
        }
    }

    /// Insert `sub` as a child of `parent` at `index`.
    ///
    /// Maintains the parent pointer of the grafted subtree and, for an
    /// `AlternativeSet` parent, keeps the weight list aligned (the new
    /// alternative starts unweighted).
    ///
    /// # Panics
    ///
    /// If `parent` is a leaf kind, a unary kind that already has a child,
    /// or `index` is out of bounds. Violating the tree shape is a fatal
    /// programming error, not a recoverable condition.
    pub fn insert_child(
        &mut self,
        parent: ExpansionId,
        index: usize,
        sub: ExpansionTree,
    ) -> ExpansionId {
        self.assert_can_take_child(parent);
        assert!(
            index <= self.children(parent).len(),
            "child index {index} out of bounds"
        );
        let id = self.graft_at(parent, sub);
        self.nodes[parent.index()].children.insert(index, id);
        if let ExpansionKind::AlternativeSet { weights } = &mut self.nodes[parent.index()].kind {
            weights.insert(index, None);
        }
        self.revision += 1;
        id
    }

    /// Append `sub` as the last child of `parent`.
    pub fn push_child(&mut self, parent: ExpansionId, sub: ExpansionTree) -> ExpansionId {
        let index = self.children(parent).len();
        self.insert_child(parent, index, sub)
    }

    /// A standalone deep copy of the subtree rooted at `id`.
    ///
    /// The copy has fresh match scratch and revision 0; the source tree is
    /// untouched.
    pub fn subtree(&self, id: ExpansionId) -> ExpansionTree {
        let mut out = ExpansionTree {
            nodes: Vec::new(),
            root: ExpansionId(0),
            revision: 0,
            last_tokens: RefCell::new(Vec::new()),
        };
        self.copy_into(id, None, &mut out);
        out
    }

    fn copy_into(
        &self,
        id: ExpansionId,
        parent: Option<ExpansionId>,
        out: &mut ExpansionTree,
    ) -> ExpansionId {
        let new_id = ExpansionId(out.nodes.len() as u32);
        let src = &self.nodes[id.index()];
        out.nodes.push(ExpansionNode {
            kind: src.kind.clone(),
            parent,
            children: Vec::new(),
            tags: src.tags.clone(),
            current_match: Cell::new(None),
            repetition_spans: RefCell::new(Vec::new()),
        });
        for &child in &src.children {
            let c = self.copy_into(child, Some(new_id), out);
            out.nodes[new_id.index()].children.push(c);
        }
        new_id
    }

    /// Remove the subtree rooted at `id`, detaching it from its parent and
    /// returning it as a standalone tree.
    ///
    /// Compacts the arena: ids obtained before the call are invalidated.
    ///
    /// # Panics
    ///
    /// If `id` is the root.
    pub fn remove_subtree(&mut self, id: ExpansionId) -> ExpansionTree {
        let parent = self
            .parent(id)
            .expect("cannot remove the root of an expansion tree");
        let sub = self.subtree(id);

        let pos = self.nodes[parent.index()]
            .children
            .iter()
            .position(|&c| c == id)
            .expect("child list out of sync with parent pointer");
        self.nodes[parent.index()].children.remove(pos);
        if let ExpansionKind::AlternativeSet { weights } = &mut self.nodes[parent.index()].kind {
            weights.remove(pos);
        }

        let mut dead = HashSet::new();
        let mut stack = vec![id];
        while let Some(cur) = stack.pop() {
            dead.insert(cur);
            stack.extend(self.nodes[cur.index()].children.iter().copied());
        }
        self.compact(&dead);
        self.revision += 1;
        sub
    }

    /// Replace the subtree rooted at `id` with `sub`, preserving parent
    /// linkage and child position. Returns the displaced subtree.
    ///
    /// Compacts the arena: ids obtained before the call are invalidated.
    pub fn replace_subtree(&mut self, id: ExpansionId, sub: ExpansionTree) -> ExpansionTree {
        if id == self.root {
            let mut replacement = sub;
            replacement.revision = self.revision + 1;
            return std::mem::replace(self, replacement);
        }

        let parent = self.parent(id).expect("non-root node must have a parent");
        let pos = self.nodes[parent.index()]
            .children
            .iter()
            .position(|&c| c == id)
            .expect("child list out of sync with parent pointer");

        let old = self.subtree(id);

        let mut dead = HashSet::new();
        let mut stack = vec![id];
        while let Some(cur) = stack.pop() {
            dead.insert(cur);
            stack.extend(self.nodes[cur.index()].children.iter().copied());
        }
        // Detach before compacting so the parent's child list stays valid.
        self.nodes[parent.index()].children.remove(pos);
        let remap = self.compact(&dead);
        let parent = remap[parent.index()].expect("parent survives removal of its child");

        let new_id = self.graft_at(parent, sub);
        self.nodes[parent.index()].children.insert(pos, new_id);
        self.revision += 1;
        old
    }

    /// Drop all nodes in `dead`, remapping indices. Returns the old-index →
    /// new-id map for surviving nodes.
    fn compact(&mut self, dead: &HashSet<ExpansionId>) -> Vec<Option<ExpansionId>> {
        let mut remap: Vec<Option<ExpansionId>> = vec![None; self.nodes.len()];
        let mut next = 0u32;
        for (i, slot) in remap.iter_mut().enumerate() {
            if !dead.contains(&ExpansionId(i as u32)) {
                *slot = Some(ExpansionId(next));
                next += 1;
            }
        }
        let old_nodes = std::mem::take(&mut self.nodes);
        for (i, mut node) in old_nodes.into_iter().enumerate() {
            if remap[i].is_none() {
                continue;
            }
            node.parent = node.parent.and_then(|p| remap[p.index()]);
            node.children = node
                .children
                .iter()
                .filter_map(|c| remap[c.index()])
                .collect();
            self.nodes.push(node);
        }
        self.root = remap[self.root.index()].expect("root is never removed");
        remap
    }

    /// Change the text of a `Literal` node (whitespace-normalized).
    ///
    /// # Panics
    ///
    /// If the node is not a literal.
    pub fn set_literal_text(&mut self, id: ExpansionId, text: impl Into<String>) {
        match &mut self.nodes[id.index()].kind {
            ExpansionKind::Literal { text: t } => *t = normalize_text(&text.into()),
            other => panic!("set_literal_text on {} node", other.kind_name()),
        }
        self.revision += 1;
    }

    /// Append a tag to a node. Tags are NFC-normalized and trimmed.
    pub fn add_tag(&mut self, id: ExpansionId, tag: impl Into<String>) {
        let tag: String = tag.into().nfc().collect();
        self.nodes[id.index()].tags.push(tag.trim().to_string());
        self.revision += 1;
    }

    /// Set the compile-time weight of the `index`-th alternative of an
    /// `AlternativeSet` node.
    pub fn set_weight(&mut self, id: ExpansionId, index: usize, weight: f32) -> GrammarResult<()> {
        if weight < 0.0 {
            return Err(GrammarError::NegativeWeight { weight });
        }
        match &mut self.nodes[id.index()].kind {
            ExpansionKind::AlternativeSet { weights } => {
                assert!(index < weights.len(), "alternative index {index} out of bounds");
                weights[index] = Some(weight);
            }
            _ => return Err(GrammarError::WeightOutsideAlternatives),
        }
        self.revision += 1;
        Ok(())
    }
}

// ── Match scratch ───────────────────────────────────────────────────────

impl ExpansionTree {
    /// Reset all match scratch and remember the token vector of the run
    /// about to start.
    pub(crate) fn begin_match(&self, tokens: &[String]) {
        for node in &self.nodes {
            node.current_match.set(None);
            node.repetition_spans.borrow_mut().clear();
        }
        *self.last_tokens.borrow_mut() = tokens.to_vec();
    }

    pub(crate) fn stamp(&self, id: ExpansionId, span: MatchSpan) {
        self.nodes[id.index()].current_match.set(Some(span));
    }

    pub(crate) fn push_repetition_span(&self, id: ExpansionId, span: MatchSpan) {
        // Stamped while unwinding a successful parse, deepest (= last)
        // iteration first; insert at the front to keep input order.
        self.nodes[id.index()]
            .repetition_spans
            .borrow_mut()
            .insert(0, span);
    }

    pub(crate) fn clear_repetition_spans(&self, id: ExpansionId) {
        self.nodes[id.index()].repetition_spans.borrow_mut().clear();
    }

    /// The slice of the last input this node consumed, if it participated
    /// in the most recent successful match.
    pub fn current_match(&self, id: ExpansionId) -> Option<MatchSpan> {
        self.nodes[id.index()].current_match.get()
    }

    /// Per-iteration slices recorded by a `Repeat` or `KleeneStar` node in
    /// the most recent successful match.
    pub fn repetition_spans(&self, id: ExpansionId) -> Vec<MatchSpan> {
        self.nodes[id.index()].repetition_spans.borrow().clone()
    }

    /// The text a node consumed in the most recent successful match.
    pub fn matched_text(&self, id: ExpansionId) -> Option<String> {
        let span = self.current_match(id)?;
        let tokens = self.last_tokens.borrow();
        Some(tokens[span.start..span.end].join(" "))
    }
}

// ── Structural equality ─────────────────────────────────────────────────

impl PartialEq for ExpansionTree {
    /// Structural equality: kinds, tags and child structure. Match scratch,
    /// arena layout and revision are ignored.
    fn eq(&self, other: &Self) -> bool {
        fn node_eq(
            a_tree: &ExpansionTree,
            a: ExpansionId,
            b_tree: &ExpansionTree,
            b: ExpansionId,
        ) -> bool {
            if a_tree.kind(a) != b_tree.kind(b) || a_tree.tags(a) != b_tree.tags(b) {
                return false;
            }
            let ac = a_tree.children(a);
            let bc = b_tree.children(b);
            ac.len() == bc.len()
                && ac
                    .iter()
                    .zip(bc)
                    .all(|(&x, &y)| node_eq(a_tree, x, b_tree, y))
        }
        node_eq(self, self.root, other, other.root)
    }
}
