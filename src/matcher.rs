//! The match engine: compiled matcher elements and the backtracking
//! recognizer that runs them against tokenized speech.
//!
//! Each rule's expansion compiles to a [`MatcherElement`] — literal token
//! vectors folded per the rule's case policy, checked for direct left
//! recursion — cached on the rule until its tree mutates. A match run
//! resolves the transitive closure of rule references up front, then walks
//! the tree with an explicit continuation stack:
//!
//! - alternatives commit to the first child that leads to an overall
//!   successful parse, in declaration order;
//! - repetitions are greedy and retreat one iteration at a time;
//! - optionals are tried present-first;
//! - dictation consumes one or more tokens up to the earliest position at
//!   which the remainder of the pattern succeeds, or everything that is
//!   left when nothing follows it.
//!
//! On the successful parse — and only on it — every participating node is
//! stamped with the token slice it consumed, while unwinding. Nodes off
//! the successful path keep the cleared state from the start of the run.
//!
//! Re-entering a rule at the same input position fails that branch, which
//! bounds indirect recursion by input length. Worst-case behavior on
//! pathological grammars (nested unbounded repetition over ambiguous
//! alternatives) is exponential; real command grammars stay small.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use crate::error::{JsgfResult, MatcherBuildError, ReferenceError};
use crate::expansion::{ExpansionId, ExpansionKind, ExpansionTree, MatchSpan};
use crate::rule::Rule;

/// Resolves rule references during a match run.
///
/// A [`Grammar`](crate::Grammar) resolves against its own rules; matching a
/// standalone rule resolves self-references only.
pub trait RuleResolver {
    /// The rule a reference with this name binds to, if any.
    fn resolve_rule(&self, name: &str) -> Option<&Rule>;

    /// Case policy applied to rules that do not set their own flag.
    fn default_case_sensitive(&self) -> bool {
        false
    }
}

/// Resolver with no rules at all; only self-references bind.
pub(crate) struct NoRules;

impl RuleResolver for NoRules {
    fn resolve_rule(&self, _name: &str) -> Option<&Rule> {
        None
    }
}

/// Whether a reference written as `reference` binds to a rule named
/// `rule_name`, accounting for fully-qualified forms on either side.
pub(crate) fn names_match(rule_name: &str, reference: &str) -> bool {
    rule_name == reference
        || rule_name.ends_with(&format!(".{reference}"))
        || reference.ends_with(&format!(".{rule_name}"))
}

// ---------------------------------------------------------------------------
// Compiled matcher elements
// ---------------------------------------------------------------------------

/// The compiled recognizer form of one rule's expansion.
///
/// Holds the per-node data the engine needs at match time: literal token
/// vectors with the case policy already folded in. Building also rejects
/// directly left-recursive rules.
#[derive(Debug)]
pub(crate) struct MatcherElement {
    literal_tokens: Vec<Vec<String>>,
}

impl MatcherElement {
    pub(crate) fn build(
        rule_name: &str,
        tree: &ExpansionTree,
        case_sensitive: bool,
    ) -> Result<Self, MatcherBuildError> {
        if leftmost_self_reference(tree, tree.root(), rule_name) {
            return Err(MatcherBuildError::LeftRecursion {
                name: rule_name.to_string(),
            });
        }
        let mut literal_tokens = vec![Vec::new(); tree.node_count()];
        for id in tree.preorder() {
            if let ExpansionKind::Literal { text } = tree.kind(id) {
                literal_tokens[id.index()] = text
                    .split_whitespace()
                    .map(|t| {
                        if case_sensitive {
                            t.to_string()
                        } else {
                            t.to_lowercase()
                        }
                    })
                    .collect();
            }
        }
        Ok(Self { literal_tokens })
    }

    fn literal(&self, id: ExpansionId) -> &[String] {
        &self.literal_tokens[id.index()]
    }
}

/// Whether a reference back to `rule_name` is reachable at the leftmost
/// position of the subtree — i.e. before any token must be consumed.
fn leftmost_self_reference(tree: &ExpansionTree, id: ExpansionId, rule_name: &str) -> bool {
    match tree.kind(id) {
        ExpansionKind::NamedRuleRef { name } | ExpansionKind::RuleRef { name } => {
            names_match(rule_name, name)
        }
        ExpansionKind::Sequence | ExpansionKind::RequiredGrouping => {
            for &child in tree.children(id) {
                if leftmost_self_reference(tree, child, rule_name) {
                    return true;
                }
                if !can_match_empty(tree, child) {
                    break;
                }
            }
            false
        }
        ExpansionKind::AlternativeSet { .. } => tree
            .children(id)
            .iter()
            .any(|&c| leftmost_self_reference(tree, c, rule_name)),
        ExpansionKind::OptionalGrouping | ExpansionKind::KleeneStar | ExpansionKind::Repeat => {
            leftmost_self_reference(tree, tree.children(id)[0], rule_name)
        }
        _ => false,
    }
}

/// Whether the subtree can succeed without consuming any token. Rule
/// references are treated as consuming, which is what makes the leftmost
/// walk above terminate.
fn can_match_empty(tree: &ExpansionTree, id: ExpansionId) -> bool {
    match tree.kind(id) {
        ExpansionKind::Literal { text } => text.is_empty(),
        ExpansionKind::NullRef | ExpansionKind::OptionalGrouping | ExpansionKind::KleeneStar => {
            true
        }
        ExpansionKind::VoidRef
        | ExpansionKind::Dictation
        | ExpansionKind::NamedRuleRef { .. }
        | ExpansionKind::RuleRef { .. } => false,
        ExpansionKind::Repeat => can_match_empty(tree, tree.children(id)[0]),
        ExpansionKind::Sequence | ExpansionKind::RequiredGrouping => tree
            .children(id)
            .iter()
            .all(|&c| can_match_empty(tree, c)),
        ExpansionKind::AlternativeSet { .. } => tree
            .children(id)
            .iter()
            .any(|&c| can_match_empty(tree, c)),
    }
}

// ---------------------------------------------------------------------------
// Match runs
// ---------------------------------------------------------------------------

/// Whether a run must consume the whole input or may leave a tail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MatchMode {
    /// Every input token must be consumed.
    Full,
    /// Anchored at the start; trailing tokens stay with the caller.
    Prefix,
}

/// The result of a successful match run.
#[derive(Debug, Clone)]
pub(crate) struct MatchOutcome {
    /// The consumed prefix, re-joined with single spaces.
    pub(crate) matched: String,
    /// The unconsumed tail, re-joined with single spaces.
    pub(crate) tail: String,
}

#[derive(Clone)]
struct RuleHandle<'g> {
    rule: &'g Rule,
    element: Rc<MatcherElement>,
    case_sensitive: bool,
}

/// Match `speech` against `rule`, resolving references through `resolver`.
///
/// Returns `Ok(None)` on a plain non-match. Errors are reserved for
/// unresolvable references and unbuildable matcher elements.
pub(crate) fn run_match(
    rule: &Rule,
    resolver: &dyn RuleResolver,
    speech: &str,
    mode: MatchMode,
) -> JsgfResult<Option<MatchOutcome>> {
    let tokens: Vec<String> = speech.split_whitespace().map(str::to_string).collect();
    let lower: Vec<String> = tokens.iter().map(|t| t.to_lowercase()).collect();

    let (handles, alias) = collect_closure(rule, resolver)?;
    for handle in handles.values() {
        handle.rule.expansion().begin_match(&tokens);
    }
    tracing::trace!(rule = rule.name(), tokens = tokens.len(), "match run");

    let run = MatchRun {
        tokens,
        lower,
        handles,
        alias,
        active: RefCell::new(HashSet::new()),
        mode,
    };
    let root = run
        .handles
        .get(rule.name())
        .expect("root rule is in its own closure");
    let result = run.match_node(root, rule.expansion().root(), 0, &Cont::Accept);

    Ok(result.map(|consumed| MatchOutcome {
        matched: run.tokens[..consumed].join(" "),
        tail: run.tokens[consumed..].join(" "),
    }))
}

/// Resolve the transitive closure of rule references reachable from `root`
/// and build (or fetch cached) matcher elements for every rule in it.
fn collect_closure<'g>(
    root: &'g Rule,
    resolver: &'g dyn RuleResolver,
) -> JsgfResult<(HashMap<String, RuleHandle<'g>>, HashMap<String, String>)> {
    let mut rules: HashMap<String, &'g Rule> = HashMap::new();
    let mut alias: HashMap<String, String> = HashMap::new();
    let mut queue: Vec<&'g Rule> = vec![root];
    rules.insert(root.name().to_string(), root);

    while let Some(rule) = queue.pop() {
        for reference in rule.expansion().collect_rule_refs() {
            if alias.contains_key(&reference) {
                continue;
            }
            let target = if names_match(rule.name(), &reference) {
                Some(rule)
            } else if names_match(root.name(), &reference) {
                Some(root)
            } else {
                resolver.resolve_rule(&reference)
            };
            let target = target.ok_or_else(|| ReferenceError::Unresolved {
                name: reference.clone(),
                referencing: rule.name().to_string(),
            })?;
            alias.insert(reference, target.name().to_string());
            if !rules.contains_key(target.name()) {
                rules.insert(target.name().to_string(), target);
                queue.push(target);
            }
        }
    }

    let default_cs = resolver.default_case_sensitive();
    let mut handles = HashMap::new();
    for (name, rule) in rules {
        let case_sensitive = rule.effective_case_sensitive(default_cs);
        let element = rule.matcher_element(case_sensitive)?;
        handles.insert(
            name,
            RuleHandle {
                rule,
                element,
                case_sensitive,
            },
        );
    }
    Ok((handles, alias))
}

/// Defunctionalized continuation: what remains of the pattern once the
/// current node has consumed its input. Frames live on the call stack.
#[derive(Clone, Copy)]
enum Cont<'a> {
    /// End of the pattern.
    Accept,
    /// Remaining items of a concatenation.
    Seq {
        items: &'a [ExpansionId],
        ctx: &'a RuleHandle<'a>,
        next: &'a Cont<'a>,
    },
    /// Stamp `node` with `[start, here)` once the rest succeeds.
    Stamp {
        node: ExpansionId,
        ctx: &'a RuleHandle<'a>,
        start: usize,
        next: &'a Cont<'a>,
    },
    /// Leaving a repetition: stamp its overall span and reset its
    /// iteration list before the iteration frames re-record it.
    RepeatStop {
        node: ExpansionId,
        ctx: &'a RuleHandle<'a>,
        start: usize,
        next: &'a Cont<'a>,
    },
    /// One repetition iteration finished; greedily try another.
    RepeatIter {
        node: ExpansionId,
        child: ExpansionId,
        ctx: &'a RuleHandle<'a>,
        iter_start: usize,
        next: &'a Cont<'a>,
    },
}

/// Whether anything after this point in the pattern can still consume
/// input. Decides between the two dictation behaviors.
fn cont_can_consume(cont: &Cont<'_>) -> bool {
    match *cont {
        Cont::Accept => false,
        Cont::Seq { items, next, .. } => !items.is_empty() || cont_can_consume(next),
        Cont::Stamp { next, .. } | Cont::RepeatStop { next, .. } => cont_can_consume(next),
        Cont::RepeatIter { .. } => true,
    }
}


struct MatchRun<'g> {
    tokens: Vec<String>,
    lower: Vec<String>,
    handles: HashMap<String, RuleHandle<'g>>,
    alias: HashMap<String, String>,
    active: RefCell<HashSet<(String, usize)>>,
    mode: MatchMode,
}

impl<'g> MatchRun<'g> {
    fn input(&self, case_sensitive: bool) -> &[String] {
        if case_sensitive {
            &self.tokens
        } else {
            &self.lower
        }
    }

    fn lookup(&self, reference: &str) -> &RuleHandle<'g> {
        let canonical = self
            .alias
            .get(reference)
            .expect("references are resolved before the run starts");
        &self.handles[canonical]
    }

    /// Continue with the rest of the pattern from `pos`. Returns the final
    /// accepted position on overall success.
    fn resume(&self, cont: &Cont<'_>, pos: usize) -> Option<usize> {
        match *cont {
            Cont::Accept => match self.mode {
                MatchMode::Full => (pos == self.tokens.len()).then_some(pos),
                MatchMode::Prefix => Some(pos),
            },
            Cont::Seq { items, ctx, next } => match items.split_first() {
                Some((&first, rest)) => self.match_node(
                    ctx,
                    first,
                    pos,
                    &Cont::Seq {
                        items: rest,
                        ctx,
                        next,
                    },
                ),
                None => self.resume(next, pos),
            },
            Cont::Stamp {
                node,
                ctx,
                start,
                next,
            } => {
                let end = self.resume(next, pos)?;
                ctx.rule
                    .expansion()
                    .stamp(node, MatchSpan { start, end: pos });
                Some(end)
            }
            Cont::RepeatStop {
                node,
                ctx,
                start,
                next,
            } => {
                let end = self.resume(next, pos)?;
                let tree = ctx.rule.expansion();
                tree.clear_repetition_spans(node);
                tree.stamp(node, MatchSpan { start, end: pos });
                Some(end)
            }
            Cont::RepeatIter {
                node,
                child,
                ctx,
                iter_start,
                next,
            } => {
                if pos == iter_start {
                    // Zero-width iteration: stop repeating.
                    return self.resume(next, pos);
                }
                let again = Cont::RepeatIter {
                    node,
                    child,
                    ctx,
                    iter_start: pos,
                    next,
                };
                let span = MatchSpan {
                    start: iter_start,
                    end: pos,
                };
                if let Some(end) = self.match_node(ctx, child, pos, &again) {
                    ctx.rule.expansion().push_repetition_span(node, span);
                    return Some(end);
                }
                let end = self.resume(next, pos)?;
                ctx.rule.expansion().push_repetition_span(node, span);
                Some(end)
            }
        }
    }

    /// Match one node at `pos`, then the continuation. Stamps the node's
    /// slice while unwinding the overall success.
    fn match_node(
        &self,
        ctx: &RuleHandle<'_>,
        id: ExpansionId,
        pos: usize,
        cont: &Cont<'_>,
    ) -> Option<usize> {
        let tree = ctx.rule.expansion();
        match tree.kind(id) {
            ExpansionKind::Literal { .. } => {
                let lit = ctx.element.literal(id);
                let n = lit.len();
                let input = self.input(ctx.case_sensitive);
                if pos + n > input.len() || input[pos..pos + n] != *lit {
                    return None;
                }
                let end = self.resume(cont, pos + n)?;
                tree.stamp(
                    id,
                    MatchSpan {
                        start: pos,
                        end: pos + n,
                    },
                );
                Some(end)
            }

            ExpansionKind::Sequence | ExpansionKind::RequiredGrouping => {
                let children = tree.children(id);
                let stamp = Cont::Stamp {
                    node: id,
                    ctx,
                    start: pos,
                    next: cont,
                };
                match children.split_first() {
                    Some((&first, rest)) => self.match_node(
                        ctx,
                        first,
                        pos,
                        &Cont::Seq {
                            items: rest,
                            ctx,
                            next: &stamp,
                        },
                    ),
                    None => self.resume(&stamp, pos),
                }
            }

            ExpansionKind::AlternativeSet { .. } => {
                for &child in tree.children(id) {
                    let stamp = Cont::Stamp {
                        node: id,
                        ctx,
                        start: pos,
                        next: cont,
                    };
                    if let Some(end) = self.match_node(ctx, child, pos, &stamp) {
                        return Some(end);
                    }
                }
                None
            }

            ExpansionKind::OptionalGrouping => {
                let child = tree.children(id)[0];
                let stamp = Cont::Stamp {
                    node: id,
                    ctx,
                    start: pos,
                    next: cont,
                };
                if let Some(end) = self.match_node(ctx, child, pos, &stamp) {
                    return Some(end);
                }
                // Absent: participates as an empty slice.
                let end = self.resume(cont, pos)?;
                tree.stamp(id, MatchSpan { start: pos, end: pos });
                Some(end)
            }

            ExpansionKind::KleeneStar | ExpansionKind::Repeat => {
                let child = tree.children(id)[0];
                let stop = Cont::RepeatStop {
                    node: id,
                    ctx,
                    start: pos,
                    next: cont,
                };
                let iter = Cont::RepeatIter {
                    node: id,
                    child,
                    ctx,
                    iter_start: pos,
                    next: &stop,
                };
                if let Some(end) = self.match_node(ctx, child, pos, &iter) {
                    return Some(end);
                }
                if matches!(tree.kind(id), ExpansionKind::KleeneStar) {
                    let end = self.resume(cont, pos)?;
                    tree.clear_repetition_spans(id);
                    tree.stamp(id, MatchSpan { start: pos, end: pos });
                    return Some(end);
                }
                None
            }

            ExpansionKind::NamedRuleRef { name } | ExpansionKind::RuleRef { name } => {
                let target = self.lookup(name);
                let key = (target.rule.name().to_string(), pos);
                if self.active.borrow().contains(&key) {
                    // Re-entry without consuming input cannot terminate.
                    return None;
                }
                self.active.borrow_mut().insert(key.clone());
                let frame = Cont::Stamp {
                    node: id,
                    ctx,
                    start: pos,
                    next: cont,
                };
                let result =
                    self.match_node(target, target.rule.expansion().root(), pos, &frame);
                self.active.borrow_mut().remove(&key);
                result
            }

            ExpansionKind::NullRef => {
                let end = self.resume(cont, pos)?;
                tree.stamp(id, MatchSpan { start: pos, end: pos });
                Some(end)
            }

            ExpansionKind::VoidRef => None,

            ExpansionKind::Dictation => {
                let len = self.tokens.len();
                if !cont_can_consume(cont) {
                    // Nothing follows: take everything that is left.
                    if pos >= len {
                        return None;
                    }
                    let end = self.resume(cont, len)?;
                    tree.stamp(id, MatchSpan { start: pos, end: len });
                    return Some(end);
                }
                for p in (pos + 1)..=len {
                    if let Some(end) = self.resume(cont, p) {
                        tree.stamp(id, MatchSpan { start: pos, end: p });
                        return Some(end);
                    }
                }
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expansion::ExpansionTree;
    use crate::rule::Rule;

    fn rule(expansion: ExpansionTree) -> Rule {
        Rule::new("test", true, expansion).unwrap()
    }

    fn matches(r: &Rule, speech: &str) -> bool {
        run_match(r, &NoRules, speech, MatchMode::Full)
            .unwrap()
            .is_some()
    }

    #[test]
    fn literal_matches_exact_tokens() {
        let r = rule(ExpansionTree::literal("hello world"));
        assert!(matches(&r, "hello world"));
        assert!(!matches(&r, "hello"));
        assert!(!matches(&r, "hello world again"));
        assert!(!matches(&r, "helloworld"));
    }

    #[test]
    fn case_policy_is_applied() {
        let r = rule(ExpansionTree::literal("Hello"));
        assert!(matches(&r, "hello"));
        assert!(matches(&r, "HELLO"));

        let mut strict = Rule::new("test", true, ExpansionTree::literal("Hello")).unwrap();
        strict.set_case_sensitive(Some(true));
        assert!(matches(&strict, "Hello"));
        assert!(!matches(&strict, "hello"));
    }

    #[test]
    fn optional_present_and_absent() {
        let r = rule(ExpansionTree::sequence(vec![
            ExpansionTree::optional(ExpansionTree::literal("please")),
            ExpansionTree::literal("stop"),
        ]));
        assert!(matches(&r, "please stop"));
        assert!(matches(&r, "stop"));
        assert!(!matches(&r, "please"));
    }

    #[test]
    fn kleene_star_matches_zero_or_more() {
        let r = rule(ExpansionTree::kleene_star(ExpansionTree::literal("go")));
        assert!(matches(&r, ""));
        assert!(matches(&r, "go"));
        assert!(matches(&r, "go go"));
        assert!(!matches(&r, "go stop"));
    }

    #[test]
    fn repeat_requires_at_least_one() {
        let r = rule(ExpansionTree::repeat(ExpansionTree::literal("go")));
        assert!(!matches(&r, ""));
        assert!(matches(&r, "go go go"));
    }

    #[test]
    fn repeat_is_greedy_with_backtracking() {
        let r = rule(ExpansionTree::sequence(vec![
            ExpansionTree::repeat(ExpansionTree::literal("a")),
            ExpansionTree::literal("a"),
        ]));
        assert!(matches(&r, "a a a"));
        let tree = r.expansion();
        let repeat = tree.children(tree.root())[0];
        let trailing = tree.children(tree.root())[1];
        assert_eq!(
            tree.current_match(repeat),
            Some(MatchSpan { start: 0, end: 2 })
        );
        assert_eq!(
            tree.current_match(trailing),
            Some(MatchSpan { start: 2, end: 3 })
        );
        assert_eq!(
            tree.repetition_spans(repeat),
            vec![
                MatchSpan { start: 0, end: 1 },
                MatchSpan { start: 1, end: 2 },
            ]
        );
    }

    #[test]
    fn alternatives_commit_in_declaration_order() {
        let r = rule(ExpansionTree::alternative_set(vec![
            ExpansionTree::literal("a"),
            ExpansionTree::literal("a b"),
        ]));
        let out = run_match(&r, &NoRules, "a b", MatchMode::Prefix)
            .unwrap()
            .unwrap();
        // The first alternative wins under prefix matching, leaving a tail.
        assert_eq!(out.matched, "a");
        assert_eq!(out.tail, "b");
        // Full matching backtracks into the second alternative.
        assert!(matches(&r, "a b"));
    }

    #[test]
    fn null_matches_empty_void_never_matches() {
        assert!(matches(&rule(ExpansionTree::null_ref()), ""));
        let r = rule(ExpansionTree::sequence(vec![
            ExpansionTree::literal("a"),
            ExpansionTree::void_ref(),
        ]));
        assert!(!matches(&r, "a"));
        assert!(!matches(&r, "a b"));
    }

    #[test]
    fn slices_cover_participating_nodes_only() {
        let r = rule(ExpansionTree::sequence(vec![
            ExpansionTree::alternative_set(vec![
                ExpansionTree::literal("hi"),
                ExpansionTree::literal("hello"),
            ]),
            ExpansionTree::literal("there"),
        ]));
        assert!(matches(&r, "hello there"));
        let tree = r.expansion();
        let root = tree.root();
        assert_eq!(tree.current_match(root), Some(MatchSpan { start: 0, end: 2 }));

        let alt = tree.children(root)[0];
        let hi = tree.children(alt)[0];
        let hello = tree.children(alt)[1];
        assert_eq!(tree.current_match(alt), Some(MatchSpan { start: 0, end: 1 }));
        assert_eq!(tree.current_match(hi), None);
        assert_eq!(
            tree.current_match(hello),
            Some(MatchSpan { start: 0, end: 1 })
        );
        assert_eq!(tree.matched_text(hello).as_deref(), Some("hello"));

        // Sibling slices are contiguous within the parent span.
        let there = tree.children(root)[1];
        assert_eq!(
            tree.current_match(there),
            Some(MatchSpan { start: 1, end: 2 })
        );
    }

    #[test]
    fn state_resets_between_runs() {
        let r = rule(ExpansionTree::sequence(vec![
            ExpansionTree::optional(ExpansionTree::literal("please")),
            ExpansionTree::literal("stop"),
        ]));
        assert!(matches(&r, "please stop"));
        let opt = r.expansion().children(r.expansion().root())[0];
        assert_eq!(
            r.expansion().current_match(opt),
            Some(MatchSpan { start: 0, end: 1 })
        );
        assert!(!matches(&r, "halt"));
        assert_eq!(r.expansion().current_match(opt), None);
    }

    #[test]
    fn dictation_takes_everything_when_nothing_follows() {
        let r = rule(ExpansionTree::sequence(vec![
            ExpansionTree::literal("say"),
            ExpansionTree::dictation(),
        ]));
        assert!(matches(&r, "say anything at all"));
        assert!(!matches(&r, "say"));
        let tree = r.expansion();
        let dict = tree.children(tree.root())[1];
        assert_eq!(
            tree.current_match(dict),
            Some(MatchSpan { start: 1, end: 4 })
        );
    }

    #[test]
    fn dictation_stops_at_the_earliest_viable_anchor() {
        let r = rule(ExpansionTree::sequence(vec![
            ExpansionTree::literal("call"),
            ExpansionTree::dictation(),
            ExpansionTree::literal("now"),
        ]));
        assert!(matches(&r, "call john smith now"));
        let tree = r.expansion();
        let dict = tree.children(tree.root())[1];
        assert_eq!(
            tree.current_match(dict),
            Some(MatchSpan { start: 1, end: 3 })
        );
        assert_eq!(tree.matched_text(dict).as_deref(), Some("john smith"));
    }

    #[test]
    fn rule_references_resolve_and_stamp_the_referencing_node() {
        let digits = Rule::new(
            "digit",
            false,
            ExpansionTree::alternative_set(vec![
                ExpansionTree::literal("one"),
                ExpansionTree::literal("two"),
            ]),
        )
        .unwrap();
        let dial = Rule::new(
            "dial",
            true,
            ExpansionTree::sequence(vec![
                ExpansionTree::literal("dial"),
                ExpansionTree::repeat(ExpansionTree::named_rule_ref("digit")),
            ]),
        )
        .unwrap();

        struct Pair {
            digit: Rule,
        }
        impl RuleResolver for Pair {
            fn resolve_rule(&self, name: &str) -> Option<&Rule> {
                names_match(self.digit.name(), name).then_some(&self.digit)
            }
        }
        let resolver = Pair { digit: digits };

        let out = run_match(&dial, &resolver, "dial one two one", MatchMode::Full).unwrap();
        assert!(out.is_some());
        let tree = dial.expansion();
        let repeat = tree.children(tree.root())[1];
        let reference = tree.children(repeat)[0];
        // A node matched once per iteration keeps the first iteration's
        // slice: stamping happens while unwinding, outermost frame last.
        assert_eq!(
            tree.current_match(reference),
            Some(MatchSpan { start: 1, end: 2 })
        );
        assert_eq!(tree.repetition_spans(repeat).len(), 3);
    }

    #[test]
    fn unresolved_reference_is_an_error() {
        let r = rule(ExpansionTree::named_rule_ref("missing"));
        let err = run_match(&r, &NoRules, "anything", MatchMode::Full).unwrap_err();
        assert!(matches!(
            err,
            crate::error::JsgfError::Reference(ReferenceError::Unresolved { .. })
        ));
    }

    #[test]
    fn direct_left_recursion_is_rejected_at_build_time() {
        let r = rule(ExpansionTree::sequence(vec![
            ExpansionTree::named_rule_ref("test"),
            ExpansionTree::literal("x"),
        ]));
        let err = run_match(&r, &NoRules, "x x", MatchMode::Full).unwrap_err();
        assert!(matches!(
            err,
            crate::error::JsgfError::MatcherBuild(MatcherBuildError::LeftRecursion { .. })
        ));
    }

    #[test]
    fn left_recursion_behind_an_optional_is_still_direct() {
        let r = rule(ExpansionTree::sequence(vec![
            ExpansionTree::optional(ExpansionTree::literal("maybe")),
            ExpansionTree::named_rule_ref("test"),
        ]));
        assert!(run_match(&r, &NoRules, "maybe x", MatchMode::Full).is_err());
    }

    #[test]
    fn self_recursion_after_a_token_is_bounded() {
        // test = x [<test>] : right recursion, consumes one token per level.
        let r = rule(ExpansionTree::sequence(vec![
            ExpansionTree::literal("x"),
            ExpansionTree::optional(ExpansionTree::named_rule_ref("test")),
        ]));
        assert!(matches(&r, "x"));
        assert!(matches(&r, "x x x x"));
        assert!(!matches(&r, "x x y"));
    }

    #[test]
    fn empty_input_matches_only_nullable_rules() {
        assert!(matches(&rule(ExpansionTree::kleene_star(ExpansionTree::literal("a"))), ""));
        assert!(!matches(&rule(ExpansionTree::literal("a")), ""));
        assert!(!matches(&rule(ExpansionTree::dictation()), ""));
    }
}
