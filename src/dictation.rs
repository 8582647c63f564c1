//! The dictation extension: incremental matching of rules that mix fixed
//! grammar parts with free speech.
//!
//! A `<DICTATION>` placeholder stands for arbitrary speech supplied by a
//! language model rather than the grammar. A decoder can only consume pure
//! JSGF, so a rule containing dictation is *split* at dictation boundaries
//! into an ordered progression of sub-rules: the fixed parts are handed to
//! the decoder one at a time, the dictation parts are matched host-side
//! against utterance fragments.
//!
//! [`SequenceRule`] drives one rule's progression. Optionals and
//! alternative sets that contain dictation have no single split, so the
//! rule first *expands* into the finite set of variants arising from each
//! present/absent or branch choice ([`expand_dictation_expansion`]); the
//! sequence rule tries all variants in parallel on each fragment and
//! prunes the ones that stop matching.
//!
//! [`DictationGrammar`] wraps a grammar: plain rules are stored as-is,
//! dictation rules become sequence rules, and only the dictation-free
//! current parts appear in the compiled output.

use serde::{Deserialize, Serialize};

use crate::error::{GrammarError, GrammarResult, JsgfResult};
use crate::expansion::{ExpansionId, ExpansionKind, ExpansionTree};
use crate::grammar::Grammar;
use crate::matcher::{self, MatchMode, NoRules, RuleResolver};
use crate::rule::Rule;

/// Ceiling on the number of variants a single rule may expand into.
pub const MAX_DICTATION_VARIANTS: usize = 32;

// ---------------------------------------------------------------------------
// Variant expansion
// ---------------------------------------------------------------------------

#[derive(Clone, Copy)]
enum VariantAction {
    /// Replace the target with its single child (optional present).
    Unwrap,
    /// Drop the target subtree (optional absent).
    Remove,
    /// Replace a kleene star with a one-or-more repeat (star present).
    ToRepeat,
    /// Replace an alternative set with one of its branches.
    ChooseChild(usize),
}

/// Enumerate the dictation-splittable variants of an expansion.
///
/// Every `OptionalGrouping`, `KleeneStar` or `AlternativeSet` whose subtree
/// contains `<DICTATION>` is resolved: optionals into present and absent,
/// stars into absent and one-or-more, alternative sets into one variant
/// per branch. Constructs that do not contain dictation are left alone.
/// Variants in which the whole expansion vanishes are dropped.
pub fn expand_dictation_expansion(tree: &ExpansionTree) -> GrammarResult<Vec<ExpansionTree>> {
    let mut done: Vec<ExpansionTree> = Vec::new();
    let mut work: Vec<ExpansionTree> = vec![tree.clone()];

    while let Some(current) = work.pop() {
        let target = current.find_first(|id| {
            matches!(
                current.kind(id),
                ExpansionKind::OptionalGrouping
                    | ExpansionKind::KleeneStar
                    | ExpansionKind::AlternativeSet { .. }
            ) && current.contains_dictation_at(id)
        });

        let Some(target) = target else {
            if !done.contains(&current) {
                done.push(current);
            }
            continue;
        };

        let actions: Vec<VariantAction> = match current.kind(target) {
            ExpansionKind::OptionalGrouping => {
                vec![VariantAction::Unwrap, VariantAction::Remove]
            }
            ExpansionKind::KleeneStar => vec![VariantAction::ToRepeat, VariantAction::Remove],
            ExpansionKind::AlternativeSet { .. } => (0..current.children(target).len())
                .map(VariantAction::ChooseChild)
                .collect(),
            _ => unreachable!("target selection only yields branching kinds"),
        };

        for action in actions {
            if let Some(variant) = rebuild(&current, current.root(), target, action) {
                work.push(variant);
            }
        }
        if done.len() + work.len() > MAX_DICTATION_VARIANTS {
            return Err(GrammarError::TooManyDictationVariants {
                limit: MAX_DICTATION_VARIANTS,
            });
        }
    }

    Ok(done)
}

/// Copy the subtree at `id`, applying `action` at `target`. Returns `None`
/// when the subtree vanishes entirely.
fn rebuild(
    tree: &ExpansionTree,
    id: ExpansionId,
    target: ExpansionId,
    action: VariantAction,
) -> Option<ExpansionTree> {
    if id == target {
        let replacement = match action {
            VariantAction::Remove => return None,
            VariantAction::Unwrap => tree.subtree(tree.children(id)[0]),
            VariantAction::ChooseChild(index) => tree.subtree(tree.children(id)[index]),
            VariantAction::ToRepeat => {
                ExpansionTree::repeat(tree.subtree(tree.children(id)[0]))
            }
        };
        return Some(with_tags_of(tree, id, replacement));
    }

    let kind = tree.kind(id).clone();
    if kind.is_leaf() {
        return Some(tree.subtree(id));
    }

    let mut kept_indices = Vec::new();
    let mut children = Vec::new();
    for (index, &child) in tree.children(id).iter().enumerate() {
        if let Some(sub) = rebuild(tree, child, target, action) {
            kept_indices.push(index);
            children.push(sub);
        }
    }
    if children.is_empty() {
        return None;
    }
    // A sequence reduced to one element is that element.
    if matches!(kind, ExpansionKind::Sequence) && children.len() == 1 {
        let only = children.pop().expect("one child");
        return Some(with_tags_of(tree, id, only));
    }

    let kind = match kind {
        ExpansionKind::AlternativeSet { weights } => ExpansionKind::AlternativeSet {
            weights: kept_indices.iter().map(|&i| weights[i]).collect(),
        },
        other => other,
    };
    Some(with_tags_of(tree, id, ExpansionTree::from_kind(kind, children)))
}

fn with_tags_of(tree: &ExpansionTree, id: ExpansionId, mut out: ExpansionTree) -> ExpansionTree {
    for tag in tree.tags(id) {
        out = out.with_tag(tag.clone());
    }
    out
}

// ---------------------------------------------------------------------------
// Splitting at dictation boundaries
// ---------------------------------------------------------------------------

enum Chunk {
    Free(ExpansionTree),
    Dictation(ExpansionTree),
}

/// Split an already-expanded tree into ordered segments, each either free
/// of dictation or dictation-only.
fn split_expansion(tree: &ExpansionTree) -> GrammarResult<Vec<(ExpansionTree, bool)>> {
    let mut chunks = Vec::new();
    collect_chunks(tree, tree.root(), &mut chunks)?;

    let mut segments: Vec<(ExpansionTree, bool)> = Vec::new();
    let mut free_run: Vec<ExpansionTree> = Vec::new();
    for chunk in chunks {
        match chunk {
            Chunk::Free(t) => free_run.push(t),
            Chunk::Dictation(t) => {
                flush_free_run(&mut free_run, &mut segments);
                segments.push((t, true));
            }
        }
    }
    flush_free_run(&mut free_run, &mut segments);
    Ok(segments)
}

fn flush_free_run(run: &mut Vec<ExpansionTree>, segments: &mut Vec<(ExpansionTree, bool)>) {
    match run.len() {
        0 => {}
        1 => segments.push((run.pop().expect("one element"), false)),
        _ => segments.push((ExpansionTree::sequence(std::mem::take(run)), false)),
    }
}

fn collect_chunks(
    tree: &ExpansionTree,
    id: ExpansionId,
    out: &mut Vec<Chunk>,
) -> GrammarResult<()> {
    if !tree.contains_dictation_at(id) {
        out.push(Chunk::Free(tree.subtree(id)));
        return Ok(());
    }
    match tree.kind(id) {
        ExpansionKind::Dictation => {
            out.push(Chunk::Dictation(tree.subtree(id)));
            Ok(())
        }
        ExpansionKind::Sequence | ExpansionKind::RequiredGrouping => {
            for &child in tree.children(id) {
                collect_chunks(tree, child, out)?;
            }
            Ok(())
        }
        ExpansionKind::KleeneStar | ExpansionKind::Repeat => {
            if is_dictation_only(tree, id) {
                out.push(Chunk::Dictation(tree.subtree(id)));
                Ok(())
            } else {
                Err(GrammarError::UnsplittableDictation {
                    detail: format!(
                        "a {} mixes dictation with other expansions",
                        tree.kind(id).kind_name()
                    ),
                })
            }
        }
        other => Err(GrammarError::UnsplittableDictation {
            detail: format!("dictation nested under an unexpanded {}", other.kind_name()),
        }),
    }
}

/// Whether the subtree consists of dictation and plain structure only.
fn is_dictation_only(tree: &ExpansionTree, id: ExpansionId) -> bool {
    match tree.kind(id) {
        ExpansionKind::Dictation => true,
        ExpansionKind::Sequence
        | ExpansionKind::RequiredGrouping
        | ExpansionKind::KleeneStar
        | ExpansionKind::Repeat => tree
            .children(id)
            .iter()
            .all(|&c| is_dictation_only(tree, c)),
        _ => false,
    }
}

// ---------------------------------------------------------------------------
// SequenceRule
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct SubRule {
    rule: Rule,
    dictation_only: bool,
}

#[derive(Debug, Clone)]
struct Variant {
    subs: Vec<SubRule>,
    alive: bool,
}

/// A rule containing dictation, split into an ordered progression of
/// sub-rules matched incrementally against utterance fragments.
///
/// All expanded variants are tried in parallel on every fragment; variants
/// that stop matching are pruned until [`restart_dictation_context`]
/// revives them.
///
/// [`restart_dictation_context`]: SequenceRule::restart_dictation_context
#[derive(Debug, Clone)]
pub struct SequenceRule {
    name: String,
    visible: bool,
    original: ExpansionTree,
    variants: Vec<Variant>,
    current: usize,
    refuse: bool,
    fragments: Vec<Option<String>>,
}

impl SequenceRule {
    /// Split a dictation-containing rule into its sequence form.
    pub fn from_rule(rule: &Rule) -> JsgfResult<Self> {
        if rule.expansion().is_dictation_free() {
            return Err(GrammarError::ExpectedDictation {
                name: rule.name().to_string(),
            }
            .into());
        }
        let mut variants = Vec::new();
        for tree in expand_dictation_expansion(rule.expansion())? {
            let mut subs = Vec::new();
            for (segment, dictation_only) in split_expansion(&tree)? {
                let mut sub = Rule::new(rule.name(), rule.is_public(), segment)?;
                sub.set_case_sensitive(rule.case_sensitive());
                subs.push(SubRule {
                    rule: sub,
                    dictation_only,
                });
            }
            if !subs.is_empty() {
                variants.push(Variant { subs, alive: true });
            }
        }
        if variants.is_empty() {
            return Err(GrammarError::UnsplittableDictation {
                detail: "expansion has no matchable variants".to_string(),
            }
            .into());
        }
        Ok(Self {
            name: rule.name().to_string(),
            visible: rule.is_public(),
            original: rule.expansion().clone(),
            variants,
            current: 0,
            refuse: false,
            fragments: Vec::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_public(&self) -> bool {
        self.visible
    }

    /// The unsplit expansion this sequence rule was built from.
    pub fn original_expansion(&self) -> &ExpansionTree {
        &self.original
    }

    /// Index of the sub-rule the next fragment is matched against.
    pub fn current_index(&self) -> usize {
        self.current
    }

    /// Whether advancing went past the last sub-rule of every live
    /// variant. While set, `matches` refuses everything.
    pub fn refuse_matches(&self) -> bool {
        self.refuse
    }

    /// Whether any live variant has a sub-rule after the current one.
    pub fn has_next(&self) -> bool {
        self.variants
            .iter()
            .any(|v| v.alive && self.current + 1 < v.subs.len())
    }

    /// Whether the current sub-rule is a dictation part (matched host-side
    /// rather than by the decoder).
    pub fn current_is_dictation_only(&self) -> bool {
        self.current_sub_rule_entry()
            .map(|s| s.dictation_only)
            .unwrap_or(false)
    }

    /// The current sub-rule of the first live variant, if any.
    pub fn current_sub_rule(&self) -> Option<&Rule> {
        self.current_sub_rule_entry().map(|s| &s.rule)
    }

    fn current_sub_rule_entry(&self) -> Option<&SubRule> {
        self.variants
            .iter()
            .find(|v| v.alive && self.current < v.subs.len())
            .map(|v| &v.subs[self.current])
    }

    /// Advance to the next sub-rule. Past the end, further matches are
    /// refused until [`restart_dictation_context`](Self::restart_dictation_context).
    pub fn set_next(&mut self) {
        if self.refuse {
            return;
        }
        self.current += 1;
        self.refuse = !self
            .variants
            .iter()
            .any(|v| v.alive && self.current < v.subs.len());
    }

    /// Match a fragment against the current sub-rule of every live
    /// variant. On success the fragment is recorded for
    /// [`entire_match`](Self::entire_match) and variants that failed are
    /// pruned; on failure all state is left untouched.
    pub fn matches(&mut self, fragment: &str) -> JsgfResult<bool> {
        self.matches_with(&NoRules, fragment)
    }

    /// Like [`matches`](Self::matches), resolving rule references through
    /// `resolver`.
    pub fn matches_with(
        &mut self,
        resolver: &dyn RuleResolver,
        fragment: &str,
    ) -> JsgfResult<bool> {
        if self.refuse {
            return Ok(false);
        }
        let mut matched_text = None;
        let mut failed = Vec::new();
        for (index, variant) in self.variants.iter().enumerate() {
            if !variant.alive || self.current >= variant.subs.len() {
                continue;
            }
            let sub = &variant.subs[self.current].rule;
            match matcher::run_match(sub, resolver, fragment, MatchMode::Full)? {
                Some(outcome) => matched_text = Some(outcome.matched),
                None => failed.push(index),
            }
        }
        let Some(text) = matched_text else {
            return Ok(false);
        };
        for index in failed {
            self.variants[index].alive = false;
        }
        if self.fragments.len() <= self.current {
            self.fragments.resize(self.current + 1, None);
        }
        self.fragments[self.current] = Some(text);
        Ok(true)
    }

    /// The fragments matched so far, joined with single spaces.
    pub fn entire_match(&self) -> Option<String> {
        let parts: Vec<&str> = self.fragments.iter().flatten().map(String::as_str).collect();
        if parts.is_empty() {
            None
        } else {
            Some(parts.join(" "))
        }
    }

    /// Reset the whole progression: index 0, all variants revived, the
    /// accumulated match cleared, refusal lifted.
    pub fn restart_dictation_context(&mut self) {
        self.current = 0;
        self.refuse = false;
        self.fragments.clear();
        for variant in &mut self.variants {
            variant.alive = true;
        }
    }

    /// Compile the current sub-rule if it is decodable JSGF; dictation
    /// parts compile to nothing.
    pub fn compile(&self) -> GrammarResult<String> {
        match self.current_sub_rule_entry() {
            Some(sub) if !sub.dictation_only => sub.rule.compile(),
            _ => Ok(String::new()),
        }
    }

    /// Expansions of the current sub-rules of all live, distinct variants
    /// that are plain JSGF.
    fn current_decodable_expansions(&self) -> Vec<ExpansionTree> {
        let mut out: Vec<ExpansionTree> = Vec::new();
        for variant in self.variants.iter().filter(|v| v.alive) {
            if self.current >= variant.subs.len() {
                continue;
            }
            let sub = &variant.subs[self.current];
            if sub.dictation_only {
                continue;
            }
            let tree = sub.rule.expansion().clone();
            if !out.contains(&tree) {
                out.push(tree);
            }
        }
        out
    }
}

// ---------------------------------------------------------------------------
// DictationGrammar
// ---------------------------------------------------------------------------

/// One entry of a [`DictationGrammar::find_matching_rules`] result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchedRule {
    /// The matched rule's name.
    pub name: String,
    /// For sequence rules, the sub-rule index the fragment matched at.
    pub sub_index: Option<usize>,
}

/// A grammar in which rules may contain `<DICTATION>`.
///
/// Plain rules live in the wrapped [`Grammar`]; dictation rules are
/// converted to [`SequenceRule`]s on add. The compiled output contains
/// only the dictation-free parts, so an external decoder sees pure JSGF.
#[derive(Debug, Clone)]
pub struct DictationGrammar {
    grammar: Grammar,
    sequence_rules: Vec<SequenceRule>,
}

impl DictationGrammar {
    /// Create an empty dictation grammar.
    pub fn new(name: impl Into<String>) -> GrammarResult<Self> {
        Ok(Self {
            grammar: Grammar::new(name)?,
            sequence_rules: Vec::new(),
        })
    }

    /// Wrap an existing grammar, splitting its dictation rules.
    pub fn from_grammar(grammar: Grammar) -> JsgfResult<Self> {
        let mut base = grammar;
        let names: Vec<String> = base.rule_names().iter().map(|n| n.to_string()).collect();
        let mut out = Self {
            grammar: {
                let mut empty = base.clone();
                for name in &names {
                    empty.remove_rule(name)?;
                }
                empty
            },
            sequence_rules: Vec::new(),
        };
        for name in &names {
            let rule = base.remove_rule(name)?;
            out.add_rule(rule)?;
        }
        Ok(out)
    }

    pub fn name(&self) -> &str {
        self.grammar.name()
    }

    /// The wrapped grammar holding the plain (dictation-free) rules.
    pub fn grammar(&self) -> &Grammar {
        &self.grammar
    }

    /// The sequence rules, in add order.
    pub fn sequence_rules(&self) -> &[SequenceRule] {
        &self.sequence_rules
    }

    pub fn sequence_rule(&self, name: &str) -> Option<&SequenceRule> {
        self.sequence_rules.iter().find(|s| s.name() == name)
    }

    pub fn sequence_rule_mut(&mut self, name: &str) -> Option<&mut SequenceRule> {
        self.sequence_rules.iter_mut().find(|s| s.name() == name)
    }

    /// Add a rule: dictation-free rules go to the wrapped grammar,
    /// dictation rules are split into a sequence rule. Re-adding an
    /// identical rule is a no-op; a different rule under an existing name
    /// is rejected.
    pub fn add_rule(&mut self, rule: Rule) -> JsgfResult<()> {
        if rule.expansion().is_dictation_free() {
            if self.sequence_rule(rule.name()).is_some() {
                return Err(GrammarError::DuplicateRule {
                    name: rule.name().to_string(),
                }
                .into());
            }
            self.grammar.add_rule(rule)?;
            return Ok(());
        }

        if self.grammar.get_rule(rule.name()).is_some() {
            return Err(GrammarError::DuplicateRule {
                name: rule.name().to_string(),
            }
            .into());
        }
        if let Some(existing) = self.sequence_rule(rule.name()) {
            if existing.is_public() == rule.is_public()
                && existing.original_expansion() == rule.expansion()
            {
                return Ok(());
            }
            return Err(GrammarError::DuplicateRule {
                name: rule.name().to_string(),
            }
            .into());
        }
        let sequence = SequenceRule::from_rule(&rule)?;
        tracing::debug!(
            grammar = self.grammar.name(),
            rule = rule.name(),
            variants = sequence.variants.len(),
            "split dictation rule"
        );
        self.sequence_rules.push(sequence);
        Ok(())
    }

    /// Remove a rule from whichever store holds it.
    pub fn remove_rule(&mut self, name: &str) -> JsgfResult<()> {
        if let Some(index) = self.sequence_rules.iter().position(|s| s.name() == name) {
            self.sequence_rules.remove(index);
            return Ok(());
        }
        self.grammar.remove_rule(name)?;
        Ok(())
    }

    /// Match `speech` against the plain rules and the current sub-rule of
    /// every sequence rule. Matched sequence rules are advanced when
    /// `advance` is set.
    pub fn find_matching_rules(
        &mut self,
        speech: &str,
        advance: bool,
    ) -> JsgfResult<Vec<MatchedRule>> {
        let mut out = Vec::new();
        for rule in self.grammar.find_matching_rules(speech)? {
            out.push(MatchedRule {
                name: rule.name().to_string(),
                sub_index: None,
            });
        }
        let grammar = &self.grammar;
        for sequence in &mut self.sequence_rules {
            if sequence.matches_with(grammar, speech)? {
                out.push(MatchedRule {
                    name: sequence.name().to_string(),
                    sub_index: Some(sequence.current_index()),
                });
                if advance {
                    sequence.set_next();
                }
            }
        }
        Ok(out)
    }

    /// Reset every sequence rule's progression.
    pub fn restart_dictation_context(&mut self) {
        for sequence in &mut self.sequence_rules {
            sequence.restart_dictation_context();
        }
    }

    /// Compile the decodable part: plain rules plus the dictation-free
    /// current sub-rules of the sequence rules.
    pub fn compile(&self) -> JsgfResult<String> {
        let mut output = self.grammar.clone();
        for sequence in &self.sequence_rules {
            let expansions = sequence.current_decodable_expansions();
            let expansion = match expansions.len() {
                0 => continue,
                1 => expansions.into_iter().next().expect("one expansion"),
                _ => ExpansionTree::alternative_set(expansions),
            };
            output.add_rule(Rule::new(sequence.name(), sequence.is_public(), expansion)?)?;
        }
        output.compile()
    }

    /// Compile the decodable part and write it to a file.
    pub fn compile_to_file(&self, path: impl AsRef<std::path::Path>) -> JsgfResult<()> {
        let text = self.compile()?;
        let path = path.as_ref();
        std::fs::write(path, text).map_err(|source| GrammarError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn greet_rule() -> Rule {
        Rule::public(
            "greet",
            ExpansionTree::sequence(vec![
                ExpansionTree::literal("hello"),
                ExpansionTree::dictation(),
            ]),
        )
        .unwrap()
    }

    #[test]
    fn expansion_without_branching_yields_one_variant() {
        let rule = greet_rule();
        let variants = expand_dictation_expansion(rule.expansion()).unwrap();
        assert_eq!(variants.len(), 1);
        assert_eq!(&variants[0], rule.expansion());
    }

    #[test]
    fn optional_dictation_expands_present_and_absent() {
        let tree = ExpansionTree::sequence(vec![
            ExpansionTree::literal("note"),
            ExpansionTree::optional(ExpansionTree::dictation()),
        ]);
        let variants = expand_dictation_expansion(&tree).unwrap();
        assert_eq!(variants.len(), 2);
        assert!(variants.contains(&ExpansionTree::sequence(vec![
            ExpansionTree::literal("note"),
            ExpansionTree::dictation(),
        ])));
        assert!(variants.contains(&ExpansionTree::literal("note")));
    }

    #[test]
    fn alternative_dictation_expands_per_branch() {
        let tree = ExpansionTree::alternative_set(vec![
            ExpansionTree::literal("stop"),
            ExpansionTree::dictation(),
        ]);
        let variants = expand_dictation_expansion(&tree).unwrap();
        assert_eq!(variants.len(), 2);
        assert!(variants.contains(&ExpansionTree::literal("stop")));
        assert!(variants.contains(&ExpansionTree::dictation()));
    }

    #[test]
    fn dictation_free_branching_is_left_alone() {
        let tree = ExpansionTree::sequence(vec![
            ExpansionTree::optional(ExpansionTree::literal("please")),
            ExpansionTree::dictation(),
        ]);
        let variants = expand_dictation_expansion(&tree).unwrap();
        assert_eq!(variants.len(), 1);
        assert_eq!(&variants[0], &tree);
    }

    #[test]
    fn variant_explosion_is_capped() {
        // Six nested optional dictations would give 2^6 = 64 variants.
        let mut children = Vec::new();
        for _ in 0..6 {
            children.push(ExpansionTree::optional(ExpansionTree::dictation()));
        }
        children.push(ExpansionTree::dictation());
        let tree = ExpansionTree::sequence(children);
        let err = expand_dictation_expansion(&tree).unwrap_err();
        assert!(matches!(err, GrammarError::TooManyDictationVariants { .. }));
    }

    #[test]
    fn mixed_repetition_is_unsplittable() {
        let rule = Rule::public(
            "bad",
            ExpansionTree::repeat(ExpansionTree::sequence(vec![
                ExpansionTree::literal("say"),
                ExpansionTree::dictation(),
            ])),
        )
        .unwrap();
        let err = SequenceRule::from_rule(&rule).unwrap_err();
        assert!(matches!(
            err,
            crate::error::JsgfError::Grammar(GrammarError::UnsplittableDictation { .. })
        ));
    }

    #[test]
    fn pure_dictation_repetition_is_a_dictation_segment() {
        let rule = Rule::public(
            "notes",
            ExpansionTree::sequence(vec![
                ExpansionTree::literal("note"),
                ExpansionTree::repeat(ExpansionTree::dictation()),
            ]),
        )
        .unwrap();
        let sequence = SequenceRule::from_rule(&rule).unwrap();
        assert!(!sequence.current_is_dictation_only());
        let mut sequence = sequence;
        sequence.set_next();
        assert!(sequence.current_is_dictation_only());
    }

    #[test]
    fn sequence_rule_requires_dictation() {
        let rule = Rule::public("plain", ExpansionTree::literal("hi")).unwrap();
        let err = SequenceRule::from_rule(&rule).unwrap_err();
        assert!(matches!(
            err,
            crate::error::JsgfError::Grammar(GrammarError::ExpectedDictation { .. })
        ));
    }

    #[test]
    fn sequence_rule_progression_and_entire_match() {
        let mut sequence = SequenceRule::from_rule(&greet_rule()).unwrap();
        assert_eq!(sequence.current_index(), 0);
        assert!(!sequence.current_is_dictation_only());

        assert!(sequence.matches("hello").unwrap());
        assert_eq!(sequence.entire_match().as_deref(), Some("hello"));

        sequence.set_next();
        assert_eq!(sequence.current_index(), 1);
        assert!(sequence.current_is_dictation_only());
        assert!(sequence.matches("world wide web").unwrap());
        assert_eq!(
            sequence.entire_match().as_deref(),
            Some("hello world wide web")
        );
    }

    #[test]
    fn split_matches_agree_with_the_unsplit_rule() {
        // Matching the fragments one by one accumulates exactly what the
        // unsplit rule records against the concatenated utterance.
        let rule = greet_rule();
        let mut sequence = SequenceRule::from_rule(&rule).unwrap();
        assert!(sequence.matches("hello").unwrap());
        sequence.set_next();
        assert!(sequence.matches("out there").unwrap());

        assert!(rule.matches("hello out there").unwrap());
        assert_eq!(
            rule.matched_text(),
            sequence.entire_match(),
        );
    }

    #[test]
    fn advancing_past_the_end_refuses_until_restart() {
        let mut sequence = SequenceRule::from_rule(&greet_rule()).unwrap();
        assert!(sequence.matches("hello").unwrap());
        sequence.set_next();
        assert!(sequence.matches("world").unwrap());
        assert!(!sequence.has_next());

        sequence.set_next();
        assert!(sequence.refuse_matches());
        assert!(!sequence.matches("hello").unwrap());

        sequence.restart_dictation_context();
        assert!(!sequence.refuse_matches());
        assert_eq!(sequence.current_index(), 0);
        assert_eq!(sequence.entire_match(), None);
        assert!(sequence.matches("hello").unwrap());
    }

    #[test]
    fn variants_are_pruned_as_fragments_arrive() {
        // "hi <DICTATION>" or "hey" — two variants with different shapes.
        let rule = Rule::public(
            "mixed",
            ExpansionTree::alternative_set(vec![
                ExpansionTree::sequence(vec![
                    ExpansionTree::literal("hi"),
                    ExpansionTree::dictation(),
                ]),
                ExpansionTree::literal("hey"),
            ]),
        )
        .unwrap();
        let mut sequence = SequenceRule::from_rule(&rule).unwrap();
        assert_eq!(sequence.variants.len(), 2);

        assert!(sequence.matches("hi").unwrap());
        let alive: Vec<bool> = sequence.variants.iter().map(|v| v.alive).collect();
        assert_eq!(alive.iter().filter(|a| **a).count(), 1);

        sequence.set_next();
        assert!(sequence.matches("there").unwrap());
        assert_eq!(sequence.entire_match().as_deref(), Some("hi there"));
    }

    #[test]
    fn dictation_grammar_routes_rules_by_content() {
        let mut dg = DictationGrammar::new("assistant").unwrap();
        dg.add_rule(Rule::public("stop", ExpansionTree::literal("stop")).unwrap())
            .unwrap();
        dg.add_rule(greet_rule()).unwrap();
        assert_eq!(dg.grammar().rule_names(), ["stop"]);
        assert_eq!(dg.sequence_rules().len(), 1);
    }

    #[test]
    fn dictation_grammar_compiles_only_decodable_parts() {
        let mut dg = DictationGrammar::new("assistant").unwrap();
        dg.add_rule(greet_rule()).unwrap();
        let text = dg.compile().unwrap();
        assert!(text.contains("public <greet> = hello;"));
        assert!(!text.contains("DICTATION"));

        // Past the fixed part, the current sub-rule is dictation-only and
        // drops out of the compiled grammar.
        dg.find_matching_rules("hello", true).unwrap();
        let text = dg.compile().unwrap();
        assert!(!text.contains("<greet>"));
    }

    #[test]
    fn dictation_grammar_incremental_scenario() {
        let mut dg = DictationGrammar::new("assistant").unwrap();
        dg.add_rule(greet_rule()).unwrap();

        let matched = dg.find_matching_rules("hello", false).unwrap();
        assert_eq!(
            matched,
            vec![MatchedRule {
                name: "greet".to_string(),
                sub_index: Some(0),
            }]
        );

        dg.sequence_rule_mut("greet").unwrap().set_next();
        let matched = dg.find_matching_rules("world", false).unwrap();
        assert_eq!(
            matched,
            vec![MatchedRule {
                name: "greet".to_string(),
                sub_index: Some(1),
            }]
        );
        assert_eq!(
            dg.sequence_rule("greet").unwrap().entire_match().as_deref(),
            Some("hello world")
        );
    }

    #[test]
    fn find_matching_rules_advances_when_asked() {
        let mut dg = DictationGrammar::new("assistant").unwrap();
        dg.add_rule(greet_rule()).unwrap();

        dg.find_matching_rules("hello", true).unwrap();
        assert_eq!(dg.sequence_rule("greet").unwrap().current_index(), 1);
    }

    #[test]
    fn duplicate_rules_across_stores_are_rejected() {
        let mut dg = DictationGrammar::new("g").unwrap();
        dg.add_rule(greet_rule()).unwrap();
        // Identical dictation rule: silent no-op.
        dg.add_rule(greet_rule()).unwrap();
        assert_eq!(dg.sequence_rules().len(), 1);
        // Same name, dictation-free: rejected.
        let err = dg
            .add_rule(Rule::public("greet", ExpansionTree::literal("hi")).unwrap())
            .unwrap_err();
        assert!(matches!(
            err,
            crate::error::JsgfError::Grammar(GrammarError::DuplicateRule { .. })
        ));
    }

    #[test]
    fn from_grammar_splits_existing_rules() {
        let mut g = Grammar::new("g").unwrap();
        g.add_rule(Rule::public("stop", ExpansionTree::literal("stop")).unwrap())
            .unwrap();
        g.add_rule(greet_rule()).unwrap();
        let dg = DictationGrammar::from_grammar(g).unwrap();
        assert_eq!(dg.grammar().rule_names(), ["stop"]);
        assert_eq!(dg.sequence_rules().len(), 1);
    }

    #[test]
    fn remove_rule_from_either_store() {
        let mut dg = DictationGrammar::new("g").unwrap();
        dg.add_rule(greet_rule()).unwrap();
        dg.add_rule(Rule::public("stop", ExpansionTree::literal("stop")).unwrap())
            .unwrap();
        dg.remove_rule("greet").unwrap();
        dg.remove_rule("stop").unwrap();
        assert!(dg.remove_rule("stop").is_err());
    }
}
