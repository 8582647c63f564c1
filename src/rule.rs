//! Rules: a name, a visibility, a case policy and an owned expansion.
//!
//! A rule caches two derived artifacts — its compiled JSGF text and its
//! matcher element — keyed on the expansion's revision token, so any
//! structural mutation through the tree API invalidates both without
//! bookkeeping at the call sites.

use std::cell::RefCell;
use std::collections::BTreeSet;
use std::rc::Rc;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::compile::compile_expansion;
use crate::error::{GrammarError, GrammarResult, JsgfResult, MatcherBuildError};
use crate::expansion::{normalize_text, ExpansionId, ExpansionTree};
use crate::matcher::{self, MatchMode, MatcherElement, NoRules, RuleResolver};

/// Words that cannot be used as rule or grammar names.
pub(crate) const RESERVED_NAMES: &[&str] =
    &["NULL", "VOID", "DICTATION", "import", "grammar", "public"];

fn name_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[\pL\pN_][\pL\pN_\-.]*$").expect("name pattern is valid")
    })
}

/// Whether `name` is a legal (possibly dotted) rule or grammar name.
pub(crate) fn is_valid_rule_name(name: &str) -> bool {
    !RESERVED_NAMES.contains(&name) && name_regex().is_match(name)
}

/// A named rule binding an expansion, with visibility and case policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    name: String,
    visible: bool,
    expansion: ExpansionTree,
    /// `None` falls back to the owning grammar's policy (or insensitive
    /// for standalone rules).
    case_sensitive: Option<bool>,
    active: bool,
    #[serde(skip)]
    compiled: RefCell<Option<(u64, String)>>,
    #[serde(skip)]
    element: RefCell<Option<(u64, bool, Rc<MatcherElement>)>>,
}

impl Rule {
    /// Create a rule. The name must be a valid, non-reserved identifier
    /// (dots allowed for qualified names).
    pub fn new(
        name: impl Into<String>,
        visible: bool,
        expansion: ExpansionTree,
    ) -> GrammarResult<Self> {
        let name = normalize_text(&name.into());
        if !is_valid_rule_name(&name) {
            return Err(GrammarError::InvalidName { name });
        }
        Ok(Self {
            name,
            visible,
            expansion,
            case_sensitive: None,
            active: true,
            compiled: RefCell::new(None),
            element: RefCell::new(None),
        })
    }

    /// Create a public rule.
    pub fn public(name: impl Into<String>, expansion: ExpansionTree) -> GrammarResult<Self> {
        Self::new(name, true, expansion)
    }

    /// Create a private rule.
    pub fn private(name: impl Into<String>, expansion: ExpansionTree) -> GrammarResult<Self> {
        Self::new(name, false, expansion)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_public(&self) -> bool {
        self.visible
    }

    /// Change visibility. Only affects compilation output.
    pub fn set_public(&mut self, visible: bool) {
        if self.visible != visible {
            self.visible = visible;
            self.compiled.borrow_mut().take();
        }
    }

    /// Whether the rule participates in matching and compilation.
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Enable or disable the rule. Disabled rules are skipped by
    /// `Grammar::find_matching_rules` and compiled out.
    pub fn set_active(&mut self, active: bool) {
        self.active = active;
    }

    pub fn case_sensitive(&self) -> Option<bool> {
        self.case_sensitive
    }

    /// Set the rule's own case policy; `None` falls back to the grammar.
    /// The matcher element is keyed on the resolved flag, so flipping it
    /// forces a rebuild.
    pub fn set_case_sensitive(&mut self, case_sensitive: Option<bool>) {
        self.case_sensitive = case_sensitive;
    }

    pub(crate) fn effective_case_sensitive(&self, default: bool) -> bool {
        self.case_sensitive.unwrap_or(default)
    }

    /// The rule's expansion tree.
    pub fn expansion(&self) -> &ExpansionTree {
        &self.expansion
    }

    /// Mutable access to the expansion. Structural edits bump the tree's
    /// revision, invalidating the compile and matcher caches.
    pub fn expansion_mut(&mut self) -> &mut ExpansionTree {
        &mut self.expansion
    }

    /// An expansion referencing this rule, for use in other rules.
    pub fn ref_to(&self) -> ExpansionTree {
        ExpansionTree::rule_ref_named(&self.name)
    }

    /// Drop the cached matcher element so the next match rebuilds it.
    pub fn invalidate_matcher(&self) {
        self.element.borrow_mut().take();
    }

    // ── Compilation ─────────────────────────────────────────────────────

    /// Compile to a JSGF rule definition, `public <name> = body;`.
    pub fn compile(&self) -> GrammarResult<String> {
        let revision = self.expansion.revision();
        if let Some((rev, text)) = &*self.compiled.borrow() {
            if *rev == revision {
                return Ok(text.clone());
            }
        }
        let body = compile_expansion(&self.expansion, self.expansion.root())?;
        let text = if self.visible {
            format!("public <{}> = {};", self.name, body)
        } else {
            format!("<{}> = {};", self.name, body)
        };
        *self.compiled.borrow_mut() = Some((revision, text.clone()));
        Ok(text)
    }

    // ── Matching ────────────────────────────────────────────────────────

    pub(crate) fn matcher_element(
        &self,
        case_sensitive: bool,
    ) -> Result<Rc<MatcherElement>, MatcherBuildError> {
        let revision = self.expansion.revision();
        if let Some((rev, cs, element)) = &*self.element.borrow() {
            if *rev == revision && *cs == case_sensitive {
                return Ok(Rc::clone(element));
            }
        }
        tracing::debug!(rule = %self.name, revision, "rebuilding matcher element");
        let element = Rc::new(MatcherElement::build(
            &self.name,
            &self.expansion,
            case_sensitive,
        )?);
        *self.element.borrow_mut() = Some((revision, case_sensitive, Rc::clone(&element)));
        Ok(element)
    }

    /// Whether `speech` matches this rule in full.
    ///
    /// References resolve only to the rule itself; match rules that
    /// reference others through their [`Grammar`](crate::Grammar).
    pub fn matches(&self, speech: &str) -> JsgfResult<bool> {
        self.matches_with(&NoRules, speech)
    }

    /// Whether `speech` matches in full, resolving references through
    /// `resolver`.
    pub fn matches_with(&self, resolver: &dyn RuleResolver, speech: &str) -> JsgfResult<bool> {
        Ok(matcher::run_match(self, resolver, speech, MatchMode::Full)?.is_some())
    }

    /// Anchored-prefix match: the deepest tagged or rule-referencing node
    /// that participated, plus the unconsumed tail.
    ///
    /// Falls back to the root node when nothing tagged matched. Returns
    /// `None` when no prefix of `speech` matches at all.
    pub fn find_matching_part(&self, speech: &str) -> JsgfResult<Option<(ExpansionId, String)>> {
        self.find_matching_part_with(&NoRules, speech)
    }

    pub fn find_matching_part_with(
        &self,
        resolver: &dyn RuleResolver,
        speech: &str,
    ) -> JsgfResult<Option<(ExpansionId, String)>> {
        let Some(outcome) = matcher::run_match(self, resolver, speech, MatchMode::Prefix)? else {
            return Ok(None);
        };
        let tree = &self.expansion;
        let mut best: Option<(usize, ExpansionId)> = None;
        for id in tree.preorder() {
            if tree.current_match(id).is_none() {
                continue;
            }
            let interesting = !tree.tags(id).is_empty() || tree.kind(id).is_rule_ref();
            if !interesting {
                continue;
            }
            let depth = tree.depth(id);
            if best.map(|(d, _)| depth > d).unwrap_or(true) {
                best = Some((depth, id));
            }
        }
        let node = best.map(|(_, id)| id).unwrap_or_else(|| tree.root());
        Ok(Some((node, outcome.tail)))
    }

    /// The text the whole rule consumed in its most recent successful
    /// match.
    pub fn matched_text(&self) -> Option<String> {
        self.expansion.matched_text(self.expansion.root())
    }

    /// Tags of every node that participated in the most recent successful
    /// match, in pre-order.
    pub fn matched_tags(&self) -> Vec<String> {
        let tree = &self.expansion;
        let mut tags = Vec::new();
        for id in tree.preorder() {
            if tree.current_match(id).is_some() {
                tags.extend(tree.tags(id).iter().cloned());
            }
        }
        tags
    }

    /// Names of all rules this rule's expansion references.
    pub fn dependencies(&self) -> BTreeSet<String> {
        self.expansion.collect_rule_refs().into_iter().collect()
    }
}

impl PartialEq for Rule {
    /// Structural equality: name, visibility, case policy, activity and
    /// expansion. Caches and match scratch are ignored.
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.visible == other.visible
            && self.case_sensitive == other.case_sensitive
            && self.active == other.active
            && self.expansion == other.expansion
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_validation() {
        assert!(is_valid_rule_name("greet"));
        assert!(is_valid_rule_name("com.example.greet"));
        assert!(is_valid_rule_name("grüße"));
        assert!(is_valid_rule_name("rule_2-b"));
        assert!(!is_valid_rule_name(""));
        assert!(!is_valid_rule_name("NULL"));
        assert!(!is_valid_rule_name("public"));
        assert!(!is_valid_rule_name("has space"));
        assert!(!is_valid_rule_name("angle<bracket"));
    }

    #[test]
    fn invalid_names_are_rejected_at_construction() {
        let err = Rule::public("VOID", ExpansionTree::literal("x")).unwrap_err();
        assert!(matches!(err, GrammarError::InvalidName { name } if name == "VOID"));
    }

    #[test]
    fn compile_renders_visibility() {
        let public = Rule::public("hello", ExpansionTree::literal("hello world")).unwrap();
        assert_eq!(public.compile().unwrap(), "public <hello> = hello world;");
        let private = Rule::private("hello", ExpansionTree::literal("hello world")).unwrap();
        assert_eq!(private.compile().unwrap(), "<hello> = hello world;");
    }

    #[test]
    fn compile_cache_invalidates_on_mutation() {
        let mut rule = Rule::public("r", ExpansionTree::literal("old")).unwrap();
        assert_eq!(rule.compile().unwrap(), "public <r> = old;");
        let root = rule.expansion().root();
        rule.expansion_mut().set_literal_text(root, "new");
        assert_eq!(rule.compile().unwrap(), "public <r> = new;");
    }

    #[test]
    fn set_public_invalidates_compiled_text() {
        let mut rule = Rule::public("r", ExpansionTree::literal("x")).unwrap();
        assert_eq!(rule.compile().unwrap(), "public <r> = x;");
        rule.set_public(false);
        assert_eq!(rule.compile().unwrap(), "<r> = x;");
    }

    #[test]
    fn dependencies_are_collected() {
        let rule = Rule::public(
            "r",
            ExpansionTree::sequence(vec![
                ExpansionTree::named_rule_ref("a"),
                ExpansionTree::optional(ExpansionTree::named_rule_ref("b")),
                ExpansionTree::named_rule_ref("a"),
            ]),
        )
        .unwrap();
        let deps: Vec<_> = rule.dependencies().into_iter().collect();
        assert_eq!(deps, ["a", "b"]);
    }

    #[test]
    fn find_matching_part_returns_deepest_tagged_node_and_tail() {
        let rule = Rule::public(
            "r",
            ExpansionTree::sequence(vec![
                ExpansionTree::literal("turn"),
                ExpansionTree::alternative_set(vec![
                    ExpansionTree::literal("left").with_tag("L"),
                    ExpansionTree::literal("right").with_tag("R"),
                ]),
            ]),
        )
        .unwrap();
        let (node, tail) = rule
            .find_matching_part("turn left right now")
            .unwrap()
            .expect("prefix should match");
        assert_eq!(rule.expansion().tags(node), ["L"]);
        assert_eq!(tail, "right now");
    }

    #[test]
    fn find_matching_part_none_on_no_match() {
        let rule = Rule::public("r", ExpansionTree::literal("go")).unwrap();
        assert!(rule.find_matching_part("stop").unwrap().is_none());
    }

    #[test]
    fn matched_tags_collects_participating_tags_only() {
        let rule = Rule::public(
            "r",
            ExpansionTree::sequence(vec![
                ExpansionTree::optional(ExpansionTree::literal("please").with_tag("polite")),
                ExpansionTree::literal("stop").with_tag("halt"),
            ]),
        )
        .unwrap();
        assert!(rule.matches("stop").unwrap());
        assert_eq!(rule.matched_tags(), ["halt"]);
        assert!(rule.matches("please stop").unwrap());
        assert_eq!(rule.matched_tags(), ["polite", "halt"]);
    }

    #[test]
    fn matched_text_reflects_last_run() {
        let rule = Rule::public("r", ExpansionTree::literal("hello world")).unwrap();
        assert!(rule.matches("hello world").unwrap());
        assert_eq!(rule.matched_text().as_deref(), Some("hello world"));
    }

    #[test]
    fn structural_equality_ignores_caches() {
        let a = Rule::public("r", ExpansionTree::literal("x")).unwrap();
        let b = Rule::public("r", ExpansionTree::literal("x")).unwrap();
        a.compile().unwrap();
        assert_eq!(a, b);
        let c = Rule::private("r", ExpansionTree::literal("x")).unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn serde_round_trip() {
        let rule = Rule::public(
            "r",
            ExpansionTree::alternative_set(vec![
                ExpansionTree::literal("yes"),
                ExpansionTree::literal("no"),
            ]),
        )
        .unwrap();
        let json = serde_json::to_string(&rule).unwrap();
        let restored: Rule = serde_json::from_str(&json).unwrap();
        assert_eq!(rule, restored);
    }
}
