//! Grammars: ordered, name-unique sets of rules plus header metadata and
//! imports.
//!
//! A grammar is the unit the external decoder consumes: it compiles to a
//! complete JSGF file and resolves the rule references of its own rules
//! during matching. Imports are carried and compiled; a reference that
//! neither the grammar nor an import can satisfy surfaces as a
//! [`ReferenceError`](crate::error::ReferenceError) at match time.

use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{GrammarError, GrammarResult, JsgfResult};
use crate::expansion::{normalize_text, ExpansionTree};
use crate::matcher::{self, names_match, MatchMode, RuleResolver};
use crate::rule::{is_valid_rule_name, Rule};

fn version_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^V\d+\.\d+$").expect("version pattern is valid"))
}

fn segment_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[\pL\pN_][\pL\pN_\-]*$").expect("segment pattern is valid"))
}

/// An import declaration: a fully-qualified rule name, or a wildcard form
/// ending in `.*` that pulls in every public rule of a grammar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Import {
    name: String,
}

impl Import {
    /// Create an import from its qualified name, e.g.
    /// `com.example.numbers.digit` or `com.example.numbers.*`.
    pub fn new(name: impl Into<String>) -> GrammarResult<Self> {
        let name = normalize_text(&name.into());
        let body = name.strip_suffix(".*").unwrap_or(&name);
        let segments: Vec<&str> = body.split('.').collect();
        let qualified = if name.ends_with(".*") {
            !segments.is_empty()
        } else {
            segments.len() >= 2
        };
        if !qualified || segments.iter().any(|s| !segment_regex().is_match(s)) {
            return Err(GrammarError::InvalidImport { name });
        }
        Ok(Self { name })
    }

    /// The full qualified name as written.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether this is a wildcard import (`grammar.*`).
    pub fn is_wildcard(&self) -> bool {
        self.name.ends_with(".*")
    }

    /// The simple rule name for a non-wildcard import.
    pub fn rule_name(&self) -> Option<&str> {
        if self.is_wildcard() {
            None
        } else {
            self.name.rsplit('.').next()
        }
    }

    /// The grammar part of the qualified name.
    pub fn grammar_name(&self) -> &str {
        self.name
            .strip_suffix(".*")
            .or_else(|| self.name.rsplit_once('.').map(|(g, _)| g))
            .unwrap_or(&self.name)
    }

    /// The `import <...>;` declaration line.
    pub fn compile(&self) -> String {
        format!("import <{}>;", self.name)
    }
}

impl std::fmt::Display for Import {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// A JSGF grammar: header, name, imports and an ordered rule set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Grammar {
    name: String,
    jsgf_version: String,
    charset: String,
    language: String,
    imports: Vec<Import>,
    rules: Vec<Rule>,
    case_sensitive: bool,
}

impl Grammar {
    /// Create an empty grammar with default header fields
    /// (`V1.0`, `UTF-8`, `en`).
    pub fn new(name: impl Into<String>) -> GrammarResult<Self> {
        let name = normalize_text(&name.into());
        if !is_valid_rule_name(&name) {
            return Err(GrammarError::InvalidName { name });
        }
        Ok(Self {
            name,
            jsgf_version: "V1.0".to_string(),
            charset: "UTF-8".to_string(),
            language: "en".to_string(),
            imports: Vec::new(),
            rules: Vec::new(),
            case_sensitive: false,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn jsgf_version(&self) -> &str {
        &self.jsgf_version
    }

    pub fn charset(&self) -> &str {
        &self.charset
    }

    pub fn language(&self) -> &str {
        &self.language
    }

    /// Set the header version; must take the form `V<major>.<minor>`.
    pub fn set_jsgf_version(&mut self, version: impl Into<String>) -> GrammarResult<()> {
        let version = version.into();
        if !version_regex().is_match(&version) {
            return Err(GrammarError::InvalidVersion { version });
        }
        self.jsgf_version = version;
        Ok(())
    }

    pub fn set_charset(&mut self, charset: impl Into<String>) {
        self.charset = charset.into();
    }

    pub fn set_language(&mut self, language: impl Into<String>) {
        self.language = language.into();
    }

    /// The grammar-wide case policy; rules without their own flag inherit
    /// it.
    pub fn case_sensitive(&self) -> bool {
        self.case_sensitive
    }

    pub fn set_case_sensitive(&mut self, case_sensitive: bool) {
        self.case_sensitive = case_sensitive;
    }

    // ── Rules ───────────────────────────────────────────────────────────

    /// The rules in declaration order.
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn rule_names(&self) -> Vec<&str> {
        self.rules.iter().map(|r| r.name()).collect()
    }

    /// Add a rule. Adding a structurally identical duplicate is a silent
    /// no-op; a different rule under an existing name is rejected.
    pub fn add_rule(&mut self, rule: Rule) -> GrammarResult<()> {
        if let Some(existing) = self.rules.iter().find(|r| r.name() == rule.name()) {
            if *existing == rule {
                return Ok(());
            }
            return Err(GrammarError::DuplicateRule {
                name: rule.name().to_string(),
            });
        }
        tracing::debug!(grammar = %self.name, rule = rule.name(), "adding rule");
        self.rules.push(rule);
        Ok(())
    }

    /// Remove and return the rule with the given name.
    pub fn remove_rule(&mut self, name: &str) -> GrammarResult<Rule> {
        match self.rules.iter().position(|r| r.name() == name) {
            Some(index) => Ok(self.rules.remove(index)),
            None => Err(GrammarError::UnknownRule {
                name: name.to_string(),
                grammar: self.name.clone(),
            }),
        }
    }

    /// The rule with exactly this name.
    pub fn get_rule(&self, name: &str) -> Option<&Rule> {
        self.rules.iter().find(|r| r.name() == name)
    }

    pub fn get_rule_mut(&mut self, name: &str) -> Option<&mut Rule> {
        self.rules.iter_mut().find(|r| r.name() == name)
    }

    /// All rules the name binds to, accepting both simple and
    /// fully-qualified forms.
    pub fn get_rules_by_name(&self, name: &str) -> Vec<&Rule> {
        self.rules
            .iter()
            .filter(|r| names_match(r.name(), name))
            .collect()
    }

    // ── Imports ─────────────────────────────────────────────────────────

    pub fn imports(&self) -> &[Import] {
        &self.imports
    }

    pub fn import_names(&self) -> Vec<&str> {
        self.imports.iter().map(|i| i.name()).collect()
    }

    /// Add an import; adding the same import twice is a no-op.
    pub fn add_import(&mut self, import: Import) {
        if !self.imports.contains(&import) {
            self.imports.push(import);
        }
    }

    /// Remove an import previously added. Removal is by value: the
    /// argument must compare equal to a held [`Import`].
    pub fn remove_import(&mut self, import: &Import) -> GrammarResult<()> {
        match self.imports.iter().position(|i| i == import) {
            Some(index) => {
                self.imports.remove(index);
                Ok(())
            }
            None => Err(GrammarError::ImportNotFound {
                import: import.name().to_string(),
            }),
        }
    }

    // ── Matching ────────────────────────────────────────────────────────

    /// All public, active rules that `speech` matches in full.
    pub fn find_matching_rules(&self, speech: &str) -> JsgfResult<Vec<&Rule>> {
        let mut matching = Vec::new();
        for rule in self.rules.iter().filter(|r| r.is_public() && r.is_active()) {
            if matcher::run_match(rule, self, speech, MatchMode::Full)?.is_some() {
                matching.push(rule);
            }
        }
        Ok(matching)
    }

    // ── Compilation ─────────────────────────────────────────────────────

    /// Compile the whole grammar to JSGF text.
    pub fn compile(&self) -> JsgfResult<String> {
        let mut lines = Vec::with_capacity(self.rules.len() + self.imports.len() + 2);
        lines.push(format!(
            "#JSGF {} {} {};",
            self.jsgf_version, self.charset, self.language
        ));
        lines.push(format!("grammar {};", self.name));
        for import in &self.imports {
            lines.push(import.compile());
        }
        for rule in self.rules.iter().filter(|r| r.is_active()) {
            lines.push(rule.compile()?);
        }
        Ok(lines.join("\n") + "\n")
    }

    /// Compile with every public rule folded into a single generated
    /// `root` alternation, for decoders that accept only one public rule.
    pub fn compile_as_root_grammar(&self) -> JsgfResult<String> {
        if self.get_rule("root").is_some() {
            return Err(GrammarError::DuplicateRule {
                name: "root".to_string(),
            }
            .into());
        }
        let public: Vec<&Rule> = self
            .rules
            .iter()
            .filter(|r| r.is_public() && r.is_active())
            .collect();
        if public.is_empty() {
            return Err(GrammarError::NoPublicRules {
                grammar: self.name.clone(),
            }
            .into());
        }

        let alternatives = ExpansionTree::alternative_set(public.iter().map(|r| r.ref_to()));
        let root = Rule::public("root", alternatives)?;

        let mut folded = self.clone();
        for rule in &mut folded.rules {
            rule.set_public(false);
        }
        folded.rules.insert(0, root);
        folded.compile()
    }

    /// Compile and write the grammar to a file.
    pub fn compile_to_file(&self, path: impl AsRef<Path>) -> JsgfResult<()> {
        let path = path.as_ref();
        let text = self.compile()?;
        std::fs::write(path, text).map_err(|source| GrammarError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Ok(())
    }
}

impl RuleResolver for Grammar {
    fn resolve_rule(&self, name: &str) -> Option<&Rule> {
        self.rules.iter().find(|r| names_match(r.name(), name))
    }

    fn default_case_sensitive(&self) -> bool {
        self.case_sensitive
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expansion::ExpansionTree;

    fn greeting_grammar() -> Grammar {
        let mut g = Grammar::new("greetings").unwrap();
        g.add_rule(Rule::public("hello", ExpansionTree::literal("hello world")).unwrap())
            .unwrap();
        g
    }

    #[test]
    fn compile_produces_a_complete_file() {
        let g = greeting_grammar();
        assert_eq!(
            g.compile().unwrap(),
            "#JSGF V1.0 UTF-8 en;\ngrammar greetings;\npublic <hello> = hello world;\n"
        );
    }

    #[test]
    fn find_matching_rules_returns_matching_public_rules() {
        let g = greeting_grammar();
        let matched = g.find_matching_rules("hello world").unwrap();
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].name(), "hello");
        assert!(g.find_matching_rules("goodbye").unwrap().is_empty());
    }

    #[test]
    fn private_rules_do_not_match_directly() {
        let mut g = Grammar::new("g").unwrap();
        g.add_rule(Rule::private("aside", ExpansionTree::literal("psst")).unwrap())
            .unwrap();
        assert!(g.find_matching_rules("psst").unwrap().is_empty());
    }

    #[test]
    fn duplicate_identical_rule_is_a_silent_noop() {
        let mut g = greeting_grammar();
        g.add_rule(Rule::public("hello", ExpansionTree::literal("hello world")).unwrap())
            .unwrap();
        assert_eq!(g.rules().len(), 1);
    }

    #[test]
    fn duplicate_different_rule_is_rejected() {
        let mut g = greeting_grammar();
        let err = g
            .add_rule(Rule::public("hello", ExpansionTree::literal("other")).unwrap())
            .unwrap_err();
        assert!(matches!(err, GrammarError::DuplicateRule { name } if name == "hello"));
    }

    #[test]
    fn remove_rule_and_unknown_rule_error() {
        let mut g = greeting_grammar();
        let removed = g.remove_rule("hello").unwrap();
        assert_eq!(removed.name(), "hello");
        assert!(matches!(
            g.remove_rule("hello"),
            Err(GrammarError::UnknownRule { .. })
        ));
    }

    #[test]
    fn references_resolve_across_the_grammar() {
        let mut g = Grammar::new("commands").unwrap();
        g.add_rule(
            Rule::private(
                "thing",
                ExpansionTree::alternative_set(vec![
                    ExpansionTree::literal("door"),
                    ExpansionTree::literal("window"),
                ]),
            )
            .unwrap(),
        )
        .unwrap();
        g.add_rule(
            Rule::public(
                "open",
                ExpansionTree::sequence(vec![
                    ExpansionTree::literal("open the"),
                    ExpansionTree::named_rule_ref("thing"),
                ]),
            )
            .unwrap(),
        )
        .unwrap();

        let matched = g.find_matching_rules("open the window").unwrap();
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].name(), "open");
    }

    #[test]
    fn qualified_and_simple_lookup() {
        let mut g = Grammar::new("g").unwrap();
        g.add_rule(Rule::public("com.example.greet", ExpansionTree::literal("hi")).unwrap())
            .unwrap();
        assert_eq!(g.get_rules_by_name("greet").len(), 1);
        assert_eq!(g.get_rules_by_name("com.example.greet").len(), 1);
        assert!(g.get_rule("greet").is_none());
    }

    #[test]
    fn case_policy_cascades_from_grammar_to_rules() {
        let mut g = Grammar::new("g").unwrap();
        g.add_rule(Rule::public("r", ExpansionTree::literal("Hello")).unwrap())
            .unwrap();
        assert_eq!(g.find_matching_rules("hello").unwrap().len(), 1);

        g.set_case_sensitive(true);
        assert!(g.find_matching_rules("hello").unwrap().is_empty());
        assert_eq!(g.find_matching_rules("Hello").unwrap().len(), 1);

        // A rule's own flag overrides the grammar default.
        g.get_rule_mut("r").unwrap().set_case_sensitive(Some(false));
        assert_eq!(g.find_matching_rules("hello").unwrap().len(), 1);
    }

    #[test]
    fn imports_are_typed_and_compiled() {
        let mut g = Grammar::new("g").unwrap();
        let import = Import::new("com.example.numbers.digit").unwrap();
        g.add_import(import.clone());
        g.add_import(import.clone());
        assert_eq!(g.import_names(), ["com.example.numbers.digit"]);

        g.add_rule(Rule::public("r", ExpansionTree::literal("x")).unwrap())
            .unwrap();
        let text = g.compile().unwrap();
        assert!(text.contains("import <com.example.numbers.digit>;\n"));

        g.remove_import(&import).unwrap();
        assert!(matches!(
            g.remove_import(&import),
            Err(GrammarError::ImportNotFound { .. })
        ));
    }

    #[test]
    fn invalid_imports_are_rejected() {
        assert!(Import::new("unqualified").is_err());
        assert!(Import::new("has space.rule").is_err());
        assert!(Import::new("com.example.*").is_ok());
        assert!(Import::new("com.example.rule").is_ok());
    }

    #[test]
    fn wildcard_import_accessors() {
        let w = Import::new("com.example.numbers.*").unwrap();
        assert!(w.is_wildcard());
        assert_eq!(w.rule_name(), None);
        assert_eq!(w.grammar_name(), "com.example.numbers");

        let i = Import::new("com.example.numbers.digit").unwrap();
        assert_eq!(i.rule_name(), Some("digit"));
        assert_eq!(i.grammar_name(), "com.example.numbers");
    }

    #[test]
    fn disabled_rules_are_skipped_everywhere() {
        let mut g = greeting_grammar();
        g.get_rule_mut("hello").unwrap().set_active(false);
        assert!(g.find_matching_rules("hello world").unwrap().is_empty());
        assert!(!g.compile().unwrap().contains("<hello>"));
    }

    #[test]
    fn root_grammar_folds_public_rules() {
        let mut g = Grammar::new("g").unwrap();
        g.add_rule(Rule::public("a", ExpansionTree::literal("alpha")).unwrap())
            .unwrap();
        g.add_rule(Rule::public("b", ExpansionTree::literal("beta")).unwrap())
            .unwrap();
        let text = g.compile_as_root_grammar().unwrap();
        assert!(text.contains("public <root> = <a> | <b>;"));
        assert!(text.contains("\n<a> = alpha;"));
        assert!(text.contains("\n<b> = beta;"));
    }

    #[test]
    fn root_grammar_requires_public_rules() {
        let mut g = Grammar::new("g").unwrap();
        g.add_rule(Rule::private("a", ExpansionTree::literal("alpha")).unwrap())
            .unwrap();
        assert!(g.compile_as_root_grammar().is_err());
    }

    #[test]
    fn invalid_version_is_rejected() {
        let mut g = Grammar::new("g").unwrap();
        assert!(g.set_jsgf_version("V2.0").is_ok());
        assert!(matches!(
            g.set_jsgf_version("1.0"),
            Err(GrammarError::InvalidVersion { .. })
        ));
    }

    #[test]
    fn compile_to_file_writes_the_compiled_text() {
        let g = greeting_grammar();
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("greetings.gram");
        g.compile_to_file(&path).unwrap();
        let written = std::fs::read_to_string(&path).unwrap();
        assert_eq!(written, g.compile().unwrap());
    }
}
