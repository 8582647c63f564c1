//! # jsgf
//!
//! A compiler, parser and speech matcher for the JSpeech Grammar Format
//! (JSGF), with a dictation extension for grammars that mix fixed command
//! phrases with free speech.
//!
//! ## Architecture
//!
//! ```text
//! JSGF text ──→ Lexer ──→ Parser ──→ Grammar / Rule / ExpansionTree
//!                                          │              │
//!                                      Compiler        Matcher
//!                                          │              │
//!                                     JSGF text    per-node match slices
//! ```
//!
//! - **Expansion trees** (`expansion`): the AST of rule right-hand sides —
//!   literals, sequences, alternatives, groupings, repetitions, rule
//!   references and the `<DICTATION>` placeholder — stored in an arena
//!   with parent back-references maintained by the mutation API.
//! - **Parser** (`parser`): hand-rolled recursive descent over JSGF 1.0
//!   with miette source-span diagnostics.
//! - **Matcher** (`matcher`): a backtracking recognizer that stamps every
//!   participating node with the token slice it consumed.
//! - **Dictation extension** (`dictation`): splits dictation-containing
//!   rules into incremental sequence rules and keeps compiled output pure
//!   JSGF for the external decoder.
//!
//! ## Usage
//!
//! ```
//! use jsgf::{ExpansionTree, Grammar, Rule};
//!
//! let mut grammar = Grammar::new("greetings").unwrap();
//! grammar
//!     .add_rule(Rule::public("hello", ExpansionTree::literal("hello world")).unwrap())
//!     .unwrap();
//!
//! assert_eq!(
//!     grammar.compile().unwrap(),
//!     "#JSGF V1.0 UTF-8 en;\ngrammar greetings;\npublic <hello> = hello world;\n"
//! );
//! let matched = grammar.find_matching_rules("hello world").unwrap();
//! assert_eq!(matched[0].name(), "hello");
//! ```

mod compile;
mod lexer;

pub mod dictation;
pub mod error;
pub mod expansion;
pub mod grammar;
pub mod matcher;
pub mod parser;
pub mod rule;

pub use dictation::{
    expand_dictation_expansion, DictationGrammar, MatchedRule, SequenceRule,
    MAX_DICTATION_VARIANTS,
};
pub use error::{
    GrammarError, GrammarResult, JsgfError, JsgfResult, MatcherBuildError, ParseError,
    ReferenceError,
};
pub use expansion::{ExpansionId, ExpansionKind, ExpansionTree, MatchSpan, WalkAction};
pub use grammar::{Grammar, Import};
pub use matcher::RuleResolver;
pub use parser::{parse_expansion_string, parse_grammar_string, parse_rule_string};
pub use rule::Rule;
