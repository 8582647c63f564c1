//! Rich diagnostic error types for the jsgf crate.
//!
//! Each stage of the pipeline defines its own error type with miette
//! `#[diagnostic]` derives, providing error codes, help text, and source
//! spans so users know exactly what went wrong and how to fix it.

use miette::{Diagnostic, SourceSpan};
use thiserror::Error;

/// Top-level error type for the jsgf crate.
///
/// Each variant wraps a stage-specific error, preserving the full diagnostic
/// chain (error codes, help text, source spans) through to the user.
#[derive(Debug, Error, Diagnostic)]
pub enum JsgfError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Grammar(#[from] GrammarError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Reference(#[from] ReferenceError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    MatcherBuild(#[from] MatcherBuildError),
}

/// Result type for jsgf operations.
pub type JsgfResult<T> = std::result::Result<T, JsgfError>;

// ---------------------------------------------------------------------------
// Parse errors
// ---------------------------------------------------------------------------

/// A malformed piece of JSGF source text.
///
/// Carries the full source and the span of the offending token so miette can
/// render the failure in context.
#[derive(Debug, Error, Diagnostic)]
#[error("parse failed in {production}: expected {expected}, found {found}")]
#[diagnostic(
    code(jsgf::parse::unexpected_token),
    help(
        "The input does not follow JSGF 1.0 syntax at this point. \
         Rule definitions look like `public <name> = expansion;`, groupings \
         use `( )` and `[ ]`, and alternatives are separated by `|`."
    )
)]
pub struct ParseError {
    /// The full source text being parsed.
    #[source_code]
    pub src: String,
    /// Location of the offending token.
    #[label("here")]
    pub at: SourceSpan,
    /// The production the parser was working on (e.g. "rule definition").
    pub production: &'static str,
    /// What the parser expected to see.
    pub expected: String,
    /// What it actually found.
    pub found: String,
}

// ---------------------------------------------------------------------------
// Grammar errors
// ---------------------------------------------------------------------------

/// Errors raised by grammar and rule management.
#[derive(Debug, Error, Diagnostic)]
pub enum GrammarError {
    #[error("a different rule named \"{name}\" already exists in the grammar")]
    #[diagnostic(
        code(jsgf::grammar::duplicate_rule),
        help(
            "Rule names must be unique within a grammar. Adding a structurally \
             identical rule twice is a no-op, but a rule with the same name and \
             a different expansion is rejected. Remove the old rule first or \
             pick another name."
        )
    )]
    DuplicateRule { name: String },

    #[error("invalid rule or grammar name: \"{name}\"")]
    #[diagnostic(
        code(jsgf::grammar::invalid_name),
        help(
            "Names must be non-empty identifiers made of letters, digits, \
             `_`, `-` and `.` (for qualified names), and must not be one of \
             the reserved words: NULL, VOID, DICTATION, import, grammar, public."
        )
    )]
    InvalidName { name: String },

    #[error("no rule named \"{name}\" in grammar \"{grammar}\"")]
    #[diagnostic(
        code(jsgf::grammar::unknown_rule),
        help("Use Grammar::rule_names() to list the rules the grammar holds.")
    )]
    UnknownRule { name: String, grammar: String },

    #[error("import \"{import}\" is not present in the grammar")]
    #[diagnostic(
        code(jsgf::grammar::import_not_found),
        help(
            "remove_import removes by value: the import must compare equal to \
             one previously added with add_import."
        )
    )]
    ImportNotFound { import: String },

    #[error("invalid import declaration: \"{name}\"")]
    #[diagnostic(
        code(jsgf::grammar::invalid_import),
        help(
            "Imports name a fully-qualified rule like `com.example.commands.open` \
             or a wildcard form ending in `.*`."
        )
    )]
    InvalidImport { name: String },

    #[error("alternative weights are incomplete: {weighted} of {total} alternatives weighted")]
    #[diagnostic(
        code(jsgf::grammar::partial_weights),
        help(
            "When any alternative in a set carries a weight, every alternative \
             must. Assign the missing weights or clear them all."
        )
    )]
    PartialWeights { weighted: usize, total: usize },

    #[error("negative alternative weight: {weight}")]
    #[diagnostic(
        code(jsgf::grammar::negative_weight),
        help("JSGF weights are non-negative decimal numbers.")
    )]
    NegativeWeight { weight: f32 },

    #[error("weights can only be attached to an AlternativeSet node")]
    #[diagnostic(
        code(jsgf::grammar::weight_target),
        help("Call set_weight on the alternative-set node itself, with the index of the child alternative.")
    )]
    WeightOutsideAlternatives,

    #[error("invalid JSGF header version: \"{version}\"")]
    #[diagnostic(
        code(jsgf::grammar::invalid_version),
        help("The version takes the form `V<major>.<minor>`, e.g. `V1.0`.")
    )]
    InvalidVersion { version: String },

    #[error("rule \"{name}\" contains no dictation expansion")]
    #[diagnostic(
        code(jsgf::grammar::expected_dictation),
        help(
            "SequenceRule only applies to rules whose expansion contains at \
             least one <DICTATION> placeholder. Plain rules go into the \
             grammar unchanged."
        )
    )]
    ExpectedDictation { name: String },

    #[error("dictation expansion produced more than {limit} variants")]
    #[diagnostic(
        code(jsgf::grammar::dictation_variants),
        help(
            "Each optional or alternative wrapping dictation doubles or \
             multiplies the number of expanded variants. Restructure the rule \
             so fewer branching constructs contain <DICTATION>."
        )
    )]
    TooManyDictationVariants { limit: usize },

    #[error("cannot split the expansion at dictation boundaries: {detail}")]
    #[diagnostic(
        code(jsgf::grammar::unsplittable_dictation),
        help(
            "A repetition may contain dictation only if its body is dictation \
             alone; mixing literals and <DICTATION> inside `*` or `+` has no \
             incremental decomposition."
        )
    )]
    UnsplittableDictation { detail: String },

    #[error("grammar \"{grammar}\" has no public rules")]
    #[diagnostic(
        code(jsgf::grammar::no_public_rules),
        help(
            "A root grammar folds all public rules into a generated root \
             alternation; add at least one public rule first."
        )
    )]
    NoPublicRules { grammar: String },

    #[error("failed to write compiled grammar to {path}")]
    #[diagnostic(
        code(jsgf::grammar::io),
        help(
            "Check that the target directory exists, has correct permissions, \
             and that the disk is not full."
        )
    )]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Result type for grammar management operations.
pub type GrammarResult<T> = std::result::Result<T, GrammarError>;

// ---------------------------------------------------------------------------
// Reference errors
// ---------------------------------------------------------------------------

/// A rule reference that could not be bound to a rule.
#[derive(Debug, Error, Diagnostic)]
pub enum ReferenceError {
    #[error("rule reference <{name}> in \"{referencing}\" cannot be resolved")]
    #[diagnostic(
        code(jsgf::reference::unresolved),
        help(
            "The referenced rule is not defined in the grammar and no \
             registered import provides it. Define the rule, or match through \
             a grammar that contains it."
        )
    )]
    Unresolved { name: String, referencing: String },
}

// ---------------------------------------------------------------------------
// Matcher build errors
// ---------------------------------------------------------------------------

/// Errors raised while compiling an expansion into its matcher element.
#[derive(Debug, Error, Diagnostic)]
pub enum MatcherBuildError {
    #[error("rule \"{name}\" is directly left-recursive")]
    #[diagnostic(
        code(jsgf::matcher::left_recursion),
        help(
            "A rule that can re-enter itself before consuming any token never \
             terminates. Rewrite the rule so the self-reference follows at \
             least one literal, or use a repetition instead."
        )
    )]
    LeftRecursion { name: String },
}
