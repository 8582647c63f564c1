//! Compilation of expansion trees back to canonical JSGF text.
//!
//! Rendering is a pure function of the tree. Precedence runs, tightest to
//! loosest: atoms (literals, references, groupings) > `*`/`+` > sequence >
//! alternation. Where the tree nests a looser construct under a tighter
//! position (an alternative set inside a sequence, a multi-word literal
//! under a repetition) the compiler inserts the parentheses the syntax
//! requires.

use crate::error::{GrammarError, GrammarResult};
use crate::expansion::{ExpansionId, ExpansionKind, ExpansionTree};

/// Render the subtree rooted at `id` as JSGF expansion text.
pub(crate) fn compile_expansion(tree: &ExpansionTree, id: ExpansionId) -> GrammarResult<String> {
    let base = match tree.kind(id) {
        ExpansionKind::Literal { text } => text.clone(),
        ExpansionKind::Sequence => compile_concatenation(tree, id)?,
        ExpansionKind::AlternativeSet { weights } => compile_alternatives(tree, id, weights)?,
        ExpansionKind::OptionalGrouping => {
            let child = tree.children(id)[0];
            format!("[ {} ]", compile_expansion(tree, child)?)
        }
        ExpansionKind::RequiredGrouping => {
            format!("( {} )", compile_concatenation(tree, id)?)
        }
        ExpansionKind::KleeneStar => {
            let child = tree.children(id)[0];
            format!("{}*", compile_repetition_child(tree, child)?)
        }
        ExpansionKind::Repeat => {
            let child = tree.children(id)[0];
            format!("{}+", compile_repetition_child(tree, child)?)
        }
        ExpansionKind::NamedRuleRef { name } | ExpansionKind::RuleRef { name } => {
            format!("<{name}>")
        }
        ExpansionKind::NullRef => "<NULL>".to_string(),
        ExpansionKind::VoidRef => "<VOID>".to_string(),
        ExpansionKind::Dictation => "<DICTATION>".to_string(),
    };

    let mut out = base;
    for tag in tree.tags(id) {
        out.push_str(" { ");
        out.push_str(&escape_tag(tag));
        out.push_str(" }");
    }
    Ok(out)
}

/// Render children joined by spaces, parenthesizing any alternative set so
/// it does not swallow its siblings. A single child is rendered bare.
fn compile_concatenation(tree: &ExpansionTree, id: ExpansionId) -> GrammarResult<String> {
    let children = tree.children(id);
    if children.len() == 1 {
        return compile_expansion(tree, children[0]);
    }
    let mut parts = Vec::with_capacity(children.len());
    for &child in children {
        let text = compile_expansion(tree, child)?;
        if matches!(tree.kind(child), ExpansionKind::AlternativeSet { .. }) {
            parts.push(format!("( {text} )"));
        } else {
            parts.push(text);
        }
    }
    Ok(parts.join(" "))
}

fn compile_alternatives(
    tree: &ExpansionTree,
    id: ExpansionId,
    weights: &[Option<f32>],
) -> GrammarResult<String> {
    let children = tree.children(id);
    let weighted = weights.iter().filter(|w| w.is_some()).count();
    if weighted != 0 && weighted != children.len() {
        return Err(GrammarError::PartialWeights {
            weighted,
            total: children.len(),
        });
    }

    let mut parts = Vec::with_capacity(children.len());
    for (i, &child) in children.iter().enumerate() {
        let mut text = compile_expansion(tree, child)?;
        if matches!(tree.kind(child), ExpansionKind::AlternativeSet { .. }) {
            text = format!("( {text} )");
        }
        match weights[i] {
            Some(w) => parts.push(format!("/{w}/ {text}")),
            None => parts.push(text),
        }
    }
    Ok(parts.join(" | "))
}

/// Render a repetition child, parenthesizing anything the postfix `*`/`+`
/// would not bind to as a whole.
fn compile_repetition_child(tree: &ExpansionTree, child: ExpansionId) -> GrammarResult<String> {
    let text = compile_expansion(tree, child)?;
    if is_repetition_atom(tree, child) {
        Ok(text)
    } else {
        Ok(format!("( {text} )"))
    }
}

fn is_repetition_atom(tree: &ExpansionTree, id: ExpansionId) -> bool {
    match tree.kind(id) {
        ExpansionKind::Literal { text } => !text.contains(' '),
        ExpansionKind::NamedRuleRef { .. }
        | ExpansionKind::RuleRef { .. }
        | ExpansionKind::NullRef
        | ExpansionKind::VoidRef
        | ExpansionKind::Dictation
        | ExpansionKind::OptionalGrouping
        | ExpansionKind::RequiredGrouping => true,
        ExpansionKind::KleeneStar | ExpansionKind::Repeat => {
            is_repetition_atom(tree, tree.children(id)[0])
        }
        ExpansionKind::Sequence => {
            tree.children(id).len() == 1 && is_repetition_atom(tree, tree.children(id)[0])
        }
        ExpansionKind::AlternativeSet { weights } => {
            tree.children(id).len() == 1
                && weights[0].is_none()
                && is_repetition_atom(tree, tree.children(id)[0])
        }
    }
}

fn escape_tag(tag: &str) -> String {
    tag.replace('\\', "\\\\").replace('}', "\\}")
}
