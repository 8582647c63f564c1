//! Recursive descent parser: JSGF text → grammars, rules and expansions.
//!
//! Three entry points mirror the three granularities of JSGF source:
//! [`parse_grammar_string`] for a whole file, [`parse_rule_string`] for a
//! single `<name> = expansion;` definition, and [`parse_expansion_string`]
//! for a bare right-hand side.
//!
//! The parser is hand-rolled (no parser-combinator dependency) for full
//! control over error messages: every failure names the production being
//! parsed, what was expected, and points at the offending token.
//!
//! The grammar header is optional; when absent the defaults are
//! `V1.0`, `UTF-8`, `en`.

use std::sync::OnceLock;

use regex::Regex;

use crate::error::{JsgfResult, ParseError};
use crate::expansion::ExpansionTree;
use crate::grammar::{Grammar, Import};
use crate::lexer::{self, Tok, TokKind};
use crate::rule::{self, Rule};

fn header_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(V\d+\.\d+)(?:\s+(\S+))?(?:\s+(\S+))?$").expect("header pattern is valid")
    })
}

/// Parse a bare expansion (the right-hand side of a rule).
pub fn parse_expansion_string(src: &str) -> JsgfResult<ExpansionTree> {
    let mut parser = Parser::new(src)?;
    let tree = parser.parse_alternation()?;
    parser.expect_eof("expansion")?;
    Ok(tree)
}

/// Parse a single rule definition, `public <name> = expansion;`.
pub fn parse_rule_string(src: &str) -> JsgfResult<Rule> {
    let mut parser = Parser::new(src)?;
    let rule = parser.parse_rule_def()?;
    parser.expect_eof("rule definition")?;
    Ok(rule)
}

/// Parse a complete grammar file.
pub fn parse_grammar_string(src: &str) -> JsgfResult<Grammar> {
    let mut parser = Parser::new(src)?;
    parser.parse_grammar()
}

struct Parser<'s> {
    src: &'s str,
    toks: Vec<Tok>,
    pos: usize,
}

impl<'s> Parser<'s> {
    fn new(src: &'s str) -> Result<Self, ParseError> {
        Ok(Self {
            src,
            toks: lexer::lex(src)?,
            pos: 0,
        })
    }

    fn peek(&self) -> Option<&TokKind> {
        self.toks.get(self.pos).map(|t| &t.kind)
    }

    fn peek_next(&self) -> Option<&TokKind> {
        self.toks.get(self.pos + 1).map(|t| &t.kind)
    }

    fn advance(&mut self) {
        self.pos += 1;
    }

    fn err(&self, production: &'static str, expected: impl Into<String>) -> ParseError {
        let (at, found) = match self.toks.get(self.pos) {
            Some(t) => ((t.start, t.len).into(), t.kind.describe()),
            None => ((self.src.len(), 0).into(), "end of input".to_string()),
        };
        ParseError {
            src: self.src.to_string(),
            at,
            production,
            expected: expected.into(),
            found,
        }
    }

    fn expect_eof(&self, production: &'static str) -> Result<(), ParseError> {
        if self.pos < self.toks.len() {
            return Err(self.err(production, "end of input"));
        }
        Ok(())
    }

    fn expect(
        &mut self,
        production: &'static str,
        expected: &str,
        pred: impl Fn(&TokKind) -> bool,
    ) -> Result<TokKind, ParseError> {
        match self.peek() {
            Some(kind) if pred(kind) => {
                let kind = kind.clone();
                self.advance();
                Ok(kind)
            }
            _ => Err(self.err(production, expected)),
        }
    }

    fn eat_word(&mut self, word: &str) -> bool {
        if matches!(self.peek(), Some(TokKind::Word(w)) if w == word) {
            self.advance();
            true
        } else {
            false
        }
    }

    // ── Grammar file ────────────────────────────────────────────────────

    fn parse_grammar(&mut self) -> JsgfResult<Grammar> {
        let header = match self.peek() {
            Some(TokKind::Header(content)) => {
                let content = content.clone();
                let captures = header_regex().captures(&content).ok_or_else(|| {
                    self.err("grammar header", "\"#JSGF V<major>.<minor> [charset] [language];\"")
                })?;
                let version = captures[1].to_string();
                let charset = captures.get(2).map(|m| m.as_str().to_string());
                let language = captures.get(3).map(|m| m.as_str().to_string());
                self.advance();
                Some((version, charset, language))
            }
            _ => None,
        };

        if !self.eat_word("grammar") {
            return Err(self.err("grammar declaration", "the \"grammar\" keyword").into());
        }
        let name = match self.expect("grammar declaration", "a grammar name", |k| {
            matches!(k, TokKind::Word(_))
        })? {
            TokKind::Word(w) => w,
            _ => unreachable!(),
        };
        self.expect("grammar declaration", "\";\"", |k| {
            matches!(k, TokKind::Semicolon)
        })?;

        let mut grammar = Grammar::new(name)?;
        if let Some((version, charset, language)) = header {
            grammar.set_jsgf_version(version)?;
            if let Some(charset) = charset {
                grammar.set_charset(charset);
            }
            if let Some(language) = language {
                grammar.set_language(language);
            }
        }

        while matches!(self.peek(), Some(TokKind::Word(w)) if w == "import") {
            self.advance();
            let name = match self.expect("import declaration", "\"<qualified.rule>\"", |k| {
                matches!(k, TokKind::RuleName(_))
            })? {
                TokKind::RuleName(n) => n,
                _ => unreachable!(),
            };
            self.expect("import declaration", "\";\"", |k| {
                matches!(k, TokKind::Semicolon)
            })?;
            grammar.add_import(Import::new(name)?);
        }

        if self.pos >= self.toks.len() {
            return Err(self.err("grammar file", "at least one rule definition").into());
        }
        while self.pos < self.toks.len() {
            let rule = self.parse_rule_def()?;
            grammar.add_rule(rule)?;
        }
        Ok(grammar)
    }

    // ── Rule definition ─────────────────────────────────────────────────

    fn parse_rule_def(&mut self) -> JsgfResult<Rule> {
        let visible = self.eat_word("public");
        let name = match self.expect("rule definition", "\"<name>\"", |k| {
            matches!(k, TokKind::RuleName(_))
        })? {
            TokKind::RuleName(n) => n,
            _ => unreachable!(),
        };
        self.expect("rule definition", "\"=\"", |k| matches!(k, TokKind::Equals))?;
        let expansion = self.parse_alternation()?;
        self.expect("rule definition", "\";\"", |k| {
            matches!(k, TokKind::Semicolon)
        })?;
        Ok(Rule::new(name, visible, expansion)?)
    }

    // ── Expansions ──────────────────────────────────────────────────────

    fn parse_alternation(&mut self) -> Result<ExpansionTree, ParseError> {
        let mut branches: Vec<(Option<f32>, ExpansionTree)> = Vec::new();
        loop {
            let weight = match self.peek() {
                Some(&TokKind::Weight(w)) => {
                    if w < 0.0 {
                        return Err(self.err("alternatives", "a non-negative weight"));
                    }
                    self.advance();
                    Some(w)
                }
                _ => None,
            };
            let seq = self.parse_sequence()?;
            branches.push((weight, seq));
            if matches!(self.peek(), Some(TokKind::Bar)) {
                self.advance();
            } else {
                break;
            }
        }

        if branches.len() == 1 && branches[0].0.is_none() {
            return Ok(branches.pop().expect("one branch").1);
        }

        let weighted = branches.iter().filter(|(w, _)| w.is_some()).count();
        if weighted != 0 && weighted != branches.len() {
            return Err(self.err(
                "alternatives",
                "a weight on every alternative, or on none",
            ));
        }

        if weighted == 0 {
            Ok(ExpansionTree::alternative_set(
                branches.into_iter().map(|(_, t)| t),
            ))
        } else {
            let weighted_children = branches
                .into_iter()
                .map(|(w, t)| (w.expect("checked all-weighted"), t));
            ExpansionTree::alternative_set_weighted(weighted_children)
                .map_err(|_| self.err("alternatives", "a non-negative weight"))
        }
    }

    fn parse_sequence(&mut self) -> Result<ExpansionTree, ParseError> {
        let mut items = Vec::new();
        loop {
            match self.peek() {
                Some(TokKind::Word(_))
                | Some(TokKind::RuleName(_))
                | Some(TokKind::LParen)
                | Some(TokKind::LBracket) => items.push(self.parse_postfix()?),
                _ => break,
            }
        }
        match items.len() {
            0 => Err(self.err("sequence", "a word, reference or grouping")),
            1 => Ok(items.pop().expect("one item")),
            _ => Ok(ExpansionTree::sequence(items)),
        }
    }

    fn parse_postfix(&mut self) -> Result<ExpansionTree, ParseError> {
        let mut node = self.parse_atom()?;
        loop {
            match self.peek() {
                Some(TokKind::Star) => {
                    self.advance();
                    node = ExpansionTree::kleene_star(node);
                }
                Some(TokKind::Plus) => {
                    self.advance();
                    node = ExpansionTree::repeat(node);
                }
                Some(TokKind::Tag(tag)) => {
                    let tag = tag.clone();
                    self.advance();
                    node = node.with_tag(tag);
                }
                _ => break,
            }
        }
        Ok(node)
    }

    fn parse_atom(&mut self) -> Result<ExpansionTree, ParseError> {
        match self.peek() {
            Some(TokKind::Word(word)) => {
                let mut words = vec![word.clone()];
                self.advance();
                while let Some(TokKind::Word(next)) = self.peek() {
                    // A word directly followed by `*` or `+` is the operand
                    // of that operator and must stand alone.
                    if matches!(self.peek_next(), Some(TokKind::Star) | Some(TokKind::Plus)) {
                        break;
                    }
                    words.push(next.clone());
                    self.advance();
                }
                Ok(ExpansionTree::literal(words.join(" ")))
            }
            Some(TokKind::RuleName(name)) => {
                let name = name.clone();
                self.advance();
                match name.as_str() {
                    "NULL" => Ok(ExpansionTree::null_ref()),
                    "VOID" => Ok(ExpansionTree::void_ref()),
                    "DICTATION" => Ok(ExpansionTree::dictation()),
                    _ => {
                        if !rule::is_valid_rule_name(&name) {
                            return Err(self.err("rule reference", "a valid rule name"));
                        }
                        Ok(ExpansionTree::named_rule_ref(name))
                    }
                }
            }
            Some(TokKind::LParen) => {
                self.advance();
                let inner = self.parse_alternation()?;
                self.expect("grouping", "\")\"", |k| matches!(k, TokKind::RParen))?;
                Ok(inner.into_required_grouping())
            }
            Some(TokKind::LBracket) => {
                self.advance();
                let inner = self.parse_alternation()?;
                self.expect("optional grouping", "\"]\"", |k| {
                    matches!(k, TokKind::RBracket)
                })?;
                Ok(ExpansionTree::optional(inner))
            }
            _ => Err(self.err("expansion", "a word, reference or grouping")),
        }
    }
}
