//! Tokenizer for JSGF source text.
//!
//! Splits input into words, rule names, tags, weights and punctuation with
//! byte-span tracking so the parser can hand miette an exact location for
//! every failure. `//` line comments and `/* ... */` block comments are
//! stripped here; `/number/` is a weight, disambiguated by the character
//! after the first slash.

use crate::error::ParseError;

/// The characters that terminate a bare word.
const RESERVED: &[char] = &[
    '(', ')', '[', ']', '<', '>', '|', '*', '+', ';', '=', '{', '}', '/', '#',
];

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum TokKind {
    /// A bare word (literal token, keyword or grammar name part).
    Word(String),
    /// The contents of an angle-bracket reference, `<name>`.
    RuleName(String),
    /// The contents of a brace tag, unescaped and trimmed.
    Tag(String),
    /// An alternative weight, `/0.5/`.
    Weight(f32),
    /// The `#JSGF ...` self-identifying header, contents after `#JSGF`.
    Header(String),
    LParen,
    RParen,
    LBracket,
    RBracket,
    Bar,
    Star,
    Plus,
    Semicolon,
    Equals,
}

impl TokKind {
    /// Short description used in "found ..." parse errors.
    pub(crate) fn describe(&self) -> String {
        match self {
            TokKind::Word(w) => format!("word \"{w}\""),
            TokKind::RuleName(n) => format!("reference <{n}>"),
            TokKind::Tag(t) => format!("tag {{ {t} }}"),
            TokKind::Weight(w) => format!("weight /{w}/"),
            TokKind::Header(_) => "grammar header".to_string(),
            TokKind::LParen => "\"(\"".to_string(),
            TokKind::RParen => "\")\"".to_string(),
            TokKind::LBracket => "\"[\"".to_string(),
            TokKind::RBracket => "\"]\"".to_string(),
            TokKind::Bar => "\"|\"".to_string(),
            TokKind::Star => "\"*\"".to_string(),
            TokKind::Plus => "\"+\"".to_string(),
            TokKind::Semicolon => "\";\"".to_string(),
            TokKind::Equals => "\"=\"".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Tok {
    pub(crate) kind: TokKind,
    pub(crate) start: usize,
    pub(crate) len: usize,
}

struct Lexer<'s> {
    src: &'s str,
    chars: Vec<(usize, char)>,
    pos: usize,
}

impl<'s> Lexer<'s> {
    fn new(src: &'s str) -> Self {
        Self {
            src,
            chars: src.char_indices().collect(),
            pos: 0,
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).map(|&(_, c)| c)
    }

    fn peek_at(&self, ahead: usize) -> Option<char> {
        self.chars.get(self.pos + ahead).map(|&(_, c)| c)
    }

    fn offset(&self) -> usize {
        self.chars
            .get(self.pos)
            .map(|&(i, _)| i)
            .unwrap_or(self.src.len())
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek();
        if c.is_some() {
            self.pos += 1;
        }
        c
    }

    fn error(&self, at: usize, expected: &str, found: &str) -> ParseError {
        ParseError {
            src: self.src.to_string(),
            at: (at, self.offset().saturating_sub(at).max(1)).into(),
            production: "tokenizer",
            expected: expected.to_string(),
            found: found.to_string(),
        }
    }

    fn lex(mut self) -> Result<Vec<Tok>, ParseError> {
        let mut toks = Vec::new();
        while let Some(c) = self.peek() {
            let start = self.offset();
            match c {
                _ if c.is_whitespace() => {
                    self.bump();
                }
                '/' => match self.peek_at(1) {
                    Some('/') => self.skip_line_comment(),
                    Some('*') => self.skip_block_comment(start)?,
                    _ => {
                        let kind = self.lex_weight(start)?;
                        toks.push(self.tok(kind, start));
                    }
                },
                '#' => {
                    let kind = self.lex_header(start)?;
                    toks.push(self.tok(kind, start));
                }
                '<' => {
                    let kind = self.lex_rule_name(start)?;
                    toks.push(self.tok(kind, start));
                }
                '{' => {
                    let kind = self.lex_tag(start)?;
                    toks.push(self.tok(kind, start));
                }
                '(' => toks.push(self.single(TokKind::LParen)),
                ')' => toks.push(self.single(TokKind::RParen)),
                '[' => toks.push(self.single(TokKind::LBracket)),
                ']' => toks.push(self.single(TokKind::RBracket)),
                '|' => toks.push(self.single(TokKind::Bar)),
                '*' => toks.push(self.single(TokKind::Star)),
                '+' => toks.push(self.single(TokKind::Plus)),
                ';' => toks.push(self.single(TokKind::Semicolon)),
                '=' => toks.push(self.single(TokKind::Equals)),
                '>' | '}' => {
                    self.bump();
                    return Err(self.error(start, "a token", &format!("stray \"{c}\"")));
                }
                _ => {
                    let kind = self.lex_word();
                    toks.push(self.tok(kind, start));
                }
            }
        }
        Ok(toks)
    }

    fn tok(&self, kind: TokKind, start: usize) -> Tok {
        Tok {
            kind,
            start,
            len: self.offset().saturating_sub(start).max(1),
        }
    }

    fn single(&mut self, kind: TokKind) -> Tok {
        let start = self.offset();
        self.bump();
        Tok {
            kind,
            start,
            len: self.offset() - start,
        }
    }

    fn skip_line_comment(&mut self) {
        while let Some(c) = self.bump() {
            if c == '\n' {
                break;
            }
        }
    }

    fn skip_block_comment(&mut self, start: usize) -> Result<(), ParseError> {
        self.bump(); // '/'
        self.bump(); // '*'
        loop {
            match self.bump() {
                Some('*') if self.peek() == Some('/') => {
                    self.bump();
                    return Ok(());
                }
                Some(_) => {}
                None => {
                    return Err(self.error(start, "\"*/\" closing the comment", "end of input"))
                }
            }
        }
    }

    fn lex_weight(&mut self, start: usize) -> Result<TokKind, ParseError> {
        self.bump(); // '/'
        let mut text = String::new();
        loop {
            match self.peek() {
                Some('/') => {
                    self.bump();
                    break;
                }
                Some(c) if c.is_whitespace() => {
                    return Err(self.error(start, "\"/\" closing the weight", "whitespace"))
                }
                Some(c) => {
                    text.push(c);
                    self.bump();
                }
                None => return Err(self.error(start, "\"/\" closing the weight", "end of input")),
            }
        }
        let value: f32 = text.parse().map_err(|_| {
            self.error(start, "a decimal weight", &format!("\"{text}\""))
        })?;
        Ok(TokKind::Weight(value))
    }

    fn lex_header(&mut self, start: usize) -> Result<TokKind, ParseError> {
        self.bump(); // '#'
        for expected in ['J', 'S', 'G', 'F'] {
            if self.bump() != Some(expected) {
                return Err(self.error(start, "the \"#JSGF\" header", "malformed header"));
            }
        }
        let mut content = String::new();
        loop {
            match self.bump() {
                Some(';') => break,
                Some(c) => content.push(c),
                None => {
                    return Err(self.error(start, "\";\" closing the header", "end of input"))
                }
            }
        }
        Ok(TokKind::Header(content.trim().to_string()))
    }

    fn lex_rule_name(&mut self, start: usize) -> Result<TokKind, ParseError> {
        self.bump(); // '<'
        let mut name = String::new();
        loop {
            match self.bump() {
                Some('>') => break,
                Some(c) if c.is_whitespace() => {}
                Some(c) => name.push(c),
                None => return Err(self.error(start, "\">\" closing the reference", "end of input")),
            }
        }
        if name.is_empty() {
            return Err(self.error(start, "a rule name inside \"<>\"", "empty reference"));
        }
        Ok(TokKind::RuleName(name))
    }

    fn lex_tag(&mut self, start: usize) -> Result<TokKind, ParseError> {
        self.bump(); // '{'
        let mut content = String::new();
        loop {
            match self.bump() {
                Some('}') => break,
                Some('\\') => match self.bump() {
                    Some(escaped) => content.push(escaped),
                    None => {
                        return Err(self.error(start, "\"}\" closing the tag", "end of input"))
                    }
                },
                Some(c) => content.push(c),
                None => return Err(self.error(start, "\"}\" closing the tag", "end of input")),
            }
        }
        Ok(TokKind::Tag(content.trim().to_string()))
    }

    fn lex_word(&mut self) -> TokKind {
        let mut word = String::new();
        while let Some(c) = self.peek() {
            if c.is_whitespace() || RESERVED.contains(&c) {
                break;
            }
            word.push(c);
            self.bump();
        }
        TokKind::Word(word)
    }
}

/// Tokenize JSGF source text.
pub(crate) fn lex(src: &str) -> Result<Vec<Tok>, ParseError> {
    Lexer::new(src).lex()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokKind> {
        lex(src).unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn words_and_punctuation() {
        assert_eq!(
            kinds("public <greet> = hello;"),
            vec![
                TokKind::Word("public".into()),
                TokKind::RuleName("greet".into()),
                TokKind::Equals,
                TokKind::Word("hello".into()),
                TokKind::Semicolon,
            ]
        );
    }

    #[test]
    fn weights_versus_comments() {
        assert_eq!(
            kinds("/0.5/ yes // trailing\n/* block */ no"),
            vec![
                TokKind::Weight(0.5),
                TokKind::Word("yes".into()),
                TokKind::Word("no".into()),
            ]
        );
    }

    #[test]
    fn header_token() {
        assert_eq!(
            kinds("#JSGF V1.0 UTF-8 en;"),
            vec![TokKind::Header("V1.0 UTF-8 en".into())]
        );
    }

    #[test]
    fn tags_unescape() {
        assert_eq!(
            kinds("{ open\\} brace }"),
            vec![TokKind::Tag("open} brace".into())]
        );
    }

    #[test]
    fn unterminated_tag_errors() {
        assert!(lex("{ never closed").is_err());
    }

    #[test]
    fn unterminated_block_comment_errors() {
        assert!(lex("/* open").is_err());
    }

    #[test]
    fn bad_weight_errors() {
        assert!(lex("/abc/").is_err());
        assert!(lex("/0.5").is_err());
    }

    #[test]
    fn unicode_words_lex() {
        assert_eq!(
            kinds("grüß <straße>"),
            vec![
                TokKind::Word("grüß".into()),
                TokKind::RuleName("straße".into()),
            ]
        );
    }

    #[test]
    fn postfix_operators_split_words() {
        assert_eq!(
            kinds("go* now+"),
            vec![
                TokKind::Word("go".into()),
                TokKind::Star,
                TokKind::Word("now".into()),
                TokKind::Plus,
            ]
        );
    }
}
