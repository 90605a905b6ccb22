//! Tag expressions used to select scenarios.
//!
//! Both syntaxes accepted by cucumber CLIs are understood:
//!
//! - boolean expressions: `@smoke and not (@wip or @slow)`
//! - the legacy form: `@smoke,@fast` (or) and `~@wip` (not)
//!
//! Precedence from loosest to tightest is `or`/`,`, `and`, `not`/`~`.

use std::collections::HashSet;

/// Parsed tag expression.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TagExpression {
    root: Expr,
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Expr {
    Tag(String),
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
}

/// Error raised for malformed tag expressions.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid tag expression at byte {offset}: {reason}")]
pub struct TagExprError {
    offset: usize,
    reason: String,
}

impl TagExprError {
    fn new(offset: usize, reason: impl Into<String>) -> Self {
        Self {
            offset,
            reason: reason.into(),
        }
    }

    /// Byte offset of the offending token.
    #[must_use]
    pub fn offset(&self) -> usize {
        self.offset
    }
}

impl TagExpression {
    /// Parse an expression.
    ///
    /// # Errors
    ///
    /// Returns [`TagExprError`] describing the first offending token.
    pub fn parse(input: &str) -> Result<Self, TagExprError> {
        let tokens = tokenize(input)?;
        let mut parser = Parser { tokens, pos: 0 };
        let root = parser.or()?;
        match parser.peek() {
            None => Ok(Self { root }),
            Some((offset, token)) => Err(TagExprError::new(
                *offset,
                format!("unexpected {}", token.describe()),
            )),
        }
    }

    /// Evaluate against a set of tags. Tags may be given with or without the
    /// leading `@`.
    pub fn matches<I, S>(&self, tags: I) -> bool
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let set: HashSet<String> = tags
            .into_iter()
            .map(|tag| normalise_tag(tag.as_ref()))
            .collect();
        self.root.eval(&set)
    }
}

/// Prefix a tag with `@` unless it already has one.
#[must_use]
pub fn normalise_tag(tag: &str) -> String {
    let tag = tag.trim();
    if tag.starts_with('@') {
        tag.to_string()
    } else {
        format!("@{tag}")
    }
}

impl Expr {
    fn eval(&self, tags: &HashSet<String>) -> bool {
        match self {
            Self::Tag(tag) => tags.contains(tag),
            Self::Not(inner) => !inner.eval(tags),
            Self::And(lhs, rhs) => lhs.eval(tags) && rhs.eval(tags),
            Self::Or(lhs, rhs) => lhs.eval(tags) || rhs.eval(tags),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Token {
    Tag(String),
    And,
    Or,
    Not,
    Open,
    Close,
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Self::Tag(tag) => format!("tag {tag}"),
            Self::And => "'and'".to_string(),
            Self::Or => "'or'".to_string(),
            Self::Not => "'not'".to_string(),
            Self::Open => "'('".to_string(),
            Self::Close => "')'".to_string(),
        }
    }
}

fn tokenize(input: &str) -> Result<Vec<(usize, Token)>, TagExprError> {
    let mut tokens = Vec::new();
    let mut chars = input.char_indices().peekable();

    while let Some((start, ch)) = chars.next() {
        let token = match ch {
            c if c.is_whitespace() => continue,
            '(' => Token::Open,
            ')' => Token::Close,
            ',' => Token::Or,
            '~' => Token::Not,
            _ => {
                let mut word = String::from(ch);
                while let Some((_, next)) = chars.peek() {
                    if next.is_whitespace() || matches!(next, '(' | ')' | ',') {
                        break;
                    }
                    word.push(*next);
                    chars.next();
                }
                word_token(start, &word)?
            }
        };
        tokens.push((start, token));
    }

    Ok(tokens)
}

fn word_token(start: usize, word: &str) -> Result<Token, TagExprError> {
    if let Some(name) = word.strip_prefix('@') {
        if name.is_empty() {
            return Err(TagExprError::new(start, "expected tag name after '@'"));
        }
        return Ok(Token::Tag(word.to_string()));
    }
    match word.to_ascii_lowercase().as_str() {
        "and" => Ok(Token::And),
        "or" => Ok(Token::Or),
        "not" => Ok(Token::Not),
        _ => Err(TagExprError::new(
            start,
            format!("unexpected identifier '{word}'"),
        )),
    }
}

struct Parser {
    tokens: Vec<(usize, Token)>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&(usize, Token)> {
        self.tokens.get(self.pos)
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek().is_some_and(|(_, token)| token == expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn end_offset(&self) -> usize {
        self.tokens.last().map_or(0, |(offset, _)| offset + 1)
    }

    fn or(&mut self) -> Result<Expr, TagExprError> {
        let mut node = self.and()?;
        while self.eat(&Token::Or) {
            let rhs = self.and()?;
            node = Expr::Or(Box::new(node), Box::new(rhs));
        }
        Ok(node)
    }

    fn and(&mut self) -> Result<Expr, TagExprError> {
        let mut node = self.not()?;
        while self.eat(&Token::And) {
            let rhs = self.not()?;
            node = Expr::And(Box::new(node), Box::new(rhs));
        }
        Ok(node)
    }

    fn not(&mut self) -> Result<Expr, TagExprError> {
        if self.eat(&Token::Not) {
            return Ok(Expr::Not(Box::new(self.not()?)));
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Expr, TagExprError> {
        let Some((offset, token)) = self.peek().cloned() else {
            return Err(TagExprError::new(self.end_offset(), "expected tag or '('"));
        };
        self.pos += 1;
        match token {
            Token::Tag(tag) => Ok(Expr::Tag(tag)),
            Token::Open => {
                let inner = self.or()?;
                if self.eat(&Token::Close) {
                    Ok(inner)
                } else {
                    Err(TagExprError::new(offset, "missing ')'"))
                }
            }
            other => Err(TagExprError::new(
                offset,
                format!("expected tag or '(' but found {}", other.describe()),
            )),
        }
    }
}
