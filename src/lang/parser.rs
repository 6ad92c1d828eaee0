//! Build language parser.
//!
//! Grammar:
//!
//! ```text
//! file     := item*
//! item     := 'import' qname (',' qname)*
//!           | 'export' qname (',' qname)*
//!           | ID '=' value
//!           | 'anon'? ID '(' params? ')' ('=' value)?
//! params   := param (',' param)*
//! param    := ID '?'? (':' '[' ']')?
//! value    := STRING | 'true' | 'false' | list | qname | qname '(' args? ')'
//! args     := value | ID '=' value (',' ID '=' value)*
//! list     := '[' (value (',' value)* ','?)? ']'
//! ```
//!
//! `#` starts a comment that runs to the end of the line.

use super::ast::*;
use crate::core::error::ParseError;
use crate::core::tree::Location;

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Ident(String),
    Str(String),
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Eq,
    Colon,
    Question,
    Eof,
}

impl Tok {
    fn describe(&self) -> String {
        match self {
            Self::Ident(s) => format!("'{}'", s),
            Self::Str(_) => "string literal".to_string(),
            Self::LParen => "'('".to_string(),
            Self::RParen => "')'".to_string(),
            Self::LBracket => "'['".to_string(),
            Self::RBracket => "']'".to_string(),
            Self::Comma => "','".to_string(),
            Self::Eq => "'='".to_string(),
            Self::Colon => "':'".to_string(),
            Self::Question => "'?'".to_string(),
            Self::Eof => "end of file".to_string(),
        }
    }
}

struct Lexer<'a> {
    module: &'a str,
    chars: std::iter::Peekable<std::str::Chars<'a>>,
    line: u32,
    column: u32,
}

impl<'a> Lexer<'a> {
    fn new(module: &'a str, source: &'a str) -> Self {
        Self {
            module,
            chars: source.chars().peekable(),
            line: 1,
            column: 1,
        }
    }

    fn error(&self, pos: Pos, message: impl Into<String>) -> ParseError {
        ParseError::new(Location::new(self.module, pos), message)
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.chars.next()?;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn tokenize(mut self) -> Result<Vec<(Tok, Pos)>, ParseError> {
        let mut tokens = Vec::new();
        loop {
            let pos = Pos::new(self.line, self.column);
            let c = match self.chars.peek().copied() {
                Some(c) => c,
                None => {
                    tokens.push((Tok::Eof, pos));
                    return Ok(tokens);
                }
            };
            let tok = match c {
                c if c.is_whitespace() => {
                    self.bump();
                    continue;
                }
                '#' => {
                    while let Some(c) = self.bump() {
                        if c == '\n' {
                            break;
                        }
                    }
                    continue;
                }
                '(' => Tok::LParen,
                ')' => Tok::RParen,
                '[' => Tok::LBracket,
                ']' => Tok::RBracket,
                ',' => Tok::Comma,
                '=' => Tok::Eq,
                ':' => Tok::Colon,
                '?' => Tok::Question,
                '\'' | '"' => {
                    let value = self.string(c, pos)?;
                    tokens.push((Tok::Str(value), pos));
                    continue;
                }
                c if c.is_alphabetic() || c == '_' => {
                    let mut ident = String::new();
                    while let Some(&c) = self.chars.peek() {
                        if c.is_alphanumeric() || c == '_' || c == '.' || c == '-' {
                            ident.push(c);
                            self.bump();
                        } else {
                            break;
                        }
                    }
                    if ident.ends_with('.') {
                        return Err(self.error(pos, format!("invalid name '{}'", ident)));
                    }
                    tokens.push((Tok::Ident(ident), pos));
                    continue;
                }
                other => return Err(self.error(pos, format!("unexpected character '{}'", other))),
            };
            self.bump();
            tokens.push((tok, pos));
        }
    }

    fn string(&mut self, quote: char, start: Pos) -> Result<String, ParseError> {
        self.bump();
        let mut value = String::new();
        loop {
            match self.bump() {
                None | Some('\n') => return Err(self.error(start, "unterminated string literal")),
                Some('\\') => match self.bump() {
                    Some('n') => value.push('\n'),
                    Some('t') => value.push('\t'),
                    Some(c @ ('\\' | '\'' | '"')) => value.push(c),
                    Some(c) => {
                        let pos = Pos::new(self.line, self.column.saturating_sub(1));
                        return Err(self.error(pos, format!("invalid escape '\\{}'", c)));
                    }
                    None => return Err(self.error(start, "unterminated string literal")),
                },
                Some(c) if c == quote => return Ok(value),
                Some(c) => value.push(c),
            }
        }
    }
}

struct Parser<'a> {
    module: &'a str,
    tokens: Vec<(Tok, Pos)>,
    index: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> &Tok {
        &self.tokens[self.index].0
    }

    fn peek_at(&self, offset: usize) -> &Tok {
        let i = (self.index + offset).min(self.tokens.len() - 1);
        &self.tokens[i].0
    }

    fn pos(&self) -> Pos {
        self.tokens[self.index].1
    }

    fn advance(&mut self) -> (Tok, Pos) {
        let tok = self.tokens[self.index].clone();
        if self.index < self.tokens.len() - 1 {
            self.index += 1;
        }
        tok
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        ParseError::new(Location::new(self.module, self.pos()), message)
    }

    fn expect(&mut self, tok: Tok) -> Result<Pos, ParseError> {
        if *self.peek() == tok {
            Ok(self.advance().1)
        } else {
            Err(self.error(format!(
                "expected {}, found {}",
                tok.describe(),
                self.peek().describe()
            )))
        }
    }

    fn ident(&mut self) -> Result<Name, ParseError> {
        match self.advance() {
            (Tok::Ident(text), pos) => Ok(Name::new(text, pos)),
            (tok, pos) => Err(ParseError::new(
                Location::new(self.module, pos),
                format!("expected a name, found {}", tok.describe()),
            )),
        }
    }

    /// A plain identifier: qualified names are only allowed in references.
    fn simple_ident(&mut self) -> Result<Name, ParseError> {
        let name = self.ident()?;
        if name.text.contains('.') {
            return Err(ParseError::new(
                Location::new(self.module, name.pos),
                format!("'{}' must not be qualified here", name.text),
            ));
        }
        Ok(name)
    }

    fn file(&mut self) -> Result<BuildFile, ParseError> {
        let mut file = BuildFile::default();
        loop {
            match self.peek().clone() {
                Tok::Eof => return Ok(file),
                Tok::Ident(word) if word == "import" && self.starts_name_list() => {
                    self.advance();
                    file.imports.extend(self.name_list()?);
                }
                Tok::Ident(word) if word == "export" && self.starts_name_list() => {
                    self.advance();
                    file.exports.extend(self.name_list()?);
                }
                Tok::Ident(word) if word == "anon" && matches!(self.peek_at(1), Tok::Ident(_)) => {
                    self.advance();
                    let name = self.simple_ident()?;
                    file.definitions.push(self.rule_decl(name, true)?);
                }
                Tok::Ident(_) => {
                    let name = self.simple_ident()?;
                    match self.peek() {
                        Tok::Eq => {
                            self.advance();
                            let value = self.value()?;
                            file.declarations.push(GoalDecl { name, value });
                        }
                        Tok::LParen => file.definitions.push(self.rule_decl(name, false)?),
                        other => {
                            return Err(self.error(format!(
                                "expected '=' or '(' after '{}', found {}",
                                name.text,
                                other.describe()
                            )))
                        }
                    }
                }
                other => {
                    return Err(self.error(format!(
                        "expected a declaration, found {}",
                        other.describe()
                    )))
                }
            }
        }
    }

    /// `import`/`export` are keywords only when followed by a name rather than `=` or `(`.
    fn starts_name_list(&self) -> bool {
        matches!(self.peek_at(1), Tok::Ident(_))
    }

    fn name_list(&mut self) -> Result<Vec<Name>, ParseError> {
        let mut names = vec![self.ident()?];
        while *self.peek() == Tok::Comma {
            self.advance();
            names.push(self.ident()?);
        }
        Ok(names)
    }

    fn rule_decl(&mut self, name: Name, anon: bool) -> Result<RuleDecl, ParseError> {
        self.expect(Tok::LParen)?;
        let mut params = Vec::new();
        if *self.peek() != Tok::RParen {
            params.push(self.param()?);
            while *self.peek() == Tok::Comma {
                self.advance();
                params.push(self.param()?);
            }
        }
        self.expect(Tok::RParen)?;
        let body = if *self.peek() == Tok::Eq {
            self.advance();
            Some(self.value()?)
        } else {
            None
        };
        Ok(RuleDecl {
            name,
            params,
            body,
            anon,
        })
    }

    fn param(&mut self) -> Result<ParamDecl, ParseError> {
        let name = self.simple_ident()?;
        let mut optional = false;
        if *self.peek() == Tok::Question {
            self.advance();
            optional = true;
        }
        let mut cardinality = Cardinality::Single;
        if *self.peek() == Tok::Colon {
            self.advance();
            self.expect(Tok::LBracket)?;
            self.expect(Tok::RBracket)?;
            cardinality = Cardinality::List;
            optional = true;
        }
        Ok(ParamDecl {
            name,
            cardinality,
            optional,
        })
    }

    fn value(&mut self) -> Result<Expr, ParseError> {
        match self.peek().clone() {
            Tok::Str(value) => {
                let (_, pos) = self.advance();
                Ok(Expr::Str { value, pos })
            }
            Tok::LBracket => {
                let pos = self.expect(Tok::LBracket)?;
                let mut items = Vec::new();
                while *self.peek() != Tok::RBracket {
                    items.push(self.value()?);
                    if *self.peek() == Tok::Comma {
                        self.advance();
                    } else {
                        break;
                    }
                }
                self.expect(Tok::RBracket)?;
                Ok(Expr::List { items, pos })
            }
            Tok::Ident(word) if (word == "true" || word == "false") && *self.peek_at(1) != Tok::LParen => {
                let (_, pos) = self.advance();
                Ok(Expr::Bool {
                    value: word == "true",
                    pos,
                })
            }
            Tok::Ident(_) => {
                let name = self.ident()?;
                if *self.peek() == Tok::LParen {
                    self.advance();
                    let args = self.args(&name)?;
                    self.expect(Tok::RParen)?;
                    Ok(Expr::Call { rule: name, args })
                } else {
                    Ok(Expr::Ref(name))
                }
            }
            other => Err(self.error(format!("expected a value, found {}", other.describe()))),
        }
    }

    fn args(&mut self, rule: &Name) -> Result<Vec<Arg>, ParseError> {
        if *self.peek() == Tok::RParen {
            return Ok(Vec::new());
        }
        let named = matches!(self.peek(), Tok::Ident(_)) && *self.peek_at(1) == Tok::Eq;
        if !named {
            let value = self.value()?;
            if *self.peek() == Tok::Comma {
                return Err(self.error(format!(
                    "calls with several arguments must name them, ie. {}(a = x, b = y)",
                    rule.text
                )));
            }
            return Ok(vec![Arg { name: None, value }]);
        }
        let mut args = Vec::new();
        loop {
            let name = self.simple_ident()?;
            self.expect(Tok::Eq)?;
            let value = self.value()?;
            args.push(Arg {
                name: Some(name),
                value,
            });
            if *self.peek() != Tok::Comma {
                return Ok(args);
            }
            self.advance();
        }
    }
}

/// Parse the source of `module` into a build file.
pub fn parse_build_file(module: &str, source: &str) -> Result<BuildFile, ParseError> {
    let tokens = Lexer::new(module, source).tokenize()?;
    let mut parser = Parser {
        module,
        tokens,
        index: 0,
    };
    parser.file()
}
