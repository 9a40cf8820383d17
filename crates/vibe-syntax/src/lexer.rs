//! Template lexer
//!
//! Splits source into text runs and the tokens inside `{{ }}` and `{% %}`
//! tags. Comments are dropped here, `raw` blocks become plain text, and the
//! whitespace-control markers (`-`) and options are applied to neighbouring
//! text runs.

use std::fmt;

use crate::error::{SyntaxError, SyntaxResult};

/// Lexical tokens
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// Literal text between tags
    Text(String),
    /// `{{`
    VariableStart,
    /// `}}`
    VariableEnd,
    /// `{%`
    BlockStart,
    /// `%}`
    BlockEnd,
    /// Identifier or keyword
    Name(String),
    /// Integer literal
    Int(i64),
    /// Float literal
    Float(f64),
    /// String literal (escapes resolved)
    Str(String),
    /// `+`
    Plus,
    /// `-`
    Minus,
    /// `*`
    Star,
    /// `/`
    Slash,
    /// `//`
    SlashSlash,
    /// `%`
    Percent,
    /// `**`
    StarStar,
    /// `~`
    Tilde,
    /// `|`
    Pipe,
    /// `.`
    Dot,
    /// `,`
    Comma,
    /// `:`
    Colon,
    /// `(`
    LParen,
    /// `)`
    RParen,
    /// `[`
    LBracket,
    /// `]`
    RBracket,
    /// `{`
    LBrace,
    /// `}`
    RBrace,
    /// `=`
    Assign,
    /// `==`
    Eq,
    /// `!=`
    Ne,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
    /// End of input
    Eof,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Token::Text(_) => "template text",
            Token::VariableStart => "'{{'",
            Token::VariableEnd => "'}}'",
            Token::BlockStart => "'{%'",
            Token::BlockEnd => "'%}'",
            Token::Name(n) => return write!(f, "name '{}'", n),
            Token::Int(n) => return write!(f, "integer {}", n),
            Token::Float(n) => return write!(f, "float {}", n),
            Token::Str(_) => "string",
            Token::Plus => "'+'",
            Token::Minus => "'-'",
            Token::Star => "'*'",
            Token::Slash => "'/'",
            Token::SlashSlash => "'//'",
            Token::Percent => "'%'",
            Token::StarStar => "'**'",
            Token::Tilde => "'~'",
            Token::Pipe => "'|'",
            Token::Dot => "'.'",
            Token::Comma => "','",
            Token::Colon => "':'",
            Token::LParen => "'('",
            Token::RParen => "')'",
            Token::LBracket => "'['",
            Token::RBracket => "']'",
            Token::LBrace => "'{'",
            Token::RBrace => "'}'",
            Token::Assign => "'='",
            Token::Eq => "'=='",
            Token::Ne => "'!='",
            Token::Lt => "'<'",
            Token::Le => "'<='",
            Token::Gt => "'>'",
            Token::Ge => "'>='",
            Token::Eof => "end of template",
        };
        f.write_str(s)
    }
}

/// A token with the line it started on
#[derive(Debug, Clone, PartialEq)]
pub struct SpannedToken {
    /// The token
    pub token: Token,
    /// 1-based line number
    pub line: u32,
}

/// Whitespace handling options
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LexerOptions {
    /// Remove the first newline after a block tag
    pub trim_blocks: bool,
    /// Strip spaces and tabs from the start of a line up to a block tag
    pub lstrip_blocks: bool,
    /// Keep a single trailing newline at the end of the source
    pub keep_trailing_newline: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TagKind {
    Variable,
    Block,
    Comment,
}

/// Tokenize template source
pub fn tokenize(source: &str, options: &LexerOptions) -> SyntaxResult<Vec<SpannedToken>> {
    Lexer::new(source, *options).run()
}

struct Lexer<'s> {
    src: &'s str,
    bytes: &'s [u8],
    pos: usize,
    line: u32,
    options: LexerOptions,
    tokens: Vec<SpannedToken>,
    /// Set by a `-` close marker; trims the next text run
    strip_next: bool,
}

impl<'s> Lexer<'s> {
    fn new(source: &'s str, options: LexerOptions) -> Self {
        let src = if options.keep_trailing_newline {
            source
        } else if let Some(s) = source.strip_suffix("\r\n") {
            s
        } else {
            source.strip_suffix('\n').unwrap_or(source)
        };
        Self {
            src,
            bytes: src.as_bytes(),
            pos: 0,
            line: 1,
            options,
            tokens: Vec::new(),
            strip_next: false,
        }
    }

    fn push(&mut self, token: Token, line: u32) {
        self.tokens.push(SpannedToken { token, line });
    }

    fn rest(&self) -> &'s str {
        &self.src[self.pos..]
    }

    fn run(mut self) -> SyntaxResult<Vec<SpannedToken>> {
        while self.pos < self.bytes.len() {
            let start = self.pos;
            let tag = find_tag(self.bytes, start);
            let text_end = tag.map_or(self.bytes.len(), |(i, _)| i);
            let text_line = self.line;
            let mut text = &self.src[start..text_end];
            self.line += count_newlines(text);

            if std::mem::take(&mut self.strip_next) {
                text = text.trim_start();
            }
            if let Some((tag_pos, kind)) = tag {
                let marker = self.bytes.get(tag_pos + 2).copied();
                if marker == Some(b'-') {
                    text = text.trim_end();
                } else if kind != TagKind::Variable
                    && self.options.lstrip_blocks
                    && marker != Some(b'+')
                {
                    text = lstrip_line_tail(text, start == 0);
                }
            }
            if !text.is_empty() {
                self.push(Token::Text(text.to_string()), text_line);
            }

            let Some((tag_pos, kind)) = tag else {
                self.pos = self.bytes.len();
                break;
            };

            let tag_line = self.line;
            self.pos = tag_pos + 2;
            if matches!(self.bytes.get(self.pos), Some(b'-' | b'+')) {
                self.pos += 1;
            }

            match kind {
                TagKind::Comment => self.lex_comment(tag_line)?,
                TagKind::Variable => {
                    self.push(Token::VariableStart, tag_line);
                    self.lex_tag_body(TagKind::Variable, tag_line)?;
                }
                TagKind::Block => {
                    if self.try_raw(tag_line)? {
                        continue;
                    }
                    self.push(Token::BlockStart, tag_line);
                    self.lex_tag_body(TagKind::Block, tag_line)?;
                }
            }
        }
        let line = self.line;
        self.push(Token::Eof, line);
        Ok(self.tokens)
    }

    fn lex_comment(&mut self, line: u32) -> SyntaxResult<()> {
        let Some(offset) = self.rest().find("#}") else {
            return Err(SyntaxError::Unterminated {
                what: "comment",
                line,
            });
        };
        let end = self.pos + offset;
        if end > self.pos && self.bytes[end - 1] == b'-' {
            self.strip_next = true;
        }
        self.line += count_newlines(&self.src[self.pos..end]);
        self.pos = end + 2;
        self.apply_trim_blocks();
        Ok(())
    }

    /// Handle `{% raw %}...{% endraw %}`; returns false if this is not a raw tag.
    fn try_raw(&mut self, line: u32) -> SyntaxResult<bool> {
        let rest = self.rest();
        let trimmed = rest.trim_start_matches([' ', '\t', '\r', '\n']);
        let Some(after_kw) = trimmed.strip_prefix("raw") else {
            return Ok(false);
        };
        let after_kw = after_kw.trim_start_matches([' ', '\t', '\r', '\n']);
        let (open_strip, after_open) = if let Some(s) = after_kw.strip_prefix("-%}") {
            (true, s)
        } else if let Some(s) = after_kw.strip_prefix("%}") {
            (false, s)
        } else {
            return Ok(false);
        };

        let content_start = self.src.len() - after_open.len();
        let mut search = content_start;
        loop {
            let Some(offset) = self.src[search..].find("{%") else {
                return Err(SyntaxError::Unterminated {
                    what: "raw block",
                    line,
                });
            };
            let tag_start = search + offset;
            let mut cursor = &self.src[tag_start + 2..];
            let close_strip_left = cursor.starts_with('-');
            if close_strip_left {
                cursor = &cursor[1..];
            }
            cursor = cursor.trim_start_matches([' ', '\t', '\r', '\n']);
            if let Some(after) = cursor.strip_prefix("endraw") {
                let after = after.trim_start_matches([' ', '\t', '\r', '\n']);
                let (strip_after, tail) = if let Some(t) = after.strip_prefix("-%}") {
                    (true, t)
                } else if let Some(t) = after.strip_prefix("%}") {
                    (false, t)
                } else {
                    search = tag_start + 2;
                    continue;
                };

                let mut content = &self.src[content_start..tag_start];
                if open_strip {
                    content = content.trim_start();
                }
                if close_strip_left {
                    content = content.trim_end();
                }
                if !content.is_empty() {
                    self.push(Token::Text(content.to_string()), line);
                }
                let end = self.src.len() - tail.len();
                self.line += count_newlines(&self.src[self.pos..end]);
                self.pos = end;
                self.strip_next = strip_after;
                self.apply_trim_blocks();
                return Ok(true);
            }
            search = tag_start + 2;
        }
    }

    fn apply_trim_blocks(&mut self) {
        if !self.options.trim_blocks || self.strip_next {
            return;
        }
        if self.rest().starts_with("\r\n") {
            self.pos += 2;
            self.line += 1;
        } else if self.rest().starts_with('\n') {
            self.pos += 1;
            self.line += 1;
        }
    }

    fn lex_tag_body(&mut self, kind: TagKind, open_line: u32) -> SyntaxResult<()> {
        let mut brace_depth = 0usize;
        loop {
            self.skip_whitespace();
            if self.pos >= self.bytes.len() {
                return Err(SyntaxError::Unterminated {
                    what: if kind == TagKind::Variable {
                        "variable tag"
                    } else {
                        "block tag"
                    },
                    line: open_line,
                });
            }

            if brace_depth == 0 {
                let rest = self.rest();
                let (close, end_token) = match kind {
                    TagKind::Variable => ("}}", Token::VariableEnd),
                    _ => ("%}", Token::BlockEnd),
                };
                let stripped = rest.starts_with('-') && rest[1..].starts_with(close);
                let plain = rest.starts_with(close);
                if stripped || plain {
                    self.pos += close.len() + usize::from(stripped);
                    let line = self.line;
                    self.push(end_token, line);
                    if stripped {
                        self.strip_next = true;
                    } else if kind == TagKind::Block {
                        self.apply_trim_blocks();
                    }
                    return Ok(());
                }
            }

            let line = self.line;
            let token = self.lex_token()?;
            match token {
                Token::LBrace => brace_depth += 1,
                Token::RBrace => brace_depth = brace_depth.saturating_sub(1),
                _ => {}
            }
            self.push(token, line);
        }
    }

    fn skip_whitespace(&mut self) {
        while let Some(&b) = self.bytes.get(self.pos) {
            match b {
                b'\n' => {
                    self.line += 1;
                    self.pos += 1;
                }
                b' ' | b'\t' | b'\r' => self.pos += 1,
                _ => break,
            }
        }
    }

    fn lex_token(&mut self) -> SyntaxResult<Token> {
        let b = self.bytes[self.pos];
        if b.is_ascii_digit() {
            return self.lex_number();
        }
        if b.is_ascii_alphabetic() || b == b'_' {
            let start = self.pos;
            while self
                .bytes
                .get(self.pos)
                .is_some_and(|c| c.is_ascii_alphanumeric() || *c == b'_')
            {
                self.pos += 1;
            }
            return Ok(Token::Name(self.src[start..self.pos].to_string()));
        }
        if b == b'\'' || b == b'"' {
            return self.lex_string(b);
        }

        let two = self.bytes.get(self.pos..self.pos + 2);
        let double = match two {
            Some(b"**") => Some(Token::StarStar),
            Some(b"//") => Some(Token::SlashSlash),
            Some(b"==") => Some(Token::Eq),
            Some(b"!=") => Some(Token::Ne),
            Some(b"<=") => Some(Token::Le),
            Some(b">=") => Some(Token::Ge),
            _ => None,
        };
        if let Some(token) = double {
            self.pos += 2;
            return Ok(token);
        }

        let single = match b {
            b'+' => Token::Plus,
            b'-' => Token::Minus,
            b'*' => Token::Star,
            b'/' => Token::Slash,
            b'%' => Token::Percent,
            b'~' => Token::Tilde,
            b'|' => Token::Pipe,
            b'.' => Token::Dot,
            b',' => Token::Comma,
            b':' => Token::Colon,
            b'(' => Token::LParen,
            b')' => Token::RParen,
            b'[' => Token::LBracket,
            b']' => Token::RBracket,
            b'{' => Token::LBrace,
            b'}' => Token::RBrace,
            b'=' => Token::Assign,
            b'<' => Token::Lt,
            b'>' => Token::Gt,
            _ => {
                let ch = self.rest().chars().next().unwrap_or('\0');
                return Err(SyntaxError::UnexpectedChar {
                    ch,
                    line: self.line,
                });
            }
        };
        self.pos += 1;
        Ok(single)
    }

    fn lex_number(&mut self) -> SyntaxResult<Token> {
        let start = self.pos;
        let digits = |lexer: &mut Self| {
            while lexer
                .bytes
                .get(lexer.pos)
                .is_some_and(|c| c.is_ascii_digit() || *c == b'_')
            {
                lexer.pos += 1;
            }
        };
        digits(self);

        let mut is_float = false;
        if self.bytes.get(self.pos) == Some(&b'.')
            && self.bytes.get(self.pos + 1).is_some_and(u8::is_ascii_digit)
        {
            is_float = true;
            self.pos += 1;
            digits(self);
        }
        if matches!(self.bytes.get(self.pos), Some(b'e' | b'E')) {
            let mut look = self.pos + 1;
            if matches!(self.bytes.get(look), Some(b'+' | b'-')) {
                look += 1;
            }
            if self.bytes.get(look).is_some_and(u8::is_ascii_digit) {
                is_float = true;
                self.pos = look;
                digits(self);
            }
        }

        let text: String = self.src[start..self.pos].chars().filter(|c| *c != '_').collect();
        if is_float {
            text.parse::<f64>()
                .map(Token::Float)
                .map_err(|_| SyntaxError::unexpected("number", text.clone(), self.line))
        } else {
            text.parse::<i64>()
                .map(Token::Int)
                .map_err(|_| SyntaxError::IntegerOverflow { line: self.line })
        }
    }

    fn lex_string(&mut self, quote: u8) -> SyntaxResult<Token> {
        let line = self.line;
        self.pos += 1;
        let mut out = String::new();
        loop {
            let Some(ch) = self.rest().chars().next() else {
                return Err(SyntaxError::Unterminated {
                    what: "string",
                    line,
                });
            };
            self.pos += ch.len_utf8();
            if ch as u32 == quote as u32 {
                return Ok(Token::Str(out));
            }
            match ch {
                '\\' => {
                    let Some(esc) = self.rest().chars().next() else {
                        return Err(SyntaxError::Unterminated {
                            what: "string",
                            line,
                        });
                    };
                    self.pos += esc.len_utf8();
                    match esc {
                        'n' => out.push('\n'),
                        't' => out.push('\t'),
                        'r' => out.push('\r'),
                        '0' => out.push('\0'),
                        '\\' | '\'' | '"' => out.push(esc),
                        '\n' => self.line += 1,
                        other => {
                            out.push('\\');
                            out.push(other);
                        }
                    }
                }
                '\n' => {
                    self.line += 1;
                    out.push('\n');
                }
                c => out.push(c),
            }
        }
    }
}

fn find_tag(bytes: &[u8], from: usize) -> Option<(usize, TagKind)> {
    let mut i = from;
    while i + 1 < bytes.len() {
        if bytes[i] == b'{' {
            match bytes[i + 1] {
                b'{' => return Some((i, TagKind::Variable)),
                b'%' => return Some((i, TagKind::Block)),
                b'#' => return Some((i, TagKind::Comment)),
                _ => {}
            }
        }
        i += 1;
    }
    None
}

fn count_newlines(s: &str) -> u32 {
    s.bytes().filter(|b| *b == b'\n').count() as u32
}

/// Drop trailing spaces/tabs if they sit alone at the start of a line.
fn lstrip_line_tail(text: &str, at_template_start: bool) -> &str {
    match text.rfind('\n') {
        Some(nl) => {
            let tail = &text[nl + 1..];
            if tail.bytes().all(|b| b == b' ' || b == b'\t') {
                &text[..nl + 1]
            } else {
                text
            }
        }
        None if at_template_start && text.bytes().all(|b| b == b' ' || b == b'\t') => "",
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<Token> {
        tokenize(src, &LexerOptions::default())
            .unwrap()
            .into_iter()
            .map(|t| t.token)
            .collect()
    }

    #[test]
    fn test_text_and_variable() {
        assert_eq!(
            kinds("Hello {{ name }}!"),
            vec![
                Token::Text("Hello ".into()),
                Token::VariableStart,
                Token::Name("name".into()),
                Token::VariableEnd,
                Token::Text("!".into()),
                Token::Eof,
            ]
        );
    }

    #[test]
    fn test_numbers_and_operators() {
        assert_eq!(
            kinds("{{ 1 + 2.5 ** 3 // 1_000 }}"),
            vec![
                Token::VariableStart,
                Token::Int(1),
                Token::Plus,
                Token::Float(2.5),
                Token::StarStar,
                Token::Int(3),
                Token::SlashSlash,
                Token::Int(1000),
                Token::VariableEnd,
                Token::Eof,
            ]
        );
    }

    #[test]
    fn test_string_escapes() {
        assert_eq!(
            kinds(r#"{{ 'a\'b' ~ "c\n" }}"#)[1..4],
            [
                Token::Str("a'b".into()),
                Token::Tilde,
                Token::Str("c\n".into())
            ]
        );
    }

    #[test]
    fn test_comment_dropped() {
        assert_eq!(
            kinds("a{# note #}b"),
            vec![Token::Text("a".into()), Token::Text("b".into()), Token::Eof]
        );
    }

    #[test]
    fn test_whitespace_control() {
        assert_eq!(
            kinds("a  {%- if x -%}  b"),
            vec![
                Token::Text("a".into()),
                Token::BlockStart,
                Token::Name("if".into()),
                Token::Name("x".into()),
                Token::BlockEnd,
                Token::Text("b".into()),
                Token::Eof,
            ]
        );
    }

    #[test]
    fn test_trim_blocks() {
        let options = LexerOptions {
            trim_blocks: true,
            ..LexerOptions::default()
        };
        let tokens: Vec<Token> = tokenize("{% if x %}\nyes", &options)
            .unwrap()
            .into_iter()
            .map(|t| t.token)
            .collect();
        assert_eq!(tokens[4], Token::Text("yes".into()));
    }

    #[test]
    fn test_lstrip_blocks() {
        let options = LexerOptions {
            lstrip_blocks: true,
            ..LexerOptions::default()
        };
        let tokens: Vec<Token> = tokenize("a\n    {% if x %}", &options)
            .unwrap()
            .into_iter()
            .map(|t| t.token)
            .collect();
        assert_eq!(tokens[0], Token::Text("a\n".into()));
    }

    #[test]
    fn test_raw_block() {
        assert_eq!(
            kinds("{% raw %}{{ not a var }}{% endraw %}"),
            vec![Token::Text("{{ not a var }}".into()), Token::Eof]
        );
    }

    #[test]
    fn test_dict_literal_inside_variable() {
        let tokens = kinds("{{ {'a': 1} }}");
        assert_eq!(tokens[1], Token::LBrace);
        assert_eq!(tokens[5], Token::RBrace);
        assert_eq!(tokens[6], Token::VariableEnd);
    }

    #[test]
    fn test_trailing_newline_removed() {
        assert_eq!(kinds("x\n"), vec![Token::Text("x".into()), Token::Eof]);
        let options = LexerOptions {
            keep_trailing_newline: true,
            ..LexerOptions::default()
        };
        let tokens = tokenize("x\n", &options).unwrap();
        assert_eq!(tokens[0].token, Token::Text("x\n".into()));
    }

    #[test]
    fn test_unterminated_comment() {
        let err = tokenize("{# open", &LexerOptions::default()).unwrap_err();
        assert!(matches!(err, SyntaxError::Unterminated { what: "comment", .. }));
    }

    #[test]
    fn test_line_numbers() {
        let tokens = tokenize("a\nb\n{{ x }}", &LexerOptions::default()).unwrap();
        assert_eq!(tokens[1].line, 3);
    }
}
