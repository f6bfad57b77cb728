//! Tokenizer for ARM assembly source.
//!
//! Lexing is line-oriented (assembly is a line-structured language); block
//! comments are stripped in a whole-file pass first so they can span lines.
//! Register numbers are validated here: `R999` is a lex error, not a symbol.

use std::sync::Arc;

use crate::error::{AsmError, SourcePos};

/// One lexical token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    /// Identifier: mnemonic, label, symbol, or shift name.
    Ident(String),
    /// Directive including its leading dot, lower-cased (`.word`).
    Directive(String),
    /// Register index 0-15 (R0-R15, SP, LR, PC).
    Register(u32),
    /// Integer or character literal.
    Int(i64),
    /// String literal with escapes applied.
    Str(String),
    Comma,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    LParen,
    RParen,
    Bang,
    Hash,
    Equals,
    Colon,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Amp,
    Pipe,
    Caret,
    Tilde,
    Shl,
    Shr,
    Lt,
    Le,
    Gt,
    Ge,
    EqEq,
    NotEq,
    AndAnd,
    OrOr,
}

impl Token {
    /// Human-readable description for error messages.
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Token::Ident(s) => format!("`{s}`"),
            Token::Directive(s) => format!("`{s}`"),
            Token::Register(n) => format!("R{n}"),
            Token::Int(v) => format!("{v}"),
            Token::Str(_) => "string literal".to_string(),
            Token::Comma => "`,`".to_string(),
            Token::LBracket => "`[`".to_string(),
            Token::RBracket => "`]`".to_string(),
            Token::LBrace => "`{`".to_string(),
            Token::RBrace => "`}`".to_string(),
            Token::LParen => "`(`".to_string(),
            Token::RParen => "`)`".to_string(),
            Token::Bang => "`!`".to_string(),
            Token::Hash => "`#`".to_string(),
            Token::Equals => "`=`".to_string(),
            Token::Colon => "`:`".to_string(),
            other => format!("{other:?}"),
        }
    }
}

/// A token plus where it came from.
#[derive(Debug, Clone)]
pub struct Spanned {
    pub tok: Token,
    pub pos: SourcePos,
}

/// All tokens of one source line.
#[derive(Debug, Clone)]
pub struct TokenLine {
    pub tokens: Vec<Spanned>,
    /// Position of the start of the line (for line-level errors).
    pub pos: SourcePos,
    /// The line text after preprocessing, for diagnostics and listings.
    pub raw: String,
}

/// Strip `;`, `//`, and `/* */` comments, respecting string and character
/// literals. Newlines inside block comments are preserved so line numbers
/// survive.
#[must_use]
pub fn strip_comments(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    let mut in_block = false;
    let mut quote: Option<char> = None;

    while let Some(c) = chars.next() {
        if in_block {
            if c == '*' && chars.peek() == Some(&'/') {
                chars.next();
                in_block = false;
            } else if c == '\n' {
                out.push('\n');
            }
            continue;
        }
        if let Some(q) = quote {
            out.push(c);
            if c == '\\' {
                if let Some(esc) = chars.next() {
                    out.push(esc);
                }
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '"' | '\'' => {
                quote = Some(c);
                out.push(c);
            }
            ';' => {
                // Line comment: drop to end of line.
                for c in chars.by_ref() {
                    if c == '\n' {
                        out.push('\n');
                        break;
                    }
                }
            }
            '/' if chars.peek() == Some(&'/') => {
                chars.next();
                for c in chars.by_ref() {
                    if c == '\n' {
                        out.push('\n');
                        break;
                    }
                }
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                in_block = true;
            }
            _ => out.push(c),
        }
    }
    out
}

/// Tokenize one comment-free line.
pub fn tokenize_line(text: &str, file: &Arc<str>, line: u32) -> Result<TokenLine, AsmError> {
    let mut lexer = LineLexer {
        bytes: text.as_bytes(),
        i: 0,
        file,
        line,
    };
    let mut tokens = Vec::new();
    while let Some(spanned) = lexer.next_token()? {
        tokens.push(spanned);
    }
    Ok(TokenLine {
        tokens,
        pos: SourcePos::line_start(file, line),
        raw: text.trim_end().to_string(),
    })
}

struct LineLexer<'a> {
    bytes: &'a [u8],
    i: usize,
    file: &'a Arc<str>,
    line: u32,
}

impl LineLexer<'_> {
    fn pos(&self, col_index: usize) -> SourcePos {
        SourcePos {
            file: Arc::clone(self.file),
            line: self.line,
            col: col_index as u32 + 1,
        }
    }

    fn error(&self, col_index: usize, msg: impl Into<String>) -> AsmError {
        AsmError::syntax(self.pos(col_index), msg)
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.i).copied()
    }

    fn next_token(&mut self) -> Result<Option<Spanned>, AsmError> {
        while matches!(self.peek(), Some(b' ' | b'\t' | b'\r')) {
            self.i += 1;
        }
        let Some(c) = self.peek() else {
            return Ok(None);
        };
        let start = self.i;
        let tok = match c {
            b',' => self.single(Token::Comma),
            b'[' => self.single(Token::LBracket),
            b']' => self.single(Token::RBracket),
            b'{' => self.single(Token::LBrace),
            b'}' => self.single(Token::RBrace),
            b'(' => self.single(Token::LParen),
            b')' => self.single(Token::RParen),
            b'#' => self.single(Token::Hash),
            b':' => self.single(Token::Colon),
            b'+' => self.single(Token::Plus),
            b'-' => self.single(Token::Minus),
            b'*' => self.single(Token::Star),
            b'/' => self.single(Token::Slash),
            b'%' => self.single(Token::Percent),
            b'~' => self.single(Token::Tilde),
            b'^' => self.single(Token::Caret),
            b'&' => self.pair(b'&', Token::AndAnd, Token::Amp),
            b'|' => self.pair(b'|', Token::OrOr, Token::Pipe),
            b'<' => {
                if self.bytes.get(self.i + 1) == Some(&b'<') {
                    self.i += 2;
                    Token::Shl
                } else {
                    self.pair(b'=', Token::Le, Token::Lt)
                }
            }
            b'>' => {
                if self.bytes.get(self.i + 1) == Some(&b'>') {
                    self.i += 2;
                    Token::Shr
                } else {
                    self.pair(b'=', Token::Ge, Token::Gt)
                }
            }
            b'=' => self.pair(b'=', Token::EqEq, Token::Equals),
            b'!' => self.pair(b'=', Token::NotEq, Token::Bang),
            b'\'' => self.char_literal()?,
            b'"' => self.string_literal()?,
            b'0'..=b'9' => self.number()?,
            b'.' => self.directive()?,
            b'_' | b'a'..=b'z' | b'A'..=b'Z' => self.ident()?,
            other => {
                return Err(self.error(start, format!("unexpected character `{}`", other as char)));
            }
        };
        Ok(Some(Spanned {
            tok,
            pos: self.pos(start),
        }))
    }

    fn single(&mut self, tok: Token) -> Token {
        self.i += 1;
        tok
    }

    /// Two-character operator if the next byte matches, else the one-char form.
    fn pair(&mut self, second: u8, double: Token, single: Token) -> Token {
        if self.bytes.get(self.i + 1) == Some(&second) {
            self.i += 2;
            double
        } else {
            self.i += 1;
            single
        }
    }

    fn take_while(&mut self, pred: impl Fn(u8) -> bool) -> &str {
        let start = self.i;
        while let Some(c) = self.peek() {
            if pred(c) {
                self.i += 1;
            } else {
                break;
            }
        }
        // Source is required to be UTF-8 and the predicate only accepts ASCII.
        std::str::from_utf8(&self.bytes[start..self.i]).unwrap_or("")
    }

    fn number(&mut self) -> Result<Token, AsmError> {
        let start = self.i;
        let text = self.take_while(|c| c.is_ascii_alphanumeric() || c == b'_').to_string();
        let cleaned = text.replace('_', "");
        let value = if let Some(hex) = cleaned.strip_prefix("0x").or_else(|| cleaned.strip_prefix("0X")) {
            i64::from_str_radix(hex, 16)
        } else if let Some(bin) = cleaned.strip_prefix("0b").or_else(|| cleaned.strip_prefix("0B")) {
            i64::from_str_radix(bin, 2)
        } else {
            cleaned.parse::<i64>()
        };
        match value {
            Ok(v) => Ok(Token::Int(v)),
            Err(_) => Err(self.error(start, format!("bad numeric literal `{text}`"))),
        }
    }

    fn directive(&mut self) -> Result<Token, AsmError> {
        let start = self.i;
        self.i += 1; // consume '.'
        let name = self.take_while(|c| c.is_ascii_alphanumeric() || c == b'_').to_string();
        if name.is_empty() {
            return Err(self.error(start, "expected directive name after `.`"));
        }
        Ok(Token::Directive(format!(".{}", name.to_ascii_lowercase())))
    }

    fn ident(&mut self) -> Result<Token, AsmError> {
        let start = self.i;
        let text = self.take_while(|c| c.is_ascii_alphanumeric() || c == b'_').to_string();
        // Register names resolve here so range errors surface at lex time.
        let upper = text.to_ascii_uppercase();
        match upper.as_str() {
            "SP" => return Ok(Token::Register(13)),
            "LR" => return Ok(Token::Register(14)),
            "PC" => return Ok(Token::Register(15)),
            _ => {}
        }
        if let Some(digits) = upper.strip_prefix('R') {
            if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) {
                let n: u32 = digits
                    .parse()
                    .map_err(|_| self.error(start, format!("bad register `{text}`")))?;
                if n > 15 {
                    return Err(self.error(start, format!("no such register `{text}`")));
                }
                return Ok(Token::Register(n));
            }
        }
        Ok(Token::Ident(text))
    }

    fn escape(&mut self, start: usize) -> Result<u8, AsmError> {
        let Some(c) = self.peek() else {
            return Err(self.error(start, "unterminated escape"));
        };
        self.i += 1;
        Ok(match c {
            b'n' => b'\n',
            b'r' => b'\r',
            b't' => b'\t',
            b'\\' => b'\\',
            b'"' => b'"',
            b'\'' => b'\'',
            b'0' => 0,
            b'b' => 0x08,
            other => {
                return Err(self.error(start, format!("unknown escape `\\{}`", other as char)));
            }
        })
    }

    fn char_literal(&mut self) -> Result<Token, AsmError> {
        let start = self.i;
        self.i += 1; // opening quote
        let value = match self.peek() {
            Some(b'\\') => {
                self.i += 1;
                self.escape(start)?
            }
            Some(b'\'') | None => return Err(self.error(start, "empty character literal")),
            Some(c) => {
                self.i += 1;
                c
            }
        };
        if self.peek() != Some(b'\'') {
            return Err(self.error(start, "unterminated character literal"));
        }
        self.i += 1;
        Ok(Token::Int(i64::from(value)))
    }

    fn string_literal(&mut self) -> Result<Token, AsmError> {
        let start = self.i;
        self.i += 1; // opening quote
        let mut out = Vec::new();
        loop {
            match self.peek() {
                None => return Err(self.error(start, "unterminated string literal")),
                Some(b'"') => {
                    self.i += 1;
                    break;
                }
                Some(b'\\') => {
                    self.i += 1;
                    out.push(self.escape(start)?);
                }
                Some(c) => {
                    self.i += 1;
                    out.push(c);
                }
            }
        }
        String::from_utf8(out)
            .map(Token::Str)
            .map_err(|_| self.error(start, "string literal is not valid UTF-8"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lex(text: &str) -> Vec<Token> {
        let file: Arc<str> = Arc::from("test.s");
        tokenize_line(text, &file, 1)
            .unwrap()
            .tokens
            .into_iter()
            .map(|s| s.tok)
            .collect()
    }

    #[test]
    fn registers_and_aliases() {
        assert_eq!(lex("R0, r15, SP"), vec![
            Token::Register(0),
            Token::Comma,
            Token::Register(15),
            Token::Comma,
            Token::Register(13),
        ]);
    }

    #[test]
    fn register_out_of_range_is_an_error() {
        let file: Arc<str> = Arc::from("test.s");
        assert!(tokenize_line("R999", &file, 1).is_err());
        assert!(tokenize_line("R16", &file, 1).is_err());
        // But an identifier merely starting with R is fine.
        assert_eq!(lex("R2D2"), vec![Token::Ident("R2D2".into())]);
    }

    #[test]
    fn numeric_bases() {
        assert_eq!(lex("10 0x1F 0b101"), vec![Token::Int(10), Token::Int(31), Token::Int(5)]);
    }

    #[test]
    fn char_and_string_escapes() {
        assert_eq!(lex(r"'\n'"), vec![Token::Int(10)]);
        assert_eq!(lex(r"'A'"), vec![Token::Int(65)]);
        assert_eq!(lex(r#""a\tb\0""#), vec![Token::Str("a\tb\0".into())]);
    }

    #[test]
    fn comment_styles() {
        let stripped = strip_comments("MOV R0, #1 ; x\nADD R1, R2 // y\n/* z\nz */ SUB R3, R4\n");
        let lines: Vec<&str> = stripped.lines().collect();
        assert_eq!(lines[0].trim_end(), "MOV R0, #1 ");
        assert_eq!(lines[1].trim_end(), "ADD R1, R2 ");
        assert_eq!(lines[2], "");
        assert_eq!(lines[3].trim(), "SUB R3, R4");
    }

    #[test]
    fn semicolon_inside_string_is_kept() {
        let stripped = strip_comments(".asciz \"a;b\" ; comment\n");
        assert_eq!(stripped.trim_end(), ".asciz \"a;b\" ");
    }

    #[test]
    fn operators() {
        assert_eq!(lex("1 << 2 != 3"), vec![
            Token::Int(1),
            Token::Shl,
            Token::Int(2),
            Token::NotEq,
            Token::Int(3),
        ]);
    }
}
