//! Constant expressions: parsed in pass 1, evaluated against the symbol
//! table in pass 2 (or immediately, for preprocessor conditionals).
//!
//! C-like precedence, 64-bit signed arithmetic; values are truncated to 32
//! bits at the point of use.

use crate::error::{AsmError, SourcePos};
use crate::lexer::{Spanned, Token};

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    Neg,
    Not,
    LogicalNot,
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Mul,
    Div,
    Rem,
    Add,
    Sub,
    Shl,
    Shr,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    And,
    Xor,
    Or,
    LogicalAnd,
    LogicalOr,
}

impl BinOp {
    /// Higher binds tighter.
    const fn precedence(self) -> u8 {
        match self {
            Self::Mul | Self::Div | Self::Rem => 10,
            Self::Add | Self::Sub => 9,
            Self::Shl | Self::Shr => 8,
            Self::Lt | Self::Le | Self::Gt | Self::Ge => 7,
            Self::Eq | Self::Ne => 6,
            Self::And => 5,
            Self::Xor => 4,
            Self::Or => 3,
            Self::LogicalAnd => 2,
            Self::LogicalOr => 1,
        }
    }

    const fn from_token(tok: &Token) -> Option<Self> {
        Some(match tok {
            Token::Star => Self::Mul,
            Token::Slash => Self::Div,
            Token::Percent => Self::Rem,
            Token::Plus => Self::Add,
            Token::Minus => Self::Sub,
            Token::Shl => Self::Shl,
            Token::Shr => Self::Shr,
            Token::Lt => Self::Lt,
            Token::Le => Self::Le,
            Token::Gt => Self::Gt,
            Token::Ge => Self::Ge,
            Token::EqEq => Self::Eq,
            Token::NotEq => Self::Ne,
            Token::Amp => Self::And,
            Token::Caret => Self::Xor,
            Token::Pipe => Self::Or,
            Token::AndAnd => Self::LogicalAnd,
            Token::OrOr => Self::LogicalOr,
            _ => return None,
        })
    }
}

/// A parsed constant expression.
#[derive(Debug, Clone)]
pub enum Expr {
    Int(i64),
    Sym(String, SourcePos),
    Unary(UnOp, Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>, SourcePos),
}

impl Expr {
    /// Evaluate with a symbol lookup.
    pub fn eval(&self, lookup: &dyn Fn(&str) -> Option<i64>) -> Result<i64, AsmError> {
        match self {
            Expr::Int(v) => Ok(*v),
            Expr::Sym(name, pos) => lookup(name).ok_or_else(|| AsmError::UndefinedSymbol {
                pos: pos.clone(),
                name: name.clone(),
            }),
            Expr::Unary(op, inner) => {
                let v = inner.eval(lookup)?;
                Ok(match op {
                    UnOp::Neg => v.wrapping_neg(),
                    UnOp::Not => !v,
                    UnOp::LogicalNot => i64::from(v == 0),
                })
            }
            Expr::Binary(op, lhs, rhs, pos) => {
                let a = lhs.eval(lookup)?;
                let b = rhs.eval(lookup)?;
                Ok(match op {
                    BinOp::Mul => a.wrapping_mul(b),
                    BinOp::Div => {
                        if b == 0 {
                            return Err(AsmError::syntax(pos.clone(), "division by zero"));
                        }
                        a.wrapping_div(b)
                    }
                    BinOp::Rem => {
                        if b == 0 {
                            return Err(AsmError::syntax(pos.clone(), "remainder by zero"));
                        }
                        a.wrapping_rem(b)
                    }
                    BinOp::Add => a.wrapping_add(b),
                    BinOp::Sub => a.wrapping_sub(b),
                    BinOp::Shl => a.wrapping_shl(b as u32),
                    BinOp::Shr => a.wrapping_shr(b as u32),
                    BinOp::Lt => i64::from(a < b),
                    BinOp::Le => i64::from(a <= b),
                    BinOp::Gt => i64::from(a > b),
                    BinOp::Ge => i64::from(a >= b),
                    BinOp::Eq => i64::from(a == b),
                    BinOp::Ne => i64::from(a != b),
                    BinOp::And => a & b,
                    BinOp::Xor => a ^ b,
                    BinOp::Or => a | b,
                    BinOp::LogicalAnd => i64::from(a != 0 && b != 0),
                    BinOp::LogicalOr => i64::from(a != 0 || b != 0),
                })
            }
        }
    }
}

/// Parse an expression starting at `*idx`, advancing past what it consumes.
pub fn parse(tokens: &[Spanned], idx: &mut usize) -> Result<Expr, AsmError> {
    parse_binary(tokens, idx, 0)
}

fn parse_binary(tokens: &[Spanned], idx: &mut usize, min_prec: u8) -> Result<Expr, AsmError> {
    let mut lhs = parse_unary(tokens, idx)?;
    while let Some(spanned) = tokens.get(*idx) {
        let Some(op) = BinOp::from_token(&spanned.tok) else {
            break;
        };
        if op.precedence() < min_prec {
            break;
        }
        let pos = spanned.pos.clone();
        *idx += 1;
        let rhs = parse_binary(tokens, idx, op.precedence() + 1)?;
        lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs), pos);
    }
    Ok(lhs)
}

fn parse_unary(tokens: &[Spanned], idx: &mut usize) -> Result<Expr, AsmError> {
    let Some(spanned) = tokens.get(*idx) else {
        return Err(AsmError::syntax(
            tokens.last().map_or_else(
                || SourcePos {
                    file: "<empty>".into(),
                    line: 0,
                    col: 0,
                },
                |t| t.pos.clone(),
            ),
            "expected expression",
        ));
    };
    let pos = spanned.pos.clone();
    match &spanned.tok {
        Token::Int(v) => {
            *idx += 1;
            Ok(Expr::Int(*v))
        }
        Token::Ident(name) => {
            *idx += 1;
            Ok(Expr::Sym(name.clone(), pos))
        }
        Token::Minus => {
            *idx += 1;
            Ok(Expr::Unary(UnOp::Neg, Box::new(parse_unary(tokens, idx)?)))
        }
        Token::Plus => {
            *idx += 1;
            parse_unary(tokens, idx)
        }
        Token::Tilde => {
            *idx += 1;
            Ok(Expr::Unary(UnOp::Not, Box::new(parse_unary(tokens, idx)?)))
        }
        Token::Bang => {
            *idx += 1;
            Ok(Expr::Unary(UnOp::LogicalNot, Box::new(parse_unary(tokens, idx)?)))
        }
        Token::LParen => {
            *idx += 1;
            let inner = parse_binary(tokens, idx, 0)?;
            match tokens.get(*idx) {
                Some(s) if s.tok == Token::RParen => {
                    *idx += 1;
                    Ok(inner)
                }
                _ => Err(AsmError::syntax(pos, "expected `)`")),
            }
        }
        other => Err(AsmError::syntax(pos, format!("expected expression, found {}", other.describe()))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::tokenize_line;
    use std::sync::Arc;

    fn eval_str(text: &str) -> i64 {
        let file: Arc<str> = Arc::from("t.s");
        let line = tokenize_line(text, &file, 1).unwrap();
        let mut idx = 0;
        let expr = parse(&line.tokens, &mut idx).unwrap();
        assert_eq!(idx, line.tokens.len(), "whole input consumed");
        expr.eval(&|_| None).unwrap()
    }

    #[test]
    fn precedence() {
        assert_eq!(eval_str("2 + 3 * 4"), 14);
        assert_eq!(eval_str("(2 + 3) * 4"), 20);
        assert_eq!(eval_str("1 << 4 | 0x0F"), 0x1F);
        assert_eq!(eval_str("-4 + 2"), -2);
        assert_eq!(eval_str("~0 & 0xFF"), 0xFF);
    }

    #[test]
    fn comparisons_and_logic() {
        assert_eq!(eval_str("3 < 4 && 2 == 2"), 1);
        assert_eq!(eval_str("!(1 > 0)"), 0);
    }

    #[test]
    fn symbols_resolve_through_lookup() {
        let file: Arc<str> = Arc::from("t.s");
        let line = tokenize_line("base + 8", &file, 1).unwrap();
        let mut idx = 0;
        let expr = parse(&line.tokens, &mut idx).unwrap();
        let v = expr
            .eval(&|name| (name == "base").then_some(0x8000))
            .unwrap();
        assert_eq!(v, 0x8008);
    }

    #[test]
    fn undefined_symbol_errors() {
        let file: Arc<str> = Arc::from("t.s");
        let line = tokenize_line("nope + 1", &file, 1).unwrap();
        let mut idx = 0;
        let expr = parse(&line.tokens, &mut idx).unwrap();
        assert!(matches!(
            expr.eval(&|_| None),
            Err(AsmError::UndefinedSymbol { .. })
        ));
    }
}
