//! Assembler errors, all carrying a source position.

use std::fmt;
use std::io;
use std::sync::Arc;

/// A location in assembly source: file, 1-based line, 1-based column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourcePos {
    /// File name as given to the assembler (shared, not re-read).
    pub file: Arc<str>,
    /// 1-based line number.
    pub line: u32,
    /// 1-based column number.
    pub col: u32,
}

impl SourcePos {
    /// Position at the start of a line.
    #[must_use]
    pub fn line_start(file: &Arc<str>, line: u32) -> Self {
        Self {
            file: Arc::clone(file),
            line,
            col: 1,
        }
    }
}

impl fmt::Display for SourcePos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.col)
    }
}

/// Anything that can stop an assembly before code generation.
#[derive(Debug)]
pub enum AsmError {
    /// Malformed token or construct.
    Syntax { pos: SourcePos, msg: String },
    /// Reference to a symbol with no definition.
    UndefinedSymbol { pos: SourcePos, name: String },
    /// A symbol defined twice with different values.
    DuplicateSymbol { pos: SourcePos, name: String },
    /// An immediate that no encoding can represent.
    ImmediateRange { pos: SourcePos, value: i64, what: &'static str },
    /// Branch target outside the signed 24-bit reach.
    BranchRange { pos: SourcePos, offset: i64 },
    /// `LDR Rd, =value` with no literal pool within ±4095 bytes.
    NoReachablePool { pos: SourcePos, value: u32 },
    /// MUL/MLA with Rd == Rm (architectural restriction).
    MultiplyConstraint { pos: SourcePos },
    /// `.include` nesting deeper than the limit.
    IncludeDepth { pos: SourcePos, limit: u32 },
    /// `.include` path escaping the base directory.
    IncludeEscape { pos: SourcePos, path: String },
    /// File I/O while reading source or includes.
    Io { path: String, source: io::Error },
}

impl AsmError {
    /// Convenience constructor for syntax errors.
    #[must_use]
    pub fn syntax(pos: SourcePos, msg: impl Into<String>) -> Self {
        Self::Syntax {
            pos,
            msg: msg.into(),
        }
    }
}

impl fmt::Display for AsmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Syntax { pos, msg } => write!(f, "{pos}: {msg}"),
            Self::UndefinedSymbol { pos, name } => {
                write!(f, "{pos}: undefined symbol `{name}`")
            }
            Self::DuplicateSymbol { pos, name } => {
                write!(f, "{pos}: duplicate definition of `{name}`")
            }
            Self::ImmediateRange { pos, value, what } => {
                write!(f, "{pos}: {what} {value} cannot be encoded")
            }
            Self::BranchRange { pos, offset } => {
                write!(f, "{pos}: branch offset {offset} exceeds the 24-bit range")
            }
            Self::NoReachablePool { pos, value } => write!(
                f,
                "{pos}: no literal pool within 4095 bytes for {value:#010X}; add an .ltorg"
            ),
            Self::MultiplyConstraint { pos } => {
                write!(f, "{pos}: MUL/MLA destination must differ from Rm")
            }
            Self::IncludeDepth { pos, limit } => {
                write!(f, "{pos}: include depth exceeds {limit}")
            }
            Self::IncludeEscape { pos, path } => {
                write!(f, "{pos}: include path `{path}` escapes the source directory")
            }
            Self::Io { path, source } => write!(f, "{path}: {source}"),
        }
    }
}

impl std::error::Error for AsmError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}
