//! Two-pass ARM2 assembler.
//!
//! Source text flows through the preprocessor (`.include`, conditionals,
//! `#define`), the macro expander, the line tokenizer, the two-pass parser
//! (addresses and symbols first, operand binding second, with literal-pool
//! rightsizing in between), and finally the encoder, which lowers every
//! statement to ARM instruction words and fills the literal pools.
//!
//! ```
//! let program = arm2_asm::assemble_str("MOV R0, #42\nSWI #0\n", "demo.s").unwrap();
//! assert_eq!(program.word_at(program.entry), Some(0xE3A0_002A));
//! ```

mod encoder;
mod error;
mod expr;
mod lexer;
mod macros;
mod parser;
mod pool;
mod preprocess;
mod program;
mod symbols;

use std::path::{Path, PathBuf};

pub use error::{AsmError, SourcePos};
pub use lexer::{Token, TokenLine};
pub use parser::Module;
pub use pool::{POOL_REACH, Pool};
pub use program::{Chunk, DEFAULT_ORIGIN, Program};
pub use symbols::{Symbol, SymbolKind, SymbolTable};

/// Assemble in-memory source. `.include` is unavailable (no base directory).
pub fn assemble_str(source: &str, name: &str) -> Result<Program, AsmError> {
    assemble_with_base(source, name, None)
}

/// Assemble in-memory source with `.include` resolved under `base_dir`.
pub fn assemble_with_base(
    source: &str,
    name: &str,
    base_dir: Option<PathBuf>,
) -> Result<Program, AsmError> {
    let mut pp = preprocess::Preprocessor::new(base_dir);
    let lines = pp.process_str(source, name)?;
    assemble_lines(lines)
}

/// Assemble a file from disk; includes resolve relative to it.
pub fn assemble_file(path: &Path) -> Result<Program, AsmError> {
    let base_dir = path.parent().map(Path::to_path_buf);
    let mut pp = preprocess::Preprocessor::new(base_dir);
    let lines = pp.process_file(path)?;
    assemble_lines(lines)
}

fn assemble_lines(lines: Vec<preprocess::SourceLine>) -> Result<Program, AsmError> {
    let expanded = macros::Expander::new().expand(lines)?;

    let mut token_lines = Vec::with_capacity(expanded.len());
    for line in &expanded {
        let tokens = lexer::tokenize_line(&line.text, &line.file, line.line)?;
        if !tokens.tokens.is_empty() {
            token_lines.push(tokens);
        }
    }

    let mut module = parser::parse(&token_lines)?;
    encoder::encode(&mut module)
}
