//! Preprocessor: `.include`, conditional assembly, and `#define`.
//!
//! Runs on comment-stripped text before tokenization. Include paths resolve
//! relative to the including file and must stay inside the base directory;
//! nesting is capped so a self-including file cannot expand forever.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{AsmError, SourcePos};
use crate::expr;
use crate::lexer;

/// Maximum `.include` nesting depth.
pub const MAX_INCLUDE_DEPTH: u32 = 100;

/// One preprocessed line, still plain text, tagged with its origin.
#[derive(Debug, Clone)]
pub struct SourceLine {
    pub file: Arc<str>,
    pub line: u32,
    pub text: String,
}

/// Preprocessor state: defines persist across includes.
pub struct Preprocessor {
    base_dir: Option<PathBuf>,
    defines: HashMap<String, String>,
}

struct CondFrame {
    /// This branch is being emitted.
    active: bool,
    /// Whether any branch of this if-chain has been taken.
    taken: bool,
    /// `.else` already seen.
    seen_else: bool,
}

impl Preprocessor {
    /// Create a preprocessor. `base_dir` bounds `.include` resolution; when
    /// `None`, includes are rejected.
    #[must_use]
    pub fn new(base_dir: Option<PathBuf>) -> Self {
        Self {
            base_dir,
            defines: HashMap::new(),
        }
    }

    /// Preprocess a file from disk.
    pub fn process_file(&mut self, path: &Path) -> Result<Vec<SourceLine>, AsmError> {
        let text = fs::read_to_string(path).map_err(|source| AsmError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let name: Arc<str> = Arc::from(path.display().to_string().as_str());
        let dir = path.parent().map(Path::to_path_buf);
        let mut out = Vec::new();
        self.process_text(&text, &name, dir.as_deref(), 0, &mut out)?;
        Ok(out)
    }

    /// Preprocess in-memory source (tests, embedders).
    pub fn process_str(&mut self, text: &str, name: &str) -> Result<Vec<SourceLine>, AsmError> {
        let name: Arc<str> = Arc::from(name);
        let dir = self.base_dir.clone();
        let mut out = Vec::new();
        self.process_text(text, &name, dir.as_deref(), 0, &mut out)?;
        Ok(out)
    }

    fn process_text(
        &mut self,
        text: &str,
        file: &Arc<str>,
        dir: Option<&Path>,
        depth: u32,
        out: &mut Vec<SourceLine>,
    ) -> Result<(), AsmError> {
        let stripped = lexer::strip_comments(text);
        let mut conds: Vec<CondFrame> = Vec::new();

        for (idx, raw) in stripped.lines().enumerate() {
            let line_no = idx as u32 + 1;
            let pos = SourcePos::line_start(file, line_no);
            let trimmed = raw.trim();
            let emitting = conds.iter().all(|c| c.active);

            // Conditional directives are honoured even in dead branches so
            // nesting stays balanced.
            if let Some(rest) = strip_keyword(trimmed, ".if") {
                let active = emitting && self.eval_condition(rest, &pos)?;
                conds.push(CondFrame {
                    active,
                    taken: active,
                    seen_else: false,
                });
                continue;
            }
            if let Some(rest) = strip_keyword(trimmed, ".ifdef") {
                let active = emitting && self.defines.contains_key(rest.trim());
                conds.push(CondFrame {
                    active,
                    taken: active,
                    seen_else: false,
                });
                continue;
            }
            if let Some(rest) = strip_keyword(trimmed, ".ifndef") {
                let active = emitting && !self.defines.contains_key(rest.trim());
                conds.push(CondFrame {
                    active,
                    taken: active,
                    seen_else: false,
                });
                continue;
            }
            if trimmed.eq_ignore_ascii_case(".else") {
                let parent_active = conds
                    .iter()
                    .rev()
                    .skip(1)
                    .all(|c| c.active);
                match conds.last_mut() {
                    Some(frame) if !frame.seen_else => {
                        frame.seen_else = true;
                        frame.active = parent_active && !frame.taken;
                        frame.taken |= frame.active;
                    }
                    _ => return Err(AsmError::syntax(pos, "`.else` without `.if`")),
                }
                continue;
            }
            if trimmed.eq_ignore_ascii_case(".endif") {
                if conds.pop().is_none() {
                    return Err(AsmError::syntax(pos, "`.endif` without `.if`"));
                }
                continue;
            }

            if !emitting {
                continue;
            }

            if let Some(rest) = strip_keyword(trimmed, "#define") {
                let rest = rest.trim();
                let (name, value) = match rest.split_once(char::is_whitespace) {
                    Some((n, v)) => (n, v.trim().to_string()),
                    None if !rest.is_empty() => (rest, "1".to_string()),
                    None => return Err(AsmError::syntax(pos, "expected name after `#define`")),
                };
                if !is_identifier(name) {
                    return Err(AsmError::syntax(pos, format!("bad define name `{name}`")));
                }
                self.defines.insert(name.to_string(), value);
                continue;
            }

            let substituted = self.substitute(raw);

            if let Some(rest) = strip_keyword(substituted.trim(), ".include") {
                let target = parse_include_path(rest, &pos)?;
                let lines = self.load_include(&target, dir, &pos, depth)?;
                out.extend(lines);
                continue;
            }

            out.push(SourceLine {
                file: Arc::clone(file),
                line: line_no,
                text: substituted,
            });
        }

        if !conds.is_empty() {
            return Err(AsmError::syntax(
                SourcePos::line_start(file, stripped.lines().count() as u32),
                "unterminated `.if`",
            ));
        }
        Ok(())
    }

    fn load_include(
        &mut self,
        target: &str,
        dir: Option<&Path>,
        pos: &SourcePos,
        depth: u32,
    ) -> Result<Vec<SourceLine>, AsmError> {
        if depth + 1 > MAX_INCLUDE_DEPTH {
            return Err(AsmError::IncludeDepth {
                pos: pos.clone(),
                limit: MAX_INCLUDE_DEPTH,
            });
        }
        let Some(base) = self.base_dir.clone() else {
            return Err(AsmError::IncludeEscape {
                pos: pos.clone(),
                path: target.to_string(),
            });
        };
        // Textual `..` components are rejected before touching the
        // filesystem; canonical containment is checked after.
        let rel = Path::new(target);
        if rel.components().any(|c| matches!(c, std::path::Component::ParentDir)) || rel.is_absolute()
        {
            return Err(AsmError::IncludeEscape {
                pos: pos.clone(),
                path: target.to_string(),
            });
        }
        let resolved = dir.unwrap_or(&base).join(rel);
        let canon = resolved.canonicalize().map_err(|source| AsmError::Io {
            path: resolved.display().to_string(),
            source,
        })?;
        let canon_base = base.canonicalize().map_err(|source| AsmError::Io {
            path: base.display().to_string(),
            source,
        })?;
        if !canon.starts_with(&canon_base) {
            return Err(AsmError::IncludeEscape {
                pos: pos.clone(),
                path: target.to_string(),
            });
        }

        let text = fs::read_to_string(&canon).map_err(|source| AsmError::Io {
            path: canon.display().to_string(),
            source,
        })?;
        let name: Arc<str> = Arc::from(target);
        let sub_dir = canon.parent().map(Path::to_path_buf);
        let mut out = Vec::new();
        self.process_text(&text, &name, sub_dir.as_deref(), depth + 1, &mut out)?;
        Ok(out)
    }

    /// Whole-word textual substitution of defines, iterated to a fixpoint so
    /// defines may reference each other.
    fn substitute(&self, line: &str) -> String {
        let mut current = line.to_string();
        for _ in 0..8 {
            let next = substitute_once(&current, &self.defines);
            if next == current {
                break;
            }
            current = next;
        }
        current
    }

    fn eval_condition(&self, rest: &str, pos: &SourcePos) -> Result<bool, AsmError> {
        let substituted = self.substitute(rest);
        let line = lexer::tokenize_line(&substituted, &pos.file, pos.line)?;
        if line.tokens.is_empty() {
            return Err(AsmError::syntax(pos.clone(), "expected expression after `.if`"));
        }
        let mut idx = 0;
        let parsed = expr::parse(&line.tokens, &mut idx)?;
        if idx != line.tokens.len() {
            return Err(AsmError::syntax(pos.clone(), "trailing tokens after `.if` expression"));
        }
        Ok(parsed.eval(&|_| None)? != 0)
    }
}

/// If `line` starts with `keyword` followed by whitespace or end-of-line,
/// return the remainder.
fn strip_keyword<'a>(line: &'a str, keyword: &str) -> Option<&'a str> {
    if line.len() < keyword.len() || !line[..keyword.len()].eq_ignore_ascii_case(keyword) {
        return None;
    }
    let rest = &line[keyword.len()..];
    if rest.is_empty() || rest.starts_with(char::is_whitespace) {
        Some(rest)
    } else {
        None
    }
}

fn is_identifier(s: &str) -> bool {
    !s.is_empty()
        && s.chars().next().is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn parse_include_path(rest: &str, pos: &SourcePos) -> Result<String, AsmError> {
    let rest = rest.trim();
    let inner = rest
        .strip_prefix('"')
        .and_then(|r| r.strip_suffix('"'))
        .ok_or_else(|| AsmError::syntax(pos.clone(), "expected quoted path after `.include`"))?;
    if inner.is_empty() {
        return Err(AsmError::syntax(pos.clone(), "empty include path"));
    }
    Ok(inner.to_string())
}

/// Whole-word substitution pass shared with the macro expander.
pub(crate) fn substitute_once(line: &str, defines: &HashMap<String, String>) -> String {
    let bytes = line.as_bytes();
    let mut out = String::with_capacity(line.len());
    let mut i = 0;
    let mut in_quote: Option<u8> = None;
    while i < bytes.len() {
        let c = bytes[i];
        if let Some(q) = in_quote {
            out.push(c as char);
            if c == b'\\' && i + 1 < bytes.len() {
                out.push(bytes[i + 1] as char);
                i += 2;
                continue;
            }
            if c == q {
                in_quote = None;
            }
            i += 1;
            continue;
        }
        match c {
            b'"' | b'\'' => {
                in_quote = Some(c);
                out.push(c as char);
                i += 1;
            }
            b'A'..=b'Z' | b'a'..=b'z' | b'_' => {
                let start = i;
                while i < bytes.len()
                    && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_')
                {
                    i += 1;
                }
                let word = &line[start..i];
                match defines.get(word) {
                    Some(value) => out.push_str(value),
                    None => out.push_str(word),
                }
            }
            _ => {
                out.push(c as char);
                i += 1;
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(text: &str) -> Vec<String> {
        let mut pp = Preprocessor::new(None);
        pp.process_str(text, "t.s")
            .unwrap()
            .into_iter()
            .map(|l| l.text.trim().to_string())
            .filter(|l| !l.is_empty())
            .collect()
    }

    #[test]
    fn define_substitutes_whole_words() {
        let lines = run("#define COUNT 10\nMOV R0, #COUNT\nMOV R1, #COUNTER\n");
        assert_eq!(lines, vec!["MOV R0, #10", "MOV R1, #COUNTER"]);
    }

    #[test]
    fn define_chains_resolve() {
        let lines = run("#define A 2\n#define B A+1\nMOV R0, #B\n");
        assert_eq!(lines, vec!["MOV R0, #2+1"]);
    }

    #[test]
    fn conditionals_select_branches() {
        let lines = run(".if 1\nMOV R0, #1\n.else\nMOV R0, #2\n.endif\n");
        assert_eq!(lines, vec!["MOV R0, #1"]);
        let lines = run(".if 2 > 3\nMOV R0, #1\n.else\nMOV R0, #2\n.endif\n");
        assert_eq!(lines, vec!["MOV R0, #2"]);
    }

    #[test]
    fn ifdef_and_nesting() {
        let text = "#define DEBUG\n.ifdef DEBUG\n.ifndef QUIET\nMOV R0, #1\n.endif\n.endif\n";
        assert_eq!(run(text), vec!["MOV R0, #1"]);
    }

    #[test]
    fn dead_branch_skips_defines() {
        let lines = run(".if 0\n#define X 1\n.endif\n.ifdef X\nMOV R0, #1\n.endif\nMOV R1, #2\n");
        assert_eq!(lines, vec!["MOV R1, #2"]);
    }

    #[test]
    fn unterminated_if_is_an_error() {
        let mut pp = Preprocessor::new(None);
        assert!(pp.process_str(".if 1\nMOV R0, #1\n", "t.s").is_err());
    }

    #[test]
    fn include_without_base_dir_is_rejected() {
        let mut pp = Preprocessor::new(None);
        assert!(pp.process_str(".include \"other.s\"\n", "t.s").is_err());
    }

    #[test]
    fn include_with_dotdot_is_rejected() {
        let mut pp = Preprocessor::new(Some(std::env::temp_dir()));
        let err = pp
            .process_str(".include \"../etc/passwd\"\n", "t.s")
            .unwrap_err();
        assert!(matches!(err, AsmError::IncludeEscape { .. }));
    }
}
