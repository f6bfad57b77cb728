//! Macro definition and expansion.
//!
//! `.macro name arg, ...` bodies are collected after preprocessing and
//! expanded before parsing. Labels defined inside a body are mangled with a
//! per-expansion counter so a macro used twice yields distinct labels.

use std::collections::HashMap;

use crate::error::{AsmError, SourcePos};
use crate::preprocess::{SourceLine, substitute_once};

/// Expansion nesting limit (macros may invoke macros).
const MAX_EXPANSION_DEPTH: u32 = 64;

#[derive(Debug, Clone)]
struct MacroDef {
    params: Vec<String>,
    body: Vec<SourceLine>,
    /// Labels defined in the body, mangled per expansion.
    local_labels: Vec<String>,
}

/// Collects `.macro` definitions and expands invocations.
pub struct Expander {
    macros: HashMap<String, MacroDef>,
    counter: u32,
}

impl Default for Expander {
    fn default() -> Self {
        Self::new()
    }
}

impl Expander {
    #[must_use]
    pub fn new() -> Self {
        Self {
            macros: HashMap::new(),
            counter: 0,
        }
    }

    /// Expand all macro definitions and invocations in `lines`.
    pub fn expand(&mut self, lines: Vec<SourceLine>) -> Result<Vec<SourceLine>, AsmError> {
        let mut out = Vec::with_capacity(lines.len());
        let mut iter = lines.into_iter();
        while let Some(line) = iter.next() {
            let trimmed = line.text.trim();
            if let Some(rest) = strip_word(trimmed, ".macro") {
                self.collect_definition(rest, &line, &mut iter)?;
                continue;
            }
            if strip_word(trimmed, ".endm").is_some() {
                return Err(AsmError::syntax(line_pos(&line), "`.endm` without `.macro`"));
            }
            self.emit(line, &mut out, 0)?;
        }
        Ok(out)
    }

    fn collect_definition(
        &mut self,
        header: &str,
        line: &SourceLine,
        iter: &mut impl Iterator<Item = SourceLine>,
    ) -> Result<(), AsmError> {
        let pos = line_pos(line);
        let header = header.trim();
        let (name, params_text) = match header.split_once(char::is_whitespace) {
            Some((n, p)) => (n, p),
            None => (header, ""),
        };
        if name.is_empty() {
            return Err(AsmError::syntax(pos, "expected macro name"));
        }
        let params: Vec<String> = params_text
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect();

        let mut body = Vec::new();
        for body_line in iter.by_ref() {
            let trimmed = body_line.text.trim();
            if strip_word(trimmed, ".endm").is_some() {
                let local_labels = body
                    .iter()
                    .filter_map(|l: &SourceLine| leading_label(&l.text))
                    .collect();
                let def = MacroDef {
                    params,
                    body,
                    local_labels,
                };
                if self.macros.insert(name.to_string(), def).is_some() {
                    return Err(AsmError::DuplicateSymbol {
                        pos,
                        name: name.to_string(),
                    });
                }
                return Ok(());
            }
            if strip_word(trimmed, ".macro").is_some() {
                return Err(AsmError::syntax(line_pos(&body_line), "nested `.macro`"));
            }
            body.push(body_line);
        }
        Err(AsmError::syntax(pos, format!("`.macro {name}` has no `.endm`")))
    }

    fn emit(&mut self, line: SourceLine, out: &mut Vec<SourceLine>, depth: u32) -> Result<(), AsmError> {
        let (label, rest) = split_leading_label(&line.text);
        let Some((name, args_text)) = invocation(rest, &self.macros) else {
            out.push(line);
            return Ok(());
        };
        if depth >= MAX_EXPANSION_DEPTH {
            return Err(AsmError::syntax(
                line_pos(&line),
                format!("macro expansion deeper than {MAX_EXPANSION_DEPTH}"),
            ));
        }

        // A label on the invocation line marks the expansion start.
        if let Some(label) = label {
            out.push(SourceLine {
                file: line.file.clone(),
                line: line.line,
                text: format!("{label}:"),
            });
        }

        let def = self.macros[&name].clone();
        let args = split_args(args_text);
        if args.len() > def.params.len() {
            return Err(AsmError::syntax(
                line_pos(&line),
                format!(
                    "macro `{name}` takes {} argument(s), got {}",
                    def.params.len(),
                    args.len()
                ),
            ));
        }

        self.counter += 1;
        let mut substitutions: HashMap<String, String> = HashMap::new();
        for (i, param) in def.params.iter().enumerate() {
            let value = args.get(i).cloned().unwrap_or_default();
            substitutions.insert(param.clone(), value);
        }
        for local in &def.local_labels {
            substitutions.insert(local.clone(), format!("{local}__{}", self.counter));
        }

        for body_line in &def.body {
            let text = substitute_once(&body_line.text, &substitutions);
            let expanded = SourceLine {
                file: body_line.file.clone(),
                line: body_line.line,
                text,
            };
            // Body lines may themselves invoke macros.
            self.emit(expanded, out, depth + 1)?;
        }
        Ok(())
    }
}

fn line_pos(line: &SourceLine) -> SourcePos {
    SourcePos::line_start(&line.file, line.line)
}

/// If `line` starts with `word` (case-insensitive) at a word boundary,
/// return the remainder.
fn strip_word<'a>(line: &'a str, word: &str) -> Option<&'a str> {
    if line.len() < word.len() || !line[..word.len()].eq_ignore_ascii_case(word) {
        return None;
    }
    let rest = &line[word.len()..];
    if rest.is_empty() || rest.starts_with(char::is_whitespace) {
        Some(rest)
    } else {
        None
    }
}

/// `name:` at the start of a line, if any.
fn leading_label(text: &str) -> Option<String> {
    let (label, _) = split_leading_label(text);
    label
}

fn split_leading_label(text: &str) -> (Option<String>, &str) {
    let trimmed = text.trim_start();
    let mut end = 0;
    for (i, c) in trimmed.char_indices() {
        if c.is_ascii_alphanumeric() || c == '_' {
            end = i + c.len_utf8();
        } else {
            break;
        }
    }
    if end == 0 {
        return (None, trimmed);
    }
    let rest = &trimmed[end..];
    if let Some(after) = rest.strip_prefix(':') {
        let name = &trimmed[..end];
        if name.chars().next().is_some_and(|c| c.is_ascii_alphabetic() || c == '_') {
            return (Some(name.to_string()), after.trim_start());
        }
    }
    (None, trimmed)
}

/// Does this line invoke a known macro? Returns the name and argument text.
fn invocation(rest: &str, macros: &HashMap<String, MacroDef>) -> Option<(String, String)> {
    let trimmed = rest.trim();
    let end = trimmed
        .char_indices()
        .take_while(|(_, c)| c.is_ascii_alphanumeric() || *c == '_')
        .map(|(i, c)| i + c.len_utf8())
        .last()?;
    let word = &trimmed[..end];
    if macros.contains_key(word) {
        Some((word.to_string(), trimmed[end..].trim().to_string()))
    } else {
        None
    }
}

/// Split macro arguments on top-level commas, respecting brackets and quotes.
fn split_args(text: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut depth = 0i32;
    let mut quote: Option<char> = None;
    let mut current = String::new();
    for c in text.chars() {
        if let Some(q) = quote {
            current.push(c);
            if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '"' | '\'' => {
                quote = Some(c);
                current.push(c);
            }
            '[' | '{' | '(' => {
                depth += 1;
                current.push(c);
            }
            ']' | '}' | ')' => {
                depth -= 1;
                current.push(c);
            }
            ',' if depth == 0 => {
                args.push(current.trim().to_string());
                current.clear();
            }
            _ => current.push(c),
        }
    }
    if !current.trim().is_empty() {
        args.push(current.trim().to_string());
    }
    args
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn lines(text: &str) -> Vec<SourceLine> {
        let file: Arc<str> = Arc::from("t.s");
        text.lines()
            .enumerate()
            .map(|(i, l)| SourceLine {
                file: Arc::clone(&file),
                line: i as u32 + 1,
                text: l.to_string(),
            })
            .collect()
    }

    fn expand(text: &str) -> Vec<String> {
        Expander::new()
            .expand(lines(text))
            .unwrap()
            .into_iter()
            .map(|l| l.text.trim().to_string())
            .filter(|l| !l.is_empty())
            .collect()
    }

    #[test]
    fn parameters_substitute_by_name() {
        let out = expand(".macro inc reg, amount\nADD reg, reg, #amount\n.endm\ninc R0, 4\ninc R1, 8\n");
        assert_eq!(out, vec!["ADD R0, R0, #4", "ADD R1, R1, #8"]);
    }

    #[test]
    fn labels_are_mangled_per_expansion() {
        let text = ".macro spin\nloop:\nSUBS R0, R0, #1\nBNE loop\n.endm\nspin\nspin\n";
        let out = expand(text);
        assert_eq!(out[0], "loop__1:");
        assert_eq!(out[2], "BNE loop__1");
        assert_eq!(out[3], "loop__2:");
        assert_eq!(out[5], "BNE loop__2");
    }

    #[test]
    fn label_on_invocation_line_survives() {
        let out = expand(".macro nopish\nMOV R0, R0\n.endm\nentry: nopish\n");
        assert_eq!(out, vec!["entry:", "MOV R0, R0"]);
    }

    #[test]
    fn nested_invocation() {
        let text = ".macro one\nMOV R1, #1\n.endm\n.macro two\none\nMOV R2, #2\n.endm\ntwo\n";
        assert_eq!(expand(text), vec!["MOV R1, #1", "MOV R2, #2"]);
    }

    #[test]
    fn missing_endm_is_an_error() {
        let result = Expander::new().expand(lines(".macro broken\nMOV R0, #1\n"));
        assert!(result.is_err());
    }

    #[test]
    fn too_many_arguments_is_an_error() {
        let result = Expander::new().expand(lines(".macro m a\nMOV a, #1\n.endm\nm R0, R1\n"));
        assert!(result.is_err());
    }
}
