//! Preprocessor: `%define`, `%macro`, `%rep`, and conditional assembly.
//!
//! Runs over the source text before the lexer. When the input contains no
//! `%` directives at all the source is passed through borrowed, without
//! copying.
//!
//! Supported directives:
//! - `%define NAME value…` — object-like token replacement
//! - `%macro name nparams` … `%endmacro` — `%1`…`%9` positional parameters
//! - `%rep count` … `%endrep` — repetition
//! - `%if const-expr` / `%ifdef NAME` / `%ifndef NAME` / `%else` /
//!   `%endif` — conditional inclusion (the condition is evaluated after
//!   `%define` substitution and must reduce to an integer)

use alloc::borrow::Cow;
use alloc::collections::BTreeMap;
use alloc::format;
use alloc::string::{String, ToString};
use alloc::vec::Vec;

use crate::error::{AsmError, Span};

/// A user-defined multi-line macro.
#[derive(Debug, Clone)]
struct MacroDef {
    params: usize,
    body: Vec<String>,
}

/// The text preprocessor.
#[derive(Debug, Default)]
pub struct Preprocessor {
    defines: BTreeMap<String, String>,
    macros: BTreeMap<String, MacroDef>,
    /// Guard against runaway `%rep` expansion (expanded output bytes).
    max_expanded_bytes: usize,
}

impl Preprocessor {
    /// Create a preprocessor with default limits.
    #[must_use]
    pub fn new() -> Self {
        Self {
            defines: BTreeMap::new(),
            macros: BTreeMap::new(),
            max_expanded_bytes: 8 * 1024 * 1024,
        }
    }

    /// Predefine a symbol (as if by `%define`).
    pub fn define(&mut self, name: &str, value: &str) {
        self.defines.insert(name.to_string(), value.to_string());
    }

    /// Expand the source text.
    ///
    /// # Errors
    ///
    /// Returns `AsmError::Syntax` for malformed or unterminated directives
    /// and `AsmError::ResourceLimitExceeded` when expansion explodes.
    pub fn process<'a>(&mut self, source: &'a str) -> Result<Cow<'a, str>, AsmError> {
        if !source.contains('%') {
            return Ok(Cow::Borrowed(source));
        }

        let lines: Vec<&str> = source.lines().collect();
        let mut out = String::with_capacity(source.len());
        self.expand_block(&lines, 1, &mut out, 0)?;
        Ok(Cow::Owned(out))
    }

    fn expand_block(
        &mut self,
        lines: &[&str],
        first_line_no: u32,
        out: &mut String,
        depth: usize,
    ) -> Result<(), AsmError> {
        if depth > 64 {
            return Err(AsmError::ResourceLimitExceeded {
                resource: String::from("preprocessor recursion depth"),
                limit: 64,
            });
        }

        let mut i = 0;
        while i < lines.len() {
            let line_no = first_line_no + i as u32;
            let line = lines[i];
            let trimmed = strip_comment(line).trim();

            if let Some(rest) = trimmed.strip_prefix('%') {
                let (word, tail) = split_word(rest);
                match word {
                    "define" => {
                        let (name, value) = split_word(tail);
                        if name.is_empty() {
                            return Err(syntax("%define needs a name", line_no));
                        }
                        let value = self.substitute(value);
                        self.defines.insert(name.to_string(), value);
                        i += 1;
                    }
                    "macro" => {
                        let (name, count) = split_word(tail);
                        let params: usize = count.trim().parse().map_err(|_| {
                            syntax("%macro needs a parameter count", line_no)
                        })?;
                        let (body, consumed) =
                            collect_until(lines, i + 1, "%endmacro", line_no)?;
                        self.macros.insert(
                            name.to_string(),
                            MacroDef {
                                params,
                                body,
                            },
                        );
                        i = consumed;
                    }
                    "rep" => {
                        let count = self
                            .eval_const(tail)
                            .ok_or_else(|| syntax("%rep needs a constant count", line_no))?;
                        if count < 0 {
                            return Err(syntax("%rep count is negative", line_no));
                        }
                        let (body, consumed) = collect_until(lines, i + 1, "%endrep", line_no)?;
                        let body_refs: Vec<&str> = body.iter().map(String::as_str).collect();
                        for _ in 0..count {
                            if out.len() > self.max_expanded_bytes {
                                return Err(AsmError::ResourceLimitExceeded {
                                    resource: String::from("expanded source bytes"),
                                    limit: self.max_expanded_bytes,
                                });
                            }
                            self.expand_block(&body_refs, line_no + 1, out, depth + 1)?;
                        }
                        i = consumed;
                    }
                    "if" | "ifdef" | "ifndef" => {
                        let taken = match word {
                            "ifdef" => self.defines.contains_key(tail.trim()),
                            "ifndef" => !self.defines.contains_key(tail.trim()),
                            _ => self
                                .eval_const(tail)
                                .ok_or_else(|| {
                                    syntax("%if condition is not a constant", line_no)
                                })?
                                != 0,
                        };
                        let (then_block, else_block, consumed) =
                            collect_conditional(lines, i + 1, line_no)?;
                        let chosen = if taken { then_block } else { else_block };
                        let refs: Vec<&str> = chosen.iter().map(String::as_str).collect();
                        self.expand_block(&refs, line_no + 1, out, depth + 1)?;
                        i = consumed;
                    }
                    "endmacro" | "endrep" | "endif" | "else" => {
                        return Err(syntax(
                            &format!("'%{}' without matching opener", word),
                            line_no,
                        ));
                    }
                    other => {
                        return Err(syntax(&format!("unknown directive '%{}'", other), line_no));
                    }
                }
                continue;
            }

            // Macro invocation?
            let (head, tail) = split_word(trimmed);
            if !head.is_empty() {
                if let Some(mac) = self.macros.get(head).cloned() {
                    let args = split_args(tail);
                    if args.len() != mac.params {
                        return Err(syntax(
                            &format!(
                                "macro '{}' expects {} argument(s), got {}",
                                head,
                                mac.params,
                                args.len()
                            ),
                            line_no,
                        ));
                    }
                    let expanded: Vec<String> = mac
                        .body
                        .iter()
                        .map(|l| substitute_params(l, &args))
                        .collect();
                    let refs: Vec<&str> = expanded.iter().map(String::as_str).collect();
                    self.expand_block(&refs, line_no, out, depth + 1)?;
                    i += 1;
                    continue;
                }
            }

            out.push_str(&self.substitute(line));
            out.push('\n');
            i += 1;
        }
        Ok(())
    }

    /// Apply `%define` replacements to a line, on identifier boundaries.
    fn substitute(&self, line: &str) -> String {
        if self.defines.is_empty() {
            return line.to_string();
        }
        let mut out = String::with_capacity(line.len());
        let bytes = line.as_bytes();
        let mut i = 0;
        while i < bytes.len() {
            let b = bytes[i];
            if b.is_ascii_alphabetic() || b == b'_' || b == b'.' {
                let start = i;
                while i < bytes.len()
                    && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_' || bytes[i] == b'.')
                {
                    i += 1;
                }
                let word = &line[start..i];
                match self.defines.get(word) {
                    Some(replacement) => out.push_str(replacement),
                    None => out.push_str(word),
                }
            } else if b == b'\'' || b == b'"' {
                // Do not substitute inside string literals.
                let quote = b;
                let start = i;
                i += 1;
                while i < bytes.len() && bytes[i] != quote {
                    i += 1;
                }
                i = (i + 1).min(bytes.len());
                out.push_str(&line[start..i]);
            } else if b == b';' {
                out.push_str(&line[i..]);
                break;
            } else {
                out.push(b as char);
                i += 1;
            }
        }
        out
    }

    /// Evaluate a directive operand to an integer after substitution.
    fn eval_const(&self, text: &str) -> Option<i64> {
        let text = self.substitute(text.trim());
        parse_int(text.trim())
    }
}

fn syntax(msg: &str, line: u32) -> AsmError {
    AsmError::Syntax {
        msg: msg.to_string(),
        span: Span::new(line, 1, 0, 0),
    }
}

fn strip_comment(line: &str) -> &str {
    match line.find(';') {
        Some(pos) => &line[..pos],
        None => line,
    }
}

fn split_word(text: &str) -> (&str, &str) {
    let text = text.trim_start();
    match text.find(|c: char| c.is_whitespace()) {
        Some(pos) => (&text[..pos], text[pos..].trim_start()),
        None => (text, ""),
    }
}

fn split_args(text: &str) -> Vec<String> {
    let text = text.trim();
    if text.is_empty() {
        return Vec::new();
    }
    text.split(',').map(|a| a.trim().to_string()).collect()
}

/// Replace `%1`…`%9` with macro arguments.
fn substitute_params(line: &str, args: &[String]) -> String {
    let mut out = String::with_capacity(line.len());
    let bytes = line.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 1 < bytes.len() && bytes[i + 1].is_ascii_digit() {
            let n = (bytes[i + 1] - b'0') as usize;
            if n >= 1 && n <= args.len() {
                out.push_str(&args[n - 1]);
            }
            i += 2;
        } else {
            out.push(bytes[i] as char);
            i += 1;
        }
    }
    out
}

/// Collect lines until a closing directive, returning the body and the
/// index just past the closer.
fn collect_until(
    lines: &[&str],
    start: usize,
    closer: &str,
    opened_at: u32,
) -> Result<(Vec<String>, usize), AsmError> {
    let mut body = Vec::new();
    let mut depth = 0usize;
    let opener = match closer {
        "%endmacro" => "%macro",
        "%endrep" => "%rep",
        _ => "%if",
    };
    for (i, line) in lines.iter().enumerate().skip(start) {
        let trimmed = strip_comment(line).trim();
        if trimmed.starts_with(opener) {
            depth += 1;
        }
        if trimmed == closer {
            if depth == 0 {
                return Ok((body, i + 1));
            }
            depth -= 1;
        }
        body.push((*line).to_string());
    }
    Err(syntax(&format!("missing '{}'", closer), opened_at))
}

/// Collect a conditional block, splitting at a top-level `%else`.
fn collect_conditional(
    lines: &[&str],
    start: usize,
    opened_at: u32,
) -> Result<(Vec<String>, Vec<String>, usize), AsmError> {
    let mut then_block = Vec::new();
    let mut else_block = Vec::new();
    let mut in_else = false;
    let mut depth = 0usize;
    for (i, line) in lines.iter().enumerate().skip(start) {
        let trimmed = strip_comment(line).trim();
        if trimmed.starts_with("%if") {
            depth += 1;
        }
        if trimmed == "%endif" {
            if depth == 0 {
                return Ok((then_block, else_block, i + 1));
            }
            depth -= 1;
        }
        if trimmed == "%else" && depth == 0 {
            in_else = true;
            continue;
        }
        if in_else {
            else_block.push((*line).to_string());
        } else {
            then_block.push((*line).to_string());
        }
    }
    Err(syntax("missing '%endif'", opened_at))
}

/// Parse an integer literal (decimal, `0x`, `0b`, optional leading `-`).
fn parse_int(text: &str) -> Option<i64> {
    let (neg, digits) = match text.strip_prefix('-') {
        Some(rest) => (true, rest.trim()),
        None => (false, text),
    };
    let value = if let Some(hex) = digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X")) {
        i64::from_str_radix(hex, 16).ok()?
    } else if let Some(bin) = digits.strip_prefix("0b").or_else(|| digits.strip_prefix("0B")) {
        i64::from_str_radix(bin, 2).ok()?
    } else {
        digits.parse().ok()?
    };
    Some(if neg { -value } else { value })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn process(src: &str) -> String {
        Preprocessor::new().process(src).unwrap().into_owned()
    }

    #[test]
    fn passthrough_borrows_when_no_directives() {
        let mut pp = Preprocessor::new();
        let src = "mov ax, 5\nnop\n";
        assert!(matches!(pp.process(src).unwrap(), Cow::Borrowed(_)));
    }

    #[test]
    fn define_substitution() {
        let out = process("%define WIDTH 320\nmov ax, WIDTH\n");
        assert_eq!(out, "mov ax, 320\n");
    }

    #[test]
    fn define_does_not_touch_substrings() {
        let out = process("%define AX 1\nmov eax, MAXIMUM\n");
        // `AX` must not fire inside `eax` or `MAXIMUM`.
        assert_eq!(out, "mov eax, MAXIMUM\n");
    }

    #[test]
    fn define_does_not_touch_strings() {
        let out = process("%define HI 1\ndb 'HI'\n");
        assert_eq!(out, "db 'HI'\n");
    }

    #[test]
    fn macro_expansion() {
        let out = process("%macro store 2\nmov word [%1], %2\n%endmacro\nstore 0x10, 3\n");
        assert_eq!(out, "mov word [0x10], 3\n");
    }

    #[test]
    fn macro_wrong_arity_is_rejected() {
        let err = Preprocessor::new()
            .process("%macro pair 2\nnop\n%endmacro\npair 1\n")
            .unwrap_err();
        assert_eq!(err.code(), "SYNTAX_ERROR");
    }

    #[test]
    fn rep_expansion() {
        let out = process("%rep 3\nnop\n%endrep\n");
        assert_eq!(out, "nop\nnop\nnop\n");
    }

    #[test]
    fn conditional_if() {
        let out = process("%if 1\nnop\n%else\nhlt\n%endif\n");
        assert_eq!(out, "nop\n");
        let out = process("%if 0\nnop\n%else\nhlt\n%endif\n");
        assert_eq!(out, "hlt\n");
    }

    #[test]
    fn conditional_ifdef() {
        let out = process("%define DEBUG 1\n%ifdef DEBUG\nint3\n%endif\n");
        assert_eq!(out, "int3\n");
        let out = process("%ifndef DEBUG\nnop\n%endif\n");
        assert_eq!(out, "nop\n");
    }

    #[test]
    fn unterminated_macro_is_rejected() {
        let err = Preprocessor::new().process("%macro m 0\nnop\n").unwrap_err();
        assert_eq!(err.code(), "SYNTAX_ERROR");
    }

    #[test]
    fn unknown_directive_is_rejected() {
        let err = Preprocessor::new().process("%frobnicate\n").unwrap_err();
        assert_eq!(err.code(), "SYNTAX_ERROR");
    }

    #[test]
    fn nested_rep() {
        let out = process("%rep 2\n%rep 2\nnop\n%endrep\n%endrep\n");
        assert_eq!(out, "nop\nnop\nnop\nnop\n");
    }
}
