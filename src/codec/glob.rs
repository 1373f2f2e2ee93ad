//! Glob Patterns
//!
//! Store-style glob patterns, as used by `KEYS` and key filters: `*`, `?`,
//! `[...]` classes with `^` negation and `a-z` ranges, and `\` escapes.

use regex::{Regex, RegexBuilder};

/// Characters with a glob meaning.
const GLOB_META: [char; 5] = ['*', '?', '[', ']', '\\'];

/// Compiles a glob pattern into an anchored regex.
///
/// An unterminated `[` matches itself.
pub fn glob_regex(pattern: &str, case_insensitive: bool) -> Result<Regex, regex::Error> {
    let chars: Vec<char> = pattern.chars().collect();
    let mut expr = String::with_capacity(pattern.len() * 2 + 2);
    expr.push('^');

    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '*' => expr.push_str(".*"),
            '?' => expr.push('.'),
            '\\' if i + 1 < chars.len() => {
                i += 1;
                push_literal(&mut expr, chars[i]);
            }
            '[' => match class_end(&chars, i + 1) {
                Some(end) => {
                    push_class(&mut expr, &chars[i + 1..end]);
                    i = end;
                }
                None => push_literal(&mut expr, '['),
            },
            c => push_literal(&mut expr, c),
        }
        i += 1;
    }
    expr.push('$');

    RegexBuilder::new(&expr)
        .case_insensitive(case_insensitive)
        .dot_matches_new_line(true)
        .build()
}

/// Escapes glob syntax so the text only matches itself.
pub fn glob_escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if GLOB_META.contains(&c) {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn push_literal(expr: &mut String, c: char) {
    expr.push_str(&regex::escape(c.encode_utf8(&mut [0; 4])));
}

/// Index of the `]` closing a class whose body starts at `start`.
fn class_end(chars: &[char], start: usize) -> Option<usize> {
    let mut i = start;
    while i < chars.len() {
        match chars[i] {
            '\\' => i += 2,
            ']' => return Some(i),
            _ => i += 1,
        }
    }
    None
}

fn push_class(expr: &mut String, body: &[char]) {
    let (negated, body) = match body.split_first() {
        Some(('^', rest)) => (true, rest),
        _ => (false, body),
    };
    if body.is_empty() {
        // `[]` matches nothing, `[^]` any one character
        expr.push_str(if negated { "." } else { r"[^\s\S]" });
        return;
    }

    expr.push('[');
    if negated {
        expr.push('^');
    }
    let mut i = 0;
    while i < body.len() {
        let start = match body[i] {
            '\\' if i + 1 < body.len() => {
                i += 1;
                body[i]
            }
            c => c,
        };
        if i + 2 < body.len() && body[i + 1] == '-' {
            let end = body[i + 2];
            let (low, high) = if start <= end { (start, end) } else { (end, start) };
            push_literal(expr, low);
            expr.push('-');
            push_literal(expr, high);
            i += 3;
        } else {
            push_literal(expr, start);
            i += 1;
        }
    }
    expr.push(']');
}
