//! Literal prefilter for regex search
//!
//! Derives lowercase substrings that every match of a pattern must
//! contain, so files lacking all of them can be skipped before parsing.
//! When no safe set exists the prefilter is disabled and every file is
//! a candidate. Extraction errs toward shorter literals or none at all:
//! a missing literal only costs time, a wrong one loses matches.
//!
//! Literals are ASCII only. Case-insensitive regex matching folds some
//! non-ASCII characters in ways plain lowercasing does not reproduce
//! (`ς`/`σ`, `µ`/`μ`), so non-ASCII characters end a literal run. File
//! content is folded with [`fold_ascii`], which also maps the two
//! non-ASCII characters that fold onto ASCII letters.

/// Lowercase literals, any one of which must occur in a matching file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Prefilter {
    literals: Vec<String>,
}

impl Prefilter {
    /// Build the prefilter for a regex pattern
    pub fn from_pattern(pattern: &str) -> Self {
        Self {
            literals: extract_literals(pattern).unwrap_or_default(),
        }
    }

    /// A prefilter that lets every file through
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Whether any file can be rejected at all
    pub fn is_enabled(&self) -> bool {
        !self.literals.is_empty()
    }

    /// The extracted literals
    pub fn literals(&self) -> &[String] {
        &self.literals
    }

    /// Check if file content may contain a match
    pub fn matches(&self, data: &[u8]) -> bool {
        if self.literals.is_empty() {
            return true;
        }
        let folded: String = String::from_utf8_lossy(data).chars().map(fold_ascii).collect();
        self.literals.iter().any(|lit| folded.contains(lit.as_str()))
    }
}

/// Extract the prefilter literals of `pattern`
///
/// Returns `None` when some alternation branch has no literal that a
/// match is guaranteed to contain.
pub fn extract_literals(pattern: &str) -> Option<Vec<String>> {
    if has_verbose_flag(pattern) {
        return None;
    }
    let literals = alternation_literals(pattern)?;
    if literals.is_empty() {
        None
    } else {
        Some(literals)
    }
}

/// One literal per top-level branch; wrapped branches are recursed into
fn alternation_literals(pattern: &str) -> Option<Vec<String>> {
    let inner = strip_outer_group(pattern);
    let mut literals = Vec::new();

    for branch in split_top_level(inner) {
        if strip_outer_group(branch).len() != branch.len() {
            literals.extend(alternation_literals(branch)?);
            continue;
        }

        let literal = longest_literal(branch);
        if literal.is_empty() {
            return None;
        }
        literals.push(literal.to_ascii_lowercase());
    }

    Some(literals)
}

/// Remove one enclosing group, including `?:`, `?flags:` and name prefixes
///
/// `(a|b)` → `a|b`, `(?i:a|b)` → `a|b`, `(a)(b)` is left alone.
pub fn strip_outer_group(pattern: &str) -> &str {
    let bytes = pattern.as_bytes();
    if bytes.len() < 2 || bytes[0] != b'(' || bytes[bytes.len() - 1] != b')' {
        return pattern;
    }
    match group_end(bytes, 0) {
        Some(end) if end == bytes.len() - 1 => strip_group_prefix(&pattern[1..end]),
        _ => pattern,
    }
}

fn strip_group_prefix(inner: &str) -> &str {
    let Some(rest) = inner.strip_prefix('?') else {
        return inner;
    };

    if let Some(named) = rest.strip_prefix("P<").or_else(|| rest.strip_prefix('<')) {
        return match named.find('>') {
            Some(close) => &named[close + 1..],
            None => inner,
        };
    }

    let flags_end = rest
        .find(|c: char| !(c.is_ascii_alphabetic() || c == '-'))
        .unwrap_or(rest.len());
    match rest[flags_end..].strip_prefix(':') {
        Some(body) => body,
        // A bare `(?flags)` group matches the empty string
        None if flags_end == rest.len() => "",
        None => inner,
    }
}

/// Split on `|` outside groups and character classes
pub fn split_top_level(pattern: &str) -> Vec<&str> {
    let bytes = pattern.as_bytes();
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 1,
            b'[' => i = class_end(bytes, i).unwrap_or(bytes.len()),
            b'(' => depth += 1,
            b')' => depth = depth.saturating_sub(1),
            b'|' if depth == 0 => {
                parts.push(&pattern[start..i]);
                start = i + 1;
            }
            _ => {}
        }
        i += 1;
    }

    parts.push(&pattern[start..]);
    parts
}

/// Fold a content character the way case-insensitive matching folds it
/// onto ASCII
///
/// `ſ` (long s) and `K` (Kelvin sign) match `s` and `k`. Other non-ASCII
/// characters never occur in a literal and pass through.
pub fn fold_ascii(c: char) -> char {
    match c {
        '\u{017F}' => 's',
        '\u{212A}' => 'k',
        c => c.to_ascii_lowercase(),
    }
}

/// Longest run of characters a match of `branch` must contain verbatim
///
/// Runs also end at spaces, because text blocks of one message are
/// joined with a space that never appears in the file itself.
pub fn longest_literal(branch: &str) -> String {
    let chars: Vec<char> = branch.chars().collect();
    let mut best: Vec<char> = Vec::new();
    let mut current: Vec<char> = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '\\' => match chars.get(i + 1).copied() {
                Some(next) if next.is_ascii_alphanumeric() => {
                    close_run(&mut current, &mut best);
                    i = skip_escape(&chars, i + 1);
                }
                Some(next) if breaks_run(next) => {
                    close_run(&mut current, &mut best);
                    i += 1;
                }
                Some(next) => {
                    current.push(next);
                    i += 1;
                }
                None => close_run(&mut current, &mut best),
            },
            '(' => {
                close_run(&mut current, &mut best);
                match group_end_chars(&chars, i) {
                    Some(end) => i = end,
                    None => break,
                }
            }
            '[' => {
                close_run(&mut current, &mut best);
                match class_end_chars(&chars, i) {
                    Some(end) => i = end,
                    None => break,
                }
            }
            '{' => {
                current.pop();
                close_run(&mut current, &mut best);
                match chars[i..].iter().position(|&ch| ch == '}') {
                    Some(offset) => i += offset,
                    None => break,
                }
            }
            '?' | '*' => {
                current.pop();
                close_run(&mut current, &mut best);
            }
            '+' | '.' | '^' | '$' | '|' | ')' | ']' | '}' => close_run(&mut current, &mut best),
            c if breaks_run(c) => close_run(&mut current, &mut best),
            c => current.push(c),
        }
        i += 1;
    }

    close_run(&mut current, &mut best);
    best.into_iter().collect()
}

fn close_run(current: &mut Vec<char>, best: &mut Vec<char>) {
    if current.len() > best.len() {
        std::mem::swap(current, best);
    }
    current.clear();
}

/// Index of the last character of the escape whose letter is at `i`
fn skip_escape(chars: &[char], i: usize) -> usize {
    let braced = chars.get(i + 1) == Some(&'{');
    match chars[i] {
        'x' | 'u' | 'U' | 'p' | 'P' if braced => chars[i..]
            .iter()
            .position(|&ch| ch == '}')
            .map(|offset| i + offset)
            .unwrap_or(chars.len()),
        'x' => i + 2,
        'u' => i + 4,
        'U' => i + 8,
        'p' | 'P' => i + 1,
        _ => i,
    }
}

/// Characters that cannot be part of a literal run
///
/// JSON-escaped characters (`"`, `\`, controls) differ between decoded
/// text and raw bytes. A space may be the separator between two joined
/// blocks. Non-ASCII characters fold differently under regex matching.
fn breaks_run(c: char) -> bool {
    c == ' ' || c == '"' || c == '\\' || c.is_control() || !c.is_ascii()
}

fn has_verbose_flag(pattern: &str) -> bool {
    pattern.match_indices("(?").any(|(i, _)| {
        pattern[i + 2..]
            .chars()
            .take_while(|c| c.is_ascii_alphabetic() || *c == '-')
            .any(|c| c == 'x')
    })
}

/// Index of the `)` closing the group opened at `open`
fn group_end(bytes: &[u8], open: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut i = open;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 1,
            b'[' => i = class_end(bytes, i)?,
            b'(' => depth += 1,
            b')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
        i += 1;
    }
    None
}

/// Index of the `]` closing the class opened at `open`
fn class_end(bytes: &[u8], open: usize) -> Option<usize> {
    let mut i = open + 1;
    if bytes.get(i) == Some(&b'^') {
        i += 1;
    }
    if bytes.get(i) == Some(&b']') {
        i += 1;
    }
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 1,
            b'[' => {
                if let Some(end) = class_end(bytes, i) {
                    i = end;
                }
            }
            b']' => return Some(i),
            _ => {}
        }
        i += 1;
    }
    None
}

fn group_end_chars(chars: &[char], open: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut i = open;
    while i < chars.len() {
        match chars[i] {
            '\\' => i += 1,
            '[' => i = class_end_chars(chars, i)?,
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
        i += 1;
    }
    None
}

fn class_end_chars(chars: &[char], open: usize) -> Option<usize> {
    let mut i = open + 1;
    if chars.get(i) == Some(&'^') {
        i += 1;
    }
    if chars.get(i) == Some(&']') {
        i += 1;
    }
    while i < chars.len() {
        match chars[i] {
            '\\' => i += 1,
            '[' => {
                if let Some(end) = class_end_chars(chars, i) {
                    i = end;
                }
            }
            ']' => return Some(i),
            _ => {}
        }
        i += 1;
    }
    None
}
