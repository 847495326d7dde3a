//! Path patterns declared by installed components' intent filters.

use regex::Regex;
use serde::Serialize;
use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum PatternKind {
    Literal,
    Prefix,
    SimpleGlob,
    AdvancedGlob,
}

impl PatternKind {
    /// Map the label used in `PatternMatcher{LABEL: path}` dumps.
    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "LITERAL" => Some(PatternKind::Literal),
            "PREFIX" => Some(PatternKind::Prefix),
            "GLOB" => Some(PatternKind::SimpleGlob),
            "ADVANCED" => Some(PatternKind::AdvancedGlob),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IntentFilterPattern {
    pub path: String,
    pub kind: PatternKind,
}

impl IntentFilterPattern {
    pub fn new(path: impl Into<String>, kind: PatternKind) -> Self {
        Self { path: path.into(), kind }
    }

    pub fn matches(&self, candidate: &str) -> bool {
        match self.kind {
            PatternKind::Literal => self.path == candidate,
            PatternKind::Prefix => candidate.starts_with(&self.path),
            PatternKind::SimpleGlob => glob_regex(&self.path, false)
                .map(|re| re.is_match(candidate))
                .unwrap_or(false),
            PatternKind::AdvancedGlob => glob_regex(&self.path, true)
                .map(|re| re.is_match(candidate))
                .unwrap_or(false),
        }
    }
}

/// Translate a glob into an anchored regex.
///
/// Simple globs: `.` is any char, `*` repeats the previous atom, `\` escapes.
/// Advanced globs additionally allow `+`, `[...]` classes and `{m,n}` ranges.
fn glob_regex(pattern: &str, advanced: bool) -> Option<Regex> {
    let mut out = String::from("^(?:");
    let mut chars = pattern.chars();
    let mut has_atom = false;

    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                let escaped = chars.next()?;
                out.push_str(&regex::escape(&escaped.to_string()));
                has_atom = true;
            }
            '.' => {
                out.push('.');
                has_atom = true;
            }
            '*' if has_atom => out.push('*'),
            '+' if advanced && has_atom => out.push('+'),
            '[' if advanced => {
                out.push('[');
                for c in chars.by_ref() {
                    if c == '\\' || c == '[' {
                        out.push('\\');
                    }
                    out.push(c);
                    if c == ']' {
                        break;
                    }
                }
                has_atom = true;
            }
            '{' if advanced && has_atom => {
                out.push('{');
                for c in chars.by_ref() {
                    out.push(c);
                    if c == '}' {
                        break;
                    }
                }
            }
            other => {
                out.push_str(&regex::escape(&other.to_string()));
                has_atom = true;
            }
        }
    }
    out.push_str(")$");
    Regex::new(&out).ok()
}

fn dump_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"PatternMatcher\{(LITERAL|PREFIX|GLOB|ADVANCED|SUFFIX): ([^}]*)\}").expect("valid regex")
    })
}

/// Extract path patterns from `dumpsys package <pkg>` output, in order,
/// without duplicates. Pattern types with no `PatternKind` are skipped.
pub fn parse_pattern_dump(text: &str) -> Vec<IntentFilterPattern> {
    let mut out: Vec<IntentFilterPattern> = Vec::new();
    for caps in dump_regex().captures_iter(text) {
        let Some(kind) = PatternKind::from_label(&caps[1]) else { continue };
        let pattern = IntentFilterPattern::new(&caps[2], kind);
        if !out.contains(&pattern) {
            out.push(pattern);
        }
    }
    out
}
