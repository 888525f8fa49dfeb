//! Rule-based prompt interpreter.
//!
//! Turns a free-form modification request ("make the ball red") into an
//! updated prompt, given the prompt that produced the current image. The
//! cascade is an ordered list of (matcher, transform) rules evaluated
//! top-to-bottom with first-match-wins semantics; the final generic-append
//! rule matches everything, so `interpret` is total.
//!
//! Ordering matters: later rules are close to supersets of earlier rules'
//! trigger conditions, so specificity decreases monotonically down the list.

use std::sync::LazyLock;

use regex::{NoExpand, Regex};

/// Color tokens recognized by the color-substitution rules.
const COLORS: &[&str] = &[
    "red", "blue", "green", "yellow", "purple", "orange", "pink", "black", "white", "brown",
    "grey", "gray", "cyan", "magenta", "gold", "silver", "bronze", "crimson", "navy", "teal",
    "coral", "violet", "indigo", "turquoise", "maroon", "olive", "beige",
];

/// Style phrases recognized by the style-change rule.
const STYLES: &[&str] = &[
    "photorealistic", "realistic", "cartoon", "anime", "sketch", "watercolor", "oil painting",
    "digital art", "pixel art", "impressionist", "surrealist", "minimalist", "abstract",
    "vintage", "retro", "modern", "futuristic", "cyberpunk", "steampunk", "fantasy", "gothic",
    "baroque", "renaissance", "pop art", "art nouveau", "art deco", "comic book", "manga",
];

/// Conversational filler stripped by the generic-append rule.
const FILLER_PREFIXES: &[&str] = &[
    "please ", "can you ", "i want to ", "i would like to ", "could you ", "try to ",
];

static COLOR_RE: LazyLock<Regex> = LazyLock::new(|| {
    let alternation = COLORS.join("|");
    Regex::new(&format!(r"(?i)\b(?:{alternation})\b")).expect("color regex")
});

static STYLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(?:change\s+to|make\s+it|in)\s+(.+?)\s*style").expect("style regex"));

static STYLE_STRIP_RE: LazyLock<Regex> = LazyLock::new(|| {
    // Longest phrases first so "photorealistic" wins over "realistic" at the
    // same position.
    let mut styles: Vec<&str> = STYLES.to_vec();
    styles.sort_by_key(|s| std::cmp::Reverse(s.len()));
    let alternation = styles
        .iter()
        .map(|s| regex::escape(s))
        .collect::<Vec<_>>()
        .join("|");
    Regex::new(&format!(r"(?i),?\s*(?:in\s+)?(?:{alternation})\s*style")).expect("style strip regex")
});

static BACKGROUND_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:change|set|make)\s+(?:the\s+)?background\s+(?:to\s+)?(.+)")
        .expect("background regex")
});

static BACKGROUND_STRIP_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i),?\s*(?:with\s+)?(?:a\s+)?[\w\s]+\s+background").expect("background strip regex")
});

static REPLACE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)replace\s+(?:the\s+)?(\w+)\s+with\s+(.+)").expect("replace regex"));

static ADD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(?:add|include|put)\s+(.+)").expect("add regex"));

static REMOVE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:remove|delete|take away|get rid of)\s+(?:the\s+)?(.+)").expect("remove regex")
});

static MAKE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)make\s+(?:the\s+)?(\w+)\s+(\w+)").expect("make regex"));

type Rule = fn(&str, &str) -> Option<String>;

/// Priority-ordered cascade; first match wins.
const RULES: &[Rule] = &[
    try_color_change,
    try_style_change,
    try_background_change,
    try_replacement,
    try_addition,
    try_removal,
    try_make_attribute,
];

/// Interpret a modification request against the current prompt.
///
/// Pure, deterministic, and total: every input produces some output, because
/// the generic-append fallback matches everything.
pub fn interpret(current_prompt: &str, modification: &str) -> String {
    for rule in RULES {
        if let Some(updated) = rule(current_prompt, modification) {
            return updated;
        }
    }
    append_modification(current_prompt, modification)
}

/// Rule 1: the modification names a color and the prompt already contains
/// one — swap the first color occurrence in the prompt.
fn try_color_change(prompt: &str, modification: &str) -> Option<String> {
    let new_color = COLOR_RE.find(modification)?.as_str().to_lowercase();
    let existing = COLOR_RE.find(prompt)?;

    let mut out = String::with_capacity(prompt.len());
    out.push_str(&prompt[..existing.start()]);
    out.push_str(&new_color);
    out.push_str(&prompt[existing.end()..]);
    Some(out)
}

/// Rule 2: explicit "... style" phrasing, or a bare style keyword combined
/// with an intensifier. Any previously applied "... style" clause is
/// stripped before the new one is appended.
fn try_style_change(prompt: &str, modification: &str) -> Option<String> {
    if let Some(caps) = STYLE_RE.captures(modification) {
        let new_style = caps[1].trim().to_string();
        let stripped = STYLE_STRIP_RE.replace_all(prompt, "");
        return Some(format!("{}, in {} style", stripped.trim(), new_style));
    }

    let mod_lower = modification.to_lowercase();
    if mod_lower.contains("make it") || mod_lower.contains("more") {
        for style in STYLES {
            if mod_lower.contains(style) {
                return Some(format!("{prompt}, {style}"));
            }
        }
    }
    None
}

/// Rule 3: "change/set/make (the) background (to) X" — drop any existing
/// "... background" clause, append the new one.
fn try_background_change(prompt: &str, modification: &str) -> Option<String> {
    let caps = BACKGROUND_RE.captures(modification)?;
    let new_bg = caps[1].trim().to_string();
    let stripped = BACKGROUND_STRIP_RE.replace_all(prompt, "");
    Some(format!("{}, with {} background", stripped.trim(), new_bg))
}

/// Rule 4: "replace A with B" — substitute the first whole-word occurrence
/// of A if it is present in the prompt.
fn try_replacement(prompt: &str, modification: &str) -> Option<String> {
    let caps = REPLACE_RE.captures(modification)?;
    let old_obj = &caps[1];
    let new_obj = caps[2].trim();
    let pattern = Regex::new(&format!(r"(?i)\b{}\b", regex::escape(old_obj))).ok()?;
    if pattern.is_match(prompt) {
        Some(pattern.replace(prompt, NoExpand(new_obj)).into_owned())
    } else {
        None
    }
}

/// Rule 5: "add/include/put X" — append a "with X" clause.
fn try_addition(prompt: &str, modification: &str) -> Option<String> {
    let caps = ADD_RE.captures(modification)?;
    Some(format!("{prompt}, with {}", caps[1].trim()))
}

/// Rule 6: "remove/delete/take away X" — excise a matching clause, or fall
/// back to a "without X" clause when the object is not literally named in
/// the prompt (it may have been implied by composition).
fn try_removal(prompt: &str, modification: &str) -> Option<String> {
    let caps = REMOVE_RE.captures(modification)?;
    let target = caps[1].trim();
    let pattern =
        Regex::new(&format!(r"(?i),?\s*(?:with\s+)?(?:a\s+)?{}", regex::escape(target))).ok()?;

    let stripped = pattern.replace_all(prompt, "");
    let trimmed = stripped.trim();
    if trimmed.is_empty() || stripped == prompt {
        // Nothing excisable, or excision would leave nothing to render.
        return Some(format!("{prompt}, without {target}"));
    }
    Some(trimmed.to_string())
}

/// Rule 7: "make (the) SUBJECT COLOR" where a color adjective sits directly
/// before SUBJECT in the prompt — replace that adjacent color. Best-effort
/// heuristic; anything else falls through to the generic append.
fn try_make_attribute(prompt: &str, modification: &str) -> Option<String> {
    let caps = MAKE_RE.captures(modification)?;
    let subject = &caps[1];
    let attribute = caps[2].to_lowercase();
    if !COLORS.contains(&attribute.as_str()) {
        return None;
    }

    let pattern = Regex::new(&format!(r"(?i)(\b\w+\s+)?{}", regex::escape(subject))).ok()?;
    let found = pattern.captures(prompt)?;
    let prefix = found.get(1)?;
    let prefix_word = prefix.as_str().trim();
    if COLORS.contains(&prefix_word.to_lowercase().as_str()) {
        return Some(prompt.replacen(prefix_word, &attribute, 1));
    }
    None
}

/// Rule 8 (always matches): strip conversational filler and append the rest
/// as a new clause.
fn append_modification(prompt: &str, modification: &str) -> String {
    let trimmed = modification.trim();
    let mut cleaned = trimmed;
    for prefix in FILLER_PREFIXES {
        if let Some(head) = trimmed.get(..prefix.len()) {
            if head.eq_ignore_ascii_case(prefix) {
                cleaned = &trimmed[prefix.len()..];
                break;
            }
        }
    }
    format!("{prompt}, {cleaned}")
}
