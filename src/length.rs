//! Post length enforcement.
//!
//! The platform counts characters, so every length here is in Unicode
//! scalar values rather than bytes. A body that already fits is returned
//! untouched, which makes [`enforce_length`] idempotent.

/// Marker appended when a body has to be hard-cut.
pub const ELLIPSIS: &str = "...";

/// Smallest body worth keeping next to the suffix: one character plus the ellipsis.
const MIN_BODY: usize = 1 + ELLIPSIS.len();

/// Number of characters in `s`.
pub fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// The first `n` characters of `s`.
fn take_chars(s: &str, n: usize) -> &str {
    match s.char_indices().nth(n) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// The suffix that will actually be appended.
///
/// A suffix so long that no meaningful body fits beside it is dropped.
pub fn effective_suffix(suffix: &str, ceiling: usize) -> &str {
    let suffix = suffix.trim();
    if suffix.is_empty() || char_len(suffix) + 1 + MIN_BODY > ceiling {
        ""
    } else {
        suffix
    }
}

/// Shorten `body` so that `body + " " + suffix` stays within `ceiling`.
///
/// When cutting is needed, the body is cut after the last period inside the
/// allowed prefix; without a period it is hard-truncated and [`ELLIPSIS`] is
/// appended.
pub fn enforce_length(body: &str, suffix: &str, ceiling: usize) -> String {
    let body = body.trim();
    let suffix = effective_suffix(suffix, ceiling);
    let reserved = if suffix.is_empty() {
        0
    } else {
        char_len(suffix) + 1
    };
    let allowed = ceiling.saturating_sub(reserved);

    if char_len(body) <= allowed {
        return body.to_string();
    }

    if allowed < MIN_BODY {
        return take_chars(body, allowed).trim_end().to_string();
    }

    let prefix = take_chars(body, allowed);
    if let Some(idx) = prefix.rfind('.') {
        if !prefix[..idx].trim().is_empty() {
            return prefix[..=idx].to_string();
        }
    }

    let cut = take_chars(body, allowed - ELLIPSIS.len()).trim_end();
    format!("{cut}{ELLIPSIS}")
}

/// Build the final post text: the enforced body followed by the suffix.
pub fn compose_post(body: &str, suffix: &str, ceiling: usize) -> String {
    let body = enforce_length(body, suffix, ceiling);
    let suffix = effective_suffix(suffix, ceiling);
    match (body.is_empty(), suffix.is_empty()) {
        (_, true) => body,
        (true, false) => suffix.to_string(),
        (false, false) => format!("{body} {suffix}"),
    }
}
