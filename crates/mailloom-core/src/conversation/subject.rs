//! Subject normalization for the conversation fallback.

/// Reply and forward markers, compared case-insensitively.
const PREFIXES: &[&str] = &["re", "fwd", "fw", "aw", "sv", "antw", "wg", "tr"];

/// Reduces a subject to the key used to group messages without explicit
/// references.
///
/// Leading reply/forward markers (`Re:`, `Fwd:`, `Re[2]:`, repeated and
/// mixed), mailing-list tags such as `[dev]` and surrounding whitespace are
/// removed; inner whitespace is collapsed and the result lowercased.
/// Returns `None` when nothing meaningful is left.
#[must_use]
pub fn normalize_subject(subject: &str) -> Option<String> {
    let mut rest = subject.trim();
    loop {
        let stripped = strip_list_tag(rest).or_else(|| strip_marker(rest));
        match stripped {
            Some(next) => rest = next.trim_start(),
            None => break,
        }
    }

    let normalized = rest
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();
    (!normalized.is_empty()).then_some(normalized)
}

fn strip_list_tag(s: &str) -> Option<&str> {
    let inner = s.strip_prefix('[')?;
    let close = inner.find(']')?;
    let tag = &inner[..close];
    // `[PATCH 1/2] foo` and `[dev] foo` are both tags, but a bracket that
    // swallows the whole subject is content.
    let rest = &inner[close + 1..];
    (!tag.is_empty() && !rest.trim().is_empty()).then_some(rest)
}

fn strip_marker(s: &str) -> Option<&str> {
    let word_end = s.find(|c: char| !c.is_ascii_alphabetic()).unwrap_or(s.len());
    let word = &s[..word_end];
    if !PREFIXES.iter().any(|p| p.eq_ignore_ascii_case(word)) {
        return None;
    }
    let mut rest = &s[word_end..];
    // `Re[2]:` and `Re(2):` counters.
    for (open, close) in [('[', ']'), ('(', ')')] {
        if let Some(inner) = rest.strip_prefix(open)
            && let Some(end) = inner.find(close)
            && inner[..end].chars().all(|c| c.is_ascii_digit())
        {
            rest = &inner[end + 1..];
        }
    }
    let rest = rest.trim_start();
    rest.strip_prefix(':').or_else(|| rest.strip_prefix('\u{ff1a}'))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn strips_reply_markers() {
        assert_eq!(normalize_subject("Re: Lunch").as_deref(), Some("lunch"));
        assert_eq!(normalize_subject("RE: re: Fwd: Lunch").as_deref(), Some("lunch"));
        assert_eq!(normalize_subject("Re[3]: Lunch").as_deref(), Some("lunch"));
        assert_eq!(normalize_subject("AW: Sv: Lunch").as_deref(), Some("lunch"));
        assert_eq!(normalize_subject("Fw : Lunch").as_deref(), Some("lunch"));
    }

    #[test]
    fn strips_list_tags() {
        assert_eq!(normalize_subject("[dev] Re: Release  plan").as_deref(), Some("release plan"));
        assert_eq!(normalize_subject("Re: [dev] Release plan").as_deref(), Some("release plan"));
        assert_eq!(normalize_subject("[only a tag]").as_deref(), Some("[only a tag]"));
    }

    #[test]
    fn keeps_words_that_merely_start_like_markers() {
        assert_eq!(normalize_subject("Review notes").as_deref(), Some("review notes"));
        assert_eq!(normalize_subject("Reminder: standup").as_deref(), Some("reminder: standup"));
    }

    #[test]
    fn empty_subjects_have_no_key() {
        assert_eq!(normalize_subject(""), None);
        assert_eq!(normalize_subject("   "), None);
        assert_eq!(normalize_subject("Re:"), None);
        assert_eq!(normalize_subject("Re: Fwd:  "), None);
    }
}
