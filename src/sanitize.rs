//! Content Safety Filter
//!
//! Strips executable-on-render markup from data values and template markup,
//! and validates filesystem paths before anything is opened or written.

use lazy_static::lazy_static;
use regex::Regex;
use std::path::{Component, Path};
use tracing::warn;

use crate::error::{AutogenError, Result};

pub const MAX_FILENAME_BYTES: usize = 255;

lazy_static! {
    static ref SCRIPT_BLOCK_RE: Regex =
        Regex::new(r"(?is)<script\b[^>]*>.*?</script\s*>").unwrap();

    /// Unbalanced open or close tags left over once whole blocks are gone.
    static ref SCRIPT_TAG_RE: Regex = Regex::new(r"(?i)</?script[^>]*>?").unwrap();

    static ref EMBED_TAG_RE: Regex =
        Regex::new(r"(?i)</?(?:iframe|object|embed|foreignobject)\b[^>]*>?").unwrap();

    static ref UNSAFE_SCHEME_RE: Regex =
        Regex::new(r"(?i)(?:java|vb)script\s*:|data\s*:\s*text/html").unwrap();

    static ref EVENT_HANDLER_RE: Regex =
        Regex::new(r#"(?i)(^|[\s"'/<;])on[a-z]+\s*="#).unwrap();

    static ref CONTROL_RE: Regex =
        Regex::new(r"[\x00-\x08\x0B\x0C\x0E-\x1F\x7F]").unwrap();

    static ref WHITESPACE_RUN_RE: Regex = Regex::new(r"\s+").unwrap();
}

/// Characters never allowed in an output file name.
const UNSAFE_FILENAME_CHARS: &[char] = &[
    '<', '>', ':', '"', '/', '\\', '|', '?', '*', '%', '&', '$', '@', '#',
];

/// Remove script blocks, script-scheme references, event-handler injection and
/// control characters. Runs to a fixpoint, so the result is stable under
/// repeated application.
pub fn sanitize(text: &str) -> String {
    let mut current = text.to_string();
    loop {
        let next = sanitize_pass(&current);
        if next == current {
            return next;
        }
        current = next;
    }
}

// Every replacement strictly shortens the input, so the fixpoint loop terminates.
fn sanitize_pass(text: &str) -> String {
    let out = SCRIPT_BLOCK_RE.replace_all(text, "");
    let out = SCRIPT_TAG_RE.replace_all(&out, "");
    let out = EMBED_TAG_RE.replace_all(&out, "");
    let out = UNSAFE_SCHEME_RE.replace_all(&out, "");
    let out = EVENT_HANDLER_RE.replace_all(&out, "$1");
    CONTROL_RE.replace_all(&out, "").into_owned()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sanitized {
    pub text: String,
    /// True when unsafe content was removed.
    pub stripped: bool,
}

/// Sanitize one data cell before it reaches the transformer.
///
/// Over-long values are cut at `max_len` characters. With `strict` set, a value
/// that needed stripping is rejected with a `SecurityError` instead.
pub fn sanitize_value(column: &str, text: &str, max_len: usize, strict: bool) -> Result<Sanitized> {
    let clean = sanitize(text);
    let stripped = clean != text;
    if stripped && strict {
        return Err(AutogenError::security(format!(
            "column '{}' contains unsafe content",
            column
        )));
    }
    if stripped {
        warn!("column '{}': unsafe content stripped from value", column);
    }

    let text = if clean.chars().count() > max_len {
        warn!("column '{}': value truncated to {} characters", column, max_len);
        clean.chars().take(max_len).collect()
    } else {
        clean
    };

    Ok(Sanitized { text, stripped })
}

pub fn is_event_handler(attribute: &str) -> bool {
    let lower = attribute.to_ascii_lowercase();
    let local = lower.rsplit(':').next().unwrap_or(&lower);
    local.len() > 2 && local.starts_with("on")
}

/// `href`, `xlink:href` and other namespaced `*:href` attributes.
pub fn is_link_attribute(attribute: &str) -> bool {
    let lower = attribute.to_ascii_lowercase();
    lower == "href" || lower.ends_with(":href")
}

pub fn has_unsafe_scheme(value: &str) -> bool {
    let compact: String = value.chars().filter(|c| !c.is_whitespace()).collect();
    UNSAFE_SCHEME_RE.is_match(&compact)
}

/// Values written into a `style` declaration must not open a new declaration or rule.
pub fn breaks_style_declaration(value: &str) -> bool {
    value.contains([';', '{', '}'])
}

// ═══════════════════════════════════════════════════════════════════════════════
// PATHS
// ═══════════════════════════════════════════════════════════════════════════════

/// Accept `path` only if it has no `..` segment, an allowed extension
/// (case-insensitive), and, when absolute, lives under one of `allowed_roots`.
pub fn validate_path(path: &Path, allowed_roots: &[&Path], allowed_extensions: &[String]) -> bool {
    if path
        .components()
        .any(|c| matches!(c, Component::ParentDir))
    {
        return false;
    }

    let extension = match path.extension().and_then(|e| e.to_str()) {
        Some(e) => e.to_ascii_lowercase(),
        None => return false,
    };
    if !allowed_extensions
        .iter()
        .any(|allowed| allowed.trim_start_matches('.').eq_ignore_ascii_case(&extension))
    {
        return false;
    }

    if path.is_absolute() {
        return allowed_roots
            .iter()
            .any(|root| root.is_absolute() && path.starts_with(root));
    }
    true
}

/// Make one output file name safe for any filesystem.
///
/// Returns a `ConfigurationError` when nothing usable remains.
pub fn sanitize_filename(name: &str) -> Result<String> {
    let collapsed = WHITESPACE_RUN_RE.replace_all(name.trim(), "_");
    let mut out: String = collapsed
        .chars()
        .filter(|c| !c.is_control())
        .map(|c| if UNSAFE_FILENAME_CHARS.contains(&c) { '_' } else { c })
        .collect();

    out = out.trim_matches(|c| c == '_' || c == '.').to_string();
    if out.is_empty() {
        return Err(AutogenError::configuration(format!(
            "file name '{}' is empty after sanitization",
            name
        )));
    }

    if out.len() > MAX_FILENAME_BYTES {
        let mut cut = MAX_FILENAME_BYTES;
        while !out.is_char_boundary(cut) {
            cut -= 1;
        }
        out.truncate(cut);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::path::PathBuf;

    fn exts() -> Vec<String> {
        vec!["png".into(), "jpg".into(), "svg".into()]
    }

    #[test]
    fn test_script_block_removed() {
        let clean = sanitize("Hi <script>alert(1)</script>there");
        assert_eq!(clean, "Hi there");
        assert!(!sanitize("<SCRIPT src=x>").to_lowercase().contains("<script"));
    }

    #[test]
    fn test_nested_script_reassembly() {
        // Removing the inner tag must not leave a fresh "<script" behind.
        let clean = sanitize("<scr<script>ipt>alert(1)</script>");
        assert!(!clean.to_lowercase().contains("<script"));
    }

    #[test]
    fn test_schemes_and_handlers() {
        assert_eq!(sanitize("javascript:alert(1)"), "alert(1)");
        assert_eq!(sanitize("JaVaScRiPt :x"), "x");
        assert_eq!(sanitize("<g onload=\"x()\">"), "<g \"x()\">");
        assert_eq!(sanitize("Bonnie=1"), "Bonnie=1");
        assert_eq!(sanitize("tab\there\u{7}"), "tab\there");
    }

    #[test]
    fn test_sanitize_value_strict_and_lenient() {
        let ok = sanitize_value("name", "Ada", 100, true).unwrap();
        assert!(!ok.stripped);

        let err = sanitize_value("name", "<script>x</script>Ada", 100, true).unwrap_err();
        assert!(matches!(err, AutogenError::Security(_)));

        let lenient = sanitize_value("name", "<script>x</script>Ada", 100, false).unwrap();
        assert!(lenient.stripped);
        assert_eq!(lenient.text, "Ada");

        let cut = sanitize_value("name", "abcdef", 3, false).unwrap();
        assert_eq!(cut.text, "abc");
    }

    #[test]
    fn test_validate_path() {
        let root = PathBuf::from("/data/project");
        let roots = [root.as_path()];
        assert!(validate_path(Path::new("images/logo.png"), &roots, &exts()));
        assert!(validate_path(Path::new("/data/project/logo.PNG"), &roots, &exts()));
        assert!(!validate_path(Path::new("../secret.png"), &roots, &exts()));
        assert!(!validate_path(Path::new("/etc/logo.png"), &roots, &exts()));
        assert!(!validate_path(Path::new("logo.exe"), &roots, &exts()));
        assert!(!validate_path(Path::new("logo"), &roots, &exts()));
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("cert Ada  Lovelace").unwrap(), "cert_Ada_Lovelace");
        assert_eq!(sanitize_filename("a/b\\c:d").unwrap(), "a_b_c_d");
        assert_eq!(sanitize_filename("..hidden..").unwrap(), "hidden");
        assert!(sanitize_filename("  ///  ").is_err());
        let long = "é".repeat(200);
        let cut = sanitize_filename(&long).unwrap();
        assert!(cut.len() <= MAX_FILENAME_BYTES);
    }

    #[test]
    fn test_event_handler_names() {
        assert!(is_event_handler("onclick"));
        assert!(is_event_handler("ONLOAD"));
        assert!(!is_event_handler("on"));
        assert!(!is_event_handler("opacity"));
        assert!(is_link_attribute("xlink:href"));
        assert!(is_link_attribute("HREF"));
        assert!(!is_link_attribute("hreflang"));
        assert!(has_unsafe_scheme("java\nscript:alert(1)"));
        assert!(!has_unsafe_scheme("images/logo.png"));
    }

    proptest! {
        #[test]
        fn prop_sanitize_is_idempotent(input in ".{0,64}") {
            let once = sanitize(&input);
            prop_assert_eq!(sanitize(&once), once);
        }

        #[test]
        fn prop_sanitize_idempotent_on_markup(
            parts in proptest::collection::vec(
                prop_oneof![
                    Just("<script>"), Just("</script>"), Just("<scr"), Just("ipt>"),
                    Just("javascript:"), Just("java"), Just("script:"), Just(" onload="),
                    Just("on"), Just("click="), Just("text"), Just("\u{1}"),
                ],
                0..12,
            )
        ) {
            let input: String = parts.concat();
            let once = sanitize(&input);
            prop_assert_eq!(sanitize(&once), once.clone());
            prop_assert!(!once.to_lowercase().contains("<script"));
        }
    }
}
