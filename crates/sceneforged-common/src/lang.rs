//! Language code utilities for track selection.
//!
//! Track metadata arrives with whatever tag the muxer wrote: ISO-639-1
//! (`fr`), ISO-639-2/T (`fra`), ISO-639-2/B (`fre`), or a BCP-47 tag with a
//! region (`fr-FR`). These helpers fold all of them into one "family" so
//! preferences survive across files tagged differently.

/// (ISO-639-1, aliases) pairs for the languages we see in practice.
const FAMILIES: &[(&str, &[&str])] = &[
    ("en", &["eng"]),
    ("fr", &["fra", "fre"]),
    ("de", &["deu", "ger"]),
    ("es", &["spa"]),
    ("it", &["ita"]),
    ("pt", &["por"]),
    ("nl", &["nld", "dut"]),
    ("ja", &["jpn"]),
    ("ko", &["kor"]),
    ("zh", &["zho", "chi"]),
    ("ru", &["rus"]),
    ("pl", &["pol"]),
    ("sv", &["swe"]),
    ("da", &["dan"]),
    ("no", &["nor", "nob", "nno"]),
    ("fi", &["fin"]),
    ("ar", &["ara"]),
    ("he", &["heb"]),
    ("hi", &["hin"]),
    ("tr", &["tur"]),
];

/// Normalize a language tag to its family code.
///
/// Returns `None` for empty or undetermined tags (`und`, `unknown`).
///
/// # Examples
///
/// ```
/// use sceneforged_common::lang::family;
///
/// assert_eq!(family("fre").as_deref(), Some("fr"));
/// assert_eq!(family("en-US").as_deref(), Some("en"));
/// assert_eq!(family("und"), None);
/// ```
pub fn family(tag: &str) -> Option<String> {
    let primary = tag
        .trim()
        .split(['-', '_'])
        .next()
        .unwrap_or_default()
        .to_ascii_lowercase();

    if primary.is_empty() || primary == "und" || primary == "unknown" {
        return None;
    }

    for (code, aliases) in FAMILIES {
        if primary == *code || aliases.contains(&primary.as_str()) {
            return Some((*code).to_string());
        }
    }

    Some(primary)
}

/// Check whether two language tags belong to the same family.
pub fn same_family(a: &str, b: &str) -> bool {
    match (family(a), family(b)) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_family_aliases() {
        assert_eq!(family("fr").as_deref(), Some("fr"));
        assert_eq!(family("fra").as_deref(), Some("fr"));
        assert_eq!(family("FRE").as_deref(), Some("fr"));
        assert_eq!(family("fr-CA").as_deref(), Some("fr"));
        assert_eq!(family("pt_BR").as_deref(), Some("pt"));
    }

    #[test]
    fn test_unknown_codes_pass_through() {
        assert_eq!(family("tlh").as_deref(), Some("tlh"));
    }

    #[test]
    fn test_undetermined() {
        assert_eq!(family(""), None);
        assert_eq!(family("und"), None);
        assert!(!same_family("und", "und"));
    }

    #[test]
    fn test_same_family() {
        assert!(same_family("en", "eng"));
        assert!(same_family("de-AT", "ger"));
        assert!(!same_family("en", "fr"));
    }
}
