use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    /// Paired internal-markup regions, removed together with their contents.
    static ref MARKUP_REGIONS: Vec<Regex> = [
        r"<system-[a-z-]+>[\s\S]*?</system-[a-z-]+>",
        r"<local-command-[a-z-]+>[\s\S]*?</local-command-[a-z-]+>",
        r"<command-[a-z-]+>[\s\S]*?</command-[a-z-]+>",
        r"<user-prompt-[a-z-]+>[\s\S]*?</user-prompt-[a-z-]+>",
        r"<[a-z-]+-reminder>[\s\S]*?</[a-z-]+-reminder>",
        r"<[a-z-]+-caveat>[\s\S]*?</[a-z-]+-caveat>",
        r"<[a-z-]+-hook>[\s\S]*?</[a-z-]+-hook>",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect();

    /// `Caveat:` lines, including ones indented by markup removal.
    static ref CAVEAT_LINE: Regex = Regex::new(r"(?m)^[^\S\n]*Caveat:.*$").unwrap();
    static ref EXCESS_NEWLINES: Regex = Regex::new(r"\n{3,}").unwrap();
}

/// Strip internal/system markup from free text.
///
/// An empty result means the text carried nothing a reader should see.
pub fn clean_system_content(text: &str) -> String {
    let mut cleaned = text.to_string();

    for pattern in MARKUP_REGIONS.iter() {
        if pattern.is_match(&cleaned) {
            cleaned = pattern.replace_all(&cleaned, "").into_owned();
        }
    }

    cleaned = CAVEAT_LINE.replace_all(cleaned.trim(), "").into_owned();
    cleaned = EXCESS_NEWLINES.replace_all(&cleaned, "\n\n").into_owned();

    cleaned.trim().to_string()
}
