//! Name canonicalisation shared by local folders and remote catalog labels.

use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Boilerplate word stripped from every label before comparison.
pub const BOILERPLATE_WORD: &str = "partido";

const FORBIDDEN_FOLDER_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

const RESERVED_DEVICE_NAMES: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

/// Canonical comparison key for a free-text party label.
///
/// Lowercases, strips diacritics (NFD + combining-mark removal), removes every
/// occurrence of [`BOILERPLATE_WORD`] and collapses whitespace runs.
pub fn normalize_name(text: &str) -> String {
    let mut folded: String = text
        .to_lowercase()
        .nfd()
        .filter(|c| !is_combining_mark(*c))
        .collect();

    // Removing one occurrence can splice a new one together ("parpartidotido").
    while folded.contains(BOILERPLATE_WORD) {
        folded = folded.replace(BOILERPLATE_WORD, "");
    }

    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Filesystem-safe folder name, as produced when party folders are provisioned.
pub fn sanitize_folder_name(name: &str) -> String {
    let stripped: String = name
        .trim()
        .chars()
        .filter(|c| !FORBIDDEN_FOLDER_CHARS.contains(c))
        .collect();
    let mut sanitized = stripped.trim_end_matches(|c: char| c == '.' || c == ' ').to_string();
    if is_reserved_device_name(&sanitized) {
        sanitized.push('_');
    }
    sanitized
}

fn is_reserved_device_name(name: &str) -> bool {
    let upper = name.to_uppercase();
    RESERVED_DEVICE_NAMES.iter().any(|reserved| *reserved == upper)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_accents_case_and_boilerplate() {
        assert_eq!(normalize_name("Partido Áncash"), "ancash");
        assert_eq!(normalize_name("  PARTIDO   Acción  Popular "), "accion popular");
        assert_eq!(normalize_name("Partido EJEMPLO LIBRE"), "ejemplo libre");
    }

    #[test]
    fn boilerplate_is_removed_inside_words() {
        assert_eq!(normalize_name("Apartidos Unidos"), "as unidos");
    }

    #[test]
    fn empty_and_boilerplate_only_inputs_normalize_to_empty() {
        assert_eq!(normalize_name(""), "");
        assert_eq!(normalize_name("   \t\n"), "");
        assert_eq!(normalize_name("Partido"), "");
    }

    #[test]
    fn normalization_is_idempotent() {
        let samples = [
            "Partido Áncash",
            "parpartidotido",
            "PARTIDO partido Perú Libre",
            "Fuerza  Popular\u{00a0}",
            "Ñañez  Über",
            "İstanbul Partido",
            "",
        ];
        for sample in samples {
            let once = normalize_name(sample);
            assert_eq!(normalize_name(&once), once, "not idempotent for {sample:?}");
            assert!(!once.contains(BOILERPLATE_WORD), "boilerplate left in {once:?}");
        }
    }

    #[test]
    fn sanitize_drops_forbidden_characters_and_trailing_dots() {
        assert_eq!(sanitize_folder_name(" Fuerza: Popular?. . "), "Fuerza Popular");
        assert_eq!(sanitize_folder_name("A/B\\C|D*\"E<F>"), "ABCDEF");
    }

    #[test]
    fn sanitize_suffixes_reserved_device_names() {
        assert_eq!(sanitize_folder_name("con"), "con_");
        assert_eq!(sanitize_folder_name("LPT9"), "LPT9_");
        assert_eq!(sanitize_folder_name("COM10"), "COM10");
        assert_eq!(sanitize_folder_name("Peru Libre"), "Peru Libre");
    }
}
