//! Abbreviation table for sentence-boundary detection

/// Words that take a trailing period without ending a sentence.
///
/// Entries are the token produced by left-scanning alphabetic characters
/// before the period, lowercased. Dotted abbreviations like "i.e." and
/// "e.g." therefore appear as their final segment ("e", "g").
const ABBREVIATIONS: &[&str] = &[
    // Titles
    "mr", "mrs", "ms", "dr", "prof", "sr", "jr",
    // Months
    "jan", "feb", "mar", "apr", "jun", "jul", "aug", "sep", "sept", "oct", "nov", "dec",
    // Days
    "mon", "tue", "tues", "wed", "thu", "thur", "thurs", "fri", "sat", "sun",
    // Common
    "etc", "vs", "vol", "fig", "p", "pp", "st", "ave", "blvd",
    // Degrees
    "phd", "md", "ba", "bs", "ma", "mba", "mph",
    // Latin
    "e", "g", "al", "ibid", "cf",
];

/// Whether `word` (already lowercased) is a known abbreviation
pub fn is_abbreviation(word: &str) -> bool {
    ABBREVIATIONS.contains(&word)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_abbreviations() {
        assert!(is_abbreviation("mr"));
        assert!(is_abbreviation("etc"));
        assert!(is_abbreviation("phd"));
        assert!(is_abbreviation("g"));
    }

    #[test]
    fn test_regular_words() {
        assert!(!is_abbreviation("hello"));
        assert!(!is_abbreviation("smith"));
    }
}
