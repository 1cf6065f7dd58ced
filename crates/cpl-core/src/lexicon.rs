/// Filler lexicons keyed by primary language subtag. Phrases are matched
/// longest-first, so multi-word entries win over their single-word parts.
const EN: &[&str] = &[
    "at the end of the day",
    "you know",
    "i mean",
    "kind of",
    "sort of",
    "pretty much",
    // stock praise that carries no information in narration
    "very good",
    "really good",
    "basically",
    "actually",
    "literally",
    "honestly",
    "really",
    "just",
    "very",
    "quite",
    "totally",
    "simply",
    "um",
    "uh",
];

const ES: &[&str] = &[
    "o sea",
    "es decir",
    "la verdad",
    "pues",
    "bueno",
    "realmente",
    "simplemente",
    "básicamente",
    "literalmente",
    "muy",
    "este",
];

const FR: &[&str] = &[
    "en fait",
    "du coup",
    "tu sais",
    "genre",
    "vraiment",
    "juste",
    "très",
    "bon",
    "ben",
    "euh",
];

const DE: &[&str] = &[
    "na ja",
    "halt",
    "eben",
    "eigentlich",
    "wirklich",
    "einfach",
    "sehr",
    "quasi",
    "ähm",
];

pub const DEFAULT_LANGUAGE: &str = "en";

/// Lexicon for `language` ("en", "en-US", "es_MX", ...). Unlisted languages
/// fall back to the English lexicon.
pub fn filler_lexicon(language: &str) -> &'static [&'static str] {
    let primary = language
        .split(['-', '_'])
        .next()
        .unwrap_or(DEFAULT_LANGUAGE)
        .trim()
        .to_ascii_lowercase();
    match primary.as_str() {
        "es" => ES,
        "fr" => FR,
        "de" => DE,
        _ => EN,
    }
}

pub fn is_listed(language: &str) -> bool {
    let primary = language.split(['-', '_']).next().unwrap_or("").to_ascii_lowercase();
    matches!(primary.as_str(), "en" | "es" | "fr" | "de")
}

fn normalize(token: &str) -> String {
    token.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase()
}

fn sentence_end(token: &str) -> Option<char> {
    token.chars().last().filter(|c| matches!(c, '.' | '!' | '?'))
}

/// Remove lexicon entries from `text`. Line structure is kept; within a line
/// the surviving tokens are re-joined by single spaces. Sentence-final
/// punctuation carried by a removed token moves onto the preceding kept token.
pub fn scrub_fillers(text: &str, lexicon: &[&str]) -> String {
    let mut phrases: Vec<Vec<&str>> = lexicon.iter().map(|p| p.split_whitespace().collect()).collect();
    phrases.sort_by(|a, b| b.len().cmp(&a.len()));

    text.lines()
        .map(|line| scrub_line(line, &phrases))
        .collect::<Vec<_>>()
        .join("\n")
}

fn scrub_line(line: &str, phrases: &[Vec<&str>]) -> String {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    let normalized: Vec<String> = tokens.iter().map(|t| normalize(t)).collect();
    let mut kept: Vec<String> = Vec::with_capacity(tokens.len());

    let mut i = 0;
    while i < tokens.len() {
        let matched = phrases.iter().find(|phrase| {
            !phrase.is_empty()
                && i + phrase.len() <= tokens.len()
                && phrase.iter().zip(&normalized[i..]).all(|(p, n)| *p == n.as_str())
        });
        match matched {
            Some(phrase) => {
                let last = tokens[i + phrase.len() - 1];
                if let (Some(mark), Some(prev)) = (sentence_end(last), kept.last_mut()) {
                    if sentence_end(prev).is_none() {
                        if prev.ends_with([',', ';', ':']) {
                            prev.pop();
                        }
                        prev.push(mark);
                    }
                }
                i += phrase.len();
            }
            None => {
                kept.push(tokens[i].to_string());
                i += 1;
            }
        }
    }
    kept.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scrubs_every_filler_token() {
        let out = scrub_fillers("just really very good", filler_lexicon("en"));
        assert_eq!(out, "");
    }

    #[test]
    fn keeps_content_and_line_breaks() {
        let out = scrub_fillers("This is basically fine\nand you know it works", filler_lexicon("en"));
        assert_eq!(out, "This is fine\nand it works");
    }

    #[test]
    fn moves_sentence_end_onto_kept_token() {
        let out = scrub_fillers("That was the plan, really. Then we left", filler_lexicon("en"));
        assert_eq!(out, "That was the plan. Then we left");
    }

    #[test]
    fn matching_is_case_insensitive() {
        let out = scrub_fillers("Honestly the data is clear", filler_lexicon("en-US"));
        assert_eq!(out, "the data is clear");
    }

    #[test]
    fn unlisted_language_falls_back_to_english() {
        assert!(!is_listed("pt"));
        assert_eq!(filler_lexicon("pt"), filler_lexicon("en"));
        assert_eq!(filler_lexicon("es_MX"), filler_lexicon("es"));
    }
}
