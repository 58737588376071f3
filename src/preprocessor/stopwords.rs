//! Curated French stopword list: articles, auxiliaries, pronouns,
//! prepositions.

const STOPWORDS: &[&str] = &[
    // Articles, contractions
    "le", "la", "les", "l", "un", "une", "des", "du", "de", "d", "au", "aux",
    // Prepositions
    "à", "chez", "dans", "sur", "sous", "vers", "avec", "sans", "pour", "par", "entre", "depuis",
    "pendant", "avant", "après", "dès", "hors", "jusque", "jusqu", "selon", "malgré", "envers",
    "contre", "parmi", "sauf", "durant", "concernant",
    // Conjunctions
    "et", "ou", "mais", "donc", "or", "ni", "car", "que", "qu", "si", "comme", "lorsque", "quand",
    "puisque", "bien", "tandis", "alors", "ainsi", "cependant", "toutefois", "néanmoins",
    // Pronouns
    "je", "j", "tu", "il", "elle", "on", "nous", "vous", "ils", "elles", "me", "m", "te", "t",
    "se", "s", "lui", "leur", "moi", "toi", "soi", "eux", "celui", "celle", "ceux", "celles",
    "ceci", "cela", "ça", "ce", "cet", "cette", "ces", "qui", "quoi", "dont", "où", "lequel",
    "laquelle", "lesquels", "lesquelles",
    // Possessives
    "mon", "ma", "mes", "ton", "ta", "tes", "son", "sa", "ses", "notre", "nos", "votre", "vos",
    "leurs",
    // Auxiliaries and common verb forms
    "être", "suis", "es", "est", "sommes", "êtes", "sont", "étais", "était", "étions", "étiez",
    "étaient", "serai", "seras", "sera", "serons", "serez", "seront", "avoir", "ai", "as", "a",
    "avons", "avez", "ont", "avais", "avait", "avions", "aviez", "avaient", "aurai", "auras",
    "aura", "aurons", "aurez", "auront", "faire", "fais", "fait", "faisons", "faites", "font",
    // Adverbs / quantifiers
    "ne", "pas", "plus", "moins", "très", "trop", "peu", "beaucoup", "assez", "aussi", "encore",
    "déjà", "jamais", "toujours", "souvent", "parfois", "ici", "là", "y", "en", "même", "tout",
    "toute", "tous", "toutes", "autre", "autres", "chaque", "plusieurs", "quelque", "quelques",
    "aucun", "aucune", "certain", "certains", "certaine", "certaines", "tel", "telle", "tels",
    "telles", "bien", "mal", "oui", "non", "voici", "voilà",
    // Numbers as words (rarely discriminative)
    "un", "deux", "trois",
];

/// Whether `token` (already lowercased) is a curated French stopword.
pub fn is_french_stopword(token: &str) -> bool {
    STOPWORDS.contains(&token)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn has_at_least_130_entries() {
        let unique: std::collections::HashSet<&str> = STOPWORDS.iter().copied().collect();
        assert!(unique.len() >= 130, "only {} unique stopwords", unique.len());
    }

    #[test]
    fn common_articles_are_stopwords() {
        for w in ["le", "la", "les", "de", "et", "un"] {
            assert!(is_french_stopword(w), "{w} should be a stopword");
        }
    }

    #[test]
    fn content_words_are_not_stopwords() {
        for w in ["rtt", "télétravail", "ancienneté", "procédure"] {
            assert!(!is_french_stopword(w), "{w} should not be a stopword");
        }
    }
}
