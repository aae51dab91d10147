//! Query classification, normalization and parameter extraction.

use std::collections::HashSet;
use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

static TARIFF_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(tariff|duty|rate|import|export|cost|price)\b").expect("valid tariff pattern"));

static HS_CODE_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(hs\s*code|harmonized|classification|product|item)\b").expect("valid hs code pattern")
});

static AGREEMENT_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(agreement|treaty|trade\s*deal|fta|partnership)\b").expect("valid agreement pattern")
});

static HS_CODE_DIGITS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b\d{4,10}\b").expect("valid digits pattern"));

/// Default HS code when a query names none
pub const DEFAULT_HS_CODE: &str = "0101.21";
/// Default country code for origin, destination and agreement lookups
pub const DEFAULT_COUNTRY_CODE: &str = "US";

/// Bucket a query falls into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueryType {
    Tariff,
    HsCode,
    Agreement,
    Country,
    General,
}

impl fmt::Display for QueryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            QueryType::Tariff => "TARIFF",
            QueryType::HsCode => "HS_CODE",
            QueryType::Agreement => "AGREEMENT",
            QueryType::Country => "COUNTRY",
            QueryType::General => "GENERAL",
        };
        write!(f, "{}", label)
    }
}

impl QueryType {
    /// Tariff, then HS code, then agreement patterns, then country names
    pub fn classify(query: &str) -> Self {
        if TARIFF_PATTERN.is_match(query) {
            QueryType::Tariff
        } else if HS_CODE_PATTERN.is_match(query) {
            QueryType::HsCode
        } else if AGREEMENT_PATTERN.is_match(query) {
            QueryType::Agreement
        } else if detect_country(query).is_some() {
            QueryType::Country
        } else {
            QueryType::General
        }
    }
}

struct Country {
    name: &'static str,
    code: &'static str,
    aliases: &'static [&'static str],
}

// "us" only counts after "from"/"to", see `country_after`
const COUNTRIES: &[Country] = &[
    Country { name: "United States", code: "US", aliases: &["usa", "america", "united states"] },
    Country { name: "United Kingdom", code: "GB", aliases: &["uk", "britain", "united kingdom"] },
    Country { name: "Canada", code: "CA", aliases: &["canada"] },
    Country { name: "Mexico", code: "MX", aliases: &["mexico"] },
    Country { name: "China", code: "CN", aliases: &["china"] },
    Country { name: "Japan", code: "JP", aliases: &["japan"] },
    Country { name: "Germany", code: "DE", aliases: &["germany"] },
    Country { name: "France", code: "FR", aliases: &["france"] },
];

fn words(query: &str) -> Vec<String> {
    normalize(query).split(' ').filter(|w| !w.is_empty()).map(str::to_string).collect()
}

fn country_at(words: &[String], index: usize) -> Option<&'static Country> {
    let single = words.get(index)?.as_str();
    let pair = words.get(index + 1).map(|next| format!("{} {}", single, next));

    COUNTRIES.iter().find(|country| {
        country
            .aliases
            .iter()
            .any(|alias| *alias == single || pair.as_deref() == Some(*alias))
    })
}

fn country_after(words: &[String], marker: &str) -> Option<&'static str> {
    words.iter().enumerate().find_map(|(i, word)| {
        if word != marker {
            return None;
        }
        match words.get(i + 1).map(String::as_str) {
            Some("us") => Some("US"),
            _ => country_at(words, i + 1).map(|c| c.code),
        }
    })
}

/// First country named in the query, by display name
pub fn detect_country(query: &str) -> Option<&'static str> {
    let words = words(query);
    (0..words.len()).find_map(|i| country_at(&words, i)).map(|c| c.name)
}

/// Lowercases, strips punctuation and collapses whitespace
pub fn normalize(query: &str) -> String {
    let cleaned: String = query
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect();
    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn fold_plural(word: &str) -> &str {
    if word.len() > 3 && word.ends_with('s') && !word.ends_with("ss") {
        &word[..word.len() - 1]
    } else {
        word
    }
}

/// Word set used for similarity, with simple plurals folded
pub fn tokens(query: &str) -> HashSet<String> {
    normalize(query)
        .split(' ')
        .filter(|w| !w.is_empty())
        .map(|w| fold_plural(w).to_string())
        .collect()
}

/// Intersection over union of the two word sets
pub fn jaccard_similarity(a: &str, b: &str) -> f64 {
    let left = tokens(a);
    let right = tokens(b);
    let union = left.union(&right).count();
    if union == 0 {
        return 0.0;
    }
    left.intersection(&right).count() as f64 / union as f64
}

const HELP_WORDS: &[&str] = &["help", "hello", "hi", "capabilities", "features", "guide", "tutorial"];
const HELP_PHRASES: &[&str] = &["what can you do", "how do you work", "what are you"];

/// Greeting or capability question; empty queries count too
pub fn is_help_query(query: &str) -> bool {
    let normalized = normalize(query);
    if normalized.is_empty() {
        return true;
    }
    HELP_PHRASES.iter().any(|p| normalized.contains(p))
        || normalized.split(' ').any(|w| HELP_WORDS.contains(&w))
}

/// First run of 4 to 10 digits
pub fn extract_hs_code(query: &str) -> String {
    HS_CODE_DIGITS
        .find(query)
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| DEFAULT_HS_CODE.to_string())
}

/// Country code following "from"
pub fn extract_origin(query: &str) -> String {
    country_after(&words(query), "from")
        .unwrap_or(DEFAULT_COUNTRY_CODE)
        .to_string()
}

/// Country code following "to"
pub fn extract_destination(query: &str) -> String {
    country_after(&words(query), "to")
        .unwrap_or(DEFAULT_COUNTRY_CODE)
        .to_string()
}

/// Code of the first country named anywhere
pub fn extract_country_code(query: &str) -> String {
    let words = words(query);
    (0..words.len())
        .find_map(|i| country_at(&words, i))
        .map(|c| c.code)
        .unwrap_or(DEFAULT_COUNTRY_CODE)
        .to_string()
}

const KNOWN_PRODUCTS: &[(&str, &str)] = &[
    ("electronics", "electronics"),
    ("automotive", "automotive parts"),
    ("textiles", "textiles"),
    ("machinery", "machinery"),
];

/// Known product family, else the first three words
pub fn extract_product(query: &str) -> String {
    let lower = query.to_lowercase();
    if let Some((_, product)) = KNOWN_PRODUCTS.iter().find(|(k, _)| lower.contains(k)) {
        return product.to_string();
    }
    let head: Vec<&str> = query.split_whitespace().take(3).collect();
    if head.is_empty() {
        "product".to_string()
    } else {
        head.join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification_order() {
        assert_eq!(QueryType::classify("What is the tariff on steel?"), QueryType::Tariff);
        assert_eq!(QueryType::classify("HS code for leather bags"), QueryType::HsCode);
        assert_eq!(QueryType::classify("trade deal between Japan and Canada"), QueryType::Agreement);
        assert_eq!(QueryType::classify("tell me about Germany"), QueryType::Country);
        assert_eq!(QueryType::classify("good morning"), QueryType::General);
        // tariff wins over country
        assert_eq!(QueryType::classify("duty on imports from China"), QueryType::Tariff);
    }

    #[test]
    fn test_country_needs_whole_word() {
        assert_eq!(detect_country("business in the UK"), Some("United Kingdom"));
        assert_eq!(detect_country("focus on usage"), None);
        assert_eq!(detect_country("shipping to the United States"), Some("United States"));
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("  Tariffs, on ELECTRONICS from China?! "), "tariffs on electronics from china");
    }

    #[test]
    fn test_plural_folding_similarity() {
        let score = jaccard_similarity("tariff on electronics from china", "tariffs on electronics from China");
        assert_eq!(score, 1.0);
        // "ss" endings and short words are left alone
        assert!(tokens("glass bus").contains("glass"));
        assert!(tokens("glass bus").contains("bus"));
    }

    #[test]
    fn test_jaccard_partial_overlap() {
        let score = jaccard_similarity("tariff on steel", "tariff on aluminum");
        assert!((score - 0.5).abs() < 1e-9);
        assert_eq!(jaccard_similarity("", ""), 0.0);
    }

    #[test]
    fn test_help_detection() {
        assert!(is_help_query(""));
        assert!(is_help_query("Hi there"));
        assert!(is_help_query("What can you do?"));
        assert!(!is_help_query("shipping from China"));
        assert!(!is_help_query("which tariff applies"));
    }

    #[test]
    fn test_parameter_extraction() {
        let query = "tariff for 850440 from China to Canada";
        assert_eq!(extract_hs_code(query), "850440");
        assert_eq!(extract_origin(query), "CN");
        assert_eq!(extract_destination(query), "CA");

        assert_eq!(extract_hs_code("tariff on cheese"), DEFAULT_HS_CODE);
        assert_eq!(extract_origin("tariff on cheese"), "US");
        assert_eq!(extract_destination("cars from Japan to us"), "US");
        assert_eq!(extract_country_code("agreements with Mexico"), "MX");
    }

    #[test]
    fn test_product_extraction() {
        assert_eq!(extract_product("HS code for consumer electronics"), "electronics");
        assert_eq!(extract_product("leather hand bags with zips"), "leather hand bags");
        assert_eq!(extract_product(""), "product");
    }
}
