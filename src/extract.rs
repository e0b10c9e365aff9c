//! Keyword and pattern based attribute extraction.
//!
//! Turns free listing text (title plus optional description) into typed
//! product attributes. Every function here is pure: no I/O, no shared mutable
//! state, and the same text always yields the same result. Matching is done on
//! lower-cased text and keywords only count when they are not glued to other
//! letters or digits ("pro" does not hit "produto").

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;

use crate::models::{ConsoleFamily, ModelVariant, TriState};

// Ordered storage patterns: the first pattern that matches anywhere wins.
static STORAGE_PATTERNS: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    vec![
        (Regex::new(r"([0-9]+)\s*gb").unwrap(), "GB"),
        (Regex::new(r"([0-9]+)\s*tb").unwrap(), "TB"),
        (Regex::new(r"([0-9]+)\s*terabyte").unwrap(), "TB"),
        (Regex::new(r"([0-9]+)\s*gigabyte").unwrap(), "GB"),
    ]
});

static CURRENCY_AMOUNT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)r\$\s*([0-9][0-9.,]*)").unwrap());

static MONEY_SHAPED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[0-9]+(?:[.,][0-9]{3})*[.,][0-9]{2}").unwrap());

const PS5_TERMS: &[&str] = &["ps5", "ps 5", "ps-5", "playstation 5", "playstation5"];
const XBOX_X_TERMS: &[&str] = &["xbox series x", "xbox-series-x"];
const XBOX_S_TERMS: &[&str] = &["xbox series s", "xbox-series-s"];
const SWITCH_2_TERMS: &[&str] = &["switch 2", "switch-2", "nintendo switch 2"];
const SWITCH_TERMS: &[&str] = &["switch", "nintendo switch"];

const SLIM_TERMS: &[&str] = &["slim"];
const DIGITAL_TERMS: &[&str] = &["digital", "digital edition", "edição digital"];
const PRO_TERMS: &[&str] = &["pro"];

/// Default keyword tables shared by every site unless a profile overrides them.
pub static DEFAULT_TABLES: Lazy<KeywordTables> = Lazy::new(KeywordTables::default);

/// Keyword vocabularies consulted by the heuristics. Plain data, so a site
/// profile can swap any of them without touching code.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct KeywordTables {
    /// Phrases that mean the console ships with a disc reader. Checked first.
    pub disc_present: Vec<String>,
    /// Phrases that mean a digital-only console.
    pub disc_absent: Vec<String>,
    /// Color palette, in priority order.
    pub colors: Vec<String>,
    pub controllers: Vec<String>,
    /// Game title catalog. Compound titles are single entries.
    pub games: Vec<String>,
}

impl Default for KeywordTables {
    fn default() -> Self {
        fn owned(list: &[&str]) -> Vec<String> {
            list.iter().map(|s| s.to_string()).collect()
        }

        Self {
            disc_present: owned(&[
                "com leitor",
                "leitor de disco",
                "disc version",
                "versão com leitor",
                "com disco",
            ]),
            disc_absent: owned(&["sem leitor", "digital", "digital edition", "slim", "edição digital"]),
            colors: owned(&[
                "branco", "preto", "azul", "vermelho", "dourado", "prata", "cinza", "white", "black",
                "blue", "red",
            ]),
            controllers: owned(&[
                "controle",
                "controles",
                "dualsense",
                "joystick",
                "gamepad",
                "controller",
                "controllers",
            ]),
            games: owned(&[
                "spider-man",
                "spider-man 2",
                "ratchet & clank",
                "horizon forbidden west",
                "horizon zero dawn",
                "demon's souls",
                "returnal",
                "sackboy",
                "astro's playroom",
                "astros playroom",
                "astro bot",
                "god of war",
                "the last of us",
                "uncharted",
                "gran turismo 7",
                "ea sports fc 24",
                "fc 24",
                "call of duty",
                "mario kart 8",
                "zelda",
                "forza horizon 5",
                "halo infinite",
            ]),
        }
    }
}

/// All heuristic attributes derived from one listing's text.
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeBundle {
    pub console_family: ConsoleFamily,
    pub model_variant: ModelVariant,
    pub brand: Option<String>,
    pub product_type: String,
    pub color: Option<String>,
    pub disc_reader: TriState,
    pub storage_capacity: String,
    pub bundled_games: Vec<String>,
    pub bundled_controllers: TriState,
}

// ============================================================================
// Term matching
// ============================================================================

/// Byte spans of `term` in `haystack` that are not glued to a letter or digit.
fn term_spans<'a>(haystack: &'a str, term: &'a str) -> impl Iterator<Item = (usize, usize)> + 'a {
    haystack.match_indices(term).filter_map(move |(start, _)| {
        if term.is_empty() {
            return None;
        }
        let end = start + term.len();
        let before_ok = haystack[..start]
            .chars()
            .next_back()
            .map_or(true, |c| !c.is_alphanumeric());
        let after_ok = haystack[end..].chars().next().map_or(true, |c| !c.is_alphanumeric());
        (before_ok && after_ok).then_some((start, end))
    })
}

fn contains_term(haystack: &str, term: &str) -> bool {
    term_spans(haystack, term).next().is_some()
}

fn contains_any<S: AsRef<str>>(haystack: &str, terms: &[S]) -> bool {
    terms
        .iter()
        .any(|t| contains_term(haystack, &t.as_ref().to_lowercase()))
}

/// Title casing with a capital after every non-letter ("spider-man" -> "Spider-Man").
fn title_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut at_word_start = true;
    for c in s.chars() {
        if c.is_alphabetic() {
            if at_word_start {
                out.extend(c.to_uppercase());
            } else {
                out.extend(c.to_lowercase());
            }
            at_word_start = false;
        } else {
            out.push(c);
            at_word_start = true;
        }
    }
    out
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

// ============================================================================
// Table-driven heuristics
// ============================================================================

impl KeywordTables {
    /// Has-disc phrases win over no-disc phrases; neither means Unknown.
    pub fn disc_reader(&self, text: &str) -> TriState {
        let t = text.to_lowercase();
        if t.trim().is_empty() {
            return TriState::Unknown;
        }
        if contains_any(&t, &self.disc_present) {
            TriState::Yes
        } else if contains_any(&t, &self.disc_absent) {
            TriState::No
        } else {
            TriState::Unknown
        }
    }

    /// First palette entry present in the text, capitalized.
    pub fn color(&self, text: &str) -> Option<String> {
        let t = text.to_lowercase();
        self.colors
            .iter()
            .map(|c| c.to_lowercase())
            .find(|c| contains_term(&t, c))
            .map(|c| capitalize(&c))
    }

    /// Never Unknown: silence about controllers reads as "not included".
    pub fn controllers(&self, text: &str) -> TriState {
        let t = text.to_lowercase();
        if contains_any(&t, &self.controllers) {
            TriState::Yes
        } else {
            TriState::No
        }
    }

    /// Every catalog title present, in catalog order, without duplicates.
    ///
    /// An occurrence sitting inside the occurrence of a longer catalog title
    /// does not count on its own, so "fc 24" is not reported next to
    /// "ea sports fc 24".
    pub fn games(&self, text: &str) -> Vec<String> {
        let t = text.to_lowercase();
        let catalog: Vec<String> = self.games.iter().map(|g| g.to_lowercase()).collect();

        let spans: Vec<(usize, usize, usize)> = catalog
            .iter()
            .enumerate()
            .flat_map(|(idx, game)| term_spans(&t, game).map(move |(s, e)| (idx, s, e)))
            .collect();

        let mut hits: Vec<String> = Vec::new();
        for (idx, game) in catalog.iter().enumerate() {
            let standalone = spans.iter().filter(|(i, _, _)| *i == idx).any(|&(_, s, e)| {
                !spans
                    .iter()
                    .any(|&(j, s2, e2)| j != idx && s2 <= s && e <= e2 && (e2 - s2) > (e - s))
            });
            if standalone {
                let name = title_case(&game.replace('\'', ""));
                if !hits.contains(&name) {
                    hits.push(name);
                }
            }
        }
        hits
    }
}

// ============================================================================
// Free functions (default tables)
// ============================================================================

/// First storage capacity found, normalized to "<N> GB" / "<N> TB".
pub fn extract_storage(text: &str) -> String {
    let t = text.to_lowercase();
    STORAGE_PATTERNS
        .iter()
        .find_map(|(pattern, unit)| {
            pattern
                .captures(&t)
                .and_then(|caps| caps.get(1))
                .map(|n| format!("{} {}", n.as_str(), unit))
        })
        .unwrap_or_default()
}

pub fn extract_disc_reader(text: &str) -> TriState {
    DEFAULT_TABLES.disc_reader(text)
}

pub fn extract_color(text: &str) -> Option<String> {
    DEFAULT_TABLES.color(text)
}

pub fn extract_controllers(text: &str) -> TriState {
    DEFAULT_TABLES.controllers(text)
}

pub fn extract_games(text: &str) -> Vec<String> {
    DEFAULT_TABLES.games(text)
}

/// Family first, then (for PS5 only) the variant: Slim > Digital > Pro > Standard.
pub fn classify_console(text: &str) -> (ConsoleFamily, ModelVariant) {
    let t = text.to_lowercase();

    let family = if contains_any(&t, PS5_TERMS) {
        ConsoleFamily::Ps5
    } else if contains_any(&t, XBOX_X_TERMS) {
        ConsoleFamily::XboxSeriesX
    } else if contains_any(&t, XBOX_S_TERMS) {
        ConsoleFamily::XboxSeriesS
    } else if contains_any(&t, SWITCH_2_TERMS) {
        ConsoleFamily::Switch2
    } else if contains_any(&t, SWITCH_TERMS) {
        ConsoleFamily::Switch
    } else {
        ConsoleFamily::Unknown
    };

    let variant = match family {
        ConsoleFamily::Ps5 => {
            if contains_any(&t, SLIM_TERMS) {
                ModelVariant::Slim
            } else if contains_any(&t, DIGITAL_TERMS) {
                ModelVariant::DigitalEdition
            } else if contains_any(&t, PRO_TERMS) {
                ModelVariant::Pro
            } else {
                ModelVariant::Standard
            }
        }
        ConsoleFamily::XboxSeriesX => ModelVariant::XboxSeriesX,
        ConsoleFamily::XboxSeriesS => ModelVariant::XboxSeriesS,
        ConsoleFamily::Switch2 => ModelVariant::Switch2,
        ConsoleFamily::Switch => ModelVariant::Switch,
        ConsoleFamily::Unknown => ModelVariant::Unknown,
    };

    (family, variant)
}

/// Manufacturer and product type label, in the order Nintendo, Xbox, Sony.
pub fn extract_brand(text: &str) -> Option<(&'static str, &'static str)> {
    let t = text.to_lowercase();
    if contains_any(&t, &["nintendo", "switch"][..]) {
        Some(("Nintendo", "Console Nintendo Switch"))
    } else if contains_term(&t, "xbox") {
        Some(("Microsoft", "Console Xbox"))
    } else if contains_term(&t, "playstation") || contains_any(&t, PS5_TERMS) {
        Some(("Sony", "Console PlayStation"))
    } else {
        None
    }
}

/// Normalize a price string to digits with a single decimal point.
///
/// "R$ 1.299,90" and "1299.90" both become "1299.90".
pub fn clean_price(price_text: &str) -> String {
    let kept: String = price_text
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == ',' || *c == '.')
        .map(|c| if c == ',' { '.' } else { c })
        .collect();

    match kept.rfind('.') {
        Some(last) if kept[..last].contains('.') => {
            let integer: String = kept[..last].chars().filter(|c| *c != '.').collect();
            format!("{}.{}", integer, &kept[last + 1..])
        }
        _ => kept,
    }
}

/// Price of one installment from a line like "12x R$ 108,33 sem juros".
pub fn extract_installment_price(text: &str) -> Option<String> {
    let amount = CURRENCY_AMOUNT
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
        .or_else(|| MONEY_SHAPED.find(text).map(|m| m.as_str()))?;
    let cleaned = clean_price(amount.trim_end_matches(['.', ',']));
    (!cleaned.is_empty()).then_some(cleaned)
}

/// Run every heuristic over `title` plus the optional description.
pub fn extract_attributes(title: &str, description: Option<&str>, tables: &KeywordTables) -> AttributeBundle {
    let combined = match description {
        Some(desc) if !desc.trim().is_empty() => format!("{} {}", title, desc),
        _ => title.to_string(),
    }
    .to_lowercase();

    let (console_family, model_variant) = classify_console(&combined);
    let (brand, product_type) = match extract_brand(&combined) {
        Some((brand, kind)) => (Some(brand.to_string()), kind.to_string()),
        None => (None, "Console".to_string()),
    };

    AttributeBundle {
        console_family,
        model_variant,
        brand,
        product_type,
        color: tables.color(&combined),
        disc_reader: tables.disc_reader(&combined),
        storage_capacity: extract_storage(&combined),
        bundled_games: tables.games(&combined),
        bundled_controllers: tables.controllers(&combined),
    }
}
