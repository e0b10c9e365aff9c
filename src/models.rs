use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;

// ============================================================================
// Product Data Structures
// ============================================================================

/// Three-valued attribute for facts the listing text may simply not mention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
pub enum TriState {
    Yes,
    No,
    #[default]
    Unknown,
}

impl TriState {
    /// Label used in the exported catalog (marketplace locale).
    pub fn label(&self) -> &'static str {
        match self {
            TriState::Yes => "Sim",
            TriState::No => "Não",
            TriState::Unknown => "",
        }
    }
}

impl fmt::Display for TriState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl Serialize for TriState {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.label())
    }
}

/// Console family, decided before any variant vocabulary is consulted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ConsoleFamily {
    Ps5,
    XboxSeriesX,
    XboxSeriesS,
    Switch,
    Switch2,
    #[default]
    Unknown,
}

impl ConsoleFamily {
    pub fn label(&self) -> &'static str {
        match self {
            ConsoleFamily::Ps5 => "PS5",
            ConsoleFamily::XboxSeriesX => "Xbox Series X",
            ConsoleFamily::XboxSeriesS => "Xbox Series S",
            ConsoleFamily::Switch => "Nintendo Switch",
            ConsoleFamily::Switch2 => "Nintendo Switch 2",
            ConsoleFamily::Unknown => "",
        }
    }
}

/// Model variant. PS5 sub-variants plus one variant per other family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ModelVariant {
    Standard,
    Slim,
    DigitalEdition,
    Pro,
    XboxSeriesX,
    XboxSeriesS,
    Switch,
    Switch2,
    #[default]
    Unknown,
}

impl ModelVariant {
    pub fn label(&self) -> &'static str {
        match self {
            ModelVariant::Standard => "PS5 Standard",
            ModelVariant::Slim => "PS5 Slim",
            ModelVariant::DigitalEdition => "PS5 Digital Edition",
            ModelVariant::Pro => "PS5 Pro",
            ModelVariant::XboxSeriesX => "Xbox Series X",
            ModelVariant::XboxSeriesS => "Xbox Series S",
            ModelVariant::Switch => "Nintendo Switch",
            ModelVariant::Switch2 => "Nintendo Switch 2",
            ModelVariant::Unknown => "",
        }
    }
}

/// One harvested console listing.
#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct Product {
    // Identity
    pub canonical_link: String,

    // Descriptive
    pub title: String,
    pub model_variant: ModelVariant,
    pub console_family: ConsoleFamily,
    pub brand: Option<String>,
    pub product_type: String,

    // Commerce
    pub price_cash: String,
    pub price_installment: Option<String>,

    // Heuristic attributes
    pub color: Option<String>,
    pub disc_reader: TriState,
    pub storage_capacity: String,
    pub bundled_games: Vec<String>,
    pub bundled_controllers: TriState,

    // Provenance
    pub source_site: String,
    pub source_url: String,
    pub collected_at: DateTime<Utc>,
    pub image_url: Option<String>,
    pub availability: Option<String>,
}

impl Product {
    /// Empty record for a freshly located item container.
    pub fn new(source_site: &str, source_url: &str) -> Self {
        Self {
            canonical_link: String::new(),
            title: String::new(),
            model_variant: ModelVariant::Unknown,
            console_family: ConsoleFamily::Unknown,
            brand: None,
            product_type: "Console".to_string(),
            price_cash: String::new(),
            price_installment: None,
            color: None,
            disc_reader: TriState::Unknown,
            storage_capacity: String::new(),
            bundled_games: Vec::new(),
            bundled_controllers: TriState::No,
            source_site: source_site.to_string(),
            source_url: source_url.to_string(),
            collected_at: Utc::now(),
            image_url: None,
            availability: None,
        }
    }

    /// Copy the derived attribute bundle onto this record.
    pub fn apply(&mut self, attrs: crate::extract::AttributeBundle) {
        self.model_variant = attrs.model_variant;
        self.console_family = attrs.console_family;
        self.brand = attrs.brand;
        self.product_type = attrs.product_type;
        self.color = attrs.color;
        self.disc_reader = attrs.disc_reader;
        self.storage_capacity = attrs.storage_capacity;
        self.bundled_games = attrs.bundled_games;
        self.bundled_controllers = attrs.bundled_controllers;
    }
}
