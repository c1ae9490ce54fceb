//! Geographic and locality data model
//!
//! These types cross every boundary of the engine: they are loaded from the
//! locality source, persisted as JSON in the keyspaces and handed to the
//! reviewer. All of them serialize with serde.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a geographic entity (county, state, country...)
pub type RegionId = i64;

/// Identifier of a collecting locality record
pub type LocalityId = i64;

/// Administrative rank of a geographic entity
///
/// Ordered from coarsest to finest, so `Rank::County > Rank::State` and the
/// maximum of a set of ranks is its most specific one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Rank {
    Earth,
    Continent,
    Country,
    State,
    County,
}

impl fmt::Display for Rank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Rank::Earth => "earth",
            Rank::Continent => "continent",
            Rank::Country => "country",
            Rank::State => "state",
            Rank::County => "county",
        };
        f.write_str(name)
    }
}

/// A node of the geographic tree
///
/// Adjacency is a separate relation held by the engine's adjacency graph;
/// neighbors may have different parents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeoEntity {
    pub id: RegionId,
    pub rank: Rank,
    pub name: String,
    #[serde(default)]
    pub parent_id: Option<RegionId>,
}

/// A collecting locality pulled into the working set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingLocality {
    pub id: LocalityId,
    /// Region the locality is filed under
    pub geo_id: RegionId,
    #[serde(default)]
    pub lat: Option<f64>,
    #[serde(default)]
    pub long: Option<f64>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub place: String,
    #[serde(default)]
    pub remarks: String,
    /// Phonetic codes of the locality's words, in occurrence order
    #[serde(default)]
    pub phonetic_codes: Vec<String>,
}

impl PendingLocality {
    /// Create a locality with only its descriptive text set
    pub fn new(id: LocalityId, geo_id: RegionId, name: impl Into<String>) -> Self {
        Self {
            id,
            geo_id,
            lat: None,
            long: None,
            name: name.into(),
            place: String::new(),
            remarks: String::new(),
            phonetic_codes: Vec::new(),
        }
    }

    pub fn with_place(mut self, place: impl Into<String>) -> Self {
        self.place = place.into();
        self
    }

    pub fn with_remarks(mut self, remarks: impl Into<String>) -> Self {
        self.remarks = remarks.into();
        self
    }

    pub fn with_coordinates(mut self, lat: f64, long: f64) -> Self {
        self.lat = Some(lat);
        self.long = Some(long);
        self
    }

    /// The text fields that are tokenized, in tokenization order
    pub fn text_fields(&self) -> [&str; 3] {
        [&self.name, &self.place, &self.remarks]
    }
}

/// A literal word series paired with the sorted phonetic codes of its words
///
/// The phonetic series is the lookup key. Several word series can share one
/// phonetic series, and reviewer decisions are recorded against the words.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SeriesPair {
    /// Words in occurrence order
    pub word_series: Vec<String>,
    /// Phonetic codes of `word_series`, sorted
    pub phonetic_series: Vec<String>,
}

impl SeriesPair {
    /// Build a series pair; `codes` may be in any order
    pub fn new(words: Vec<String>, mut codes: Vec<String>) -> Self {
        codes.sort();
        Self {
            word_series: words,
            phonetic_series: codes,
        }
    }

    /// Canonical storage key of the phonetic series
    pub fn key(&self) -> String {
        self.phonetic_series.join(" ")
    }
}

impl fmt::Display for SeriesPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{}\" [{}]", self.word_series.join(" "), self.key())
    }
}
