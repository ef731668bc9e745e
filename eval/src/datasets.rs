// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! Dataset loading and record schema for Real/Fake news classification
//!
//! Records carry article metadata and derived content scores. Raw title and
//! body text are dropped at load time. The table is assumed complete: a missing
//! value is a precondition violation and surfaces as a schema error naming the
//! row, it is never imputed.

use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::fs::File;
use std::path::Path;
use std::str::FromStr;

/// Binary label. `Real` is the positive class throughout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Label {
    /// Fabricated or misleading article (code 0)
    Fake,
    /// Authentic article (code 1)
    Real,
}

impl Label {
    /// Convert to numeric value (Real = 1, Fake = 0)
    pub fn to_binary(&self) -> u8 {
        match self {
            Label::Real => 1,
            Label::Fake => 0,
        }
    }

    /// Create from binary value (1 = Real, anything else = Fake)
    pub fn from_binary(value: u8) -> Self {
        if value == 1 {
            Label::Real
        } else {
            Label::Fake
        }
    }

    /// Apply a decision boundary to a probability of `Real`.
    /// Probabilities at or above the threshold are `Real`.
    pub fn from_probability(probability: f64, threshold: f64) -> Self {
        if probability >= threshold {
            Label::Real
        } else {
            Label::Fake
        }
    }

    pub fn as_f64(&self) -> f64 {
        f64::from(self.to_binary())
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Label::Real => write!(f, "Real"),
            Label::Fake => write!(f, "Fake"),
        }
    }
}

impl FromStr for Label {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "real" | "1" => Ok(Label::Real),
            "fake" | "0" => Ok(Label::Fake),
            other => Err(PipelineError::schema(format!("label must be Real or Fake, got '{}'", other))),
        }
    }
}

/// Categorical record fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CategoricalField {
    State,
    Source,
    Category,
    PoliticalBias,
    FactCheckRating,
}

impl CategoricalField {
    pub const ALL: [CategoricalField; 5] = [
        CategoricalField::State,
        CategoricalField::Source,
        CategoricalField::Category,
        CategoricalField::PoliticalBias,
        CategoricalField::FactCheckRating,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            CategoricalField::State => "state",
            CategoricalField::Source => "source",
            CategoricalField::Category => "category",
            CategoricalField::PoliticalBias => "political_bias",
            CategoricalField::FactCheckRating => "fact_check_rating",
        }
    }
}

impl FromStr for CategoricalField {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|f| f.name() == s)
            .ok_or_else(|| PipelineError::schema(format!("unknown categorical field '{}'", s)))
    }
}

/// Continuous record fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContinuousField {
    SentimentScore,
    WordCount,
    CharCount,
    ReadabilityScore,
    NumShares,
    NumComments,
    TrustScore,
    ClickbaitScore,
    PlagiarismScore,
}

impl ContinuousField {
    pub const ALL: [ContinuousField; 9] = [
        ContinuousField::SentimentScore,
        ContinuousField::WordCount,
        ContinuousField::CharCount,
        ContinuousField::ReadabilityScore,
        ContinuousField::NumShares,
        ContinuousField::NumComments,
        ContinuousField::TrustScore,
        ContinuousField::ClickbaitScore,
        ContinuousField::PlagiarismScore,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ContinuousField::SentimentScore => "sentiment_score",
            ContinuousField::WordCount => "word_count",
            ContinuousField::CharCount => "char_count",
            ContinuousField::ReadabilityScore => "readability_score",
            ContinuousField::NumShares => "num_shares",
            ContinuousField::NumComments => "num_comments",
            ContinuousField::TrustScore => "trust_score",
            ContinuousField::ClickbaitScore => "clickbait_score",
            ContinuousField::PlagiarismScore => "plagiarism_score",
        }
    }
}

impl FromStr for ContinuousField {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|f| f.name() == s)
            .ok_or_else(|| PipelineError::schema(format!("unknown continuous field '{}'", s)))
    }
}

/// One news article after raw-text removal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Opaque identifier, never used as a feature
    pub id: String,
    pub state: String,
    pub source: String,
    pub category: String,
    pub political_bias: String,
    pub fact_check_rating: String,
    pub sentiment_score: f64,
    pub word_count: f64,
    pub char_count: f64,
    pub readability_score: f64,
    pub num_shares: f64,
    pub num_comments: f64,
    pub trust_score: f64,
    pub clickbait_score: f64,
    pub plagiarism_score: f64,
    pub label: Label,
}

impl Record {
    pub fn categorical(&self, field: CategoricalField) -> &str {
        match field {
            CategoricalField::State => &self.state,
            CategoricalField::Source => &self.source,
            CategoricalField::Category => &self.category,
            CategoricalField::PoliticalBias => &self.political_bias,
            CategoricalField::FactCheckRating => &self.fact_check_rating,
        }
    }

    pub fn continuous(&self, field: ContinuousField) -> f64 {
        match field {
            ContinuousField::SentimentScore => self.sentiment_score,
            ContinuousField::WordCount => self.word_count,
            ContinuousField::CharCount => self.char_count,
            ContinuousField::ReadabilityScore => self.readability_score,
            ContinuousField::NumShares => self.num_shares,
            ContinuousField::NumComments => self.num_comments,
            ContinuousField::TrustScore => self.trust_score,
            ContinuousField::ClickbaitScore => self.clickbait_score,
            ContinuousField::PlagiarismScore => self.plagiarism_score,
        }
    }

    pub fn set_continuous(&mut self, field: ContinuousField, value: f64) {
        let slot = match field {
            ContinuousField::SentimentScore => &mut self.sentiment_score,
            ContinuousField::WordCount => &mut self.word_count,
            ContinuousField::CharCount => &mut self.char_count,
            ContinuousField::ReadabilityScore => &mut self.readability_score,
            ContinuousField::NumShares => &mut self.num_shares,
            ContinuousField::NumComments => &mut self.num_comments,
            ContinuousField::TrustScore => &mut self.trust_score,
            ContinuousField::ClickbaitScore => &mut self.clickbait_score,
            ContinuousField::PlagiarismScore => &mut self.plagiarism_score,
        };
        *slot = value;
    }
}

/// CSV row shape. Extra columns (title, text, author, dates) are ignored.
#[derive(Debug, Deserialize)]
struct CsvRow {
    id: String,
    state: String,
    source: String,
    category: String,
    political_bias: String,
    fact_check_rating: String,
    sentiment_score: f64,
    word_count: f64,
    char_count: f64,
    readability_score: f64,
    num_shares: f64,
    num_comments: f64,
    trust_score: f64,
    clickbait_score: f64,
    plagiarism_score: f64,
    label: String,
}

impl CsvRow {
    fn into_record(self) -> Result<Record> {
        let label = self.label.parse::<Label>()?;
        Ok(Record {
            id: self.id,
            state: self.state,
            source: self.source,
            category: self.category,
            political_bias: self.political_bias,
            fact_check_rating: self.fact_check_rating,
            sentiment_score: self.sentiment_score,
            word_count: self.word_count,
            char_count: self.char_count,
            readability_score: self.readability_score,
            num_shares: self.num_shares,
            num_comments: self.num_comments,
            trust_score: self.trust_score,
            clickbait_score: self.clickbait_score,
            plagiarism_score: self.plagiarism_score,
            label,
        })
    }
}

/// A loaded, complete table ready for feature preparation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dataset {
    pub id: String,
    pub name: String,
    pub source: String,
    pub records: Vec<Record>,
}

impl Dataset {
    pub fn from_records(id: &str, name: &str, records: Vec<Record>) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            source: "memory".to_string(),
            records,
        }
    }

    /// Load a CSV table with a header row
    pub fn load_csv(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let mut reader = csv::ReaderBuilder::new().has_headers(true).from_reader(file);

        let headers = reader.headers()?.clone();
        let required = std::iter::once("id")
            .chain(CategoricalField::ALL.iter().map(|f| f.name()))
            .chain(ContinuousField::ALL.iter().map(|f| f.name()))
            .chain(std::iter::once("label"));
        for column in required {
            if !headers.iter().any(|h| h.trim() == column) {
                return Err(PipelineError::schema(format!(
                    "column '{}' missing from {}",
                    column,
                    path.display()
                )));
            }
        }

        let mut records = Vec::new();
        for (idx, row) in reader.deserialize::<CsvRow>().enumerate() {
            let row = row.map_err(|e| {
                PipelineError::schema(format!("row {} of {}: {}", idx + 1, path.display(), e))
            })?;
            let id = row.id.clone();
            let record = row
                .into_record()
                .map_err(|e| PipelineError::schema(format!("record '{}': {}", id, e)))?;
            records.push(record);
        }

        if records.is_empty() {
            return Err(PipelineError::insufficient_data(
                "dataset",
                format!("{} contains no records", path.display()),
            ));
        }

        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "csv".to_string());

        Ok(Self {
            id: name.clone(),
            name,
            source: path.display().to_string(),
            records,
        })
    }

    /// Generate a seeded synthetic table with a noisy but learnable signal
    pub fn load_synthetic(size: usize, seed: u64) -> Self {
        use rand::{Rng, SeedableRng};
        use rand_chacha::ChaCha8Rng;

        let mut rng = ChaCha8Rng::seed_from_u64(seed);

        let states = [
            "California", "Texas", "New York", "Florida", "Illinois", "Ohio", "Georgia", "Washington",
        ];
        let sources = [
            "Reuters", "AP", "BBC", "CNN", "Fox News", "The Onion", "Daily Buzz", "InfoWars Daily",
        ];
        let categories = [
            "Politics", "Health", "Technology", "Sports", "Entertainment", "Business", "Science",
        ];
        let biases = ["Left", "Center", "Right"];
        let ratings = ["FALSE", "Mixed", "TRUE"];

        let records = (0..size)
            .map(|i| {
                let is_real = rng.gen_bool(0.5);
                let (trust_mean, clickbait_mean, rating_bias): (f64, f64, usize) = if is_real {
                    (65.0, 0.35, 2)
                } else {
                    (40.0, 0.6, 0)
                };

                let word_count: f64 = rng.gen_range(150.0..1500.0_f64).round();
                let char_count = (word_count * rng.gen_range(4.5..6.5)).round();
                let rating = if rng.gen_bool(0.6) {
                    ratings[rating_bias]
                } else {
                    ratings[rng.gen_range(0..ratings.len())]
                };

                Record {
                    id: format!("synthetic_{}", i),
                    state: states[rng.gen_range(0..states.len())].to_string(),
                    source: sources[rng.gen_range(0..sources.len())].to_string(),
                    category: categories[rng.gen_range(0..categories.len())].to_string(),
                    political_bias: biases[rng.gen_range(0..biases.len())].to_string(),
                    fact_check_rating: rating.to_string(),
                    sentiment_score: rng.gen_range(-1.0..1.0),
                    word_count,
                    char_count,
                    readability_score: rng.gen_range(20.0..90.0),
                    num_shares: rng.gen_range(0.0..50_000.0_f64).round(),
                    num_comments: rng.gen_range(0.0..5_000.0_f64).round(),
                    trust_score: (trust_mean + rng.gen_range(-25.0..25.0)).clamp(0.0, 100.0),
                    clickbait_score: (clickbait_mean + rng.gen_range(-0.3..0.3_f64)).clamp(0.0, 1.0),
                    plagiarism_score: rng.gen_range(0.0..100.0),
                    label: if is_real { Label::Real } else { Label::Fake },
                }
            })
            .collect();

        Self {
            id: "synthetic".to_string(),
            name: "Synthetic News Metadata".to_string(),
            source: "generated".to_string(),
            records,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Get label distribution for a set of records
    pub fn label_distribution(records: &[Record]) -> HashMap<Label, usize> {
        let mut dist = HashMap::new();
        for record in records {
            *dist.entry(record.label).or_insert(0) += 1;
        }
        dist
    }
}
