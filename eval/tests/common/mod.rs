// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

#![allow(dead_code)]

use news_ensemble::{Label, Record};

/// A record whose fields are all fixed apart from trust score and label
pub fn record(id: usize, trust_score: f64, label: Label) -> Record {
    Record {
        id: format!("n{:03}", id),
        state: "Ohio".to_string(),
        source: "Daily Ledger".to_string(),
        category: "Politics".to_string(),
        political_bias: "Center".to_string(),
        fact_check_rating: "Mixed".to_string(),
        sentiment_score: 0.1,
        word_count: 600.0,
        char_count: 3400.0,
        readability_score: 55.0,
        num_shares: 120.0,
        num_comments: 14.0,
        trust_score,
        clickbait_score: 0.3,
        plagiarism_score: 12.0,
        label,
    }
}

/// 10 Real records with trust in 80..=98 and 10 Fake records with trust in 0..=18
pub fn separable_records() -> Vec<Record> {
    let mut records = Vec::new();
    for i in 0..10 {
        records.push(record(i, 80.0 + 2.0 * i as f64, Label::Real));
        records.push(record(10 + i, 2.0 * i as f64, Label::Fake));
    }
    records
}
