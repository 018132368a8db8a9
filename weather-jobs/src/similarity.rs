use std::collections::BTreeMap;

use rust_stemmers::{Algorithm, Stemmer};
use weather_common::round2;

/// Stemmed term counts of an article, stored as the page's `content_vector`.
pub type TermFrequencies = BTreeMap<String, i64>;

/// Lowercases, splits on whitespace and stems every word with the English
/// Snowball stemmer. Punctuation around a word is dropped.
pub fn term_frequencies(content: &str) -> TermFrequencies {
    let stemmer = Stemmer::create(Algorithm::English);
    let mut frequencies = TermFrequencies::new();
    for word in content.to_lowercase().split_whitespace() {
        let word = word.trim_matches(|c: char| !c.is_alphanumeric());
        if word.is_empty() {
            continue;
        }
        *frequencies
            .entry(stemmer.stem(word).into_owned())
            .or_insert(0) += 1;
    }
    frequencies
}

/// Cosine of the angle between two term count vectors, 0 when either is
/// empty.
pub fn cosine_similarity(a: &TermFrequencies, b: &TermFrequencies) -> f64 {
    let dot: i64 = a
        .iter()
        .filter_map(|(term, count)| b.get(term).map(|other| count * other))
        .sum();
    let norm = |v: &TermFrequencies| v.values().map(|c| c * c).sum::<i64>() as f64;
    let (norm_a, norm_b) = (norm(a), norm(b));
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot as f64 / (norm_a.sqrt() * norm_b.sqrt())
}

#[derive(Debug, Clone, PartialEq)]
pub struct SimilarityPair {
    pub first: String,
    pub second: String,
    pub score: f64,
}

/// Scores every unordered pair of articles once and emits it in both
/// directions with the same rounded score.
pub fn symmetric_pairs(articles: &[(String, TermFrequencies)]) -> Vec<SimilarityPair> {
    let mut pairs = Vec::new();
    for (i, (url_a, vector_a)) in articles.iter().enumerate() {
        for (url_b, vector_b) in &articles[i + 1..] {
            let score = round2(cosine_similarity(vector_a, vector_b));
            pairs.push(SimilarityPair {
                first: url_a.clone(),
                second: url_b.clone(),
                score,
            });
            pairs.push(SimilarityPair {
                first: url_b.clone(),
                second: url_a.clone(),
                score,
            });
        }
    }
    pairs
}
