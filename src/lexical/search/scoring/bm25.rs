//! BM25 similarity.

use serde::{Deserialize, Serialize};

/// BM25 parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Bm25Params {
    /// Term frequency saturation.
    pub k1: f32,

    /// Field length normalization, 0 disables it.
    pub b: f32,
}

impl Default for Bm25Params {
    fn default() -> Self {
        Bm25Params { k1: 1.2, b: 0.75 }
    }
}

/// Statistics of one field across a snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CollectionStats {
    /// Documents with a value in the field, deleted ones included.
    pub doc_count: u64,
    pub sum_total_term_freq: u64,
}

impl CollectionStats {
    pub fn avg_field_length(&self) -> f32 {
        if self.doc_count == 0 || self.sum_total_term_freq == 0 {
            1.0
        } else {
            self.sum_total_term_freq as f32 / self.doc_count as f32
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Bm25Similarity {
    params: Bm25Params,
}

impl Bm25Similarity {
    pub fn new(params: Bm25Params) -> Self {
        Bm25Similarity { params }
    }

    pub fn params(&self) -> Bm25Params {
        self.params
    }

    /// `ln(1 + (N - df + 0.5) / (df + 0.5))`
    pub fn idf(&self, doc_freq: u64, doc_count: u64) -> f32 {
        let n = doc_count.max(doc_freq) as f64;
        let df = doc_freq as f64;
        (1.0 + (n - df + 0.5) / (df + 0.5)).ln() as f32
    }

    /// Scorer for one term (or the summed idf of a phrase).
    pub fn scorer(&self, idf: f32, stats: CollectionStats, boost: f32) -> SimScorer {
        SimScorer {
            weight: boost * idf * (self.params.k1 + 1.0),
            k1: self.params.k1,
            b: self.params.b,
            avg_field_length: stats.avg_field_length(),
        }
    }
}

/// BM25 with the collection statistics of one query term baked in.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimScorer {
    /// `boost * idf * (k1 + 1)`
    weight: f32,
    k1: f32,
    b: f32,
    avg_field_length: f32,
}

impl SimScorer {
    /// Score of a document in which the term occurs `freq` times. `field_length` is
    /// `None` for fields without norms, which are not length normalized.
    pub fn score(&self, freq: f32, field_length: Option<u32>) -> f32 {
        if freq <= 0.0 {
            return 0.0;
        }
        let norm = match field_length {
            Some(length) => 1.0 - self.b + self.b * (length as f32 / self.avg_field_length),
            None => 1.0,
        };
        self.weight * freq / (freq + self.k1 * norm)
    }

    /// Highest score any document can reach.
    pub fn max_score(&self) -> f32 {
        self.weight
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scorer(df: u64, n: u64) -> SimScorer {
        let sim = Bm25Similarity::default();
        sim.scorer(
            sim.idf(df, n),
            CollectionStats {
                doc_count: n,
                sum_total_term_freq: n * 10,
            },
            1.0,
        )
    }

    #[test]
    fn test_idf_formula() {
        let sim = Bm25Similarity::default();
        let expected = (1.0f64 + (10.0 - 2.0 + 0.5) / (2.0 + 0.5)).ln() as f32;
        assert!((sim.idf(2, 10) - expected).abs() < 1e-6);
        assert!(sim.idf(1, 10) > sim.idf(5, 10));
        assert!(sim.idf(10, 10) > 0.0);
    }

    #[test]
    fn test_score_matches_formula() {
        let sim = Bm25Similarity::default();
        let idf = sim.idf(3, 100);
        let s = scorer(3, 100);
        let (k1, b, avgdl) = (1.2f32, 0.75f32, 10.0f32);
        let tf_norm = 2.0 / (2.0 + k1 * (1.0 - b) + k1 * b * 20.0 / avgdl);
        assert!((s.score(2.0, Some(20)) - idf * tf_norm * (k1 + 1.0)).abs() < 1e-5);
    }

    #[test]
    fn test_monotonic_in_freq_and_length() {
        let s = scorer(5, 1000);
        let mut last = 0.0;
        for freq in 1..50 {
            let score = s.score(freq as f32, Some(40));
            assert!(score >= last);
            last = score;
        }
        let mut last = f32::MAX;
        for length in 1..200 {
            let score = s.score(3.0, Some(length));
            assert!(score <= last);
            last = score;
        }
        assert!(s.score(1000.0, Some(1)) <= s.max_score());
    }

    #[test]
    fn test_no_norms_ignore_length() {
        let s = scorer(5, 1000);
        // a document of average length is not normalized either
        assert_eq!(s.score(1.0, None), s.score(1.0, Some(10)));
        assert!(s.score(1.0, None) > s.score(1.0, Some(1000)));
    }
}
