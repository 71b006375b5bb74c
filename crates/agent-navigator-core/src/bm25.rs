//! Okapi BM25 over a pre-tokenized corpus.
//!
//! Inverse document frequency uses `ln((N - n + 0.5) / (n + 0.5))`. Terms that
//! occur in more than half of the documents would get a negative idf; those are
//! floored to `epsilon * average_idf` instead, so very common terms still
//! contribute a small positive weight in corpora of reasonable size.

use std::collections::{BTreeMap, HashMap};

pub const DEFAULT_K1: f64 = 1.5;
pub const DEFAULT_B: f64 = 0.75;
pub const DEFAULT_EPSILON: f64 = 0.25;

#[derive(Debug, Clone)]
pub struct Bm25 {
    k1: f64,
    b: f64,
    doc_freqs: Vec<HashMap<String, u32>>,
    doc_len: Vec<usize>,
    avgdl: f64,
    idf: HashMap<String, f64>,
}

impl Bm25 {
    pub fn new(corpus: &[Vec<String>]) -> Self {
        Self::with_params(corpus, DEFAULT_K1, DEFAULT_B, DEFAULT_EPSILON)
    }

    pub fn with_params(corpus: &[Vec<String>], k1: f64, b: f64, epsilon: f64) -> Self {
        let mut doc_freqs = Vec::with_capacity(corpus.len());
        let mut doc_len = Vec::with_capacity(corpus.len());
        // Ordered so the idf sum is reproducible across runs.
        let mut containing: BTreeMap<String, u32> = BTreeMap::new();
        let mut total_len = 0usize;

        for doc in corpus {
            let mut freqs: HashMap<String, u32> = HashMap::new();
            for token in doc {
                *freqs.entry(token.clone()).or_insert(0) += 1;
            }
            for term in freqs.keys() {
                *containing.entry(term.clone()).or_insert(0) += 1;
            }
            total_len += doc.len();
            doc_len.push(doc.len());
            doc_freqs.push(freqs);
        }

        let n_docs = corpus.len() as f64;
        let avgdl = if corpus.is_empty() {
            0.0
        } else {
            total_len as f64 / n_docs
        };

        let mut idf: HashMap<String, f64> = HashMap::with_capacity(containing.len());
        let mut idf_sum = 0.0;
        let mut negative: Vec<String> = Vec::new();
        for (term, n) in containing {
            let n = n as f64;
            let value = (n_docs - n + 0.5).ln() - (n + 0.5).ln();
            idf_sum += value;
            if value < 0.0 {
                negative.push(term.clone());
            }
            idf.insert(term, value);
        }

        if !idf.is_empty() {
            let floor = epsilon * (idf_sum / idf.len() as f64);
            for term in negative {
                idf.insert(term, floor);
            }
        }

        Self {
            k1,
            b,
            doc_freqs,
            doc_len,
            avgdl,
            idf,
        }
    }

    pub fn len(&self) -> usize {
        self.doc_len.len()
    }

    pub fn is_empty(&self) -> bool {
        self.doc_len.is_empty()
    }

    /// Inverse document frequency of `term`, or 0 if it never occurs.
    pub fn idf(&self, term: &str) -> f64 {
        self.idf.get(term).copied().unwrap_or(0.0)
    }

    /// Scores every document against `query`, in corpus order.
    ///
    /// Repeated query tokens contribute once per occurrence.
    pub fn scores(&self, query: &[String]) -> Vec<f64> {
        let mut scores = vec![0.0; self.doc_len.len()];
        if self.avgdl <= 0.0 {
            return scores;
        }
        for term in query {
            let idf = self.idf(term);
            if idf == 0.0 {
                continue;
            }
            for (i, freqs) in self.doc_freqs.iter().enumerate() {
                let tf = freqs.get(term.as_str()).copied().unwrap_or(0) as f64;
                if tf == 0.0 {
                    continue;
                }
                let norm = 1.0 - self.b + self.b * self.doc_len[i] as f64 / self.avgdl;
                scores[i] += idf * (tf * (self.k1 + 1.0)) / (tf + self.k1 * norm);
            }
        }
        scores
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn docs(texts: &[&str]) -> Vec<Vec<String>> {
        texts
            .iter()
            .map(|t| t.split_whitespace().map(str::to_string).collect())
            .collect()
    }

    #[test]
    fn rare_term_outscores_absent_term() {
        let bm = Bm25::new(&docs(&["rust search engine", "python web app", "go cli tool"]));
        let s = bm.scores(&["rust".to_string()]);
        assert!(s[0] > 0.0);
        assert_eq!(s[1], 0.0);
        assert_eq!(s[2], 0.0);
    }

    #[test]
    fn common_term_idf_is_floored_positive() {
        // "bot" appears in 2 of 3 docs, which gives a negative raw idf.
        let bm = Bm25::new(&docs(&["pdf chat bot", "voice assistant", "slack bot"]));
        let idf = bm.idf("bot");
        assert!(idf > 0.0, "expected epsilon floor, got {}", idf);
        assert!(idf < bm.idf("pdf"));
    }

    #[test]
    fn shorter_document_wins_on_equal_tf() {
        let bm = Bm25::new(&docs(&[
            "agent",
            "agent with many other words in it",
            "unrelated",
            "unrelated again",
            "still unrelated",
        ]));
        let s = bm.scores(&["agent".to_string()]);
        assert!(s[0] > s[1]);
    }

    #[test]
    fn empty_corpus_scores_nothing() {
        let bm = Bm25::new(&[]);
        assert!(bm.is_empty());
        assert!(bm.scores(&["x".to_string()]).is_empty());
    }
}
