//! Term-frequency similarity search over prior executor outputs.
//!
//! Documents are tokenized into lowercase words of two or more word
//! characters, weighted with smoothed TF-IDF (`idf = ln((1 + n) / (1 + df)) + 1`)
//! and L2-normalized, so ranking is by cosine similarity.

use std::collections::{BTreeMap, HashMap};
use std::sync::LazyLock;

use regex::Regex;

static TOKEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\w\w+\b").expect("token regex should compile"));

/// A document index with its similarity score for a query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Scored {
    pub index: usize,
    pub score: f64,
}

/// TF-IDF index fitted on a fixed corpus.
#[derive(Debug, Clone)]
pub struct TfIdfIndex {
    vocabulary: BTreeMap<String, usize>,
    idf: Vec<f64>,
    documents: Vec<Vec<f64>>,
}

impl TfIdfIndex {
    /// Fit the index. Returns `None` when the corpus has no indexable terms.
    pub fn fit<S: AsRef<str>>(corpus: &[S]) -> Option<Self> {
        let tokenized: Vec<Vec<String>> = corpus.iter().map(|doc| tokenize(doc.as_ref())).collect();

        let mut vocabulary = BTreeMap::new();
        for term in tokenized.iter().flatten() {
            let next = vocabulary.len();
            vocabulary.entry(term.clone()).or_insert(next);
        }
        if vocabulary.is_empty() {
            return None;
        }

        let mut document_frequency = vec![0usize; vocabulary.len()];
        for tokens in &tokenized {
            let mut seen = vec![false; vocabulary.len()];
            for term in tokens {
                let idx = vocabulary[term];
                if !seen[idx] {
                    seen[idx] = true;
                    document_frequency[idx] += 1;
                }
            }
        }

        let n = tokenized.len() as f64;
        let idf = document_frequency
            .iter()
            .map(|df| ((1.0 + n) / (1.0 + *df as f64)).ln() + 1.0)
            .collect();

        let mut index = Self {
            vocabulary,
            idf,
            documents: Vec::new(),
        };
        index.documents = tokenized.iter().map(|tokens| index.weigh(tokens)).collect();
        Some(index)
    }

    /// Number of indexed documents.
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Vectorize free text against the fitted vocabulary; unknown terms are ignored.
    pub fn transform(&self, text: &str) -> Vec<f64> {
        self.weigh(&tokenize(text))
    }

    /// Score every document against the query, most similar first.
    ///
    /// Ties keep the later (more recent) document first.
    pub fn rank(&self, query: &str) -> Vec<Scored> {
        let query_vec = self.transform(query);
        let mut scored: Vec<Scored> = self
            .documents
            .iter()
            .enumerate()
            .map(|(index, doc)| Scored {
                index,
                score: cosine_similarity(&query_vec, doc),
            })
            .collect();
        scored.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| b.index.cmp(&a.index))
        });
        scored
    }

    fn weigh(&self, tokens: &[String]) -> Vec<f64> {
        let mut counts: HashMap<usize, f64> = HashMap::new();
        for term in tokens {
            if let Some(&idx) = self.vocabulary.get(term) {
                *counts.entry(idx).or_insert(0.0) += 1.0;
            }
        }
        let mut vector = vec![0.0; self.vocabulary.len()];
        for (idx, count) in counts {
            vector[idx] = count * self.idf[idx];
        }
        let norm = vector.iter().map(|x| x * x).sum::<f64>().sqrt();
        if norm > 0.0 {
            for x in &mut vector {
                *x /= norm;
            }
        }
        vector
    }
}

/// Lowercase word tokens of at least two word characters.
pub fn tokenize(text: &str) -> Vec<String> {
    let lowered = text.to_lowercase();
    TOKEN_RE
        .find_iter(&lowered)
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Cosine similarity; zero when either vector is zero or lengths differ.
pub fn cosine_similarity(a: &[f64], b: &[f64]) -> f64 {
    if a.len() != b.len() {
        return 0.0;
    }
    let dot: f64 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f64>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f64>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

/// Indices of the `k` corpus entries most similar to `query`, most similar first.
///
/// A degenerate corpus (empty, or no indexable terms) yields no context.
pub fn top_k_similar<S: AsRef<str>>(query: &str, corpus: &[S], k: usize) -> Vec<usize> {
    if k == 0 || corpus.is_empty() {
        return Vec::new();
    }
    let Some(index) = TfIdfIndex::fit(corpus) else {
        return Vec::new();
    };
    index.rank(query).into_iter().take(k).map(|s| s.index).collect()
}
