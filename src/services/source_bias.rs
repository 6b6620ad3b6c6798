// Source Bias Lookup
// Read-only domain -> bias label reference table

use crate::models::SourceBiasRating;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use url::Url;

/// Domain ratings supplied by the surrounding application.
#[derive(Debug, Clone, Default)]
pub struct SourceBiasTable {
    ratings: HashMap<String, String>,
}

fn normalize_domain(domain: &str) -> String {
    let lower = domain.trim().trim_end_matches('.').to_ascii_lowercase();
    lower.strip_prefix("www.").unwrap_or(&lower).to_string()
}

impl SourceBiasTable {
    pub fn from_map(ratings: HashMap<String, String>) -> Self {
        let ratings = ratings
            .into_iter()
            .map(|(domain, label)| (normalize_domain(&domain), label))
            .collect();
        Self { ratings }
    }

    /// Load a JSON object of `{ "domain": "label" }`.
    pub fn load(path: &Path) -> Result<Self, String> {
        let content = fs::read_to_string(path)
            .map_err(|e| format!("Failed to read source bias table {}: {}", path.display(), e))?;
        let ratings: HashMap<String, String> = serde_json::from_str(&content)
            .map_err(|e| format!("Failed to parse source bias table: {}", e))?;
        Ok(Self::from_map(ratings))
    }

    pub fn len(&self) -> usize {
        self.ratings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ratings.is_empty()
    }

    /// Exact domain match, falling back to parent domains
    /// (`politics.example.com` -> `example.com`).
    pub fn lookup_domain(&self, domain: &str) -> Option<SourceBiasRating> {
        let mut candidate = normalize_domain(domain);
        loop {
            if let Some(label) = self.ratings.get(&candidate) {
                return Some(SourceBiasRating {
                    domain: candidate,
                    label: label.clone(),
                });
            }
            match candidate.split_once('.') {
                Some((_, rest)) if rest.contains('.') => candidate = rest.to_string(),
                _ => return None,
            }
        }
    }

    pub fn lookup_url(&self, url: &str) -> Option<SourceBiasRating> {
        let parsed = Url::parse(url.trim()).ok()?;
        self.lookup_domain(parsed.host_str()?)
    }
}
