//! Configuration of the cohort search engine.

use serde::{Deserialize, Serialize};

/// Default cap on candidate variants entering the observation join.
pub const SOFT_LIMIT: usize = 250;
/// Default cap on returned records.
pub const HARD_LIMIT: usize = 200;
/// Default cap on HPO term lookup results.
pub const MAX_TERM_RESULTS: usize = 50;

/// Limits applied by the search engine.
///
/// The soft limit is larger than the hard limit on purpose: it bounds the
/// intermediate candidate set, the hard limit bounds the final output.
#[derive(Serialize, Deserialize, PartialEq, Eq, Debug, Clone, Copy)]
#[serde(default)]
pub struct SearchConf {
    /// Maximal number of candidate variants before the observation join.
    pub soft_limit: usize,
    /// Maximal number of returned records.
    pub hard_limit: usize,
    /// Maximal number of HPO terms returned by a term lookup.
    pub max_term_results: usize,
}

impl Default for SearchConf {
    fn default() -> Self {
        Self {
            soft_limit: SOFT_LIMIT,
            hard_limit: HARD_LIMIT,
            max_term_results: MAX_TERM_RESULTS,
        }
    }
}

impl SearchConf {
    /// Load configuration from a TOML file; missing keys take their defaults.
    pub fn load<P: AsRef<std::path::Path>>(path: P) -> Result<Self, anyhow::Error> {
        let toml_str = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            anyhow::anyhow!("could not read {}: {}", path.as_ref().display(), e)
        })?;
        Ok(toml::from_str(&toml_str)?)
    }

    /// Load from `path` if given, else use defaults; then apply the overrides.
    pub fn resolve(
        path: Option<&str>,
        soft_limit: Option<usize>,
        hard_limit: Option<usize>,
        max_term_results: Option<usize>,
    ) -> Result<Self, anyhow::Error> {
        let mut conf = match path {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        if let Some(soft_limit) = soft_limit {
            conf.soft_limit = soft_limit;
        }
        if let Some(hard_limit) = hard_limit {
            conf.hard_limit = hard_limit;
        }
        if let Some(max_term_results) = max_term_results {
            conf.max_term_results = max_term_results;
        }
        Ok(conf)
    }
}
