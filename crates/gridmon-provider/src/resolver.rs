//! Free-text location lookup against a [`ZoneCatalog`].
//!
//! Each zone is ranked twice, once by code and once by display name. A rank is the
//! edit distance between the case- and accent-folded search term and the field, and is
//! only defined when the term's characters appear in the field in order. Rank 0 is an
//! exact match and wins immediately. Otherwise the lowest rank wins if it is below the
//! acceptance threshold. Equal ranks resolve to the zone seen first, i.e. the one with the
//! smaller code, since catalogs iterate in code order.

use crate::catalog::ZoneCatalog;
use crate::error::ProviderError;
use crate::{Zone, ZoneProvider};
use std::sync::Arc;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Best rank must be strictly below this value to be accepted.
pub const MATCH_THRESHOLD: usize = 5;

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("no zone matches location '{name}'")]
    NotFound { name: String },

    #[error("fetching zone catalog: {0}")]
    Provider(#[from] ProviderError),
}

/// Rank how well `source` matches `target`, ignoring case and common diacritics.
///
/// Returns `None` when `source` is not a subsequence of `target`, otherwise the
/// Levenshtein distance between the two folded strings.
///
/// # Examples
///
/// ```
/// use gridmon_provider::resolver::rank_match_fold;
///
/// assert_eq!(rank_match_fold("zurich", "Zürich"), Some(0));
/// assert_eq!(rank_match_fold("Zuric", "Zurich"), Some(1));
/// assert_eq!(rank_match_fold("xyz", "Berlin"), None);
/// ```
pub fn rank_match_fold(source: &str, target: &str) -> Option<usize> {
    let source = fold(source);
    let target = fold(target);
    if !is_subsequence(&source, &target) {
        return None;
    }
    Some(levenshtein(&source, &target))
}

/// Locate `name` in `catalog` with the default threshold.
pub fn locate(catalog: &ZoneCatalog, name: &str) -> Result<Zone, ResolveError> {
    locate_with_threshold(catalog, name, MATCH_THRESHOLD)
}

pub fn locate_with_threshold(
    catalog: &ZoneCatalog,
    name: &str,
    threshold: usize,
) -> Result<Zone, ResolveError> {
    let term = name.trim();
    if term.is_empty() {
        return Err(ResolveError::NotFound {
            name: name.to_string(),
        });
    }

    let mut best: Option<(usize, &Zone)> = None;
    for zone in catalog.iter() {
        for field in [zone.code.as_str(), zone.zone_name.as_str()] {
            let Some(rank) = rank_match_fold(term, field) else {
                continue;
            };
            if rank == 0 {
                return Ok(zone.clone());
            }
            if best.map_or(true, |(best_rank, _)| rank < best_rank) {
                best = Some((rank, zone));
            }
        }
    }

    match best {
        Some((rank, zone)) if rank < threshold => {
            tracing::debug!(name = %term, zone = %zone.code, rank, "Location matched");
            Ok(zone.clone())
        }
        _ => Err(ResolveError::NotFound {
            name: term.to_string(),
        }),
    }
}

/// Resolves location names by refreshing the catalog from a provider on every call.
pub struct ZoneResolver {
    provider: Arc<dyn ZoneProvider>,
    threshold: usize,
}

impl ZoneResolver {
    pub fn new(provider: Arc<dyn ZoneProvider>) -> Self {
        Self {
            provider,
            threshold: MATCH_THRESHOLD,
        }
    }

    pub fn with_threshold(mut self, threshold: usize) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn provider(&self) -> &Arc<dyn ZoneProvider> {
        &self.provider
    }

    pub async fn catalog(&self, api_key: &str) -> Result<ZoneCatalog, ProviderError> {
        ZoneCatalog::refresh(self.provider.as_ref(), api_key).await
    }

    pub fn locate(&self, catalog: &ZoneCatalog, name: &str) -> Result<Zone, ResolveError> {
        locate_with_threshold(catalog, name, self.threshold)
    }

    /// Fetch a fresh catalog and locate `name` in it.
    pub async fn resolve(&self, api_key: &str, name: &str) -> Result<Zone, ResolveError> {
        let catalog = self.catalog(api_key).await?;
        self.locate(&catalog, name)
    }
}

/// Lower-case and strip diacritics: NFD decomposition with combining marks dropped.
fn fold(s: &str) -> Vec<char> {
    s.nfd()
        .filter(|c| !is_combining_mark(*c))
        .flat_map(char::to_lowercase)
        .collect()
}

fn is_subsequence(needle: &[char], haystack: &[char]) -> bool {
    let mut rest = haystack.iter();
    needle.iter().all(|c| rest.any(|h| h == c))
}

fn levenshtein(a: &[char], b: &[char]) -> usize {
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev_row: Vec<usize> = (0..=b.len()).collect();
    let mut curr_row: Vec<usize> = vec![0; b.len() + 1];

    for (i, a_char) in a.iter().enumerate() {
        curr_row[0] = i + 1;
        for (j, b_char) in b.iter().enumerate() {
            let cost = usize::from(a_char != b_char);
            curr_row[j + 1] = (prev_row[j + 1] + 1)
                .min(curr_row[j] + 1)
                .min(prev_row[j] + cost);
        }
        std::mem::swap(&mut prev_row, &mut curr_row);
    }

    prev_row[b.len()]
}
