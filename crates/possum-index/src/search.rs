//! Keyword search over stored terms

use std::collections::HashMap;

use possum_core::{PossumError, PossumResult, SearchHit};

use crate::store::MetadataStore;

/// Find blocks with a term containing `query` scored at least `min_score`.
///
/// Matching tags are merged per block and the block's relevance is its best
/// matching score. Results are ordered by relevance, highest first; equal
/// scores keep the order the tags were indexed in.
pub fn search(
    store: &dyn MetadataStore,
    query: &str,
    min_score: f64,
) -> PossumResult<Vec<SearchHit>> {
    let query = query.trim().to_lowercase();
    if query.is_empty() {
        return Err(PossumError::Input("search query is empty".into()));
    }
    if !min_score.is_finite() {
        return Err(PossumError::Input(format!("invalid min_score {min_score}")));
    }

    let mut hits: Vec<SearchHit> = Vec::new();
    let mut by_block: HashMap<String, usize> = HashMap::new();
    let mut names: HashMap<String, String> = HashMap::new();

    for tag in store.find_tags(&query, min_score)? {
        if let Some(&i) = by_block.get(&tag.block_id) {
            let hit = &mut hits[i];
            if !hit.tags.contains(&tag.term) {
                hit.tags.push(tag.term);
            }
            hit.relevance_score = hit.relevance_score.max(tag.relevance_score);
            continue;
        }

        let Some(block) = store.get_block(&tag.block_id)? else {
            tracing::warn!(block_id = %tag.block_id, "tag references missing block");
            continue;
        };
        let original_name = match names.get(&block.file_id) {
            Some(name) => name.clone(),
            None => {
                let name = store
                    .get_file(&block.file_id)?
                    .map(|f| f.original_name)
                    .unwrap_or_default();
                names.insert(block.file_id.clone(), name.clone());
                name
            }
        };

        by_block.insert(tag.block_id.clone(), hits.len());
        hits.push(SearchHit {
            block_id: tag.block_id,
            file_id: block.file_id,
            original_name,
            block_index: block.index,
            content_preview: block.content_preview,
            relevance_score: tag.relevance_score,
            tags: vec![tag.term],
            url: None,
        });
    }

    hits.sort_by(|a, b| b.relevance_score.total_cmp(&a.relevance_score));
    tracing::debug!(query = %query, min_score, hits = hits.len(), "search");
    Ok(hits)
}
