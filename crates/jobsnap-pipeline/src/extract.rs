//! Skill matcher: presence-only scan of postings against the compiled
//! taxonomy.

use std::collections::HashSet;

use jobsnap_core::{NormalizedPosting, SkillMention};
use rayon::prelude::*;

use crate::taxonomy::CompiledTaxonomy;

/// Scan every posting against every compiled matcher and collect one mention
/// row per distinct (posting, skill, category).
///
/// Work is O(postings x matchers x text length) with no shared mutable
/// state, so postings are scanned in parallel. Output order is postings in
/// table order, then taxonomy order within each posting.
pub fn extract_mentions(
    postings: &[NormalizedPosting],
    taxonomy: &CompiledTaxonomy,
) -> Vec<SkillMention> {
    postings
        .par_iter()
        .flat_map_iter(|posting| mentions_for(posting, taxonomy))
        .collect()
}

fn mentions_for(posting: &NormalizedPosting, taxonomy: &CompiledTaxonomy) -> Vec<SkillMention> {
    // The full description is always the matching text; the short variant is
    // retained on the posting but never scanned.
    let haystack = format!("{} {}", posting.title, posting.description_full).to_lowercase();

    let mut seen: HashSet<(&str, &str)> = HashSet::new();
    let mut mentions = Vec::new();
    for category in &taxonomy.categories {
        for skill in &category.skills {
            if !skill.pattern.is_match(&haystack) {
                continue;
            }
            if seen.insert((category.name.as_str(), skill.phrase.as_str())) {
                mentions.push(SkillMention {
                    posting_id: posting.id.clone(),
                    skill: skill.phrase.clone(),
                    category: category.name.clone(),
                });
            }
        }
    }
    mentions
}
