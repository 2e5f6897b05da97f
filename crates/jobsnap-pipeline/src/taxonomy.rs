//! Skill taxonomy loading and compilation into boundary-aware matchers.
//!
//! A structurally invalid taxonomy is the one fatal condition in the core:
//! loading or compiling it aborts the run before any matching happens.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use regex::Regex;
use tokio::fs;
use tracing::warn;

/// Category name -> ordered list of literal skill phrases.
pub type SkillTaxonomy = BTreeMap<String, Vec<String>>;

pub async fn load_taxonomy(path: impl AsRef<Path>) -> Result<SkillTaxonomy> {
    let path = path.as_ref();
    let text = fs::read_to_string(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    serde_yaml::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}

#[derive(Debug, Clone)]
pub struct CompiledSkill {
    /// Canonical lowercase phrase, emitted verbatim in mention rows.
    pub phrase: String,
    pub pattern: Regex,
}

#[derive(Debug, Clone)]
pub struct CompiledCategory {
    pub name: String,
    pub skills: Vec<CompiledSkill>,
}

/// Immutable compiled taxonomy. Built once per run, then shared by
/// reference across matching workers; reusable for any number of postings.
#[derive(Debug, Clone)]
pub struct CompiledTaxonomy {
    pub categories: Vec<CompiledCategory>,
}

impl CompiledTaxonomy {
    pub fn compile(taxonomy: &SkillTaxonomy) -> Result<Self> {
        let mut categories = Vec::with_capacity(taxonomy.len());
        for (name, phrases) in taxonomy {
            let mut skills = Vec::with_capacity(phrases.len());
            for phrase in phrases {
                let canonical = phrase.trim().to_lowercase();
                if canonical.is_empty() {
                    warn!(category = name.as_str(), "skipping empty skill phrase");
                    continue;
                }
                let pattern = Regex::new(&boundary_pattern(&canonical)).with_context(|| {
                    format!("compiling skill pattern `{canonical}` in category `{name}`")
                })?;
                skills.push(CompiledSkill {
                    phrase: canonical,
                    pattern,
                });
            }
            categories.push(CompiledCategory {
                name: name.clone(),
                skills,
            });
        }
        Ok(Self { categories })
    }

    pub fn category_count(&self) -> usize {
        self.categories.len()
    }

    pub fn matcher_count(&self) -> usize {
        self.categories.iter().map(|c| c.skills.len()).sum()
    }
}

/// Escaped literal phrase guarded so any character adjacent to the match is
/// non-alphanumeric. Internal spaces stay literal, so a multi-word phrase
/// matches as one unit, while a short phrase cannot match inside a larger
/// token.
fn boundary_pattern(phrase: &str) -> String {
    format!("(?i)(^|[^a-z0-9]){}([^a-z0-9]|$)", regex::escape(phrase))
}
