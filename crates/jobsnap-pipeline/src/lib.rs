//! Snapshot normalization pipeline: orchestration, parquet table export,
//! and per-run reports.
//!
//! Each run reads the full raw snapshot, recomputes both output tables, and
//! atomically replaces them. Reruns with unchanged snapshot, taxonomy, and
//! reference date produce byte-identical tables.

pub mod extract;
pub mod normalize;
pub mod taxonomy;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow_array::{Float64Array, RecordBatch, StringArray};
use arrow_schema::{DataType, Field, Schema};
use chrono::{DateTime, NaiveDate, Utc};
use jobsnap_core::{NormalizedPosting, SkillMention};
use jobsnap_storage::{StoredTable, TableStore};
use parquet::arrow::ArrowWriter;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::info;
use uuid::Uuid;

use crate::normalize::Normalizer;
use crate::taxonomy::CompiledTaxonomy;

pub const CRATE_NAME: &str = "jobsnap-pipeline";

pub const NORMALIZED_TABLE_FILE: &str = "normalized_postings.parquet";
pub const SKILL_MENTIONS_TABLE_FILE: &str = "skill_mentions.parquet";
pub const MANIFEST_FILE: &str = "manifest.json";

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub snapshot_path: PathBuf,
    pub taxonomy_path: PathBuf,
    pub tables_dir: PathBuf,
    pub reports_dir: PathBuf,
    /// Snapshot date used to resolve relative posting ages. Fixed
    /// configuration, never wall clock, so reruns are reproducible.
    pub reference_date: NaiveDate,
}

impl PipelineConfig {
    pub fn from_env() -> Self {
        Self {
            snapshot_path: env_path("JOBSNAP_SNAPSHOT", "./snapshot/raw_postings.json"),
            taxonomy_path: env_path("JOBSNAP_TAXONOMY", "./taxonomy.yaml"),
            tables_dir: env_path("JOBSNAP_TABLES_DIR", "./warehouse/tables"),
            reports_dir: env_path("JOBSNAP_REPORTS_DIR", "./reports"),
            reference_date: std::env::var("JOBSNAP_REFERENCE_DATE")
                .ok()
                .and_then(|v| NaiveDate::parse_from_str(&v, "%Y-%m-%d").ok())
                .unwrap_or_else(default_reference_date),
        }
    }
}

fn env_path(key: &str, fallback: &str) -> PathBuf {
    std::env::var(key)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(fallback))
}

/// Snapshot date of the source dataset, used when no reference date is
/// configured.
pub fn default_reference_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2022, 11, 20).expect("valid default reference date")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub reference_date: NaiveDate,
    pub raw_rows: usize,
    pub normalized_rows: usize,
    pub duplicates_dropped: usize,
    pub taxonomy_categories: usize,
    pub taxonomy_matchers: usize,
    pub mention_rows: usize,
    pub tables_dir: String,
    pub reports_dir: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableManifest {
    pub schema_version: u32,
    pub tables: Vec<TableManifestEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableManifestEntry {
    pub name: String,
    pub path: String,
    pub sha256: String,
    pub bytes: u64,
}

fn manifest_entry(name: &str, stored: &StoredTable) -> TableManifestEntry {
    TableManifestEntry {
        name: name.to_string(),
        path: stored.relative_path.display().to_string(),
        sha256: stored.content_hash.clone(),
        bytes: stored.byte_size as u64,
    }
}

pub struct Pipeline {
    config: PipelineConfig,
    tables: TableStore,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Self {
        let tables = TableStore::new(config.tables_dir.clone());
        Self { config, tables }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub async fn run_once(&self) -> Result<RunSummary> {
        let started_at = Utc::now();
        let run_id = Uuid::new_v4();

        // Taxonomy problems are the one fatal condition in the core; fail
        // before touching any record data.
        let source = taxonomy::load_taxonomy(&self.config.taxonomy_path).await?;
        let compiled = CompiledTaxonomy::compile(&source)?;

        let raw = jobsnap_storage::read_raw_snapshot(&self.config.snapshot_path)
            .await
            .context("loading raw snapshot")?;

        let normalizer = Normalizer::new(self.config.reference_date);
        let outcome = normalizer.normalize(&raw);
        info!(
            raw_rows = raw.len(),
            normalized_rows = outcome.postings.len(),
            duplicates_dropped = outcome.duplicates_dropped,
            "normalized snapshot"
        );

        let mentions = extract::extract_mentions(&outcome.postings, &compiled);
        info!(
            mention_rows = mentions.len(),
            matchers = compiled.matcher_count(),
            "extracted skill mentions"
        );

        let normalized_bytes = encode_normalized_table(&outcome.postings)?;
        let stored_normalized = self
            .tables
            .replace_table(NORMALIZED_TABLE_FILE, &normalized_bytes)
            .await?;
        let mention_bytes = encode_mentions_table(&mentions)?;
        let stored_mentions = self
            .tables
            .replace_table(SKILL_MENTIONS_TABLE_FILE, &mention_bytes)
            .await?;

        let manifest = TableManifest {
            schema_version: 1,
            tables: vec![
                manifest_entry("normalized_postings", &stored_normalized),
                manifest_entry("skill_mentions", &stored_mentions),
            ],
        };
        let manifest_bytes =
            serde_json::to_vec_pretty(&manifest).context("serializing table manifest")?;
        self.tables.replace_table(MANIFEST_FILE, &manifest_bytes).await?;

        let finished_at = Utc::now();
        let summary = RunSummary {
            run_id,
            started_at,
            finished_at,
            reference_date: self.config.reference_date,
            raw_rows: raw.len(),
            normalized_rows: outcome.postings.len(),
            duplicates_dropped: outcome.duplicates_dropped,
            taxonomy_categories: compiled.category_count(),
            taxonomy_matchers: compiled.matcher_count(),
            mention_rows: mentions.len(),
            tables_dir: self.config.tables_dir.display().to_string(),
            reports_dir: self.config.reports_dir.display().to_string(),
        };
        self.write_reports(&summary, &outcome.postings).await?;
        Ok(summary)
    }

    async fn write_reports(
        &self,
        summary: &RunSummary,
        postings: &[NormalizedPosting],
    ) -> Result<PathBuf> {
        let run_dir = self.config.reports_dir.join(summary.run_id.to_string());
        fs::create_dir_all(&run_dir)
            .await
            .with_context(|| format!("creating {}", run_dir.display()))?;

        let summary_json =
            serde_json::to_vec_pretty(summary).context("serializing run summary")?;
        fs::write(run_dir.join("run_summary.json"), summary_json)
            .await
            .context("writing run_summary.json")?;

        let mut family_counts: BTreeMap<&str, usize> = BTreeMap::new();
        for posting in postings {
            *family_counts.entry(posting.role_family.as_str()).or_default() += 1;
        }

        let brief = format!(
            "# Jobsnap Run Brief\n\n- Run ID: `{}`\n- Started: {}\n- Finished: {}\n- Reference date: {}\n- Raw rows: {}\n- Normalized rows: {}\n- Duplicates dropped: {}\n- Skill mentions: {}\n\n## Role Families\n{}\n",
            summary.run_id,
            summary.started_at,
            summary.finished_at,
            summary.reference_date,
            summary.raw_rows,
            summary.normalized_rows,
            summary.duplicates_dropped,
            summary.mention_rows,
            family_counts
                .iter()
                .map(|(family, count)| format!("- {}: {}", family, count))
                .collect::<Vec<_>>()
                .join("\n")
        );
        fs::write(run_dir.join("run_brief.md"), brief)
            .await
            .context("writing run_brief.md")?;

        Ok(run_dir)
    }
}

pub async fn run_pipeline_from_env() -> Result<RunSummary> {
    Pipeline::new(PipelineConfig::from_env()).run_once().await
}

/// Render the most recent run summaries as a markdown digest.
pub fn report_runs_markdown(runs: usize, reports_root: impl AsRef<Path>) -> Result<String> {
    let reports_root = reports_root.as_ref();
    let mut dirs = std::fs::read_dir(reports_root)
        .with_context(|| format!("reading {}", reports_root.display()))?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().map(|ft| ft.is_dir()).unwrap_or(false))
        .collect::<Vec<_>>();
    dirs.sort_by_key(|e| e.metadata().and_then(|m| m.modified()).ok());
    dirs.reverse();

    let mut lines = vec!["# Jobsnap Recent Runs".to_string(), String::new()];
    for dir in dirs.into_iter().take(runs.max(1)) {
        let run_id = dir.file_name().to_string_lossy().to_string();
        let summary_path = dir.path().join("run_summary.json");
        let summary: RunSummary = serde_json::from_str(
            &std::fs::read_to_string(&summary_path)
                .with_context(|| format!("reading {}", summary_path.display()))?,
        )
        .with_context(|| format!("parsing {}", summary_path.display()))?;

        lines.push(format!("## Run `{run_id}`"));
        lines.push(format!("- reference date: {}", summary.reference_date));
        lines.push(format!(
            "- normalized rows: {} ({} duplicates dropped)",
            summary.normalized_rows, summary.duplicates_dropped
        ));
        lines.push(format!("- skill mentions: {}", summary.mention_rows));
        lines.push(format!("- tables: `{}`", summary.tables_dir));
        lines.push(String::new());
    }
    Ok(lines.join("\n"))
}

fn encode_parquet(batch: RecordBatch) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    let mut writer =
        ArrowWriter::try_new(&mut buf, batch.schema(), None).context("opening parquet writer")?;
    writer.write(&batch).context("writing record batch")?;
    writer.close().context("closing parquet writer")?;
    Ok(buf)
}

/// Encode the normalized posting table. Column set and order are the fixed
/// downstream contract.
pub fn encode_normalized_table(postings: &[NormalizedPosting]) -> Result<Vec<u8>> {
    let schema = Arc::new(Schema::new(vec![
        Field::new("id", DataType::Utf8, false),
        Field::new("title", DataType::Utf8, false),
        Field::new("company", DataType::Utf8, false),
        Field::new("location", DataType::Utf8, false),
        Field::new("rating", DataType::Float64, true),
        Field::new("posted_date", DataType::Utf8, true),
        Field::new("posted_date_raw", DataType::Utf8, false),
        Field::new("salary_raw", DataType::Utf8, false),
        Field::new("link", DataType::Utf8, false),
        Field::new("description_short", DataType::Utf8, false),
        Field::new("description_full", DataType::Utf8, false),
        Field::new("role_family", DataType::Utf8, false),
    ]));

    let ids = StringArray::from(postings.iter().map(|p| Some(p.id.as_str())).collect::<Vec<_>>());
    let titles =
        StringArray::from(postings.iter().map(|p| Some(p.title.as_str())).collect::<Vec<_>>());
    let companies =
        StringArray::from(postings.iter().map(|p| Some(p.company.as_str())).collect::<Vec<_>>());
    let locations =
        StringArray::from(postings.iter().map(|p| Some(p.location.as_str())).collect::<Vec<_>>());
    let ratings = Float64Array::from(postings.iter().map(|p| p.rating).collect::<Vec<_>>());
    let posted_dates = postings
        .iter()
        .map(|p| p.posted_date.map(|d| d.to_string()))
        .collect::<StringArray>();
    let posted_dates_raw = StringArray::from(
        postings
            .iter()
            .map(|p| Some(p.posted_date_raw.as_str()))
            .collect::<Vec<_>>(),
    );
    let salaries = StringArray::from(
        postings
            .iter()
            .map(|p| Some(p.salary_raw.as_str()))
            .collect::<Vec<_>>(),
    );
    let links =
        StringArray::from(postings.iter().map(|p| Some(p.link.as_str())).collect::<Vec<_>>());
    let descriptions_short = StringArray::from(
        postings
            .iter()
            .map(|p| Some(p.description_short.as_str()))
            .collect::<Vec<_>>(),
    );
    let descriptions_full = StringArray::from(
        postings
            .iter()
            .map(|p| Some(p.description_full.as_str()))
            .collect::<Vec<_>>(),
    );
    let role_families = StringArray::from(
        postings
            .iter()
            .map(|p| Some(p.role_family.as_str()))
            .collect::<Vec<_>>(),
    );

    let batch = RecordBatch::try_new(
        schema,
        vec![
            Arc::new(ids),
            Arc::new(titles),
            Arc::new(companies),
            Arc::new(locations),
            Arc::new(ratings),
            Arc::new(posted_dates),
            Arc::new(posted_dates_raw),
            Arc::new(salaries),
            Arc::new(links),
            Arc::new(descriptions_short),
            Arc::new(descriptions_full),
            Arc::new(role_families),
        ],
    )
    .context("building normalized postings record batch")?;
    encode_parquet(batch)
}

/// Encode the skill-mentions table: one row per (posting, skill, category).
pub fn encode_mentions_table(mentions: &[SkillMention]) -> Result<Vec<u8>> {
    let schema = Arc::new(Schema::new(vec![
        Field::new("posting_id", DataType::Utf8, false),
        Field::new("skill", DataType::Utf8, false),
        Field::new("category", DataType::Utf8, false),
    ]));

    let posting_ids = StringArray::from(
        mentions
            .iter()
            .map(|m| Some(m.posting_id.as_str()))
            .collect::<Vec<_>>(),
    );
    let skills =
        StringArray::from(mentions.iter().map(|m| Some(m.skill.as_str())).collect::<Vec<_>>());
    let categories = StringArray::from(
        mentions
            .iter()
            .map(|m| Some(m.category.as_str()))
            .collect::<Vec<_>>(),
    );

    let batch = RecordBatch::try_new(
        schema,
        vec![Arc::new(posting_ids), Arc::new(skills), Arc::new(categories)],
    )
    .context("building skill mentions record batch")?;
    encode_parquet(batch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobsnap_core::RoleFamily;

    fn mk_posting(id: &str) -> NormalizedPosting {
        NormalizedPosting {
            id: id.to_string(),
            title: "Data Engineer".to_string(),
            company: "Acme".to_string(),
            location: "Berlin".to_string(),
            rating: Some(4.2),
            posted_date: NaiveDate::from_ymd_opt(2022, 11, 17),
            posted_date_raw: "3 days ago".to_string(),
            salary_raw: String::new(),
            link: format!("https://example.com/{id}"),
            description_short: String::new(),
            description_full: "python and sql".to_string(),
            role_family: RoleFamily::DataEngineer,
        }
    }

    #[test]
    fn table_encoding_is_deterministic() {
        let postings = vec![mk_posting("a"), mk_posting("b")];
        let first = encode_normalized_table(&postings).expect("encode");
        let second = encode_normalized_table(&postings).expect("encode again");
        assert!(!first.is_empty());
        assert_eq!(first, second);
    }

    #[test]
    fn empty_tables_still_encode() {
        assert!(!encode_normalized_table(&[]).expect("empty postings").is_empty());
        assert!(!encode_mentions_table(&[]).expect("empty mentions").is_empty());
    }

    #[test]
    fn manifest_entries_carry_the_stored_hash() {
        let stored = StoredTable {
            name: NORMALIZED_TABLE_FILE.to_string(),
            relative_path: PathBuf::from(NORMALIZED_TABLE_FILE),
            absolute_path: PathBuf::from("/tmp").join(NORMALIZED_TABLE_FILE),
            content_hash: "abc123".to_string(),
            byte_size: 42,
            replaced: false,
        };
        let entry = manifest_entry("normalized_postings", &stored);
        assert_eq!(entry.name, "normalized_postings");
        assert_eq!(entry.path, NORMALIZED_TABLE_FILE);
        assert_eq!(entry.sha256, "abc123");
        assert_eq!(entry.bytes, 42);
    }

    #[test]
    fn recent_runs_report_renders_summaries() {
        let dir = tempfile::tempdir().expect("tempdir");
        let run_id = Uuid::new_v4();
        let run_dir = dir.path().join(run_id.to_string());
        std::fs::create_dir_all(&run_dir).expect("run dir");

        let summary = RunSummary {
            run_id,
            started_at: Utc::now(),
            finished_at: Utc::now(),
            reference_date: default_reference_date(),
            raw_rows: 4,
            normalized_rows: 3,
            duplicates_dropped: 1,
            taxonomy_categories: 2,
            taxonomy_matchers: 5,
            mention_rows: 7,
            tables_dir: "warehouse/tables".to_string(),
            reports_dir: dir.path().display().to_string(),
        };
        std::fs::write(
            run_dir.join("run_summary.json"),
            serde_json::to_vec_pretty(&summary).expect("serialize"),
        )
        .expect("write summary");

        let report = report_runs_markdown(3, dir.path()).expect("render report");
        assert!(report.contains(&run_id.to_string()));
        assert!(report.contains("normalized rows: 3 (1 duplicates dropped)"));
        assert!(report.contains("skill mentions: 7"));
    }
}
