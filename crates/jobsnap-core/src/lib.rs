//! Core domain model for the job-posting snapshot pipeline.

use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

pub const CRATE_NAME: &str = "jobsnap-core";

/// Loosely-typed input row as handed over by the ingestion store.
///
/// Field names mirror the source snapshot headers. Every field is optional;
/// the normalizer degrades missing values rather than rejecting rows.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawPosting {
    #[serde(rename = "Title", default)]
    pub title: Option<String>,
    #[serde(rename = "Company", default)]
    pub company: Option<String>,
    #[serde(rename = "Location", default)]
    pub location: Option<String>,
    #[serde(rename = "Rating", default)]
    pub rating: Option<f64>,
    /// Posting-age or date string, e.g. `"3 days ago"` or `"Just posted"`.
    #[serde(rename = "Date", default)]
    pub date: Option<String>,
    #[serde(rename = "Salary", default)]
    pub salary: Option<String>,
    #[serde(rename = "Links", default)]
    pub link: Option<String>,
    /// Short description variant shown on listing cards.
    #[serde(rename = "Description", default)]
    pub description: Option<String>,
    /// Full description variant from the detail page.
    #[serde(rename = "Descriptions", default)]
    pub descriptions: Option<String>,
}

/// Coarse role-family tag assigned by fixed-priority keyword rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleFamily {
    DataEngineer,
    DataAnalyst,
    DataScientist,
    MlEngineer,
    Bi,
    Other,
}

impl RoleFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoleFamily::DataEngineer => "data_engineer",
            RoleFamily::DataAnalyst => "data_analyst",
            RoleFamily::DataScientist => "data_scientist",
            RoleFamily::MlEngineer => "ml_engineer",
            RoleFamily::Bi => "bi",
            RoleFamily::Other => "other",
        }
    }
}

impl fmt::Display for RoleFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical normalized posting; the primary pipeline output entity.
///
/// `id` is a pure function of the five cleaned source fields (title, company,
/// location, raw date string, link) and is the dedup and join key for every
/// downstream table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedPosting {
    pub id: String,
    pub title: String,
    pub company: String,
    pub location: String,
    pub rating: Option<f64>,
    /// None whenever inference fails; never a guessed or default date.
    pub posted_date: Option<NaiveDate>,
    /// Cleaned source date string, preserved for audit.
    pub posted_date_raw: String,
    pub salary_raw: String,
    pub link: String,
    pub description_short: String,
    pub description_full: String,
    pub role_family: RoleFamily,
}

/// One extracted skill mention. At most one row per distinct
/// (posting, skill, category) triple per run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SkillMention {
    pub posting_id: String,
    pub skill: String,
    pub category: String,
}
