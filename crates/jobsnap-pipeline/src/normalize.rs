//! Record normalizer: text cleaning, deterministic identity, posting-date
//! inference, role-family tagging, and identity dedup.

use std::collections::HashSet;

use chrono::{Days, NaiveDate};
use jobsnap_core::{NormalizedPosting, RawPosting, RoleFamily};
use regex::Regex;
use sha2::{Digest, Sha256};
use tracing::debug;

/// Hex length of the posting identity: a 64-bit prefix of the content hash.
pub const ID_HEX_LEN: usize = 16;

/// Fallback formats for absolute date strings. Anything that parses under
/// none of these degrades to no posted date, never to a guessed one.
const ABSOLUTE_DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%m/%d/%Y",
    "%B %d, %Y",
    "%b %d, %Y",
    "%d %B %Y",
    "%d %b %Y",
];

/// Normalize a free-text field: missing becomes empty, line breaks become
/// spaces, whitespace runs collapse to one space, ends are trimmed.
pub fn clean_text(value: Option<&str>) -> String {
    match value {
        Some(raw) => raw.split_whitespace().collect::<Vec<_>>().join(" "),
        None => String::new(),
    }
}

/// Deterministic posting identity over the five cleaned source fields, in
/// exactly this order. Stable across runs, so re-runs line up with
/// previously produced identities.
pub fn compute_id(
    title: &str,
    company: &str,
    location: &str,
    date_raw: &str,
    link: &str,
) -> String {
    let key = [title, company, location, date_raw, link].join("|");
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    let digest = hex::encode(hasher.finalize());
    digest[..ID_HEX_LEN].to_string()
}

/// Fixed-priority substring rules over the lowercased title; first match
/// wins.
pub fn classify_role_family(title: &str) -> RoleFamily {
    let t = title.to_lowercase();
    if t.contains("data engineer") {
        return RoleFamily::DataEngineer;
    }
    if t.contains("data analyst") || t.contains("business analyst") {
        return RoleFamily::DataAnalyst;
    }
    if t.contains("data scientist") {
        return RoleFamily::DataScientist;
    }
    if t.contains("machine learning") {
        return RoleFamily::MlEngineer;
    }
    if t.contains("bi ") || t.contains("business intelligence") {
        return RoleFamily::Bi;
    }
    RoleFamily::Other
}

#[derive(Debug)]
pub struct NormalizeOutcome {
    pub postings: Vec<NormalizedPosting>,
    /// Rows dropped because an earlier row already claimed their identity.
    pub duplicates_dropped: usize,
}

/// Turns raw snapshot rows into normalized postings.
///
/// The reference date is the dataset's snapshot date, supplied explicitly so
/// relative posting ages resolve the same way on every machine and rerun.
#[derive(Debug)]
pub struct Normalizer {
    reference_date: NaiveDate,
    age_re: Regex,
}

impl Normalizer {
    pub fn new(reference_date: NaiveDate) -> Self {
        let age_re = Regex::new(r"(\d+)\s*\+?\s*day").expect("posting-age regex");
        Self {
            reference_date,
            age_re,
        }
    }

    pub fn reference_date(&self) -> NaiveDate {
        self.reference_date
    }

    /// Resolve a posting-age or date string, first match wins:
    /// empty -> None; `today`/`just posted` -> reference; `N[+] day(s)` ->
    /// reference minus N days; otherwise an absolute-date parse or None.
    pub fn infer_posted_date(&self, raw: &str) -> Option<NaiveDate> {
        let t = raw.trim().to_lowercase();
        if t.is_empty() {
            return None;
        }
        if t.contains("today") || t.contains("just posted") {
            return Some(self.reference_date);
        }
        if let Some(caps) = self.age_re.captures(&t) {
            let days: u64 = caps[1].parse().ok()?;
            return self.reference_date.checked_sub_days(Days::new(days));
        }
        ABSOLUTE_DATE_FORMATS
            .iter()
            .find_map(|fmt| NaiveDate::parse_from_str(raw.trim(), fmt).ok())
    }

    /// Clean, identify, date, tag, and dedup the full raw set. Malformed
    /// rows degrade to empty/None/`other`; nothing here fails.
    pub fn normalize(&self, raw: &[RawPosting]) -> NormalizeOutcome {
        let mut seen: HashSet<String> = HashSet::with_capacity(raw.len());
        let mut postings = Vec::with_capacity(raw.len());
        let mut duplicates_dropped = 0usize;

        for row in raw {
            let title = clean_text(row.title.as_deref());
            let company = clean_text(row.company.as_deref());
            let location = clean_text(row.location.as_deref());
            let date_raw = clean_text(row.date.as_deref());
            let salary_raw = clean_text(row.salary.as_deref());
            let link = clean_text(row.link.as_deref());
            let description_short = clean_text(row.description.as_deref());
            let description_full = clean_text(row.descriptions.as_deref());

            let id = compute_id(&title, &company, &location, &date_raw, &link);
            if !seen.insert(id.clone()) {
                duplicates_dropped += 1;
                continue;
            }

            let posted_date = self.infer_posted_date(&date_raw);
            let role_family = classify_role_family(&title);

            postings.push(NormalizedPosting {
                id,
                title,
                company,
                location,
                rating: row.rating,
                posted_date,
                posted_date_raw: date_raw,
                salary_raw,
                link,
                description_short,
                description_full,
                role_family,
            });
        }

        if duplicates_dropped > 0 {
            debug!(duplicates_dropped, "dropped rows with duplicate identities");
        }

        NormalizeOutcome {
            postings,
            duplicates_dropped,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ref_date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2022, 11, 20).expect("reference date")
    }

    fn mk_row(title: &str, date: &str, link: &str) -> RawPosting {
        RawPosting {
            title: Some(title.to_string()),
            company: Some("Acme".to_string()),
            location: Some("Berlin".to_string()),
            date: Some(date.to_string()),
            link: Some(link.to_string()),
            ..RawPosting::default()
        }
    }

    #[test]
    fn clean_text_degrades_and_collapses() {
        assert_eq!(clean_text(None), "");
        assert_eq!(clean_text(Some("")), "");
        assert_eq!(clean_text(Some("  Data\r\nEngineer\t (m/f/d)  ")), "Data Engineer (m/f/d)");
        assert_eq!(clean_text(Some("one  two\n\nthree")), "one two three");
    }

    #[test]
    fn identity_is_pure_in_the_five_fields() {
        let a = compute_id("Data Engineer", "Acme", "Berlin", "3 days ago", "https://x/1");
        let b = compute_id("Data Engineer", "Acme", "Berlin", "3 days ago", "https://x/1");
        assert_eq!(a, b);
        assert_eq!(a.len(), ID_HEX_LEN);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));

        let other_title = compute_id("Data Analyst", "Acme", "Berlin", "3 days ago", "https://x/1");
        let other_link = compute_id("Data Engineer", "Acme", "Berlin", "3 days ago", "https://x/2");
        assert_ne!(a, other_title);
        assert_ne!(a, other_link);
    }

    #[test]
    fn relative_dates_resolve_against_the_reference() {
        let n = Normalizer::new(ref_date());
        assert_eq!(n.infer_posted_date("Today"), Some(ref_date()));
        assert_eq!(n.infer_posted_date("Just posted"), Some(ref_date()));
        assert_eq!(
            n.infer_posted_date("1 day ago"),
            NaiveDate::from_ymd_opt(2022, 11, 19)
        );
        assert_eq!(
            n.infer_posted_date("3 days ago"),
            NaiveDate::from_ymd_opt(2022, 11, 17)
        );
        assert_eq!(
            n.infer_posted_date("30+ days ago"),
            NaiveDate::from_ymd_opt(2022, 10, 21)
        );
    }

    #[test]
    fn unparseable_dates_become_none_and_absolutes_pass_through() {
        let n = Normalizer::new(ref_date());
        assert_eq!(n.infer_posted_date(""), None);
        assert_eq!(n.infer_posted_date("   "), None);
        assert_eq!(n.infer_posted_date("gibberish"), None);
        assert_eq!(
            n.infer_posted_date("2022-11-05"),
            NaiveDate::from_ymd_opt(2022, 11, 5)
        );
        assert_eq!(
            n.infer_posted_date("November 13, 2022"),
            NaiveDate::from_ymd_opt(2022, 11, 13)
        );
    }

    #[test]
    fn role_rules_apply_in_priority_order() {
        assert_eq!(
            classify_role_family("Senior Data Engineer and Data Analyst"),
            RoleFamily::DataEngineer
        );
        assert_eq!(classify_role_family("Business Analyst"), RoleFamily::DataAnalyst);
        assert_eq!(classify_role_family("Lead Data Scientist"), RoleFamily::DataScientist);
        assert_eq!(
            classify_role_family("Machine Learning Engineer"),
            RoleFamily::MlEngineer
        );
        assert_eq!(classify_role_family("BI Developer"), RoleFamily::Bi);
        assert_eq!(
            classify_role_family("Business Intelligence Analyst"),
            RoleFamily::Bi
        );
        assert_eq!(classify_role_family("Office Manager"), RoleFamily::Other);
    }

    #[test]
    fn duplicate_identities_keep_the_first_row() {
        let mut first = mk_row("Data Engineer", "Today", "https://x/1");
        first.rating = Some(4.2);
        let mut second = mk_row("Data Engineer", "Today", "https://x/1");
        second.rating = Some(1.0);
        let third = mk_row("Data Engineer", "Today", "https://x/2");

        let outcome = Normalizer::new(ref_date()).normalize(&[first, second, third]);
        assert_eq!(outcome.postings.len(), 2);
        assert_eq!(outcome.duplicates_dropped, 1);
        assert_eq!(outcome.postings[0].rating, Some(4.2));
    }

    #[test]
    fn malformed_rows_degrade_instead_of_failing() {
        let outcome = Normalizer::new(ref_date()).normalize(&[RawPosting::default()]);
        assert_eq!(outcome.postings.len(), 1);
        let posting = &outcome.postings[0];
        assert_eq!(posting.title, "");
        assert_eq!(posting.posted_date, None);
        assert_eq!(posting.role_family, RoleFamily::Other);
        assert_eq!(posting.id.len(), ID_HEX_LEN);
    }
}
