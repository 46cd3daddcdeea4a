//! Flattens a snapshot into rows a template can print as-is.

use time::{format_description::well_known::Rfc3339, OffsetDateTime};

use crate::{
    store::CollectionStatus,
    structures::model::{CollectionKind, Snapshot, NEUTRAL_COLOR},
    sync::{resolve_category, short_id, website_label, CategoryResolution},
};

#[derive(Debug, Clone, PartialEq)]
pub struct StatsView {
    pub total_sites: u64,
    pub total_categories: u64,
    pub up: u64,
    pub avg_response_time_ms: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CategoryChip {
    pub id: String,
    pub name: String,
    pub color: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WebsiteRow {
    pub id: String,
    pub name: String,
    pub url: String,
    pub category: String,
    pub category_color: String,
    pub keywords: Vec<String>,
    pub interval_seconds: u32,
    pub is_active: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CheckRow {
    pub id: String,
    pub website: String,
    pub is_up: bool,
    pub status_code: String,
    pub response_time_ms: u64,
    pub keywords: String,
    pub checked_at: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DashboardView {
    pub epoch: u64,
    pub stats: StatsView,
    pub categories: Vec<CategoryChip>,
    pub websites: Vec<WebsiteRow>,
    pub checks: Vec<CheckRow>,
    /// One line per collection whose last load failed.
    pub problems: Vec<String>,
}

impl DashboardView {
    pub fn build(snapshot: &Snapshot, statuses: &[(CollectionKind, CollectionStatus)]) -> Self {
        let summary = &snapshot.summary;
        let stats = StatsView {
            total_sites: summary.total_sites,
            total_categories: summary.total_categories,
            up: summary.up,
            avg_response_time_ms: whole_ms(summary.avg_response_time_ms),
        };

        let categories = snapshot
            .categories
            .iter()
            .map(|c| CategoryChip {
                id: c.id.clone(),
                name: c.name.clone(),
                color: c.display_color().to_string(),
            })
            .collect();

        let websites = snapshot
            .websites
            .iter()
            .map(|w| {
                let (category, category_color) = match resolve_category(snapshot, &w.id) {
                    CategoryResolution::Known(c) => (c.name.clone(), c.display_color().to_string()),
                    CategoryResolution::Uncategorized => ("-".to_string(), NEUTRAL_COLOR.to_string()),
                    CategoryResolution::Unknown { category_id } => (
                        category_id
                            .as_deref()
                            .map(short_id)
                            .unwrap_or("-")
                            .to_string(),
                        NEUTRAL_COLOR.to_string(),
                    ),
                };
                WebsiteRow {
                    id: w.id.clone(),
                    name: w.name.clone(),
                    url: w.url.clone(),
                    category,
                    category_color,
                    keywords: w.keywords.clone(),
                    interval_seconds: w.interval_seconds,
                    is_active: w.is_active,
                }
            })
            .collect();

        let checks = snapshot
            .checks
            .iter()
            .map(|c| CheckRow {
                id: c.id.clone(),
                website: website_label(snapshot, &c.website_id),
                is_up: c.is_up,
                status_code: c
                    .status_code
                    .map(|code| code.to_string())
                    .unwrap_or_else(|| "-".to_string()),
                response_time_ms: whole_ms(c.response_time_ms),
                keywords: match c.keyword_matches.is_empty() {
                    true => "no keyword matched".to_string(),
                    false => format!("keywords: {}", c.keyword_matches.join(", ")),
                },
                checked_at: format_time(c.created_at),
            })
            .collect();

        let problems = statuses
            .iter()
            .filter_map(|(kind, status)| match status {
                CollectionStatus::Failed(message) => Some(format!("{kind}: {message}")),
                _ => None,
            })
            .collect();

        Self {
            epoch: snapshot.epoch,
            stats,
            categories,
            websites,
            checks,
            problems,
        }
    }
}

fn whole_ms(ms: f64) -> u64 {
    if ms.is_finite() && ms > 0.0 {
        ms.round() as u64
    } else {
        0
    }
}

fn format_time(at: OffsetDateTime) -> String {
    at.format(&Rfc3339).unwrap_or_else(|_| at.to_string())
}
