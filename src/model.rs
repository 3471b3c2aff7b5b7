use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::extract::ExtractedFacts;

const LIST_SEPARATOR: &str = " | ";

// ── Upstream shape ──

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterestsPage {
    pub items: Vec<RawInterestItem>,
    #[serde(default)]
    pub total_results: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawInterestItem {
    pub id: i64,
    pub summary: String,
    pub registration_date: Option<String>,
    pub published_date: Option<String>,
    pub member: Member,
    pub category: Category,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Member {
    pub id: i64,
    pub name_display_as: String,
    #[serde(default)]
    pub member_from: Option<String>,
    #[serde(default)]
    pub party: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Category {
    pub id: i64,
    pub name: String,
}

// ── Normalized output ──

/// One disclosure plus the facts mined from its summary. Keyed by `interest_id`.
#[derive(Debug, Clone)]
pub struct NormalizedRecord {
    pub item: RawInterestItem,
    pub facts: ExtractedFacts,
    pub collected_at: DateTime<Utc>,
}

impl NormalizedRecord {
    pub fn new(item: RawInterestItem, facts: ExtractedFacts, collected_at: DateTime<Utc>) -> Self {
        NormalizedRecord {
            item,
            facts,
            collected_at,
        }
    }

    pub fn interest_id(&self) -> i64 {
        self.item.id
    }

    /// Flatten into the key/value row shape both sinks accept.
    pub fn to_row(&self) -> InterestRow {
        let item = &self.item;
        InterestRow {
            interest_id: item.id,
            mp_name: item.member.name_display_as.clone(),
            mp_id: item.member.id,
            constituency: item.member.member_from.clone().unwrap_or_default(),
            party: item.member.party.clone().unwrap_or_default(),
            category: item.category.name.clone(),
            category_id: item.category.id,
            date_registered: item.registration_date.clone(),
            date_published: item.published_date.clone(),
            summary: item.summary.clone(),
            companies: self.facts.companies.join(LIST_SEPARATOR),
            amounts: self.facts.amounts.join(LIST_SEPARATOR),
            company_count: self.facts.company_count() as i64,
            amount_count: self.facts.amount_count() as i64,
            collected_at: self.collected_at.to_rfc3339_opts(SecondsFormat::Micros, true),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterestRow {
    pub interest_id: i64,
    pub mp_name: String,
    pub mp_id: i64,
    pub constituency: String,
    pub party: String,
    pub category: String,
    pub category_id: i64,
    pub date_registered: Option<String>,
    pub date_published: Option<String>,
    pub summary: String,
    pub companies: String,
    pub amounts: String,
    pub company_count: i64,
    pub amount_count: i64,
    pub collected_at: String,
}
