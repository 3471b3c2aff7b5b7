use std::sync::LazyLock;

use regex::Regex;

static AMOUNT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"£([\d,]+\.?\d*)").unwrap());
static COMPANY_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"([^*]+?)\s*-\s*£").unwrap());

/// Structured facts mined from a disclosure summary.
///
/// Best-effort text mining, not parsing: the two lists come from independent
/// regex passes and are not paired by position. A summary listing several
/// amounts against one payer yields one company per `name - £` delimiter only.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractedFacts {
    pub amounts: Vec<String>,
    pub companies: Vec<String>,
}

impl ExtractedFacts {
    pub fn amount_count(&self) -> usize {
        self.amounts.len()
    }

    pub fn company_count(&self) -> usize {
        self.companies.len()
    }
}

/// Pull pound amounts and `name - £` counterparties out of a summary, left to right.
pub fn extract(summary: &str) -> ExtractedFacts {
    let amounts = AMOUNT_RE
        .captures_iter(summary)
        .map(|c| c[1].to_string())
        .collect();

    let companies = COMPANY_RE
        .captures_iter(summary)
        .filter_map(|c| clean_company(&c[1]))
        .collect();

    ExtractedFacts { amounts, companies }
}

fn clean_company(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let name = trimmed.strip_prefix('*').unwrap_or(trimmed).trim();
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}
