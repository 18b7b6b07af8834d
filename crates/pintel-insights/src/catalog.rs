use std::cmp::Ordering;
use std::str::FromStr;

use pintel_core::Company;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompanySort {
    #[default]
    Name,
    Category,
}

impl FromStr for CompanySort {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "name" => Ok(Self::Name),
            "category" => Ok(Self::Category),
            other => Err(format!("unknown sort `{other}` (expected name or category)")),
        }
    }
}

/// Catalog filter; `None` fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompanyQuery {
    /// Case-insensitive substring over name, category and headquarters.
    pub search: Option<String>,
    pub category: Option<String>,
    pub company_type: Option<String>,
    #[serde(default)]
    pub sort: CompanySort,
}

impl CompanyQuery {
    pub fn matches(&self, company: &Company) -> bool {
        if let Some(search) = self.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            let needle = search.to_lowercase();
            let hit = [&company.name, &company.category, &company.headquarters_address]
                .into_iter()
                .flatten()
                .any(|field| field.to_lowercase().contains(&needle));
            if !hit {
                return false;
            }
        }
        if let Some(category) = &self.category {
            if company.category.as_ref() != Some(category) {
                return false;
            }
        }
        if let Some(company_type) = &self.company_type {
            if company.company_type.as_ref() != Some(company_type) {
                return false;
            }
        }
        true
    }
}

fn text_key(value: &Option<String>) -> String {
    value.as_deref().unwrap_or_default().to_lowercase()
}

fn compare(sort: CompanySort, a: &Company, b: &Company) -> Ordering {
    match sort {
        CompanySort::Name => text_key(&a.name).cmp(&text_key(&b.name)),
        CompanySort::Category => text_key(&a.category)
            .cmp(&text_key(&b.category))
            .then_with(|| text_key(&a.name).cmp(&text_key(&b.name))),
    }
}

/// Matching companies in `query.sort` order; ties keep input order.
pub fn filter_companies(companies: &[Company], query: &CompanyQuery) -> Vec<Company> {
    let mut matched: Vec<Company> = companies.iter().filter(|c| query.matches(c)).cloned().collect();
    matched.sort_by(|a, b| compare(query.sort, a, b));
    matched
}

fn distinct(values: impl Iterator<Item = Option<String>>) -> Vec<String> {
    let mut seen = Vec::new();
    for value in values.flatten() {
        if !value.is_empty() && !seen.contains(&value) {
            seen.push(value);
        }
    }
    seen
}

/// Distinct non-empty categories in first-seen order.
pub fn categories(companies: &[Company]) -> Vec<String> {
    distinct(companies.iter().map(|c| c.category.clone()))
}

pub fn company_types(companies: &[Company]) -> Vec<String> {
    distinct(companies.iter().map(|c| c.company_type.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pintel_core::CompanyId;

    fn company(id: i64, name: &str, category: &str, kind: &str, hq: &str) -> Company {
        let mut company = Company::bare(CompanyId(id));
        company.name = Some(name.into());
        company.category = Some(category.into());
        company.company_type = Some(kind.into());
        company.headquarters_address = Some(hq.into());
        company
    }

    fn catalog() -> Vec<Company> {
        vec![
            company(1, "zeta Labs", "Product", "Startup", "Pune"),
            company(2, "Acme", "Service", "MNC", "Bengaluru"),
            company(3, "Mango Analytics", "Product", "MNC", "Chennai"),
            Company::bare(CompanyId(4)),
        ]
    }

    fn ids(companies: &[Company]) -> Vec<i64> {
        companies.iter().map(|c| c.company_id.get()).collect()
    }

    #[test]
    fn empty_query_sorts_by_name_case_insensitively() {
        let sorted = filter_companies(&catalog(), &CompanyQuery::default());
        assert_eq!(ids(&sorted), vec![4, 2, 3, 1]);
    }

    #[test]
    fn search_covers_name_category_and_headquarters() {
        let by_city = CompanyQuery {
            search: Some("chennai".into()),
            ..Default::default()
        };
        assert_eq!(ids(&filter_companies(&catalog(), &by_city)), vec![3]);

        let by_category = CompanyQuery {
            search: Some("SERV".into()),
            ..Default::default()
        };
        assert_eq!(ids(&filter_companies(&catalog(), &by_category)), vec![2]);
    }

    #[test]
    fn category_and_type_filters_combine() {
        let query = CompanyQuery {
            category: Some("Product".into()),
            company_type: Some("MNC".into()),
            sort: CompanySort::Category,
            ..Default::default()
        };
        assert_eq!(ids(&filter_companies(&catalog(), &query)), vec![3]);
    }

    #[test]
    fn category_sort_breaks_ties_by_name() {
        let query = CompanyQuery {
            sort: CompanySort::Category,
            ..Default::default()
        };
        assert_eq!(ids(&filter_companies(&catalog(), &query)), vec![4, 3, 1, 2]);
    }

    #[test]
    fn distinct_values_keep_first_seen_order() {
        assert_eq!(categories(&catalog()), vec!["Product", "Service"]);
        assert_eq!(company_types(&catalog()), vec!["Startup", "MNC"]);
        assert_eq!("Category".parse::<CompanySort>(), Ok(CompanySort::Category));
        assert!("revenue".parse::<CompanySort>().is_err());
    }
}
