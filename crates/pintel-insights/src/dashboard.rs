use std::collections::HashMap;

use pintel_core::{Company, CompanyId, Compensation};
use serde::Serialize;

/// Number of best-paying companies listed on the dashboard.
pub const FEATURED_LIMIT: usize = 6;

/// Package ranges in LPA, lower bound inclusive.
const BUCKETS: [(&str, f64, f64); 5] = [
    ("< 5", 0.0, 5.0),
    ("5-10", 5.0, 10.0),
    ("10-20", 10.0, 20.0),
    ("20-30", 20.0, 30.0),
    ("30+", 30.0, f64::INFINITY),
];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PackageBucket {
    pub label: &'static str,
    pub companies: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeaturedCompany {
    pub company_id: CompanyId,
    pub name: String,
    pub category: Option<String>,
    pub average_ctc: f64,
}

/// Headline figures over the company catalog and compensation rows.
///
/// Package figures only consider positive values; with no usable rows they
/// stay `None` rather than falling back to made-up numbers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DashboardSummary {
    pub total_companies: usize,
    pub average_package: Option<f64>,
    pub highest_package: Option<f64>,
    pub top_category: Option<String>,
    pub package_distribution: Vec<PackageBucket>,
    pub featured: Vec<FeaturedCompany>,
}

fn positive(value: Option<f64>) -> Option<f64> {
    value.filter(|v| v.is_finite() && *v > 0.0)
}

impl DashboardSummary {
    pub fn compute(companies: &[Company], compensation: &[Compensation]) -> Self {
        let averages: Vec<f64> = compensation.iter().filter_map(|c| positive(c.average_ctc)).collect();
        let average_package = (!averages.is_empty()).then(|| averages.iter().sum::<f64>() / averages.len() as f64);
        let highest_package = compensation
            .iter()
            .filter_map(|c| positive(c.highest_ctc))
            .fold(None, |best: Option<f64>, v| Some(best.map_or(v, |b| b.max(v))));

        let package_distribution = BUCKETS
            .iter()
            .map(|&(label, low, high)| PackageBucket {
                label,
                companies: averages.iter().filter(|v| **v >= low && **v < high).count(),
            })
            .collect();

        Self {
            total_companies: companies.len(),
            average_package,
            highest_package,
            top_category: top_category(companies),
            package_distribution,
            featured: featured(companies, compensation),
        }
    }
}

/// Most frequent category; ties go to the one seen first.
fn top_category(companies: &[Company]) -> Option<String> {
    let mut counts: HashMap<&str, (usize, usize)> = HashMap::new();
    for (position, category) in companies
        .iter()
        .filter_map(|c| c.category.as_deref())
        .filter(|c| !c.is_empty())
        .enumerate()
    {
        counts.entry(category).or_insert((0, position)).0 += 1;
    }
    counts
        .into_iter()
        .max_by(|(_, (count_a, first_a)), (_, (count_b, first_b))| count_a.cmp(count_b).then(first_b.cmp(first_a)))
        .map(|(category, _)| category.to_string())
}

fn featured(companies: &[Company], compensation: &[Compensation]) -> Vec<FeaturedCompany> {
    let packages: HashMap<CompanyId, f64> = compensation
        .iter()
        .filter_map(|c| Some((c.company_id?, positive(c.average_ctc)?)))
        .collect();
    let mut ranked: Vec<FeaturedCompany> = companies
        .iter()
        .filter_map(|company| {
            packages.get(&company.company_id).map(|&average_ctc| FeaturedCompany {
                company_id: company.company_id,
                name: company.display_name().to_string(),
                category: company.category.clone(),
                average_ctc,
            })
        })
        .collect();
    ranked.sort_by(|a, b| b.average_ctc.total_cmp(&a.average_ctc));
    ranked.truncate(FEATURED_LIMIT);
    ranked
}
