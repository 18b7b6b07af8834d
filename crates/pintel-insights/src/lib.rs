//! Analytics computed client-side from fetched records: company catalog
//! filtering, dashboard figures and skill demand.

mod catalog;
mod dashboard;
mod skills;

pub use catalog::{categories, company_types, filter_companies, CompanyQuery, CompanySort};
pub use dashboard::{DashboardSummary, FeaturedCompany, PackageBucket, FEATURED_LIMIT};
pub use skills::{extract_skills, DemandLevel, Skill, SkillQuery, SkillRules};

pub const CRATE_NAME: &str = "pintel-insights";
