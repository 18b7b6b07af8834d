//! Core record model and table descriptors for Placement Intel.

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

pub const CRATE_NAME: &str = "pintel-core";

/// Column every company-scoped table is keyed on.
pub const COMPANY_ID_COLUMN: &str = "company_id";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CompanyId(pub i64);

impl CompanyId {
    pub fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for CompanyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for CompanyId {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

/// A typed projection of one remote table.
///
/// Implementors describe where their rows live so one generic fetch/subscribe
/// path can serve every table.
pub trait Entity: Serialize + DeserializeOwned + Clone + fmt::Debug + Send + Sync + 'static {
    const TABLE: &'static str;
    const ID_COLUMN: &'static str = COMPANY_ID_COLUMN;

    fn company_id(&self) -> Option<CompanyId>;
}

/// One of the nine optional per-company aspects that make up a profile.
pub trait DetailEntity: Entity {
    const KIND: DetailKind;

    fn slot(profile: &mut CompositeProfile) -> &mut Option<Self>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetailKind {
    BrandReputation,
    Business,
    Compensation,
    Culture,
    Financials,
    Logistics,
    People,
    TalentGrowth,
    Technologies,
}

impl DetailKind {
    pub const ALL: [DetailKind; 9] = [
        DetailKind::BrandReputation,
        DetailKind::Business,
        DetailKind::Compensation,
        DetailKind::Culture,
        DetailKind::Financials,
        DetailKind::Logistics,
        DetailKind::People,
        DetailKind::TalentGrowth,
        DetailKind::Technologies,
    ];

    pub fn table(self) -> &'static str {
        match self {
            DetailKind::BrandReputation => BrandReputation::TABLE,
            DetailKind::Business => Business::TABLE,
            DetailKind::Compensation => Compensation::TABLE,
            DetailKind::Culture => Culture::TABLE,
            DetailKind::Financials => Financials::TABLE,
            DetailKind::Logistics => Logistics::TABLE,
            DetailKind::People => People::TABLE,
            DetailKind::TalentGrowth => TalentGrowth::TABLE,
            DetailKind::Technologies => Technologies::TABLE,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            DetailKind::BrandReputation => "brand reputation",
            DetailKind::Business => "business",
            DetailKind::Compensation => "compensation",
            DetailKind::Culture => "culture",
            DetailKind::Financials => "financials",
            DetailKind::Logistics => "logistics",
            DetailKind::People => "people",
            DetailKind::TalentGrowth => "talent growth",
            DetailKind::Technologies => "technologies",
        }
    }
}

impl fmt::Display for DetailKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Descriptive, contact and risk attributes of a recruiting company.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Company {
    pub company_id: CompanyId,
    pub company_type: Option<String>,
    pub name: Option<String>,
    pub short_name: Option<String>,
    pub logo_url: Option<String>,
    pub category: Option<String>,
    pub incorporation_year: Option<String>,
    pub overview_text: Option<String>,
    pub nature_of_company: Option<String>,
    pub headquarters_address: Option<String>,
    pub operating_countries: Option<String>,
    pub office_count: Option<String>,
    pub office_locations: Option<String>,
    pub employee_size: Option<String>,
    pub vision_statement: Option<String>,
    pub mission_statement: Option<String>,
    pub core_values: Option<String>,
    pub history_timeline: Option<String>,
    pub recent_news: Option<String>,
    pub website_url: Option<String>,
    pub linkedin_url: Option<String>,
    pub twitter_handle: Option<String>,
    pub facebook_url: Option<String>,
    pub instagram_url: Option<String>,
    pub primary_contact_email: Option<String>,
    pub primary_phone_number: Option<String>,
    pub regulatory_status: Option<String>,
    pub legal_issues: Option<String>,
    pub esg_ratings: Option<String>,
    pub supply_chain_dependencies: Option<String>,
    pub geopolitical_risks: Option<String>,
    pub macro_risks: Option<String>,
    pub carbon_footprint: Option<String>,
    pub ethical_sourcing: Option<String>,
    pub marketing_video_url: Option<String>,
    pub customer_testimonials: Option<String>,
}

impl Company {
    /// Empty record for `company_id`; handy for fixtures.
    pub fn bare(company_id: CompanyId) -> Self {
        Self {
            company_id,
            company_type: None,
            name: None,
            short_name: None,
            logo_url: None,
            category: None,
            incorporation_year: None,
            overview_text: None,
            nature_of_company: None,
            headquarters_address: None,
            operating_countries: None,
            office_count: None,
            office_locations: None,
            employee_size: None,
            vision_statement: None,
            mission_statement: None,
            core_values: None,
            history_timeline: None,
            recent_news: None,
            website_url: None,
            linkedin_url: None,
            twitter_handle: None,
            facebook_url: None,
            instagram_url: None,
            primary_contact_email: None,
            primary_phone_number: None,
            regulatory_status: None,
            legal_issues: None,
            esg_ratings: None,
            supply_chain_dependencies: None,
            geopolitical_risks: None,
            macro_risks: None,
            carbon_footprint: None,
            ethical_sourcing: None,
            marketing_video_url: None,
            customer_testimonials: None,
        }
    }

    pub fn display_name(&self) -> &str {
        self.name
            .as_deref()
            .or(self.short_name.as_deref())
            .unwrap_or("(unnamed)")
    }
}

impl Entity for Company {
    const TABLE: &'static str = "companies";

    fn company_id(&self) -> Option<CompanyId> {
        Some(self.company_id)
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BrandReputation {
    pub company_id: Option<CompanyId>,
    pub website_quality: Option<String>,
    pub website_rating: Option<String>,
    pub website_traffic_rank: Option<String>,
    pub social_media_followers: Option<String>,
    pub glassdoor_rating: Option<String>,
    pub indeed_rating: Option<String>,
    pub google_rating: Option<String>,
    pub awards_recognitions: Option<String>,
    pub brand_sentiment_score: Option<String>,
    pub event_participation: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Business {
    pub company_id: Option<CompanyId>,
    pub pain_points_addressed: Option<String>,
    pub focus_sectors: Option<String>,
    pub offerings_description: Option<String>,
    pub top_customers: Option<String>,
    pub core_value_proposition: Option<String>,
    pub unique_differentiators: Option<String>,
    pub competitive_advantages: Option<String>,
    pub weaknesses_gaps: Option<String>,
    pub key_challenges_needs: Option<String>,
    pub key_competitors: Option<String>,
    pub market_share_percentage: Option<String>,
    pub sales_motion: Option<String>,
    pub customer_concentration_risk: Option<String>,
    pub exit_strategy_history: Option<String>,
    pub benchmark_vs_peers: Option<String>,
    pub future_projections: Option<String>,
    pub strategic_priorities: Option<String>,
    pub industry_associations: Option<String>,
    pub case_studies: Option<String>,
    pub go_to_market_strategy: Option<String>,
    pub innovation_roadmap: Option<String>,
    pub product_pipeline: Option<String>,
    pub tam: Option<String>,
    pub sam: Option<String>,
    pub som: Option<String>,
}

/// Benefits plus the numeric package columns (in LPA) used by the dashboard.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Compensation {
    pub company_id: Option<CompanyId>,
    pub leave_policy: Option<String>,
    pub health_support: Option<String>,
    pub fixed_vs_variable_pay: Option<String>,
    pub bonus_predictability: Option<String>,
    pub esops_incentives: Option<String>,
    pub family_health_insurance: Option<String>,
    pub relocation_support: Option<String>,
    pub lifestyle_benefits: Option<String>,
    pub average_ctc: Option<f64>,
    pub highest_ctc: Option<f64>,
    pub lowest_ctc: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Culture {
    pub company_id: Option<CompanyId>,
    pub hiring_velocity: Option<String>,
    pub employee_turnover: Option<String>,
    pub avg_retention_tenure: Option<String>,
    pub diversity_metrics: Option<String>,
    pub work_culture_summary: Option<String>,
    pub manager_quality: Option<String>,
    pub psychological_safety: Option<String>,
    pub feedback_culture: Option<String>,
    pub diversity_inclusion_score: Option<String>,
    pub ethical_standards: Option<String>,
    pub burnout_risk: Option<String>,
    pub layoff_history: Option<String>,
    pub mission_clarity: Option<String>,
    pub sustainability_csr: Option<String>,
    pub crisis_behavior: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Financials {
    pub company_id: Option<CompanyId>,
    pub annual_revenue: Option<String>,
    pub annual_profit: Option<String>,
    pub revenue_mix: Option<String>,
    pub valuation: Option<String>,
    pub yoy_growth_rate: Option<String>,
    pub profitability_status: Option<String>,
    pub key_investors: Option<String>,
    pub recent_funding_rounds: Option<String>,
    pub total_capital_raised: Option<String>,
    pub customer_acquisition_cost: Option<String>,
    pub customer_lifetime_value: Option<String>,
    pub cac_ltv_ratio: Option<String>,
    pub churn_rate: Option<String>,
    pub net_promoter_score: Option<String>,
    pub burn_rate: Option<String>,
    pub runway_months: Option<String>,
    pub burn_multiplier: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Logistics {
    pub company_id: Option<CompanyId>,
    pub remote_policy_details: Option<String>,
    pub typical_hours: Option<String>,
    pub overtime_expectations: Option<String>,
    pub weekend_work: Option<String>,
    pub flexibility_level: Option<String>,
    pub location_centrality: Option<String>,
    pub public_transport_access: Option<String>,
    pub cab_policy: Option<String>,
    pub airport_commute_time: Option<String>,
    pub office_zone_type: Option<String>,
    pub area_safety: Option<String>,
    pub safety_policies: Option<String>,
    pub infrastructure_safety: Option<String>,
    pub emergency_preparedness: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct People {
    pub company_id: Option<CompanyId>,
    pub ceo_name: Option<String>,
    pub ceo_linkedin_url: Option<String>,
    pub key_leaders: Option<String>,
    pub warm_intro_pathways: Option<String>,
    pub decision_maker_access: Option<String>,
    pub contact_person_name: Option<String>,
    pub contact_person_title: Option<String>,
    pub contact_person_email: Option<String>,
    pub contact_person_phone: Option<String>,
    pub board_members: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TalentGrowth {
    pub company_id: Option<CompanyId>,
    pub training_spend: Option<String>,
    pub onboarding_quality: Option<String>,
    pub learning_culture: Option<String>,
    pub exposure_quality: Option<String>,
    pub mentorship_availability: Option<String>,
    pub internal_mobility: Option<String>,
    pub promotion_clarity: Option<String>,
    pub tools_access: Option<String>,
    pub role_clarity: Option<String>,
    pub early_ownership: Option<String>,
    pub work_impact: Option<String>,
    pub execution_thinking_balance: Option<String>,
    pub automation_level: Option<String>,
    pub cross_functional_exposure: Option<String>,
    pub company_maturity: Option<String>,
    pub brand_value: Option<String>,
    pub client_quality: Option<String>,
    pub exit_opportunities: Option<String>,
    pub skill_relevance: Option<String>,
    pub external_recognition: Option<String>,
    pub network_strength: Option<String>,
    pub global_exposure: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Technologies {
    pub company_id: Option<CompanyId>,
    pub technology_partners: Option<String>,
    pub intellectual_property: Option<String>,
    pub r_and_d_investment: Option<String>,
    pub ai_ml_adoption_level: Option<String>,
    pub tech_stack: Option<String>,
    pub cybersecurity_posture: Option<String>,
    pub partnership_ecosystem: Option<String>,
    pub tech_adoption_rating: Option<String>,
}

macro_rules! detail_entity {
    ($ty:ident, $table:literal, $kind:ident, $field:ident) => {
        impl Entity for $ty {
            const TABLE: &'static str = $table;

            fn company_id(&self) -> Option<CompanyId> {
                self.company_id
            }
        }

        impl DetailEntity for $ty {
            const KIND: DetailKind = DetailKind::$kind;

            fn slot(profile: &mut CompositeProfile) -> &mut Option<Self> {
                &mut profile.$field
            }
        }
    };
}

detail_entity!(BrandReputation, "company_brand_reputation", BrandReputation, brand_reputation);
detail_entity!(Business, "company_business", Business, business);
detail_entity!(Compensation, "company_compensation", Compensation, compensation);
detail_entity!(Culture, "company_culture", Culture, culture);
detail_entity!(Financials, "company_financials", Financials, financials);
detail_entity!(Logistics, "company_logistics", Logistics, logistics);
detail_entity!(People, "company_people", People, people);
detail_entity!(TalentGrowth, "company_talent_growth", TalentGrowth, talent_growth);
detail_entity!(Technologies, "company_technologies", Technologies, technologies);

/// A company merged with every detail aspect known for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositeProfile {
    pub company: Company,
    pub brand_reputation: Option<BrandReputation>,
    pub business: Option<Business>,
    pub compensation: Option<Compensation>,
    pub culture: Option<Culture>,
    pub financials: Option<Financials>,
    pub logistics: Option<Logistics>,
    pub people: Option<People>,
    pub talent_growth: Option<TalentGrowth>,
    pub technologies: Option<Technologies>,
    /// Sections whose fetch failed and were left empty instead of failing the profile.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub degraded: Vec<DetailKind>,
}

impl CompositeProfile {
    pub fn new(company: Company) -> Self {
        Self {
            company,
            brand_reputation: None,
            business: None,
            compensation: None,
            culture: None,
            financials: None,
            logistics: None,
            people: None,
            talent_growth: None,
            technologies: None,
            degraded: Vec::new(),
        }
    }

    pub fn company_id(&self) -> CompanyId {
        self.company.company_id
    }

    pub fn has_detail(&self, kind: DetailKind) -> bool {
        match kind {
            DetailKind::BrandReputation => self.brand_reputation.is_some(),
            DetailKind::Business => self.business.is_some(),
            DetailKind::Compensation => self.compensation.is_some(),
            DetailKind::Culture => self.culture.is_some(),
            DetailKind::Financials => self.financials.is_some(),
            DetailKind::Logistics => self.logistics.is_some(),
            DetailKind::People => self.people.is_some(),
            DetailKind::TalentGrowth => self.talent_growth.is_some(),
            DetailKind::Technologies => self.technologies.is_some(),
        }
    }

    /// Replace one detail slot, refusing records that belong to another company.
    pub fn set_detail<D: DetailEntity>(&mut self, detail: Option<D>) -> bool {
        if let Some(record) = &detail {
            if record.company_id().is_some_and(|id| id != self.company_id()) {
                return false;
            }
        }
        *D::slot(self) = detail;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn detail_tables_are_distinct_and_match_kinds() {
        let mut tables: Vec<_> = DetailKind::ALL.iter().map(|k| k.table()).collect();
        tables.sort_unstable();
        tables.dedup();
        assert_eq!(tables.len(), 9);
        assert_eq!(Culture::KIND.table(), "company_culture");
        assert_eq!(Company::TABLE, "companies");
        assert_eq!(Company::ID_COLUMN, "company_id");
    }

    #[test]
    fn rows_decode_with_missing_and_unknown_columns() {
        let row = json!({ "company_id": 7, "name": "Acme", "unexpected": true });
        let company: Company = serde_json::from_value(row).expect("decode company");
        assert_eq!(company.company_id, CompanyId(7));
        assert_eq!(company.display_name(), "Acme");
        assert!(company.category.is_none());

        let row = json!({ "company_id": 7, "average_ctc": 12.5 });
        let comp: Compensation = serde_json::from_value(row).expect("decode compensation");
        assert_eq!(comp.company_id(), Some(CompanyId(7)));
        assert_eq!(comp.average_ctc, Some(12.5));
    }

    #[test]
    fn profile_rejects_details_from_other_companies() {
        let mut profile = CompositeProfile::new(Company::bare(CompanyId(3)));
        let foreign = Culture {
            company_id: Some(CompanyId(4)),
            ..Culture::default()
        };
        assert!(!profile.set_detail(Some(foreign)));
        assert!(!profile.has_detail(DetailKind::Culture));

        let own = Culture {
            company_id: Some(CompanyId(3)),
            burnout_risk: Some("low".into()),
            ..Culture::default()
        };
        assert!(profile.set_detail(Some(own.clone())));
        assert_eq!(profile.culture, Some(own));
        assert!(profile.set_detail::<Culture>(None));
        assert!(profile.culture.is_none());
    }
}
