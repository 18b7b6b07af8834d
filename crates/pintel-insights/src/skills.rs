use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, Result};
use pintel_core::Technologies;
use serde::{Deserialize, Serialize};

const BUILTIN_RULES: &str = include_str!("../../../rules/skills.yaml");

#[derive(Debug, Clone, Deserialize)]
struct SkillRulesFile {
    #[allow(dead_code)]
    version: u32,
    #[serde(default)]
    keywords: Vec<String>,
    #[serde(default)]
    rules: Vec<CategoryRule>,
    default_category: String,
}

#[derive(Debug, Clone, Deserialize)]
struct CategoryRule {
    category: String,
    contains_any: Vec<String>,
}

/// Keyword list and category rules used to turn tech stacks into skills.
#[derive(Debug, Clone)]
pub struct SkillRules {
    keywords: Vec<String>,
    rules: Vec<CategoryRule>,
    default_category: String,
}

impl SkillRules {
    pub fn builtin() -> Result<Self> {
        Self::from_yaml(BUILTIN_RULES).context("parsing built-in rules/skills.yaml")
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        Self::from_yaml(&text).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        let file: SkillRulesFile = serde_yaml::from_str(text)?;
        Ok(Self {
            keywords: file.keywords,
            rules: file.rules,
            default_category: file.default_category,
        })
    }

    /// Category names in rule order, default last.
    pub fn categories(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.rules.iter().map(|r| r.category.as_str()).collect();
        names.push(&self.default_category);
        names
    }

    pub fn categorize(&self, skill: &str) -> &str {
        let name = skill.to_ascii_lowercase();
        self.rules
            .iter()
            .find(|rule| {
                rule.contains_any
                    .iter()
                    .any(|needle| name.contains(&needle.to_ascii_lowercase()))
            })
            .map_or(&self.default_category, |rule| &rule.category)
    }

    /// The known keyword an item names, or the trimmed item itself.
    ///
    /// An exact (case-insensitive) keyword wins; otherwise the longest keyword
    /// appearing in the item as a whole word.
    pub fn canonical_name(&self, item: &str) -> String {
        let item = item.trim();
        let lowered = item.to_lowercase();
        if let Some(exact) = self.keywords.iter().find(|k| k.to_lowercase() == lowered) {
            return exact.clone();
        }
        self.keywords
            .iter()
            .filter(|k| contains_word(&lowered, &k.to_lowercase()))
            .max_by_key(|k| k.len())
            .cloned()
            .unwrap_or_else(|| item.to_string())
    }
}

fn contains_word(haystack: &str, needle: &str) -> bool {
    if needle.is_empty() {
        return false;
    }
    haystack.match_indices(needle).any(|(start, _)| {
        let before = haystack[..start].chars().next_back();
        let after = haystack[start + needle.len()..].chars().next();
        !before.is_some_and(char::is_alphanumeric) && !after.is_some_and(char::is_alphanumeric)
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum DemandLevel {
    Low,
    Medium,
    High,
}

impl DemandLevel {
    fn from_score(score: u8) -> Self {
        match score {
            70.. => DemandLevel::High,
            40..=69 => DemandLevel::Medium,
            _ => DemandLevel::Low,
        }
    }

    fn label(self) -> &'static str {
        match self {
            DemandLevel::Low => "Low",
            DemandLevel::Medium => "Medium",
            DemandLevel::High => "High",
        }
    }
}

impl fmt::Display for DemandLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.label())
    }
}

impl FromStr for DemandLevel {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(DemandLevel::Low),
            "medium" => Ok(DemandLevel::Medium),
            "high" => Ok(DemandLevel::High),
            other => Err(format!("unknown demand level `{other}` (expected high, medium or low)")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Skill {
    pub name: String,
    pub category: String,
    /// Set by the first company reporting the skill.
    pub demand: DemandLevel,
    pub companies: usize,
}

/// Skills named in the companies' tech stacks, most widely used first.
///
/// Items are split on `,`, `;`, `|` and newlines. A company reporting any AI/ML
/// adoption level marks the skills it introduces as high demand.
pub fn extract_skills(technologies: &[Technologies], rules: &SkillRules) -> Vec<Skill> {
    let mut skills: Vec<Skill> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for tech in technologies {
        let Some(stack) = tech.tech_stack.as_deref() else {
            continue;
        };
        let adopts_ai = tech.ai_ml_adoption_level.as_deref().is_some_and(|l| !l.trim().is_empty());
        let demand = DemandLevel::from_score(if adopts_ai { 75 } else { 50 });

        let mut counted = Vec::new();
        for item in stack.split([',', ';', '|', '\n']).map(str::trim).filter(|s| !s.is_empty()) {
            let name = rules.canonical_name(item);
            if counted.contains(&name) {
                continue;
            }
            match index.get(&name) {
                Some(&slot) => skills[slot].companies += 1,
                None => {
                    index.insert(name.clone(), skills.len());
                    skills.push(Skill {
                        category: rules.categorize(&name).to_string(),
                        name: name.clone(),
                        demand,
                        companies: 1,
                    });
                }
            }
            counted.push(name);
        }
    }

    skills.sort_by(|a, b| b.companies.cmp(&a.companies).then_with(|| a.name.cmp(&b.name)));
    skills
}

/// Skill catalog filter; `None` fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SkillQuery {
    /// Case-insensitive substring over name and category.
    pub search: Option<String>,
    pub category: Option<String>,
    pub demand: Option<DemandLevel>,
}

impl SkillQuery {
    pub fn matches(&self, skill: &Skill) -> bool {
        let search_hit = match self.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            Some(search) => {
                let needle = search.to_lowercase();
                skill.name.to_lowercase().contains(&needle) || skill.category.to_lowercase().contains(&needle)
            }
            None => true,
        };
        search_hit
            && self.category.as_ref().map_or(true, |c| *c == skill.category)
            && self.demand.map_or(true, |d| d == skill.demand)
    }

    pub fn apply(&self, skills: &[Skill]) -> Vec<Skill> {
        skills.iter().filter(|s| self.matches(s)).cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pintel_core::CompanyId;
    use std::io::Write;

    fn tech(id: i64, stack: &str, ai: Option<&str>) -> Technologies {
        Technologies {
            company_id: Some(CompanyId(id)),
            tech_stack: Some(stack.into()),
            ai_ml_adoption_level: ai.map(Into::into),
            ..Default::default()
        }
    }

    #[test]
    fn builtin_rules_categorize_known_skills() {
        let rules = SkillRules::builtin().expect("rules");
        assert_eq!(rules.categorize("Python"), "Languages");
        assert_eq!(rules.categorize("Kubernetes"), "DevOps & Cloud");
        assert_eq!(rules.categorize("MongoDB"), "Databases");
        assert_eq!(rules.categorize("Team Leadership"), "Soft Skills");
        assert_eq!(rules.categorize("Spring"), "Tools & Frameworks");
        assert_eq!(rules.categories().last().copied(), Some("Tools & Frameworks"));
    }

    #[test]
    fn items_map_to_keywords_on_word_boundaries() {
        let rules = SkillRules::builtin().expect("rules");
        assert_eq!(rules.canonical_name(" java "), "Java");
        assert_eq!(rules.canonical_name("Spring Boot"), "Spring");
        assert_eq!(rules.canonical_name("Node.js 20"), "Node.js");
        assert_eq!(rules.canonical_name("Google Cloud"), "Google Cloud");
        assert_eq!(rules.canonical_name("Django REST framework"), "Django");
    }

    #[test]
    fn skills_are_counted_once_per_company_and_ranked() {
        let rules = SkillRules::builtin().expect("rules");
        let technologies = [
            tech(1, "Python, Docker; python", Some("Advanced")),
            tech(2, "Docker | Kubernetes\nRust", None),
            tech(3, "Rust, Docker", None),
            Technologies::default(),
        ];
        let skills = extract_skills(&technologies, &rules);

        let summary: Vec<(&str, usize)> = skills.iter().map(|s| (s.name.as_str(), s.companies)).collect();
        assert_eq!(summary, vec![("Docker", 3), ("Rust", 2), ("Kubernetes", 1), ("Python", 1)]);
        let python = skills.iter().find(|s| s.name == "Python").expect("python");
        assert_eq!(python.demand, DemandLevel::High);
        assert_eq!(python.category, "Languages");
        let rust = skills.iter().find(|s| s.name == "Rust").expect("rust");
        assert_eq!(rust.demand, DemandLevel::Medium);
    }

    #[test]
    fn no_tech_stacks_means_no_skills() {
        let rules = SkillRules::builtin().expect("rules");
        assert!(extract_skills(&[Technologies::default()], &rules).is_empty());
    }

    #[test]
    fn skill_query_filters() {
        let rules = SkillRules::builtin().expect("rules");
        let skills = extract_skills(&[tech(1, "Rust, PostgreSQL", Some("Pilot")), tech(2, "Go", None)], &rules);

        let databases = SkillQuery {
            category: Some("Databases".into()),
            ..Default::default()
        };
        assert_eq!(databases.apply(&skills).len(), 1);

        let medium = SkillQuery {
            demand: Some("medium".parse().expect("level")),
            ..Default::default()
        };
        assert_eq!(medium.apply(&skills).iter().map(|s| s.name.as_str()).collect::<Vec<_>>(), vec!["Go"]);

        let search = SkillQuery {
            search: Some("LANG".into()),
            ..Default::default()
        };
        assert_eq!(search.apply(&skills).len(), 2);
    }

    #[test]
    fn rules_load_from_a_file() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        writeln!(
            file,
            "version: 1\nkeywords: [Elixir]\nrules:\n  - category: Functional\n    contains_any: [elixir]\ndefault_category: Other"
        )
        .expect("write");

        let rules = SkillRules::from_path(file.path()).expect("rules");
        assert_eq!(rules.canonical_name("elixir"), "Elixir");
        assert_eq!(rules.categorize("Elixir"), "Functional");
        assert_eq!(rules.categorize("Rust"), "Other");
        assert!(SkillRules::from_path("/nonexistent/skills.yaml").is_err());
    }
}
