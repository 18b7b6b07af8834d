use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use pintel_core::{
    BrandReputation, Business, Company, CompanyId, Compensation, Culture, Financials, Logistics, People, TalentGrowth,
    Technologies,
};
use pintel_insights::{
    extract_skills, filter_companies, CompanyQuery, CompanySort, DashboardSummary, DemandLevel, SkillQuery, SkillRules,
};
use pintel_store::MemoryGateway;
use pintel_sync::{
    load_profile, CollectionView, DetailFailurePolicy, EntityView, ProfileView, StoreClient, SyncedView, ViewSnapshot,
    ViewSource,
};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "pintel")]
#[command(about = "Placement Intel command-line interface")]
struct Cli {
    /// Serve reads and changes from a JSON fixture file instead of the remote store.
    #[arg(long, global = true, value_name = "FILE")]
    fixtures: Option<PathBuf>,
    /// Print JSON instead of text tables.
    #[arg(long, global = true)]
    json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// List companies.
    Companies {
        #[arg(long)]
        search: Option<String>,
        #[arg(long)]
        category: Option<String>,
        #[arg(long)]
        company_type: Option<String>,
        #[arg(long, default_value = "name")]
        sort: CompanySort,
    },
    /// Load one company's composite profile.
    Profile {
        id: i64,
        /// Leave failed sections empty instead of failing the profile.
        #[arg(long)]
        degrade: bool,
    },
    /// Follow one aspect of a company until Ctrl-C.
    Watch {
        id: i64,
        #[arg(long, value_enum, default_value_t = Aspect::Profile)]
        aspect: Aspect,
    },
    /// Follow the company list until Ctrl-C.
    WatchCompanies,
    /// In-demand skills from company tech stacks.
    Skills {
        #[arg(long)]
        search: Option<String>,
        #[arg(long)]
        category: Option<String>,
        #[arg(long)]
        demand: Option<DemandLevel>,
        /// Alternative skill rules file.
        #[arg(long, value_name = "FILE")]
        rules: Option<PathBuf>,
    },
    /// Dashboard figures.
    Summary,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Aspect {
    Profile,
    Company,
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

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let client = connect(cli.fixtures.as_deref())?;

    match cli.command {
        Commands::Companies {
            search,
            category,
            company_type,
            sort,
        } => {
            let companies = client.fetch_all::<Company>().await?;
            let query = CompanyQuery {
                search,
                category,
                company_type,
                sort,
            };
            let listed = filter_companies(&companies, &query);
            if cli.json {
                print_json(&listed)?;
            } else {
                for company in &listed {
                    println!(
                        "{:>6}  {:<32}  {:<20}  {}",
                        company.company_id.get(),
                        company.display_name(),
                        company.category.as_deref().unwrap_or("-"),
                        company.headquarters_address.as_deref().unwrap_or("-"),
                    );
                }
                println!("showing {} of {} companies", listed.len(), companies.len());
            }
        }
        Commands::Profile { id, degrade } => {
            let policy = if degrade {
                DetailFailurePolicy::DegradeToNull
            } else {
                DetailFailurePolicy::FailFast
            };
            let profile = load_profile(&client, CompanyId(id), policy).await?;
            print_json(&profile)?;
        }
        Commands::Watch { id, aspect } => watch_aspect(client, CompanyId(id), aspect).await?,
        Commands::WatchCompanies => follow(CollectionView::<Company>::collection(client)).await?,
        Commands::Skills {
            search,
            category,
            demand,
            rules,
        } => {
            let rules = match rules {
                Some(path) => SkillRules::from_path(path)?,
                None => SkillRules::builtin()?,
            };
            let technologies = client.fetch_all::<Technologies>().await?;
            let query = SkillQuery {
                search,
                category,
                demand,
            };
            let skills = query.apply(&extract_skills(&technologies, &rules));
            if cli.json {
                print_json(&skills)?;
            } else {
                for skill in &skills {
                    println!(
                        "{:<24}  {:<20}  {:<6}  {} companies",
                        skill.name, skill.category, skill.demand, skill.companies
                    );
                }
                if skills.is_empty() {
                    println!("no skills reported yet");
                }
            }
        }
        Commands::Summary => {
            let (companies, compensation) =
                tokio::try_join!(client.fetch_all::<Company>(), client.fetch_all::<Compensation>())?;
            let summary = DashboardSummary::compute(&companies, &compensation);
            if cli.json {
                print_json(&summary)?;
            } else {
                print_summary(&summary);
            }
        }
    }

    Ok(())
}

fn connect(fixtures: Option<&Path>) -> Result<StoreClient> {
    match fixtures {
        Some(path) => {
            let gateway = MemoryGateway::from_fixture_file(path)?;
            info!(path = %path.display(), "serving from fixture file");
            Ok(StoreClient::new(Arc::new(gateway)))
        }
        None => StoreClient::from_env(),
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value).context("rendering json")?);
    Ok(())
}

fn format_lpa(value: Option<f64>) -> String {
    value.map_or_else(|| "no data".to_string(), |v| format!("{v:.1} LPA"))
}

fn print_summary(summary: &DashboardSummary) {
    println!("companies:        {}", summary.total_companies);
    println!("average package:  {}", format_lpa(summary.average_package));
    println!("highest package:  {}", format_lpa(summary.highest_package));
    println!("top category:     {}", summary.top_category.as_deref().unwrap_or("no data"));
    println!("package distribution:");
    for bucket in &summary.package_distribution {
        println!("  {:>6} LPA  {}", bucket.label, bucket.companies);
    }
    if !summary.featured.is_empty() {
        println!("featured:");
        for company in &summary.featured {
            println!("  {:<32}  {:.1} LPA", company.name, company.average_ctc);
        }
    }
}

async fn watch_aspect(client: StoreClient, id: CompanyId, aspect: Aspect) -> Result<()> {
    match aspect {
        Aspect::Profile => {
            let view = ProfileView::profile(client, DetailFailurePolicy::FailFast);
            view.set_key(Some(id));
            follow(view).await
        }
        Aspect::Company => follow(EntityView::<Company>::for_company(client, id)).await,
        Aspect::BrandReputation => follow(EntityView::<BrandReputation>::for_company(client, id)).await,
        Aspect::Business => follow(EntityView::<Business>::for_company(client, id)).await,
        Aspect::Compensation => follow(EntityView::<Compensation>::for_company(client, id)).await,
        Aspect::Culture => follow(EntityView::<Culture>::for_company(client, id)).await,
        Aspect::Financials => follow(EntityView::<Financials>::for_company(client, id)).await,
        Aspect::Logistics => follow(EntityView::<Logistics>::for_company(client, id)).await,
        Aspect::People => follow(EntityView::<People>::for_company(client, id)).await,
        Aspect::TalentGrowth => follow(EntityView::<TalentGrowth>::for_company(client, id)).await,
        Aspect::Technologies => follow(EntityView::<Technologies>::for_company(client, id)).await,
    }
}

/// Print every state the view passes through until Ctrl-C.
async fn follow<S>(view: SyncedView<S>) -> Result<()>
where
    S: ViewSource,
    S::Value: Serialize,
{
    let mut updates = view.updates();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        let snapshot = updates.borrow_and_update().clone();
        print_snapshot(&snapshot)?;
        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = &mut ctrl_c => break,
        }
    }

    view.teardown();
    Ok(())
}

fn print_snapshot<K: std::fmt::Debug, V: Serialize>(snapshot: &ViewSnapshot<K, V>) -> Result<()> {
    match &snapshot.error {
        Some(err) => println!("[{:?}] key={:?} error: {err}", snapshot.phase, snapshot.key),
        None => println!("[{:?}] key={:?}", snapshot.phase, snapshot.key),
    }
    print_json(&snapshot.data)
}
