use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use nutriplan_core::config::Settings;
use nutriplan_core::domain::meal::BasicMeal;
use nutriplan_core::domain::profile::{MealPrepProfile, PlanMode};
use nutriplan_core::planner::MealPlanner;
use nutriplan_core::storage::profiles::{PgProfileStore, ProfileStore};
use nutriplan_core::storage::responses::PgAiResponseStore;

#[derive(Debug, Parser)]
#[command(name = "nutriplan_worker")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the meal-plan pipeline end-to-end for one profile.
    Plan {
        #[arg(long)]
        profile_id: Uuid,

        #[arg(long)]
        user_id: Uuid,

        /// Also generate a categorized shopping list from the generated meals.
        #[arg(long)]
        with_shopping_list: bool,

        /// Stop after the basic meal structure (skip per-meal recipes).
        #[arg(long)]
        skip_recipes: bool,

        /// Resolve the profile and plan mode, then exit without querying the
        /// AI provider.
        #[arg(long)]
        dry_run: bool,
    },
    /// Insert a meal-prep profile from a JSON file.
    SeedProfile {
        #[arg(long)]
        file: PathBuf,

        /// Overrides the user id in the file, if any.
        #[arg(long)]
        user_id: Option<Uuid>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer())
        .init();

    let args = Args::parse();

    let result = match args.command {
        Command::Plan {
            profile_id,
            user_id,
            with_shopping_list,
            skip_recipes,
            dry_run,
        } => {
            run_plan(
                &settings,
                profile_id,
                user_id,
                with_shopping_list,
                skip_recipes,
                dry_run,
            )
            .await
        }
        Command::SeedProfile { file, user_id } => seed_profile(&settings, &file, user_id).await,
    };

    if let Err(err) = &result {
        sentry_anyhow::capture_anyhow(err);
    }
    result
}

async fn run_plan(
    settings: &Settings,
    profile_id: Uuid,
    user_id: Uuid,
    with_shopping_list: bool,
    skip_recipes: bool,
    dry_run: bool,
) -> anyhow::Result<()> {
    let pool = connect(settings).await?;

    let profiles = Arc::new(PgProfileStore::new(pool.clone()));
    let responses = Arc::new(PgAiResponseStore::new(pool.clone()));

    if dry_run {
        let profile = profiles
            .get(profile_id)
            .await?
            .with_context(|| format!("profile {profile_id} not found"))?;
        let mode = match profile.plan_mode() {
            PlanMode::SingleDay => "single-day",
            PlanMode::MultiDay => "multi-day",
        };
        tracing::info!(
            %profile_id,
            meals_per_day = profile.normalized_meals_per_day(),
            mode,
            dry_run = true,
            "resolved profile; skipping generation"
        );
        return Ok(());
    }

    let acquired =
        nutriplan_core::storage::lock::try_acquire_profile_lock(&pool, profile_id).await?;
    if !acquired {
        tracing::warn!(%profile_id, "profile lock not acquired; another run in progress");
        return Ok(());
    }

    let outcome = generate(
        settings,
        profiles,
        responses,
        profile_id,
        user_id,
        with_shopping_list,
        skip_recipes,
    )
    .await;

    let _ = nutriplan_core::storage::lock::release_profile_lock(&pool, profile_id).await;
    outcome
}

async fn generate(
    settings: &Settings,
    profiles: Arc<PgProfileStore>,
    responses: Arc<PgAiResponseStore>,
    profile_id: Uuid,
    user_id: Uuid,
    with_shopping_list: bool,
    skip_recipes: bool,
) -> anyhow::Result<()> {
    let gateway = nutriplan_core::llm::gateway_from_settings(settings)?;
    let provider = gateway.provider();
    let planner = MealPlanner::new(gateway, profiles, responses);

    let Some(basic) = planner.generate_basic_meals(profile_id, user_id).await else {
        tracing::error!(%profile_id, %provider, "basic meal generation failed");
        return Ok(());
    };
    tracing::info!(
        %profile_id,
        meals = basic.total_meals,
        record_id = ?basic.record_id,
        "basic meal structure generated"
    );

    let meals: Vec<BasicMeal> = if skip_recipes {
        basic.meals
    } else {
        match planner
            .generate_recipes_for_meals(profile_id, user_id, basic.meals.clone())
            .await
        {
            Some(recipes) => {
                tracing::info!(
                    %profile_id,
                    meals = recipes.total_meals,
                    record_id = ?recipes.record_id,
                    "recipes generated"
                );
                recipes.meals.into_iter().map(|d| d.meal).collect()
            }
            None => {
                tracing::error!(%profile_id, "recipe generation failed; continuing with basic meals");
                basic.meals
            }
        }
    };

    if with_shopping_list {
        match planner
            .generate_shopping_list_for_meals(profile_id, user_id, meals)
            .await
        {
            Some(list) => {
                tracing::info!(
                    %profile_id,
                    categories = list.total_categories,
                    record_id = ?list.record_id,
                    "shopping list generated"
                );
            }
            None => {
                tracing::error!(%profile_id, "shopping list generation failed");
            }
        }
    }

    Ok(())
}

async fn seed_profile(
    settings: &Settings,
    file: &PathBuf,
    user_id: Option<Uuid>,
) -> anyhow::Result<()> {
    let raw = std::fs::read_to_string(file)
        .with_context(|| format!("failed to read profile file {}", file.display()))?;
    let mut value: serde_json::Value =
        serde_json::from_str(&raw).context("profile file is not valid JSON")?;

    let obj = value
        .as_object_mut()
        .context("profile file must contain a JSON object")?;
    if let Some(user_id) = user_id {
        obj.insert("user_id".to_string(), serde_json::json!(user_id));
    }
    obj.entry("id")
        .or_insert_with(|| serde_json::json!(Uuid::new_v4()));
    obj.entry("created_at")
        .or_insert_with(|| serde_json::json!(chrono::Utc::now()));

    let profile: MealPrepProfile =
        serde_json::from_value(value).context("profile file does not match the profile shape")?;

    let pool = connect(settings).await?;
    let store = PgProfileStore::new(pool);
    let id = store.create(&profile).await?;

    tracing::info!(profile_id = %id, user_id = %profile.user_id, "seeded meal prep profile");
    Ok(())
}

async fn connect(settings: &Settings) -> anyhow::Result<sqlx::PgPool> {
    let db_url = settings.require_database_url()?;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(db_url)
        .await
        .context("connect DATABASE_URL failed")?;

    nutriplan_core::storage::migrate(&pool).await?;
    Ok(pool)
}

fn init_sentry(settings: &Settings) -> Option<sentry::ClientInitGuard> {
    let dsn = settings.sentry_dsn.as_deref()?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            ..Default::default()
        },
    )))
}
