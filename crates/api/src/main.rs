use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::collections::BTreeMap;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use nutriplan_core::domain::meal::BasicMeal;
use nutriplan_core::domain::profile::{MacroPreference, MealPrepProfile};
use nutriplan_core::domain::response::{AiResponseKind, AiResponseRecord};
use nutriplan_core::planner::{BasicMealsOutput, MealPlanner, RecipesOutput, ShoppingListOutput};
use nutriplan_core::storage::profiles::{PgProfileStore, ProfileStore};
use nutriplan_core::storage::responses::{AiResponseStore, PgAiResponseStore};

const DEFAULT_HISTORY_LIMIT: i64 = 10;
const MAX_HISTORY_LIMIT: i64 = 100;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = nutriplan_core::config::Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer())
        .init();

    let pool: Option<PgPool> = match settings.require_database_url() {
        Ok(db_url) => match sqlx::postgres::PgPoolOptions::new()
            .max_connections(5)
            .connect(db_url)
            .await
        {
            Ok(pool) => match nutriplan_core::storage::migrate(&pool).await {
                Ok(()) => Some(pool),
                Err(e) => {
                    sentry_anyhow::capture_anyhow(&e);
                    tracing::error!(error = %e, "db migrations failed; starting API in degraded mode");
                    None
                }
            },
            Err(e) => {
                let err = anyhow::Error::new(e);
                sentry_anyhow::capture_anyhow(&err);
                tracing::error!(error = %err, "db connect failed; starting API in degraded mode");
                None
            }
        },
        Err(e) => {
            sentry_anyhow::capture_anyhow(&e);
            tracing::error!(error = %e, "DATABASE_URL missing; starting API in degraded mode");
            None
        }
    };

    let gateway = match nutriplan_core::llm::gateway_from_settings(&settings) {
        Ok(gateway) => Some(gateway),
        Err(e) => {
            sentry_anyhow::capture_anyhow(&e);
            tracing::error!(error = %e, "AI provider misconfigured; meal-plan routes disabled");
            None
        }
    };

    let stores = pool.map(|pool| {
        (
            Arc::new(PgProfileStore::new(pool.clone())) as Arc<dyn ProfileStore>,
            Arc::new(PgAiResponseStore::new(pool)) as Arc<dyn AiResponseStore>,
        )
    });

    let planner = match (&stores, gateway) {
        (Some((profiles, responses)), Some(gateway)) => Some(Arc::new(MealPlanner::new(
            gateway,
            profiles.clone(),
            responses.clone(),
        ))),
        _ => None,
    };

    let (profiles, responses) = match stores {
        Some((profiles, responses)) => (Some(profiles), Some(responses)),
        None => (None, None),
    };

    let state = AppState {
        profiles,
        responses,
        planner,
    };

    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/profiles", post(create_profile))
        .route("/profiles/:profile_id", get(get_profile))
        .route("/ai/meal-plan/basic-meals", post(generate_basic_meals))
        .route("/ai/meal-plan/recipes", post(generate_recipes))
        .route("/ai/meal-plan/shopping-list", post(generate_shopping_list))
        .route(
            "/ai/responses/latest/:profile_id/:user_id",
            get(latest_responses),
        )
        .route("/ai/responses/history/:user_id", get(response_history))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(3000);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));

    tracing::info!(%addr, "api listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn healthz() -> &'static str {
    "ok"
}

#[derive(Clone)]
struct AppState {
    profiles: Option<Arc<dyn ProfileStore>>,
    responses: Option<Arc<dyn AiResponseStore>>,
    planner: Option<Arc<MealPlanner>>,
}

#[derive(Debug, Deserialize)]
struct CreateProfileRequest {
    user_id: Uuid,
    #[serde(default)]
    goal: Option<String>,
    #[serde(default)]
    meals_per_day: Option<String>,
    #[serde(default)]
    dietary_preference: Option<String>,
    #[serde(default)]
    allergies: Vec<String>,
    #[serde(default)]
    intolerances: Vec<String>,
    #[serde(default)]
    excluded_ingredients: Vec<String>,
    #[serde(default)]
    loved_meals: Vec<String>,
    #[serde(default)]
    hated_meals: Vec<String>,
    #[serde(default)]
    cooking_time: Option<String>,
    #[serde(default)]
    skill_level: Option<String>,
    #[serde(default)]
    weekly_budget: Option<String>,
    #[serde(default)]
    target_calories: Option<i32>,
    macro_preference: MacroPreference,
}

#[derive(Debug, Serialize)]
struct CreateProfileResponse {
    id: Uuid,
}

async fn create_profile(
    State(state): State<AppState>,
    Json(req): Json<CreateProfileRequest>,
) -> Result<Json<CreateProfileResponse>, StatusCode> {
    let Some(profiles) = &state.profiles else {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    };

    let profile = MealPrepProfile {
        id: Uuid::new_v4(),
        user_id: req.user_id,
        goal: req.goal,
        meals_per_day: req.meals_per_day,
        dietary_preference: req.dietary_preference,
        allergies: req.allergies,
        intolerances: req.intolerances,
        excluded_ingredients: req.excluded_ingredients,
        loved_meals: req.loved_meals,
        hated_meals: req.hated_meals,
        cooking_time: req.cooking_time,
        skill_level: req.skill_level,
        weekly_budget: req.weekly_budget,
        target_calories: req.target_calories,
        macro_preference: req.macro_preference,
        created_at: Utc::now(),
    };

    let id = profiles.create(&profile).await.map_err(|e| {
        sentry_anyhow::capture_anyhow(&e);
        tracing::error!(error = %e, "profile create failed");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    Ok(Json(CreateProfileResponse { id }))
}

async fn get_profile(
    State(state): State<AppState>,
    Path(profile_id): Path<Uuid>,
) -> Result<Json<MealPrepProfile>, StatusCode> {
    let Some(profiles) = &state.profiles else {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    };

    let profile = profiles
        .get(profile_id)
        .await
        .map_err(|e| {
            sentry_anyhow::capture_anyhow(&e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .ok_or(StatusCode::NOT_FOUND)?;

    Ok(Json(profile))
}

#[derive(Debug, Deserialize)]
struct GeneratePlanRequest {
    profile_id: Uuid,
    user_id: Uuid,
}

async fn generate_basic_meals(
    State(state): State<AppState>,
    Json(req): Json<GeneratePlanRequest>,
) -> Result<Json<BasicMealsOutput>, StatusCode> {
    let Some(planner) = &state.planner else {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    };

    planner
        .generate_basic_meals(req.profile_id, req.user_id)
        .await
        .map(Json)
        .ok_or(StatusCode::BAD_GATEWAY)
}

#[derive(Debug, Deserialize)]
struct GenerateForMealsRequest {
    profile_id: Uuid,
    user_id: Uuid,
    meals: Vec<BasicMeal>,
}

async fn generate_recipes(
    State(state): State<AppState>,
    Json(req): Json<GenerateForMealsRequest>,
) -> Result<Json<RecipesOutput>, StatusCode> {
    let Some(planner) = &state.planner else {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    };

    planner
        .generate_recipes_for_meals(req.profile_id, req.user_id, req.meals)
        .await
        .map(Json)
        .ok_or(StatusCode::BAD_GATEWAY)
}

async fn generate_shopping_list(
    State(state): State<AppState>,
    Json(req): Json<GenerateForMealsRequest>,
) -> Result<Json<ShoppingListOutput>, StatusCode> {
    let Some(planner) = &state.planner else {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    };

    planner
        .generate_shopping_list_for_meals(req.profile_id, req.user_id, req.meals)
        .await
        .map(Json)
        .ok_or(StatusCode::BAD_GATEWAY)
}

async fn latest_responses(
    State(state): State<AppState>,
    Path((profile_id, user_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<BTreeMap<AiResponseKind, AiResponseRecord>>, StatusCode> {
    let Some(responses) = &state.responses else {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    };

    responses
        .latest_for_profile(profile_id, user_id)
        .await
        .map(Json)
        .map_err(|e| {
            sentry_anyhow::capture_anyhow(&e);
            StatusCode::INTERNAL_SERVER_ERROR
        })
}

#[derive(Debug, Deserialize)]
struct HistoryParams {
    profile_id: Option<Uuid>,
    limit: Option<i64>,
}

async fn response_history(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Query(params): Query<HistoryParams>,
) -> Result<Json<Vec<AiResponseRecord>>, StatusCode> {
    let Some(responses) = &state.responses else {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    };

    let limit = params
        .limit
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .clamp(1, MAX_HISTORY_LIMIT);

    responses
        .history(user_id, params.profile_id, limit)
        .await
        .map(Json)
        .map_err(|e| {
            sentry_anyhow::capture_anyhow(&e);
            StatusCode::INTERNAL_SERVER_ERROR
        })
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

fn init_sentry(settings: &nutriplan_core::config::Settings) -> Option<sentry::ClientInitGuard> {
    let dsn = settings.sentry_dsn.as_deref()?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            ..Default::default()
        },
    )))
}
