use crate::domain::profile::{MacroPreference, MealPrepProfile};
use anyhow::Context;
use chrono::{DateTime, Utc};
use uuid::Uuid;

#[async_trait::async_trait]
pub trait ProfileStore: Send + Sync {
    async fn create(&self, profile: &MealPrepProfile) -> anyhow::Result<Uuid>;
    async fn get(&self, profile_id: Uuid) -> anyhow::Result<Option<MealPrepProfile>>;
}

#[derive(Debug, Clone)]
pub struct PgProfileStore {
    pool: sqlx::PgPool,
}

impl PgProfileStore {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl ProfileStore for PgProfileStore {
    async fn create(&self, profile: &MealPrepProfile) -> anyhow::Result<Uuid> {
        sqlx::query(
            "INSERT INTO meal_prep_profiles \
               (id, user_id, goal, meals_per_day, dietary_preference, allergies, intolerances, \
                excluded_ingredients, loved_meals, hated_meals, cooking_time, skill_level, \
                weekly_budget, target_calories, protein_g, fat_g, carbs_g, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)",
        )
        .bind(profile.id)
        .bind(profile.user_id)
        .bind(&profile.goal)
        .bind(&profile.meals_per_day)
        .bind(&profile.dietary_preference)
        .bind(&profile.allergies)
        .bind(&profile.intolerances)
        .bind(&profile.excluded_ingredients)
        .bind(&profile.loved_meals)
        .bind(&profile.hated_meals)
        .bind(&profile.cooking_time)
        .bind(&profile.skill_level)
        .bind(&profile.weekly_budget)
        .bind(profile.target_calories)
        .bind(profile.macro_preference.protein)
        .bind(profile.macro_preference.fat)
        .bind(profile.macro_preference.carbs)
        .bind(profile.created_at)
        .execute(&self.pool)
        .await
        .context("insert meal_prep_profiles failed")?;

        Ok(profile.id)
    }

    async fn get(&self, profile_id: Uuid) -> anyhow::Result<Option<MealPrepProfile>> {
        let row = sqlx::query_as::<_, ProfileRow>(
            "SELECT id, user_id, goal, meals_per_day, dietary_preference, allergies, intolerances, \
                    excluded_ingredients, loved_meals, hated_meals, cooking_time, skill_level, \
                    weekly_budget, target_calories, protein_g, fat_g, carbs_g, created_at \
             FROM meal_prep_profiles \
             WHERE id = $1",
        )
        .bind(profile_id)
        .fetch_optional(&self.pool)
        .await
        .context("select meal_prep_profiles failed")?;

        Ok(row.map(MealPrepProfile::from))
    }
}

#[derive(sqlx::FromRow)]
struct ProfileRow {
    id: Uuid,
    user_id: Uuid,
    goal: Option<String>,
    meals_per_day: Option<String>,
    dietary_preference: Option<String>,
    allergies: Vec<String>,
    intolerances: Vec<String>,
    excluded_ingredients: Vec<String>,
    loved_meals: Vec<String>,
    hated_meals: Vec<String>,
    cooking_time: Option<String>,
    skill_level: Option<String>,
    weekly_budget: Option<String>,
    target_calories: Option<i32>,
    protein_g: i32,
    fat_g: i32,
    carbs_g: i32,
    created_at: DateTime<Utc>,
}

impl From<ProfileRow> for MealPrepProfile {
    fn from(row: ProfileRow) -> Self {
        MealPrepProfile {
            id: row.id,
            user_id: row.user_id,
            goal: row.goal,
            meals_per_day: row.meals_per_day,
            dietary_preference: row.dietary_preference,
            allergies: row.allergies,
            intolerances: row.intolerances,
            excluded_ingredients: row.excluded_ingredients,
            loved_meals: row.loved_meals,
            hated_meals: row.hated_meals,
            cooking_time: row.cooking_time,
            skill_level: row.skill_level,
            weekly_budget: row.weekly_budget,
            target_calories: row.target_calories,
            macro_preference: MacroPreference {
                protein: row.protein_g,
                fat: row.fat_g,
                carbs: row.carbs_g,
            },
            created_at: row.created_at,
        }
    }
}
