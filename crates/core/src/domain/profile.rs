use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Meals per day assumed when the stored preference is missing or unparsable.
pub const DEFAULT_MEALS_PER_DAY: u32 = 3;

/// At this many meals per day the planner switches to the 7-day batched path.
pub const MULTI_DAY_THRESHOLD: u32 = 5;

/// A multi-day plan always spans a full week.
pub const PLAN_DAYS: u8 = 7;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MacroPreference {
    /// Grams per day.
    pub protein: i32,
    pub fat: i32,
    pub carbs: i32,
}

/// User-supplied planning constraints. Immutable input to one generation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MealPrepProfile {
    pub id: Uuid,
    pub user_id: Uuid,
    #[serde(default)]
    pub goal: Option<String>,
    /// Stored as text so the "5+" sentinel survives round-trips.
    #[serde(default)]
    pub meals_per_day: Option<String>,
    #[serde(default)]
    pub dietary_preference: Option<String>,
    #[serde(default)]
    pub allergies: Vec<String>,
    #[serde(default)]
    pub intolerances: Vec<String>,
    #[serde(default)]
    pub excluded_ingredients: Vec<String>,
    #[serde(default)]
    pub loved_meals: Vec<String>,
    #[serde(default)]
    pub hated_meals: Vec<String>,
    #[serde(default)]
    pub cooking_time: Option<String>,
    #[serde(default)]
    pub skill_level: Option<String>,
    #[serde(default)]
    pub weekly_budget: Option<String>,
    #[serde(default)]
    pub target_calories: Option<i32>,
    pub macro_preference: MacroPreference,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanMode {
    SingleDay,
    MultiDay,
}

impl MealPrepProfile {
    /// "5+" maps to 5; anything unparsable falls back to the default of 3.
    pub fn normalized_meals_per_day(&self) -> u32 {
        match self.meals_per_day.as_deref() {
            Some("5+") => MULTI_DAY_THRESHOLD,
            Some(s) => s.trim().parse().unwrap_or(DEFAULT_MEALS_PER_DAY),
            None => DEFAULT_MEALS_PER_DAY,
        }
    }

    pub fn plan_mode(&self) -> PlanMode {
        if self.normalized_meals_per_day() >= MULTI_DAY_THRESHOLD {
            PlanMode::MultiDay
        } else {
            PlanMode::SingleDay
        }
    }

    /// Full profile context block embedded in structure-generation prompts.
    pub fn context_block(&self) -> String {
        format!(
            "User Profile:\n\
             - Goal: {}\n\
             - Meals per day: {}\n\
             - Dietary preference: {}\n\
             - Allergies: {}\n\
             - Intolerances: {}\n\
             - Excluded ingredients: {}\n\
             - Loved meals: {}\n\
             - Hated meals: {}\n\
             - Cooking time preference: {}\n\
             - Skill level: {}\n\
             - Weekly budget: ${}\n\
             - Target calories: {}\n\
             - Macro preferences: {}g protein, {}g fat, {}g carbs",
            or_fallback(&self.goal, "General health"),
            self.normalized_meals_per_day(),
            or_fallback(&self.dietary_preference, "Balanced"),
            join_or(&self.allergies, "None"),
            join_or(&self.intolerances, "None"),
            join_or(&self.excluded_ingredients, "None"),
            join_or(&self.loved_meals, "Not specified"),
            join_or(&self.hated_meals, "Not specified"),
            or_fallback(&self.cooking_time, "Moderate"),
            or_fallback(&self.skill_level, "Intermediate"),
            or_fallback(&self.weekly_budget, "Not specified"),
            self.target_calories
                .map(|c| c.to_string())
                .unwrap_or_else(|| "Not specified".to_string()),
            self.macro_preference.protein,
            self.macro_preference.fat,
            self.macro_preference.carbs,
        )
    }

    /// Reduced context used when only recipe details are requested; macro and
    /// budget constraints do not influence per-meal instructions.
    pub fn recipe_context_block(&self) -> String {
        format!(
            "User Profile:\n\
             - Goal: {}\n\
             - Dietary preference: {}\n\
             - Allergies: {}\n\
             - Intolerances: {}\n\
             - Excluded ingredients: {}\n\
             - Cooking time preference: {}\n\
             - Skill level: {}",
            or_fallback(&self.goal, "General health"),
            or_fallback(&self.dietary_preference, "Balanced"),
            join_or(&self.allergies, "None"),
            join_or(&self.intolerances, "None"),
            join_or(&self.excluded_ingredients, "None"),
            or_fallback(&self.cooking_time, "Moderate"),
            or_fallback(&self.skill_level, "Intermediate"),
        )
    }
}

fn or_fallback<'a>(value: &'a Option<String>, fallback: &'a str) -> &'a str {
    value
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(fallback)
}

fn join_or(values: &[String], fallback: &str) -> String {
    if values.is_empty() {
        fallback.to_string()
    } else {
        values.join(", ")
    }
}
