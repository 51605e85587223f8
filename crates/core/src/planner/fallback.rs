use crate::domain::meal::{BasicMeal, MealType};
use serde_json::Map;

const FIELD_COUNT: usize = 8;

/// Parses the pipe-delimited fallback format
/// (`name|calories|protein|carbs|fat|prepTime|difficulty|tags`), one meal per
/// line. Only the first `batch_size` lines are considered; malformed lines are
/// skipped, never fatal.
pub fn parse_fallback_lines(
    response: &str,
    batch_size: usize,
    primary_type: MealType,
    day: u8,
) -> Vec<BasicMeal> {
    let mut meals = Vec::new();
    for line in response.trim().lines().take(batch_size) {
        let line = line.trim();
        if !line.contains('|') {
            continue;
        }
        let parts: Vec<&str> = line.split('|').collect();
        if parts.len() < FIELD_COUNT {
            continue;
        }
        match parse_line(&parts, primary_type, day) {
            Some(meal) => meals.push(meal),
            None => {
                tracing::warn!(line, "skipping malformed fallback meal line");
            }
        }
    }
    meals
}

fn parse_line(parts: &[&str], primary_type: MealType, day: u8) -> Option<BasicMeal> {
    Some(BasicMeal {
        name: parts[0].trim().to_string(),
        meal_type: Some(primary_type.as_str().to_string()),
        day: Some(day),
        calories: Some(parts[1].trim().parse().ok()?),
        protein: Some(parts[2].trim().parse().ok()?),
        carbs: Some(parts[3].trim().parse().ok()?),
        fat: Some(parts[4].trim().parse().ok()?),
        prep_time: Some(parts[5].trim().parse().ok()?),
        difficulty: Some(parts[6].trim().to_string()),
        servings: Some(1),
        tags: parts[7]
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(String::from)
            .collect(),
        extra: Map::new(),
    })
}
