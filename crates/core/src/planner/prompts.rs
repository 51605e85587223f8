use crate::domain::meal::{BasicMeal, MealType};
use crate::domain::profile::{MealPrepProfile, PLAN_DAYS};
use std::collections::BTreeMap;

/// Batch prompts name at most this many already-used meals to avoid.
pub const AVOID_LIST_MAX: usize = 10;

pub fn single_day_prompt(profile: &MealPrepProfile, meals_per_day: u32) -> String {
    format!(
        "{}\n\n\
         Generate {meals_per_day} meal recommendations for a single day.\n\
         \n\
         Return ONLY a JSON array:\n\
         [\n\
           {{\n\
             \"name\": \"Grilled Chicken Salad\",\n\
             \"calories\": 350,\n\
             \"protein\": 35,\n\
             \"carbs\": 15,\n\
             \"fat\": 18,\n\
             \"prepTime\": 20,\n\
             \"difficulty\": \"Easy\",\n\
             \"servings\": 1,\n\
             \"tags\": [\"High Protein\", \"Quick\", \"Healthy\"]\n\
           }}\n\
         ]\n\
         \n\
         IMPORTANT: Return ONLY the JSON array, no additional text or formatting.",
        profile.context_block()
    )
}

/// Compact per-day batch prompt. Deliberately omits the full profile context
/// to keep small local models on track.
pub fn batch_prompt(day: u8, batch_size: u32, needed_types: &[MealType], avoid: &[&str]) -> String {
    let types_str = needed_types
        .iter()
        .map(MealType::as_str)
        .collect::<Vec<_>>()
        .join(", ");
    let avoid_str = if avoid.is_empty() {
        "None".to_string()
    } else {
        avoid.join(", ")
    };

    format!(
        "Generate {batch_size} meal recommendations for Day {day}.\n\
         Focus on these meal types: {types_str}\n\
         Do NOT use these meal names: {avoid_str}\n\
         \n\
         Return ONLY a JSON array in this exact format:\n\
         [\n\
           {{\n\
             \"name\": \"Meal Name\",\n\
             \"meal_type\": \"Breakfast\",\n\
             \"day\": {day},\n\
             \"calories\": 300,\n\
             \"protein\": 20,\n\
             \"carbs\": 30,\n\
             \"fat\": 10,\n\
             \"prepTime\": 15,\n\
             \"difficulty\": \"Easy\",\n\
             \"servings\": 1,\n\
             \"tags\": [\"Healthy\", \"Quick\"]\n\
           }}\n\
         ]\n\
         \n\
         IMPORTANT: Return ONLY the JSON array, no other text or explanation."
    )
}

/// Ultra-simple pipe-delimited prompt used when the structured batch cannot
/// be parsed.
pub fn fallback_prompt(day: u8, batch_size: u32, primary_type: MealType) -> String {
    format!(
        "Create {batch_size} {primary_type} meal for day {day}.\n\
         \n\
         Format: name|calories|protein|carbs|fat|prepTime|difficulty|tags\n\
         \n\
         Example: Chicken Salad|350|35|15|18|20|Easy|High Protein,Quick,Healthy\n\
         \n\
         Return only the meals, one per line."
    )
}

pub fn recipe_prompt(profile_context: &str, meal: &BasicMeal) -> String {
    let meal_type = meal.meal_type.as_deref().unwrap_or("General");
    let calories = meal
        .calories
        .map(|c| c.to_string())
        .unwrap_or_else(|| "Not specified".to_string());

    format!(
        "{profile_context}\n\n\
         Generate detailed recipe information for this specific meal:\n\
         Meal: {}\n\
         Type: {meal_type}\n\
         Target calories: {calories}\n\
         \n\
         Return ONLY a JSON object with recipe details:\n\
         {{\n\
           \"ingredients\": [\n\
             {{\"name\": \"Chicken breast\", \"quantity\": \"6 oz\"}},\n\
             {{\"name\": \"Mixed greens\", \"quantity\": \"2 cups\"}}\n\
           ],\n\
           \"instructions\": [\n\
             \"Grill chicken for 10 minutes\",\n\
             \"Toss with greens and tomatoes\"\n\
           ]\n\
         }}\n\
         \n\
         IMPORTANT: Return ONLY the JSON object, no additional text or formatting.",
        meal.name
    )
}

pub fn shopping_list_prompt(profile: &MealPrepProfile, meals: &[BasicMeal]) -> String {
    let multi_day = meals.iter().any(|m| m.day.is_some());
    let meals_context = shopping_context(meals);
    let prep_span = if multi_day { "7 days" } else { "3-4 days" };

    let budget = profile
        .weekly_budget
        .as_deref()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or("Not specified");
    let dietary = profile
        .dietary_preference
        .as_deref()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or("Balanced");
    let excluded = if profile.excluded_ingredients.is_empty() {
        "None".to_string()
    } else {
        profile.excluded_ingredients.join(", ")
    };

    format!(
        "Based on these recommended meals and the user's profile, generate a comprehensive shopping list.\n\
         \n\
         Recommended Meals:\n\
         {meals_context}\n\
         \n\
         User Profile:\n\
         - Weekly budget: ${budget}\n\
         - Dietary preferences: {dietary}\n\
         - Excluded ingredients: {excluded}\n\
         \n\
         Organize the shopping list by categories (Proteins, Vegetables, Grains, Dairy, Pantry, etc.).\n\
         For each category, list specific items with quantities that would be needed for {prep_span} of meal prep.\n\
         \n\
         Consider the user's budget and suggest cost-effective options where appropriate.\n\
         Respect all dietary restrictions and preferences.\n\
         \n\
         Format the response as a JSON array of category objects.\n\
         Example format:\n\
         [\n\
           {{\n\
             \"category\": \"Proteins\",\n\
             \"items\": [\"Chicken breast (1.5 lbs)\", \"Salmon fillets (0.75 lbs)\", \"Greek yogurt (32 oz)\"]\n\
           }},\n\
           {{\n\
             \"category\": \"Vegetables\",\n\
             \"items\": [\"Broccoli (2 heads)\", \"Bell peppers (4)\", \"Spinach (10 oz)\"]\n\
           }}\n\
         ]"
    )
}

/// Multi-day meal sets become a day-by-day block grouped by type; single-day
/// sets become a flat bullet list.
pub fn shopping_context(meals: &[BasicMeal]) -> String {
    let multi_day = meals.iter().any(|m| m.day.is_some());
    if !multi_day {
        return meals
            .iter()
            .map(|m| format!("- {}", m.name))
            .collect::<Vec<_>>()
            .join("\n");
    }

    let mut by_day: BTreeMap<u8, BTreeMap<String, Vec<&str>>> = BTreeMap::new();
    for meal in meals {
        let day = meal.day.unwrap_or(1);
        let meal_type = meal.meal_type.clone().unwrap_or_else(|| "General".to_string());
        by_day
            .entry(day)
            .or_default()
            .entry(meal_type)
            .or_default()
            .push(&meal.name);
    }

    let mut out = String::from("7-Day Meal Plan:\n");
    for day in 1..=PLAN_DAYS {
        let Some(types) = by_day.get(&day) else {
            continue;
        };
        out.push_str(&format!("Day {day}:\n"));
        for (meal_type, names) in types {
            out.push_str(&format!("  {meal_type}: {}\n", names.join(", ")));
        }
        out.push('\n');
    }
    out
}
