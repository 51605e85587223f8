use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MealType {
    Breakfast,
    Lunch,
    Dinner,
    Snack,
}

impl MealType {
    pub const ALL: [MealType; 4] = [
        MealType::Breakfast,
        MealType::Lunch,
        MealType::Dinner,
        MealType::Snack,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MealType::Breakfast => "Breakfast",
            MealType::Lunch => "Lunch",
            MealType::Dinner => "Dinner",
            MealType::Snack => "Snack",
        }
    }
}

impl fmt::Display for MealType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MealType {
    type Err = ();

    // Case-sensitive on purpose: only the exact strings the prompts ask for
    // count toward the per-day tally. Anything else is kept on the meal but
    // never consumes a quota slot.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Breakfast" => Ok(MealType::Breakfast),
            "Lunch" => Ok(MealType::Lunch),
            "Dinner" => Ok(MealType::Dinner),
            "Snack" => Ok(MealType::Snack),
            _ => Err(()),
        }
    }
}

/// Meal descriptor as produced by structure generation: nutrition and metadata
/// but no recipe detail. Unknown keys from the model are preserved in `extra`
/// so later stages and the frontend see everything the model said.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BasicMeal {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meal_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub day: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calories: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protein: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub carbs: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fat: Option<i64>,
    #[serde(rename = "prepTime", default, skip_serializing_if = "Option::is_none")]
    pub prep_time: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub difficulty: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub servings: Option<i64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl BasicMeal {
    /// Tally key for per-day bookkeeping, when the model's type is recognized.
    pub fn tallied_type(&self) -> Option<MealType> {
        self.meal_type.as_deref().and_then(|s| s.parse().ok())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ingredient {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantity: Option<String>,
}

/// A basic meal enriched with recipe fields. A failed recipe stage keeps the
/// meal with empty ingredient/instruction lists rather than dropping it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetailedMeal {
    #[serde(flatten)]
    pub meal: BasicMeal,
    #[serde(default)]
    pub ingredients: Vec<Ingredient>,
    #[serde(default)]
    pub instructions: Vec<String>,
}

impl DetailedMeal {
    pub fn from_basic(meal: BasicMeal) -> Self {
        Self {
            meal,
            ingredients: Vec::new(),
            instructions: Vec::new(),
        }
    }

    /// Shallow-merges the recipe object over the meal's JSON representation;
    /// recipe keys win on collision.
    pub fn merge(meal: &BasicMeal, recipe: Map<String, Value>) -> Self {
        let mut merged = match serde_json::to_value(meal) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        };
        for (key, value) in recipe {
            merged.insert(key, value);
        }

        match serde_json::from_value(Value::Object(merged)) {
            Ok(detailed) => detailed,
            Err(err) => {
                tracing::warn!(name = %meal.name, error = %err, "recipe merge produced an unusable meal; keeping basic fields");
                Self::from_basic(meal.clone())
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShoppingCategory {
    pub category: String,
    #[serde(default)]
    pub items: Vec<String>,
}
