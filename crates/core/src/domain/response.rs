use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AiResponseKind {
    MealRecommendations,
    BasicMeals,
    MealRecipes,
    ShoppingList,
    AiInsights,
}

impl AiResponseKind {
    /// The kinds the "latest per type" restore query looks for.
    pub const LATEST_KINDS: [AiResponseKind; 3] = [
        AiResponseKind::MealRecommendations,
        AiResponseKind::ShoppingList,
        AiResponseKind::AiInsights,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AiResponseKind::MealRecommendations => "meal_recommendations",
            AiResponseKind::BasicMeals => "basic_meals",
            AiResponseKind::MealRecipes => "meal_recipes",
            AiResponseKind::ShoppingList => "shopping_list",
            AiResponseKind::AiInsights => "ai_insights",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "meal_recommendations" => Some(AiResponseKind::MealRecommendations),
            "basic_meals" => Some(AiResponseKind::BasicMeals),
            "meal_recipes" => Some(AiResponseKind::MealRecipes),
            "shopping_list" => Some(AiResponseKind::ShoppingList),
            "ai_insights" => Some(AiResponseKind::AiInsights),
            _ => None,
        }
    }
}

impl fmt::Display for AiResponseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Input to one audit write: everything but the storage-generated fields.
#[derive(Debug, Clone)]
pub struct NewAiResponse {
    pub user_id: Uuid,
    pub profile_id: Uuid,
    pub response_type: AiResponseKind,
    pub request_data: Value,
    pub ai_response: String,
    pub ai_provider: String,
}

/// Append-only audit record of one AI interaction. Never mutated after insert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiResponseRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub profile_id: Uuid,
    pub response_type: AiResponseKind,
    pub request_data: Value,
    pub ai_response: String,
    pub ai_provider: String,
    pub created_at: DateTime<Utc>,
    pub is_active: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_wire_strings_round_trip() {
        for kind in [
            AiResponseKind::MealRecommendations,
            AiResponseKind::BasicMeals,
            AiResponseKind::MealRecipes,
            AiResponseKind::ShoppingList,
            AiResponseKind::AiInsights,
        ] {
            assert_eq!(AiResponseKind::parse(kind.as_str()), Some(kind));
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.as_str()));
        }
        assert_eq!(AiResponseKind::parse("weekly_report"), None);
    }
}
