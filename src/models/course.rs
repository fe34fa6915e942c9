use serde::{Deserialize, Serialize};

/// Catalog glue consumed read-only by the payment flow. The full catalog
/// lives in an external collaborator; we only need id, title and price.
#[derive(Debug, Clone, Serialize)]
pub struct Course {
    pub id: String,
    pub title: String,
    /// Price in major currency units (rubles); the provider is billed in
    /// minor units (price * 100).
    pub price: i64,
    pub created_at: i64,
}

#[derive(Debug, Deserialize)]
pub struct CreateCourse {
    pub title: String,
    pub price: i64,
}
