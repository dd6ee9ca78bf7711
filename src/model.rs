use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct User {
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub phone: String,
    pub password_hash: String,
    pub age: u32,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Movie {
    pub title: String,
    pub description: String,
    pub review: Option<String>,
    /// Only ever written by the ranking pass over the whole catalog.
    pub ranking: Option<u32>,
    pub rating: Option<f64>,
    pub year: i32,
    pub img_url: String,
}

/// A stored record together with its key, as handed to templates.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct Entry<T> {
    pub id: u64,
    #[serde(flatten)]
    pub value: T,
}

impl<T> Entry<T> {
    pub fn new(id: u64, value: T) -> Self {
        Entry { id, value }
    }
}
