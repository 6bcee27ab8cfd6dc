use serde::{Deserialize, Serialize};

use super::Locale;

/// The visitor's current place in the gallery.
///
/// Supplied by the client on navigation; transient and best-effort. A stale
/// position only degrades scheduling priority, never correctness.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    #[serde(rename = "roomId")]
    pub room_id: String,
    #[serde(rename = "paintingId")]
    pub painting_id: Option<String>,
    pub locale: Locale,
}

impl Position {
    pub fn new(room_id: impl Into<String>, painting_id: Option<String>, locale: Locale) -> Self {
        Self {
            room_id: room_id.into(),
            painting_id,
            locale,
        }
    }
}
