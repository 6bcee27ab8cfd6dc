use serde::{Deserialize, Serialize};

/// One painting within a room.
///
/// The stable entity id used in audio file names is derived from the owning
/// room's sequence number and the painting's display number, e.g. `"3-2"`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Painting {
    pub number: u32,
    pub title: String,
    #[serde(default)]
    pub text: String,
    pub image: Option<String>,
}

impl Painting {
    /// Entity id for audio file naming: `{room sequence}-{painting number}`.
    pub fn entity_id(&self, room_sequence: u32) -> String {
        format!("{}-{}", room_sequence, self.number)
    }
}

/// An ordered content unit of the guide.
///
/// Rooms are parsed from a locale's data file, ordered by `sequence`, and
/// immutable for the life of the process once loaded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Room {
    pub id: String,
    pub sequence: u32,
    pub title: Option<String>,
    #[serde(rename = "introText", default)]
    pub intro_text: String,
    pub image: Option<String>,
    #[serde(default)]
    pub paintings: Vec<Painting>,
}

impl Room {
    /// Entity id for the room's own narration track: `room{sequence}`.
    pub fn entity_id(&self) -> String {
        format!("room{}", self.sequence)
    }
}

#[derive(Debug, Deserialize)]
struct RoomsWrapper {
    #[serde(default)]
    rooms: Vec<Room>,
    #[serde(default)]
    data: Vec<Room>,
}

/// Parse a locale's rooms file.
///
/// Accepts either a bare array or a `{"rooms": [...]}` wrapper, since the
/// data files have shipped in both shapes. Rooms come back sorted by
/// sequence regardless of file order.
pub fn parse_rooms(text: &str) -> Result<Vec<Room>, serde_json::Error> {
    let mut rooms = if let Ok(rooms) = serde_json::from_str::<Vec<Room>>(text) {
        rooms
    } else {
        let wrapper: RoomsWrapper = serde_json::from_str(text)?;
        if !wrapper.rooms.is_empty() {
            wrapper.rooms
        } else {
            wrapper.data
        }
    };
    rooms.sort_by_key(|r| r.sequence);
    Ok(rooms)
}
