//! Asset manifest builder.
//!
//! Enumerates every asset URL belonging to a locale's content, in a
//! deterministic order: for each room in sequence, its narration track and
//! image, then each painting's track and image. The manifest order doubles
//! as the scheduler's tie-break, so it must be stable for identical input.

use crate::models::{Locale, Room};

/// What kind of asset a manifest entry points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetKind {
    RoomAudio,
    RoomImage,
    PaintingAudio,
    PaintingImage,
}

impl AssetKind {
    pub fn is_audio(&self) -> bool {
        matches!(self, AssetKind::RoomAudio | AssetKind::PaintingAudio)
    }

    pub fn is_image(&self) -> bool {
        matches!(self, AssetKind::RoomImage | AssetKind::PaintingImage)
    }
}

/// One asset URL plus the room/painting context scoring needs.
#[derive(Debug, Clone)]
pub struct ManifestEntry {
    pub url: String,
    pub kind: AssetKind,
    /// Index of the owning room within the ordered room list.
    pub room_index: usize,
    pub room_id: String,
    pub painting_id: Option<String>,
}

/// Audio file URL: `{base}/audio/{locale}.{entity}.mp3`.
pub fn audio_url(base_url: &str, locale: &Locale, entity_id: &str) -> String {
    format!("{}/audio/{}.{}.mp3", base_url, locale, entity_id)
}

/// Image file URL. Images are shared across locales.
pub fn image_url(base_url: &str, file: &str) -> String {
    format!("{}/images/{}", base_url, file)
}

/// Enumerate all assets for a locale's room list, in manifest order.
pub fn build_manifest(base_url: &str, locale: &Locale, rooms: &[Room]) -> Vec<ManifestEntry> {
    let mut entries = Vec::new();

    for (room_index, room) in rooms.iter().enumerate() {
        entries.push(ManifestEntry {
            url: audio_url(base_url, locale, &room.entity_id()),
            kind: AssetKind::RoomAudio,
            room_index,
            room_id: room.id.clone(),
            painting_id: None,
        });

        if let Some(ref image) = room.image {
            entries.push(ManifestEntry {
                url: image_url(base_url, image),
                kind: AssetKind::RoomImage,
                room_index,
                room_id: room.id.clone(),
                painting_id: None,
            });
        }

        for painting in &room.paintings {
            let painting_id = painting.entity_id(room.sequence);

            entries.push(ManifestEntry {
                url: audio_url(base_url, locale, &painting_id),
                kind: AssetKind::PaintingAudio,
                room_index,
                room_id: room.id.clone(),
                painting_id: Some(painting_id.clone()),
            });

            if let Some(ref image) = painting.image {
                entries.push(ManifestEntry {
                    url: image_url(base_url, image),
                    kind: AssetKind::PaintingImage,
                    room_index,
                    room_id: room.id.clone(),
                    painting_id: Some(painting_id),
                });
            }
        }
    }

    entries
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Painting, Room};

    const BASE: &str = "https://guide.example";

    fn painting(number: u32, image: Option<&str>) -> Painting {
        Painting {
            number,
            title: format!("Painting {}", number),
            text: String::new(),
            image: image.map(String::from),
        }
    }

    fn room(id: &str, sequence: u32, image: Option<&str>, paintings: Vec<Painting>) -> Room {
        Room {
            id: id.to_string(),
            sequence,
            title: None,
            intro_text: String::new(),
            image: image.map(String::from),
            paintings,
        }
    }

    /// 3 rooms with 2, 1, 3 paintings; rooms 1 and 3 have images, and all
    /// paintings but one carry an image.
    fn gallery() -> Vec<Room> {
        vec![
            room("hall", 1, Some("hall.jpg"), vec![painting(1, Some("a.jpg")), painting(2, None)]),
            room("wing-east", 2, None, vec![painting(1, Some("b.jpg"))]),
            room(
                "wing-west",
                3,
                Some("west.jpg"),
                vec![painting(1, Some("c.jpg")), painting(2, Some("d.jpg")), painting(3, Some("e.jpg"))],
            ),
        ]
    }

    #[test]
    fn test_manifest_counts_and_order() {
        let locale = Locale::parse("en-GB").unwrap();
        let rooms = gallery();
        let manifest = build_manifest(BASE, &locale, &rooms);

        let room_audio = manifest.iter().filter(|e| e.kind == AssetKind::RoomAudio).count();
        let room_images = manifest.iter().filter(|e| e.kind == AssetKind::RoomImage).count();
        let painting_audio = manifest.iter().filter(|e| e.kind == AssetKind::PaintingAudio).count();
        let painting_images = manifest.iter().filter(|e| e.kind == AssetKind::PaintingImage).count();

        assert_eq!(room_audio, 3);
        assert_eq!(room_images, 2);
        assert_eq!(painting_audio, 6);
        assert_eq!(painting_images, 5);

        // Rooms appear in sequence, each room's audio before its image,
        // each painting's audio before its image
        assert_eq!(manifest[0].url, "https://guide.example/audio/en-GB.room1.mp3");
        assert_eq!(manifest[1].url, "https://guide.example/images/hall.jpg");
        assert_eq!(manifest[2].url, "https://guide.example/audio/en-GB.1-1.mp3");
        assert_eq!(manifest[3].url, "https://guide.example/images/a.jpg");
        assert_eq!(manifest[4].url, "https://guide.example/audio/en-GB.1-2.mp3");

        let room_order: Vec<usize> = manifest.iter().map(|e| e.room_index).collect();
        let mut sorted = room_order.clone();
        sorted.sort_unstable();
        assert_eq!(room_order, sorted);
    }

    #[test]
    fn test_manifest_is_deterministic() {
        let locale = Locale::parse("fr").unwrap();
        let rooms = gallery();

        let first: Vec<String> = build_manifest(BASE, &locale, &rooms).into_iter().map(|e| e.url).collect();
        let second: Vec<String> = build_manifest(BASE, &locale, &rooms).into_iter().map(|e| e.url).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn test_images_are_locale_independent() {
        let rooms = gallery();
        let en = build_manifest(BASE, &Locale::parse("en-GB").unwrap(), &rooms);
        let fr = build_manifest(BASE, &Locale::parse("fr").unwrap(), &rooms);

        let en_images: Vec<&String> = en.iter().filter(|e| e.kind.is_image()).map(|e| &e.url).collect();
        let fr_images: Vec<&String> = fr.iter().filter(|e| e.kind.is_image()).map(|e| &e.url).collect();
        assert_eq!(en_images, fr_images);

        let en_audio: Vec<&String> = en.iter().filter(|e| e.kind.is_audio()).map(|e| &e.url).collect();
        let fr_audio: Vec<&String> = fr.iter().filter(|e| e.kind.is_audio()).map(|e| &e.url).collect();
        assert_ne!(en_audio, fr_audio);
    }

    #[test]
    fn test_empty_rooms_give_empty_manifest() {
        let locale = Locale::parse("de").unwrap();
        assert!(build_manifest(BASE, &locale, &[]).is_empty());
    }
}
