//! Shared domain types for the goi song-vocabulary service.
//!
//! These are the rows and payloads exchanged between the storage layer and
//! the rest of the system. The vocabulary-extraction pipeline produces
//! [`NewSong`] and [`NewVocabularyItem`] values; the storage layer persists
//! them and hands back [`Song`], [`VocabularyItem`], and
//! [`VocabularySearchHit`] rows. Nothing here touches the database; keeping
//! the types in their own crate keeps the dependency graph clean.

use serde::{Deserialize, Serialize};

/// One segment of a vocabulary word: a kanji or kana fragment and the
/// readings it can take, in reading order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VocabPart {
    pub kanji: String,
    pub romaji: Vec<String>,
}

/// Payload for inserting or replacing a song.
///
/// `id` is a caller-supplied stable identifier, not something the store
/// invents. A save replaces every content field of any existing row with
/// the same `id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewSong {
    pub id: String,
    pub title: String,
    pub artist: Option<String>,
    pub lyrics: String,
    pub romaji_lyrics: Option<String>,
}

impl NewSong {
    /// Returns whether all required fields (`id`, `title`, `lyrics`) are
    /// present and non-empty. `artist` and `romaji_lyrics` are optional.
    pub fn has_required_fields(&self) -> bool {
        !self.id.is_empty() && !self.title.is_empty() && !self.lyrics.is_empty()
    }
}

/// A stored song row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Song {
    pub id: String,
    pub title: String,
    pub artist: Option<String>,
    pub lyrics: String,
    pub romaji_lyrics: Option<String>,
    /// Assigned by the database on first insert (UTC, `datetime('now')`).
    pub created_at: String,
}

/// Payload for upserting one vocabulary entry for a song.
///
/// The owning `song_id` is passed alongside the batch, not per item;
/// `(song_id, kanji)` identifies the row being inserted or replaced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewVocabularyItem {
    pub kanji: String,
    pub romaji: String,
    pub english: String,
    pub parts: Vec<VocabPart>,
}

/// A stored vocabulary row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VocabularyItem {
    pub id: i64,
    pub song_id: String,
    pub kanji: String,
    pub romaji: String,
    pub english: String,
    pub parts: Vec<VocabPart>,
    pub created_at: String,
}

/// A vocabulary search result joined with its owning song.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VocabularySearchHit {
    #[serde(flatten)]
    pub item: VocabularyItem,
    pub song_title: String,
    pub song_artist: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn song(id: &str, title: &str, lyrics: &str) -> NewSong {
        NewSong {
            id: id.to_string(),
            title: title.to_string(),
            artist: None,
            lyrics: lyrics.to_string(),
            romaji_lyrics: None,
        }
    }

    #[test]
    fn required_fields_accepts_complete_song() {
        assert!(song("s1", "Lemon", "夢ならばどれほど...").has_required_fields());
    }

    #[test]
    fn required_fields_rejects_missing_pieces() {
        assert!(!song("", "Lemon", "...").has_required_fields());
        assert!(!song("s1", "", "...").has_required_fields());
        assert!(!song("s1", "Lemon", "").has_required_fields());
    }

    #[test]
    fn vocab_part_serialises_to_expected_shape() {
        let part = VocabPart {
            kanji: "上".to_string(),
            romaji: vec!["u".to_string(), "e".to_string()],
        };

        let json = serde_json::to_string(&part).expect("should serialise");
        let parsed: serde_json::Value = serde_json::from_str(&json).expect("should parse");

        assert_eq!(parsed["kanji"], "上");
        assert_eq!(parsed["romaji"][0], "u");
        assert_eq!(parsed["romaji"][1], "e");

        let restored: VocabPart = serde_json::from_str(&json).expect("should deserialise");
        assert_eq!(restored, part);
    }

    #[test]
    fn search_hit_flattens_item_fields() {
        let hit = VocabularySearchHit {
            item: VocabularyItem {
                id: 1,
                song_id: "s1".to_string(),
                kanji: "上".to_string(),
                romaji: "ue".to_string(),
                english: "up".to_string(),
                parts: vec![],
                created_at: "2025-01-01 00:00:00".to_string(),
            },
            song_title: "Ue wo Muite Arukou".to_string(),
            song_artist: Some("Sakamoto Kyu".to_string()),
        };

        let parsed: serde_json::Value =
            serde_json::from_str(&serde_json::to_string(&hit).expect("should serialise"))
                .expect("should parse");

        // Flattened: item fields sit next to the song columns.
        assert_eq!(parsed["kanji"], "上");
        assert_eq!(parsed["song_title"], "Ue wo Muite Arukou");
    }
}
