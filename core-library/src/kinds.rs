//! Media kinds and their typed payloads
//!
//! Every canonical item carries a kind-specific payload. Instead of one
//! repository per kind, the store is generic over a zero-sized marker type
//! implementing [`MediaKind`], which fixes the discriminator stored in the
//! `media_type` column and the payload type serialized into `data`.
//!
//! ```ignore
//! let repo: SqliteItemRepository<Movie> = SqliteItemRepository::new(pool);
//! let item: Option<MediaItem<Movie>> = repo.get_by_client_item_id(&client, "42").await?;
//! ```

use bridge_traits::MediaType;
use chrono::{Datelike, NaiveDate};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::list::ListData;

/// Fields denormalized from a payload onto the item row.
pub trait MediaDetails {
    fn title(&self) -> &str;

    fn release_date(&self) -> Option<NaiveDate> {
        None
    }

    /// Explicit year when the payload carries one, else the release date's year.
    fn release_year(&self) -> Option<i32> {
        self.release_date().map(|date| date.year())
    }
}

/// Compile-time media kind tag.
pub trait MediaKind: fmt::Debug + Clone + PartialEq + Send + Sync + 'static {
    const TYPE: MediaType;

    type Data: MediaDetails
        + Serialize
        + DeserializeOwned
        + Clone
        + fmt::Debug
        + PartialEq
        + Send
        + Sync
        + 'static;
}

/// Kinds whose payload is an ordered list of other items.
pub trait ListKind: MediaKind<Data = ListData> {}

macro_rules! media_kind {
    ($(#[$meta:meta])* $name:ident, $ty:expr, $data:ty) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
        pub struct $name;

        impl MediaKind for $name {
            const TYPE: MediaType = $ty;
            type Data = $data;
        }
    };
}

media_kind!(Movie, MediaType::Movie, MovieData);
media_kind!(Series, MediaType::Series, SeriesData);
media_kind!(Episode, MediaType::Episode, EpisodeData);
media_kind!(Track, MediaType::Track, TrackData);
media_kind!(Album, MediaType::Album, AlbumData);
media_kind!(Artist, MediaType::Artist, ArtistData);
media_kind!(
    /// User playlist (tracks or videos)
    Playlist,
    MediaType::Playlist,
    ListData
);
media_kind!(
    /// Curated collection (box sets, franchises)
    Collection,
    MediaType::Collection,
    ListData
);

impl ListKind for Playlist {}
impl ListKind for Collection {}

// =============================================================================
// Payloads
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MovieData {
    pub title: String,
    #[serde(default)]
    pub original_title: Option<String>,
    #[serde(default)]
    pub release_date: Option<NaiveDate>,
    #[serde(default)]
    pub genres: Vec<String>,
    #[serde(default)]
    pub cast: Vec<String>,
    #[serde(default)]
    pub runtime_minutes: Option<u32>,
    #[serde(default)]
    pub overview: Option<String>,
}

impl MediaDetails for MovieData {
    fn title(&self) -> &str {
        &self.title
    }

    fn release_date(&self) -> Option<NaiveDate> {
        self.release_date
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeasonInfo {
    pub season_number: u32,
    #[serde(default)]
    pub episode_count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesData {
    pub title: String,
    #[serde(default)]
    pub first_air_date: Option<NaiveDate>,
    #[serde(default)]
    pub seasons: Vec<SeasonInfo>,
    #[serde(default)]
    pub genres: Vec<String>,
    /// Continuing, ended, ...
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub overview: Option<String>,
}

impl MediaDetails for SeriesData {
    fn title(&self) -> &str {
        &self.title
    }

    fn release_date(&self) -> Option<NaiveDate> {
        self.first_air_date
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpisodeData {
    pub title: String,
    #[serde(default)]
    pub series_title: Option<String>,
    #[serde(default)]
    pub season_number: Option<u32>,
    #[serde(default)]
    pub episode_number: Option<u32>,
    #[serde(default)]
    pub air_date: Option<NaiveDate>,
    #[serde(default)]
    pub runtime_minutes: Option<u32>,
}

impl MediaDetails for EpisodeData {
    fn title(&self) -> &str {
        &self.title
    }

    fn release_date(&self) -> Option<NaiveDate> {
        self.air_date
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackData {
    pub title: String,
    #[serde(default)]
    pub artist: Option<String>,
    #[serde(default)]
    pub album: Option<String>,
    #[serde(default)]
    pub duration_ms: Option<u64>,
    #[serde(default)]
    pub track_number: Option<u32>,
    #[serde(default)]
    pub disc_number: Option<u32>,
    #[serde(default)]
    pub year: Option<i32>,
    #[serde(default)]
    pub genres: Vec<String>,
}

impl MediaDetails for TrackData {
    fn title(&self) -> &str {
        &self.title
    }

    fn release_year(&self) -> Option<i32> {
        self.year
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlbumData {
    pub title: String,
    #[serde(default)]
    pub artist: Option<String>,
    #[serde(default)]
    pub release_date: Option<NaiveDate>,
    #[serde(default)]
    pub year: Option<i32>,
    #[serde(default)]
    pub genres: Vec<String>,
    #[serde(default)]
    pub track_count: Option<u32>,
}

impl MediaDetails for AlbumData {
    fn title(&self) -> &str {
        &self.title
    }

    fn release_date(&self) -> Option<NaiveDate> {
        self.release_date
    }

    fn release_year(&self) -> Option<i32> {
        self.year.or_else(|| self.release_date.map(|date| date.year()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtistData {
    pub name: String,
    #[serde(default)]
    pub genres: Vec<String>,
    #[serde(default)]
    pub biography: Option<String>,
}

impl MediaDetails for ArtistData {
    fn title(&self) -> &str {
        &self.name
    }
}

impl MediaDetails for ListData {
    fn title(&self) -> &str {
        &self.title
    }
}
