use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::ValidationError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Movie,
    Series,
}

/// A tracked movie or series, in the application's field names.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Movie {
    pub id: String,
    pub title: String,
    #[serde(rename = "type")]
    pub media_type: MediaType,
    #[serde(default)]
    pub episodes_watched: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_episodes: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_season: Option<u32>,
    #[serde(default)]
    pub watched: bool,
    pub date_added: DateTime<Utc>,
}

/// A record as it sits in the remote `movies` table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct MovieRow {
    #[serde(deserialize_with = "id_from_text_or_number")]
    pub id: String,
    pub title: String,
    #[serde(rename = "type")]
    pub media_type: MediaType,
    #[serde(default, deserialize_with = "null_as_default")]
    pub episodes_watched: u32,
    #[serde(default)]
    pub total_episodes: Option<u32>,
    #[serde(default)]
    pub current_season: Option<u32>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub watched: bool,
    pub date_added: DateTime<Utc>,
}

/// The mutable columns of a row, validated and normalized. Serialized as the
/// body of inserts and updates.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct MovieFields {
    pub title: String,
    #[serde(rename = "type")]
    pub media_type: MediaType,
    pub episodes_watched: u32,
    pub total_episodes: Option<u32>,
    pub current_season: Option<u32>,
    pub watched: bool,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct NewMovieRow {
    #[serde(flatten)]
    pub fields: MovieFields,
    pub date_added: DateTime<Utc>,
}

/// Everything a caller provides when adding a record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MovieDraft {
    pub title: String,
    #[serde(rename = "type")]
    pub media_type: MediaType,
    #[serde(default)]
    pub episodes_watched: u32,
    #[serde(default)]
    pub total_episodes: Option<u32>,
    #[serde(default)]
    pub current_season: Option<u32>,
    #[serde(default)]
    pub watched: bool,
}

/// A partial update. `None` leaves a field alone; the nested options on the
/// episode total and season allow clearing them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MoviePatch {
    pub title: Option<String>,
    pub media_type: Option<MediaType>,
    pub episodes_watched: Option<u32>,
    pub total_episodes: Option<Option<u32>>,
    pub current_season: Option<Option<u32>>,
    pub watched: Option<bool>,
}

/// Watched flag of a series: set once the counter reaches a known total.
pub fn derive_watched(episodes_watched: u32, total_episodes: Option<u32>) -> bool {
    matches!(total_episodes, Some(total) if total > 0 && episodes_watched >= total)
}

impl MovieFields {
    /// Trims the title, drops zero totals and seasons, zeroes series-only
    /// fields on movies and derives `watched` for series.
    pub fn normalize(
        title: &str,
        media_type: MediaType,
        episodes_watched: u32,
        total_episodes: Option<u32>,
        current_season: Option<u32>,
        watched: bool,
    ) -> Result<Self, ValidationError> {
        let title = title.trim();
        if title.is_empty() {
            return Err(ValidationError::EmptyTitle);
        }

        let fields = match media_type {
            MediaType::Movie => MovieFields {
                title: title.to_string(),
                media_type,
                episodes_watched: 0,
                total_episodes: None,
                current_season: None,
                watched,
            },
            MediaType::Series => {
                let total_episodes = total_episodes.filter(|total| *total > 0);
                if let Some(total) = total_episodes {
                    if total < episodes_watched {
                        return Err(ValidationError::TotalBelowWatched {
                            total,
                            watched: episodes_watched,
                        });
                    }
                }
                MovieFields {
                    title: title.to_string(),
                    media_type,
                    episodes_watched,
                    total_episodes,
                    current_season: current_season.filter(|season| *season > 0),
                    watched: derive_watched(episodes_watched, total_episodes),
                }
            }
        };

        Ok(fields)
    }
}

impl MovieDraft {
    pub fn movie(title: impl Into<String>, watched: bool) -> Self {
        Self {
            title: title.into(),
            media_type: MediaType::Movie,
            episodes_watched: 0,
            total_episodes: None,
            current_season: None,
            watched,
        }
    }

    pub fn series(title: impl Into<String>, episodes_watched: u32, total_episodes: Option<u32>) -> Self {
        Self {
            title: title.into(),
            media_type: MediaType::Series,
            episodes_watched,
            total_episodes,
            current_season: None,
            watched: false,
        }
    }

    pub fn with_season(mut self, season: u32) -> Self {
        self.current_season = Some(season);
        self
    }

    pub fn validate(&self) -> Result<MovieFields, ValidationError> {
        MovieFields::normalize(
            &self.title,
            self.media_type,
            self.episodes_watched,
            self.total_episodes,
            self.current_season,
            self.watched,
        )
    }
}

impl Movie {
    pub fn fields(&self) -> MovieFields {
        MovieFields {
            title: self.title.clone(),
            media_type: self.media_type,
            episodes_watched: self.episodes_watched,
            total_episodes: self.total_episodes,
            current_season: self.current_season,
            watched: self.watched,
        }
    }

    /// Merges `patch` over this record and re-validates the result.
    pub fn merge(&self, patch: &MoviePatch) -> Result<MovieFields, ValidationError> {
        MovieFields::normalize(
            patch.title.as_deref().unwrap_or(&self.title),
            patch.media_type.unwrap_or(self.media_type),
            patch.episodes_watched.unwrap_or(self.episodes_watched),
            patch.total_episodes.unwrap_or(self.total_episodes),
            patch.current_season.unwrap_or(self.current_season),
            patch.watched.unwrap_or(self.watched),
        )
    }

    pub fn is_series(&self) -> bool {
        self.media_type == MediaType::Series
    }
}

impl MoviePatch {
    /// Checks what the patch can violate on its own, before the record it
    /// applies to has been fetched.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if let Some(title) = &self.title {
            if title.trim().is_empty() {
                return Err(ValidationError::EmptyTitle);
            }
        }
        if self.media_type != Some(MediaType::Movie) {
            if let (Some(watched), Some(Some(total))) = (self.episodes_watched, self.total_episodes) {
                if total > 0 && total < watched {
                    return Err(ValidationError::TotalBelowWatched { total, watched });
                }
            }
        }
        Ok(())
    }
}

impl From<MovieRow> for Movie {
    fn from(row: MovieRow) -> Self {
        Movie {
            id: row.id,
            title: row.title,
            media_type: row.media_type,
            episodes_watched: row.episodes_watched,
            total_episodes: row.total_episodes,
            current_season: row.current_season,
            watched: row.watched,
            date_added: row.date_added,
        }
    }
}

impl From<Movie> for MovieRow {
    fn from(movie: Movie) -> Self {
        MovieRow {
            id: movie.id,
            title: movie.title,
            media_type: movie.media_type,
            episodes_watched: movie.episodes_watched,
            total_episodes: movie.total_episodes,
            current_season: movie.current_season,
            watched: movie.watched,
            date_added: movie.date_added,
        }
    }
}

/// Entity fields, addressable by application name or by remote column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Id,
    Title,
    Type,
    EpisodesWatched,
    TotalEpisodes,
    CurrentSeason,
    Watched,
    DateAdded,
}

impl Field {
    pub const ALL: [Field; 8] = [
        Field::Id,
        Field::Title,
        Field::Type,
        Field::EpisodesWatched,
        Field::TotalEpisodes,
        Field::CurrentSeason,
        Field::Watched,
        Field::DateAdded,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Field::Id => "id",
            Field::Title => "title",
            Field::Type => "type",
            Field::EpisodesWatched => "episodesWatched",
            Field::TotalEpisodes => "totalEpisodes",
            Field::CurrentSeason => "currentSeason",
            Field::Watched => "watched",
            Field::DateAdded => "dateAdded",
        }
    }

    pub fn column(self) -> &'static str {
        match self {
            Field::Id => "id",
            Field::Title => "title",
            Field::Type => "type",
            Field::EpisodesWatched => "episodes_watched",
            Field::TotalEpisodes => "total_episodes",
            Field::CurrentSeason => "current_season",
            Field::Watched => "watched",
            Field::DateAdded => "date_added",
        }
    }

    pub fn from_name(name: &str) -> Option<Field> {
        Field::ALL.into_iter().find(|field| field.name() == name)
    }

    pub fn from_column(column: &str) -> Option<Field> {
        Field::ALL.into_iter().find(|field| field.column() == column)
    }
}

fn id_from_text_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Text(String),
        Number(i64),
    }

    Ok(match RawId::deserialize(deserializer)? {
        RawId::Text(id) => id,
        RawId::Number(id) => id.to_string(),
    })
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
