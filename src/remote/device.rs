use super::RemoteStore;
use crate::local::LocalStore;
use crate::models::{MovieFields, MovieRow, NewMovieRow};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, instrument};

pub const TABLE_KEY: &str = "@movie_tracker_table";

/// The `movies` table kept on the device itself, for running without a
/// server. Rows are stored newest first under [`TABLE_KEY`]; every mutation
/// holds the table lock for its whole read-modify-write.
pub struct DeviceTable<L> {
    store: Arc<L>,
    lock: Mutex<()>,
}

impl<L: LocalStore> DeviceTable<L> {
    pub fn new(store: Arc<L>) -> Self {
        Self {
            store,
            lock: Mutex::new(()),
        }
    }

    async fn load(&self) -> Result<Vec<MovieRow>> {
        match self.store.get(TABLE_KEY).await? {
            Some(blob) => serde_json::from_str(&blob).context("corrupt device table"),
            None => Ok(Vec::new()),
        }
    }

    async fn mutate<T: Send>(&self, apply: impl FnOnce(&mut Vec<MovieRow>) -> T + Send) -> Result<T> {
        let _guard = self.lock.lock().await;
        let mut rows = self.load().await?;
        let result = apply(&mut rows);
        self.store.set(TABLE_KEY, serde_json::to_string(&rows)?).await?;
        Ok(result)
    }

    async fn adjust_episodes(&self, id: &str, adjust: fn(u32) -> u32) -> Result<Option<MovieRow>> {
        self.mutate(|rows| {
            rows.iter_mut().find(|row| row.id == id).map(|row| {
                row.episodes_watched = adjust(row.episodes_watched);
                row.clone()
            })
        })
        .await
    }
}

/// Millisecond timestamp id, bumped past any id already taken.
fn next_id(rows: &[MovieRow], now_millis: i64) -> String {
    let mut candidate = now_millis;
    while rows.iter().any(|row| row.id == candidate.to_string()) {
        candidate += 1;
    }
    candidate.to_string()
}

fn apply_fields(row: &mut MovieRow, fields: &MovieFields) {
    row.title = fields.title.clone();
    row.media_type = fields.media_type;
    row.episodes_watched = fields.episodes_watched;
    row.total_episodes = fields.total_episodes;
    row.current_season = fields.current_season;
    row.watched = fields.watched;
}

#[async_trait]
impl<L: LocalStore> RemoteStore for DeviceTable<L> {
    async fn select_all(&self) -> Result<Vec<MovieRow>> {
        let mut rows = self.load().await?;
        rows.sort_by(|a, b| b.date_added.cmp(&a.date_added));
        Ok(rows)
    }

    async fn select(&self, id: &str) -> Result<Option<MovieRow>> {
        Ok(self.load().await?.into_iter().find(|row| row.id == id))
    }

    #[instrument(skip(self, new_row), fields(title = %new_row.fields.title))]
    async fn insert(&self, new_row: &NewMovieRow) -> Result<MovieRow> {
        self.mutate(|rows| {
            let fields = &new_row.fields;
            let row = MovieRow {
                id: next_id(rows, Utc::now().timestamp_millis()),
                title: fields.title.clone(),
                media_type: fields.media_type,
                episodes_watched: fields.episodes_watched,
                total_episodes: fields.total_episodes,
                current_season: fields.current_season,
                watched: fields.watched,
                date_added: new_row.date_added,
            };
            debug!("Assigned id {}", row.id);
            rows.insert(0, row.clone());
            row
        })
        .await
    }

    async fn update(&self, id: &str, fields: &MovieFields) -> Result<Option<MovieRow>> {
        self.mutate(|rows| {
            rows.iter_mut().find(|row| row.id == id).map(|row| {
                apply_fields(row, fields);
                row.clone()
            })
        })
        .await
    }

    async fn set_watched(&self, id: &str, watched: bool) -> Result<Option<MovieRow>> {
        self.mutate(|rows| {
            rows.iter_mut().find(|row| row.id == id).map(|row| {
                row.watched = watched;
                row.clone()
            })
        })
        .await
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        self.mutate(|rows| {
            let before = rows.len();
            rows.retain(|row| row.id != id);
            rows.len() != before
        })
        .await
    }

    async fn increment_episodes(&self, id: &str) -> Result<Option<MovieRow>> {
        self.adjust_episodes(id, |n| n.saturating_add(1)).await
    }

    async fn decrement_episodes(&self, id: &str) -> Result<Option<MovieRow>> {
        self.adjust_episodes(id, |n| n.saturating_sub(1)).await
    }
}
