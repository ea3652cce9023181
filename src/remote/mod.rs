mod device;

pub use device::{DeviceTable, TABLE_KEY};

use crate::config::RemoteConfig;
use crate::http::HttpClient;
use crate::models::{Field, MovieFields, MovieRow, NewMovieRow};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, info, instrument};
use url::Url;

/// The authoritative `movies` table. Calls may fail or stall on the network;
/// `Ok(None)` / `Ok(false)` mean the row does not exist.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// All rows, newest `date_added` first.
    async fn select_all(&self) -> Result<Vec<MovieRow>>;
    async fn select(&self, id: &str) -> Result<Option<MovieRow>>;
    async fn insert(&self, row: &NewMovieRow) -> Result<MovieRow>;
    async fn update(&self, id: &str, fields: &MovieFields) -> Result<Option<MovieRow>>;
    /// Writes only the `watched` column, leaving the counter to the procedures.
    async fn set_watched(&self, id: &str, watched: bool) -> Result<Option<MovieRow>>;
    async fn delete(&self, id: &str) -> Result<bool>;
    /// Atomically adds one to `episodes_watched`.
    async fn increment_episodes(&self, id: &str) -> Result<Option<MovieRow>>;
    /// Atomically subtracts one from `episodes_watched`, flooring at zero.
    async fn decrement_episodes(&self, id: &str) -> Result<Option<MovieRow>>;
}

/// A table served by PostgREST (the REST layer of a Supabase project).
///
/// The counter procedures are expected to be declared as
/// `increment_episodes(movie_id)` / `decrement_episodes(movie_id)` returning
/// `setof movies`, so the updated row comes back in the response.
#[derive(Debug, Clone)]
pub struct PostgrestStore {
    http: HttpClient,
    base_url: Url,
    table: String,
}

impl PostgrestStore {
    pub fn new(http: HttpClient, config: &RemoteConfig) -> Result<Self> {
        let mut base_url = Url::parse(&config.base_url)
            .with_context(|| format!("invalid remote baseUrl '{}'", config.base_url))?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        Ok(Self {
            http,
            base_url,
            table: config.table().to_string(),
        })
    }

    fn table_url(&self, query: &str) -> Result<String> {
        let url = self
            .base_url
            .join(&format!("rest/v1/{}?{}", self.table, query))?;
        Ok(url.to_string())
    }

    fn rpc_url(&self, procedure: &str) -> Result<String> {
        Ok(self.base_url.join(&format!("rest/v1/rpc/{}", procedure))?.to_string())
    }

    fn id_filter(id: &str) -> String {
        format!("{}=eq.{}", Field::Id.column(), urlencoding::encode(id))
    }

    async fn call_counter(&self, procedure: &str, id: &str) -> Result<Option<MovieRow>> {
        let url = self.rpc_url(procedure)?;
        let rows: Vec<MovieRow> = self.http.post_json(&url, &json!({ "movie_id": id })).await?;
        debug!("{} returned {} rows", procedure, rows.len());
        Ok(rows.into_iter().next())
    }
}

#[async_trait]
impl RemoteStore for PostgrestStore {
    #[instrument(skip(self))]
    async fn select_all(&self) -> Result<Vec<MovieRow>> {
        let url = self.table_url(&format!("select=*&order={}.desc", Field::DateAdded.column()))?;
        let rows: Vec<MovieRow> = self.http.get_json(&url).await?;
        info!("Fetched {} rows from {}", rows.len(), self.table);
        Ok(rows)
    }

    #[instrument(skip(self))]
    async fn select(&self, id: &str) -> Result<Option<MovieRow>> {
        let url = self.table_url(&format!("select=*&{}", Self::id_filter(id)))?;
        let rows: Vec<MovieRow> = self.http.get_json(&url).await?;
        Ok(rows.into_iter().next())
    }

    #[instrument(skip(self, row), fields(title = %row.fields.title))]
    async fn insert(&self, row: &NewMovieRow) -> Result<MovieRow> {
        let url = self.table_url("select=*")?;
        let rows: Vec<MovieRow> = self.http.post_json(&url, row).await?;
        rows.into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("insert into {} returned no row", self.table))
    }

    #[instrument(skip(self, fields))]
    async fn update(&self, id: &str, fields: &MovieFields) -> Result<Option<MovieRow>> {
        let url = self.table_url(&Self::id_filter(id))?;
        let rows: Vec<MovieRow> = self.http.patch_json(&url, fields).await?;
        Ok(rows.into_iter().next())
    }

    #[instrument(skip(self))]
    async fn set_watched(&self, id: &str, watched: bool) -> Result<Option<MovieRow>> {
        let url = self.table_url(&Self::id_filter(id))?;
        let body = json!({ "watched": watched });
        let rows: Vec<MovieRow> = self.http.patch_json(&url, &body).await?;
        Ok(rows.into_iter().next())
    }

    #[instrument(skip(self))]
    async fn delete(&self, id: &str) -> Result<bool> {
        let url = self.table_url(&Self::id_filter(id))?;
        let rows: Vec<MovieRow> = self.http.delete_json(&url).await?;
        Ok(!rows.is_empty())
    }

    #[instrument(skip(self))]
    async fn increment_episodes(&self, id: &str) -> Result<Option<MovieRow>> {
        self.call_counter("increment_episodes", id).await
    }

    #[instrument(skip(self))]
    async fn decrement_episodes(&self, id: &str) -> Result<Option<MovieRow>> {
        self.call_counter("decrement_episodes", id).await
    }
}
