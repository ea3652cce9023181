use crate::error::ValidationError;
use crate::local::LocalStore;
use crate::models::{derive_watched, Movie, MovieDraft, MovieFields, MoviePatch, NewMovieRow};
use crate::remote::RemoteStore;
use anyhow::Result;
use chrono::Utc;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

/// Local store key holding the cached collection.
pub const CACHE_KEY: &str = "@movie_tracker_movies";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Increment,
    Decrement,
}

/// Reads and writes movies against the remote table, mirroring every
/// confirmed remote result into the local cache.
///
/// Transport failures never reach the caller: they are logged and turned into
/// `None`, `false` or the cached list. Only [`ValidationError`] is returned as
/// an error, and always before any store is touched.
pub struct MovieAccess<L, R> {
    local: Arc<L>,
    remote: Arc<R>,
}

impl<L, R> Clone for MovieAccess<L, R> {
    fn clone(&self) -> Self {
        Self {
            local: Arc::clone(&self.local),
            remote: Arc::clone(&self.remote),
        }
    }
}

impl<L, R> MovieAccess<L, R>
where
    L: LocalStore + 'static,
    R: RemoteStore + 'static,
{
    pub fn new(local: Arc<L>, remote: Arc<R>) -> Self {
        Self { local, remote }
    }

    /// All movies, newest first. Falls back to the cached list when the
    /// remote cannot be read.
    #[instrument(skip(self))]
    pub async fn list(&self) -> Vec<Movie> {
        match self.refresh().await {
            Ok(movies) => movies,
            Err(e) => {
                error!("Failed to fetch movies, serving cached list: {:#}", e);
                self.cached().await
            }
        }
    }

    /// The cached list right away, with a refresh from the remote started in
    /// the background. Dropping the handle leaves the refresh running.
    pub async fn snapshot(&self) -> (Vec<Movie>, JoinHandle<()>) {
        let movies = self.cached().await;
        (movies, self.spawn_refresh())
    }

    pub fn spawn_refresh(&self) -> JoinHandle<()> {
        let access = self.clone();
        tokio::spawn(async move {
            match access.refresh().await {
                Ok(movies) => debug!("Background refresh cached {} movies", movies.len()),
                Err(e) => warn!("Background refresh failed: {:#}", e),
            }
        })
    }

    /// Whatever the local cache holds; empty when it is missing or unreadable.
    pub async fn cached(&self) -> Vec<Movie> {
        match self.local.get(CACHE_KEY).await {
            Ok(Some(blob)) => serde_json::from_str(&blob).unwrap_or_else(|e| {
                warn!("Ignoring unreadable movie cache: {}", e);
                Vec::new()
            }),
            Ok(None) => Vec::new(),
            Err(e) => {
                warn!("Failed to read movie cache: {:#}", e);
                Vec::new()
            }
        }
    }

    #[instrument(skip(self, draft), fields(title = %draft.title))]
    pub async fn add(&self, draft: &MovieDraft) -> Result<Option<Movie>, ValidationError> {
        let new_row = NewMovieRow {
            fields: draft.validate()?,
            date_added: Utc::now(),
        };

        let movie = match self.remote.insert(&new_row).await {
            Ok(row) => Movie::from(row),
            Err(e) => {
                error!("Failed to add '{}': {:#}", new_row.fields.title, e);
                return Ok(None);
            }
        };

        self.mirror(|movies| {
            movies.retain(|m| m.id != movie.id);
            movies.insert(0, movie.clone());
        })
        .await;

        info!("Added {:?} '{}' ({})", movie.media_type, movie.title, movie.id);
        Ok(Some(movie))
    }

    /// Merges `patch` into the stored record. `Ok(None)` when the id is
    /// unknown or the remote write fails.
    #[instrument(skip(self, patch))]
    pub async fn update(&self, id: &str, patch: &MoviePatch) -> Result<Option<Movie>, ValidationError> {
        patch.validate()?;

        let Some(current) = self.fetch(id).await else {
            return Ok(None);
        };
        let fields = current.merge(patch)?;

        Ok(self.write_fields(id, &fields).await)
    }

    #[instrument(skip(self))]
    pub async fn delete(&self, id: &str) -> bool {
        match self.remote.delete(id).await {
            Ok(true) => {
                self.mirror(|movies| movies.retain(|m| m.id != id)).await;
                info!("Deleted movie {}", id);
                true
            }
            Ok(false) => {
                warn!("Cannot delete movie {}: not found", id);
                false
            }
            Err(e) => {
                error!("Failed to delete movie {}: {:#}", id, e);
                false
            }
        }
    }

    /// Counts one more watched episode. The counter may run past the total;
    /// the series stays watched.
    #[instrument(skip(self))]
    pub async fn increment_episode(&self, id: &str) -> Option<Movie> {
        self.step_episodes(id, Step::Increment).await
    }

    #[instrument(skip(self))]
    pub async fn decrement_episode(&self, id: &str) -> Option<Movie> {
        self.step_episodes(id, Step::Decrement).await
    }

    async fn step_episodes(&self, id: &str, step: Step) -> Option<Movie> {
        let current = self.fetch(id).await?;
        if !current.is_series() {
            warn!("Movie {} is not a series, episode count unchanged", id);
            return None;
        }
        if step == Step::Decrement && current.episodes_watched == 0 {
            debug!("Series {} has no watched episodes to take back", id);
            return None;
        }

        let adjusted = match step {
            Step::Increment => self.remote.increment_episodes(id).await,
            Step::Decrement => self.remote.decrement_episodes(id).await,
        };
        let movie = match adjusted {
            Ok(Some(row)) => Movie::from(row),
            Ok(None) => {
                warn!("Series {} disappeared before its episodes could change", id);
                return None;
            }
            Err(e) => {
                error!("Failed to {:?} episodes of {}: {:#}", step, id, e);
                return None;
            }
        };

        let watched = derive_watched(movie.episodes_watched, movie.total_episodes);
        if watched == movie.watched {
            self.replace_cached(movie.clone()).await;
            return Some(movie);
        }

        // Only the flag is written back; the counter belongs to the procedures.
        let movie = match self.remote.set_watched(id, watched).await {
            Ok(Some(row)) => Movie::from(row),
            Ok(None) => {
                warn!("Series {} disappeared before its watched flag could change", id);
                return None;
            }
            Err(e) => {
                warn!("Episodes of {} changed but the watched flag was not saved: {:#}", id, e);
                Movie { watched, ..movie }
            }
        };
        self.replace_cached(movie.clone()).await;
        Some(movie)
    }

    async fn fetch(&self, id: &str) -> Option<Movie> {
        match self.remote.select(id).await {
            Ok(Some(row)) => Some(Movie::from(row)),
            Ok(None) => {
                debug!("Movie {} not found", id);
                None
            }
            Err(e) => {
                error!("Failed to load movie {}: {:#}", id, e);
                None
            }
        }
    }

    async fn write_fields(&self, id: &str, fields: &MovieFields) -> Option<Movie> {
        match self.remote.update(id, fields).await {
            Ok(Some(row)) => {
                let movie = Movie::from(row);
                self.replace_cached(movie.clone()).await;
                info!("Updated movie {} '{}'", movie.id, movie.title);
                Some(movie)
            }
            Ok(None) => {
                warn!("Cannot update movie {}: not found", id);
                None
            }
            Err(e) => {
                error!("Failed to update movie {}: {:#}", id, e);
                None
            }
        }
    }

    async fn refresh(&self) -> Result<Vec<Movie>> {
        let movies: Vec<Movie> = self
            .remote
            .select_all()
            .await?
            .into_iter()
            .map(Movie::from)
            .collect();
        self.write_cache(&movies).await;
        Ok(movies)
    }

    async fn replace_cached(&self, movie: Movie) {
        self.mirror(|movies| match movies.iter().position(|m| m.id == movie.id) {
            Some(index) => movies[index] = movie,
            None => movies.insert(0, movie),
        })
        .await;
    }

    async fn mirror(&self, apply: impl FnOnce(&mut Vec<Movie>)) {
        let mut movies = self.cached().await;
        apply(&mut movies);
        self.write_cache(&movies).await;
    }

    async fn write_cache(&self, movies: &[Movie]) {
        let blob = match serde_json::to_string(movies) {
            Ok(blob) => blob,
            Err(e) => {
                warn!("Failed to serialize movie cache: {}", e);
                return;
            }
        };
        if let Err(e) = self.local.set(CACHE_KEY, blob).await {
            warn!("Failed to write movie cache: {:#}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local::MemoryStore;
    use crate::models::{MediaType, MovieRow};
    use crate::remote::DeviceTable;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Wraps a table with an on/off network switch and a call counter. It can
    /// also fail row writes on their own, or let another client's increment
    /// land right after each of ours.
    struct Switchable<R> {
        inner: R,
        reachable: AtomicBool,
        writes_fail: AtomicBool,
        other_client_increments: AtomicBool,
        calls: AtomicUsize,
    }

    impl<R> Switchable<R> {
        fn new(inner: R) -> Self {
            Self {
                inner,
                reachable: AtomicBool::new(true),
                writes_fail: AtomicBool::new(false),
                other_client_increments: AtomicBool::new(false),
                calls: AtomicUsize::new(0),
            }
        }

        fn set_reachable(&self, reachable: bool) {
            self.reachable.store(reachable, Ordering::SeqCst);
        }

        fn set_writes_fail(&self, fail: bool) {
            self.writes_fail.store(fail, Ordering::SeqCst);
        }

        fn set_other_client_increments(&self, racing: bool) {
            self.other_client_increments.store(racing, Ordering::SeqCst);
        }

        fn write(&self) -> Result<()> {
            self.connect()?;
            if self.writes_fail.load(Ordering::SeqCst) {
                Err(anyhow::anyhow!("row write rejected"))
            } else {
                Ok(())
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn connect(&self) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.reachable.load(Ordering::SeqCst) {
                Ok(())
            } else {
                Err(anyhow::anyhow!("network unreachable"))
            }
        }
    }

    #[async_trait]
    impl<R: RemoteStore> RemoteStore for Switchable<R> {
        async fn select_all(&self) -> Result<Vec<MovieRow>> {
            self.connect()?;
            self.inner.select_all().await
        }

        async fn select(&self, id: &str) -> Result<Option<MovieRow>> {
            self.connect()?;
            self.inner.select(id).await
        }

        async fn insert(&self, row: &NewMovieRow) -> Result<MovieRow> {
            self.connect()?;
            self.inner.insert(row).await
        }

        async fn update(&self, id: &str, fields: &MovieFields) -> Result<Option<MovieRow>> {
            self.write()?;
            self.inner.update(id, fields).await
        }

        async fn set_watched(&self, id: &str, watched: bool) -> Result<Option<MovieRow>> {
            self.write()?;
            self.inner.set_watched(id, watched).await
        }

        async fn delete(&self, id: &str) -> Result<bool> {
            self.connect()?;
            self.inner.delete(id).await
        }

        async fn increment_episodes(&self, id: &str) -> Result<Option<MovieRow>> {
            self.connect()?;
            let ours = self.inner.increment_episodes(id).await?;
            if self.other_client_increments.load(Ordering::SeqCst) {
                self.inner.increment_episodes(id).await?;
            }
            Ok(ours)
        }

        async fn decrement_episodes(&self, id: &str) -> Result<Option<MovieRow>> {
            self.connect()?;
            self.inner.decrement_episodes(id).await
        }
    }

    type TestRemote = Switchable<DeviceTable<MemoryStore>>;

    struct Fixture {
        access: MovieAccess<MemoryStore, TestRemote>,
        remote: Arc<TestRemote>,
    }

    fn fixture() -> Fixture {
        let remote = Arc::new(Switchable::new(DeviceTable::new(Arc::new(MemoryStore::new()))));
        let access = MovieAccess::new(Arc::new(MemoryStore::new()), Arc::clone(&remote));
        Fixture { access, remote }
    }

    fn show_a() -> MovieDraft {
        MovieDraft::series("Show A", 3, Some(10))
    }

    #[tokio::test]
    async fn add_series_derives_watched() {
        let f = fixture();

        let movie = f.access.add(&show_a()).await.unwrap().unwrap();
        assert_eq!(movie.media_type, MediaType::Series);
        assert_eq!(movie.episodes_watched, 3);
        assert!(!movie.watched);

        let done = f.access.add(&MovieDraft::series("Done", 10, Some(10))).await.unwrap().unwrap();
        assert!(done.watched);
    }

    #[tokio::test]
    async fn add_rejects_total_below_watched_without_touching_stores() {
        let f = fixture();

        let err = f
            .access
            .add(&MovieDraft::series("Bad", 5, Some(2)))
            .await
            .unwrap_err();

        assert_eq!(err, ValidationError::TotalBelowWatched { total: 2, watched: 5 });
        assert_eq!(f.remote.calls(), 0);
        assert!(f.access.cached().await.is_empty());
        assert!(f.access.list().await.is_empty());
    }

    #[tokio::test]
    async fn add_rejects_blank_title() {
        let f = fixture();
        let err = f.access.add(&MovieDraft::movie("  ", false)).await.unwrap_err();
        assert_eq!(err, ValidationError::EmptyTitle);
    }

    #[tokio::test]
    async fn add_prepends_to_cache() {
        let f = fixture();
        f.access.add(&MovieDraft::movie("First", false)).await.unwrap();
        f.access.add(&MovieDraft::movie("Second", true)).await.unwrap();

        let titles: Vec<_> = f.access.cached().await.into_iter().map(|m| m.title).collect();
        assert_eq!(titles, ["Second", "First"]);
    }

    #[tokio::test]
    async fn add_returns_none_when_remote_unreachable() {
        let f = fixture();
        f.access.add(&MovieDraft::movie("Cached", false)).await.unwrap();
        f.remote.set_reachable(false);

        let added = f.access.add(&MovieDraft::movie("Lost", false)).await.unwrap();
        assert!(added.is_none());
        assert_eq!(f.access.cached().await.len(), 1);
    }

    #[tokio::test]
    async fn episodes_count_up_to_and_past_the_total() {
        let f = fixture();
        let show = f.access.add(&show_a()).await.unwrap().unwrap();

        let mut latest = show.clone();
        for _ in 0..7 {
            latest = f.access.increment_episode(&show.id).await.unwrap();
        }
        assert_eq!(latest.episodes_watched, 10);
        assert!(latest.watched);

        let past = f.access.increment_episode(&show.id).await.unwrap();
        assert_eq!(past.episodes_watched, 11);
        assert!(past.watched);

        let cached = f.access.cached().await;
        assert_eq!(cached.len(), 1);
        assert_eq!(cached[0].episodes_watched, 11);
        assert!(cached[0].watched);
    }

    #[tokio::test]
    async fn reaching_the_total_keeps_a_concurrent_increment() {
        let f = fixture();
        let show = f
            .access
            .add(&MovieDraft::series("Show A", 9, Some(10)))
            .await
            .unwrap()
            .unwrap();
        f.remote.set_other_client_increments(true);

        let returned = f.access.increment_episode(&show.id).await.unwrap();
        assert_eq!(returned.episodes_watched, 11);
        assert!(returned.watched);

        let stored = f.remote.select(&show.id).await.unwrap().unwrap();
        assert_eq!(stored.episodes_watched, 11);
        assert!(stored.watched);
    }

    #[tokio::test]
    async fn failed_watched_write_still_reports_the_new_count() {
        let f = fixture();
        let show = f
            .access
            .add(&MovieDraft::series("Show A", 9, Some(10)))
            .await
            .unwrap()
            .unwrap();
        f.remote.set_writes_fail(true);

        let returned = f.access.increment_episode(&show.id).await.unwrap();
        assert_eq!(returned.episodes_watched, 10);
        assert!(returned.watched);

        let stored = f.remote.select(&show.id).await.unwrap().unwrap();
        assert_eq!(stored.episodes_watched, 10);
        assert_eq!(f.access.cached().await, vec![returned]);
    }

    #[tokio::test]
    async fn increment_then_decrement_restores_count() {
        let f = fixture();
        let show = f.access.add(&show_a()).await.unwrap().unwrap();

        f.access.increment_episode(&show.id).await.unwrap();
        let back = f.access.decrement_episode(&show.id).await.unwrap();
        assert_eq!(back.episodes_watched, show.episodes_watched);
    }

    #[tokio::test]
    async fn decrement_below_total_clears_watched() {
        let f = fixture();
        let show = f
            .access
            .add(&MovieDraft::series("Done", 4, Some(4)))
            .await
            .unwrap()
            .unwrap();
        assert!(show.watched);

        let back = f.access.decrement_episode(&show.id).await.unwrap();
        assert_eq!(back.episodes_watched, 3);
        assert!(!back.watched);
    }

    #[tokio::test]
    async fn decrement_at_zero_is_rejected() {
        let f = fixture();
        let show = f
            .access
            .add(&MovieDraft::series("Fresh", 0, None))
            .await
            .unwrap()
            .unwrap();
        let calls_before = f.remote.calls();

        assert!(f.access.decrement_episode(&show.id).await.is_none());
        // Only the lookup reaches the remote.
        assert_eq!(f.remote.calls(), calls_before + 1);

        let listed = f.access.list().await;
        assert_eq!(listed[0].episodes_watched, 0);
    }

    #[tokio::test]
    async fn episode_steps_only_apply_to_series() {
        let f = fixture();
        let movie = f.access.add(&MovieDraft::movie("Heat", false)).await.unwrap().unwrap();

        assert!(f.access.increment_episode(&movie.id).await.is_none());
        assert!(f.access.increment_episode("missing").await.is_none());
        assert_eq!(f.access.list().await[0].episodes_watched, 0);
    }

    #[tokio::test]
    async fn update_merges_and_rederives_watched() {
        let f = fixture();
        let show = f.access.add(&show_a()).await.unwrap().unwrap();

        let patch = MoviePatch {
            title: Some(" Show A (2019) ".to_string()),
            total_episodes: Some(Some(3)),
            current_season: Some(Some(2)),
            ..Default::default()
        };
        let updated = f.access.update(&show.id, &patch).await.unwrap().unwrap();
        assert_eq!(updated.title, "Show A (2019)");
        assert_eq!(updated.total_episodes, Some(3));
        assert!(updated.watched);

        let listed = f.access.list().await;
        assert_eq!(listed, vec![updated.clone()]);
        assert_eq!(f.access.cached().await, vec![updated]);
    }

    #[tokio::test]
    async fn update_rejects_total_below_watched() {
        let f = fixture();
        let show = f.access.add(&show_a()).await.unwrap().unwrap();

        let patch = MoviePatch {
            total_episodes: Some(Some(2)),
            ..Default::default()
        };
        let err = f.access.update(&show.id, &patch).await.unwrap_err();
        assert_eq!(err, ValidationError::TotalBelowWatched { total: 2, watched: 3 });
        assert_eq!(f.access.list().await[0].total_episodes, Some(10));
    }

    #[tokio::test]
    async fn update_unknown_id_returns_none() {
        let f = fixture();
        let patch = MoviePatch {
            watched: Some(true),
            ..Default::default()
        };
        assert_eq!(f.access.update("missing", &patch).await, Ok(None));
    }

    #[tokio::test]
    async fn update_offline_leaves_cache_alone() {
        let f = fixture();
        let movie = f.access.add(&MovieDraft::movie("Heat", false)).await.unwrap().unwrap();
        f.remote.set_reachable(false);

        let patch = MoviePatch {
            watched: Some(true),
            ..Default::default()
        };
        assert_eq!(f.access.update(&movie.id, &patch).await, Ok(None));
        assert_eq!(f.access.cached().await, vec![movie]);
    }

    #[tokio::test]
    async fn delete_unknown_id_changes_nothing() {
        let f = fixture();
        f.access.add(&MovieDraft::movie("Heat", false)).await.unwrap();
        let before = f.access.cached().await;

        assert!(!f.access.delete("missing").await);
        assert_eq!(f.access.cached().await, before);
        assert_eq!(f.access.list().await, before);
    }

    #[tokio::test]
    async fn delete_removes_from_both_stores() {
        let f = fixture();
        let keep = f.access.add(&MovieDraft::movie("Keep", false)).await.unwrap().unwrap();
        let drop = f.access.add(&MovieDraft::movie("Drop", false)).await.unwrap().unwrap();

        assert!(f.access.delete(&drop.id).await);
        assert_eq!(f.access.cached().await, vec![keep.clone()]);
        assert_eq!(f.access.list().await, vec![keep]);
    }

    #[tokio::test]
    async fn delete_offline_keeps_cached_entry() {
        let f = fixture();
        let movie = f.access.add(&MovieDraft::movie("Heat", false)).await.unwrap().unwrap();
        f.remote.set_reachable(false);

        assert!(!f.access.delete(&movie.id).await);
        assert_eq!(f.access.cached().await, vec![movie]);
    }

    #[tokio::test]
    async fn list_offline_serves_cached_records() {
        let f = fixture();
        f.access.add(&MovieDraft::movie("One", false)).await.unwrap();
        f.access.add(&show_a()).await.unwrap();
        f.remote.set_reachable(false);

        let listed = f.access.list().await;
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].title, "Show A");
    }

    #[tokio::test]
    async fn list_offline_without_cache_is_empty() {
        let f = fixture();
        f.remote.set_reachable(false);
        assert!(f.access.list().await.is_empty());
    }

    #[tokio::test]
    async fn list_overwrites_stale_cache() {
        let f = fixture();
        f.access.add(&MovieDraft::movie("Heat", false)).await.unwrap();
        // A second writer adds straight to the table.
        let other = MovieAccess::new(Arc::new(MemoryStore::new()), Arc::clone(&f.remote));
        other.add(&MovieDraft::movie("Ronin", false)).await.unwrap();

        assert_eq!(f.access.cached().await.len(), 1);
        assert_eq!(f.access.list().await.len(), 2);
        assert_eq!(f.access.cached().await.len(), 2);
    }

    #[tokio::test]
    async fn snapshot_returns_cache_and_refreshes_in_background() {
        let f = fixture();
        let other = MovieAccess::new(Arc::new(MemoryStore::new()), Arc::clone(&f.remote));
        other.add(&MovieDraft::movie("Ronin", false)).await.unwrap();

        let (movies, refresh) = f.access.snapshot().await;
        assert!(movies.is_empty());
        refresh.await.unwrap();
        assert_eq!(f.access.cached().await.len(), 1);
    }

    #[tokio::test]
    async fn background_refresh_failure_keeps_cache() {
        let f = fixture();
        f.access.add(&MovieDraft::movie("Heat", false)).await.unwrap();
        f.remote.set_reachable(false);

        f.access.spawn_refresh().await.unwrap();
        assert_eq!(f.access.cached().await.len(), 1);
    }
}
