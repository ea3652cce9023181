use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use std::sync::Arc;
use tracing::{debug, info};
use watchtrack::config::{Backend, Configuration};
use watchtrack::http::HttpClient;
use watchtrack::local::FileStore;
use watchtrack::query::{FilterOption, ListQuery, SortOption};
use watchtrack::remote::{DeviceTable, PostgrestStore, RemoteStore};
use watchtrack::{MediaType, Movie, MovieAccess, MovieDraft, MoviePatch};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: String,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show the list
    List {
        /// Only titles containing this text
        #[arg(short, long)]
        search: Option<String>,
        #[arg(short, long, value_enum, default_value_t = FilterOption::All)]
        filter: FilterOption,
        #[arg(long, value_enum, default_value_t = SortOption::DateAdded)]
        sort: SortOption,
        /// Print the cached list first, then refresh the cache from the remote
        #[arg(long)]
        cached: bool,
    },
    /// Add a movie or series
    Add(AddArgs),
    /// Change fields of an entry
    Update(UpdateArgs),
    /// Remove an entry
    Delete { id: String },
    /// Mark the next episode of a series as watched
    Next { id: String },
    /// Take back the last watched episode of a series
    Prev { id: String },
}

#[derive(Args)]
struct AddArgs {
    #[arg(short, long)]
    title: String,
    /// Track as a series instead of a movie
    #[arg(long)]
    series: bool,
    #[arg(long, default_value_t = 0)]
    episodes: u32,
    #[arg(long)]
    total: Option<u32>,
    #[arg(long)]
    season: Option<u32>,
    /// Mark a movie as already watched
    #[arg(long)]
    watched: bool,
}

#[derive(Args)]
struct UpdateArgs {
    id: String,
    #[arg(short, long)]
    title: Option<String>,
    #[arg(long, value_enum)]
    kind: Option<Kind>,
    #[arg(long)]
    episodes: Option<u32>,
    #[arg(long, conflicts_with = "clear_total")]
    total: Option<u32>,
    #[arg(long, conflicts_with = "clear_season")]
    season: Option<u32>,
    #[arg(long)]
    watched: Option<bool>,
    #[arg(long)]
    clear_total: bool,
    #[arg(long)]
    clear_season: bool,
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum Kind {
    Movie,
    Series,
}

impl From<Kind> for MediaType {
    fn from(kind: Kind) -> Self {
        match kind {
            Kind::Movie => MediaType::Movie,
            Kind::Series => MediaType::Series,
        }
    }
}

impl AddArgs {
    fn into_draft(self) -> MovieDraft {
        MovieDraft {
            title: self.title,
            media_type: if self.series { MediaType::Series } else { MediaType::Movie },
            episodes_watched: self.episodes,
            total_episodes: self.total,
            current_season: self.season,
            watched: self.watched,
        }
    }
}

impl UpdateArgs {
    fn patch(&self) -> MoviePatch {
        MoviePatch {
            title: self.title.clone(),
            media_type: self.kind.map(MediaType::from),
            episodes_watched: self.episodes,
            total_episodes: if self.clear_total { Some(None) } else { self.total.map(Some) },
            current_season: if self.clear_season { Some(None) } else { self.season.map(Some) },
            watched: self.watched,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(&cli.log_level)
        .with_writer(std::io::stderr)
        .init();

    let config = Configuration::from_file(&cli.config)?;
    debug!("Configuration loaded from: {}", cli.config);

    let local = Arc::new(FileStore::new(config.store_path()));

    match (config.backend, config.remote.as_ref()) {
        (Backend::Remote, Some(remote_config)) => {
            let http_client = HttpClient::new(&remote_config.api_key)?;
            let remote = Arc::new(PostgrestStore::new(http_client, remote_config)?);
            info!("Using remote table at {}", remote_config.base_url);
            run(MovieAccess::new(local, remote), cli.command).await
        }
        (Backend::Remote, None) => anyhow::bail!("remote backend selected without a remote section"),
        (Backend::Device, _) => {
            let remote = Arc::new(DeviceTable::new(Arc::clone(&local)));
            info!("Using device table at {}", local.path().display());
            run(MovieAccess::new(local, remote), cli.command).await
        }
    }
}

async fn run<R>(access: MovieAccess<FileStore, R>, command: Command) -> Result<()>
where
    R: RemoteStore + 'static,
{
    match command {
        Command::List {
            search,
            filter,
            sort,
            cached,
        } => {
            let query = ListQuery { search, filter, sort };
            if cached {
                let (movies, refresh) = access.snapshot().await;
                print_list(&query.apply(&movies));
                refresh.await?;
            } else {
                print_list(&query.apply(&access.list().await));
            }
            Ok(())
        }
        Command::Add(args) => {
            let movie = access.add(&args.into_draft()).await?;
            report(movie, "Could not add the entry, please try again")
        }
        Command::Update(args) => {
            let movie = access.update(&args.id, &args.patch()).await?;
            report(movie, "Could not update the entry, please try again")
        }
        Command::Delete { id } => {
            if access.delete(&id).await {
                println!("Deleted {}", id);
                Ok(())
            } else {
                anyhow::bail!("Could not delete {}", id)
            }
        }
        Command::Next { id } => report(
            access.increment_episode(&id).await,
            "Could not change the episode count",
        ),
        Command::Prev { id } => report(
            access.decrement_episode(&id).await,
            "Could not change the episode count",
        ),
    }
}

fn print_list(movies: &[Movie]) {
    if movies.is_empty() {
        println!("Nothing to watch yet.");
    }
    for movie in movies {
        println!("{}", describe(movie));
    }
}

fn report(movie: Option<Movie>, failure: &str) -> Result<()> {
    match movie {
        Some(movie) => {
            println!("{}", describe(&movie));
            Ok(())
        }
        None => anyhow::bail!("{}", failure),
    }
}

fn describe(movie: &Movie) -> String {
    let mark = if movie.watched { "x" } else { " " };
    match movie.media_type {
        MediaType::Movie => format!("[{}] {:<14} {}", mark, movie.id, movie.title),
        MediaType::Series => {
            let total = movie
                .total_episodes
                .map_or_else(|| "?".to_string(), |t| t.to_string());
            let season = movie
                .current_season
                .map(|s| format!(" S{}", s))
                .unwrap_or_default();
            format!(
                "[{}] {:<14} {}{} ({}/{})",
                mark, movie.id, movie.title, season, movie.episodes_watched, total
            )
        }
    }
}
