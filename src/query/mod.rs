use crate::models::{MediaType, Movie};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum FilterOption {
    #[default]
    All,
    Movies,
    Series,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "camelCase")]
pub enum SortOption {
    /// Newest first
    #[default]
    DateAdded,
    /// Alphabetical, ignoring case
    Title,
}

/// Search, filter and sort settings for showing a list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListQuery {
    pub search: Option<String>,
    pub filter: FilterOption,
    pub sort: SortOption,
}

impl FilterOption {
    fn matches(self, movie: &Movie) -> bool {
        match self {
            FilterOption::All => true,
            FilterOption::Movies => movie.media_type == MediaType::Movie,
            FilterOption::Series => movie.media_type == MediaType::Series,
        }
    }
}

impl ListQuery {
    pub fn apply(&self, movies: &[Movie]) -> Vec<Movie> {
        let needle = self
            .search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_lowercase);

        let mut result: Vec<Movie> = movies
            .iter()
            .filter(|movie| match &needle {
                Some(needle) => movie.title.to_lowercase().contains(needle.as_str()),
                None => true,
            })
            .filter(|movie| self.filter.matches(movie))
            .cloned()
            .collect();

        match self.sort {
            SortOption::DateAdded => result.sort_by(|a, b| b.date_added.cmp(&a.date_added)),
            SortOption::Title => result.sort_by(|a, b| compare_titles(&a.title, &b.title)),
        }

        result
    }
}

fn compare_titles(a: &str, b: &str) -> Ordering {
    a.to_lowercase()
        .cmp(&b.to_lowercase())
        .then_with(|| a.cmp(b))
}
