//! Domain service for watch statistics, achievements and devices.

use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StatsError {
    #[error("O Tautulli não está configurado.")]
    NotConfigured,

    #[error("Erro de conexão com o Tautulli: {0}")]
    Tautulli(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<sea_orm::DbErr> for StatsError {
    fn from(err: sea_orm::DbErr) -> Self {
        Self::Database(err.to_string())
    }
}

impl From<anyhow::Error> for StatsError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

/// Who is looking at the statistics.
#[derive(Debug, Clone)]
pub struct Viewer {
    pub username: String,
    pub is_admin: bool,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct UserWatchStat {
    pub username: String,
    pub plays: u32,
    /// Seconds.
    pub total_duration: i64,
    pub avg_duration: f64,
    pub thumb: Option<String>,
    pub is_private: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Bronze,
    Silver,
    Gold,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Achievements {
    pub movie_marathon: Option<Tier>,
    pub series_binger: Option<Tier>,
    pub night_owl: bool,
    pub weekend_warrior: bool,
    pub genre_expert: bool,
    pub explorer: bool,
    pub loyal_companion: bool,
    pub the_epic: bool,
    pub multitasker: bool,
    pub time_traveler: Option<Tier>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TitlePlays {
    pub title: String,
    pub plays: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecentItem {
    #[serde(rename = "type")]
    pub media_type: String,
    pub title: String,
    pub series: String,
    pub poster_url: String,
    /// `dd/mm/YYYY HH:MM`
    pub play_date: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct UserWatchDetails {
    pub movie_count: u32,
    pub episode_count: u32,
    pub total_movie_duration: i64,
    pub total_episode_duration: i64,
    pub longest_movie: Option<String>,
    /// Seconds watched per weekday, Sunday first.
    pub weekly_activity: [i64; 7],
    pub unique_days: usize,
    pub unique_platforms: usize,
    pub late_night_plays: u32,
    pub top_movies: Vec<TitlePlays>,
    pub top_shows: Vec<TitlePlays>,
    pub genre_counts: Vec<TitlePlays>,
    pub favorite_genre: String,
    pub recent_items: Vec<RecentItem>,
    pub achievements: Achievements,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Device {
    pub player: String,
    pub platform: String,
    /// Unix timestamp of the latest play.
    pub last_seen: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecentlyAddedMedia {
    pub title: String,
    pub media_type: String,
    /// `dd/mm/YYYY`
    pub added_at: String,
    pub poster_url: String,
}

#[async_trait::async_trait]
pub trait StatsService: Send + Sync {
    /// Leaderboard for the last `days`, hiding private users from non-admins.
    async fn get_watch_stats(
        &self,
        days: u32,
        viewer: &Viewer,
    ) -> Result<Vec<UserWatchStat>, StatsError>;

    /// # Errors
    ///
    /// Returns [`StatsError::Forbidden`] when the profile is private and the
    /// viewer is neither an admin nor its owner.
    async fn get_user_watch_details(
        &self,
        username: &str,
        days: u32,
        viewer: &Viewer,
    ) -> Result<UserWatchDetails, StatsError>;

    async fn get_user_devices(&self, username: &str) -> Result<Vec<Device>, StatsError>;

    async fn get_recently_added(&self, count: u32) -> Result<Vec<RecentlyAddedMedia>, StatsError>;
}
