//! Tautulli-backed implementation of the `StatsService` trait.
//!
//! Every figure is derived from `get_history` rows; nothing is cached.

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Duration, Local, TimeZone, Timelike};
use reqwest::Client;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use super::plex_users::PlexUserManager;
use super::stats_service::{
    Achievements, Device, RecentItem, RecentlyAddedMedia, StatsError, StatsService, Tier,
    TitlePlays, UserWatchDetails, UserWatchStat, Viewer,
};
use crate::clients::tautulli::{HistoryRow, TautulliClient};
use crate::config::{AchievementTiers, AchievementsConfig, Config};
use crate::db::Store;
use crate::domain::time::{format_date_br, format_datetime_br};

const HISTORY_LENGTH: u32 = 10_000;
const DEVICE_HISTORY_LENGTH: u32 = 500;
const LATE_NIGHT_LAST_HOUR: u32 = 3;
const EPIC_MOVIE_SECONDS: i64 = 10_800;

fn local_time(timestamp: i64) -> Option<DateTime<Local>> {
    Local.timestamp_opt(timestamp, 0).single()
}

/// Keeps the first and last character, masking the rest.
#[must_use]
pub fn obfuscate_username(username: &str) -> String {
    let chars: Vec<char> = username.chars().collect();
    match chars.as_slice() {
        [first, .., last] if chars.len() > 2 => format!("{first}***{last}"),
        _ => username.to_string(),
    }
}

#[must_use]
pub fn tier(count: usize, tiers: &AchievementTiers) -> Option<Tier> {
    let count = u32::try_from(count).unwrap_or(u32::MAX);
    if count >= tiers.gold {
        Some(Tier::Gold)
    } else if count >= tiers.silver {
        Some(Tier::Silver)
    } else if count >= tiers.bronze {
        Some(Tier::Bronze)
    } else {
        None
    }
}

/// Per-user plays and watch time, longest total first.
#[must_use]
pub fn summarize_watch_stats(rows: &[HistoryRow]) -> Vec<UserWatchStat> {
    let mut totals: HashMap<&str, (u32, i64)> = HashMap::new();
    for row in rows.iter().filter(|r| !r.user.is_empty()) {
        let entry = totals.entry(row.user.as_str()).or_default();
        entry.0 += 1;
        entry.1 += row.duration;
    }

    let mut stats: Vec<UserWatchStat> = totals
        .into_iter()
        .map(|(username, (plays, total_duration))| UserWatchStat {
            username: username.to_string(),
            plays,
            total_duration,
            #[allow(clippy::cast_precision_loss)]
            avg_duration: total_duration as f64 / f64::from(plays),
            thumb: None,
            is_private: false,
        })
        .collect();
    stats.sort_by(|a, b| {
        b.total_duration
            .cmp(&a.total_duration)
            .then_with(|| a.username.cmp(&b.username))
    });
    stats
}

fn top(counts: HashMap<String, u32>, limit: usize) -> Vec<TitlePlays> {
    let mut items: Vec<TitlePlays> = counts
        .into_iter()
        .map(|(title, plays)| TitlePlays { title, plays })
        .collect();
    items.sort_by(|a, b| b.plays.cmp(&a.plays).then_with(|| a.title.cmp(&b.title)));
    items.truncate(limit);
    items
}

/// Builds a user's detail page from their history, newest row first.
pub fn build_watch_details(
    rows: &[HistoryRow],
    days: u32,
    tiers: &AchievementsConfig,
    poster_url: impl Fn(&str) -> String,
) -> UserWatchDetails {
    let mut details = UserWatchDetails::default();
    let mut unique_days = HashSet::new();
    let mut platforms = HashSet::new();
    let mut movies: HashMap<String, u32> = HashMap::new();
    let mut shows: HashMap<String, u32> = HashMap::new();
    let mut genres: HashMap<String, u32> = HashMap::new();
    let mut decades = BTreeSet::new();
    let mut longest_movie = (0_i64, None::<String>);

    for row in rows {
        let Some(played_at) = local_time(row.date) else {
            continue;
        };
        details.weekly_activity[played_at.weekday().num_days_from_sunday() as usize] += row.duration;
        unique_days.insert(played_at.date_naive());
        if !row.platform.is_empty() {
            platforms.insert(row.platform.clone());
        }
        if played_at.hour() <= LATE_NIGHT_LAST_HOUR {
            details.late_night_plays += 1;
        }

        match row.media_type.as_str() {
            "movie" => {
                details.movie_count += 1;
                details.total_movie_duration += row.duration;
                *movies.entry(row.title.clone()).or_default() += 1;
                if row.duration > longest_movie.0 {
                    longest_movie = (row.duration, Some(row.title.clone()));
                }
                if row.year > 0 {
                    decades.insert(row.year / 10);
                }
            }
            "episode" => {
                details.episode_count += 1;
                details.total_episode_duration += row.duration;
                *shows.entry(row.grandparent_title.clone()).or_default() += 1;
            }
            _ => {}
        }

        for genre in &row.genres {
            *genres.entry(genre.clone()).or_default() += 1;
        }

        if details.recent_items.len() < 5 {
            details.recent_items.push(RecentItem {
                media_type: row.media_type.clone(),
                title: row.title.clone(),
                series: row.grandparent_title.clone(),
                poster_url: poster_url(&row.thumb),
                play_date: format_datetime_br(&played_at),
            });
        }
    }

    let genre_total = genres.len();
    details.genre_counts = top(genres, usize::MAX);
    let favorite = details.genre_counts.first().cloned();
    details.favorite_genre = favorite
        .as_ref()
        .map_or_else(|| "N/D".to_string(), |g| g.title.clone());
    details.top_movies = top(movies, 3);
    details.top_shows = top(shows, 3);
    details.unique_days = unique_days.len();
    details.unique_platforms = platforms.len();
    details.longest_movie = longest_movie.1;

    let week = &details.weekly_activity;
    let weekend: i64 = week[0] + week[6];
    let weekdays: i64 = week[1..6].iter().sum();

    details.achievements = Achievements {
        movie_marathon: tier(details.movie_count as usize, &tiers.movie_marathon),
        series_binger: tier(details.episode_count as usize, &tiers.series_binger),
        night_owl: details.late_night_plays >= 5,
        weekend_warrior: weekend + weekdays > 0 && weekend > weekdays,
        genre_expert: favorite.is_some_and(|g| g.plays >= 10),
        explorer: genre_total >= 5,
        loyal_companion: details.unique_days >= 5 && days >= 7,
        the_epic: longest_movie.0 >= EPIC_MOVIE_SECONDS,
        multitasker: details.unique_platforms >= 3,
        time_traveler: tier(decades.len(), &tiers.time_traveler),
    };
    details
}

/// Distinct `player|platform` pairs with their latest play, newest first.
#[must_use]
pub fn group_devices(rows: &[HistoryRow]) -> Vec<Device> {
    let mut devices: HashMap<(String, String), i64> = HashMap::new();
    for row in rows {
        let player = if row.player.is_empty() { "Desconhecido" } else { &row.player };
        let platform = if row.platform.is_empty() { "Desconhecida" } else { &row.platform };
        let last_seen = devices
            .entry((player.to_string(), platform.to_string()))
            .or_insert(row.date);
        *last_seen = (*last_seen).max(row.date);
    }

    let mut list: Vec<Device> = devices
        .into_iter()
        .map(|((player, platform), last_seen)| Device {
            player,
            platform,
            last_seen,
        })
        .collect();
    list.sort_by(|a, b| b.last_seen.cmp(&a.last_seen));
    list
}

pub struct TautulliStatsService {
    config: Arc<RwLock<Config>>,
    store: Store,
    http: Client,
    plex_users: Arc<PlexUserManager>,
}

impl TautulliStatsService {
    #[must_use]
    pub const fn new(
        config: Arc<RwLock<Config>>,
        store: Store,
        http: Client,
        plex_users: Arc<PlexUserManager>,
    ) -> Self {
        Self {
            config,
            store,
            http,
            plex_users,
        }
    }

    async fn client(&self) -> Result<TautulliClient, StatsError> {
        let config = self.config.read().await;
        if !config.tautulli.is_configured() {
            return Err(StatsError::NotConfigured);
        }
        Ok(TautulliClient::new(
            self.http.clone(),
            &config.tautulli.url,
            &config.tautulli.api_key,
        ))
    }

    async fn history(
        &self,
        client: &TautulliClient,
        user: Option<&str>,
        days: Option<u32>,
        length: u32,
    ) -> Result<Vec<HistoryRow>, StatsError> {
        let after = days.map(|d| {
            (Local::now() - Duration::days(i64::from(d)))
                .format("%Y-%m-%d")
                .to_string()
        });
        client
            .get_history(user, after.as_deref(), length)
            .await
            .map_err(|e| {
                warn!(error = %e, "Tautulli history request failed");
                StatsError::Tautulli(e.to_string())
            })
    }
}

#[async_trait]
impl StatsService for TautulliStatsService {
    async fn get_watch_stats(
        &self,
        days: u32,
        viewer: &Viewer,
    ) -> Result<Vec<UserWatchStat>, StatsError> {
        let client = self.client().await?;
        let rows = self.history(&client, None, Some(days), HISTORY_LENGTH).await?;

        let thumbs: HashMap<String, String> = self
            .plex_users
            .get_all_plex_users(false)
            .await
            .unwrap_or_default()
            .into_iter()
            .map(|u| (u.username, u.thumb))
            .collect();
        let private: HashSet<String> = self
            .store
            .get_all_user_profiles()
            .await?
            .into_iter()
            .filter(|p| p.hide_from_leaderboard)
            .map(|p| p.username)
            .collect();

        let mut stats = summarize_watch_stats(&rows);
        for stat in &mut stats {
            stat.thumb = thumbs.get(&stat.username).cloned();
            stat.is_private = private.contains(&stat.username);
            if stat.is_private && !viewer.is_admin {
                stat.username = obfuscate_username(&stat.username);
                stat.thumb = None;
            }
        }
        debug!(days, users = stats.len(), "Watch stats computed");
        Ok(stats)
    }

    async fn get_user_watch_details(
        &self,
        username: &str,
        days: u32,
        viewer: &Viewer,
    ) -> Result<UserWatchDetails, StatsError> {
        let profile = self.store.get_user_profile(username).await?;
        if profile.hide_from_leaderboard && !viewer.is_admin && viewer.username != username {
            warn!(viewer = %viewer.username, username, "Private statistics requested");
            return Err(StatsError::Forbidden(
                "Este utilizador prefere manter as suas estatísticas privadas.".to_string(),
            ));
        }

        let client = self.client().await?;
        let rows = self
            .history(&client, Some(username), Some(days), HISTORY_LENGTH)
            .await?;
        let tiers = self.config.read().await.achievements.clone();
        Ok(build_watch_details(&rows, days, &tiers, |thumb| {
            client.image_proxy_url(thumb)
        }))
    }

    async fn get_user_devices(&self, username: &str) -> Result<Vec<Device>, StatsError> {
        let client = self.client().await?;
        let rows = self
            .history(&client, Some(username), None, DEVICE_HISTORY_LENGTH)
            .await?;
        Ok(group_devices(&rows))
    }

    async fn get_recently_added(&self, count: u32) -> Result<Vec<RecentlyAddedMedia>, StatsError> {
        let client = self.client().await?;
        let items = client
            .get_recently_added(count)
            .await
            .map_err(|e| StatsError::Tautulli(e.to_string()))?;

        Ok(items
            .into_iter()
            .map(|item| RecentlyAddedMedia {
                title: if item.grandparent_title.is_empty() {
                    item.title
                } else {
                    format!("{} - {}", item.grandparent_title, item.title)
                },
                media_type: item.media_type,
                added_at: local_time(item.added_at)
                    .map(|at| format_date_br(&at))
                    .unwrap_or_default(),
                poster_url: client.image_proxy_url(&item.thumb),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn ts(y: i32, m: u32, d: u32, h: u32) -> i64 {
        Local
            .from_local_datetime(
                &NaiveDate::from_ymd_opt(y, m, d)
                    .unwrap()
                    .and_hms_opt(h, 0, 0)
                    .unwrap(),
            )
            .unwrap()
            .timestamp()
    }

    fn movie(title: &str, date: i64, duration: i64, year: i64) -> HistoryRow {
        HistoryRow {
            user: "ana".to_string(),
            date,
            duration,
            media_type: "movie".to_string(),
            title: title.to_string(),
            platform: "Android".to_string(),
            year,
            genres: vec!["Drama".to_string()],
            ..Default::default()
        }
    }

    #[test]
    fn short_names_are_not_obfuscated() {
        assert_eq!(obfuscate_username("jo"), "jo");
        assert_eq!(obfuscate_username("mariana"), "m***a");
        assert_eq!(obfuscate_username("joão"), "j***o");
    }

    #[test]
    fn tiers_follow_thresholds() {
        let tiers = AchievementsConfig::default().movie_marathon;
        assert_eq!(tier(4, &tiers), None);
        assert_eq!(tier(5, &tiers), Some(Tier::Bronze));
        assert_eq!(tier(10, &tiers), Some(Tier::Silver));
        assert_eq!(tier(25, &tiers), Some(Tier::Gold));
    }

    #[test]
    fn leaderboard_orders_by_total_time() {
        let mut rows = vec![
            movie("A", ts(2025, 3, 1, 20), 100, 2000),
            movie("B", ts(2025, 3, 1, 21), 300, 2000),
        ];
        rows[1].user = "bia".to_string();
        rows.push(HistoryRow {
            user: String::new(),
            ..Default::default()
        });

        let stats = summarize_watch_stats(&rows);
        assert_eq!(stats.len(), 2);
        assert_eq!(stats[0].username, "bia");
        assert!((stats[1].avg_duration - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn weekly_activity_starts_on_sunday() {
        // 2025-03-02 was a Sunday, 2025-03-03 a Monday.
        let rows = vec![
            movie("A", ts(2025, 3, 2, 20), 600, 1994),
            movie("B", ts(2025, 3, 3, 20), 60, 2004),
        ];
        let details = build_watch_details(&rows, 30, &AchievementsConfig::default(), |_| String::new());
        assert_eq!(details.weekly_activity[0], 600);
        assert_eq!(details.weekly_activity[1], 60);
        assert!(details.achievements.weekend_warrior);
    }

    #[test]
    fn achievements_are_derived_from_history() {
        let mut rows: Vec<HistoryRow> = (0..5)
            .map(|i| movie(&format!("M{i}"), ts(2025, 3, 3 + i, 1), 3_600, 1950 + i64::from(i) * 10))
            .collect();
        rows.push(movie("Épico", ts(2025, 3, 9, 22), 11_000, 2020));
        for (i, platform) in ["TV", "Chrome"].iter().enumerate() {
            rows[i].platform = (*platform).to_string();
        }

        let details = build_watch_details(&rows, 7, &AchievementsConfig::default(), |t| {
            format!("poster:{t}")
        });
        let a = &details.achievements;
        assert_eq!(details.movie_count, 6);
        assert_eq!(a.movie_marathon, Some(Tier::Bronze));
        assert!(a.night_owl);
        assert!(a.the_epic);
        assert!(a.multitasker);
        assert!(a.loyal_companion);
        assert!(!a.explorer);
        assert_eq!(a.time_traveler, Some(Tier::Silver));
        assert_eq!(details.longest_movie.as_deref(), Some("Épico"));
        assert_eq!(details.favorite_genre, "Drama");
        assert_eq!(details.recent_items.len(), 5);
        assert_eq!(details.recent_items[0].poster_url, "poster:");
    }

    #[test]
    fn empty_history_has_no_favorite_genre() {
        let details = build_watch_details(&[], 7, &AchievementsConfig::default(), |_| String::new());
        assert_eq!(details.favorite_genre, "N/D");
        assert!(!details.achievements.weekend_warrior);
    }

    #[test]
    fn devices_are_grouped_by_player_and_platform() {
        let mut rows = vec![
            movie("A", 100, 1, 0),
            movie("B", 300, 1, 0),
            movie("C", 200, 1, 0),
        ];
        rows[0].player = "Plex Web".to_string();
        rows[1].player = "Plex Web".to_string();
        rows[2].player = String::new();

        let devices = group_devices(&rows);
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].player, "Plex Web");
        assert_eq!(devices[0].last_seen, 300);
        assert_eq!(devices[1].player, "Desconhecido");
    }
}
