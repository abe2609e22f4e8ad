use std::collections::{BTreeMap, HashSet};

use crate::domain::time::{format_date_br, now_rfc3339, parse_timestamp};
use crate::domain::{PaymentProvider, PaymentStatus};
use crate::entities::{pix_payments, prelude::*, user_profiles};
use anyhow::{Context, Result};
use chrono::{DateTime, Datelike, Local, NaiveDate};
use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set};
use serde::Serialize;

use super::user::random_hex;

pub type PixPayment = pix_payments::Model;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct UpcomingExpiration {
    pub username: String,
    /// `dd/mm/YYYY`
    pub expiration_date: String,
    pub days_left: i64,
    pub days_left_text: String,
    pub screen_limit: i32,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct FinancialSummary {
    pub total_revenue: f64,
    pub sales_count: usize,
    pub recent_transactions: Vec<PixPayment>,
    pub daily_revenue: BTreeMap<u32, f64>,
    pub weekly_revenue: BTreeMap<String, f64>,
    pub upcoming_expirations: Vec<UpcomingExpiration>,
}

pub struct PaymentRepository {
    conn: DatabaseConnection,
}

impl PaymentRepository {
    pub const fn new(conn: DatabaseConnection) -> Self {
        Self { conn }
    }

    pub async fn create(
        &self,
        txid: &str,
        username: &str,
        value: f64,
        provider: PaymentProvider,
        screens: i32,
        external_reference: Option<String>,
    ) -> Result<()> {
        let model = pix_payments::ActiveModel {
            txid: Set(txid.to_string()),
            username: Set(username.to_string()),
            value: Set(value),
            status: Set(PaymentStatus::Pending.as_str().to_string()),
            provider: Set(provider.as_str().to_string()),
            created_at: Set(now_rfc3339()),
            screens: Set(screens),
            external_reference: Set(external_reference),
            description: Set(None),
        };

        PixPayments::insert(model)
            .exec(&self.conn)
            .await
            .with_context(|| format!("Failed to insert payment {txid}"))?;
        Ok(())
    }

    pub async fn get(&self, txid: &str) -> Result<Option<PixPayment>> {
        PixPayments::find_by_id(txid.to_string())
            .one(&self.conn)
            .await
            .context("Failed to query payment")
    }

    /// Moves `txid` to `status`. Returns `false` when the row is missing or
    /// already in that status, so only one caller wins a transition.
    pub async fn update_status(&self, txid: &str, status: PaymentStatus) -> Result<bool> {
        let result = PixPayments::update_many()
            .col_expr(
                pix_payments::Column::Status,
                Expr::value(status.as_str().to_string()),
            )
            .filter(pix_payments::Column::Txid.eq(txid))
            .filter(pix_payments::Column::Status.ne(status.as_str()))
            .exec(&self.conn)
            .await
            .with_context(|| format!("Failed to update payment {txid}"))?;
        Ok(result.rows_affected == 1)
    }

    /// Records an already settled payment made outside the panel.
    pub async fn add_manual(
        &self,
        username: &str,
        value: f64,
        description: &str,
        date: DateTime<Local>,
    ) -> Result<String> {
        let txid = format!("manual_{}", random_hex(6));
        let model = pix_payments::ActiveModel {
            txid: Set(txid.clone()),
            username: Set(username.to_string()),
            value: Set(value),
            status: Set(PaymentStatus::Completed.as_str().to_string()),
            provider: Set(PaymentProvider::Manual.as_str().to_string()),
            created_at: Set(date.to_rfc3339()),
            screens: Set(0),
            external_reference: Set(None),
            description: Set(Some(description.to_string())),
        };

        PixPayments::insert(model)
            .exec(&self.conn)
            .await
            .context("Failed to insert manual payment")?;
        Ok(txid)
    }

    /// Newest first.
    pub async fn by_user(&self, username: &str) -> Result<Vec<PixPayment>> {
        Ok(PixPayments::find()
            .filter(pix_payments::Column::Username.eq(username))
            .order_by_desc(pix_payments::Column::CreatedAt)
            .all(&self.conn)
            .await?)
    }

    /// Completed payments created in `year`/`month`. The SQL window is a day
    /// wider on each side to absorb offsets; `summarize` keeps the exact cut.
    pub async fn completed_in_month(&self, year: i32, month: u32) -> Result<Vec<PixPayment>> {
        let Some((from, until)) = month_window(year, month) else {
            return Ok(Vec::new());
        };
        Ok(PixPayments::find()
            .filter(pix_payments::Column::Status.eq(PaymentStatus::Completed.as_str()))
            .filter(pix_payments::Column::CreatedAt.gte(from))
            .filter(pix_payments::Column::CreatedAt.lt(until))
            .all(&self.conn)
            .await?)
    }

    /// Drops pending charges created more than `days` days ago.
    pub async fn delete_old_pending(&self, days: i64) -> Result<u64> {
        let cutoff = Local::now() - chrono::Duration::days(days);

        let stale: Vec<String> = PixPayments::find()
            .filter(pix_payments::Column::Status.eq(PaymentStatus::Pending.as_str()))
            .all(&self.conn)
            .await?
            .into_iter()
            .filter(|p| parse_timestamp(&p.created_at).is_some_and(|at| at < cutoff))
            .map(|p| p.txid)
            .collect();

        if stale.is_empty() {
            return Ok(0);
        }

        let result = PixPayments::delete_many()
            .filter(pix_payments::Column::Txid.is_in(stale))
            .exec(&self.conn)
            .await?;
        Ok(result.rows_affected)
    }
}

/// `[day before the 1st, day after next month's 1st)` as `YYYY-MM-DD` bounds
/// comparable against RFC3339 text.
fn month_window(year: i32, month: u32) -> Option<(String, String)> {
    let first = NaiveDate::from_ymd_opt(year, month, 1)?;
    let next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)?
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)?
    };
    let from = first.pred_opt()?;
    let until = next.succ_opt()?;
    Some((
        from.format("%Y-%m-%d").to_string(),
        until.format("%Y-%m-%d").to_string(),
    ))
}

/// Monday-based week of the year, as strftime's `%W`.
fn monday_week_of_year(date: NaiveDate) -> u32 {
    (date.ordinal0() + 7 - date.weekday().num_days_from_monday()) / 7
}

fn days_left_text(days: i64) -> String {
    match days {
        0 => "Hoje".to_string(),
        1 => "1 dia restante".to_string(),
        n => format!("{n} dias restantes"),
    }
}

/// Builds the monthly report from completed payments and current profiles.
#[must_use]
pub fn summarize(
    completed: Vec<PixPayment>,
    profiles: &[user_profiles::Model],
    blocked: &HashSet<String>,
    year: i32,
    month: u32,
    renewal_days: i64,
    today: NaiveDate,
) -> FinancialSummary {
    let mut in_month: Vec<(DateTime<Local>, PixPayment)> = completed
        .into_iter()
        .filter_map(|p| parse_timestamp(&p.created_at).map(|at| (at, p)))
        .filter(|(at, _)| at.year() == year && at.month() == month)
        .collect();
    in_month.sort_by(|a, b| b.0.cmp(&a.0));

    let mut summary = FinancialSummary {
        sales_count: in_month.len(),
        ..FinancialSummary::default()
    };

    let first_week = NaiveDate::from_ymd_opt(year, month, 1).map_or(0, monday_week_of_year);

    for (at, payment) in &in_month {
        summary.total_revenue += payment.value;
        *summary.daily_revenue.entry(at.day()).or_default() += payment.value;

        let week = monday_week_of_year(at.date_naive()) - first_week + 1;
        *summary
            .weekly_revenue
            .entry(format!("Semana {week}"))
            .or_default() += payment.value;
    }

    summary.recent_transactions = in_month.into_iter().take(10).map(|(_, p)| p).collect();

    let mut upcoming: Vec<(NaiveDate, UpcomingExpiration)> = profiles
        .iter()
        .filter(|p| !blocked.contains(&p.username))
        .filter_map(|p| {
            let expires = parse_timestamp(p.expiration_date.as_deref()?)?;
            let days_left = (expires.date_naive() - today).num_days();
            (0..=renewal_days).contains(&days_left).then(|| {
                (
                    expires.date_naive(),
                    UpcomingExpiration {
                        username: p.username.clone(),
                        expiration_date: format_date_br(&expires),
                        days_left,
                        days_left_text: days_left_text(days_left),
                        screen_limit: p.screen_limit,
                    },
                )
            })
        })
        .collect();
    upcoming.sort_by(|a, b| a.0.cmp(&b.0));
    summary.upcoming_expirations = upcoming.into_iter().map(|(_, e)| e).collect();

    summary
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payment(txid: &str, created_at: &str, value: f64) -> PixPayment {
        PixPayment {
            txid: txid.to_string(),
            username: "ana".to_string(),
            value,
            status: PaymentStatus::Completed.as_str().to_string(),
            provider: PaymentProvider::Efi.as_str().to_string(),
            created_at: created_at.to_string(),
            screens: 1,
            external_reference: None,
            description: None,
        }
    }

    fn profile(username: &str, expiration: &str) -> user_profiles::Model {
        user_profiles::Model {
            username: username.to_string(),
            expiration_date: Some(expiration.to_string()),
            screen_limit: 2,
            ..Default::default()
        }
    }

    #[test]
    fn week_numbers_follow_monday_weeks() {
        // 2025-01-01 is a Wednesday, so the first Monday starts week 1.
        let jan1 = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        let jan6 = NaiveDate::from_ymd_opt(2025, 1, 6).unwrap();
        assert_eq!(monday_week_of_year(jan1), 0);
        assert_eq!(monday_week_of_year(jan6), 1);
        assert_eq!(
            jan6.format("%W").to_string().parse::<u32>().unwrap(),
            monday_week_of_year(jan6)
        );
    }

    #[test]
    fn month_window_spans_neighbouring_days() {
        assert_eq!(
            month_window(2025, 12),
            Some(("2025-11-30".to_string(), "2026-01-02".to_string()))
        );
        assert_eq!(
            month_window(2024, 2),
            Some(("2024-01-31".to_string(), "2024-03-02".to_string()))
        );
        assert_eq!(month_window(2025, 13), None);
    }

    #[test]
    fn summary_groups_month_revenue() {
        let payments = vec![
            payment("a", "2025-01-02T10:00:00", 10.0),
            payment("b", "2025-01-02T18:00:00", 18.0),
            payment("c", "2025-01-08T09:00:00", 25.0),
            payment("d", "2025-02-01T09:00:00", 99.0),
        ];
        let today = NaiveDate::from_ymd_opt(2025, 1, 10).unwrap();

        let summary = summarize(payments, &[], &HashSet::new(), 2025, 1, 7, today);

        assert_eq!(summary.sales_count, 3);
        assert!((summary.total_revenue - 53.0).abs() < f64::EPSILON);
        assert!((summary.daily_revenue[&2] - 28.0).abs() < f64::EPSILON);
        assert!((summary.weekly_revenue["Semana 1"] - 28.0).abs() < f64::EPSILON);
        assert!((summary.weekly_revenue["Semana 2"] - 25.0).abs() < f64::EPSILON);
        assert_eq!(summary.recent_transactions[0].txid, "c");
    }

    #[test]
    fn upcoming_expirations_skip_blocked_and_out_of_range() {
        let today = NaiveDate::from_ymd_opt(2025, 3, 10).unwrap();
        let profiles = vec![
            profile("later", "2025-03-15T12:00:00"),
            profile("today", "2025-03-10T23:00:00"),
            profile("tomorrow", "2025-03-11T08:00:00"),
            profile("past", "2025-03-09T08:00:00"),
            profile("far", "2025-04-30T08:00:00"),
            profile("blocked", "2025-03-12T08:00:00"),
        ];
        let blocked = HashSet::from(["blocked".to_string()]);

        let summary = summarize(Vec::new(), &profiles, &blocked, 2025, 3, 7, today);
        let names: Vec<&str> = summary
            .upcoming_expirations
            .iter()
            .map(|e| e.username.as_str())
            .collect();

        assert_eq!(names, ["today", "tomorrow", "later"]);
        assert_eq!(summary.upcoming_expirations[0].days_left_text, "Hoje");
        assert_eq!(summary.upcoming_expirations[1].days_left_text, "1 dia restante");
        assert_eq!(summary.upcoming_expirations[2].days_left_text, "5 dias restantes");
        assert_eq!(summary.upcoming_expirations[2].expiration_date, "15/03/2025");
    }
}
