//! Rolling window of portal URLs, one per day starting today.

use anyhow::{Context, Result};
use chrono::{Datelike, Days, NaiveDate};
use url::Url;

use crate::models::PlannedDay;

/// Query parameter the portal reads the day from.
pub const DATE_PARAM: &str = "HISCalendar_Date";

/// The portal expects day.month.year without zero padding ("1.12.2025").
pub fn portal_date(date: NaiveDate) -> String {
    format!("{}.{}.{}", date.day(), date.month(), date.year())
}

pub fn day_url(base: &Url, date: NaiveDate) -> Url {
    let mut url = base.clone();
    url.query_pairs_mut().append_pair(DATE_PARAM, &portal_date(date));
    url
}

/// `days` consecutive days from `today`, in order.
pub fn plan_window(base: &Url, today: NaiveDate, days: u32) -> Vec<PlannedDay> {
    (0..days)
        .filter_map(|offset| today.checked_add_days(Days::new(offset.into())))
        .map(|date| PlannedDay { date, url: day_url(base, date) })
        .collect()
}

pub fn parse_base_url(raw: &str) -> Result<Url> {
    Url::parse(raw).with_context(|| format!("Invalid portal base URL {:?}", raw))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("https://lsf.example.org/qisserver/rds?state=currentLectures&type=0").unwrap()
    }

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_portal_date_is_day_month_year() {
        assert_eq!(portal_date(ymd(2025, 12, 1)), "1.12.2025");
        assert_eq!(portal_date(ymd(2026, 3, 14)), "14.3.2026");
    }

    #[test]
    fn test_plan_window_covers_consecutive_days() {
        let plan = plan_window(&base(), ymd(2025, 12, 30), 21);
        assert_eq!(plan.len(), 21);
        assert_eq!(plan[0].date, ymd(2025, 12, 30));
        assert_eq!(plan[2].date, ymd(2026, 1, 1));
        assert_eq!(plan[20].date, ymd(2026, 1, 19));
        assert!(plan.windows(2).all(|w| w[1].date == w[0].date.succ_opt().unwrap()));
    }

    #[test]
    fn test_day_url_keeps_base_query() {
        let url = day_url(&base(), ymd(2025, 12, 1));
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert_eq!(pairs[0], ("state".into(), "currentLectures".into()));
        assert_eq!(pairs.last().unwrap(), &(DATE_PARAM.to_string(), "1.12.2025".to_string()));
    }

    #[test]
    fn test_empty_window() {
        assert!(plan_window(&base(), ymd(2025, 12, 1), 0).is_empty());
    }
}
