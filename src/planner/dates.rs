//! Date phrases in utterances ("yesterday", "last 7 days", "in March")

use chrono::{Datelike, Days, Months, NaiveDate};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Half-open date interval `[start, end)`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
    /// How the user phrased it, for replies
    pub label: String,
}

impl DateRange {
    fn new(start: NaiveDate, end: NaiveDate, label: impl Into<String>) -> Self {
        Self {
            start,
            end,
            label: label.into(),
        }
    }

    fn day(date: NaiveDate, label: impl Into<String>) -> Option<Self> {
        Some(Self::new(date, date.succ_opt()?, label))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Period {
    Daily,
    Weekly,
    Monthly,
}

impl Period {
    pub fn parse(word: &str) -> Option<Self> {
        match word {
            "daily" | "day" | "day-wise" => Some(Period::Daily),
            "weekly" | "week" | "week-wise" => Some(Period::Weekly),
            "monthly" | "month" | "month-wise" => Some(Period::Monthly),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Period::Daily => "daily",
            Period::Weekly => "weekly",
            Period::Monthly => "monthly",
        }
    }
}

const MONTHS: [&str; 12] = [
    "january",
    "february",
    "march",
    "april",
    "may",
    "june",
    "july",
    "august",
    "september",
    "october",
    "november",
    "december",
];

static LAST_N_DAYS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(?:last|past|previous)\s+(\d{1,3})\s+days?\b").expect("valid regex"));
static ISO_DATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(\d{4})-(\d{1,2})-(\d{1,2})\b").expect("valid regex"));
static DMY_DATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(\d{1,2})[/-](\d{1,2})[/-](\d{4})\b").expect("valid regex"));
static MONTH_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"\b(?:in|for|during|of)\s+(january|february|march|april|may|june|july|august|september|october|november|december)\b",
    )
    .expect("valid regex")
});

/// First date phrase in `text`, resolved against `today`
pub fn find_date_range(text: &str, today: NaiveDate) -> Option<DateRange> {
    let text = text.to_lowercase();

    if let Some(caps) = ISO_DATE.captures(&text) {
        let date = NaiveDate::from_ymd_opt(
            caps[1].parse().ok()?,
            caps[2].parse().ok()?,
            caps[3].parse().ok()?,
        )?;
        return DateRange::day(date, date.format("%Y-%m-%d").to_string());
    }
    if let Some(caps) = DMY_DATE.captures(&text) {
        let date = NaiveDate::from_ymd_opt(
            caps[3].parse().ok()?,
            caps[2].parse().ok()?,
            caps[1].parse().ok()?,
        )?;
        return DateRange::day(date, date.format("%d-%m-%Y").to_string());
    }
    if let Some(caps) = LAST_N_DAYS.captures(&text) {
        let n: u64 = caps[1].parse().ok()?;
        let start = today.checked_sub_days(Days::new(n))?;
        return Some(DateRange::new(
            start,
            today.succ_opt()?,
            format!("the last {} days", n),
        ));
    }
    if contains_word(&text, "yesterday") {
        return DateRange::day(today.pred_opt()?, "yesterday");
    }
    if contains_word(&text, "today") {
        return DateRange::day(today, "today");
    }

    let week_start = today.checked_sub_days(Days::new(today.weekday().num_days_from_monday() as u64))?;
    if text.contains("this week") {
        return Some(DateRange::new(week_start, today.succ_opt()?, "this week"));
    }
    if text.contains("last week") {
        return Some(DateRange::new(
            week_start.checked_sub_days(Days::new(7))?,
            week_start,
            "last week",
        ));
    }

    let month_start = today.with_day(1)?;
    if text.contains("this month") {
        return Some(DateRange::new(month_start, today.succ_opt()?, "this month"));
    }
    if text.contains("last month") {
        return Some(DateRange::new(
            month_start.checked_sub_months(Months::new(1))?,
            month_start,
            "last month",
        ));
    }

    let month = find_month(&text)?;
    // a month later than the current one means last year's
    let year = if month > today.month() {
        today.year() - 1
    } else {
        today.year()
    };
    let start = NaiveDate::from_ymd_opt(year, month, 1)?;
    Some(DateRange::new(
        start,
        start.checked_add_months(Months::new(1))?,
        format!("{} {}", capitalise(MONTHS[month as usize - 1]), year),
    ))
}

/// Month named after "in/for/during/of", 1-based
pub fn find_month(text: &str) -> Option<u32> {
    let text = text.to_lowercase();
    let caps = MONTH_NAME.captures(&text)?;
    MONTHS
        .iter()
        .position(|m| *m == &caps[1])
        .map(|i| i as u32 + 1)
}

fn contains_word(text: &str, word: &str) -> bool {
    text.split(|c: char| !c.is_alphanumeric()).any(|w| w == word)
}

fn capitalise(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn today() -> NaiveDate {
        // a Wednesday
        NaiveDate::from_ymd_opt(2024, 5, 15).unwrap()
    }

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_relative_days() {
        let y = find_date_range("distance report yesterday", today()).unwrap();
        assert_eq!((y.start, y.end), (ymd(2024, 5, 14), ymd(2024, 5, 15)));
        assert_eq!(y.label, "yesterday");

        let n = find_date_range("for the last 7 days", today()).unwrap();
        assert_eq!((n.start, n.end), (ymd(2024, 5, 8), ymd(2024, 5, 16)));
    }

    #[test]
    fn test_weeks_start_on_monday() {
        let this = find_date_range("this week", today()).unwrap();
        assert_eq!(this.start, ymd(2024, 5, 13));
        let last = find_date_range("last week", today()).unwrap();
        assert_eq!((last.start, last.end), (ymd(2024, 5, 6), ymd(2024, 5, 13)));
    }

    #[test]
    fn test_explicit_dates() {
        let iso = find_date_range("on 2024-03-01", today()).unwrap();
        assert_eq!(iso.start, ymd(2024, 3, 1));
        let dmy = find_date_range("dpr for 02/04/2024", today()).unwrap();
        assert_eq!(dmy.start, ymd(2024, 4, 2));
        assert!(find_date_range("on 2024-13-40", today()).is_none());
    }

    #[test]
    fn test_month_names() {
        let march = find_date_range("deliveries in march", today()).unwrap();
        assert_eq!((march.start, march.end), (ymd(2024, 3, 1), ymd(2024, 4, 1)));
        let august = find_date_range("report for august", today()).unwrap();
        assert_eq!(august.start, ymd(2023, 8, 1));
        assert_eq!(find_month("birthdays in december"), Some(12));
        assert_eq!(find_month("may i see drivers"), None);
    }

    #[test]
    fn test_no_date() {
        assert!(find_date_range("show all plants", today()).is_none());
        // "todays" is not "today"
        assert!(find_date_range("todays list", today()).is_none());
    }
}
