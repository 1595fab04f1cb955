use chrono::{Datelike, Months, NaiveDate, Utc};

/// Billing months are identified by their first day.
pub fn first_of_month(date: NaiveDate) -> NaiveDate {
    date.with_day(1).unwrap_or(date)
}

/// Last calendar day of the month containing `date`.
pub fn last_of_month(date: NaiveDate) -> NaiveDate {
    let start = first_of_month(date);
    start
        .checked_add_months(Months::new(1))
        .and_then(|next| next.pred_opt())
        .unwrap_or(start)
}

/// Billing month of today's date in UTC.
pub fn current_billing_month() -> NaiveDate {
    first_of_month(Utc::now().date_naive())
}

/// Parses `YYYY-MM-DD` and snaps it to the start of its month.
pub fn parse_billing_month(value: &str) -> Result<NaiveDate, chrono::ParseError> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d").map(first_of_month)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_first_of_month() {
        assert_eq!(first_of_month(ymd(2022, 12, 17)), ymd(2022, 12, 1));
        assert_eq!(first_of_month(ymd(2022, 12, 1)), ymd(2022, 12, 1));
    }

    #[test]
    fn test_last_of_month() {
        assert_eq!(last_of_month(ymd(2022, 12, 1)), ymd(2022, 12, 31));
        assert_eq!(last_of_month(ymd(2023, 2, 10)), ymd(2023, 2, 28));
        assert_eq!(last_of_month(ymd(2024, 2, 1)), ymd(2024, 2, 29));
    }

    #[test]
    fn test_parse_billing_month() {
        assert_eq!(parse_billing_month("2022-11-01").unwrap(), ymd(2022, 11, 1));
        assert_eq!(parse_billing_month(" 2022-11-15 ").unwrap(), ymd(2022, 11, 1));
        assert!(parse_billing_month("11/2022").is_err());
    }
}
