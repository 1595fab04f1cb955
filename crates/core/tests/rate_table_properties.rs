//! Property tests for the rate table and its completeness gate.

use ccm_core::currency::{RateSource, RateTable};
use chrono::NaiveDate;
use proptest::prelude::*;
use rust_decimal::Decimal;

const CURRENCIES: &[&str] = &["USD", "EUR", "INR", "GBP", "JPY"];

fn arb_month() -> impl Strategy<Value = NaiveDate> {
    (1u32..=12).prop_map(|m| NaiveDate::from_ymd_opt(2022, m, 1).unwrap())
}

fn arb_currency() -> impl Strategy<Value = &'static str> {
    prop::sample::select(CURRENCIES)
}

/// Rates straddle zero so the non-positive guard gets exercised.
fn arb_rate() -> impl Strategy<Value = Decimal> {
    (-10_000i64..1_000_000).prop_map(|units| Decimal::new(units, 2))
}

fn arb_source() -> impl Strategy<Value = RateSource> {
    prop_oneof![
        Just(RateSource::BillingExport),
        Just(RateSource::UserOverride),
        Just(RateSource::CustomFactor),
        Just(RateSource::Api),
        Just(RateSource::Backup),
    ]
}

#[derive(Debug, Clone)]
enum Op {
    Fill(NaiveDate, &'static str, Decimal, RateSource),
    Set(NaiveDate, &'static str, Decimal, RateSource),
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (arb_month(), arb_currency(), arb_rate(), arb_source())
            .prop_map(|(m, c, r, s)| Op::Fill(m, c, r, s)),
        (arb_month(), arb_currency(), arb_rate(), arb_source())
            .prop_map(|(m, c, r, s)| Op::Set(m, c, r, s)),
    ]
}

fn apply(table: &mut RateTable, ops: &[Op]) {
    for op in ops {
        match op {
            Op::Fill(month, currency, rate, source) => {
                table.fill(*month, currency, *rate, *source);
            }
            Op::Set(month, currency, rate, source) => {
                table.set(*month, currency, *rate, *source);
            }
        }
    }
}

proptest! {
    #[test]
    fn prop_verified_rates_are_positive(
        seeds in prop::collection::vec((arb_month(), arb_currency()), 1..20),
        ops in prop::collection::vec(arb_op(), 0..60),
    ) {
        let mut table = RateTable::new();
        for (month, currency) in &seeds {
            table.seed(*month, currency);
        }
        apply(&mut table, &ops);

        match table.verify() {
            Ok(verified) => {
                prop_assert!(table.unresolved().is_empty());
                for (_, _, resolved) in verified.iter() {
                    prop_assert!(resolved.rate > Decimal::ZERO);
                }
            }
            Err(_) => prop_assert!(!table.unresolved().is_empty()),
        }
    }

    #[test]
    fn prop_operations_never_create_entries(
        ops in prop::collection::vec(arb_op(), 1..40),
    ) {
        let mut table = RateTable::new();
        apply(&mut table, &ops);

        prop_assert!(table.is_empty());
        prop_assert!(table.verify().map(|v| v.is_empty()).unwrap_or(false));
    }

    #[test]
    fn prop_fill_keeps_the_first_resolution(
        month in arb_month(),
        currency in arb_currency(),
        first in 1i64..1_000_000,
        second in 1i64..1_000_000,
    ) {
        let mut table = RateTable::new();
        table.seed(month, currency);

        prop_assert!(table.fill(month, currency, Decimal::new(first, 2), RateSource::BillingExport));
        prop_assert!(!table.fill(month, currency, Decimal::new(second, 2), RateSource::Api));

        let resolved = table.get(month, currency).unwrap();
        prop_assert_eq!(resolved.rate, Decimal::new(first, 2));
        prop_assert_eq!(resolved.source, RateSource::BillingExport);
    }
}
