use std::time::Duration;

/// ISO codes recognised when ingesting API or backup rates.
/// Anything else in a rate payload is ignored.
pub const CURRENCY_LIST: &[&str] = &[
    "AED", "ARS", "AUD", "BRL", "CAD", "CHF", "CLP", "CNY", "COP", "CZK", "DKK", "EUR", "GBP",
    "HKD", "HUF", "IDR", "ILS", "INR", "JPY", "KRW", "MXN", "MYR", "NOK", "NZD", "PHP", "PLN",
    "RUB", "SAR", "SEK", "SGD", "THB", "TRY", "TWD", "USD", "ZAR",
];

/// Currency every provider quotes its table against
pub const BASE_CURRENCY: &str = "USD";

/// Conversion type of a user-entered factor that overrides defaults
pub const CONVERSION_TYPE_CUSTOM: &str = "CUSTOM";

/// Conversion type of a factor the user left on the default rate
pub const CONVERSION_TYPE_DEFAULT: &str = "DEFAULT";

/// Upper bound for a single cost rewrite query
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(1800);

/// Rate applied to rows the rate expression has no arm for
pub const FALLBACK_RATE: rust_decimal::Decimal = rust_decimal::Decimal::ONE;

pub fn is_supported_currency(code: &str) -> bool {
    let upper = code.to_uppercase();
    CURRENCY_LIST.contains(&upper.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_supported_currency_is_case_insensitive() {
        assert!(is_supported_currency("inr"));
        assert!(is_supported_currency("USD"));
        assert!(!is_supported_currency("BTC"));
        assert!(!is_supported_currency(""));
    }
}
