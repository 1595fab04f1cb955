//! Rate models shared by all providers.
//!
//! - `usd_rates` - one day's table of "units per US dollar", keyed by ISO code

mod usd_rates;

pub use usd_rates::UsdRates;
pub(crate) use usd_rates::UsdRatesPayload;
