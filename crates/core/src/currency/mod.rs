//! Currency module - preferred-currency conversion of historical cost.

mod conversion_service;
mod currency_errors;
mod currency_model;
mod currency_traits;
pub mod rate_expression;
pub mod rate_table;
pub mod resolver;


pub use conversion_service::CurrencyConversionService;
pub use currency_errors::{CurrencyError, MissingRate};
pub use currency_model::{
    CloudProvider, ConversionRequest, ConversionSettings, ConversionSource, ConversionStatus,
    ConversionType, CostRewrite, CostTable, CustomConversionFactor, DefaultConversionFactor,
    EmbeddedRate, HistoricalUpdateTrigger, QueryOptions, RateSource, ResolvedRate,
    SourceCurrencyObservation,
};
pub use currency_traits::{
    BillingRepositoryTrait, ConversionFactorRepositoryTrait, CurrencyConversionServiceTrait,
    CurrencyPreferenceRepositoryTrait,
};
pub use rate_expression::{RateArm, RateExpression};
pub use rate_table::{RateTable, VerifiedRates};
pub use resolver::{ResolutionState, Stage, StageOutcome};
