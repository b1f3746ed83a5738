// Market data module entrypoint
pub mod adapters; // upstream quote APIs (e.g. Alpha Vantage)

pub use adapters::{Quote, QuoteSource, SymbolMatch};
