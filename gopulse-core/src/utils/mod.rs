pub mod coerce;
pub mod tag;
