//! Read-side fleet views.
//!
//! `reconcile` joins registry records with the Guardian's observations into
//! the single view every read path uses; `forecast` turns connection history
//! into a short-horizon load curve.
pub mod forecast;
pub mod reconcile;

pub use forecast::{LoadForecaster, LoadHistory, LoadPrediction, LoadSample, hourly_means};
pub use reconcile::{FleetEntry, FleetOverview, overview, reconcile};
