pub mod cache;
pub mod client;
pub mod messages;

pub use client::PredictionClient;
