//! Data model and request schema of the cohort search.

pub mod data;
pub mod query;
