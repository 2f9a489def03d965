//! Core domain types and logic.

pub mod error;
pub mod graph;
pub mod evaluator;
pub mod metrics;
pub mod series;
pub mod indicator_cache;
pub mod rule;
pub mod order;
pub mod prices;
pub mod ledger;
pub mod planner;
pub mod strategy;
pub mod simulation;
pub mod export;
pub mod preset;
pub mod backtest;
pub mod config_validation;
