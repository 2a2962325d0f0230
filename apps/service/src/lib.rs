//! Pulse probe service: schedules monitoring checks, runs them from a worker
//! pool and records the results.

pub mod alerting;
pub mod config;
pub mod database;
pub mod health;
pub mod metrics;
pub mod models;
pub mod monitoring;
pub mod orchestrator;
pub mod pool;
pub mod queue;
