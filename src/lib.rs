//! Clinic scheduling and session lifecycle engine.
//!
//! Decides whether a doctor can be booked against a recurring weekly
//! schedule, keeps appointments from overlapping, and drives each
//! clinical session from start to a terminal state with attendance and
//! billing attached. Persistence is delegated to a [`storage::ClinicStore`].

pub mod attendance;
pub mod availability;
pub mod billing;
pub mod booking;
pub mod calendar;
pub mod clock;
pub mod config;
pub mod deactivation;
pub mod engine;
pub mod error;
pub mod logging;
pub mod models;
pub mod session;
pub mod storage;

pub use engine::ClinicEngine;
pub use error::{ClinicError, ErrorKind, Result};
