//! Poll smart EQ vehicles from the vendor cloud.
#![warn(missing_docs)]
#![deny(clippy::pedantic)]
#![deny(clippy::nursery)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::use_self)]

pub mod config;
pub mod logging;
pub mod services;
pub mod session;

pub use smarteq_common as common;
