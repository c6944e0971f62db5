//! Vehicle model shared between the smart EQ connect client and its hosts
#![warn(missing_docs)]
#![deny(clippy::pedantic)]
#![deny(clippy::nursery)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::use_self)]

pub mod attributes;
pub mod binary_sensor;
pub mod vehicle;

pub use attributes::{
    Attribute, AttributeGroup, AttributeKey, AttributeValue, GroupKind, LookupError,
    RetrievalStatus,
};
pub use binary_sensor::{decode_binary_state, BinaryState};
pub use vehicle::{Listener, MessageCounters, Subscription, UpdateKind, Vehicle};
