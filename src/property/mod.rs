//! The synchronized data model.
//!
//! A [`PropertyContainer`] holds the properties of one scope (device or
//! thing) in registration order. Local writes go through
//! [`PropertyContainer::set`], which marks properties dirty according to
//! their [`PublishPolicy`]; the codec picks dirty properties up from the
//! container's cursor and the client commits them once the payload is queued.

mod container;
mod value;

pub use container::{
    Permission, Property, PropertyContainer, PublishPolicy, SyncPolicy, UpdateCallback,
};
pub use value::{MAX_TEXT_LEN, PropertyValue, Schedule, ScheduleField, Text, ValueKind};
