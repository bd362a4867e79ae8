//! Query and filter engine.
//!
//! A registry maps each named field to a type. Types know their default
//! value, how to encode themselves into outbound request parameters, and how
//! to test an entry in memory.

mod fields;
mod registry;

pub use fields::{is_truthy, selected_keys, FieldKind, FieldType};
pub use registry::{FieldRegistry, FieldSpec, Query, FROM_DATE, LIMIT, TO_DATE};
