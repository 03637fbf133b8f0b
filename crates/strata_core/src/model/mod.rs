//! Schema descriptors, dynamic values and entity records.

pub mod entity;
pub mod schema;
pub mod value;
