//! Message and service type schemas

pub mod catalog;
pub mod template;

pub use catalog::{split_type_name, SchemaCatalog};
pub use template::{default_template, MAX_TEMPLATE_DEPTH};
