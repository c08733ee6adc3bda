//! Utility modules for the documentation builder.

pub mod fs;
pub mod uri;
