//! Small shared utilities.

pub mod snowflake;
