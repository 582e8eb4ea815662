//! Report rendering.

mod generator;
mod state_map;

pub use generator::{format_money, generate_json_report, generate_markdown_report};
