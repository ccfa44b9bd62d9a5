//! Report rendering.

pub mod generator;

pub use generator::{
    generate_batch_json_report, generate_batch_markdown_report, generate_json_report,
    generate_markdown_report, write_report,
};
