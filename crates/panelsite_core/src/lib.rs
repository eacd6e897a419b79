pub mod assets;
pub mod catalog;
pub mod config;
pub mod consistency;
pub mod manifest;
pub mod model;
pub mod navigator;
pub mod path_template;
pub mod plan;
pub mod render;
pub mod rule_table;
pub mod templates;
pub mod url;
