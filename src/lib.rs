//! Joins the National Walkability Index to census tract polygons and renders
//! the result as an interactive choropleth.

pub mod colorscale;
pub mod compose;
pub mod config;
pub mod crs;
pub mod data;
pub mod identifier;
pub mod join;
pub mod processing;
pub mod render;
pub mod simplify;
pub mod types;
