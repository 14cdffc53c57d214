pub mod document;
pub mod migration;
pub mod model;
pub mod spectrum;
