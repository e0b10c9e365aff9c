pub mod catalog;
pub mod chrome;
pub mod config;
pub mod detail;
pub mod driver;
pub mod extract;
pub mod harvest;
pub mod locator;
pub mod models;
pub mod report;
pub mod stealth;
pub mod traversal;

#[cfg(test)]
mod fake_driver;
