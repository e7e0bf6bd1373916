pub mod attempts;
pub mod catalog;
pub mod certificates;
pub mod core;
pub mod notifications;
pub mod progress;
pub mod review;
pub mod setup;
