pub mod export;
pub mod report;
pub mod resolve;
pub mod show;
