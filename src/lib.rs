pub mod app;
pub mod indicator;
pub mod poll;
pub mod status;
