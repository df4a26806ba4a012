pub mod date_window;
pub mod models;
