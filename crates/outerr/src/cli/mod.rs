pub mod destination;
pub mod exit;
pub mod logging;
pub mod output;
pub mod preload;
