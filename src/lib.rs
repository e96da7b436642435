//! Background agent that samples what the user is doing (focused window, browser tab, running
//! game, touched files, keyboard and mouse activity) and stores it as dwell segments: spans of
//! time spent in one context, tied to the session they were recorded in.
//!

pub mod agent;
pub mod config;
pub mod context;
pub mod fs;
pub mod utils;
