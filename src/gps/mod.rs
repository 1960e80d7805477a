// src/gps/mod.rs
//! Location sources and fix parsing

pub mod data;
pub mod nmea;
pub mod gpsd;

pub use data::LocationFix;
