//! # UI Module
//!
//! Text views for the terminal front-end.

pub mod cent_meter;
pub mod fretboard;
