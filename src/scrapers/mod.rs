//! Turning fetched documents into article records.
//!
//! Each submodule handles one kind of input:
//!
//! | Module | Input | Output |
//! |--------|-------|--------|
//! | [`links`] | listing page HTML | scored skeletons, best first |
//! | [`feeds`] | RSS 2.0 / Atom XML | scored records with description |
//! | [`newsapi`] | news search JSON | scored records with description |
//! | [`fed`] | Federal Reserve index pages | release and FOMC records |
//! | [`price`] | price chart JSON | the day's gold price record |
//! | [`content`] | article page HTML | body text or paywall preview |
//! | [`selectors`] | configuration | per-domain selector sets |
//!
//! Nothing here performs I/O; the pipeline fetches and hands over text.

pub mod content;
pub mod fed;
pub mod feeds;
pub mod links;
pub mod newsapi;
pub mod price;
pub mod selectors;
