//! Durable output of the pipeline.
//!
//! # Submodules
//!
//! - [`store`]: the JSON article collection, its merge rules and atomic writes
//!
//! # Output Structure
//!
//! ```text
//! data/
//! ├── news_db.json        # the collection, newest first
//! └── news_db.json.lock   # present only while a run holds the store
//! ```

pub mod store;
