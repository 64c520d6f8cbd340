//! # SVG Autogen
//!
//! Batch document generation: one labeled SVG template plus one delimited data
//! file in, one rendered file per data row out.
//!
//! ## Row Binding Rules
//!
//! 1. **Header Grammar**: every data column is exactly one of
//!    - an element key `label` (text, image href, or a container toggle),
//!    - a property key `label##property` (attribute written verbatim),
//!    - a visibility key `label` whose nodes are all containers.
//!
//!    A malformed header is a `Configuration` error before any row runs.
//!
//! 2. **Labels**: a node is addressed by `inkscape:label` or `id`; `<name>` and
//!    `name` are the same label. A label may address many nodes.
//!
//! 3. **Isolation**: each row mutates its own deep copy of the canonical
//!    template. The canonical tree and the label index are never mutated.
//!
//! 4. **Sanitization**: every cell value passes the safety filter before it
//!    touches a tree or a filename.
//!
//! 5. **Error Scope**: failures before the first row abort the run. Failures
//!    inside a row skip that row or cell and are counted in the `RunSummary`.
//!
//! 6. **Determinism**: rows are transformed, named and planned in filtered
//!    order; only rendering runs in parallel.

pub mod cache;
pub mod classify;
pub mod config;
pub mod encoding;
pub mod error;
pub mod export;
pub mod image;
pub mod index;
pub mod loader;
pub mod naming;
pub mod output;
pub mod pipeline;
pub mod range;
pub mod render;
pub mod sanitize;
pub mod summary;
pub mod template;
pub mod transform;
pub mod visitor;

#[cfg(test)]
mod scenario_tests;

pub use classify::{classify, Classification, PropertyKey};
pub use config::{CollisionPolicy, Config, ExportFormat};
pub use error::{AutogenError, ErrorKind, Result};
pub use index::{build_index, LabelIndex};
pub use loader::{Dataset, RowRecord};
pub use pipeline::{run, RunInputs};
pub use range::RowFilter;
pub use render::{PdfMerger, Renderer, SvgRenderer};
pub use summary::RunSummary;
pub use template::Document;
pub use transform::{TransformedRow, Transformer};
