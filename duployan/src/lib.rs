//! A build-time compiler from abstract Duployan letter schemas to a
//! font: drawn glyphs with anchor points, plus an in-memory OpenType
//! Layout rule tree that downstream tooling serializes.
//!
//! The three central subsystems:
//!
//! - [`shapes`]: a closed family of geometric primitives that rewrite
//!   themselves based on the exit angle of the previous letter and the
//!   entry angle of the next, and draw through a pen interface.
//! - [`phases`]: an ordered sequence of transformation passes, each
//!   run to a fixed point over the schema set, emitting Layout rules.
//! - [`phases::marker`]: a positional-number encoding that uses
//!   invisible marker glyphs and Layout rules to compute advance
//!   widths and anchor offsets at shaping time.
//!
//! [`builder::Builder`] is the entry point:
//!
//! ```
//! let compilation = duployan::Builder::new(false, false).build().unwrap();
//! assert!(!compilation.glyphs.is_empty());
//! ```

#![deny(rustdoc::broken_intra_doc_links)]

pub mod anchors;
pub mod builder;
pub mod context;
pub mod error;
pub mod fea;
pub mod geometry;
pub mod glyphs;
pub mod phases;
pub mod schema;
pub mod shapes;
pub mod sifting;
pub mod util;

pub use builder::{Builder, Compilation, GlyphEntry};
pub use context::Context;
pub use error::Error;
pub use schema::{Schema, SchemaDef, SchemaRef};
pub use shapes::Shape;
