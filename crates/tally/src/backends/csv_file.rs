//! 📂 Previously, on "Things That Could Go Wrong With A CSV File"...
//!
//! The disk was quiet. Too quiet. Five files, ten million rows each, and one
//! quoted field somewhere in the middle with a newline in it, waiting patiently
//! for a naive `lines()` loop to cut it in half.
//!
//! This module reads CSV sources in bounded chunks. The framer finds where each
//! logical record ends (quotes and all) without parsing it, the source stacks
//! `chunk_size` of those into a page, and the csv crate parses the page into
//! records. Memory stays proportional to one page. Always one page.
//!
//! 🚰 File → BufReader → RecordFramer → page bytes → csv parser → Batch
//! 🦆 (mandatory, no notes)

mod csv_source;
mod record_framer;

pub use csv_source::CsvSource;
