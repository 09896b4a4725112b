//! Resumable query cursors: server-side batching with deterministic retry,
//! modeled as a [`page_turner::PageTurner`] turn over cursor-batch
//! continuation requests.

mod cursor;

pub use cursor::Cursor;
