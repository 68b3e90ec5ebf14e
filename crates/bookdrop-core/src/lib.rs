//! Core abstractions for bookdrop: the credential record and vault contract,
//! the cloud uploader seam, and the book model shared by the library crate.
//! This crate is intentionally small to keep dependency surface minimal.

pub mod book;
pub mod credentials;
pub mod upload;
