//! powchain: a single-node, append-only ledger of opaque records, each linked
//! to its predecessor by SHA-256 and admitted through proof-of-work.

pub mod core;
pub mod pow;
pub mod storage;
