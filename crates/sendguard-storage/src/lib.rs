//! Sendguard Storage - record store and evidence blob storage
//!
//! The validation core treats storage as an external collaborator: a
//! key-value record store holding sender addresses and their latest
//! validation report, plus a blob store for uploaded test emails.

pub mod db;
pub mod file;
pub mod models;
pub mod repository;

pub use db::DatabasePool;
pub use file::{FileStorage, LocalStorage};
pub use models::SenderAddress;
pub use repository::{
    DbSenderAddressRepository, MemSenderAddressRepository, SenderAddressRepository,
};
