//! Contact updates for students, guardians and teachers.
//!
//! The owner's own row is excluded from the uniqueness checks so a record can
//! keep its current phone or e-mail.

pub mod router;
pub mod service;

pub use router::contact_router;
pub use service::{ContactService, ContactUpdateError};
