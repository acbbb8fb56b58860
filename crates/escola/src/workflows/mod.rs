pub mod contacts;
pub mod enrollment;
