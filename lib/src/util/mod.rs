pub mod bits;
pub mod compression;
pub mod file;
pub mod read;
