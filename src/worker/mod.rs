pub mod compactor;

pub use compactor::Compactor;
