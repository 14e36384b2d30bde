pub mod allow_all;
pub mod jwt;
