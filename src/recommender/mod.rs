pub mod generator;

pub use generator::generate_top_n;
