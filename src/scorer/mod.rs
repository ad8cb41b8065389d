pub mod enrich;
pub mod pool_scorer;

pub use enrich::{annualized_volatility, apply_reference_price, enrich};
pub use pool_scorer::score_pool;
