mod signed_price;

pub use signed_price::{PriceError, PriceSigner, SignedPrice, PRICE_MULTIPLIER};
