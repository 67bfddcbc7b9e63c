//! Reference price feeds for the two traded instruments.

pub mod price_feed;

pub use price_feed::{
    spawn_price_poller, FallbackPriceModel, HistoricalPriceEntry, HttpPriceTransport, PriceFeed,
    PriceFeedConfig, PriceQuote, PriceTransport, RateLimited, ReferencePrices,
};
