//! Data models for pairs, draft orders and tracked orders.

mod asset;
mod order;

pub use asset::{parse_pair_list, Asset, AssetPair};
pub use order::{
    format_decimal, trim_zeros, DraftOrder, OrderField, OrderRequest, OrderSide, OrderStatus,
    OrderType, SubmittedOrder, TrackedOrder,
};
