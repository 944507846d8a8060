//! Per-user dialogue state.

use std::fmt;

use chrono::{DateTime, Utc};

use crate::chat::UserId;
use crate::models::{DraftOrder, OrderField, OrderType};

/// Where a user is in the trade dialogue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConversationStep {
    Idle,
    ChoosingPair,
    ChoosingSide,
    ChoosingType,
    EnteringVolume,
    EnteringPrice,
    Confirming,
    Submitting,
}

impl ConversationStep {
    /// The step that asks for a given field.
    pub fn for_field(field: OrderField) -> Self {
        match field {
            OrderField::Pair => ConversationStep::ChoosingPair,
            OrderField::Side => ConversationStep::ChoosingSide,
            OrderField::Type => ConversationStep::ChoosingType,
            OrderField::Volume => ConversationStep::EnteringVolume,
            OrderField::Price => ConversationStep::EnteringPrice,
        }
    }
}

impl fmt::Display for ConversationStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConversationStep::Idle => "idle",
            ConversationStep::ChoosingPair => "choosing_pair",
            ConversationStep::ChoosingSide => "choosing_side",
            ConversationStep::ChoosingType => "choosing_type",
            ConversationStep::EnteringVolume => "entering_volume",
            ConversationStep::EnteringPrice => "entering_price",
            ConversationStep::Confirming => "confirming",
            ConversationStep::Submitting => "submitting",
        };
        f.write_str(name)
    }
}

/// A live trade dialogue. Never holds [`ConversationStep::Idle`]: an idle user
/// has no state at all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationState {
    pub user: UserId,
    pub step: ConversationStep,
    pub draft: DraftOrder,
    pub started_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

impl ConversationState {
    pub fn new(user: UserId, now: DateTime<Utc>) -> Self {
        Self {
            user,
            step: ConversationStep::ChoosingPair,
            draft: DraftOrder::default(),
            started_at: now,
            last_activity: now,
        }
    }

    /// First field the draft is still missing, in dialogue order.
    pub fn next_missing_field(&self) -> Option<OrderField> {
        let draft = &self.draft;
        if draft.pair.is_none() {
            Some(OrderField::Pair)
        } else if draft.side.is_none() {
            Some(OrderField::Side)
        } else if draft.order_type.is_none() {
            Some(OrderField::Type)
        } else if draft.volume.is_none() {
            Some(OrderField::Volume)
        } else if draft.order_type == Some(OrderType::Limit) && draft.price.is_none() {
            Some(OrderField::Price)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::OrderSide;
    use rust_decimal_macros::dec;

    #[test]
    fn test_missing_fields_in_order() {
        let mut state = ConversationState::new(UserId(1), Utc::now());
        assert_eq!(state.next_missing_field(), Some(OrderField::Pair));

        state.draft.pair = Some("XBT/EUR".parse().unwrap());
        state.draft.side = Some(OrderSide::Buy);
        state.draft.order_type = Some(OrderType::Market);
        assert_eq!(state.next_missing_field(), Some(OrderField::Volume));

        state.draft.volume = Some(dec!(1));
        assert_eq!(state.next_missing_field(), None);

        state.draft.order_type = Some(OrderType::Limit);
        assert_eq!(state.next_missing_field(), Some(OrderField::Price));
    }
}
