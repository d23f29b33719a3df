//! Bracket → OTOCO structural transform (§4.5). Pure, no I/O.

use crate::broker::payload::{OrderKind, OrderPayload, TimeInForce};
use crate::broker::BracketRequest;
use crate::models::Action;

/// Expands `{entry, takeProfit?, stopLoss?}` into an OTOCO-typed [`OrderPayload`]. The
/// entry becomes the `trigger_order` (defaulting to `Market`); each provided exit
/// defaults its order type to `Limit` and its leg action to `SellToClose` when unset.
pub fn expand_bracket(request: BracketRequest) -> OrderPayload {
    let time_in_force = request.entry.time_in_force;

    let mut trigger = request.entry;
    if trigger.order_type != OrderKind::Limit {
        trigger.order_type = OrderKind::Market;
    }

    let mut orders = Vec::new();
    if let Some(mut tp) = request.take_profit {
        default_exit_order(&mut tp);
        orders.push(tp);
    }
    if let Some(mut sl) = request.stop_loss {
        default_exit_order(&mut sl);
        orders.push(sl);
    }

    OrderPayload {
        time_in_force,
        order_type: OrderKind::Otoco,
        price_effect: None,
        legs: Vec::new(),
        trigger_order: Some(Box::new(trigger)),
        orders: Some(orders),
        estimated_fees: None,
        extra: serde_json::Map::new(),
    }
}

fn default_exit_order(order: &mut OrderPayload) {
    if order.order_type == OrderKind::Otoco {
        order.order_type = OrderKind::Limit;
    }
    for leg in &mut order.legs {
        leg.action = Action::SellToClose;
    }
}
