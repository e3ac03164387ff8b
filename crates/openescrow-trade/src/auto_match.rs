//! Match-and-take in one call.

use openescrow_market::{MatchCriteria, matching::best_or_none};
use openescrow_types::{EscrowError, Order, Result, UserId};
use tracing::{debug, warn};

use crate::orders::{NewOrder, OrderService, PriceGuard};

impl OrderService {
    /// Place an order against the best offer for `criteria`.
    ///
    /// Matching reads committed state, so the chosen offer can change before
    /// the order transaction runs. The order is placed only at the matched
    /// price and within the criteria's price bounds; otherwise the race is
    /// reported as `MatchStale` and the caller may simply retry.
    pub fn auto_match(&self, taker: UserId, criteria: &MatchCriteria) -> Result<Order> {
        let result = self.services().matcher.find_matches(taker, criteria)?;
        let offer = best_or_none(&result)?;
        let payment_method = criteria
            .payment_methods
            .iter()
            .find(|m| offer.accepts_payment_method(m))
            .or_else(|| offer.payment_methods.first())
            .cloned()
            .ok_or_else(|| EscrowError::PaymentMethodUnsupported {
                method: String::new(),
            })?;
        debug!(taker = %taker, offer_id = %offer.id, price = %offer.price, "auto-match selected offer");

        let input = NewOrder {
            offer_id: offer.id,
            fiat_amount: criteria.fiat_amount,
            payment_method,
        };
        let guard = PriceGuard {
            price: offer.price,
            min_price: criteria.min_price,
            max_price: criteria.max_price,
        };
        self.create_order_at(taker, input, guard).inspect_err(|err| {
            if let EscrowError::MatchStale { offer_id, reason } = err {
                warn!(offer_id = %offer_id, reason = %reason, "matched offer changed before order");
            }
        })
    }
}
