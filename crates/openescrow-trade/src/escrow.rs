//! Escrow settlement shared by the order and dispute flows.
//!
//! Every function here runs inside the caller's transaction and moves
//! exactly the [`EscrowLock`] amount.

use chrono::{DateTime, Duration, Utc};
use openescrow_ledger::Memo;
use openescrow_store::Tx;
use openescrow_types::{
    EscrowError, EscrowLock, EscrowLockId, EscrowStatus, Offer, OfferStatus, Order, OrderId,
    Result, UserId,
};
use rust_decimal::Decimal;

use crate::services::Services;

/// Lock `amount` of the seller's balance against `order_id`.
pub(crate) fn lock_in(
    svc: &Services,
    tx: &mut Tx<'_>,
    order_id: OrderId,
    seller: UserId,
    amount: Decimal,
    now: DateTime<Utc>,
) -> Result<EscrowLock> {
    svc.ledger
        .lock_in(tx, seller, amount, Memo::new("escrow lock").order(order_id))?;
    let lock = EscrowLock {
        id: EscrowLockId::new(),
        order_id,
        owner: seller,
        amount,
        status: EscrowStatus::Locked,
        created_at: now,
        expires_at: now + Duration::hours(svc.config.orders.escrow_lock_ttl_hours),
        settled_at: None,
    };
    tx.put(lock.clone());
    Ok(lock)
}

/// Pay the locked amount out to the buyer.
pub(crate) fn release_in(
    svc: &Services,
    tx: &mut Tx<'_>,
    order: &mut Order,
    now: DateTime<Utc>,
) -> Result<EscrowLock> {
    let mut lock = locked_for(tx, order)?;
    svc.ledger.release_in(
        tx,
        lock.owner,
        order.buyer,
        lock.amount,
        Memo::new("escrow release").order(order.id).offer(order.offer_id),
    )?;
    lock.mark_released(now)?;
    tx.put(lock.clone());
    order.escrow_locked = false;
    Ok(lock)
}

/// Return the locked amount to the seller's spendable balance.
pub(crate) fn refund_in(
    svc: &Services,
    tx: &mut Tx<'_>,
    order: &mut Order,
    now: DateTime<Utc>,
) -> Result<EscrowLock> {
    let mut lock = locked_for(tx, order)?;
    svc.ledger.unlock_in(
        tx,
        lock.owner,
        lock.amount,
        Memo::new("escrow refund").order(order.id).offer(order.offer_id),
    )?;
    lock.mark_refunded(now)?;
    tx.put(lock.clone());
    order.escrow_locked = false;
    Ok(lock)
}

/// Give the order's crypto back to its offer unless the offer was deleted.
pub(crate) fn restore_availability_in(svc: &Services, tx: &mut Tx<'_>, order: &Order) -> Result<()> {
    let deleted = tx
        .get::<Offer>(order.offer_id)
        .is_none_or(|o| o.status == OfferStatus::Deleted);
    if !deleted {
        svc.offers
            .increase_available_in(tx, order.offer_id, order.crypto_amount)?;
    }
    Ok(())
}

fn locked_for(tx: &mut Tx<'_>, order: &Order) -> Result<EscrowLock> {
    let not_locked = |reason: String| EscrowError::EscrowNotLocked { reason };
    if !order.escrow_locked {
        return Err(not_locked(format!("{} holds no escrow", order.id)));
    }
    let lock_id = order
        .escrow_lock_id
        .ok_or_else(|| not_locked(format!("{} has no escrow lock", order.id)))?;
    let lock = tx.require::<EscrowLock>(lock_id, || not_locked(format!("{lock_id} missing")))?;
    if !lock.is_locked() {
        return Err(not_locked(format!("{lock_id} is {}", lock.status)));
    }
    Ok(lock)
}
