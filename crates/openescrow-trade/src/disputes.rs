//! Dispute resolution.
//!
//! Opening a dispute moves the order to `DISPUTED`, which freezes every
//! buyer and seller transition. Only an admin resolution leaves that state:
//! the escrow is released to the buyer or refunded to the seller and the
//! order completes either way.

use std::sync::Arc;

use openescrow_store::Tx;
use openescrow_types::{
    Caller, Dispute, DisputeId, DisputeResolution, DisputeStatus, DisputeWinner, EscrowError,
    Evidence, Order, OrderId, OrderStatus, Page, Result, UserId,
};
use tracing::{info, warn};

use crate::escrow;
use crate::notify::{Notification, NotificationKind};
use crate::orders::{require_order, require_participant};
use crate::services::Services;

pub struct DisputeService {
    svc: Arc<Services>,
}

impl DisputeService {
    #[must_use]
    pub fn new(svc: Arc<Services>) -> Self {
        Self { svc }
    }

    /// Open a dispute on a live order. At most one dispute per order.
    pub fn open_dispute(&self, caller: UserId, order_id: OrderId, reason: &str) -> Result<Dispute> {
        let reason = non_empty(reason, "dispute reason")?;
        let now = self.svc.clock.now();
        let (dispute, counterpart) = self.svc.store.transaction(|tx| {
            let mut order = require_order(tx, order_id)?;
            require_participant(&order, caller)?;
            if order.dispute_id.is_some() {
                return Err(EscrowError::DisputeAlreadyOpen(order_id));
            }
            if !order.status.can_transition_to(OrderStatus::Disputed) {
                return Err(EscrowError::illegal("order", order.status, "dispute"));
            }
            let counterpart = order
                .counterpart_of(caller)
                .ok_or(EscrowError::NotParticipant(order_id))?;

            let dispute = Dispute {
                id: DisputeId::new(),
                order_id,
                initiator: caller,
                counterpart,
                reason: reason.clone(),
                status: DisputeStatus::Open,
                evidence: Vec::new(),
                resolution: None,
                created_at: now,
                updated_at: now,
            };
            order.status = OrderStatus::Disputed;
            order.dispute_id = Some(dispute.id);
            order.updated_at = now;
            tx.put(order);
            tx.put(dispute.clone());
            Ok((dispute, counterpart))
        })?;

        warn!(
            dispute_id = %dispute.id,
            order_id = %order_id,
            initiator = %caller,
            reason = %dispute.reason,
            "dispute opened"
        );
        self.svc.notify(&[Notification::to_user(
            counterpart,
            order_id,
            NotificationKind::DisputeOpened,
            format!("A dispute was opened: {}", dispute.reason),
        )]);
        Ok(dispute)
    }

    /// Attach evidence while the dispute is open. URLs are stored verbatim.
    pub fn add_evidence(
        &self,
        caller: UserId,
        dispute_id: DisputeId,
        description: &str,
        url: &str,
    ) -> Result<Dispute> {
        let url = non_empty(url, "evidence url")?;
        let now = self.svc.clock.now();
        let dispute = self.svc.store.transaction(|tx| {
            let mut dispute = require_dispute(tx, dispute_id)?;
            if !dispute.involves(caller) {
                return Err(EscrowError::NotParticipant(dispute.order_id));
            }
            if !dispute.status.is_open() {
                return Err(EscrowError::illegal("dispute", dispute.status, "add evidence"));
            }
            dispute.evidence.push(Evidence {
                submitted_by: caller,
                description: description.to_string(),
                url: url.clone(),
                submitted_at: now,
            });
            dispute.updated_at = now;
            tx.put(dispute.clone());
            Ok(dispute)
        })?;

        info!(
            dispute_id = %dispute_id,
            by = %caller,
            items = dispute.evidence.len(),
            "dispute evidence added"
        );
        Ok(dispute)
    }

    /// Rule for one side and settle the escrow accordingly.
    pub fn resolve_dispute(
        &self,
        admin: &Caller,
        dispute_id: DisputeId,
        winner: DisputeWinner,
        note: &str,
    ) -> Result<Dispute> {
        admin.require_admin()?;
        let now = self.svc.clock.now();
        let (dispute, order) = self.svc.store.transaction(|tx| {
            let mut dispute = require_dispute(tx, dispute_id)?;
            if !dispute.status.is_open() {
                return Err(EscrowError::illegal("dispute", dispute.status, "resolve"));
            }
            let mut order = require_order(tx, dispute.order_id)?;
            if order.status != OrderStatus::Disputed {
                return Err(EscrowError::illegal("order", order.status, "resolve dispute"));
            }

            match winner {
                DisputeWinner::Buyer => {
                    escrow::release_in(&self.svc, tx, &mut order, now)?;
                    self.svc.offers.record_outcome_in(tx, order.offer_id, true)?;
                }
                DisputeWinner::Seller => {
                    escrow::refund_in(&self.svc, tx, &mut order, now)?;
                    escrow::restore_availability_in(&self.svc, tx, &order)?;
                    self.svc.offers.record_outcome_in(tx, order.offer_id, false)?;
                }
            }
            order.status = OrderStatus::Completed;
            order.completed_at = Some(now);
            order.updated_at = now;
            tx.put(order.clone());

            dispute.status = winner.resolved_status();
            dispute.resolution = Some(DisputeResolution {
                winner,
                admin: admin.user_id,
                note: note.to_string(),
                resolved_at: now,
            });
            dispute.updated_at = now;
            tx.put(dispute.clone());
            Ok((dispute, order))
        })?;

        info!(
            dispute_id = %dispute_id,
            order_id = %order.id,
            winner = ?winner,
            admin = %admin.user_id,
            amount = %order.crypto_amount,
            "dispute resolved"
        );
        self.svc.refresh_risk(&[order.buyer, order.seller]);
        let message = match winner {
            DisputeWinner::Buyer => "Dispute resolved for the buyer; escrow released",
            DisputeWinner::Seller => "Dispute resolved for the seller; escrow refunded",
        };
        self.svc.notify(&[
            Notification::to_user(order.buyer, order.id, NotificationKind::DisputeResolved, message),
            Notification::to_user(order.seller, order.id, NotificationKind::DisputeResolved, message),
        ]);
        Ok(dispute)
    }

    /// A dispute visible to its parties and to admins.
    pub fn get_dispute(&self, caller: &Caller, dispute_id: DisputeId) -> Result<Dispute> {
        let dispute = self
            .svc
            .store
            .get::<Dispute>(dispute_id)?
            .ok_or_else(|| EscrowError::DisputeNotFound(dispute_id.to_string()))?;
        if !caller.is_admin() && !dispute.involves(caller.user_id) {
            return Err(EscrowError::NotParticipant(dispute.order_id));
        }
        Ok(dispute)
    }

    /// Open disputes, oldest first.
    pub fn list_open_disputes(
        &self,
        admin: &Caller,
        page: usize,
        page_size: usize,
    ) -> Result<Page<Dispute>> {
        admin.require_admin()?;
        let mut open: Vec<Dispute> = self
            .svc
            .store
            .scan::<Dispute>()?
            .into_iter()
            .filter(|d| d.status.is_open())
            .collect();
        open.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(Page::paginate(open, page, page_size))
    }

    /// The dispute attached to `order_id`, if any.
    pub fn dispute_for_order(&self, caller: &Caller, order_id: OrderId) -> Result<Option<Dispute>> {
        let order = self
            .svc
            .store
            .get::<Order>(order_id)?
            .ok_or(EscrowError::OrderNotFound(order_id))?;
        if !caller.is_admin() {
            require_participant(&order, caller.user_id)?;
        }
        match order.dispute_id {
            Some(id) => self.get_dispute(caller, id).map(Some),
            None => Ok(None),
        }
    }
}

fn require_dispute(tx: &mut Tx<'_>, id: DisputeId) -> Result<Dispute> {
    tx.require::<Dispute>(id, || EscrowError::DisputeNotFound(id.to_string()))
}

fn non_empty(value: &str, what: &str) -> Result<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(EscrowError::InvalidRequest {
            reason: format!("{what} must not be empty"),
        });
    }
    Ok(trimmed.to_string())
}
