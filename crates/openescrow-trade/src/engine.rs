//! Command boundary.
//!
//! Every operation is a [`Command`] executed on behalf of an authenticated
//! [`Caller`]. Results come back in the [`ApiResponse`] envelope with the
//! payload as JSON, so a transport only has to move bytes.

use std::sync::Arc;

use openescrow_market::{MatchCriteria, NewOffer, OfferQuery, OfferUpdate};
use openescrow_types::{
    ApiResponse, Caller, Clock, DisputeId, DisputeWinner, EngineConfig, EscrowError, KycLevel,
    OfferId, OfferSide, OrderId, Page, Result, TradingPair, TransactionId, UserId,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::disputes::DisputeService;
use crate::notify::Notifier;
use crate::orders::{NewOrder, OrderQuery, OrderService};
use crate::payments::{DepositVerification, PaymentService};
use crate::scheduler::Scheduler;
use crate::services::Services;

/// A request to the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    // Wallet
    CreateWallet,
    GetWallet,
    GetHistory {
        #[serde(default)]
        page: usize,
        #[serde(default)]
        page_size: usize,
    },
    /// Gateway webhook; admin only.
    ConfirmDeposit { verification: DepositVerification },
    RequestWithdrawal { amount: Decimal, destination: String },
    /// Gateway callback; admin only.
    CompleteWithdrawal { transaction_id: TransactionId, success: bool },
    VerifyConservation,

    // Offers
    CreateOffer { offer: NewOffer },
    UpdateOffer { offer_id: OfferId, update: OfferUpdate },
    PauseOffer { offer_id: OfferId },
    ResumeOffer { offer_id: OfferId },
    DeleteOffer { offer_id: OfferId },
    GetOffer { offer_id: OfferId },
    ListMyOffers,
    SearchOffers {
        #[serde(default)]
        query: OfferQuery,
    },

    // Matching
    FindMatches { criteria: MatchCriteria },
    AutoMatch { criteria: MatchCriteria },
    SuggestPrice { pair: TradingPair, side: OfferSide },
    MarketDepth {
        pair: TradingPair,
        #[serde(default = "default_depth_levels")]
        levels: usize,
    },

    // Orders
    CreateOrder { order: NewOrder },
    MarkAsPaid {
        order_id: OrderId,
        #[serde(default)]
        proof_url: Option<String>,
    },
    ReleaseCrypto { order_id: OrderId },
    CancelOrder {
        order_id: OrderId,
        #[serde(default)]
        reason: Option<String>,
    },
    GetOrder { order_id: OrderId },
    ListMyOrders {
        #[serde(default)]
        query: OrderQuery,
    },

    // Disputes
    OpenDispute { order_id: OrderId, reason: String },
    AddEvidence {
        dispute_id: DisputeId,
        #[serde(default)]
        description: String,
        url: String,
    },
    ResolveDispute {
        dispute_id: DisputeId,
        winner: DisputeWinner,
        #[serde(default)]
        note: String,
    },
    GetDispute { dispute_id: DisputeId },
    ListOpenDisputes {
        #[serde(default)]
        page: usize,
        #[serde(default)]
        page_size: usize,
    },

    // Risk and KYC
    /// Own profile, or any user's for an admin.
    GetRiskProfile {
        #[serde(default)]
        user_id: Option<UserId>,
    },
    SubmitKyc { level: KycLevel, documents: Vec<String> },
    ApproveKyc { user_id: UserId },
    RejectKyc { user_id: UserId, reason: String },
    GetKycProfile,

    /// Run every scheduler job once; admin only.
    RunMaintenance,
}

fn default_depth_levels() -> usize {
    20
}

impl Command {
    /// Stable snake_case name for logs.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::CreateWallet => "create_wallet",
            Self::GetWallet => "get_wallet",
            Self::GetHistory { .. } => "get_history",
            Self::ConfirmDeposit { .. } => "confirm_deposit",
            Self::RequestWithdrawal { .. } => "request_withdrawal",
            Self::CompleteWithdrawal { .. } => "complete_withdrawal",
            Self::VerifyConservation => "verify_conservation",
            Self::CreateOffer { .. } => "create_offer",
            Self::UpdateOffer { .. } => "update_offer",
            Self::PauseOffer { .. } => "pause_offer",
            Self::ResumeOffer { .. } => "resume_offer",
            Self::DeleteOffer { .. } => "delete_offer",
            Self::GetOffer { .. } => "get_offer",
            Self::ListMyOffers => "list_my_offers",
            Self::SearchOffers { .. } => "search_offers",
            Self::FindMatches { .. } => "find_matches",
            Self::AutoMatch { .. } => "auto_match",
            Self::SuggestPrice { .. } => "suggest_price",
            Self::MarketDepth { .. } => "market_depth",
            Self::CreateOrder { .. } => "create_order",
            Self::MarkAsPaid { .. } => "mark_as_paid",
            Self::ReleaseCrypto { .. } => "release_crypto",
            Self::CancelOrder { .. } => "cancel_order",
            Self::GetOrder { .. } => "get_order",
            Self::ListMyOrders { .. } => "list_my_orders",
            Self::OpenDispute { .. } => "open_dispute",
            Self::AddEvidence { .. } => "add_evidence",
            Self::ResolveDispute { .. } => "resolve_dispute",
            Self::GetDispute { .. } => "get_dispute",
            Self::ListOpenDisputes { .. } => "list_open_disputes",
            Self::GetRiskProfile { .. } => "get_risk_profile",
            Self::SubmitKyc { .. } => "submit_kyc",
            Self::ApproveKyc { .. } => "approve_kyc",
            Self::RejectKyc { .. } => "reject_kyc",
            Self::GetKycProfile => "get_kyc_profile",
            Self::RunMaintenance => "run_maintenance",
        }
    }
}

/// The assembled engine.
pub struct Engine {
    svc: Arc<Services>,
    orders: Arc<OrderService>,
    disputes: DisputeService,
    payments: PaymentService,
    scheduler: Arc<Scheduler>,
}

impl Engine {
    pub fn new(
        config: EngineConfig,
        clock: Arc<dyn Clock>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self> {
        let svc = Services::new(config, clock, notifier)?;
        let orders = Arc::new(OrderService::new(svc.clone()));
        Ok(Self {
            disputes: DisputeService::new(svc.clone()),
            payments: PaymentService::new(svc.clone()),
            scheduler: Arc::new(Scheduler::new(svc.clone(), orders.clone())),
            orders,
            svc,
        })
    }

    #[must_use]
    pub fn services(&self) -> &Arc<Services> {
        &self.svc
    }

    #[must_use]
    pub fn orders(&self) -> &OrderService {
        &self.orders
    }

    #[must_use]
    pub fn disputes(&self) -> &DisputeService {
        &self.disputes
    }

    #[must_use]
    pub fn payments(&self) -> &PaymentService {
        &self.payments
    }

    #[must_use]
    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    /// Execute `command` for `caller`. Never panics on bad input; every
    /// failure comes back as an error envelope.
    pub fn execute(&self, caller: Option<&Caller>, command: Command) -> ApiResponse<Value> {
        let name = command.name();
        let result = match caller {
            Some(caller) => self.dispatch(caller, command),
            None => Err(EscrowError::Unauthenticated),
        };
        match &result {
            Ok(_) => debug!(command = name, caller = ?caller.map(|c| c.user_id), "command succeeded"),
            Err(err) => warn!(
                command = name,
                caller = ?caller.map(|c| c.user_id),
                code = err.code(),
                error = %err,
                "command rejected"
            ),
        }
        ApiResponse::from_result(result, self.svc.clock.now())
    }

    fn dispatch(&self, caller: &Caller, command: Command) -> Result<Value> {
        let me = caller.user_id;
        let svc = &self.svc;
        match command {
            Command::CreateWallet => json(svc.ledger.create_wallet(me)?),
            Command::GetWallet => json(svc.ledger.wallet(me)?),
            Command::GetHistory { page, page_size } => {
                json(Page::paginate(svc.ledger.history(me)?, page, page_size))
            }
            Command::ConfirmDeposit { verification } => {
                caller.require_admin()?;
                json(self.payments.confirm_deposit(&verification)?)
            }
            Command::RequestWithdrawal {
                amount,
                destination,
            } => json(self.payments.request_withdrawal(me, amount, &destination)?),
            Command::CompleteWithdrawal {
                transaction_id,
                success,
            } => {
                caller.require_admin()?;
                json(self.payments.complete_withdrawal(transaction_id, success)?)
            }
            Command::VerifyConservation => {
                caller.require_admin()?;
                json(svc.ledger.verify_conservation()?)
            }

            Command::CreateOffer { offer } => json(svc.offers.create_offer(me, offer)?),
            Command::UpdateOffer { offer_id, update } => {
                json(svc.offers.update_offer(me, offer_id, update)?)
            }
            Command::PauseOffer { offer_id } => json(svc.offers.pause_offer(me, offer_id)?),
            Command::ResumeOffer { offer_id } => json(svc.offers.resume_offer(me, offer_id)?),
            Command::DeleteOffer { offer_id } => json(svc.offers.delete_offer(me, offer_id)?),
            Command::GetOffer { offer_id } => json(svc.offers.get_offer(offer_id)?),
            Command::ListMyOffers => json(svc.offers.list_user_offers(me)?),
            Command::SearchOffers { query } => json(svc.offers.search(&query)?),

            Command::FindMatches { criteria } => json(svc.matcher.find_matches(me, &criteria)?),
            Command::AutoMatch { criteria } => json(self.orders.auto_match(me, &criteria)?),
            Command::SuggestPrice { pair, side } => json(svc.matcher.suggest_price(&pair, side)?),
            Command::MarketDepth { pair, levels } => json(svc.matcher.market_depth(&pair, levels)?),

            Command::CreateOrder { order } => json(self.orders.create_order(me, order)?),
            Command::MarkAsPaid {
                order_id,
                proof_url,
            } => json(self.orders.mark_as_paid(me, order_id, proof_url)?),
            Command::ReleaseCrypto { order_id } => json(self.orders.release_crypto(me, order_id)?),
            Command::CancelOrder { order_id, reason } => {
                json(self.orders.cancel_order(me, order_id, reason)?)
            }
            Command::GetOrder { order_id } => json(self.orders.get_order(caller, order_id)?),
            Command::ListMyOrders { query } => json(self.orders.list_user_orders(me, &query)?),

            Command::OpenDispute { order_id, reason } => {
                json(self.disputes.open_dispute(me, order_id, &reason)?)
            }
            Command::AddEvidence {
                dispute_id,
                description,
                url,
            } => json(self.disputes.add_evidence(me, dispute_id, &description, &url)?),
            Command::ResolveDispute {
                dispute_id,
                winner,
                note,
            } => json(self.disputes.resolve_dispute(caller, dispute_id, winner, &note)?),
            Command::GetDispute { dispute_id } => {
                json(self.disputes.get_dispute(caller, dispute_id)?)
            }
            Command::ListOpenDisputes { page, page_size } => {
                json(self.disputes.list_open_disputes(caller, page, page_size)?)
            }

            Command::GetRiskProfile { user_id } => {
                let target = user_id.unwrap_or(me);
                if target != me {
                    caller.require_admin()?;
                }
                json(svc.fraud.risk_profile(target)?)
            }
            Command::SubmitKyc { level, documents } => {
                json(svc.kyc.submit(me, level, documents)?)
            }
            Command::ApproveKyc { user_id } => json(svc.kyc.approve_level(caller, user_id)?),
            Command::RejectKyc { user_id, reason } => {
                json(svc.kyc.reject_submission(caller, user_id, &reason)?)
            }
            Command::GetKycProfile => json(svc.kyc.profile(me)?),

            Command::RunMaintenance => {
                caller.require_admin()?;
                json(self.scheduler.run_all())
            }
        }
    }
}

fn json<T: Serialize>(value: T) -> Result<Value> {
    serde_json::to_value(value).map_err(|e| EscrowError::Serialization(e.to_string()))
}
