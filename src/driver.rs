//! The per-payment execution state machine.
//!
//! One driver instance runs one payment. Steps advance only after the
//! previous step's receipt is observed on-chain (or the bridge status is
//! terminal); no step is skipped and none advances twice. Progress is
//! published on a watch channel for the UI; every suspension point — RPC
//! calls, signing, polling sleeps — honors the cancellation token.
//! Transactions already broadcast are never recalled: on cancellation they
//! complete or revert on their own.
//!
//! Mode state graphs:
//!
//! ```text
//! direct:      idle → checking-allowance [→ approving → awaiting-approval]
//!                   → submitting-settlement → awaiting-settlement → completed
//! native:      idle → submitting-settlement → awaiting-settlement → completed
//! cross-chain: idle → signing-source-tx → awaiting-source-confirmation
//!                   → polling-bridge (≤120 × 5s) → completed
//!                                               ↘ likely-completed on timeout
//! ```

use alloy_primitives::{B256, Bytes};
use alloy_provider::{DynProvider, Provider};
use alloy_rpc_types_eth::{TransactionReceipt, TransactionRequest};
use alloy_sol_types::{SolCall, sol};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use alloy_network::TransactionBuilder;

use abipago_types::abi::ISettlementRouter;
use abipago_types::chain::ChainRef;

use crate::plan::{PaymentPlan, PlanMode};
use crate::provider_cache::{ProviderCache, ProviderMap};
use crate::routing::{BridgeStatusCode, QuoteStep, RoutingClient, RoutingError};
use crate::signer::{SignerError, WalletSigner};

/// Interval between bridge status polls.
pub const POLL_INTERVAL: Duration = Duration::from_secs(5);
/// Bridge polling gives up after this many attempts (~10 minutes).
pub const MAX_POLL_ATTEMPTS: u32 = 120;

const RECEIPT_POLL_INTERVAL: Duration = Duration::from_secs(3);
const RECEIPT_MAX_ATTEMPTS: u32 = 100;

sol!(
    #[sol(rpc)]
    interface IERC20 {
        function approve(address spender, uint256 amount) external returns (bool);
        function allowance(address owner, address spender) external view returns (uint256);
    }
);

/// Where a payment currently stands. Published on the progress channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentStage {
    Idle,
    CheckingAllowance,
    Approving,
    AwaitingApproval { tx: B256 },
    SubmittingSettlement,
    AwaitingSettlement { tx: B256 },
    SigningSourceTransaction,
    AwaitingSourceConfirmation { tx: B256 },
    PollingBridge { attempt: u32 },
    Completed { tx: B256 },
    /// Polling timed out without a terminal status; the settlement event may
    /// still arrive. The UI points at an explorer instead of failing hard.
    LikelyCompleted { source_tx: B256 },
    Failed { message: String },
    Cancelled,
}

impl std::fmt::Display for PaymentStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PaymentStage::Idle => write!(f, "idle"),
            PaymentStage::CheckingAllowance => write!(f, "checking allowance"),
            PaymentStage::Approving => write!(f, "approving"),
            PaymentStage::AwaitingApproval { tx } => write!(f, "awaiting approval {tx}"),
            PaymentStage::SubmittingSettlement => write!(f, "submitting settlement"),
            PaymentStage::AwaitingSettlement { tx } => write!(f, "awaiting settlement {tx}"),
            PaymentStage::SigningSourceTransaction => write!(f, "signing source transaction"),
            PaymentStage::AwaitingSourceConfirmation { tx } => {
                write!(f, "awaiting source confirmation {tx}")
            }
            PaymentStage::PollingBridge { attempt } => {
                write!(f, "polling bridge (attempt {attempt}/{MAX_POLL_ATTEMPTS})")
            }
            PaymentStage::Completed { tx } => write!(f, "completed {tx}"),
            PaymentStage::LikelyCompleted { source_tx } => {
                write!(f, "likely completed, check explorer for {source_tx}")
            }
            PaymentStage::Failed { message } => write!(f, "failed: {message}"),
            PaymentStage::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// How a driven payment ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentOutcome {
    /// Settlement observed; `tx` is the settlement transaction (destination
    /// chain for bridge flows).
    Settled { tx: B256 },
    /// Bridge polling timed out; the transfer is probably still landing.
    BridgeInFlight { source_tx: B256 },
}

#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error("payment cancelled")]
    Cancelled,
    /// The wallet declined to sign. Terminal, no further work.
    #[error("wallet rejected the transaction")]
    Rejected,
    #[error("signing failed: {0}")]
    Signer(String),
    #[error("no provider configured for chain {0}")]
    MissingProvider(ChainRef),
    #[error("cross-chain plan has no routed transaction")]
    MissingRoute,
    #[error("bridge transfer failed: {0}")]
    BridgeFailed(String),
    #[error("transaction {0} reverted on-chain")]
    Reverted(B256),
    #[error("timed out waiting for receipt of {0}")]
    ReceiptTimeout(B256),
    #[error(transparent)]
    Routing(#[from] RoutingError),
    #[error("rpc failure: {0}")]
    Rpc(String),
}

/// Drives one payment plan to completion.
pub struct PaymentDriver {
    routing: RoutingClient,
    providers: ProviderCache,
    signer: Arc<dyn WalletSigner>,
    progress: watch::Sender<PaymentStage>,
    cancel: CancellationToken,
}

impl PaymentDriver {
    pub fn new(
        routing: RoutingClient,
        providers: ProviderCache,
        signer: Arc<dyn WalletSigner>,
    ) -> Self {
        let (progress, _) = watch::channel(PaymentStage::Idle);
        Self {
            routing,
            providers,
            signer,
            progress,
            cancel: CancellationToken::new(),
        }
    }

    /// Progress updates for the UI.
    pub fn subscribe(&self) -> watch::Receiver<PaymentStage> {
        self.progress.subscribe()
    }

    /// Token that aborts the payment at its next suspension point.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Runs the plan to a terminal stage. Cross-chain plans require the
    /// routed quote obtained from the routing oracle.
    #[instrument(skip_all, fields(mode = ?std::mem::discriminant(&plan.mode), chain = %plan.payer_chain))]
    pub async fn run(
        &self,
        plan: &PaymentPlan,
        route: Option<&QuoteStep>,
    ) -> Result<PaymentOutcome, DriverError> {
        let result = match &plan.mode {
            PlanMode::Direct { .. } => self.pay_direct(plan).await,
            PlanMode::Native => self.pay_native(plan).await,
            PlanMode::CrossChain { .. } => {
                let route = route.ok_or(DriverError::MissingRoute)?;
                self.pay_cross_chain(plan, route).await
            }
        };
        match &result {
            Err(DriverError::Cancelled) => self.set_stage(PaymentStage::Cancelled),
            Err(err) => self.set_stage(PaymentStage::Failed {
                message: err.to_string(),
            }),
            Ok(_) => {}
        }
        result
    }

    async fn pay_direct(&self, plan: &PaymentPlan) -> Result<PaymentOutcome, DriverError> {
        let provider = self.provider(plan.payer_chain)?;

        self.set_stage(PaymentStage::CheckingAllowance);
        let allowance = self
            .cancellable(
                std::future::IntoFuture::into_future(
                    IERC20::new(plan.token_in, provider.clone())
                        .allowance(plan.payer, plan.router)
                        .call(),
                ),
            )
            .await?
            .map_err(|err| DriverError::Rpc(err.to_string()))?;

        if allowance < plan.amount_in {
            self.set_stage(PaymentStage::Approving);
            let calldata = IERC20::approveCall {
                spender: plan.router,
                amount: plan.amount_in,
            }
            .abi_encode();
            let tx = TransactionRequest::default()
                .with_to(plan.token_in)
                .with_input(calldata);
            let approval_tx = self.sign(plan.payer_chain, tx).await?;
            self.set_stage(PaymentStage::AwaitingApproval { tx: approval_tx });
            let receipt = self.wait_receipt(provider, approval_tx).await?;
            if !receipt.status() {
                return Err(DriverError::Reverted(approval_tx));
            }
        }

        self.set_stage(PaymentStage::SubmittingSettlement);
        let calldata = ISettlementRouter::settleCall {
            invoice: plan.invoice.clone(),
            tokenIn: plan.token_in,
            amountIn: plan.amount_in,
            swapData: Bytes::new(),
            refundTo: plan.payer,
        }
        .abi_encode();
        let tx = TransactionRequest::default()
            .with_to(plan.router)
            .with_input(calldata);
        let settle_tx = self.sign(plan.payer_chain, tx).await?;
        self.set_stage(PaymentStage::AwaitingSettlement { tx: settle_tx });
        let receipt = self.wait_receipt(provider, settle_tx).await?;
        if !receipt.status() {
            return Err(DriverError::Reverted(settle_tx));
        }

        self.set_stage(PaymentStage::Completed { tx: settle_tx });
        Ok(PaymentOutcome::Settled { tx: settle_tx })
    }

    async fn pay_native(&self, plan: &PaymentPlan) -> Result<PaymentOutcome, DriverError> {
        let provider = self.provider(plan.payer_chain)?;

        self.set_stage(PaymentStage::SubmittingSettlement);
        let calldata = ISettlementRouter::settleNativeCall {
            invoice: plan.invoice.clone(),
            swapData: Bytes::new(),
            refundTo: plan.payer,
        }
        .abi_encode();
        let tx = TransactionRequest::default()
            .with_to(plan.router)
            .with_input(calldata)
            .with_value(plan.amount_in);
        let settle_tx = self.sign(plan.payer_chain, tx).await?;
        self.set_stage(PaymentStage::AwaitingSettlement { tx: settle_tx });
        let receipt = self.wait_receipt(provider, settle_tx).await?;
        if !receipt.status() {
            return Err(DriverError::Reverted(settle_tx));
        }

        self.set_stage(PaymentStage::Completed { tx: settle_tx });
        Ok(PaymentOutcome::Settled { tx: settle_tx })
    }

    async fn pay_cross_chain(
        &self,
        plan: &PaymentPlan,
        route: &QuoteStep,
    ) -> Result<PaymentOutcome, DriverError> {
        let provider = self.provider(plan.payer_chain)?;

        self.set_stage(PaymentStage::SigningSourceTransaction);
        let tx = route.transaction_request.to_transaction()?;
        let source_tx = self.sign(plan.payer_chain, tx).await?;

        self.set_stage(PaymentStage::AwaitingSourceConfirmation { tx: source_tx });
        let receipt = self.wait_receipt(provider, source_tx).await?;
        if !receipt.status() {
            return Err(DriverError::Reverted(source_tx));
        }

        for attempt in 1..=MAX_POLL_ATTEMPTS {
            self.set_stage(PaymentStage::PollingBridge { attempt });
            let status = self
                .cancellable(self.routing.status(source_tx, plan.payer_chain, plan.dest_chain))
                .await?;
            match status {
                Ok(status) => match poll_action(status.status) {
                    PollAction::Done => {
                        let tx = status
                            .receiving
                            .and_then(|leg| leg.tx_hash)
                            .unwrap_or(source_tx);
                        self.set_stage(PaymentStage::Completed { tx });
                        return Ok(PaymentOutcome::Settled { tx });
                    }
                    PollAction::Failed => {
                        return Err(DriverError::BridgeFailed(
                            status.substatus.unwrap_or_else(|| "bridge failure".into()),
                        ));
                    }
                    PollAction::Continue => {}
                },
                Err(err) if is_transient_poll_error(&err) => {
                    tracing::debug!(%err, "transient status error suppressed");
                }
                Err(err) => return Err(err.into()),
            }
            self.sleep(POLL_INTERVAL).await?;
        }

        self.set_stage(PaymentStage::LikelyCompleted { source_tx });
        Ok(PaymentOutcome::BridgeInFlight { source_tx })
    }

    async fn sign(
        &self,
        chain: ChainRef,
        tx: TransactionRequest,
    ) -> Result<B256, DriverError> {
        match self.cancellable(self.signer.send_transaction(chain, tx)).await? {
            Ok(hash) => Ok(hash),
            Err(SignerError::Rejected) => Err(DriverError::Rejected),
            Err(SignerError::Other(message)) => Err(DriverError::Signer(message)),
        }
    }

    /// Polls for the receipt of a broadcast transaction.
    async fn wait_receipt(
        &self,
        provider: &DynProvider,
        tx: B256,
    ) -> Result<TransactionReceipt, DriverError> {
        for _ in 0..RECEIPT_MAX_ATTEMPTS {
            let receipt = self
                .cancellable(provider.get_transaction_receipt(tx))
                .await?
                .map_err(|err| DriverError::Rpc(err.to_string()))?;
            if let Some(receipt) = receipt {
                return Ok(receipt);
            }
            self.sleep(RECEIPT_POLL_INTERVAL).await?;
        }
        Err(DriverError::ReceiptTimeout(tx))
    }

    fn provider(&self, chain: ChainRef) -> Result<&DynProvider, DriverError> {
        self.providers
            .by_chain(chain)
            .ok_or(DriverError::MissingProvider(chain))
    }

    async fn sleep(&self, duration: Duration) -> Result<(), DriverError> {
        self.cancellable(tokio::time::sleep(duration)).await
    }

    /// Races `fut` against cancellation.
    async fn cancellable<T>(
        &self,
        fut: impl Future<Output = T>,
    ) -> Result<T, DriverError> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(DriverError::Cancelled),
            out = fut => Ok(out),
        }
    }

    fn set_stage(&self, stage: PaymentStage) {
        tracing::debug!(stage = %stage, "payment stage");
        let _ = self.progress.send(stage);
    }
}

/// What a bridge status means for the polling loop.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum PollAction {
    Done,
    Failed,
    Continue,
}

/// `Done` and `Failed` are terminal; `NotFound`, `Invalid`, and `Pending`
/// keep polling — early polls routinely miss a transfer the oracle has not
/// indexed yet.
pub(crate) fn poll_action(status: BridgeStatusCode) -> PollAction {
    match status {
        BridgeStatusCode::Done => PollAction::Done,
        BridgeStatusCode::Failed => PollAction::Failed,
        BridgeStatusCode::NotFound | BridgeStatusCode::Invalid | BridgeStatusCode::Pending => {
            PollAction::Continue
        }
    }
}

/// Transient status-poll errors are suppressed unless the error text names
/// an actual failure.
pub(crate) fn is_transient_poll_error(err: &RoutingError) -> bool {
    !err.to_string().to_lowercase().contains("failed")
}
