use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use stockhold_core::{Aggregate, AggregateRoot, DomainError, Event, OrderId, ProductId};
use stockhold_inventory::ConsumedLine;

use crate::error::OrderError;
use crate::status::{OrderStatus, OrderTransition};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customer {
    pub name: String,
    /// Phone, e-mail or messenger handle; free-form.
    pub contact: Option<String>,
}

/// Opaque artifact an admin reviews before approving.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PaymentProof {
    /// Reference to an uploaded receipt/transfer screenshot.
    Manual { reference: String },
    /// Synthetic marker for counter sales.
    PointOfSale,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SalesChannel {
    Online,
    PointOfSale,
}

/// Line as requested at order placement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewOrderLine {
    pub product_id: ProductId,
    pub quantity: i64,
    /// Price in smallest currency unit (e.g., cents), supplied by pricing.
    pub unit_price: i64,
}

/// Order line: product, quantity, price and (once approved) its cost basis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    pub product_id: ProductId,
    pub quantity: i64,
    pub unit_price: i64,
    pub line_revenue: i64,
    pub allocated_cost: Option<i64>,
    pub line_profit: Option<i64>,
}

impl OrderLine {
    fn from_new(line: &NewOrderLine) -> Self {
        Self {
            product_id: line.product_id,
            quantity: line.quantity,
            unit_price: line.unit_price,
            line_revenue: line.quantity.saturating_mul(line.unit_price),
            allocated_cost: None,
            line_profit: None,
        }
    }

    /// Average unit cost of the stock that left for this line.
    pub fn unit_cost(&self) -> Option<i64> {
        self.allocated_cost.map(|cost| cost / self.quantity)
    }
}

/// Cost basis of one line as computed at consumption.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineCost {
    pub product_id: ProductId,
    pub allocated_cost: i64,
}

/// Aggregate root: Order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    id: OrderId,
    order_number: String,
    tracking_code: String,
    customer: Option<Customer>,
    channel: SalesChannel,
    lines: Vec<OrderLine>,
    status: OrderStatus,
    reservation_expires_at: Option<DateTime<Utc>>,
    payment_proof: Option<PaymentProof>,
    total_amount: i64,
    total_cost: Option<i64>,
    total_profit: Option<i64>,
    rejection_reason: Option<String>,
    reminded_on: Option<NaiveDate>,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
    version: u64,
    created: bool,
}

impl Order {
    /// Create an empty, not-yet-placed aggregate instance.
    pub fn empty(id: OrderId) -> Self {
        Self {
            id,
            order_number: String::new(),
            tracking_code: String::new(),
            customer: None,
            channel: SalesChannel::Online,
            lines: Vec::new(),
            status: OrderStatus::Created,
            reservation_expires_at: None,
            payment_proof: None,
            total_amount: 0,
            total_cost: None,
            total_profit: None,
            rejection_reason: None,
            reminded_on: None,
            created_at: None,
            updated_at: None,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> OrderId {
        self.id
    }

    pub fn order_number(&self) -> &str {
        &self.order_number
    }

    pub fn tracking_code(&self) -> &str {
        &self.tracking_code
    }

    pub fn customer(&self) -> Option<&Customer> {
        self.customer.as_ref()
    }

    pub fn channel(&self) -> SalesChannel {
        self.channel
    }

    pub fn lines(&self) -> &[OrderLine] {
        &self.lines
    }

    pub fn status(&self) -> OrderStatus {
        self.status
    }

    pub fn reservation_expires_at(&self) -> Option<DateTime<Utc>> {
        self.reservation_expires_at
    }

    pub fn payment_proof(&self) -> Option<&PaymentProof> {
        self.payment_proof.as_ref()
    }

    pub fn total_amount(&self) -> i64 {
        self.total_amount
    }

    pub fn total_cost(&self) -> Option<i64> {
        self.total_cost
    }

    pub fn total_profit(&self) -> Option<i64> {
        self.total_profit
    }

    pub fn rejection_reason(&self) -> Option<&str> {
        self.rejection_reason.as_deref()
    }

    pub fn reminded_on(&self) -> Option<NaiveDate> {
        self.reminded_on
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }

    pub fn is_placed(&self) -> bool {
        self.created
    }

    /// Requested quantities per product, as the coordinator expects them.
    pub fn requirements(&self) -> Vec<(ProductId, i64)> {
        self.lines.iter().map(|l| (l.product_id, l.quantity)).collect()
    }

    /// Awaiting payment with a checkout window that has closed.
    pub fn is_checkout_expired(&self, now: DateTime<Utc>) -> bool {
        self.status == OrderStatus::AwaitingPayment
            && self.reservation_expires_at.is_some_and(|at| at <= now)
    }

    /// Record the version a store committed this row at.
    pub fn set_version(&mut self, version: u64) {
        self.version = version;
    }
}

impl AggregateRoot for Order {
    type Id = OrderId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: PlaceOrder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaceOrder {
    pub order_id: OrderId,
    pub order_number: String,
    pub tracking_code: String,
    pub customer: Customer,
    pub channel: SalesChannel,
    pub lines: Vec<NewOrderLine>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: OpenCheckout. Stock is already held until `expires_at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenCheckout {
    pub order_id: OrderId,
    pub expires_at: DateTime<Utc>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: SubmitPaymentProof.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitPaymentProof {
    pub order_id: OrderId,
    pub proof: PaymentProof,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ApproveOrder. `consumed` is what the ledger deducted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApproveOrder {
    pub order_id: OrderId,
    pub consumed: Vec<ConsumedLine>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RejectOrder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectOrder {
    pub order_id: OrderId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ExpireOrder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpireOrder {
    pub order_id: OrderId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: EscalateReview.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalateReview {
    pub order_id: OrderId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: MarkReminded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkReminded {
    pub order_id: OrderId,
    pub on: NaiveDate,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderCommand {
    PlaceOrder(PlaceOrder),
    OpenCheckout(OpenCheckout),
    SubmitPaymentProof(SubmitPaymentProof),
    ApproveOrder(ApproveOrder),
    RejectOrder(RejectOrder),
    ExpireOrder(ExpireOrder),
    EscalateReview(EscalateReview),
    MarkReminded(MarkReminded),
}

impl OrderCommand {
    pub fn order_id(&self) -> OrderId {
        match self {
            OrderCommand::PlaceOrder(c) => c.order_id,
            OrderCommand::OpenCheckout(c) => c.order_id,
            OrderCommand::SubmitPaymentProof(c) => c.order_id,
            OrderCommand::ApproveOrder(c) => c.order_id,
            OrderCommand::RejectOrder(c) => c.order_id,
            OrderCommand::ExpireOrder(c) => c.order_id,
            OrderCommand::EscalateReview(c) => c.order_id,
            OrderCommand::MarkReminded(c) => c.order_id,
        }
    }
}

/// Event: OrderPlaced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderPlaced {
    pub order_id: OrderId,
    pub order_number: String,
    pub tracking_code: String,
    pub customer: Customer,
    pub channel: SalesChannel,
    pub lines: Vec<NewOrderLine>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: CheckoutOpened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutOpened {
    pub order_id: OrderId,
    pub expires_at: DateTime<Utc>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PaymentProofSubmitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentProofSubmitted {
    pub order_id: OrderId,
    pub proof: PaymentProof,
    pub occurred_at: DateTime<Utc>,
}

/// Event: OrderApproved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderApproved {
    pub order_id: OrderId,
    pub line_costs: Vec<LineCost>,
    pub total_cost: i64,
    pub total_profit: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Event: OrderRejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRejected {
    pub order_id: OrderId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

/// Event: OrderExpired.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderExpired {
    pub order_id: OrderId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ReviewEscalated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewEscalated {
    pub order_id: OrderId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ReminderMarked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReminderMarked {
    pub order_id: OrderId,
    pub on: NaiveDate,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderEvent {
    OrderPlaced(OrderPlaced),
    CheckoutOpened(CheckoutOpened),
    PaymentProofSubmitted(PaymentProofSubmitted),
    OrderApproved(OrderApproved),
    OrderRejected(OrderRejected),
    OrderExpired(OrderExpired),
    ReviewEscalated(ReviewEscalated),
    ReminderMarked(ReminderMarked),
}

impl OrderEvent {
    pub fn order_id(&self) -> OrderId {
        match self {
            OrderEvent::OrderPlaced(e) => e.order_id,
            OrderEvent::CheckoutOpened(e) => e.order_id,
            OrderEvent::PaymentProofSubmitted(e) => e.order_id,
            OrderEvent::OrderApproved(e) => e.order_id,
            OrderEvent::OrderRejected(e) => e.order_id,
            OrderEvent::OrderExpired(e) => e.order_id,
            OrderEvent::ReviewEscalated(e) => e.order_id,
            OrderEvent::ReminderMarked(e) => e.order_id,
        }
    }
}

impl Event for OrderEvent {
    fn event_type(&self) -> &'static str {
        match self {
            OrderEvent::OrderPlaced(_) => "orders.order.placed",
            OrderEvent::CheckoutOpened(_) => "orders.order.checkout_opened",
            OrderEvent::PaymentProofSubmitted(_) => "orders.order.payment_submitted",
            OrderEvent::OrderApproved(_) => "orders.order.approved",
            OrderEvent::OrderRejected(_) => "orders.order.rejected",
            OrderEvent::OrderExpired(_) => "orders.order.expired",
            OrderEvent::ReviewEscalated(_) => "orders.order.review_escalated",
            OrderEvent::ReminderMarked(_) => "orders.order.reminder_marked",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            OrderEvent::OrderPlaced(e) => e.occurred_at,
            OrderEvent::CheckoutOpened(e) => e.occurred_at,
            OrderEvent::PaymentProofSubmitted(e) => e.occurred_at,
            OrderEvent::OrderApproved(e) => e.occurred_at,
            OrderEvent::OrderRejected(e) => e.occurred_at,
            OrderEvent::OrderExpired(e) => e.occurred_at,
            OrderEvent::ReviewEscalated(e) => e.occurred_at,
            OrderEvent::ReminderMarked(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Order {
    type Command = OrderCommand;
    type Event = OrderEvent;
    type Error = OrderError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            OrderEvent::OrderPlaced(e) => {
                self.id = e.order_id;
                self.order_number = e.order_number.clone();
                self.tracking_code = e.tracking_code.clone();
                self.customer = Some(e.customer.clone());
                self.channel = e.channel;
                self.lines = e.lines.iter().map(OrderLine::from_new).collect();
                self.total_amount = self.lines.iter().fold(0i64, |sum, l| sum.saturating_add(l.line_revenue));
                self.created_at = Some(e.occurred_at);
                self.created = true;

                // Counter sales skip the hold phase and arrive with a synthetic proof.
                match e.channel {
                    SalesChannel::Online => self.status = OrderStatus::Created,
                    SalesChannel::PointOfSale => {
                        self.status = OrderStatus::PaymentSubmitted;
                        self.payment_proof = Some(PaymentProof::PointOfSale);
                    }
                }
            }
            OrderEvent::CheckoutOpened(e) => {
                self.status = OrderStatus::AwaitingPayment;
                self.reservation_expires_at = Some(e.expires_at);
            }
            OrderEvent::PaymentProofSubmitted(e) => {
                self.status = OrderStatus::PaymentSubmitted;
                self.payment_proof = Some(e.proof.clone());
            }
            OrderEvent::OrderApproved(e) => {
                for line in &mut self.lines {
                    if let Some(cost) = e.line_costs.iter().find(|c| c.product_id == line.product_id) {
                        line.allocated_cost = Some(cost.allocated_cost);
                        line.line_profit = Some(line.line_revenue - cost.allocated_cost);
                    }
                }
                self.total_cost = Some(e.total_cost);
                self.total_profit = Some(e.total_profit);
                self.status = OrderStatus::Approved;
                self.reservation_expires_at = None;
            }
            OrderEvent::OrderRejected(e) => {
                self.status = OrderStatus::Rejected;
                self.rejection_reason = Some(e.reason.clone());
                self.reservation_expires_at = None;
            }
            OrderEvent::OrderExpired(_) => {
                self.status = OrderStatus::Expired;
                self.reservation_expires_at = None;
            }
            OrderEvent::ReviewEscalated(_) => {
                self.status = OrderStatus::NeedsManualReview;
            }
            OrderEvent::ReminderMarked(e) => {
                self.reminded_on = Some(e.on);
            }
        }

        self.updated_at = Some(event.occurred_at());
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        if !matches!(command, OrderCommand::PlaceOrder(_)) {
            self.ensure_placed(command.order_id())?;
        }

        match command {
            OrderCommand::PlaceOrder(cmd) => self.handle_place(cmd),
            OrderCommand::OpenCheckout(cmd) => self.handle_open_checkout(cmd),
            OrderCommand::SubmitPaymentProof(cmd) => self.handle_submit_proof(cmd),
            OrderCommand::ApproveOrder(cmd) => self.handle_approve(cmd),
            OrderCommand::RejectOrder(cmd) => self.handle_reject(cmd),
            OrderCommand::ExpireOrder(cmd) => self.handle_expire(cmd),
            OrderCommand::EscalateReview(cmd) => self.handle_escalate(cmd),
            OrderCommand::MarkReminded(cmd) => self.handle_mark_reminded(cmd),
        }
    }
}

impl Order {
    fn ensure_placed(&self, order_id: OrderId) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        if self.id != order_id {
            return Err(DomainError::invariant("order_id mismatch"));
        }
        Ok(())
    }

    fn handle_place(&self, cmd: &PlaceOrder) -> Result<Vec<OrderEvent>, OrderError> {
        if self.created {
            return Err(DomainError::conflict("order already exists").into());
        }
        if cmd.customer.name.trim().is_empty() {
            return Err(DomainError::validation("customer name cannot be empty").into());
        }
        if cmd.lines.is_empty() {
            return Err(DomainError::validation("order needs at least one line").into());
        }
        let mut total_amount = 0i64;
        for (idx, line) in cmd.lines.iter().enumerate() {
            if line.quantity <= 0 {
                return Err(DomainError::validation(format!("line {idx}: quantity must be positive")).into());
            }
            if line.unit_price < 0 {
                return Err(DomainError::validation(format!("line {idx}: unit_price cannot be negative")).into());
            }
            if cmd.lines[..idx].iter().any(|l| l.product_id == line.product_id) {
                return Err(DomainError::validation(format!(
                    "line {idx}: product {} appears more than once",
                    line.product_id
                ))
                .into());
            }
            total_amount = line
                .quantity
                .checked_mul(line.unit_price)
                .and_then(|revenue| total_amount.checked_add(revenue))
                .ok_or_else(|| DomainError::validation(format!("line {idx}: order total is out of range")))?;
        }

        Ok(vec![OrderEvent::OrderPlaced(OrderPlaced {
            order_id: cmd.order_id,
            order_number: cmd.order_number.clone(),
            tracking_code: cmd.tracking_code.clone(),
            customer: cmd.customer.clone(),
            channel: cmd.channel,
            lines: cmd.lines.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_open_checkout(&self, cmd: &OpenCheckout) -> Result<Vec<OrderEvent>, OrderError> {
        OrderTransition::OpenCheckout.check(self.status)?;
        if cmd.expires_at <= cmd.occurred_at {
            return Err(DomainError::validation("checkout window must end in the future").into());
        }

        Ok(vec![OrderEvent::CheckoutOpened(CheckoutOpened {
            order_id: cmd.order_id,
            expires_at: cmd.expires_at,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_submit_proof(&self, cmd: &SubmitPaymentProof) -> Result<Vec<OrderEvent>, OrderError> {
        OrderTransition::SubmitProof.check(self.status)?;
        if let PaymentProof::Manual { reference } = &cmd.proof {
            if reference.trim().is_empty() {
                return Err(DomainError::validation("payment proof reference cannot be empty").into());
            }
        }
        if let Some(expired_at) = self.reservation_expires_at {
            if expired_at <= cmd.occurred_at {
                return Err(OrderError::ReservationExpired { expired_at });
            }
        }

        Ok(vec![OrderEvent::PaymentProofSubmitted(PaymentProofSubmitted {
            order_id: cmd.order_id,
            proof: cmd.proof.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_approve(&self, cmd: &ApproveOrder) -> Result<Vec<OrderEvent>, OrderError> {
        OrderTransition::Approve.check(self.status)?;

        let mut line_costs = Vec::with_capacity(self.lines.len());
        for line in &self.lines {
            let consumed = cmd
                .consumed
                .iter()
                .find(|c| c.product_id == line.product_id)
                .ok_or_else(|| {
                    DomainError::invariant(format!("no consumption recorded for product {}", line.product_id))
                })?;
            if consumed.quantity != line.quantity {
                return Err(DomainError::invariant(format!(
                    "consumed {} units of product {} but the line ordered {}",
                    consumed.quantity, line.product_id, line.quantity
                ))
                .into());
            }
            line_costs.push(LineCost {
                product_id: line.product_id,
                allocated_cost: consumed.line_cost,
            });
        }

        let total_cost = line_costs
            .iter()
            .try_fold(0i64, |sum, c| sum.checked_add(c.allocated_cost))
            .ok_or_else(|| DomainError::validation("order cost is out of range"))?;

        Ok(vec![OrderEvent::OrderApproved(OrderApproved {
            order_id: cmd.order_id,
            line_costs,
            total_cost,
            total_profit: self.total_amount - total_cost,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_reject(&self, cmd: &RejectOrder) -> Result<Vec<OrderEvent>, OrderError> {
        OrderTransition::Reject.check(self.status)?;

        Ok(vec![OrderEvent::OrderRejected(OrderRejected {
            order_id: cmd.order_id,
            reason: cmd.reason.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_expire(&self, cmd: &ExpireOrder) -> Result<Vec<OrderEvent>, OrderError> {
        OrderTransition::Expire.check(self.status)?;
        if !self.is_checkout_expired(cmd.occurred_at) {
            return Err(DomainError::invariant("checkout window is still open").into());
        }

        Ok(vec![OrderEvent::OrderExpired(OrderExpired {
            order_id: cmd.order_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_escalate(&self, cmd: &EscalateReview) -> Result<Vec<OrderEvent>, OrderError> {
        OrderTransition::Escalate.check(self.status)?;

        Ok(vec![OrderEvent::ReviewEscalated(ReviewEscalated {
            order_id: cmd.order_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_mark_reminded(&self, cmd: &MarkReminded) -> Result<Vec<OrderEvent>, OrderError> {
        if !self.status.is_unresolved() {
            return Err(DomainError::invariant(format!(
                "only orders awaiting review can be reminded about (status {})",
                self.status
            ))
            .into());
        }
        if self.reminded_on == Some(cmd.on) {
            return Ok(vec![]);
        }

        Ok(vec![OrderEvent::ReminderMarked(ReminderMarked {
            order_id: cmd.order_id,
            on: cmd.on,
            occurred_at: cmd.occurred_at,
        })])
    }
}
