use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use meshsync_core::{Aggregate, AggregateRoot, DomainError, OrderId, ProductId};
use meshsync_events::{Announce, Event, LineItemFact, OrderCompletedFact, OutboundFact};

/// Order status lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Open,
    Completed,
}

/// Order line: product and quantity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    pub product_number: ProductId,
    pub quantity: u64,
}

/// Aggregate root: Order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    id: OrderId,
    status: OrderStatus,
    lines: Vec<OrderLine>,
    version: u64,
    created: bool,
}

impl Order {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: OrderId) -> Self {
        Self {
            id,
            status: OrderStatus::Open,
            lines: Vec::new(),
            version: 0,
            created: false,
        }
    }

    pub fn status(&self) -> OrderStatus {
        self.status
    }

    pub fn lines(&self) -> &[OrderLine] {
        &self.lines
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

/// Command: CreateOrder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateOrder {
    pub order_id: OrderId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AddLineItem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddLineItem {
    pub order_id: OrderId,
    pub product_number: ProductId,
    pub quantity: u64,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CompleteOrder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompleteOrder {
    pub order_id: OrderId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderCommand {
    CreateOrder(CreateOrder),
    AddLineItem(AddLineItem),
    CompleteOrder(CompleteOrder),
}

/// Event: OrderCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderCreated {
    pub order_id: OrderId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: LineItemAdded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItemAdded {
    pub order_id: OrderId,
    pub product_number: ProductId,
    pub quantity: u64,
    pub occurred_at: DateTime<Utc>,
}

/// Event: OrderCompleted. Carries the full line list so partners need no
/// further lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderCompleted {
    pub order_id: OrderId,
    pub line_items: Vec<OrderLine>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderEvent {
    OrderCreated(OrderCreated),
    LineItemAdded(LineItemAdded),
    OrderCompleted(OrderCompleted),
}

impl Event for OrderEvent {
    fn event_type(&self) -> &'static str {
        match self {
            OrderEvent::OrderCreated(_) => "orders.order.created",
            OrderEvent::LineItemAdded(_) => "orders.order.line_item_added",
            OrderEvent::OrderCompleted(_) => "orders.order.completed",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            OrderEvent::OrderCreated(e) => e.occurred_at,
            OrderEvent::LineItemAdded(e) => e.occurred_at,
            OrderEvent::OrderCompleted(e) => e.occurred_at,
        }
    }
}

impl Announce for OrderEvent {
    fn announce(&self) -> Option<OutboundFact> {
        match self {
            OrderEvent::OrderCompleted(e) => Some(OutboundFact::OrderCompleted(OrderCompletedFact {
                order_id: e.order_id,
                line_items: e
                    .line_items
                    .iter()
                    .map(|l| LineItemFact {
                        product_number: l.product_number,
                        quantity: l.quantity,
                    })
                    .collect(),
            })),
            OrderEvent::OrderCreated(_) | OrderEvent::LineItemAdded(_) => None,
        }
    }
}

impl Aggregate for Order {
    type Command = OrderCommand;
    type Event = OrderEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            OrderEvent::OrderCreated(e) => {
                self.id = e.order_id;
                self.status = OrderStatus::Open;
                self.lines.clear();
                self.created = true;
            }
            OrderEvent::LineItemAdded(e) => {
                self.lines.push(OrderLine {
                    product_number: e.product_number,
                    quantity: e.quantity,
                });
            }
            OrderEvent::OrderCompleted(_) => {
                self.status = OrderStatus::Completed;
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            OrderCommand::CreateOrder(cmd) => self.handle_create(cmd),
            OrderCommand::AddLineItem(cmd) => self.handle_add_line_item(cmd),
            OrderCommand::CompleteOrder(cmd) => self.handle_complete(cmd),
        }
    }
}

impl Order {
    fn ensure_order_id(&self, order_id: OrderId) -> Result<(), DomainError> {
        if self.id != order_id {
            return Err(DomainError::invariant("order_id mismatch"));
        }
        Ok(())
    }

    fn ensure_open(&self) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        if self.status != OrderStatus::Open {
            return Err(DomainError::invariant("order is already completed"));
        }
        Ok(())
    }

    fn handle_create(&self, cmd: &CreateOrder) -> Result<Vec<OrderEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("order already exists"));
        }
        Ok(vec![OrderEvent::OrderCreated(OrderCreated {
            order_id: cmd.order_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_add_line_item(&self, cmd: &AddLineItem) -> Result<Vec<OrderEvent>, DomainError> {
        self.ensure_open()?;
        self.ensure_order_id(cmd.order_id)?;

        if cmd.quantity == 0 {
            return Err(DomainError::validation("quantity must be positive"));
        }

        Ok(vec![OrderEvent::LineItemAdded(LineItemAdded {
            order_id: cmd.order_id,
            product_number: cmd.product_number,
            quantity: cmd.quantity,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_complete(&self, cmd: &CompleteOrder) -> Result<Vec<OrderEvent>, DomainError> {
        self.ensure_open()?;
        self.ensure_order_id(cmd.order_id)?;

        if self.lines.is_empty() {
            return Err(DomainError::validation("cannot complete order without line items"));
        }

        Ok(vec![OrderEvent::OrderCompleted(OrderCompleted {
            order_id: cmd.order_id,
            line_items: self.lines.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }
}
