//! Limit orders a crew has on one exchange. Multi-instance, no time gate:
//! an order is open until it fills or is cancelled.
//!
//! Fills the crew submits against other crews' orders are listed after the
//! crew's own orders while they are pending. A confirmed fill leaves no
//! record of its own.

use serde::Serialize;
use serde_json::json;

use crate::activity::{Activity, EventName};
use crate::entity::{Entity, EntityMatch, Order, OrderStatus, OrderType};
use crate::ledger::{Executor, PendingTransaction, TransactionKey};
use crate::location::{EntityLabel, LocationRef};
use crate::reconcile::{merge_unconfirmed, MergeKey, Tagged};
use crate::stage::{ActionEntry, ActionStatus, Stage};

use super::{loc, meta_for, num, submit, vars, Sources};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatusLabel {
    Placing,
    Open,
    Cancelling,
    Filling,
    Filled,
    Cancelled,
}

impl ActionStatus for OrderStatusLabel {
    fn stage(self) -> Stage {
        match self {
            Self::Placing => Stage::Starting,
            Self::Open => Stage::InProgress,
            Self::Cancelling | Self::Filling => Stage::Completing,
            Self::Filled | Self::Cancelled => Stage::Completed,
        }
    }

    fn label(self) -> &'static str {
        match self {
            Self::Placing => "PLACING",
            Self::Open => "OPEN",
            Self::Cancelling => "CANCELLING",
            Self::Filling => "FILLING",
            Self::Filled => "FILLED",
            Self::Cancelled => "CANCELLED",
        }
    }
}

fn create_key(order_type: OrderType) -> TransactionKey {
    match order_type {
        OrderType::LimitBuy => TransactionKey::CreateBuyOrder,
        OrderType::LimitSell => TransactionKey::CreateSellOrder,
    }
}

fn cancel_key(order_type: OrderType) -> TransactionKey {
    match order_type {
        OrderType::LimitBuy => TransactionKey::CancelBuyOrder,
        OrderType::LimitSell => TransactionKey::CancelSellOrder,
    }
}

fn fill_key(order_type: OrderType) -> TransactionKey {
    match order_type {
        OrderType::LimitBuy => TransactionKey::FillBuyOrder,
        OrderType::LimitSell => TransactionKey::FillSellOrder,
    }
}

fn created_event(order_type: OrderType) -> EventName {
    match order_type {
        OrderType::LimitBuy => EventName::BuyOrderCreated,
        OrderType::LimitSell => EventName::SellOrderCreated,
    }
}

/// Parameters of a new limit order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct NewOrder {
    pub order_type: OrderType,
    pub product: u64,
    pub amount: u64,
    pub price: u64,
    pub storage: LocationRef,
    pub storage_slot: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CurrentOrder {
    /// `None` until the placement confirms.
    pub order: Option<LocationRef>,
    pub order_type: OrderType,
    pub exchange: LocationRef,
    /// Crew that placed the order, or the taker for a pending fill.
    pub crew: Option<LocationRef>,
    pub product: Option<u64>,
    pub amount: Option<u64>,
    pub initial_amount: Option<u64>,
    pub price: Option<u64>,
    pub storage: Option<LocationRef>,
    pub storage_slot: Option<u64>,
    pub tx_hash: Option<String>,
}

struct OrderRecord<'s> {
    entity: &'s Entity,
    order: &'s Order,
    created: Option<&'s Activity>,
}

impl MergeKey for OrderRecord<'_> {
    fn created_by(&self, tx: &PendingTransaction) -> bool {
        let created_tx = self.created.and_then(|a| a.tx_hash());
        created_tx.is_some() && created_tx == tx.tx_hash.as_deref()
    }

    fn same_action(&self, tx: &PendingTransaction) -> bool {
        let o = self.order;
        let placed = if o.initial_amount > 0 {
            o.initial_amount
        } else {
            o.amount
        };
        o.status == OrderStatus::Open
            && tx.key == create_key(o.order_type)
            && tx.var::<LocationRef>("exchange") == Some(o.exchange)
            && tx.var::<LocationRef>("caller_crew") == Some(o.crew)
            && tx.var::<u64>("product") == Some(o.product)
            && tx.var::<u64>("price") == Some(o.price)
            && tx.var::<u64>("amount") == Some(placed)
    }
}

pub struct MarketOrderManager {
    exchange: LocationRef,
    crew: LocationRef,
    include_finished: bool,
}

impl MarketOrderManager {
    pub fn new(exchange: LocationRef, crew: LocationRef) -> Self {
        Self {
            exchange,
            crew,
            include_finished: false,
        }
    }

    /// Also list filled and cancelled orders.
    pub fn with_finished(mut self) -> Self {
        self.include_finished = true;
        self
    }

    fn records<'s>(&self, src: &Sources<'s>) -> Vec<OrderRecord<'s>> {
        src.entities
            .query(&EntityMatch::OfLabel {
                label: EntityLabel::Order,
            })
            .into_iter()
            .filter_map(|entity| {
                let order = entity.order.as_ref()?;
                let listed = order.exchange == self.exchange
                    && order.crew == self.crew
                    && (self.include_finished || order.status == OrderStatus::Open);
                if !listed {
                    return None;
                }
                let created = src.activities.find_latest(
                    created_event(order.order_type),
                    &json!({ "order": entity.location_ref() }),
                );
                Some(OrderRecord {
                    entity,
                    order,
                    created,
                })
            })
            .collect()
    }

    fn submissions<'s>(&self, src: &Sources<'s>) -> Vec<&'s PendingTransaction> {
        let subset = json!({ "exchange": self.exchange, "caller_crew": self.crew });
        src.ledger
            .pending
            .iter()
            .filter(|tx| {
                tx.matches(TransactionKey::CreateBuyOrder, &subset)
                    || tx.matches(TransactionKey::CreateSellOrder, &subset)
            })
            .collect()
    }

    fn fills<'s>(&self, src: &Sources<'s>) -> Vec<&'s PendingTransaction> {
        let subset = json!({ "exchange": self.exchange, "caller_crew": self.crew });
        src.ledger
            .pending
            .iter()
            .filter(|tx| {
                tx.matches(TransactionKey::FillBuyOrder, &subset)
                    || tx.matches(TransactionKey::FillSellOrder, &subset)
            })
            .collect()
    }

    /// The crew's orders, then its placements still waiting on an id, then
    /// its pending fills.
    pub fn reconcile(&self, src: &Sources) -> Vec<ActionEntry<OrderStatusLabel, CurrentOrder>> {
        let mut entries: Vec<_> = merge_unconfirmed(self.records(src), self.submissions(src))
            .into_iter()
            .map(|tagged| match tagged {
                Tagged::Confirmed { record, merged } => self.confirmed_entry(src, &record, merged),
                Tagged::Pending(tx) => {
                    ActionEntry::new(OrderStatusLabel::Placing, self.placing(tx))
                }
            })
            .collect();
        let fills = self.fills(src).into_iter().map(|tx| {
            ActionEntry::new(OrderStatusLabel::Filling, self.filling(src, tx))
        });
        entries.extend(fills);
        entries
    }

    /// A pending fill, described from the taken order when it is cached.
    fn filling(&self, src: &Sources, tx: &PendingTransaction) -> CurrentOrder {
        let order_ref: Option<LocationRef> = tx.var("order");
        let taken = order_ref
            .and_then(|r| src.entities.get(&r))
            .and_then(|e| e.order.as_ref());
        let order_type = match tx.key {
            TransactionKey::FillBuyOrder => OrderType::LimitBuy,
            _ => OrderType::LimitSell,
        };
        CurrentOrder {
            order: order_ref,
            order_type,
            exchange: self.exchange,
            crew: tx.var("caller_crew"),
            product: taken.map(|o| o.product),
            amount: tx.var("amount"),
            initial_amount: taken.map(|o| o.initial_amount).filter(|a| *a > 0),
            price: taken.map(|o| o.price),
            storage: tx.var("storage"),
            storage_slot: tx.var("storage_slot"),
            tx_hash: tx.tx_hash.clone(),
        }
    }

    fn placing(&self, tx: &PendingTransaction) -> CurrentOrder {
        let order_type = match tx.key {
            TransactionKey::CreateSellOrder => OrderType::LimitSell,
            _ => OrderType::LimitBuy,
        };
        CurrentOrder {
            order: None,
            order_type,
            exchange: self.exchange,
            crew: tx.var("caller_crew"),
            product: tx.var("product"),
            amount: tx.var("amount"),
            initial_amount: tx.var("amount"),
            price: tx.var("price"),
            storage: tx.var("storage"),
            storage_slot: tx.var("storage_slot"),
            tx_hash: tx.tx_hash.clone(),
        }
    }

    fn confirmed_entry(
        &self,
        src: &Sources,
        record: &OrderRecord,
        merged: Option<&PendingTransaction>,
    ) -> ActionEntry<OrderStatusLabel, CurrentOrder> {
        let o = record.order;
        let order_ref = record.entity.location_ref();
        let mut current = CurrentOrder {
            order: Some(order_ref),
            order_type: o.order_type,
            exchange: o.exchange,
            crew: Some(o.crew),
            product: Some(o.product),
            amount: Some(o.amount),
            initial_amount: Some(o.initial_amount).filter(|a| *a > 0),
            price: Some(o.price),
            storage: Some(o.storage),
            storage_slot: Some(o.storage_slot),
            tx_hash: merged.and_then(|tx| tx.tx_hash.clone()),
        };
        let status = match o.status {
            OrderStatus::Open => {
                match src
                    .ledger
                    .pending_tx(cancel_key(o.order_type), &json!({ "order": order_ref }))
                {
                    Some(tx) => {
                        current.tx_hash = tx.tx_hash.clone();
                        OrderStatusLabel::Cancelling
                    }
                    None => OrderStatusLabel::Open,
                }
            }
            OrderStatus::Filled => OrderStatusLabel::Filled,
            OrderStatus::Cancelled => OrderStatusLabel::Cancelled,
        };
        ActionEntry::new(status, current)
    }

    pub fn place(&self, executor: &mut dyn Executor, order: &NewOrder) {
        submit(
            executor,
            create_key(order.order_type),
            vars(&[
                ("exchange", loc(&self.exchange)),
                ("product", num(order.product)),
                ("amount", num(order.amount)),
                ("price", num(order.price)),
                ("storage", loc(&order.storage)),
                ("storage_slot", num(order.storage_slot)),
                ("caller_crew", loc(&self.crew)),
            ]),
            meta_for(&self.exchange, None),
        );
    }

    pub fn cancel(&self, executor: &mut dyn Executor, order: LocationRef, order_type: OrderType) {
        submit(
            executor,
            cancel_key(order_type),
            vars(&[("order", loc(&order)), ("caller_crew", loc(&self.crew))]),
            meta_for(&self.exchange, None),
        );
    }

    /// Take `amount` from another crew's resting order, delivering into or
    /// out of `storage`.
    pub fn fill(
        &self,
        executor: &mut dyn Executor,
        order: LocationRef,
        order_type: OrderType,
        amount: u64,
        storage: LocationRef,
        storage_slot: u64,
    ) {
        submit(
            executor,
            fill_key(order_type),
            vars(&[
                ("order", loc(&order)),
                ("exchange", loc(&self.exchange)),
                ("amount", num(amount)),
                ("storage", loc(&storage)),
                ("storage_slot", num(storage_slot)),
                ("caller_crew", loc(&self.crew)),
            ]),
            meta_for(&self.exchange, None),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::managers::fixtures::World;

    fn exchange() -> LocationRef {
        LocationRef::building(300)
    }

    fn crew() -> LocationRef {
        LocationRef::crew(4)
    }

    fn new_order() -> NewOrder {
        NewOrder {
            order_type: OrderType::LimitSell,
            product: 12,
            amount: 1000,
            price: 35,
            storage: LocationRef::building(301),
            storage_slot: 2,
        }
    }

    fn put_order(world: &mut World, id: u64, status: OrderStatus, amount: u64) {
        let mut e = Entity::new(EntityLabel::Order, id);
        e.order = Some(Order {
            order_type: OrderType::LimitSell,
            status,
            crew: crew(),
            exchange: exchange(),
            product: 12,
            amount,
            initial_amount: 1000,
            price: 35,
            storage: LocationRef::building(301),
            storage_slot: 2,
        });
        world.store.upsert(e);
    }

    #[test]
    fn test_empty_exchange_lists_nothing() {
        let world = World::default();
        let m = MarketOrderManager::new(exchange(), crew());
        assert!(m.reconcile(&world.sources()).is_empty());
    }

    #[test]
    fn test_placing_then_open() {
        let mut world = World::default();
        let m = MarketOrderManager::new(exchange(), crew());
        m.place(&mut world.ledger, &new_order());

        let entries = m.reconcile(&world.sources());
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].status, OrderStatusLabel::Placing);
        assert_eq!(entries[0].stage, Stage::Starting);
        assert_eq!(entries[0].action.order_type, OrderType::LimitSell);

        // Confirmed while the pending entry is still listed: renamed, not duplicated.
        put_order(&mut world, 1, OrderStatus::Open, 1000);
        let entries = m.reconcile(&world.sources());
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].status, OrderStatusLabel::Open);
        assert_eq!(entries[0].stage, Stage::InProgress);
        assert_eq!(entries[0].action.order, Some(LocationRef::order(1)));
    }

    #[test]
    fn test_partially_filled_order_still_merges() {
        let mut world = World::default();
        let m = MarketOrderManager::new(exchange(), crew());
        m.place(&mut world.ledger, &new_order());
        put_order(&mut world, 1, OrderStatus::Open, 400);
        assert_eq!(m.reconcile(&world.sources()).len(), 1);
    }

    #[test]
    fn test_cancel_and_terminal_states() {
        let mut world = World::default();
        put_order(&mut world, 1, OrderStatus::Open, 1000);
        let m = MarketOrderManager::new(exchange(), crew());
        m.cancel(&mut world.ledger, LocationRef::order(1), OrderType::LimitSell);
        let entries = m.reconcile(&world.sources());
        assert_eq!(entries[0].status, OrderStatusLabel::Cancelling);
        assert_eq!(entries[0].stage, Stage::Completing);

        world.confirm_first();
        put_order(&mut world, 1, OrderStatus::Cancelled, 1000);
        put_order(&mut world, 2, OrderStatus::Filled, 0);
        assert!(m.reconcile(&world.sources()).is_empty());

        let all = MarketOrderManager::new(exchange(), crew()).with_finished();
        let statuses: Vec<_> = all
            .reconcile(&world.sources())
            .into_iter()
            .map(|e| e.status)
            .collect();
        assert_eq!(
            statuses,
            vec![OrderStatusLabel::Cancelled, OrderStatusLabel::Filled]
        );
    }

    #[test]
    fn test_other_crews_orders_hidden() {
        let mut world = World::default();
        put_order(&mut world, 1, OrderStatus::Open, 1000);
        let m = MarketOrderManager::new(exchange(), LocationRef::crew(5));
        assert!(m.reconcile(&world.sources()).is_empty());
    }

    #[test]
    fn test_fill_submits_taker_key() {
        let mut world = World::default();
        let m = MarketOrderManager::new(exchange(), LocationRef::crew(5));
        m.fill(
            &mut world.ledger,
            LocationRef::order(1),
            OrderType::LimitSell,
            250,
            LocationRef::building(9),
            1,
        );
        assert_eq!(world.ledger.pending[0].key, TransactionKey::FillSellOrder);
        assert_eq!(world.ledger.pending[0].var::<u64>("amount"), Some(250));
    }

    #[test]
    fn test_pending_fill_listed_until_confirmed() {
        let mut world = World::default();
        put_order(&mut world, 1, OrderStatus::Open, 1000);
        let taker = MarketOrderManager::new(exchange(), LocationRef::crew(5));
        taker.fill(
            &mut world.ledger,
            LocationRef::order(1),
            OrderType::LimitSell,
            250,
            LocationRef::building(9),
            1,
        );

        let entries = taker.reconcile(&world.sources());
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].status, OrderStatusLabel::Filling);
        assert_eq!(entries[0].stage, Stage::Completing);
        assert_eq!(entries[0].action.order, Some(LocationRef::order(1)));
        assert_eq!(entries[0].action.price, Some(35));
        assert_eq!(entries[0].action.amount, Some(250));

        // The maker's view is untouched by someone else's fill.
        let maker = MarketOrderManager::new(exchange(), crew());
        assert_eq!(
            maker.reconcile(&world.sources())[0].status,
            OrderStatusLabel::Open
        );

        world.confirm_first();
        assert!(taker.reconcile(&world.sources()).is_empty());
    }
}
