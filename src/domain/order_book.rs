// ============================================================================
// Order Book Domain Model
// Single-writer limit order book in strict price-time priority
// ============================================================================
//
// Layout:
//
//   BookSide: BTreeMap<Price, PriceLevel>      best price in O(log n)
//   PriceLevel: head <-> ... <-> tail           FIFO, oldest at head
//   Slab<OrderNode>                             O(1) unlink by slab key
//   HashMap<OrderId, usize>                     order id -> slab key
//
// Only the matching thread owns an `OrderBook`; nothing here is Sync-shared.

use slab::Slab;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use super::config::IcebergRefill;
use super::order::state::OrderState;
use super::order::FillError;
use super::snapshot::{DepthLevel, OrderBookSnapshot};
use super::{Order, OrderId, Side};
use crate::numeric::{Price, Quantity};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BookError {
    #[error("order {0} is already in the book")]
    DuplicateOrder(OrderId),
    #[error("order {0} is not in the book")]
    UnknownOrder(OrderId),
    #[error("order {0} has nothing left to rest")]
    NothingToRest(OrderId),
    #[error("order {0} is {1:?} and cannot rest")]
    TerminalOrder(OrderId, OrderState),
    #[error("order {order_id}: consumed {consumed} exceeds displayed {displayed}")]
    ExceedsDisplayed {
        order_id: OrderId,
        consumed: Quantity,
        displayed: Quantity,
    },
    #[error(transparent)]
    Fill(#[from] FillError),
}

// ============================================================================
// Order Node
// ============================================================================

/// A resting order plus its queue links and the currently displayed slice.
#[derive(Debug, Clone)]
pub struct OrderNode {
    pub order: Order,
    /// Matchable quantity of the current slice. Equals the remaining
    /// quantity unless the order is an iceberg.
    displayed: Quantity,
    prev: Option<usize>,
    next: Option<usize>,
}

impl OrderNode {
    fn new(order: Order) -> Self {
        let displayed = Self::slice_for(&order);
        Self {
            order,
            displayed,
            prev: None,
            next: None,
        }
    }

    fn slice_for(order: &Order) -> Quantity {
        let remaining = order.remaining_quantity();
        match order.kind.display_quantity() {
            Some(display) => display.min(remaining),
            None => remaining,
        }
    }

    pub fn displayed(&self) -> Quantity {
        self.displayed
    }

    pub fn hidden(&self) -> Quantity {
        self.order.remaining_quantity().saturating_sub(self.displayed)
    }
}

/// What `reduce_or_remove` did to the maker.
#[derive(Debug, Clone, PartialEq)]
pub enum Reduction {
    /// Still resting with the same slice
    Reduced { remaining: Quantity },
    /// Iceberg slice consumed; a new slice was carved from hidden quantity
    Replenished {
        displayed: Quantity,
        remaining: Quantity,
    },
    /// Fully filled and removed from the book
    Removed(Order),
}

// ============================================================================
// Price Level
// ============================================================================

/// FIFO queue of resting orders at one price. Order data lives in the slab;
/// the level holds only links and aggregates.
#[derive(Debug, Clone)]
pub struct PriceLevel {
    pub price: Price,
    head: Option<usize>,
    tail: Option<usize>,
    order_count: usize,
    /// Sum of displayed slices
    displayed_quantity: Quantity,
    /// Sum of remaining quantity, hidden included
    total_quantity: Quantity,
}

impl PriceLevel {
    fn new(price: Price) -> Self {
        Self {
            price,
            head: None,
            tail: None,
            order_count: 0,
            displayed_quantity: Quantity::ZERO,
            total_quantity: Quantity::ZERO,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.order_count == 0
    }

    pub fn order_count(&self) -> usize {
        self.order_count
    }

    pub fn displayed_quantity(&self) -> Quantity {
        self.displayed_quantity
    }

    pub fn total_quantity(&self) -> Quantity {
        self.total_quantity
    }

    fn push_back(&mut self, key: usize, slab: &mut Slab<OrderNode>) {
        let old_tail = self.tail;
        let node = &mut slab[key];
        node.prev = old_tail;
        node.next = None;
        self.displayed_quantity = self.displayed_quantity.saturating_add(node.displayed);
        self.total_quantity = self
            .total_quantity
            .saturating_add(node.order.remaining_quantity());

        match old_tail {
            Some(tail) => slab[tail].next = Some(key),
            None => self.head = Some(key),
        }
        self.tail = Some(key);
        self.order_count += 1;
    }

    fn unlink(&mut self, key: usize, slab: &mut Slab<OrderNode>) {
        let (prev, next, displayed, remaining) = {
            let node = &slab[key];
            (node.prev, node.next, node.displayed, node.order.remaining_quantity())
        };

        match prev {
            Some(prev) => slab[prev].next = next,
            None => self.head = next,
        }
        match next {
            Some(next) => slab[next].prev = prev,
            None => self.tail = prev,
        }

        let node = &mut slab[key];
        node.prev = None;
        node.next = None;

        self.order_count -= 1;
        self.displayed_quantity = self.displayed_quantity.saturating_sub(displayed);
        self.total_quantity = self.total_quantity.saturating_sub(remaining);
    }

    fn consume(&mut self, quantity: Quantity) {
        self.displayed_quantity = self.displayed_quantity.saturating_sub(quantity);
        self.total_quantity = self.total_quantity.saturating_sub(quantity);
    }

    fn keys<'a>(&self, slab: &'a Slab<OrderNode>) -> impl Iterator<Item = usize> + 'a {
        let mut cursor = self.head;
        std::iter::from_fn(move || {
            let key = cursor?;
            cursor = slab[key].next;
            Some(key)
        })
    }
}

// ============================================================================
// Book Side
// ============================================================================

/// One side of the book, levels keyed by price.
#[derive(Debug, Clone)]
pub struct BookSide {
    pub side: Side,
    levels: BTreeMap<Price, PriceLevel>,
}

impl BookSide {
    fn new(side: Side) -> Self {
        Self {
            side,
            levels: BTreeMap::new(),
        }
    }

    pub fn best_price(&self) -> Option<Price> {
        self.best_level().map(|level| level.price)
    }

    pub fn best_level(&self) -> Option<&PriceLevel> {
        match self.side {
            // Highest bid (last in sorted order)
            Side::Buy => self.levels.values().next_back(),
            // Lowest ask (first in sorted order)
            Side::Sell => self.levels.values().next(),
        }
    }

    /// Levels from best to worst.
    pub fn levels(&self) -> Box<dyn Iterator<Item = &PriceLevel> + '_> {
        match self.side {
            Side::Buy => Box::new(self.levels.values().rev()),
            Side::Sell => Box::new(self.levels.values()),
        }
    }

    pub fn level(&self, price: Price) -> Option<&PriceLevel> {
        self.levels.get(&price)
    }

    pub fn level_count(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    pub fn depth(&self, num_levels: usize) -> Vec<DepthLevel> {
        self.levels()
            .take(num_levels)
            .map(|level| DepthLevel {
                price: level.price,
                quantity: level.displayed_quantity,
                order_count: level.order_count,
            })
            .collect()
    }
}

// ============================================================================
// Order Book
// ============================================================================

/// Per-symbol limit order book.
pub struct OrderBook {
    symbol: Arc<str>,
    bids: BookSide,
    asks: BookSide,
    orders: Slab<OrderNode>,
    index: HashMap<OrderId, usize>,
    iceberg_refill: IcebergRefill,
}

impl OrderBook {
    pub fn new(symbol: &str, iceberg_refill: IcebergRefill) -> Self {
        Self {
            symbol: Arc::from(symbol),
            bids: BookSide::new(Side::Buy),
            asks: BookSide::new(Side::Sell),
            orders: Slab::new(),
            index: HashMap::new(),
            iceberg_refill,
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn side(&self, side: Side) -> &BookSide {
        match side {
            Side::Buy => &self.bids,
            Side::Sell => &self.asks,
        }
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn best_bid(&self) -> Option<Price> {
        self.bids.best_price()
    }

    pub fn best_ask(&self) -> Option<Price> {
        self.asks.best_price()
    }

    pub fn contains(&self, order_id: &OrderId) -> bool {
        self.index.contains_key(order_id)
    }

    pub fn get(&self, order_id: &OrderId) -> Option<&OrderNode> {
        self.index.get(order_id).map(|&key| &self.orders[key])
    }

    pub fn order_count(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Oldest order at the best level of `side`.
    pub fn best_maker(&self, side: Side) -> Option<&OrderNode> {
        let level = self.side(side).best_level()?;
        level.head.map(|key| &self.orders[key])
    }

    /// True if a `side` order at `price` would trade against the book.
    pub fn would_cross(&self, side: Side, price: Price) -> bool {
        match side {
            Side::Buy => self.best_ask().is_some_and(|ask| price >= ask),
            Side::Sell => self.best_bid().is_some_and(|bid| price <= bid),
        }
    }

    /// Quantity resting on the opposite side at prices a `taker_side` order
    /// limited at `limit` can reach, hidden iceberg quantity included, stopping
    /// once `needed` is covered.
    pub fn crossing_liquidity(&self, taker_side: Side, limit: Price, needed: Quantity) -> Quantity {
        let mut available = Quantity::ZERO;
        for level in self.side(taker_side.opposite()).levels() {
            let crosses = match taker_side {
                Side::Buy => limit >= level.price,
                Side::Sell => limit <= level.price,
            };
            if !crosses || available >= needed {
                break;
            }
            available = available.saturating_add(level.total_quantity);
        }
        available
    }

    pub fn is_crossed(&self) -> bool {
        matches!((self.best_bid(), self.best_ask()), (Some(bid), Some(ask)) if bid >= ask)
    }

    /// Order ids at `price` in matching order.
    pub fn level_order_ids(&self, side: Side, price: Price) -> Vec<OrderId> {
        self.side(side)
            .level(price)
            .map(|level| {
                level
                    .keys(&self.orders)
                    .map(|key| self.orders[key].order.id)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Every resting order on `side`, best level first, FIFO within a level.
    pub fn resting_orders(&self, side: Side) -> Vec<&OrderNode> {
        self.side(side)
            .levels()
            .flat_map(|level| level.keys(&self.orders))
            .map(|key| &self.orders[key])
            .collect()
    }

    pub fn snapshot(&self, depth: usize) -> OrderBookSnapshot {
        let mut snapshot = OrderBookSnapshot::empty(&*self.symbol);
        snapshot.bids = self.bids.depth(depth);
        snapshot.asks = self.asks.depth(depth);
        snapshot
    }

    // ========================================================================
    // Mutation
    // ========================================================================

    /// Append `order` at the FIFO tail of its price level.
    pub fn insert_resting(&mut self, order: Order) -> Result<(), BookError> {
        if self.index.contains_key(&order.id) {
            return Err(BookError::DuplicateOrder(order.id));
        }
        if order.state().is_terminal() {
            return Err(BookError::TerminalOrder(order.id, order.state()));
        }
        if !order.remaining_quantity().is_positive() {
            return Err(BookError::NothingToRest(order.id));
        }

        let (order_id, side, price) = (order.id, order.side, order.price);
        let key = self.orders.insert(OrderNode::new(order));
        self.index.insert(order_id, key);

        let book_side = match side {
            Side::Buy => &mut self.bids,
            Side::Sell => &mut self.asks,
        };
        book_side
            .levels
            .entry(price)
            .or_insert_with(|| PriceLevel::new(price))
            .push_back(key, &mut self.orders);
        Ok(())
    }

    /// Apply an execution of `consumed` against a resting order.
    ///
    /// Fully filled orders are removed, and so is their level if it empties.
    /// Consumed iceberg slices are replenished according to the refill
    /// policy.
    pub fn reduce_or_remove(
        &mut self,
        order_id: &OrderId,
        consumed: Quantity,
    ) -> Result<Reduction, BookError> {
        let key = *self
            .index
            .get(order_id)
            .ok_or(BookError::UnknownOrder(*order_id))?;

        let node = &mut self.orders[key];
        if consumed > node.displayed {
            return Err(BookError::ExceedsDisplayed {
                order_id: *order_id,
                consumed,
                displayed: node.displayed,
            });
        }
        node.order.fill(consumed)?;
        node.displayed = node.displayed.saturating_sub(consumed);

        let (side, price) = (node.order.side, node.order.price);
        let remaining = node.order.remaining_quantity();
        let slice_done = node.displayed.is_zero();

        let refill = self.iceberg_refill;
        let orders = &mut self.orders;
        let book_side = match side {
            Side::Buy => &mut self.bids,
            Side::Sell => &mut self.asks,
        };
        let Some(level) = book_side.levels.get_mut(&price) else {
            return Err(BookError::UnknownOrder(*order_id));
        };
        level.consume(consumed);

        if remaining.is_zero() {
            level.unlink(key, orders);
            if level.is_empty() {
                book_side.levels.remove(&price);
            }
            self.index.remove(order_id);
            return Ok(Reduction::Removed(self.orders.remove(key).order));
        }

        if !slice_done {
            return Ok(Reduction::Reduced { remaining });
        }

        let slice = OrderNode::slice_for(&orders[key].order);
        orders[key].displayed = slice;
        level.displayed_quantity = level.displayed_quantity.saturating_add(slice);
        if refill == IcebergRefill::LoseTimePriority {
            level.unlink(key, orders);
            level.push_back(key, orders);
        }
        Ok(Reduction::Replenished {
            displayed: slice,
            remaining,
        })
    }

    /// Take an order out of the book, returning it unchanged.
    pub fn remove(&mut self, order_id: &OrderId) -> Option<Order> {
        let key = self.index.remove(order_id)?;
        let (side, price) = {
            let order = &self.orders[key].order;
            (order.side, order.price)
        };

        let orders = &mut self.orders;
        let book_side = match side {
            Side::Buy => &mut self.bids,
            Side::Sell => &mut self.asks,
        };
        if let Some(level) = book_side.levels.get_mut(&price) {
            level.unlink(key, orders);
            if level.is_empty() {
                book_side.levels.remove(&price);
            }
        }
        Some(self.orders.remove(key).order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{OrderKind, TimeInForce};

    fn p(n: i64) -> Price {
        Price::from_integer(n).unwrap()
    }

    fn q(n: i64) -> Quantity {
        Quantity::from_integer(n).unwrap()
    }

    fn limit(side: Side, price: i64, qty: i64) -> Order {
        Order::limit("BTC-USD", "user", side, p(price), q(qty))
    }

    fn iceberg(side: Side, price: i64, qty: i64, display: i64) -> Order {
        Order::new(
            OrderId::new(),
            "BTC-USD",
            "whale",
            side,
            p(price),
            q(qty),
            TimeInForce::GoodTillCancel,
            OrderKind::Iceberg {
                display_quantity: q(display),
                post_only: false,
            },
        )
    }

    fn book() -> OrderBook {
        OrderBook::new("BTC-USD", IcebergRefill::LoseTimePriority)
    }

    #[test]
    fn test_best_prices() {
        let mut book = book();
        book.insert_resting(limit(Side::Buy, 50000, 1)).unwrap();
        book.insert_resting(limit(Side::Buy, 50100, 1)).unwrap();
        book.insert_resting(limit(Side::Sell, 50300, 1)).unwrap();
        book.insert_resting(limit(Side::Sell, 50200, 1)).unwrap();

        assert_eq!(book.best_bid(), Some(p(50100)));
        assert_eq!(book.best_ask(), Some(p(50200)));
        assert!(!book.is_crossed());
    }

    #[test]
    fn test_fifo_within_level() {
        let mut book = book();
        let first = limit(Side::Sell, 100, 1);
        let second = limit(Side::Sell, 100, 2);
        let ids = vec![first.id, second.id];
        book.insert_resting(first).unwrap();
        book.insert_resting(second).unwrap();

        assert_eq!(book.level_order_ids(Side::Sell, p(100)), ids);
        assert_eq!(book.best_maker(Side::Sell).unwrap().order.id, ids[0]);
        let level = book.side(Side::Sell).level(p(100)).unwrap();
        assert_eq!(level.order_count(), 2);
        assert_eq!(level.displayed_quantity(), q(3));
    }

    #[test]
    fn test_duplicate_insert_rejected() {
        let mut book = book();
        let order = limit(Side::Buy, 100, 1);
        book.insert_resting(order.clone()).unwrap();
        assert_eq!(
            book.insert_resting(order.clone()),
            Err(BookError::DuplicateOrder(order.id))
        );
        assert_eq!(book.order_count(), 1);
    }

    #[test]
    fn test_reduce_then_remove_drops_empty_level() {
        let mut book = book();
        let order = limit(Side::Sell, 100, 10);
        let id = order.id;
        book.insert_resting(order).unwrap();

        assert_eq!(
            book.reduce_or_remove(&id, q(4)).unwrap(),
            Reduction::Reduced { remaining: q(6) }
        );
        assert_eq!(book.snapshot(5).asks[0].quantity, q(6));

        match book.reduce_or_remove(&id, q(6)).unwrap() {
            Reduction::Removed(order) => {
                assert_eq!(order.state(), OrderState::Filled);
                assert_eq!(order.filled_quantity(), q(10));
            },
            other => panic!("expected removal, got {:?}", other),
        }
        assert!(book.side(Side::Sell).is_empty());
        assert!(!book.contains(&id));
    }

    #[test]
    fn test_remove_middle_of_queue() {
        let mut book = book();
        let orders: Vec<Order> = (0..3).map(|_| limit(Side::Buy, 100, 1)).collect();
        let ids: Vec<OrderId> = orders.iter().map(|o| o.id).collect();
        for order in orders {
            book.insert_resting(order).unwrap();
        }

        let removed = book.remove(&ids[1]).unwrap();
        assert_eq!(removed.id, ids[1]);
        assert_eq!(book.level_order_ids(Side::Buy, p(100)), vec![ids[0], ids[2]]);
        assert_eq!(book.snapshot(1).bids[0].quantity, q(2));
        assert!(book.remove(&ids[1]).is_none());
    }

    #[test]
    fn test_iceberg_shows_only_slice() {
        let mut book = book();
        book.insert_resting(iceberg(Side::Sell, 100, 10, 3)).unwrap();

        let level = book.side(Side::Sell).level(p(100)).unwrap();
        assert_eq!(level.displayed_quantity(), q(3));
        assert_eq!(level.total_quantity(), q(10));
        assert_eq!(book.snapshot(1).asks[0].quantity, q(3));
    }

    #[test]
    fn test_iceberg_refill_loses_priority() {
        let mut book = book();
        let ice = iceberg(Side::Sell, 100, 10, 3);
        let plain = limit(Side::Sell, 100, 5);
        let (ice_id, plain_id) = (ice.id, plain.id);
        book.insert_resting(ice).unwrap();
        book.insert_resting(plain).unwrap();

        assert_eq!(
            book.reduce_or_remove(&ice_id, q(3)).unwrap(),
            Reduction::Replenished {
                displayed: q(3),
                remaining: q(7)
            }
        );
        assert_eq!(book.level_order_ids(Side::Sell, p(100)), vec![plain_id, ice_id]);
        assert_eq!(book.snapshot(1).asks[0].quantity, q(8));
    }

    #[test]
    fn test_iceberg_refill_can_retain_priority() {
        let mut book = OrderBook::new("BTC-USD", IcebergRefill::RetainTimePriority);
        let ice = iceberg(Side::Buy, 100, 5, 2);
        let plain = limit(Side::Buy, 100, 1);
        let (ice_id, plain_id) = (ice.id, plain.id);
        book.insert_resting(ice).unwrap();
        book.insert_resting(plain).unwrap();

        book.reduce_or_remove(&ice_id, q(2)).unwrap();
        assert_eq!(book.level_order_ids(Side::Buy, p(100)), vec![ice_id, plain_id]);
        // last slice is smaller than the display size
        book.reduce_or_remove(&ice_id, q(2)).unwrap();
        assert_eq!(book.get(&ice_id).unwrap().displayed(), q(1));
    }

    #[test]
    fn test_consumption_bounded_by_slice() {
        let mut book = book();
        let ice = iceberg(Side::Sell, 100, 10, 3);
        let id = ice.id;
        book.insert_resting(ice).unwrap();

        assert!(matches!(
            book.reduce_or_remove(&id, q(4)),
            Err(BookError::ExceedsDisplayed { .. })
        ));
        assert_eq!(book.get(&id).unwrap().order.filled_quantity(), Quantity::ZERO);
    }

    #[test]
    fn test_crossing_liquidity_counts_hidden() {
        let mut book = book();
        book.insert_resting(iceberg(Side::Sell, 100, 10, 2)).unwrap();
        book.insert_resting(limit(Side::Sell, 101, 5)).unwrap();
        book.insert_resting(limit(Side::Sell, 105, 50)).unwrap();

        assert_eq!(book.crossing_liquidity(Side::Buy, p(101), q(100)), q(15));
        assert_eq!(book.crossing_liquidity(Side::Buy, p(99), q(1)), Quantity::ZERO);
        assert!(book.would_cross(Side::Buy, p(100)));
        assert!(!book.would_cross(Side::Sell, p(100)));
    }
}
