//! Integration tests for the full fulfillment pipeline.
//!
//! Tests: Receipt → Reserve → Order lifecycle → Consume → Maintenance sweep
//!
//! Verifies:
//! - FIFO cost basis survives the hold phase
//! - Reservations are all-or-nothing and never consumed twice
//! - Order transitions keep stock and status consistent
//! - The sweep is idempotent within a tick window and across days

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Barrier};
    use std::thread;
    use std::time::{Duration as StdDuration, Instant};

    use chrono::{DateTime, Duration, TimeZone, Utc};
    use proptest::prelude::*;
    use uuid::Uuid;

    use stockhold_core::{Clock, ManualClock, OrderId, ProductId};
    use stockhold_inventory::{InventoryError, ReservationStatus};
    use stockhold_orders::{Customer, NewOrderLine, OrderError, OrderStatus, PaymentProof};

    use crate::audit::InMemoryAuditLog;
    use crate::catalog::InMemoryProductCatalog;
    use crate::config::EngineConfig;
    use crate::coordinator::StockRequirement;
    use crate::engine::{EngineParts, InMemoryEngine};
    use crate::lifecycle::LifecycleError;
    use crate::notify::InMemoryNotificationSink;
    use crate::store::{InMemoryInventoryStore, InMemoryMaintenanceStateStore, InMemoryOrderStore};

    struct Harness {
        engine: InMemoryEngine<Arc<ManualClock>>,
        clock: Arc<ManualClock>,
        notifier: Arc<InMemoryNotificationSink>,
        audit: Arc<InMemoryAuditLog>,
        catalog: Arc<InMemoryProductCatalog>,
    }

    /// 2024-03-01 10:00 UTC: before the reminder and escalation hours.
    fn morning() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap()
    }

    fn setup() -> Harness {
        setup_with(EngineConfig::default())
    }

    fn setup_with(config: EngineConfig) -> Harness {
        let clock = Arc::new(ManualClock::new(morning()));
        let notifier = Arc::new(InMemoryNotificationSink::new());
        let audit = Arc::new(InMemoryAuditLog::new());
        let catalog = Arc::new(InMemoryProductCatalog::new());

        let parts = EngineParts {
            inventory: Arc::new(InMemoryInventoryStore::new()),
            orders: Arc::new(InMemoryOrderStore::new()),
            maintenance: Arc::new(InMemoryMaintenanceStateStore::new()),
            clock: clock.clone(),
            notifier: notifier.clone(),
            audit: audit.clone(),
            catalog: catalog.clone(),
        };
        let engine = InMemoryEngine::new(config, parts).unwrap();

        Harness {
            engine,
            clock,
            notifier,
            audit,
            catalog,
        }
    }

    fn customer(name: &str) -> Customer {
        Customer {
            name: name.to_string(),
            contact: Some("+1 555 0100".to_string()),
        }
    }

    fn line(product_id: ProductId, quantity: i64, unit_price: i64) -> NewOrderLine {
        NewOrderLine {
            product_id,
            quantity,
            unit_price,
        }
    }

    impl Harness {
        /// Batch A {10 @ 2} at t0, batch B {10 @ 3} one minute later.
        fn stock_two_batches(&self) -> ProductId {
            let product = ProductId::new();
            self.engine.record_receipt(product, 10, 2).unwrap();
            self.clock.advance(Duration::minutes(1));
            self.engine.record_receipt(product, 10, 3).unwrap();
            product
        }

        fn submitted_order(&self, product: ProductId, quantity: i64) -> OrderId {
            let order = self
                .engine
                .place_order(customer("Ada"), vec![line(product, quantity, 5)])
                .unwrap();
            let order_id = order.id_typed();
            self.engine.open_checkout(order_id).unwrap();
            self.engine.submit_payment_proof(order_id, "receipt-001.png").unwrap();
            order_id
        }

        fn status(&self, order_id: OrderId) -> OrderStatus {
            self.engine.order(order_id).unwrap().unwrap().status()
        }

        fn messages_containing(&self, needle: &str) -> Vec<String> {
            self.notifier
                .messages()
                .into_iter()
                .filter(|m| m.contains(needle))
                .collect()
        }
    }

    mod reservations {
        use super::*;

        #[test]
        fn fifo_cost_split_across_batches() {
            let h = setup();
            let product = h.stock_two_batches();
            let order_id = OrderId::new();

            h.engine
                .reserve(order_id, &[StockRequirement::new(product, 15)], Duration::minutes(15))
                .unwrap();
            assert_eq!(h.engine.available_quantity(product).unwrap(), 5);

            let consumed = h.engine.consume(order_id).unwrap();
            assert_eq!(consumed.len(), 1);
            assert_eq!(consumed[0].quantity, 15);
            assert_eq!(consumed[0].line_cost, 10 * 2 + 5 * 3);
            assert_eq!(consumed[0].unit_cost, 2);

            assert_eq!(h.engine.available_quantity(product).unwrap(), 5);
            let batches = h.engine.batches(product).unwrap();
            assert_eq!(batches[0].remaining_quantity(), 0);
            assert_eq!(batches[1].remaining_quantity(), 5);
            assert!(batches.iter().all(|b| b.reserved_quantity() == 0));
        }

        #[test]
        fn second_consume_is_rejected_and_changes_nothing() {
            let h = setup();
            let product = h.stock_two_batches();
            let order_id = OrderId::new();
            h.engine
                .reserve(order_id, &[StockRequirement::new(product, 4)], Duration::minutes(15))
                .unwrap();
            h.engine.consume(order_id).unwrap();
            let before = h.engine.batches(product).unwrap();

            let err = h.engine.consume(order_id).unwrap_err();
            assert_eq!(err, InventoryError::DoubleConsumption(order_id));
            assert_eq!(h.engine.batches(product).unwrap(), before);
        }

        #[test]
        fn reserve_then_release_restores_availability() {
            let h = setup();
            let product = h.stock_two_batches();
            let order_id = OrderId::new();

            h.engine
                .reserve(order_id, &[StockRequirement::new(product, 12)], Duration::minutes(15))
                .unwrap();
            assert_eq!(h.engine.available_quantity(product).unwrap(), 8);

            assert_eq!(h.engine.release(order_id).unwrap(), 1);
            assert_eq!(h.engine.available_quantity(product).unwrap(), 20);
            assert_eq!(h.engine.release(order_id).unwrap(), 0);

            let rows = h.engine.reservations(order_id).unwrap();
            assert_eq!(rows[0].status(), ReservationStatus::Released);
        }

        #[test]
        fn shortfall_on_one_product_reserves_nothing() {
            let h = setup();
            let plenty = h.stock_two_batches();
            let scarce = ProductId::new();
            h.engine.record_receipt(scarce, 2, 7).unwrap();
            let order_id = OrderId::new();

            let err = h
                .engine
                .reserve(
                    order_id,
                    &[StockRequirement::new(plenty, 5), StockRequirement::new(scarce, 3)],
                    Duration::minutes(15),
                )
                .unwrap_err();

            assert_eq!(
                err,
                InventoryError::InsufficientStock {
                    product_id: scarce,
                    requested: 3,
                    available: 2,
                }
            );
            assert_eq!(h.engine.available_quantity(plenty).unwrap(), 20);
            assert_eq!(h.engine.available_quantity(scarce).unwrap(), 2);
            assert!(h.engine.reservations(order_id).unwrap().is_empty());
        }

        #[test]
        fn reserving_again_only_extends_the_deadline() {
            let h = setup();
            let product = h.stock_two_batches();
            let order_id = OrderId::new();
            let req = [StockRequirement::new(product, 6)];

            let first = h.engine.reserve(order_id, &req, Duration::minutes(15)).unwrap();
            h.clock.advance(Duration::minutes(5));
            let second = h.engine.reserve(order_id, &req, Duration::minutes(15)).unwrap();

            assert_eq!(second - first, Duration::minutes(5));
            assert_eq!(h.engine.available_quantity(product).unwrap(), 14);
            assert_eq!(h.engine.reservations(order_id).unwrap().len(), 1);
        }

        #[test]
        fn consume_without_reservation_is_not_found() {
            let h = setup();
            let order_id = OrderId::new();
            assert_eq!(
                h.engine.consume(order_id).unwrap_err(),
                InventoryError::ReservationNotFound(order_id)
            );
        }

        #[test]
        fn consumed_reservations_cannot_be_reopened() {
            let h = setup();
            let product = h.stock_two_batches();
            let order_id = OrderId::new();
            let req = [StockRequirement::new(product, 3)];
            h.engine.reserve(order_id, &req, Duration::minutes(15)).unwrap();
            h.engine.consume(order_id).unwrap();

            let err = h.engine.reserve(order_id, &req, Duration::minutes(15)).unwrap_err();
            assert_eq!(err, InventoryError::ReservationClosed(order_id));
        }

        #[test]
        fn direct_consume_skips_held_units() {
            let h = setup();
            let product = h.stock_two_batches();
            let holder = OrderId::new();
            h.engine
                .reserve(holder, &[StockRequirement::new(product, 10)], Duration::minutes(15))
                .unwrap();

            let lines = h.engine.consume_direct(&[StockRequirement::new(product, 4)]).unwrap();
            // Batch A is fully held, so the sale is priced from batch B.
            assert_eq!(lines[0].line_cost, 12);

            let err = h.engine.consume_direct(&[StockRequirement::new(product, 7)]).unwrap_err();
            assert!(matches!(err, InventoryError::InsufficientStock { available: 6, .. }));
        }

        #[test]
        fn receipts_are_audited() {
            let h = setup();
            let product = h.stock_two_batches();
            let entries = h.audit.entries_of_type("inventory.batch.received");
            assert_eq!(entries.len(), 2);
            assert!(entries.iter().all(|e| e.stream_id == Uuid::from(product)));
        }

        #[test]
        fn concurrent_reservations_never_oversell() {
            const WORKERS: usize = 16;
            // A lost commit means another worker's hold landed, and only ten can
            // land, so this many attempts always reach a verdict.
            let h = Arc::new(setup_with(EngineConfig {
                commit_retries: WORKERS as u32,
                ..EngineConfig::default()
            }));
            let product = ProductId::new();
            h.engine.record_receipt(product, 10, 1).unwrap();

            let start = Arc::new(Barrier::new(WORKERS));
            let workers: Vec<_> = (0..WORKERS)
                .map(|_| {
                    let h = h.clone();
                    let start = start.clone();
                    thread::spawn(move || {
                        start.wait();
                        h.engine.reserve(
                            OrderId::new(),
                            &[StockRequirement::new(product, 1)],
                            Duration::minutes(15),
                        )
                    })
                })
                .collect();

            let mut reserved = 0;
            let mut refused = 0;
            for worker in workers {
                match worker.join().unwrap() {
                    Ok(_) => reserved += 1,
                    Err(InventoryError::InsufficientStock { .. }) => refused += 1,
                    Err(other) => panic!("unexpected error: {other:?}"),
                }
            }

            assert_eq!(reserved, 10);
            assert_eq!(refused, WORKERS - 10);
            assert_eq!(h.engine.available_quantity(product).unwrap(), 0);
            let levels = h.engine.stock_levels().unwrap();
            assert_eq!(levels[0].reserved, 10);
            assert_eq!(levels[0].on_hand, 10);
        }

        #[test]
        fn receipts_past_i64_are_refused() {
            let h = setup();
            let product = ProductId::new();
            h.engine.record_receipt(product, i64::MAX, 0).unwrap();

            let err = h.engine.record_receipt(product, 1, 0).unwrap_err();
            assert!(matches!(err, InventoryError::InvalidQuantity(_)));
            assert_eq!(h.engine.batches(product).unwrap().len(), 1);
            assert_eq!(h.engine.available_quantity(product).unwrap(), i64::MAX);
            assert_eq!(h.engine.stock_levels().unwrap()[0].on_hand, i64::MAX);

            let report = h.engine.run_maintenance_tick();
            assert!(report.is_clean());
            assert!(report.low_stock_alerts.is_empty());
        }

        #[test]
        fn direct_sale_cost_past_i64_is_refused() {
            let h = setup();
            let product = ProductId::new();
            h.engine.record_receipt(product, 2, i64::MAX / 2).unwrap();
            h.clock.advance(Duration::minutes(1));
            h.engine.record_receipt(product, 2, i64::MAX / 2).unwrap();

            let err = h.engine.consume_direct(&[StockRequirement::new(product, 4)]).unwrap_err();
            assert!(matches!(err, InventoryError::InvalidQuantity(_)));
            assert_eq!(h.engine.available_quantity(product).unwrap(), 4);
        }

        #[derive(Debug, Clone)]
        enum Step {
            Reserve(usize, i64),
            Release(usize),
            Consume(usize),
        }

        fn step() -> impl Strategy<Value = Step> {
            prop_oneof![
                (0usize..4, 1i64..8).prop_map(|(o, q)| Step::Reserve(o, q)),
                (0usize..4).prop_map(Step::Release),
                (0usize..4).prop_map(Step::Consume),
            ]
        }

        proptest! {
            #![proptest_config(ProptestConfig {
                cases: 256,
                ..ProptestConfig::default()
            })]

            /// Property: any interleaving of reserve/release/consume keeps every
            /// batch within `0 <= reserved <= remaining <= original`, and
            /// on-hand stock equals received minus consumed.
            #[test]
            fn ledger_stays_consistent(steps in prop::collection::vec(step(), 0..30)) {
                let h = setup();
                let product = h.stock_two_batches();
                let orders: Vec<OrderId> = (0..4).map(|_| OrderId::new()).collect();
                let mut consumed = 0;

                for step in steps {
                    match step {
                        Step::Reserve(o, q) => {
                            let _ = h.engine.reserve(orders[o], &[StockRequirement::new(product, q)], Duration::minutes(15));
                        }
                        Step::Release(o) => {
                            let _ = h.engine.release(orders[o]);
                        }
                        Step::Consume(o) => {
                            if let Ok(lines) = h.engine.consume(orders[o]) {
                                consumed += lines.iter().map(|l| l.quantity).sum::<i64>();
                            }
                        }
                    }
                }

                let batches = h.engine.batches(product).unwrap();
                for batch in &batches {
                    prop_assert!(batch.check_invariants().is_ok());
                }
                let on_hand: i64 = batches.iter().map(|b| b.remaining_quantity()).sum();
                prop_assert_eq!(on_hand, 20 - consumed);
            }
        }
    }

    mod lifecycle {
        use super::*;

        #[test]
        fn online_order_runs_from_placement_to_approval() {
            let h = setup();
            let product = h.stock_two_batches();

            let order = h
                .engine
                .place_order(customer("Ada"), vec![line(product, 15, 5)])
                .unwrap();
            let order_id = order.id_typed();
            assert_eq!(order.status(), OrderStatus::Created);
            assert_eq!(order.order_number(), "ORD-20240301-0001");
            assert!(order.tracking_code().starts_with("TRK-"));
            assert_eq!(order.total_amount(), 75);
            assert_eq!(h.engine.available_quantity(product).unwrap(), 20);

            let order = h.engine.open_checkout(order_id).unwrap();
            assert_eq!(order.status(), OrderStatus::AwaitingPayment);
            assert_eq!(
                order.reservation_expires_at(),
                Some(h.clock.now() + Duration::seconds(900))
            );
            assert_eq!(h.engine.available_quantity(product).unwrap(), 5);

            let order = h.engine.submit_payment_proof(order_id, "receipt-001.png").unwrap();
            assert_eq!(order.status(), OrderStatus::PaymentSubmitted);
            assert_eq!(
                order.payment_proof(),
                Some(&PaymentProof::Manual {
                    reference: "receipt-001.png".to_string()
                })
            );

            let order = h.engine.approve(order_id).unwrap();
            assert_eq!(order.status(), OrderStatus::Approved);
            assert_eq!(order.total_cost(), Some(35));
            assert_eq!(order.total_profit(), Some(40));
            assert_eq!(order.lines()[0].allocated_cost, Some(35));
            assert_eq!(order.reservation_expires_at(), None);

            let found = h.engine.order_by_tracking_code(order.tracking_code()).unwrap();
            assert_eq!(found.map(|o| o.id_typed()), Some(order_id));
            assert_eq!(h.engine.orders_in(OrderStatus::Approved).unwrap().len(), 1);
        }

        #[test]
        fn order_numbers_count_up_per_day() {
            let h = setup();
            let product = h.stock_two_batches();
            let first = h.engine.place_order(customer("A"), vec![line(product, 1, 5)]).unwrap();
            let second = h.engine.place_order(customer("B"), vec![line(product, 1, 5)]).unwrap();
            h.clock.advance(Duration::days(1));
            let next_day = h.engine.place_order(customer("C"), vec![line(product, 1, 5)]).unwrap();

            assert_eq!(first.order_number(), "ORD-20240301-0001");
            assert_eq!(second.order_number(), "ORD-20240301-0002");
            assert_eq!(next_day.order_number(), "ORD-20240302-0001");
        }

        #[test]
        fn checkout_without_stock_leaves_order_created() {
            let h = setup();
            let product = h.stock_two_batches();
            let order = h
                .engine
                .place_order(customer("Ada"), vec![line(product, 25, 5)])
                .unwrap();

            let err = h.engine.open_checkout(order.id_typed()).unwrap_err();
            assert!(matches!(
                err,
                LifecycleError::Inventory(InventoryError::InsufficientStock { .. })
            ));
            assert_eq!(h.status(order.id_typed()), OrderStatus::Created);
            assert_eq!(h.engine.available_quantity(product).unwrap(), 20);
        }

        #[test]
        fn rejection_returns_held_stock() {
            let h = setup();
            let product = h.stock_two_batches();
            let order_id = h.submitted_order(product, 8);
            assert_eq!(h.engine.available_quantity(product).unwrap(), 12);

            let order = h.engine.reject(order_id, "transfer not received").unwrap();
            assert_eq!(order.status(), OrderStatus::Rejected);
            assert_eq!(order.rejection_reason(), Some("transfer not received"));
            assert_eq!(h.engine.available_quantity(product).unwrap(), 20);
        }

        #[test]
        fn terminal_orders_refuse_every_transition() {
            let h = setup();
            let product = h.stock_two_batches();
            let order_id = h.submitted_order(product, 2);
            h.engine.approve(order_id).unwrap();

            assert!(h.engine.approve(order_id).unwrap_err().is_invalid_transition());
            assert!(h.engine.reject(order_id, "late").unwrap_err().is_invalid_transition());
            assert!(h.engine.open_checkout(order_id).unwrap_err().is_invalid_transition());
            assert!(h.engine.submit_payment_proof(order_id, "again").unwrap_err().is_invalid_transition());
            assert_eq!(h.status(order_id), OrderStatus::Approved);
            assert_eq!(h.engine.available_quantity(product).unwrap(), 18);
        }

        #[test]
        fn approve_requires_submitted_payment() {
            let h = setup();
            let product = h.stock_two_batches();
            let order = h.engine.place_order(customer("Ada"), vec![line(product, 2, 5)]).unwrap();
            let order_id = order.id_typed();

            assert!(h.engine.approve(order_id).unwrap_err().is_invalid_transition());
            assert!(h.engine.reject(order_id, "no").unwrap_err().is_invalid_transition());

            h.engine.open_checkout(order_id).unwrap();
            assert!(h.engine.approve(order_id).unwrap_err().is_invalid_transition());
            // The failed approval left the hold alone.
            assert_eq!(h.engine.available_quantity(product).unwrap(), 18);
        }

        #[test]
        fn proof_after_the_window_is_refused() {
            let h = setup();
            let product = h.stock_two_batches();
            let order = h.engine.place_order(customer("Ada"), vec![line(product, 2, 5)]).unwrap();
            let order_id = order.id_typed();
            h.engine.open_checkout(order_id).unwrap();

            h.clock.advance(Duration::seconds(901));
            let err = h.engine.submit_payment_proof(order_id, "late.png").unwrap_err();
            assert!(matches!(err, LifecycleError::Order(OrderError::ReservationExpired { .. })));
            assert_eq!(h.status(order_id), OrderStatus::AwaitingPayment);
        }

        #[test]
        fn unknown_order_is_reported() {
            let h = setup();
            let order_id = OrderId::new();
            assert_eq!(
                h.engine.open_checkout(order_id).unwrap_err(),
                LifecycleError::OrderNotFound(order_id)
            );
        }

        #[test]
        fn submitted_proof_notifies_reviewers() {
            let h = setup();
            let product = h.stock_two_batches();
            h.submitted_order(product, 2);

            let pings = h.messages_containing("Payment proof submitted");
            assert_eq!(pings.len(), 1);
            assert!(pings[0].contains("ORD-20240301-0001"));
            assert!(pings[0].contains("Ada"));
        }

        #[test]
        fn point_of_sale_is_approved_immediately() {
            let h = setup();
            let product = h.stock_two_batches();

            let order = h
                .engine
                .sell_direct(customer("Walk-in"), vec![line(product, 12, 4)])
                .unwrap();
            assert_eq!(order.status(), OrderStatus::Approved);
            assert_eq!(order.payment_proof(), Some(&PaymentProof::PointOfSale));
            assert_eq!(order.total_cost(), Some(10 * 2 + 2 * 3));
            assert_eq!(order.total_profit(), Some(48 - 26));
            assert_eq!(h.engine.available_quantity(product).unwrap(), 8);
            assert!(h.engine.reservations(order.id_typed()).unwrap().is_empty());
        }

        #[test]
        fn point_of_sale_without_stock_records_nothing() {
            let h = setup();
            let product = h.stock_two_batches();

            let err = h
                .engine
                .sell_direct(customer("Walk-in"), vec![line(product, 21, 4)])
                .unwrap_err();
            assert!(matches!(
                err,
                LifecycleError::Inventory(InventoryError::InsufficientStock { .. })
            ));
            assert!(h.engine.orders_in(OrderStatus::Approved).unwrap().is_empty());
            assert_eq!(h.engine.available_quantity(product).unwrap(), 20);
        }

        #[test]
        fn approval_race_has_a_single_winner() {
            let h = Arc::new(setup());
            let product = h.stock_two_batches();
            let order_id = h.submitted_order(product, 5);

            let approver = {
                let h = h.clone();
                thread::spawn(move || h.engine.approve(order_id))
            };
            let rejecter = {
                let h = h.clone();
                thread::spawn(move || h.engine.reject(order_id, "duplicate"))
            };
            let approved = approver.join().unwrap();
            let rejected = rejecter.join().unwrap();

            assert!(approved.is_ok() != rejected.is_ok());
            match h.status(order_id) {
                OrderStatus::Approved => assert_eq!(h.engine.available_quantity(product).unwrap(), 15),
                OrderStatus::Rejected => assert_eq!(h.engine.available_quantity(product).unwrap(), 20),
                other => panic!("unexpected status {other}"),
            }
        }

        #[test]
        fn every_committed_transition_is_audited() {
            let h = setup();
            let product = h.stock_two_batches();
            let order_id = h.submitted_order(product, 3);
            h.engine.approve(order_id).unwrap();

            let types: Vec<String> = h
                .audit
                .for_stream(Uuid::from(order_id))
                .into_iter()
                .map(|e| e.event_type)
                .collect();
            assert_eq!(
                types,
                vec![
                    "orders.order.placed",
                    "inventory.stock.reserved",
                    "orders.order.checkout_opened",
                    "orders.order.payment_submitted",
                    "inventory.stock.consumed",
                    "orders.order.approved",
                ]
            );
        }
    }

    mod recovery {
        use super::*;
        use std::sync::atomic::{AtomicBool, Ordering};

        use chrono::NaiveDate;
        use stockhold_core::ExpectedVersion;
        use stockhold_orders::Order;

        use crate::engine::FulfillmentEngine;
        use crate::store::{OrderStore, StoreError};

        /// Order table whose next write can be made to fail once.
        #[derive(Default)]
        struct FlakyOrderStore {
            inner: InMemoryOrderStore,
            fail_next_write: AtomicBool,
        }

        impl OrderStore for FlakyOrderStore {
            fn get(&self, order_id: OrderId) -> Result<Option<Order>, StoreError> {
                self.inner.get(order_id)
            }

            fn find_by_tracking_code(&self, tracking_code: &str) -> Result<Option<Order>, StoreError> {
                self.inner.find_by_tracking_code(tracking_code)
            }

            fn compare_and_set(&self, order: Order, expected: ExpectedVersion) -> Result<Order, StoreError> {
                if self.fail_next_write.swap(false, Ordering::SeqCst) {
                    return Err(StoreError::Storage("disk full".to_string()));
                }
                self.inner.compare_and_set(order, expected)
            }

            fn list_by_status(&self, status: OrderStatus) -> Result<Vec<Order>, StoreError> {
                self.inner.list_by_status(status)
            }

            fn next_order_number(&self, date: NaiveDate) -> Result<String, StoreError> {
                self.inner.next_order_number(date)
            }
        }

        #[test]
        fn approval_retry_reuses_stock_consumed_by_a_failed_attempt() {
            let clock = Arc::new(ManualClock::new(morning()));
            let orders = Arc::new(FlakyOrderStore::default());
            let audit = Arc::new(InMemoryAuditLog::new());
            let engine = FulfillmentEngine::new(
                EngineConfig::default(),
                EngineParts {
                    inventory: Arc::new(InMemoryInventoryStore::new()),
                    orders: orders.clone(),
                    maintenance: Arc::new(InMemoryMaintenanceStateStore::new()),
                    clock: clock.clone(),
                    notifier: Arc::new(InMemoryNotificationSink::new()),
                    audit: audit.clone(),
                    catalog: Arc::new(InMemoryProductCatalog::new()),
                },
            )
            .unwrap();

            let product = ProductId::new();
            engine.record_receipt(product, 10, 2).unwrap();
            clock.advance(Duration::minutes(1));
            engine.record_receipt(product, 10, 3).unwrap();

            let order_id = engine
                .place_order(customer("Ada"), vec![line(product, 15, 5)])
                .unwrap()
                .id_typed();
            engine.open_checkout(order_id).unwrap();
            engine.submit_payment_proof(order_id, "receipt-001.png").unwrap();

            orders.fail_next_write.store(true, Ordering::SeqCst);
            let err = engine.approve(order_id).unwrap_err();
            assert!(matches!(err, LifecycleError::Store(StoreError::Storage(_))));
            assert_eq!(
                engine.order(order_id).unwrap().unwrap().status(),
                OrderStatus::PaymentSubmitted
            );
            assert_eq!(engine.available_quantity(product).unwrap(), 5);

            let order = engine.approve(order_id).unwrap();
            assert_eq!(order.status(), OrderStatus::Approved);
            assert_eq!(order.total_cost(), Some(35));
            assert_eq!(order.total_profit(), Some(40));
            assert_eq!(engine.available_quantity(product).unwrap(), 5);
            let on_hand: i64 = engine.batches(product).unwrap().iter().map(|b| b.remaining_quantity()).sum();
            assert_eq!(on_hand, 5);
            assert_eq!(audit.entries_of_type("inventory.stock.consumed").len(), 1);
        }

        #[test]
        fn approval_without_consumed_stock_still_consumes() {
            let h = setup();
            let product = h.stock_two_batches();
            let order_id = h.submitted_order(product, 4);

            assert_eq!(h.engine.approve(order_id).unwrap().total_cost(), Some(8));
            assert_eq!(h.engine.available_quantity(product).unwrap(), 16);
        }
    }

    mod maintenance {
        use super::*;

        #[test]
        fn expired_checkout_is_swept_exactly_once() {
            let h = setup();
            let product = h.stock_two_batches();
            let order = h.engine.place_order(customer("Ada"), vec![line(product, 6, 5)]).unwrap();
            let order_id = order.id_typed();
            h.engine.open_checkout(order_id).unwrap();

            h.clock.advance(Duration::seconds(901));
            let first = h.engine.run_maintenance_tick();
            let second = h.engine.run_maintenance_tick();

            assert_eq!(first.expired, vec![order_id]);
            assert!(second.expired.is_empty());
            assert!(first.is_clean() && second.is_clean());
            assert_eq!(h.status(order_id), OrderStatus::Expired);
            assert_eq!(h.engine.available_quantity(product).unwrap(), 20);
            assert_eq!(h.audit.entries_of_type("orders.order.expired").len(), 1);
        }

        #[test]
        fn open_checkouts_inside_the_window_are_kept() {
            let h = setup();
            let product = h.stock_two_batches();
            let order = h.engine.place_order(customer("Ada"), vec![line(product, 6, 5)]).unwrap();
            h.engine.open_checkout(order.id_typed()).unwrap();

            h.clock.advance(Duration::seconds(899));
            assert!(h.engine.run_maintenance_tick().expired.is_empty());
            assert_eq!(h.status(order.id_typed()), OrderStatus::AwaitingPayment);
        }

        #[test]
        fn holds_without_a_live_order_are_released() {
            let h = setup();
            let product = h.stock_two_batches();
            let orphan = OrderId::new();
            h.engine
                .reserve(orphan, &[StockRequirement::new(product, 7)], Duration::minutes(15))
                .unwrap();

            h.clock.advance(Duration::minutes(16));
            let report = h.engine.run_maintenance_tick();
            assert_eq!(report.released_stale, vec![orphan]);
            assert_eq!(h.engine.available_quantity(product).unwrap(), 20);
        }

        #[test]
        fn escalation_runs_once_per_local_day() {
            let h = setup();
            let product = h.stock_two_batches();
            let early = h.submitted_order(product, 1);

            h.clock.set(Utc.with_ymd_and_hms(2024, 3, 1, 21, 0, 0).unwrap());
            let report = h.engine.run_maintenance_tick();
            assert_eq!(report.escalated, vec![early]);
            assert_eq!(h.status(early), OrderStatus::NeedsManualReview);

            h.clock.advance(Duration::minutes(30));
            let late = h.submitted_order(product, 1);
            assert!(h.engine.run_maintenance_tick().escalated.is_empty());
            assert_eq!(h.status(late), OrderStatus::PaymentSubmitted);

            h.clock.set(Utc.with_ymd_and_hms(2024, 3, 2, 21, 5, 0).unwrap());
            assert_eq!(h.engine.run_maintenance_tick().escalated, vec![late]);
        }

        #[test]
        fn escalation_waits_for_the_configured_hour() {
            let h = setup();
            let product = h.stock_two_batches();
            let order_id = h.submitted_order(product, 1);

            h.clock.set(Utc.with_ymd_and_hms(2024, 3, 1, 20, 59, 0).unwrap());
            assert!(h.engine.run_maintenance_tick().escalated.is_empty());
            assert_eq!(h.status(order_id), OrderStatus::PaymentSubmitted);
        }

        #[test]
        fn escalation_hour_follows_the_local_offset() {
            let h = setup_with(EngineConfig {
                utc_offset_minutes: 180,
                ..EngineConfig::default()
            });
            let product = h.stock_two_batches();
            let order_id = h.submitted_order(product, 1);

            // 18:00 UTC is 21:00 at UTC+3.
            h.clock.set(Utc.with_ymd_and_hms(2024, 3, 1, 18, 0, 0).unwrap());
            assert_eq!(h.engine.run_maintenance_tick().escalated, vec![order_id]);
        }

        #[test]
        fn reviewers_get_one_digest_per_day() {
            let h = setup();
            let product = h.stock_two_batches();
            let order_id = h.submitted_order(product, 1);

            h.clock.set(Utc.with_ymd_and_hms(2024, 3, 1, 20, 0, 0).unwrap());
            let report = h.engine.run_maintenance_tick();
            assert_eq!(report.reminded, vec![order_id]);

            h.clock.advance(Duration::minutes(10));
            assert!(h.engine.run_maintenance_tick().reminded.is_empty());

            let digests = h.messages_containing("awaiting payment review");
            assert_eq!(digests.len(), 1);
            assert!(digests[0].contains("ORD-20240301-0001"));
            assert_eq!(
                h.engine.order(order_id).unwrap().unwrap().reminded_on(),
                Some(chrono::NaiveDate::from_ymd_opt(2024, 3, 1).unwrap())
            );
        }

        #[test]
        fn low_stock_alerts_respect_the_cooldown() {
            let h = setup();
            let product = ProductId::new();
            h.catalog.insert(product, "Blue mug");
            h.engine.record_receipt(product, 3, 120).unwrap();

            assert_eq!(h.engine.run_maintenance_tick().low_stock_alerts, vec![product]);
            h.clock.advance(Duration::minutes(10));
            assert!(h.engine.run_maintenance_tick().low_stock_alerts.is_empty());
            h.clock.advance(Duration::minutes(21));
            assert_eq!(h.engine.run_maintenance_tick().low_stock_alerts, vec![product]);

            let alerts = h.messages_containing("Low stock: Blue mug");
            assert_eq!(alerts.len(), 2);
            assert!(alerts[0].contains("3 unit(s)"));
        }

        #[test]
        fn well_stocked_products_are_quiet() {
            let h = setup();
            h.stock_two_batches();
            assert!(h.engine.run_maintenance_tick().low_stock_alerts.is_empty());
        }

        #[test]
        fn background_runner_ticks_on_trigger() {
            let h = setup();
            let product = h.stock_two_batches();
            let order = h.engine.place_order(customer("Ada"), vec![line(product, 2, 5)]).unwrap();
            h.engine.open_checkout(order.id_typed()).unwrap();
            h.clock.advance(Duration::seconds(901));

            let handle = h.engine.spawn_maintenance().unwrap();
            handle.trigger();

            let deadline = Instant::now() + StdDuration::from_secs(5);
            while handle.stats().orders_expired == 0 && Instant::now() < deadline {
                thread::sleep(StdDuration::from_millis(10));
            }
            let stats = handle.stats();
            handle.shutdown();

            assert!(stats.ticks_run >= 1);
            assert_eq!(stats.orders_expired, 1);
            assert_eq!(h.status(order.id_typed()), OrderStatus::Expired);
        }
    }
}
