//! Property-based tests for the pure parts of checkout and payment handling.

use assert_matches::assert_matches;
use chrono::{TimeZone, Utc};
use pantry_api::entities::order::{self, FulfillmentStatus, OrderLines, PaymentStatus};
use pantry_api::payments::{
    compute_signature, from_minor_units, to_minor_units, SignatureError, WebhookVerifier,
};
use pantry_api::services::catalog::ProductSnapshot;
use pantry_api::services::order_builder::{
    compute_totals, merge_duplicate_lines, price_lines, RequestedLine,
};
use pantry_api::services::order_state::{
    apply_patch, check_manual_transition, plan_payment_transition, PaymentOutcome, TransitionPlan,
};
use proptest::prelude::*;
use rust_decimal::Decimal;
use std::collections::HashMap;
use uuid::Uuid;

fn product_pool() -> Vec<Uuid> {
    (1..=5u128).map(Uuid::from_u128).collect()
}

fn requested_lines_strategy() -> impl Strategy<Value = Vec<RequestedLine>> {
    prop::collection::vec((0usize..5, 1i32..=999), 1..20).prop_map(|picks| {
        let pool = product_pool();
        picks
            .into_iter()
            .map(|(idx, quantity)| RequestedLine {
                product_id: pool[idx],
                quantity,
            })
            .collect()
    })
}

fn cents_strategy() -> impl Strategy<Value = Decimal> {
    (0i64..100_000).prop_map(|cents| Decimal::new(cents, 2))
}

fn snapshot_strategy() -> impl Strategy<Value = (ProductSnapshot, i32)> {
    (
        cents_strategy(),
        prop::option::of(cents_strategy()),
        any::<bool>(),
        1i32..=999,
    )
        .prop_map(|(price, discount_price, is_on_sale, quantity)| {
            (
                ProductSnapshot {
                    id: Uuid::new_v4(),
                    name: "Item".to_string(),
                    price,
                    discount_price,
                    is_on_sale,
                    stock_quantity: 1_000,
                },
                quantity,
            )
        })
}

fn payment_status_strategy() -> impl Strategy<Value = PaymentStatus> {
    prop_oneof![
        Just(PaymentStatus::Pending),
        Just(PaymentStatus::Processing),
        Just(PaymentStatus::Succeeded),
        Just(PaymentStatus::Failed),
        Just(PaymentStatus::Refunded),
    ]
}

fn fulfillment_status_strategy() -> impl Strategy<Value = FulfillmentStatus> {
    prop_oneof![
        Just(FulfillmentStatus::Pending),
        Just(FulfillmentStatus::Processing),
        Just(FulfillmentStatus::Shipped),
        Just(FulfillmentStatus::Delivered),
        Just(FulfillmentStatus::Cancelled),
        Just(FulfillmentStatus::PaymentFailed),
        Just(FulfillmentStatus::Refunded),
    ]
}

fn outcome_strategy() -> impl Strategy<Value = PaymentOutcome> {
    prop_oneof![
        "pi_[a-z0-9]{4}".prop_map(|id| PaymentOutcome::Succeeded {
            payment_intent_id: id
        }),
        "pi_[a-z0-9]{4}".prop_map(|id| PaymentOutcome::Processing {
            payment_intent_id: id
        }),
        ("pi_[a-z0-9]{4}", prop::option::of("[a-z ]{0,12}")).prop_map(|(id, message)| {
            PaymentOutcome::Failed {
                payment_intent_id: id,
                message,
            }
        }),
        ("re_[a-z0-9]{4}", cents_strategy())
            .prop_map(|(refund_id, amount)| PaymentOutcome::Refunded { refund_id, amount }),
    ]
}

fn order_in(status: FulfillmentStatus, payment_status: PaymentStatus) -> order::Model {
    let created = Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap();
    order::Model {
        id: Uuid::new_v4(),
        user_id: Uuid::new_v4(),
        cart_id: None,
        line_items: OrderLines(Vec::new()),
        subtotal: Decimal::new(600, 2),
        tax: Decimal::new(50, 2),
        total: Decimal::new(650, 2),
        currency: "usd".to_string(),
        status,
        payment_status,
        payment_intent_id: None,
        is_paid: payment_status == PaymentStatus::Succeeded,
        paid_at: None,
        payment_error_message: None,
        refund_id: None,
        refund_amount: None,
        refunded_at: None,
        address_id: Uuid::new_v4(),
        payment_method_id: Uuid::new_v4(),
        delivery_date: None,
        delivery_time_slot: None,
        is_pickup: false,
        pickup_location: None,
        special_instructions: None,
        created_at: created,
        updated_at: created,
        version: 1,
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn merging_keeps_quantity_per_product(lines in requested_lines_strategy()) {
        let mut expected: HashMap<Uuid, i32> = HashMap::new();
        for line in &lines {
            *expected.entry(line.product_id).or_default() += line.quantity;
        }

        let merged = merge_duplicate_lines(lines.clone());

        prop_assert_eq!(merged.len(), expected.len());
        for line in &merged {
            prop_assert_eq!(Some(&line.quantity), expected.get(&line.product_id));
        }
        // First occurrence decides the position
        prop_assert_eq!(merged[0].product_id, lines[0].product_id);
    }

    #[test]
    fn totals_are_lines_plus_tax(
        items in prop::collection::vec(snapshot_strategy(), 1..10),
        tax in cents_strategy(),
    ) {
        let lines = price_lines(&items);
        let totals = compute_totals(&lines, tax);

        let mut subtotal = Decimal::ZERO;
        for ((product, quantity), line) in items.iter().zip(&lines) {
            prop_assert_eq!(line.unit_price, product.effective_price());
            prop_assert_eq!(line.line_total, line.unit_price * Decimal::from(*quantity));
            subtotal += line.line_total;
        }
        prop_assert_eq!(totals.subtotal, subtotal);
        prop_assert_eq!(totals.total, subtotal + tax);
        prop_assert!(totals.total >= totals.subtotal);
    }

    #[test]
    fn minor_units_match_cents(cents in -10_000_000i64..10_000_000) {
        prop_assert_eq!(to_minor_units(from_minor_units(cents)).unwrap(), cents);
    }

    #[test]
    fn sub_cent_amounts_round_half_away_from_zero(mills in 0i64..10_000_000) {
        let amount = Decimal::new(mills, 3);
        let minor = to_minor_units(amount).unwrap();
        let expected = if mills % 10 >= 5 { mills / 10 + 1 } else { mills / 10 };
        prop_assert_eq!(minor, expected);
    }

    #[test]
    fn signatures_only_verify_with_the_signing_secret(
        payload in prop::collection::vec(any::<u8>(), 0..256),
        secret in "whsec_[A-Za-z0-9]{8,24}",
        other in "whsec_[A-Za-z0-9]{8,24}",
        timestamp in 1_600_000_000i64..1_900_000_000,
    ) {
        let signature = compute_signature(&secret, timestamp, &payload).unwrap();
        let header = format!("t={timestamp},v1={signature}");

        let verifier = WebhookVerifier::new(Some(secret.clone()), 300);
        prop_assert!(verifier.verify_at(Some(&header), &payload, timestamp).is_ok());

        if other != secret {
            let impostor = WebhookVerifier::new(Some(other), 300);
            assert_matches!(
                impostor.verify_at(Some(&header), &payload, timestamp),
                Err(SignatureError::Mismatch)
            );
        }
    }

    #[test]
    fn replayed_outcomes_change_nothing(
        status in fulfillment_status_strategy(),
        payment_status in payment_status_strategy(),
        outcome in outcome_strategy(),
    ) {
        let order = order_in(status, payment_status);
        let now = Utc::now();

        let once = match plan_payment_transition(&order, &outcome, now) {
            TransitionPlan::Apply { patch, .. } => apply_patch(order, &patch),
            TransitionPlan::NoOp(_) => order,
        };

        let replay = plan_payment_transition(&once, &outcome, now);
        prop_assert!(matches!(replay, TransitionPlan::NoOp(_)), "{:?}", replay);
    }

    #[test]
    fn cancelled_orders_stay_cancelled(
        payment_status in payment_status_strategy(),
        outcome in outcome_strategy(),
    ) {
        prop_assume!(!matches!(outcome, PaymentOutcome::Refunded { .. }));
        let order = order_in(FulfillmentStatus::Cancelled, payment_status);

        if let TransitionPlan::Apply { patch, reconcile } =
            plan_payment_transition(&order, &outcome, Utc::now())
        {
            prop_assert!(!reconcile);
            prop_assert_eq!(apply_patch(order, &patch).status, FulfillmentStatus::Cancelled);
        }
    }

    #[test]
    fn terminal_statuses_have_no_manual_exit(
        from in prop_oneof![
            Just(FulfillmentStatus::Delivered),
            Just(FulfillmentStatus::Cancelled),
            Just(FulfillmentStatus::Refunded),
        ],
        to in fulfillment_status_strategy(),
    ) {
        prop_assume!(from != to);
        prop_assert!(check_manual_transition(from, to).is_err());
    }
}
