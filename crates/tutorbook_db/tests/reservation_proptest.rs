//! Property tests for slot reservation against a simple model.


use fixtures::create_test_slot;
use proptest::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;
use tutorbook_common::models::SlotQuery;
use tutorbook_db::{BookingStore, DbError, InMemoryBookingStore};

const SLOTS: usize = 6;

#[derive(Debug, Clone)]
enum Op {
    Reserve { slots: Vec<usize>, holder: usize },
    Release { slots: Vec<usize> },
}

fn op_strategy() -> impl Strategy<Value = Op> {
    let slots = prop::collection::vec(0..SLOTS, 1..4);
    prop_oneof![
        3 => (slots.clone(), 0..4usize).prop_map(|(slots, holder)| Op::Reserve { slots, holder }),
        1 => slots.prop_map(|slots| Op::Release { slots }),
    ]
}

fn slot_id(n: usize) -> String {
    format!("slot-{n}")
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn reservations_match_a_sequential_model(ops in prop::collection::vec(op_strategy(), 1..30)) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .build()
            .expect("runtime");

        runtime.block_on(async {
            let store: Arc<dyn BookingStore> = Arc::new(InMemoryBookingStore::new());
            for n in 0..SLOTS {
                store
                    .publish_slot(&create_test_slot(&slot_id(n), "t1", n as i64 * 30))
                    .await
                    .expect("publish");
            }

            // slot index -> holder
            let mut model: HashMap<usize, String> = HashMap::new();

            for op in ops {
                match op {
                    Op::Reserve { slots, holder } => {
                        let holder = format!("b{holder}");
                        let ids: Vec<String> = slots.iter().map(|n| slot_id(*n)).collect();
                        let all_free = slots.iter().all(|n| !model.contains_key(n));
                        let result = store.reserve_slots(&ids, "t1", &holder).await;
                        if all_free {
                            prop_assert!(result.is_ok());
                            for n in &slots {
                                model.insert(*n, holder.clone());
                            }
                        } else {
                            prop_assert!(
                                matches!(result, Err(DbError::SlotUnavailable { .. })),
                                "taken slots must conflict"
                            );
                        }
                    }
                    Op::Release { slots } => {
                        let ids: Vec<String> = slots.iter().map(|n| slot_id(*n)).collect();
                        store.release_slots(&ids).await.expect("release");
                        for n in &slots {
                            model.remove(n);
                        }
                    }
                }

                let free = store
                    .list_free_slots(&SlotQuery::default())
                    .await
                    .expect("list");
                prop_assert_eq!(free.len(), SLOTS - model.len());
                for slot in &free {
                    prop_assert!(slot.booking_id.is_none());
                }
            }
            Ok(())
        })?;
    }
}
