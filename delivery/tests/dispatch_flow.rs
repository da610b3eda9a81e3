use chrono::Utc;
use common::config::DispatchConfig;
use common::errors::ErrorKind;
use common::types::dtos::{Coordinate, LocationSample};
use common::types::order_status::OrderStatus;
use common::types::presence_state::PresenceState;
use delivery::engine::DispatchEngine;
use delivery::messages::internal_messages::{GetPresence, ReconcileCurrentOrder};
use delivery::messages::ui_messages::{
    DispatchSnapshot, DispatchUpdate, GetDispatchSnapshot, RequestAccept, RequestAdvance,
    RequestComplete, RequestTogglePresence, SubscribeDispatch,
};
use delivery::simulation::{
    BackendOp, InMemoryBackend, ManualLocationSource, Recorder, StaticAuth,
    in_memory_collaborators, sample_order,
};
use actix::Actor;
use std::sync::Arc;
use std::time::Duration;

fn seoul() -> Coordinate {
    Coordinate {
        lat: 37.5665,
        lon: 126.9780,
    }
}

/// Seven pending orders, `i` hundred meters north of the agent. The third
/// nearest is "order123".
fn seven_orders(backend: &InMemoryBackend) {
    for i in (1..=7u32).rev() {
        let id = if i == 3 {
            "order123".to_string()
        } else {
            format!("order-{}", i)
        };
        let pickup = Coordinate {
            lat: seoul().lat + 0.0009 * i as f64,
            lon: seoul().lon,
        };
        backend.insert_order(sample_order(&id, pickup, seoul(), 5_000 + i as u64));
    }
}

struct Agent {
    engine: DispatchEngine,
    backend: Arc<InMemoryBackend>,
    source: Arc<ManualLocationSource>,
}

impl Agent {
    fn start() -> Self {
        let backend = Arc::new(InMemoryBackend::new("agent-1"));
        seven_orders(&backend);
        let auth = Arc::new(StaticAuth::signed_in("token"));
        let source = Arc::new(ManualLocationSource::new());
        let collaborators = in_memory_collaborators(backend.clone(), auth, source.clone());
        Agent {
            engine: DispatchEngine::start(&DispatchConfig::default(), collaborators),
            backend,
            source,
        }
    }

    async fn toggle(&self) -> Result<PresenceState, common::errors::DispatchError> {
        let res = self
            .engine
            .coordinator
            .send(RequestTogglePresence)
            .await
            .unwrap();
        settle().await;
        res
    }

    async fn move_to(&self, at: Coordinate) {
        assert!(self.source.push(LocationSample::new(at, Utc::now(), 5.0)));
        settle().await;
    }

    async fn snapshot(&self) -> DispatchSnapshot {
        self.engine.coordinator.send(GetDispatchSnapshot).await.unwrap()
    }
}

async fn settle() {
    actix_rt::time::sleep(Duration::from_millis(40)).await;
}

fn ids(snapshot: &DispatchSnapshot) -> Vec<String> {
    snapshot
        .nearby_orders
        .iter()
        .map(|o| o.order_id.clone())
        .collect()
}

#[actix_rt::test]
async fn full_delivery_from_online_to_completed() {
    let agent = Agent::start();
    assert_eq!(agent.toggle().await, Ok(PresenceState::Online));
    agent.move_to(seoul()).await;

    let snapshot = agent.snapshot().await;
    assert_eq!(
        ids(&snapshot),
        vec!["order-1", "order-2", "order123", "order-4", "order-5"]
    );

    let order = agent
        .engine
        .coordinator
        .send(RequestAccept {
            order_id: "order123".to_string(),
        })
        .await
        .unwrap()
        .unwrap();
    assert_eq!(order.status, OrderStatus::Accepted);
    settle().await;
    let snapshot = agent.snapshot().await;
    assert!(!ids(&snapshot).contains(&"order123".to_string()));
    assert_eq!(
        snapshot.current_order.map(|o| o.status),
        Some(OrderStatus::Accepted)
    );

    let order = agent
        .engine
        .coordinator
        .send(RequestAdvance {
            order_id: "order123".to_string(),
        })
        .await
        .unwrap()
        .unwrap();
    assert_eq!(order.status, OrderStatus::PickingUp);

    agent
        .backend
        .set_server_status("order123", OrderStatus::Delivering);
    let reconciled = agent
        .engine
        .components
        .lifecycle
        .send(ReconcileCurrentOrder)
        .await
        .unwrap()
        .unwrap()
        .expect("order still current");
    assert_eq!(reconciled.status, OrderStatus::Delivering);

    let listings_before = agent.backend.call_count(BackendOp::ListNearby);
    let done = agent
        .engine
        .coordinator
        .send(RequestComplete {
            order_id: "order123".to_string(),
            photo_url: Some("x".to_string()),
            signature_url: Some("y".to_string()),
        })
        .await
        .unwrap()
        .unwrap();
    assert_eq!(done.status, OrderStatus::Completed);
    settle().await;

    let snapshot = agent.snapshot().await;
    assert!(snapshot.current_order.is_none());
    assert_eq!(
        snapshot.last_finished.as_ref().map(|o| o.status),
        Some(OrderStatus::Completed)
    );
    assert!(agent.backend.call_count(BackendOp::ListNearby) > listings_before);
    assert!(!ids(&snapshot).contains(&"order123".to_string()));
}

#[actix_rt::test]
async fn order_claimed_elsewhere_never_fills_the_slot() {
    let agent = Agent::start();
    let (recorder, updates) = Recorder::<DispatchUpdate>::new();
    agent
        .engine
        .coordinator
        .send(SubscribeDispatch(recorder.start().recipient()))
        .await
        .unwrap();
    agent.toggle().await.unwrap();
    agent.move_to(seoul()).await;
    agent.backend.claim_by_other("order-1", "agent-2");

    let err = agent
        .engine
        .coordinator
        .send(RequestAccept {
            order_id: "order-1".to_string(),
        })
        .await
        .unwrap()
        .expect_err("claimed by another agent");
    assert_eq!(err.kind, ErrorKind::AlreadyClaimed);
    settle().await;

    assert!(updates.snapshot().iter().all(|u| u.0.current_order.is_none()));
    let snapshot = agent.snapshot().await;
    assert!(!ids(&snapshot).contains(&"order-1".to_string()));
}

#[actix_rt::test]
async fn offline_only_without_an_active_order() {
    let agent = Agent::start();
    agent.toggle().await.unwrap();
    agent.move_to(seoul()).await;
    agent
        .engine
        .coordinator
        .send(RequestAccept {
            order_id: "order-2".to_string(),
        })
        .await
        .unwrap()
        .unwrap();

    let err = agent.toggle().await.expect_err("delivery in progress");
    assert_eq!(err.kind, ErrorKind::ActiveOrderInProgress);
    assert_eq!(agent.snapshot().await.presence, PresenceState::Online);

    agent
        .backend
        .set_server_status("order-2", OrderStatus::Cancelled);
    agent
        .engine
        .components
        .lifecycle
        .send(ReconcileCurrentOrder)
        .await
        .unwrap()
        .unwrap();
    settle().await;

    assert_eq!(agent.toggle().await, Ok(PresenceState::Offline));
    let snapshot = agent.snapshot().await;
    assert_eq!(snapshot.presence, PresenceState::Offline);
    assert!(snapshot.nearby_orders.is_empty());
    assert!(!agent.backend.is_online());
}

#[actix_rt::test]
async fn presence_never_rests_mid_transition() {
    let agent = Agent::start();
    agent
        .backend
        .fail_next(BackendOp::GoOnline, common::errors::DispatchError::network("no signal"));

    for _ in 0..5 {
        let _ = agent.toggle().await;
        let state = agent
            .engine
            .components
            .presence
            .send(GetPresence)
            .await
            .unwrap();
        assert!(!state.is_transitioning(), "rested in {}", state);
    }
}
