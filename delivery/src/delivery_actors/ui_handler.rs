use crate::delivery_actors::dispatch_coordinator::DispatchCoordinator;
use crate::messages::ui_messages::{DispatchSnapshot, DispatchUpdate, SubscribeDispatch};
use actix::prelude::*;
use chrono::Utc;
use common::logger::Logger;

/// Actor UIHandler: prints what the agent would see on screen.
pub struct UIHandler {
    pub coordinator: Addr<DispatchCoordinator>,
    /// Last rendered summary, to print only actual changes.
    pub last_rendered: Option<String>,
    pub logger: Logger,
}

impl UIHandler {
    pub fn new(coordinator: Addr<DispatchCoordinator>, logger: Logger) -> Self {
        UIHandler {
            coordinator,
            last_rendered: None,
            logger,
        }
    }

    fn render(snapshot: &DispatchSnapshot) -> String {
        let online_minutes = snapshot.online_stats.total_secs(Utc::now()) / 60;
        let order = match &snapshot.current_order {
            Some(order) => format!("{} ({})", order.order_id, order.status),
            None => "none".to_string(),
        };
        let mut line = format!(
            "[{}] online {} min | current order: {} | nearby: {}",
            snapshot.presence,
            online_minutes,
            order,
            snapshot.nearby_orders.len()
        );
        if let Some(nearest) = snapshot.nearby_orders.first() {
            line.push_str(&format!(
                " (nearest {}, {:.1} km, {})",
                nearest.order_id, nearest.distance_km, nearest.payment_total
            ));
        }
        if let Some(stats) = &snapshot.daily_stats {
            line.push_str(&format!(
                " | today: {} deliveries, {} earned",
                stats.completed_count, stats.earnings
            ));
        }
        if let Some(finished) = &snapshot.last_finished {
            line.push_str(&format!(" | finished: {} ({})", finished.order_id, finished.status));
        }
        if snapshot.auth_paused {
            line.push_str(" | SIGNED OUT");
        }
        line
    }
}

impl Actor for UIHandler {
    type Context = Context<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        self.coordinator
            .do_send(SubscribeDispatch(ctx.address().recipient()));
        self.logger.info("UIHandler started");
    }
}

impl Handler<DispatchUpdate> for UIHandler {
    type Result = ();

    fn handle(&mut self, msg: DispatchUpdate, _ctx: &mut Self::Context) {
        let rendered = Self::render(&msg.0);
        if self.last_rendered.as_deref() == Some(rendered.as_str()) {
            return;
        }
        self.logger.info(&rendered);
        match serde_json::to_string(&msg.0) {
            Ok(json) => self.logger.debug(json),
            Err(e) => self.logger.warn(format!("Cannot serialize snapshot: {}", e)),
        }
        self.last_rendered = Some(rendered);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::types::dtos::{Coordinate, OrderSummary};
    use common::types::order_status::OrderStatus;
    use common::types::presence_state::PresenceState;
    use ntest::timeout;

    #[test]
    #[timeout(1000)]
    fn renders_the_nearest_order() {
        let snapshot = DispatchSnapshot {
            presence: PresenceState::Online,
            nearby_orders: vec![OrderSummary {
                order_id: "order123".to_string(),
                status: OrderStatus::Pending,
                pickup: Coordinate {
                    lat: 37.5665,
                    lon: 126.9780,
                },
                dropoff: Coordinate {
                    lat: 37.57,
                    lon: 126.98,
                },
                distance_km: 1.26,
                duration_minutes: 4,
                payment_total: 8_000,
            }],
            auth_paused: true,
            ..DispatchSnapshot::default()
        };

        let line = UIHandler::render(&snapshot);
        assert!(line.starts_with("[Online]"));
        assert!(line.contains("nearby: 1 (nearest order123, 1.3 km, 8000)"));
        assert!(line.ends_with("SIGNED OUT"));

        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["presence"], "Online");
        assert_eq!(json["nearby_orders"][0]["status"], "PENDING");
    }
}
