use crate::delivery_actors::dispatch_coordinator::{Components, DispatchCoordinator};
use crate::delivery_actors::location_reporter::LocationReporter;
use crate::delivery_actors::order_catalog::OrderCatalog;
use crate::delivery_actors::order_lifecycle::OrderLifecycle;
use crate::delivery_actors::presence::PresenceController;
use crate::delivery_actors::stats_poller::StatsPoller;
use crate::messages::internal_messages::{SetStatusObserver, SubscribeLocation, SubscribePresence};
use actix::prelude::*;
use common::backend::Collaborators;
use common::config::DispatchConfig;

/// A running engine: the coordinator plus the components behind it.
pub struct DispatchEngine {
    pub coordinator: Addr<DispatchCoordinator>,
    pub components: Components,
}

impl DispatchEngine {
    /// Starts every component, leaves first, and wires them together. Must
    /// be called from within a running actix system.
    pub fn start(config: &DispatchConfig, collaborators: Collaborators) -> Self {
        let Collaborators {
            auth,
            location,
            tracking,
            orders,
            stats,
        } = collaborators;

        let reporter =
            LocationReporter::new(location, tracking.clone(), auth.clone(), config).start();
        let presence =
            PresenceController::new(reporter.clone(), tracking, auth.clone(), config).start();
        let catalog = OrderCatalog::new(orders.clone(), auth.clone(), config).start();
        let lifecycle =
            OrderLifecycle::new(catalog.clone(), orders, auth.clone(), config).start();
        let stats = StatsPoller::new(stats, auth.clone(), config).start();

        // Presence reaches the catalog before anyone else hears about it.
        presence.do_send(SubscribePresence(catalog.clone().recipient()));
        presence.do_send(SubscribePresence(stats.clone().recipient()));
        reporter.do_send(SubscribeLocation(catalog.clone().recipient()));
        catalog.do_send(SetStatusObserver(lifecycle.clone().recipient()));

        let components = Components {
            presence,
            reporter,
            catalog,
            lifecycle,
            stats,
        };
        let coordinator = DispatchCoordinator::new(components.clone(), auth, config).start();
        DispatchEngine {
            coordinator,
            components,
        }
    }
}
