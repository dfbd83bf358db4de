use std::sync::Arc;

use crate::{
    care::{
        AlertLifecycle, CareRelationshipGraph, DoseTracker, MissedDoseSweeper, ScheduleService,
    },
    clock::Clock,
    config::Config,
    notify::{DeviceRegistry, NotificationFanout, NotificationQueue, PushSender},
    store::CareStore,
};

/// Shared state handed to every route.
#[derive(Clone)]
pub struct AppState {
    pub alerts: Arc<AlertLifecycle>,
    pub doses: Arc<DoseTracker>,
    pub schedules: Arc<ScheduleService>,
    pub devices: Arc<DeviceRegistry>,
    pub graph: CareRelationshipGraph,
}

/// The HTTP state plus the background workers built over the same store.
pub struct Services {
    pub state: AppState,
    pub sweeper: Arc<MissedDoseSweeper>,
    pub fanout: Arc<NotificationFanout>,
}

/// Builds every component over one backing store.
pub fn wire<S: CareStore + 'static>(
    store: Arc<S>,
    sender: Arc<dyn PushSender>,
    clock: Arc<dyn Clock>,
    queue: NotificationQueue,
    config: &Config,
) -> Services {
    let timeout = config.database.timeout;
    let graph = CareRelationshipGraph::new(store.clone(), timeout);

    let alerts = AlertLifecycle::new(store.clone(), store.clone(), queue, clock.clone(), timeout);
    let doses = DoseTracker::new(
        store.clone(),
        store.clone(),
        store.clone(),
        clock.clone(),
        config.doses.on_time_tolerance,
        timeout,
    );
    let schedules = ScheduleService::new(store.clone(), store.clone(), store.clone(), timeout);
    let devices = DeviceRegistry::new(store.clone(), store.clone(), clock.clone(), timeout);

    let sweeper = MissedDoseSweeper::new(
        store.clone(),
        store.clone(),
        clock,
        config.sweep.grace,
        timeout,
    );
    let fanout = NotificationFanout::new(
        graph.clone(),
        store,
        sender,
        config.push.timeout,
        timeout,
    );

    Services {
        state: AppState {
            alerts: Arc::new(alerts),
            doses: Arc::new(doses),
            schedules: Arc::new(schedules),
            devices: Arc::new(devices),
            graph,
        },
        sweeper: Arc::new(sweeper),
        fanout: Arc::new(fanout),
    }
}
