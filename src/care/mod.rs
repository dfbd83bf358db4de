pub mod alerts;
pub mod classifier;
pub mod doses;
pub mod relationships;
pub mod schedules;
pub mod sweeper;

pub use alerts::{AlertLifecycle, NewAlert};
pub use doses::DoseTracker;
pub use relationships::CareRelationshipGraph;
pub use schedules::{NewSchedule, ScheduleService, ScheduleUpdate, ScheduleView};
pub use sweeper::{MissedDoseSweeper, SweepReport};
