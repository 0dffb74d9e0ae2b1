pub mod planner;

pub use planner::{PhysicalPlan, Planner};
