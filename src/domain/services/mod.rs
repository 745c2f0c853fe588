mod promotion;
mod read_balancer;

pub use promotion::{CandidateLag, PromotionPlanner};
pub use read_balancer::ReadBalancer;
