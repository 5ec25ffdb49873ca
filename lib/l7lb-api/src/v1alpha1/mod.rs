/// API version v1alpha1 for L7 load-balancer CRDs

pub mod l7_load_balancer;

pub use l7_load_balancer::{BackendServiceRef, L7LoadBalancer, L7LoadBalancerSpec};

/// API group for L7 load-balancer resources
pub const API_GROUP: &str = "l7lb.datum.net";
/// API version for L7 load-balancer resources
pub const API_VERSION: &str = "v1alpha1";
