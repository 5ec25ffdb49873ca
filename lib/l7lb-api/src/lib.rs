//! L7 load-balancer API types
//!
//! This library defines the types shared by the backend syncer:
//! - Service, backend and frontend model handed to the syncer
//! - L7LoadBalancer: custom resource declaring which services an L7 proxy
//!   configuration routes to, and through which front-end ports

pub mod loadbalancer;
pub mod v1alpha1;

pub use loadbalancer::{
    Backend, BucketMap, Frontend, L7lbResourceName, PortFilter, Service, ServiceName,
};
pub use v1alpha1::{BackendServiceRef, L7LoadBalancer, L7LoadBalancerSpec};
