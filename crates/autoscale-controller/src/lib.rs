pub mod annotations;
pub mod app;
pub mod autoscaler;
pub mod cmd;
pub mod config;
pub mod controller;
pub mod error;
pub mod finalizer;
pub mod kube_client;
pub mod metrics;
pub mod reconciler;
pub mod store;
pub mod workload;
