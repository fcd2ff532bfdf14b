//! Machina AWS adapter
//!
//! Implements [`machina_cloud::CloudClient`] on top of the official AWS SDK
//! (`aws-sdk-ec2`, `aws-sdk-elasticloadbalancing`,
//! `aws-sdk-elasticloadbalancingv2`) and provides [`AwsClientBuilder`], which
//! constructs a client per reconcile cycle from in-memory credentials.

pub mod builder;
pub mod client;
mod convert;
pub mod error;

pub use builder::{AwsClientBuilder, RegionCheck, RegionInfo, check_region};
pub use client::AwsCloudClient;
