//! Load balancer attachment
//!
//! Classic load balancers take the instance directly. Network load balancers
//! are reached through their target groups: `instance` groups take the
//! instance ID and `ip` groups take its private address.

use crate::api::{LoadBalancerReference, LoadBalancerType};
use crate::error::{ReconcileError, Result};
use machina_cloud::{CloudClient, Instance, Lookup, LookupExt, TargetGroup, TargetType};

fn names(load_balancers: &[LoadBalancerReference], lb_type: LoadBalancerType) -> Vec<&str> {
    load_balancers
        .iter()
        .filter(|lb| lb.lb_type == lb_type)
        .map(|lb| lb.name.as_str())
        .collect()
}

fn private_ips(instance: &Instance) -> Vec<String> {
    instance.private_ip_address.iter().cloned().collect()
}

async fn target_groups(client: &dyn CloudClient, name: &str) -> machina_cloud::Result<Lookup<Vec<TargetGroup>>> {
    let lbs = client.describe_load_balancers(&[name.to_string()]).await.into_lookup()?;
    let Some(lb) = lbs.found().and_then(|lbs| lbs.into_iter().next()) else {
        return Ok(Lookup::NotFound);
    };
    client.describe_target_groups(&lb.arn).await.map(Lookup::Found)
}

/// Registers a running instance with every configured load balancer.
pub async fn register(
    client: &dyn CloudClient,
    instance: &Instance,
    load_balancers: &[LoadBalancerReference],
    machine_name: &str,
) -> Result<()> {
    let update_error = |e| ReconcileError::from_cloud(e, ReconcileError::UpdateFailed, "failed to register load balancers");

    for name in names(load_balancers, LoadBalancerType::Classic) {
        tracing::debug!("{}: registering with classic load balancer {}", machine_name, name);
        client
            .register_instances_with_load_balancer(name, &[instance.instance_id.clone()])
            .await
            .map_err(update_error)?;
    }

    for name in names(load_balancers, LoadBalancerType::Network) {
        let groups = match target_groups(client, name).await.map_err(update_error)? {
            Lookup::Found(groups) => groups,
            Lookup::NotFound => {
                return Err(ReconcileError::invalid(format!(
                    "network load balancer {} not found",
                    name
                )));
            }
        };
        for group in groups {
            let targets = match &group.target_type {
                TargetType::Instance => vec![instance.instance_id.clone()],
                TargetType::Ip => private_ips(instance),
                TargetType::Other(kind) => {
                    tracing::debug!(
                        "{}: skipping target group {} with target type {}",
                        machine_name,
                        group.arn,
                        kind
                    );
                    continue;
                }
            };
            if targets.is_empty() {
                continue;
            }
            tracing::debug!("{}: registering targets with {}", machine_name, group.arn);
            client
                .register_targets(&group.arn, &targets)
                .await
                .map_err(update_error)?;
        }
    }
    Ok(())
}

/// Removes the instance's address from `ip` target groups. Instance targets
/// are dropped by the cloud on termination.
pub async fn deregister_ip_targets(
    client: &dyn CloudClient,
    instance: &Instance,
    load_balancers: &[LoadBalancerReference],
    machine_name: &str,
) -> Result<()> {
    let delete_error = |e| ReconcileError::from_cloud(e, ReconcileError::DeleteFailed, "failed to deregister load balancer targets");

    let targets = private_ips(instance);
    if targets.is_empty() {
        return Ok(());
    }
    for name in names(load_balancers, LoadBalancerType::Network) {
        let Lookup::Found(groups) = target_groups(client, name).await.map_err(delete_error)? else {
            tracing::info!("{}: load balancer {} already gone", machine_name, name);
            continue;
        };
        for group in groups.iter().filter(|g| g.target_type == TargetType::Ip) {
            tracing::debug!("{}: deregistering targets from {}", machine_name, group.arn);
            client
                .deregister_targets(&group.arn, &targets)
                .await
                .map_err(delete_error)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use machina_cloud::{FakeCloud, LoadBalancerInfo};

    fn lbs() -> Vec<LoadBalancerReference> {
        vec![
            LoadBalancerReference {
                name: "classic-api".into(),
                lb_type: LoadBalancerType::Classic,
            },
            LoadBalancerReference {
                name: "nlb-int".into(),
                lb_type: LoadBalancerType::Network,
            },
        ]
    }

    fn cloud() -> FakeCloud {
        let cloud = FakeCloud::new();
        cloud.add_load_balancer(
            LoadBalancerInfo {
                name: "nlb-int".into(),
                arn: "arn:lb/nlb-int".into(),
            },
            vec![
                TargetGroup {
                    arn: "arn:tg/instances".into(),
                    target_type: TargetType::Instance,
                },
                TargetGroup {
                    arn: "arn:tg/ips".into(),
                    target_type: TargetType::Ip,
                },
            ],
        );
        cloud
    }

    fn instance() -> Instance {
        Instance {
            instance_id: "i-0123".into(),
            private_ip_address: Some("10.0.0.7".into()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_register_and_deregister() {
        let cloud = cloud();
        register(&cloud, &instance(), &lbs(), "worker-0").await.unwrap();

        assert_eq!(cloud.classic_registrations("classic-api"), vec!["i-0123".to_string()]);
        assert_eq!(cloud.registered_targets("arn:tg/instances"), vec!["i-0123".to_string()]);
        assert_eq!(cloud.registered_targets("arn:tg/ips"), vec!["10.0.0.7".to_string()]);

        deregister_ip_targets(&cloud, &instance(), &lbs(), "worker-0").await.unwrap();
        assert!(cloud.registered_targets("arn:tg/ips").is_empty());
        assert_eq!(cloud.registered_targets("arn:tg/instances"), vec!["i-0123".to_string()]);
    }

    #[tokio::test]
    async fn test_missing_network_lb() {
        let cloud = FakeCloud::new();
        let missing = vec![LoadBalancerReference {
            name: "nope".into(),
            lb_type: LoadBalancerType::Network,
        }];
        assert!(register(&cloud, &instance(), &missing, "worker-0").await.is_err());
        deregister_ip_targets(&cloud, &instance(), &missing, "worker-0").await.unwrap();
    }
}
