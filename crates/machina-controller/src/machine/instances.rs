//! Instance lookup, termination and tag drift repair

use crate::error::{ReconcileError, Result};
use crate::tags;
use machina_cloud::{
    CloudClient, Filter, Instance, InstanceStateChange, InstanceStateName, Lookup, LookupExt, Tag,
};

fn retrieval_error(e: machina_cloud::CloudError) -> ReconcileError {
    ReconcileError::from_cloud(e, ReconcileError::RetrievalFailed, "error describing instances")
}

/// Looks an instance up by ID. A not-found answer is a value, not an error.
pub async fn find_by_id(client: &dyn CloudClient, instance_id: &str) -> Result<Lookup<Instance>> {
    let found = client
        .describe_instances(&[instance_id.to_string()], &[])
        .await
        .into_lookup()
        .map_err(retrieval_error)?;
    Ok(match found {
        Lookup::Found(instances) => instances.into_iter().next().into(),
        Lookup::NotFound => Lookup::NotFound,
    })
}

/// States in which an instance counts as the machine's instance. Stopped
/// instances are replaced, so they are left out.
pub fn existing_states() -> Vec<String> {
    [
        InstanceStateName::Pending,
        InstanceStateName::Running,
        InstanceStateName::Stopping,
        InstanceStateName::ShuttingDown,
    ]
    .iter()
    .map(|s| s.as_str().to_string())
    .collect()
}

/// Instances in `states` carrying the machine's ownership and name tags,
/// newest first.
pub async fn find_by_tags(
    client: &dyn CloudClient,
    name: &str,
    cluster_id: &str,
    states: Vec<String>,
) -> Result<Vec<Instance>> {
    let mut filters = tags::ownership_filters(name, cluster_id);
    filters.push(Filter::new("instance-state-name", states));
    let mut instances = client
        .describe_instances(&[], &filters)
        .await
        .map_err(retrieval_error)?;
    sort_newest_first(&mut instances);
    Ok(instances)
}

/// Newest launch time first; instances without one sort last.
pub fn sort_newest_first(instances: &mut [Instance]) {
    instances.sort_by(|a, b| match (a.launch_time, b.launch_time) {
        (Some(a), Some(b)) => b.cmp(&a),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => std::cmp::Ordering::Equal,
    });
}

/// The newest existing instance found by ownership tags.
pub async fn newest_by_tags(client: &dyn CloudClient, name: &str, cluster_id: &str) -> Result<Option<Instance>> {
    let mut instances = find_by_tags(client, name, cluster_id, existing_states()).await?;
    if instances.len() > 1 {
        let rest: Vec<&str> = instances[1..].iter().map(|i| i.instance_id.as_str()).collect();
        tracing::warn!(
            "{}: found {} instances, using newest {} (others: {})",
            name,
            instances.len(),
            instances[0].instance_id,
            rest.join(", ")
        );
    }
    Ok((!instances.is_empty()).then(|| instances.remove(0)))
}

/// Terminates an instance. An instance that is already gone is reported as
/// not found.
pub async fn terminate(client: &dyn CloudClient, instance_id: &str) -> Result<Lookup<InstanceStateChange>> {
    let changes = client
        .terminate_instances(&[instance_id.to_string()])
        .await
        .into_lookup()
        .map_err(|e| {
            ReconcileError::from_cloud(e, ReconcileError::DeleteFailed, "failed to terminate instance")
        })?;
    Ok(match changes {
        Lookup::Found(changes) => changes.into_iter().next().into(),
        Lookup::NotFound => Lookup::NotFound,
    })
}

/// Terminates the machine's stopped instances so a relaunch leaves no orphan.
pub async fn terminate_stopped(client: &dyn CloudClient, name: &str, cluster_id: &str) -> Result<usize> {
    let stopped = find_by_tags(
        client,
        name,
        cluster_id,
        vec![InstanceStateName::Stopped.as_str().to_string()],
    )
    .await?;
    for instance in &stopped {
        tracing::info!("{}: cleaning up stopped instance {}", name, instance.instance_id);
        terminate(client, &instance.instance_id).await?;
    }
    Ok(stopped.len())
}

/// Writes `expected` onto the instance and its volumes when any key is
/// missing or has a different value. Extra tags are left alone.
///
/// Returns whether a `CreateTags` call was made.
pub async fn reconcile_tags(client: &dyn CloudClient, instance: &Instance, expected: &[Tag]) -> Result<bool> {
    if tags::tags_in_sync(expected, &instance.tags) {
        return Ok(false);
    }

    let volumes = client
        .describe_volumes(&[Filter::single("attachment.instance-id", &instance.instance_id)])
        .await
        .map_err(|e| ReconcileError::from_cloud(e, ReconcileError::UpdateFailed, "error describing volumes"))?;

    let mut resources = vec![instance.instance_id.clone()];
    resources.extend(volumes.into_iter().map(|v| v.volume_id));

    tracing::info!(
        "{}: updating tags on {} resources",
        instance.instance_id,
        resources.len()
    );
    client
        .create_tags(&resources, expected)
        .await
        .map_err(|e| ReconcileError::from_cloud(e, ReconcileError::UpdateFailed, "error updating tags"))?;
    Ok(true)
}
