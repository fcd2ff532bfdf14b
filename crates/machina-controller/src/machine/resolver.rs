//! Resolves AMI, subnet and security group references to cloud IDs

use crate::api::{self, AwsResourceReference};
use crate::error::{ReconcileError, Result};
use chrono::{DateTime, FixedOffset};
use machina_cloud::{CloudClient, Filter, Image};

pub fn to_filters(filters: &[api::Filter]) -> Vec<Filter> {
    filters
        .iter()
        .map(|f| Filter::new(&f.name, f.values.clone()))
        .collect()
}

fn describe_error(e: machina_cloud::CloudError, what: &str) -> ReconcileError {
    ReconcileError::from_cloud(e, ReconcileError::RetrievalFailed, &format!("error describing {}", what))
}

/// Resolves the AMI: an explicit ID wins, filters pick the newest match.
pub async fn resolve_ami(client: &dyn CloudClient, ami: &AwsResourceReference) -> Result<String> {
    if let Some(id) = &ami.id {
        tracing::info!("Using AMI {}", id);
        return Ok(id.clone());
    }
    if ami.filters.is_empty() {
        return Err(ReconcileError::invalid("AMI ID or AMI filters need to be specified"));
    }

    tracing::info!("Describing AMI based on filters");
    let images = client
        .describe_images(&[], &to_filters(&ami.filters))
        .await
        .map_err(|e| describe_error(e, "AMI"))?;
    let image = newest_image(images)?;
    tracing::info!("Using AMI {} (newest of filter matches)", image.image_id);
    Ok(image.image_id)
}

fn creation_time(image: &Image) -> Result<DateTime<FixedOffset>> {
    let raw = image.creation_date.as_deref().unwrap_or_default();
    DateTime::parse_from_rfc3339(raw).map_err(|e| {
        ReconcileError::invalid(format!(
            "unable to parse time for {:?} AMI: {}",
            image.image_id, e
        ))
    })
}

/// Picks the image with the latest creation date. Equal dates fall back to
/// the smallest image ID so the choice does not depend on response order.
pub fn newest_image(images: Vec<Image>) -> Result<Image> {
    let mut dated = images
        .into_iter()
        .map(|image| creation_time(&image).map(|time| (time, image)))
        .collect::<Result<Vec<_>>>()?;
    dated.sort_by(|(ta, a), (tb, b)| tb.cmp(ta).then_with(|| a.image_id.cmp(&b.image_id)));
    dated
        .into_iter()
        .next()
        .map(|(_, image)| image)
        .ok_or_else(|| ReconcileError::invalid("no image for given filters not found"))
}

/// Resolves every security group reference. IDs are used as given; filter
/// references contribute every match.
pub async fn resolve_security_groups(
    client: &dyn CloudClient,
    groups: &[AwsResourceReference],
) -> Result<Vec<String>> {
    let mut ids = Vec::new();
    for group in groups {
        if let Some(id) = &group.id {
            ids.push(id.clone());
        } else if !group.filters.is_empty() {
            tracing::info!("Describing security groups based on filters");
            let found = client
                .describe_security_groups(&[], &to_filters(&group.filters))
                .await
                .map_err(|e| describe_error(e, "security groups"))?;
            ids.extend(found.into_iter().map(|g| g.group_id));
        }
    }

    if ids.is_empty() {
        return Err(ReconcileError::invalid("no security group found"));
    }
    Ok(ids)
}

/// Resolves the subnet reference.
///
/// An explicit ID is returned as is; its zone is compared with the declared
/// zone and a mismatch is only logged. Filter references are narrowed to the
/// declared zone when one is set.
pub async fn resolve_subnets(
    client: &dyn CloudClient,
    machine_name: &str,
    subnet: &AwsResourceReference,
    availability_zone: &str,
) -> Result<Vec<String>> {
    if let Some(id) = &subnet.id {
        match subnet_zone(client, id).await {
            Ok(zone) if !availability_zone.is_empty() && zone != availability_zone => {
                tracing::warn!(
                    "{}: mismatched subnet id {} (zone {}) and availability zone {}",
                    machine_name,
                    id,
                    zone,
                    availability_zone
                );
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(
                "{}: could not check subnet {} against availability zone: {}",
                machine_name,
                id,
                e
            ),
        }
        return Ok(vec![id.clone()]);
    }

    let mut filters = Vec::new();
    if !availability_zone.is_empty() {
        client
            .describe_availability_zones(&[availability_zone.to_string()])
            .await
            .map_err(|e| describe_error(e, "availability zones"))?;
        filters.push(Filter::single("availabilityZone", availability_zone));
    }
    filters.extend(to_filters(&subnet.filters));

    tracing::info!("{}: describing subnets based on filters", machine_name);
    let subnets = client
        .describe_subnets(&[], &filters)
        .await
        .map_err(|e| describe_error(e, "subnets"))?;
    if subnets.is_empty() {
        return Err(ReconcileError::invalid("no subnet IDs were found"));
    }
    Ok(subnets.into_iter().map(|s| s.subnet_id).collect())
}

/// The availability zone a subnet lives in.
pub async fn subnet_zone(client: &dyn CloudClient, subnet_id: &str) -> Result<String> {
    let subnets = client
        .describe_subnets(&[subnet_id.to_string()], &[])
        .await
        .map_err(|e| describe_error(e, "subnet"))?;
    subnets
        .into_iter()
        .next()
        .and_then(|s| s.availability_zone)
        .ok_or_else(|| {
            ReconcileError::invalid(format!(
                "could not get an availability zone from subnet {}",
                subnet_id
            ))
        })
}

/// The zone type (`availability-zone`, `local-zone`, `wavelength-zone`).
pub async fn zone_type(client: &dyn CloudClient, zone_name: &str) -> Result<String> {
    let zones = client
        .describe_availability_zones(&[zone_name.to_string()])
        .await
        .map_err(|e| describe_error(e, "availability zones"))?;
    let zone = zones.into_iter().next().ok_or_else(|| {
        ReconcileError::invalid(format!(
            "could not get an availability zone type from zone {}",
            zone_name
        ))
    })?;
    Ok(zone.zone_type.unwrap_or_default())
}
