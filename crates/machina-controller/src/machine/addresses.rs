//! Node addresses and provider ID for a running instance

use crate::api::{NodeAddress, NodeAddressType};
use crate::error::{ReconcileError, Result};
use machina_cloud::{CloudClient, Instance, Lookup, LookupExt};

const DOMAIN_NAME_KEY: &str = "domain-name";
const IN_USE: &str = "in-use";

/// `aws:///<availability-zone>/<instance-id>`
pub fn provider_id(instance: &Instance) -> Option<String> {
    let zone = instance.availability_zone.as_deref().filter(|z| !z.is_empty())?;
    Some(format!("aws:///{}/{}", zone, instance.instance_id))
}

/// Addresses reported for the node, in a stable order.
pub fn node_addresses(instance: &Instance, custom_domains: &[String]) -> Vec<NodeAddress> {
    let mut addresses = Vec::new();
    let mut push = |address_type: NodeAddressType, value: &str| {
        if !value.is_empty() {
            addresses.push(NodeAddress::new(address_type, value));
        }
    };

    if let Some(ip) = &instance.public_ip_address {
        push(NodeAddressType::ExternalIp, ip);
    }
    if let Some(dns) = &instance.public_dns_name {
        push(NodeAddressType::ExternalDns, dns);
    }
    for interface in &instance.network_interfaces {
        if interface.status.as_deref() != Some(IN_USE) {
            continue;
        }
        for ip in interface.ipv6_addresses.iter().chain(&interface.private_ip_addresses) {
            push(NodeAddressType::InternalIp, ip);
        }
    }

    if let Some(private_dns) = instance.private_dns_name.as_deref().filter(|d| !d.is_empty()) {
        push(NodeAddressType::InternalDns, private_dns);
        push(NodeAddressType::Hostname, private_dns);

        let host = private_dns.split('.').next().unwrap_or(private_dns);
        let mut seen = vec![private_dns.to_string()];
        for domain in custom_domains.iter().filter(|d| !d.is_empty()) {
            let name = format!("{}.{}", host, domain);
            if seen.contains(&name) {
                continue;
            }
            push(NodeAddressType::InternalDns, &name);
            seen.push(name);
        }
    }
    addresses
}

/// `domain-name` values from the DHCP options of the instance's VPC.
pub async fn dhcp_domains(client: &dyn CloudClient, vpc_id: Option<&str>) -> Result<Vec<String>> {
    let Some(vpc_id) = vpc_id.filter(|v| !v.is_empty()) else {
        return Ok(Vec::new());
    };
    let lookup_error =
        |e| ReconcileError::from_cloud(e, ReconcileError::RetrievalFailed, "failed to look up DHCP options");

    let vpcs = client
        .describe_vpcs(&[vpc_id.to_string()])
        .await
        .into_lookup()
        .map_err(lookup_error)?;
    let Some(dhcp_id) = vpcs
        .found()
        .and_then(|v| v.into_iter().next())
        .and_then(|v| v.dhcp_options_id)
    else {
        return Ok(Vec::new());
    };

    let options = client
        .describe_dhcp_options(&[dhcp_id])
        .await
        .into_lookup()
        .map_err(lookup_error)?;
    let Lookup::Found(options) = options else {
        return Ok(Vec::new());
    };

    Ok(options
        .iter()
        .flat_map(|o| &o.configurations)
        .filter(|c| c.key == DOMAIN_NAME_KEY)
        .flat_map(|c| &c.values)
        .flat_map(|v| v.split_whitespace())
        .map(String::from)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use machina_cloud::fake::stub;
    use machina_cloud::{DhcpConfiguration, DhcpOptions, FakeCloud, InstanceNetworkInterface, Vpc};

    fn instance() -> Instance {
        Instance {
            instance_id: "i-0123".into(),
            availability_zone: Some("us-east-1a".into()),
            public_ip_address: Some("54.1.2.3".into()),
            public_dns_name: Some("ec2-54-1-2-3.compute-1.amazonaws.com".into()),
            private_dns_name: Some("ip-10-0-0-7.ec2.internal".into()),
            network_interfaces: vec![
                InstanceNetworkInterface {
                    status: Some("in-use".into()),
                    private_ip_addresses: vec!["10.0.0.7".into()],
                    ipv6_addresses: vec!["2600:1f18::7".into()],
                },
                InstanceNetworkInterface {
                    status: Some("available".into()),
                    private_ip_addresses: vec!["10.0.0.99".into()],
                    ipv6_addresses: Vec::new(),
                },
            ],
            ..Default::default()
        }
    }

    #[test]
    fn test_provider_id() {
        assert_eq!(provider_id(&instance()).as_deref(), Some("aws:///us-east-1a/i-0123"));
        assert_eq!(provider_id(&Instance::default()), None);
    }

    #[test]
    fn test_node_addresses_order() {
        let addresses = node_addresses(
            &instance(),
            &["ec2.internal".into(), "corp.example.com".into(), String::new()],
        );
        let pairs: Vec<(NodeAddressType, &str)> = addresses
            .iter()
            .map(|a| (a.address_type, a.address.as_str()))
            .collect();
        assert_eq!(
            pairs,
            vec![
                (NodeAddressType::ExternalIp, "54.1.2.3"),
                (NodeAddressType::ExternalDns, "ec2-54-1-2-3.compute-1.amazonaws.com"),
                (NodeAddressType::InternalIp, "2600:1f18::7"),
                (NodeAddressType::InternalIp, "10.0.0.7"),
                (NodeAddressType::InternalDns, "ip-10-0-0-7.ec2.internal"),
                (NodeAddressType::Hostname, "ip-10-0-0-7.ec2.internal"),
                (NodeAddressType::InternalDns, "ip-10-0-0-7.corp.example.com"),
            ]
        );
    }

    #[tokio::test]
    async fn test_dhcp_domains() {
        let cloud = FakeCloud::with_defaults();
        assert_eq!(
            dhcp_domains(&cloud, Some(stub::VPC_ID)).await.unwrap(),
            vec!["ec2.internal".to_string()]
        );

        cloud.add_vpc(Vpc {
            vpc_id: "vpc-custom".into(),
            dhcp_options_id: Some("dopt-custom".into()),
        });
        cloud.add_dhcp_options(DhcpOptions {
            dhcp_options_id: "dopt-custom".into(),
            configurations: vec![DhcpConfiguration {
                key: "domain-name".into(),
                values: vec!["corp.example.com lab.example.com".into()],
            }],
        });
        assert_eq!(
            dhcp_domains(&cloud, Some("vpc-custom")).await.unwrap(),
            vec!["corp.example.com".to_string(), "lab.example.com".to_string()]
        );
        assert!(dhcp_domains(&cloud, None).await.unwrap().is_empty());
    }
}
