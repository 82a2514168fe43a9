//! VPC provider: networks with subnets, route tables and security groups.
//!
//! VPCs list as directories, each holding `info.json` plus three
//! subdirectories whose children are `<id>.json` files. The VPC surface is
//! part of the EC2 API, so this provider shares its client type with the
//! instance provider.

use async_trait::async_trait;
use aws_sdk_ec2::types::{Filter, RouteTable, SecurityGroup, Subnet, Vpc};
use aws_sdk_ec2::Client;
use serde_json::{json, Map, Value};

use super::{load_sdk_config, to_pretty_json, Entry, Provider, ProviderCache, CACHE_TTL};
use crate::error::{Error, Result};

const VPC_SUBDIRS: &[&str] = &["subnets", "route-tables", "security-groups"];

fn vpc_filter(vpc_id: &str) -> Filter {
    Filter::builder().name("vpc-id").values(vpc_id).build()
}

pub(crate) struct VpcProvider {
    client: Client,
    cache: ProviderCache,
}

impl VpcProvider {
    pub(crate) async fn new(profile: Option<&str>, region: &str) -> Result<Self> {
        let config = load_sdk_config(profile, region).await;
        Ok(Self {
            client: Client::new(&config),
            cache: ProviderCache::new(CACHE_TTL),
        })
    }

    async fn list_vpcs(&self) -> Result<Vec<Entry>> {
        let resp = self
            .client
            .describe_vpcs()
            .send()
            .await
            .map_err(Error::backend)?;
        let entries = resp
            .vpcs()
            .iter()
            .filter_map(|vpc| vpc.vpc_id().map(Entry::dir))
            .collect();
        Ok(entries)
    }

    async fn list_subnets(&self, vpc_id: &str) -> Result<Vec<Entry>> {
        let resp = self
            .client
            .describe_subnets()
            .filters(vpc_filter(vpc_id))
            .send()
            .await
            .map_err(Error::backend)?;
        let entries = resp
            .subnets()
            .iter()
            .filter_map(|s| s.subnet_id())
            .map(|id| Entry::synthesized(format!("{id}.json")))
            .collect();
        Ok(entries)
    }

    async fn list_route_tables(&self, vpc_id: &str) -> Result<Vec<Entry>> {
        let resp = self
            .client
            .describe_route_tables()
            .filters(vpc_filter(vpc_id))
            .send()
            .await
            .map_err(Error::backend)?;
        let entries = resp
            .route_tables()
            .iter()
            .filter_map(|rt| rt.route_table_id())
            .map(|id| Entry::synthesized(format!("{id}.json")))
            .collect();
        Ok(entries)
    }

    async fn list_security_groups(&self, vpc_id: &str) -> Result<Vec<Entry>> {
        let resp = self
            .client
            .describe_security_groups()
            .filters(vpc_filter(vpc_id))
            .send()
            .await
            .map_err(Error::backend)?;
        let entries = resp
            .security_groups()
            .iter()
            .filter_map(|sg| sg.group_id())
            .map(|id| Entry::synthesized(format!("{id}.json")))
            .collect();
        Ok(entries)
    }

    async fn read_dir_uncached(&self, path: &str) -> Result<Vec<Entry>> {
        if path.is_empty() {
            return self.list_vpcs().await;
        }

        let parts: Vec<&str> = path.split('/').collect();
        match parts.as_slice() {
            [_] => {
                let mut entries = vec![Entry::synthesized("info.json")];
                entries.extend(VPC_SUBDIRS.iter().map(|d| Entry::dir(*d)));
                Ok(entries)
            }
            [vpc_id, "subnets"] => self.list_subnets(vpc_id).await,
            [vpc_id, "route-tables"] => self.list_route_tables(vpc_id).await,
            [vpc_id, "security-groups"] => self.list_security_groups(vpc_id).await,
            _ => Err(Error::not_found(path)),
        }
    }

    async fn vpc_info(&self, vpc_id: &str) -> Result<Vec<u8>> {
        let resp = self
            .client
            .describe_vpcs()
            .vpc_ids(vpc_id)
            .send()
            .await
            .map_err(|_| Error::not_found(vpc_id))?;
        let vpc = resp
            .vpcs()
            .first()
            .ok_or_else(|| Error::not_found(vpc_id))?;
        Ok(to_pretty_json(&vpc_json(vpc)))
    }

    async fn subnet_info(&self, filename: &str) -> Result<Vec<u8>> {
        let subnet_id = filename.strip_suffix(".json").unwrap_or(filename);
        let resp = self
            .client
            .describe_subnets()
            .subnet_ids(subnet_id)
            .send()
            .await
            .map_err(|_| Error::not_found(subnet_id))?;
        let subnet = resp
            .subnets()
            .first()
            .ok_or_else(|| Error::not_found(subnet_id))?;
        Ok(to_pretty_json(&subnet_json(subnet)))
    }

    async fn route_table_info(&self, filename: &str) -> Result<Vec<u8>> {
        let rt_id = filename.strip_suffix(".json").unwrap_or(filename);
        let resp = self
            .client
            .describe_route_tables()
            .route_table_ids(rt_id)
            .send()
            .await
            .map_err(|_| Error::not_found(rt_id))?;
        let table = resp
            .route_tables()
            .first()
            .ok_or_else(|| Error::not_found(rt_id))?;
        Ok(to_pretty_json(&route_table_json(table)))
    }

    async fn security_group_info(&self, filename: &str) -> Result<Vec<u8>> {
        let sg_id = filename.strip_suffix(".json").unwrap_or(filename);
        let resp = self
            .client
            .describe_security_groups()
            .group_ids(sg_id)
            .send()
            .await
            .map_err(|_| Error::not_found(sg_id))?;
        let group = resp
            .security_groups()
            .first()
            .ok_or_else(|| Error::not_found(sg_id))?;
        Ok(to_pretty_json(&security_group_json(group)))
    }
}

fn tags_value(tags: &[aws_sdk_ec2::types::Tag]) -> Value {
    let mut doc = Map::new();
    for tag in tags {
        if let (Some(key), Some(value)) = (tag.key(), tag.value()) {
            doc.insert(key.to_string(), json!(value));
        }
    }
    Value::Object(doc)
}

fn vpc_json(vpc: &Vpc) -> Value {
    json!({
        "VpcId": vpc.vpc_id(),
        "CidrBlock": vpc.cidr_block(),
        "State": vpc.state().map(|s| s.as_str()),
        "IsDefault": vpc.is_default(),
        "OwnerId": vpc.owner_id(),
        "Tags": tags_value(vpc.tags()),
    })
}

fn subnet_json(subnet: &Subnet) -> Value {
    json!({
        "SubnetId": subnet.subnet_id(),
        "VpcId": subnet.vpc_id(),
        "CidrBlock": subnet.cidr_block(),
        "AvailabilityZone": subnet.availability_zone(),
        "State": subnet.state().map(|s| s.as_str()),
        "AvailableIpAddressCount": subnet.available_ip_address_count(),
        "MapPublicIpOnLaunch": subnet.map_public_ip_on_launch(),
        "Tags": tags_value(subnet.tags()),
    })
}

fn route_table_json(table: &RouteTable) -> Value {
    let routes: Vec<Value> = table
        .routes()
        .iter()
        .map(|route| {
            json!({
                "DestinationCidrBlock": route.destination_cidr_block(),
                "GatewayId": route.gateway_id(),
                "NatGatewayId": route.nat_gateway_id(),
                "State": route.state().map(|s| s.as_str()),
            })
        })
        .collect();
    let associations: Vec<Value> = table
        .associations()
        .iter()
        .map(|assoc| {
            json!({
                "SubnetId": assoc.subnet_id(),
                "Main": assoc.main(),
            })
        })
        .collect();
    json!({
        "RouteTableId": table.route_table_id(),
        "VpcId": table.vpc_id(),
        "Routes": routes,
        "Associations": associations,
        "Tags": tags_value(table.tags()),
    })
}

fn security_group_json(group: &SecurityGroup) -> Value {
    let rules = |permissions: &[aws_sdk_ec2::types::IpPermission]| -> Vec<Value> {
        permissions
            .iter()
            .map(|perm| {
                let ranges: Vec<Value> = perm
                    .ip_ranges()
                    .iter()
                    .map(|range| json!(range.cidr_ip()))
                    .collect();
                json!({
                    "IpProtocol": perm.ip_protocol(),
                    "FromPort": perm.from_port(),
                    "ToPort": perm.to_port(),
                    "IpRanges": ranges,
                })
            })
            .collect()
    };
    json!({
        "GroupId": group.group_id(),
        "GroupName": group.group_name(),
        "Description": group.description(),
        "VpcId": group.vpc_id(),
        "IpPermissions": rules(group.ip_permissions()),
        "IpPermissionsEgress": rules(group.ip_permissions_egress()),
        "Tags": tags_value(group.tags()),
    })
}

#[async_trait]
impl Provider for VpcProvider {
    fn name(&self) -> &'static str {
        "vpc"
    }

    async fn read_dir(&self, path: &str) -> Result<Vec<Entry>> {
        if let Some(entries) = self.cache.listings.get(path) {
            return Ok(entries);
        }

        let entries = self.read_dir_uncached(path).await?;
        self.cache.listings.set(path, entries.clone());
        Ok(entries)
    }

    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        if let Some(data) = self.cache.blobs.get(path) {
            return Ok(data);
        }

        let parts: Vec<&str> = path.split('/').collect();
        let data = match parts.as_slice() {
            [vpc_id, "info.json"] => self.vpc_info(vpc_id).await?,
            [_, "subnets", file] => self.subnet_info(file).await?,
            [_, "route-tables", file] => self.route_table_info(file).await?,
            [_, "security-groups", file] => self.security_group_info(file).await?,
            _ => return Err(Error::not_found(path)),
        };

        self.cache.blobs.set(path, data.clone());
        Ok(data)
    }

    async fn stat(&self, path: &str) -> Result<Entry> {
        if let Some(entry) = self.cache.stats.get(path) {
            return Ok(entry);
        }

        let entry = if path.is_empty() {
            Entry::dir("")
        } else {
            let parts: Vec<&str> = path.split('/').collect();
            match parts.as_slice() {
                [vpc_id] => {
                    // Verify the VPC exists before reporting a directory.
                    let resp = self
                        .client
                        .describe_vpcs()
                        .vpc_ids(*vpc_id)
                        .send()
                        .await
                        .map_err(|_| Error::not_found(path))?;
                    if resp.vpcs().is_empty() {
                        return Err(Error::not_found(path));
                    }
                    Entry::dir(*vpc_id)
                }
                [_, "info.json"] => Entry::synthesized("info.json"),
                [_, subdir] if VPC_SUBDIRS.contains(subdir) => Entry::dir(*subdir),
                [_, subdir, file] if VPC_SUBDIRS.contains(subdir) && file.ends_with(".json") => {
                    Entry::synthesized(*file)
                }
                _ => return Err(Error::not_found(path)),
            }
        };

        self.cache.stats.set(path, entry.clone());
        Ok(entry)
    }
}
