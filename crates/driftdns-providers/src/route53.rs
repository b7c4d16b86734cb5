//! AWS Route53 backend.
//!
//! Route53 holds one record set per `(name, type)`, so the diff is
//! expressed as an UPSERT of the full A and AAAA value lists plus a
//! DELETE for a family that is no longer desired, batched into a
//! single `ChangeResourceRecordSets` call. The hosted zone's name is
//! fetched once and cached.

use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_route53::types::{
    Change, ChangeAction, ChangeBatch, ResourceRecord, ResourceRecordSet, RrType,
};
use driftdns_core::addr::AddressCollection;
use driftdns_core::config::duration;
use driftdns_core::error::{Error, Result};
use driftdns_core::service::{fqdn, Service, ServiceRegistry};
use serde::Deserialize;
use tokio::sync::OnceCell;
use tracing::debug;

const PROVIDER: &str = "route53";

#[derive(Debug, Clone, Deserialize)]
struct Settings {
    access_key_id: String,
    secret_access_key: String,
    region: String,
    hosted_zone_id: String,
    #[serde(deserialize_with = "duration::flexible")]
    ttl: Duration,
}

pub struct Route53 {
    settings: Settings,
    /// Zone name from GetHostedZone, resolved on first use
    zone: OnceCell<String>,
}

/// Register the `route53` provider.
pub fn register(registry: &ServiceRegistry) {
    registry.register(
        PROVIDER,
        Box::new(|settings| {
            let settings: Settings = serde_json::from_value(settings.clone())
                .map_err(|e| Error::config(format!("{PROVIDER} settings: {e}")))?;
            Ok(Arc::new(Route53 {
                settings,
                zone: OnceCell::new(),
            }) as Arc<dyn Service>)
        }),
    );
}

impl Route53 {
    async fn sdk_client(&self) -> aws_sdk_route53::Client {
        let credentials = aws_sdk_route53::config::Credentials::new(
            self.settings.access_key_id.clone(),
            self.settings.secret_access_key.clone(),
            None,
            None,
            "driftdns",
        );
        let config = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(self.settings.region.clone()))
            .credentials_provider(credentials)
            .load()
            .await;
        aws_sdk_route53::Client::new(&config)
    }

    async fn zone_name(&self, client: &aws_sdk_route53::Client) -> Result<&str> {
        self.zone
            .get_or_try_init(|| async {
                let output = client
                    .get_hosted_zone()
                    .id(&self.settings.hosted_zone_id)
                    .send()
                    .await
                    .map_err(|e| {
                        Error::backend_transient(
                            PROVIDER,
                            format!(
                                "failed to fetch hosted zone {}: {e}",
                                self.settings.hosted_zone_id
                            ),
                        )
                    })?;
                let name = output
                    .hosted_zone()
                    .map(|zone| zone.name().to_string())
                    .ok_or_else(|| {
                        Error::backend_permanent(
                            PROVIDER,
                            format!("hosted zone not found: {}", self.settings.hosted_zone_id),
                        )
                    })?;
                Ok(name)
            })
            .await
            .map(String::as_str)
    }

    fn record_set(&self, name: &str, rr_type: RrType, values: &[String]) -> Result<ResourceRecordSet> {
        let mut builder = ResourceRecordSet::builder()
            .name(name)
            .r#type(rr_type)
            .ttl(self.settings.ttl.as_secs() as i64);
        for value in values {
            builder = builder.resource_records(
                ResourceRecord::builder()
                    .value(value)
                    .build()
                    .map_err(|e| Error::backend_permanent(PROVIDER, format!("bad record: {e}")))?,
            );
        }
        builder
            .build()
            .map_err(|e| Error::backend_permanent(PROVIDER, format!("bad record set: {e}")))
    }
}

#[async_trait]
impl Service for Route53 {
    async fn update(&self, hostname: &str, addresses: &AddressCollection) -> Result<()> {
        let client = self.sdk_client().await;
        let zone = self.zone_name(&client).await?;

        // Route53 names carry a trailing dot
        let mut name = fqdn(hostname, zone);
        if !name.ends_with('.') {
            name.push('.');
        }

        let desired_a = addresses.filter4().ip_strings();
        let desired_aaaa = addresses.filter6().ip_strings();

        let mut changes: Vec<Change> = Vec::new();

        for (rr_type, values) in [(RrType::A, &desired_a), (RrType::Aaaa, &desired_aaaa)] {
            if values.is_empty() {
                continue;
            }
            changes.push(
                Change::builder()
                    .action(ChangeAction::Upsert)
                    .resource_record_set(self.record_set(&name, rr_type, values)?)
                    .build()
                    .map_err(|e| Error::backend_permanent(PROVIDER, format!("bad change: {e}")))?,
            );
        }

        // delete whole record sets for families with nothing desired
        let listed = client
            .list_resource_record_sets()
            .hosted_zone_id(&self.settings.hosted_zone_id)
            .start_record_name(&name)
            .max_items(10)
            .send()
            .await
            .map_err(|e| {
                Error::backend_transient(PROVIDER, format!("failed to list record sets: {e}"))
            })?;

        for record_set in listed.resource_record_sets() {
            if record_set.name() != name {
                continue;
            }
            let obsolete = (*record_set.r#type() == RrType::A && desired_a.is_empty())
                || (*record_set.r#type() == RrType::Aaaa && desired_aaaa.is_empty());
            if obsolete {
                changes.push(
                    Change::builder()
                        .action(ChangeAction::Delete)
                        .resource_record_set(record_set.clone())
                        .build()
                        .map_err(|e| {
                            Error::backend_permanent(PROVIDER, format!("bad change: {e}"))
                        })?,
                );
            }
        }

        if changes.is_empty() {
            return Ok(());
        }

        debug!(%name, count = changes.len(), "submitting change batch");
        let batch = ChangeBatch::builder()
            .set_changes(Some(changes))
            .build()
            .map_err(|e| Error::backend_permanent(PROVIDER, format!("bad change batch: {e}")))?;

        client
            .change_resource_record_sets()
            .hosted_zone_id(&self.settings.hosted_zone_id)
            .change_batch(batch)
            .send()
            .await
            .map_err(|e| {
                Error::backend_transient(PROVIDER, format!("failed to change record sets: {e}"))
            })?;

        Ok(())
    }

    fn domain(&self, hostname: &str) -> String {
        let zone = self.zone.get().map(String::as_str).unwrap_or("");
        fqdn(hostname, zone)
    }

    fn pretty_print(&self, prefix: &str) -> String {
        let mut out = String::new();
        writeln!(out, "{prefix}hosted_zone_id: {}", self.settings.hosted_zone_id).ok();
        writeln!(out, "{prefix}region: {}", self.settings.region).ok();
        writeln!(
            out,
            "{prefix}ttl: {}",
            humantime::format_duration(self.settings.ttl)
        )
        .ok();
        writeln!(out, "{prefix}access_key_id: {}", self.settings.access_key_id).ok();
        out
    }
}
