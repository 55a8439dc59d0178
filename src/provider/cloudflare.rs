//! Cloudflare API v4 client (§4.2, "Cloudflare client (ambient, concrete)").
//!
//! Speaks HTTPS with bearer-token auth via `reqwest` rather than a synchronous
//! client, since the Controller's tick is driven by an async runtime end to end.

use std::time::Duration;

use async_trait::async_trait;
use log::{debug, trace, warn};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tokio::time::sleep;

use crate::endpoint::{RecordType, Zone};
use crate::provider::{NewRecord, Provider, ProviderError, ProviderRecord, TxtRecord};

const API_BASE: &str = "https://api.cloudflare.com/client/v4";
const ZONE_PAGE_SIZE: u32 = 50;
const RECORD_PAGE_SIZE: u32 = 5000;
const MAX_RATE_LIMIT_ATTEMPTS: u32 = 3;
const BACKOFF_BASE: Duration = Duration::from_millis(500);
const CALL_TIMEOUT: Duration = Duration::from_secs(30);

pub struct CloudflareProvider {
    client: Client,
    base_url: String,
}

impl CloudflareProvider {
    pub fn new(api_token: &str) -> Result<Self, ProviderError> {
        Self::with_base_url(api_token, API_BASE.to_string())
    }

    fn with_base_url(api_token: &str, base_url: String) -> Result<Self, ProviderError> {
        let mut headers = reqwest::header::HeaderMap::new();
        let mut auth = reqwest::header::HeaderValue::from_str(&format!("Bearer {api_token}"))
            .map_err(|e| ProviderError::AuthFailed(e.to_string()))?;
        auth.set_sensitive(true);
        headers.insert(reqwest::header::AUTHORIZATION, auth);

        let client = Client::builder()
            .default_headers(headers)
            .timeout(CALL_TIMEOUT)
            .build()
            .map_err(|e| ProviderError::Transient(e.to_string()))?;

        Ok(Self { client, base_url })
    }

    async fn request<T: for<'de> Deserialize<'de>>(
        &self,
        method: reqwest::Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<&impl Serialize>,
    ) -> Result<T, ProviderError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let mut req = self
                .client
                .request(method.clone(), format!("{}{}", self.base_url, path))
                .query(query);
            if let Some(b) = body {
                req = req.json(b);
            }

            let resp = req
                .send()
                .await
                .map_err(|e| ProviderError::Transient(e.to_string()))?;

            let status = resp.status();
            if status == StatusCode::TOO_MANY_REQUESTS {
                if attempt >= MAX_RATE_LIMIT_ATTEMPTS {
                    return Err(ProviderError::RateLimited(
                        "exceeded max retry attempts".to_string(),
                        attempt,
                    ));
                }
                let backoff = BACKOFF_BASE * 2u32.pow(attempt - 1);
                warn!("cloudflare rate limited, backing off {backoff:?} (attempt {attempt})");
                sleep(backoff).await;
                continue;
            }
            if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
                return Err(ProviderError::AuthFailed(format!("HTTP {status}")));
            }
            if status.is_client_error() {
                let message = resp.text().await.unwrap_or_default();
                return Err(ProviderError::Permanent {
                    status: status.as_u16(),
                    message,
                });
            }
            if status.is_server_error() {
                return Err(ProviderError::Transient(format!("HTTP {status}")));
            }

            return resp
                .json::<T>()
                .await
                .map_err(|e| ProviderError::Transient(e.to_string()));
        }
    }
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    result: Option<T>,
    success: bool,
    errors: Vec<ApiError>,
    result_info: Option<ResultInfo>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[allow(dead_code)]
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct ResultInfo {
    page: u32,
    per_page: u32,
    count: u32,
}

#[derive(Debug, Deserialize)]
struct CfZone {
    id: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct CfRecord {
    id: String,
    zone_id: String,
    name: String,
    #[serde(rename = "type")]
    kind: String,
    content: String,
    ttl: u32,
    proxied: Option<bool>,
}

#[derive(Debug, Serialize)]
struct CreateRecordBody<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    name: &'a str,
    content: &'a str,
    ttl: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    proxied: Option<bool>,
}

impl CloudflareProvider {
    async fn paginated_zones(&self) -> Result<Vec<CfZone>, ProviderError> {
        self.paginate("/zones", ZONE_PAGE_SIZE).await
    }

    async fn paginated_records(&self, zone_id: &str) -> Result<Vec<CfRecord>, ProviderError> {
        self.paginate(&format!("/zones/{zone_id}/dns_records"), RECORD_PAGE_SIZE)
            .await
    }

    async fn paginate<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        per_page: u32,
    ) -> Result<Vec<T>, ProviderError> {
        let mut out = Vec::new();
        let mut page = 1;
        loop {
            let query = [
                ("page", page.to_string()),
                ("per_page", per_page.to_string()),
            ];
            let envelope: Envelope<Vec<T>> = self
                .request(reqwest::Method::GET, path, &query, None::<&()>)
                .await?;
            if !envelope.success {
                let message = envelope
                    .errors
                    .into_iter()
                    .map(|e| e.message)
                    .collect::<Vec<_>>()
                    .join("; ");
                return Err(ProviderError::Permanent { status: 200, message });
            }
            let mut batch = envelope.result.unwrap_or_default();
            let got = batch.len() as u32;
            out.append(&mut batch);

            let done = match envelope.result_info {
                Some(info) => info.page * info.per_page >= info.count || got < per_page,
                None => got < per_page,
            };
            if done {
                break;
            }
            page += 1;
        }
        Ok(out)
    }
}

fn record_type_str(t: RecordType) -> &'static str {
    match t {
        RecordType::A => "A",
        RecordType::Cname => "CNAME",
    }
}

fn parse_record_type(s: &str) -> Option<RecordType> {
    match s {
        "A" => Some(RecordType::A),
        "CNAME" => Some(RecordType::Cname),
        "TXT" => None, // handled separately by the Registry
        _ => None,
    }
}

#[async_trait]
impl Provider for CloudflareProvider {
    async fn zones(&self) -> Result<Vec<Zone>, ProviderError> {
        debug!("listing cloudflare zones");
        let zones = self.paginated_zones().await?;
        Ok(zones
            .into_iter()
            .map(|z| Zone { id: z.id, name: z.name })
            .collect())
    }

    async fn records(
        &self,
        zone: &Zone,
        types: Option<&[RecordType]>,
    ) -> Result<Vec<ProviderRecord>, ProviderError> {
        let raw = self.paginated_records(&zone.id).await?;
        trace!("zone {} returned {} raw records", zone.name, raw.len());
        let out = raw
            .into_iter()
            .filter_map(|r| {
                let record_type = match r.kind.as_str() {
                    "TXT" => {
                        // TXT content is handled by the Registry layer, which reads it
                        // via `records_raw_txt`; still surfaced here for A/CNAME parity
                        // when no type filter narrows it out.
                        return None;
                    }
                    other => parse_record_type(other)?,
                };
                if let Some(allowed) = types {
                    if !allowed.contains(&record_type) {
                        return None;
                    }
                }
                Some(ProviderRecord {
                    id: r.id,
                    zone_id: r.zone_id,
                    name: r.name,
                    record_type,
                    content: r.content,
                    ttl: r.ttl,
                    proxied: r.proxied,
                })
            })
            .collect();
        Ok(out)
    }

    async fn create(&self, zone: &Zone, record: &NewRecord) -> Result<String, ProviderError> {
        let body = CreateRecordBody {
            kind: record_type_str(record.record_type),
            name: &record.name,
            content: &record.content,
            ttl: record.ttl,
            proxied: record.proxied,
        };
        let envelope: Envelope<CfRecord> = self
            .request(
                reqwest::Method::POST,
                &format!("/zones/{}/dns_records", zone.id),
                &[],
                Some(&body),
            )
            .await?;
        envelope
            .result
            .map(|r| r.id)
            .ok_or_else(|| ProviderError::Permanent {
                status: 200,
                message: "create returned no record".to_string(),
            })
    }

    async fn update(&self, zone: &Zone, id: &str, record: &NewRecord) -> Result<(), ProviderError> {
        let body = CreateRecordBody {
            kind: record_type_str(record.record_type),
            name: &record.name,
            content: &record.content,
            ttl: record.ttl,
            proxied: record.proxied,
        };
        let _: Envelope<CfRecord> = self
            .request(
                reqwest::Method::PUT,
                &format!("/zones/{}/dns_records/{id}", zone.id),
                &[],
                Some(&body),
            )
            .await?;
        Ok(())
    }

    async fn delete(&self, zone: &Zone, id: &str) -> Result<(), ProviderError> {
        let _: Envelope<serde_json::Value> = self
            .request(
                reqwest::Method::DELETE,
                &format!("/zones/{}/dns_records/{id}", zone.id),
                &[],
                None::<&()>,
            )
            .await?;
        Ok(())
    }

    async fn txt_records(&self, zone: &Zone) -> Result<Vec<TxtRecord>, ProviderError> {
        let raw = self.paginated_records(&zone.id).await?;
        Ok(raw
            .into_iter()
            .filter(|r| r.kind == "TXT")
            .map(|r| TxtRecord {
                id: r.id,
                zone_id: r.zone_id,
                name: r.name,
                content: r.content,
            })
            .collect())
    }

    async fn create_txt(&self, zone: &Zone, name: &str, content: &str) -> Result<String, ProviderError> {
        let body = CreateRecordBody {
            kind: "TXT",
            name,
            content,
            ttl: 1,
            proxied: None,
        };
        let envelope: Envelope<CfRecord> = self
            .request(
                reqwest::Method::POST,
                &format!("/zones/{}/dns_records", zone.id),
                &[],
                Some(&body),
            )
            .await?;
        envelope
            .result
            .map(|r| r.id)
            .ok_or_else(|| ProviderError::Permanent {
                status: 200,
                message: "create_txt returned no record".to_string(),
            })
    }

    async fn delete_txt(&self, zone: &Zone, id: &str) -> Result<(), ProviderError> {
        self.delete(zone, id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_type_round_trips_through_wire_strings() {
        assert_eq!(record_type_str(RecordType::A), "A");
        assert_eq!(parse_record_type("A"), Some(RecordType::A));
        assert_eq!(parse_record_type("CNAME"), Some(RecordType::Cname));
        assert_eq!(parse_record_type("MX"), None);
    }

    #[test]
    fn txt_content_type_is_excluded_from_records() {
        assert_eq!(parse_record_type("TXT"), None);
    }

    #[test]
    fn rejects_invalid_bearer_token_header_value() {
        let err = CloudflareProvider::new("bad\ntoken").unwrap_err();
        assert!(matches!(err, ProviderError::AuthFailed(_)));
    }
}
