//! TXT-sidecar ownership overlay on top of a [`crate::provider::Provider`] (§4.3).
//!
//! Turns an unowned, shared DNS zone into an owned subset without any storage of
//! its own: every A/CNAME record this daemon manages has a matching TXT record
//! (the "sidecar") that stamps it with `heritage=sherpa-dns,owner=<id>,type=<..>`.
//! A primary record without a decodable, matching sidecar is foreign and is never
//! read back as owned, let alone mutated.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use log::{debug, info, trace, warn};
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use sha2::Sha256;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::config::RegistryConfig;
use crate::domain::DomainFilter;
use crate::endpoint::{find_zone_for_name, Endpoint, EndpointKey, RecordType, Zone};
use crate::plan::{Change, Plan};
use crate::provider::{NewRecord, Provider, ProviderError, ProviderRecord, TxtRecord};

const HERITAGE: &str = "heritage=sherpa-dns";
/// Fixed application salt for the sidecar-encryption KDF. Not a secret: its only
/// job is domain separation, so the same passphrase doesn't derive the same key
/// as some unrelated PBKDF2 user.
const KDF_SALT: &[u8] = b"sherpa-dns/txt-sidecar/v1";
const KDF_ITERATIONS: u32 = 100_000;
const NONCE_LEN: usize = 12;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),
    #[error("endpoint `{0}` does not lie within any managed zone")]
    NoZone(String),
    #[error("encrypt_txt is enabled but no encryption_key was configured")]
    MissingEncryptionKey,
}

/// Outcome of a single [`Change`] applied through [`Registry::apply`]. Feeds the
/// Controller's `sherpa_dns_changes_total`/`sherpa_dns_provider_errors_total` counters.
#[derive(Debug)]
pub struct ChangeOutcome {
    pub change: Change,
    pub result: Result<(), RegistryError>,
}

#[derive(Debug, Default)]
pub struct ApplyReport {
    pub outcomes: Vec<ChangeOutcome>,
}

impl ApplyReport {
    pub fn failures(&self) -> impl Iterator<Item = &ChangeOutcome> {
        self.outcomes.iter().filter(|o| o.result.is_err())
    }
}

/// Per-tick cache of zone/record state, rebuilt at the start of every [`Registry::owned`]
/// call and consulted by a same-tick [`Registry::apply`] to resolve provider record ids
/// without re-listing (§3, "the Registry caches a name→id map per tick").
#[derive(Default)]
struct TickCache {
    zones: Vec<Zone>,
    /// Every primary record (A/CNAME) observed, grouped by planning key. A multi-target
    /// A endpoint round-trips as several entries sharing the key (§4.2 "Mapping rules").
    primaries: HashMap<EndpointKey, Vec<ProviderRecord>>,
    sidecars: HashMap<EndpointKey, TxtRecord>,
    zone_of: HashMap<EndpointKey, Zone>,
    /// Primaries observed with no sidecar at all, keyed by planning key. Consulted by
    /// [`Registry::apply_create`] to re-sidecar rather than duplicate a record that
    /// already matches the desired endpoint exactly (§4.3 "Apply").
    orphan_primaries: HashMap<EndpointKey, (Zone, Vec<ProviderRecord>)>,
}

pub struct Registry {
    provider: Arc<dyn Provider>,
    config: RegistryConfig,
    domain_filter: DomainFilter,
    cache: Mutex<TickCache>,
}

impl Registry {
    pub fn new(provider: Arc<dyn Provider>, config: RegistryConfig, domain_filter: DomainFilter) -> Self {
        Self {
            provider,
            config,
            domain_filter,
            cache: Mutex::new(TickCache::default()),
        }
    }

    /// Lists every owned endpoint across every managed zone, rebuilding the tick cache
    /// that a following [`Registry::apply`] call in the same tick will read from.
    pub async fn owned(&self) -> Result<Vec<Endpoint>, RegistryError> {
        let all_zones = self.provider.zones().await?;
        let zones: Vec<Zone> = all_zones
            .into_iter()
            .filter(|z| self.domain_filter.is_managed(&z.name))
            .collect();

        let mut cache = TickCache { zones: zones.clone(), ..Default::default() };
        let mut owned = Vec::new();

        for zone in &zones {
            let records = self
                .provider
                .records(zone, Some(&[RecordType::A, RecordType::Cname]))
                .await?;
            let txts = self.provider.txt_records(zone).await?;
            trace!(
                "zone {}: {} primary record(s), {} TXT record(s)",
                zone.name,
                records.len(),
                txts.len()
            );

            let txt_by_name: HashMap<&str, &TxtRecord> =
                txts.iter().map(|t| (t.name.as_str(), t)).collect();

            let mut by_key: HashMap<EndpointKey, Vec<ProviderRecord>> = HashMap::new();
            for r in records {
                by_key.entry((r.name.to_ascii_lowercase(), r.record_type)).or_default().push(r);
            }

            // Sidecar names that correspond to a primary actually present in this zone,
            // regardless of whether that sidecar decodes or is ours. Anything outside
            // this set has no matching primary at all (§3 invariant 2).
            let mut seen_sidecar_names: std::collections::HashSet<String> = std::collections::HashSet::new();

            for (key, group) in by_key {
                let (name, record_type) = &key;
                let sidecar_name = sidecar_name(name, &self.config.txt_prefix, &self.config.txt_wildcard_replacement);
                seen_sidecar_names.insert(sidecar_name.clone());

                let sidecar = match txt_by_name.get(sidecar_name.as_str()) {
                    Some(t) => *t,
                    None => {
                        // No sidecar at all: candidate for re-sidecar repair in
                        // `apply_create`, if a later desired endpoint matches it exactly.
                        cache.orphan_primaries.insert(key.clone(), (zone.clone(), group.clone()));
                        continue;
                    }
                };

                let payload = match self.decode_payload(&sidecar.content) {
                    Some(p) => p,
                    None => {
                        debug!("sidecar for {name} does not decode, treating as foreign");
                        continue;
                    }
                };
                if payload.owner != self.config.txt_owner_id {
                    continue; // owned by a different instance
                }
                if payload.record_type != *record_type {
                    warn!("sidecar for {name} claims type {:?} but primary is {:?}, treating as foreign", payload.record_type, record_type);
                    continue;
                }

                cache.primaries.insert(key.clone(), group.clone());
                cache.sidecars.insert(key.clone(), sidecar.clone());
                cache.zone_of.insert(key.clone(), zone.clone());

                let first = &group[0];
                owned.push(Endpoint {
                    dns_name: name.clone(),
                    record_type: *record_type,
                    targets: group.iter().map(|r| r.content.clone()).collect(),
                    ttl: first.ttl,
                    proxied: first.proxied.unwrap_or(false),
                    owner_id: Some(payload.owner),
                    source_ref: None,
                });
            }

            // Garbage-collect sidecars with no matching primary at all: stale leftovers
            // from a delete that never reached its TXT half (§3 invariant 2, §4.3 "Apply").
            // A sidecar that does correspond to a primary is never touched here, even if
            // that primary's ownership turned out to be foreign to us.
            for t in &txts {
                if seen_sidecar_names.contains(&t.name) {
                    continue;
                }
                let payload = match self.decode_payload(&t.content) {
                    Some(p) => p,
                    None => continue,
                };
                if payload.owner != self.config.txt_owner_id {
                    continue; // not ours to garbage collect
                }
                debug!("sidecar {} has no matching primary, deleting as orphan", t.name);
                if let Err(e) = self.provider.delete_txt(zone, &t.id).await {
                    warn!("failed to delete orphan sidecar {}: {e}", t.name);
                }
            }
        }

        debug!("registry owns {} endpoint(s) across {} zone(s)", owned.len(), zones.len());
        *self.cache.lock().await = cache;
        Ok(owned)
    }

    /// Executes `plan` against the Provider, writing the matching sidecar alongside every
    /// primary mutation (§4.3 "Operations"). Each [`Change`] is attempted independently;
    /// one failure does not abort the rest of the plan (§7 "Propagation").
    pub async fn apply(&self, plan: &Plan) -> ApplyReport {
        let mut report = ApplyReport::default();
        for change in plan.creates.iter().chain(plan.updates.iter()).chain(plan.deletes.iter()) {
            let result = match change {
                Change::Create(e) => self.apply_create(e).await,
                Change::UpdateTo(e) => self.apply_update(e).await,
                Change::Delete(e) => self.apply_delete(e).await,
            };
            if let Err(e) = &result {
                warn!("applying {:?} for {}: {e}", change_kind(change), change.endpoint().dns_name);
            }
            report.outcomes.push(ChangeOutcome { change: change.clone(), result });
        }
        report
    }

    async fn zone_for(&self, dns_name: &str) -> Result<Zone, RegistryError> {
        let cache = self.cache.lock().await;
        find_zone_for_name(dns_name, &cache.zones)
            .cloned()
            .ok_or_else(|| RegistryError::NoZone(dns_name.to_string()))
    }

    async fn apply_create(&self, e: &Endpoint) -> Result<(), RegistryError> {
        let zone = self.zone_for(&e.dns_name).await?;

        let orphan = {
            let cache = self.cache.lock().await;
            cache.orphan_primaries.get(&e.key()).cloned()
        };
        let repairing = match &orphan {
            Some((_, group)) if provider_group_comparable(group) == e.comparable() => {
                debug!("{} {} already matches an unsidecared primary, re-sidecaring in place", e.record_type, e.dns_name);
                true
            }
            _ => false,
        };

        if !repairing {
            for target in &e.targets {
                self.provider
                    .create(&zone, &new_record(e, target))
                    .await
                    .map_err(RegistryError::Provider)?;
            }
        }

        let sidecar = sidecar_name(&e.dns_name, &self.config.txt_prefix, &self.config.txt_wildcard_replacement);
        let content = self.encode_payload(e.record_type)?;
        self.provider
            .create_txt(&zone, &sidecar, &content)
            .await
            .map_err(RegistryError::Provider)?;
        if repairing {
            info!("re-sidecared {} {} -> {:?}", e.record_type, e.dns_name, e.targets);
        } else {
            info!("created {} {} -> {:?}", e.record_type, e.dns_name, e.targets);
        }
        Ok(())
    }

    async fn apply_update(&self, e: &Endpoint) -> Result<(), RegistryError> {
        let zone = self.zone_for(&e.dns_name).await?;
        let key = e.key();
        let existing = {
            let cache = self.cache.lock().await;
            cache.primaries.get(&key).cloned().unwrap_or_default()
        };

        // Replace the full set of fanned-out records: update in place where a slot
        // exists, create the rest, delete any that are no longer needed.
        for (i, target) in e.targets.iter().enumerate() {
            let record = new_record(e, target);
            match existing.get(i) {
                Some(old) => self.provider.update(&zone, &old.id, &record).await,
                None => self.provider.create(&zone, &record).await.map(|_| ()),
            }
            .map_err(RegistryError::Provider)?;
        }
        for stale in existing.iter().skip(e.targets.len()) {
            self.provider.delete(&zone, &stale.id).await.map_err(RegistryError::Provider)?;
        }
        info!("updated {} {} -> {:?}", e.record_type, e.dns_name, e.targets);
        Ok(())
    }

    async fn apply_delete(&self, e: &Endpoint) -> Result<(), RegistryError> {
        let zone = self.zone_for(&e.dns_name).await?;
        let key = e.key();
        let (records, sidecar) = {
            let cache = self.cache.lock().await;
            (
                cache.primaries.get(&key).cloned().unwrap_or_default(),
                cache.sidecars.get(&key).cloned(),
            )
        };
        for r in &records {
            self.provider.delete(&zone, &r.id).await.map_err(RegistryError::Provider)?;
        }
        if let Some(t) = sidecar {
            self.provider.delete_txt(&zone, &t.id).await.map_err(RegistryError::Provider)?;
        }
        info!("deleted {} {}", e.record_type, e.dns_name);
        Ok(())
    }

    fn encode_payload(&self, record_type: RecordType) -> Result<String, RegistryError> {
        let plain = format!(
            "'{HERITAGE},owner={},type={record_type}'",
            self.config.txt_owner_id
        );
        if !self.config.encrypt_txt {
            return Ok(plain);
        }
        let key_material = self
            .config
            .encryption_key
            .as_deref()
            .ok_or(RegistryError::MissingEncryptionKey)?;
        Ok(encrypt_payload(key_material, &plain))
    }

    fn decode_payload(&self, content: &str) -> Option<SidecarPayload> {
        let plain = if self.config.encrypt_txt {
            let key_material = self.config.encryption_key.as_deref()?;
            decrypt_payload(key_material, content)?
        } else {
            content.to_string()
        };
        parse_payload(&plain)
    }
}

fn change_kind(c: &Change) -> &'static str {
    match c {
        Change::Create(_) => "create",
        Change::UpdateTo(_) => "update",
        Change::Delete(_) => "delete",
    }
}

/// The same comparable tuple as [`Endpoint::comparable`], computed directly from a group
/// of provider records so an orphan primary can be compared against a desired endpoint
/// without first round-tripping it through one.
fn provider_group_comparable(group: &[ProviderRecord]) -> (BTreeSet<String>, u32, bool) {
    let ttl = group.first().map(|r| if r.ttl == 0 { 1 } else { r.ttl }).unwrap_or(1);
    let proxied = group.first().and_then(|r| r.proxied).unwrap_or(false);
    (group.iter().map(|r| r.content.clone()).collect(), ttl, proxied)
}

fn new_record(e: &Endpoint, target: &str) -> NewRecord {
    NewRecord {
        name: e.dns_name.clone(),
        record_type: e.record_type,
        content: target.to_string(),
        ttl: e.ttl,
        proxied: Some(e.proxied),
    }
}

/// Derives the sidecar record name from a primary's `dns_name` (§4.3 "Encoding").
/// `*.example.com` with prefix `sherpa-dns-` and replacement `star` becomes
/// `sherpa-dns-star.example.com`.
pub fn sidecar_name(dns_name: &str, txt_prefix: &str, wildcard_replacement: &str) -> String {
    let mut labels: Vec<String> = dns_name.split('.').map(|l| l.to_string()).collect();
    if let Some(first) = labels.first_mut() {
        if first == "*" {
            *first = wildcard_replacement.to_string();
        }
        *first = format!("{txt_prefix}{first}");
    }
    labels.join(".")
}

struct SidecarPayload {
    owner: String,
    record_type: RecordType,
}

fn parse_payload(plain: &str) -> Option<SidecarPayload> {
    let inner = plain.trim().trim_matches('\'').trim_matches('"');
    if !inner.starts_with(HERITAGE) {
        return None;
    }
    let mut owner = None;
    let mut record_type = None;
    for field in inner.split(',').skip(1) {
        let (k, v) = field.split_once('=')?;
        match k {
            "owner" => owner = Some(v.to_string()),
            "type" => record_type = v.parse::<RecordType>().ok(),
            _ => {}
        }
    }
    Some(SidecarPayload { owner: owner?, record_type: record_type? })
}

fn derive_key(passphrase: &str) -> [u8; 32] {
    let mut key = [0u8; 32];
    pbkdf2_hmac::<Sha256>(passphrase.as_bytes(), KDF_SALT, KDF_ITERATIONS, &mut key);
    key
}

fn encrypt_payload(passphrase: &str, plain: &str) -> String {
    let key_bytes = derive_key(passphrase);
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key_bytes));
    let mut nonce_bytes = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);
    // `plain` is under 255 bytes (the TXT string limit), so encryption cannot fail here.
    let ciphertext = cipher.encrypt(nonce, plain.as_bytes()).expect("aes-gcm encryption");
    let mut wire = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    wire.extend_from_slice(&nonce_bytes);
    wire.extend_from_slice(&ciphertext);
    BASE64.encode(wire)
}

fn decrypt_payload(passphrase: &str, wire: &str) -> Option<String> {
    let raw = BASE64.decode(wire).ok()?;
    if raw.len() < NONCE_LEN {
        return None;
    }
    let (nonce_bytes, ciphertext) = raw.split_at(NONCE_LEN);
    let key_bytes = derive_key(passphrase);
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key_bytes));
    let plain = cipher.decrypt(Nonce::from_slice(nonce_bytes), ciphertext).ok()?;
    String::from_utf8(plain).ok()
}
