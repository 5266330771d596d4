//! Typed HTTP client for the zone's network-map registry.
//!
//! Uses blocking `ureq`: the updater runs every call on its own
//! dedicated thread, so there is no async runtime on this path. Signed
//! responses are authenticated against the configured root of trust
//! before they are handed back.

use std::time::Duration;

use tern_pki::{validate, CertRole};

use crate::error::NetmapError;
use crate::types::{
    ContentHash, NetworkMap, NetworkParameters, NodeInfo, SignedNodeInfo, SignedParametersHash,
};
use tern_pki::SignedWith;

/// TCP connection timeout for registry requests.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Read timeout for registry requests.
const READ_TIMEOUT: Duration = Duration::from_secs(30);

pub struct NetworkMapClient {
    base_url: String,
    trusted_root: Vec<u8>,
    agent: ureq::Agent,
}

impl NetworkMapClient {
    /// Build a client for one compatibility zone. `trusted_root` is the
    /// DER root certificate all signed responses must chain to.
    pub fn new(zone_url: &str, trusted_root: Vec<u8>) -> Self {
        let base_url = format!("{}/network-map", zone_url.trim_end_matches('/'));
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(CONNECT_TIMEOUT)
            .timeout_read(READ_TIMEOUT)
            .build();
        Self {
            base_url,
            trusted_root,
            agent,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Publish a signed node descriptor to the registry.
    pub fn publish(&self, signed: &SignedNodeInfo) -> Result<(), NetmapError> {
        let url = format!("{}/publish", self.base_url);
        let body = serde_json::to_vec(signed).map_err(|e| NetmapError::Payload(e.to_string()))?;
        self.agent
            .post(&url)
            .set("Content-Type", "application/octet-stream")
            .send_bytes(&body)
            .map_err(map_error)?;
        Ok(())
    }

    /// Post the operator's signature over an accepted parameters hash.
    pub fn ack_parameters_update(&self, ack: &SignedParametersHash) -> Result<(), NetmapError> {
        let url = format!("{}/ack-parameters", self.base_url);
        let body = serde_json::to_vec(ack).map_err(|e| NetmapError::Payload(e.to_string()))?;
        self.agent
            .post(&url)
            .set("Content-Type", "application/octet-stream")
            .send_bytes(&body)
            .map_err(map_error)?;
        Ok(())
    }

    /// Fetch the network map, authenticated against the trusted root and
    /// bound to the network-map signing role. Returns the map together
    /// with the server's `Cache-Control: max-age` poll hint, if present.
    pub fn get_network_map(&self) -> Result<(NetworkMap, Option<Duration>), NetmapError> {
        let resp = self.agent.get(&self.base_url).call().map_err(map_error)?;
        let cache_timeout = parse_max_age(resp.header("Cache-Control"));

        let envelope: SignedWith<NetworkMap> = resp
            .into_json()
            .map_err(|e| NetmapError::Payload(e.to_string()))?;
        let map =
            validate::verify_role_bound(&envelope, CertRole::NetworkMap, &self.trusted_root)?;
        Ok((map, cache_timeout))
    }

    /// Fetch one node descriptor by hash. The envelope is verified: the
    /// signer chain, the detached signature, and that the content actually
    /// hashes to what was asked for.
    pub fn get_node_info(&self, hash: &ContentHash) -> Result<NodeInfo, NetmapError> {
        let url = format!("{}/node-info/{hash}", self.base_url);
        let resp = self.agent.get(&url).call().map_err(map_error)?;
        let envelope: SignedNodeInfo = resp
            .into_json()
            .map_err(|e| NetmapError::Payload(e.to_string()))?;

        let served = ContentHash::of(&envelope.raw);
        if served != *hash {
            return Err(NetmapError::Payload(format!(
                "registry served node info {served} when asked for {hash}"
            )));
        }
        let info = validate::verify_signed(&envelope, &self.trusted_root)?;
        Ok(info)
    }

    /// Fetch signed network parameters by hash. The envelope is returned
    /// unverified; callers decide when to authenticate it.
    pub fn get_network_parameters(
        &self,
        hash: &ContentHash,
    ) -> Result<SignedWith<NetworkParameters>, NetmapError> {
        let url = format!("{}/network-parameters/{hash}", self.base_url);
        let resp = self.agent.get(&url).call().map_err(map_error)?;
        resp.into_json()
            .map_err(|e| NetmapError::Payload(e.to_string()))
    }

    /// Ask the registry what hostname it sees this node as.
    pub fn my_public_hostname(&self) -> Result<String, NetmapError> {
        let url = format!("{}/my-hostname", self.base_url);
        let resp = self.agent.get(&url).call().map_err(map_error)?;
        let body = resp
            .into_string()
            .map_err(|e| NetmapError::Payload(e.to_string()))?;
        Ok(body.lines().next().unwrap_or("").trim().to_string())
    }
}

fn map_error(err: ureq::Error) -> NetmapError {
    match err {
        ureq::Error::Status(status, resp) => NetmapError::Transport {
            status,
            body: resp.into_string().unwrap_or_default(),
        },
        ureq::Error::Transport(transport) => NetmapError::Unreachable(transport.to_string()),
    }
}

/// Parse `max-age` seconds out of a `Cache-Control` header value. A
/// missing header or directive yields `None`; a zero max-age is valid and
/// yields a zero duration.
fn parse_max_age(header: Option<&str>) -> Option<Duration> {
    let header = header?;
    for directive in header.split(',') {
        let directive = directive.trim();
        if let Some(value) = directive.strip_prefix("max-age=") {
            if let Ok(secs) = value.trim().parse::<u64>() {
                return Some(Duration::from_secs(secs));
            }
        }
    }
    None
}
