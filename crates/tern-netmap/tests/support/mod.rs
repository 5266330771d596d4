//! Test registry: a canned-response HTTP server plus zone fixtures.

// Each integration-test binary uses its own subset of this module.
#![allow(dead_code)]

use std::collections::HashMap;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex};

use tern_netmap::types::{ContentHash, NetworkMap, NodeInfo, SignedNodeInfo};
use tern_pki::{issuer, CertificateType, NodeKeyPair, SignatureScheme, SignedWith};

/// Zone fixture: a root of trust plus a network-map signing identity.
pub struct Zone {
    pub root: issuer::CertAuthority,
    pub map_key: NodeKeyPair,
    pub map_cert: Vec<u8>,
}

impl Zone {
    pub fn new() -> Self {
        let root_key = NodeKeyPair::generate(SignatureScheme::EcdsaP256Sha256);
        let root = issuer::issue_root(
            &issuer::SubjectName::new("Integration Test Root").organization("Tern"),
            &root_key,
            &issuer::ValidityWindow::default(),
        )
        .unwrap();
        let map_key = NodeKeyPair::generate(SignatureScheme::EcdsaP256Sha256);
        let map_cert = issuer::issue(
            CertificateType::NetworkMap,
            &root,
            &issuer::SubjectName::new("Zone Map Signer"),
            &map_key,
            &issuer::ValidityWindow::default(),
            None,
        )
        .unwrap()
        .der;
        Self {
            root,
            map_key,
            map_cert,
        }
    }

    pub fn trusted_root(&self) -> Vec<u8> {
        self.root.cert_der().to_vec()
    }

    /// Sign a network map with the zone's map signer.
    pub fn signed_map(&self, map: &NetworkMap) -> Vec<u8> {
        let envelope = SignedWith::sign(map, &self.map_key, self.map_cert.clone()).unwrap();
        serde_json::to_vec(&envelope).unwrap()
    }

    /// A node descriptor signed by a fresh legal identity under the root.
    pub fn signed_node(&self, identity: &str, serial: i64) -> SignedNodeInfo {
        let key = NodeKeyPair::generate(SignatureScheme::EcdsaP256Sha256);
        let cert = issuer::issue(
            CertificateType::LegalIdentity,
            &self.root,
            &issuer::SubjectName::new(identity),
            &key,
            &issuer::ValidityWindow::default(),
            None,
        )
        .unwrap()
        .der;
        let info = NodeInfo {
            legal_identities: vec![identity.to_string()],
            addresses: vec![format!(
                "{}.example:10002",
                identity.to_ascii_lowercase().replace(' ', "-")
            )],
            platform_version: 4,
            serial,
        };
        SignedWith::sign(&info, &key, cert).unwrap()
    }
}

#[derive(Default)]
pub struct RegistryState {
    pub map_body: Vec<u8>,
    pub cache_control: Option<String>,
    pub node_infos: HashMap<String, Vec<u8>>,
    pub broken_node_infos: Vec<String>,
    pub parameters: HashMap<String, Vec<u8>>,
    pub hostname: String,
    pub publishes: usize,
    pub acks: usize,
}

/// A loopback registry serving the network-map endpoints from canned
/// state. Runs until the test process exits.
pub struct TestRegistry {
    pub state: Arc<Mutex<RegistryState>>,
    url: String,
}

impl TestRegistry {
    pub fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(Mutex::new(RegistryState::default()));

        let serve_state = state.clone();
        std::thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { continue };
                let state = serve_state.clone();
                std::thread::spawn(move || handle_connection(stream, state));
            }
        });

        Self {
            state,
            url: format!("http://{addr}"),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn set_map(&self, body: Vec<u8>, cache_control: Option<&str>) {
        let mut state = self.state.lock().unwrap();
        state.map_body = body;
        state.cache_control = cache_control.map(str::to_string);
    }

    pub fn add_node_info(&self, signed: &SignedNodeInfo) -> ContentHash {
        let hash = ContentHash::of(&signed.raw);
        self.state
            .lock()
            .unwrap()
            .node_infos
            .insert(hash.to_string(), serde_json::to_vec(signed).unwrap());
        hash
    }

    pub fn publishes(&self) -> usize {
        self.state.lock().unwrap().publishes
    }

    pub fn acks(&self) -> usize {
        self.state.lock().unwrap().acks
    }
}

fn handle_connection(stream: TcpStream, state: Arc<Mutex<RegistryState>>) {
    let mut reader = BufReader::new(stream);

    let mut request_line = String::new();
    if reader.read_line(&mut request_line).is_err() {
        return;
    }
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or("").to_string();
    let path = parts.next().unwrap_or("").to_string();

    let mut content_length = 0usize;
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).is_err() || line.trim().is_empty() {
            break;
        }
        if let Some(value) = line.to_ascii_lowercase().strip_prefix("content-length:") {
            content_length = value.trim().parse().unwrap_or(0);
        }
    }
    let mut body = vec![0u8; content_length];
    if content_length > 0 && reader.read_exact(&mut body).is_err() {
        return;
    }

    let (status, headers, response_body) = route(&method, &path, &state);

    let mut stream = reader.into_inner();
    let head = format!(
        "HTTP/1.1 {status}\r\nContent-Length: {}\r\n{headers}Connection: close\r\n\r\n",
        response_body.len(),
    );
    let _ = stream.write_all(head.as_bytes());
    let _ = stream.write_all(&response_body);
}

fn route(
    method: &str,
    path: &str,
    state: &Arc<Mutex<RegistryState>>,
) -> (&'static str, String, Vec<u8>) {
    let mut state = state.lock().unwrap();
    match (method, path) {
        ("GET", "/network-map") => {
            let headers = state
                .cache_control
                .as_ref()
                .map(|value| format!("Cache-Control: {value}\r\n"))
                .unwrap_or_default();
            ("200 OK", headers, state.map_body.clone())
        }
        ("GET", "/network-map/my-hostname") => (
            "200 OK",
            "Content-Type: text/plain\r\n".to_string(),
            state.hostname.clone().into_bytes(),
        ),
        ("POST", "/network-map/publish") => {
            state.publishes += 1;
            ("200 OK", String::new(), Vec::new())
        }
        ("POST", "/network-map/ack-parameters") => {
            state.acks += 1;
            ("200 OK", String::new(), Vec::new())
        }
        ("GET", _) if path.starts_with("/network-map/node-info/") => {
            let hash = path.trim_start_matches("/network-map/node-info/");
            if state.broken_node_infos.iter().any(|h| h == hash) {
                return ("500 Internal Server Error", String::new(), b"boom".to_vec());
            }
            match state.node_infos.get(hash) {
                Some(body) => ("200 OK", String::new(), body.clone()),
                None => ("404 Not Found", String::new(), Vec::new()),
            }
        }
        ("GET", _) if path.starts_with("/network-map/network-parameters/") => {
            let hash = path.trim_start_matches("/network-map/network-parameters/");
            match state.parameters.get(hash) {
                Some(body) => ("200 OK", String::new(), body.clone()),
                None => ("404 Not Found", String::new(), Vec::new()),
            }
        }
        _ => ("404 Not Found", String::new(), Vec::new()),
    }
}
