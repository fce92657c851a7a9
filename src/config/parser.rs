//! INI configuration parser
//!
//! Parses `.conf` files with `[Interface]` and `[Peer]` sections. Keys map
//! one-to-one onto the IPC line protocol; key material is base64 (32-byte
//! little-endian private keys, 33-byte compressed public keys).

use std::net::{SocketAddr, ToSocketAddrs};
use std::path::Path;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use ipnet::IpNet;

use crate::error::ConfigError;
use crate::protocol::keys::{
    NoisePrivateKey, NoisePublicKey, SymmetricKey, PRIVATE_KEY_SIZE, PUBLIC_KEY_SIZE,
    SYMMETRIC_KEY_SIZE,
};

/// Complete parsed configuration
#[derive(Default)]
pub struct Config {
    pub interface: InterfaceConfig,
    pub peers: Vec<PeerConfig>,
}

/// `[Interface]` section
#[derive(Default)]
pub struct InterfaceConfig {
    pub private_key: NoisePrivateKey,
    pub listen_port: Option<u16>,
    pub fwmark: Option<i32>,
}

/// One `[Peer]` section
pub struct PeerConfig {
    pub public_key: NoisePublicKey,
    pub preshared_key: Option<SymmetricKey>,
    pub endpoint: Option<SocketAddr>,
    pub allowed_ips: Vec<IpNet>,
    pub persistent_keepalive: Option<u16>,
}

#[derive(Clone, Copy)]
enum Section {
    Interface,
    Peer,
}

struct PeerBuilder {
    public_key: Option<NoisePublicKey>,
    preshared_key: Option<SymmetricKey>,
    endpoint: Option<SocketAddr>,
    allowed_ips: Vec<IpNet>,
    persistent_keepalive: Option<u16>,
}

impl PeerBuilder {
    fn new() -> Self {
        PeerBuilder {
            public_key: None,
            preshared_key: None,
            endpoint: None,
            allowed_ips: Vec::new(),
            persistent_keepalive: None,
        }
    }

    fn build(self) -> Result<PeerConfig, ConfigError> {
        let public_key = self.public_key.ok_or(ConfigError::MissingField {
            field: "PublicKey in [Peer]".to_string(),
        })?;
        Ok(PeerConfig {
            public_key,
            preshared_key: self.preshared_key,
            endpoint: self.endpoint,
            allowed_ips: self.allowed_ips,
            persistent_keepalive: self.persistent_keepalive,
        })
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::FileNotFound {
                    path: path.display().to_string(),
                }
            } else {
                ConfigError::Io(e)
            }
        })?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let mut interface: Option<InterfaceConfig> = None;
        let mut peers: Vec<PeerConfig> = Vec::new();
        let mut section: Option<Section> = None;
        let mut current_peer: Option<PeerBuilder> = None;

        for (line_num, line) in content.lines().enumerate() {
            let line_num = line_num + 1;
            let line = line.trim();

            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            if line.eq_ignore_ascii_case("[interface]") {
                if let Some(peer) = current_peer.take() {
                    peers.push(peer.build()?);
                }
                section = Some(Section::Interface);
                continue;
            } else if line.eq_ignore_ascii_case("[peer]") {
                if let Some(peer) = current_peer.take() {
                    peers.push(peer.build()?);
                }
                section = Some(Section::Peer);
                current_peer = Some(PeerBuilder::new());
                continue;
            }

            let Some((key, value)) = line.split_once('=') else {
                return Err(ConfigError::ParseError {
                    line: line_num,
                    message: format!("Expected 'key = value', got: {line}"),
                });
            };
            let key = key.trim().to_lowercase();
            let value = value.trim();

            match section {
                Some(Section::Interface) => {
                    let iface = interface.get_or_insert_with(InterfaceConfig::default);
                    match key.as_str() {
                        "privatekey" => {
                            let raw: [u8; PRIVATE_KEY_SIZE] = decode_key(value, "PrivateKey")?;
                            iface.private_key = NoisePrivateKey::from_le_bytes(&raw);
                        }
                        "listenport" => {
                            iface.listen_port =
                                Some(value.parse().map_err(|_| ConfigError::ParseError {
                                    line: line_num,
                                    message: format!("Invalid ListenPort: {value}"),
                                })?);
                        }
                        "fwmark" => {
                            iface.fwmark =
                                Some(value.parse().map_err(|_| ConfigError::ParseError {
                                    line: line_num,
                                    message: format!("Invalid FwMark: {value}"),
                                })?);
                        }
                        _ => {
                            tracing::debug!(key = %key, "ignoring unknown interface key");
                        }
                    }
                }
                Some(Section::Peer) => {
                    let peer = current_peer.as_mut().ok_or(ConfigError::ParseError {
                        line: line_num,
                        message: "Peer value outside of [Peer] section".to_string(),
                    })?;
                    match key.as_str() {
                        "publickey" => {
                            let raw: [u8; PUBLIC_KEY_SIZE] = decode_key(value, "PublicKey")?;
                            peer.public_key = Some(NoisePublicKey(raw));
                        }
                        "presharedkey" => {
                            let raw: [u8; SYMMETRIC_KEY_SIZE] =
                                decode_key(value, "PresharedKey")?;
                            peer.preshared_key = Some(SymmetricKey(raw));
                        }
                        "endpoint" => {
                            peer.endpoint = Some(parse_endpoint(value)?);
                        }
                        "allowedips" => {
                            for ip in value.split(',') {
                                let ip = ip.trim();
                                if ip.is_empty() {
                                    continue;
                                }
                                peer.allowed_ips.push(ip.parse().map_err(|_| {
                                    ConfigError::InvalidCidr {
                                        value: ip.to_string(),
                                    }
                                })?);
                            }
                        }
                        "persistentkeepalive" => {
                            peer.persistent_keepalive =
                                Some(value.parse().map_err(|_| ConfigError::ParseError {
                                    line: line_num,
                                    message: format!("Invalid PersistentKeepalive: {value}"),
                                })?);
                        }
                        _ => {
                            tracing::debug!(key = %key, "ignoring unknown peer key");
                        }
                    }
                }
                None => {
                    return Err(ConfigError::ParseError {
                        line: line_num,
                        message: "Configuration value outside of any section".to_string(),
                    });
                }
            }
        }

        if let Some(peer) = current_peer.take() {
            peers.push(peer.build()?);
        }

        let interface = interface.ok_or(ConfigError::MissingField {
            field: "[Interface] section".to_string(),
        })?;
        if interface.private_key.is_zero() {
            return Err(ConfigError::MissingField {
                field: "PrivateKey".to_string(),
            });
        }

        Ok(Config { interface, peers })
    }

    /// Render back into the INI surface (showconf)
    pub fn format(&self) -> String {
        let mut out = String::from("[Interface]\n");
        out.push_str(&format!(
            "PrivateKey = {}\n",
            BASE64.encode(self.interface.private_key.to_le_bytes())
        ));
        if let Some(port) = self.interface.listen_port {
            out.push_str(&format!("ListenPort = {port}\n"));
        }
        if let Some(mark) = self.interface.fwmark {
            out.push_str(&format!("FwMark = {mark}\n"));
        }

        for peer in &self.peers {
            out.push_str("\n[Peer]\n");
            out.push_str(&format!(
                "PublicKey = {}\n",
                BASE64.encode(peer.public_key.as_bytes())
            ));
            if let Some(psk) = &peer.preshared_key {
                out.push_str(&format!(
                    "PresharedKey = {}\n",
                    BASE64.encode(psk.as_bytes())
                ));
            }
            if !peer.allowed_ips.is_empty() {
                let nets: Vec<String> =
                    peer.allowed_ips.iter().map(|n| n.to_string()).collect();
                out.push_str(&format!("AllowedIPs = {}\n", nets.join(", ")));
            }
            if let Some(endpoint) = peer.endpoint {
                out.push_str(&format!("Endpoint = {endpoint}\n"));
            }
            if let Some(keepalive) = peer.persistent_keepalive {
                out.push_str(&format!("PersistentKeepalive = {keepalive}\n"));
            }
        }
        out
    }

    /// Render as an IPC `set` transaction body
    pub fn to_uapi(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!(
            "private_key={}\n",
            self.interface.private_key.to_hex()
        ));
        if let Some(port) = self.interface.listen_port {
            out.push_str(&format!("listen_port={port}\n"));
        }
        if let Some(mark) = self.interface.fwmark {
            out.push_str(&format!("fwmark={mark}\n"));
        }
        out.push_str("replace_peers=true\n");
        for peer in &self.peers {
            out.push_str(&peer.to_uapi());
        }
        out
    }
}

impl PeerConfig {
    /// Render this peer as IPC `set` lines
    pub fn to_uapi(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("public_key={}\n", self.public_key.to_hex()));
        out.push_str("protocol_version=1\n");
        if let Some(psk) = &self.preshared_key {
            out.push_str(&format!("preshared_key={}\n", psk.to_hex()));
        }
        if let Some(endpoint) = self.endpoint {
            out.push_str(&format!("endpoint={endpoint}\n"));
        }
        out.push_str("replace_allowed_ips=true\n");
        for net in &self.allowed_ips {
            out.push_str(&format!("allowed_ip={net}\n"));
        }
        if let Some(keepalive) = self.persistent_keepalive {
            out.push_str(&format!("persistent_keepalive_interval={keepalive}\n"));
        }
        out
    }
}

fn decode_key<const N: usize>(value: &str, field: &str) -> Result<[u8; N], ConfigError> {
    let bytes = BASE64.decode(value).map_err(|_| ConfigError::InvalidKey {
        field: field.to_string(),
    })?;
    bytes.try_into().map_err(|_| ConfigError::InvalidKey {
        field: field.to_string(),
    })
}

fn parse_endpoint(value: &str) -> Result<SocketAddr, ConfigError> {
    if let Ok(addr) = value.parse::<SocketAddr>() {
        return Ok(addr);
    }
    value
        .to_socket_addrs()
        .ok()
        .and_then(|mut addrs| addrs.next())
        .ok_or(ConfigError::InvalidAddress {
            value: value.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;

    fn sample_config() -> (String, NoisePrivateKey, NoisePublicKey) {
        let sk = NoisePrivateKey::generate(&mut OsRng).unwrap();
        let peer_pk = NoisePrivateKey::generate(&mut OsRng)
            .unwrap()
            .public_key()
            .unwrap();
        let content = format!(
            "[Interface]\n\
             PrivateKey = {}\n\
             ListenPort = 51820\n\
             \n\
             [Peer]\n\
             PublicKey = {}\n\
             AllowedIPs = 10.0.0.0/24, 10.1.0.0/16\n\
             Endpoint = 127.0.0.1:51821\n\
             PersistentKeepalive = 25\n",
            BASE64.encode(sk.to_le_bytes()),
            BASE64.encode(peer_pk.as_bytes()),
        );
        (content, sk, peer_pk)
    }

    #[test]
    fn test_parse_config() {
        let (content, sk, peer_pk) = sample_config();
        let config = Config::parse(&content).unwrap();

        assert!(config.interface.private_key == sk);
        assert_eq!(config.interface.listen_port, Some(51820));
        assert_eq!(config.peers.len(), 1);

        let peer = &config.peers[0];
        assert_eq!(peer.public_key, peer_pk);
        assert_eq!(peer.allowed_ips.len(), 2);
        assert_eq!(peer.persistent_keepalive, Some(25));
        assert_eq!(
            peer.endpoint.unwrap(),
            "127.0.0.1:51821".parse::<SocketAddr>().unwrap()
        );
    }

    #[test]
    fn test_format_parse_roundtrip() {
        let (content, _, _) = sample_config();
        let config = Config::parse(&content).unwrap();
        let reparsed = Config::parse(&config.format()).unwrap();

        assert!(reparsed.interface.private_key == config.interface.private_key);
        assert_eq!(reparsed.peers.len(), config.peers.len());
        assert_eq!(reparsed.peers[0].public_key, config.peers[0].public_key);
        assert_eq!(reparsed.peers[0].allowed_ips, config.peers[0].allowed_ips);
    }

    #[test]
    fn test_to_uapi_applies() {
        let (content, _, peer_pk) = sample_config();
        let config = Config::parse(&content).unwrap();

        let device = crate::device::Device::new();
        device.ipc_set_operation(&config.to_uapi()).unwrap();
        assert_eq!(device.listen_port(), 51820);
        assert!(device.lookup_peer(&peer_pk).is_some());
    }

    #[test]
    fn test_missing_private_key_rejected() {
        let result = Config::parse("[Interface]\nListenPort = 1\n");
        assert!(matches!(result, Err(ConfigError::MissingField { .. })));
    }

    #[test]
    fn test_bad_key_rejected() {
        let result = Config::parse("[Interface]\nPrivateKey = not-base64!\n");
        assert!(matches!(result, Err(ConfigError::InvalidKey { .. })));
    }

    #[test]
    fn test_value_outside_section_rejected() {
        let result = Config::parse("ListenPort = 1\n");
        assert!(matches!(result, Err(ConfigError::ParseError { .. })));
    }
}
