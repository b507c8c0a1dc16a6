use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Answer of `GET /_nodes/http`, used for sniffing.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct NodesInfo {
    #[serde(default)]
    nodes: HashMap<String, NodeInfo>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct NodeInfo {
    #[serde(default)]
    http: Option<NodeHttp>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct NodeHttp {
    publish_address: String,
}

impl NodesInfo {
    /// `host:port` of every node publishing an HTTP address, sorted by node id.
    pub fn publish_addresses(&self) -> Vec<String> {
        let mut ids: Vec<&String> = self.nodes.keys().collect();
        ids.sort();
        ids.into_iter()
            .filter_map(|id| self.nodes[id].http.as_ref())
            .filter_map(|http| normalize_publish_address(&http.publish_address))
            .collect()
    }
}

/// Publish addresses come as `ip:port`, `hostname/ip:port` or `inet[/ip:port]`
/// depending on the cluster version.
fn normalize_publish_address(address: &str) -> Option<String> {
    let address = address
        .trim()
        .trim_start_matches("inet[")
        .trim_end_matches(']');
    let (host_part, port) = address.rsplit_once(':')?;
    port.parse::<u16>().ok()?;
    let host = match host_part.split_once('/') {
        Some((_, ip)) => ip,
        None => host_part,
    };
    if host.is_empty() {
        return None;
    }
    Some(format!("{}:{}", host, port))
}
