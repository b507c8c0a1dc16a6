use semver::Version as Semver;
use serde::{Deserialize, Serialize};

/// Answer of `GET /` on a cluster node.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ServerInfo {
    #[serde(rename = "name")]
    hostname: String,
    #[serde(rename = "cluster_name")]
    name: String,
    #[serde(rename = "cluster_uuid", default)]
    uuid: Option<String>,
    version: Version,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Version {
    number: String,
    #[serde(default)]
    lucene_version: Option<String>,
}

impl ServerInfo {
    pub fn get_hostname(&self) -> &String {
        &self.hostname
    }
    pub fn get_cluster_name(&self) -> &String {
        &self.name
    }
    pub fn get_uuid(&self) -> &Option<String> {
        &self.uuid
    }
    pub fn get_version(&self) -> &String {
        &self.version.number
    }
    pub fn get_lucene_version(&self) -> String {
        self.version.lucene_version.clone().unwrap_or_default()
    }

    /// Major version, `None` when the reported number is not semver
    /// (e.g. snapshot builds like `8.0.0-SNAPSHOT` parse fine, `7.x` does not).
    pub fn get_version_major(&self) -> Option<u64> {
        match Semver::parse(&self.version.number) {
            Ok(version) => Some(version.major),
            Err(_) => self
                .version
                .number
                .split('.')
                .next()
                .and_then(|major| major.parse().ok()),
        }
    }
}
