use std::sync::LazyLock;

use regex::Regex;

use crate::error::{AdapterError, Result};

static DSQL_HOSTNAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9][a-z0-9-]*\.dsql(?:-[a-z0-9]+)?\.([a-z0-9-]+)\.on\.aws$")
        .expect("static regex")
});

/// Extract the AWS region embedded in a DSQL cluster hostname,
/// e.g. `abc.dsql.us-east-1.on.aws` -> `us-east-1`.
pub fn parse_region(host: &str) -> Result<String> {
    DSQL_HOSTNAME
        .captures(host)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| AdapterError::Config(format!("no region in hostname: {host:?}")))
}

static CLUSTER_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9]{26}$").expect("static regex"));

/// A bare cluster identifier: 26 lowercase alphanumerics. Anything else,
/// including dot-free names such as `localhost`, is used as a hostname.
pub fn is_cluster_id(host: &str) -> bool {
    CLUSTER_ID.is_match(host)
}

pub fn build_hostname(cluster_id: &str, region: &str) -> String {
    format!("{cluster_id}.dsql.{region}.on.aws")
}

/// Region from `AWS_REGION`, then `AWS_DEFAULT_REGION`.
pub fn region_from_env() -> Option<String> {
    ["AWS_REGION", "AWS_DEFAULT_REGION"]
        .iter()
        .filter_map(|k| std::env::var(k).ok())
        .find(|v| !v.is_empty())
}
