use std::{collections::BTreeMap, path::Path, time::Duration};

use anyhow::{Context, Result, bail};
use serde::Deserialize;

use crate::config::Config;

const IN_CLUSTER_TOKEN_PATH: &str = "/var/run/secrets/kubernetes.io/serviceaccount/token";
const IN_CLUSTER_CA_PATH: &str = "/var/run/secrets/kubernetes.io/serviceaccount/ca.crt";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

pub const APP_LABEL: &str = "app";
pub const COLUMN_LABEL: &str = "kwok.power/column";

/// One pod as observed in a single scan, before annotation parsing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PodRecord {
    pub namespace: String,
    pub name: String,
    pub node: String,
    pub app: String,
    pub column: String,
    pub annotations: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct PodList {
    #[serde(default)]
    items: Vec<Pod>,
}

#[derive(Debug, Default, Deserialize)]
struct Pod {
    #[serde(default)]
    metadata: PodMetadata,
    #[serde(default)]
    spec: PodSpec,
}

#[derive(Debug, Default, Deserialize)]
struct PodMetadata {
    #[serde(default)]
    name: String,
    #[serde(default)]
    namespace: String,
    #[serde(default)]
    labels: BTreeMap<String, String>,
    #[serde(default)]
    annotations: BTreeMap<String, String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PodSpec {
    #[serde(default)]
    node_name: String,
}

/// Lists pods from the Kubernetes API once per poll cycle. A transport or API
/// error fails the whole scan; the caller skips the cycle and retries after
/// the configured interval.
pub struct PodScanner {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
    label_selector: Option<String>,
    namespaces: Vec<String>,
}

impl PodScanner {
    pub fn from_config(config: &Config) -> Result<Self> {
        let base_url = resolve_base_url(
            &config.api_server,
            std::env::var("KUBERNETES_SERVICE_HOST").ok(),
            std::env::var("KUBERNETES_SERVICE_PORT").ok(),
        )?;
        let in_cluster = config.api_server.is_empty();

        let token = read_token(&config.kube_token_file, in_cluster)?;

        let mut builder = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT);
        if let Some(ca_pem) = read_ca(&config.kube_ca_file, in_cluster)? {
            let ca = reqwest::Certificate::from_pem(ca_pem.as_bytes())
                .context("parse Kubernetes CA certificate")?;
            builder = builder
                .tls_built_in_root_certs(false)
                .add_root_certificate(ca);
        }
        if config.kube_insecure {
            builder = builder.danger_accept_invalid_certs(true);
        }
        let client = builder.build().context("build Kubernetes HTTP client")?;

        Ok(Self {
            client,
            base_url,
            token,
            label_selector: config.label_selector().map(str::to_string),
            namespaces: config.namespace_list(),
        })
    }

    pub async fn scan(&self) -> Result<Vec<PodRecord>> {
        let mut records = Vec::new();
        if self.namespaces.is_empty() {
            let url = format!("{}/api/v1/pods", self.base_url);
            self.list_into(&url, &mut records).await?;
        } else {
            for ns in &self.namespaces {
                let url = format!("{}/api/v1/namespaces/{ns}/pods", self.base_url);
                self.list_into(&url, &mut records).await?;
            }
        }
        Ok(records)
    }

    async fn list_into(&self, url: &str, records: &mut Vec<PodRecord>) -> Result<()> {
        let mut req = self.client.get(url);
        if let Some(selector) = &self.label_selector {
            req = req.query(&[("labelSelector", selector.as_str())]);
        }
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }
        let list = req
            .send()
            .await
            .with_context(|| format!("list pods: {url}"))?
            .error_for_status()
            .with_context(|| format!("list pods: {url}"))?
            .json::<PodList>()
            .await
            .context("decode pod list")?;
        records.extend(list.items.into_iter().map(record_from));
        Ok(())
    }
}

fn resolve_base_url(
    api_server: &str,
    env_host: Option<String>,
    env_port: Option<String>,
) -> Result<String> {
    if !api_server.is_empty() {
        return Ok(api_server.trim_end_matches('/').to_string());
    }
    match (env_host, env_port) {
        (Some(host), Some(port)) if !host.is_empty() && !port.is_empty() => {
            Ok(format!("https://{host}:{port}"))
        }
        _ => bail!(
            "no Kubernetes API connection: set --api-server or run in-cluster \
             with a service account"
        ),
    }
}

fn read_token(token_file: &str, in_cluster: bool) -> Result<Option<String>> {
    if !token_file.is_empty() {
        let token = std::fs::read_to_string(token_file)
            .with_context(|| format!("read token file {token_file}"))?;
        return Ok(Some(token.trim().to_string()));
    }
    if in_cluster && Path::new(IN_CLUSTER_TOKEN_PATH).exists() {
        let token = std::fs::read_to_string(IN_CLUSTER_TOKEN_PATH)
            .context("read in-cluster service account token")?;
        return Ok(Some(token.trim().to_string()));
    }
    Ok(None)
}

fn read_ca(ca_file: &str, in_cluster: bool) -> Result<Option<String>> {
    if !ca_file.is_empty() {
        let pem = std::fs::read_to_string(ca_file)
            .with_context(|| format!("read CA file {ca_file}"))?;
        return Ok(Some(pem));
    }
    if in_cluster && Path::new(IN_CLUSTER_CA_PATH).exists() {
        let pem = std::fs::read_to_string(IN_CLUSTER_CA_PATH).context("read in-cluster CA")?;
        return Ok(Some(pem));
    }
    Ok(None)
}

fn record_from(pod: Pod) -> PodRecord {
    let app = pod.metadata.labels.get(APP_LABEL).cloned().unwrap_or_default();
    let column = pod
        .metadata
        .labels
        .get(COLUMN_LABEL)
        .cloned()
        .unwrap_or_default();
    PodRecord {
        namespace: pod.metadata.namespace,
        name: pod.metadata.name,
        node: pod.spec.node_name,
        app,
        column,
        annotations: pod.metadata.annotations,
    }
}
