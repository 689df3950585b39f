//! Azure Resource Manager backend
//!
//! Control-plane calls go to the resource manager REST API, utilization comes
//! from Azure Monitor and blob tier changes use the blob data plane. The
//! subscription, endpoints and tokens live in an explicit [`ArmContext`] /
//! [`ArmBackend`] pair created once per run.

use chrono::{DateTime, Utc};
use reqwest::header::CONTENT_LENGTH;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

use super::{async_trait, resource_group_of, ComputeControl, DatabaseControl, StorageControl};
use crate::error::{OptimizerError, Result};
use crate::metrics::{Aggregation, MetricQuery, MetricsSource};
use crate::models::{
    AccessTier, BlobItem, Database, DatabaseEngine, PowerState, Scope, StorageAccount,
    VirtualMachine,
};

pub const ARM_ENDPOINT: &str = "https://management.azure.com/";
pub const LOGIN_ENDPOINT: &str = "https://login.microsoftonline.com/";

const MANAGEMENT_SCOPE: &str = "https://management.azure.com/.default";
const STORAGE_SCOPE: &str = "https://storage.azure.com/.default";

const COMPUTE_API_VERSION: &str = "2023-03-01";
const SQL_API_VERSION: &str = "2021-11-01";
const COSMOS_API_VERSION: &str = "2023-04-15";
const STORAGE_API_VERSION: &str = "2023-01-01";
const MONITOR_API_VERSION: &str = "2018-01-01";
const BLOB_SERVICE_VERSION: &str = "2021-08-06";

/// How the backend obtains bearer tokens
#[derive(Debug, Clone)]
pub enum Credential {
    /// Service principal, exchanged for tokens via the client-credentials flow
    ClientSecret {
        tenant_id: String,
        client_id: String,
        client_secret: String,
    },
    /// Pre-acquired tokens
    AccessToken {
        management: String,
        storage: Option<String>,
    },
}

impl Credential {
    /// Read the credential from `AZURE_ACCESS_TOKEN` or, failing that,
    /// `AZURE_TENANT_ID` / `AZURE_CLIENT_ID` / `AZURE_CLIENT_SECRET`
    pub fn from_env() -> Result<Self> {
        if let Ok(management) = std::env::var("AZURE_ACCESS_TOKEN") {
            return Ok(Credential::AccessToken {
                management,
                storage: std::env::var("AZURE_STORAGE_ACCESS_TOKEN").ok(),
            });
        }

        let var = |name: &str| {
            std::env::var(name)
                .map_err(|_| OptimizerError::Authentication(format!("{} is not set", name)))
        };
        Ok(Credential::ClientSecret {
            tenant_id: var("AZURE_TENANT_ID")?,
            client_id: var("AZURE_CLIENT_ID")?,
            client_secret: var("AZURE_CLIENT_SECRET")?,
        })
    }
}

/// Subscription and endpoints a run talks to
#[derive(Debug, Clone)]
pub struct ArmContext {
    pub subscription_id: String,
    pub management_endpoint: Url,
    pub login_endpoint: Url,
    /// Blob service base; `None` uses `https://<account>.blob.core.windows.net/`
    pub blob_endpoint: Option<Url>,
}

impl ArmContext {
    pub fn new(subscription_id: impl Into<String>) -> Result<Self> {
        Ok(Self {
            subscription_id: subscription_id.into(),
            management_endpoint: Url::parse(ARM_ENDPOINT)?,
            login_endpoint: Url::parse(LOGIN_ENDPOINT)?,
            blob_endpoint: None,
        })
    }

    pub fn with_management_endpoint(mut self, endpoint: &str) -> Result<Self> {
        self.management_endpoint = Url::parse(endpoint)?;
        Ok(self)
    }

    pub fn with_login_endpoint(mut self, endpoint: &str) -> Result<Self> {
        self.login_endpoint = Url::parse(endpoint)?;
        Ok(self)
    }

    pub fn with_blob_endpoint(mut self, endpoint: &str) -> Result<Self> {
        self.blob_endpoint = Some(Url::parse(endpoint)?);
        Ok(self)
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Deserialize)]
struct Page<T> {
    #[serde(default = "Vec::new")]
    value: Vec<T>,
    #[serde(rename = "nextLink")]
    next_link: Option<String>,
}

#[derive(Deserialize)]
struct ArmResource {
    id: String,
    name: String,
}

#[derive(Deserialize)]
struct ArmVm {
    id: String,
    name: String,
    properties: VmProperties,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct VmProperties {
    hardware_profile: HardwareProfile,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct HardwareProfile {
    vm_size: String,
}

#[derive(Deserialize)]
struct InstanceView {
    #[serde(default)]
    statuses: Vec<InstanceStatus>,
}

#[derive(Deserialize)]
struct InstanceStatus {
    code: String,
}

#[derive(Deserialize)]
struct ArmSqlDatabase {
    id: String,
    name: String,
    sku: Option<ArmSku>,
    properties: Option<SqlDatabaseProperties>,
}

#[derive(Deserialize)]
struct ArmSku {
    name: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SqlDatabaseProperties {
    current_service_objective_name: Option<String>,
}

#[derive(Deserialize)]
struct MetricsResponse {
    #[serde(default)]
    value: Vec<MetricEntry>,
}

#[derive(Deserialize)]
struct MetricEntry {
    #[serde(default)]
    timeseries: Vec<TimeSeries>,
}

#[derive(Deserialize)]
struct TimeSeries {
    #[serde(default)]
    data: Vec<MetricValue>,
}

#[derive(Deserialize)]
struct MetricValue {
    average: Option<f64>,
    total: Option<f64>,
    maximum: Option<f64>,
}

impl MetricValue {
    fn get(&self, aggregation: Aggregation) -> Option<f64> {
        match aggregation {
            Aggregation::Average => self.average,
            Aggregation::Total => self.total,
            Aggregation::Maximum => self.maximum,
        }
    }
}

#[derive(Deserialize)]
struct ContainerListing {
    #[serde(rename = "Containers", default)]
    containers: Containers,
    #[serde(rename = "NextMarker")]
    next_marker: Option<String>,
}

#[derive(Deserialize, Default)]
struct Containers {
    #[serde(rename = "Container", default)]
    items: Vec<XmlContainer>,
}

#[derive(Deserialize)]
struct XmlContainer {
    #[serde(rename = "Name")]
    name: String,
}

#[derive(Deserialize)]
struct BlobListing {
    #[serde(rename = "Blobs", default)]
    blobs: Blobs,
    #[serde(rename = "NextMarker")]
    next_marker: Option<String>,
}

#[derive(Deserialize, Default)]
struct Blobs {
    #[serde(rename = "Blob", default)]
    items: Vec<XmlBlob>,
}

#[derive(Deserialize)]
struct XmlBlob {
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "Properties")]
    properties: XmlBlobProperties,
}

#[derive(Deserialize)]
struct XmlBlobProperties {
    #[serde(rename = "Content-Length", default)]
    content_length: u64,
    #[serde(rename = "AccessTier")]
    access_tier: Option<String>,
    #[serde(rename = "Last-Modified")]
    last_modified: Option<String>,
    #[serde(rename = "LastAccessTime")]
    last_access_time: Option<String>,
}

impl XmlBlob {
    /// Blobs without a Hot/Cool/Archive tier (page blobs, premium tiers) are dropped
    fn into_item(self, container: &str) -> Option<BlobItem> {
        let tier = self.properties.access_tier.as_deref()?.parse::<AccessTier>().ok()?;
        Some(BlobItem {
            container: container.to_string(),
            name: self.name,
            size_bytes: self.properties.content_length,
            tier,
            last_accessed: self.properties.last_access_time.as_deref().and_then(parse_http_date),
            last_modified: self.properties.last_modified.as_deref().and_then(parse_http_date),
        })
    }
}

/// Blob service timestamps use the RFC 1123 form, `Wed, 09 Sep 2009 09:20:02 GMT`
fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(value)
        .ok()
        .map(|date| date.with_timezone(&Utc))
}

/// REST client for the resource manager, monitor and blob endpoints
pub struct ArmBackend {
    http: Client,
    context: ArmContext,
    management_token: String,
    storage_token: Option<String>,
}

impl ArmBackend {
    /// Authenticate and build a backend; any failure here is fatal to the run
    pub async fn connect(context: ArmContext, credential: &Credential) -> Result<Self> {
        let http = Client::builder().timeout(Duration::from_secs(30)).build()?;

        let (management_token, storage_token) = match credential {
            Credential::AccessToken {
                management,
                storage,
            } => (management.clone(), storage.clone()),
            Credential::ClientSecret {
                tenant_id,
                client_id,
                client_secret,
            } => {
                let request = |scope: &'static str| {
                    acquire_token(
                        &http,
                        &context.login_endpoint,
                        tenant_id,
                        client_id,
                        client_secret,
                        scope,
                    )
                };
                let management = request(MANAGEMENT_SCOPE).await?;
                let storage = match request(STORAGE_SCOPE).await {
                    Ok(token) => Some(token),
                    Err(e) => {
                        warn!(error = %e, "No blob data-plane token, tier changes will fail");
                        None
                    }
                };
                (management, storage)
            }
        };

        info!(
            subscription = %context.subscription_id,
            endpoint = %context.management_endpoint,
            "Connected to resource manager"
        );

        Ok(Self {
            http,
            context,
            management_token,
            storage_token,
        })
    }

    fn url(&self, path: &str, api_version: &str) -> Result<Url> {
        let mut url = self
            .context
            .management_endpoint
            .join(path.trim_start_matches('/'))?;
        url.query_pairs_mut().append_pair("api-version", api_version);
        Ok(url)
    }

    fn provider_path(&self, resource_group: &str, provider: &str) -> String {
        format!(
            "subscriptions/{}/resourceGroups/{}/providers/{}",
            self.context.subscription_id, resource_group, provider
        )
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response> {
        let response = request.bearer_auth(&self.management_token).send().await?;
        check(response).await
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T> {
        let response = self.send(self.http.get(url)).await?;
        response
            .json()
            .await
            .map_err(|e| OptimizerError::InvalidResponse(e.to_string()))
    }

    /// GET a collection, following `nextLink` pages
    async fn list<T: DeserializeOwned>(&self, path: &str, api_version: &str) -> Result<Vec<T>> {
        let mut next = Some(self.url(path, api_version)?);
        let mut items = Vec::new();

        while let Some(url) = next.take() {
            let page: Page<T> = self.get_json(url).await?;
            items.extend(page.value);
            next = page.next_link.map(|link| Url::parse(&link)).transpose()?;
        }

        Ok(items)
    }

    async fn post_action(&self, resource_id: &str, action: &str) -> Result<()> {
        let url = self.url(&format!("{}/{}", resource_id, action), COMPUTE_API_VERSION)?;
        self.send(self.http.post(url).header(CONTENT_LENGTH, 0)).await?;
        Ok(())
    }

    fn in_scope<'a>(scope: &'a Scope, resource_id: &'a str) -> &'a str {
        resource_group_of(resource_id).unwrap_or(&scope.resource_group)
    }

    /// Blob service URL for `account` with `segments` appended to the path
    fn blob_service_url<'a>(
        &self,
        account: &StorageAccount,
        segments: impl IntoIterator<Item = &'a str>,
    ) -> Result<Url> {
        let mut url = match &self.context.blob_endpoint {
            Some(base) => base.join(&format!("{}/", account.name))?,
            None => Url::parse(&format!("https://{}.blob.core.windows.net/", account.name))?,
        };

        let base = url.to_string();
        url.path_segments_mut()
            .map_err(|_| OptimizerError::Unsupported(format!("blob endpoint {}", base)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn blob_url(&self, account: &StorageAccount, blob: &BlobItem) -> Result<Url> {
        let segments = std::iter::once(blob.container.as_str()).chain(blob.name.split('/'));
        let mut url = self.blob_service_url(account, segments)?;
        url.query_pairs_mut().append_pair("comp", "tier");
        Ok(url)
    }

    fn storage_token(&self) -> Result<&str> {
        self.storage_token.as_deref().ok_or_else(|| {
            OptimizerError::Unsupported("no blob data-plane token available".to_string())
        })
    }

    /// GET a blob service listing and decode its XML body
    async fn get_blob_listing<T: DeserializeOwned>(&self, url: Url) -> Result<T> {
        let response = self
            .http
            .get(url)
            .bearer_auth(self.storage_token()?)
            .header("x-ms-version", BLOB_SERVICE_VERSION)
            .send()
            .await?;
        let body = check(response).await?.text().await?;
        quick_xml::de::from_str(&body).map_err(|e| OptimizerError::InvalidResponse(e.to_string()))
    }

    async fn list_containers(&self, account: &StorageAccount) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let mut marker: Option<String> = None;

        loop {
            let mut url = self.blob_service_url(account, std::iter::empty::<&str>())?;
            {
                let mut query = url.query_pairs_mut();
                query.append_pair("comp", "list");
                if let Some(marker) = &marker {
                    query.append_pair("marker", marker);
                }
            }

            let page: ContainerListing = self.get_blob_listing(url).await?;
            names.extend(page.containers.items.into_iter().map(|c| c.name));
            marker = page.next_marker.filter(|m| !m.is_empty());
            if marker.is_none() {
                return Ok(names);
            }
        }
    }

    async fn list_container_blobs(
        &self,
        account: &StorageAccount,
        container: &str,
    ) -> Result<Vec<BlobItem>> {
        let mut blobs = Vec::new();
        let mut marker: Option<String> = None;

        loop {
            let mut url = self.blob_service_url(account, [container])?;
            {
                let mut query = url.query_pairs_mut();
                query
                    .append_pair("restype", "container")
                    .append_pair("comp", "list")
                    .append_pair("include", "metadata");
                if let Some(marker) = &marker {
                    query.append_pair("marker", marker);
                }
            }

            let page: BlobListing = self.get_blob_listing(url).await?;
            for blob in page.blobs.items {
                match blob.into_item(container) {
                    Some(item) => blobs.push(item),
                    None => debug!(
                        account = %account.name,
                        container = %container,
                        "Skipping blob without a Hot, Cool or Archive tier"
                    ),
                }
            }
            marker = page.next_marker.filter(|m| !m.is_empty());
            if marker.is_none() {
                return Ok(blobs);
            }
        }
    }
}

async fn acquire_token(
    http: &Client,
    login_endpoint: &Url,
    tenant_id: &str,
    client_id: &str,
    client_secret: &str,
    scope: &str,
) -> Result<String> {
    let url = login_endpoint.join(&format!("{}/oauth2/v2.0/token", tenant_id))?;
    let response = http
        .post(url)
        .form(&[
            ("grant_type", "client_credentials"),
            ("client_id", client_id),
            ("client_secret", client_secret),
            ("scope", scope),
        ])
        .send()
        .await
        .map_err(|e| OptimizerError::Authentication(e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(OptimizerError::Authentication(format!(
            "token endpoint returned {}: {}",
            status, body
        )));
    }

    let token: TokenResponse = response
        .json()
        .await
        .map_err(|e| OptimizerError::Authentication(e.to_string()))?;
    debug!(scope = %scope, "Acquired access token");
    Ok(token.access_token)
}

async fn check(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    if status == StatusCode::UNAUTHORIZED {
        return Err(OptimizerError::Authentication(body));
    }
    Err(OptimizerError::Api {
        status: status.as_u16(),
        body,
    })
}

#[async_trait]
impl ComputeControl for ArmBackend {
    async fn list_vms(&self, scope: &Scope) -> Result<Vec<VirtualMachine>> {
        let path = self.provider_path(&scope.resource_group, "Microsoft.Compute/virtualMachines");
        let vms: Vec<ArmVm> = self.list(&path, COMPUTE_API_VERSION).await?;

        Ok(vms
            .into_iter()
            .map(|vm| VirtualMachine {
                resource_group: Self::in_scope(scope, &vm.id).to_string(),
                id: vm.id,
                name: vm.name,
                size: vm.properties.hardware_profile.vm_size,
            })
            .filter(|vm| scope.matches(&vm.resource_group, &vm.name))
            .collect())
    }

    async fn power_state(&self, vm: &VirtualMachine) -> Result<PowerState> {
        let url = self.url(&format!("{}/instanceView", vm.id), COMPUTE_API_VERSION)?;
        let view: InstanceView = self.get_json(url).await?;

        Ok(view
            .statuses
            .iter()
            .find(|s| s.code.starts_with("PowerState/"))
            .map(|s| PowerState::from_status_code(&s.code))
            .unwrap_or(PowerState::Unknown))
    }

    async fn deallocate(&self, vm: &VirtualMachine) -> Result<()> {
        self.post_action(&vm.id, "deallocate").await
    }

    async fn resize(&self, vm: &VirtualMachine, size: &str) -> Result<()> {
        let url = self.url(&vm.id, COMPUTE_API_VERSION)?;
        let body = json!({ "properties": { "hardwareProfile": { "vmSize": size } } });
        self.send(self.http.patch(url).json(&body)).await?;
        Ok(())
    }

    async fn start(&self, vm: &VirtualMachine) -> Result<()> {
        self.post_action(&vm.id, "start").await
    }
}

#[async_trait]
impl StorageControl for ArmBackend {
    async fn list_accounts(&self, scope: &Scope) -> Result<Vec<StorageAccount>> {
        let path = self.provider_path(&scope.resource_group, "Microsoft.Storage/storageAccounts");
        let accounts: Vec<ArmResource> = self.list(&path, STORAGE_API_VERSION).await?;

        Ok(accounts
            .into_iter()
            .map(|a| StorageAccount {
                resource_group: Self::in_scope(scope, &a.id).to_string(),
                id: a.id,
                name: a.name,
            })
            .filter(|a| scope.matches(&a.resource_group, &a.name))
            .collect())
    }

    async fn list_blobs(&self, account: &StorageAccount) -> Result<Vec<BlobItem>> {
        let mut blobs = Vec::new();
        for container in self.list_containers(account).await? {
            blobs.extend(self.list_container_blobs(account, &container).await?);
        }
        debug!(account = %account.name, blobs = blobs.len(), "Listed blobs");
        Ok(blobs)
    }

    async fn set_blob_tier(
        &self,
        account: &StorageAccount,
        blob: &BlobItem,
        tier: AccessTier,
    ) -> Result<()> {
        let token = self.storage_token()?;
        let url = self.blob_url(account, blob)?;

        let response = self
            .http
            .put(url)
            .bearer_auth(token)
            .header("x-ms-access-tier", tier.to_string())
            .header("x-ms-version", BLOB_SERVICE_VERSION)
            .header(CONTENT_LENGTH, 0)
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }
}

#[async_trait]
impl DatabaseControl for ArmBackend {
    async fn list_databases(&self, scope: &Scope) -> Result<Vec<Database>> {
        let mut databases = Vec::new();

        let servers_path = self.provider_path(&scope.resource_group, "Microsoft.Sql/servers");
        let servers: Vec<ArmResource> = self.list(&servers_path, SQL_API_VERSION).await?;
        for server in servers {
            let dbs: Vec<ArmSqlDatabase> = self
                .list(&format!("{}/databases", server.id), SQL_API_VERSION)
                .await?;

            for db in dbs.into_iter().filter(|db| db.name != "master") {
                let service_objective = db
                    .properties
                    .and_then(|p| p.current_service_objective_name)
                    .or(db.sku.map(|s| s.name))
                    .unwrap_or_default();

                databases.push(Database {
                    resource_group: Self::in_scope(scope, &db.id).to_string(),
                    id: db.id,
                    name: db.name,
                    engine: DatabaseEngine::Sql {
                        server: server.name.clone(),
                        service_objective,
                    },
                });
            }
        }

        let cosmos_path =
            self.provider_path(&scope.resource_group, "Microsoft.DocumentDB/databaseAccounts");
        let accounts: Vec<ArmResource> = self.list(&cosmos_path, COSMOS_API_VERSION).await?;
        databases.extend(accounts.into_iter().map(|a| Database {
            resource_group: Self::in_scope(scope, &a.id).to_string(),
            id: a.id,
            name: a.name,
            engine: DatabaseEngine::Cosmos {
                provisioned_ru: None,
            },
        }));

        Ok(databases
            .into_iter()
            .filter(|db| scope.matches(&db.resource_group, &db.name))
            .collect())
    }

    async fn set_service_objective(
        &self,
        database: &Database,
        objective: &str,
        edition: Option<&str>,
    ) -> Result<()> {
        if !matches!(database.engine, DatabaseEngine::Sql { .. }) {
            return Err(OptimizerError::Unsupported(format!(
                "{} has no service objective",
                database.name
            )));
        }

        let url = self.url(&database.id, SQL_API_VERSION)?;
        let mut sku = json!({ "name": objective });
        if let Some(edition) = edition {
            sku["tier"] = json!(edition);
        }
        self.send(self.http.patch(url).json(&json!({ "sku": sku })))
            .await?;
        Ok(())
    }
}

#[async_trait]
impl MetricsSource for ArmBackend {
    async fn query(&self, query: &MetricQuery<'_>) -> Result<Vec<f64>> {
        let mut url = self.url(
            &format!("{}/providers/Microsoft.Insights/metrics", query.resource_id),
            MONITOR_API_VERSION,
        )?;
        url.query_pairs_mut()
            .append_pair("metricnames", query.metric)
            .append_pair("timespan", &query.window.to_timespan())
            .append_pair("interval", "PT1H")
            .append_pair("aggregation", &query.aggregation.to_string());

        let response: MetricsResponse = match self.get_json(url).await {
            Ok(response) => response,
            Err(e @ OptimizerError::Authentication(_)) => return Err(e),
            // Metric not defined for this resource type
            Err(OptimizerError::Api { status: 400, body }) => {
                debug!(
                    resource_id = %query.resource_id,
                    metric = %query.metric,
                    body = %body,
                    "Metric not available"
                );
                return Ok(Vec::new());
            }
            Err(e) => {
                return Err(OptimizerError::Metrics {
                    resource: query.resource_id.to_string(),
                    message: e.to_string(),
                })
            }
        };

        Ok(response
            .value
            .iter()
            .flat_map(|entry| entry.timeseries.iter())
            .flat_map(|series| series.data.iter())
            .filter_map(|point| point.get(query.aggregation))
            .collect())
    }
}
