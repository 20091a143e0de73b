//! End-to-end batch execution against mock HTTP servers.

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;

use convoy::batch::{ApiCall, ApiFamily, BatchClient, BatchRequest, ClientConfig, HttpMethod};
use convoy::error::Result;
use convoy::mapping::JsonMapper;
use convoy::model::{
    DomainModel, EntityInfo, ModelCollection, SharedModel, Transient,
};
use convoy::transport::{AnonymousAuth, AuthProvider, OutboundRequest};
use url::Url;

// ---------------------------------------------------------------------
// Test doubles: a field-bag entity, a parent collection, and a mapper
// that writes decoded JSON fields into the bound entity.
// ---------------------------------------------------------------------

struct TestEntity {
    kind: &'static str,
    fields: HashMap<String, Value>,
    deleted: bool,
    committed: bool,
}

impl TestEntity {
    fn shared(kind: &'static str) -> SharedModel {
        Arc::new(Mutex::new(Self {
            kind,
            fields: HashMap::new(),
            deleted: false,
            committed: false,
        }))
    }

    fn shared_with(kind: &'static str, field: &str, value: Value) -> SharedModel {
        let model = Self::shared(kind);
        model
            .lock()
            .unwrap()
            .as_any_mut()
            .downcast_mut::<TestEntity>()
            .unwrap()
            .fields
            .insert(field.to_string(), value);
        model
    }
}

impl DomainModel for TestEntity {
    fn type_name(&self) -> &'static str {
        self.kind
    }

    fn has_value(&self, field: &str) -> bool {
        self.fields.get(field).map(|v| !v.is_null()).unwrap_or(false)
    }

    fn get_value(&self, field: &str) -> Option<Value> {
        self.fields.get(field).cloned()
    }

    fn merge_from(&mut self, other: &dyn DomainModel) {
        if let Some(other) = other.as_any().downcast_ref::<TestEntity>() {
            for (name, value) in &other.fields {
                self.fields
                    .entry(name.clone())
                    .or_insert_with(|| value.clone());
            }
        }
    }

    fn set_deleted(&mut self) {
        self.deleted = true;
    }

    fn is_deleted(&self) -> bool {
        self.deleted
    }

    fn transient(&mut self) -> Option<&mut dyn Transient> {
        Some(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl Transient for TestEntity {
    fn commit(&mut self) {
        self.committed = true;
    }
}

fn field(model: &SharedModel, name: &str) -> Option<Value> {
    model.lock().unwrap().get_value(name)
}

fn is_deleted(model: &SharedModel) -> bool {
    model.lock().unwrap().is_deleted()
}

struct TestCollection {
    members: Mutex<Vec<SharedModel>>,
}

impl TestCollection {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            members: Mutex::new(Vec::new()),
        })
    }

    fn insert(&self, model: SharedModel) {
        self.members.lock().unwrap().push(model);
    }

    fn contains(&self, model: &SharedModel) -> bool {
        self.members
            .lock()
            .unwrap()
            .iter()
            .any(|m| Arc::ptr_eq(m, model))
    }
}

impl ModelCollection for TestCollection {
    fn remove(&self, model: &SharedModel) -> bool {
        let mut members = self.members.lock().unwrap();
        let before = members.len();
        members.retain(|m| !Arc::ptr_eq(m, model));
        members.len() != before
    }
}

/// Writes every top-level field of the response object into the model,
/// applying the request's casting and post-mapping hooks.
struct FieldMapper;

#[async_trait]
impl JsonMapper for FieldMapper {
    async fn map(&self, request: &mut BatchRequest) -> Result<()> {
        let Some(text) = request.response_json.clone() else {
            return Ok(());
        };
        let mut parsed: Value = serde_json::from_str(&text)?;
        if let Some(cast) = &request.from_json_cast {
            parsed = cast(&parsed);
        }
        if let (Some(model), Value::Object(object)) = (request.model.upgrade(), parsed) {
            let mut guard = model.lock().unwrap();
            let entity = guard
                .as_any_mut()
                .downcast_mut::<TestEntity>()
                .expect("test models are TestEntity");
            for (name, value) in object {
                entity.fields.insert(name, value);
            }
        }
        if let Some(hook) = &request.post_mapping {
            hook(&text);
        }
        Ok(())
    }
}

/// Bearer-token provider used to check credentials reach the wire.
struct StaticTokenAuth;

#[async_trait]
impl AuthProvider for StaticTokenAuth {
    async fn authenticate(&self, _target: &Url, request: &mut OutboundRequest) -> Result<()> {
        request
            .headers
            .push(("Authorization".to_string(), "Bearer test-token".to_string()));
        Ok(())
    }
}

fn init_logs() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn test_config(graph_base: &str) -> ClientConfig {
    ClientConfig {
        graph_base: graph_base.to_string(),
        max_retries: 1,
        retry_base_delay: 1,
        ..Default::default()
    }
}

fn client(graph_base: &str) -> BatchClient {
    init_logs();
    BatchClient::new(
        test_config(graph_base),
        Arc::new(AnonymousAuth),
        Arc::new(FieldMapper),
    )
}

fn add(
    client: &mut BatchClient,
    id: &convoy::batch::BatchId,
    model: &SharedModel,
    entity: EntityInfo,
    method: HttpMethod,
    primary: ApiCall,
    backup: Option<ApiCall>,
) -> usize {
    client
        .get_batch_mut(id)
        .unwrap()
        .add(Arc::downgrade(model), entity, method, primary, backup, None, None)
}

// ---------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------

#[tokio::test]
async fn test_single_family_graph_get_populates_model() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/beta/$batch")
        .match_header("content-type", "application/json")
        .match_body(mockito::Matcher::Json(serde_json::json!({
            "requests": [{"id": "1", "method": "GET", "url": "me/drive/root"}]
        })))
        .with_status(200)
        .with_body(r#"{"responses":[{"id":"1","status":200,"body":{"name":"root"}}]}"#)
        .create_async()
        .await;

    let mut client = client(&server.url());
    let id = client.ensure_batch();
    let model = TestEntity::shared("driveItem");
    add(
        &mut client,
        &id,
        &model,
        EntityInfo::new(None, Some("id".to_string())),
        HttpMethod::Get,
        ApiCall::new(ApiFamily::Graph, "me/drive/root"),
        None,
    );

    client.execute_batch(id).await.unwrap();

    mock.assert_async().await;
    assert_eq!(field(&model, "name"), Some(Value::String("root".to_string())));
    assert!(client.get_batch(&id).unwrap().executed());
}

#[tokio::test]
async fn test_mixed_batch_with_backups_falls_back_to_one_rest_call() {
    let mut server = mockito::Server::new_async().await;
    let multipart = concat!(
        "--batchresponse_1\r\n",
        "\r\n",
        "HTTP/1.1 200 OK\r\n",
        "\r\n",
        "{\"Title\":\"site a\"}\r\n",
        "HTTP/1.1 200 OK\r\n",
        "\r\n",
        "{\"Title\":\"lists of a\"}\r\n",
        "--batchresponse_1--\r\n",
    );
    let rest_mock = server
        .mock("POST", "/sites/a/_api/$batch")
        .with_status(200)
        .with_body(multipart)
        .expect(1)
        .create_async()
        .await;
    let graph_mock = server
        .mock("POST", "/beta/$batch")
        .expect(0)
        .create_async()
        .await;

    let base = server.url();
    let mut client = client(&base);
    let id = client.ensure_batch();

    let web = TestEntity::shared("web");
    add(
        &mut client,
        &id,
        &web,
        EntityInfo::default(),
        HttpMethod::Get,
        ApiCall::new(ApiFamily::Rest, format!("{}/sites/a/_api/web", base)),
        None,
    );
    let lists = TestEntity::shared("lists");
    add(
        &mut client,
        &id,
        &lists,
        EntityInfo::default(),
        HttpMethod::Get,
        ApiCall::new(ApiFamily::Graph, "sites/abc"),
        Some(ApiCall::new(
            ApiFamily::Rest,
            format!("{}/sites/a/_api/web/lists", base),
        )),
    );

    client.execute_batch(id).await.unwrap();

    rest_mock.assert_async().await;
    graph_mock.assert_async().await;
    assert_eq!(
        field(&web, "Title"),
        Some(Value::String("site a".to_string()))
    );
    assert_eq!(
        field(&lists, "Title"),
        Some(Value::String("lists of a".to_string()))
    );
}

#[tokio::test]
async fn test_mixed_batch_without_backups_splits_into_siblings() {
    let mut server = mockito::Server::new_async().await;
    let rest_mock = server
        .mock("POST", "/sites/a/_api/$batch")
        .with_status(200)
        .with_body("HTTP/1.1 200 OK\r\n\r\n{\"Title\":\"site a\"}\r\n")
        .expect(1)
        .create_async()
        .await;
    let graph_mock = server
        .mock("POST", "/beta/$batch")
        .with_status(200)
        .with_body(r#"{"responses":[{"id":"1","status":200,"body":{"name":"graph site"}}]}"#)
        .expect(1)
        .create_async()
        .await;

    let base = server.url();
    let mut client = client(&base);
    let id = client.ensure_batch();

    let web = TestEntity::shared("web");
    add(
        &mut client,
        &id,
        &web,
        EntityInfo::default(),
        HttpMethod::Get,
        ApiCall::new(ApiFamily::Rest, format!("{}/sites/a/_api/web", base)),
        None,
    );
    let site = TestEntity::shared("site");
    add(
        &mut client,
        &id,
        &site,
        EntityInfo::default(),
        HttpMethod::Get,
        ApiCall::new(ApiFamily::Graph, "sites/abc"),
        None,
    );

    client.execute_batch(id).await.unwrap();

    rest_mock.assert_async().await;
    graph_mock.assert_async().await;
    assert_eq!(
        field(&web, "Title"),
        Some(Value::String("site a".to_string()))
    );
    assert_eq!(
        field(&site, "name"),
        Some(Value::String("graph site".to_string()))
    );
}

#[tokio::test]
async fn test_rest_batch_spanning_sites_issues_one_call_per_site() {
    let mut server = mockito::Server::new_async().await;
    let site_a = server
        .mock("POST", "/sites/a/_api/$batch")
        .with_status(200)
        .with_body(concat!(
            "HTTP/1.1 200 OK\r\n\r\n{\"Title\":\"a web\"}\r\n",
            "HTTP/1.1 200 OK\r\n\r\n{\"Title\":\"a lists\"}\r\n",
        ))
        .expect(1)
        .create_async()
        .await;
    let site_b = server
        .mock("POST", "/sites/b/_api/$batch")
        .with_status(200)
        .with_body("HTTP/1.1 200 OK\r\n\r\n{\"Title\":\"b web\"}\r\n")
        .expect(1)
        .create_async()
        .await;

    let base = server.url();
    let mut client = client(&base);
    let id = client.ensure_batch();

    let models: Vec<SharedModel> = (0..3).map(|_| TestEntity::shared("web")).collect();
    for (model, url) in models.iter().zip([
        format!("{}/sites/a/_api/web", base),
        format!("{}/sites/a/_api/lists", base),
        format!("{}/sites/b/_api/web", base),
    ]) {
        add(
            &mut client,
            &id,
            model,
            EntityInfo::default(),
            HttpMethod::Get,
            ApiCall::new(ApiFamily::Rest, url),
            None,
        );
    }

    client.execute_batch(id).await.unwrap();

    site_a.assert_async().await;
    site_b.assert_async().await;
    assert_eq!(field(&models[0], "Title"), Some(Value::String("a web".to_string())));
    assert_eq!(field(&models[1], "Title"), Some(Value::String("a lists".to_string())));
    assert_eq!(field(&models[2], "Title"), Some(Value::String("b web".to_string())));
}

#[tokio::test]
async fn test_duplicate_get_serializes_a_single_sub_request() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/beta/$batch")
        .match_body(mockito::Matcher::Json(serde_json::json!({
            "requests": [{"id": "1", "method": "GET", "url": "me/drive/root"}]
        })))
        .with_status(200)
        .with_body(r#"{"responses":[{"id":"1","status":200,"body":{"name":"root"}}]}"#)
        .expect(1)
        .create_async()
        .await;

    let mut client = client(&server.url());
    let id = client.ensure_batch();
    // Both requests bound to the same model instance.
    let model = TestEntity::shared("driveItem");
    for _ in 0..2 {
        add(
            &mut client,
            &id,
            &model,
            EntityInfo::default(),
            HttpMethod::Get,
            ApiCall::new(ApiFamily::Graph, "me/drive/root"),
            None,
        );
    }

    client.execute_batch(id).await.unwrap();

    mock.assert_async().await;
    let batch = client.get_batch(&id).unwrap();
    assert_eq!(batch.len(), 1);
    // The surviving first occurrence carries the response.
    assert!(batch.get_request(0).unwrap().succeeded());
    assert!(batch.get_request(1).is_none());
    assert_eq!(field(&model, "name"), Some(Value::String("root".to_string())));
}

#[tokio::test]
async fn test_delete_propagates_into_the_parent_collection() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/sites/a/_api/$batch")
        .with_status(200)
        .with_body("HTTP/1.1 204 No Content\r\n\r\n")
        .create_async()
        .await;

    let base = server.url();
    let mut client = client(&base);
    let id = client.ensure_batch();

    let parent = TestCollection::new();
    let doomed = TestEntity::shared_with("list", "Id", Value::String("x".to_string()));
    parent.insert(doomed.clone());

    add(
        &mut client,
        &id,
        &doomed,
        EntityInfo::new(Some("Id".to_string()), None)
            .with_parent(parent.clone()),
        HttpMethod::Delete,
        ApiCall::new(
            ApiFamily::Rest,
            format!("{}/sites/a/_api/web/lists('x')", base),
        ),
        None,
    );

    client.execute_batch(id).await.unwrap();

    mock.assert_async().await;
    assert!(is_deleted(&doomed));
    assert!(!parent.contains(&doomed));
}

#[tokio::test]
async fn test_successful_patch_commits_the_transient_model() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/sites/a/_api/$batch")
        .with_status(200)
        .with_body("HTTP/1.1 204 No Content\r\n\r\n")
        .create_async()
        .await;

    let base = server.url();
    let mut client = client(&base);
    let id = client.ensure_batch();

    let model = TestEntity::shared("list");
    add(
        &mut client,
        &id,
        &model,
        EntityInfo::default(),
        HttpMethod::Patch,
        ApiCall::with_body(
            ApiFamily::Rest,
            format!("{}/sites/a/_api/web/lists('x')", base),
            "{\"Title\":\"renamed\"}",
        ),
        None,
    );

    client.execute_batch(id).await.unwrap();

    mock.assert_async().await;
    let guard = model.lock().unwrap();
    let entity = guard.as_any().downcast_ref::<TestEntity>().unwrap();
    assert!(entity.committed);
}

#[tokio::test]
async fn test_authentication_provider_credentials_reach_the_wire() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/beta/$batch")
        .match_header("authorization", "Bearer test-token")
        .with_status(200)
        .with_body(r#"{"responses":[{"id":"1","status":200,"body":{"name":"root"}}]}"#)
        .create_async()
        .await;

    let mut client = BatchClient::new(
        test_config(&server.url()),
        Arc::new(StaticTokenAuth),
        Arc::new(FieldMapper),
    );
    let id = client.ensure_batch();
    let model = TestEntity::shared("driveItem");
    add(
        &mut client,
        &id,
        &model,
        EntityInfo::default(),
        HttpMethod::Get,
        ApiCall::new(ApiFamily::Graph, "me/drive/root"),
        None,
    );

    client.execute_batch(id).await.unwrap();
    mock.assert_async().await;
}

#[tokio::test]
async fn test_mapping_hooks_are_applied() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("POST", "/beta/$batch")
        .with_status(200)
        .with_body(r#"{"responses":[{"id":"1","status":200,"body":{"value":{"name":"inner"}}}]}"#)
        .create_async()
        .await;

    let mut client = client(&server.url());
    let id = client.ensure_batch();
    let model = TestEntity::shared("driveItem");
    let seen_raw: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));
    let seen_clone = seen_raw.clone();

    client.get_batch_mut(&id).unwrap().add(
        Arc::downgrade(&model),
        EntityInfo::default(),
        HttpMethod::Get,
        ApiCall::new(ApiFamily::Graph, "me/drive/root"),
        None,
        // Unwrap the "value" envelope before mapping.
        Some(Arc::new(|json: &Value| json["value"].clone())),
        Some(Arc::new(move |raw: &str| {
            *seen_clone.lock().unwrap() = Some(raw.to_string());
        })),
    );

    client.execute_batch(id).await.unwrap();

    assert_eq!(
        field(&model, "name"),
        Some(Value::String("inner".to_string()))
    );
    let raw = seen_raw.lock().unwrap().clone().unwrap();
    assert!(raw.contains("inner"));
}

#[tokio::test]
async fn test_duplicate_results_for_one_entity_merge_after_execution() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("POST", "/beta/$batch")
        .with_status(200)
        .with_body(
            r#"{"responses":[
                {"id":"1","status":200,"body":{"id":"L1","title":"tasks"}},
                {"id":"2","status":200,"body":{"id":"L1","owner":"finance"}}
            ]}"#,
        )
        .create_async()
        .await;

    let mut client = client(&server.url());
    let id = client.ensure_batch();

    let parent = TestCollection::new();
    let first = TestEntity::shared("list");
    let second = TestEntity::shared("list");
    parent.insert(first.clone());
    parent.insert(second.clone());
    let info = EntityInfo::new(Some("Id".to_string()), Some("id".to_string()))
        .with_parent(parent.clone());

    add(
        &mut client,
        &id,
        &first,
        info.clone(),
        HttpMethod::Get,
        ApiCall::new(ApiFamily::Graph, "sites/abc/lists/L1"),
        None,
    );
    add(
        &mut client,
        &id,
        &second,
        info,
        HttpMethod::Get,
        ApiCall::new(ApiFamily::Graph, "sites/abc/lists/byname/tasks"),
        None,
    );

    client.execute_batch(id).await.unwrap();

    // Both responses mapped, then the reconciler collapsed the pair onto
    // the lowest-order model.
    assert_eq!(
        field(&first, "owner"),
        Some(Value::String("finance".to_string()))
    );
    assert!(!is_deleted(&first));
    assert!(is_deleted(&second));
    assert!(parent.contains(&first));
    assert!(!parent.contains(&second));
}
