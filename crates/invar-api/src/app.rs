use std::sync::Arc;

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use invar_domain::DomainError;
use invar_schema::{enroll_schema, patch_request_schema, SchemaValidator};
use invar_store::Store;
use invar_worker::DriverRegistry;
use tower_http::trace::TraceLayer;

use crate::auth::{require_bearer_token, Authenticator};
use crate::handlers;
use crate::state::AppState;

pub fn build_app(
    store: Arc<dyn Store>,
    registry: Arc<DriverRegistry>,
    authenticator: Arc<dyn Authenticator>,
    max_limit: u32,
) -> Result<Router, DomainError> {
    let enroll_validator =
        SchemaValidator::new("hardware", &enroll_schema(&registry.enroll_branches()))?;
    let patch_validator = SchemaValidator::new("patch", &patch_request_schema())?;

    let state = AppState {
        store,
        registry,
        authenticator,
        enroll_validator: Arc::new(enroll_validator),
        patch_validator: Arc::new(patch_validator),
        max_limit,
    };

    // Export is public; everything else requires a token.
    let public = Router::new()
        .route("/health", get(handlers::health))
        .route("/v1/hardware/export", get(handlers::export));

    let protected = Router::new()
        .route(
            "/v1/hardware",
            get(handlers::list_hardware).post(handlers::enroll),
        )
        .route(
            "/v1/hardware/:uuid",
            get(handlers::get_hardware)
                .patch(handlers::patch_hardware)
                .delete(handlers::destroy_hardware),
        )
        .route("/v1/hardware/:uuid/sync", post(handlers::sync_hardware))
        .route(
            "/v1/hardware/:uuid/availability",
            get(handlers::list_availability),
        )
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_bearer_token,
        ));

    Ok(public
        .merge(protected)
        .layer(TraceLayer::new_for_http())
        .with_state(state))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticAuthenticator;
    use axum::body::Body;
    use axum::http::{Method, Request, StatusCode};
    use invar_config::Config;
    use invar_domain::{Context, TaskState};
    use invar_schema::MASKED_VALUE;
    use invar_store::InMemoryStore;
    use serde_json::{json, Value};
    use tower::util::ServiceExt;

    const USER_TOKEN: &str = "user-token";
    const ADMIN_TOKEN: &str = "admin-token";
    const PROJECT: &str = "project-1";

    fn test_app() -> (Router, Arc<InMemoryStore>) {
        let registry = Arc::new(DriverRegistry::from_config(&Config::default()).unwrap());
        let store = Arc::new(InMemoryStore::new(registry.clone()));
        let authenticator = StaticAuthenticator::default()
            .with_token(USER_TOKEN, Context::for_project("user-1", PROJECT))
            .with_token(
                ADMIN_TOKEN,
                Context {
                    user_id: Some("admin-1".into()),
                    project_id: Some("admin-project".into()),
                    roles: vec!["admin".into()],
                },
            );
        let app = build_app(store.clone(), registry, Arc::new(authenticator), 1000).unwrap();
        (app, store)
    }

    fn request(method: Method, uri: &str, token: Option<&str>, body: Option<Value>) -> Request<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header("Authorization", format!("Bearer {token}"));
        }
        match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    async fn json_body(response: axum::response::Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn enroll_payload(name: &str) -> Value {
        json!({
            "name": name,
            "hardware_type": "fake-hardware",
            "properties": {
                "default_required_field": "x",
                "public-and-sensitive-field": "hunter2",
            },
        })
    }

    async fn enroll_one(app: &Router, name: &str) -> Value {
        let response = app
            .clone()
            .oneshot(request(
                Method::POST,
                "/v1/hardware",
                Some(USER_TOKEN),
                Some(enroll_payload(name)),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        json_body(response).await
    }

    #[tokio::test]
    async fn unauthenticated_request_returns_401() {
        let (app, _) = test_app();
        let response = app
            .oneshot(request(Method::GET, "/v1/hardware", None, None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn health_is_public() {
        let (app, _) = test_app();
        let response = app
            .oneshot(request(Method::GET, "/health", None, None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn enroll_assigns_project_and_masks_sensitive_fields() {
        let (app, store) = test_app();
        let body = enroll_one(&app, "n1").await;

        assert_eq!(body["hardware_type"], json!("fake-hardware"));
        assert_eq!(body["project_id"], json!(PROJECT));
        assert_eq!(
            body["properties"]["public-and-sensitive-field"],
            json!(MASKED_VALUE)
        );

        // One hardware and one PENDING task landed in the store.
        let uuid = body["uuid"].as_str().unwrap().parse().unwrap();
        let hardware = store.get_hardware_by_uuid(uuid).await.unwrap();
        assert_eq!(hardware.name, "n1");
        let tasks = store.worker_tasks_for_hardware(uuid).await.unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].state, TaskState::Pending);
    }

    #[tokio::test]
    async fn enroll_rejects_client_supplied_project_id() {
        let (app, _) = test_app();
        let mut payload = enroll_payload("n1");
        payload["project_id"] = json!("sneaky");
        let response = app
            .oneshot(request(
                Method::POST,
                "/v1/hardware",
                Some(USER_TOKEN),
                Some(payload),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn enroll_rejects_missing_required_property() {
        let (app, _) = test_app();
        let payload = json!({
            "name": "n1",
            "hardware_type": "fake-hardware",
            "properties": {},
        });
        let response = app
            .oneshot(request(
                Method::POST,
                "/v1/hardware",
                Some(USER_TOKEN),
                Some(payload),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn duplicate_name_returns_409() {
        let (app, _) = test_app();
        enroll_one(&app, "n1").await;
        let response = app
            .oneshot(request(
                Method::POST,
                "/v1/hardware",
                Some(USER_TOKEN),
                Some(enroll_payload("n1")),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn get_one_includes_worker_summary() {
        let (app, _) = test_app();
        let created = enroll_one(&app, "n1").await;
        let uuid = created["uuid"].as_str().unwrap();

        let response = app
            .oneshot(request(
                Method::GET,
                &format!("/v1/hardware/{uuid}"),
                Some(USER_TOKEN),
                None,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["workers"][0]["worker_type"], json!("fake-worker"));
        assert_eq!(body["workers"][0]["state"], json!("PENDING"));
    }

    #[tokio::test]
    async fn missing_hardware_returns_404_with_error_envelope() {
        let (app, _) = test_app();
        let response = app
            .oneshot(request(
                Method::GET,
                &format!("/v1/hardware/{}", uuid::Uuid::new_v4()),
                Some(USER_TOKEN),
                None,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = json_body(response).await;
        assert!(body["error"]
            .as_str()
            .unwrap()
            .contains("could not be found"));
    }

    #[tokio::test]
    async fn foreign_project_access_is_forbidden() {
        let (app, store) = test_app();
        let hw = store
            .create_hardware(
                invar_store::NewHardware {
                    uuid: None,
                    name: "other".into(),
                    project_id: "someone-else".into(),
                    hardware_type: "fake-hardware".into(),
                    properties: {
                        let mut m = invar_domain::StateDetails::new();
                        m.insert("default_required_field".into(), json!("x"));
                        m
                    },
                },
                TaskState::Pending,
            )
            .await
            .unwrap();

        let response = app
            .oneshot(request(
                Method::GET,
                &format!("/v1/hardware/{}", hw.uuid),
                Some(USER_TOKEN),
                None,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn all_projects_requires_admin() {
        let (app, _) = test_app();
        let response = app
            .clone()
            .oneshot(request(
                Method::GET,
                "/v1/hardware?all_projects=true",
                Some(USER_TOKEN),
                None,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let response = app
            .oneshot(request(
                Method::GET,
                "/v1/hardware?all_projects=true",
                Some(ADMIN_TOKEN),
                None,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn list_paginates_with_next_link() {
        let (app, _) = test_app();
        for i in 0..3 {
            enroll_one(&app, &format!("n{i}")).await;
        }
        let response = app
            .clone()
            .oneshot(request(
                Method::GET,
                "/v1/hardware?limit=2",
                Some(USER_TOKEN),
                None,
            ))
            .await
            .unwrap();
        let body = json_body(response).await;
        assert_eq!(body["hardware"].as_array().unwrap().len(), 2);
        let next = body["links"][0]["href"].as_str().unwrap().to_string();

        let response = app
            .oneshot(request(Method::GET, &next, Some(USER_TOKEN), None))
            .await
            .unwrap();
        let body = json_body(response).await;
        assert_eq!(body["hardware"].as_array().unwrap().len(), 1);
        assert!(body["links"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn export_is_public_and_masked() {
        let (app, _) = test_app();
        enroll_one(&app, "n1").await;

        let response = app
            .oneshot(request(Method::GET, "/v1/hardware/export", None, None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        let properties = &body["hardware"][0]["properties"];
        assert_eq!(
            properties["public-and-sensitive-field"],
            json!(MASKED_VALUE)
        );
        assert!(properties.get("private-field").is_none());
    }

    #[tokio::test]
    async fn patch_availability_add_replace_remove() {
        let (app, store) = test_app();
        let created = enroll_one(&app, "n1").await;
        let uuid: uuid::Uuid = created["uuid"].as_str().unwrap().parse().unwrap();

        // Seed two windows directly in the store.
        let w1 = store
            .create_availability_window(invar_domain::AvailabilityWindow {
                id: 0,
                uuid: uuid::Uuid::new_v4(),
                hardware_uuid: uuid,
                start: "2026-04-01T08:00:00Z".parse().unwrap(),
                end: "2026-04-02T08:00:00Z".parse().unwrap(),
            })
            .await
            .unwrap();
        let w2 = store
            .create_availability_window(invar_domain::AvailabilityWindow {
                id: 0,
                uuid: uuid::Uuid::new_v4(),
                hardware_uuid: uuid,
                start: "2026-04-10T08:00:00Z".parse().unwrap(),
                end: "2026-04-11T08:00:00Z".parse().unwrap(),
            })
            .await
            .unwrap();

        // Drive the task to STEADY so the re-queue is observable.
        let task = store.worker_tasks_for_hardware(uuid).await.unwrap()[0].clone();
        store
            .update_worker_task(
                task.uuid,
                invar_store::TaskUpdate {
                    state: Some(TaskState::Steady),
                    state_details: None,
                },
            )
            .await
            .unwrap();

        let patch = json!([
            {"op": "add", "path": "/availability/-",
             "value": {"start": "2026-05-01T00:00:00Z", "end": "2026-05-02T00:00:00Z"}},
            {"op": "replace", "path": format!("/availability/{}/start", w2.uuid),
             "value": "2026-04-09T08:00:00Z"},
            {"op": "remove", "path": format!("/availability/{}", w1.uuid)},
        ]);
        let response = app
            .clone()
            .oneshot(request(
                Method::PATCH,
                &format!("/v1/hardware/{uuid}"),
                Some(USER_TOKEN),
                Some(patch),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        // Post-state: exactly {w2 (updated), w3 (new)}.
        let windows = store.list_windows_for_hardware(uuid).await.unwrap();
        assert_eq!(windows.len(), 2);
        assert!(windows.iter().all(|w| w.uuid != w1.uuid));
        let updated_w2 = windows.iter().find(|w| w.uuid == w2.uuid).unwrap();
        assert_eq!(
            updated_w2.start,
            "2026-04-09T08:00:00Z".parse::<chrono::DateTime<chrono::Utc>>().unwrap()
        );

        // All non-IN_PROGRESS tasks re-queued.
        let task = store.worker_tasks_for_hardware(uuid).await.unwrap()[0].clone();
        assert_eq!(task.state, TaskState::Pending);
    }

    #[tokio::test]
    async fn patch_rejects_new_root_attribute() {
        let (app, _) = test_app();
        let created = enroll_one(&app, "n1").await;
        let uuid = created["uuid"].as_str().unwrap();

        let patch = json!([{"op": "add", "path": "/favorite_color", "value": "red"}]);
        let response = app
            .oneshot(request(
                Method::PATCH,
                &format!("/v1/hardware/{uuid}"),
                Some(USER_TOKEN),
                Some(patch),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn patch_cannot_drop_required_property() {
        let (app, _) = test_app();
        let created = enroll_one(&app, "n1").await;
        let uuid = created["uuid"].as_str().unwrap();

        let patch = json!([{"op": "remove", "path": "/properties/default_required_field"}]);
        let response = app
            .oneshot(request(
                Method::PATCH,
                &format!("/v1/hardware/{uuid}"),
                Some(USER_TOKEN),
                Some(patch),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn destroy_soft_deletes_and_cascades() {
        let (app, store) = test_app();
        let created = enroll_one(&app, "n1").await;
        let uuid: uuid::Uuid = created["uuid"].as_str().unwrap().parse().unwrap();

        let task = store.worker_tasks_for_hardware(uuid).await.unwrap()[0].clone();
        store
            .update_worker_task(
                task.uuid,
                invar_store::TaskUpdate {
                    state: Some(TaskState::Steady),
                    state_details: None,
                },
            )
            .await
            .unwrap();

        let response = app
            .clone()
            .oneshot(request(
                Method::DELETE,
                &format!("/v1/hardware/{uuid}"),
                Some(USER_TOKEN),
                None,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        // Tasks re-queued so workers can release downstream state.
        let task = store.worker_tasks_for_hardware(uuid).await.unwrap()[0].clone();
        assert_eq!(task.state, TaskState::Pending);

        // Gone from reads and from the default listing.
        let response = app
            .clone()
            .oneshot(request(
                Method::GET,
                &format!("/v1/hardware/{uuid}"),
                Some(USER_TOKEN),
                None,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = app
            .clone()
            .oneshot(request(Method::GET, "/v1/hardware", Some(USER_TOKEN), None))
            .await
            .unwrap();
        let body = json_body(response).await;
        assert!(body["hardware"].as_array().unwrap().is_empty());

        // include_deleted=true surfaces it again.
        let response = app
            .oneshot(request(
                Method::GET,
                "/v1/hardware?include_deleted=true",
                Some(USER_TOKEN),
                None,
            ))
            .await
            .unwrap();
        let body = json_body(response).await;
        assert_eq!(body["hardware"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn sync_requeues_tasks() {
        let (app, store) = test_app();
        let created = enroll_one(&app, "n1").await;
        let uuid: uuid::Uuid = created["uuid"].as_str().unwrap().parse().unwrap();

        let task = store.worker_tasks_for_hardware(uuid).await.unwrap()[0].clone();
        store
            .update_worker_task(
                task.uuid,
                invar_store::TaskUpdate {
                    state: Some(TaskState::Error),
                    state_details: None,
                },
            )
            .await
            .unwrap();

        let response = app
            .oneshot(request(
                Method::POST,
                &format!("/v1/hardware/{uuid}/sync"),
                Some(USER_TOKEN),
                None,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["workers"][0]["state"], json!("PENDING"));
    }

    #[tokio::test]
    async fn availability_lists_windows() {
        let (app, store) = test_app();
        let created = enroll_one(&app, "n1").await;
        let uuid: uuid::Uuid = created["uuid"].as_str().unwrap().parse().unwrap();
        store
            .create_availability_window(invar_domain::AvailabilityWindow {
                id: 0,
                uuid: uuid::Uuid::new_v4(),
                hardware_uuid: uuid,
                start: "2026-04-01T08:00:00Z".parse().unwrap(),
                end: "2026-04-02T08:00:00Z".parse().unwrap(),
            })
            .await
            .unwrap();

        let response = app
            .oneshot(request(
                Method::GET,
                &format!("/v1/hardware/{uuid}/availability"),
                Some(USER_TOKEN),
                None,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["availability"].as_array().unwrap().len(), 1);
    }
}
