//! Companion HTTP surface for room metadata.
//!
//! A single read path: `GET /rooms/{roomId}` returns the room's id, live
//! occupancy, and creation timestamp as JSON. Queries share the relay's
//! `RoomRegistry`, so occupancy is always the live connection count. A
//! query for an unknown room creates it, mirroring the relay's lazy room
//! semantics.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};

use crate::registry::{RoomInfo, RoomRegistry};

/// Build the HTTP router backed by the shared registry.
pub fn router(registry: Arc<RoomRegistry>) -> Router {
    Router::new()
        .route("/rooms/:room_id", get(room_info))
        .with_state(registry)
}

/// `GET /rooms/{roomId}`
async fn room_info(
    Path(room_id): Path<String>,
    State(registry): State<Arc<RoomRegistry>>,
) -> Json<RoomInfo> {
    Json(registry.room_info(&room_id).await)
}

/// Bind and serve the HTTP surface until the process exits.
pub async fn serve(
    registry: Arc<RoomRegistry>,
    addr: &str,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    log::info!("HTTP surface listening on {addr}");
    axum::serve(listener, router(registry)).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use tower::ServiceExt;
    use uuid::Uuid;

    async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json = serde_json::from_slice(&bytes).unwrap();
        (status, json)
    }

    #[tokio::test]
    async fn test_room_info_unknown_room() {
        let registry = Arc::new(RoomRegistry::with_defaults());
        let app = router(registry.clone());

        let (status, body) = get_json(app, "/rooms/fresh").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["roomId"], "fresh");
        assert_eq!(body["usersCount"], 0);
        assert!(body["createdAt"].is_string());

        // The query created the room
        assert_eq!(registry.room_count().await, 1);
    }

    #[tokio::test]
    async fn test_room_info_reports_live_occupancy() {
        let registry = Arc::new(RoomRegistry::with_defaults());

        registry.join_room(Uuid::new_v4(), "busy").await;
        registry.join_room(Uuid::new_v4(), "busy").await;

        let (status, body) = get_json(router(registry.clone()), "/rooms/busy").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["usersCount"], 2);
    }

    #[tokio::test]
    async fn test_room_info_created_at_stable() {
        let registry = Arc::new(RoomRegistry::with_defaults());

        let (_, first) = get_json(router(registry.clone()), "/rooms/r1").await;
        let (_, second) = get_json(router(registry.clone()), "/rooms/r1").await;

        // Repeat queries see the original creation timestamp
        assert_eq!(first["createdAt"], second["createdAt"]);
    }
}
