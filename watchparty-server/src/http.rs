use axum::Json;
use serde::Serialize;
use watchparty_collab::RoomSummary;

use crate::context::ServerContext;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    status: &'static str,
    rooms: usize,
    connections: usize,
    online: usize,
}

pub async fn health(context: ServerContext) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        rooms: context.collab.room_count(),
        connections: context.collab.connection_count(),
        online: context.collab.online_count(),
    })
}

#[derive(Debug, Serialize)]
pub struct PublicRoomsResponse {
    success: bool,
    rooms: Vec<RoomSummary>,
}

/// Public, non-empty rooms for the discovery page.
pub async fn public_rooms(context: ServerContext) -> Json<PublicRoomsResponse> {
    Json(PublicRoomsResponse {
        success: true,
        rooms: context.collab.rooms.public_rooms(),
    })
}
