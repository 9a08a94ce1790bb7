/// OpenAPI documentation generation.
pub mod documentation;
/// Runs the coordinator and carries out its effects.
pub mod game_service;
/// Health check service.
pub mod health_service;
/// Image generation collaborators.
pub mod image_service;
/// Persistence worker with retries and alerting.
pub mod persistence;
/// Server-Sent Events message generation.
pub mod sse_events;
/// Server-Sent Events broadcasting service.
pub mod sse_service;
/// Storage connection and health supervision.
pub mod storage_supervisor;
/// WebSocket connection and message handling service.
pub mod websocket_service;
