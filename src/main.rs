//! Burro demo server.
//!
//! Serves a few routes that echo their canonical request map back as JSON.

use burro::prelude::*;
use tracing_subscriber::EnvFilter;

/// Echo the whole request map.
async fn echo(request: RequestMap) -> Response {
    Response::json(&request).unwrap_or_else(|e| Response::error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
}

/// Greet the `{name}` path parameter.
async fn greet(request: RequestMap) -> Response {
    let name = request.path_param("name").unwrap_or("world");
    let body = serde_json::json!({
        "message": format!("Hello, {}!", name),
        "method": request.text(Field::RequestMethod),
        "remote": request.text(Field::RemoteAddr),
    });

    Response::json(&body).unwrap_or_else(|e| Response::error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
}

/// Form submission handler; runs on the blocking pool.
async fn submit(request: RequestMap) -> Response {
    match request.get(Field::FormParams) {
        Some(form) => Response::json(form).unwrap_or_else(|e| Response::error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())),
        None => Response::error(StatusCode::BAD_REQUEST, "expected a form body"),
    }
}

fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let engine = Engine::with_defaults()?;

    let config = ServerConfig::new(engine.clone())
        .host("0.0.0.0")
        .port(8080)
        .debug(true)
        .add_date_header(true)
        .add_content_type_header(true)
        .add_server_header(true)
        .route(Route::new("/echo", echo).produces("application/json"))
        .route(Route::get("/hello/{name}", greet).produces("application/json"))
        .route(Route::post("/submit", submit).produces("application/json").blocking());

    let server = Server::new(config);
    let id = server.start_sync()?;

    tracing::info!("Deployment {} ready", id);
    tracing::info!("Try: curl http://localhost:8080/echo?a=1");
    tracing::info!("Try: curl http://localhost:8080/hello/burro");
    tracing::info!("Try: curl -d 'x=1&y=2' http://localhost:8080/submit");

    engine.handle().block_on(tokio::signal::ctrl_c())?;
    tracing::info!("Ctrl-C received, shutting down");

    server.shutdown_sync()?;
    Ok(())
}
