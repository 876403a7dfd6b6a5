//! Standalone transfer server for manual runs against the C surface.
//! `MOCK_HOST` and `PORT` pick the bind address.

use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> Result<(), std::io::Error> {
    let host = std::env::var("MOCK_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
    let port = std::env::var("PORT").unwrap_or_else(|_| "3000".to_string());
    let listener = TcpListener::bind(format!("{host}:{port}")).await?;
    let addr = listener.local_addr()?;
    println!("mock transfer server listening on http://{addr}");
    println!("  GET /bytes/{{len}}  GET /norange/{{len}}  GET /status/{{code}}  GET /redirect/{{hops}}");
    println!("  POST /echo  GET /headers  GET /dup-headers  POST /uploads  GET /uploads/{{id}}");
    mock_server::run(listener).await
}
