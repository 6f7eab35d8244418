use rmcp::{
    handler::server::{router::tool::ToolRouter, wrapper::Parameters},
    model::*,
    tool, tool_handler, tool_router,
    transport::stdio,
    ServiceExt,
};
use schemars::JsonSchema;
use serde::Deserialize;
use std::sync::Arc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[cfg(feature = "http")]
use rmcp::transport::streamable_http_server::{
    session::local::LocalSessionManager, StreamableHttpService,
};

use repo_memory::{tools, Config, GitHubStore, RemoteStore, SharedState};

/// Parameters for the Read tool
#[derive(Debug, Deserialize, JsonSchema)]
pub struct ReadParams {
    /// Path of the file inside the repository, e.g. "projects/roadmap.md"
    pub path: String,
}

/// Parameters for the Save tool
#[derive(Debug, Deserialize, JsonSchema)]
pub struct SaveParams {
    /// Category (top-level folder). Lowercased; characters outside a-z, 0-9 and '-' become '-'.
    pub category: String,
    /// File name. ".md" is appended unless it already ends in .md, .yaml or .json.
    pub name: String,
    /// Full file content (max 1 MiB)
    pub content: String,
}

/// Parameters for the Delete tool
#[derive(Debug, Deserialize, JsonSchema)]
pub struct DeleteParams {
    /// Path of the file inside the repository
    pub path: String,
}

/// Parameters for the Search tool
#[derive(Debug, Deserialize, JsonSchema)]
pub struct SearchParams {
    /// Case-insensitive text to look for in file paths and contents
    pub query: String,
}

/// The main MCP server: routes tool calls to the shared cache and writer.
#[derive(Clone)]
pub struct MemoryServer {
    shared: SharedState,
    tool_router: ToolRouter<Self>,
}

#[tool_router]
impl MemoryServer {
    /// Create a server from pre-initialized shared state.
    pub fn from_shared(shared: SharedState) -> Self {
        Self {
            shared,
            tool_router: Self::tool_router(),
        }
    }

    #[tool(description = "List all memory categories and files. Also reports files whose latest change has not reached the repository yet.")]
    async fn list(&self) -> Result<CallToolResult, ErrorData> {
        tools::list::execute(&self.shared.cache, &self.shared.queue)
    }

    #[tool(description = "Read the full content of a memory file by path.")]
    async fn read(&self, params: Parameters<ReadParams>) -> Result<CallToolResult, ErrorData> {
        tools::read::execute(&self.shared.writer, &params.0.path).await
    }

    #[tool(description = "Create or overwrite a memory file under a category. Returns immediately with the stored path; the repository is updated in the background and retried if it fails.")]
    async fn save(&self, params: Parameters<SaveParams>) -> Result<CallToolResult, ErrorData> {
        tools::save::execute(
            &self.shared.writer,
            &params.0.category,
            &params.0.name,
            &params.0.content,
        )
    }

    #[tool(description = "Delete a memory file by path. Returns an error if the file doesn't exist.")]
    async fn delete(&self, params: Parameters<DeleteParams>) -> Result<CallToolResult, ErrorData> {
        tools::delete::execute(&self.shared.writer, &params.0.path)
    }

    #[tool(description = "Search memory files by path and content (case-insensitive substring). Returns matching paths with a short snippet around the match.")]
    async fn search(&self, params: Parameters<SearchParams>) -> Result<CallToolResult, ErrorData> {
        tools::search::execute(&self.shared.cache, &params.0.query)
    }
}

#[tool_handler]
impl rmcp::ServerHandler for MemoryServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::LATEST,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "repo-memory".into(),
                version: env!("CARGO_PKG_VERSION").into(),
                ..Default::default()
            },
            instructions: Some(
                "Repo Memory MCP server - stores notes as files in a GitHub repository, grouped by category."
                    .into(),
            ),
        }
    }
}

/// CLI arguments for the MCP server.
#[cfg(feature = "http")]
#[derive(clap::Parser)]
#[command(name = "repo-memory")]
#[command(about = "MCP server backed by a GitHub repository")]
struct Cli {
    /// Run in HTTP mode instead of stdio
    #[arg(long)]
    http: bool,

    /// Port to listen on in HTTP mode
    #[arg(long, default_value_t = DEFAULT_HTTP_PORT)]
    port: u16,

    /// Address to bind to in HTTP mode. Use 0.0.0.0 for all interfaces (unsafe without auth).
    #[arg(long, default_value = "127.0.0.1")]
    bind: String,
}

#[cfg(feature = "http")]
const DEFAULT_HTTP_PORT: u16 = 3000;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr; stdout carries the MCP protocol
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .init();

    let config = Config::from_env()?;
    tracing::info!("Repository: {} (branch {})", config.repo, config.branch);

    #[cfg(feature = "http")]
    let cli = {
        use clap::Parser;
        Cli::parse()
    };

    let remote: Arc<dyn RemoteStore> = Arc::new(GitHubStore::new(&config)?);
    let shared =
        SharedState::initialize(remote, &config.queue_path, config.drain_interval).await?;

    #[cfg(feature = "http")]
    if cli.http {
        let result = run_http_server(shared.clone(), &cli.bind, cli.port).await;
        shared.shutdown().await;
        return result;
    }

    // Default: Run with STDIO transport
    let result = run_stdio_server(shared.clone()).await;
    shared.shutdown().await;
    result
}

/// Run the server with STDIO transport (default mode).
async fn run_stdio_server(shared: SharedState) -> anyhow::Result<()> {
    let server = MemoryServer::from_shared(shared);

    let service = server.serve(stdio()).await.inspect_err(|e| {
        tracing::error!("Error starting server: {}", e);
    })?;

    tracing::info!("Repo Memory MCP server started (stdio)");
    service.waiting().await?;

    Ok(())
}

/// Run the server with HTTP transport.
#[cfg(feature = "http")]
async fn run_http_server(shared: SharedState, bind: &str, port: u16) -> anyhow::Result<()> {
    use anyhow::Context;

    // Every session shares the same cache, queue and writer.
    let service = StreamableHttpService::new(
        move || Ok(MemoryServer::from_shared(shared.clone())),
        LocalSessionManager::default().into(),
        Default::default(),
    );

    let router = axum::Router::new().nest_service("/mcp", service);

    // Parse bind address - default to localhost for safety
    let bind_addr: std::net::IpAddr = bind
        .parse()
        .with_context(|| format!("Invalid bind address '{}'", bind))?;
    let addr = std::net::SocketAddr::from((bind_addr, port));

    if bind_addr.is_unspecified() {
        tracing::info!(
            "Binding to all interfaces ({}). Ensure a reverse proxy handles authentication.",
            bind
        );
    }

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}:{}", bind, port))?;

    tracing::info!("Repo Memory MCP server started (HTTP) at http://{}/mcp", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM on Unix).
#[cfg(feature = "http")]
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, stopping server...");
}
