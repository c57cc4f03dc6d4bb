use axum::response::Response;
use axum::routing::get;
use clap::Parser;
use jinja_axum::minijinja::context;
use jinja_axum::{Application, CurrentUser, HandlerBase, Result, Settings, TemplateHandler};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// jinja-axum demo server
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Host address to bind to
    #[arg(short = 'H', long, env = "JINJA_AXUM_HOST", default_value = "127.0.0.1")]
    host: String,

    /// Port to listen on
    #[arg(short, long, env = "JINJA_AXUM_PORT", default_value_t = 3000)]
    port: u16,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, env = "JINJA_AXUM_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Config file path
    #[arg(short, long, env = "JINJA_AXUM_CONFIG")]
    config_file: Option<PathBuf>,

    /// Template directory
    #[arg(long, env = "JINJA_AXUM_TEMPLATE_PATH")]
    template_path: Option<PathBuf>,

    /// Secret for signed cookies
    #[arg(long, env = "JINJA_AXUM_COOKIE_SECRET")]
    cookie_secret: Option<String>,

    /// Development mode (template reloading, no caching)
    #[arg(long, env = "JINJA_AXUM_DEBUG", default_value_t = false)]
    debug: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = format!("jinja_axum={},tower_http=debug", cli.log_level);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut settings = if let Some(config_path) = &cli.config_file {
        match Settings::load_from_file(config_path) {
            Ok(settings) => {
                info!("Configuration loaded from: {}", config_path.display());
                settings
            }
            Err(e) => {
                warn!(
                    "Failed to load config file: {}. Using default configuration.",
                    e
                );
                demo_settings()
            }
        }
    } else {
        demo_settings()
    };

    settings.host = cli.host;
    settings.port = cli.port;
    settings.log_level = cli.log_level;
    settings.debug |= cli.debug;
    if let Some(path) = cli.template_path {
        settings.templates.template_path = path;
    }
    if cli.cookie_secret.is_some() {
        settings.cookie_secret = cli.cookie_secret;
    }
    if settings.cookie_secret.is_none() {
        warn!("No cookie secret configured, sessions will not survive a restart");
        settings.cookie_secret = Some(uuid::Uuid::new_v4().to_string());
    }

    let addr = settings.socket_addr()?;

    let mut app = Application::new(settings);
    app.init_templates(None)
        .add_global_value("site_name", "jinja-axum demo");
    app.named_route("home", "/", get(index))
        .named_route("hello", "/hello/{name}", get(hello))
        .named_route("counter", "/counter", get(counter))
        .named_route("profile", "/profile", get(profile));
    let router = app.build()?;

    info!("Starting server on: {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, router)
        .await
        .map_err(|e| anyhow::anyhow!("Server error: {}", e))
}

/// Defaults pointing at the bundled demo assets
fn demo_settings() -> Settings {
    let root = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("demo");
    let mut settings = Settings::default();
    settings.templates.template_path = root.join("templates");
    settings.static_path = Some(root.join("static"));
    settings.translations_path = Some(root.join("locale"));
    settings
}

async fn index(handler: TemplateHandler) -> Result<Response> {
    handler.render("index.html", context! { title => "Home" })
}

async fn hello(handler: TemplateHandler) -> Result<Response> {
    let name = handler
        .base()
        .path_kwargs()
        .get("name")
        .cloned()
        .unwrap_or_default();
    handler.render("hello.html", context! { title => "Hello", name })
}

async fn counter(mut handler: TemplateHandler) -> Result<Response> {
    let session = handler.session();
    let count = session.get("count").and_then(|v| v.as_i64()).unwrap_or(0) + 1;
    session.insert("count".to_string(), count.into());
    handler.render("counter.html", context! { title => "Counter", count })
}

async fn profile(user: CurrentUser, handler: TemplateHandler) -> Result<Response> {
    handler.render("profile.html", context! { title => "Profile", user => user.0 })
}
