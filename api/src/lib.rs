pub mod accounts;
pub mod allocator;
pub mod commission;
pub mod debt;
pub mod pdf;
pub mod periods;
pub mod pricing;
pub mod routes;
pub mod store;
pub mod telemetry;
pub mod time;

use actix_cors::Cors;
use actix_web::dev::Server;
use actix_web::{App, HttpServer, web};
use jiff::tz::TimeZone;
use payloads::Currency;
use sqlx::PgPool;
use std::net::TcpListener;

use crate::pdf::PdfService;
use crate::pricing::PricingClient;
use crate::time::TimeSource;

/// Build the server, but not await it.
///
/// Returns the port that the server has bound to by modifying the config.
pub async fn build(
    config: &mut Config,
    time_source: TimeSource,
) -> std::io::Result<Server> {
    let db_pool =
        web::Data::new(PgPool::connect(&config.database_url).await.unwrap());
    let time_source = web::Data::new(time_source);

    let timezone = TimeZone::get(&config.timezone)
        .expect("TIMEZONE must be a valid IANA timezone name");
    let app_config = web::Data::new(AppConfig {
        timezone,
        default_currency: config.default_currency.clone(),
        arrears_cutoff_months: config.arrears_cutoff_months,
        ledger_dedup_window_secs: config.ledger_dedup_window_secs,
    });
    let pdf_service =
        web::Data::new(PdfService::new(config.pdf_backend_url.clone()));
    let pricing_client =
        web::Data::new(PricingClient::new(config.pricing_service_url.clone()));

    let allowed_origins = config.allowed_origins.clone();

    // OS assigns the port if binding to 0
    let listener = TcpListener::bind(format!("{}:{}", config.ip, config.port))?;
    config.port = listener.local_addr()?.port();
    let server = HttpServer::new(move || {
        // Configure CORS based on allowed origins
        let cors = if allowed_origins.contains(&"*".to_string()) {
            // Allow any origin (for development)
            Cors::default()
                .allow_any_origin()
                .allow_any_method()
                .allow_any_header()
        } else {
            // Production: Only allow specified origins
            let mut cors = Cors::default()
                .allow_any_method()
                .allow_any_header();

            for origin in &allowed_origins {
                cors = cors.allowed_origin(origin);
            }
            cors
        };

        App::new()
            .wrap(cors)
            .service(routes::api_services())
            .app_data(db_pool.clone())
            .app_data(time_source.clone())
            .app_data(app_config.clone())
            .app_data(pdf_service.clone())
            .app_data(pricing_client.clone())
    })
    .listen(listener)?
    .run();
    Ok(server)
}

/// Configuration loaded from environment variables at startup.
/// Used only during server initialization, not shared as app_data.
pub struct Config {
    pub database_url: String,
    /// set to "0.0.0.0" for public access, "127.0.0.1" for local dev
    pub ip: String,
    /// set to 0 to get an os-assigned port
    pub port: u16,
    /// List of allowed CORS origins. Use "*" to allow any origin (development only)
    pub allowed_origins: Vec<String>,
    /// IANA name of the plan's civil timezone
    pub timezone: String,
    pub default_currency: Currency,
    /// Posting is refused at this many months of arrears
    pub arrears_cutoff_months: u32,
    /// Synthetic-transfer dedup window for note-scoped ledger pairs
    pub ledger_dedup_window_secs: i64,
    /// Base URL of the receipt-PDF renderer
    pub pdf_backend_url: String,
    /// Base URL of the pricing recompute service
    pub pricing_service_url: String,
}

/// Runtime configuration shared across the application as app_data.
/// Contains only the fields needed by handlers and the store at runtime.
pub struct AppConfig {
    pub timezone: TimeZone,
    pub default_currency: Currency,
    pub arrears_cutoff_months: u32,
    pub ledger_dedup_window_secs: i64,
}

impl Config {
    pub fn from_env() -> Self {
        use std::env::var;

        let allowed_origins = var("ALLOWED_ORIGINS")
            .unwrap_or_else(|_| "*".to_string()) // Default to allow any origin for development
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        Config {
            database_url: var("DATABASE_URL").unwrap(),
            ip: var("IP_ADDRESS").unwrap(),
            port: var("PORT").unwrap().parse().unwrap(),
            allowed_origins,
            timezone: var("TIMEZONE")
                .unwrap_or_else(|_| "America/Argentina/Mendoza".to_string()),
            default_currency: Currency(
                var("DEFAULT_CURRENCY").unwrap_or_else(|_| "ARS".to_string()),
            ),
            arrears_cutoff_months: var("ARREARS_CUTOFF_MONTHS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(4),
            ledger_dedup_window_secs: var("LEDGER_DEDUP_WINDOW_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(300),
            pdf_backend_url: var("PDF_BACKEND_URL")
                .unwrap_or_else(|_| "http://localhost:9090".to_string()),
            pricing_service_url: var("PRICING_SERVICE_URL")
                .unwrap_or_else(|_| "http://localhost:9091".to_string()),
        }
    }
}
