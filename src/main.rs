use std::sync::{Arc, Mutex};

use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use frontdesk::config::{AppConfig, HotelProfile};
use frontdesk::db;
use frontdesk::handlers;
use frontdesk::services::ai::embeddings::AzureEmbedder;
use frontdesk::services::ai::ollama::OllamaProvider;
use frontdesk::services::ai::openai::OpenAiProvider;
use frontdesk::services::ai::LlmProvider;
use frontdesk::services::alerts::TeamsNotifier;
use frontdesk::services::knowledge::{PineconeIndex, Retriever};
use frontdesk::services::location::{LocationResolver, LocationTable};
use frontdesk::services::messaging::twilio::TwilioWhatsAppProvider;
use frontdesk::services::pms::ApaleoClient;
use frontdesk::services::texts::TextCatalog;
use frontdesk::state::{AppState, SessionLocks};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = AppConfig::from_env();
    let hotel = HotelProfile::load(&config.hotel_profile_path)?;
    let texts = TextCatalog::load(config.texts_path.as_deref())?;

    let conn = db::init_db(&config.database_url)?;

    let llm: Box<dyn LlmProvider> = match config.llm_provider.as_str() {
        "ollama" => {
            tracing::info!("using Ollama LLM provider (url: {})", config.ollama_url);
            Box::new(OllamaProvider::new(
                config.ollama_url.clone(),
                config.ollama_model.clone(),
            ))
        }
        _ => {
            anyhow::ensure!(
                !config.openai_api_key.is_empty(),
                "OPENAI_API_KEY must be set when LLM_PROVIDER=openai"
            );
            tracing::info!("using OpenAI-compatible LLM provider (model: {})", config.openai_model);
            Box::new(OpenAiProvider::new(
                config.openai_url.clone(),
                config.openai_api_key.clone(),
                config.openai_model.clone(),
            ))
        }
    };

    let retriever = Retriever::new(
        Box::new(AzureEmbedder::new(
            config.embedding_url.clone(),
            config.embedding_api_key.clone(),
        )),
        Box::new(PineconeIndex::new(
            config.pinecone_url.clone(),
            config.pinecone_api_key.clone(),
        )),
        hotel.names(),
    );
    let locations = LocationResolver::new(LocationTable::from_profile(&hotel), config.llm_max_tokens);
    let booking_api = ApaleoClient::new(
        config.booking_api_url.clone(),
        config.booking_token_url.clone(),
        config.booking_client_id.clone(),
        config.booking_client_secret.clone(),
    );
    let messaging = TwilioWhatsAppProvider::new(
        config.twilio_account_sid.clone(),
        config.twilio_auth_token.clone(),
        config.whatsapp_from.clone(),
    );
    let notifier = TeamsNotifier::new(config.teams_webhook_url.clone());

    tracing::info!(
        brand = %hotel.brand,
        properties = hotel.properties.len(),
        "hotel profile loaded"
    );

    let state = Arc::new(AppState {
        db: Arc::new(Mutex::new(conn)),
        config: config.clone(),
        hotel,
        texts,
        llm,
        retriever,
        locations,
        booking_api: Box::new(booking_api),
        messaging: Box::new(messaging),
        notifier: Box::new(notifier),
        session_locks: SessionLocks::default(),
    });

    let app = Router::new()
        .route("/health", get(handlers::health::health))
        .route("/", post(handlers::webhook::start_conversation))
        .route(
            "/conversation/activities/:id",
            post(handlers::webhook::conversation_activities),
        )
        .route(
            "/conversation/refresh/:id",
            post(handlers::webhook::refresh_conversation),
        )
        .route(
            "/conversation/disconnect/:id",
            post(handlers::webhook::disconnect_conversation),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!("starting server on {addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
