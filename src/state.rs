use std::sync::Arc;

use tracing::{info, warn};

use crate::{
    auth::jwt::JwtKeys,
    config::AppConfig,
    mail::{LogMailer, Mailer, SmtpMailer},
    payments::{PaymentGateway, StripeGateway},
    storage::{LocalStorage, StorageClient},
    store::{DocumentStore, MemoryStore, PgStore},
    views::Views,
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub store: Arc<dyn DocumentStore>,
    pub storage: Arc<dyn StorageClient>,
    pub mailer: Arc<dyn Mailer>,
    pub payments: Arc<dyn PaymentGateway>,
    pub views: Arc<Views>,
    pub keys: JwtKeys,
}

impl AppState {
    pub async fn init() -> anyhow::Result<Self> {
        let config = Arc::new(AppConfig::from_env()?);

        let store: Arc<dyn DocumentStore> = match &config.database_url {
            Some(url) => {
                let pg = PgStore::connect(url).await?;
                pg.migrate().await?;
                info!("document store: postgres");
                Arc::new(pg)
            }
            None => {
                warn!("DATABASE_URL not set, using the in-memory store (data is lost on restart)");
                Arc::new(MemoryStore::new())
            }
        };

        let mailer: Arc<dyn Mailer> = match config.mail.host {
            Some(_) => Arc::new(SmtpMailer::new(&config.mail)?),
            None => {
                warn!("EMAIL_HOST not set, emails are only logged");
                Arc::new(LogMailer)
            }
        };

        let storage = Arc::new(LocalStorage::new(config.public_dir.clone())) as Arc<dyn StorageClient>;
        let payments = Arc::new(StripeGateway::new(&config.stripe)) as Arc<dyn PaymentGateway>;

        Self::from_parts(config, store, storage, mailer, payments)
    }

    pub fn from_parts(
        config: Arc<AppConfig>,
        store: Arc<dyn DocumentStore>,
        storage: Arc<dyn StorageClient>,
        mailer: Arc<dyn Mailer>,
        payments: Arc<dyn PaymentGateway>,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            keys: JwtKeys::new(&config.jwt),
            views: Arc::new(Views::new()?),
            config,
            store,
            storage,
            mailer,
            payments,
        })
    }
}
