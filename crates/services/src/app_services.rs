use std::sync::Arc;

use storage::repository::Storage;

use crate::Clock;
use crate::access_service::AccessService;
use crate::admin_service::AdminService;
use crate::ai::{OpenAiCompatibleClient, QuizGenerator, TextGenerator};
use crate::auth_service::AuthService;
use crate::catalog_service::CatalogService;
use crate::chat_service::ChatAssistant;
use crate::config::PortalConfig;
use crate::error::AppServicesError;
use crate::exam_controller::ExamService;
use crate::playback_service::PlaybackService;
use crate::seed::seed_demo_catalog;
use crate::store::PortalStore;

/// Assembles the store and every app-facing service.
#[derive(Clone)]
pub struct AppServices {
    store: Arc<PortalStore>,
    ai_client: Option<Arc<OpenAiCompatibleClient>>,
    auth: Arc<AuthService>,
    catalog: Arc<CatalogService>,
    access: Arc<AccessService>,
    admin: Arc<AdminService>,
    playback: Arc<PlaybackService>,
    exams: Arc<ExamService>,
    chat: Arc<ChatAssistant>,
}

impl AppServices {
    /// Build services backed by `SQLite` storage.
    ///
    /// # Errors
    ///
    /// Returns `AppServicesError` if storage initialization or seeding fails.
    pub async fn new_sqlite(config: &PortalConfig, clock: Clock) -> Result<Self, AppServicesError> {
        let storage = Storage::sqlite(&config.db_url).await?;
        Self::from_storage(storage, config, clock, None).await
    }

    /// Build services over an in-memory store.
    ///
    /// # Errors
    ///
    /// Returns `AppServicesError` if seeding fails.
    pub async fn in_memory(config: &PortalConfig, clock: Clock) -> Result<Self, AppServicesError> {
        Self::from_storage(Storage::in_memory(), config, clock, None).await
    }

    /// Build services with a custom text generator in place of the HTTP client.
    ///
    /// # Errors
    ///
    /// Returns `AppServicesError` if seeding fails.
    pub async fn with_generator(
        storage: Storage,
        config: &PortalConfig,
        clock: Clock,
        generator: Arc<dyn TextGenerator>,
    ) -> Result<Self, AppServicesError> {
        Self::from_storage(storage, config, clock, Some(generator)).await
    }

    async fn from_storage(
        storage: Storage,
        config: &PortalConfig,
        clock: Clock,
        generator: Option<Arc<dyn TextGenerator>>,
    ) -> Result<Self, AppServicesError> {
        let store = Arc::new(PortalStore::load(Arc::clone(&storage.kv)).await);
        seed_demo_catalog(&store, clock).await?;

        let (generator, ai_client) = match generator {
            Some(generator) => (generator, None),
            None => {
                let client = Arc::new(OpenAiCompatibleClient::new(
                    config.ai.clone(),
                    Arc::clone(&store),
                ));
                (Arc::clone(&client) as Arc<dyn TextGenerator>, Some(client))
            }
        };

        let auth = AuthService::new(clock, Arc::clone(&store));
        let access = AccessService::new(clock, Arc::clone(&store));
        let catalog = CatalogService::new(clock, Arc::clone(&store));
        let admin = AdminService::new(clock, Arc::clone(&store), auth.clone());
        let playback = PlaybackService::new(clock, Arc::clone(&store), access.clone());
        let quiz = QuizGenerator::new(Arc::clone(&generator), config.ai_question_count);
        let exams = ExamService::new(
            clock,
            Arc::clone(&store),
            auth.clone(),
            access.clone(),
            Some(quiz),
            config.autosave_delay,
        );
        let chat = ChatAssistant::new(generator, Arc::clone(&store));

        Ok(Self {
            store,
            ai_client,
            auth: Arc::new(auth),
            catalog: Arc::new(catalog),
            access: Arc::new(access),
            admin: Arc::new(admin),
            playback: Arc::new(playback),
            exams: Arc::new(exams),
            chat: Arc::new(chat),
        })
    }

    /// Whether AI features can be used right now.
    ///
    /// Custom generators are always considered available.
    pub async fn ai_enabled(&self) -> bool {
        match &self.ai_client {
            Some(client) => client.enabled().await,
            None => true,
        }
    }

    #[must_use]
    pub fn store(&self) -> Arc<PortalStore> {
        Arc::clone(&self.store)
    }

    #[must_use]
    pub fn auth(&self) -> Arc<AuthService> {
        Arc::clone(&self.auth)
    }

    #[must_use]
    pub fn catalog(&self) -> Arc<CatalogService> {
        Arc::clone(&self.catalog)
    }

    #[must_use]
    pub fn access(&self) -> Arc<AccessService> {
        Arc::clone(&self.access)
    }

    #[must_use]
    pub fn admin(&self) -> Arc<AdminService> {
        Arc::clone(&self.admin)
    }

    #[must_use]
    pub fn playback(&self) -> Arc<PlaybackService> {
        Arc::clone(&self.playback)
    }

    #[must_use]
    pub fn exams(&self) -> Arc<ExamService> {
        Arc::clone(&self.exams)
    }

    #[must_use]
    pub fn chat(&self) -> Arc<ChatAssistant> {
        Arc::clone(&self.chat)
    }
}
