use std::sync::Arc;

use sqlx::PgPool;

use crate::core::config::Settings;
use crate::services::email::Mailer;

#[derive(Clone)]
pub(crate) struct AppState {
    inner: Arc<InnerState>,
}

struct InnerState {
    settings: Settings,
    db: PgPool,
    mailer: Option<Mailer>,
}

impl AppState {
    pub(crate) fn new(settings: Settings, db: PgPool, mailer: Option<Mailer>) -> Self {
        Self { inner: Arc::new(InnerState { settings, db, mailer }) }
    }

    pub(crate) fn settings(&self) -> &Settings {
        &self.inner.settings
    }

    pub(crate) fn db(&self) -> &PgPool {
        &self.inner.db
    }

    pub(crate) fn mailer(&self) -> Option<&Mailer> {
        self.inner.mailer.as_ref()
    }
}
