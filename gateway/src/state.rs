use std::sync::Arc;

use axum::{
    http::{header, HeaderValue, Method},
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use chrono::Duration;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};

use crate::auth::{AllowList, AuthSessionService, CommandNotifier, OtpNotifier, TokenSigner};
use crate::clock::SharedClock;
use crate::config::{Config, NotificationSettings};
use crate::folders::FolderStateInspector;
use crate::jobs::JobRunner;
use crate::links::import::LetterDefaults;
use crate::links::LinkAccessGuard;
use crate::{api, auth, links, middleware};

pub struct AppState {
    pub config: Config,
    pub clock: SharedClock,
    pub runner: Arc<JobRunner>,
    pub folders: FolderStateInspector,
    pub auth: Arc<AuthSessionService>,
    pub letters: Arc<LinkAccessGuard>,
    pub notifications: NotificationSettings,
}

impl AppState {
    /// Production wiring: OTPs go out through the mail worker.
    pub fn new(config: Config, clock: SharedClock) -> anyhow::Result<Self> {
        let runner = JobRunner::new();
        let notifier = Arc::new(CommandNotifier::new(
            runner.clone(),
            config.workers.interpreter.clone(),
            config.workers.otp.clone(),
            config.work_root.clone(),
            config.job_timeouts.otp_send,
        ));
        Self::assemble(config, clock, runner, notifier)
    }

    pub fn with_notifier(
        config: Config,
        clock: SharedClock,
        notifier: Arc<dyn OtpNotifier>,
    ) -> anyhow::Result<Self> {
        Self::assemble(config, clock, JobRunner::new(), notifier)
    }

    fn assemble(
        config: Config,
        clock: SharedClock,
        runner: Arc<JobRunner>,
        notifier: Arc<dyn OtpNotifier>,
    ) -> anyhow::Result<Self> {
        let signer = TokenSigner::new(config.session_secret.as_bytes())
            .map_err(|e| anyhow::anyhow!("invalid SESSION_SECRET: {e}"))?;
        let auth = AuthSessionService::new(
            Arc::new(AllowList::new(&config.authorized_users)),
            signer,
            config.login_password_hash.clone(),
            notifier,
            clock.clone(),
        );
        Ok(Self {
            folders: FolderStateInspector::for_root(&config.work_root),
            notifications: NotificationSettings::new(&config.notify_email, &config.notify_name),
            letters: Arc::new(LinkAccessGuard::new(clock.clone())),
            auth: Arc::new(auth),
            runner,
            clock,
            config,
        })
    }

    pub fn letter_defaults(&self) -> LetterDefaults {
        LetterDefaults {
            ttl: Duration::days(self.config.letter_link_ttl_days),
            max_access: self.config.letter_max_access,
        }
    }
}

/// The full HTTP surface.
pub fn router(state: Arc<AppState>) -> Router {
    let operator = Router::new()
        // Jobs
        .route("/jobs/render", post(api::render))
        .route("/jobs/combine", post(api::combine))
        .route("/jobs/link-generate", post(api::link_generate))
        .route("/jobs/email-send", post(api::email_send))
        .route("/jobs/active", get(api::active_jobs))
        .route("/jobs/{job_id}/cancel", post(api::cancel_job))
        .route("/jobs/templates", get(api::list_templates))
        // Folders
        .route("/jobs/folders", get(api::list_folders))
        .route("/jobs/folders/enhanced", get(api::list_folders_enhanced))
        .route("/jobs/folders/{name}/contents", get(api::folder_contents))
        .route("/jobs/folders/{name}/sms-batch", get(api::sms_batch))
        .route(
            "/jobs/folders/{name}/files/{category}/{file}",
            get(api::folder_file),
        )
        // Settings
        .route(
            "/settings/notification",
            get(api::get_notification).put(api::set_notification),
        )
        // Session
        .route("/auth/me", get(auth::handlers::me))
        .route("/auth/logout", post(auth::handlers::logout))
        // Audit
        .route("/admin/sessions", get(auth::handlers::list_sessions))
        .route("/admin/letters", get(links::handlers::list_letters))
        .route_layer(axum_middleware::from_fn_with_state(
            Arc::clone(&state),
            middleware::require_session,
        ));

    let public = Router::new()
        .route("/health", get(api::health))
        .route("/auth/otp", post(auth::handlers::request_otp))
        .route("/auth/otp/verify", post(auth::handlers::verify_otp))
        .route("/auth/password", post(auth::handlers::password_login))
        .route("/letters/{id}", get(links::handlers::letter_page))
        .route("/letters/{id}/download", get(links::handlers::download_letter));

    let origins: Vec<HeaderValue> = state
        .config
        .allowed_origins
        .iter()
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT, header::AUTHORIZATION])
        .max_age(std::time::Duration::from_secs(3600));

    operator
        .merge(public)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
