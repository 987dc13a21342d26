use std::sync::Arc;

use anyhow::{Context, Result};

use crate::api;
use crate::config;
use crate::data;
use crate::directory::Directory;
use crate::storage;
use crate::ui;

pub fn run() -> Result<()> {
    let cfg = config::load(config::LoadOptions::default()).context("load config")?;

    // The cache store is an optimization; without it everything still works,
    // the directory just refetches each session.
    let store = match storage::Store::open(storage::Options {
        path: cfg.cache.db_path.clone(),
    }) {
        Ok(store) => Some(Arc::new(store)),
        Err(err) => {
            tracing::warn!(error = %err, "cache store unavailable, running without persistence");
            None
        }
    };

    let token_provider: Option<Arc<dyn api::TokenProvider>> = if cfg.api.token.trim().is_empty() {
        None
    } else {
        Some(Arc::new(api::StaticToken::new(cfg.api.token.trim())))
    };

    let client = Arc::new(
        api::Client::new(api::ClientConfig {
            base_url: Some(cfg.api.base_url.clone()),
            user_agent: cfg.api.user_agent.clone(),
            token_provider,
            http_client: None,
        })
        .context("build api client")?,
    );

    let directory = Arc::new(Directory::new(
        Arc::new(data::CompanyPages::new(client.clone())),
        store.clone(),
        cfg.cache.company_ttl,
    ));

    let status = if cfg.api.token.trim().is_empty() {
        "Browsing bumaview. j/k to navigate, / to search, Tab to switch lists, q to quit."
    } else {
        "Signed in. j/k to navigate, Enter for details, 'a' to answer, 'n' to post a question, q to quit."
    };

    let options = ui::Options {
        question_source: Arc::new(data::QuestionPages::new(client.clone())),
        company_source: Arc::new(data::CompanyPages::new(client.clone())),
        job_posting_source: Arc::new(data::JobPostingPages::new(client.clone())),
        discussions: Arc::new(data::ApiDiscussionService::new(client)),
        directory,
        page_size: cfg.ui.page_size,
        status_message: status.to_string(),
    };

    let mut model = ui::Model::new(options);
    model.run()
}
