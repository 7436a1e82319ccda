//! Template and response repositories.
//!
//! The service only talks to persistence through these traits. The in-memory
//! implementations make the uniqueness check and the write a single step.

use crate::model::{ResponseTemplate, Template};
use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;

/// Filter passed to repository queries.
pub type Predicate<'a, T> = &'a (dyn Fn(&T) -> bool + Send + Sync);

/// Persistence failures.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// A conditional write found a conflicting entity.
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Repository error: {0}")]
    Backend(String),
}

/// Storage for templates.
#[async_trait]
pub trait TemplateRepository: Send + Sync {
    async fn find_many(
        &self,
        predicate: Predicate<'_, Template>,
    ) -> Result<Vec<Template>, RepositoryError>;

    /// Insert a template. Fails with [`RepositoryError::Conflict`] if the user
    /// already has a template on the same route.
    async fn add(&self, template: Template) -> Result<(), RepositoryError>;

    /// Replace every template matching `predicate`. Returns how many were replaced.
    async fn update(
        &self,
        predicate: Predicate<'_, Template>,
        template: Template,
    ) -> Result<usize, RepositoryError>;
}

/// Storage for responses.
#[async_trait]
pub trait ResponseRepository: Send + Sync {
    async fn find_many(
        &self,
        predicate: Predicate<'_, ResponseTemplate>,
    ) -> Result<Vec<ResponseTemplate>, RepositoryError>;

    /// Insert a response. Fails with [`RepositoryError::Conflict`] if the user
    /// already has a response with the same `response_id`.
    async fn add(&self, response: ResponseTemplate) -> Result<(), RepositoryError>;

    async fn update(
        &self,
        predicate: Predicate<'_, ResponseTemplate>,
        response: ResponseTemplate,
    ) -> Result<usize, RepositoryError>;

    /// Delete every response matching `predicate`. Returns how many were removed.
    async fn remove(
        &self,
        predicate: Predicate<'_, ResponseTemplate>,
    ) -> Result<usize, RepositoryError>;
}

/// In-memory template storage.
#[derive(Default)]
pub struct MemoryTemplateRepository {
    templates: RwLock<Vec<Template>>,
}

impl MemoryTemplateRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TemplateRepository for MemoryTemplateRepository {
    async fn find_many(
        &self,
        predicate: Predicate<'_, Template>,
    ) -> Result<Vec<Template>, RepositoryError> {
        let templates = self.templates.read().await;
        Ok(templates.iter().filter(|t| predicate(t)).cloned().collect())
    }

    async fn add(&self, template: Template) -> Result<(), RepositoryError> {
        let mut templates = self.templates.write().await;
        if templates
            .iter()
            .any(|t| t.belongs_to(&template.user) && t.route.same_route(&template.route))
        {
            return Err(RepositoryError::Conflict(format!(
                "template {}/{}/{} exists for user {}",
                template.route.version, template.route.name, template.route.method, template.user
            )));
        }
        templates.push(template);
        Ok(())
    }

    async fn update(
        &self,
        predicate: Predicate<'_, Template>,
        template: Template,
    ) -> Result<usize, RepositoryError> {
        let mut templates = self.templates.write().await;
        if templates.iter().any(|t| {
            !predicate(t) && t.belongs_to(&template.user) && t.route.same_route(&template.route)
        }) {
            return Err(RepositoryError::Conflict(format!(
                "another template uses route {}/{}/{}",
                template.route.version, template.route.name, template.route.method
            )));
        }

        let mut replaced = 0;
        for slot in templates.iter_mut().filter(|t| predicate(t)) {
            *slot = template.clone();
            replaced += 1;
        }
        Ok(replaced)
    }
}

/// In-memory response storage.
#[derive(Default)]
pub struct MemoryResponseRepository {
    responses: RwLock<Vec<ResponseTemplate>>,
}

impl MemoryResponseRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ResponseRepository for MemoryResponseRepository {
    async fn find_many(
        &self,
        predicate: Predicate<'_, ResponseTemplate>,
    ) -> Result<Vec<ResponseTemplate>, RepositoryError> {
        let responses = self.responses.read().await;
        Ok(responses.iter().filter(|r| predicate(r)).cloned().collect())
    }

    async fn add(&self, response: ResponseTemplate) -> Result<(), RepositoryError> {
        let mut responses = self.responses.write().await;
        if responses
            .iter()
            .any(|r| r.is_keyed(&response.user, &response.response_id))
        {
            return Err(RepositoryError::Conflict(format!(
                "response {} exists for user {}",
                response.response_id, response.user
            )));
        }
        responses.push(response);
        Ok(())
    }

    async fn update(
        &self,
        predicate: Predicate<'_, ResponseTemplate>,
        response: ResponseTemplate,
    ) -> Result<usize, RepositoryError> {
        let mut responses = self.responses.write().await;
        let mut replaced = 0;
        for slot in responses.iter_mut().filter(|r| predicate(r)) {
            *slot = response.clone();
            replaced += 1;
        }
        Ok(replaced)
    }

    async fn remove(
        &self,
        predicate: Predicate<'_, ResponseTemplate>,
    ) -> Result<usize, RepositoryError> {
        let mut responses = self.responses.write().await;
        let before = responses.len();
        responses.retain(|r| !predicate(r));
        Ok(before - responses.len())
    }
}
