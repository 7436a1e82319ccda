//! Template service.
//!
//! Creates and updates templates and responses, and serves mock invocations
//! by matching a route and rendering the selected response. Persistence is
//! reached only through the repository traits passed to [`TemplateService::new`].

use crate::config::{GlobalSettings, UserSeed};
use crate::definition::{
    InvocationRequest, ResponseDefinition, TemplateDefinition, TemplateView,
};
use crate::error::ServiceError;
use crate::matcher::{find_match, select_response, ResponseSelector, RouteQuery};
use crate::model::{RequestTemplate, ResponseTemplate, RouteTemplate, Template};
use crate::render::{RenderedResponse, Renderer};
use crate::store::{
    MemoryResponseRepository, MemoryTemplateRepository, RepositoryError, ResponseRepository,
    TemplateRepository,
};
use crate::validation::{self, ValidationReport};
use chrono::Utc;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Result of creating or updating a template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TemplateCreated {
    pub status: u16,
    pub token: Uuid,
    /// Route clients call to reach the mock
    pub route: String,
    pub method: String,
}

/// Result of creating or updating a response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResponseSaved {
    pub status: u16,
    pub response: ResponseDefinition,
}

/// Application service for templates and responses.
pub struct TemplateService {
    templates: Arc<dyn TemplateRepository>,
    responses: Arc<dyn ResponseRepository>,
    renderer: Renderer,
    settings: GlobalSettings,
}

fn conflict_as(err: RepositoryError, duplicate: ServiceError) -> ServiceError {
    match err {
        RepositoryError::Conflict(_) => duplicate,
        other => ServiceError::Repository(other),
    }
}

impl TemplateService {
    pub fn new(
        templates: Arc<dyn TemplateRepository>,
        responses: Arc<dyn ResponseRepository>,
        settings: GlobalSettings,
    ) -> Self {
        let renderer = Renderer::new(settings.default_content_type.clone());
        Self {
            templates,
            responses,
            renderer,
            settings,
        }
    }

    /// Service backed by in-memory repositories.
    pub fn in_memory(settings: GlobalSettings) -> Self {
        Self::new(
            Arc::new(MemoryTemplateRepository::new()),
            Arc::new(MemoryResponseRepository::new()),
            settings,
        )
    }

    fn route_path(&self, user: &str, route: &RouteTemplate) -> String {
        let path = format!("{}/{}/{}", user, route.version, route.name);
        if self.settings.route_prefix.is_empty() {
            path
        } else {
            format!("{}/{}", self.settings.route_prefix, path)
        }
    }

    async fn user_responses(&self, user: &str) -> Result<Vec<ResponseTemplate>, ServiceError> {
        Ok(self.responses.find_many(&|r| r.belongs_to(user)).await?)
    }

    async fn attached_responses(
        &self,
        template: &Template,
    ) -> Result<Vec<ResponseTemplate>, ServiceError> {
        Ok(self
            .responses
            .find_many(&|r| template.responses.contains(&r.id))
            .await?)
    }

    async fn find_template(&self, query: &RouteQuery) -> Result<Option<Template>, ServiceError> {
        let templates = self.templates.find_many(&|t| query.matches(t)).await?;
        Ok(find_match(&templates, query).cloned())
    }

    async fn route_taken(
        &self,
        user: &str,
        route: &RouteTemplate,
        except: Option<Uuid>,
    ) -> Result<bool, ServiceError> {
        let taken = self
            .templates
            .find_many(&|t| {
                Some(t.id) != except && t.belongs_to(user) && t.route.same_route(route)
            })
            .await?;
        Ok(!taken.is_empty())
    }

    /// Run every template rule and resolve `response_ids` among `existing`.
    ///
    /// Referenced responses are attached to `template`; inline ones are not.
    fn check_definition(
        template: &mut Template,
        inline: &[ResponseTemplate],
        response_ids: &[String],
        existing: &[ResponseTemplate],
    ) -> ValidationReport {
        let mut report = validation::validate_template(template, inline);

        let mut seen = HashSet::new();
        for response in inline {
            report.merge(validation::validate_response(response));
            if !seen.insert(response.response_id.as_str()) {
                report.push(format!(
                    "response [{}] is defined more than once",
                    response.response_id
                ));
            }
        }

        for response_id in response_ids {
            match existing
                .iter()
                .find(|r| r.is_keyed(&template.user, response_id))
            {
                Some(response) => template.attach_responses([response]),
                None => report.push(format!(
                    "response [{}] does not exist for this user",
                    response_id
                )),
            }
        }

        report.merge(validation::validate_against_existing_responses(
            template, existing,
        ));
        report
    }

    /// Attach inline responses ahead of the referenced ones.
    fn attach_in_order(template: &mut Template, inline: &[ResponseTemplate]) {
        let referenced = std::mem::take(&mut template.responses);
        template.attach_responses(inline);
        for id in referenced {
            if !template.responses.contains(&id) {
                template.responses.push(id);
            }
        }
    }

    fn reject(user: &str, report: ValidationReport) -> ServiceError {
        warn!(
            user = %user,
            errors = report.errors().len(),
            "Template definition rejected"
        );
        ServiceError::ValidationFailed(report.into_errors())
    }

    /// Re-check the user's templates attaching any of `changed` against
    /// `candidates`. Returns how many templates were checked.
    async fn check_dependents(
        &self,
        user: &str,
        changed: &[Uuid],
        except: Option<Uuid>,
        candidates: &[ResponseTemplate],
        report: &mut ValidationReport,
    ) -> Result<usize, ServiceError> {
        let dependents = self
            .templates
            .find_many(&|t| {
                Some(t.id) != except
                    && t.belongs_to(user)
                    && t.responses.iter().any(|id| changed.contains(id))
            })
            .await?;
        for template in &dependents {
            for message in
                validation::validate_against_existing_responses(template, candidates).into_errors()
            {
                report.push(format!(
                    "template {}/{}/{}: {}",
                    template.route.version, template.route.name, template.route.method, message
                ));
            }
        }
        Ok(dependents.len())
    }

    /// Drop responses written by a failed operation and put back the ones it
    /// overwrote.
    async fn restore_responses(&self, added: &[Uuid], overwritten: Vec<ResponseTemplate>) {
        if !added.is_empty() {
            if let Err(e) = self.responses.remove(&|r| added.contains(&r.id)).await {
                error!(error = %e, "Failed to remove responses of a rejected write");
            }
        }
        for previous in overwritten {
            let id = previous.id;
            if let Err(e) = self.responses.update(&|r| r.id == id, previous).await {
                error!(error = %e, response = %id, "Failed to restore response");
            }
        }
    }

    /// Create a template, together with its inline responses.
    pub async fn create_template(
        &self,
        user: &str,
        definition: &TemplateDefinition,
    ) -> Result<TemplateCreated, ServiceError> {
        let mut template = definition.to_template(user);
        let inline = definition.to_responses(user);
        let existing = self.user_responses(user).await?;

        let report =
            Self::check_definition(&mut template, &inline, &definition.response_ids, &existing);
        if !report.is_valid() {
            return Err(Self::reject(user, report));
        }

        for response in &inline {
            if existing
                .iter()
                .any(|r| r.is_keyed(user, &response.response_id))
            {
                return Err(ServiceError::DuplicateResponseId(
                    response.response_id.clone(),
                ));
            }
        }

        if self.route_taken(user, &template.route, None).await? {
            return Err(ServiceError::DuplicateTemplate);
        }

        Self::attach_in_order(&mut template, &inline);

        let mut added = Vec::with_capacity(inline.len());
        for response in inline {
            let id = response.id;
            let response_id = response.response_id.clone();
            if let Err(e) = self.responses.add(response).await {
                self.restore_responses(&added, Vec::new()).await;
                return Err(conflict_as(e, ServiceError::DuplicateResponseId(response_id)));
            }
            added.push(id);
        }

        let created = TemplateCreated {
            status: 201,
            token: template.id,
            route: self.route_path(user, &template.route),
            method: template.route.method.clone(),
        };

        if let Err(e) = self.templates.add(template).await {
            self.restore_responses(&added, Vec::new()).await;
            return Err(conflict_as(e, ServiceError::DuplicateTemplate));
        }

        info!(
            user = %user,
            token = %created.token,
            route = %created.route,
            method = %created.method,
            "Template created"
        );

        Ok(created)
    }

    /// Replace a template. Inline responses are updated in place when the user
    /// already has them, created otherwise.
    pub async fn update_template(
        &self,
        user: &str,
        token: &str,
        definition: &TemplateDefinition,
    ) -> Result<TemplateCreated, ServiceError> {
        let not_found = || ServiceError::NotFound(format!("Template {}", token));

        let id = Uuid::parse_str(token).map_err(|_| not_found())?;
        let stored = self
            .templates
            .find_many(&|t| t.id == id && t.belongs_to(user))
            .await?
            .into_iter()
            .next()
            .ok_or_else(not_found)?;

        let mut template = definition.to_template(user);
        template.id = stored.id;
        template.created_at = stored.created_at;

        let existing = self.user_responses(user).await?;
        let upserts: Vec<(ResponseTemplate, bool)> = definition
            .responses
            .iter()
            .map(|def| {
                match existing.iter().find(|r| r.is_keyed(user, &def.response_id)) {
                    Some(current) => (def.apply_to(current), true),
                    None => (def.to_response(user), false),
                }
            })
            .collect();
        let inline: Vec<ResponseTemplate> = upserts.iter().map(|(r, _)| r.clone()).collect();

        let mut report =
            Self::check_definition(&mut template, &inline, &definition.response_ids, &existing);

        let changed: Vec<Uuid> = upserts
            .iter()
            .filter(|(_, is_stored)| *is_stored)
            .map(|(r, _)| r.id)
            .collect();
        if !changed.is_empty() {
            let candidates: Vec<ResponseTemplate> = existing
                .iter()
                .map(|r| inline.iter().find(|n| n.id == r.id).unwrap_or(r).clone())
                .collect();
            self.check_dependents(user, &changed, Some(id), &candidates, &mut report)
                .await?;
        }

        if !report.is_valid() {
            return Err(Self::reject(user, report));
        }

        if self.route_taken(user, &template.route, Some(id)).await? {
            return Err(ServiceError::DuplicateTemplate);
        }

        Self::attach_in_order(&mut template, &inline);

        let updated = TemplateCreated {
            status: 200,
            token: template.id,
            route: self.route_path(user, &template.route),
            method: template.route.method.clone(),
        };

        let replaced = self
            .templates
            .update(&|t| t.id == id, template)
            .await
            .map_err(|e| conflict_as(e, ServiceError::DuplicateTemplate))?;
        if replaced == 0 {
            return Err(not_found());
        }

        let mut added = Vec::new();
        let mut overwritten = Vec::new();
        for (response, is_stored) in upserts {
            let response_id = response.id;
            let written = if is_stored {
                self.responses
                    .update(&|r| r.id == response_id, response)
                    .await
                    .map(|_| ())
                    .map_err(ServiceError::from)
            } else {
                let key = response.response_id.clone();
                self.responses
                    .add(response)
                    .await
                    .map_err(|e| conflict_as(e, ServiceError::DuplicateResponseId(key)))
            };

            if let Err(err) = written {
                self.restore_responses(&added, overwritten).await;
                if let Err(e) = self.templates.update(&|t| t.id == id, stored).await {
                    error!(error = %e, token = %id, "Failed to restore template");
                }
                return Err(err);
            }

            if is_stored {
                overwritten.extend(existing.iter().find(|r| r.id == response_id).cloned());
            } else {
                added.push(response_id);
            }
        }

        info!(user = %user, token = %updated.token, route = %updated.route, "Template updated");

        Ok(updated)
    }

    /// Create a standalone response.
    pub async fn create_response(
        &self,
        user: &str,
        definition: &ResponseDefinition,
    ) -> Result<ResponseSaved, ServiceError> {
        let response = definition.to_response(user);

        let report = validation::validate_response(&response);
        if !report.is_valid() {
            return Err(Self::reject(user, report));
        }

        let response_id = response.response_id.clone();
        let taken = self
            .responses
            .find_many(&|r| r.is_keyed(user, &response_id))
            .await?;
        if !taken.is_empty() {
            return Err(ServiceError::DuplicateResponseId(response_id));
        }

        let saved = ResponseDefinition::from(&response);
        self.responses
            .add(response)
            .await
            .map_err(|e| conflict_as(e, ServiceError::DuplicateResponseId(response_id)))?;

        info!(user = %user, response_id = %saved.response_id, "Response created");

        Ok(ResponseSaved {
            status: 201,
            response: saved,
        })
    }

    /// Update a response, keeping its internal id.
    ///
    /// Fails if the new body would reference context that a template using
    /// the response does not declare.
    pub async fn update_response(
        &self,
        user: &str,
        definition: &ResponseDefinition,
    ) -> Result<ResponseSaved, ServiceError> {
        let mut candidates = self.user_responses(user).await?;
        let current = candidates
            .iter_mut()
            .find(|r| r.response_id == definition.response_id)
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Response [{}]", definition.response_id))
            })?;

        let updated = definition.apply_to(current);
        *current = updated.clone();

        let mut report = validation::validate_response(&updated);
        let dependents = self
            .check_dependents(user, &[updated.id], None, &candidates, &mut report)
            .await?;

        if !report.is_valid() {
            return Err(Self::reject(user, report));
        }

        let id = updated.id;
        let saved = ResponseDefinition::from(&updated);
        let replaced = self.responses.update(&|r| r.id == id, updated).await?;
        if replaced == 0 {
            return Err(ServiceError::NotFound(format!(
                "Response [{}]",
                definition.response_id
            )));
        }

        info!(
            user = %user,
            response_id = %saved.response_id,
            templates = dependents,
            "Response updated"
        );

        Ok(ResponseSaved {
            status: 200,
            response: saved,
        })
    }

    /// Look up a template by route.
    pub async fn get_template(&self, query: &RouteQuery) -> Result<TemplateView, ServiceError> {
        let template = self
            .find_template(query)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Template {}", query)))?;
        let responses = self.attached_responses(&template).await?;
        Ok(TemplateView::new(&template, &responses))
    }

    /// Serve a mock call: match the route, then render the selected response.
    pub async fn invoke(
        &self,
        query: &RouteQuery,
        selector: &ResponseSelector,
        request: InvocationRequest,
    ) -> Result<RenderedResponse, ServiceError> {
        let Some(template) = self.find_template(query).await? else {
            if self.settings.log_unmatched {
                warn!(route = %query, "No matching template found");
            }
            return Err(ServiceError::NotFound(format!("Template {}", query)));
        };

        let responses = self.attached_responses(&template).await?;
        let response = select_response(&template, &responses, selector).ok_or_else(|| {
            ServiceError::NotFound(format!("{} of template {}", selector, query))
        })?;

        if self.settings.log_matches {
            info!(
                token = %template.id,
                route = %query,
                response_id = %response.response_id,
                "Invocation matched template"
            );
        }

        let rendered = self.renderer.render(&template, response, request.body);
        debug!(
            status = rendered.status,
            warnings = rendered.warnings.len(),
            "Response rendered"
        );
        Ok(rendered)
    }

    /// Create a post template whose request body is the given sample.
    pub async fn generate_template(
        &self,
        user: &str,
        route: RouteTemplate,
        body: &serde_json::Value,
    ) -> Result<TemplateView, ServiceError> {
        let template = Template::new(user, route, RequestTemplate::post(format!("{:#}", body)));

        let report = validation::validate_template(&template, &[]);
        if !report.is_valid() {
            return Err(Self::reject(user, report));
        }
        if self.route_taken(user, &template.route, None).await? {
            return Err(ServiceError::DuplicateTemplate);
        }

        let view = TemplateView::new(&template, &[]);
        self.templates
            .add(template)
            .await
            .map_err(|e| conflict_as(e, ServiceError::DuplicateTemplate))?;

        info!(user = %user, token = %view.token, "Template generated from sample request");
        Ok(view)
    }

    /// All responses owned by `user`.
    pub async fn list_responses(&self, user: &str) -> Result<Vec<ResponseDefinition>, ServiceError> {
        let mut responses = self.user_responses(user).await?;
        responses.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(responses.iter().map(ResponseDefinition::from).collect())
    }

    /// Load configured responses and templates. Stops at the first failure.
    pub async fn seed(&self, seeds: &[UserSeed]) -> Result<usize, ServiceError> {
        let started = Utc::now();
        let mut templates = 0;

        for seed in seeds {
            for response in &seed.responses {
                if let Err(e) = self.create_response(&seed.user, response).await {
                    error!(
                        user = %seed.user,
                        response_id = %response.response_id,
                        errors = ?e.messages(),
                        "Failed to seed response"
                    );
                    return Err(e);
                }
            }
            for definition in &seed.templates {
                if let Err(e) = self.create_template(&seed.user, definition).await {
                    let route = &definition.route;
                    error!(
                        user = %seed.user,
                        version = %route.version,
                        name = %route.name,
                        method = %route.method,
                        errors = ?e.messages(),
                        "Failed to seed template"
                    );
                    return Err(e);
                }
                templates += 1;
            }
        }

        info!(
            users = seeds.len(),
            templates,
            elapsed_ms = (Utc::now() - started).num_milliseconds(),
            "Seed loaded"
        );
        Ok(templates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ContextDeclaration;
    use crate::model::Action;
    use crate::store::Predicate;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Template storage whose writes can be made to lose a race.
    #[derive(Default)]
    struct RacingTemplates {
        inner: MemoryTemplateRepository,
        lose: AtomicBool,
    }

    #[async_trait]
    impl TemplateRepository for RacingTemplates {
        async fn find_many(
            &self,
            predicate: Predicate<'_, Template>,
        ) -> Result<Vec<Template>, RepositoryError> {
            self.inner.find_many(predicate).await
        }

        async fn add(&self, template: Template) -> Result<(), RepositoryError> {
            if self.lose.load(Ordering::SeqCst) {
                return Err(RepositoryError::Conflict("raced".to_string()));
            }
            self.inner.add(template).await
        }

        async fn update(
            &self,
            predicate: Predicate<'_, Template>,
            template: Template,
        ) -> Result<usize, RepositoryError> {
            if self.lose.load(Ordering::SeqCst) {
                return Err(RepositoryError::Conflict("raced".to_string()));
            }
            self.inner.update(predicate, template).await
        }
    }

    /// Response storage whose inserts can be made to fail.
    #[derive(Default)]
    struct FailingResponses {
        inner: MemoryResponseRepository,
        fail_adds: AtomicBool,
    }

    #[async_trait]
    impl ResponseRepository for FailingResponses {
        async fn find_many(
            &self,
            predicate: Predicate<'_, ResponseTemplate>,
        ) -> Result<Vec<ResponseTemplate>, RepositoryError> {
            self.inner.find_many(predicate).await
        }

        async fn add(&self, response: ResponseTemplate) -> Result<(), RepositoryError> {
            if self.fail_adds.load(Ordering::SeqCst) {
                return Err(RepositoryError::Backend("disk full".to_string()));
            }
            self.inner.add(response).await
        }

        async fn update(
            &self,
            predicate: Predicate<'_, ResponseTemplate>,
            response: ResponseTemplate,
        ) -> Result<usize, RepositoryError> {
            self.inner.update(predicate, response).await
        }

        async fn remove(
            &self,
            predicate: Predicate<'_, ResponseTemplate>,
        ) -> Result<usize, RepositoryError> {
            self.inner.remove(predicate).await
        }
    }

    fn service() -> TemplateService {
        TemplateService::in_memory(GlobalSettings::default())
    }

    fn pay_definition() -> TemplateDefinition {
        TemplateDefinition {
            route: RouteTemplate::new("v1", "pay", "post"),
            request: RequestTemplate::post(r#"{"amount": 0}"#)
                .with_context(ContextDeclaration::declare(["amount"])),
            responses: vec![ResponseDefinition {
                response_id: "approved".to_string(),
                status_code: 201,
                headers: Default::default(),
                body: r#"{"value": "_context.{{amount}}"}"#.to_string(),
            }],
            response_ids: vec![],
            actions: vec![Action::new("_context{{amount}}=500")],
        }
    }

    fn response_def(response_id: &str, body: &str) -> ResponseDefinition {
        ResponseDefinition {
            response_id: response_id.to_string(),
            status_code: 200,
            headers: Default::default(),
            body: body.to_string(),
        }
    }

    fn pay_query(user: &str) -> RouteQuery {
        RouteQuery::new(user, "pay", "post", "v1")
    }

    #[tokio::test]
    async fn test_create_and_invoke() {
        let service = service();
        let created = service.create_template("alice", &pay_definition()).await.unwrap();
        assert_eq!(created.status, 201);
        assert_eq!(created.route, "api/alice/v1/pay");
        assert_eq!(created.method, "post");

        let rendered = service
            .invoke(
                &pay_query("alice"),
                &ResponseSelector::Index(0),
                InvocationRequest::default(),
            )
            .await
            .unwrap();
        assert_eq!(rendered.status, 201);
        assert_eq!(rendered.body, r#"{"value": "500"}"#);
    }

    #[tokio::test]
    async fn test_duplicate_template() {
        let service = service();
        let first = service.create_template("alice", &pay_definition()).await.unwrap();

        let mut again = pay_definition();
        again.responses.clear();
        again.route = RouteTemplate::new("V1", "PAY", "POST");
        let err = service.create_template("ALICE", &again).await.unwrap_err();
        assert!(matches!(err, ServiceError::DuplicateTemplate));

        let view = service.get_template(&pay_query("alice")).await.unwrap();
        assert_eq!(view.token, first.token);
        assert_eq!(view.responses.len(), 1);

        // Other users have their own namespace.
        let mut bob = pay_definition();
        bob.responses.clear();
        assert!(service.create_template("bob", &bob).await.is_ok());
    }

    #[tokio::test]
    async fn test_concurrent_creates() {
        let service = Arc::new(service());
        let mut handles = Vec::new();
        for i in 0..4 {
            let service = Arc::clone(&service);
            handles.push(tokio::spawn(async move {
                let mut def = pay_definition();
                def.responses[0].response_id = format!("approved-{}", i);
                service.create_template("alice", &def).await
            }));
        }

        let mut created = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => created += 1,
                Err(e) => assert!(matches!(e, ServiceError::DuplicateTemplate)),
            }
        }
        assert_eq!(created, 1);
    }

    #[tokio::test]
    async fn test_create_rejects_undeclared_context() {
        let service = service();
        let mut def = pay_definition();
        def.request = RequestTemplate::post("{ }");
        def.actions = vec![Action::new("_context{{teste}}=1")];

        let err = service.create_template("alice", &def).await.unwrap_err();
        assert_eq!(err.status_code(), 400);
        let messages = err.messages();
        assert!(messages.iter().any(|m| m.contains("`teste`")));
        assert!(messages.iter().any(|m| m.contains("`amount`")));

        // Nothing was persisted.
        assert!(service.list_responses("alice").await.unwrap().is_empty());
        assert!(service.get_template(&pay_query("alice")).await.is_err());
    }

    #[tokio::test]
    async fn test_create_with_referenced_responses() {
        let service = service();
        service
            .create_response("alice", &response_def("denied", "_context.{{amount}} denied"))
            .await
            .unwrap();

        let mut def = pay_definition();
        def.response_ids = vec!["denied".to_string()];
        service.create_template("alice", &def).await.unwrap();

        let view = service.get_template(&pay_query("alice")).await.unwrap();
        let ids: Vec<_> = view.responses.iter().map(|r| r.response_id.as_str()).collect();
        assert_eq!(ids, vec!["approved", "denied"]);

        let rendered = service
            .invoke(
                &pay_query("alice"),
                &ResponseSelector::ResponseId("denied".to_string()),
                InvocationRequest::default(),
            )
            .await
            .unwrap();
        assert_eq!(rendered.body, "500 denied");
    }

    #[tokio::test]
    async fn test_referenced_response_must_exist_and_declare_context() {
        let service = service();
        service
            .create_response("alice", &response_def("status", "_context.{{status}}"))
            .await
            .unwrap();

        let mut def = pay_definition();
        def.response_ids = vec!["status".to_string(), "ghost".to_string()];
        let err = service.create_template("alice", &def).await.unwrap_err();
        let messages = err.messages();
        assert_eq!(messages.len(), 2);
        assert!(messages.iter().any(|m| m.contains("[ghost] does not exist")));
        assert!(messages.iter().any(|m| m.contains("`status`")));
    }

    #[tokio::test]
    async fn test_inline_response_id_already_exists() {
        let service = service();
        service
            .create_response("alice", &response_def("approved", "{}"))
            .await
            .unwrap();

        let err = service
            .create_template("alice", &pay_definition())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::DuplicateResponseId(id) if id == "approved"));
    }

    #[tokio::test]
    async fn test_response_id_uniqueness_and_update() {
        let service = service();
        let created = service
            .create_response("alice", &response_def("ok", "first"))
            .await
            .unwrap();
        assert_eq!(created.status, 201);

        let err = service
            .create_response("alice", &response_def("ok", "second"))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::DuplicateResponseId(_)));

        let before = service.user_responses("alice").await.unwrap();
        let updated = service
            .update_response("alice", &response_def("ok", "second"))
            .await
            .unwrap();
        assert_eq!(updated.status, 200);
        assert_eq!(updated.response.body, "second");

        let after = service.user_responses("alice").await.unwrap();
        assert_eq!(after.len(), 1);
        assert_eq!(after[0].id, before[0].id);
        assert_eq!(after[0].body, "second");
    }

    #[tokio::test]
    async fn test_update_missing_response() {
        let err = service()
            .update_response("alice", &response_def("nope", ""))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
        assert_eq!(err.status_code(), 404);
    }

    #[tokio::test]
    async fn test_update_response_rechecks_templates() {
        let service = service();
        service.create_template("alice", &pay_definition()).await.unwrap();

        let err = service
            .update_response("alice", &response_def("approved", "_context.{{secret}}"))
            .await
            .unwrap_err();
        let messages = err.messages();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].starts_with("template v1/pay/post:"));
        assert!(messages[0].contains("`secret`"));

        // Declared names are fine.
        service
            .update_response("alice", &response_def("approved", "amount=_context.$$amount$$"))
            .await
            .unwrap();
        let rendered = service
            .invoke(
                &pay_query("alice"),
                &ResponseSelector::Index(0),
                InvocationRequest::default(),
            )
            .await
            .unwrap();
        assert_eq!(rendered.body, "amount=500");
    }

    #[tokio::test]
    async fn test_update_template() {
        let service = service();
        let created = service.create_template("alice", &pay_definition()).await.unwrap();
        let before = service.user_responses("alice").await.unwrap();

        let mut def = pay_definition();
        def.actions = vec![Action::new("_context{{amount}}=750")];
        def.responses[0].body = "paid _context.{{amount}}".to_string();
        def.responses.push(response_def("extra", "extra"));

        let updated = service
            .update_template("alice", &created.token.to_string(), &def)
            .await
            .unwrap();
        assert_eq!(updated.status, 200);
        assert_eq!(updated.token, created.token);

        let after = service.user_responses("alice").await.unwrap();
        assert_eq!(after.len(), 2);
        let approved = after.iter().find(|r| r.response_id == "approved").unwrap();
        assert_eq!(approved.id, before[0].id);

        let rendered = service
            .invoke(
                &pay_query("alice"),
                &ResponseSelector::ResponseId("approved".to_string()),
                InvocationRequest::default(),
            )
            .await
            .unwrap();
        assert_eq!(rendered.body, "paid 750");
    }

    #[tokio::test]
    async fn test_update_template_errors() {
        let service = service();
        let created = service.create_template("alice", &pay_definition()).await.unwrap();

        let err = service
            .update_template("alice", "not-a-token", &pay_definition())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));

        let err = service
            .update_template("bob", &created.token.to_string(), &pay_definition())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));

        let mut refund = pay_definition();
        refund.route.name = "refund".to_string();
        refund.responses.clear();
        service.create_template("alice", &refund).await.unwrap();

        let mut moved = pay_definition();
        moved.route.name = "REFUND".to_string();
        let err = service
            .update_template("alice", &created.token.to_string(), &moved)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::DuplicateTemplate));
    }

    #[tokio::test]
    async fn test_invoke_not_found() {
        let service = service();
        service.create_template("alice", &pay_definition()).await.unwrap();

        let err = service
            .invoke(
                &RouteQuery::new("alice", "pay", "get", "v1"),
                &ResponseSelector::Index(0),
                InvocationRequest::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));

        let err = service
            .invoke(
                &pay_query("alice"),
                &ResponseSelector::Index(3),
                InvocationRequest::default(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.messages(), vec!["response #3 of template post alice/v1/pay not found"]);
    }

    #[tokio::test]
    async fn test_invoke_with_external_context() {
        let service = service();
        let mut def = pay_definition();
        def.responses[0].body = r#"{"echo": _context, "value": "_context.{{amount}}"}"#.to_string();
        service.create_template("alice", &def).await.unwrap();

        let rendered = service
            .invoke(
                &pay_query("alice"),
                &ResponseSelector::Index(0),
                InvocationRequest::from_raw_body(r#"{"card":"4111"}"#),
            )
            .await
            .unwrap();
        assert_eq!(rendered.body, r#"{"echo": {"card":"4111"}, "value": "500"}"#);
    }

    #[tokio::test]
    async fn test_generate_template() {
        let service = service();
        let body = serde_json::json!({"amount": 10});
        let view = service
            .generate_template("alice", RouteTemplate::generated(), &body)
            .await
            .unwrap();
        assert!(view.request.body().unwrap().contains("\"amount\": 10"));

        let found = service
            .get_template(&RouteQuery::new("alice", "route", "post", "v1"))
            .await
            .unwrap();
        assert_eq!(found.token, view.token);

        let err = service
            .generate_template("alice", RouteTemplate::generated(), &body)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::DuplicateTemplate));
    }

    #[tokio::test]
    async fn test_seed() {
        let config = crate::config::MockServerConfig::from_yaml(include_str!(
            "../demos/default-config.yaml"
        ))
        .unwrap();
        let service = TemplateService::in_memory(config.settings.clone());
        let seeded = service.seed(&config.users).await.unwrap();
        assert_eq!(seeded, config.template_count());
    }

    #[tokio::test]
    async fn test_update_template_rechecks_shared_responses() {
        let service = service();

        let mut pay = pay_definition();
        pay.request = pay
            .request
            .with_context(ContextDeclaration::declare(["amount", "secret"]));
        let created = service.create_template("alice", &pay).await.unwrap();

        let mut refund = pay_definition();
        refund.route.name = "refund".to_string();
        refund.responses.clear();
        refund.response_ids = vec!["approved".to_string()];
        service.create_template("alice", &refund).await.unwrap();

        pay.responses[0].body = r#"{"value": "_context.{{secret}}"}"#.to_string();
        let err = service
            .update_template("alice", &created.token.to_string(), &pay)
            .await
            .unwrap_err();
        match err {
            ServiceError::ValidationFailed(errors) => assert!(errors.iter().any(|e| {
                e.starts_with("template v1/refund/post: ") && e.contains("`secret`")
            })),
            other => panic!("unexpected error: {:?}", other),
        }

        let responses = service.list_responses("alice").await.unwrap();
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].body, r#"{"value": "_context.{{amount}}"}"#);

        // The owning template may still change it to context both declare.
        pay.responses[0].body = r#"{"paid": "_context.{{amount}}"}"#.to_string();
        service
            .update_template("alice", &created.token.to_string(), &pay)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_lost_template_race_leaves_no_responses() {
        let templates = Arc::new(RacingTemplates::default());
        templates.lose.store(true, Ordering::SeqCst);
        let service = TemplateService::new(
            templates.clone(),
            Arc::new(MemoryResponseRepository::new()),
            GlobalSettings::default(),
        );

        let err = service
            .create_template("alice", &pay_definition())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::DuplicateTemplate));
        assert!(service.list_responses("alice").await.unwrap().is_empty());

        templates.lose.store(false, Ordering::SeqCst);
        let created = service
            .create_template("alice", &pay_definition())
            .await
            .unwrap();
        assert_eq!(created.status, 201);
    }

    #[tokio::test]
    async fn test_lost_update_race_keeps_responses() {
        let templates = Arc::new(RacingTemplates::default());
        let service = TemplateService::new(
            templates.clone(),
            Arc::new(MemoryResponseRepository::new()),
            GlobalSettings::default(),
        );
        let created = service
            .create_template("alice", &pay_definition())
            .await
            .unwrap();

        let mut def = pay_definition();
        def.responses[0].body = "changed _context.{{amount}}".to_string();
        def.responses.push(response_def("extra", "{}"));

        templates.lose.store(true, Ordering::SeqCst);
        let err = service
            .update_template("alice", &created.token.to_string(), &def)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::DuplicateTemplate));

        let responses = service.list_responses("alice").await.unwrap();
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].body, r#"{"value": "_context.{{amount}}"}"#);
    }

    #[tokio::test]
    async fn test_failed_response_write_rolls_back_update() {
        let responses = Arc::new(FailingResponses::default());
        let service = TemplateService::new(
            Arc::new(MemoryTemplateRepository::new()),
            responses.clone(),
            GlobalSettings::default(),
        );
        let created = service
            .create_template("alice", &pay_definition())
            .await
            .unwrap();

        let mut def = pay_definition();
        def.route.version = "v2".to_string();
        def.responses[0].body = "changed _context.{{amount}}".to_string();
        def.responses.push(response_def("extra", "{}"));

        responses.fail_adds.store(true, Ordering::SeqCst);
        let err = service
            .update_template("alice", &created.token.to_string(), &def)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Repository(_)));

        let stored = service.list_responses("alice").await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].body, r#"{"value": "_context.{{amount}}"}"#);

        assert!(service.get_template(&pay_query("alice")).await.is_ok());
        let moved = RouteQuery::new("alice", "pay", "post", "v2");
        assert!(matches!(
            service.get_template(&moved).await,
            Err(ServiceError::NotFound(_))
        ));
    }
}
