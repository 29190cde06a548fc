use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use beacon_api::{error::RenderError, identity::DashboardIdentity, service::ServiceDescriptor};
use beacon_core::digest::sha256_hex;
use serde::Serialize;
use tera::{Context, Tera};

use crate::repo::RepoClient;

/// One rendered dashboard, content-addressed for no-op detection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DashboardDocument {
    pub uid: String,
    pub content: String,
    pub digest: String,
}

/// Anything that can produce the current template source.
#[async_trait]
pub trait TemplateSource {
    async fn fetch(&self) -> Result<String>;
}

/// Fetches the template file from the remote repository.
#[derive(Copy, Clone)]
pub struct RepoTemplateSource<'a> {
    pub repo: &'a RepoClient,
    pub path: &'a str,
}

#[async_trait]
impl TemplateSource for RepoTemplateSource<'_> {
    async fn fetch(&self) -> Result<String> {
        match self.repo.get_file(self.path).await? {
            Some(file) => String::from_utf8(file.content)
                .map_err(|error| anyhow!("template is not valid UTF-8: {error}")),
            None => bail!("no such template file: {:?}", self.path),
        }
    }
}

/// The closed placeholder set substituted into the template. Everything else
/// in the template passes through untouched; Grafana's own `{{...}}` syntax
/// has to be wrapped in raw blocks by the template author.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RenderContext<'a> {
    name: &'a str,
    namespace: &'a str,
    title: String,
    selector_prefix: String,
    uid: &'a str,
    numeric_id: u64,
}

pub struct DashboardTemplate {
    tera: Tera,
}

impl DashboardTemplate {
    const TEMPLATE_NAME: &'static str = "dashboard.json.tera";

    pub fn new(source: &str) -> Result<Self, RenderError> {
        let mut tera = Tera::default();
        tera.add_raw_template(Self::TEMPLATE_NAME, source)
            .map_err(|error| RenderError::Parse {
                reason: flatten(&error),
            })?;
        Ok(Self { tera })
    }

    /// Substitutes one service into the template.
    ///
    /// Pure: the same descriptor, identity, and template always produce
    /// byte-identical output. A placeholder without a known substitution
    /// fails this render only, and a render that is not well-formed JSON is
    /// an error rather than a partial document.
    pub fn render(
        &self,
        service: &ServiceDescriptor,
        identity: &DashboardIdentity,
    ) -> Result<DashboardDocument, RenderError> {
        let context = Context::from_serialize(RenderContext {
            name: service.name.as_str(),
            namespace: service.namespace.as_str(),
            title: service.title(),
            selector_prefix: service.selector_prefix(),
            uid: &identity.uid,
            numeric_id: identity.numeric_id,
        })
        .map_err(|error| RenderError::Unresolved {
            key: identity.uid.clone(),
            reason: flatten(&error),
        })?;

        let content = self
            .tera
            .render(Self::TEMPLATE_NAME, &context)
            .map_err(|error| RenderError::Unresolved {
                key: identity.uid.clone(),
                reason: flatten(&error),
            })?;

        if let Err(error) = ::serde_json::from_str::<::serde_json::Value>(&content) {
            return Err(RenderError::MalformedOutput {
                key: identity.uid.clone(),
                reason: error.to_string(),
            });
        }

        Ok(DashboardDocument {
            uid: identity.uid.clone(),
            digest: sha256_hex(&content),
            content,
        })
    }
}

/// Tera reports the interesting part (e.g. which variable was missing) in
/// its error sources, not in the top-level message.
fn flatten(error: &tera::Error) -> String {
    use std::error::Error;

    let mut reason = error.to_string();
    let mut source = error.source();
    while let Some(error) = source {
        reason = format!("{reason}: {error}");
        source = error.source();
    }
    reason
}

#[cfg(test)]
mod tests {
    use beacon_api::{identity::DashboardIdentity, service::ServiceDescriptor};

    use super::DashboardTemplate;

    const TEMPLATE: &str = r#"{
  "uid": "{{ uid }}",
  "id": {{ numericId }},
  "title": "{{ title }}",
  "tags": ["{{ namespace }}", "{{ name }}"],
  "panels": [
    {
      "targets": [
        { "expr": "up{job=~\"{{ selectorPrefix }}-.*\"}" }
      ]
    }
  ]
}"#;

    fn service() -> ServiceDescriptor {
        ServiceDescriptor::try_new("internal", "api").unwrap()
    }

    fn identity() -> DashboardIdentity {
        DashboardIdentity {
            uid: "api-internal".into(),
            numeric_id: 1,
        }
    }

    #[test]
    fn substitutes_the_whole_placeholder_set() {
        let template = DashboardTemplate::new(TEMPLATE).unwrap();
        let document = template.render(&service(), &identity()).unwrap();

        let value: ::serde_json::Value = ::serde_json::from_str(&document.content).unwrap();
        assert_eq!(value["uid"], "api-internal");
        assert_eq!(value["id"], 1);
        assert_eq!(value["title"], "API Dashboard");
        assert_eq!(value["panels"][0]["targets"][0]["expr"], "up{job=~\"internal-api-.*\"}");
    }

    #[test]
    fn rendering_is_deterministic() {
        let template = DashboardTemplate::new(TEMPLATE).unwrap();
        let first = template.render(&service(), &identity()).unwrap();
        let second = template.render(&service(), &identity()).unwrap();

        assert_eq!(first.content, second.content);
        assert_eq!(first.digest, second.digest);
    }

    #[test]
    fn unknown_placeholders_are_an_error_not_ignored() {
        let template = DashboardTemplate::new(r#"{"uid": "{{ uuid }}"}"#).unwrap();
        let error = template.render(&service(), &identity()).unwrap_err();
        assert_eq!(error.key(), Some("api-internal"));
    }

    #[test]
    fn malformed_output_is_an_error_not_a_partial_document() {
        let template = DashboardTemplate::new(r#"{"uid": {{ uid }}}"#).unwrap();
        assert!(template.render(&service(), &identity()).is_err());
    }

    #[test]
    fn grafana_syntax_passes_through_raw_blocks() {
        let template = DashboardTemplate::new(
            r#"{"uid": "{{ uid }}", "legend": "{% raw %}{{pod}}{% endraw %}"}"#,
        )
        .unwrap();
        let document = template.render(&service(), &identity()).unwrap();
        assert!(document.content.contains("{{pod}}"));
    }
}
