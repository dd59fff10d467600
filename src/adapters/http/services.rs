//! Port implementations backed by the HTTP document services.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    DocumentHandle, Issue, PageImage, PlanDecision, RenderSet, ToolInvocation, ToolOutcome, ToolParams,
};
use crate::domain::ports::{DiagnosisProvider, RationaleProvider, Renderer, ToolExecutor};

use super::client::{HttpError, ServiceClient};

#[derive(Serialize)]
struct VisualRequest<'a> {
    pages: &'a [PageImage],
}

#[derive(Serialize)]
struct DocumentRequest<'a> {
    document: &'a DocumentHandle,
}

#[derive(Deserialize)]
struct IssuesReply {
    issues: Vec<Issue>,
}

#[derive(Deserialize)]
struct DocumentReply {
    document: DocumentHandle,
}

#[derive(Serialize)]
struct InvokeRequest<'a> {
    document: &'a DocumentHandle,
    params: &'a ToolParams,
}

#[derive(Serialize)]
struct RationaleRequest<'a> {
    issue: &'a Issue,
    decision: &'a PlanDecision,
}

#[derive(Deserialize)]
struct RationaleReply {
    rationale: String,
}

fn provider_error(service: &str, err: HttpError) -> DomainError {
    DomainError::Provider(format!("{service}: {err}"))
}

/// Visual and structural diagnosis over HTTP.
pub struct HttpDiagnosisProvider {
    client: Arc<ServiceClient>,
}

impl HttpDiagnosisProvider {
    pub fn new(client: Arc<ServiceClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl DiagnosisProvider for HttpDiagnosisProvider {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn diagnose_visual(&self, pages: &[PageImage]) -> DomainResult<Vec<Issue>> {
        let reply: IssuesReply = self
            .client
            .post_json("diagnose/visual", &VisualRequest { pages })
            .await
            .map_err(|e| provider_error("visual diagnosis", e))?;
        Ok(reply.issues)
    }

    async fn diagnose_structural(&self, document: &DocumentHandle) -> DomainResult<Vec<Issue>> {
        let reply: IssuesReply = self
            .client
            .post_json("diagnose/structural", &DocumentRequest { document })
            .await
            .map_err(|e| provider_error("structural diagnosis", e))?;
        Ok(reply.issues)
    }
}

/// Tool invocations over HTTP. A non-success reply from the tool itself is a
/// failed outcome; transport and protocol failures are `ToolExecution` errors.
pub struct HttpToolExecutor {
    client: Arc<ServiceClient>,
}

impl HttpToolExecutor {
    pub fn new(client: Arc<ServiceClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ToolExecutor for HttpToolExecutor {
    async fn invoke(&self, invocation: &ToolInvocation, document: &DocumentHandle) -> DomainResult<ToolOutcome> {
        let request = InvokeRequest {
            document,
            params: &invocation.params,
        };
        self.client
            .post_json(&format!("tools/{}/invoke", invocation.tool), &request)
            .await
            .map_err(|e| DomainError::ToolExecution {
                tool: invocation.tool.clone(),
                message: e.to_string(),
            })
    }
}

/// PDF conversion and page rendering over HTTP.
pub struct HttpRenderer {
    client: Arc<ServiceClient>,
}

impl HttpRenderer {
    pub fn new(client: Arc<ServiceClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Renderer for HttpRenderer {
    async fn convert_to_pdf(&self, document: &DocumentHandle) -> DomainResult<DocumentHandle> {
        let reply: DocumentReply = self
            .client
            .post_json("render/convert", &DocumentRequest { document })
            .await
            .map_err(|e| provider_error("conversion", e))?;
        Ok(reply.document)
    }

    async fn render_pages(&self, pdf: &DocumentHandle) -> DomainResult<RenderSet> {
        self.client
            .post_json("render/pages", &DocumentRequest { document: pdf })
            .await
            .map_err(|e| provider_error("rendering", e))
    }
}

pub struct HttpRationaleProvider {
    client: Arc<ServiceClient>,
}

impl HttpRationaleProvider {
    pub fn new(client: Arc<ServiceClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl RationaleProvider for HttpRationaleProvider {
    async fn explain(&self, issue: &Issue, decision: &PlanDecision) -> DomainResult<String> {
        let reply: RationaleReply = self
            .client
            .post_json("rationale", &RationaleRequest { issue, decision })
            .await
            .map_err(|e| provider_error("rationale", e))?;
        Ok(reply.rationale)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::http::client::ServiceClientConfig;
    use crate::domain::models::{DocumentFormat, IssueType, Severity};
    use serde_json::json;

    fn client(url: String) -> Arc<ServiceClient> {
        let config = ServiceClientConfig {
            base_url: url,
            api_key: None,
            requests_per_second: 50,
            burst_size: 50,
            max_retries: 1,
            initial_backoff_ms: 1,
            max_backoff_ms: 2,
        };
        Arc::new(ServiceClient::new(config).unwrap())
    }

    fn pdf() -> DocumentHandle {
        DocumentHandle::new("s3://bucket/report.pdf", DocumentFormat::Pdf, "abc123")
    }

    #[tokio::test]
    async fn test_structural_diagnosis_decodes_issues() {
        let mut server = mockito::Server::new_async().await;
        let reply = json!({
            "issues": [{
                "type": "non_embedded_font",
                "severity": "critical",
                "source": "structural",
                "description": "Calibri is not embedded",
                "location": "Calibri"
            }]
        });
        server
            .mock("POST", "/diagnose/structural")
            .with_header("content-type", "application/json")
            .with_body(reply.to_string())
            .create_async()
            .await;

        let provider = HttpDiagnosisProvider::new(client(server.url()));
        let issues = provider.diagnose_structural(&pdf()).await.unwrap();

        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].issue_type, IssueType::NonEmbeddedFont);
        assert_eq!(issues[0].severity, Severity::Critical);
        assert_eq!(issues[0].location.as_deref(), Some("Calibri"));
    }

    #[tokio::test]
    async fn test_diagnosis_failure_is_provider_error() {
        let mut server = mockito::Server::new_async().await;
        server.mock("POST", "/diagnose/visual").with_status(500).create_async().await;

        let provider = HttpDiagnosisProvider::new(client(server.url()));
        let err = provider.diagnose_visual(&[]).await.unwrap_err();
        assert!(matches!(err, DomainError::Provider(_)));
    }

    #[tokio::test]
    async fn test_tool_invocation_posts_params() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/tools/embed_fonts/invoke")
            .match_body(mockito::Matcher::PartialJson(json!({"params": {}})))
            .with_header("content-type", "application/json")
            .with_body(r#"{"success": false, "error": "font file missing"}"#)
            .create_async()
            .await;

        let invocation = ToolInvocation {
            tool: "embed_fonts".into(),
            target_format: DocumentFormat::Pdf,
            params: ToolParams::new(),
            issues: vec![],
            fallback: true,
            rationale: "fallback".into(),
        };
        let outcome = HttpToolExecutor::new(client(server.url()))
            .invoke(&invocation, &pdf())
            .await
            .unwrap();

        assert!(!outcome.success);
        assert_eq!(outcome.error.as_deref(), Some("font file missing"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_tool_transport_failure_is_tool_error() {
        let mut server = mockito::Server::new_async().await;
        server.mock("POST", "/tools/set_margins/invoke").with_status(404).create_async().await;

        let invocation = ToolInvocation {
            tool: "set_margins".into(),
            target_format: DocumentFormat::Docx,
            params: ToolParams::new(),
            issues: vec![],
            fallback: false,
            rationale: "r".into(),
        };
        let err = HttpToolExecutor::new(client(server.url()))
            .invoke(&invocation, &pdf())
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::ToolExecution { ref tool, .. } if tool == "set_margins"));
    }

    #[tokio::test]
    async fn test_render_pages() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/render/pages")
            .with_header("content-type", "application/json")
            .with_body(r#"{"pages": [{"page": 1, "uri": "p1.png"}, {"page": 2, "uri": "p2.png"}]}"#)
            .create_async()
            .await;

        let render = HttpRenderer::new(client(server.url())).render_pages(&pdf()).await.unwrap();
        assert_eq!(render.page_count(), 2);
        assert_eq!(render.page(2).map(|p| p.uri.as_str()), Some("p2.png"));
    }
}
