//! Static tool catalogue and `(issue type, format) -> tool` routing table.
//!
//! The registry is plain data checked once at startup. Execution validates
//! parameters against the tool's schema and hands the call to the external
//! [`ToolExecutor`].

use std::collections::{HashMap, HashSet};

use serde_json::{json, Value};
use tracing::debug;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    DocumentFormat, DocumentHandle, Issue, IssueType, TargetColorspace, TargetPageSize, ToolInvocation, ToolOutcome,
    ToolParams,
};
use crate::domain::ports::ToolExecutor;

/// Type of a tool parameter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParamKind {
    Number { min: f64, max: f64 },
    Integer { min: i64, max: i64 },
    Text,
    Bool,
    Choice(&'static [&'static str]),
    /// Array of 1-based page numbers
    PageList,
}

/// Value derived from the issue or the job options at planning time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Inference {
    PageWidth,
    PageHeight,
    PaperSize,
    /// The issue's `location` hint (e.g. the offending font name)
    IssueLocation,
    /// The issue's page, omitted for document-level issues
    IssuePages,
    Colorspace,
}

/// Default (or route override) for a parameter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParamDefault {
    None,
    Number(f64),
    Integer(i64),
    Text(&'static str),
    Bool(bool),
    Inferred(Inference),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParamSpec {
    pub name: &'static str,
    pub kind: ParamKind,
    pub required: bool,
    pub default: ParamDefault,
}

/// A registered tool.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ToolSpec {
    pub name: &'static str,
    pub format: DocumentFormat,
    /// Issue types this tool can address
    pub addresses: &'static [IssueType],
    pub params: &'static [ParamSpec],
}

impl ToolSpec {
    pub fn param(&self, name: &str) -> Option<&ParamSpec> {
        self.params.iter().find(|p| p.name == name)
    }

    pub fn handles(&self, issue_type: IssueType) -> bool {
        self.addresses.contains(&issue_type)
    }
}

/// Primary tool for an issue type in one format.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Route {
    pub issue_type: IssueType,
    pub format: DocumentFormat,
    pub tool: &'static str,
    pub overrides: &'static [(&'static str, ParamDefault)],
}

/// Job options parameter inference reads from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParamContext {
    pub page_size: TargetPageSize,
    pub colorspace: TargetColorspace,
}

const fn param(name: &'static str, kind: ParamKind, default: ParamDefault) -> ParamSpec {
    ParamSpec { name, kind, required: false, default }
}

const fn required(name: &'static str, kind: ParamKind, default: ParamDefault) -> ParamSpec {
    ParamSpec { name, kind, required: true, default }
}

const INCHES: ParamKind = ParamKind::Number { min: 0.0, max: 3.0 };
const PAGE_INCHES: ParamKind = ParamKind::Number { min: 1.0, max: 60.0 };
const POINTS: ParamKind = ParamKind::Number { min: 4.0, max: 96.0 };
const ORIENTATION: ParamKind = ParamKind::Choice(&["portrait", "landscape"]);

const MARGINS: &[ParamSpec] = &[
    required("top", INCHES, ParamDefault::Number(0.75)),
    required("bottom", INCHES, ParamDefault::Number(0.75)),
    required("left", INCHES, ParamDefault::Number(0.75)),
    required("right", INCHES, ParamDefault::Number(0.75)),
];

const PAGE_DIMENSIONS: &[ParamSpec] = &[
    param("width", PAGE_INCHES, ParamDefault::Inferred(Inference::PageWidth)),
    param("height", PAGE_INCHES, ParamDefault::Inferred(Inference::PageHeight)),
];

const FONT_SWAP: &[ParamSpec] = &[
    required("from_font", ParamKind::Text, ParamDefault::Inferred(Inference::IssueLocation)),
    required("to_font", ParamKind::Text, ParamDefault::Text("Arial")),
];

const MIN_FONT: &[ParamSpec] = &[
    required("min_size_pt", POINTS, ParamDefault::Number(10.0)),
    param("max_size_pt", POINTS, ParamDefault::None),
];

use DocumentFormat::{Docx, Pdf, Pptx, Xlsx};
use IssueType as T;

static TOOLS: &[ToolSpec] = &[
    // docx
    ToolSpec {
        name: "set_margins",
        format: Docx,
        addresses: &[T::MarginViolation, T::InconsistentMargins, T::ClippedContent],
        params: MARGINS,
    },
    ToolSpec { name: "set_page_size", format: Docx, addresses: &[T::PageSizeMismatch], params: PAGE_DIMENSIONS },
    ToolSpec {
        name: "set_orientation",
        format: Docx,
        addresses: &[T::WrongOrientation],
        params: &[param("orientation", ORIENTATION, ParamDefault::None)],
    },
    ToolSpec { name: "remove_blank_pages", format: Docx, addresses: &[T::BlankPage], params: &[] },
    ToolSpec {
        name: "remove_empty_paragraphs",
        format: Docx,
        addresses: &[T::BlankPage],
        params: &[param("max_consecutive", ParamKind::Integer { min: 0, max: 10 }, ParamDefault::Integer(1))],
    },
    ToolSpec {
        name: "fix_page_breaks",
        format: Docx,
        addresses: &[T::BadPageBreak],
        params: &[required(
            "strategy",
            ParamKind::Choice(&["remove_consecutive", "remove_all"]),
            ParamDefault::Text("remove_consecutive"),
        )],
    },
    ToolSpec { name: "remove_manual_breaks", format: Docx, addresses: &[T::BadPageBreak], params: &[] },
    ToolSpec {
        name: "set_widow_control",
        format: Docx,
        addresses: &[T::OrphanWidow],
        params: &[required("enabled", ParamKind::Bool, ParamDefault::Bool(true))],
    },
    ToolSpec { name: "replace_font", format: Docx, addresses: &[T::NonEmbeddedFont], params: FONT_SWAP },
    ToolSpec { name: "adjust_font_size", format: Docx, addresses: &[T::SmallFont, T::TextOverflow], params: MIN_FONT },
    ToolSpec {
        name: "adjust_paragraph_indents",
        format: Docx,
        addresses: &[T::TextOverflow, T::ClippedContent],
        params: &[
            required("left_inches", INCHES, ParamDefault::Number(0.5)),
            required("right_inches", INCHES, ParamDefault::Number(0.5)),
            required("strategy", ParamKind::Choice(&["cap", "reset"]), ParamDefault::Text("cap")),
        ],
    },
    ToolSpec { name: "auto_fit_tables", format: Docx, addresses: &[T::TableOverflow, T::TextOverflow], params: &[] },
    ToolSpec {
        name: "resize_table_text",
        format: Docx,
        addresses: &[T::TableOverflow],
        params: &[
            param("table_index", ParamKind::Integer { min: 0, max: 10_000 }, ParamDefault::Integer(0)),
            required("max_font_size_pt", POINTS, ParamDefault::Number(10.0)),
        ],
    },
    ToolSpec { name: "accept_tracked_changes", format: Docx, addresses: &[T::TrackedChanges], params: &[] },
    ToolSpec { name: "strip_hidden_text", format: Docx, addresses: &[T::HiddenContent], params: &[] },
    // xlsx
    ToolSpec {
        name: "set_xlsx_margins",
        format: Xlsx,
        addresses: &[T::MarginViolation, T::InconsistentMargins],
        params: MARGINS,
    },
    ToolSpec {
        name: "set_xlsx_page_setup",
        format: Xlsx,
        addresses: &[T::ClippedContent, T::TextOverflow, T::TableOverflow, T::WrongOrientation, T::PageSizeMismatch],
        params: &[
            param("orientation", ORIENTATION, ParamDefault::None),
            param("paper_size", ParamKind::Choice(&["letter", "a4"]), ParamDefault::Inferred(Inference::PaperSize)),
            required("fit_to_page", ParamKind::Bool, ParamDefault::Bool(true)),
        ],
    },
    // pptx
    ToolSpec {
        name: "set_pptx_slide_size",
        format: Pptx,
        addresses: &[T::PageSizeMismatch],
        params: &[
            required("width", PAGE_INCHES, ParamDefault::Number(10.0)),
            required("height", PAGE_INCHES, ParamDefault::Number(7.5)),
        ],
    },
    ToolSpec { name: "adjust_pptx_font_size", format: Pptx, addresses: &[T::SmallFont], params: MIN_FONT },
    ToolSpec {
        name: "reposition_pptx_shapes",
        format: Pptx,
        addresses: &[T::MarginViolation, T::InconsistentMargins, T::ClippedContent, T::ImageOverflow],
        params: &[required("margin_inches", INCHES, ParamDefault::Number(0.25))],
    },
    ToolSpec { name: "replace_pptx_font", format: Pptx, addresses: &[T::NonEmbeddedFont], params: FONT_SWAP },
    ToolSpec {
        name: "resize_pptx_text_boxes",
        format: Pptx,
        addresses: &[T::TextOverflow],
        params: &[required(
            "strategy",
            ParamKind::Choice(&["shrink_text", "resize_box"]),
            ParamDefault::Text("shrink_text"),
        )],
    },
    // pdf
    ToolSpec {
        name: "pdf_crop_margins",
        format: Pdf,
        addresses: &[T::MarginViolation, T::InconsistentMargins],
        params: &[required("margin_inches", INCHES, ParamDefault::Number(0.5))],
    },
    ToolSpec {
        name: "pdf_scale_content",
        format: Pdf,
        addresses: &[T::ClippedContent, T::TextOverflow, T::TableOverflow, T::ImageOverflow],
        params: &[
            required("scale_factor", ParamKind::Number { min: 0.5, max: 1.0 }, ParamDefault::Number(0.9)),
            param("pages", ParamKind::PageList, ParamDefault::Inferred(Inference::IssuePages)),
        ],
    },
    ToolSpec {
        name: "pdf_rotate_pages",
        format: Pdf,
        addresses: &[T::WrongOrientation],
        params: &[
            required("angle", ParamKind::Integer { min: 90, max: 270 }, ParamDefault::Integer(90)),
            param("pages", ParamKind::PageList, ParamDefault::Inferred(Inference::IssuePages)),
        ],
    },
    ToolSpec {
        name: "pdf_normalize_page_sizes",
        format: Pdf,
        addresses: &[T::PageSizeMismatch],
        params: PAGE_DIMENSIONS,
    },
    ToolSpec { name: "embed_fonts", format: Pdf, addresses: &[T::NonEmbeddedFont], params: &[] },
    ToolSpec {
        name: "convert_colorspace",
        format: Pdf,
        addresses: &[T::RgbColorspace],
        params: &[required(
            "target",
            ParamKind::Choice(&["cmyk", "rgb"]),
            ParamDefault::Inferred(Inference::Colorspace),
        )],
    },
];

const fn route(issue_type: IssueType, format: DocumentFormat, tool: &'static str) -> Route {
    Route { issue_type, format, tool, overrides: NO_OVERRIDES }
}

const fn route_with(
    issue_type: IssueType,
    format: DocumentFormat,
    tool: &'static str,
    overrides: &'static [(&'static str, ParamDefault)],
) -> Route {
    Route { issue_type, format, tool, overrides }
}

const NO_OVERRIDES: &[(&str, ParamDefault)] = &[];

const TIGHT_MARGINS: &[(&str, ParamDefault)] = &[
    ("top", ParamDefault::Number(0.5)),
    ("bottom", ParamDefault::Number(0.5)),
    ("left", ParamDefault::Number(0.5)),
    ("right", ParamDefault::Number(0.5)),
];

static ROUTES: &[Route] = &[
    // docx
    route(T::MarginViolation, Docx, "set_margins"),
    route(T::InconsistentMargins, Docx, "set_margins"),
    route_with(T::ClippedContent, Docx, "set_margins", TIGHT_MARGINS),
    route(T::TextOverflow, Docx, "adjust_paragraph_indents"),
    route(T::TableOverflow, Docx, "auto_fit_tables"),
    route(T::SmallFont, Docx, "adjust_font_size"),
    route(T::NonEmbeddedFont, Docx, "replace_font"),
    route_with(T::WrongOrientation, Docx, "set_orientation", &[("orientation", ParamDefault::Text("landscape"))]),
    route(T::PageSizeMismatch, Docx, "set_page_size"),
    route(T::BlankPage, Docx, "remove_blank_pages"),
    route(T::BadPageBreak, Docx, "fix_page_breaks"),
    route(T::OrphanWidow, Docx, "set_widow_control"),
    route(T::HiddenContent, Docx, "strip_hidden_text"),
    route(T::TrackedChanges, Docx, "accept_tracked_changes"),
    // xlsx
    route(T::MarginViolation, Xlsx, "set_xlsx_margins"),
    route(T::InconsistentMargins, Xlsx, "set_xlsx_margins"),
    route(T::ClippedContent, Xlsx, "set_xlsx_page_setup"),
    route(T::TextOverflow, Xlsx, "set_xlsx_page_setup"),
    route(T::TableOverflow, Xlsx, "set_xlsx_page_setup"),
    route_with(T::WrongOrientation, Xlsx, "set_xlsx_page_setup", &[("orientation", ParamDefault::Text("landscape"))]),
    route(T::PageSizeMismatch, Xlsx, "set_xlsx_page_setup"),
    // pptx
    route(T::MarginViolation, Pptx, "reposition_pptx_shapes"),
    route(T::InconsistentMargins, Pptx, "reposition_pptx_shapes"),
    route(T::ClippedContent, Pptx, "reposition_pptx_shapes"),
    route(T::ImageOverflow, Pptx, "reposition_pptx_shapes"),
    route(T::TextOverflow, Pptx, "resize_pptx_text_boxes"),
    route(T::SmallFont, Pptx, "adjust_pptx_font_size"),
    route(T::NonEmbeddedFont, Pptx, "replace_pptx_font"),
    route(T::PageSizeMismatch, Pptx, "set_pptx_slide_size"),
    // pdf
    route(T::MarginViolation, Pdf, "pdf_crop_margins"),
    route(T::InconsistentMargins, Pdf, "pdf_crop_margins"),
    route_with(T::ClippedContent, Pdf, "pdf_scale_content", &[("scale_factor", ParamDefault::Number(0.9))]),
    route_with(T::TextOverflow, Pdf, "pdf_scale_content", &[("scale_factor", ParamDefault::Number(0.92))]),
    route_with(T::TableOverflow, Pdf, "pdf_scale_content", &[("scale_factor", ParamDefault::Number(0.85))]),
    route_with(T::ImageOverflow, Pdf, "pdf_scale_content", &[("scale_factor", ParamDefault::Number(0.9))]),
    route(T::WrongOrientation, Pdf, "pdf_rotate_pages"),
    route(T::PageSizeMismatch, Pdf, "pdf_normalize_page_sizes"),
    route(T::NonEmbeddedFont, Pdf, "embed_fonts"),
    route(T::RgbColorspace, Pdf, "convert_colorspace"),
];

/// Issue types the engine reports but never routes to a tool.
static DETECT_ONLY: &[IssueType] = &[T::MisalignedElements, T::VisualInconsistency, T::LowDpiImage];

/// Tool selected for one issue, with the route's parameter overrides.
#[derive(Debug, Clone, Copy)]
pub struct ToolChoice {
    pub spec: &'static ToolSpec,
    pub overrides: &'static [(&'static str, ParamDefault)],
    /// Picked from the issue's `suggested_fix` rather than the routing table
    pub suggested: bool,
}

/// Validated tool catalogue and routing table.
#[derive(Debug, Clone)]
pub struct ToolRegistry {
    tools: HashMap<&'static str, &'static ToolSpec>,
    routes: HashMap<(IssueType, DocumentFormat), &'static Route>,
    detect_only: HashSet<IssueType>,
}

impl ToolRegistry {
    /// Build and validate the built-in registry.
    pub fn builtin() -> DomainResult<Self> {
        Self::from_tables(TOOLS, ROUTES, DETECT_ONLY)
    }

    pub fn from_tables(
        tools: &'static [ToolSpec],
        routes: &'static [Route],
        detect_only: &'static [IssueType],
    ) -> DomainResult<Self> {
        let mut registry = Self {
            tools: HashMap::new(),
            routes: HashMap::new(),
            detect_only: detect_only.iter().copied().collect(),
        };

        for tool in tools {
            if registry.tools.insert(tool.name, tool).is_some() {
                return Err(DomainError::Registry(format!("duplicate tool {}", tool.name)));
            }
        }
        for route in routes {
            if registry.routes.insert((route.issue_type, route.format), route).is_some() {
                return Err(DomainError::Registry(format!(
                    "duplicate route for ({}, {})",
                    route.issue_type, route.format
                )));
            }
        }

        registry.validate()?;
        debug!(tools = registry.tools.len(), routes = registry.routes.len(), "Tool registry validated");
        Ok(registry)
    }

    fn validate(&self) -> DomainResult<()> {
        for route in self.routes.values() {
            let spec = self.tools.get(route.tool).ok_or_else(|| {
                DomainError::Registry(format!("route ({}, {}) names unknown tool {}", route.issue_type, route.format, route.tool))
            })?;
            if spec.format != route.format {
                return Err(DomainError::Registry(format!(
                    "route ({}, {}) names {} which edits {}",
                    route.issue_type, route.format, spec.name, spec.format
                )));
            }
            if !spec.handles(route.issue_type) {
                return Err(DomainError::Registry(format!(
                    "tool {} does not address {}",
                    spec.name, route.issue_type
                )));
            }
            for (name, _) in route.overrides {
                if spec.param(name).is_none() {
                    return Err(DomainError::Registry(format!("route override {name} is not a parameter of {}", spec.name)));
                }
            }
        }

        for spec in self.tools.values() {
            for p in spec.params {
                if p.required && p.default == ParamDefault::None {
                    return Err(DomainError::Registry(format!(
                        "required parameter {}.{} has no default or inference",
                        spec.name, p.name
                    )));
                }
            }
        }

        for issue_type in IssueType::ALL {
            let routed = DocumentFormat::ALL.iter().any(|f| self.routes.contains_key(&(issue_type, *f)));
            match (routed, self.detect_only.contains(&issue_type)) {
                (false, false) => {
                    return Err(DomainError::Registry(format!("issue type {issue_type} has no route")));
                }
                (true, true) => {
                    return Err(DomainError::Registry(format!("detect-only issue type {issue_type} has a route")));
                }
                _ => {}
            }
        }
        Ok(())
    }

    pub fn tool(&self, name: &str) -> Option<&'static ToolSpec> {
        self.tools.get(name).copied()
    }

    pub fn route(&self, issue_type: IssueType, format: DocumentFormat) -> Option<&'static Route> {
        self.routes.get(&(issue_type, format)).copied()
    }

    pub fn is_detect_only(&self, issue_type: IssueType) -> bool {
        self.detect_only.contains(&issue_type)
    }

    /// Choose the tool for an issue in `format`: the issue's suggestion when it
    /// names a tool for that format and issue type, otherwise the routing table.
    pub fn choose(&self, issue: &Issue, format: DocumentFormat) -> Option<ToolChoice> {
        let route = self.route(issue.issue_type, format);

        if let Some(suggested) = issue.suggested_fix.as_deref().and_then(|name| self.tool(name)) {
            if suggested.format == format && suggested.handles(issue.issue_type) {
                let overrides = route.filter(|r| r.tool == suggested.name).map_or(NO_OVERRIDES, |r| r.overrides);
                return Some(ToolChoice { spec: suggested, overrides, suggested: true });
            }
        }

        let route = route?;
        let spec = self.tool(route.tool)?;
        Some(ToolChoice { spec, overrides: route.overrides, suggested: false })
    }

    /// Resolve concrete parameters for `choice` applied to `issue`.
    pub fn resolve_params(&self, choice: &ToolChoice, issue: &Issue, ctx: &ParamContext) -> Result<ToolParams, String> {
        let mut params = ToolParams::new();
        for spec in choice.spec.params {
            let source = choice
                .overrides
                .iter()
                .find(|(name, _)| *name == spec.name)
                .map_or(spec.default, |(_, value)| *value);

            match resolve_default(source, issue, ctx) {
                Some(value) => {
                    params.insert(spec.name.to_string(), value);
                }
                None if spec.required => {
                    return Err(format!("cannot infer required parameter {} for {}", spec.name, choice.spec.name));
                }
                None => {}
            }
        }
        Ok(params)
    }

    /// Check an invocation's parameters against its tool's schema.
    pub fn validate_invocation(&self, invocation: &ToolInvocation) -> DomainResult<&'static ToolSpec> {
        let spec = self
            .tool(&invocation.tool)
            .ok_or_else(|| DomainError::UnknownTool(invocation.tool.clone()))?;
        let invalid = |reason: String| DomainError::InvalidToolParams { tool: spec.name.to_string(), reason };

        if spec.format != invocation.target_format {
            return Err(invalid(format!("tool edits {} documents, not {}", spec.format, invocation.target_format)));
        }
        for (name, value) in &invocation.params {
            let p = spec.param(name).ok_or_else(|| invalid(format!("unknown parameter {name}")))?;
            check_kind(p.kind, value).map_err(|e| invalid(format!("{name}: {e}")))?;
        }
        for p in spec.params.iter().filter(|p| p.required) {
            if !invocation.params.contains_key(p.name) {
                return Err(invalid(format!("missing required parameter {}", p.name)));
            }
        }
        Ok(spec)
    }

    /// Validate and run an invocation against `document`.
    pub async fn execute(
        &self,
        executor: &dyn ToolExecutor,
        invocation: &ToolInvocation,
        document: &DocumentHandle,
    ) -> DomainResult<ToolOutcome> {
        self.validate_invocation(invocation)?;
        executor.invoke(invocation, document).await
    }
}

fn resolve_default(source: ParamDefault, issue: &Issue, ctx: &ParamContext) -> Option<Value> {
    match source {
        ParamDefault::None => None,
        ParamDefault::Number(n) => Some(json!(n)),
        ParamDefault::Integer(n) => Some(json!(n)),
        ParamDefault::Text(s) => Some(json!(s)),
        ParamDefault::Bool(b) => Some(json!(b)),
        ParamDefault::Inferred(inference) => match inference {
            Inference::PageWidth => ctx.page_size.dimensions_inches().map(|(w, _)| json!(w)),
            Inference::PageHeight => ctx.page_size.dimensions_inches().map(|(_, h)| json!(h)),
            Inference::PaperSize => match ctx.page_size {
                TargetPageSize::Original => None,
                size => Some(json!(size.as_str())),
            },
            Inference::IssueLocation => issue
                .location
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| json!(s)),
            Inference::IssuePages => issue.page.map(|p| json!([p])),
            // Print output defaults to CMYK when the job leaves colorspace alone
            Inference::Colorspace => match ctx.colorspace {
                TargetColorspace::Rgb => Some(json!("rgb")),
                TargetColorspace::Cmyk | TargetColorspace::Original => Some(json!("cmyk")),
            },
        },
    }
}

fn check_kind(kind: ParamKind, value: &Value) -> Result<(), String> {
    match kind {
        ParamKind::Number { min, max } => {
            let n = value.as_f64().ok_or("expected a number")?;
            if n < min || n > max {
                return Err(format!("{n} outside [{min}, {max}]"));
            }
        }
        ParamKind::Integer { min, max } => {
            let n = value.as_i64().ok_or("expected an integer")?;
            if n < min || n > max {
                return Err(format!("{n} outside [{min}, {max}]"));
            }
        }
        ParamKind::Text => {
            if value.as_str().is_none_or(str::is_empty) {
                return Err("expected a non-empty string".into());
            }
        }
        ParamKind::Bool => {
            value.as_bool().ok_or("expected a boolean")?;
        }
        ParamKind::Choice(options) => {
            let s = value.as_str().ok_or("expected a string")?;
            if !options.contains(&s) {
                return Err(format!("{s} not one of {options:?}"));
            }
        }
        ParamKind::PageList => {
            let pages = value.as_array().ok_or("expected an array of pages")?;
            if pages.iter().any(|p| p.as_u64().is_none_or(|n| n == 0)) {
                return Err("pages must be positive integers".into());
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{IssueSource, Severity};

    fn registry() -> ToolRegistry {
        ToolRegistry::builtin().unwrap()
    }

    fn issue(issue_type: IssueType) -> Issue {
        Issue::new(issue_type, Severity::Critical, IssueSource::Structural, "test")
    }

    #[test]
    fn test_builtin_registry_is_complete() {
        let registry = registry();
        for issue_type in IssueType::ALL {
            let routed = DocumentFormat::ALL.iter().any(|f| registry.route(issue_type, *f).is_some());
            assert!(routed || registry.is_detect_only(issue_type), "{issue_type} unroutable");
        }
    }

    #[test]
    fn test_route_to_unknown_tool_rejected() {
        static BAD_ROUTES: &[Route] = &[route(T::BlankPage, Docx, "shred_document")];
        let err = ToolRegistry::from_tables(TOOLS, BAD_ROUTES, DETECT_ONLY).unwrap_err();
        assert!(matches!(err, DomainError::Registry(_)));
    }

    #[test]
    fn test_route_format_mismatch_rejected() {
        static BAD_ROUTES: &[Route] = &[route(T::NonEmbeddedFont, Docx, "embed_fonts")];
        assert!(ToolRegistry::from_tables(TOOLS, BAD_ROUTES, DETECT_ONLY).is_err());
    }

    #[test]
    fn test_non_embedded_font_routes_per_format() {
        let registry = registry();
        let font = issue(IssueType::NonEmbeddedFont).at("Calibri");
        assert_eq!(registry.choose(&font, Pdf).unwrap().spec.name, "embed_fonts");
        assert_eq!(registry.choose(&font, Docx).unwrap().spec.name, "replace_font");
        assert!(registry.choose(&font, Xlsx).is_none());
    }

    #[test]
    fn test_suggested_fix_overrides_route() {
        let registry = registry();
        let table = issue(IssueType::TableOverflow).suggesting("resize_table_text");
        let choice = registry.choose(&table, Docx).unwrap();
        assert_eq!(choice.spec.name, "resize_table_text");
        assert!(choice.suggested);

        // A suggestion for another format falls back to the routing table
        let table = issue(IssueType::TableOverflow).suggesting("pdf_scale_content");
        assert_eq!(registry.choose(&table, Docx).unwrap().spec.name, "auto_fit_tables");
    }

    #[test]
    fn test_route_overrides_apply() {
        let registry = registry();
        let clipped = issue(IssueType::ClippedContent).on_page(3);
        let choice = registry.choose(&clipped, Pdf).unwrap();
        let params = registry.resolve_params(&choice, &clipped, &ParamContext::default()).unwrap();
        assert_eq!(params["scale_factor"], json!(0.9));
        assert_eq!(params["pages"], json!([3]));

        let choice = registry.choose(&clipped, Docx).unwrap();
        let params = registry.resolve_params(&choice, &clipped, &ParamContext::default()).unwrap();
        assert_eq!(params["top"], json!(0.5));
    }

    #[test]
    fn test_page_size_inferred_from_job() {
        let registry = registry();
        let mismatch = issue(IssueType::PageSizeMismatch);
        let choice = registry.choose(&mismatch, Docx).unwrap();

        let ctx = ParamContext { page_size: TargetPageSize::A4, ..ParamContext::default() };
        let params = registry.resolve_params(&choice, &mismatch, &ctx).unwrap();
        assert_eq!(params["width"], json!(8.27));

        let params = registry.resolve_params(&choice, &mismatch, &ParamContext::default()).unwrap();
        assert!(params.is_empty());
    }

    #[test]
    fn test_font_swap_needs_location() {
        let registry = registry();
        let font = issue(IssueType::NonEmbeddedFont);
        let choice = registry.choose(&font, Docx).unwrap();
        assert!(registry.resolve_params(&choice, &font, &ParamContext::default()).is_err());

        let font = font.at("Comic Sans MS");
        let params = registry.resolve_params(&choice, &font, &ParamContext::default()).unwrap();
        assert_eq!(params["from_font"], json!("Comic Sans MS"));
    }

    #[test]
    fn test_validate_invocation() {
        let registry = registry();
        let mut invocation = ToolInvocation {
            tool: "pdf_scale_content".into(),
            target_format: Pdf,
            params: ToolParams::new(),
            issues: vec![],
            fallback: true,
            rationale: "test".into(),
        };
        assert!(matches!(
            registry.validate_invocation(&invocation),
            Err(DomainError::InvalidToolParams { .. })
        ));

        invocation.params.insert("scale_factor".into(), json!(1.5));
        assert!(registry.validate_invocation(&invocation).is_err());

        invocation.params.insert("scale_factor".into(), json!(0.85));
        assert!(registry.validate_invocation(&invocation).is_ok());

        invocation.params.insert("pages".into(), json!([0]));
        assert!(registry.validate_invocation(&invocation).is_err());

        invocation.tool = "nonexistent".into();
        assert!(matches!(registry.validate_invocation(&invocation), Err(DomainError::UnknownTool(_))));
    }
}
