//! Validation of relative component sizes, reported to the client when it asks for a
//! layout analysis.

use serde_json::{json, Value as Json};
use tracing::warn;

use crate::connector::{ConnectorKey, ConnectorKind, Ui};

/// one dimension of a component size
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Size {
    /// sized by the content
    Undefined,
    /// a fixed size in pixels
    Fixed(f32),
    /// a percentage of the space the parent gives the component
    Relative(f32),
}

impl Size {
    /// returns `true` for percentage sizes
    pub fn is_relative(self) -> bool {
        matches!(self, Size::Relative(_))
    }

    /// returns `true` for content sized dimensions
    pub fn is_undefined(self) -> bool {
        matches!(self, Size::Undefined)
    }
}

impl std::fmt::Display for Size {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Size::Undefined => f.write_str("undefined"),
            Size::Fixed(px) => write!(f, "{}px", px),
            Size::Relative(pct) => write!(f, "{}%", pct),
        }
    }
}

/// The size of a component as declared by its logic.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LayoutInfo {
    /// the declared width
    pub width: Size,
    /// the declared height
    pub height: Size,
}

impl LayoutInfo {
    /// a component with both dimensions given
    pub fn new(width: Size, height: Size) -> Self {
        LayoutInfo { width, height }
    }
}

impl Default for LayoutInfo {
    fn default() -> Self {
        LayoutInfo::new(Size::Undefined, Size::Undefined)
    }
}

/// A component whose relative size can not be resolved, with the invalid layouts found
/// below it.
#[derive(Debug, Clone, PartialEq)]
pub struct InvalidLayout {
    /// the offending component
    pub connector: ConnectorKey,
    /// the id the client knows the component by
    pub connector_id: String,
    /// the height is relative inside a parent without a defined height
    pub invalid_height: bool,
    /// the width is relative inside a parent without a defined width
    pub invalid_width: bool,
    /// invalid layouts nested inside this one
    pub sub_errors: Vec<InvalidLayout>,
}

impl InvalidLayout {
    /// Renders the report sent to the client in the `invalidLayouts` meta section.
    pub fn to_json(&self) -> Json {
        let mut report = serde_json::Map::new();
        report.insert("id".to_string(), Json::String(self.connector_id.clone()));
        if self.invalid_height {
            report.insert(
                "heightMsg".to_string(),
                json!("A component with relative height needs a parent with defined height."),
            );
        }
        if self.invalid_width {
            report.insert(
                "widthMsg".to_string(),
                json!("A component with relative width needs a parent with defined width."),
            );
        }
        if !self.sub_errors.is_empty() {
            report.insert(
                "subErrors".to_string(),
                Json::Array(self.sub_errors.iter().map(InvalidLayout::to_json).collect()),
            );
        }
        Json::Object(report)
    }
}

/// Checks the declared sizes of a UI's components.
pub trait LayoutValidator: Send + Sync {
    /// returns the invalid layouts found in the visible component tree of `ui`
    fn validate(&self, ui: &Ui) -> Vec<InvalidLayout>;
}

/// The default validator: a component must not have a relative size in a dimension its
/// parent leaves undefined.
#[derive(Debug, Default, Clone, Copy)]
pub struct RelativeSizeValidator;

impl RelativeSizeValidator {
    fn check(
        &self,
        ui: &Ui,
        connector: ConnectorKey,
        errors: &mut Vec<InvalidLayout>,
    ) {
        let mut own_error = None;
        if ui.kind(connector) == Some(ConnectorKind::Component) {
            if let (Some(info), Some(parent)) = (layout_of(ui, connector), ui.parent(connector)) {
                // the root fills the browser window unless it declares otherwise
                let parent_info = match layout_of(ui, parent) {
                    Some(parent_info) => parent_info,
                    None if parent == ui.root() => {
                        LayoutInfo::new(Size::Relative(100.0), Size::Relative(100.0))
                    }
                    None => LayoutInfo::default(),
                };
                let invalid_height = info.height.is_relative() && parent_info.height.is_undefined();
                let invalid_width = info.width.is_relative() && parent_info.width.is_undefined();
                if invalid_height || invalid_width {
                    warn!(
                        "invalid relative size for {} (width {}, height {}) \
                         inside a parent sized {} x {}",
                        ui.connector_id(connector).unwrap_or("?"),
                        info.width,
                        info.height,
                        parent_info.width,
                        parent_info.height
                    );
                    own_error = Some(InvalidLayout {
                        connector,
                        connector_id: ui.connector_id(connector).unwrap_or_default().to_string(),
                        invalid_height,
                        invalid_width,
                        sub_errors: Vec::new(),
                    });
                }
            }
        }

        match own_error {
            Some(mut error) => {
                for child in ui.children(connector) {
                    if ui.is_visible(*child) {
                        self.check(ui, *child, &mut error.sub_errors);
                    }
                }
                errors.push(error);
            }
            None => {
                for child in ui.children(connector) {
                    if ui.is_visible(*child) {
                        self.check(ui, *child, errors);
                    }
                }
            }
        }
    }
}

fn layout_of(ui: &Ui, connector: ConnectorKey) -> Option<LayoutInfo> {
    ui.logic(connector).and_then(|logic| logic.layout())
}

impl LayoutValidator for RelativeSizeValidator {
    fn validate(&self, ui: &Ui) -> Vec<InvalidLayout> {
        let mut errors = Vec::new();
        self.check(ui, ui.root(), &mut errors);
        errors
    }
}
