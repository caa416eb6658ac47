use std::collections::HashMap;

use indexmap::{IndexMap, IndexSet};
use serde_json::{Map, Value as Json};
use tracing::debug;

use crate::connector::ConnectorType;
use crate::error::{Result, UidlError};

/// Session wide assignment of integer tags to connector types. Tags are handed out in
/// the order types are first painted and never change.
#[derive(Debug, Default)]
pub struct TypeTagTable {
    tags: HashMap<&'static str, u32>,
    next: u32,
}

impl TypeTagTable {
    /// an empty table
    pub fn new() -> Self {
        TypeTagTable::default()
    }

    /// the tag of `connector_type`, assigning the next free one on first use
    pub fn tag_for(&mut self, connector_type: &'static ConnectorType) -> u32 {
        let next = &mut self.next;
        *self.tags.entry(connector_type.name).or_insert_with(|| {
            let tag = *next;
            *next += 1;
            debug!("assigned tag {} to connector type {}", tag, connector_type.name);
            tag
        })
    }
}

struct OpenTag {
    name: String,
    attributes: Map<String, Json>,
    variables: Map<String, Json>,
    children: Vec<Json>,
}

impl OpenTag {
    fn new(name: &str) -> Self {
        OpenTag {
            name: name.to_string(),
            attributes: Map::new(),
            variables: Map::new(),
            children: Vec::new(),
        }
    }

    /// `[name, {attributes, "v": {variables}}, children...]`
    fn into_json(self) -> Json {
        let mut attributes = self.attributes;
        if !self.variables.is_empty() {
            attributes.insert("v".to_string(), Json::Object(self.variables));
        }
        let mut tag = Vec::with_capacity(self.children.len() + 2);
        tag.push(Json::String(self.name));
        tag.push(Json::Object(attributes));
        tag.extend(self.children);
        Json::Array(tag)
    }
}

fn invalid_uidl(message: String) -> UidlError {
    UidlError::StringErr(format!("invalid UIDL: {}", message))
}

/// Collects the legacy `changes` section of a response.
///
/// Legacy connectors paint themselves as nested tags with attributes, variables and text
/// content. Every completed top-level tag becomes one entry of `changes`. The target also
/// records which connector types and theme resources the painted content uses.
pub struct PaintTarget<'a> {
    type_tags: &'a mut TypeTagTable,
    changes: Vec<Json>,
    open: Vec<OpenTag>,
    used_types: IndexMap<&'static str, &'static ConnectorType>,
    used_resources: IndexSet<String>,
    custom_layout_arguments_open: bool,
    closed: bool,
}

impl<'a> PaintTarget<'a> {
    pub(crate) fn new(type_tags: &'a mut TypeTagTable) -> Self {
        PaintTarget {
            type_tags,
            changes: Vec::new(),
            open: Vec::new(),
            used_types: IndexMap::new(),
            used_resources: IndexSet::new(),
            custom_layout_arguments_open: false,
            closed: false,
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(invalid_uidl("attempted to write to a closed paint target".to_string()));
        }
        Ok(())
    }

    fn current(&mut self) -> Result<&mut OpenTag> {
        self.ensure_open()?;
        self.open
            .last_mut()
            .ok_or_else(|| invalid_uidl("no tag is open".to_string()))
    }

    /// opens a tag nested in the current one, or a new top-level tag
    pub fn start_tag(&mut self, name: &str) -> Result<()> {
        self.ensure_open()?;
        self.open.push(OpenTag::new(name));
        self.custom_layout_arguments_open = false;
        Ok(())
    }

    /// Closes the innermost open tag.
    ///
    /// # Errors
    /// fails when `name` does not match the innermost open tag
    pub fn end_tag(&mut self, name: &str) -> Result<()> {
        self.ensure_open()?;
        let tag = self
            .open
            .pop()
            .ok_or_else(|| invalid_uidl(format!("no open tag to end with {}", name)))?;
        if !tag.name.eq_ignore_ascii_case(name) {
            return Err(invalid_uidl(format!(
                "wrong ending tag: '{}' expected: '{}'",
                name, tag.name
            )));
        }
        let json = tag.into_json();
        match self.open.last_mut() {
            Some(parent) => parent.children.push(json),
            None => self.changes.push(json),
        }
        Ok(())
    }

    /// Adds an attribute to the current tag. A `template` attribute written while custom
    /// layout arguments are open records the template as a used theme resource.
    pub fn add_attribute(&mut self, name: &str, value: impl Into<Json>) -> Result<()> {
        let value = value.into();
        if self.custom_layout_arguments_open && name == "template" {
            if let Some(template) = value.as_str() {
                self.used_resources.insert(format!("layouts/{}.html", template));
            }
        }
        self.current()?.attributes.insert(name.to_string(), value);
        Ok(())
    }

    /// adds a variable the client reports changes of
    pub fn add_variable(&mut self, name: &str, value: impl Into<Json>) -> Result<()> {
        self.current()?.variables.insert(name.to_string(), value.into());
        Ok(())
    }

    /// adds text content to the current tag
    pub fn add_text(&mut self, text: &str) -> Result<()> {
        self.current()?.children.push(Json::String(text.to_string()));
        Ok(())
    }

    /// adds a `{tag: data}` section to the current tag
    pub fn add_section(&mut self, tag: &str, data: &str) -> Result<()> {
        let mut section = Map::new();
        section.insert(tag.to_string(), Json::String(data.to_string()));
        self.current()?.children.push(Json::Object(section));
        Ok(())
    }

    /// declares an upload stream variable of the current tag
    pub fn add_upload_stream_variable(&mut self, name: &str) -> Result<()> {
        self.start_tag("uploadstream")?;
        self.add_attribute("name", name)?;
        self.end_tag("uploadstream")
    }

    /// Starts the tag of a painted connector, named by the tag of its type.
    pub fn start_paintable(
        &mut self,
        connector_type: &'static ConnectorType,
        id: &str,
    ) -> Result<()> {
        let tag = self.tag(connector_type).to_string();
        self.start_tag(&tag)?;
        self.add_attribute("id", id)
    }

    /// ends the tag started by [`start_paintable`](Self::start_paintable)
    pub fn end_paintable(&mut self, connector_type: &'static ConnectorType) -> Result<()> {
        let tag = self.tag(connector_type).to_string();
        self.end_tag(&tag)
    }

    /// Marks the attributes that follow as custom layout arguments, until the next tag starts.
    pub fn open_custom_layout_arguments(&mut self) {
        self.custom_layout_arguments_open = true;
    }

    /// the integer tag the client knows `connector_type` by; records the type as used
    pub fn tag(&mut self, connector_type: &'static ConnectorType) -> u32 {
        self.used_types
            .entry(connector_type.name)
            .or_insert(connector_type);
        self.type_tags.tag_for(connector_type)
    }

    /// the types tagged so far, in first use order
    pub fn used_types(&self) -> impl Iterator<Item = &'static ConnectorType> + '_ {
        self.used_types.values().copied()
    }

    /// the theme resources referenced so far
    pub fn used_resources(&self) -> impl Iterator<Item = &str> + '_ {
        self.used_resources.iter().map(String::as_str)
    }

    pub(crate) fn type_tags(&mut self) -> &mut TypeTagTable {
        &mut *self.type_tags
    }

    /// Closes the target and returns the painted changes. Writing afterwards is an error.
    ///
    /// # Errors
    /// fails when a tag is still open
    pub fn close(&mut self) -> Result<Vec<Json>> {
        self.ensure_open()?;
        if let Some(tag) = self.open.last() {
            return Err(invalid_uidl(format!("tag '{}' was not closed", tag.name)));
        }
        self.closed = true;
        Ok(std::mem::take(&mut self.changes))
    }
}
